//! The data-loading layer: build the query for a report, run it, normalize
//! dates, then either write the result to disk or hand it back.

use crate::error::LoadError;
use crate::normalize::normalize;
use crate::persist::persist;
use crate::query::{Report, TrailingWindow};
use crate::records::{ChamadoRecord, DailyCount};
use crate::table::Table;
use crate::warehouse::Warehouse;
use chrono::NaiveDate;
use std::path::{Path, PathBuf};
use std::sync::Arc;

#[derive(Debug)]
pub enum Loaded {
    Saved(PathBuf),
    InMemory(Table),
}

/// Everything one dashboard render needs for a reference date.
#[derive(Clone, Debug, PartialEq)]
pub struct DashboardData {
    pub ref_date: NaiveDate,
    pub last_days: Vec<DailyCount>,
    pub records: Vec<ChamadoRecord>,
}

#[derive(Clone)]
pub struct DataLoader {
    warehouse: Arc<dyn Warehouse>,
}

impl DataLoader {
    pub fn new(warehouse: Arc<dyn Warehouse>) -> Self {
        Self { warehouse }
    }

    /// Runs `report`. With `dir_to_save` the normalized table is written there
    /// and only its path comes back; without it the table is returned and
    /// nothing touches the filesystem.
    pub async fn load(&self, report: &Report, dir_to_save: Option<&Path>) -> Result<Loaded, LoadError> {
        report.validate()?;
        let query = report.query();
        let table = normalize(self.warehouse.run_query(&query).await?)?;

        match dir_to_save {
            Some(dir) => {
                let path = persist(table, report.file_format(), dir, &report.file_name()).await?;
                Ok(Loaded::Saved(path))
            }
            None => Ok(Loaded::InMemory(table)),
        }
    }

    async fn load_table(&self, report: &Report) -> Result<Table, LoadError> {
        match self.load(report, None).await? {
            Loaded::InMemory(table) => Ok(table),
            Loaded::Saved(path) => Err(LoadError::InvalidReport(format!(
                "expected an in-memory table, got {}",
                path.display()
            ))),
        }
    }

    pub async fn load_dashboard(&self, ref_date: NaiveDate) -> Result<DashboardData, LoadError> {
        log::info!("loading dashboard data for {}", ref_date);
        let window = TrailingWindow::SevenDays;
        let counts = self
            .load_table(&Report::TrailingCounts { ref_date, window })
            .await?;
        let daily = self.load_table(&Report::DailyDetail { ref_date }).await?;

        let last_days = DailyCount::densify(
            &DailyCount::from_table(&counts),
            window.first_day(ref_date),
            ref_date,
        );
        Ok(DashboardData {
            ref_date,
            last_days,
            records: ChamadoRecord::from_table(&daily),
        })
    }
}
