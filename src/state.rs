use crate::cache::ReportCache;
use crate::config::AppSettings;
use crate::error::LoadError;
use crate::loader::{DashboardData, DataLoader};
use chrono::NaiveDate;
use once_cell::sync::Lazy;
use std::sync::Arc;

/// Earliest reference date the date picker accepts.
pub static MIN_DATE: Lazy<NaiveDate> =
    Lazy::new(|| NaiveDate::from_ymd_opt(2022, 1, 1).expect("date"));

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Selection {
    Unset,
    Loaded { ref_date: NaiveDate },
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub enum DateInput {
    Picked(NaiveDate),
    Unparseable(String),
}

impl DateInput {
    pub fn parse(raw: &str) -> Self {
        match NaiveDate::parse_from_str(raw.trim(), "%Y-%m-%d") {
            Ok(date) => Self::Picked(date),
            Err(_) => Self::Unparseable(raw.to_string()),
        }
    }
}

impl Selection {
    /// Next selection after the user submits `input`. Rejected input keeps
    /// the current selection; nothing leads back to `Unset`.
    pub fn transition(self, input: DateInput) -> Selection {
        match input {
            DateInput::Picked(ref_date) if ref_date >= *MIN_DATE => Selection::Loaded { ref_date },
            DateInput::Picked(date) => {
                log::warn!("ignoring date {} before {}", date, *MIN_DATE);
                self
            }
            DateInput::Unparseable(raw) => {
                log::warn!("ignoring unparseable date {:?}", raw);
                self
            }
        }
    }

    pub fn ref_date(&self) -> Option<NaiveDate> {
        match self {
            Selection::Unset => None,
            Selection::Loaded { ref_date } => Some(*ref_date),
        }
    }
}

#[derive(Clone)]
pub struct AppState {
    pub loader: DataLoader,
    pub cache: Arc<tokio::sync::Mutex<ReportCache<NaiveDate, DashboardData>>>,
    pub selection: Arc<std::sync::Mutex<Selection>>,
    pub page: Arc<AppSettings>,
}

impl AppState {
    pub fn new(loader: DataLoader, cache_capacity: usize, page: AppSettings) -> Self {
        Self {
            loader,
            cache: Arc::new(tokio::sync::Mutex::new(ReportCache::new(cache_capacity))),
            selection: Arc::new(std::sync::Mutex::new(Selection::Unset)),
            page: Arc::new(page),
        }
    }

    /// Applies `input` to the shared selection and returns the result.
    pub fn select(&self, input: DateInput) -> Selection {
        let mut selection = match self.selection.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        };
        *selection = selection.transition(input);
        *selection
    }

    pub fn selection(&self) -> Selection {
        match self.selection.lock() {
            Ok(guard) => *guard,
            Err(poisoned) => *poisoned.into_inner(),
        }
    }

    /// Cached data for `ref_date`, loading it from the warehouse on a miss.
    pub async fn dashboard_data(&self, ref_date: NaiveDate) -> Result<Arc<DashboardData>, LoadError> {
        if let Some(hit) = self.cache.lock().await.get(&ref_date) {
            log::debug!("cache hit for {}", ref_date);
            return Ok(hit);
        }
        let data = self.loader.load_dashboard(ref_date).await?;
        let mut cache = self.cache.lock().await;
        let data = cache.insert(ref_date, data);
        log::debug!("cached {} ({} dates held)", ref_date, cache.len());
        Ok(data)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::loader::tests::fake;

    fn date(s: &str) -> NaiveDate {
        NaiveDate::parse_from_str(s, "%Y-%m-%d").unwrap()
    }

    #[test]
    fn picking_a_valid_date_loads_it() {
        let next = Selection::Unset.transition(DateInput::Picked(date("2024-02-01")));
        assert_eq!(next, Selection::Loaded { ref_date: date("2024-02-01") });

        let again = next.transition(DateInput::parse("2023-06-15"));
        assert_eq!(again.ref_date(), Some(date("2023-06-15")));
    }

    #[test]
    fn minimum_date_is_inclusive() {
        let next = Selection::Unset.transition(DateInput::Picked(*MIN_DATE));
        assert_eq!(next.ref_date(), Some(*MIN_DATE));
    }

    #[test]
    fn rejected_input_keeps_selection() {
        assert_eq!(
            Selection::Unset.transition(DateInput::parse("2021-12-31")),
            Selection::Unset
        );
        let loaded = Selection::Loaded { ref_date: date("2024-02-01") };
        assert_eq!(loaded.transition(DateInput::parse("2021-12-31")), loaded);
        assert_eq!(loaded.transition(DateInput::parse("01/02/2024")), loaded);
        assert_eq!(loaded.transition(DateInput::parse("")), loaded);
    }

    #[tokio::test]
    async fn dashboard_data_is_cached_per_date() {
        let warehouse = Arc::new(fake());
        let state = AppState::new(DataLoader::new(warehouse.clone()), 4, AppSettings::default());

        let first = state.dashboard_data(date("2024-02-01")).await.unwrap();
        let second = state.dashboard_data(date("2024-02-01")).await.unwrap();
        assert!(Arc::ptr_eq(&first, &second));
        assert_eq!(warehouse.seen.lock().unwrap().len(), 2);

        state.dashboard_data(date("2024-01-31")).await.unwrap();
        assert_eq!(warehouse.seen.lock().unwrap().len(), 4);
    }

    #[test]
    fn shared_selection_follows_transitions() {
        let state = AppState::new(DataLoader::new(Arc::new(fake())), 1, AppSettings::default());
        assert_eq!(state.selection(), Selection::Unset);
        state.select(DateInput::parse("2024-02-01"));
        state.select(DateInput::parse("garbage"));
        assert_eq!(state.selection().ref_date(), Some(date("2024-02-01")));
    }
}
