use crate::error::LoadError;
use crate::table::{Cell, FieldType, Table};
use chrono::NaiveDate;

const WAREHOUSE_DATE_FORMAT: &str = "%Y-%m-%d";

/// Converts every warehouse `DATE` column into standard dates.
///
/// Only columns typed `FieldType::WarehouseDate` are touched and they come out
/// typed `FieldType::Date`, so a second pass finds nothing to convert.
pub fn normalize(mut table: Table) -> Result<Table, LoadError> {
    let date_cols: Vec<usize> = table
        .columns
        .iter()
        .enumerate()
        .filter(|(_, c)| c.field_type == FieldType::WarehouseDate)
        .map(|(idx, _)| idx)
        .collect();

    for idx in date_cols {
        for row in table.rows.iter_mut() {
            let Some(cell) = row.get_mut(idx) else { continue };
            if let Cell::WarehouseDate(raw) = cell {
                let parsed = NaiveDate::parse_from_str(raw, WAREHOUSE_DATE_FORMAT).map_err(|_| {
                    LoadError::InvalidDate {
                        column: table.columns[idx].name.clone(),
                        value: raw.clone(),
                    }
                })?;
                *cell = Cell::Date(parsed);
            }
        }
        table.columns[idx].field_type = FieldType::Date;
    }

    Ok(table)
}
