use chrono::{NaiveDate, NaiveDateTime};

/// Column types as reported by the warehouse schema.
///
/// `WarehouseDate` holds the raw `DATE` text exactly as the warehouse returned
/// it; the normalizer turns those columns into `Date`.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum FieldType {
    String,
    Integer,
    Float,
    Numeric,
    Boolean,
    Timestamp,
    Datetime,
    WarehouseDate,
    Date,
    Geography,
    Other(String),
}

impl FieldType {
    pub fn from_warehouse(name: &str) -> Self {
        match name.to_ascii_uppercase().as_str() {
            "STRING" => Self::String,
            "INTEGER" | "INT64" => Self::Integer,
            "FLOAT" | "FLOAT64" => Self::Float,
            "NUMERIC" | "BIGNUMERIC" | "BIGDECIMAL" | "DECIMAL" => Self::Numeric,
            "BOOLEAN" | "BOOL" => Self::Boolean,
            "TIMESTAMP" => Self::Timestamp,
            "DATETIME" => Self::Datetime,
            "DATE" => Self::WarehouseDate,
            "GEOGRAPHY" => Self::Geography,
            other => Self::Other(other.to_string()),
        }
    }

    pub fn duckdb_type(&self) -> &'static str {
        match self {
            Self::Integer => "BIGINT",
            Self::Float | Self::Numeric => "DOUBLE",
            Self::Boolean => "BOOLEAN",
            Self::Timestamp | Self::Datetime => "TIMESTAMP",
            Self::Date => "DATE",
            Self::String | Self::WarehouseDate | Self::Geography | Self::Other(_) => "VARCHAR",
        }
    }
}

#[derive(Clone, Debug, PartialEq)]
pub enum Cell {
    Null,
    Text(String),
    Int(i64),
    Float(f64),
    Bool(bool),
    WarehouseDate(String),
    Date(NaiveDate),
    Timestamp(NaiveDateTime),
}

impl Cell {
    /// Text form of identifiers, which the warehouse may type as either
    /// STRING or INTEGER.
    pub fn to_text(&self) -> Option<String> {
        match self {
            Cell::Text(s) | Cell::WarehouseDate(s) => Some(s.clone()),
            Cell::Int(v) => Some(v.to_string()),
            Cell::Float(v) => Some(v.to_string()),
            Cell::Bool(v) => Some(v.to_string()),
            Cell::Date(d) => Some(d.format("%Y-%m-%d").to_string()),
            Cell::Timestamp(ts) => Some(ts.format("%Y-%m-%d %H:%M:%S").to_string()),
            Cell::Null => None,
        }
    }

    pub fn as_i64(&self) -> Option<i64> {
        match self {
            Cell::Int(v) => Some(*v),
            Cell::Text(s) => s.parse().ok(),
            _ => None,
        }
    }

    pub fn as_f64(&self) -> Option<f64> {
        match self {
            Cell::Float(v) => Some(*v),
            Cell::Int(v) => Some(*v as f64),
            Cell::Text(s) => s.parse().ok(),
            _ => None,
        }
    }

    pub fn as_date(&self) -> Option<NaiveDate> {
        match self {
            Cell::Date(d) => Some(*d),
            Cell::Timestamp(ts) => Some(ts.date()),
            _ => None,
        }
    }

    pub fn as_timestamp(&self) -> Option<NaiveDateTime> {
        match self {
            Cell::Timestamp(ts) => Some(*ts),
            Cell::Date(d) => d.and_hms_opt(0, 0, 0),
            _ => None,
        }
    }
}

#[derive(Clone, Debug, PartialEq)]
pub struct Column {
    pub name: String,
    pub field_type: FieldType,
}

/// A query result: ordered columns and rows of cells, one cell per column.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct Table {
    pub columns: Vec<Column>,
    pub rows: Vec<Vec<Cell>>,
}

impl Table {
    pub fn new(columns: Vec<Column>) -> Self {
        Self {
            columns,
            rows: Vec::new(),
        }
    }

    pub fn column_index(&self, name: &str) -> Option<usize> {
        self.columns.iter().position(|c| c.name == name)
    }

    pub fn len(&self) -> usize {
        self.rows.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }

    /// Cell at `row` for the named column, `Cell::Null` when the column is absent.
    pub fn get(&self, row: usize, column: &str) -> &Cell {
        static NULL: Cell = Cell::Null;
        match (self.column_index(column), self.rows.get(row)) {
            (Some(idx), Some(cells)) => cells.get(idx).unwrap_or(&NULL),
            _ => &NULL,
        }
    }
}
