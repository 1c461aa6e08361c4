use crate::error::LoadError;
use crate::query::FileFormat;
use crate::table::{Cell, Table};
use duckdb::types::Value;
use duckdb::{params_from_iter, Connection};
use std::path::{Path, PathBuf};

const STAGING_TABLE: &str = "staging";
const INDEX_COLUMN: &str = "__row_index";

/// Writes `table` into `dir/file_name`, creating `dir` when it does not exist.
pub async fn persist(
    table: Table,
    format: FileFormat,
    dir: &Path,
    file_name: &str,
) -> Result<PathBuf, LoadError> {
    let dir = dir.to_path_buf();
    let path = dir.join(file_name);
    let target = path.clone();
    let rows = table.len();
    tokio::task::spawn_blocking(move || {
        ensure_dir(&dir)?;
        write_table(&table, format, &target)
    })
    .await??;
    log::info!("wrote {} rows to {}", rows, path.display());
    Ok(path)
}

fn ensure_dir(dir: &Path) -> Result<(), LoadError> {
    if dir.is_dir() {
        return Ok(());
    }
    log::info!("creating {}", dir.display());
    std::fs::create_dir_all(dir).map_err(|source| LoadError::Io {
        path: dir.to_path_buf(),
        source,
    })
}

fn write_table(table: &Table, format: FileFormat, path: &Path) -> Result<(), LoadError> {
    if table.columns.is_empty() {
        return Err(LoadError::Decode("result has no columns to write".to_string()));
    }
    let mut conn = Connection::open_in_memory()?;
    let with_index = format == FileFormat::Csv;
    stage(&mut conn, table, with_index)?;

    let target = quote_literal(&path.to_string_lossy());
    let copy = match format {
        FileFormat::Parquet => format!(
            "COPY {STAGING_TABLE} TO {target} (FORMAT PARQUET, COMPRESSION GZIP)"
        ),
        FileFormat::Csv => {
            let mut select = vec![quote_ident(INDEX_COLUMN)];
            select.extend(table.columns.iter().map(|c| quote_ident(&c.name)));
            format!(
                "COPY (SELECT {} FROM {STAGING_TABLE} ORDER BY {}) TO {target} (FORMAT CSV, HEADER false)",
                select.join(", "),
                quote_ident(INDEX_COLUMN)
            )
        }
    };
    conn.execute_batch(&copy)?;
    if with_index {
        prepend_header(table, path)?;
    }
    Ok(())
}

/// The index column goes out with an empty header cell, which `COPY` cannot name.
fn prepend_header(table: &Table, path: &Path) -> Result<(), LoadError> {
    let io_err = |source| LoadError::Io {
        path: path.to_path_buf(),
        source,
    };
    let body = std::fs::read_to_string(path).map_err(io_err)?;
    let mut header = String::new();
    for column in &table.columns {
        header.push(',');
        header.push_str(&column.name);
    }
    header.push('\n');
    std::fs::write(path, header + &body).map_err(io_err)
}

fn stage(conn: &mut Connection, table: &Table, with_index: bool) -> Result<(), LoadError> {
    let mut defs = Vec::new();
    if with_index {
        defs.push(format!("{} BIGINT", quote_ident(INDEX_COLUMN)));
    }
    defs.extend(
        table
            .columns
            .iter()
            .map(|c| format!("{} {}", quote_ident(&c.name), c.field_type.duckdb_type())),
    );
    conn.execute_batch(&format!("CREATE TABLE {STAGING_TABLE} ({})", defs.join(", ")))?;

    let tx = conn.transaction()?;
    {
        let placeholders = vec!["?"; defs.len()].join(", ");
        let mut stmt = tx.prepare(&format!("INSERT INTO {STAGING_TABLE} VALUES ({placeholders})"))?;
        for (idx, row) in table.rows.iter().enumerate() {
            let mut values = Vec::with_capacity(defs.len());
            if with_index {
                values.push(Value::BigInt(idx as i64));
            }
            values.extend(row.iter().map(to_duckdb));
            stmt.execute(params_from_iter(values))?;
        }
    }
    tx.commit()?;
    Ok(())
}

fn to_duckdb(cell: &Cell) -> Value {
    match cell {
        Cell::Null => Value::Null,
        Cell::Text(s) | Cell::WarehouseDate(s) => Value::Text(s.clone()),
        Cell::Int(v) => Value::BigInt(*v),
        Cell::Float(v) => Value::Double(*v),
        Cell::Bool(v) => Value::Boolean(*v),
        Cell::Date(d) => Value::Text(d.format("%Y-%m-%d").to_string()),
        Cell::Timestamp(ts) => Value::Text(ts.format("%Y-%m-%d %H:%M:%S%.f").to_string()),
    }
}

fn quote_ident(name: &str) -> String {
    format!("\"{}\"", name.replace('"', "\"\""))
}

fn quote_literal(value: &str) -> String {
    format!("'{}'", value.replace('\'', "''"))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::table::{Column, FieldType};
    use chrono::NaiveDate;

    fn counts() -> Table {
        let mut table = Table::new(vec![
            Column {
                name: "data_inicio".to_string(),
                field_type: FieldType::Date,
            },
            Column {
                name: "qtd_chamados".to_string(),
                field_type: FieldType::Integer,
            },
        ]);
        for (day, count) in [(1, 120), (0, 100)] {
            let date = NaiveDate::from_ymd_opt(2024, 1, 31).unwrap() + chrono::Duration::days(day);
            table.rows.push(vec![Cell::Date(date), Cell::Int(count)]);
        }
        table
    }

    #[test]
    fn identifiers_and_literals_are_quoted() {
        assert_eq!(quote_ident("a\"b"), "\"a\"\"b\"");
        assert_eq!(quote_literal("/tmp/o'neil"), "'/tmp/o''neil'");
    }

    #[tokio::test]
    async fn csv_has_leading_index_and_creates_directory() {
        let dir = tempfile::tempdir().unwrap();
        let nested = dir.path().join("datasets").join("raw");
        let path = persist(counts(), FileFormat::Csv, &nested, "counts.csv")
            .await
            .unwrap();

        let text = std::fs::read_to_string(&path).unwrap();
        let lines: Vec<&str> = text.lines().collect();
        assert_eq!(lines[0], ",data_inicio,qtd_chamados");
        assert_eq!(lines[1], "0,2024-02-01,120");
        assert_eq!(lines[2], "1,2024-01-31,100");
    }

    #[tokio::test]
    async fn directory_blocked_by_a_file_is_an_io_error() {
        let dir = tempfile::tempdir().unwrap();
        let blocker = dir.path().join("datasets");
        std::fs::write(&blocker, "not a directory").unwrap();

        let err = persist(counts(), FileFormat::Csv, &blocker, "counts.csv")
            .await
            .unwrap_err();
        assert!(matches!(err, LoadError::Io { ref path, .. } if path == &blocker));
    }

    #[tokio::test]
    async fn parquet_round_trips_through_duckdb() {
        let dir = tempfile::tempdir().unwrap();
        let path = persist(counts(), FileFormat::Parquet, dir.path(), "counts.parquet.gzip")
            .await
            .unwrap();
        assert!(path.exists());

        let conn = Connection::open_in_memory().unwrap();
        let sql = format!(
            "SELECT count(*), sum(qtd_chamados)::BIGINT, max(data_inicio) FROM read_parquet({})",
            quote_literal(&path.to_string_lossy())
        );
        let (rows, total, latest): (i64, i64, NaiveDate) = conn
            .query_row(&sql, [], |row| Ok((row.get(0)?, row.get(1)?, row.get(2)?)))
            .unwrap();
        assert_eq!(rows, 2);
        assert_eq!(total, 220);
        assert_eq!(latest, NaiveDate::from_ymd_opt(2024, 2, 1).unwrap());
    }
}
