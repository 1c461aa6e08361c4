use crate::table::Table;
use chrono::{Duration, NaiveDate, NaiveDateTime};
use std::collections::HashMap;

/// One service request of the day-detail report.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct ChamadoRecord {
    pub id_chamado: String,
    pub data_inicio: Option<NaiveDateTime>,
    pub id_bairro: Option<String>,
    pub nome_bairro: Option<String>,
    pub subprefeitura: Option<String>,
    pub geometry_bairro: Option<String>,
    pub categoria: Option<String>,
    pub id_tipo: Option<String>,
    pub tipo: Option<String>,
    pub id_subtipo: Option<String>,
    pub subtipo: Option<String>,
    pub status: Option<String>,
    pub situacao: Option<String>,
    pub tipo_situacao: Option<String>,
    pub latitude: Option<f64>,
    pub longitude: Option<f64>,
    pub geometry_chamado: Option<String>,
}

impl ChamadoRecord {
    pub fn from_table(table: &Table) -> Vec<Self> {
        let text = |row: usize, col: &str| table.get(row, col).to_text();
        (0..table.len())
            .map(|row| Self {
                id_chamado: text(row, "id_chamado").unwrap_or_default(),
                data_inicio: table.get(row, "data_inicio").as_timestamp(),
                id_bairro: text(row, "id_bairro"),
                nome_bairro: text(row, "nome_bairro"),
                subprefeitura: text(row, "subprefeitura"),
                geometry_bairro: text(row, "geometry_bairro"),
                categoria: text(row, "categoria"),
                id_tipo: text(row, "id_tipo"),
                tipo: text(row, "tipo"),
                id_subtipo: text(row, "id_subtipo"),
                subtipo: text(row, "subtipo"),
                status: text(row, "status"),
                situacao: text(row, "situacao"),
                tipo_situacao: text(row, "tipo_situacao"),
                latitude: table.get(row, "latitude").as_f64(),
                longitude: table.get(row, "longitude").as_f64(),
                geometry_chamado: text(row, "geometry_chamado"),
            })
            .collect()
    }
}

/// Requests opened on one day.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct DailyCount {
    pub date: NaiveDate,
    pub count: i64,
}

impl DailyCount {
    /// Reads `(data_inicio, qtd_chamados)` rows, skipping rows without a date.
    pub fn from_table(table: &Table) -> Vec<Self> {
        (0..table.len())
            .filter_map(|row| {
                let date = table.get(row, "data_inicio").as_date()?;
                let count = table.get(row, "qtd_chamados").as_i64().unwrap_or(0).max(0);
                Some(Self { date, count })
            })
            .collect()
    }

    /// One row per day of `first..=last`, most recent first, zero where the
    /// warehouse had no row for that day.
    pub fn densify(rows: &[DailyCount], first: NaiveDate, last: NaiveDate) -> Vec<Self> {
        let by_date: HashMap<NaiveDate, i64> = rows.iter().map(|r| (r.date, r.count)).collect();
        let mut out = Vec::new();
        let mut day = last;
        while day >= first {
            out.push(Self {
                date: day,
                count: by_date.get(&day).copied().unwrap_or(0),
            });
            day -= Duration::days(1);
        }
        out
    }
}
