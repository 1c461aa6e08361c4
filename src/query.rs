use crate::error::LoadError;
use chrono::{Duration, NaiveDate};
use once_cell::sync::Lazy;
use regex::Regex;

pub const CHAMADO_TABLE: &str = "datario.administracao_servicos_publicos.chamado_1746";
pub const BAIRRO_TABLE: &str = "datario.dados_mestres.bairro";

static RE_SUBTYPE_ID: Lazy<Regex> = Lazy::new(|| Regex::new(r"^[0-9A-Za-z_-]+$").expect("re"));

const DAILY_COLUMNS: &str = "t1.id_chamado,
       t1.data_inicio,
       t1.id_bairro,
       t2.nome AS nome_bairro,
       t2.subprefeitura,
       t2.geometry AS geometry_bairro,
       t1.categoria,
       t1.id_tipo,
       t1.tipo,
       t1.id_subtipo,
       t1.subtipo,
       t1.status,
       t1.situacao,
       t1.tipo_situacao,
       t1.latitude,
       t1.longitude,
       t1.geometry AS geometry_chamado";

const GEOLOCATED_COLUMNS: &str = "t1.*,
       t2.nome AS nome_bairro,
       t2.subprefeitura AS subprefeitura_bairro,
       t2.area AS area_bairro,
       t2.perimetro AS perimetro_bairro,
       t2.geometry AS geometry_bairro";

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum TrailingWindow {
    SevenDays,
    FiveDays,
}

impl TrailingWindow {
    /// Days subtracted from the reference date to get the first day of the window.
    pub fn lookback_days(self) -> i64 {
        match self {
            Self::SevenDays => 6,
            Self::FiveDays => 5,
        }
    }

    pub fn first_day(self, ref_date: NaiveDate) -> NaiveDate {
        ref_date - Duration::days(self.lookback_days())
    }

    fn file_label(self) -> &'static str {
        match self {
            Self::SevenDays => "last_seven_days",
            Self::FiveDays => "last_five_days",
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum FileFormat {
    Parquet,
    Csv,
}

/// The fixed set of report shapes the warehouse is queried for.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Report {
    DailyDetail {
        ref_date: NaiveDate,
    },
    GeolocatedDump {
        ref_date: NaiveDate,
    },
    SubtypeRange {
        id_subtipo: String,
        date_from: NaiveDate,
        date_to: NaiveDate,
    },
    TrailingCounts {
        ref_date: NaiveDate,
        window: TrailingWindow,
    },
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ParamType {
    Date,
    String,
}

impl ParamType {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Date => "DATE",
            Self::String => "STRING",
        }
    }
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct QueryParam {
    pub name: &'static str,
    pub kind: ParamType,
    pub value: String,
}

impl QueryParam {
    fn date(name: &'static str, value: NaiveDate) -> Self {
        Self {
            name,
            kind: ParamType::Date,
            value: value.format("%Y-%m-%d").to_string(),
        }
    }

    fn string(name: &'static str, value: &str) -> Self {
        Self {
            name,
            kind: ParamType::String,
            value: value.to_string(),
        }
    }
}

/// SQL text with named `@param` placeholders and their bound values.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Query {
    pub sql: String,
    pub params: Vec<QueryParam>,
}

impl Query {
    #[cfg(test)]
    pub fn param(&self, name: &str) -> Option<&str> {
        self.params
            .iter()
            .find(|p| p.name == name)
            .map(|p| p.value.as_str())
    }
}

impl Report {
    pub fn validate(&self) -> Result<(), LoadError> {
        if let Report::SubtypeRange {
            id_subtipo,
            date_from,
            date_to,
        } = self
        {
            if !RE_SUBTYPE_ID.is_match(id_subtipo) {
                return Err(LoadError::InvalidReport(format!(
                    "id_subtipo {:?} must be alphanumeric",
                    id_subtipo
                )));
            }
            if date_from > date_to {
                return Err(LoadError::InvalidReport(format!(
                    "date range {} > {}",
                    date_from, date_to
                )));
            }
        }
        Ok(())
    }

    pub fn query(&self) -> Query {
        match self {
            Report::DailyDetail { ref_date } => Query {
                sql: format!(
                    "SELECT {DAILY_COLUMNS}
FROM `{CHAMADO_TABLE}` t1
LEFT JOIN `{BAIRRO_TABLE}` t2
ON t1.id_bairro = t2.id_bairro
WHERE t1.data_particao = DATE_TRUNC(@ref_date, MONTH)
AND DATE(t1.data_inicio) = @ref_date"
                ),
                params: vec![QueryParam::date("ref_date", *ref_date)],
            },
            Report::GeolocatedDump { ref_date } => Query {
                sql: format!(
                    "SELECT {GEOLOCATED_COLUMNS}
FROM `{CHAMADO_TABLE}` t1
LEFT JOIN `{BAIRRO_TABLE}` t2
ON t1.id_bairro = t2.id_bairro
WHERE t1.data_particao = DATE_TRUNC(@ref_date, MONTH)
AND DATE(t1.data_inicio) = @ref_date"
                ),
                params: vec![QueryParam::date("ref_date", *ref_date)],
            },
            Report::SubtypeRange {
                id_subtipo,
                date_from,
                date_to,
            } => Query {
                sql: format!(
                    "SELECT t1.*
FROM `{CHAMADO_TABLE}` t1
WHERE t1.data_particao BETWEEN DATE_TRUNC(@date_from, MONTH) AND @date_to
AND DATE(t1.data_inicio) BETWEEN @date_from AND @date_to
AND t1.id_subtipo = @id_subtipo"
                ),
                params: vec![
                    QueryParam::date("date_from", *date_from),
                    QueryParam::date("date_to", *date_to),
                    QueryParam::string("id_subtipo", id_subtipo),
                ],
            },
            Report::TrailingCounts { ref_date, window } => Query {
                sql: format!(
                    "SELECT DATE(t1.data_inicio) AS data_inicio,
       COUNT(*) AS qtd_chamados
FROM `{CHAMADO_TABLE}` t1
WHERE t1.data_particao BETWEEN DATE_TRUNC(DATE_SUB(@ref_date, INTERVAL {lookback} DAY), MONTH) AND @ref_date
AND DATE(t1.data_inicio) BETWEEN DATE_SUB(@ref_date, INTERVAL {lookback} DAY) AND @ref_date
GROUP BY 1
ORDER BY 1 DESC",
                    lookback = window.lookback_days()
                ),
                params: vec![QueryParam::date("ref_date", *ref_date)],
            },
        }
    }

    pub fn file_format(&self) -> FileFormat {
        match self {
            Report::TrailingCounts { .. } => FileFormat::Csv,
            _ => FileFormat::Parquet,
        }
    }

    pub fn file_name(&self) -> String {
        match self {
            Report::DailyDetail { ref_date } => {
                format!("dataset_daily_chamado1746_{}.parquet.gzip", ref_date)
            }
            Report::GeolocatedDump { ref_date } => {
                format!("dataset_chamado_1746_with_geoloc_{}.parquet.gzip", ref_date)
            }
            Report::SubtypeRange {
                id_subtipo,
                date_from,
                date_to,
            } => format!(
                "dataset_chamado_1746_idsub-{}_{}-{}.parquet.gzip",
                id_subtipo, date_from, date_to
            ),
            Report::TrailingCounts { ref_date, window } => {
                format!("dataset_{}_chamado1746_{}.csv", window.file_label(), ref_date)
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn date(s: &str) -> NaiveDate {
        NaiveDate::parse_from_str(s, "%Y-%m-%d").unwrap()
    }

    #[test]
    fn daily_detail_filters_exact_day_with_left_join() {
        let query = Report::DailyDetail {
            ref_date: date("2024-02-01"),
        }
        .query();

        assert!(query.sql.contains("LEFT JOIN `datario.dados_mestres.bairro` t2"));
        assert!(query.sql.contains("AND DATE(t1.data_inicio) = @ref_date"));
        assert!(query.sql.contains("t2.geometry AS geometry_bairro"));
        assert!(!query.sql.contains("2024-02-01"));
        assert_eq!(query.param("ref_date"), Some("2024-02-01"));
    }

    #[test]
    fn geolocated_dump_joins_neighborhood_attributes() {
        let query = Report::GeolocatedDump {
            ref_date: date("2024-02-01"),
        }
        .query();

        assert!(query.sql.starts_with("SELECT t1.*"));
        assert!(query.sql.contains("LEFT JOIN `datario.dados_mestres.bairro` t2"));
        assert!(query.sql.contains("ON t1.id_bairro = t2.id_bairro"));
        for alias in [
            "t2.nome AS nome_bairro",
            "t2.subprefeitura AS subprefeitura_bairro",
            "t2.area AS area_bairro",
            "t2.perimetro AS perimetro_bairro",
            "t2.geometry AS geometry_bairro",
        ] {
            assert!(query.sql.contains(alias), "missing {}", alias);
        }
        assert!(query.sql.contains("AND DATE(t1.data_inicio) = @ref_date"));
        assert!(!query.sql.contains("2024-02-01"));
        assert_eq!(query.param("ref_date"), Some("2024-02-01"));
    }

    #[test]
    fn trailing_windows_have_well_formed_filters() {
        for (window, lookback, first) in [
            (TrailingWindow::SevenDays, 6, "2024-01-26"),
            (TrailingWindow::FiveDays, 5, "2024-01-27"),
        ] {
            let query = Report::TrailingCounts {
                ref_date: date("2024-02-01"),
                window,
            }
            .query();
            let where_pos = query.sql.find("WHERE").unwrap();
            let from_pos = query.sql.find("FROM").unwrap();
            assert!(from_pos < where_pos);
            assert!(!query.sql[from_pos..where_pos].contains("AND"));
            assert!(query.sql.contains(&format!(
                "BETWEEN DATE_SUB(@ref_date, INTERVAL {} DAY) AND @ref_date",
                lookback
            )));
            assert!(query.sql.ends_with("ORDER BY 1 DESC"));
            assert_eq!(window.first_day(date("2024-02-01")), date(first));
        }
    }

    #[test]
    fn subtype_range_binds_all_parameters() {
        let report = Report::SubtypeRange {
            id_subtipo: "5071".to_string(),
            date_from: date("2022-01-01"),
            date_to: date("2023-12-01"),
        };
        report.validate().unwrap();
        let query = report.query();
        assert_eq!(query.param("id_subtipo"), Some("5071"));
        assert_eq!(query.param("date_from"), Some("2022-01-01"));
        assert_eq!(query.param("date_to"), Some("2023-12-01"));
        assert!(query.sql.contains("t1.id_subtipo = @id_subtipo"));
        assert_eq!(
            report.file_name(),
            "dataset_chamado_1746_idsub-5071_2022-01-01-2023-12-01.parquet.gzip"
        );
        assert_eq!(report.file_format(), FileFormat::Parquet);
    }

    #[test]
    fn subtype_range_rejects_bad_input() {
        let inverted = Report::SubtypeRange {
            id_subtipo: "5071".to_string(),
            date_from: date("2023-01-01"),
            date_to: date("2022-01-01"),
        };
        assert!(matches!(inverted.validate(), Err(LoadError::InvalidReport(_))));

        let traversal = Report::SubtypeRange {
            id_subtipo: "../x".to_string(),
            date_from: date("2022-01-01"),
            date_to: date("2022-01-02"),
        };
        assert!(matches!(traversal.validate(), Err(LoadError::InvalidReport(_))));
    }

    #[test]
    fn file_names_follow_report_kind() {
        let ref_date = date("2023-04-01");
        assert_eq!(
            Report::DailyDetail { ref_date }.file_name(),
            "dataset_daily_chamado1746_2023-04-01.parquet.gzip"
        );
        assert_eq!(
            Report::GeolocatedDump { ref_date }.file_name(),
            "dataset_chamado_1746_with_geoloc_2023-04-01.parquet.gzip"
        );
        let seven = Report::TrailingCounts {
            ref_date,
            window: TrailingWindow::SevenDays,
        };
        assert_eq!(seven.file_name(), "dataset_last_seven_days_chamado1746_2023-04-01.csv");
        assert_eq!(seven.file_format(), FileFormat::Csv);
        assert_eq!(
            Report::TrailingCounts {
                ref_date,
                window: TrailingWindow::FiveDays
            }
            .file_name(),
            "dataset_last_five_days_chamado1746_2023-04-01.csv"
        );
    }
}
