use crate::records::{ChamadoRecord, DailyCount};
use chrono::NaiveDate;
use std::collections::HashMap;

pub const OPEN_STATUS: &str = "Aberto";
pub const TYPE_PALETTE: [&str; 5] = ["#aae1f2", "#a0b19e", "#f6f4f6", "#22595c", "#8c737c"];

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct LabelCount {
    pub label: String,
    pub count: i64,
}

#[derive(Clone, Debug, PartialEq)]
pub struct TypeShare {
    pub label: String,
    pub percent: f64,
    pub color: &'static str,
}

#[derive(Clone, Debug, PartialEq)]
pub struct TrendPoint {
    pub date: NaiveDate,
    pub count: i64,
    pub mean: f64,
}

#[derive(Clone, Debug, PartialEq)]
pub struct NeighborhoodCount {
    pub name: String,
    pub count: i64,
    pub geometry: Option<String>,
}

/// Day-over-day change in percent between the two most recent rows.
///
/// `rows` is in descending date order. `None` when there are fewer than two
/// rows or the earlier day had no requests.
pub fn percent_change(rows: &[DailyCount]) -> Option<f64> {
    let (day0, day1) = (rows.first()?, rows.get(1)?);
    if day1.count == 0 {
        return None;
    }
    let change = (day0.count as f64 / day1.count as f64 - 1.0) * 100.0;
    Some((change * 100.0).round() / 100.0)
}

/// Ascending points with the mean of every count up to and including each one.
pub fn running_mean(rows: &[DailyCount]) -> Vec<TrendPoint> {
    let mut sorted = rows.to_vec();
    sorted.sort_by_key(|r| r.date);
    let mut sum = 0i64;
    sorted
        .iter()
        .enumerate()
        .map(|(idx, r)| {
            sum += r.count;
            TrendPoint {
                date: r.date,
                count: r.count,
                mean: sum as f64 / (idx + 1) as f64,
            }
        })
        .collect()
}

/// Counts per label, largest first, ties by label. `None` values are dropped.
pub fn value_counts<'a, I>(values: I) -> Vec<LabelCount>
where
    I: IntoIterator<Item = Option<&'a str>>,
{
    let mut counts: HashMap<&str, i64> = HashMap::new();
    for value in values.into_iter().flatten() {
        *counts.entry(value).or_default() += 1;
    }
    let mut out: Vec<LabelCount> = counts
        .into_iter()
        .map(|(label, count)| LabelCount {
            label: label.to_string(),
            count,
        })
        .collect();
    out.sort_by(|a, b| b.count.cmp(&a.count).then_with(|| a.label.cmp(&b.label)));
    out
}

pub fn status_counts(records: &[ChamadoRecord]) -> Vec<LabelCount> {
    value_counts(records.iter().map(|r| r.status.as_deref()))
}

pub fn situation_counts(records: &[ChamadoRecord]) -> Vec<LabelCount> {
    value_counts(records.iter().map(|r| r.situacao.as_deref()))
}

fn open(records: &[ChamadoRecord]) -> impl Iterator<Item = &ChamadoRecord> {
    records
        .iter()
        .filter(|r| r.status.as_deref() == Some(OPEN_STATUS))
}

/// Share of each request type among open requests that have a type, top `n`,
/// colored by rank.
pub fn top_open_types(records: &[ChamadoRecord], n: usize) -> Vec<TypeShare> {
    shares(value_counts(open(records).map(|r| r.tipo.as_deref())), n)
}

fn shares(counts: Vec<LabelCount>, n: usize) -> Vec<TypeShare> {
    let total: i64 = counts.iter().map(|c| c.count).sum();
    if total == 0 {
        return Vec::new();
    }
    counts
        .into_iter()
        .take(n.min(TYPE_PALETTE.len()))
        .zip(TYPE_PALETTE)
        .map(|(c, color)| TypeShare {
            label: c.label,
            percent: c.count as f64 * 100.0 / total as f64,
            color,
        })
        .collect()
}

/// Open requests per neighborhood, largest first, each with the first
/// geometry seen for it.
pub fn open_by_neighborhood(records: &[ChamadoRecord]) -> Vec<NeighborhoodCount> {
    let mut geometries: HashMap<&str, &str> = HashMap::new();
    for r in open(records) {
        if let (Some(name), Some(geometry)) = (r.nome_bairro.as_deref(), r.geometry_bairro.as_deref()) {
            geometries.entry(name).or_insert(geometry);
        }
    }
    value_counts(open(records).map(|r| r.nome_bairro.as_deref()))
        .into_iter()
        .map(|c| NeighborhoodCount {
            geometry: geometries.get(c.label.as_str()).map(|g| g.to_string()),
            name: c.label,
            count: c.count,
        })
        .collect()
}
