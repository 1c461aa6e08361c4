use crate::aggregate::{
    open_by_neighborhood, percent_change, running_mean, situation_counts, status_counts,
    top_open_types, LabelCount,
};
use crate::chart::{self, append, escape, AxisOptions, Bar, Slice};
use crate::config::AppSettings;
use crate::error::LoadError;
use crate::loader::DashboardData;
use crate::map;
use crate::state::{AppState, DateInput, Selection, MIN_DATE};
use axum::{
    extract::{RawQuery, State},
    http::{header, HeaderMap, HeaderValue, StatusCode},
    response::{IntoResponse, Response},
    routing::get,
    Router,
};
use chrono::{Datelike, NaiveDate, Utc};
use std::collections::HashMap;

const STYLE_CSS: &str = include_str!("../assets/style.css");

const PLACEHOLDER: &str = "Esperando definir data ...";
const TOP_TYPES: usize = 5;
const TOP_NEIGHBORHOODS: usize = 10;
const DONUT_INNER_RADIUS: f64 = 50.0;

pub fn router(state: AppState) -> Router {
    Router::new()
        .route("/", get(dashboard_handler))
        .route("/favicon.ico", get(favicon_handler))
        .with_state(state)
}

async fn favicon_handler() -> impl IntoResponse {
    StatusCode::NO_CONTENT
}

async fn dashboard_handler(State(state): State<AppState>, RawQuery(raw): RawQuery) -> Response {
    let params = parse_query(raw.unwrap_or_default());
    let selection = match first_value(&params, "date") {
        Some(value) => state.select(DateInput::parse(&value)),
        None => state.selection(),
    };
    let today = Utc::now().date_naive();

    let (status, body) = match selection {
        Selection::Unset => (StatusCode::OK, render_unset(&state.page, today)),
        Selection::Loaded { ref_date } => match state.dashboard_data(ref_date).await {
            Ok(data) => (StatusCode::OK, render_loaded(&state.page, &data)),
            Err(err) => {
                log::error!("dashboard for {} failed: {}", ref_date, err);
                (StatusCode::BAD_GATEWAY, render_error(&state.page, ref_date, &err))
            }
        },
    };

    let mut headers = HeaderMap::new();
    headers.insert(
        header::CONTENT_TYPE,
        HeaderValue::from_static("text/html; charset=utf-8"),
    );
    (status, headers, body).into_response()
}

fn parse_query(raw: String) -> HashMap<String, Vec<String>> {
    let mut params: HashMap<String, Vec<String>> = HashMap::new();
    for (k, v) in url::form_urlencoded::parse(raw.as_bytes()) {
        params
            .entry(k.to_string())
            .or_default()
            .push(v.to_string());
    }
    params
}

fn first_value(params: &HashMap<String, Vec<String>>, key: &str) -> Option<String> {
    params.get(key).and_then(|vals| vals.first()).cloned()
}

pub fn render_unset(page: &AppSettings, today: NaiveDate) -> String {
    let mut body = String::new();
    page_start(&mut body, page, today, None);
    append(&mut body, &format!("<div class=status>{}</div>", PLACEHOLDER));
    page_end(&mut body);
    body
}

pub fn render_error(page: &AppSettings, ref_date: NaiveDate, err: &LoadError) -> String {
    let mut body = String::new();
    page_start(&mut body, page, ref_date, Some(ref_date));
    append(&mut body, "<div class='status error'>");
    append(
        &mut body,
        &format!(
            "<strong>Não foi possível carregar os dados de {}</strong>",
            day_month_year(ref_date)
        ),
    );
    append(&mut body, &format!("<pre>{}</pre>", escape(&err.to_string())));
    append(&mut body, "</div>");
    page_end(&mut body);
    body
}

pub fn render_loaded(page: &AppSettings, data: &DashboardData) -> String {
    let ref_date = data.ref_date;
    let mut body = String::new();
    page_start(&mut body, page, ref_date, Some(ref_date));

    append(&mut body, "<section class='row r30'>");
    append(&mut body, "<div class=col>");
    append(
        &mut body,
        &format!(
            "<h2>Quantidade total de chamados em {}</h2>",
            day_month_year(ref_date)
        ),
    );
    append_metric(&mut body, data);
    append(&mut body, "</div>");
    append(&mut body, "<div class=col>");
    append(&mut body, "<h2>Quantidade de chamados dos últimos 7 dias</h2>");
    let trend = running_mean(&data.last_days);
    let bars: Vec<Bar> = trend
        .iter()
        .map(|p| Bar {
            label: p.date.format("%d/%m").to_string(),
            value: p.count,
        })
        .collect();
    let means: Vec<f64> = trend.iter().map(|p| p.mean).collect();
    chart::vertical_bars(&mut body, &bars, Some(&means), &AxisOptions::default());
    append(&mut body, "</div>");
    append(&mut body, "</section>");

    append(&mut body, "<section class='row r60'>");
    append(&mut body, "<div class=col>");
    append(&mut body, "<h2>Status dos chamados do dia</h2>");
    let axis = AxisOptions {
        label_font_size: 8.0,
        ..AxisOptions::default()
    };
    append_or_empty(&mut body, &status_counts(&data.records), |out, bars| {
        chart::horizontal_bars(out, bars, &axis)
    });
    append(&mut body, "</div>");
    append(&mut body, "<div class=col>");
    append(&mut body, "<h2>Quantidade de chamados atendidos e não atendidos</h2>");
    let axis = AxisOptions {
        label_angle: 45.0,
        ..AxisOptions::default()
    };
    append_or_empty(&mut body, &situation_counts(&data.records), |out, bars| {
        chart::vertical_bars(out, bars, None, &axis)
    });
    append(&mut body, "</div>");
    append(&mut body, "</section>");

    append(&mut body, "<section class=row>");
    append(&mut body, "<div class=col>");
    append(&mut body, "<h2>Os 5 tipos de chamados mais abertos</h2>");
    let slices: Vec<Slice> = top_open_types(&data.records, TOP_TYPES)
        .into_iter()
        .map(|t| Slice {
            label: t.label,
            percent: t.percent,
            color: t.color.to_string(),
        })
        .collect();
    if slices.is_empty() {
        append(&mut body, "<p class=empty>Nenhum chamado aberto.</p>");
    } else {
        chart::donut(&mut body, &slices, DONUT_INNER_RADIUS);
    }
    append(&mut body, "</div>");
    append(&mut body, "</section>");

    let neighborhoods = open_by_neighborhood(&data.records);
    append(&mut body, "<section class='row r60'>");
    append(&mut body, "<div class=col>");
    append(&mut body, "<h2>Distribuição de chamados abertos por bairros</h2>");
    let stats = map::choropleth(&mut body, &neighborhoods);
    if stats.skipped > 0 {
        append(
            &mut body,
            &format!(
                "<p class=note>{} bairro(s) sem geometria não aparecem no mapa.</p>",
                stats.skipped
            ),
        );
    }
    append(&mut body, "</div>");
    append(&mut body, "<div class=col>");
    append(
        &mut body,
        "<h2>Os 10 bairros com maior quantidade de chamados abertos</h2>",
    );
    let top: Vec<LabelCount> = neighborhoods
        .iter()
        .take(TOP_NEIGHBORHOODS)
        .map(|n| LabelCount {
            label: n.name.clone(),
            count: n.count,
        })
        .collect();
    append_or_empty(&mut body, &top, |out, bars| {
        chart::horizontal_bars(out, bars, &AxisOptions::default())
    });
    append(&mut body, "</div>");
    append(&mut body, "</section>");

    page_end(&mut body);
    body
}

fn page_start(out: &mut String, page: &AppSettings, picker: NaiveDate, selected: Option<NaiveDate>) {
    append(out, "<!DOCTYPE html>");
    append(out, "<html lang=pt-BR>");
    append(out, "<head>");
    append(out, "<meta charset=\"utf-8\">");
    append(
        out,
        "<meta name=viewport content=\"width=device-width, initial-scale=1\">",
    );
    append(out, &format!("<title>{}</title>", escape(&page.page_title)));
    append(out, &format!("<style>{}</style>", STYLE_CSS));
    append(out, "</head>");
    append(out, "<body>");
    append(out, &format!("<main class={}>", page.layout.css_class()));
    append(out, &format!("<h1>{}</h1>", escape(&page.page_title)));

    append(out, "<section class=picker>");
    append(out, "<h2>Selecione uma data para gerar os dados</h2>");
    append(out, "<form method=get action='/'>");
    append(
        out,
        &format!(
            "<input type=date name=date min='{}' value='{}' onchange='this.form.submit()'>",
            MIN_DATE.format("%Y-%m-%d"),
            picker.max(*MIN_DATE).format("%Y-%m-%d")
        ),
    );
    append(out, "<button type=submit>Gerar</button>");
    if let Some(date) = selected {
        append(
            out,
            &format!("<span class=picked>{}</span>", date.format("%d.%m.%Y")),
        );
    }
    append(out, "</form>");
    append(out, "</section>");
}

fn page_end(out: &mut String) {
    append(out, "</main>");
    append(out, "</body>");
    append(out, "</html>");
}

fn append_metric(out: &mut String, data: &DashboardData) {
    let (delta, class) = match percent_change(&data.last_days) {
        Some(change) if change > 0.0 => (format!("+{:.2}%", change), "up"),
        Some(change) if change < 0.0 => (format!("{:.2}%", change), "down"),
        Some(change) => (format!("{:.2}%", change), "flat"),
        None => ("n/d".to_string(), "flat"),
    };
    append(out, "<div class=metric>");
    append(out, "<div class=label>Total</div>");
    append(
        out,
        &format!(
            "<div class=value>{}</div>",
            chart::format_thousands(data.records.len() as i64)
        ),
    );
    append(out, &format!("<div class='delta {}'>{}</div>", class, delta));
    append(out, "</div>");
}

fn append_or_empty(out: &mut String, counts: &[LabelCount], draw: impl FnOnce(&mut String, &[Bar])) {
    if counts.is_empty() {
        append(out, "<p class=empty>Sem dados.</p>");
        return;
    }
    let bars: Vec<Bar> = counts
        .iter()
        .map(|c| Bar {
            label: c.label.clone(),
            value: c.count,
        })
        .collect();
    draw(out, &bars);
}

/// `d/m/yyyy` without zero padding.
fn day_month_year(date: NaiveDate) -> String {
    format!("{}/{}/{}", date.day(), date.month(), date.year())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::loader::tests::fake;
    use crate::loader::DataLoader;
    use crate::query::Query;
    use crate::records::{ChamadoRecord, DailyCount};
    use crate::table::Table;
    use crate::warehouse::Warehouse;
    use async_trait::async_trait;
    use std::sync::Arc;

    struct FailingWarehouse;

    #[async_trait]
    impl Warehouse for FailingWarehouse {
        async fn run_query(&self, _query: &Query) -> Result<Table, LoadError> {
            Err(LoadError::Warehouse {
                status: 403,
                message: "Access Denied: <project>".to_string(),
            })
        }
    }

    fn date(s: &str) -> NaiveDate {
        NaiveDate::parse_from_str(s, "%Y-%m-%d").unwrap()
    }

    async fn get(state: &AppState, query: Option<&str>) -> (StatusCode, String) {
        let response = dashboard_handler(
            State(state.clone()),
            RawQuery(query.map(str::to_string)),
        )
        .await;
        let status = response.status();
        let bytes = axum::body::to_bytes(response.into_body(), usize::MAX)
            .await
            .unwrap();
        (status, String::from_utf8(bytes.to_vec()).unwrap())
    }

    fn record(status: &str, tipo: &str, bairro: &str) -> ChamadoRecord {
        ChamadoRecord {
            id_chamado: "1".to_string(),
            status: Some(status.to_string()),
            situacao: Some("Não atendido".to_string()),
            tipo: Some(tipo.to_string()),
            nome_bairro: Some(bairro.to_string()),
            geometry_bairro: Some(
                "POLYGON((-43.19 -22.90,-43.17 -22.90,-43.17 -22.92,-43.19 -22.90))".to_string(),
            ),
            ..Default::default()
        }
    }

    #[test]
    fn unset_page_shows_picker_and_placeholder() {
        let html = render_unset(&AppSettings::default(), date("2024-02-01"));
        assert!(html.contains("<title>Chamados 1746</title>"));
        assert!(html.contains("min='2022-01-01' value='2024-02-01'"));
        assert!(html.contains(PLACEHOLDER));
        assert!(!html.contains("<svg"));
    }

    #[test]
    fn loaded_page_has_every_panel() {
        let data = DashboardData {
            ref_date: date("2024-02-01"),
            last_days: vec![
                DailyCount { date: date("2024-02-01"), count: 120 },
                DailyCount { date: date("2024-01-31"), count: 100 },
            ],
            records: vec![
                record("Aberto", "Poda", "Centro"),
                record("Aberto", "Iluminação", "Centro"),
                record("Fechado", "Poda", "Lapa"),
            ],
        };
        let html = render_loaded(&AppSettings::default(), &data);

        assert!(html.contains("Quantidade total de chamados em 1/2/2024"));
        assert!(html.contains("<div class=value>3</div>"));
        assert!(html.contains("+20.00%"));
        assert!(html.contains("<span class=picked>01.02.2024</span>"));
        assert!(html.contains("class='chart vbar'"));
        assert!(html.contains("class='chart donut'"));
        assert!(html.contains("class='chart map'"));
        assert!(html.contains("rotate(45 "));
        assert!(html.contains("Iluminação"));
        assert!(!html.contains("sem geometria"));
    }

    #[test]
    fn undefined_change_renders_placeholder() {
        let data = DashboardData {
            ref_date: date("2024-02-01"),
            last_days: vec![
                DailyCount { date: date("2024-02-01"), count: 3 },
                DailyCount { date: date("2024-01-31"), count: 0 },
            ],
            records: Vec::new(),
        };
        let html = render_loaded(&AppSettings::default(), &data);
        assert!(html.contains("<div class='delta flat'>n/d</div>"));
        assert!(html.contains("Nenhum chamado aberto."));
    }

    #[tokio::test]
    async fn date_query_moves_selection_and_renders() {
        let state = AppState::new(DataLoader::new(Arc::new(fake())), 4, AppSettings::default());

        let (status, html) = get(&state, None).await;
        assert_eq!(status, StatusCode::OK);
        assert!(html.contains(PLACEHOLDER));

        let (status, html) = get(&state, Some("date=2024-02-01")).await;
        assert_eq!(status, StatusCode::OK);
        assert!(html.contains("em 1/2/2024"));
        assert!(html.contains("bairro(s) sem geometria"));

        let (_, html) = get(&state, Some("date=2020-05-05")).await;
        assert!(html.contains("em 1/2/2024"));
        assert_eq!(state.selection().ref_date(), Some(date("2024-02-01")));
    }

    #[tokio::test]
    async fn warehouse_failure_is_a_bad_gateway_panel() {
        let state = AppState::new(DataLoader::new(Arc::new(FailingWarehouse)), 4, AppSettings::default());
        let (status, html) = get(&state, Some("date=2024-02-01")).await;
        assert_eq!(status, StatusCode::BAD_GATEWAY);
        assert!(html.contains("class='status error'"));
        assert!(html.contains("Access Denied: &lt;project&gt;"));
    }
}
