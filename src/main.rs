mod aggregate;
mod auth;
mod cache;
mod chart;
mod config;
mod dashboard;
mod error;
mod loader;
mod map;
mod normalize;
mod persist;
mod query;
mod records;
mod state;
mod table;
mod warehouse;

use anyhow::Context;
use chrono::{NaiveDate, Utc};
use clap::{Parser, Subcommand, ValueEnum};
use loader::{DataLoader, Loaded};
use query::{Report, TrailingWindow};
use std::net::SocketAddr;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use table::Table;
use warehouse::BigQueryClient;

const SUMMARY_ROWS: usize = 10;

#[derive(Parser, Debug)]
#[command(name = "chamados-dashboard", about = "1746 service request dashboard")]
struct Args {
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Serve the dashboard over HTTP
    Serve {
        #[arg(long, default_value = ":8501")]
        listen: String,
        #[arg(long, default_value = "secrets.toml")]
        config: PathBuf,
        /// Reference dates kept in memory
        #[arg(long, default_value_t = 32)]
        cache_capacity: usize,
        /// Local credential profile, overriding the config file
        #[arg(long)]
        profile: Option<String>,
    },
    /// Run one report and write it to disk, or summarize it on stdout
    Export {
        #[arg(value_enum)]
        report: ReportKind,
        /// Reference date, defaults to today
        #[arg(long)]
        date: Option<NaiveDate>,
        #[arg(long)]
        id_subtipo: Option<String>,
        #[arg(long)]
        from: Option<NaiveDate>,
        #[arg(long)]
        to: Option<NaiveDate>,
        #[arg(long)]
        out_dir: Option<PathBuf>,
        #[arg(long, default_value = "secrets.toml")]
        config: PathBuf,
        #[arg(long)]
        profile: Option<String>,
    },
}

#[derive(Clone, Copy, Debug, ValueEnum)]
enum ReportKind {
    Daily,
    Geolocated,
    Subtype,
    LastSevenDays,
    LastFiveDays,
}

#[tokio::main]
async fn main() -> Result<(), anyhow::Error> {
    pretty_env_logger::init_custom_env("RUST_LOG");
    let args = Args::parse();

    match args.command {
        Command::Serve {
            listen,
            config,
            cache_capacity,
            profile,
        } => serve(&listen, config, cache_capacity, profile).await,
        Command::Export {
            report,
            date,
            id_subtipo,
            from,
            to,
            out_dir,
            config,
            profile,
        } => {
            let ref_date = date.unwrap_or_else(|| Utc::now().date_naive());
            let report = build_report(report, ref_date, id_subtipo, from, to)?;
            export(report, out_dir, config, profile).await
        }
    }
}

fn data_loader(
    config_path: &Path,
    profile: Option<&str>,
) -> Result<(DataLoader, config::Settings), anyhow::Error> {
    let settings = config::Settings::load(config_path)?;
    let source = settings.credential_source(profile);
    log::info!(
        "billing project {} with {} credentials",
        settings.env.project_id,
        match &source {
            auth::CredentialSource::Profile { name } => format!("profile {}", name),
            auth::CredentialSource::File { path } => path.display().to_string(),
            auth::CredentialSource::ServiceAccount(key) => key.client_email.clone(),
        }
    );
    let mut client = BigQueryClient::new(&settings.env.project_id, source);
    if let Some(base_url) = &settings.env.api_base_url {
        client = client.with_base_url(base_url);
    }
    let warehouse = Arc::new(client);
    Ok((DataLoader::new(warehouse), settings))
}

async fn serve(
    listen: &str,
    config: PathBuf,
    cache_capacity: usize,
    profile: Option<String>,
) -> Result<(), anyhow::Error> {
    let (loader, settings) = data_loader(&config, profile.as_deref())?;
    let http_addr = normalize_listen_addr(listen)?;

    let app_state = state::AppState::new(loader, cache_capacity, settings.app);
    let http_app = dashboard::router(app_state);
    let http_listener = tokio::net::TcpListener::bind(http_addr)
        .await
        .with_context(|| format!("binding {}", http_addr))?;
    let http_server = axum::serve(http_listener, http_app).with_graceful_shutdown(shutdown_signal());

    log::info!("chamados-dashboard listening: http={}", http_addr);

    http_server.await?;
    Ok(())
}

fn build_report(
    kind: ReportKind,
    ref_date: NaiveDate,
    id_subtipo: Option<String>,
    from: Option<NaiveDate>,
    to: Option<NaiveDate>,
) -> Result<Report, anyhow::Error> {
    Ok(match kind {
        ReportKind::Daily => Report::DailyDetail { ref_date },
        ReportKind::Geolocated => Report::GeolocatedDump { ref_date },
        ReportKind::Subtype => Report::SubtypeRange {
            id_subtipo: id_subtipo.context("--id-subtipo is required for subtype")?,
            date_from: from.context("--from is required for subtype")?,
            date_to: to.context("--to is required for subtype")?,
        },
        ReportKind::LastSevenDays => Report::TrailingCounts {
            ref_date,
            window: TrailingWindow::SevenDays,
        },
        ReportKind::LastFiveDays => Report::TrailingCounts {
            ref_date,
            window: TrailingWindow::FiveDays,
        },
    })
}

async fn export(
    report: Report,
    out_dir: Option<PathBuf>,
    config: PathBuf,
    profile: Option<String>,
) -> Result<(), anyhow::Error> {
    let (loader, _) = data_loader(&config, profile.as_deref())?;
    let loaded = loader
        .load(&report, out_dir.as_deref())
        .await
        .with_context(|| format!("exporting {}", report.file_name()))?;
    match loaded {
        Loaded::Saved(path) => println!("{}", path.display()),
        Loaded::InMemory(table) => print!("{}", summarize(&table)),
    }
    Ok(())
}

/// Shape, column types and the first rows of `table`, tab separated.
fn summarize(table: &Table) -> String {
    let mut out = format!("{} rows x {} columns\n", table.len(), table.columns.len());
    if table.is_empty() {
        return out;
    }
    let header: Vec<String> = table
        .columns
        .iter()
        .map(|c| format!("{}:{}", c.name, c.field_type.duckdb_type()))
        .collect();
    out.push_str(&header.join("\t"));
    out.push('\n');
    for row in table.rows.iter().take(SUMMARY_ROWS) {
        let cells: Vec<String> = row
            .iter()
            .map(|cell| cell.to_text().unwrap_or_else(|| "NULL".to_string()))
            .collect();
        out.push_str(&cells.join("\t"));
        out.push('\n');
    }
    if table.len() > SUMMARY_ROWS {
        out.push_str(&format!("... {} more rows\n", table.len() - SUMMARY_ROWS));
    }
    out
}

fn normalize_listen_addr(listen: &str) -> Result<SocketAddr, anyhow::Error> {
    if listen.starts_with(':') {
        let normalized = format!("0.0.0.0{}", listen);
        return normalized
            .parse()
            .with_context(|| format!("invalid listen address {}", listen));
    }
    listen
        .parse()
        .with_context(|| format!("invalid listen address {}", listen))
}

async fn shutdown_signal() {
    let _ = tokio::signal::ctrl_c().await;
    log::info!("shutting down");
}
