use std::path::PathBuf;

use anyhow::Context;
use chrono::{NaiveDate, Utc};
use clap::{Parser, Subcommand};
use sqlx::postgres::PgPoolOptions;
use tracing_subscriber::{fmt, EnvFilter};

mod config;
mod db;
mod decode;
mod epiweek;
mod error;
mod models;
mod notify;
mod report;
mod server;
mod sync;
mod upstream;

use config::Config;
use db::PgAlertStore;
use models::AlertRecord;
use notify::TracingSink;
use sync::AlertSynchronizer;
use upstream::InfoDengueClient;

#[derive(Parser)]
#[command(name = "dengue-alert-sync")]
#[command(about = "Dengue surveillance ingest from the InfoDengue alert API", long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Create or upgrade the database schema
    InitDb,
    /// Fetch the last N months of alerts and reconcile them into the store
    Sync {
        #[arg(long)]
        months: Option<u32>,
        /// Reference date (YYYY-MM-DD), defaults to today
        #[arg(long)]
        until: Option<NaiveDate>,
    },
    /// Fetch an explicit week/year range from the provider
    Fetch {
        #[arg(long)]
        ew_start: i32,
        #[arg(long)]
        ew_end: i32,
        #[arg(long)]
        ey_start: i32,
        #[arg(long)]
        ey_end: i32,
        /// Reconcile the fetched alerts into the store
        #[arg(long)]
        store: bool,
    },
    /// Import an InfoDengue CSV export
    Import {
        #[arg(long)]
        csv: PathBuf,
    },
    /// List the most recent stored alerts
    List {
        #[arg(long, default_value_t = 10)]
        limit: i64,
    },
    /// Show the alert for one epidemiological week
    Show {
        #[arg(long)]
        week: i32,
        #[arg(long)]
        year: i32,
        /// Ask the provider instead of the store
        #[arg(long)]
        remote: bool,
    },
    /// Generate a markdown report
    Report {
        #[arg(long, default_value = "report.md")]
        out: PathBuf,
        #[arg(long, default_value_t = 5)]
        recent: usize,
    },
    /// Print the epidemiological week of a date
    Epiweek {
        /// Date (YYYY-MM-DD), defaults to today
        #[arg(long)]
        date: Option<NaiveDate>,
    },
    /// Serve the REST API
    Serve {
        #[arg(long)]
        port: Option<u16>,
    },
}

fn print_alert(alert: &AlertRecord) {
    println!(
        "- {} ({}): {} notified, {:.1} estimated [{:.1}-{:.1}], level {}, Rt {:.2}",
        alert.label(),
        alert
            .week_start_date()
            .map(|d| d.to_string())
            .unwrap_or_else(|| "-".to_string()),
        alert.notified_cases,
        alert.estimated_cases,
        alert.estimated_cases_min,
        alert.estimated_cases_max,
        alert.level(),
        alert.effective_reproduction_number
    );
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    fmt().with_env_filter(EnvFilter::from_default_env()).init();

    let cli = Cli::parse();

    if let Commands::Epiweek { date } = cli.command {
        let date = date.unwrap_or_else(|| Utc::now().date_naive());
        let epi = epiweek::week_and_year_of(date);
        println!("{date} falls in epidemiological week {} of {} ({epi})", epi.week, epi.year);
        return Ok(());
    }

    let mut config = Config::load()?;

    let pool = PgPoolOptions::new()
        .max_connections(config.database_max_connections)
        .connect(&config.database_url)
        .await
        .context("failed to connect to Postgres")?;

    let client = InfoDengueClient::new(
        &config.infodengue_url,
        &config.geocode,
        &config.disease,
        config.upstream_timeout,
    )?;
    let synchronizer = AlertSynchronizer::new(client);
    let store = PgAlertStore::new(pool.clone());

    match cli.command {
        Commands::InitDb => {
            db::init_db(&pool).await?;
            println!("Schema ready.");
        }
        Commands::Sync { months, until } => {
            let months = months.unwrap_or(config.sync_months);
            let reference = until.unwrap_or_else(|| Utc::now().date_naive());
            let outcome = synchronizer
                .sync_last_n_months(&store, reference, months)
                .await?;

            notify::check_alerts(&outcome.records, &TracingSink);
            println!(
                "Synced {} alerts: {} inserted, {} updated, {} unchanged.",
                outcome.records.len(),
                outcome.summary.inserted,
                outcome.summary.updated,
                outcome.summary.unchanged
            );
        }
        Commands::Fetch {
            ew_start,
            ew_end,
            ey_start,
            ey_end,
            store: persist,
        } => {
            let alerts = synchronizer
                .fetch_alerts(ew_start, ew_end, ey_start, ey_end)
                .await?;

            if alerts.is_empty() {
                println!("The provider returned no alerts for this range.");
                return Ok(());
            }
            for alert in alerts.iter() {
                print_alert(alert);
            }

            if persist {
                let summary = synchronizer.reconcile(&store, &alerts).await?;
                println!(
                    "Stored: {} inserted, {} updated, {} unchanged.",
                    summary.inserted, summary.updated, summary.unchanged
                );
            }
        }
        Commands::Import { csv } => {
            let alerts = db::read_csv(&csv)?;
            let summary = synchronizer.reconcile(&store, &alerts).await?;
            println!(
                "Imported {} alerts from {}: {} inserted, {} updated, {} unchanged.",
                alerts.len(),
                csv.display(),
                summary.inserted,
                summary.updated,
                summary.unchanged
            );
        }
        Commands::List { limit } => {
            let alerts = db::fetch_latest(&pool, limit).await?;
            if alerts.is_empty() {
                println!("No alerts stored yet.");
                return Ok(());
            }

            println!("Most recent epidemiological weeks:");
            for alert in alerts.iter() {
                print_alert(alert);
            }
        }
        Commands::Show { week, year, remote } => {
            let alert = if remote {
                synchronizer.fetch_week(week, year).await?
            } else {
                db::fetch_alert(&pool, week, year).await?
            };

            match alert {
                Some(alert) => print_alert(&alert),
                None => println!("No alert found for week {}.", epiweek::format_label(year, week)),
            }
        }
        Commands::Report { out, recent } => {
            let alerts = db::list_alerts(&pool).await?;
            let report = report::build_report(&config.geocode, &alerts, recent);
            std::fs::write(&out, report)
                .with_context(|| format!("failed to write {}", out.display()))?;
            println!("Report written to {}.", out.display());
        }
        Commands::Serve { port } => {
            if let Some(port) = port {
                config.port = port;
            }
            let state = server::AppState::new(config, pool)?;
            server::start_server(state).await?;
        }
        Commands::Epiweek { .. } => {}
    }

    Ok(())
}
