use actix_web::{web, App, HttpServer};
use clap::Parser;
use std::error::Error;
use std::path::PathBuf;
use std::sync::Arc;
use tracing::info;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;

use college_records::api::{self, AppState};
use college_records::config::{parse_filter, AppConfig};
use college_records::data;
use college_records::database::Database;
use college_records::lifecycle::{self, Sweeper, SystemClock};

/// College records core: schema, integrity checks and lifecycle sweeps.
#[derive(Debug, Parser)]
#[command(name = "college_records", version, about)]
struct Cli {
    /// Path to the TOML configuration file.
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Log filter, overriding `[logging] level`.
    #[arg(long)]
    log_level: Option<String>,
}

#[actix_web::main]
async fn main() -> Result<(), Box<dyn Error>> {
    let cli = Cli::parse();

    let config = match &cli.config {
        Some(path) => AppConfig::from_file(path)?,
        None => AppConfig::default(),
    };

    let filter = match cli.log_level.as_deref() {
        Some(level) => parse_filter(level)?,
        None => config.logging.filter()?,
    };
    tracing_subscriber::registry()
        .with(filter)
        .with(tracing_subscriber::fmt::layer())
        .init();

    let db = Arc::new(Database::standard(Arc::new(SystemClock))?);

    if let Some(roster) = &config.seed.roster {
        let summary = data::seed_from_file(&db, roster)?;
        info!(
            roster = %roster.display(),
            enrolled = summary.enrolled.len(),
            rejected = summary.rejected.len(),
            "seed roster loaded"
        );
    }

    let sweeper = Arc::new(Sweeper::new(Arc::clone(&db)));
    if config.sweep.enabled {
        lifecycle::spawn(Arc::clone(&sweeper), config.sweep.interval());
        info!(interval_secs = config.sweep.interval_secs, "sweep scheduled");
    }

    let bind = config.server.bind_addr()?;
    let state = web::Data::new(AppState { db, sweeper });

    info!(%bind, "starting college records API");
    HttpServer::new(move || App::new().app_data(state.clone()).configure(api::configure))
        .bind(bind)?
        .run()
        .await?;

    Ok(())
}
