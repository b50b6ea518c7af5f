//! pulse-churn - Churn Prediction Service
//!
//! Asynchronous churn-prediction pipeline: dataset ingestion, feature
//! derivation, model training, single and bulk scoring, and generated
//! widget content, exposed over an HTTP API.

use anyhow::Result;
use clap::Parser;
use std::sync::Arc;
use tracing::info;
use tracing_subscriber::EnvFilter;

use pulse_churn::services::generation_client::OpenAiGenerator;
use pulse_churn::storage::LocalDatasetStore;
use pulse_churn::AppState;
use pulse_common::config;

#[derive(Parser, Debug)]
#[command(name = "pulse-churn", version, about = "Churn prediction service")]
struct Args {
    /// Data folder (datasets, SQLite database)
    #[arg(long)]
    data_folder: Option<String>,

    /// Bind address, e.g. 127.0.0.1:5740
    #[arg(long)]
    bind: Option<String>,

    /// Path to a TOML config file
    #[arg(long)]
    config: Option<String>,
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    let args = Args::parse();

    info!("Starting pulse-churn service");
    info!("Version: {}", env!("CARGO_PKG_VERSION"));

    let toml_config = config::load_toml_config(args.config.as_deref())?;
    let data_folder = config::resolve_data_folder(args.data_folder.as_deref(), &toml_config);
    config::ensure_data_folder(&data_folder)?;
    info!("Data folder: {}", data_folder.display());

    let mut settings = config::ServiceSettings::from_toml(&toml_config, data_folder.clone())?;
    if let Some(bind) = args.bind {
        settings.bind = bind;
    }

    let db_path = config::database_path(&data_folder);
    info!("Database: {}", db_path.display());
    let db = pulse_churn::db::connect(&db_path).await?;

    // Work left non-terminal by a previous run can never progress; mark
    // jobs, mid-processing datasets, and in-flight batches failed so
    // resubmission is possible
    let stale_jobs = pulse_churn::db::jobs::cleanup_stale(&db).await?;
    let stale_datasets = pulse_churn::db::datasets::cleanup_stale(&db).await?;
    let stale_batches = pulse_churn::db::batches::cleanup_stale(&db).await?;
    if stale_jobs + stale_datasets + stale_batches > 0 {
        info!(
            "Marked stale work from a previous run as failed: {} job(s), {} dataset(s), {} batch(es)",
            stale_jobs, stale_datasets, stale_batches
        );
    }

    let store = Arc::new(LocalDatasetStore::new(&data_folder));
    let generator = Arc::new(OpenAiGenerator::new(
        settings.generator_api_url.clone(),
        settings.generator_api_key.clone(),
        settings.generator_model.clone(),
    ));

    let bind = settings.bind.clone();
    let state = AppState::new(db, store, generator, settings);

    let warmed = state.models.load_from_db(&state.db).await?;
    info!("Loaded {} current model(s) into the registry", warmed);

    let app = pulse_churn::build_router(state);

    let listener = tokio::net::TcpListener::bind(&bind).await?;
    info!("Listening on http://{}", bind);
    info!("Health check: http://{}/health", bind);

    axum::serve(listener, app).await?;

    Ok(())
}
