mod config;
mod dataset;
mod db;
mod entities;
mod error;
mod geocoder;
mod ingest;
mod models;
mod query;
mod routes;
mod store;

use std::{sync::Arc, time::Duration};

use clap::{Parser, Subcommand};
use tower_http::{
    cors::{Any, CorsLayer},
    trace::TraceLayer,
};

use crate::{
    config::Config,
    dataset::SodaClient,
    geocoder::GoogleGeocoder,
    ingest::{Pipeline, PipelineSettings},
    query::QueryService,
    store::Store,
};

#[derive(Clone)]
pub struct AppState {
    pub queries: QueryService,
}

#[derive(Debug, Parser)]
#[command(name = "reelsites", version, about = "Film shoot locations, geocoded and searchable")]
struct Cli {
    #[command(subcommand)]
    command: Option<Command>,
}

#[derive(Debug, Subcommand)]
enum Command {
    /// Serve the query API (default)
    Serve,
    /// Refresh the catalog from the dataset if it is stale
    Refresh {
        /// Refresh even if the last refresh is recent
        #[arg(long)]
        force: bool,
    },
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            std::env::var("RUST_LOG")
                .unwrap_or_else(|_| "info,reelsites=debug,sqlx=warn".to_string()),
        )
        .init();

    let cli = Cli::parse();
    let config = Arc::new(Config::from_env()?);

    let http = reqwest::Client::builder()
        .user_agent("reelsites/0.1")
        .timeout(Duration::from_secs(30))
        .build()?;

    let db = db::connect_and_migrate(&config.database_url).await?;
    let store = Store::new(db);

    let pipeline = Arc::new(Pipeline::new(
        store.clone(),
        Arc::new(SodaClient::new(http.clone(), config.dataset_url.clone())),
        Arc::new(GoogleGeocoder::new(
            http,
            config.google_api_key.clone(),
            config.geocoding_url.clone(),
        )),
        PipelineSettings::from_config(&config),
    ));

    match cli.command.unwrap_or(Command::Serve) {
        Command::Refresh { force } => {
            let stats = if force {
                Some(pipeline.full_refresh().await?)
            } else {
                pipeline.refresh_if_stale().await?
            };
            if let Some(stats) = stats {
                tracing::info!(stats = %serde_json::to_string(&stats)?, "refresh finished");
            }
        },
        Command::Serve => serve(config, store, pipeline).await?,
    }

    Ok(())
}

async fn serve(config: Arc<Config>, store: Store, pipeline: Arc<Pipeline>) -> anyhow::Result<()> {
    if let Some(every) = config.refresh_check_interval {
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(every);
            loop {
                ticker.tick().await;
                if let Err(err) = pipeline.refresh_if_stale().await {
                    tracing::error!(error = %err, "scheduled refresh failed");
                }
            }
        });
    }

    let state = Arc::new(AppState {
        queries: QueryService::new(store, config.max_locations, config.max_suggestions),
    });

    let app = routes::router(state)
        .layer(CorsLayer::new().allow_origin(Any).allow_headers(Any))
        .layer(TraceLayer::new_for_http());

    let listener = tokio::net::TcpListener::bind(config.addr).await?;
    tracing::info!(addr = %config.addr, "listening");
    axum::serve(listener, app).await?;

    Ok(())
}
