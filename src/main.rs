mod catalog;
mod config;
mod fetcher;
mod helpers;
mod links;
mod pipeline;
mod store;

use std::{process::ExitCode, sync::Arc};

use config::Config;
use fetcher::BrowserFetcher;
use helpers::shutdown::Shutdown;
use pipeline::{Pipeline, PipelineError};
use store::PgCatalogStore;
use tracing::{error, info, warn};
use tracing_subscriber::{filter::Builder as TracingFilterBuilder, util::SubscriberInitExt};

#[tokio::main]
async fn main() -> ExitCode {
    match dotenvy::dotenv() {
        Err(e) if e.not_found() => {}
        Ok(_) => {}
        Err(e) => {
            panic!("Failed to load .env file: {}", e);
        }
    }

    init_log();

    let config = match Config::from_env() {
        Ok(c) => c,
        Err(e) => {
            error!(%e, "Invalid configuration");
            return ExitCode::FAILURE;
        }
    };

    info!("Starting link crawler...");

    let max_connections = u32::try_from(config.pipeline.workers)
        .unwrap_or(u32::MAX)
        .saturating_add(1);
    let store = PgCatalogStore::connect_lazy(config.database.connect_options(), max_connections);

    let shutdown = Shutdown::new();
    let fetcher = match BrowserFetcher::connect(config.browser.clone(), shutdown.clone()).await {
        Ok(f) => f,
        Err(e) => {
            error!(?e, "Could not connect to browser");
            return ExitCode::FAILURE;
        }
    };

    let pipeline = Pipeline::new(
        Arc::new(store),
        Arc::new(fetcher),
        config.pipeline,
        shutdown.clone(),
    );

    // The run keeps going after Ctrl-C until open pages are closed.
    let interrupt = tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            warn!("Interrupted, stopping run");
            shutdown.cancel();
        }
    });

    let res = pipeline.run().await;
    interrupt.abort();

    match res {
        Ok(summary) => {
            info!(?summary, "All items processed");
            ExitCode::SUCCESS
        }
        Err(PipelineError::Cancelled) => ExitCode::FAILURE,
        Err(e) => {
            error!(?e, "Run aborted");
            ExitCode::FAILURE
        }
    }
}

fn init_log() {
    let level = config::log_level(std::env::var("LOG_LEVEL").ok().as_deref());

    tracing_subscriber::fmt()
        .with_ansi(true)
        .with_env_filter(
            TracingFilterBuilder::default()
                .with_default_directive(level.into())
                .from_env_lossy(),
        )
        .finish()
        .init();
}
