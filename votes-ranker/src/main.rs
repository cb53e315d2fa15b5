//! Votes Ranker Main Entry Point
//!
//! Runs the background side of the vote pipeline: the delta partition
//! workers, the outbox relay and the periodic leaderboard builder.

use dotenv::dotenv;
use std::env;
use tracing::{error, info};
use tracing_subscriber::{EnvFilter, layer::SubscriberExt, util::SubscriberInitExt};
use votes_ranker::{Dependencies, ServiceError, Settings};

/// Initialize tracing/logging.
///
/// `LOG_FORMAT=json` switches to structured JSON output.
fn init_tracing() {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new("votes_ranker=info,votes_ranker_pipeline=info"));

    let json = env::var("LOG_FORMAT").is_ok_and(|format| format.eq_ignore_ascii_case("json"));

    if json {
        tracing_subscriber::registry()
            .with(filter)
            .with(
                tracing_subscriber::fmt::layer()
                    .json()
                    .with_target(true)
                    .with_thread_ids(true),
            )
            .init();
    } else {
        tracing_subscriber::registry()
            .with(filter)
            .with(tracing_subscriber::fmt::layer().with_target(true).pretty())
            .init();
    }

    info!(
        service_name = "votes-ranker",
        service_version = env!("CARGO_PKG_VERSION"),
        json,
        "Tracing initialized"
    );
}

#[tokio::main]
async fn main() -> Result<(), ServiceError> {
    dotenv().ok();

    init_tracing();

    info!("Starting Votes Ranker");

    let settings = match Settings::from_env() {
        Ok(settings) => settings,
        Err(e) => {
            error!(error = %e, "Invalid configuration");
            return Err(e);
        }
    };

    let dependencies = match Dependencies::new(&settings).await {
        Ok(dependencies) => {
            info!(
                partitions = settings.delta_partitions,
                "Dependencies initialized successfully"
            );
            dependencies
        }
        Err(e) => {
            error!(error = %e, "Failed to initialize dependencies");
            return Err(e);
        }
    };

    let result = dependencies.orchestrator.run().await;

    if let Some(pool) = dependencies.pool {
        pool.close().await;
    }

    match result {
        Ok(()) => {
            info!("Votes ranker stopped");
            Ok(())
        }
        Err(e) => {
            error!(error = %e, "Orchestrator failed");
            Err(e.into())
        }
    }
}
