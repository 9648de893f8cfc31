//! Tablelink API server entry point.

use std::sync::{Arc, Mutex};

use sqlx::postgres::PgPoolOptions;
use tablelink_api::config::ServerConfig;
use tablelink_api::error::AppError;
use tablelink_api::routes;
use tablelink_api::state::AppState;
use tablelink_api::telemetry;
use tablelink_core::broadcast::RelayBroadcast;
use tablelink_core::clock::{Clock, SystemClock};
use tablelink_core::rng::{DeterministicRng, SystemRng};
use tablelink_core::store::RelayStore;
use tablelink_relay::application::queue::RelayQueue;
use tablelink_relay::application::sweep;
use tablelink_store::pg_broadcast::PgNotifyBroadcast;
use tablelink_store::pg_relay_store::PgRelayStore;
use tablelink_store::retrying::RetryingRelayStore;
use tablelink_store::schema::MIGRATOR;
use tokio_util::sync::CancellationToken;
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;
use tracing::info;

#[tokio::main]
async fn main() -> Result<(), AppError> {
    let telemetry = telemetry::init()?;
    info!("Starting Tablelink API server");

    let config = ServerConfig::from_env()?;

    let pool = PgPoolOptions::new()
        .max_connections(10)
        .connect(&config.database_url)
        .await?;
    MIGRATOR.run(&pool).await?;

    let clock: Arc<dyn Clock> = Arc::new(SystemClock);
    let rng: Arc<Mutex<dyn DeterministicRng + Send>> = Arc::new(Mutex::new(SystemRng::new()));
    let store: Arc<dyn RelayStore> = Arc::new(RetryingRelayStore::new(
        PgRelayStore::new(pool.clone()),
        config.retry,
    ));
    let broadcast: Arc<dyn RelayBroadcast> = Arc::new(PgNotifyBroadcast::new(pool));
    let queue = RelayQueue::new(Arc::clone(&store), Arc::clone(&clock), config.queue)
        .with_broadcast(broadcast);

    let shutdown = CancellationToken::new();
    let sweeper = tokio::spawn(sweep::run(
        config.sweep,
        Arc::clone(&clock),
        Arc::clone(&store),
        shutdown.clone(),
    ));

    let app_state = AppState::new(clock, rng, store, queue, config.pairing);

    // TODO: Replace CorsLayer::permissive() with restricted origins for production.
    let app = routes::app(app_state)
        .layer(TraceLayer::new_for_http())
        .layer(CorsLayer::permissive());

    info!(addr = %config.addr, "listening");
    let listener = tokio::net::TcpListener::bind(config.addr).await?;

    let signal = shutdown.clone();
    axum::serve(listener, app)
        .with_graceful_shutdown(async move {
            if tokio::signal::ctrl_c().await.is_err() {
                signal.cancelled().await;
            }
        })
        .await?;

    shutdown.cancel();
    if let Err(err) = sweeper.await {
        tracing::warn!(error = %err, "expiry sweep task ended abnormally");
    }
    telemetry.shutdown();
    Ok(())
}
