#![forbid(unsafe_code, clippy::unwrap_used, clippy::panic, clippy::expect_used)]

//! Fulfillment server: REST and the tracking socket over one listener, plus the clock loop
//! that tears down idle rooms and frees expired driver reservations.

use axum::http::{HeaderName, Method, header::CONTENT_TYPE};
use framework::cron::{ScheduledJob, cron};
use framework::sqlx::DatabaseProcessor;
use ordering::config::FulfillmentConfig;
use ordering::rpc::middleware::{ACTOR_ID_HEADER, ACTOR_ROLE_HEADER};
use ordering::rpc::{AppState, router};
use ordering::services::FulfillmentServices;
use ordering::services::location_channel::{IdleRoom, RoomRegistry};
use ordering::store::memory::{ExpiredReservation, ExpiredReservationReporter, ExpiredReservationScanner};
use ordering::store::{Backend, FulfillmentStore, MemoryStore};
use std::time::Duration;
use tokio::net::TcpListener;
use tokio::signal::ctrl_c;
use tokio::sync::watch;
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;
use tracing::{error, info, warn};
use tracing_subscriber::{EnvFilter, fmt};

pub mod config;

use config::{ServerConfig, StorageBackend};

pub async fn start_server() -> anyhow::Result<()> {
    fmt().with_env_filter(EnvFilter::from_default_env()).init();

    let config = ServerConfig::load()?;
    info!("Starting with {:?} storage", config.backend);

    match config.backend {
        StorageBackend::Memory => {
            let store = MemoryStore::new();
            let services = FulfillmentServices::new(store.clone(), FulfillmentConfig::default());
            let reservations = ExpiredReservationScanner { store };
            serve(config, services, Some(reservations)).await
        }
        StorageBackend::Postgres => {
            let (Some(database_url), Some(redis_url)) =
                (config.database_url.as_deref(), config.redis_url.as_deref())
            else {
                anyhow::bail!("postgres storage needs DATABASE_URL and REDIS_URL");
            };
            let db = DatabaseProcessor::connect(database_url).await?;
            let redis = framework::redis::connect(redis_url).await?;
            let fulfillment: FulfillmentConfig =
                framework::config::find_config_from_db(db.db()).await?;
            let services = FulfillmentServices::new(Backend::new(db, redis), fulfillment);
            // reservations expire in redis by themselves
            serve(config, services, None).await
        }
    }
}

async fn serve<S: FulfillmentStore + Clone>(
    config: ServerConfig,
    services: FulfillmentServices<S>,
    reservations: Option<ExpiredReservationScanner>,
) -> anyhow::Result<()> {
    let (shutdown_tx, shutdown_rx) = watch::channel(false);

    let clock = tokio::spawn(run_clock(
        config.clock_interval,
        services.channel.rooms().clone(),
        reservations,
        shutdown_rx,
    ));

    let cors = CorsLayer::new()
        .allow_methods([Method::GET, Method::POST, Method::OPTIONS])
        .allow_headers([
            CONTENT_TYPE,
            HeaderName::from_static(ACTOR_ID_HEADER),
            HeaderName::from_static(ACTOR_ROLE_HEADER),
        ])
        .max_age(Duration::from_secs(60 * 60));

    let app = router(AppState::new(services))
        .layer(TraceLayer::new_for_http())
        .layer(cors);

    let address = format!("0.0.0.0:{}", config.port);
    let listener = TcpListener::bind(&address).await?;
    info!("Server running on {address}");

    let served = axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await;

    if shutdown_tx.send(true).is_err() {
        warn!("Clock loop already stopped");
    }
    if let Err(e) = clock.await {
        error!("Clock loop failed: {e}");
    }
    info!("Server shutting down...");
    Ok(served?)
}

async fn run_clock(
    interval: Duration,
    rooms: RoomRegistry,
    reservations: Option<ExpiredReservationScanner>,
    mut shutdown: watch::Receiver<bool>,
) {
    let stopped = async move {
        if shutdown.wait_for(|stop| *stop).await.is_err() {
            warn!("Shutdown sender dropped");
        }
    };
    framework::cron::run_clock(interval, stopped, |loop_count, now| {
        let rooms = rooms.clone();
        let reservations = reservations.clone();
        async move {
            if IdleRoom::is_due(loop_count) {
                match cron::<IdleRoom>(&rooms, &rooms, now).await {
                    Ok(0) => {}
                    Ok(removed) => info!(loop_count, "Removed {removed} idle rooms"),
                    Err(e) => error!("Idle room sweep failed: {e}"),
                }
            }
            if let Some(scanner) = reservations
                && ExpiredReservation::is_due(loop_count)
                && let Err(e) =
                    cron::<ExpiredReservation>(&scanner, &ExpiredReservationReporter, now).await
            {
                error!("Reservation sweep failed: {e}");
            }
        }
    })
    .await;
}

async fn shutdown_signal() {
    let ctrl_c = async {
        match ctrl_c().await {
            Ok(()) => info!("Received Ctrl+C, shutting down"),
            Err(e) => {
                error!("Failed to install Ctrl+C handler: {e}");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(unix)]
    let terminate = async {
        use tokio::signal::unix::{SignalKind, signal};
        match signal(SignalKind::terminate()) {
            Ok(mut stream) => {
                stream.recv().await;
                info!("Received terminate signal, shutting down");
            }
            Err(e) => {
                error!("Failed to install signal handler: {e}");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }
}
