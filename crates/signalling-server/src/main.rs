//! Signalling server entry point.
//!
//! Runs both gRPC services (RoomManagement, Signalling) on a single
//! listener port, wires the membership and signalling APIs to the NATS
//! bus, and applies store migrations at startup.

use proto_gen::signalling::room_management_server::RoomManagementServer;
use proto_gen::signalling::signalling_server::SignallingServer;
use signalling_server::bus::BusAdapter;
use signalling_server::config::Config;
use signalling_server::grpc::{RoomManagementService, SignallingService};
use signalling_server::rooms::RoomApi;
use signalling_server::signaling::SignalingApi;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;
use tokio::signal;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tonic::transport::Server;
use tracing::{error, info};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

/// Buffer size of the outbound publisher channels.
const PUBLISH_CHANNEL_CAPACITY: usize = 256;

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    // Load configuration first; it seeds the default log filter
    let config = Config::load()?;

    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env().unwrap_or_else(|_| {
                tracing_subscriber::EnvFilter::new(format!(
                    "signalling_server={}",
                    config.log_level
                ))
            }),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    info!("Starting signalling server");
    info!(
        port = config.port,
        event_namespace = %config.event_namespace,
        nats_url = %config.nats_url,
        ice_servers = config.ice_servers.len(),
        "Configuration loaded successfully"
    );

    // Store pool and idempotent migrations
    info!("Connecting to database...");
    let pool = sqlx::postgres::PgPoolOptions::new()
        .max_connections(20)
        .min_connections(2)
        .acquire_timeout(Duration::from_secs(5))
        .idle_timeout(Duration::from_secs(600))
        .connect(&config.postgres.url())
        .await
        .map_err(|e| {
            error!("Failed to connect to database: {}", e);
            e
        })?;
    sqlx::migrate!("../../migrations").run(&pool).await?;
    info!("Database connection established");

    // Bus connection and outbound publisher channels. Each API holds its
    // channel for its lifetime; the adapter pumps them onto the bus.
    let bus = BusAdapter::connect(&config.nats_url, &config.event_namespace)
        .await
        .map_err(|e| {
            error!("Failed to connect to NATS: {}", e);
            e
        })?;
    info!("Bus connection established");

    let (events_tx, events_rx) = mpsc::channel(PUBLISH_CHANNEL_CAPACITY);
    let (commands_tx, commands_rx) = mpsc::channel(PUBLISH_CHANNEL_CAPACITY);
    let (ices_tx, ices_rx) = mpsc::channel(PUBLISH_CHANNEL_CAPACITY);
    let (onlines_tx, onlines_rx) = mpsc::channel(PUBLISH_CHANNEL_CAPACITY);

    let publisher_handles = vec![
        bus.spawn_room_event_publisher(events_rx),
        bus.spawn_sdp_publisher(commands_rx),
        bus.spawn_ice_publisher(ices_rx),
        bus.spawn_online_status_publisher(onlines_rx),
    ];

    let room_api = Arc::new(RoomApi::new(
        pool.clone(),
        config.access_secret.clone(),
        events_tx.clone(),
    ));
    let signaling_api = Arc::new(SignalingApi::new(
        pool.clone(),
        config.ice_servers.clone(),
        events_tx,
        commands_tx,
        ices_tx,
        onlines_tx,
    ));

    let shutdown = CancellationToken::new();
    let room_service = RoomManagementService::new(room_api);
    let signalling_service = SignallingService::new(
        signaling_api,
        bus.clone(),
        config.access_secret.clone(),
        shutdown.clone(),
    );

    let addr: SocketAddr = format!("0.0.0.0:{}", config.port).parse()?;
    info!("Signalling server listening on {}", addr);

    let server = Server::builder()
        .add_service(RoomManagementServer::new(room_service))
        .add_service(SignallingServer::new(signalling_service))
        .serve_with_shutdown(addr, shutdown_signal(shutdown.clone()));

    if let Err(e) = server.await {
        error!("gRPC server error: {}", e);
    }

    // Cancel live sessions, then let the publisher pumps drain
    shutdown.cancel();
    for handle in publisher_handles {
        handle.abort();
    }

    info!("Signalling server shutdown complete");
    Ok(())
}

/// Listens for shutdown signals (SIGTERM, SIGINT) and triggers the
/// cancellation token for coordinated session teardown.
async fn shutdown_signal(cancel_token: CancellationToken) {
    let ctrl_c = async {
        match signal::ctrl_c().await {
            Ok(()) => info!("Received SIGINT, starting graceful shutdown..."),
            Err(e) => error!("Failed to listen for SIGINT: {}", e),
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut stream) => {
                stream.recv().await;
                info!("Received SIGTERM, starting graceful shutdown...");
            }
            Err(e) => {
                error!("Failed to listen for SIGTERM: {}", e);
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {}
        _ = terminate => {}
    }

    cancel_token.cancel();
}
