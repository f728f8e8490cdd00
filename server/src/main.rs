use std::net::SocketAddr;
use tokio::net::TcpListener;

use ridelink_server::config::{generate_config_template, Config, Timings};
use ridelink_server::presence::broadcaster::spawn_presence_sweeper;
use ridelink_server::state::AppState;
use ridelink_server::ws::broadcast::force_close_all;
use ridelink_server::{auth, db, routes};

/// Close code sent to every client when the server stops.
const CLOSE_GOING_AWAY: u16 = 1001;

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    // Load config with layered precedence: defaults < TOML < env < CLI
    let config = Config::load()?;

    // Handle --generate-config: print template and exit
    if config.generate_config {
        print!("{}", generate_config_template());
        return Ok(());
    }

    // Initialize tracing/logging
    let filter = || {
        tracing_subscriber::EnvFilter::try_from_default_env()
            .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("ridelink_server=info"))
    };
    if config.json_logs {
        tracing_subscriber::fmt().json().with_env_filter(filter()).init();
    } else {
        tracing_subscriber::fmt().pretty().with_env_filter(filter()).init();
    }

    tracing::info!("Ridelink server v{} starting", env!("CARGO_PKG_VERSION"));

    // Initialize SQLite database
    let db = db::init_db(&config.data_dir)?;

    // Load or generate JWT verification key (256-bit random, stored in data_dir)
    let jwt_secret = auth::jwt::load_or_generate_jwt_secret(&config.data_dir)?;

    let timings = Timings::from(&config.realtime);
    tracing::info!(
        heartbeat_secs = timings.heartbeat_interval.as_secs(),
        grace_secs = timings.disconnect_grace.as_secs(),
        sweep_secs = timings.presence_sweep_interval.as_secs(),
        stale_secs = timings.stale_after.as_secs(),
        alert_radius_km = config.proximity.alert_radius_km,
        "Real-time settings"
    );

    let app_state = AppState::new(db, jwt_secret, timings, config.proximity.clone());
    let sweeper = spawn_presence_sweeper(app_state.clone());

    // Build router
    let app = routes::build_router(app_state.clone());

    // Bind and serve
    let addr = format!("{}:{}", config.bind_address, config.port);
    let listener = TcpListener::bind(&addr).await?;
    tracing::info!("Listening on {}", addr);

    let shutdown_state = app_state.clone();
    axum::serve(
        listener,
        app.into_make_service_with_connect_info::<SocketAddr>(),
    )
    .with_graceful_shutdown(async move {
        let _ = tokio::signal::ctrl_c().await;
        tracing::info!("Shutdown requested, closing connections");
        force_close_all(&shutdown_state.connections, CLOSE_GOING_AWAY, "Server shutting down");
    })
    .await?;

    sweeper.abort();
    app_state.shutdown();
    tracing::info!("Server stopped");

    Ok(())
}
