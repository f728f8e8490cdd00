use clap::Parser;
use figment::{
    providers::{Env, Format, Serialized, Toml},
    Figment,
};
use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Ridelink real-time server
#[derive(Parser, Serialize, Deserialize, Clone, Debug)]
#[command(name = "ridelink-server", version, about = "Ridelink real-time presence and ride-room server")]
pub struct Config {
    /// Port to listen on
    #[arg(long, env = "RIDELINK_PORT", default_value = "3000")]
    pub port: u16,

    /// Bind address
    #[arg(long, env = "RIDELINK_BIND_ADDRESS", default_value = "0.0.0.0")]
    pub bind_address: String,

    /// Path to TOML config file
    #[arg(long, default_value = "./ridelink.toml")]
    pub config: String,

    /// Enable structured JSON logging (for Docker/production)
    #[arg(long, env = "RIDELINK_JSON_LOGS")]
    pub json_logs: bool,

    /// Output a commented TOML config template and exit
    #[arg(long)]
    pub generate_config: bool,

    /// Data directory for persistent state (DB, signing key)
    #[arg(long, env = "RIDELINK_DATA_DIR", default_value = "./data")]
    pub data_dir: String,

    /// Heartbeat, grace window and presence sweep timings ([realtime] in TOML)
    #[arg(skip)]
    #[serde(default, skip_serializing)]
    pub realtime: RealtimeConfig,

    /// Driver-approaching alert tuning ([proximity] in TOML)
    #[arg(skip)]
    #[serde(default, skip_serializing)]
    pub proximity: ProximityConfig,
}

/// Timings for connection liveness and presence upkeep.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RealtimeConfig {
    /// Seconds between heartbeat pings (default: 15).
    /// A connection that misses one pong is closed on the following tick.
    #[serde(default = "default_heartbeat_interval")]
    pub heartbeat_interval_secs: u64,

    /// Seconds a disconnected user's record is kept before removal (default: 30)
    #[serde(default = "default_disconnect_grace")]
    pub disconnect_grace_secs: u64,

    /// Seconds between corrective presence sweeps (default: 300)
    #[serde(default = "default_presence_sweep_interval")]
    pub presence_sweep_interval_secs: u64,

    /// Records not seen for this many seconds are evicted by the sweep (default: 1800)
    #[serde(default = "default_stale_after")]
    pub stale_after_secs: u64,
}

impl Default for RealtimeConfig {
    fn default() -> Self {
        Self {
            heartbeat_interval_secs: 15,
            disconnect_grace_secs: 30,
            presence_sweep_interval_secs: 300,
            stale_after_secs: 1800,
        }
    }
}

fn default_heartbeat_interval() -> u64 {
    15
}

fn default_disconnect_grace() -> u64 {
    30
}

fn default_presence_sweep_interval() -> u64 {
    300
}

fn default_stale_after() -> u64 {
    1800
}

/// Driver-approaching alert constants.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProximityConfig {
    /// Distance at or under which a passenger is alerted (default: 1.0 km)
    #[serde(default = "default_alert_radius")]
    pub alert_radius_km: f64,

    /// Linear ETA heuristic (default: 3 minutes per km)
    #[serde(default = "default_eta_minutes_per_km")]
    pub eta_minutes_per_km: f64,
}

impl Default for ProximityConfig {
    fn default() -> Self {
        Self {
            alert_radius_km: 1.0,
            eta_minutes_per_km: 3.0,
        }
    }
}

fn default_alert_radius() -> f64 {
    1.0
}

fn default_eta_minutes_per_km() -> f64 {
    3.0
}

/// Resolved timings used at runtime.
#[derive(Debug, Clone, Copy)]
pub struct Timings {
    pub heartbeat_interval: Duration,
    pub disconnect_grace: Duration,
    pub presence_sweep_interval: Duration,
    pub stale_after: Duration,
}

impl From<&RealtimeConfig> for Timings {
    fn from(cfg: &RealtimeConfig) -> Self {
        Self {
            heartbeat_interval: Duration::from_secs(cfg.heartbeat_interval_secs.max(1)),
            disconnect_grace: Duration::from_secs(cfg.disconnect_grace_secs),
            presence_sweep_interval: Duration::from_secs(cfg.presence_sweep_interval_secs.max(1)),
            stale_after: Duration::from_secs(cfg.stale_after_secs),
        }
    }
}

impl Default for Timings {
    fn default() -> Self {
        Timings::from(&RealtimeConfig::default())
    }
}

impl Default for Config {
    fn default() -> Self {
        Self {
            port: 3000,
            bind_address: "0.0.0.0".to_string(),
            config: "./ridelink.toml".to_string(),
            json_logs: false,
            generate_config: false,
            data_dir: "./data".to_string(),
            realtime: RealtimeConfig::default(),
            proximity: ProximityConfig::default(),
        }
    }
}

impl Config {
    /// Load config with layered precedence:
    /// built-in defaults < TOML file < env vars (RIDELINK_*) < CLI args
    pub fn load() -> Result<Self, figment::Error> {
        let cli = Config::parse();
        let config_path = cli.config.clone();

        Figment::new()
            .merge(Serialized::defaults(Config::default()))
            .merge(Toml::file(&config_path))
            .merge(Env::prefixed("RIDELINK_").split("__"))
            .merge(Serialized::defaults(cli))
            .extract()
    }
}

/// Generate a commented TOML config template
pub fn generate_config_template() -> String {
    r#"# Ridelink Real-Time Server Configuration
# Place this file at ./ridelink.toml or specify with --config <path>
# All settings can be overridden via environment variables (RIDELINK_PORT,
# RIDELINK_REALTIME__HEARTBEAT_INTERVAL_SECS, etc.) or CLI flags (--port, etc.)

# Server port (default: 3000)
# port = 3000

# Bind address (default: 0.0.0.0, all interfaces)
# bind_address = "0.0.0.0"

# Enable structured JSON logging for Docker/production
# json_logs = false

# Data directory for the SQLite database and token signing key
# data_dir = "./data"

# ---- Connection liveness & presence ----
# [realtime]

# Seconds between heartbeat pings; one missed pong closes the connection
# heartbeat_interval_secs = 15

# Seconds a disconnected user stays in the directory (absorbs reconnect flaps)
# disconnect_grace_secs = 30

# Seconds between corrective presence sweeps
# presence_sweep_interval_secs = 300

# Records idle longer than this are evicted by the sweep
# stale_after_secs = 1800

# ---- Driver approaching alerts ----
# [proximity]
# alert_radius_km = 1.0
# eta_minutes_per_km = 3.0
"#
    .to_string()
}
