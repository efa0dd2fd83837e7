use clap::parser::ValueSource;
use clap::{CommandFactory, FromArgMatches, Parser};
use figment::{
    providers::{Env, Format, Serialized, Toml},
    Figment,
};
use serde::{Deserialize, Serialize};

/// Real-time relay hub server
#[derive(Parser, Serialize, Deserialize, Clone, Debug)]
#[command(name = "relay-server", version, about = "Real-time relay hub server")]
pub struct Config {
    /// Port to listen on
    #[arg(long, env = "RELAY_PORT", default_value = "8000")]
    pub port: u16,

    /// Bind address
    #[arg(long, env = "RELAY_BIND_ADDRESS", default_value = "0.0.0.0")]
    pub bind_address: String,

    /// Path to TOML config file
    #[arg(long, default_value = "./relay.toml")]
    pub config: String,

    /// Enable structured JSON logging (for Docker/production)
    #[arg(long, env = "RELAY_JSON_LOGS")]
    pub json_logs: bool,

    /// Output a commented TOML config template and exit
    #[arg(long)]
    pub generate_config: bool,

    /// Send a data_sync snapshot of the shared state to each new connection
    #[arg(
        long,
        env = "RELAY_SYNC_ON_CONNECT",
        default_value_t = true,
        action = clap::ArgAction::Set
    )]
    pub sync_on_connect: bool,

    /// Initial `status` field of the shared state document
    #[arg(long, env = "RELAY_INITIAL_STATUS", default_value = "Offline")]
    pub initial_status: String,

    /// Seconds between server-sent WebSocket pings
    #[arg(long, env = "RELAY_PING_INTERVAL_SECS", default_value = "30")]
    pub ping_interval_secs: u64,

    /// Seconds to wait for a pong before closing the connection
    #[arg(long, env = "RELAY_PONG_TIMEOUT_SECS", default_value = "10")]
    pub pong_timeout_secs: u64,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            port: 8000,
            bind_address: "0.0.0.0".to_string(),
            config: "./relay.toml".to_string(),
            json_logs: false,
            generate_config: false,
            sync_on_connect: true,
            initial_status: "Offline".to_string(),
            ping_interval_secs: 30,
            pong_timeout_secs: 10,
        }
    }
}

impl Config {
    /// Load config with layered precedence:
    /// built-in defaults < TOML file < env vars (RELAY_*) < CLI args
    pub fn load() -> Result<Self, figment::Error> {
        let matches = Config::command().get_matches();
        let cli = Config::from_arg_matches(&matches).unwrap_or_else(|e| e.exit());

        let explicit: Vec<String> = matches
            .ids()
            .filter(|id| matches.value_source(id.as_str()) == Some(ValueSource::CommandLine))
            .map(|id| id.as_str().to_string())
            .collect();

        Self::layered(&cli, &explicit)
    }

    /// Layer the TOML file named by `cli.config` and `RELAY_*` env vars under
    /// the CLI. Only the `explicit` fields of `cli` (those actually given on
    /// the command line) override; clap defaults never mask the file.
    pub fn layered(cli: &Config, explicit: &[String]) -> Result<Self, figment::Error> {
        let mut overrides = serde_json::Map::new();
        if let Ok(serde_json::Value::Object(fields)) = serde_json::to_value(cli) {
            for (key, value) in fields {
                if explicit.contains(&key) {
                    overrides.insert(key, value);
                }
            }
        }

        Figment::new()
            .merge(Serialized::defaults(Config::default()))
            .merge(Toml::file(&cli.config))
            .merge(Env::prefixed("RELAY_"))
            .merge(Serialized::defaults(overrides))
            .extract()
    }

    pub fn listen_address(&self) -> String {
        format!("{}:{}", self.bind_address, self.port)
    }
}

/// Generate a commented TOML config template
pub fn generate_config_template() -> String {
    r#"# Relay Hub Server Configuration
# Place this file at ./relay.toml or specify with --config <path>
# All settings can be overridden via environment variables (RELAY_PORT, etc.)
# or CLI flags (--port, etc.)

# Server port (default: 8000)
# port = 8000

# Bind address (default: 0.0.0.0 — all interfaces)
# bind_address = "0.0.0.0"

# Enable structured JSON logging for Docker/production
# json_logs = false

# ---- Shared State ----

# Send the current shared state (data_sync) to each client right after it connects
# sync_on_connect = true

# Initial value of the shared state's "status" field
# initial_status = "Offline"

# ---- Keepalive ----

# Interval between server pings, in seconds
# ping_interval_secs = 30

# Close the connection if no pong arrives within this many seconds after a ping
# pong_timeout_secs = 10
"#
    .to_string()
}
