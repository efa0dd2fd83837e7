use std::net::SocketAddr;
use tokio::net::TcpListener;

use relay_server::config::{generate_config_template, Config};
use relay_server::error::ServerError;
use relay_server::routes;
use relay_server::state::AppState;

const DEFAULT_LOG_FILTER: &str = "relay_server=info";

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    // Load config with layered precedence: defaults < TOML < env < CLI
    let config = Config::load().map_err(ServerError::from)?;

    // Handle --generate-config: print template and exit
    if config.generate_config {
        print!("{}", generate_config_template());
        return Ok(());
    }

    init_tracing(config.json_logs);

    tracing::info!("Relay hub server v{} starting", env!("CARGO_PKG_VERSION"));

    let app_state = AppState::from_config(&config);
    tracing::info!(
        sync_on_connect = app_state.sync_on_connect,
        ping_interval_secs = config.ping_interval_secs,
        "Connection hub ready"
    );

    let app = routes::build_router(app_state);

    // Bind and serve
    let addr = config.listen_address();
    let listener = TcpListener::bind(&addr)
        .await
        .map_err(|source| ServerError::Bind {
            addr: addr.clone(),
            source,
        })?;
    tracing::info!("Listening on {}", addr);

    axum::serve(
        listener,
        app.into_make_service_with_connect_info::<SocketAddr>(),
    )
    .await
    .map_err(ServerError::Serve)?;

    Ok(())
}

/// Initialize tracing/logging: pretty for terminals, JSON for Docker/production.
fn init_tracing(json_logs: bool) {
    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(DEFAULT_LOG_FILTER));

    if json_logs {
        tracing_subscriber::fmt().json().with_env_filter(filter).init();
    } else {
        tracing_subscriber::fmt().pretty().with_env_filter(filter).init();
    }
}
