use std::time::Duration;

use crate::config::Config;
use crate::hub::{Hub, SharedState};

/// Shared application state passed to all handlers via axum State extractor.
#[derive(Clone, Debug)]
pub struct AppState {
    /// The one connection registry for this process
    pub hub: Hub,
    /// Send a data_sync snapshot right after accept
    pub sync_on_connect: bool,
    /// Interval between server-sent pings
    pub ping_interval: Duration,
    /// How long a ping may go unanswered
    pub pong_timeout: Duration,
}

impl AppState {
    pub fn from_config(config: &Config) -> Self {
        Self {
            hub: Hub::new(SharedState::new(config.initial_status.clone())),
            sync_on_connect: config.sync_on_connect,
            ping_interval: Duration::from_secs(config.ping_interval_secs),
            pong_timeout: Duration::from_secs(config.pong_timeout_secs),
        }
    }
}
