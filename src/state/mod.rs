use std::sync::Arc;

use tokio_util::sync::CancellationToken;

use crate::config::Config;

/// Application state shared across handlers.
pub struct AppState {
    pub config: Arc<Config>,
    /// Cancelled when the process begins graceful shutdown; sessions
    /// derive their cancellation tokens from it.
    pub shutdown: CancellationToken,
}

impl AppState {
    pub fn new(config: Config) -> Arc<Self> {
        Arc::new(Self {
            config: Arc::new(config),
            shutdown: CancellationToken::new(),
        })
    }
}
