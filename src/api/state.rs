use std::sync::Arc;

use crate::config::AppConfig;
use crate::ws::{Dispatcher, Registry};

/// Shared application state passed to all handlers via Axum's State extractor.
pub struct AppState {
    pub registry: Arc<Registry>,
    pub dispatcher: Dispatcher,
    pub config: AppConfig,
    pub start_time: std::time::Instant,
}

pub type SharedState = Arc<AppState>;

impl AppState {
    pub fn new(config: AppConfig) -> SharedState {
        let registry = Registry::new();
        let dispatcher = Dispatcher::new(Arc::clone(&registry), config.send_timeout());

        Arc::new(AppState {
            registry,
            dispatcher,
            config,
            start_time: std::time::Instant::now(),
        })
    }
}
