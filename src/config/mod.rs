//! # Configuration
//!
//! Controller and HTTP server settings, loaded from the environment at startup and
//! shared with the runtime behind async locks.

mod controller;

pub use controller::{ControllerConfig, ServerConfig};

use std::sync::Arc;
use tokio::sync::RwLock;

/// Controller configuration shared across workers and watch tasks
pub type SharedControllerConfig = Arc<RwLock<ControllerConfig>>;

/// Server configuration shared with the HTTP server task
pub type SharedServerConfig = Arc<RwLock<ServerConfig>>;

/// Load both configurations from the environment and wrap them for sharing
pub fn create_shared_config() -> (SharedControllerConfig, SharedServerConfig) {
    (
        Arc::new(RwLock::new(ControllerConfig::from_env())),
        Arc::new(RwLock::new(ServerConfig::from_env())),
    )
}
