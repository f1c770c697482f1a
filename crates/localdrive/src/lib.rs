//! Local-network file sharing core.
//!
//! Serves a directory tree over HTTP for browsing, upload, download, rename,
//! delete and range-based media streaming. [`server::LifecycleManager`] owns
//! the listener and its start/stop/rebind state machine; [`control`] puts a
//! message-passing front-end on top of it for GUI, tray or console callers.

pub mod config;
pub mod control;
pub mod error;
pub mod handlers;
pub mod listing;
pub mod locks;
pub mod netinfo;
pub mod ops;
pub mod paths;
pub mod range;
pub mod render;
pub mod routes;
pub mod server;

use std::path::PathBuf;
use std::sync::Arc;

pub use config::Config;
pub use control::{Controller, LifecycleCommand, LifecycleEvent};
pub use error::DriveError;
pub use server::{LifecycleManager, ServerState};

use locks::PathLocks;

/// Application state shared across handlers
#[derive(Clone)]
pub struct AppState {
    /// Serving root, absolute and canonical
    pub root_dir: PathBuf,
    /// Configuration
    pub config: Arc<Config>,
    /// Serializes mutations on the same path
    pub locks: PathLocks,
}

impl AppState {
    /// Create a new AppState with the given root directory and default config.
    pub fn new(root_dir: PathBuf) -> Self {
        Self::with_config(root_dir, Arc::new(Config::default()))
    }

    /// Create a new AppState with the given root directory and config.
    pub fn with_config(root_dir: PathBuf, config: Arc<Config>) -> Self {
        Self {
            root_dir,
            config,
            locks: PathLocks::new(),
        }
    }
}
