//! Configuration for the router

use std::path::PathBuf;

use sable_netdb::DirectoryConfig;
use sable_session::SessionConfig;
use serde::{Deserialize, Serialize};

/// Configuration for a [`crate::Router`]
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RouterConfig {
    /// Directory for persistent state; `None` keeps everything in memory
    pub data_dir: Option<PathBuf>,
    pub directory: DirectoryConfig,
    /// Defaults for new sessions, before client options are applied
    pub session: SessionConfig,
    /// Sessions allowed at once
    pub max_sessions: usize,
}

impl Default for RouterConfig {
    fn default() -> Self {
        Self {
            data_dir: None,
            directory: DirectoryConfig::default(),
            session: SessionConfig::default(),
            max_sessions: 128,
        }
    }
}

impl RouterConfig {
    /// Persistent router state under `data_dir`
    pub fn with_data_dir(data_dir: impl Into<PathBuf>) -> Self {
        Self {
            data_dir: Some(data_dir.into()),
            ..Default::default()
        }
    }

    /// In-memory router with short intervals for tests
    pub fn testing() -> Self {
        Self {
            directory: DirectoryConfig::testing(),
            session: SessionConfig::testing(),
            ..Default::default()
        }
    }

    pub fn with_directory(mut self, directory: DirectoryConfig) -> Self {
        self.directory = directory;
        self
    }

    pub fn with_session(mut self, session: SessionConfig) -> Self {
        self.session = session;
        self
    }

    pub fn with_max_sessions(mut self, max: usize) -> Self {
        self.max_sessions = max;
        self
    }

    /// Path of the directory database, when persistent
    pub fn db_path(&self) -> Option<PathBuf> {
        self.data_dir.as_ref().map(|dir| dir.join("netdb.redb"))
    }
}
