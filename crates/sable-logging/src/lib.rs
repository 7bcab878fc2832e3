//! # Sable Logging
//!
//! Structured logging for the Sable overlay router.
//!
//! # Features
//!
//! - **JSONL Output**: Structured JSON lines for log aggregation (default)
//! - **Pretty Console**: Human-readable lines for development
//! - **File Rotation**: Daily, hourly, or no rotation via tracing-appender
//! - **Router Spans**: Tag every line with the router or destination it
//!   belongs to when several run in one process
//!
//! # Quick Start
//!
//! ```ignore
//! use sable_logging::{LogConfig, SableSubscriberBuilder};
//!
//! // JSONL to the console
//! SableSubscriberBuilder::new().init();
//!
//! // Development mode with pretty output
//! let _guard = SableSubscriberBuilder::new()
//!     .with_config(LogConfig::development())
//!     .try_init()?;
//! ```

pub mod config;
pub mod context;
pub mod error;
pub mod layers;

pub use config::{ConsoleConfig, FileConfig, JsonlConfig, LogConfig, RotationStrategy};
pub use context::{router_span, session_span};
pub use error::{LoggingError, LoggingResult};

use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;

use crate::layers::BoxedLayer;

/// Builder for the global Sable subscriber
///
/// Console output is JSONL by default; `LogConfig::development()` switches
/// to pretty lines.
pub struct SableSubscriberBuilder {
    config: LogConfig,
}

impl SableSubscriberBuilder {
    pub fn new() -> Self {
        Self {
            config: LogConfig::default(),
        }
    }

    pub fn with_config(mut self, config: LogConfig) -> Self {
        self.config = config;
        self
    }

    /// Set the default log level
    pub fn with_level(mut self, level: impl Into<String>) -> Self {
        self.config.default_level = level.into();
        self
    }

    pub fn with_console(mut self, enabled: bool) -> Self {
        self.config.console.enabled = enabled;
        self
    }

    pub fn with_file_output(mut self, config: FileConfig) -> Self {
        self.config.file = Some(config);
        self
    }

    pub fn config(&self) -> &LogConfig {
        &self.config
    }

    /// Install the subscriber globally
    ///
    /// The returned guard, present with file output, flushes the file
    /// writer on drop; keep it alive for the life of the program.
    pub fn try_init(self) -> LoggingResult<Option<WorkerGuard>> {
        let filter = layers::env_filter(&self.config);
        let mut stack: Vec<BoxedLayer> = Vec::new();

        if self.config.console.enabled {
            stack.push(if self.config.console.pretty {
                layers::pretty_layer(self.config.console.ansi)
            } else {
                layers::jsonl_layer(std::io::stdout, &self.config.jsonl)
            });
        }

        let mut guard = None;
        if let Some(file) = &self.config.file {
            let (writer, file_guard) = layers::file_writer(file)?;
            stack.push(layers::jsonl_layer(writer, &self.config.jsonl));
            guard = Some(file_guard);
        }

        tracing_subscriber::registry()
            .with(stack)
            .with(filter)
            .try_init()
            .map_err(|e| LoggingError::AlreadyInitialized(e.to_string()))?;
        Ok(guard)
    }

    /// Install the subscriber, reporting failure on stderr
    pub fn init(self) -> Option<WorkerGuard> {
        match self.try_init() {
            Ok(guard) => guard,
            Err(e) => {
                eprintln!("Warning: logging not initialized: {}", e);
                None
            }
        }
    }
}

impl Default for SableSubscriberBuilder {
    fn default() -> Self {
        Self::new()
    }
}

/// JSONL to the console at info level
pub fn init_default() {
    SableSubscriberBuilder::new().init();
}

/// Pretty console output at debug level
pub fn init_development() {
    SableSubscriberBuilder::new()
        .with_config(LogConfig::development())
        .init();
}

/// Warnings only; safe to call from every test
pub fn init_testing() {
    let _ = SableSubscriberBuilder::new()
        .with_config(LogConfig::testing())
        .try_init();
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_builder_creation() {
        let builder = SableSubscriberBuilder::new();
        assert_eq!(builder.config().default_level, "info");
        assert!(!builder.config().console.pretty);
    }

    #[test]
    fn test_builder_with_config() {
        let builder = SableSubscriberBuilder::new().with_config(LogConfig::development());
        assert_eq!(builder.config().default_level, "debug");
        assert!(builder.config().console.pretty);
    }

    #[test]
    fn test_builder_overrides() {
        let builder = SableSubscriberBuilder::new()
            .with_level("trace")
            .with_console(false)
            .with_file_output(FileConfig::new("/tmp/sable-logs"));
        assert_eq!(builder.config().default_level, "trace");
        assert!(!builder.config().console.enabled);
        assert!(builder.config().file.is_some());
    }

    #[test]
    fn test_init_testing_twice() {
        init_testing();
        init_testing();
    }
}
