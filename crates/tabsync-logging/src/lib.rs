//! Structured logging for tabsync
//!
//! # Features
//!
//! - **JSONL Output**: structured JSON lines for log aggregation (default)
//! - **Tab Context**: tag spans with the tab they belong to, so logs from
//!   several tabs in one process stay separable
//! - **File Rotation**: daily/hourly rotation via tracing-appender
//!
//! # Quick Start
//!
//! ```ignore
//! use tabsync_logging::{LogConfig, TabsyncSubscriberBuilder};
//!
//! // JSONL to console
//! let _guard = TabsyncSubscriberBuilder::new().init();
//!
//! // Pretty output while developing
//! let _guard = TabsyncSubscriberBuilder::new()
//!     .with_config(LogConfig::development())
//!     .init();
//! ```

pub mod config;
pub mod context;
pub mod layers;

pub use config::{ConsoleFormat, FileConfig, JsonFields, LogConfig, LogRotation};
pub use context::{TabContextData, TabContextGuard, tab_span};
pub use layers::{TabContextExtension, TabContextLayer, json_layer};

use std::fs::{self, File};
use std::io;

use thiserror::Error;
use tracing_appender::non_blocking::{NonBlocking, WorkerGuard};
use tracing_appender::rolling::{RollingFileAppender, Rotation};
use tracing_subscriber::{EnvFilter, Layer, Registry, layer::SubscriberExt, util::SubscriberInitExt};

/// Logging setup failures
#[derive(Debug, Error)]
pub enum LogInitError {
    #[error("Failed to open log file: {0}")]
    Io(#[from] io::Error),

    #[error("Global subscriber already set: {0}")]
    AlreadySet(String),
}

type BoxedLayer = Box<dyn Layer<Registry> + Send + Sync>;

/// Builder for configuring and initializing the tabsync subscriber
///
/// Console output is JSONL unless the config says otherwise; see
/// [`LogConfig::development`] for human-readable output.
#[derive(Debug, Default)]
pub struct TabsyncSubscriberBuilder {
    config: LogConfig,
}

impl TabsyncSubscriberBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_config(mut self, config: LogConfig) -> Self {
        self.config = config;
        self
    }

    /// Filter used when `RUST_LOG` is unset
    pub fn with_level(mut self, level: impl Into<String>) -> Self {
        self.config.level = level.into();
        self
    }

    pub fn with_console(mut self, console: ConsoleFormat) -> Self {
        self.config.console = console;
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
    /// The returned guard flushes file output on drop; keep it alive for the
    /// life of the program.
    pub fn try_init(self) -> Result<Option<WorkerGuard>, LogInitError> {
        let env_filter = EnvFilter::try_from_default_env()
            .unwrap_or_else(|_| EnvFilter::new(&self.config.level));

        let mut layers: Vec<BoxedLayer> = vec![env_filter.boxed(), TabContextLayer::new().boxed()];
        let json = self.config.json;

        match self.config.console {
            ConsoleFormat::Off => {}
            ConsoleFormat::Pretty { ansi } => layers.push(
                tracing_subscriber::fmt::layer()
                    .with_ansi(ansi)
                    .with_target(true)
                    .boxed(),
            ),
            ConsoleFormat::Json => layers.push(json_layer(json, std::io::stdout).boxed()),
        }

        let mut guard = None;
        if let Some(file_config) = &self.config.file {
            let (writer, file_guard) = file_writer(file_config)?;
            guard = Some(file_guard);
            layers.push(json_layer(json, writer).boxed());
        }

        Registry::default()
            .with(layers)
            .try_init()
            .map_err(|e| LogInitError::AlreadySet(e.to_string()))?;
        Ok(guard)
    }

    /// Install the subscriber, reporting failures on stderr
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

/// Truncates for `Never` rotation, appends for the others
fn file_writer(config: &FileConfig) -> Result<(NonBlocking, WorkerGuard), LogInitError> {
    fs::create_dir_all(&config.directory)?;
    let pair = match config.rotation {
        LogRotation::Never => {
            let path = config.directory.join(format!("{}.log", config.prefix));
            tracing_appender::non_blocking(File::create(path)?)
        }
        LogRotation::Daily => tracing_appender::non_blocking(RollingFileAppender::new(
            Rotation::DAILY,
            &config.directory,
            &config.prefix,
        )),
        LogRotation::Hourly => tracing_appender::non_blocking(RollingFileAppender::new(
            Rotation::HOURLY,
            &config.directory,
            &config.prefix,
        )),
    };
    Ok(pair)
}

/// JSONL to console, adjusted by `TABSYNC_LOG` / `TABSYNC_LOG_DIR`
pub fn init_default() -> Option<WorkerGuard> {
    TabsyncSubscriberBuilder::new()
        .with_config(LogConfig::default().with_env())
        .init()
}

/// Verbose pretty console output
pub fn init_development() -> Option<WorkerGuard> {
    TabsyncSubscriberBuilder::new()
        .with_config(LogConfig::development())
        .init()
}

/// Minimal output; safe to call from every test
pub fn init_testing() {
    let _ = TabsyncSubscriberBuilder::new()
        .with_config(LogConfig::testing())
        .try_init();
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_builder_defaults_to_jsonl() {
        let builder = TabsyncSubscriberBuilder::new();
        assert_eq!(builder.config().level, "info");
        assert_eq!(builder.config().console, ConsoleFormat::Json);
    }

    #[test]
    fn test_builder_overrides() {
        let builder = TabsyncSubscriberBuilder::new()
            .with_config(LogConfig::development())
            .with_level("trace")
            .with_console(ConsoleFormat::Off);
        assert_eq!(builder.config().level, "trace");
        assert!(!builder.config().console.is_enabled());
    }

    #[test]
    fn test_never_rotation_creates_file() {
        let dir = tempfile::tempdir().unwrap();
        let config = FileConfig {
            prefix: "unit".into(),
            rotation: LogRotation::Never,
            ..FileConfig::in_dir(dir.path().join("logs"))
        };
        let (_writer, _guard) = file_writer(&config).unwrap();
        assert!(dir.path().join("logs").join("unit.log").exists());
    }
}
