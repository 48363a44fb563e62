//! Structured logging for zigmesh runs
//!
//! Every run logs through `tracing`. This crate wires up the subscriber:
//!
//! - **JSONL console** output by default, for piping a run into log tooling
//! - **Pretty console** output for interactive use ([`LogConfig::development`])
//! - **File output** as JSON lines, either one file per run or rotated via
//!   tracing-appender
//!
//! `RUST_LOG` always wins over the configured level.
//!
//! # Quick Start
//!
//! ```ignore
//! use zigmesh_logging::{LogConfig, ZigmeshSubscriberBuilder};
//!
//! // JSONL to console
//! ZigmeshSubscriberBuilder::new().init();
//!
//! // Human-readable output
//! let _guard = ZigmeshSubscriberBuilder::new()
//!     .with_config(LogConfig::development())
//!     .init();
//! ```

pub mod config;

pub use config::{ConsoleConfig, FileConfig, JsonlConfig, LogConfig, RotationStrategy};

use std::fs::{self, File};
use std::path::PathBuf;

use thiserror::Error;
use tracing_appender::non_blocking::{NonBlocking, WorkerGuard};
use tracing_appender::rolling::{RollingFileAppender, Rotation};
use tracing_subscriber::{EnvFilter, Registry, fmt, layer::SubscriberExt, util::SubscriberInitExt};

/// Errors raised while installing the subscriber
#[derive(Debug, Error)]
pub enum LoggingError {
    #[error("Log file error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Invalid filter directive: {0}")]
    Filter(#[from] tracing_subscriber::filter::ParseError),

    #[error("Subscriber already installed: {0}")]
    Init(#[from] tracing_subscriber::util::TryInitError),
}

/// Builder for configuring and initializing the zigmesh logging subscriber
pub struct ZigmeshSubscriberBuilder {
    config: LogConfig,
}

impl ZigmeshSubscriberBuilder {
    /// Create a new subscriber builder with default configuration
    ///
    /// Default: JSONL output to console
    pub fn new() -> Self {
        Self {
            config: LogConfig::default(),
        }
    }

    /// Use a specific configuration
    pub fn with_config(mut self, config: LogConfig) -> Self {
        self.config = config;
        self
    }

    /// Set the default log level
    pub fn with_level(mut self, level: impl Into<String>) -> Self {
        self.config.default_level = level.into();
        self
    }

    /// Enable or disable console output
    pub fn with_console(mut self, enabled: bool) -> Self {
        self.config.console.enabled = enabled;
        self
    }

    /// Configure file output
    pub fn with_file_output(mut self, config: FileConfig) -> Self {
        self.config.file = Some(config);
        self
    }

    /// Install the subscriber globally
    ///
    /// The returned guard flushes file output when dropped and must be kept
    /// alive for the duration of the program. Failures are reported on
    /// stderr and leave logging disabled.
    pub fn init(self) -> Option<WorkerGuard> {
        match self.try_init() {
            Ok(guard) => guard,
            Err(e) => {
                eprintln!("Warning: Failed to initialize logging: {e}");
                None
            }
        }
    }

    /// Try to install the subscriber globally
    pub fn try_init(self) -> Result<Option<WorkerGuard>, LoggingError> {
        let env_filter = EnvFilter::try_from_default_env()
            .or_else(|_| EnvFilter::try_new(self.config.directives()))?;

        let console = &self.config.console;
        let jsonl = &self.config.jsonl;

        let pretty_layer = (console.enabled && console.pretty)
            .then(|| fmt::layer().with_ansi(console.ansi).with_target(true));

        let json_layer = (console.enabled && !console.pretty).then(|| {
            fmt::layer()
                .json()
                .with_current_span(true)
                .with_span_list(jsonl.include_spans)
                .flatten_event(jsonl.flatten_events)
                .with_file(jsonl.include_location)
                .with_line_number(jsonl.include_location)
        });

        let (file_layer, guard) = match &self.config.file {
            Some(file_config) => {
                let (writer, guard) = file_writer(file_config)?;
                let layer = fmt::layer()
                    .json()
                    .with_current_span(true)
                    .with_span_list(jsonl.include_spans)
                    .flatten_event(jsonl.flatten_events)
                    .with_file(jsonl.include_location)
                    .with_line_number(jsonl.include_location)
                    .with_writer(writer);
                (Some(layer), Some(guard))
            }
            None => (None, None),
        };

        Registry::default()
            .with(env_filter)
            .with(pretty_layer)
            .with(json_layer)
            .with(file_layer)
            .try_init()?;

        Ok(guard)
    }
}

impl Default for ZigmeshSubscriberBuilder {
    fn default() -> Self {
        Self::new()
    }
}

/// Path of the single log file written when rotation is disabled
pub fn log_file_path(config: &FileConfig) -> PathBuf {
    config.directory.join(format!("{}.log", config.prefix))
}

/// Create the non-blocking writer for file output
///
/// Truncates for [`RotationStrategy::Never`], appends for the rotating
/// strategies.
fn file_writer(config: &FileConfig) -> Result<(NonBlocking, WorkerGuard), LoggingError> {
    fs::create_dir_all(&config.directory)?;

    let writer = match config.rotation {
        RotationStrategy::Never => tracing_appender::non_blocking(File::create(log_file_path(config))?),
        RotationStrategy::Daily => tracing_appender::non_blocking(RollingFileAppender::new(
            Rotation::DAILY,
            &config.directory,
            &config.prefix,
        )),
        RotationStrategy::Hourly => tracing_appender::non_blocking(RollingFileAppender::new(
            Rotation::HOURLY,
            &config.directory,
            &config.prefix,
        )),
    };
    Ok(writer)
}

/// Initialize logging for testing (minimal output)
///
/// Safe to call from every test; only the first call installs a subscriber.
pub fn init_testing() {
    let _ = ZigmeshSubscriberBuilder::new()
        .with_config(LogConfig::testing())
        .try_init();
}
