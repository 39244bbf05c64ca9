//! Subscriber setup for the `tracing` events emitted by Trellis.
//!
//! The crate only emits events; it never installs a subscriber on its own.
//! Binaries call [`LogConfig::init`] once and keep the returned guard alive.
//!
//! ```no_run
//! use trellis_core::logging::*;
//!
//! #[tokio::main]
//! async fn main() -> Result<(), trellis_core::Error> {
//!     let _guard = LogConfig::new()
//!         .level(LogLevel::Debug)
//!         .format(LogFormat::Pretty)
//!         .init()?;
//!
//!     info!("service starting");
//!     Ok(())
//! }
//! ```

use crate::config::Config;
use crate::error::{Error, Result};
use std::io;
use tracing::Level;
use tracing_appender::non_blocking::{NonBlocking, WorkerGuard};
use tracing_subscriber::{
    EnvFilter, Layer,
    fmt::{self, format::FmtSpan},
    layer::SubscriberExt,
    util::SubscriberInitExt,
};

pub use tracing::{debug, error, info, trace, warn};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LogLevel {
    Trace,
    Debug,
    Info,
    Warn,
    Error,
}

impl LogLevel {
    pub fn to_tracing_level(&self) -> Level {
        match self {
            LogLevel::Trace => Level::TRACE,
            LogLevel::Debug => Level::DEBUG,
            LogLevel::Info => Level::INFO,
            LogLevel::Warn => Level::WARN,
            LogLevel::Error => Level::ERROR,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            LogLevel::Trace => "trace",
            LogLevel::Debug => "debug",
            LogLevel::Info => "info",
            LogLevel::Warn => "warn",
            LogLevel::Error => "error",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LogFormat {
    /// Structured, one object per line
    Json,
    Plain,
    /// Multi-line, colored; meant for development
    Pretty,
    Compact,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LogOutput {
    Stdout,
    Stderr,
    /// Append to a single file
    File(String),
    /// Daily-rotated files under `directory`
    DailyFile { directory: String, prefix: String },
}

#[derive(Debug, Clone)]
pub struct LogConfig {
    pub level: LogLevel,
    pub format: LogFormat,
    pub output: LogOutput,
    pub targets: bool,
    pub thread_ids: bool,
    pub file_line: bool,
    /// Emit an event when each span closes (request latency, for instance)
    pub spans: bool,
    pub colors: bool,
    /// Overrides `level` when set, e.g. `"trellis_core=debug,hyper=info"`
    pub env_filter: Option<String>,
}

impl Default for LogConfig {
    /// JSON to STDOUT at INFO level
    fn default() -> Self {
        Self {
            level: LogLevel::Info,
            format: LogFormat::Json,
            output: LogOutput::Stdout,
            targets: true,
            thread_ids: false,
            file_line: false,
            spans: false,
            colors: false,
            env_filter: None,
        }
    }
}

impl LogConfig {
    pub fn new() -> Self {
        Self::default()
    }

    /// Pretty DEBUG output in development mode, JSON INFO output otherwise.
    pub fn for_config(config: &Config) -> Self {
        if config.dev_mode {
            Self::new()
                .level(LogLevel::Debug)
                .format(LogFormat::Pretty)
                .with_colors(true)
        } else {
            Self::new()
        }
    }

    pub fn level(mut self, level: LogLevel) -> Self {
        self.level = level;
        self
    }

    pub fn format(mut self, format: LogFormat) -> Self {
        self.format = format;
        self
    }

    pub fn output(mut self, output: LogOutput) -> Self {
        self.output = output;
        self
    }

    pub fn with_targets(mut self, enable: bool) -> Self {
        self.targets = enable;
        self
    }

    pub fn with_thread_ids(mut self, enable: bool) -> Self {
        self.thread_ids = enable;
        self
    }

    pub fn with_file_line(mut self, enable: bool) -> Self {
        self.file_line = enable;
        self
    }

    pub fn with_spans(mut self, enable: bool) -> Self {
        self.spans = enable;
        self
    }

    pub fn with_colors(mut self, enable: bool) -> Self {
        self.colors = enable;
        self
    }

    pub fn with_env_filter(mut self, filter: impl Into<String>) -> Self {
        self.env_filter = Some(filter.into());
        self
    }

    fn filter(&self) -> EnvFilter {
        match &self.env_filter {
            Some(directives) => {
                EnvFilter::try_new(directives).unwrap_or_else(|_| EnvFilter::new(self.level.as_str()))
            }
            None => EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| EnvFilter::new(self.level.as_str())),
        }
    }

    fn writer(&self) -> Result<(NonBlocking, WorkerGuard)> {
        Ok(match &self.output {
            LogOutput::Stdout => tracing_appender::non_blocking(io::stdout()),
            LogOutput::Stderr => tracing_appender::non_blocking(io::stderr()),
            LogOutput::File(path) => {
                let file = std::fs::OpenOptions::new()
                    .create(true)
                    .append(true)
                    .open(path)?;
                tracing_appender::non_blocking(file)
            }
            LogOutput::DailyFile { directory, prefix } => {
                tracing_appender::non_blocking(tracing_appender::rolling::daily(directory, prefix))
            }
        })
    }

    /// Install the global subscriber.
    ///
    /// Fails if a subscriber is already installed. Logs buffered in the
    /// non-blocking writer are flushed when the guard is dropped.
    pub fn init(self) -> Result<WorkerGuard> {
        let (writer, guard) = self.writer()?;
        let spans = if self.spans {
            FmtSpan::CLOSE
        } else {
            FmtSpan::NONE
        };

        let layer = match self.format {
            LogFormat::Json => fmt::layer()
                .json()
                .with_writer(writer)
                .with_target(self.targets)
                .with_thread_ids(self.thread_ids)
                .with_file(self.file_line)
                .with_line_number(self.file_line)
                .with_span_events(spans)
                .boxed(),
            LogFormat::Plain => fmt::layer()
                .with_writer(writer)
                .with_target(self.targets)
                .with_thread_ids(self.thread_ids)
                .with_file(self.file_line)
                .with_line_number(self.file_line)
                .with_ansi(self.colors)
                .with_span_events(spans)
                .boxed(),
            LogFormat::Pretty => fmt::layer()
                .pretty()
                .with_writer(writer)
                .with_target(self.targets)
                .with_thread_ids(self.thread_ids)
                .with_ansi(self.colors)
                .with_span_events(spans)
                .boxed(),
            LogFormat::Compact => fmt::layer()
                .compact()
                .with_writer(writer)
                .with_target(self.targets)
                .with_ansi(self.colors)
                .with_span_events(spans)
                .boxed(),
        };

        tracing_subscriber::registry()
            .with(layer)
            .with(self.filter())
            .try_init()
            .map_err(|e| Error::Config(format!("failed to install log subscriber: {}", e)))?;

        Ok(guard)
    }
}
