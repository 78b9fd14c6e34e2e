use std::str::FromStr;

use serde::Deserialize;
use tracing::Level;
use tracing_subscriber::fmt::format::FmtSpan;
use tracing_subscriber::{fmt, EnvFilter};

use crate::errors::{Error, Result};

/// How the stack's `tracing` output is rendered
#[derive(Debug, Clone)]
pub struct LoggingConfig {
    /// Minimum level, added as a directive on top of `RUST_LOG`
    pub level: Level,
    /// One JSON object per event on stdout
    pub json: bool,
    /// Source file and line of each event
    pub file_info: bool,
    /// Span enter/exit events
    pub log_spans: bool,
    /// Name logged at startup
    pub app_name: String,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: Level::INFO,
            json: false,
            file_info: false,
            log_spans: false,
            app_name: "sipline".to_string(),
        }
    }
}

/// `[logging]` table as written in a TOML file
#[derive(Debug, Deserialize)]
#[serde(default)]
struct LoggingFile {
    level: String,
    json: bool,
    file_info: bool,
    log_spans: bool,
    app_name: String,
}

impl Default for LoggingFile {
    fn default() -> Self {
        let config = LoggingConfig::default();
        Self {
            level: config.level.to_string(),
            json: config.json,
            file_info: config.file_info,
            log_spans: config.log_spans,
            app_name: config.app_name,
        }
    }
}

impl LoggingConfig {
    pub fn new(level: Level, app_name: impl Into<String>) -> Self {
        Self {
            level,
            app_name: app_name.into(),
            ..Self::default()
        }
    }

    pub fn with_json(self) -> Self {
        Self { json: true, ..self }
    }

    pub fn with_file_info(self) -> Self {
        Self { file_info: true, ..self }
    }

    pub fn with_spans(self) -> Self {
        Self { log_spans: true, ..self }
    }

    /// Reads the configuration from TOML, e.g.
    /// `level = "debug"` / `json = true`
    pub fn from_toml_str(text: &str) -> Result<Self> {
        let file: LoggingFile = toml::from_str(text).map_err(|e| Error::Config(e.to_string()))?;
        Ok(Self {
            level: parse_log_level(&file.level)?,
            json: file.json,
            file_info: file.file_info,
            log_spans: file.log_spans,
            app_name: file.app_name,
        })
    }
}

/// Installs the global subscriber described by `config`.
///
/// `RUST_LOG` directives are honoured on top of the configured level. Fails
/// if a global subscriber is already installed.
pub fn setup_logging(config: LoggingConfig) -> Result<()> {
    let filter = EnvFilter::from_default_env().add_directive(config.level.into());

    let span_events = if config.log_spans {
        FmtSpan::ACTIVE
    } else {
        FmtSpan::NONE
    };

    let subscriber = fmt::Subscriber::builder()
        .with_env_filter(filter)
        .with_span_events(span_events)
        .with_file(config.file_info)
        .with_line_number(config.file_info);

    let installed = if config.json {
        subscriber.with_writer(std::io::stdout).json().try_init()
    } else {
        subscriber.try_init()
    };
    installed.map_err(|e| Error::Logging(e.to_string()))?;

    log_welcome(&config.app_name, env!("CARGO_PKG_VERSION"));
    Ok(())
}

/// Subscriber for tests: writes through the test harness capture, defaults to
/// `debug` unless `RUST_LOG` says otherwise, and silently does nothing when a
/// previous test already installed one.
pub fn setup_test_logging() {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("debug"));
    let _ = fmt::Subscriber::builder()
        .with_env_filter(filter)
        .with_test_writer()
        .try_init();
}

/// Case-insensitive level name such as `debug` or `WARN`
pub fn parse_log_level(level: &str) -> Result<Level> {
    Level::from_str(level.trim()).map_err(|_| Error::Config(format!("unknown log level '{}'", level)))
}

pub fn log_welcome(app_name: &str, version: &str) {
    tracing::info!(app = app_name, version, "sipline stack starting");
}
