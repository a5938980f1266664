use serde::{Deserialize, Serialize};
use std::env;
use std::io;
use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::{
    fmt::{self, format::FmtSpan},
    layer::SubscriberExt,
    util::SubscriberInitExt,
    EnvFilter, Layer,
};

/// Crates whose chatter stays at `warn` unless `RUST_LOG` says otherwise
const QUIET_TARGETS: [&str; 3] = ["hyper=warn", "tokio=warn", "reqwest=warn"];

/// Log output format options
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub enum LogFormat {
    /// Human-readable format (default for development)
    #[default]
    Pretty,
    /// Compact text format
    Compact,
    /// JSON format for log aggregation systems
    Json,
}

impl LogFormat {
    /// Parse log format from environment variable
    pub fn from_env() -> Self {
        Self::parse(&env::var("LOG_FORMAT").unwrap_or_default())
    }

    pub fn parse(value: &str) -> Self {
        match value.trim().to_lowercase().as_str() {
            "json" => Self::Json,
            "compact" => Self::Compact,
            "pretty" => Self::Pretty,
            _ => Self::default(),
        }
    }
}

/// Configuration for structured logging
#[derive(Debug, Clone)]
pub struct LogConfig {
    /// Log output format (pretty/compact/json)
    pub format: LogFormat,
    /// Service name, e.g. "onvif-emulator"
    pub service_name: String,
    /// Service version
    pub service_version: String,
    /// Filter used when `RUST_LOG` is unset
    pub default_level: String,
    /// Enable span events (new/close)
    pub enable_span_events: bool,
    /// Log to file in addition to stdout
    pub log_to_file: bool,
    /// Log file directory
    pub log_dir: Option<String>,
}

impl LogConfig {
    /// Create a new log configuration, reading overrides from the environment
    pub fn new(service_name: impl Into<String>) -> Self {
        Self {
            format: LogFormat::from_env(),
            service_name: service_name.into(),
            service_version: env::var("SERVICE_VERSION")
                .unwrap_or_else(|_| env!("CARGO_PKG_VERSION").to_string()),
            default_level: "info".to_string(),
            enable_span_events: env::var("LOG_SPAN_EVENTS")
                .ok()
                .and_then(|v| v.parse().ok())
                .unwrap_or(false),
            log_to_file: env::var("LOG_TO_FILE")
                .ok()
                .and_then(|v| v.parse().ok())
                .unwrap_or(false),
            log_dir: env::var("LOG_DIR").ok(),
        }
    }

    /// Set the log format
    pub fn with_format(mut self, format: LogFormat) -> Self {
        self.format = format;
        self
    }

    /// Set the service version
    pub fn with_version(mut self, version: impl Into<String>) -> Self {
        self.service_version = version.into();
        self
    }

    /// Set the filter applied when `RUST_LOG` is unset
    pub fn with_default_level(mut self, level: impl Into<String>) -> Self {
        self.default_level = level.into();
        self
    }

    /// Enable span events (new/close)
    pub fn with_span_events(mut self, enable: bool) -> Self {
        self.enable_span_events = enable;
        self
    }

    /// Enable logging to file
    pub fn with_file_logging(mut self, log_dir: impl Into<String>) -> Self {
        self.log_to_file = true;
        self.log_dir = Some(log_dir.into());
        self
    }

    fn span_events(&self) -> FmtSpan {
        if self.enable_span_events {
            FmtSpan::NEW | FmtSpan::CLOSE
        } else {
            FmtSpan::NONE
        }
    }

    fn env_filter(&self) -> EnvFilter {
        let mut filter = EnvFilter::try_from_default_env()
            .unwrap_or_else(|_| EnvFilter::new(&self.default_level));

        for target in QUIET_TARGETS {
            if let Ok(directive) = target.parse() {
                filter = filter.add_directive(directive);
            }
        }

        filter
    }
}

/// Initialize structured logging with the given configuration.
///
/// When file logging is enabled the returned guard must be kept alive for
/// buffered lines to be flushed.
pub fn init_structured_logging(config: LogConfig) -> Option<WorkerGuard> {
    let span_events = config.span_events();

    let stdout_layer = match config.format {
        LogFormat::Json => fmt::layer()
            .json()
            .with_span_events(span_events)
            .with_current_span(true)
            .with_span_list(true)
            .with_target(true)
            .with_thread_ids(true)
            .with_thread_names(true)
            .with_writer(io::stdout)
            .boxed(),
        LogFormat::Compact => fmt::layer()
            .compact()
            .with_span_events(span_events)
            .with_target(true)
            .with_thread_ids(false)
            .boxed(),
        LogFormat::Pretty => fmt::layer()
            .pretty()
            .with_span_events(span_events)
            .with_target(true)
            .with_thread_ids(false)
            .with_line_number(true)
            .boxed(),
    };

    let (file_layer, guard) = match (config.log_to_file, config.log_dir.as_deref()) {
        (true, Some(log_dir)) => {
            let file_appender =
                tracing_appender::rolling::daily(log_dir, format!("{}.log", config.service_name));
            let (non_blocking, guard) = tracing_appender::non_blocking(file_appender);
            let layer = fmt::layer()
                .json()
                .with_span_events(config.span_events())
                .with_writer(non_blocking);
            (Some(layer), Some(guard))
        }
        _ => (None, None),
    };

    let initialized = tracing_subscriber::registry()
        .with(config.env_filter())
        .with(stdout_layer)
        .with(file_layer)
        .try_init();

    if initialized.is_ok() {
        tracing::info!(
            service.name = %config.service_name,
            service.version = %config.service_version,
            format = ?config.format,
            file_logging = guard.is_some(),
            "structured logging initialized"
        );
    }

    guard
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_log_format_parse() {
        assert_eq!(LogFormat::parse(""), LogFormat::Pretty);
        assert_eq!(LogFormat::parse("json"), LogFormat::Json);
        assert_eq!(LogFormat::parse(" JSON "), LogFormat::Json);
        assert_eq!(LogFormat::parse("compact"), LogFormat::Compact);
        assert_eq!(LogFormat::parse("pretty"), LogFormat::Pretty);
        assert_eq!(LogFormat::parse("xml"), LogFormat::Pretty);
    }

    #[test]
    fn test_log_config_builder() {
        let config = LogConfig::new("onvif-emulator")
            .with_version("1.0.0")
            .with_default_level("debug")
            .with_format(LogFormat::Json)
            .with_span_events(true)
            .with_file_logging("/tmp/logs");

        assert_eq!(config.service_name, "onvif-emulator");
        assert_eq!(config.service_version, "1.0.0");
        assert_eq!(config.default_level, "debug");
        assert_eq!(config.format, LogFormat::Json);
        assert!(config.enable_span_events);
        assert!(config.log_to_file);
        assert_eq!(config.log_dir.as_deref(), Some("/tmp/logs"));
        assert_eq!(config.span_events(), FmtSpan::NEW | FmtSpan::CLOSE);
    }

    #[test]
    fn test_default_level_is_info() {
        let config = LogConfig::new("onvif-emulator");
        assert_eq!(config.default_level, "info");
    }

    #[test]
    fn test_init_twice_does_not_panic() {
        let _ = init_structured_logging(LogConfig::new("first").with_format(LogFormat::Compact));
        let _ = init_structured_logging(LogConfig::new("second"));
    }
}
