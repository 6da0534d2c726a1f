//! Structured logging system using tracing crate
//!
//! ## Environment Variables
//!
//! - `LOG_LEVEL`: Log level (ERROR, WARN, INFO, DEBUG, TRACE) - defaults to INFO
//! - `LOG_FORMAT`: Output format (json, pretty, compact) - defaults to json
//! - `LOG_SPANS`: Include span open/close events (true/false) - defaults to false
//! - `RUST_LOG`: Override log filtering (follows env_logger format)
//!
//! ```bash
//! # On the device
//! LOG_FORMAT=json LOG_LEVEL=INFO mqtt-temp-relay run
//!
//! # At a desk
//! LOG_FORMAT=pretty LOG_LEVEL=DEBUG mqtt-temp-relay -c relay.toml run
//! ```

use std::env;
use tracing::Level;
use tracing_subscriber::filter::Directive;
use tracing_subscriber::fmt::format::FmtSpan;
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

/// Dependencies whose INFO output drowns the relay's own logs
const QUIET_DEPENDENCIES: [&str; 4] = ["rumqttc=warn", "hyper=warn", "reqwest=warn", "tokio=warn"];

/// Log output format options
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum LogFormat {
    /// JSON format for structured logging (machine-readable)
    Json,
    /// Pretty format with colors and indentation (human-readable)
    Pretty,
    /// Compact format with colors but minimal spacing (terminal-friendly)
    Compact,
}

impl LogFormat {
    /// Parse log format from string, falling back to JSON
    pub fn parse(s: &str) -> Self {
        match s.to_lowercase().as_str() {
            "pretty" => LogFormat::Pretty,
            "compact" => LogFormat::Compact,
            _ => LogFormat::Json,
        }
    }
}

/// Resolved logging settings
#[derive(Debug, Clone, PartialEq)]
pub struct LoggingSettings {
    pub level: Level,
    pub format: LogFormat,
    pub include_spans: bool,
    pub rust_log: Option<String>,
}

impl LoggingSettings {
    /// Resolve settings from raw variable values (pure function)
    pub fn from_values(
        level: Option<&str>,
        format: Option<&str>,
        spans: Option<&str>,
        rust_log: Option<&str>,
    ) -> Self {
        let level = match level.unwrap_or("INFO").to_uppercase().as_str() {
            "ERROR" => Level::ERROR,
            "WARN" => Level::WARN,
            "DEBUG" => Level::DEBUG,
            "TRACE" => Level::TRACE,
            _ => Level::INFO,
        };

        Self {
            level,
            format: LogFormat::parse(format.unwrap_or("json")),
            include_spans: spans.is_some_and(|s| s.eq_ignore_ascii_case("true")),
            rust_log: rust_log.map(str::to_string),
        }
    }

    /// Read `LOG_LEVEL`, `LOG_FORMAT`, `LOG_SPANS` and `RUST_LOG`
    pub fn from_env() -> Self {
        let level = env::var("LOG_LEVEL").ok();
        let format = env::var("LOG_FORMAT").ok();
        let spans = env::var("LOG_SPANS").ok();
        let rust_log = env::var("RUST_LOG").ok();

        Self::from_values(
            level.as_deref(),
            format.as_deref(),
            spans.as_deref(),
            rust_log.as_deref(),
        )
    }

    /// Build the level filter; `RUST_LOG` replaces it entirely when set
    pub fn filter(&self) -> EnvFilter {
        if let Some(rust_log) = &self.rust_log {
            return EnvFilter::new(rust_log);
        }

        QUIET_DEPENDENCIES
            .iter()
            .filter_map(|directive| directive.parse::<Directive>().ok())
            .fold(EnvFilter::new(self.level.to_string()), |filter, directive| {
                filter.add_directive(directive)
            })
    }

    fn span_events(&self) -> FmtSpan {
        if self.include_spans {
            FmtSpan::NEW | FmtSpan::CLOSE
        } else {
            FmtSpan::NONE
        }
    }
}

/// Install the global subscriber; a second call is ignored
pub fn init_logging(settings: &LoggingSettings) {
    let subscriber = tracing_subscriber::registry().with(settings.filter());

    let result = match settings.format {
        LogFormat::Json => {
            let fmt_layer = fmt::layer()
                .json()
                .with_span_events(settings.span_events());
            subscriber.with(fmt_layer).try_init()
        }
        LogFormat::Pretty => {
            let fmt_layer = fmt::layer()
                .pretty()
                .with_ansi(true)
                .with_span_events(settings.span_events());
            subscriber.with(fmt_layer).try_init()
        }
        LogFormat::Compact => {
            let fmt_layer = fmt::layer()
                .compact()
                .with_ansi(true)
                .with_target(false)
                .with_span_events(settings.span_events());
            subscriber.with(fmt_layer).try_init()
        }
    };

    if let Err(e) = result {
        eprintln!("logging already initialized: {e}");
    }
}

/// Initialize logging from environment variables
pub fn init_default_logging() {
    init_logging(&LoggingSettings::from_env());
}

/// Span wrapping one model request from dispatch to publish
#[macro_export]
macro_rules! llm_request_span {
    ($($field:tt)*) => {
        tracing::info_span!("llm_request", $($field)*)
    };
}

/// Create an MQTT operation span
#[macro_export]
macro_rules! mqtt_span {
    ($($field:tt)*) => {
        tracing::info_span!("mqtt_operation", $($field)*)
    };
}

/// Create a lifecycle event span
#[macro_export]
macro_rules! lifecycle_span {
    ($($field:tt)*) => {
        tracing::info_span!("lifecycle_event", $($field)*)
    };
}

pub use {lifecycle_span, llm_request_span, mqtt_span};

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_log_format_parse() {
        assert_eq!(LogFormat::parse("json"), LogFormat::Json);
        assert_eq!(LogFormat::parse("PRETTY"), LogFormat::Pretty);
        assert_eq!(LogFormat::parse("CoMpAcT"), LogFormat::Compact);
        // Invalid formats fall back to JSON
        assert_eq!(LogFormat::parse("xml"), LogFormat::Json);
        assert_eq!(LogFormat::parse(""), LogFormat::Json);
    }

    #[test]
    fn test_settings_defaults() {
        let settings = LoggingSettings::from_values(None, None, None, None);
        assert_eq!(settings.level, Level::INFO);
        assert_eq!(settings.format, LogFormat::Json);
        assert!(!settings.include_spans);
        assert!(settings.rust_log.is_none());
    }

    #[test]
    fn test_settings_levels() {
        let cases = vec![
            ("error", Level::ERROR),
            ("WARN", Level::WARN),
            ("Debug", Level::DEBUG),
            ("TRACE", Level::TRACE),
            ("loud", Level::INFO),
        ];

        for (input, expected) in cases {
            let settings = LoggingSettings::from_values(Some(input), None, None, None);
            assert_eq!(settings.level, expected, "Failed for input: {input}");
        }
    }

    #[test]
    fn test_settings_spans_flag() {
        for (input, expected) in [("true", true), ("TRUE", true), ("1", false), ("yes", false)] {
            let settings = LoggingSettings::from_values(None, None, Some(input), None);
            assert_eq!(settings.include_spans, expected, "Failed for input: '{input}'");
        }
    }

    #[test]
    fn test_filter_quiets_dependencies() {
        let settings = LoggingSettings::from_values(Some("debug"), None, None, None);
        let rendered = settings.filter().to_string();
        assert!(rendered.contains("rumqttc=warn"));
        assert!(rendered.contains("reqwest=warn"));
    }

    #[test]
    fn test_rust_log_overrides_filter() {
        let settings =
            LoggingSettings::from_values(Some("debug"), None, None, Some("mqtt_temp_relay=trace"));
        let rendered = settings.filter().to_string();
        assert!(rendered.contains("mqtt_temp_relay=trace"));
        assert!(!rendered.contains("rumqttc"));
    }
}
