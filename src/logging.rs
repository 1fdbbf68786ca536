//! Logging setup for context-injector
//!
//! Structured logging rides on `tracing`. The `logging` feature (default)
//! compiles the instrumentation points in; `logging-json` and
//! `logging-pretty` additionally pull in `tracing-subscriber` so a binary
//! can initialize output without wiring its own subscriber.
//!
//! # Example
//!
//! ```rust,ignore
//! use context_injector::logging;
//!
//! // JSON if logging-json is enabled, pretty otherwise
//! logging::init();
//!
//! // or configure explicitly
//! logging::builder()
//!     .with_level(tracing::Level::TRACE)
//!     .injector_only()
//!     .pretty()
//!     .init();
//! ```

#[cfg(feature = "logging")]
use tracing::Level;

/// Log output format
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum LogFormat {
    /// JSON structured output (production)
    #[default]
    Json,
    /// Colorful multi-line output (development)
    Pretty,
    /// Single-line output
    Compact,
}

/// Builder for subscriber configuration
#[cfg(feature = "logging")]
#[derive(Debug, Clone)]
pub struct LoggingBuilder {
    level: Level,
    format: LogFormat,
    target: Option<&'static str>,
    with_file: bool,
    with_line_number: bool,
}

#[cfg(feature = "logging")]
impl Default for LoggingBuilder {
    fn default() -> Self {
        Self {
            level: Level::DEBUG,
            format: LogFormat::Json,
            target: None,
            with_file: false,
            with_line_number: false,
        }
    }
}

#[cfg(feature = "logging")]
impl LoggingBuilder {
    /// New builder with defaults (DEBUG level, JSON format).
    pub fn new() -> Self {
        Self::default()
    }

    /// Set the minimum level.
    pub fn with_level(mut self, level: Level) -> Self {
        self.level = level;
        self
    }

    /// Shorthand for [`with_level(Level::TRACE)`](Self::with_level).
    pub fn trace(mut self) -> Self {
        self.level = Level::TRACE;
        self
    }

    /// Shorthand for [`with_level(Level::INFO)`](Self::with_level).
    pub fn info(mut self) -> Self {
        self.level = Level::INFO;
        self
    }

    /// Show only events from one target.
    pub fn with_target_filter(mut self, target: &'static str) -> Self {
        self.target = Some(target);
        self
    }

    /// Show only this crate's events.
    pub fn injector_only(self) -> Self {
        self.with_target_filter("context_injector")
    }

    /// Include file names in output.
    pub fn with_file(mut self) -> Self {
        self.with_file = true;
        self
    }

    /// Include line numbers in output.
    pub fn with_line_number(mut self) -> Self {
        self.with_line_number = true;
        self
    }

    /// JSON structured output.
    pub fn json(mut self) -> Self {
        self.format = LogFormat::Json;
        self
    }

    /// Pretty colorful output.
    pub fn pretty(mut self) -> Self {
        self.format = LogFormat::Pretty;
        self
    }

    /// Compact single-line output.
    pub fn compact(mut self) -> Self {
        self.format = LogFormat::Compact;
        self
    }

    /// Install the global subscriber.
    ///
    /// Requires `logging-json` or `logging-pretty`; a no-op otherwise.
    #[cfg(any(feature = "logging-json", feature = "logging-pretty"))]
    pub fn init(self) {
        use tracing_subscriber::{fmt, prelude::*, EnvFilter};

        let filter = match self.target {
            Some(target) => EnvFilter::new(format!("{}={}", target, self.level)),
            None => EnvFilter::new(self.level.to_string()),
        };

        let layer = fmt::layer()
            .with_file(self.with_file)
            .with_line_number(self.with_line_number)
            .with_target(true);

        match self.format {
            LogFormat::Json => {
                #[cfg(feature = "logging-json")]
                {
                    tracing_subscriber::registry()
                        .with(filter)
                        .with(layer.json())
                        .init();
                }
                #[cfg(not(feature = "logging-json"))]
                {
                    // json not compiled in; use the default formatter
                    tracing_subscriber::registry()
                        .with(filter)
                        .with(layer)
                        .init();
                }
            }
            LogFormat::Pretty => {
                tracing_subscriber::registry()
                    .with(filter)
                    .with(layer.pretty())
                    .init();
            }
            LogFormat::Compact => {
                tracing_subscriber::registry()
                    .with(filter)
                    .with(layer.compact())
                    .init();
            }
        }
    }

    /// No-op without a subscriber feature.
    #[cfg(not(any(feature = "logging-json", feature = "logging-pretty")))]
    pub fn init(self) {}
}

/// Create a new logging builder.
#[cfg(feature = "logging")]
pub fn builder() -> LoggingBuilder {
    LoggingBuilder::new()
}

/// Initialize with defaults: JSON when `logging-json` is enabled, pretty
/// otherwise.
#[cfg(any(feature = "logging-json", feature = "logging-pretty"))]
pub fn init() {
    #[cfg(feature = "logging-json")]
    builder().json().init();
    #[cfg(all(feature = "logging-pretty", not(feature = "logging-json")))]
    builder().pretty().init();
}

/// No-op without a subscriber feature.
#[cfg(not(any(feature = "logging-json", feature = "logging-pretty")))]
pub fn init() {}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_builder_defaults() {
        let builder = LoggingBuilder::default();
        assert_eq!(builder.level, Level::DEBUG);
        assert_eq!(builder.format, LogFormat::Json);
        assert!(builder.target.is_none());
    }

    #[test]
    fn test_builder_chain() {
        let builder = LoggingBuilder::new()
            .trace()
            .pretty()
            .with_file()
            .with_line_number()
            .injector_only();

        assert_eq!(builder.level, Level::TRACE);
        assert_eq!(builder.format, LogFormat::Pretty);
        assert!(builder.with_file);
        assert_eq!(builder.target, Some("context_injector"));
    }
}
