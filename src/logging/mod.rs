//! Logging infrastructure - structured tracing for handle lifetimes
//!
//! Design: Uses `tracing` for structured, contextual logging with:
//! - Configurable level, format and destination
//! - Zero-cost when disabled
//! - One helper per lifetime event so field names stay consistent
//!
//! Initialization is optional and idempotent. Library code only emits events;
//! the host application decides whether a subscriber is installed.

use crate::ffi::{HandleKind, NativePtr};
use once_cell::sync::OnceCell;
use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::{
    filter::Directive,
    fmt::{self, format::FmtSpan},
    layer::SubscriberExt,
    util::SubscriberInitExt,
    EnvFilter, Layer,
};

pub use tracing::{debug, error, info, trace, warn, Level};

/// Global logging state (keeps the non-blocking writer alive)
static LOGGER: OnceCell<Option<WorkerGuard>> = OnceCell::new();

/// Log output format
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LogFormat {
    Pretty,
    Compact,
    Json,
}

/// Log output destination
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LogOutput {
    Stderr,
    /// Daily rotated file
    File { directory: String, prefix: String },
}

/// Logging configuration
#[derive(Debug, Clone)]
pub struct LogConfig {
    pub level: Level,
    pub format: LogFormat,
    pub output: LogOutput,
    /// Emit span open/close events
    pub span_events: bool,
    /// Extra filter directives (e.g. "jsref::pool=trace")
    pub filter: Option<String>,
}

impl Default for LogConfig {
    fn default() -> Self {
        Self {
            level: Level::INFO,
            format: LogFormat::Compact,
            output: LogOutput::Stderr,
            span_events: false,
            filter: None,
        }
    }
}

impl LogConfig {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_level(mut self, level: Level) -> Self {
        self.level = level;
        self
    }

    pub fn with_format(mut self, format: LogFormat) -> Self {
        self.format = format;
        self
    }

    pub fn with_output(mut self, output: LogOutput) -> Self {
        self.output = output;
        self
    }

    pub fn with_span_events(mut self, enabled: bool) -> Self {
        self.span_events = enabled;
        self
    }

    pub fn with_filter(mut self, filter: impl Into<String>) -> Self {
        self.filter = Some(filter.into());
        self
    }

    /// Create config from environment variables
    pub fn from_env() -> Self {
        let mut config = Self::default();

        // JSREF_LOG_LEVEL: trace, debug, info, warn, error
        if let Ok(level) = std::env::var("JSREF_LOG_LEVEL") {
            config.level = parse_level(&level).unwrap_or(Level::INFO);
        }

        // JSREF_LOG_FORMAT: pretty, compact, json
        if let Ok(format) = std::env::var("JSREF_LOG_FORMAT") {
            config.format = match format.to_lowercase().as_str() {
                "pretty" => LogFormat::Pretty,
                "json" => LogFormat::Json,
                _ => LogFormat::Compact,
            };
        }

        // JSREF_LOG_DIR: rotate into <dir>/jsref.<date>
        if let Ok(directory) = std::env::var("JSREF_LOG_DIR") {
            config.output = LogOutput::File {
                directory,
                prefix: "jsref".to_string(),
            };
        }

        config.span_events = std::env::var("JSREF_LOG_SPANS").is_ok();
        config.filter = std::env::var("JSREF_LOG_FILTER").ok();

        config
    }
}

fn parse_level(level: &str) -> Option<Level> {
    match level.to_lowercase().as_str() {
        "trace" => Some(Level::TRACE),
        "debug" => Some(Level::DEBUG),
        "info" => Some(Level::INFO),
        "warn" => Some(Level::WARN),
        "error" => Some(Level::ERROR),
        _ => None,
    }
}

/// Initialize logging from the environment
pub fn init() {
    init_with_config(LogConfig::from_env());
}

/// Initialize logging with custom configuration (first call wins)
pub fn init_with_config(config: LogConfig) {
    LOGGER.get_or_init(|| install(&config));
}

/// Check if logging is initialized
pub fn is_initialized() -> bool {
    LOGGER.get().is_some()
}

fn install(config: &LogConfig) -> Option<WorkerGuard> {
    let (writer, guard) = match &config.output {
        LogOutput::Stderr => tracing_appender::non_blocking(std::io::stderr()),
        LogOutput::File { directory, prefix } => {
            tracing_appender::non_blocking(tracing_appender::rolling::daily(directory, prefix))
        }
    };

    let span_events = if config.span_events {
        FmtSpan::NEW | FmtSpan::CLOSE
    } else {
        FmtSpan::NONE
    };

    let layer = fmt::layer()
        .with_writer(writer)
        .with_span_events(span_events)
        .with_target(true)
        .with_thread_ids(cfg!(debug_assertions));

    let layer = match config.format {
        LogFormat::Pretty => layer.pretty().with_filter(build_filter(config)).boxed(),
        LogFormat::Compact => layer.compact().with_filter(build_filter(config)).boxed(),
        LogFormat::Json => layer.json().with_filter(build_filter(config)).boxed(),
    };

    // Another subscriber may already be installed by the host application.
    match tracing_subscriber::registry().with(layer).try_init() {
        Ok(()) => Some(guard),
        Err(_) => None,
    }
}

fn build_filter(config: &LogConfig) -> EnvFilter {
    let base = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(format!("jsref={}", config.level.as_str().to_lowercase())));

    match &config.filter {
        Some(directives) => directives
            .split(',')
            .filter_map(|directive| directive.trim().parse::<Directive>().ok())
            .fold(base, |filter, directive| filter.add_directive(directive)),
        None => base,
    }
}

// ============================================================================
// Lifetime events
// ============================================================================

#[inline]
pub fn log_handle_acquired(kind: HandleKind, ptr: NativePtr) {
    trace!(
        target: "jsref::handle",
        kind = kind.as_str(),
        ptr = %ptr,
        "handle acquired"
    );
}

#[inline]
pub fn log_handle_released(kind: HandleKind, ptr: NativePtr) {
    trace!(
        target: "jsref::handle",
        kind = kind.as_str(),
        ptr = %ptr,
        "handle released"
    );
}

#[inline]
pub fn log_handle_invalidated(kind: HandleKind, ptr: NativePtr) {
    debug!(
        target: "jsref::handle",
        kind = kind.as_str(),
        ptr = %ptr,
        "handle invalidated by collection"
    );
}

#[inline]
pub fn log_collect_dispatch(ptr: NativePtr, invoked: usize, failures: usize) {
    debug!(
        target: "jsref::registry",
        ptr = %ptr,
        invoked,
        failures,
        "before-collect dispatch complete"
    );
}

#[inline]
pub fn log_subscriber_failure(ptr: NativePtr, error: &str) {
    error!(
        target: "jsref::registry",
        ptr = %ptr,
        error,
        "before-collect subscriber failed"
    );
}

#[inline]
pub fn log_pool_insert(pool: &'static str, ptr: NativePtr, replaced: bool) {
    trace!(
        target: "jsref::pool",
        pool,
        ptr = %ptr,
        replaced,
        "wrapper interned"
    );
}

#[inline]
pub fn log_pool_hit(pool: &'static str, ptr: NativePtr) {
    trace!(
        target: "jsref::pool",
        pool,
        ptr = %ptr,
        "wrapper reused, redundant handle released"
    );
}

#[inline]
pub fn log_pool_removed(pool: &'static str, ptr: NativePtr, disposed: bool) {
    debug!(
        target: "jsref::pool",
        pool,
        ptr = %ptr,
        disposed,
        "wrapper removed"
    );
}

#[inline]
pub fn log_pool_evicted(pool: &'static str, ptr: NativePtr) {
    trace!(target: "jsref::pool", pool, ptr = %ptr, "released wrapper evicted");
}

#[inline]
pub fn log_pool_teardown(pool: &'static str, entries: usize) {
    info!(
        target: "jsref::pool",
        pool,
        entries,
        "pool disposed"
    );
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_config_builder() {
        let config = LogConfig::new()
            .with_level(Level::DEBUG)
            .with_format(LogFormat::Json)
            .with_span_events(true)
            .with_filter("jsref::pool=trace");

        assert_eq!(config.level, Level::DEBUG);
        assert_eq!(config.format, LogFormat::Json);
        assert!(config.span_events);
        assert_eq!(config.filter.as_deref(), Some("jsref::pool=trace"));
        assert_eq!(config.output, LogOutput::Stderr);
    }

    #[test]
    fn test_parse_level() {
        assert_eq!(parse_level("TRACE"), Some(Level::TRACE));
        assert_eq!(parse_level("warn"), Some(Level::WARN));
        assert_eq!(parse_level("verbose"), None);
    }

    #[test]
    fn test_init_idempotent() {
        init_with_config(LogConfig::new().with_level(Level::ERROR));
        init_with_config(LogConfig::new().with_level(Level::TRACE));
        assert!(is_initialized());
    }

    #[test]
    fn test_event_helpers() {
        // These should not panic
        let ptr = NativePtr::new(0x1000);
        log_handle_acquired(HandleKind::Value, ptr);
        log_handle_released(HandleKind::Value, ptr);
        log_handle_invalidated(HandleKind::Context, ptr);
        log_collect_dispatch(ptr, 2, 0);
        log_subscriber_failure(ptr, "boom");
        log_pool_insert("value", ptr, false);
        log_pool_hit("value", ptr);
        log_pool_removed("value", ptr, true);
        log_pool_evicted("value", ptr);
        log_pool_teardown("value", 3);
    }
}
