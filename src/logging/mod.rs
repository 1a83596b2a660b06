//! Logging infrastructure - structured tracing throughout the bridge
//!
//! Design: Uses `tracing` for structured, contextual logging with:
//! - Configurable level via environment or `RuntimeConfig`
//! - Zero-cost when disabled
//! - Optional JSON output and non-blocking file output
//! - Event helpers per lifecycle family so field names stay consistent

use once_cell::sync::OnceCell;
use std::io;
use std::path::Path;
use tracing::Level;
use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::{
    fmt::{self, format::FmtSpan},
    layer::SubscriberExt,
    util::SubscriberInitExt,
    EnvFilter, Layer,
};

pub use tracing::{debug, error, info, trace, warn};

use crate::config::LoggingConfig;
use crate::handle::NativeHandle;
use crate::ownership::Ownership;

static LOGGER_INITIALIZED: OnceCell<()> = OnceCell::new();
static FILE_GUARD: OnceCell<WorkerGuard> = OnceCell::new();

/// Logging configuration
#[derive(Debug, Clone)]
pub struct LogConfig {
    pub level: Level,
    /// Log file path; console output when absent
    pub log_path: Option<String>,
    pub json_format: bool,
    /// Show span enter/exit events
    pub show_spans: bool,
}

impl Default for LogConfig {
    fn default() -> Self {
        Self {
            level: Level::INFO,
            log_path: None,
            json_format: false,
            show_spans: false,
        }
    }
}

impl LogConfig {
    /// Create config from environment variables
    pub fn from_env() -> Self {
        let mut config = Self::default();

        // BINDRT_LOG_LEVEL: trace, debug, info, warn, error
        if let Ok(level_str) = std::env::var("BINDRT_LOG_LEVEL") {
            config.level = parse_level(&level_str);
        }

        if let Ok(path) = std::env::var("BINDRT_LOG_FILE") {
            config.log_path = Some(path);
        }

        config.json_format = std::env::var("BINDRT_LOG_JSON").is_ok();
        config.show_spans = std::env::var("BINDRT_LOG_SPANS").is_ok();

        config
    }

    /// Build from the `[logging]` table of the runtime config
    pub fn from_runtime_config(config: &LoggingConfig) -> Self {
        Self {
            level: parse_level(&config.level),
            log_path: config.file.clone(),
            json_format: config.json,
            show_spans: config.spans,
        }
    }

    /// Verbose config for debugging lifetime problems
    pub fn debug() -> Self {
        Self {
            level: Level::TRACE,
            log_path: None,
            json_format: false,
            show_spans: true,
        }
    }
}

fn parse_level(level: &str) -> Level {
    match level.to_lowercase().as_str() {
        "trace" => Level::TRACE,
        "debug" => Level::DEBUG,
        "info" => Level::INFO,
        "warn" => Level::WARN,
        "error" => Level::ERROR,
        _ => Level::INFO,
    }
}

/// Initialize logging with configuration from the environment
pub fn init() {
    init_with_config(LogConfig::from_env());
}

/// Initialize logging with custom configuration (first call wins)
pub fn init_with_config(config: LogConfig) {
    LOGGER_INITIALIZED.get_or_init(|| {
        let env_filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| {
            EnvFilter::new(format!("bindrt={}", config.level.as_str().to_lowercase()))
        });

        let span_events = if config.show_spans {
            FmtSpan::ENTER | FmtSpan::CLOSE
        } else {
            FmtSpan::NONE
        };

        let layer = match config.log_path.as_deref() {
            Some(path) => {
                let path = Path::new(path);
                let directory = path.parent().unwrap_or_else(|| Path::new("."));
                let file_name = path
                    .file_name()
                    .map(|n| n.to_string_lossy().into_owned())
                    .unwrap_or_else(|| "bindrt.log".to_string());
                let appender = tracing_appender::rolling::never(directory, file_name);
                let (writer, guard) = tracing_appender::non_blocking(appender);
                let _ = FILE_GUARD.set(guard);

                let base = fmt::layer()
                    .with_writer(writer)
                    .with_ansi(false)
                    .with_span_events(span_events)
                    .with_target(true);
                if config.json_format {
                    base.json().boxed()
                } else {
                    base.boxed()
                }
            }
            None => {
                let base = fmt::layer()
                    .with_writer(io::stderr)
                    .with_span_events(span_events)
                    .with_target(true)
                    .with_thread_ids(cfg!(debug_assertions))
                    .with_line_number(cfg!(debug_assertions));
                if config.json_format {
                    base.json().boxed()
                } else {
                    base.compact().boxed()
                }
            }
        };

        // Ignore error if the host already installed a subscriber
        let _ = tracing_subscriber::registry()
            .with(env_filter)
            .with(layer)
            .try_init();
    });
}

pub fn is_initialized() -> bool {
    LOGGER_INITIALIZED.get().is_some()
}

// ============================================================================
// Bridge-specific logging functions
// ============================================================================

/// Log a wrapper bound to a native handle
#[inline]
pub fn log_wrapper_bound(id: u64, handle: NativeHandle, type_name: &str, ownership: Ownership) {
    debug!(
        event = "wrapper_bound",
        wrapper = id,
        handle = %handle,
        type_name,
        ownership = %ownership,
        "Wrapper bound to native handle"
    );
}

/// Log a registry slot released
#[inline]
pub fn log_wrapper_released(id: u64, handle: NativeHandle) {
    trace!(
        event = "wrapper_released",
        wrapper = id,
        handle = %handle,
        "Registry slot released"
    );
}

/// Log an ownership transfer
#[inline]
pub fn log_ownership_transfer(id: u64, from: Ownership, to: Ownership, reason: &str) {
    debug!(
        event = "ownership_transfer",
        wrapper = id,
        from = %from,
        to = %to,
        reason,
        "Ownership transferred"
    );
}

/// Log an invalidation, including cascaded ones
#[inline]
pub fn log_invalidation(id: u64, type_name: &str, cascaded: bool) {
    debug!(
        event = "invalidation",
        wrapper = id,
        type_name,
        cascaded,
        "Wrapper invalidated"
    );
}

/// Log a virtual call crossing the boundary
#[inline]
pub fn log_dispatch(handle: NativeHandle, method: &str, overridden: bool) {
    trace!(
        event = "dispatch",
        handle = %handle,
        method,
        overridden,
        "Virtual call dispatched"
    );
}

/// Log a cast resolution
#[inline]
pub fn log_cast(id: u64, target: &str, cached: bool) {
    trace!(
        event = "cast",
        wrapper = id,
        target,
        cached,
        "Cast resolved"
    );
}

/// Log a programmer error surfaced to the language side
#[inline]
pub fn log_runtime_error(error: &dyn std::error::Error) {
    warn!(
        event = "runtime_error",
        error = %error,
        "Binding error raised"
    );
}

pub fn log_runtime_init(capacity: usize) {
    info!(event = "runtime_init", capacity, "Binding runtime initialized");
}

pub fn log_runtime_shutdown(live_wrappers: usize) {
    info!(event = "runtime_shutdown", live_wrappers, "Binding runtime shutting down");
}

/// Performance tracking utilities
pub mod perf {
    use std::time::Instant;
    use tracing::debug;

    /// Track operation duration (returns guard that logs on drop)
    #[must_use]
    pub fn track(operation: &'static str) -> PerformanceGuard {
        PerformanceGuard {
            operation,
            start: Instant::now(),
        }
    }

    pub struct PerformanceGuard {
        operation: &'static str,
        start: Instant,
    }

    impl Drop for PerformanceGuard {
        fn drop(&mut self) {
            debug!(
                operation = self.operation,
                duration_us = self.start.elapsed().as_micros() as u64,
                "operation completed"
            );
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_config_creation() {
        let config = LogConfig::default();
        assert_eq!(config.level, Level::INFO);
        assert!(config.log_path.is_none());

        let debug_config = LogConfig::debug();
        assert_eq!(debug_config.level, Level::TRACE);
    }

    #[test]
    fn test_from_runtime_config() {
        let mut section = LoggingConfig::default();
        section.level = "warn".into();
        section.json = true;
        let config = LogConfig::from_runtime_config(&section);
        assert_eq!(config.level, Level::WARN);
        assert!(config.json_format);
        assert_eq!(parse_level("bogus"), Level::INFO);
    }

    #[test]
    fn test_init_idempotent() {
        init();
        init();
        assert!(is_initialized());
    }

    #[test]
    fn test_logging_functions() {
        log_wrapper_bound(1, NativeHandle::new(0x10), "Object", Ownership::LanguageOwned);
        log_wrapper_released(1, NativeHandle::new(0x10));
        log_ownership_transfer(1, Ownership::LanguageOwned, Ownership::NativeOwned, "attach");
        log_invalidation(1, "Object", true);
        log_dispatch(NativeHandle::new(0x10), "event", false);
        log_cast(1, "Base", true);
        let _guard = perf::track("noop");
    }
}
