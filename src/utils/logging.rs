//! Logging Module
//!
//! Structured logging setup using the `tracing` crate.
//! The library only emits events; binaries decide how they are rendered.

use std::time::{Duration, Instant};

use tracing::Level;
use tracing_subscriber::FmtSubscriber;

/// Environment variable consulted by [`LogConfig::from_env`]
pub const LOG_LEVEL_ENV: &str = "VOXRAY_LOG";

/// Logging configuration
#[derive(Debug, Clone)]
pub struct LogConfig {
    /// Minimum log level to display
    pub level: LogLevel,
    /// Whether to include target (module path)
    pub include_target: bool,
    /// Whether to include thread IDs
    pub include_thread_ids: bool,
    /// Whether to use ANSI colors
    pub ansi_colors: bool,
}

impl Default for LogConfig {
    fn default() -> Self {
        Self {
            level: LogLevel::Info,
            include_target: false,
            include_thread_ids: false,
            ansi_colors: true,
        }
    }
}

impl LogConfig {
    /// Verbose logging for debugging
    pub fn verbose() -> Self {
        Self {
            level: LogLevel::Debug,
            include_target: true,
            include_thread_ids: true,
            ansi_colors: true,
        }
    }

    /// Errors only
    pub fn quiet() -> Self {
        Self {
            level: LogLevel::Error,
            include_target: false,
            include_thread_ids: false,
            ansi_colors: true,
        }
    }

    /// Production logging: info level, thread ids for concurrent requests, no colors
    pub fn production() -> Self {
        Self {
            level: LogLevel::Info,
            include_target: true,
            include_thread_ids: true,
            ansi_colors: false,
        }
    }

    /// Default config with the level taken from `VOXRAY_LOG` when set
    pub fn from_env() -> Self {
        let mut config = Self::default();
        if let Ok(level) = std::env::var(LOG_LEVEL_ENV) {
            config.level = LogLevel::parse(&level);
        }
        config
    }
}

/// Log level enum
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LogLevel {
    Trace,
    Debug,
    Info,
    Warn,
    Error,
}

impl LogLevel {
    /// Convert to tracing Level
    pub fn to_tracing_level(&self) -> Level {
        match self {
            LogLevel::Trace => Level::TRACE,
            LogLevel::Debug => Level::DEBUG,
            LogLevel::Info => Level::INFO,
            LogLevel::Warn => Level::WARN,
            LogLevel::Error => Level::ERROR,
        }
    }

    /// Parse a level name, falling back to `Info` for anything unrecognised
    pub fn parse(s: &str) -> Self {
        match s.trim().to_lowercase().as_str() {
            "trace" => LogLevel::Trace,
            "debug" => LogLevel::Debug,
            "info" => LogLevel::Info,
            "warn" | "warning" => LogLevel::Warn,
            "error" => LogLevel::Error,
            _ => LogLevel::Info,
        }
    }
}

impl std::fmt::Display for LogLevel {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            LogLevel::Trace => write!(f, "TRACE"),
            LogLevel::Debug => write!(f, "DEBUG"),
            LogLevel::Info => write!(f, "INFO"),
            LogLevel::Warn => write!(f, "WARN"),
            LogLevel::Error => write!(f, "ERROR"),
        }
    }
}

/// Install a global `tracing` subscriber writing to stderr
///
/// # Returns
/// * `Result<(), String>` - Err if a global subscriber is already set
pub fn init_logging(config: &LogConfig) -> Result<(), String> {
    let subscriber = FmtSubscriber::builder()
        .with_max_level(config.level.to_tracing_level())
        .with_ansi(config.ansi_colors)
        .with_target(config.include_target)
        .with_thread_ids(config.include_thread_ids)
        .with_writer(std::io::stderr)
        .compact()
        .finish();

    tracing::subscriber::set_global_default(subscriber)
        .map_err(|e| format!("Failed to initialize logging: {}", e))?;

    Ok(())
}

/// Run `f`, log how long it took at debug level, and return its output with the duration
pub fn timed<T, F: FnOnce() -> T>(operation: &str, f: F) -> (T, Duration) {
    let start = Instant::now();
    let output = f();
    let elapsed = start.elapsed();

    tracing::debug!(
        "{} finished in {:.2} ms",
        operation,
        elapsed.as_secs_f64() * 1000.0
    );

    (output, elapsed)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_log_level_parse() {
        assert_eq!(LogLevel::parse("debug"), LogLevel::Debug);
        assert_eq!(LogLevel::parse("INFO"), LogLevel::Info);
        assert_eq!(LogLevel::parse(" Warning "), LogLevel::Warn);
        assert_eq!(LogLevel::parse("unknown"), LogLevel::Info);
    }

    #[test]
    fn test_log_config_presets() {
        assert_eq!(LogConfig::default().level, LogLevel::Info);
        assert_eq!(LogConfig::verbose().level, LogLevel::Debug);
        assert_eq!(LogConfig::quiet().level, LogLevel::Error);
        assert!(!LogConfig::production().ansi_colors);
    }

    #[test]
    fn test_timed_returns_output() {
        let (value, elapsed) = timed("sum", || (1..=10).sum::<u32>());
        assert_eq!(value, 55);
        assert!(elapsed.as_secs() < 5);
    }

    #[test]
    fn test_second_init_reports_error() {
        let _ = init_logging(&LogConfig::quiet());
        let second = init_logging(&LogConfig::quiet());
        assert!(matches!(second, Err(msg) if msg.contains("Failed to initialize logging")));
    }
}
