//! Structured logging through `tracing`.
//!
//! The host app calls [`init_logging`] once at startup. The filter is read from `CRM_LOG`
//! and falls back to the level passed in.

use thiserror::Error;
use tracing::Level;
use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter, Registry};

pub const LOG_FILTER_ENV: &str = "CRM_LOG";

#[derive(Debug, Error)]
pub enum LoggingError {
    #[error("invalid log level: {0}. Use trace, debug, info, warn, or error")]
    InvalidLevel(String),
    #[error("a global subscriber is already installed")]
    AlreadyInitialized,
}

pub fn parse_log_level(level: &str) -> Result<Level, LoggingError> {
    match level.trim().to_lowercase().as_str() {
        "trace" => Ok(Level::TRACE),
        "debug" => Ok(Level::DEBUG),
        "info" => Ok(Level::INFO),
        "warn" | "warning" => Ok(Level::WARN),
        "error" => Ok(Level::ERROR),
        _ => Err(LoggingError::InvalidLevel(level.to_string())),
    }
}

pub fn init_logging(default_level: &str) -> Result<(), LoggingError> {
    let level = parse_log_level(default_level)?;
    let filter = EnvFilter::try_from_env(LOG_FILTER_ENV)
        .unwrap_or_else(|_| EnvFilter::new(level.as_str().to_lowercase()));

    let stdout = fmt::layer().with_target(true).with_line_number(true);
    Registry::default()
        .with(filter)
        .with(stdout)
        .try_init()
        .map_err(|_| LoggingError::AlreadyInitialized)?;

    tracing::info!(level = %level, "logging initialized");
    Ok(())
}
