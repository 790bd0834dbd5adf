//! Utilities module for errors, logging, and distribution statistics
//!
//! This module provides:
//! - The crate-wide error type
//! - Structured logging with tracing
//! - Mean / variance / entropy helpers used by the ensemble and MC Dropout paths

pub mod error;
pub mod logging;
pub mod metrics;

// Re-export main types for convenience
pub use error::{Result, ResultExt, StatusHint, VoxRayError};
pub use logging::{init_logging, LogConfig, LogLevel};
pub use metrics::{argmax, shannon_entropy, top_k, DistributionSummary};

/// Format a probability as a percentage with two decimals
pub fn format_percent(probability: f32) -> String {
    format!("{:.2}%", probability * 100.0)
}

/// Render a probability as a fixed-width bar, e.g. for CLI breakdowns
pub fn format_probability_bar(probability: f32, width: usize) -> String {
    let filled = ((probability.clamp(0.0, 1.0) as f64) * width as f64).round() as usize;
    let empty = width.saturating_sub(filled);

    format!("[{}{}] {}", "█".repeat(filled), "░".repeat(empty), format_percent(probability))
}
