//! # Error Module
//!
//! Errors that can cross the public API of the engine. Per-frame analysis
//! never fails on degenerate audio (silence, zero energy, flat curves); those
//! cases report "no pitch" instead. Only precondition violations and config
//! I/O end up here.

use thiserror::Error;

/// Errors produced by the pitch tracking engine.
#[derive(Error, Debug)]
pub enum PitchError {
    #[error("transform size must be a power of two and at least 4, got {0}")]
    InvalidTransformSize(usize),
    #[error("invalid frequency range: min {min} Hz, max {max} Hz")]
    InvalidFrequencyRange { min: f32, max: f32 },
    #[error("invalid calibration curve: {0}")]
    InvalidCalibration(String),
    #[error("invalid config: {0}")]
    InvalidConfig(String),
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

/// Convenience alias used across the crate.
pub type Result<T> = std::result::Result<T, PitchError>;

/// Rejects a frequency window that cannot produce a sensible lag range.
pub(crate) fn check_frequency_range(min: f32, max: f32) -> Result<()> {
    if !(min.is_finite() && max.is_finite()) || min <= 0.0 || max <= min {
        return Err(PitchError::InvalidFrequencyRange { min, max });
    }
    Ok(())
}
