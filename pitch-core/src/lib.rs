// pitch-core/src/lib.rs

//! The core logic for the real-time pitch tracker.
//! This crate turns a stream of audio samples into a stable pitch
//! estimate: FFT, YIN-FFT, time-domain YIN, spectral peak and SWIPE
//! detection, auto gain, and smoothing.
//! It is completely headless and does no device I/O.

pub mod config;
pub mod error;
pub mod fft;
pub mod gain;
pub mod ring_buffer;
pub mod spectrum;
pub mod stabilizer;
pub mod swipe;
pub mod tracker;
pub mod tuning;
pub mod weighting;
pub mod yin;
pub mod yin_fft;

#[cfg(test)]
mod test_support;

use serde::{Deserialize, Serialize};

pub use config::{DetectorKind, TrackerConfig};
pub use spectrum::PeakConfig;
pub use swipe::SwipeConfig;
pub use error::{PitchError, Result};
pub use tracker::PitchTracker;
pub use weighting::CalibrationCurve;

/// A single detector's answer for one frame.
#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct PitchEstimate {
    /// Fundamental frequency in Hz, 0 when no pitch was found.
    pub frequency: f32,
    /// Confidence of the estimate (0.0 to 1.0).
    pub confidence: f32,
}

impl PitchEstimate {
    /// The "no pitch" answer.
    pub const NONE: Self = Self {
        frequency: 0.0,
        confidence: 0.0,
    };

    pub fn is_none(&self) -> bool {
        self.frequency <= 0.0
    }
}

/// Represents the result of a single tracker update.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct PitchFrame {
    /// The last accepted detector pitch in Hz (0.0 while silent).
    pub raw_pitch: f32,
    /// The confidence reported by the detector (0.0 to 1.0).
    pub confidence: f32,
    /// The smoothed and snapped pitch in Hz.
    pub display_pitch: f32,
    /// The display pitch after the configured transposition.
    pub offset_pitch: f32,
    /// The name of the note nearest the offset pitch.
    pub note: Option<String>,
    /// The deviation from that note in cents.
    pub cents: i32,
}
