//! # Configuration Module
//!
//! Tracker settings, stored as JSON.

use serde::{Deserialize, Serialize};
use std::path::Path;

use crate::error::{PitchError, Result, check_frequency_range};
use crate::spectrum::PeakConfig;
use crate::swipe::SwipeConfig;

/// Largest accepted `resolution` (a 131072-point transform).
pub const MAX_RESOLUTION: usize = 1 << 16;

/// Which pitch estimator feeds the stabilizer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum DetectorKind {
    /// Weighted frequency-domain YIN.
    #[default]
    YinFft,
    /// Classic YIN on the waveform.
    YinTimeDomain,
    /// Strongest peak of the display spectrum.
    SpectrumPeak,
    /// Harmonic-sum scoring of the display spectrum.
    Swipe,
}

/// Settings of a [`PitchTracker`](crate::PitchTracker).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct TrackerConfig {
    /// Half the transform size; the analysis window holds `2 * resolution`
    /// samples.
    pub resolution: usize,
    /// Lowest pitch searched (Hz).
    pub min_frequency: f32,
    /// Highest pitch searched (Hz).
    pub max_frequency: f32,
    /// Estimates below this confidence leave the display pitch alone.
    pub threshold: f32,
    /// Weight of the previous display pitch when smoothing.
    pub smoothing: f32,
    /// Strength of the pull toward the nearest note.
    pub snap_strength: f32,
    /// Transposition applied to the reported offset pitch.
    pub pitch_offset_semitones: i32,
    /// Input gain (dB); the display spectrum spans `-gain - dynamic_range`
    /// to `-gain` dBFS.
    pub gain: f32,
    /// Follow the input level instead of using `gain`.
    pub auto_gain: bool,
    /// Dynamic range of the display spectrum (dB).
    pub dynamic_range: f32,
    pub detector: DetectorKind,
    /// CMNDF threshold of the time-domain detector.
    pub yin_threshold: f32,
    pub peak: PeakConfig,
    pub swipe: SwipeConfig,
}

impl Default for TrackerConfig {
    fn default() -> Self {
        Self {
            resolution: 2048,
            min_frequency: 50.0,
            max_frequency: 1000.0,
            threshold: 0.9,
            smoothing: 0.8,
            snap_strength: 0.5,
            pitch_offset_semitones: 0,
            gain: 0.0,
            auto_gain: false,
            dynamic_range: 80.0,
            detector: DetectorKind::YinFft,
            yin_threshold: crate::yin::DEFAULT_THRESHOLD,
            peak: PeakConfig::default(),
            swipe: SwipeConfig::default(),
        }
    }
}

impl TrackerConfig {
    /// Number of samples in the analysis window.
    pub fn transform_size(&self) -> usize {
        self.resolution.saturating_mul(2)
    }

    /// Noise floor and ceiling (dBFS) of the display spectrum for the fixed
    /// `gain`.
    pub fn spectrum_range(&self) -> (f32, f32) {
        spectrum_range(self.gain, self.dynamic_range)
    }

    /// Checks every setting.
    ///
    /// # Errors
    /// * `PitchError::InvalidTransformSize` - if `resolution` is not a power
    ///   of two in `2..=MAX_RESOLUTION`
    /// * `PitchError::InvalidFrequencyRange` - if the bounds are not positive
    ///   and ordered
    /// * `PitchError::InvalidConfig` - for any other value out of range
    pub fn validate(&self) -> Result<()> {
        if self.resolution < 2
            || self.resolution > MAX_RESOLUTION
            || !self.resolution.is_power_of_two()
        {
            return Err(PitchError::InvalidTransformSize(self.transform_size()));
        }
        check_frequency_range(self.min_frequency, self.max_frequency)?;

        let unit_checks = [
            ("threshold", self.threshold, 0.0f32..=1.0),
            ("snap_strength", self.snap_strength, 0.0..=1.0),
            ("yin_threshold", self.yin_threshold, 0.0..=1.0),
        ];
        for (name, value, range) in unit_checks {
            if !range.contains(&value) {
                return Err(PitchError::InvalidConfig(format!(
                    "{name} must be within [0, 1], got {value}"
                )));
            }
        }
        if !(0.0..1.0).contains(&self.smoothing) {
            return Err(PitchError::InvalidConfig(format!(
                "smoothing must be within [0, 1), got {}",
                self.smoothing
            )));
        }
        if !self.gain.is_finite() {
            return Err(PitchError::InvalidConfig(format!("gain {}", self.gain)));
        }
        if !(self.dynamic_range.is_finite() && self.dynamic_range > 0.0) {
            return Err(PitchError::InvalidConfig(format!(
                "dynamic_range must be positive, got {}",
                self.dynamic_range
            )));
        }
        self.swipe.validate()?;
        crate::spectrum::SpectrumPeakDetector::from_config(&self.peak)?;
        Ok(())
    }

    /// Reads a config from a JSON file. Missing fields take their defaults.
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let data = std::fs::read_to_string(path)?;
        let config: TrackerConfig = serde_json::from_str(&data)?;
        config.validate()?;
        Ok(config)
    }

    /// Writes the config as pretty-printed JSON.
    pub fn save(&self, path: impl AsRef<Path>) -> Result<()> {
        let json_string = serde_json::to_string_pretty(self)?;
        std::fs::write(path, json_string)?;
        Ok(())
    }
}

/// Display spectrum bounds `(-gain - dynamic_range, -gain)` in dBFS.
pub fn spectrum_range(gain: f32, dynamic_range: f32) -> (f32, f32) {
    (-gain - dynamic_range, -gain)
}
