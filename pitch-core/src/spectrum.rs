//! # Spectrum Module
//!
//! Display spectrum and the plain peak-picking pitch detector that works on
//! it.
//!
//! ## Features
//! - Hann-windowed magnitude spectrum mapped from dBFS onto `[0, 1]` between a
//!   noise floor and a ceiling
//! - Local-maximum peak picking with a configurable neighbourhood
//! - Optional harmonic product spectrum to favour the fundamental
//! - Parabolic interpolation for sub-bin accuracy

use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tracing::trace;

use crate::PitchEstimate;
use crate::error::{PitchError, Result, check_frequency_range};
use crate::fft::{WindowedFft, spectrum_to_magnitudes};
use crate::yin::parabolic_interpolation;

/// Level reported for digital silence (dBFS).
pub const SILENCE_DB: f32 = -240.0;

/// Converts a linear amplitude to dBFS, [`SILENCE_DB`] for zero.
pub fn dbfs(level: f32) -> f32 {
    if level <= 0.0 {
        return SILENCE_DB;
    }
    (20.0 * level.log10()).max(SILENCE_DB)
}

/// Normalised magnitude spectrum of the sample window.
#[derive(Debug, Clone)]
pub struct SpectrumAnalyzer {
    transform: Arc<WindowedFft>,
    /// `N/2` bins in `[0, 1]`.
    spectrum: Vec<f32>,
}

impl SpectrumAnalyzer {
    pub fn new(transform_size: usize) -> Result<Self> {
        Ok(Self::with_transform(WindowedFft::shared(transform_size)?))
    }

    /// Creates an analyzer on a transform shared with other detectors.
    pub fn with_transform(transform: Arc<WindowedFft>) -> Self {
        let spectrum = vec![0.0; transform.len() / 2];
        Self {
            transform,
            spectrum,
        }
    }

    pub fn transform_size(&self) -> usize {
        self.transform.len()
    }

    /// The spectrum cached by the last [`analyze`](Self::analyze) call.
    pub fn spectrum(&self) -> &[f32] {
        &self.spectrum
    }

    /// Computes the spectrum of `samples`.
    ///
    /// Each bin's amplitude `|X| * 2 / N` is converted to dBFS and mapped so
    /// that `floor_db` lands on 0 and `ceiling_db` on 1, clamped to that range.
    pub fn analyze(&mut self, samples: &[f32], floor_db: f32, ceiling_db: f32) -> &[f32] {
        let n = self.transform.len() as f32;
        let range = ceiling_db - floor_db;
        let x = self.transform.transform(samples);

        for (out, magnitude) in self.spectrum.iter_mut().zip(spectrum_to_magnitudes(&x)) {
            let level = dbfs(magnitude * 2.0 / n);
            *out = if range > 0.0 {
                ((level - floor_db) / range).clamp(0.0, 1.0)
            } else {
                0.0
            };
        }
        &self.spectrum
    }
}

/// Settings of a [`SpectrumPeakDetector`], stored inside the tracker config.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PeakConfig {
    pub peak_threshold: f32,
    pub neighbourhood: usize,
    pub smoothing: f32,
    /// Harmonic product depth (2 to 5); absent for plain peak picking.
    pub harmonic_depth: Option<usize>,
}

impl Default for PeakConfig {
    fn default() -> Self {
        Self {
            peak_threshold: 0.4,
            neighbourhood: 3,
            smoothing: 0.5,
            harmonic_depth: None,
        }
    }
}

/// Pitch detector picking the strongest peak of a normalised spectrum.
#[derive(Debug, Clone)]
pub struct SpectrumPeakDetector {
    /// Peaks at or below this normalised magnitude are ignored.
    peak_threshold: f32,
    /// Bins on each side a peak must dominate.
    neighbourhood: usize,
    /// Harmonic product depth, `None` for plain peak picking.
    harmonic_depth: Option<usize>,
    /// Weight of the previous pitch in the smoothed value, in `[0, 1)`.
    smoothing: f32,
    raw_pitch: f32,
    smoothed_pitch: f32,
    confidence: f32,
    peak_magnitude: f32,
    hps: Vec<f32>,
}

impl Default for SpectrumPeakDetector {
    fn default() -> Self {
        Self {
            peak_threshold: 0.4,
            neighbourhood: 3,
            harmonic_depth: None,
            smoothing: 0.5,
            raw_pitch: 0.0,
            smoothed_pitch: 0.0,
            confidence: 0.0,
            peak_magnitude: 0.0,
            hps: Vec::new(),
        }
    }
}

impl SpectrumPeakDetector {
    pub fn new(peak_threshold: f32, neighbourhood: usize, smoothing: f32) -> Result<Self> {
        if !(0.0..=1.0).contains(&peak_threshold) {
            return Err(PitchError::InvalidConfig(format!(
                "peak threshold {peak_threshold} outside [0, 1]"
            )));
        }
        if !(0.0..1.0).contains(&smoothing) {
            return Err(PitchError::InvalidConfig(format!(
                "smoothing {smoothing} outside [0, 1)"
            )));
        }
        Ok(Self {
            peak_threshold,
            neighbourhood: neighbourhood.max(1),
            smoothing,
            ..Self::default()
        })
    }

    /// Builds a detector from stored settings.
    ///
    /// # Errors
    /// * `PitchError::InvalidConfig` - if a setting is out of range
    pub fn from_config(config: &PeakConfig) -> Result<Self> {
        let detector = Self::new(config.peak_threshold, config.neighbourhood, config.smoothing)?;
        match config.harmonic_depth {
            Some(depth) => detector.with_harmonic_product(depth),
            None => Ok(detector),
        }
    }

    /// Enables the harmonic product spectrum with `depth` downsampled copies.
    ///
    /// # Errors
    /// * `PitchError::InvalidConfig` - if `depth` is outside 2..=5
    pub fn with_harmonic_product(mut self, depth: usize) -> Result<Self> {
        if !(2..=5).contains(&depth) {
            return Err(PitchError::InvalidConfig(format!(
                "harmonic product depth {depth} outside 2..=5"
            )));
        }
        self.harmonic_depth = Some(depth);
        Ok(self)
    }

    /// Smoothed pitch in Hz, 0 before the first detection.
    pub fn pitch(&self) -> f32 {
        self.smoothed_pitch
    }

    pub fn raw_pitch(&self) -> f32 {
        self.raw_pitch
    }

    pub fn confidence(&self) -> f32 {
        self.confidence
    }

    /// Height of the last peak found, whether or not it passed the threshold.
    pub fn peak_magnitude(&self) -> f32 {
        self.peak_magnitude
    }

    /// Finds the pitch in an `N/2`-bin spectrum from [`SpectrumAnalyzer`].
    ///
    /// # Arguments
    /// * `spectrum` - Normalised bins in `[0, 1]`
    /// * `sample_rate` - Sample rate the spectrum was taken at in Hz
    /// * `min_frequency` / `max_frequency` - Search bounds in Hz
    ///
    /// Returns the raw estimate, or `PitchEstimate::NONE` when no peak clears
    /// the threshold. The smoothed pitch is left untouched in that case.
    pub fn detect(
        &mut self,
        spectrum: &[f32],
        sample_rate: f32,
        min_frequency: f32,
        max_frequency: f32,
    ) -> Result<PitchEstimate> {
        check_frequency_range(min_frequency, max_frequency)?;
        if spectrum.len() < 2 {
            return Ok(PitchEstimate::NONE);
        }
        let bin_resolution = sample_rate / (spectrum.len() * 2) as f32;
        let min_bin = ((min_frequency / bin_resolution).floor() as usize).max(1);
        let max_bin =
            ((max_frequency / bin_resolution).ceil() as usize).min(spectrum.len() - 1);

        let (frequency, peak) = match self.harmonic_depth {
            Some(depth) => self.find_harmonic_peak(spectrum, depth, min_bin, max_bin),
            None => self.find_peak(spectrum, min_bin, max_bin),
        };
        let frequency = frequency * bin_resolution;
        self.peak_magnitude = peak;

        if peak <= self.peak_threshold || frequency <= 0.0 {
            trace!(peak, "no spectral peak above threshold");
            self.confidence = 0.0;
            return Ok(PitchEstimate::NONE);
        }
        Ok(self.accept(frequency, peak))
    }

    /// Highest local maximum in `[min_bin, max_bin]`, as (refined bin, height).
    fn find_peak(&self, spectrum: &[f32], min_bin: usize, max_bin: usize) -> (f32, f32) {
        let is_peak = |i: usize| {
            let magnitude = spectrum[i];
            (1..=self.neighbourhood).all(|j| {
                let below = i.checked_sub(j).is_none_or(|k| spectrum[k] <= magnitude);
                let above = spectrum.get(i + j).is_none_or(|&v| v <= magnitude);
                below && above
            })
        };

        let mut best: Option<(usize, f32)> = None;
        for i in min_bin..=max_bin {
            if is_peak(i) && best.is_none_or(|(_, value)| spectrum[i] > value) {
                best = Some((i, spectrum[i]));
            }
        }
        match best {
            Some((bin, value)) if value > 0.0 => (refine_bin(spectrum, bin), value),
            _ => (0.0, 0.0),
        }
    }

    /// Peak of the harmonic product spectrum, height normalised by its
    /// `depth`-th root.
    fn find_harmonic_peak(
        &mut self,
        spectrum: &[f32],
        depth: usize,
        min_bin: usize,
        max_bin: usize,
    ) -> (f32, f32) {
        self.hps.clear();
        self.hps.extend_from_slice(spectrum);
        for h in 2..=depth {
            for i in min_bin..=max_bin / h {
                if let Some(&harmonic) = spectrum.get(i * h) {
                    self.hps[i] *= harmonic;
                }
            }
        }

        let best = (min_bin..=max_bin / depth)
            .filter(|&i| self.hps[i] > 0.0)
            .max_by(|&a, &b| self.hps[a].total_cmp(&self.hps[b]));
        match best {
            Some(bin) => (
                refine_bin(&self.hps, bin),
                self.hps[bin].powf(1.0 / depth as f32),
            ),
            None => (0.0, 0.0),
        }
    }

    fn accept(&mut self, frequency: f32, peak: f32) -> PitchEstimate {
        self.raw_pitch = frequency;
        self.confidence = peak.clamp(0.0, 1.0);

        let ratio = if self.smoothed_pitch > 0.0 {
            frequency / self.smoothed_pitch
        } else {
            0.0
        };
        // Small moves are smoothed, anything else jumps.
        self.smoothed_pitch = if ratio > 0.8 && ratio < 1.2 {
            self.smoothed_pitch + (frequency - self.smoothed_pitch) * (1.0 - self.smoothing)
        } else {
            frequency
        };

        PitchEstimate {
            frequency,
            confidence: self.confidence,
        }
    }

    pub fn reset(&mut self) {
        self.raw_pitch = 0.0;
        self.smoothed_pitch = 0.0;
        self.confidence = 0.0;
        self.peak_magnitude = 0.0;
    }
}

/// Sub-bin position of a peak. Refinement is skipped for empty peaks.
fn refine_bin(values: &[f32], bin: usize) -> f32 {
    if values[bin] <= 0.0 {
        return bin as f32;
    }
    parabolic_interpolation(values, bin)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_support::sine;

    const SAMPLE_RATE: f32 = 48000.0;

    fn spectrum_of(signal: &[f32]) -> Vec<f32> {
        let mut analyzer = SpectrumAnalyzer::new(signal.len()).unwrap();
        analyzer.analyze(signal, -80.0, 0.0).to_vec()
    }

    #[test]
    fn test_dbfs() {
        assert_eq!(dbfs(0.0), SILENCE_DB);
        assert_eq!(dbfs(-1.0), SILENCE_DB);
        assert!(dbfs(1.0).abs() < 1e-6);
        assert!((dbfs(0.1) + 20.0).abs() < 1e-4);
        assert_eq!(dbfs(1e-30), SILENCE_DB);
    }

    #[test]
    fn test_silence_maps_to_zero() {
        let spectrum = spectrum_of(&vec![0.0; 1024]);
        assert_eq!(spectrum.len(), 512);
        assert!(spectrum.iter().all(|&v| v == 0.0));
    }

    #[test]
    fn test_sine_peak_lands_in_its_bin() {
        // 48000 / 1024 = 46.875 Hz per bin, so 1500 Hz is exactly bin 32.
        let spectrum = spectrum_of(&sine(1500.0, SAMPLE_RATE, 1024, 1.0));
        let peak = (0..spectrum.len())
            .max_by(|&a, &b| spectrum[a].total_cmp(&spectrum[b]))
            .unwrap();
        assert_eq!(peak, 32);
        // A full-scale sine under a Hann window reads about -6 dBFS.
        let expected = (-6.0 + 80.0) / 80.0;
        assert!((spectrum[32] - expected).abs() < 0.02, "got {}", spectrum[32]);
        assert!(spectrum.iter().all(|&v| (0.0..=1.0).contains(&v)));
    }

    #[test]
    fn test_peak_detector_finds_sine() {
        let spectrum = spectrum_of(&sine(440.0, SAMPLE_RATE, 4096, 0.5));
        let mut detector = SpectrumPeakDetector::default();
        let estimate = detector.detect(&spectrum, SAMPLE_RATE, 80.0, 600.0).unwrap();
        assert!(
            (estimate.frequency - 440.0).abs() / 440.0 < 0.015,
            "got {} Hz",
            estimate.frequency
        );
        assert!(estimate.confidence > 0.4);
        assert_eq!(detector.pitch(), estimate.frequency);
    }

    #[test]
    fn test_harmonic_product_prefers_fundamental() {
        let n = 4096;
        let signal: Vec<f32> = sine(220.0, SAMPLE_RATE, n, 0.5)
            .iter()
            .zip(sine(440.0, SAMPLE_RATE, n, 0.4))
            .zip(sine(660.0, SAMPLE_RATE, n, 0.3))
            .map(|((a, b), c)| a + b + c)
            .collect();
        let spectrum = spectrum_of(&signal);
        let mut detector = SpectrumPeakDetector::default()
            .with_harmonic_product(3)
            .unwrap();
        let estimate = detector.detect(&spectrum, SAMPLE_RATE, 80.0, 1000.0).unwrap();
        assert!(
            (estimate.frequency - 220.0).abs() / 220.0 < 0.02,
            "got {} Hz",
            estimate.frequency
        );
    }

    #[test]
    fn test_silence_gives_no_peak() {
        let spectrum = spectrum_of(&vec![0.0; 4096]);
        let mut detector = SpectrumPeakDetector::default();
        let estimate = detector.detect(&spectrum, SAMPLE_RATE, 80.0, 600.0).unwrap();
        assert_eq!(estimate, PitchEstimate::NONE);
        assert_eq!(detector.confidence(), 0.0);
        assert_eq!(detector.pitch(), 0.0);
    }

    #[test]
    fn test_smoothing_is_ratio_gated() {
        let mut detector = SpectrumPeakDetector::new(0.4, 3, 0.5).unwrap();
        detector.accept(200.0, 0.9);
        assert_eq!(detector.pitch(), 200.0);
        // Within 20 %: halfway toward the new value.
        detector.accept(220.0, 0.9);
        assert!((detector.pitch() - 210.0).abs() < 1e-4);
        // An octave up jumps straight there.
        detector.accept(420.0, 0.9);
        assert_eq!(detector.pitch(), 420.0);
        assert_eq!(detector.raw_pitch(), 420.0);
        detector.reset();
        assert_eq!(detector.pitch(), 0.0);
    }

    #[test]
    fn test_from_config() {
        let config = PeakConfig {
            harmonic_depth: Some(3),
            ..Default::default()
        };
        let detector = SpectrumPeakDetector::from_config(&config).unwrap();
        assert_eq!(detector.harmonic_depth, Some(3));
        assert_eq!(detector.neighbourhood, 3);

        let bad = PeakConfig {
            harmonic_depth: Some(9),
            ..Default::default()
        };
        assert!(SpectrumPeakDetector::from_config(&bad).is_err());
    }

    #[test]
    fn test_shared_transform_matches_own() {
        let signal = sine(700.0, SAMPLE_RATE, 1024, 0.3);
        let shared = WindowedFft::shared(1024).unwrap();
        let mut analyzer = SpectrumAnalyzer::with_transform(shared);
        assert_eq!(analyzer.analyze(&signal, -80.0, 0.0), spectrum_of(&signal).as_slice());
    }

    #[test]
    fn test_rejects_bad_settings() {
        assert!(SpectrumPeakDetector::new(1.5, 3, 0.5).is_err());
        assert!(SpectrumPeakDetector::new(0.4, 3, 1.0).is_err());
        assert!(SpectrumPeakDetector::default().with_harmonic_product(6).is_err());
        assert!(SpectrumPeakDetector::default().with_harmonic_product(1).is_err());
    }
}
