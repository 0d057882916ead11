//! # YIN-FFT Pitch Detection Module
//!
//! Frequency-domain YIN: the autocorrelation is taken from a loudness-weighted
//! power spectrum instead of the raw waveform, which favours the partials a
//! listener hears as the pitch.
//!
//! ## Steps per frame
//! 1. Hann-windowed forward FFT of the sample window
//! 2. Weighted power spectrum mirrored into a symmetric real sequence
//! 3. Second forward FFT of that sequence, giving an autocorrelation
//! 4. YIN difference function with cumulative mean normalisation
//! 5. Best lag inside the window derived from the frequency bounds

use std::sync::Arc;
use tracing::trace;

use crate::PitchEstimate;
use crate::error::{Result, check_frequency_range};
use crate::fft::{Lanes, WindowedFft};
use crate::weighting::{CalibrationCurve, SpectralWeighting};

/// Detections below this confidence are dropped whatever the caller asks for.
const MIN_CONFIDENCE: f32 = 0.1;

/// Shortest lag ever considered.
const MIN_LAG: usize = 2;

/// YIN-FFT detector bound to one transform size and sample rate.
#[derive(Debug, Clone)]
pub struct YinFftDetector {
    transform: Arc<WindowedFft>,
    sample_rate: f32,
    weighting: SpectralWeighting,
    /// Normalised difference function, `N/2 + 1` lags.
    yin: Vec<f32>,
}

impl YinFftDetector {
    /// Creates a detector with the default weighting curve.
    pub fn new(transform_size: usize, sample_rate: f32) -> Result<Self> {
        Self::with_curve(transform_size, sample_rate, &CalibrationCurve::default())
    }

    /// Creates a detector weighting its spectra with `curve`.
    ///
    /// # Errors
    /// * `PitchError::InvalidTransformSize` - if `transform_size` is not a
    ///   power of two
    pub fn with_curve(
        transform_size: usize,
        sample_rate: f32,
        curve: &CalibrationCurve,
    ) -> Result<Self> {
        let transform = WindowedFft::shared(transform_size)?;
        Ok(Self::with_transform(transform, sample_rate, curve))
    }

    /// Creates a detector on a transform shared with the display spectrum.
    ///
    /// # Arguments
    /// * `transform` - Hann-windowed engine of the analysis window size
    /// * `sample_rate` - Sample rate of the input in Hz
    /// * `curve` - Loudness weighting applied to each power spectrum
    pub fn with_transform(
        transform: Arc<WindowedFft>,
        sample_rate: f32,
        curve: &CalibrationCurve,
    ) -> Self {
        let n = transform.len();
        Self {
            weighting: SpectralWeighting::new(curve, n, sample_rate),
            yin: vec![1.0; n / 2 + 1],
            transform,
            sample_rate,
        }
    }

    pub fn transform_size(&self) -> usize {
        self.transform.len()
    }

    pub fn sample_rate(&self) -> f32 {
        self.sample_rate
    }

    /// Normalised difference function of the last analysed frame.
    pub fn yin(&self) -> &[f32] {
        &self.yin
    }

    /// Lag search range `[min, max]` for a frequency window.
    pub fn lag_range(&self, min_frequency: f32, max_frequency: f32) -> (usize, usize) {
        let tau_min = ((self.sample_rate / max_frequency).floor() as usize).max(MIN_LAG);
        let tau_max =
            ((self.sample_rate / min_frequency).ceil() as usize).min(self.transform.len() / 2);
        (tau_min, tau_max)
    }

    /// Estimates the pitch of `samples` (the analysis window, oldest first).
    ///
    /// Returns `PitchEstimate::NONE` for silent frames or when no lag in the
    /// window is convincing.
    ///
    /// # Errors
    /// * `PitchError::InvalidFrequencyRange` - if the bounds are not positive
    ///   and ordered
    pub fn detect(
        &mut self,
        samples: &[f32],
        min_frequency: f32,
        max_frequency: f32,
    ) -> Result<PitchEstimate> {
        check_frequency_range(min_frequency, max_frequency)?;
        let n = self.transform.len();

        let spectrum = self.transform.transform(samples);

        // Weighted power, mirrored so the next transform sees a real,
        // symmetric sequence. Nyquist stays zero.
        let mut power = vec![0.0f32; n];
        for (bin, p) in power[..n / 2].iter_mut().enumerate() {
            *p = Lanes::bin(&spectrum, bin).norm_sqr();
        }
        self.weighting.apply(&mut power[..n / 2]);
        for bin in 1..n / 2 {
            power[n - bin] = power[bin];
        }
        let sum = 2.0 * power[..n / 2].iter().sum::<f32>();

        if sum == 0.0 {
            trace!("silent frame");
            return Ok(PitchEstimate::NONE);
        }

        let autocorrelation = self.transform.engine().forward(&power, None);
        self.build_difference(&autocorrelation, sum);

        let (tau_min, tau_max) = self.lag_range(min_frequency, max_frequency);
        let best = (tau_min..=tau_max)
            .filter(|&tau| tau < self.yin.len())
            .min_by(|&a, &b| self.yin[a].total_cmp(&self.yin[b]));

        let Some(tau) = best else {
            return Ok(PitchEstimate::NONE);
        };
        let value = self.yin[tau];
        if value >= 1.0 {
            return Ok(PitchEstimate::NONE);
        }

        let confidence = 1.0 - value;
        if confidence < MIN_CONFIDENCE {
            trace!(tau, confidence, "below confidence floor");
            return Ok(PitchEstimate::NONE);
        }

        Ok(PitchEstimate {
            frequency: self.sample_rate / tau as f32,
            confidence,
        })
    }

    /// `yin[tau] = sum - Re(r(tau))`, normalised by its running mean.
    fn build_difference(&mut self, autocorrelation: &[Lanes], sum: f32) {
        self.yin[0] = 1.0;
        let mut running = 0.0f32;
        for tau in 1..self.yin.len() {
            let value = sum - Lanes::bin(autocorrelation, tau).re;
            running += value;
            self.yin[tau] = if running > 0.0 {
                value * tau as f32 / running
            } else {
                value
            };
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::PitchError;
    use crate::test_support::{noise, sine};

    const SAMPLE_RATE: f32 = 48000.0;

    #[test]
    fn test_detects_220_hz_at_full_scale() {
        let mut detector = YinFftDetector::new(4096, SAMPLE_RATE).unwrap();
        let signal = sine(220.0, SAMPLE_RATE, 4096, 1.0);
        let estimate = detector.detect(&signal, 80.0, 600.0).unwrap();
        assert!(
            (218.0..=222.0).contains(&estimate.frequency),
            "got {} Hz",
            estimate.frequency
        );
        assert!(estimate.confidence > 0.5);
    }

    #[test]
    fn test_sweep_within_one_percent() {
        let mut detector = YinFftDetector::new(4096, SAMPLE_RATE).unwrap();
        for freq in (80..=600).step_by(7).map(|f| f as f32) {
            let signal = sine(freq, SAMPLE_RATE, 4096, 0.5);
            let estimate = detector.detect(&signal, 80.0, 600.0).unwrap();
            // The Hann taper biases integer lags short below ~10 periods
            // per window.
            let tolerance = if freq < 120.0 { 0.025 } else { 0.01 };
            assert!(
                (estimate.frequency - freq).abs() / freq < tolerance,
                "{freq} Hz detected as {} Hz",
                estimate.frequency
            );
            assert!(estimate.confidence > 0.8);
        }
    }

    #[test]
    fn test_silence_returns_none() {
        let mut detector = YinFftDetector::new(4096, SAMPLE_RATE).unwrap();
        let estimate = detector.detect(&vec![0.0; 4096], 80.0, 600.0).unwrap();
        assert_eq!(estimate, PitchEstimate::NONE);
    }

    #[test]
    fn test_yin_baseline_is_one() {
        let mut detector = YinFftDetector::new(1024, SAMPLE_RATE).unwrap();
        let _ = detector.detect(&noise(1024, 11), 80.0, 600.0).unwrap();
        assert_eq!(detector.yin()[0], 1.0);
        assert_eq!(detector.yin().len(), 513);
    }

    #[test]
    fn test_lag_range_from_bounds() {
        let detector = YinFftDetector::new(4096, SAMPLE_RATE).unwrap();
        assert_eq!(detector.lag_range(80.0, 600.0), (80, 600));
        // Clamped to MIN_LAG and N/2.
        assert_eq!(detector.lag_range(10.0, 48000.0), (2, 2048));
    }

    #[test]
    fn test_rejects_inverted_range() {
        let mut detector = YinFftDetector::new(1024, SAMPLE_RATE).unwrap();
        let result = detector.detect(&vec![0.0; 1024], 600.0, 80.0);
        assert!(matches!(
            result,
            Err(PitchError::InvalidFrequencyRange { .. })
        ));
    }

    #[test]
    fn test_rejects_non_power_of_two() {
        assert!(YinFftDetector::new(3000, SAMPLE_RATE).is_err());
    }

    #[test]
    fn test_shared_transform_gives_same_answer() {
        let signal = sine(262.0, SAMPLE_RATE, 2048, 0.6);
        let curve = CalibrationCurve::default();
        let shared = WindowedFft::shared(2048).unwrap();
        let mut own = YinFftDetector::with_curve(2048, SAMPLE_RATE, &curve).unwrap();
        let mut borrowed = YinFftDetector::with_transform(shared.clone(), SAMPLE_RATE, &curve);
        assert_eq!(
            own.detect(&signal, 80.0, 600.0).unwrap(),
            borrowed.detect(&signal, 80.0, 600.0).unwrap()
        );
        assert_eq!(std::sync::Arc::strong_count(&shared), 2);
    }

    #[test]
    fn test_custom_curve_still_tracks() {
        let curve = CalibrationCurve::new(&[(0.0, 0.0), (24000.0, 0.0)]).unwrap();
        let mut detector = YinFftDetector::with_curve(4096, SAMPLE_RATE, &curve).unwrap();
        let signal = sine(330.0, SAMPLE_RATE, 4096, 0.8);
        let estimate = detector.detect(&signal, 80.0, 600.0).unwrap();
        assert!((estimate.frequency - 330.0).abs() / 330.0 < 0.01);
    }
}
