//! # Time-Domain YIN Module
//!
//! Classic YIN on the waveform, with the autocorrelation computed through the
//! FFT (Wiener-Khinchin) rather than the O(N^2) lag loop.
//!
//! ## Features
//! - Zero padding to 2N so the autocorrelation does not wrap around
//! - Cumulative mean normalised difference function (CMNDF)
//! - First-dip search favouring the lowest valid frequency, with a global
//!   minimum fallback
//! - Parabolic interpolation for sub-sample lag accuracy

use num_complex::Complex;
use rayon::prelude::*;
use tracing::trace;

use crate::PitchEstimate;
use crate::error::{PitchError, Result, check_frequency_range};
use crate::fft::{FftEngine, Lanes};

/// Default CMNDF threshold for the first-dip search.
pub const DEFAULT_THRESHOLD: f32 = 0.1;

/// The fallback global minimum is only trusted below this value.
const GLOBAL_MINIMUM_CEILING: f32 = 0.8;

/// A frame whose first lags all sit at or below this CMNDF carries no
/// periodicity worth reporting.
const SILENCE_CMNDF: f32 = 0.01;

/// Number of lags inspected by the silence check.
const SILENCE_CHECK_LAGS: usize = 20;

/// Mean differences below this are treated as a flat (silent) curve.
const MIN_MEAN_DIFFERENCE: f32 = 1e-6;

/// Denominators below this disable parabolic refinement.
const PARABOLA_EPSILON: f32 = 1e-6;

/// Time-domain YIN detector over an `N`-sample window.
#[derive(Debug, Clone)]
pub struct YinDetector {
    /// Transform of size 2N for the zero-padded window.
    engine: FftEngine,
    window_len: usize,
    autocorrelation: Vec<f32>,
    difference: Vec<f32>,
    cmndf: Vec<f32>,
}

impl YinDetector {
    /// Creates a detector for windows of `window_len` samples.
    ///
    /// # Errors
    /// * `PitchError::InvalidTransformSize` - if `window_len` is not a power of
    ///   two of at least 4
    pub fn new(window_len: usize) -> Result<Self> {
        if window_len < 4 || !window_len.is_power_of_two() {
            return Err(PitchError::InvalidTransformSize(window_len));
        }
        let engine = FftEngine::new(window_len * 2)?;
        let mut cmndf = vec![0.0; window_len / 2];
        cmndf[0] = 1.0;
        Ok(Self {
            engine,
            window_len,
            autocorrelation: vec![0.0; window_len],
            difference: vec![0.0; window_len / 2],
            cmndf,
        })
    }

    pub fn window_len(&self) -> usize {
        self.window_len
    }

    /// Biased autocorrelation `r(tau) = sum x[i] x[i + tau]` of the last frame.
    pub fn autocorrelation(&self) -> &[f32] {
        &self.autocorrelation
    }

    /// Difference function `d(tau) = 2 (r(0) - r(tau))`; `d(0)` is 0.
    pub fn difference(&self) -> &[f32] {
        &self.difference
    }

    /// Cumulative mean normalised difference; `cmndf[0]` is always 1.
    pub fn cmndf(&self) -> &[f32] {
        &self.cmndf
    }

    /// Recomputes autocorrelation, difference and CMNDF for `samples`.
    pub fn analyze(&mut self, samples: &[f32]) {
        let window = &samples[..samples.len().min(self.window_len)];

        let mut x = vec![Lanes::default(); self.engine.packed_len()];
        self.engine.first_pass(window, None, &mut x);
        self.engine.forward_passes(&mut x);

        // |X(f)|^2 with zero phase: its inverse is the autocorrelation.
        x.par_iter_mut().for_each(|lanes| {
            let [p1, p2] = lanes.norm_sqr();
            *lanes = Lanes::new(Complex::new(p1, 0.0), Complex::new(p2, 0.0));
        });

        // The inverse already carries the 1/(2N) normalisation.
        let r = self.engine.inverse(x);
        self.autocorrelation
            .par_iter_mut()
            .zip(r.par_iter())
            .for_each(|(out, value)| *out = value.re);

        self.compute_yin_functions();
    }

    fn compute_yin_functions(&mut self) {
        let r0 = self.autocorrelation[0];
        let autocorrelation = &self.autocorrelation;
        self.difference
            .par_iter_mut()
            .enumerate()
            .for_each(|(tau, d)| *d = 2.0 * (r0 - autocorrelation[tau]));
        self.difference[0] = 0.0;

        self.cmndf[0] = 1.0;
        let mut running = 0.0f32;
        for tau in 1..self.cmndf.len() {
            running += self.difference[tau];
            let mean = running / tau as f32;
            self.cmndf[tau] = if mean > MIN_MEAN_DIFFERENCE {
                self.difference[tau] / mean
            } else {
                1.0
            };
        }
    }

    /// Lag search range `[min, max)` for a frequency window.
    pub fn lag_range(
        &self,
        sample_rate: f32,
        min_frequency: f32,
        max_frequency: f32,
    ) -> (usize, usize) {
        let min_lag = ((sample_rate / max_frequency) as usize).max(1);
        let max_lag = ((sample_rate / min_frequency) as usize).min(self.cmndf.len() - 1);
        (min_lag, max_lag)
    }

    /// Pitch in Hz of the last analysed frame, 0 when there is none.
    pub fn detect_pitch(
        &self,
        sample_rate: f32,
        min_frequency: f32,
        max_frequency: f32,
        threshold: f32,
    ) -> Result<f32> {
        Ok(self
            .detect(sample_rate, min_frequency, max_frequency, threshold)?
            .frequency)
    }

    /// Like [`detect_pitch`](Self::detect_pitch), with `1 - CMNDF` at the
    /// chosen lag as the confidence.
    ///
    /// # Errors
    /// * `PitchError::InvalidFrequencyRange` - if the bounds are not positive
    ///   and ordered
    pub fn detect(
        &self,
        sample_rate: f32,
        min_frequency: f32,
        max_frequency: f32,
        threshold: f32,
    ) -> Result<PitchEstimate> {
        check_frequency_range(min_frequency, max_frequency)?;
        let (min_lag, max_lag) = self.lag_range(sample_rate, min_frequency, max_frequency);
        if min_lag >= max_lag {
            return Ok(PitchEstimate::NONE);
        }
        let cmndf = &self.cmndf;

        let silence_end = (min_lag + SILENCE_CHECK_LAGS).min(max_lag);
        if cmndf[min_lag..silence_end].iter().all(|&v| v <= SILENCE_CMNDF) {
            trace!(min_lag, "flat CMNDF, treating frame as silent");
            return Ok(PitchEstimate::NONE);
        }

        let estimate = |lag: usize| {
            let refined = parabolic_interpolation(cmndf, lag);
            PitchEstimate {
                frequency: sample_rate / refined,
                confidence: (1.0 - cmndf[lag]).clamp(0.0, 1.0),
            }
        };

        // First dip below the threshold, followed down to its bottom.
        if let Some(mut lag) = (min_lag..max_lag).find(|&lag| cmndf[lag] < threshold) {
            while lag + 1 < max_lag && cmndf[lag + 1] < cmndf[lag] {
                lag += 1;
            }
            return Ok(estimate(lag));
        }

        // Otherwise the deepest point, if it is deep enough.
        let best = (min_lag..max_lag)
            .min_by(|&a, &b| cmndf[a].total_cmp(&cmndf[b]))
            .unwrap_or(min_lag);
        if cmndf[best] < GLOBAL_MINIMUM_CEILING {
            return Ok(estimate(best));
        }

        trace!(best, value = cmndf[best], "no convincing lag");
        Ok(PitchEstimate::NONE)
    }
}

/// Sub-sample position of the extremum around `index` from a parabola
/// through its two neighbours.
///
/// Returns `index` unchanged at the array edges or when the three points are
/// (nearly) collinear.
pub fn parabolic_interpolation(values: &[f32], index: usize) -> f32 {
    if index == 0 || index + 1 >= values.len() {
        return index as f32;
    }
    let y1 = values[index - 1];
    let y2 = values[index];
    let y3 = values[index + 1];

    let a = (y1 - 2.0 * y2 + y3) / 2.0;
    let b = (y3 - y1) / 2.0;
    if a.abs() < PARABOLA_EPSILON {
        return index as f32;
    }
    index as f32 - b / (2.0 * a)
}
