//! # SWIPE Pitch Detection Module
//!
//! Harmonic-sum pitch estimation over the normalised display spectrum: every
//! candidate fundamental on a log-spaced grid is scored by the spectrum
//! heights at its harmonics, and the best candidate wins.
//!
//! ## Features
//! - Log-spaced candidate grid between the frequency bounds
//! - Prime or sequential harmonic sets, weighted by `sqrt(1 / (h + 1))`
//! - Linear interpolation between bins for each harmonic's height
//! - Candidates scored in parallel with rayon
//! - Parabolic refinement of the winner in the log-frequency domain

use rayon::prelude::*;
use serde::{Deserialize, Serialize};
use tracing::trace;

use crate::PitchEstimate;
use crate::error::{PitchError, Result, check_frequency_range};
use crate::yin::parabolic_interpolation;

/// Harmonic numbers of the prime set: the fundamental, then the primes.
const PRIME_HARMONICS: [u32; 20] = [
    1, 2, 3, 5, 7, 11, 13, 17, 19, 23, 29, 31, 37, 41, 43, 47, 53, 59, 61, 67,
];

/// Settings of a [`SwipeDetector`], stored inside the tracker config.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SwipeConfig {
    /// Harmonics summed per candidate (5 to 30; at most 20 with primes).
    pub harmonic_count: usize,
    /// Candidates on the log-frequency grid (20 to 200).
    pub candidate_count: usize,
    /// Scores at or below this are reported as no pitch.
    pub strength_threshold: f32,
    /// Sum prime-numbered harmonics instead of every harmonic.
    pub prime_harmonics: bool,
}

impl Default for SwipeConfig {
    fn default() -> Self {
        Self {
            harmonic_count: 20,
            candidate_count: 100,
            strength_threshold: 0.15,
            prime_harmonics: true,
        }
    }
}

impl SwipeConfig {
    pub fn validate(&self) -> Result<()> {
        if !(5..=30).contains(&self.harmonic_count) {
            return Err(PitchError::InvalidConfig(format!(
                "harmonic_count must be within 5..=30, got {}",
                self.harmonic_count
            )));
        }
        if !(20..=200).contains(&self.candidate_count) {
            return Err(PitchError::InvalidConfig(format!(
                "candidate_count must be within 20..=200, got {}",
                self.candidate_count
            )));
        }
        if !(0.0..=1.0).contains(&self.strength_threshold) {
            return Err(PitchError::InvalidConfig(format!(
                "strength_threshold must be within [0, 1], got {}",
                self.strength_threshold
            )));
        }
        Ok(())
    }
}

/// SWIPE detector bound to one frequency range.
#[derive(Debug, Clone)]
pub struct SwipeDetector {
    strength_threshold: f32,
    log_min: f32,
    log_step: f32,
    candidates: Vec<f32>,
    harmonics: Vec<u32>,
    weights: Vec<f32>,
    /// Score of each candidate from the last frame.
    strengths: Vec<f32>,
}

impl SwipeDetector {
    /// Builds the candidate grid and harmonic tables.
    ///
    /// # Arguments
    /// * `config` - Grid size, harmonic set and strength threshold
    /// * `min_frequency` - Lowest candidate in Hz
    /// * `max_frequency` - Highest candidate in Hz
    ///
    /// # Errors
    /// * `PitchError::InvalidConfig` - if `config` fails validation
    /// * `PitchError::InvalidFrequencyRange` - if the bounds are not positive
    ///   and ordered
    pub fn new(config: &SwipeConfig, min_frequency: f32, max_frequency: f32) -> Result<Self> {
        config.validate()?;
        check_frequency_range(min_frequency, max_frequency)?;

        let count = config.candidate_count;
        let log_min = min_frequency.ln();
        let log_step = (max_frequency.ln() - log_min) / (count - 1) as f32;
        let candidates = (0..count)
            .map(|i| (log_min + i as f32 * log_step).exp())
            .collect();

        let harmonics: Vec<u32> = if config.prime_harmonics {
            PRIME_HARMONICS
                .iter()
                .copied()
                .take(config.harmonic_count)
                .collect()
        } else {
            (1..=config.harmonic_count as u32).collect()
        };
        let weights = (0..harmonics.len())
            .map(|h| (1.0 / (h + 1) as f32).sqrt())
            .collect();

        Ok(Self {
            strength_threshold: config.strength_threshold,
            log_min,
            log_step,
            candidates,
            harmonics,
            weights,
            strengths: vec![0.0; count],
        })
    }

    pub fn candidates(&self) -> &[f32] {
        &self.candidates
    }

    pub fn strengths(&self) -> &[f32] {
        &self.strengths
    }

    /// Estimates the pitch from an `N/2`-bin spectrum in `[0, 1]`.
    ///
    /// The confidence is the winning score. A lone partial spreads its
    /// height over every harmonic weight, so pure sines usually score below
    /// the default threshold; voiced sounds with several partials clear it.
    pub fn detect(&mut self, spectrum: &[f32], sample_rate: f32) -> PitchEstimate {
        if spectrum.len() < 2 {
            return PitchEstimate::NONE;
        }
        let bin_resolution = sample_rate / (spectrum.len() * 2) as f32;
        let harmonics = &self.harmonics;
        let weights = &self.weights;

        self.strengths
            .par_iter_mut()
            .zip(self.candidates.par_iter())
            .for_each(|(strength, &fundamental)| {
                *strength =
                    harmonic_strength(spectrum, fundamental, bin_resolution, harmonics, weights);
            });

        let Some(best) = (0..self.strengths.len())
            .max_by(|&a, &b| self.strengths[a].total_cmp(&self.strengths[b]))
        else {
            return PitchEstimate::NONE;
        };
        let strength = self.strengths[best];
        if strength <= self.strength_threshold {
            trace!(strength, "no candidate above strength threshold");
            return PitchEstimate::NONE;
        }

        let position = parabolic_interpolation(&self.strengths, best);
        PitchEstimate {
            frequency: (self.log_min + position * self.log_step).exp(),
            confidence: strength.clamp(0.0, 1.0),
        }
    }
}

/// Weighted mean of the spectrum heights at the harmonics of `fundamental`
/// that lie below the last bin.
fn harmonic_strength(
    spectrum: &[f32],
    fundamental: f32,
    bin_resolution: f32,
    harmonics: &[u32],
    weights: &[f32],
) -> f32 {
    let last = spectrum.len() - 1;
    let mut strength = 0.0;
    let mut total_weight = 0.0;
    for (&harmonic, &weight) in harmonics.iter().zip(weights) {
        let position = fundamental * harmonic as f32 / bin_resolution;
        if position >= last as f32 {
            break;
        }
        let low = position as usize;
        let high = (low + 1).min(last);
        let fraction = position - low as f32;
        let height = spectrum[low] + (spectrum[high] - spectrum[low]) * fraction;

        strength += height * weight;
        total_weight += weight;
    }
    if total_weight > 0.0 {
        strength / total_weight
    } else {
        0.0
    }
}
