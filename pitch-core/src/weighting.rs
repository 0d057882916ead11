//! # Spectral Weighting Module
//!
//! Per-bin loudness weighting applied to power spectra before the YIN-FFT
//! autocorrelation. The curve is calibration data, not behaviour: it comes in
//! as `(frequency, dB)` points and is turned into one linear multiplier per
//! bin when a detector is built.

use serde::{Deserialize, Serialize};
use std::path::Path;

use crate::error::{PitchError, Result};

/// Frequencies (Hz) of the default YIN-FFT weighting curve.
const DEFAULT_FREQUENCIES: [f32; 34] = [
    0.0, 20.0, 25.0, 31.5, 40.0, 50.0, 63.0, 80.0, 100.0, 125.0, 160.0, 200.0, 250.0, 315.0,
    400.0, 500.0, 630.0, 800.0, 1000.0, 1250.0, 1600.0, 2000.0, 2500.0, 3150.0, 4000.0, 5000.0,
    6300.0, 8000.0, 9000.0, 10000.0, 12500.0, 15000.0, 20000.0, 25100.0,
];

/// Weights (dB) of the default YIN-FFT curve, one per frequency above.
const DEFAULT_WEIGHTS_DB: [f32; 34] = [
    -75.8, -70.1, -60.8, -52.1, -44.2, -37.5, -31.3, -25.6, -20.9, -16.5, -12.6, -9.6, -7.0, -4.7,
    -3.0, -1.8, -0.8, -0.2, -0.0, 0.5, 1.6, 3.2, 5.4, 7.8, 8.1, 5.3, -2.4, -11.1, -12.8, -12.2,
    -7.4, -17.8, -17.8, -17.8,
];

/// Two frequencies closer than this are treated as the same point.
const SAME_FREQUENCY_EPSILON: f32 = 1e-4;

/// A single calibration point.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct CalibrationPoint {
    /// Frequency in Hz
    pub frequency: f32,
    /// Weight in dB
    pub db: f32,
}

/// Piecewise-linear weighting curve in the dB domain.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CalibrationCurve {
    points: Vec<CalibrationPoint>,
}

impl Default for CalibrationCurve {
    /// The 34-point curve tuned for YIN-FFT pitch detection.
    fn default() -> Self {
        let points = DEFAULT_FREQUENCIES
            .iter()
            .zip(DEFAULT_WEIGHTS_DB.iter())
            .map(|(&frequency, &db)| CalibrationPoint { frequency, db })
            .collect();
        Self { points }
    }
}

impl CalibrationCurve {
    /// Builds a curve from `(frequency, dB)` pairs.
    ///
    /// # Errors
    /// * `PitchError::InvalidCalibration` - if there are fewer than two points,
    ///   a value is not finite, a frequency is negative, or the frequencies
    ///   are not in ascending order
    pub fn new(points: &[(f32, f32)]) -> Result<Self> {
        let curve = Self {
            points: points
                .iter()
                .map(|&(frequency, db)| CalibrationPoint { frequency, db })
                .collect(),
        };
        curve.validate()?;
        Ok(curve)
    }

    /// Loads a curve from a JSON file and validates it.
    ///
    /// # Errors
    /// * `PitchError::Io` / `PitchError::Json` - if the file cannot be read
    ///   or parsed
    /// * `PitchError::InvalidCalibration` - if the points fail
    ///   [`validate`](Self::validate)
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let data = std::fs::read_to_string(path)?;
        let curve: CalibrationCurve = serde_json::from_str(&data)?;
        curve.validate()?;
        Ok(curve)
    }

    /// Writes the curve as pretty-printed JSON.
    pub fn save(&self, path: impl AsRef<Path>) -> Result<()> {
        let json_string = serde_json::to_string_pretty(self)?;
        std::fs::write(path, json_string)?;
        Ok(())
    }

    pub fn points(&self) -> &[CalibrationPoint] {
        &self.points
    }

    pub fn validate(&self) -> Result<()> {
        if self.points.len() < 2 {
            return Err(PitchError::InvalidCalibration(format!(
                "need at least 2 points, got {}",
                self.points.len()
            )));
        }
        if let Some(p) = self
            .points
            .iter()
            .find(|p| !p.frequency.is_finite() || !p.db.is_finite() || p.frequency < 0.0)
        {
            return Err(PitchError::InvalidCalibration(format!(
                "bad point ({} Hz, {} dB)",
                p.frequency, p.db
            )));
        }
        if self
            .points
            .windows(2)
            .any(|pair| pair[1].frequency < pair[0].frequency)
        {
            return Err(PitchError::InvalidCalibration(
                "frequencies must be ascending".to_string(),
            ));
        }
        Ok(())
    }

    /// Weight in dB at `frequency`, starting the bracket search at `*cursor`.
    ///
    /// Queries must come in ascending frequency order for the cursor to stay
    /// valid; the scan then touches each point once over a whole sweep.
    fn db_at(&self, frequency: f32, cursor: &mut usize) -> f32 {
        let points = &self.points;
        while *cursor < points.len() && frequency > points[*cursor].frequency {
            *cursor += 1;
        }
        if *cursor >= points.len() {
            return points[points.len() - 1].db;
        }
        let hi = points[(*cursor).max(1)];
        let lo = points[(*cursor).max(1) - 1];

        let span = hi.frequency - lo.frequency;
        if span.abs() < SAME_FREQUENCY_EPSILON {
            return lo.db;
        }
        lo.db + (hi.db - lo.db) / span * (frequency - lo.frequency)
    }
}

/// Linear per-bin multipliers for the first `N/2 + 1` bins of an `N`-point
/// transform.
#[derive(Debug, Clone)]
pub struct SpectralWeighting {
    weights: Vec<f32>,
}

impl SpectralWeighting {
    pub fn new(curve: &CalibrationCurve, transform_size: usize, sample_rate: f32) -> Self {
        let mut cursor = 1;
        let weights = (0..=transform_size / 2)
            .map(|bin| {
                let frequency = bin as f32 / transform_size as f32 * sample_rate;
                let db = curve.db_at(frequency, &mut cursor);
                // Applied to power, and halved again for loudness: dB / 40.
                10f32.powf(db / 40.0)
            })
            .collect();
        Self { weights }
    }

    pub fn weights(&self) -> &[f32] {
        &self.weights
    }

    /// Multiplies each squared magnitude by its bin weight in place.
    pub fn apply(&self, power: &mut [f32]) {
        for (p, w) in power.iter_mut().zip(&self.weights) {
            *p *= w;
        }
    }
}
