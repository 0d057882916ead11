//! # Pitch Tracker Module
//!
//! One input channel's worth of engine: the sample window, the detectors,
//! the display spectrum and the stabilizer, driven once per host frame.
//!
//! ## Per update
//! 1. Auto gain follows the window level when enabled
//! 2. Display spectrum between `-gain - dynamic_range` and `-gain` dBFS
//! 3. Detection with the configured detector
//! 4. Stabilisation into a [`PitchFrame`]

use std::sync::Arc;
use tracing::debug;

use crate::config::{DetectorKind, TrackerConfig, spectrum_range};
use crate::error::{PitchError, Result, check_frequency_range};
use crate::fft::WindowedFft;
use crate::gain::AutoGain;
use crate::ring_buffer::RingBuffer;
use crate::spectrum::{SILENCE_DB, SpectrumAnalyzer, SpectrumPeakDetector};
use crate::stabilizer::PitchStabilizer;
use crate::swipe::SwipeDetector;
use crate::tuning::{Note, transpose};
use crate::weighting::CalibrationCurve;
use crate::yin::YinDetector;
use crate::yin_fft::YinFftDetector;
use crate::{PitchEstimate, PitchFrame};

/// Buffers that live from construction until [`PitchTracker::dispose`].
#[derive(Debug)]
struct Engines {
    window: RingBuffer,
    spectrum: SpectrumAnalyzer,
    yin_fft: YinFftDetector,
    yin: YinDetector,
    peak: SpectrumPeakDetector,
    swipe: SwipeDetector,
}

/// Real-time pitch tracker for a single channel.
#[derive(Debug)]
pub struct PitchTracker {
    config: TrackerConfig,
    sample_rate: f32,
    engines: Option<Engines>,
    stabilizer: PitchStabilizer,
    auto_gain: AutoGain,
    /// Samples pushed since the last update.
    pending: usize,
}

impl PitchTracker {
    /// Creates a tracker with default settings for a given transform size.
    ///
    /// # Errors
    /// * `PitchError::InvalidTransformSize` - if `transform_size` is not a
    ///   power of two of at least 4
    pub fn new(transform_size: usize, sample_rate: f32) -> Result<Self> {
        if transform_size < 4 || !transform_size.is_power_of_two() {
            return Err(PitchError::InvalidTransformSize(transform_size));
        }
        let config = TrackerConfig {
            resolution: transform_size / 2,
            ..TrackerConfig::default()
        };
        Self::with_config(config, sample_rate)
    }

    pub fn with_config(config: TrackerConfig, sample_rate: f32) -> Result<Self> {
        Self::with_calibration(config, sample_rate, &CalibrationCurve::default())
    }

    /// Creates a tracker whose YIN-FFT detector weights spectra with `curve`.
    pub fn with_calibration(
        config: TrackerConfig,
        sample_rate: f32,
        curve: &CalibrationCurve,
    ) -> Result<Self> {
        config.validate()?;
        curve.validate()?;
        if !(sample_rate.is_finite() && sample_rate > 0.0) {
            return Err(PitchError::InvalidConfig(format!(
                "sample rate must be positive, got {sample_rate}"
            )));
        }

        let n = config.transform_size();
        // The display spectrum and YIN-FFT transform the same window.
        let transform = WindowedFft::shared(n)?;
        let engines = Engines {
            window: RingBuffer::new(n),
            spectrum: SpectrumAnalyzer::with_transform(Arc::clone(&transform)),
            yin_fft: YinFftDetector::with_transform(transform, sample_rate, curve),
            yin: YinDetector::new(n)?,
            peak: SpectrumPeakDetector::from_config(&config.peak)?,
            swipe: SwipeDetector::new(&config.swipe, config.min_frequency, config.max_frequency)?,
        };
        debug!(
            transform_size = n,
            sample_rate,
            detector = ?config.detector,
            "pitch tracker created"
        );

        Ok(Self {
            stabilizer: PitchStabilizer::new(config.smoothing, config.snap_strength),
            config,
            sample_rate,
            engines: Some(engines),
            auto_gain: AutoGain::new(),
            pending: 0,
        })
    }

    pub fn config(&self) -> &TrackerConfig {
        &self.config
    }

    pub fn sample_rate(&self) -> f32 {
        self.sample_rate
    }

    pub fn transform_size(&self) -> usize {
        self.config.transform_size()
    }

    pub fn is_disposed(&self) -> bool {
        self.engines.is_none()
    }

    /// Appends a block of samples to the analysis window.
    pub fn push(&mut self, samples: &[f32]) {
        if let Some(engines) = &mut self.engines {
            engines.window.push(samples);
            self.pending += samples.len();
        }
    }

    /// The current analysis window, oldest sample first. Empty once disposed.
    pub fn samples(&self) -> &[f32] {
        self.engines
            .as_ref()
            .map_or(&[][..], |engines| engines.window.samples())
    }

    /// Recomputes the display spectrum between two dBFS bounds.
    pub fn analyze_spectrum(&mut self, noise_floor_db: f32, noise_ceiling_db: f32) {
        if let Some(engines) = &mut self.engines {
            engines
                .spectrum
                .analyze(engines.window.samples(), noise_floor_db, noise_ceiling_db);
        }
    }

    /// The display spectrum from the last
    /// [`analyze_spectrum`](Self::analyze_spectrum), `N/2` bins in `[0, 1]`.
    pub fn spectrum(&self) -> &[f32] {
        self.engines
            .as_ref()
            .map_or(&[][..], |engines| engines.spectrum.spectrum())
    }

    /// YIN-FFT estimate of the window.
    ///
    /// # Arguments
    /// * `min_frequency` - Lowest pitch searched in Hz
    /// * `max_frequency` - Highest pitch searched in Hz
    ///
    /// # Returns
    /// * `(pitch Hz, confidence)`, `(0, 0)` when there is none
    ///
    /// # Errors
    /// * `PitchError::InvalidFrequencyRange` - if the bounds are not positive
    ///   and ordered
    pub fn detect_pitch_yin_fft(
        &mut self,
        min_frequency: f32,
        max_frequency: f32,
    ) -> Result<(f32, f32)> {
        let estimate = self.estimate_yin_fft(min_frequency, max_frequency)?;
        Ok((estimate.frequency, estimate.confidence))
    }

    /// Time-domain YIN pitch of the window.
    ///
    /// # Arguments
    /// * `sample_rate` - Sample rate of the pushed samples in Hz
    /// * `min_frequency` - Lowest pitch searched in Hz
    /// * `max_frequency` - Highest pitch searched in Hz
    /// * `threshold` - CMNDF value a dip must fall below to be taken first
    ///
    /// # Returns
    /// * Pitch in Hz, 0 when there is none
    pub fn detect_pitch_yin_time_domain(
        &mut self,
        sample_rate: f32,
        min_frequency: f32,
        max_frequency: f32,
        threshold: f32,
    ) -> Result<f32> {
        let estimate =
            self.estimate_yin(sample_rate, min_frequency, max_frequency, threshold)?;
        Ok(estimate.frequency)
    }

    fn estimate_yin_fft(
        &mut self,
        min_frequency: f32,
        max_frequency: f32,
    ) -> Result<PitchEstimate> {
        check_frequency_range(min_frequency, max_frequency)?;
        match &mut self.engines {
            Some(engines) => {
                engines
                    .yin_fft
                    .detect(engines.window.samples(), min_frequency, max_frequency)
            }
            None => Ok(PitchEstimate::NONE),
        }
    }

    fn estimate_yin(
        &mut self,
        sample_rate: f32,
        min_frequency: f32,
        max_frequency: f32,
        threshold: f32,
    ) -> Result<PitchEstimate> {
        check_frequency_range(min_frequency, max_frequency)?;
        match &mut self.engines {
            Some(engines) => {
                engines.yin.analyze(engines.window.samples());
                engines
                    .yin
                    .detect(sample_rate, min_frequency, max_frequency, threshold)
            }
            None => Ok(PitchEstimate::NONE),
        }
    }

    /// Peak or SWIPE estimate from the cached display spectrum.
    fn estimate_spectral(
        &mut self,
        min_frequency: f32,
        max_frequency: f32,
    ) -> Result<PitchEstimate> {
        let Some(engines) = &mut self.engines else {
            return Ok(PitchEstimate::NONE);
        };
        let spectrum = engines.spectrum.spectrum();
        if self.config.detector == DetectorKind::Swipe {
            return Ok(engines.swipe.detect(spectrum, self.sample_rate));
        }
        engines
            .peak
            .detect(spectrum, self.sample_rate, min_frequency, max_frequency)
    }

    /// Runs one frame: gain, display spectrum, detection with the
    /// configured detector, then stabilisation.
    pub fn update(&mut self) -> Result<PitchFrame> {
        if self.config.auto_gain && !self.is_disposed() {
            let elapsed = self.pending as f32 / self.sample_rate;
            self.auto_gain
                .update(self.level(), self.config.dynamic_range, elapsed);
        }
        self.pending = 0;

        let (floor, ceiling) = spectrum_range(self.current_gain(), self.config.dynamic_range);
        self.analyze_spectrum(floor, ceiling);

        let (min, max) = (self.config.min_frequency, self.config.max_frequency);
        let estimate = match self.config.detector {
            DetectorKind::YinFft => self.estimate_yin_fft(min, max)?,
            DetectorKind::YinTimeDomain => {
                self.estimate_yin(self.sample_rate, min, max, self.config.yin_threshold)?
            }
            DetectorKind::SpectrumPeak | DetectorKind::Swipe => {
                self.estimate_spectral(min, max)?
            }
        };
        self.stabilizer.update(estimate, self.config.threshold);
        Ok(self.frame())
    }

    /// Snapshot of the current pitch state.
    pub fn frame(&self) -> PitchFrame {
        let offset_pitch = self.offset_display_pitch();
        let note = (offset_pitch > 0.0).then(|| Note::nearest(offset_pitch));
        PitchFrame {
            raw_pitch: self.raw_pitch(),
            confidence: self.confidence(),
            display_pitch: self.display_pitch(),
            offset_pitch,
            note: note.map(|n| format!("{}{}", n.name(), n.octave())),
            cents: note.map_or(0, |n| n.cents),
        }
    }

    pub fn raw_pitch(&self) -> f32 {
        self.stabilizer.raw_pitch()
    }

    pub fn display_pitch(&self) -> f32 {
        self.stabilizer.display_pitch()
    }

    /// Display pitch transposed by the configured semitone offset.
    pub fn offset_display_pitch(&self) -> f32 {
        transpose(self.display_pitch(), self.config.pitch_offset_semitones)
    }

    pub fn confidence(&self) -> f32 {
        self.stabilizer.confidence()
    }

    /// RMS level of the analysis window in dBFS.
    pub fn level(&self) -> f32 {
        self.engines
            .as_ref()
            .map_or(SILENCE_DB, |engines| engines.window.level_dbfs())
    }

    /// Input gain in dB: the auto gain when enabled, else the configured one.
    pub fn current_gain(&self) -> f32 {
        if self.config.auto_gain {
            self.auto_gain.gain()
        } else {
            self.config.gain
        }
    }

    /// Level after the current input gain.
    pub fn gained_level(&self) -> f32 {
        self.level() + self.current_gain()
    }

    /// Clears the window and the pitch state, as after an input change.
    pub fn reset(&mut self) {
        if let Some(engines) = &mut self.engines {
            engines.window.clear();
            engines.peak.reset();
        }
        self.stabilizer.reset();
        self.auto_gain.reset();
        self.pending = 0;
    }

    /// Releases the window and detector buffers. Calling it again is a no-op.
    pub fn dispose(&mut self) {
        if self.engines.take().is_some() {
            debug!("pitch tracker disposed");
        }
        self.stabilizer.reset();
        self.auto_gain.reset();
        self.pending = 0;
    }
}
