//! # Pitch Stabilizer Module
//!
//! Turns noisy per-frame estimates into a display pitch that is steady enough
//! to drive gameplay.
//!
//! ## Per frame
//! 1. Confidence gate: weak frames silence the raw pitch but leave the display
//!    pitch where it was
//! 2. Octave correction against the previous raw pitch
//! 3. Exponential smoothing, skipped for upward jumps of a whole tone or more
//! 4. Soft snapping toward the nearest equal-tempered note

use tracing::trace;

use crate::PitchEstimate;
use crate::tuning::{Note, calculate_cents_deviation};

/// Raw-pitch ratios inside this band are read as an octave too high.
const OCTAVE_HIGH: (f32, f32) = (1.8, 2.2);

/// Raw-pitch ratios inside this band are read as an octave too low.
const OCTAVE_LOW: (f32, f32) = (0.45, 0.55);

/// Ratio of a whole tone (two semitones, rounded up).
const WHOLE_TONE_RATIO: f32 = 1.122;

/// Snapping only engages within this many cents of a note.
const SNAP_WINDOW_CENTS: f32 = 35.0;

/// Whether the stabilizer currently follows a pitch.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum TrackingState {
    #[default]
    Silent,
    Tracking,
}

/// Smoothing and octave-correction layer over a pitch detector.
#[derive(Debug, Clone)]
pub struct PitchStabilizer {
    /// Weight of the previous display pitch, in `[0, 1)`.
    smoothing: f32,
    /// How hard the display pitch is pulled onto a nearby note, in `[0, 1]`.
    snap_strength: f32,
    raw_pitch: f32,
    display_pitch: f32,
    confidence: f32,
    state: TrackingState,
}

impl PitchStabilizer {
    pub fn new(smoothing: f32, snap_strength: f32) -> Self {
        Self {
            smoothing,
            snap_strength,
            raw_pitch: 0.0,
            display_pitch: 0.0,
            confidence: 0.0,
            state: TrackingState::Silent,
        }
    }

    pub fn raw_pitch(&self) -> f32 {
        self.raw_pitch
    }

    pub fn display_pitch(&self) -> f32 {
        self.display_pitch
    }

    /// Confidence of the last estimate fed in, accepted or not.
    pub fn confidence(&self) -> f32 {
        self.confidence
    }

    pub fn state(&self) -> TrackingState {
        self.state
    }

    /// Feeds one frame's estimate.
    ///
    /// # Arguments
    /// * `estimate` - The detector's answer for this frame
    /// * `threshold` - Confidence below which the frame counts as silent
    ///
    /// # Returns
    /// * The new display pitch in Hz
    pub fn update(&mut self, estimate: PitchEstimate, threshold: f32) -> f32 {
        self.confidence = estimate.confidence;

        if estimate.confidence < threshold || estimate.frequency <= 0.0 {
            // The display pitch holds through silence.
            self.raw_pitch = 0.0;
            self.state = TrackingState::Silent;
            return self.display_pitch;
        }

        if self.raw_pitch == 0.0 {
            self.raw_pitch = estimate.frequency;
            self.state = TrackingState::Tracking;
            return self.display_pitch;
        }

        let mut pitch = estimate.frequency;
        let ratio = pitch / self.raw_pitch;
        if ratio > OCTAVE_HIGH.0 && ratio < OCTAVE_HIGH.1 {
            pitch /= 2.0;
        } else if ratio > OCTAVE_LOW.0 && ratio < OCTAVE_LOW.1 {
            pitch *= 2.0;
        }

        let ratio = pitch / self.raw_pitch;
        self.raw_pitch = pitch;
        self.display_pitch = if ratio > WHOLE_TONE_RATIO {
            pitch
        } else {
            self.display_pitch * self.smoothing + pitch * (1.0 - self.smoothing)
        };

        self.snap();
        trace!(
            raw = self.raw_pitch,
            display = self.display_pitch,
            "stabilized"
        );
        self.display_pitch
    }

    /// Pulls the display pitch toward the nearest note, harder the closer it
    /// already is.
    fn snap(&mut self) {
        if self.display_pitch <= 0.0 {
            return;
        }
        let target = Note::nearest(self.display_pitch).frequency();
        let cents = calculate_cents_deviation(self.display_pitch, target).abs();
        if cents >= SNAP_WINDOW_CENTS {
            return;
        }
        let amount = (1.0 - cents / SNAP_WINDOW_CENTS) * self.snap_strength;
        self.display_pitch += (target - self.display_pitch) * amount;
    }

    /// Forgets all pitch state, as after an input change.
    pub fn reset(&mut self) {
        self.raw_pitch = 0.0;
        self.display_pitch = 0.0;
        self.confidence = 0.0;
        self.state = TrackingState::Silent;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn frame(frequency: f32) -> PitchEstimate {
        PitchEstimate {
            frequency,
            confidence: 0.95,
        }
    }

    #[test]
    fn test_first_frame_only_seeds_raw_pitch() {
        let mut stabilizer = PitchStabilizer::new(0.8, 0.5);
        let display = stabilizer.update(frame(220.0), 0.9);
        assert_eq!(display, 0.0);
        assert_eq!(stabilizer.raw_pitch(), 220.0);
        assert_eq!(stabilizer.state(), TrackingState::Tracking);
    }

    #[test]
    fn test_alternating_octaves_settle_on_fundamental() {
        let mut stabilizer = PitchStabilizer::new(0.8, 0.5);
        stabilizer.update(frame(220.0), 0.9);
        for i in 0..80 {
            let f = if i % 2 == 0 { 440.0 } else { 220.0 };
            stabilizer.update(frame(f), 0.9);
            assert!((stabilizer.raw_pitch() - 220.0).abs() < 1e-3);
        }
        let display = stabilizer.display_pitch();
        let semitone = 2f32.powf(1.0 / 12.0);
        assert!(
            display > 220.0 / semitone && display < 220.0 * semitone,
            "display {display} Hz"
        );
    }

    #[test]
    fn test_low_octave_is_doubled() {
        let mut stabilizer = PitchStabilizer::new(0.8, 0.0);
        stabilizer.update(frame(300.0), 0.5);
        stabilizer.update(frame(150.0), 0.5);
        assert_eq!(stabilizer.raw_pitch(), 300.0);
    }

    #[test]
    fn test_low_confidence_is_sticky() {
        let mut stabilizer = PitchStabilizer::new(0.0, 0.0);
        stabilizer.update(frame(200.0), 0.9);
        stabilizer.update(frame(200.0), 0.9);
        assert_eq!(stabilizer.display_pitch(), 200.0);

        let weak = PitchEstimate {
            frequency: 500.0,
            confidence: 0.3,
        };
        assert_eq!(stabilizer.update(weak, 0.9), 200.0);
        assert_eq!(stabilizer.raw_pitch(), 0.0);
        assert_eq!(stabilizer.confidence(), 0.3);
        assert_eq!(stabilizer.state(), TrackingState::Silent);
    }

    #[test]
    fn test_upward_jump_skips_smoothing() {
        let mut stabilizer = PitchStabilizer::new(0.8, 0.0);
        stabilizer.update(frame(220.0), 0.9);
        stabilizer.update(frame(220.0), 0.9);
        stabilizer.update(frame(330.0), 0.9);
        assert_eq!(stabilizer.display_pitch(), 330.0);
    }

    #[test]
    fn test_small_moves_are_smoothed() {
        let mut stabilizer = PitchStabilizer::new(0.5, 0.0);
        stabilizer.update(frame(200.0), 0.9);
        stabilizer.update(frame(200.0), 0.9);
        assert_eq!(stabilizer.display_pitch(), 100.0);
        stabilizer.update(frame(200.0), 0.9);
        assert_eq!(stabilizer.display_pitch(), 150.0);
    }

    #[test]
    fn test_snap_pulls_toward_note() {
        let mut stabilizer = PitchStabilizer::new(0.0, 1.0);
        stabilizer.update(frame(330.0), 0.9);
        stabilizer.update(frame(330.0), 0.9);
        // E4 is 329.63 Hz, 2 cents away.
        let e4 = Note::from_midi(64).frequency();
        let display = stabilizer.display_pitch();
        assert!((display - e4).abs() < (330.0 - e4).abs());
        assert!(display >= e4);
    }

    #[test]
    fn test_snap_ignores_pitch_outside_window() {
        let mut stabilizer = PitchStabilizer::new(0.0, 1.0);
        // 40 cents above A4.
        let pitch = 440.0 * 2f32.powf(0.4 / 12.0);
        stabilizer.update(frame(pitch), 0.9);
        stabilizer.update(frame(pitch), 0.9);
        assert_eq!(stabilizer.display_pitch(), pitch);
    }

    #[test]
    fn test_reset_clears_state() {
        let mut stabilizer = PitchStabilizer::new(0.0, 0.0);
        stabilizer.update(frame(200.0), 0.9);
        stabilizer.update(frame(200.0), 0.9);
        stabilizer.reset();
        assert_eq!(stabilizer.display_pitch(), 0.0);
        assert_eq!(stabilizer.raw_pitch(), 0.0);
        assert_eq!(stabilizer.state(), TrackingState::Silent);
    }
}
