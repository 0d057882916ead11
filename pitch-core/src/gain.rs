//! # Auto Gain Module
//!
//! Follows the recent peak level of the input so the display spectrum keeps
//! its dynamic range pinned just under the loudest recent signal.

use crate::spectrum::SILENCE_DB;

/// How fast the head level sinks back toward the floor (dB per second).
const DECAY_DB_PER_SECOND: f32 = 0.6;

/// Share of the dynamic range kept free above the input level.
const HEADROOM: f32 = 0.05;

/// Recent-maximum level tracker.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct AutoGain {
    /// Nominal level (dBFS) mapped to the top of the display spectrum.
    head: f32,
}

impl Default for AutoGain {
    fn default() -> Self {
        Self { head: SILENCE_DB }
    }
}

impl AutoGain {
    pub fn new() -> Self {
        Self::default()
    }

    /// Advances the head by one frame.
    ///
    /// # Arguments
    /// * `input_db` - Current input level in dBFS
    /// * `dynamic_range` - Span of the display spectrum in dB
    /// * `elapsed` - Seconds since the previous update
    ///
    /// # Returns
    /// * The gain to apply, `-head`
    pub fn update(&mut self, input_db: f32, dynamic_range: f32, elapsed: f32) -> f32 {
        let floor = SILENCE_DB + dynamic_range;
        self.head = (self.head - DECAY_DB_PER_SECOND * elapsed).max(floor);

        let pulled = input_db - dynamic_range * HEADROOM;
        self.head = pulled.max(self.head).min(0.0);
        self.gain()
    }

    /// Gain in dB, positive for quiet input.
    pub fn gain(&self) -> f32 {
        -self.head
    }

    pub fn head(&self) -> f32 {
        self.head
    }

    pub fn reset(&mut self) {
        self.head = SILENCE_DB;
    }
}
