//! # Musical Tuning Module
//!
//! Note names, MIDI numbers and cent deviations in twelve-tone equal
//! temperament with A4 = 440 Hz.
//!
//! ## Features
//! - Frequency to note conversion, both floor-based (note plus upward cents,
//!   as shown on a calibration readout) and nearest-note
//! - Cent deviation calculations
//! - Transposition by semitones

use std::fmt;

/// Reference frequency for A4.
pub const A4_FREQUENCY: f32 = 440.0;

/// MIDI number of A4.
pub const A4_MIDI: i32 = 69;

const NOTE_NAMES: [&str; 12] = [
    "C", "C#", "D", "D#", "E", "F", "F#", "G", "G#", "A", "A#", "B",
];

fn octave_of(midi: i32) -> i32 {
    midi.div_euclid(12) - 1
}

/// A note with its deviation in cents.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct Note {
    /// MIDI note number (69 = A4)
    pub midi: i32,
    /// Deviation from the note in cents
    pub cents: i32,
}

impl Note {
    /// The exact note `midi`, zero cents.
    pub fn from_midi(midi: i32) -> Self {
        Self { midi, cents: 0 }
    }

    /// The note at or below `frequency`, with the remainder as upward cents
    /// in `[0, 100]`. Non-positive frequencies give the empty note.
    pub fn from_frequency(frequency: f32) -> Self {
        if frequency <= 0.0 {
            return Self::default();
        }
        let midi = midi_from_frequency(frequency);
        let cents = ((fractional_midi(frequency) - midi as f32) * 100.0).round() as i32;
        Self { midi, cents }
    }

    /// The nearest note to `frequency`, cents in `[-50, 50]`.
    pub fn nearest(frequency: f32) -> Self {
        if frequency <= 0.0 {
            return Self::default();
        }
        let midi_float = fractional_midi(frequency);
        let midi = midi_float.round() as i32;
        let cents = ((midi_float - midi as f32) * 100.0).round() as i32;
        Self { midi, cents }
    }

    /// Pitch class name without octave, e.g. "C#".
    pub fn name(&self) -> &'static str {
        NOTE_NAMES[self.midi.rem_euclid(12) as usize]
    }

    pub fn octave(&self) -> i32 {
        octave_of(self.midi)
    }

    /// Equal-tempered frequency of the note itself.
    pub fn frequency(&self) -> f32 {
        frequency_from_midi(self.midi as f32)
    }
}

impl fmt::Display for Note {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}{}", self.name(), self.octave())?;
        if self.cents > 0 {
            write!(f, "+{}", self.cents)?;
        } else if self.cents < 0 {
            write!(f, "{}", self.cents)?;
        }
        Ok(())
    }
}

/// Fractional MIDI number of `frequency`.
pub fn fractional_midi(frequency: f32) -> f32 {
    A4_MIDI as f32 + 12.0 * (frequency / A4_FREQUENCY).log2()
}

/// MIDI number of the note at or below `frequency`, 0 for non-positive input.
pub fn midi_from_frequency(frequency: f32) -> i32 {
    if frequency <= 0.0 {
        return 0;
    }
    fractional_midi(frequency).floor() as i32
}

/// Equal-tempered frequency of a (possibly fractional) MIDI number.
pub fn frequency_from_midi(midi: f32) -> f32 {
    A4_FREQUENCY * 2f32.powf((midi - A4_MIDI as f32) / 12.0)
}

/// Calculates the deviation from a target frequency in cents.
///
/// Positive values are sharp, negative values flat; 100 cents make a
/// semitone.
///
/// # Arguments
/// * `freq` - Measured frequency in Hz
/// * `target_freq` - Reference frequency in Hz
///
/// # Returns
/// * Signed deviation in cents
pub fn calculate_cents_deviation(freq: f32, target_freq: f32) -> f32 {
    1200.0 * (freq / target_freq).log2()
}

/// Transposes `frequency` by a number of semitones.
///
/// # Arguments
/// * `frequency` - Frequency in Hz
/// * `semitones` - Signed offset, 12 per octave
///
/// # Returns
/// * `frequency * 2^(semitones / 12)`
pub fn transpose(frequency: f32, semitones: i32) -> f32 {
    frequency * 2f32.powf(semitones as f32 / 12.0)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_a4_is_440() {
        let note = Note::from_frequency(440.0);
        assert_eq!(note.midi, 69);
        assert_eq!(note.cents, 0);
        assert_eq!(note.to_string(), "A4");
        assert!((note.frequency() - 440.0).abs() < 1e-3);
    }

    #[test]
    fn test_from_frequency_reports_upward_cents() {
        // 20 cents above A4.
        let freq = 440.0 * 2f32.powf(0.2 / 12.0);
        let note = Note::from_frequency(freq);
        assert_eq!(note.midi, 69);
        assert_eq!(note.cents, 20);
        assert_eq!(note.to_string(), "A4+20");

        // 20 cents below A4 floors to G#4 +80.
        let freq = 440.0 * 2f32.powf(-0.2 / 12.0);
        let note = Note::from_frequency(freq);
        assert_eq!(note.midi, 68);
        assert_eq!(note.cents, 80);
        assert_eq!(note.name(), "G#");
    }

    #[test]
    fn test_nearest_reports_signed_cents() {
        let freq = 440.0 * 2f32.powf(-0.2 / 12.0);
        let note = Note::nearest(freq);
        assert_eq!(note.midi, 69);
        assert_eq!(note.cents, -20);
        assert_eq!(note.to_string(), "A4-20");
    }

    #[test]
    fn test_non_positive_frequency() {
        assert_eq!(Note::from_frequency(0.0), Note::default());
        assert_eq!(Note::nearest(-3.0), Note::default());
        assert_eq!(midi_from_frequency(0.0), 0);
    }

    #[test]
    fn test_middle_c() {
        let note = Note::from_midi(60);
        assert_eq!(note.to_string(), "C4");
        assert!((note.frequency() - 261.6256).abs() < 1e-2);
        assert_eq!(midi_from_frequency(262.0), 60);
    }

    #[test]
    fn test_cents_deviation() {
        assert!((calculate_cents_deviation(880.0, 440.0) - 1200.0).abs() < 1e-3);
        assert!((calculate_cents_deviation(440.0, 440.0)).abs() < 1e-6);
    }

    #[test]
    fn test_transpose() {
        assert!((transpose(440.0, 12) - 880.0).abs() < 1e-3);
        assert!((transpose(440.0, -12) - 220.0).abs() < 1e-3);
        assert_eq!(transpose(440.0, 0), 440.0);
    }
}
