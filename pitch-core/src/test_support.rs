//! Synthetic signals shared by the unit tests.

use std::f32::consts::PI;

/// `len` samples of a sine at `frequency` Hz.
pub fn sine(frequency: f32, sample_rate: f32, len: usize, amplitude: f32) -> Vec<f32> {
    (0..len)
        .map(|i| amplitude * (2.0 * PI * frequency * i as f32 / sample_rate).sin())
        .collect()
}

/// Deterministic pseudo-random samples in [-1, 1).
pub fn noise(len: usize, seed: u64) -> Vec<f32> {
    let mut state = seed.wrapping_mul(6364136223846793005).wrapping_add(1442695040888963407);
    (0..len)
        .map(|_| {
            state = state
                .wrapping_mul(6364136223846793005)
                .wrapping_add(1442695040888963407);
            ((state >> 40) as f32 / (1u64 << 24) as f32) * 2.0 - 1.0
        })
        .collect()
}

/// Sum of the first `partials` harmonics of `frequency`, the k-th at
/// `amplitude / k`.
pub fn harmonic_tone(
    frequency: f32,
    sample_rate: f32,
    len: usize,
    partials: usize,
    amplitude: f32,
) -> Vec<f32> {
    let mut out = vec![0.0; len];
    for k in 1..=partials {
        let partial = sine(frequency * k as f32, sample_rate, len, amplitude / k as f32);
        for (o, p) in out.iter_mut().zip(partial) {
            *o += p;
        }
    }
    out
}
