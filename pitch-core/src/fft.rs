//! # Fast Fourier Transform (FFT) Module
//!
//! Radix-2 decimation-in-time FFT over a fixed power-of-two size, tuned for
//! being called every audio tick with the same size.
//!
//! ## Features
//! - Bit-reversal permutation and twiddle factors precomputed once
//! - Two complex lanes packed per element, so each butterfly entry moves two
//!   samples at a time
//! - Windowing and zero padding folded into the first pass
//! - Exact inverse (conjugated twiddles, passes in reverse order)
//! - Every pass runs data-parallel over its index range with rayon
//!
//! Passes are strictly ordered: pass `k + 1` reads the whole output of pass `k`.

use std::f64::consts::PI;
use std::ops::{Add, Mul, Sub};
use std::sync::Arc;

use num_complex::Complex;
use rayon::prelude::*;
use tracing::debug;

use crate::error::{PitchError, Result};

/// Below this size the passes run serially; thread hand-off costs more than
/// the butterflies themselves.
const PARALLEL_MIN_SIZE: usize = 1024;

/// Two adjacent complex samples `(2i, 2i + 1)` stored in one element.
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct Lanes(pub [Complex<f32>; 2]);

impl Lanes {
    pub fn new(a: Complex<f32>, b: Complex<f32>) -> Self {
        Self([a, b])
    }

    /// Reads complex bin `k` out of a packed buffer.
    pub fn bin(x: &[Lanes], k: usize) -> Complex<f32> {
        x[k / 2].0[k % 2]
    }

    /// Squared magnitude of both lanes.
    pub fn norm_sqr(self) -> [f32; 2] {
        [self.0[0].norm_sqr(), self.0[1].norm_sqr()]
    }

    pub fn conj(self) -> Self {
        Self([self.0[0].conj(), self.0[1].conj()])
    }

    pub fn scale(self, factor: f32) -> Self {
        Self([self.0[0] * factor, self.0[1] * factor])
    }
}

impl Add for Lanes {
    type Output = Lanes;

    fn add(self, rhs: Lanes) -> Lanes {
        Lanes([self.0[0] + rhs.0[0], self.0[1] + rhs.0[1]])
    }
}

impl Sub for Lanes {
    type Output = Lanes;

    fn sub(self, rhs: Lanes) -> Lanes {
        Lanes([self.0[0] - rhs.0[0], self.0[1] - rhs.0[1]])
    }
}

/// Lane-wise complex multiply.
impl Mul for Lanes {
    type Output = Lanes;

    fn mul(self, rhs: Lanes) -> Lanes {
        Lanes([self.0[0] * rhs.0[0], self.0[1] * rhs.0[1]])
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Direction {
    Forward,
    Inverse,
}

/// One butterfly entry: the two target elements and the cosines of the two
/// lane angles. The sine is rebuilt from the cosine, halving table storage.
#[derive(Debug, Clone, Copy)]
struct Twiddle {
    pair: (usize, usize),
    cos: [f32; 2],
}

impl Twiddle {
    fn factor(&self, direction: Direction) -> Lanes {
        // Angles lie in (-pi, 0], so the forward sine is never positive.
        let forward = Lanes([
            Complex::new(self.cos[0], -sine_from_cos(self.cos[0])),
            Complex::new(self.cos[1], -sine_from_cos(self.cos[1])),
        ]);
        match direction {
            Direction::Forward => forward,
            Direction::Inverse => forward.conj(),
        }
    }
}

fn sine_from_cos(c: f32) -> f32 {
    (1.0 - c * c).max(0.0).sqrt()
}

fn bit_reverse(x: usize, bits: u32) -> usize {
    x.reverse_bits() >> (usize::BITS - bits)
}

/// Precomputed radix-2 transform of a fixed size.
///
/// The tables are immutable after construction, so one engine can serve any
/// number of analysis calls.
#[derive(Debug, Clone)]
pub struct FftEngine {
    n: usize,
    log_n: u32,
    permutation: Vec<(usize, usize)>,
    twiddles: Vec<Twiddle>,
}

impl FftEngine {
    /// Builds the permutation and twiddle tables for an `n`-point transform.
    ///
    /// # Errors
    /// * `PitchError::InvalidTransformSize` - if `n` is not a power of two or
    ///   smaller than 4
    pub fn new(n: usize) -> Result<Self> {
        if n < 4 || !n.is_power_of_two() {
            return Err(PitchError::InvalidTransformSize(n));
        }
        let log_n = n.trailing_zeros();

        let permutation = (0..n)
            .step_by(2)
            .map(|i| (bit_reverse(i, log_n), bit_reverse(i + 1, log_n)))
            .collect();

        let mut twiddles = Vec::with_capacity((log_n as usize - 1) * (n / 4));
        let mut m = 4;
        while m <= n {
            let alpha = -2.0 * PI / m as f64;
            for k in (0..n).step_by(m) {
                for j in (0..m / 2).step_by(2) {
                    twiddles.push(Twiddle {
                        pair: ((k + j) / 2, (k + j + m / 2) / 2),
                        cos: [
                            (alpha * j as f64).cos() as f32,
                            (alpha * (j + 1) as f64).cos() as f32,
                        ],
                    });
                }
            }
            m <<= 1;
        }

        debug!(size = n, passes = log_n, "built FFT tables");

        Ok(Self {
            n,
            log_n,
            permutation,
            twiddles,
        })
    }

    /// Transform size in complex samples.
    pub fn len(&self) -> usize {
        self.n
    }

    /// Number of packed elements a frequency-domain buffer needs.
    pub fn packed_len(&self) -> usize {
        self.n / 2
    }

    fn parallel(&self) -> bool {
        self.n >= PARALLEL_MIN_SIZE
    }

    /// Bit-reversal permutation, windowing and the size-2 butterflies in one go.
    ///
    /// Samples past the end of `input` read as zero, which zero pads the
    /// transform. `window` of `None` is a flat window.
    pub fn first_pass(&self, input: &[f32], window: Option<&[f32]>, x: &mut [Lanes]) {
        debug_assert_eq!(x.len(), self.packed_len());
        if let Some(w) = window {
            debug_assert!(w.len() >= input.len().min(self.n));
        }

        let gather = |index: usize| -> f32 {
            match input.get(index) {
                Some(&sample) => window.map_or(sample, |w| sample * w[index]),
                None => 0.0,
            }
        };
        let slot = |out: &mut Lanes, &(i1, i2): &(usize, usize)| {
            let a1 = gather(i1);
            let a2 = gather(i2);
            *out = Lanes::new(Complex::new(a1 + a2, 0.0), Complex::new(a1 - a2, 0.0));
        };

        if self.parallel() {
            x.par_iter_mut()
                .zip(self.permutation.par_iter())
                .for_each(|(out, pair)| slot(out, pair));
        } else {
            x.iter_mut()
                .zip(self.permutation.iter())
                .for_each(|(out, pair)| slot(out, pair));
        }
    }

    /// Runs the remaining `log2(N) - 1` forward passes in place.
    pub fn forward_passes(&self, x: &mut [Lanes]) {
        for pass in 0..self.log_n as usize - 1 {
            self.butterfly_pass(pass, x, Direction::Forward);
        }
    }

    /// Undoes [`forward_passes`](Self::forward_passes), largest group first.
    pub fn inverse_passes(&self, x: &mut [Lanes]) {
        for pass in (0..self.log_n as usize - 1).rev() {
            self.butterfly_pass(pass, x, Direction::Inverse);
        }
    }

    /// Full forward transform of a real sequence into a fresh packed buffer.
    ///
    /// # Arguments
    /// * `input` - Real samples; missing samples up to `N` read as zero
    /// * `window` - Optional per-sample window, at least `input.len()` long
    ///
    /// # Returns
    /// * `N/2` packed elements holding bins `0..N` in natural order
    pub fn forward(&self, input: &[f32], window: Option<&[f32]>) -> Vec<Lanes> {
        let mut x = vec![Lanes::default(); self.packed_len()];
        self.first_pass(input, window, &mut x);
        self.forward_passes(&mut x);
        x
    }

    /// Full inverse transform back to `N` complex samples in natural order.
    ///
    /// `inverse(forward(x, None))` reproduces `x` up to rounding.
    pub fn inverse(&self, mut x: Vec<Lanes>) -> Vec<Complex<f32>> {
        self.inverse_passes(&mut x);

        let mut out = vec![Complex::new(0.0, 0.0); self.n];
        for (lanes, &(i1, i2)) in x.iter().zip(&self.permutation) {
            let [sum, difference] = lanes.0;
            out[i1] = (sum + difference) * 0.5;
            out[i2] = (sum - difference) * 0.5;
        }
        out
    }

    fn butterfly_pass(&self, pass: usize, x: &mut [Lanes], direction: Direction) {
        let quarter = self.n / 4;
        let table = &self.twiddles[pass * quarter..(pass + 1) * quarter];

        if !self.parallel() {
            for t in table {
                let (i1, i2) = t.pair;
                let (a, b) = butterfly(x[i1], x[i2], t.factor(direction), direction);
                x[i1] = a;
                x[i2] = b;
            }
            return;
        }

        // A group of size m spans m/2 elements; its upper half starts m/4
        // elements in, and the group owns exactly m/4 table entries.
        let half = 1usize << pass;
        x.par_chunks_mut(2 * half)
            .zip(table.par_chunks(half))
            .for_each(|(group, entries)| {
                let (lo, hi) = group.split_at_mut(half);
                lo.par_iter_mut()
                    .zip(hi.par_iter_mut())
                    .zip(entries.par_iter())
                    .for_each(|((e, o), t)| {
                        let (a, b) = butterfly(*e, *o, t.factor(direction), direction);
                        *e = a;
                        *o = b;
                    });
            });
    }
}

#[inline]
fn butterfly(e: Lanes, o: Lanes, w: Lanes, direction: Direction) -> (Lanes, Lanes) {
    match direction {
        Direction::Forward => {
            let o = w * o;
            (e + o, e - o)
        }
        Direction::Inverse => ((e + o).scale(0.5), (w * (e - o)).scale(0.5)),
    }
}

/// An engine paired with its Hann window.
///
/// Wrapped in an [`Arc`] it lets every analysis of the same sample window
/// share one set of tables.
#[derive(Debug, Clone)]
pub struct WindowedFft {
    engine: FftEngine,
    window: Vec<f32>,
}

impl WindowedFft {
    /// # Errors
    /// * `PitchError::InvalidTransformSize` - as for [`FftEngine::new`]
    pub fn new(n: usize) -> Result<Self> {
        Ok(Self {
            engine: FftEngine::new(n)?,
            window: hann_window(n),
        })
    }

    /// A fresh transform ready to be shared.
    pub fn shared(n: usize) -> Result<Arc<Self>> {
        Self::new(n).map(Arc::new)
    }

    pub fn engine(&self) -> &FftEngine {
        &self.engine
    }

    pub fn window(&self) -> &[f32] {
        &self.window
    }

    pub fn len(&self) -> usize {
        self.engine.len()
    }

    /// Hann-windowed forward transform of `samples`.
    pub fn transform(&self, samples: &[f32]) -> Vec<Lanes> {
        self.engine.forward(samples, Some(&self.window))
    }
}

/// Hann window of length `n`, zero at both ends.
///
/// # Arguments
/// * `n` - Window length in samples
///
/// # Returns
/// * `w[i] = (1 - cos(2 pi i / (n - 1))) / 2`, or all ones below length 2
pub fn hann_window(n: usize) -> Vec<f32> {
    if n < 2 {
        return vec![1.0; n];
    }
    let n_minus_1 = (n - 1) as f64;
    (0..n)
        .map(|i| ((1.0 - (2.0 * PI * i as f64 / n_minus_1).cos()) / 2.0) as f32)
        .collect()
}

/// Magnitudes of the first `N/2` bins of a packed spectrum.
pub fn spectrum_to_magnitudes(x: &[Lanes]) -> Vec<f32> {
    x.iter()
        .flat_map(|lanes| [lanes.0[0].norm(), lanes.0[1].norm()])
        .take(x.len())
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_support::noise;
    use rustfft::FftPlanner;

    fn reference_spectrum(input: &[f32]) -> Vec<Complex<f32>> {
        let mut planner = FftPlanner::new();
        let fft = planner.plan_fft_forward(input.len());
        let mut buffer: Vec<rustfft::num_complex::Complex<f32>> = input
            .iter()
            .map(|&s| rustfft::num_complex::Complex::new(s, 0.0))
            .collect();
        fft.process(&mut buffer);
        buffer.iter().map(|c| Complex::new(c.re, c.im)).collect()
    }

    fn assert_matches_reference(n: usize) {
        let input = noise(n, 7);
        let engine = FftEngine::new(n).unwrap();
        let spectrum = engine.forward(&input, None);
        let expected = reference_spectrum(&input);

        let scale = expected.iter().map(|c| c.norm()).fold(1.0f32, f32::max);
        for (k, want) in expected.iter().enumerate() {
            let got = Lanes::bin(&spectrum, k);
            assert!(
                (got - *want).norm() / scale < 1e-3,
                "bin {k}: got {got}, expected {want}"
            );
        }
    }

    #[test]
    fn test_rejects_invalid_sizes() {
        for n in [0, 1, 2, 3, 6, 1000, 4097] {
            assert!(
                matches!(FftEngine::new(n), Err(PitchError::InvalidTransformSize(s)) if s == n),
                "size {n} should be rejected"
            );
        }
        assert!(FftEngine::new(4).is_ok());
    }

    #[test]
    fn test_permutation_table() {
        let engine = FftEngine::new(8).unwrap();
        assert_eq!(engine.permutation, vec![(0, 4), (2, 6), (1, 5), (3, 7)]);
    }

    #[test]
    fn test_twiddle_table_layout() {
        let n = 16;
        let engine = FftEngine::new(n).unwrap();
        assert_eq!(engine.twiddles.len(), 3 * n / 4);

        // First pass after the size-2 butterflies: m = 4, j = 0 only.
        assert_eq!(engine.twiddles[0].pair, (0, 1));
        assert_eq!(engine.twiddles[1].pair, (2, 3));
        assert!((engine.twiddles[0].cos[0] - 1.0).abs() < 1e-6);
        assert!(engine.twiddles[0].cos[1].abs() < 1e-6);

        // Last pass: m = N, a single group.
        let last = &engine.twiddles[2 * n / 4..];
        assert_eq!(last[0].pair, (0, 4));
        assert_eq!(last[3].pair, (3, 7));
    }

    #[test]
    fn test_forward_matches_reference_serial() {
        assert_matches_reference(64);
    }

    #[test]
    fn test_forward_matches_reference_parallel() {
        assert_matches_reference(4096);
    }

    #[test]
    fn test_impulse_has_flat_spectrum() {
        let engine = FftEngine::new(32).unwrap();
        let mut input = vec![0.0; 32];
        input[0] = 1.0;
        let spectrum = engine.forward(&input, None);
        for k in 0..32 {
            let bin = Lanes::bin(&spectrum, k);
            assert!((bin.re - 1.0).abs() < 1e-6 && bin.im.abs() < 1e-6);
        }
    }

    #[test]
    fn test_round_trip_reproduces_input() {
        for n in [4, 16, 256, 2048] {
            let engine = FftEngine::new(n).unwrap();
            let input = noise(n, 3);
            let restored = engine.inverse(engine.forward(&input, None));
            for (i, (&want, got)) in input.iter().zip(&restored).enumerate() {
                assert!(
                    (got.re - want).abs() < 1e-4 && got.im.abs() < 1e-4,
                    "n={n} sample {i}: {got} vs {want}"
                );
            }
        }
    }

    #[test]
    fn test_zero_padding_reads_missing_samples_as_zero() {
        let engine = FftEngine::new(16).unwrap();
        let short = [1.0, 2.0, 3.0];
        let mut padded = vec![0.0; 16];
        padded[..3].copy_from_slice(&short);
        assert_eq!(engine.forward(&short, None), engine.forward(&padded, None));
    }

    #[test]
    fn test_hann_window_shape() {
        let w = hann_window(9);
        assert!(w[0].abs() < 1e-7 && w[8].abs() < 1e-7);
        assert!((w[4] - 1.0).abs() < 1e-6);
        assert!((w[2] - w[6]).abs() < 1e-6);
    }

    #[test]
    fn test_windowed_transform_applies_hann() {
        let n = 256;
        let input = noise(n, 9);
        let shared = WindowedFft::shared(n).unwrap();
        let engine = FftEngine::new(n).unwrap();
        assert_eq!(shared.len(), n);
        assert_eq!(
            shared.transform(&input),
            engine.forward(&input, Some(&hann_window(n)))
        );
        assert!(WindowedFft::new(100).is_err());
    }

    #[test]
    fn test_windowed_dc_concentrates_in_low_bins() {
        let n = 64;
        let engine = FftEngine::new(n).unwrap();
        let window = hann_window(n);
        let spectrum = engine.forward(&vec![1.0; n], Some(&window));
        let magnitudes = spectrum_to_magnitudes(&spectrum);
        assert_eq!(magnitudes.len(), n / 2);
        assert!(magnitudes[0] > magnitudes[1]);
        assert!(magnitudes[4..].iter().all(|&m| m < 1e-2 * magnitudes[0]));
    }
}
