//! Fixed-capacity FIFO sample window.
//!
//! Holds the most recent `N` samples of the input stream, oldest first. New
//! audio blocks push the oldest samples out.

/// Sample window filled by pushing blocks of audio.
#[derive(Debug, Clone)]
pub struct RingBuffer {
    samples: Vec<f32>,
}

impl RingBuffer {
    /// Creates a window of `capacity` zeroed samples.
    pub fn new(capacity: usize) -> Self {
        Self {
            samples: vec![0.0; capacity],
        }
    }

    /// Pushes a block of samples into the window.
    ///
    /// Blocks shorter than the window shift the existing contents left and
    /// land in the tail. Blocks at least as long as the window replace it
    /// with their last `N` samples.
    pub fn push(&mut self, data: &[f32]) {
        let n = self.samples.len();
        let length = data.len();

        if length == 0 || n == 0 {
            return;
        }

        if length < n {
            self.samples.copy_within(length.., 0);
            self.samples[n - length..].copy_from_slice(data);
        } else {
            self.samples.copy_from_slice(&data[length - n..]);
        }
    }

    /// The current window, oldest sample first.
    pub fn samples(&self) -> &[f32] {
        &self.samples
    }

    pub fn capacity(&self) -> usize {
        self.samples.len()
    }

    /// Zeroes the window.
    pub fn clear(&mut self) {
        self.samples.fill(0.0);
    }

    /// Root-mean-square level of the window in dBFS.
    pub fn level_dbfs(&self) -> f32 {
        if self.samples.is_empty() {
            return crate::spectrum::SILENCE_DB;
        }
        let mean_square =
            self.samples.iter().map(|&s| s * s).sum::<f32>() / self.samples.len() as f32;
        crate::spectrum::dbfs(mean_square.sqrt())
    }
}
