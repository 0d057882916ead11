//! # Sample Source Module
//!
//! Streams a WAV file to the analysis loop in host-sized blocks, the way an
//! audio callback would deliver them.
//!
//! ## Features
//! - 8 to 32 bit integer and 32 bit float WAV input
//! - First channel of multichannel files
//! - Dedicated reader thread feeding a bounded crossbeam channel

use anyhow::{Context, Result, anyhow};
use crossbeam_channel::{Receiver, Sender};
use hound::{SampleFormat, WavReader};
use std::fs::File;
use std::io::BufReader;
use std::path::Path;
use std::thread::{self, JoinHandle};
use tracing::{debug, info};

/// Blocks buffered between the reader and the analysis loop.
const CHANNEL_CAPACITY: usize = 16;

/// A running reader thread.
pub struct WavSource {
    pub sample_rate: u32,
    pub channels: u16,
    pub blocks: Receiver<Vec<f32>>,
    handle: JoinHandle<Result<usize>>,
}

impl WavSource {
    /// Opens `path` and starts sending blocks of `block_size` samples.
    ///
    /// The last block may be shorter.
    pub fn spawn(path: &Path, block_size: usize) -> Result<Self> {
        if block_size == 0 {
            return Err(anyhow!("block size must be at least 1"));
        }
        let reader = WavReader::open(path)
            .with_context(|| format!("error opening input file {}", path.display()))?;
        let spec = reader.spec();
        info!(
            sample_rate = spec.sample_rate,
            channels = spec.channels,
            bits = spec.bits_per_sample,
            format = ?spec.sample_format,
            "opened {}",
            path.display()
        );

        let (tx, rx) = crossbeam_channel::bounded(CHANNEL_CAPACITY);
        let handle = thread::Builder::new()
            .name("wav-reader".to_string())
            .spawn(move || stream_blocks(reader, block_size, tx))
            .context("failed to spawn reader thread")?;

        Ok(Self {
            sample_rate: spec.sample_rate,
            channels: spec.channels,
            blocks: rx,
            handle,
        })
    }

    /// Waits for the reader and returns the number of samples it sent.
    pub fn finish(self) -> Result<usize> {
        drop(self.blocks);
        self.handle
            .join()
            .map_err(|_| anyhow!("reader thread panicked"))?
    }
}

fn stream_blocks(
    reader: WavReader<BufReader<File>>,
    block_size: usize,
    tx: Sender<Vec<f32>>,
) -> Result<usize> {
    let spec = reader.spec();
    let channels = spec.channels.max(1) as usize;

    let samples: Box<dyn Iterator<Item = hound::Result<f32>>> = match spec.sample_format {
        SampleFormat::Float => Box::new(reader.into_samples::<f32>()),
        SampleFormat::Int => {
            let scale = 1.0 / (1u64 << (spec.bits_per_sample.saturating_sub(1))) as f32;
            Box::new(
                reader
                    .into_samples::<i32>()
                    .map(move |s| s.map(|v| v as f32 * scale)),
            )
        }
    };

    let mut block = Vec::with_capacity(block_size);
    let mut sent = 0;
    for sample in samples.step_by(channels) {
        block.push(sample.context("error decoding sample")?);
        if block.len() == block_size {
            sent += block.len();
            let full = std::mem::replace(&mut block, Vec::with_capacity(block_size));
            if tx.send(full).is_err() {
                debug!("analysis loop hung up");
                return Ok(sent);
            }
        }
    }
    if !block.is_empty() {
        sent += block.len();
        // A closed receiver here only means the loop stopped first.
        let _ = tx.send(block);
    }
    debug!(sent, "reader finished");
    Ok(sent)
}
