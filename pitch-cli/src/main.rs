//! # pitch-track
//!
//! Runs the pitch tracker over a WAV file, one tracker update per block, and
//! prints what a game loop would see each frame.
//!
//! ## Architecture
//! - **Reader Thread**: decodes the file and sends fixed-size blocks
//! - **Main Thread**: pushes each block and runs one tracker update
//! - **Communication**: bounded crossbeam channel between the two

mod source;

use anyhow::{Context, Result, anyhow};
use clap::{Parser, ValueEnum};
use pitch_core::{CalibrationCurve, DetectorKind, PitchFrame, PitchTracker, TrackerConfig};
use serde::Serialize;
use std::io::{BufWriter, Write};
use std::path::PathBuf;
use tracing::{info, warn};
use tracing_subscriber::{EnvFilter, fmt, layer::SubscriberExt, util::SubscriberInitExt};

use source::WavSource;

#[derive(Parser, Debug)]
#[command(name = "pitch-track", version, about = "Track the pitch of a WAV file")]
struct Args {
    /// WAV file to analyse
    input: Option<PathBuf>,

    /// Tracker settings as JSON
    #[arg(long)]
    config: Option<PathBuf>,

    /// YIN-FFT weighting curve as JSON, replacing the built-in one
    #[arg(long, value_name = "PATH")]
    calibration: Option<PathBuf>,

    /// Samples delivered per frame
    #[arg(long, default_value_t = 512)]
    block: usize,

    /// Overrides the detector from the config
    #[arg(long, value_enum)]
    detector: Option<DetectorArg>,

    /// Follow the input level instead of the configured gain
    #[arg(long)]
    auto_gain: bool,

    /// Print one JSON object per frame
    #[arg(long)]
    json: bool,

    /// Write the default settings to this file and exit
    #[arg(long, value_name = "PATH")]
    write_config: Option<PathBuf>,
}

#[derive(Clone, Copy, Debug, ValueEnum)]
enum DetectorArg {
    YinFft,
    Yin,
    Peak,
    Swipe,
}

impl From<DetectorArg> for DetectorKind {
    fn from(arg: DetectorArg) -> Self {
        match arg {
            DetectorArg::YinFft => DetectorKind::YinFft,
            DetectorArg::Yin => DetectorKind::YinTimeDomain,
            DetectorArg::Peak => DetectorKind::SpectrumPeak,
            DetectorArg::Swipe => DetectorKind::Swipe,
        }
    }
}

/// One line of `--json` output.
#[derive(Serialize)]
struct FrameRecord<'a> {
    /// Seconds of audio consumed so far
    time: f64,
    #[serde(flatten)]
    frame: &'a PitchFrame,
}

fn main() -> Result<()> {
    tracing_subscriber::registry()
        .with(
            fmt::layer()
                .with_writer(std::io::stderr)
                .with_target(false),
        )
        .with(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    let args = Args::parse();

    if let Some(path) = &args.write_config {
        TrackerConfig::default()
            .save(path)
            .with_context(|| format!("failed to write {}", path.display()))?;
        info!("wrote default config to {}", path.display());
        return Ok(());
    }

    let input = args
        .input
        .as_ref()
        .ok_or_else(|| anyhow!("no input file given"))?;

    let mut config = match &args.config {
        Some(path) => TrackerConfig::load(path)
            .with_context(|| format!("failed to load config {}", path.display()))?,
        None => TrackerConfig::default(),
    };
    if let Some(detector) = args.detector {
        config.detector = detector.into();
    }
    if args.auto_gain {
        config.auto_gain = true;
    }
    let curve = match &args.calibration {
        Some(path) => CalibrationCurve::load(path)
            .with_context(|| format!("failed to load calibration {}", path.display()))?,
        None => CalibrationCurve::default(),
    };

    let source = WavSource::spawn(input, args.block)?;
    if source.channels > 1 {
        warn!(channels = source.channels, "using the first channel only");
    }
    let sample_rate = source.sample_rate as f32;
    let mut tracker = PitchTracker::with_calibration(config, sample_rate, &curve)
        .context("invalid tracker settings")?;

    let stdout = std::io::stdout();
    let mut out = BufWriter::new(stdout.lock());
    let mut consumed = 0usize;
    let mut frames = 0usize;

    for block in source.blocks.iter() {
        consumed += block.len();
        tracker.push(&block);
        let frame = tracker.update()?;
        frames += 1;

        let time = consumed as f64 / source.sample_rate as f64;
        if args.json {
            let record = FrameRecord {
                time,
                frame: &frame,
            };
            serde_json::to_writer(&mut out, &record)?;
            writeln!(out)?;
        } else {
            writeln!(out, "{}", format_frame(time, &frame))?;
        }
    }
    out.flush()?;

    tracker.dispose();
    let sent = source.finish()?;
    info!(frames, samples = sent, "done");
    Ok(())
}

fn format_frame(time: f64, frame: &PitchFrame) -> String {
    let note = match &frame.note {
        Some(name) if frame.cents != 0 => format!("{name} {:+}c", frame.cents),
        Some(name) => name.clone(),
        None => "---".to_string(),
    };
    format!(
        "{time:8.3}s  raw {:8.2} Hz  conf {:.2}  display {:8.2} Hz  {note}",
        frame.raw_pitch, frame.confidence, frame.display_pitch
    )
}
