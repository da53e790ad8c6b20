//! Offline rendering of a flow to a WAV file.

use std::path::PathBuf;

use anyhow::Context;
use clap::Args;
use indicatif::{ProgressBar, ProgressStyle};
use rill_io::{WavSpec, read_wav, write_wav};

use super::common::{Global, frames_for};

#[derive(Args)]
pub struct RenderArgs {
    /// Flow file (TOML) or name in the user flows directory
    #[arg(value_name = "FLOW")]
    flow: Option<PathBuf>,

    /// Output WAV file
    #[arg(short, long, value_name = "OUTPUT")]
    output: PathBuf,

    /// Duration in seconds
    #[arg(short, long, default_value = "5")]
    seconds: f32,

    /// WAV file fed to the flow's first input (mixed to mono)
    #[arg(short, long)]
    input: Option<PathBuf>,

    /// Output bit depth (16, 24, or 32)
    #[arg(long, default_value = "32")]
    bit_depth: u16,
}

pub fn run(global: &Global, args: RenderArgs) -> anyhow::Result<()> {
    if ![16, 24, 32].contains(&args.bit_depth) {
        anyhow::bail!("unsupported bit depth {} (use 16, 24 or 32)", args.bit_depth);
    }
    let session = global.open(args.flow.as_deref())?;
    let settings = session.settings().clone();

    let input = match &args.input {
        Some(path) => {
            let (samples, spec) = read_wav(path)
                .with_context(|| format!("failed to read {}", path.display()))?;
            if spec.sample_rate != settings.sample_rate {
                tracing::warn!(
                    file = spec.sample_rate,
                    engine = settings.sample_rate,
                    "input sample rate differs, no resampling is done"
                );
            }
            Some(samples)
        }
        None => None,
    };

    let frames = frames_for(args.seconds, settings.sample_rate);
    println!(
        "Rendering {} ({} frames, {} ch, {} Hz)...",
        session.flow().name(),
        frames,
        settings.channels,
        settings.sample_rate
    );

    let pb = ProgressBar::new(frames as u64);
    pb.set_style(
        ProgressStyle::default_bar()
            .template("[{elapsed_precise}] [{bar:40.cyan/blue}] {pos}/{len} ({eta})")?
            .progress_chars("##-"),
    );
    let output = session.render(frames, input.as_deref(), |done| pb.set_position(done as u64))?;
    pb.finish_and_clear();

    let spec = WavSpec {
        channels: settings.channels,
        sample_rate: settings.sample_rate,
        bits_per_sample: args.bit_depth,
    };
    write_wav(&args.output, &output, spec)
        .with_context(|| format!("failed to write {}", args.output.display()))?;

    let peak = output.iter().fold(0.0f32, |m, x| m.max(x.abs()));
    println!("Wrote {} (peak {:.3})", args.output.display(), peak);
    Ok(())
}
