//! WAV reading, writing and offline rendering.

use std::path::Path;

use hound::{SampleFormat, WavReader, WavWriter};
use rill_engine::Processor;

use crate::Result;

/// WAV file specification.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct WavSpec {
    /// Number of interleaved channels.
    pub channels: u16,
    /// Sample rate in Hz.
    pub sample_rate: u32,
    /// Bit depth; 32 is written as float, anything else as integer PCM.
    pub bits_per_sample: u16,
}

impl Default for WavSpec {
    fn default() -> Self {
        Self {
            channels: 1,
            sample_rate: 48000,
            bits_per_sample: 32,
        }
    }
}

impl From<hound::WavSpec> for WavSpec {
    fn from(spec: hound::WavSpec) -> Self {
        Self {
            channels: spec.channels,
            sample_rate: spec.sample_rate,
            bits_per_sample: spec.bits_per_sample,
        }
    }
}

impl From<WavSpec> for hound::WavSpec {
    fn from(spec: WavSpec) -> Self {
        hound::WavSpec {
            channels: spec.channels,
            sample_rate: spec.sample_rate,
            bits_per_sample: spec.bits_per_sample,
            sample_format: if spec.bits_per_sample == 32 {
                SampleFormat::Float
            } else {
                SampleFormat::Int
            },
        }
    }
}

/// Reads a WAV file as mono f32, averaging channels.
pub fn read_wav<P: AsRef<Path>>(path: P) -> std::result::Result<(Vec<f32>, WavSpec), hound::Error> {
    let reader = WavReader::open(path)?;
    let spec = WavSpec::from(reader.spec());
    let channels = usize::from(spec.channels.max(1));

    let samples: Vec<f32> = match reader.spec().sample_format {
        SampleFormat::Float => reader
            .into_samples::<f32>()
            .collect::<std::result::Result<_, _>>()?,
        SampleFormat::Int => {
            let max_val = (1i64 << (spec.bits_per_sample - 1)) as f32;
            reader
                .into_samples::<i32>()
                .map(|s| s.map(|v| v as f32 / max_val))
                .collect::<std::result::Result<_, _>>()?
        }
    };

    let mono = if channels > 1 {
        samples
            .chunks_exact(channels)
            .map(|frame| frame.iter().sum::<f32>() / channels as f32)
            .collect()
    } else {
        samples
    };
    Ok((mono, spec))
}

/// Writes interleaved samples.
pub fn write_wav<P: AsRef<Path>>(path: P, samples: &[f32], spec: WavSpec) -> Result<()> {
    let mut writer = WavWriter::create(path, hound::WavSpec::from(spec))?;
    if spec.bits_per_sample == 32 {
        for &sample in samples {
            writer.write_sample(sample)?;
        }
    } else {
        let max_val = (1i64 << (spec.bits_per_sample - 1)) as f32;
        for &sample in samples {
            let int_sample = (sample * max_val).clamp(-max_val, max_val - 1.0) as i32;
            writer.write_sample(int_sample)?;
        }
    }
    writer.finalize()?;
    Ok(())
}

/// Runs `processor` offline for `frames` frames and returns the interleaved
/// output.
///
/// `input` feeds the first flow inlet, one sample per frame, and reads as
/// silence past its end. Work is done in blocks of `block_size` frames;
/// `progress` receives the number of frames rendered so far after each.
pub fn render(
    processor: &mut Processor,
    input: Option<&[f32]>,
    frames: usize,
    channels: usize,
    block_size: usize,
    mut progress: impl FnMut(usize),
) -> Vec<f32> {
    let channels = channels.max(1);
    let block_size = block_size.max(1);
    let mut output = vec![0.0; frames * channels];
    let mut scratch = vec![0.0; block_size];
    let mut done = 0;

    for block in output.chunks_mut(block_size * channels) {
        let len = block.len() / channels;
        let inp = match input {
            Some(source) => {
                let scratch = &mut scratch[..len];
                scratch.fill(0.0);
                let available = source.len().saturating_sub(done).min(len);
                scratch[..available].copy_from_slice(&source[done..done + available]);
                &scratch[..]
            }
            None => &[][..],
        };
        let in_channels = usize::from(input.is_some());
        processor.process_block(inp, in_channels, block, channels);
        done += len;
        progress(done);
    }
    output
}
