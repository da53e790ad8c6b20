//! Real-time playback of a flow.

use std::path::PathBuf;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::{Duration, Instant};

use clap::Args;
use rill_io::{AudioBackend, BackendStreamConfig, ClockBackend};

use super::common::Global;

const POLL: Duration = Duration::from_millis(50);

#[derive(Args)]
pub struct PlayArgs {
    /// Flow file (TOML) or name in the user flows directory
    #[arg(value_name = "FLOW")]
    flow: Option<PathBuf>,

    /// Stop after this many seconds (default: until Ctrl+C)
    #[arg(short, long)]
    seconds: Option<f32>,

    /// Output device name (substring match)
    #[arg(short, long)]
    device: Option<String>,

    /// Run on a timer thread instead of an audio device
    #[arg(long)]
    headless: bool,

    /// Print values of this node while playing (repeatable)
    #[arg(short, long = "watch", value_name = "NODE")]
    watches: Vec<u32>,
}

fn backend(args: &PlayArgs) -> anyhow::Result<Box<dyn AudioBackend>> {
    if args.headless {
        return Ok(Box::new(ClockBackend::new()));
    }
    #[cfg(feature = "cpal-backend")]
    {
        Ok(Box::new(DeviceBackend {
            inner: rill_io::CpalBackend::new(),
            device: args.device.clone(),
        }))
    }
    #[cfg(not(feature = "cpal-backend"))]
    {
        anyhow::bail!("built without audio device support; use --headless")
    }
}

/// Applies `--device` to every stream the inner backend builds.
#[cfg(feature = "cpal-backend")]
struct DeviceBackend {
    inner: rill_io::CpalBackend,
    device: Option<String>,
}

#[cfg(feature = "cpal-backend")]
impl AudioBackend for DeviceBackend {
    fn name(&self) -> &str {
        self.inner.name()
    }

    fn build_output_stream(
        &self,
        config: &BackendStreamConfig,
        callback: rill_io::OutputCallback,
        error_callback: rill_io::ErrorCallback,
    ) -> rill_io::Result<rill_io::StreamHandle> {
        let config = BackendStreamConfig {
            device_name: self.device.clone(),
            ..config.clone()
        };
        self.inner.build_output_stream(&config, callback, error_callback)
    }
}

pub fn run(global: &Global, args: PlayArgs) -> anyhow::Result<()> {
    let mut session = global.open(args.flow.as_deref())?;
    for &node in &args.watches {
        session.watch(node)?;
    }
    let backend = backend(&args)?;

    let running = Arc::new(AtomicBool::new(true));
    let r = Arc::clone(&running);
    ctrlc::set_handler(move || {
        r.store(false, Ordering::SeqCst);
    })?;

    session.start(backend.as_ref())?;
    println!(
        "Playing {} through {}... Press Ctrl+C to stop.",
        session.flow().name(),
        backend.name()
    );

    let deadline = args
        .seconds
        .map(|s| Instant::now() + Duration::from_secs_f32(s.max(0.0)));
    while running.load(Ordering::SeqCst) && deadline.is_none_or(|d| Instant::now() < d) {
        std::thread::sleep(POLL);
        for &node in &args.watches {
            if let Some(last) = session.drain_watch(node).last() {
                println!("  node {node}: {last:.4}");
            }
        }
    }

    session.stop();
    println!("Stopped.");
    Ok(())
}
