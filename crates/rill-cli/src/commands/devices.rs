//! Audio device listing.

use clap::Args;

use super::common::Global;

#[derive(Args)]
pub struct DevicesArgs {}

#[cfg(feature = "cpal-backend")]
pub fn run(_global: &Global, _args: DevicesArgs) -> anyhow::Result<()> {
    use rill_io::{AudioBackend, CpalBackend};

    let backend = CpalBackend::new();
    let devices = backend.list_devices()?;
    if devices.is_empty() {
        println!("No output devices found.");
        return Ok(());
    }
    println!("Output devices ({}):\n", backend.name());
    for device in devices {
        println!("  {} ({} Hz)", device.name, device.default_sample_rate);
    }
    Ok(())
}

#[cfg(not(feature = "cpal-backend"))]
pub fn run(_global: &Global, _args: DevicesArgs) -> anyhow::Result<()> {
    println!("Built without audio device support.");
    Ok(())
}
