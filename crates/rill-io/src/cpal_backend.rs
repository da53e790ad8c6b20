//! Output through [cpal](https://crates.io/crates/cpal): ALSA on Linux,
//! CoreAudio on macOS, WASAPI on Windows.

use cpal::traits::{DeviceTrait, HostTrait, StreamTrait};
use cpal::{Device, Host};

use crate::backend::{AudioBackend, AudioDevice, BackendStreamConfig, ErrorCallback, OutputCallback, StreamHandle};
use crate::{Error, Result};

fn device_name(device: &Device) -> std::result::Result<String, cpal::DeviceNameError> {
    device.description().map(|d| d.name().to_string())
}

/// Backend for the platform's default audio host.
pub struct CpalBackend {
    host: Host,
}

impl CpalBackend {
    /// Connects to the default host.
    pub fn new() -> Self {
        let host = cpal::default_host();
        tracing::info!(host = host.id().name(), "cpal backend initialized");
        Self { host }
    }

    /// An output device whose name contains `name` (case-insensitive), or
    /// the default output.
    fn find_output_device(&self, name: Option<&str>) -> Result<Device> {
        let Some(search) = name else {
            return self.host.default_output_device().ok_or(Error::NoDevice);
        };
        let needle = search.to_lowercase();
        let devices = self
            .host
            .output_devices()
            .map_err(|e| Error::Stream(e.to_string()))?;
        for device in devices {
            if let Ok(dev_name) = device_name(&device)
                && dev_name.to_lowercase().contains(&needle)
            {
                return Ok(device);
            }
        }
        Err(Error::DeviceNotFound(format!(
            "no output device matching '{search}'"
        )))
    }
}

impl Default for CpalBackend {
    fn default() -> Self {
        Self::new()
    }
}

impl AudioBackend for CpalBackend {
    fn name(&self) -> &'static str {
        "cpal"
    }

    fn list_devices(&self) -> Result<Vec<AudioDevice>> {
        let devices = self
            .host
            .output_devices()
            .map_err(|e| Error::Stream(e.to_string()))?;
        Ok(devices
            .filter_map(|device| {
                let name = device_name(&device).ok()?;
                let default_sample_rate = device
                    .default_output_config()
                    .map(|c| c.sample_rate())
                    .unwrap_or(48000);
                Some(AudioDevice {
                    name,
                    is_output: true,
                    default_sample_rate,
                })
            })
            .collect())
    }

    fn build_output_stream(
        &self,
        config: &BackendStreamConfig,
        mut callback: OutputCallback,
        mut error_callback: ErrorCallback,
    ) -> Result<StreamHandle> {
        let device = self.find_output_device(config.device_name.as_deref())?;
        let stream_config = cpal::StreamConfig {
            channels: config.channels,
            sample_rate: config.sample_rate,
            buffer_size: cpal::BufferSize::Fixed(config.buffer_size),
        };

        let stream = device
            .build_output_stream(
                &stream_config,
                move |data: &mut [f32], _: &cpal::OutputCallbackInfo| callback(data),
                move |err| error_callback(&err.to_string()),
                None,
            )
            .map_err(|e| Error::Stream(e.to_string()))?;
        stream.play().map_err(|e| Error::Stream(e.to_string()))?;

        tracing::info!(
            channels = config.channels,
            sample_rate = config.sample_rate,
            "output stream started"
        );
        Ok(StreamHandle::new(stream))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn cpal_backend_name() {
        assert_eq!(CpalBackend::new().name(), "cpal");
    }

    #[test]
    fn unknown_device_is_reported() {
        let backend = CpalBackend::new();
        let config = BackendStreamConfig {
            device_name: Some("no-such-device-3f9a".into()),
            ..Default::default()
        };
        let result =
            backend.build_output_stream(&config, Box::new(|_| {}), Box::new(|_| {}));
        assert!(matches!(
            result,
            Err(Error::DeviceNotFound(_) | Error::Stream(_))
        ));
    }
}
