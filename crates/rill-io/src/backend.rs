//! Pluggable audio output.
//!
//! [`AudioBackend`] keeps the session independent of any platform audio API.
//! Callbacks are boxed closures so the trait stays object-safe and the
//! backend can be picked at runtime. Streams come back as a type-erased
//! [`StreamHandle`] that stops playback when dropped.

use crate::Result;

/// Configuration for building an output stream.
#[derive(Debug, Clone)]
pub struct BackendStreamConfig {
    /// Requested sample rate in Hz.
    pub sample_rate: u32,
    /// Preferred buffer size in frames.
    pub buffer_size: u32,
    /// Number of interleaved output channels.
    pub channels: u16,
    /// Optional device name filter (system default if `None`).
    pub device_name: Option<String>,
}

impl Default for BackendStreamConfig {
    fn default() -> Self {
        Self {
            sample_rate: 48000,
            buffer_size: 256,
            channels: 2,
            device_name: None,
        }
    }
}

impl From<&rill_config::EngineSettings> for BackendStreamConfig {
    fn from(settings: &rill_config::EngineSettings) -> Self {
        Self {
            sample_rate: settings.sample_rate,
            buffer_size: settings.block_size as u32,
            channels: settings.channels,
            device_name: None,
        }
    }
}

/// Audio device information.
#[derive(Debug, Clone)]
pub struct AudioDevice {
    /// Human-readable device name.
    pub name: String,
    /// Whether the device supports audio output.
    pub is_output: bool,
    /// Default sample rate in Hz.
    pub default_sample_rate: u32,
}

/// Type-erased stream handle.
///
/// The stream runs while this handle exists; dropping it stops playback.
pub struct StreamHandle {
    _inner: Box<dyn Send>,
}

impl StreamHandle {
    /// Wraps a backend-specific stream object, keeping it alive until drop.
    pub fn new<T: Send + 'static>(stream: T) -> Self {
        Self {
            _inner: Box::new(stream),
        }
    }
}

impl std::fmt::Debug for StreamHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("StreamHandle").finish_non_exhaustive()
    }
}

/// Fills a buffer of interleaved samples, `frames * channels` long.
///
/// Runs on the audio thread: no allocation, locking or I/O.
pub type OutputCallback = Box<dyn FnMut(&mut [f32]) + Send>;

/// Receives streaming errors as human-readable messages.
pub type ErrorCallback = Box<dyn FnMut(&str) + Send>;

/// An audio output implementation.
pub trait AudioBackend: Send {
    /// Short name for logs ("cpal", "clock").
    fn name(&self) -> &str;

    /// Output devices this backend can open.
    fn list_devices(&self) -> Result<Vec<AudioDevice>> {
        Ok(Vec::new())
    }

    /// Builds and starts an output stream driving `callback`.
    fn build_output_stream(
        &self,
        config: &BackendStreamConfig,
        callback: OutputCallback,
        error_callback: ErrorCallback,
    ) -> Result<StreamHandle>;

    /// Sample rate the backend will actually run `config` at.
    fn actual_sample_rate(&self, config: &BackendStreamConfig) -> u32 {
        config.sample_rate
    }
}
