//! Audio I/O and the editing session for rill.
//!
//! This crate provides:
//!
//! - **Session**: [`Session`], the boundary API that editors and the CLI
//!   drive: open and save flows, edit nodes and edges, start and stop
//!   real-time processing, set controls and drain watches
//! - **Audio backends**: the [`AudioBackend`] trait with a paced
//!   [`ClockBackend`] and, with the `cpal-backend` feature, [`CpalBackend`]
//! - **Buffers**: [`BufferStore`] for WAV-backed and built-in sample data
//! - **WAV file I/O**: [`read_wav`], [`write_wav`] and offline [`render`]
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use rill_config::EngineSettings;
//! use rill_io::{ClockBackend, Session};
//!
//! let mut session = Session::new(EngineSettings::default())?;
//! session.open("drone.toml")?;
//! session.start(&ClockBackend::new())?;
//! session.set_control(3, 0.5)?;
//! # Ok::<(), rill_io::Error>(())
//! ```

pub mod backend;
pub mod buffers;
pub mod clock;
#[cfg(feature = "cpal-backend")]
pub mod cpal_backend;
pub mod session;
pub mod wav;

pub use backend::{
    AudioBackend, AudioDevice, BackendStreamConfig, ErrorCallback, OutputCallback, StreamHandle,
};
pub use buffers::{BufferStore, SINE_LENGTH};
pub use clock::ClockBackend;
#[cfg(feature = "cpal-backend")]
pub use cpal_backend::CpalBackend;
pub use session::Session;
pub use wav::{WavSpec, read_wav, render, write_wav};

use rill_config::ConfigError;
use rill_engine::EngineError;
use rill_flow::FlowError;
use rill_ir::IrError;

/// Error types for audio I/O and session operations.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// A buffer's WAV file could not be read.
    #[error("failed to load buffer '{name}': {source}")]
    BufferLoad {
        /// Buffer name.
        name: String,
        /// Decoder error.
        #[source]
        source: hound::Error,
    },

    /// A buffer with no file names no built-in data.
    #[error("unknown built-in buffer: {0}")]
    UnknownBuffer(String),

    /// WAV file read/write error.
    #[error("WAV file error: {0}")]
    Wav(#[from] hound::Error),

    /// Audio stream setup or runtime error.
    #[error("audio stream error: {0}")]
    Stream(String),

    /// No audio device available on the system.
    #[error("no audio device available")]
    NoDevice,

    /// The requested audio device was not found.
    #[error("device not found: {0}")]
    DeviceNotFound(String),

    /// The session has never been saved and no path was given.
    #[error("flow has no file path")]
    NoPath,

    /// The node has no lag field to watch.
    #[error("node {0} cannot be watched")]
    NotWatchable(u32),

    /// Flow editing or lowering failed.
    #[error(transparent)]
    Flow(#[from] FlowError),

    /// Compilation or control failed.
    #[error(transparent)]
    Engine(#[from] EngineError),

    /// IR parsing or validation failed.
    #[error(transparent)]
    Ir(#[from] IrError),

    /// Settings were rejected.
    #[error(transparent)]
    Config(#[from] ConfigError),

    /// Standard I/O error.
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

/// Convenience result type for audio I/O operations.
pub type Result<T> = std::result::Result<T, Error>;
