//! Settings for the rill engine and its front ends.
//!
//! [`EngineSettings`] is read from a TOML file; every field has a default so
//! an absent or empty file yields a working setup.
//!
//! # Example
//!
//! ```rust,no_run
//! use rill_config::{EngineSettings, paths};
//!
//! let mut settings = EngineSettings::load_or_default(None).unwrap();
//! settings.block_size = 128;
//! settings.save(paths::default_config_file()).unwrap();
//! ```

mod error;
mod settings;

/// Platform-specific paths for settings and flows.
pub mod paths;

pub use error::ConfigError;
pub use settings::{EngineSettings, MAX_BLOCK_SIZE, MAX_CHANNELS, SAMPLE_RATE_RANGE};
pub use paths::{default_config_file, find_flow, user_config_dir, user_flows_dir};
