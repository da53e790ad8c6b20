//! Engine settings file.

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

use rill_engine::{BackendKind, DEFAULT_WATCH_CAPACITY, OptLevel};

use crate::error::ConfigError;
use crate::paths;

/// Runtime settings for the engine and the audio front end.
///
/// Every field has a default, so an empty file is a valid configuration.
///
/// # TOML Format
///
/// ```toml
/// sample_rate = 48000
/// block_size = 256
/// channels = 2
/// backend = "jit"
/// opt_level = "speed"
/// watch_capacity = 4096
/// default_flow = "flows/drone.toml"
/// buffer_dir = "samples"
/// ```
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct EngineSettings {
    /// Sample rate in Hz.
    pub sample_rate: u32,

    /// Frames per processing block.
    pub block_size: usize,

    /// Output channel count.
    pub channels: u16,

    /// `jit` or `interpreter`.
    pub backend: String,

    /// Cranelift optimisation level: `none`, `speed` or `speed_and_size`.
    pub opt_level: String,

    /// Values kept per watch before the oldest are dropped.
    pub watch_capacity: usize,

    /// Flow opened when none is named on the command line.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub default_flow: Option<PathBuf>,

    /// Directory that relative buffer paths resolve against.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub buffer_dir: Option<PathBuf>,
}

/// Accepted sample rates, inclusive.
pub const SAMPLE_RATE_RANGE: (u32, u32) = (8_000, 384_000);

/// Largest accepted block size.
pub const MAX_BLOCK_SIZE: usize = 8192;

/// Largest accepted channel count.
pub const MAX_CHANNELS: u16 = 32;

impl Default for EngineSettings {
    fn default() -> Self {
        Self {
            sample_rate: 48000,
            block_size: 256,
            channels: 2,
            backend: "jit".to_owned(),
            opt_level: "speed".to_owned(),
            watch_capacity: DEFAULT_WATCH_CAPACITY,
            default_flow: None,
            buffer_dir: None,
        }
    }
}

impl EngineSettings {
    /// Load settings from a TOML file and validate them.
    pub fn load(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        let content =
            std::fs::read_to_string(path).map_err(|e| ConfigError::read_file(path, e))?;
        let settings = Self::from_toml(&content)?;
        tracing::debug!(path = %path.display(), "loaded settings");
        Ok(settings)
    }

    /// Load `path` if given, else the user config file if it exists, else
    /// the defaults.
    pub fn load_or_default(path: Option<&Path>) -> Result<Self, ConfigError> {
        if let Some(path) = path {
            return Self::load(path);
        }
        let fallback = paths::default_config_file();
        if fallback.is_file() {
            Self::load(fallback)
        } else {
            Ok(Self::default())
        }
    }

    /// Parse and validate settings from a TOML string.
    pub fn from_toml(toml_str: &str) -> Result<Self, ConfigError> {
        let settings: Self = toml::from_str(toml_str)?;
        settings.validate()?;
        Ok(settings)
    }

    /// Save the settings to a TOML file, creating parent directories.
    pub fn save(&self, path: impl AsRef<Path>) -> Result<(), ConfigError> {
        let path = path.as_ref();
        if let Some(parent) = path.parent()
            && !parent.as_os_str().is_empty()
            && !parent.exists()
        {
            std::fs::create_dir_all(parent).map_err(|e| ConfigError::create_dir(parent, e))?;
        }
        let content = self.to_toml()?;
        std::fs::write(path, content).map_err(|e| ConfigError::write_file(path, e))?;
        Ok(())
    }

    /// Convert the settings to a TOML string.
    pub fn to_toml(&self) -> Result<String, ConfigError> {
        Ok(toml::to_string_pretty(self)?)
    }

    /// Check every field against its accepted range.
    pub fn validate(&self) -> Result<(), ConfigError> {
        let (lo, hi) = SAMPLE_RATE_RANGE;
        if !(lo..=hi).contains(&self.sample_rate) {
            return Err(ConfigError::invalid(
                "sample_rate",
                format!("{} Hz is outside {lo}..={hi}", self.sample_rate),
            ));
        }
        if self.block_size == 0 || self.block_size > MAX_BLOCK_SIZE {
            return Err(ConfigError::invalid(
                "block_size",
                format!("{} is outside 1..={MAX_BLOCK_SIZE}", self.block_size),
            ));
        }
        if self.channels == 0 || self.channels > MAX_CHANNELS {
            return Err(ConfigError::invalid(
                "channels",
                format!("{} is outside 1..={MAX_CHANNELS}", self.channels),
            ));
        }
        if self.watch_capacity == 0 {
            return Err(ConfigError::invalid("watch_capacity", "must be at least 1"));
        }
        self.backend_kind()?;
        self.opt_level()?;
        Ok(())
    }

    /// The configured backend.
    pub fn backend_kind(&self) -> Result<BackendKind, ConfigError> {
        self.backend
            .parse()
            .map_err(|reason| ConfigError::invalid("backend", reason))
    }

    /// The configured JIT optimisation level.
    pub fn opt_level(&self) -> Result<OptLevel, ConfigError> {
        self.opt_level
            .parse()
            .map_err(|reason| ConfigError::invalid("opt_level", reason))
    }

    /// Resolve a buffer path against `buffer_dir`.
    pub fn resolve_buffer(&self, path: &Path) -> PathBuf {
        match &self.buffer_dir {
            Some(dir) if path.is_relative() => dir.join(path),
            _ => path.to_path_buf(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn empty_file_gives_defaults() {
        let settings = EngineSettings::from_toml("").unwrap();
        assert_eq!(settings, EngineSettings::default());
        assert_eq!(settings.backend_kind().unwrap(), BackendKind::Jit);
        assert_eq!(settings.opt_level().unwrap(), OptLevel::Speed);
    }

    #[test]
    fn partial_file_overrides_some_fields() {
        let settings = EngineSettings::from_toml(
            "sample_rate = 44100\nbackend = \"interpreter\"\nbuffer_dir = \"samples\"\n",
        )
        .unwrap();
        assert_eq!(settings.sample_rate, 44100);
        assert_eq!(settings.block_size, 256);
        assert_eq!(settings.backend_kind().unwrap(), BackendKind::Interpreter);
        assert_eq!(
            settings.resolve_buffer(Path::new("kick.wav")),
            PathBuf::from("samples/kick.wav")
        );
    }

    #[test]
    fn rejects_out_of_range_values() {
        for (text, field) in [
            ("sample_rate = 100", "sample_rate"),
            ("block_size = 0", "block_size"),
            ("channels = 0", "channels"),
            ("watch_capacity = 0", "watch_capacity"),
            ("backend = \"llvm\"", "backend"),
            ("opt_level = \"max\"", "opt_level"),
        ] {
            match EngineSettings::from_toml(text) {
                Err(ConfigError::Invalid { field: got, .. }) => assert_eq!(got, field),
                other => panic!("{text}: expected Invalid, got {other:?}"),
            }
        }
    }

    #[test]
    fn malformed_toml_is_a_parse_error() {
        assert!(matches!(
            EngineSettings::from_toml("sample_rate = \"fast\""),
            Err(ConfigError::Parse(_))
        ));
    }

    #[test]
    fn absolute_buffer_paths_are_kept() {
        let settings = EngineSettings {
            buffer_dir: Some(PathBuf::from("samples")),
            ..EngineSettings::default()
        };
        let abs = std::env::temp_dir().join("a.wav");
        assert_eq!(settings.resolve_buffer(&abs), abs);
    }
}
