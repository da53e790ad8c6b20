//! Shared setup: settings, library and session loading.

use std::path::{Path, PathBuf};

use anyhow::Context;
use rill_config::{EngineSettings, find_flow};
use rill_io::Session;
use rill_ir::Library;

/// Options that apply to every command.
pub struct Global {
    pub config: Option<PathBuf>,
    pub backend: Option<String>,
    pub libraries: Vec<PathBuf>,
}

impl Global {
    /// Settings from `--config` (or the user config file), with `--backend`
    /// applied on top.
    pub fn settings(&self) -> anyhow::Result<EngineSettings> {
        let mut settings = EngineSettings::load_or_default(self.config.as_deref())
            .context("failed to load settings")?;
        if let Some(backend) = &self.backend {
            settings.backend.clone_from(backend);
            settings.validate()?;
        }
        Ok(settings)
    }

    /// The core library plus every `--library` file.
    pub fn library(&self) -> anyhow::Result<Library> {
        let mut library = Library::core()?;
        for path in &self.libraries {
            let text = std::fs::read_to_string(path)
                .with_context(|| format!("failed to read {}", path.display()))?;
            let names = library
                .load_source(&text)
                .with_context(|| format!("invalid IR in {}", path.display()))?;
            tracing::info!(path = %path.display(), functions = names.len(), "library loaded");
        }
        Ok(library)
    }

    /// A session with `flow` opened. Falls back to the configured default
    /// flow when `flow` is `None`.
    pub fn open(&self, flow: Option<&Path>) -> anyhow::Result<Session> {
        let settings = self.settings()?;
        let path = resolve_flow(flow, &settings)?;
        let mut session = Session::with_library(self.library()?, settings)?;
        session
            .open(&path)
            .with_context(|| format!("failed to open flow {}", path.display()))?;
        Ok(session)
    }
}

/// Finds the flow named on the command line or in the settings.
pub fn resolve_flow(flow: Option<&Path>, settings: &EngineSettings) -> anyhow::Result<PathBuf> {
    let requested = flow
        .or(settings.default_flow.as_deref())
        .context("no flow given and no default_flow configured")?;
    let name = requested.to_string_lossy();
    find_flow(&name, None).with_context(|| format!("flow not found: {name}"))
}

/// Seconds to frames at `sample_rate`.
pub fn frames_for(seconds: f32, sample_rate: u32) -> usize {
    (seconds.max(0.0) * sample_rate as f32).round() as usize
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn frames_round_and_clamp() {
        assert_eq!(frames_for(1.0, 48000), 48000);
        assert_eq!(frames_for(0.5, 44100), 22050);
        assert_eq!(frames_for(-2.0, 48000), 0);
    }

    #[test]
    fn missing_flow_is_an_error() {
        let settings = EngineSettings::default();
        assert!(resolve_flow(None, &settings).is_err());
        assert!(resolve_flow(Some(Path::new("/definitely/not/here.toml")), &settings).is_err());
    }
}
