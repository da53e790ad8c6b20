//! Named sample buffers bound to flow nodes.
//!
//! A buffer comes either from a WAV file, mixed down to mono, or from the
//! built-in set when its path is empty. Built-ins are also used for nodes
//! that name a buffer the flow never declares.

use std::collections::BTreeMap;
use std::path::Path;
use std::sync::Arc;

use rill_flow::Flow;

use crate::wav::read_wav;
use crate::{Error, Result};

/// Length of the built-in `sine` table.
pub const SINE_LENGTH: usize = 1024;

/// Loaded buffers by name.
#[derive(Debug, Clone, Default)]
pub struct BufferStore {
    buffers: BTreeMap<String, Arc<[f32]>>,
}

impl BufferStore {
    /// Creates an empty store.
    pub fn new() -> Self {
        Self::default()
    }

    /// Built-in buffer data: `sine` is one period over [`SINE_LENGTH`]
    /// samples.
    pub fn builtin(name: &str) -> Option<Arc<[f32]>> {
        match name {
            "sine" => {
                let step = std::f32::consts::TAU / SINE_LENGTH as f32;
                Some((0..SINE_LENGTH).map(|i| (i as f32 * step).sin()).collect())
            }
            _ => None,
        }
    }

    /// Stores `samples` under `name`, replacing any previous data.
    pub fn insert(&mut self, name: impl Into<String>, samples: Arc<[f32]>) {
        self.buffers.insert(name.into(), samples);
    }

    /// Loads `name` from a WAV file, or from the built-ins when `path` is
    /// empty. Returns the number of samples.
    pub fn load(&mut self, name: &str, path: &Path) -> Result<usize> {
        let samples: Arc<[f32]> = if path.as_os_str().is_empty() {
            Self::builtin(name).ok_or_else(|| Error::UnknownBuffer(name.to_owned()))?
        } else {
            let (samples, spec) = read_wav(path).map_err(|source| Error::BufferLoad {
                name: name.to_owned(),
                source,
            })?;
            tracing::info!(
                buffer = name,
                path = %path.display(),
                channels = spec.channels,
                sample_rate = spec.sample_rate,
                samples = samples.len(),
                "buffer loaded"
            );
            samples.into()
        };
        let len = samples.len();
        self.insert(name, samples);
        Ok(len)
    }

    /// Loads every buffer `flow` declares. Relative paths resolve against
    /// `base`.
    pub fn load_flow(&mut self, flow: &Flow, base: &Path) -> Result<()> {
        for source in flow.buffers() {
            let path = if source.path.as_os_str().is_empty() || source.path.is_absolute() {
                source.path.clone()
            } else {
                base.join(&source.path)
            };
            self.load(&source.name, &path)?;
        }
        Ok(())
    }

    /// Drops a buffer. Returns whether it was loaded.
    pub fn remove(&mut self, name: &str) -> bool {
        self.buffers.remove(name).is_some()
    }

    /// Data of a loaded buffer.
    pub fn get(&self, name: &str) -> Option<&Arc<[f32]>> {
        self.buffers.get(name)
    }

    /// Loaded buffer names, sorted.
    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.buffers.keys().map(String::as_str)
    }

    /// Loaded data for `name`, falling back to the built-ins.
    pub fn resolve(&self, name: &str) -> Option<Arc<[f32]>> {
        self.buffers.get(name).cloned().or_else(|| Self::builtin(name))
    }
}
