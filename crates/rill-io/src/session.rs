//! The editing session: one flow, its buffers and, while playing, the
//! running program.
//!
//! Every structural edit made while processing is running recompiles the
//! flow and hot-swaps it in; nodes that survive the edit keep their state.
//! A failed recompile leaves the edit in place and the previous program
//! running, and the next edit retries.

use std::collections::{BTreeMap, BTreeSet};
use std::path::{Path, PathBuf};

use rill_config::EngineSettings;
use rill_engine::{DataPresets, Engine, ExecutionHandle, Generation, Preset, WatchId};
use rill_flow::{Edge, Flow, FlowError, Lowered, NodeId, NodeKind, lower};
use rill_ir::{FunctionInfo, Library};

use crate::backend::{AudioBackend, BackendStreamConfig, StreamHandle};
use crate::buffers::BufferStore;
use crate::wav::render;
use crate::{Error, Result};

/// Name given to flows made by [`Session::new`].
pub const DEFAULT_FLOW_NAME: &str = "main";

struct Running {
    handle: ExecutionHandle,
    watches: BTreeMap<u32, WatchId>,
    revision: u64,
    _stream: StreamHandle,
}

/// A flow being edited and, optionally, played.
pub struct Session {
    settings: EngineSettings,
    library: Library,
    engine: Engine,
    flow: Flow,
    path: Option<PathBuf>,
    buffers: BufferStore,
    watched: BTreeSet<u32>,
    running: Option<Running>,
}

impl std::fmt::Debug for Session {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Session")
            .field("flow", &self.flow.name())
            .field("path", &self.path)
            .field("running", &self.running.is_some())
            .finish_non_exhaustive()
    }
}

impl Session {
    /// Creates a session over the core library with an empty flow.
    pub fn new(settings: EngineSettings) -> Result<Self> {
        Self::with_library(Library::core()?, settings)
    }

    /// Creates a session over `library`.
    pub fn with_library(library: Library, settings: EngineSettings) -> Result<Self> {
        settings.validate()?;
        let backend = settings.backend_kind()?.create(settings.opt_level()?);
        let engine = Engine::new(backend, settings.sample_rate as f32)
            .with_watch_capacity(settings.watch_capacity);
        tracing::debug!(backend = engine.backend().name(), "session created");
        Ok(Self {
            settings,
            library,
            engine,
            flow: Flow::new(DEFAULT_FLOW_NAME),
            path: None,
            buffers: BufferStore::new(),
            watched: BTreeSet::new(),
            running: None,
        })
    }

    /// Active settings.
    pub fn settings(&self) -> &EngineSettings {
        &self.settings
    }

    /// Functions available to nodes.
    pub fn library(&self) -> &Library {
        &self.library
    }

    /// The flow being edited.
    pub fn flow(&self) -> &Flow {
        &self.flow
    }

    /// File the flow was opened from or last saved to.
    pub fn path(&self) -> Option<&Path> {
        self.path.as_deref()
    }

    /// Loaded buffers.
    pub fn buffers(&self) -> &BufferStore {
        &self.buffers
    }

    // --- documents ---

    /// Replaces the flow with an empty one. Stops processing.
    pub fn create(&mut self, name: &str) {
        self.stop();
        self.flow = Flow::new(name);
        self.path = None;
        self.buffers = BufferStore::new();
        self.watched.clear();
        tracing::info!(flow = name, "flow created");
    }

    /// Opens a flow file and loads its buffers. Stops processing.
    ///
    /// Relative buffer paths resolve against `buffer_dir` when configured,
    /// otherwise against the flow file's directory.
    pub fn open(&mut self, path: impl AsRef<Path>) -> Result<()> {
        let path = path.as_ref();
        let flow = Flow::load(path, &self.library)?;
        let base = match &self.settings.buffer_dir {
            Some(dir) => dir.clone(),
            None => path.parent().map(Path::to_path_buf).unwrap_or_default(),
        };
        let mut buffers = BufferStore::new();
        buffers.load_flow(&flow, &base)?;

        self.stop();
        self.flow = flow;
        self.buffers = buffers;
        self.path = Some(path.to_path_buf());
        self.watched.clear();
        Ok(())
    }

    /// Saves to `path`, or to the current path when `None`. Returns the
    /// path written.
    pub fn save(&mut self, path: Option<&Path>) -> Result<PathBuf> {
        let path = match path {
            Some(p) => p.to_path_buf(),
            None => self.path.clone().ok_or(Error::NoPath)?,
        };
        self.flow.save(&path)?;
        self.path = Some(path.clone());
        Ok(path)
    }

    /// Adds IR source (functions and aliases) to the library and returns the
    /// names defined. Nodes already using a redefined name pick it up on
    /// the next recompile.
    pub fn load_library_source(&mut self, text: &str) -> Result<Vec<String>> {
        let names = self.library.load_source(text)?;
        tracing::info!(count = names.len(), "library source loaded");
        self.recompile(true)?;
        Ok(names)
    }

    // --- editing ---

    /// Adds a node from function text or an `=` math expression.
    pub fn add_node(&mut self, text: &str) -> Result<NodeId> {
        let id = self.flow.add_node(text, &self.library)?;
        self.sync()?;
        Ok(id)
    }

    /// Removes a node and its edges.
    pub fn remove_node(&mut self, id: NodeId) -> Result<()> {
        self.flow.remove_node(id)?;
        self.watched.remove(&id.0);
        if let Some(running) = &mut self.running
            && let Some(watch) = running.watches.remove(&id.0)
        {
            running.handle.unwatch(watch);
        }
        self.sync()
    }

    /// Connects two ports.
    pub fn connect(&mut self, edge: Edge) -> Result<()> {
        self.flow.connect(edge, &self.library)?;
        self.sync()
    }

    /// Removes an edge.
    pub fn disconnect(&mut self, edge: Edge) -> Result<()> {
        self.flow.disconnect(edge)?;
        self.sync()
    }

    /// Moves a node. Does not recompile.
    pub fn move_node(&mut self, id: NodeId, x: f32, y: f32) -> Result<()> {
        Ok(self.flow.move_node(id, x, y)?)
    }

    /// Resizes a node. Does not recompile.
    pub fn resize_node(&mut self, id: NodeId, w: f32, h: f32) -> Result<()> {
        Ok(self.flow.resize_node(id, w, h)?)
    }

    /// Binds a buffer to a node's array field.
    pub fn set_buffer(&mut self, id: NodeId, buffer: Option<&str>) -> Result<()> {
        self.flow.set_buffer(id, buffer.map(str::to_owned))?;
        self.sync()
    }

    /// Loads a WAV file (or a built-in, for an empty path) as buffer `name`
    /// and declares it in the flow. Relative paths resolve against
    /// `buffer_dir`. Returns the number of samples.
    pub fn load_buffer(&mut self, name: &str, path: impl AsRef<Path>) -> Result<usize> {
        let path = path.as_ref();
        let resolved = if path.as_os_str().is_empty() {
            PathBuf::new()
        } else {
            self.settings.resolve_buffer(path)
        };
        let len = self.buffers.load(name, &resolved)?;
        self.flow.add_buffer(name, path);
        self.sync()?;
        Ok(len)
    }

    // --- compilation ---

    /// Lowers the flow against the session library.
    pub fn lower(&self) -> Result<Lowered> {
        Ok(lower(&self.flow, &self.library)?)
    }

    /// Initial values for every node: control values and bound buffers.
    pub fn presets(&self) -> DataPresets {
        let mut presets = DataPresets::new();
        for (id, node) in self.flow.nodes() {
            if let Some(value) = node.value {
                presets.set(id.0, Preset::Float(value));
            }
            if let Some(name) = &node.buffer {
                presets.set(id.0, Preset::Buffer(name.clone()));
                if let Some(data) = self.buffers.resolve(name) {
                    presets.insert_buffer(name.clone(), data);
                }
            }
        }
        presets
    }

    /// Renders `frames` frames offline on a fresh instance, independent of
    /// any live processing. `input` feeds the first flow inlet.
    pub fn render(
        &self,
        frames: usize,
        input: Option<&[f32]>,
        progress: impl FnMut(usize),
    ) -> Result<Vec<f32>> {
        let lowered = self.lower()?;
        let library = lowered.library(&self.library)?;
        let (handle, mut processor) =
            self.engine
                .instantiate(&lowered.function, &library, &self.presets())?;
        let output = render(
            &mut processor,
            input,
            frames,
            usize::from(self.settings.channels),
            self.settings.block_size,
            progress,
        );
        self.engine.destroy(&handle);
        Ok(output)
    }

    // --- processing ---

    /// Whether real-time processing is running.
    pub fn is_running(&self) -> bool {
        self.running.is_some()
    }

    /// Generation of the program the processor is running.
    pub fn generation(&self) -> Option<Generation> {
        self.running.as_ref().map(|r| r.handle.generation())
    }

    /// Compiles the flow and starts playing it through `backend`. Does
    /// nothing when already running.
    pub fn start(&mut self, backend: &dyn AudioBackend) -> Result<()> {
        if self.running.is_some() {
            return Ok(());
        }
        let lowered = self.lower()?;
        let library = lowered.library(&self.library)?;
        let (handle, mut processor) =
            self.engine
                .instantiate(&lowered.function, &library, &self.presets())?;

        let config = BackendStreamConfig::from(&self.settings);
        let actual = backend.actual_sample_rate(&config);
        if actual != config.sample_rate {
            tracing::warn!(
                requested = config.sample_rate,
                actual,
                "device sample rate differs from settings"
            );
        }
        let watches = self
            .watched
            .iter()
            .map(|&node| handle.watch(node).map(|id| (node, id)))
            .collect::<rill_engine::Result<BTreeMap<_, _>>>();
        let watches = match watches {
            Ok(watches) => watches,
            Err(e) => {
                self.engine.destroy(&handle);
                return Err(e.into());
            }
        };

        let channels = usize::from(config.channels);
        let stream = backend.build_output_stream(
            &config,
            Box::new(move |data: &mut [f32]| processor.process_block(&[], 0, data, channels)),
            Box::new(|message: &str| tracing::error!(error = message, "audio stream error")),
        );
        let stream = match stream {
            Ok(stream) => stream,
            Err(e) => {
                self.engine.destroy(&handle);
                return Err(e);
            }
        };

        tracing::info!(
            flow = self.flow.name(),
            backend = backend.name(),
            "processing started"
        );
        self.running = Some(Running {
            handle,
            watches,
            revision: self.flow.revision(),
            _stream: stream,
        });
        Ok(())
    }

    /// Stops processing. The stream is closed and the program released.
    pub fn stop(&mut self) {
        if let Some(running) = self.running.take() {
            self.engine.destroy(&running.handle);
            let handle = running.handle.clone();
            drop(running);
            handle.collect_garbage();
            tracing::info!(flow = self.flow.name(), "processing stopped");
        }
    }

    /// Recompiles when the flow changed since the running program was built.
    fn sync(&mut self) -> Result<()> {
        self.recompile(false)
    }

    fn recompile(&mut self, force: bool) -> Result<()> {
        let Some(revision) = self.running.as_ref().map(|r| r.revision) else {
            return Ok(());
        };
        if !force && revision == self.flow.revision() {
            return Ok(());
        }
        let lowered = self.lower()?;
        let library = lowered.library(&self.library)?;
        let presets = self.presets();
        if let Some(running) = &mut self.running {
            let generation =
                self.engine
                    .recompile(&running.handle, &lowered.function, &library, &presets)?;
            running.revision = self.flow.revision();
            tracing::debug!(%generation, nodes = lowered.order.len(), "flow recompiled");
        }
        self.attach_watches()
    }

    fn attach_watches(&mut self) -> Result<()> {
        let Some(running) = &mut self.running else {
            return Ok(());
        };
        for &node in &self.watched {
            if !running.watches.contains_key(&node) {
                let id = running.handle.watch(node)?;
                running.watches.insert(node, id);
            }
        }
        Ok(())
    }

    // --- controls ---

    /// Sets a control node's value, live when running. The value is kept
    /// on the node and saved with the flow.
    pub fn set_control(&mut self, node: u32, value: f32) -> Result<()> {
        self.flow.set_value(NodeId(node), Some(value))?;
        if let Some(running) = &self.running {
            running.handle.set_control(node, value)?;
        }
        Ok(())
    }

    /// Current value of a node's lag field: live when running, otherwise
    /// the stored node value.
    pub fn control_value(&self, node: u32) -> Option<f32> {
        match &self.running {
            Some(running) => running.handle.control_value(node),
            None => self.flow.node(NodeId(node))?.value,
        }
    }

    /// Starts collecting a node's values after every frame. Watches persist
    /// across recompiles and restarts.
    pub fn watch(&mut self, node: u32) -> Result<()> {
        let id = NodeId(node);
        if self.flow.node(id).is_none() {
            return Err(FlowError::UnknownNode(id).into());
        }
        if !self.flow.is_lag_capable(id, &self.library) {
            return Err(Error::NotWatchable(node));
        }
        self.watched.insert(node);
        self.attach_watches()
    }

    /// Stops watching a node. Returns whether it was watched.
    pub fn unwatch(&mut self, node: u32) -> bool {
        if let Some(running) = &mut self.running
            && let Some(id) = running.watches.remove(&node)
        {
            running.handle.unwatch(id);
        }
        self.watched.remove(&node)
    }

    /// Drains the values collected for `node` since the last call.
    pub fn drain_watch(&self, node: u32) -> Vec<f32> {
        let Some(running) = &self.running else {
            return Vec::new();
        };
        running.handle.collect_garbage();
        running
            .watches
            .get(&node)
            .map(|id| running.handle.get_watch_updates(*id))
            .unwrap_or_default()
    }

    /// Binds the next controller event to `node`. Bindings last until
    /// processing stops.
    pub fn learn(&self, node: u32) -> Result<()> {
        if self.flow.node(NodeId(node)).is_none() {
            return Err(FlowError::UnknownNode(NodeId(node)).into());
        }
        if let Some(running) = &self.running {
            running.handle.learn(node);
        }
        Ok(())
    }

    /// Routes a MIDI-style controller event. Returns the node and value set,
    /// if the event is bound.
    pub fn controller_event(&mut self, channel: u8, controller: u8, value: u8) -> Option<(u32, f32)> {
        let (node, value) = self
            .running
            .as_ref()?
            .handle
            .controller_event(channel, controller, value)?;
        // The node may have been removed since it was bound.
        self.flow.set_value(NodeId(node), Some(value)).ok()?;
        Some((node, value))
    }

    // --- metadata ---

    /// Metadata of a library function or alias.
    pub fn function_info(&self, name: &str) -> Option<FunctionInfo> {
        self.library.info(name)
    }

    /// Metadata of every library function and alias, sorted by name.
    pub fn functions(&self) -> Vec<FunctionInfo> {
        self.library.infos()
    }

    /// Metadata of the function a node runs. Boundary nodes have none.
    pub fn node_info(&self, id: NodeId) -> Option<FunctionInfo> {
        let node = self.flow.node(id)?;
        match &node.kind {
            NodeKind::Function(name) => self.library.info(name),
            NodeKind::Math(func) => Some(func.info_as(&node.text)),
            NodeKind::Inputs | NodeKind::Outputs => None,
        }
    }
}

impl Drop for Session {
    fn drop(&mut self) {
        self.stop();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn session() -> Session {
        let settings = EngineSettings {
            backend: "interpreter".into(),
            channels: 1,
            block_size: 4,
            ..Default::default()
        };
        Session::new(settings).unwrap()
    }

    #[test]
    fn presets_carry_values_and_buffers() {
        let mut s = session();
        let control = s.add_node("control").unwrap();
        let buf = s.add_node("buffer").unwrap();
        s.set_control(control.0, 0.75).unwrap();
        s.set_buffer(buf, Some("sine")).unwrap();

        let presets = s.presets();
        assert!(matches!(presets.get(control.0), Some(Preset::Float(v)) if *v == 0.75));
        assert!(matches!(presets.get(buf.0), Some(Preset::Buffer(n)) if n == "sine"));
        assert_eq!(presets.buffer("sine").unwrap().len(), crate::SINE_LENGTH);
    }

    #[test]
    fn control_value_reads_node_when_stopped() {
        let mut s = session();
        let control = s.add_node("control").unwrap();
        assert_eq!(s.control_value(control.0), None);
        s.set_control(control.0, 0.5).unwrap();
        assert_eq!(s.control_value(control.0), Some(0.5));
        assert!(s.set_control(99, 1.0).is_err());
    }

    #[test]
    fn only_lag_nodes_are_watchable() {
        let mut s = session();
        let math = s.add_node("= $0 + 1").unwrap();
        let lag = s.add_node("lag").unwrap();
        assert!(matches!(s.watch(math.0), Err(Error::NotWatchable(_))));
        assert!(matches!(s.watch(42), Err(Error::Flow(FlowError::UnknownNode(_)))));
        s.watch(lag.0).unwrap();
        assert!(s.unwatch(lag.0));
        assert!(!s.unwatch(lag.0));
    }

    #[test]
    fn save_without_path_fails() {
        let mut s = session();
        assert!(matches!(s.save(None), Err(Error::NoPath)));
    }

    #[test]
    fn node_info_covers_math_and_functions() {
        let mut s = session();
        let input = s.add_node("inputs").unwrap();
        let lag = s.add_node("lag").unwrap();
        let math = s.add_node("= $0 * $1").unwrap();
        assert!(s.node_info(input).is_none());
        assert!(s.node_info(lag).unwrap().lag_capable);
        let info = s.node_info(math).unwrap();
        assert_eq!(info.inlets.len(), 2);
        assert_eq!(info.outlets.len(), 1);
        assert!(!info.lag_capable);
    }

    #[test]
    fn offline_render_uses_block_size_and_channels() {
        let mut s = session();
        let control = s.add_node("control").unwrap();
        let out = s.add_node("outputs").unwrap();
        s.connect(Edge::new(control, 0, out, 0)).unwrap();
        s.set_control(control.0, 2.0).unwrap();

        let mut progress = Vec::new();
        let rendered = s.render(6, None, |n| progress.push(n)).unwrap();
        assert_eq!(rendered, vec![1.0; 6], "clamped to full scale");
        assert_eq!(progress, vec![4, 6]);
    }
}
