//! Instantiation, hot swap and control of running programs.
//!
//! [`Engine::instantiate`] splits a program into two halves:
//!
//! - [`ExecutionHandle`] stays on the control side: it recompiles, sets
//!   controls and drains watches.
//! - [`Processor`] moves to the real-time thread and runs frames.
//!
//! A recompile builds the new instance on the calling thread and stages it
//! through an `ArcSwapOption`. The processor takes it at the start of its
//! next call, copies the state of every float slot whose key both layouts
//! share, and sends the previous instance back through a bounded graveyard
//! channel so its memory is freed off the real-time thread. Staging again
//! before the processor runs replaces the staged instance, which is then
//! dropped without ever running.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicU32, AtomicU64, Ordering};

use arc_swap::{ArcSwap, ArcSwapOption};
use crossbeam_channel::{Receiver, Sender, bounded};
use parking_lot::Mutex;
use rill_ir::{IrFunction, Library};

use crate::error::{EngineError, Result};
use crate::instance::{Binding, DataPresets, Generation, Instance};
use crate::learn::LearnTable;
use crate::program::Backend;
use crate::watch::{DEFAULT_WATCH_CAPACITY, Watch, WatchId};

/// Retired instances waiting to be dropped by the control side.
const GRAVEYARD_CAPACITY: usize = 16;

/// Compiles and hot-swaps programs on one backend.
#[derive(Debug, Clone)]
pub struct Engine {
    backend: Arc<dyn Backend>,
    sample_rate: f32,
    watch_capacity: usize,
}

struct Staged {
    generation: Generation,
    binding: Arc<Binding>,
    instance: Mutex<Option<Instance>>,
}

/// Garbage handed from the processor to the control side.
struct Retired {
    _instance: Option<Instance>,
    _staged: Option<Arc<Staged>>,
}

struct Shared {
    active: ArcSwap<Binding>,
    active_generation: AtomicU64,
    staged: ArcSwapOption<Staged>,
    next_generation: AtomicU64,
    destroyed: AtomicBool,
    graveyard_tx: Sender<Retired>,
    graveyard_rx: Receiver<Retired>,
    /// Retired instances dropped on the real-time thread because the
    /// graveyard was full.
    overflowed: AtomicU32,
    watches: ArcSwap<Vec<Arc<Watch>>>,
    watch_capacity: usize,
    /// Serialises edits of the watch list and hands out ids.
    next_watch: Mutex<u32>,
    learn: Mutex<LearnTable>,
}

impl Engine {
    /// Creates an engine running `backend` at `sample_rate`.
    pub fn new(backend: Arc<dyn Backend>, sample_rate: f32) -> Self {
        Self {
            backend,
            sample_rate,
            watch_capacity: DEFAULT_WATCH_CAPACITY,
        }
    }

    /// Sets the capacity of watch rings created from now on.
    pub fn with_watch_capacity(mut self, capacity: usize) -> Self {
        self.watch_capacity = capacity.max(1);
        self
    }

    /// The backend in use.
    pub fn backend(&self) -> &dyn Backend {
        self.backend.as_ref()
    }

    /// Value of the `SampleRate` constant for programs built here.
    pub fn sample_rate(&self) -> f32 {
        self.sample_rate
    }

    /// Compiles `function` and returns its control and real-time halves.
    pub fn instantiate(
        &self,
        function: &IrFunction,
        library: &Library,
        presets: &DataPresets,
    ) -> Result<(ExecutionHandle, Processor)> {
        let instance = Instance::build(
            function,
            library,
            presets,
            self.backend.as_ref(),
            self.sample_rate,
            Generation(0),
        )?;
        let (graveyard_tx, graveyard_rx) = bounded(GRAVEYARD_CAPACITY);
        let shared = Arc::new(Shared {
            active: ArcSwap::new(Arc::clone(&instance.binding)),
            active_generation: AtomicU64::new(0),
            staged: ArcSwapOption::empty(),
            next_generation: AtomicU64::new(1),
            destroyed: AtomicBool::new(false),
            graveyard_tx,
            graveyard_rx,
            overflowed: AtomicU32::new(0),
            watches: ArcSwap::from_pointee(Vec::new()),
            watch_capacity: self.watch_capacity,
            next_watch: Mutex::new(0),
            learn: Mutex::new(LearnTable::new()),
        });

        tracing::info!(
            function = %function.name,
            backend = self.backend.name(),
            "program instantiated"
        );
        Ok((
            ExecutionHandle {
                shared: Arc::clone(&shared),
            },
            Processor {
                shared,
                current: Some(instance),
            },
        ))
    }

    /// Compiles `function` and stages it on `handle`'s processor.
    ///
    /// On error nothing is staged and the running instance is untouched.
    pub fn recompile(
        &self,
        handle: &ExecutionHandle,
        function: &IrFunction,
        library: &Library,
        presets: &DataPresets,
    ) -> Result<Generation> {
        let shared = &handle.shared;
        if shared.destroyed.load(Ordering::Acquire) {
            return Err(EngineError::Destroyed);
        }
        handle.collect_garbage();

        let generation = Generation(shared.next_generation.fetch_add(1, Ordering::Relaxed));
        let instance = Instance::build(
            function,
            library,
            presets,
            self.backend.as_ref(),
            self.sample_rate,
            generation,
        )?;
        let staged = Arc::new(Staged {
            generation,
            binding: Arc::clone(&instance.binding),
            instance: Mutex::new(Some(instance)),
        });

        if let Some(previous) = shared.staged.swap(Some(staged)) {
            tracing::warn!(
                superseded = %previous.generation,
                by = %generation,
                "staged instance superseded before it ran"
            );
        }
        tracing::info!(function = %function.name, %generation, "program staged");
        Ok(generation)
    }

    /// Retires `handle`. Its processor outputs silence from its next call.
    pub fn destroy(&self, handle: &ExecutionHandle) {
        let shared = &handle.shared;
        if shared.destroyed.swap(true, Ordering::AcqRel) {
            return;
        }
        drop(shared.staged.swap(None));
        handle.collect_garbage();
        tracing::info!("execution handle destroyed");
    }
}

// ---------------------------------------------------------------------------
// Control side
// ---------------------------------------------------------------------------

/// Control-side half of a running program.
///
/// Controls and data slots are addressed through the active layout; a node
/// that only exists in a staged, not yet installed instance is addressed
/// through the staged layout.
#[derive(Clone)]
pub struct ExecutionHandle {
    shared: Arc<Shared>,
}

impl std::fmt::Debug for ExecutionHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ExecutionHandle")
            .field("generation", &self.generation())
            .field("destroyed", &self.is_destroyed())
            .finish_non_exhaustive()
    }
}

impl ExecutionHandle {
    /// Generation of the instance the processor is running.
    pub fn generation(&self) -> Generation {
        Generation(self.shared.active_generation.load(Ordering::Acquire))
    }

    /// Whether [`Engine::destroy`] was called.
    pub fn is_destroyed(&self) -> bool {
        self.shared.destroyed.load(Ordering::Acquire)
    }

    fn check(&self) -> Result<()> {
        if self.is_destroyed() {
            Err(EngineError::Destroyed)
        } else {
            Ok(())
        }
    }

    /// Runs `f` on the first binding (active, then staged) where `find`
    /// locates a slot.
    fn with_slot<T>(
        &self,
        find: impl Fn(&Binding) -> Option<usize>,
        f: impl FnOnce(&Binding, usize) -> T,
    ) -> Option<T> {
        let active = self.shared.active.load();
        if let Some(slot) = find(&active) {
            return Some(f(&active, slot));
        }
        let staged = self.shared.staged.load_full()?;
        let slot = find(&staged.binding)?;
        Some(f(&staged.binding, slot))
    }

    /// Writes `value` through [`Self::with_slot`], repeating the write until
    /// the active binding is the same before and after it. An install that
    /// migrates state between the lookup and the store would otherwise drop
    /// the write.
    fn write_slot(&self, find: impl Fn(&Binding) -> Option<usize>, value: f32) -> Option<bool> {
        loop {
            let before = self.shared.active.load_full();
            let written = self.with_slot(&find, |b, slot| b.write(slot, value));
            if Arc::ptr_eq(&before, &self.shared.active.load()) {
                return written;
            }
        }
    }

    /// Stores `value` into the lag field of node `node`.
    pub fn set_control(&self, node: u32, value: f32) -> Result<()> {
        self.check()?;
        self.write_slot(|b| b.layout.lag_slot(node), value)
            .filter(|written| *written)
            .map(|_| ())
            .ok_or(EngineError::UnknownNode(node))
    }

    /// Current value of node `node`'s lag field.
    pub fn control_value(&self, node: u32) -> Option<f32> {
        self.with_slot(|b| b.layout.lag_slot(node), |b, slot| b.read(slot))
    }

    /// Stores `value` into the float slot `key`.
    pub fn set_data(&self, key: &str, value: f32) -> Result<()> {
        self.check()?;
        match self.write_slot(|b| b.layout.slot(key), value) {
            Some(true) => Ok(()),
            Some(false) => Err(EngineError::mismatch(format!("slot '{key}' is not a float"))),
            None => Err(EngineError::UnknownSlot(key.to_owned())),
        }
    }

    /// Current value of the slot `key`.
    pub fn data_value(&self, key: &str) -> Option<f32> {
        self.with_slot(|b| b.layout.slot(key), |b, slot| b.read(slot))
    }

    /// Keys of every slot in the active layout.
    pub fn slot_keys(&self) -> Vec<String> {
        let active = self.shared.active.load();
        active.layout.slots().iter().map(|s| s.key.clone()).collect()
    }

    /// Starts sampling node `node`'s lag field after every frame.
    pub fn watch(&self, node: u32) -> Result<WatchId> {
        self.check()?;
        if self.with_slot(|b| b.layout.lag_slot(node), |_, _| ()).is_none() {
            return Err(EngineError::UnknownNode(node));
        }
        let mut next = self.shared.next_watch.lock();
        let id = WatchId(*next);
        *next += 1;

        let watch = Arc::new(Watch::new(id, node, self.shared.watch_capacity));
        let mut list = Vec::clone(&self.shared.watches.load());
        list.push(watch);
        self.shared.watches.store(Arc::new(list));
        tracing::debug!(node, watch = id.0, "watch added");
        Ok(id)
    }

    /// Stops a watch. Returns whether it existed.
    pub fn unwatch(&self, id: WatchId) -> bool {
        let _guard = self.shared.next_watch.lock();
        let current = self.shared.watches.load();
        if !current.iter().any(|w| w.id == id) {
            return false;
        }
        let list = current.iter().filter(|w| w.id != id).cloned().collect();
        self.shared.watches.store(Arc::new(list));
        true
    }

    /// Drains the samples collected for `id` since the last call. Unknown
    /// ids yield nothing.
    pub fn get_watch_updates(&self, id: WatchId) -> Vec<f32> {
        self.shared
            .watches
            .load()
            .iter()
            .find(|w| w.id == id)
            .map(|w| w.drain())
            .unwrap_or_default()
    }

    /// Binds the next controller event to node `node`.
    pub fn learn(&self, node: u32) {
        self.shared.learn.lock().learn(node);
    }

    /// Routes a controller event through the learn table, setting the bound
    /// control. Returns the node and value that were set.
    pub fn controller_event(&self, channel: u8, controller: u8, value: u8) -> Option<(u32, f32)> {
        let (node, value) = self.shared.learn.lock().handle(channel, controller, value)?;
        self.set_control(node, value).ok()?;
        Some((node, value))
    }

    /// A copy of the learn table.
    pub fn learn_table(&self) -> LearnTable {
        self.shared.learn.lock().clone()
    }

    /// Drops instances retired by the processor. Returns how many.
    pub fn collect_garbage(&self) -> usize {
        let count = self.shared.graveyard_rx.try_iter().count();
        let overflowed = self.shared.overflowed.swap(0, Ordering::Relaxed);
        if overflowed > 0 {
            tracing::warn!(
                overflowed,
                "graveyard full, instances were freed on the real-time thread"
            );
        }
        if count > 0 {
            tracing::debug!(count, "retired instances dropped");
        }
        count
    }
}

// ---------------------------------------------------------------------------
// Real-time side
// ---------------------------------------------------------------------------

/// Real-time half of a running program.
///
/// [`run`](Self::run) and [`process_block`](Self::process_block) never
/// allocate, lock or log. Each call runs a single instance throughout.
pub struct Processor {
    shared: Arc<Shared>,
    current: Option<Instance>,
}

impl std::fmt::Debug for Processor {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Processor")
            .field("current", &self.current)
            .finish_non_exhaustive()
    }
}

/// Clamps to [-1, 1] and silences NaN.
#[inline]
fn sanitize(x: f32) -> f32 {
    if x.is_nan() { 0.0 } else { x.clamp(-1.0, 1.0) }
}

impl Processor {
    /// Generation of the running instance, `None` once destroyed.
    pub fn generation(&self) -> Option<Generation> {
        self.current.as_ref().map(|i| i.generation)
    }

    /// Number of inputs per frame.
    pub fn inlet_count(&self) -> usize {
        self.current.as_ref().map_or(0, Instance::inlet_count)
    }

    /// Number of outputs per frame.
    pub fn outlet_count(&self) -> usize {
        self.current.as_ref().map_or(0, Instance::outlet_count)
    }

    fn retire(&self, instance: Option<Instance>, staged: Option<Arc<Staged>>) {
        if instance.is_none() && staged.is_none() {
            return;
        }
        let retired = Retired {
            _instance: instance,
            _staged: staged,
        };
        if self.shared.graveyard_tx.try_send(retired).is_err() {
            self.shared.overflowed.fetch_add(1, Ordering::Relaxed);
        }
    }

    /// Installs a staged instance or handles destruction. Returns whether an
    /// instance is available to run.
    fn begin_call(&mut self) -> bool {
        if self.shared.destroyed.load(Ordering::Acquire) {
            let staged = self.shared.staged.swap(None);
            let current = self.current.take();
            self.retire(current, staged);
            return false;
        }

        if let Some(staged) = self.shared.staged.swap(None) {
            let next = staged.instance.try_lock().and_then(|mut slot| slot.take());
            match next {
                Some(mut next) => {
                    if let Some(old) = &self.current {
                        next.migrate_from(old);
                    }
                    self.shared.active.store(Arc::clone(&next.binding));
                    self.shared
                        .active_generation
                        .store(next.generation.0, Ordering::Release);
                    let old = self.current.replace(next);
                    self.retire(old, Some(staged));
                }
                None => self.retire(None, Some(staged)),
            }
        }
        self.current.is_some()
    }

    /// Runs one frame. Outputs are raw (no clamping); missing inputs read
    /// as 0. Silent after the handle is destroyed.
    pub fn run(&mut self, inputs: &[f32], outputs: &mut [f32]) {
        if !self.begin_call() {
            outputs.fill(0.0);
            return;
        }
        let watches = self.shared.watches.load();
        if let Some(instance) = self.current.as_mut() {
            instance.run_frame(inputs, outputs);
            for watch in watches.iter() {
                watch.sample(&instance.binding);
            }
        }
    }

    /// Runs every frame of an interleaved block. `output.len() / out_channels`
    /// frames are produced; outputs are clamped to [-1, 1] with NaN silenced.
    pub fn process_block(
        &mut self,
        input: &[f32],
        in_channels: usize,
        output: &mut [f32],
        out_channels: usize,
    ) {
        if !self.begin_call() || out_channels == 0 {
            output.fill(0.0);
            return;
        }
        let watches = self.shared.watches.load();
        let Some(instance) = self.current.as_mut() else {
            return;
        };

        for (frame, out) in output.chunks_exact_mut(out_channels).enumerate() {
            let start = frame * in_channels;
            let inp = input.get(start..start + in_channels).unwrap_or(&[]);
            instance.run_frame(inp, out);
            for sample in out.iter_mut() {
                *sample = sanitize(*sample);
            }
            for watch in watches.iter() {
                watch.sample(&instance.binding);
            }
        }
    }
}
