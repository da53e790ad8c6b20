//! One compiled, initialised program and its state.

use std::collections::{BTreeMap, HashMap};
use std::fmt;
use std::sync::Arc;
use std::sync::atomic::{AtomicU32, Ordering};

use rill_ir::{DataType, IrFunction, Library, validate};

use crate::arrays::ArrayTable;
use crate::error::{EngineError, Result};
use crate::layout::{Layout, Program};
use crate::program::{Backend, Context, Routine};

/// Identifies one compiled instance of a handle. Starts at 0 and grows by
/// one per recompile.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default)]
pub struct Generation(pub u64);

impl fmt::Display for Generation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "gen {}", self.0)
    }
}

/// Initial value of a top-level call's state.
#[derive(Debug, Clone, PartialEq)]
pub enum Preset {
    /// Written to the call's lag field.
    Float(f32),
    /// Bound to the call's first array field.
    Buffer(String),
}

/// Presets keyed by top-level call id (the node id, for lowered flows) plus
/// the buffers they may name.
#[derive(Debug, Clone, Default)]
pub struct DataPresets {
    values: BTreeMap<u32, Preset>,
    buffers: HashMap<String, Arc<[f32]>>,
}

impl DataPresets {
    /// No presets.
    pub fn new() -> Self {
        Self::default()
    }

    /// Sets the preset of call `node`.
    pub fn set(&mut self, node: u32, preset: Preset) -> &mut Self {
        self.values.insert(node, preset);
        self
    }

    /// Makes a buffer available to [`Preset::Buffer`].
    pub fn insert_buffer(&mut self, name: impl Into<String>, samples: Arc<[f32]>) -> &mut Self {
        self.buffers.insert(name.into(), samples);
        self
    }

    /// Preset of call `node`.
    pub fn get(&self, node: u32) -> Option<&Preset> {
        self.values.get(&node)
    }

    /// Samples of the buffer called `name`.
    pub fn buffer(&self, name: &str) -> Option<&Arc<[f32]>> {
        self.buffers.get(name)
    }
}

/// Layout and data segment of an instance, shared with the control side.
#[derive(Debug)]
pub(crate) struct Binding {
    pub layout: Layout,
    pub data: Box<[AtomicU32]>,
}

impl Binding {
    pub fn read(&self, slot: usize) -> f32 {
        f32::from_bits(self.data[slot].load(Ordering::Relaxed))
    }

    /// Writes a float slot. Array slots are left alone.
    pub fn write(&self, slot: usize, value: f32) -> bool {
        match self.layout.slots().get(slot) {
            Some(s) if s.data_type == DataType::Float => {
                self.data[slot].store(value.to_bits(), Ordering::Relaxed);
                true
            }
            _ => false,
        }
    }
}

pub(crate) struct Instance {
    pub generation: Generation,
    pub binding: Arc<Binding>,
    routine: Box<dyn Routine>,
    arrays: ArrayTable,
    inputs: Box<[f32]>,
    outputs: Box<[f32]>,
}

impl Instance {
    /// Resolves, lays out, compiles and initialises `function`.
    pub fn build(
        function: &IrFunction,
        library: &Library,
        presets: &DataPresets,
        backend: &dyn Backend,
        sample_rate: f32,
        generation: Generation,
    ) -> Result<Self> {
        let program = Program::resolve(function, library, sample_rate)?;
        validate(function, Some(library))?;
        let layout = program.layout();

        let data: Box<[AtomicU32]> = layout
            .slots()
            .iter()
            .map(|s| AtomicU32::new(s.default.to_bits()))
            .collect();
        let mut arrays = ArrayTable::new();

        for (&node, preset) in &presets.values {
            let Some(call) = layout.call(node) else {
                tracing::debug!(node, "preset for a missing call ignored");
                continue;
            };
            match preset {
                Preset::Float(value) => {
                    let slot = call.lag.ok_or_else(|| {
                        EngineError::mismatch(format!(
                            "call {node} ('{}') has no lag field for a value preset",
                            call.function
                        ))
                    })?;
                    data[slot].store(value.to_bits(), Ordering::Relaxed);
                }
                Preset::Buffer(name) => {
                    let slot = call.array.ok_or_else(|| {
                        EngineError::mismatch(format!(
                            "call {node} ('{}') has no array field for buffer '{name}'",
                            call.function
                        ))
                    })?;
                    let samples = presets
                        .buffer(name)
                        .ok_or_else(|| EngineError::UnknownBuffer(name.clone()))?;
                    let handle = arrays.push_named(name, samples);
                    data[slot].store(handle, Ordering::Relaxed);
                }
            }
        }

        let routine = backend.compile(&program)?;
        let entry = program.entry_function();
        tracing::debug!(
            backend = backend.name(),
            slots = layout.len(),
            buffers = arrays.len() - 1,
            %generation,
            "instance built"
        );

        Ok(Self {
            generation,
            binding: Arc::new(Binding { layout, data }),
            routine,
            arrays,
            inputs: vec![0.0; entry.ir.inlets.len()].into_boxed_slice(),
            outputs: vec![0.0; entry.ir.outlets.len()].into_boxed_slice(),
        })
    }

    pub fn inlet_count(&self) -> usize {
        self.inputs.len()
    }

    pub fn outlet_count(&self) -> usize {
        self.outputs.len()
    }

    /// Runs one frame. Missing inputs read as 0; surplus outputs are zeroed.
    #[inline]
    pub fn run_frame(&mut self, inputs: &[f32], outputs: &mut [f32]) {
        let n = inputs.len().min(self.inputs.len());
        self.inputs[..n].copy_from_slice(&inputs[..n]);
        self.inputs[n..].fill(0.0);

        let mut ctx = Context {
            data: &self.binding.data,
            arrays: &mut self.arrays,
        };
        self.routine.run(&mut ctx, &self.inputs, &mut self.outputs);

        let m = outputs.len().min(self.outputs.len());
        outputs[..m].copy_from_slice(&self.outputs[..m]);
        outputs[m..].fill(0.0);
    }

    /// Copies every float slot whose key `old` also has, and the contents of
    /// named buffers of unchanged length. Runs on the real-time thread at
    /// install; does not allocate.
    pub fn migrate_from(&mut self, old: &Instance) {
        self.arrays.copy_named_from(&old.arrays);
        let (new, old) = (&self.binding, &old.binding);
        for (i, slot) in new.layout.slots().iter().enumerate() {
            if slot.data_type != DataType::Float {
                continue;
            }
            if let Some(j) = old.layout.slot(&slot.key)
                && old.layout.slots()[j].data_type == DataType::Float
            {
                let bits = old.data[j].load(Ordering::Relaxed);
                new.data[i].store(bits, Ordering::Relaxed);
            }
        }
    }
}

impl fmt::Debug for Instance {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Instance")
            .field("generation", &self.generation)
            .field("slots", &self.binding.layout.len())
            .finish_non_exhaustive()
    }
}
