//! The seam between the engine and its code generators.
//!
//! A [`Backend`] turns a resolved [`Program`] into a [`Routine`]; the engine
//! never looks inside either. Both backends must produce bit-identical
//! results for the same IR.

use std::fmt;
use std::sync::Arc;
use std::sync::atomic::AtomicU32;

use crate::arrays::ArrayTable;
use crate::error::Result;
use crate::layout::Program;

/// Per-instance state a routine runs against.
pub struct Context<'a> {
    /// The data segment, one 32-bit cell per slot.
    pub data: &'a [AtomicU32],
    /// Buffers behind array handles.
    pub arrays: &'a mut ArrayTable,
}

/// Compiled code for one program.
pub trait Routine: Send {
    /// Runs one frame. `inputs` holds one value per entry inlet and
    /// `outputs` one per entry outlet; the caller guarantees both lengths.
    ///
    /// Must not allocate, block or panic.
    fn run(&mut self, ctx: &mut Context<'_>, inputs: &[f32], outputs: &mut [f32]);
}

/// A code generator.
pub trait Backend: Send + Sync + fmt::Debug {
    /// Short name for logs.
    fn name(&self) -> &'static str;

    /// Compiles `program`. Called off the real-time thread.
    fn compile(&self, program: &Program) -> Result<Box<dyn Routine>>;
}

/// Backend selection for configuration and the CLI.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum BackendKind {
    /// Tree-walking interpreter.
    Interpreter,
    /// Cranelift native code; falls back to the interpreter when the `jit`
    /// feature is disabled.
    #[default]
    Jit,
}

/// Cranelift optimisation level.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum OptLevel {
    /// No optimisation; fastest compiles.
    None,
    /// Optimise for speed.
    #[default]
    Speed,
    /// Optimise for speed and code size.
    SpeedAndSize,
}

impl OptLevel {
    /// Value of Cranelift's `opt_level` setting.
    pub fn as_str(self) -> &'static str {
        match self {
            Self::None => "none",
            Self::Speed => "speed",
            Self::SpeedAndSize => "speed_and_size",
        }
    }
}

impl BackendKind {
    /// Instantiates the backend.
    pub fn create(self, opt_level: OptLevel) -> Arc<dyn Backend> {
        match self {
            Self::Interpreter => Arc::new(crate::interp::Interpreter),
            #[cfg(feature = "jit")]
            Self::Jit => Arc::new(crate::jit::Jit::new(opt_level)),
            #[cfg(not(feature = "jit"))]
            Self::Jit => {
                let _ = opt_level;
                tracing::warn!("built without the jit feature, using the interpreter");
                Arc::new(crate::interp::Interpreter)
            }
        }
    }
}

impl std::str::FromStr for BackendKind {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s {
            "interpreter" | "interp" => Ok(Self::Interpreter),
            "jit" => Ok(Self::Jit),
            other => Err(format!("unknown backend '{other}' (expected jit or interpreter)")),
        }
    }
}

impl std::str::FromStr for OptLevel {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s {
            "none" => Ok(Self::None),
            "speed" => Ok(Self::Speed),
            "speed_and_size" => Ok(Self::SpeedAndSize),
            other => Err(format!("unknown optimisation level '{other}'")),
        }
    }
}
