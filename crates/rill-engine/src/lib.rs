//! rill engine - compiled execution of rill IR with state-preserving hot swap
//!
//! A function and its library are resolved into a [`Program`], laid out as
//! one data segment of 32-bit slots, compiled by a [`Backend`] and run frame
//! by frame by a [`Processor`]. The control side keeps an
//! [`ExecutionHandle`] to recompile, set controls and watch values while
//! the processor runs on the audio thread.
//!
//! # Backends
//!
//! - [`Interpreter`] - always available
//! - `Jit` - Cranelift native code (feature `jit`, on by default)
//!
//! Both produce identical output for the same IR.
//!
//! # Example
//!
//! ```rust
//! use std::sync::Arc;
//! use rill_engine::{DataPresets, Engine, Interpreter};
//! use rill_ir::{Library, compile_expression};
//!
//! let library = Library::core().unwrap();
//! let double = compile_expression("double", "= $0 * 2", None).unwrap();
//!
//! let engine = Engine::new(Arc::new(Interpreter), 48000.0);
//! let (_handle, mut processor) = engine
//!     .instantiate(&double, &library, &DataPresets::new())
//!     .unwrap();
//!
//! let mut out = [0.0];
//! processor.run(&[0.25], &mut out);
//! assert_eq!(out, [0.5]);
//! ```

pub mod arrays;
pub mod engine;
pub mod error;
pub mod instance;
pub mod interp;
#[cfg(feature = "jit")]
pub mod jit;
pub mod layout;
pub mod learn;
pub mod program;
pub mod watch;

pub use arrays::ArrayTable;
pub use engine::{Engine, ExecutionHandle, Processor};
pub use error::{EngineError, Result};
pub use instance::{DataPresets, Generation, Preset};
pub use interp::Interpreter;
#[cfg(feature = "jit")]
pub use jit::Jit;
pub use layout::{Layout, Program, Slot};
pub use learn::LearnTable;
pub use program::{Backend, BackendKind, Context, OptLevel, Routine};
pub use watch::{DEFAULT_WATCH_CAPACITY, WatchId};
