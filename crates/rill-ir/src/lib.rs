//! rill IR - the intermediate representation every rill program compiles to
//!
//! Flow graphs, math expressions and hand-written IR text all end up as
//! [`IrFunction`]s: typed inlets and outlets, a persistent data segment and a
//! flat list of [`Instruction`]s. The engine crate lays out and executes
//! them; this crate only describes and checks them.
//!
//! # Modules
//!
//! - [`ir`] - instruction set and reference types
//! - [`function`] - functions, inlets, outlets and metadata
//! - [`parse`] / `print` - the IR text syntax, in both directions
//! - [`validate()`] - structural checks (types, outlets on every path)
//! - [`Library`] - named functions and aliases, including the core primitives
//! - [`math`] - the `= $0 * 2` expression compiler
//!
//! # Example
//!
//! ```rust
//! use rill_ir::{Library, compile_expression, validate};
//!
//! let library = Library::core().unwrap();
//! let func = compile_expression("half", "= $0 * 0.5", None).unwrap();
//! validate(&func, Some(&library)).unwrap();
//! assert!(library.info("lag").unwrap().lag_capable);
//! ```
//!
//! # Features
//!
//! - `tracing` - emit `debug!` events for library loads and math compiles

pub mod error;
pub mod function;
pub mod ir;
pub mod library;
pub mod math;
pub mod parse;
mod print;
pub mod validate;

pub use error::{IrError, MathError};
pub use function::{Fallback, Field, FunctionInfo, Inlet, IrFunction, LagAttr, Outlet, PortInfo};
pub use ir::{
    BinaryOp, CallId, CompareOp, Constant, DataRef, DataType, Instruction, LocalRef, Operand,
    OutletRef, Source, Target, VarRef, walk_body,
};
pub use library::{BOUNDARY_NAMES, CORE_SOURCE, Library};
pub use math::{Expr, MathExpression, MathOp, compile_expression};
pub use parse::{Item, parse_function, parse_source};
pub use validate::validate;
