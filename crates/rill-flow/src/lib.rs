//! rill flow - signal-flow graphs and their lowering to IR
//!
//! A [`Flow`] is a set of nodes (library functions, inline math expressions
//! and the `inputs` / `outputs` boundary markers) joined by port-to-port
//! [`Edge`]s. Connections are checked when made; [`lower()`] turns the whole
//! graph into one [`IrFunction`](rill_ir::IrFunction) whose calls are the
//! nodes, in dependency order.
//!
//! Cycles are legal only through lag-capable nodes (those whose function
//! declares an `@lag` field); everything else is
//! [`FlowError::CyclicGraph`].
//!
//! # Example
//!
//! ```rust
//! use rill_flow::{Edge, Flow, lower};
//! use rill_ir::Library;
//!
//! let library = Library::core().unwrap();
//! let mut flow = Flow::new("main");
//! let input = flow.add_node("inputs", &library).unwrap();
//! let lag = flow.add_node("lag", &library).unwrap();
//! let output = flow.add_node("outputs", &library).unwrap();
//! flow.connect(Edge::new(input, 0, lag, 0), &library).unwrap();
//! flow.connect(Edge::new(lag, 0, output, 0), &library).unwrap();
//!
//! let lowered = lower(&flow, &library).unwrap();
//! assert_eq!(lowered.function.name, "main");
//! ```

pub mod error;
pub mod file;
pub mod graph;
pub mod lower;

pub use error::{FlowError, Result};
pub use graph::{BufferSource, Edge, Flow, Node, NodeId, NodeKind};
pub use lower::{Lowered, lower};
