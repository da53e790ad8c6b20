//! CLI command implementations.

pub mod common;
pub mod config;
pub mod devices;
pub mod eval;
pub mod functions;
pub mod ir;
pub mod play;
pub mod render;
