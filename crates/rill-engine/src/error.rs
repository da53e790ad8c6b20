//! Error types for instantiation, compilation and control.

use rill_ir::IrError;
use thiserror::Error;

/// Errors raised by the engine.
#[derive(Debug, Error)]
pub enum EngineError {
    /// A call names a function the library does not define.
    #[error("unknown function: {0}")]
    UnknownFunction(String),

    /// A function calls itself, directly or through other functions.
    #[error("recursive call through '{0}'")]
    RecursiveCall(String),

    /// A port, preset or slot has the wrong type for its use.
    #[error("type mismatch: {0}")]
    TypeMismatch(String),

    /// A preset names a buffer that was not provided.
    #[error("unknown buffer: {0}")]
    UnknownBuffer(String),

    /// No top-level call with a lag field has this node id.
    #[error("node {0} has no control field")]
    UnknownNode(u32),

    /// No data slot has this key.
    #[error("unknown data slot: {0}")]
    UnknownSlot(String),

    /// The entry function failed validation.
    #[error(transparent)]
    Invalid(#[from] IrError),

    /// The backend failed to generate code.
    #[error("code generation failed: {0}")]
    Codegen(String),

    /// The handle was destroyed.
    #[error("execution handle destroyed")]
    Destroyed,
}

impl EngineError {
    pub(crate) fn mismatch(message: impl Into<String>) -> Self {
        Self::TypeMismatch(message.into())
    }

    #[cfg(feature = "jit")]
    pub(crate) fn codegen(err: impl std::fmt::Display) -> Self {
        Self::Codegen(err.to_string())
    }
}

/// Result alias for engine operations.
pub type Result<T> = std::result::Result<T, EngineError>;
