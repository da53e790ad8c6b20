//! Error types for IR parsing, validation and math compilation.

use thiserror::Error;

/// Errors raised while parsing or validating IR.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum IrError {
    /// Malformed IR text.
    #[error("syntax error at line {line}: {message}")]
    Syntax {
        /// 1-based line number.
        line: usize,
        /// What went wrong.
        message: String,
    },

    /// A structurally invalid function.
    #[error("invalid function '{function}': {message}")]
    Validation {
        /// Offending function.
        function: String,
        /// What went wrong.
        message: String,
    },

    /// An outlet is not written on some execution path.
    #[error("function '{function}' does not write outlet '{outlet}' on every path")]
    OutletNotWritten {
        /// Offending function.
        function: String,
        /// Outlet name.
        outlet: String,
    },

    /// A call or alias names a function that is not defined.
    #[error("unknown function '{0}'")]
    UnknownFunction(String),

    /// Two definitions of one name in the same source.
    #[error("function '{0}' is defined more than once")]
    DuplicateFunction(String),
}

impl IrError {
    pub(crate) fn syntax(line: usize, message: impl Into<String>) -> Self {
        Self::Syntax {
            line,
            message: message.into(),
        }
    }

    pub(crate) fn validation(function: &str, message: impl Into<String>) -> Self {
        Self::Validation {
            function: function.to_owned(),
            message: message.into(),
        }
    }
}

/// Errors raised by the math expression compiler.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum MathError {
    /// Malformed expression text.
    #[error("syntax error at offset {offset}: {message}")]
    Syntax {
        /// Byte offset into the expression text.
        offset: usize,
        /// What went wrong.
        message: String,
    },

    /// `$N` refers past the declared inlets.
    #[error("argument ${index} is not bound (function has {inlets} inlets)")]
    UnboundArgument {
        /// The referenced inlet index.
        index: u32,
        /// Declared inlet count.
        inlets: u32,
    },
}

impl MathError {
    pub(crate) fn syntax(offset: usize, message: impl Into<String>) -> Self {
        Self::Syntax {
            offset,
            message: message.into(),
        }
    }
}
