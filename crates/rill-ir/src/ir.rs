//! Instruction set of the rill intermediate representation.
//!
//! Every value in a running program is a 32-bit cell: floats are stored as
//! their IEEE-754 bits, arrays as a handle into the runtime's array table.
//! Instructions read and write those cells through the reference types below.
//!
//! | Prefix | Reference | Meaning |
//! |--------|-----------|---------|
//! | `$`    | [`Operand::Arg`] | inlet binding of the current call |
//! | `%`    | [`VarRef`] | per-call scratch temporary |
//! | `!`    | [`LocalRef`] | explicitly allocated scratch cell |
//! | `@`    | [`DataRef`] | persistent data-segment field |
//! | `#`    | [`OutletRef`] | outlet of the current call |

use serde::{Deserialize, Serialize};

/// Type of an inlet, outlet, data field or scratch value.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DataType {
    /// A single `f32` sample.
    Float,
    /// A handle to a runtime-owned buffer of `f32`.
    Array,
}

impl DataType {
    /// Keyword used in the IR text syntax.
    pub fn keyword(self) -> &'static str {
        match self {
            Self::Float => "float",
            Self::Array => "array",
        }
    }
}

impl std::fmt::Display for DataType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.keyword())
    }
}

/// Scratch temporary (`%`). Lives for one call.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct VarRef(pub u32);

/// Explicitly allocated scratch cell (`!`). Unlike a [`VarRef`] it may be
/// stored to from inside conditional blocks and read afterwards.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct LocalRef(pub u32);

/// Index into the function's own data segment (`@`).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct DataRef(pub u32);

/// Index into the function's outlets (`#`).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct OutletRef(pub u32);

/// Identifies one call site inside a function body.
///
/// Each call site owns a private instance of the callee's data segment, so
/// the id is what keeps two `lag` nodes in one flow from sharing state. Flow
/// lowering uses the node id as the call id.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct CallId(pub u32);

impl std::fmt::Display for CallId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Runtime-provided constants.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Constant {
    /// Sample rate of the running engine, in Hz.
    SampleRate,
    /// The empty array (handle 0).
    EmptyArray,
}

/// A value read by an instruction.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum Operand {
    /// Immediate float.
    Literal(f32),
    /// Inlet of the current call, by position.
    Arg(u32),
    /// Scratch temporary.
    Var(VarRef),
    /// Runtime constant.
    Constant(Constant),
}

impl From<f32> for Operand {
    fn from(value: f32) -> Self {
        Self::Literal(value)
    }
}

impl From<VarRef> for Operand {
    fn from(var: VarRef) -> Self {
        Self::Var(var)
    }
}

/// Where a `load` reads from.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Source {
    /// Scratch cell.
    Local(LocalRef),
    /// Own data-segment field.
    Data(DataRef),
    /// A data field of the callee instance owned by another call site in the
    /// same body. Used by flow lowering to read a lag-capable node's stored
    /// value before that node runs.
    LastValue(CallId, DataRef),
}

/// Where a `store` writes to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Target {
    /// Scratch cell.
    Local(LocalRef),
    /// Own data-segment field.
    Data(DataRef),
    /// Outlet of the current call.
    Outlet(OutletRef),
}

/// Arithmetic operators. `Rem` follows `f32 % f32` (sign of the dividend).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum BinaryOp {
    /// `a + b`
    Add,
    /// `a - b`
    Sub,
    /// `a * b`
    Mul,
    /// `a / b`
    Div,
    /// `a % b`
    Rem,
}

impl BinaryOp {
    /// Mnemonic used in the IR text syntax.
    pub fn mnemonic(self) -> &'static str {
        match self {
            Self::Add => "add",
            Self::Sub => "sub",
            Self::Mul => "mul",
            Self::Div => "div",
            Self::Rem => "rem",
        }
    }

    /// Applies the operator to two floats.
    #[inline]
    pub fn apply(self, a: f32, b: f32) -> f32 {
        match self {
            Self::Add => a + b,
            Self::Sub => a - b,
            Self::Mul => a * b,
            Self::Div => a / b,
            Self::Rem => a % b,
        }
    }
}

/// Comparison operators. The result is `1.0` when true and `0.0` otherwise.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum CompareOp {
    /// `a == b`
    Eq,
    /// `a != b`
    Ne,
    /// `a < b`
    Lt,
    /// `a <= b`
    Le,
    /// `a > b`
    Gt,
    /// `a >= b`
    Ge,
}

impl CompareOp {
    /// Mnemonic used in the IR text syntax.
    pub fn mnemonic(self) -> &'static str {
        match self {
            Self::Eq => "eq",
            Self::Ne => "ne",
            Self::Lt => "lt",
            Self::Le => "le",
            Self::Gt => "gt",
            Self::Ge => "ge",
        }
    }

    /// Applies the comparison with IEEE semantics (NaN compares unequal).
    #[inline]
    pub fn apply(self, a: f32, b: f32) -> f32 {
        let result = match self {
            Self::Eq => a == b,
            Self::Ne => a != b,
            Self::Lt => a < b,
            Self::Le => a <= b,
            Self::Gt => a > b,
            Self::Ge => a >= b,
        };
        if result { 1.0 } else { 0.0 }
    }
}

/// One IR instruction.
#[derive(Debug, Clone, PartialEq)]
pub enum Instruction {
    /// Reset a scratch cell to zero (or the empty array).
    Alloc(LocalRef),
    /// Read a cell into a temporary.
    Load(VarRef, Source),
    /// Write an operand into a cell or outlet.
    Store(Target, Operand),
    /// `dst = a <op> b`
    Binary(VarRef, BinaryOp, Operand, Operand),
    /// `dst = trunc(a)`, dropping the fractional part toward zero.
    Truncate(VarRef, Operand),
    /// `dst = (a <op> b) ? 1.0 : 0.0`
    Compare(VarRef, CompareOp, Operand, Operand),
    /// Runs the first block when the test operand is nonzero, the second
    /// block otherwise.
    Conditional(Operand, Vec<Instruction>, Vec<Instruction>),
    /// `dst = array[index]`, or 0 when the index is out of range.
    IndexLoad(VarRef, Operand, Operand),
    /// `array[index] = value`, ignored when the index is out of range.
    IndexStore(Operand, Operand, Operand),
    /// `dst = length(array)`
    Length(VarRef, Operand),
    /// Invoke a function by name with bound inlets, receiving its outlets
    /// into temporaries. Fewer temporaries than outlets is allowed.
    Call(CallId, String, Vec<Operand>, Vec<VarRef>),
}

impl Instruction {
    /// Visits this instruction and every instruction nested in it.
    pub fn walk<'a>(&'a self, visit: &mut impl FnMut(&'a Instruction)) {
        visit(self);
        if let Self::Conditional(_, then_block, else_block) = self {
            for inst in then_block.iter().chain(else_block) {
                inst.walk(visit);
            }
        }
    }
}

/// Visits every instruction of a body, including nested blocks.
pub fn walk_body<'a>(body: &'a [Instruction], mut visit: impl FnMut(&'a Instruction)) {
    for inst in body {
        inst.walk(&mut visit);
    }
}
