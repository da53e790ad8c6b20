//! IR functions and their metadata.

use serde::{Deserialize, Serialize};

use crate::ir::{DataRef, DataType, Instruction};

/// What a flow feeds an inlet when no edge is connected to it.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum Fallback {
    /// A fixed value (0 unless declared otherwise).
    Value(f32),
    /// The operand bound to the previous inlet.
    Normal,
    /// Skip the whole call. Only legal on lag-capable functions.
    Skip,
    /// The empty array. Default for array inlets.
    EmptyArray,
}

impl Fallback {
    /// Default fallback for an inlet of the given type.
    pub fn default_for(data_type: DataType) -> Self {
        match data_type {
            DataType::Float => Self::Value(0.0),
            DataType::Array => Self::EmptyArray,
        }
    }
}

/// A typed function inlet.
#[derive(Debug, Clone, PartialEq)]
pub struct Inlet {
    /// Inlet name, addressable as `$name`.
    pub name: String,
    /// Inlet type.
    pub data_type: DataType,
    /// Value used by flows when the inlet is unconnected.
    pub fallback: Fallback,
}

impl Inlet {
    /// Float inlet defaulting to zero.
    pub fn float(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            data_type: DataType::Float,
            fallback: Fallback::Value(0.0),
        }
    }

    /// Replaces the fallback.
    pub fn with_fallback(mut self, fallback: Fallback) -> Self {
        self.fallback = fallback;
        self
    }
}

/// A typed function outlet.
#[derive(Debug, Clone, PartialEq)]
pub struct Outlet {
    /// Outlet name, addressable as `#name`.
    pub name: String,
    /// Outlet type.
    pub data_type: DataType,
}

impl Outlet {
    /// Float outlet.
    pub fn float(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            data_type: DataType::Float,
        }
    }
}

/// A named, typed cell of a function's persistent data segment, or of its
/// scratch cells.
#[derive(Debug, Clone, PartialEq)]
pub struct Field {
    /// Field name.
    pub name: String,
    /// Field type.
    pub data_type: DataType,
}

impl Field {
    /// Creates a field.
    pub fn new(name: impl Into<String>, data_type: DataType) -> Self {
        Self {
            name: name.into(),
            data_type,
        }
    }
}

/// Marks a function lag-capable.
///
/// `field` holds the value the node presents on feedback edges: flows read it
/// before the node's own call runs, which is what lets a cycle pass through
/// the node. `default` is the field's value at instantiation.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct LagAttr {
    /// Data field observed on feedback edges.
    pub field: DataRef,
    /// Initial value of that field.
    pub default: f32,
}

/// A complete IR function: signature, persistent data and body.
///
/// Functions are immutable once built; editing a flow produces a new one.
#[derive(Debug, Clone, PartialEq)]
pub struct IrFunction {
    /// Callable name.
    pub name: String,
    /// Ordered inlets.
    pub inlets: Vec<Inlet>,
    /// Ordered outlets.
    pub outlets: Vec<Outlet>,
    /// Persistent data segment, zeroed at instantiation.
    pub data: Vec<Field>,
    /// Scratch cells declared by `alloc`.
    pub locals: Vec<Field>,
    /// Instruction list.
    pub body: Vec<Instruction>,
    /// Present on lag-capable functions.
    pub lag: Option<LagAttr>,
    /// Name shown to users, when it differs from `name`.
    pub display: Option<String>,
}

impl IrFunction {
    /// Creates an empty function with the given name.
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            inlets: Vec::new(),
            outlets: Vec::new(),
            data: Vec::new(),
            locals: Vec::new(),
            body: Vec::new(),
            lag: None,
            display: None,
        }
    }

    /// Whether flows may route a cycle through this function.
    pub fn is_lag_capable(&self) -> bool {
        self.lag.is_some()
    }

    /// Position of the inlet called `name`.
    pub fn inlet_index(&self, name: &str) -> Option<u32> {
        self.inlets
            .iter()
            .position(|i| i.name == name)
            .map(|i| i as u32)
    }

    /// Position of the outlet called `name`.
    pub fn outlet_index(&self, name: &str) -> Option<u32> {
        self.outlets
            .iter()
            .position(|o| o.name == name)
            .map(|i| i as u32)
    }

    /// Position of the data field called `name`.
    pub fn data_index(&self, name: &str) -> Option<DataRef> {
        self.data
            .iter()
            .position(|d| d.name == name)
            .map(|i| DataRef(i as u32))
    }

    /// Name of the lag field, if any.
    pub fn lag_field(&self) -> Option<&Field> {
        self.lag.and_then(|lag| self.data.get(lag.field.0 as usize))
    }

    /// Metadata as seen through `alias` (or the function's own name).
    pub fn info_as(&self, alias: &str) -> FunctionInfo {
        let port = |name: &str, data_type: DataType| PortInfo {
            name: name.to_owned(),
            data_type,
        };
        FunctionInfo {
            name: alias.to_owned(),
            display_name: self.display.clone().unwrap_or_else(|| alias.to_owned()),
            inlets: self
                .inlets
                .iter()
                .map(|i| port(&i.name, i.data_type))
                .collect(),
            outlets: self
                .outlets
                .iter()
                .map(|o| port(&o.name, o.data_type))
                .collect(),
            lag_capable: self.is_lag_capable(),
        }
    }

    /// Metadata under the function's own name.
    pub fn info(&self) -> FunctionInfo {
        self.info_as(&self.name)
    }
}

/// A named, typed port in [`FunctionInfo`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PortInfo {
    /// Port name.
    pub name: String,
    /// Port type.
    #[serde(rename = "type")]
    pub data_type: DataType,
}

/// Function metadata exposed to editors and the CLI.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FunctionInfo {
    /// Callable name (alias name for aliases).
    pub name: String,
    /// Name to show on a node.
    pub display_name: String,
    /// Inlet names and types.
    pub inlets: Vec<PortInfo>,
    /// Outlet names and types.
    pub outlets: Vec<PortInfo>,
    /// Whether cycles may pass through nodes of this function.
    pub lag_capable: bool,
}
