//! Editable signal-flow graph.
//!
//! A [`Flow`] is owned by the editing thread. Every node holds the text it
//! was created from: a library function name, an inline math expression
//! (`= $0 * 2`) or one of the boundary markers `inputs` / `outputs`.
//! Connections are validated when requested, so a flow only ever holds edges
//! that lowering can accept (cycles are the exception: they are checked when
//! the flow is lowered, because whether one is legal depends on every node
//! on it).

use std::collections::BTreeMap;
use std::fmt;
use std::path::PathBuf;
use std::sync::Arc;

use rill_ir::{DataType, IrFunction, Library, compile_expression, validate};

use crate::error::{FlowError, Result};

/// Stable identifier of a node within one flow.
///
/// Ids are assigned sequentially and never reused while the flow is open.
/// Saving compacts them to list positions.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct NodeId(pub u32);

impl NodeId {
    /// Returns the raw numeric identifier.
    #[inline]
    pub fn index(self) -> u32 {
        self.0
    }
}

impl fmt::Display for NodeId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "NodeId({})", self.0)
    }
}

/// A port-to-port connection.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct Edge {
    /// Source node.
    pub from: NodeId,
    /// Outlet index on the source node.
    pub output: u32,
    /// Destination node.
    pub to: NodeId,
    /// Inlet index on the destination node.
    pub input: u32,
}

impl Edge {
    /// Creates an edge from `from.output` to `to.input`.
    pub fn new(from: NodeId, output: u32, to: NodeId, input: u32) -> Self {
        Self {
            from,
            output,
            to,
            input,
        }
    }
}

impl fmt::Display for Edge {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{}:{} → {}:{}",
            self.from.0, self.output, self.to.0, self.input
        )
    }
}

/// What a node executes.
#[derive(Debug, Clone)]
pub enum NodeKind {
    /// The flow's own inlets. Any outlet index is accepted.
    Inputs,
    /// The flow's own outlets. Any inlet index is accepted.
    Outputs,
    /// A library function, by name or alias.
    Function(String),
    /// An inline math expression, compiled when the node is added.
    Math(Arc<IrFunction>),
}

/// One node of a flow.
#[derive(Debug, Clone)]
pub struct Node {
    /// Text the node was created from.
    pub text: String,
    /// Resolved kind.
    pub kind: NodeKind,
    /// Placement, persisted for the editor.
    pub x: f32,
    /// Placement, persisted for the editor.
    pub y: f32,
    /// Size, persisted for the editor.
    pub w: f32,
    /// Size, persisted for the editor.
    pub h: f32,
    /// Initial value of the node's lag field (e.g. a control's setting).
    pub value: Option<f32>,
    /// Buffer bound to the node's array field.
    pub buffer: Option<String>,
}

/// A named buffer the flow loads from disk.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BufferSource {
    /// Name nodes refer to.
    pub name: String,
    /// WAV file path, relative to the flow file unless absolute.
    pub path: PathBuf,
}

/// Port signature of a node as seen by connection checks and lowering.
#[derive(Debug, Clone)]
pub(crate) enum Ports {
    Inputs,
    Outputs,
    Function(Arc<IrFunction>),
}

impl Ports {
    fn outlet_type(&self, index: u32) -> Option<DataType> {
        match self {
            Self::Inputs => Some(DataType::Float),
            Self::Outputs => None,
            Self::Function(func) => func.outlets.get(index as usize).map(|o| o.data_type),
        }
    }

    fn inlet_type(&self, index: u32) -> Option<DataType> {
        match self {
            Self::Inputs => None,
            Self::Outputs => Some(DataType::Float),
            Self::Function(func) => func.inlets.get(index as usize).map(|i| i.data_type),
        }
    }

    pub(crate) fn is_lag_capable(&self) -> bool {
        matches!(self, Self::Function(func) if func.is_lag_capable())
    }
}

/// An editable node/edge graph.
#[derive(Debug, Clone)]
pub struct Flow {
    name: String,
    nodes: BTreeMap<NodeId, Node>,
    edges: Vec<Edge>,
    buffers: Vec<BufferSource>,
    next_id: u32,
    revision: u64,
}

impl Flow {
    /// Creates an empty flow. `name` becomes the lowered function's name.
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            nodes: BTreeMap::new(),
            edges: Vec::new(),
            buffers: Vec::new(),
            next_id: 0,
            revision: 0,
        }
    }

    /// Flow name.
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Counter bumped by every structural change. A compiled program is
    /// stale once the flow's revision moves past the one it was built from.
    pub fn revision(&self) -> u64 {
        self.revision
    }

    /// Adds a node created from `text` and returns its id.
    ///
    /// Function names must exist in `library`; math nodes are compiled and
    /// validated against it immediately.
    pub fn add_node(&mut self, text: &str, library: &Library) -> Result<NodeId> {
        let id = NodeId(self.next_id);
        self.insert_node(id, text, library)?;
        Ok(id)
    }

    pub(crate) fn insert_node(&mut self, id: NodeId, text: &str, library: &Library) -> Result<()> {
        let text = text.trim();
        let kind = self.resolve_text(id, text, library)?;
        self.nodes.insert(
            id,
            Node {
                text: text.to_owned(),
                kind,
                x: 0.0,
                y: 0.0,
                w: 0.0,
                h: 0.0,
                value: None,
                buffer: None,
            },
        );
        self.next_id = self.next_id.max(id.0 + 1);
        self.revision += 1;
        tracing::debug!(%id, text, "flow_add: node");
        Ok(())
    }

    fn resolve_text(&self, id: NodeId, text: &str, library: &Library) -> Result<NodeKind> {
        match text {
            "inputs" => Ok(NodeKind::Inputs),
            "outputs" => Ok(NodeKind::Outputs),
            _ if text.starts_with('=') => {
                let name = format!("{}:math{}", self.name, id.0);
                let func =
                    compile_expression(&name, text, None).map_err(|source| FlowError::Math {
                        text: text.to_owned(),
                        source,
                    })?;
                validate(&func, Some(library))?;
                Ok(NodeKind::Math(Arc::new(func)))
            }
            _ if library.contains(text) => Ok(NodeKind::Function(text.to_owned())),
            _ => Err(FlowError::UnknownFunction(text.to_owned())),
        }
    }

    /// Removes a node and every edge touching it.
    pub fn remove_node(&mut self, id: NodeId) -> Result<Node> {
        let node = self.nodes.remove(&id).ok_or(FlowError::UnknownNode(id))?;
        self.edges.retain(|e| e.from != id && e.to != id);
        self.revision += 1;
        tracing::debug!(%id, "flow_remove: node");
        Ok(node)
    }

    /// Looks up a node.
    pub fn node(&self, id: NodeId) -> Option<&Node> {
        self.nodes.get(&id)
    }

    /// Nodes in id order.
    pub fn nodes(&self) -> impl Iterator<Item = (NodeId, &Node)> {
        self.nodes.iter().map(|(id, node)| (*id, node))
    }

    /// Number of nodes.
    pub fn node_count(&self) -> usize {
        self.nodes.len()
    }

    /// All edges, in insertion order.
    pub fn edges(&self) -> &[Edge] {
        &self.edges
    }

    /// Adds an edge after checking it against the graph rules.
    ///
    /// Fails with [`FlowError::InvalidConnection`] when either node is
    /// missing, a port index is out of range, the port types differ, the
    /// edge already exists, an array inlet is already fed, or the edge is a
    /// self-loop on a node that is not lag-capable.
    pub fn connect(&mut self, edge: Edge, library: &Library) -> Result<()> {
        let from = self.ports(edge.from, library).map_err(|e| match e {
            FlowError::UnknownNode(id) => FlowError::connection(format!("unknown node {id}")),
            other => other,
        })?;
        let to = self.ports(edge.to, library).map_err(|e| match e {
            FlowError::UnknownNode(id) => FlowError::connection(format!("unknown node {id}")),
            other => other,
        })?;

        let outlet = from.outlet_type(edge.output).ok_or_else(|| {
            FlowError::connection(format!("{} has no outlet {}", edge.from, edge.output))
        })?;
        let inlet = to.inlet_type(edge.input).ok_or_else(|| {
            FlowError::connection(format!("{} has no inlet {}", edge.to, edge.input))
        })?;
        if outlet != inlet {
            return Err(FlowError::connection(format!(
                "{edge}: cannot feed {outlet} into {inlet}"
            )));
        }
        if edge.from == edge.to && !from.is_lag_capable() {
            return Err(FlowError::connection(format!(
                "{edge}: self-loop on a node that is not lag-capable"
            )));
        }
        if self.edges.contains(&edge) {
            return Err(FlowError::connection(format!("{edge}: already connected")));
        }
        if inlet == DataType::Array
            && self
                .edges
                .iter()
                .any(|e| e.to == edge.to && e.input == edge.input)
        {
            return Err(FlowError::connection(format!(
                "{edge}: array inlet already connected"
            )));
        }

        self.edges.push(edge);
        self.revision += 1;
        tracing::debug!("flow_connect: {edge}");
        Ok(())
    }

    /// Removes an edge.
    pub fn disconnect(&mut self, edge: Edge) -> Result<()> {
        let idx = self
            .edges
            .iter()
            .position(|e| *e == edge)
            .ok_or(FlowError::UnknownEdge(edge))?;
        self.edges.remove(idx);
        self.revision += 1;
        tracing::debug!("flow_disconnect: {edge}");
        Ok(())
    }

    /// Moves a node. Placement is not structural.
    pub fn move_node(&mut self, id: NodeId, x: f32, y: f32) -> Result<()> {
        let node = self.node_mut(id)?;
        node.x = x;
        node.y = y;
        Ok(())
    }

    /// Resizes a node. Size is not structural.
    pub fn resize_node(&mut self, id: NodeId, w: f32, h: f32) -> Result<()> {
        let node = self.node_mut(id)?;
        node.w = w;
        node.h = h;
        Ok(())
    }

    /// Sets or clears the initial lag-field value of a node.
    pub fn set_value(&mut self, id: NodeId, value: Option<f32>) -> Result<()> {
        self.node_mut(id)?.value = value;
        Ok(())
    }

    /// Binds or unbinds a named buffer.
    pub fn set_buffer(&mut self, id: NodeId, buffer: Option<String>) -> Result<()> {
        self.node_mut(id)?.buffer = buffer;
        self.revision += 1;
        Ok(())
    }

    /// Buffers declared by the flow.
    pub fn buffers(&self) -> &[BufferSource] {
        &self.buffers
    }

    /// Declares a buffer, replacing one of the same name.
    pub fn add_buffer(&mut self, name: impl Into<String>, path: impl Into<PathBuf>) {
        let source = BufferSource {
            name: name.into(),
            path: path.into(),
        };
        self.buffers.retain(|b| b.name != source.name);
        self.buffers.push(source);
        self.revision += 1;
    }

    fn node_mut(&mut self, id: NodeId) -> Result<&mut Node> {
        self.nodes.get_mut(&id).ok_or(FlowError::UnknownNode(id))
    }

    /// Port signature of a node.
    pub(crate) fn ports(&self, id: NodeId, library: &Library) -> Result<Ports> {
        let node = self.nodes.get(&id).ok_or(FlowError::UnknownNode(id))?;
        match &node.kind {
            NodeKind::Inputs => Ok(Ports::Inputs),
            NodeKind::Outputs => Ok(Ports::Outputs),
            NodeKind::Math(func) => Ok(Ports::Function(Arc::clone(func))),
            NodeKind::Function(name) => library
                .get(name)
                .map(|f| Ports::Function(Arc::clone(f)))
                .ok_or_else(|| FlowError::UnknownFunction(name.clone())),
        }
    }

    /// Whether cycles may pass through `id`.
    pub fn is_lag_capable(&self, id: NodeId, library: &Library) -> bool {
        self.ports(id, library)
            .is_ok_and(|ports| ports.is_lag_capable())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn lib() -> Library {
        Library::core().unwrap()
    }

    #[test]
    fn add_node_resolves_kinds() {
        let lib = lib();
        let mut flow = Flow::new("main");
        let a = flow.add_node("inputs", &lib).unwrap();
        let b = flow.add_node(" lag ", &lib).unwrap();
        let c = flow.add_node("= $0 * 2", &lib).unwrap();
        assert!(matches!(flow.node(a).unwrap().kind, NodeKind::Inputs));
        assert!(matches!(&flow.node(b).unwrap().kind, NodeKind::Function(n) if n == "lag"));
        let NodeKind::Math(func) = &flow.node(c).unwrap().kind else {
            panic!("expected math node");
        };
        assert_eq!(func.name, "main:math2");
        assert!(matches!(
            flow.add_node("nope", &lib),
            Err(FlowError::UnknownFunction(_))
        ));
        assert!(matches!(
            flow.add_node("= $0 +", &lib),
            Err(FlowError::Math { .. })
        ));
    }

    #[test]
    fn self_loops_need_lag() {
        let lib = lib();
        let mut flow = Flow::new("main");
        for name in ["lag", "delta", "latch", "watch", "graph"] {
            let id = flow.add_node(name, &lib).unwrap();
            flow.connect(Edge::new(id, 0, id, 0), &lib).unwrap();
        }
        let abs = flow.add_node("abs", &lib).unwrap();
        let err = flow.connect(Edge::new(abs, 0, abs, 0), &lib).unwrap_err();
        assert!(matches!(err, FlowError::InvalidConnection(_)), "{err}");
    }

    #[test]
    fn connect_rejects_bad_ports_and_types() {
        let lib = lib();
        let mut flow = Flow::new("main");
        let buf = flow.add_node("buffer", &lib).unwrap();
        let abs = flow.add_node("abs", &lib).unwrap();
        let read = flow.add_node("read", &lib).unwrap();
        let out = flow.add_node("outputs", &lib).unwrap();

        let invalid = |r: Result<()>| matches!(r, Err(FlowError::InvalidConnection(_)));
        assert!(invalid(flow.connect(Edge::new(buf, 0, abs, 0), &lib)));
        assert!(invalid(flow.connect(Edge::new(abs, 1, read, 1), &lib)));
        assert!(invalid(flow.connect(Edge::new(abs, 0, read, 5), &lib)));
        assert!(invalid(flow.connect(Edge::new(out, 0, abs, 0), &lib)));
        assert!(invalid(flow.connect(Edge::new(NodeId(99), 0, abs, 0), &lib)));

        flow.connect(Edge::new(buf, 0, read, 0), &lib).unwrap();
        flow.connect(Edge::new(abs, 0, out, 7), &lib).unwrap();
        assert!(invalid(flow.connect(Edge::new(abs, 0, out, 7), &lib)));
        let buf2 = flow.add_node("buffer", &lib).unwrap();
        assert!(invalid(flow.connect(Edge::new(buf2, 0, read, 0), &lib)));
    }

    #[test]
    fn structural_edits_bump_revision() {
        let lib = lib();
        let mut flow = Flow::new("main");
        let a = flow.add_node("abs", &lib).unwrap();
        let b = flow.add_node("floor", &lib).unwrap();
        let before = flow.revision();
        flow.move_node(a, 10.0, 20.0).unwrap();
        flow.resize_node(a, 80.0, 30.0).unwrap();
        assert_eq!(flow.revision(), before);

        let edge = Edge::new(a, 0, b, 0);
        flow.connect(edge, &lib).unwrap();
        assert!(flow.revision() > before);

        flow.remove_node(a).unwrap();
        assert!(flow.edges().is_empty());
        assert!(matches!(
            flow.disconnect(edge),
            Err(FlowError::UnknownEdge(_))
        ));
        assert!(matches!(
            flow.move_node(a, 0.0, 0.0),
            Err(FlowError::UnknownNode(_))
        ));
    }

    #[test]
    fn ids_are_not_reused() {
        let lib = lib();
        let mut flow = Flow::new("main");
        let a = flow.add_node("abs", &lib).unwrap();
        flow.remove_node(a).unwrap();
        let b = flow.add_node("abs", &lib).unwrap();
        assert_ne!(a, b);
    }
}
