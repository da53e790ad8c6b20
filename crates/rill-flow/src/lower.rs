//! Lowering of a [`Flow`] into one IR function.
//!
//! # Ordering
//!
//! Nodes are emitted in dependency order. Cycles are validated in two
//! phases:
//!
//! 1. Every edge leaving a lag-capable node is removed and the remainder is
//!    sorted. Anything left unordered sits on a cycle that no lag-capable
//!    node can break, which is [`FlowError::CyclicGraph`].
//! 2. The full graph is sorted with Kahn's algorithm. Whenever the queue runs
//!    dry, the lowest-id remaining lag-capable node is broken: its lag field
//!    is loaded at that point and every consumer still waiting on it reads
//!    that value, which is the node's output from the previous frame.
//!
//! # Emission
//!
//! Each node becomes one `call` whose call id is the node id, so a node's
//! state keeps its identity across recompiles. Several edges into one inlet
//! are summed. Unconnected inlets use their fallback; a `skip` fallback keeps
//! the call site (and its state) but never runs it.

use std::collections::{BTreeMap, BTreeSet, HashMap};
use std::sync::Arc;

use rill_ir::{
    BinaryOp, CallId, Constant, Fallback, Inlet, Instruction, IrFunction, Library, Operand,
    Outlet, OutletRef, Source, Target, VarRef, validate,
};

use crate::error::{FlowError, Result};
use crate::graph::{Edge, Flow, NodeId, NodeKind, Ports};

/// Result of lowering a flow.
#[derive(Debug, Clone)]
pub struct Lowered {
    /// The flow as a single function named after it.
    pub function: IrFunction,
    /// Functions of inline math nodes called by `function`.
    pub helpers: Vec<Arc<IrFunction>>,
    /// Emission order of the nodes that became calls.
    pub order: Vec<NodeId>,
}

impl Lowered {
    /// Returns `base` extended with the helper functions.
    pub fn library(&self, base: &Library) -> Result<Library> {
        let mut library = base.clone();
        for helper in &self.helpers {
            library.insert((**helper).clone())?;
        }
        Ok(library)
    }
}

/// Lowers `flow` against `library`.
pub fn lower(flow: &Flow, library: &Library) -> Result<Lowered> {
    let mut ports = BTreeMap::new();
    for (id, _) in flow.nodes() {
        ports.insert(id, flow.ports(id, library)?);
    }

    let order = schedule(flow, &ports)?;

    let mut emitter = Emitter {
        body: Vec::new(),
        next_var: 0,
        values: HashMap::new(),
    };
    let mut helpers = Vec::new();
    let mut calls = Vec::new();
    let (mut flow_inlets, mut flow_outlets) = (0u32, 0u32);

    for (id, node_ports) in &ports {
        match node_ports {
            Ports::Inputs => {
                let used = flow.edges().iter().filter(|e| e.from == *id).map(|e| e.output);
                flow_inlets = flow_inlets.max(used.max().map_or(1, |m| m + 1));
            }
            Ports::Outputs => {
                let used = flow.edges().iter().filter(|e| e.to == *id).map(|e| e.input);
                flow_outlets = flow_outlets.max(used.max().map_or(1, |m| m + 1));
            }
            Ports::Function(_) => {}
        }
    }

    let mut broken = BTreeSet::new();
    for step in &order {
        match *step {
            Step::Break(id, field) => {
                let var = emitter.fresh();
                emitter.body.push(Instruction::Load(
                    var,
                    Source::LastValue(CallId(id.0), field),
                ));
                emitter.values.insert(Value::Lagged(id), Operand::Var(var));
                broken.insert(id);
            }
            Step::Node(id) => {
                let node = flow.node(id).ok_or(FlowError::UnknownNode(id))?;
                let Ports::Function(func) = &ports[&id] else {
                    continue;
                };
                if let NodeKind::Math(math) = &node.kind {
                    helpers.push(Arc::clone(math));
                }
                let name = match &node.kind {
                    NodeKind::Function(name) => name.clone(),
                    _ => func.name.clone(),
                };
                emitter.call(flow, id, &name, func, &broken);
                calls.push(id);
            }
        }
    }

    // Flow outlets are stored after every node has run. Edges from broken
    // nodes keep reading the lagged value, as they were pending at the break.
    let mut function = IrFunction::new(flow.name());
    function.inlets = (0..flow_inlets)
        .map(|i| Inlet::float(format!("in{i}")))
        .collect();
    function.outlets = (0..flow_outlets)
        .map(|i| Outlet::float(format!("out{i}")))
        .collect();

    for outlet in 0..flow_outlets {
        let feeds: Vec<Edge> = flow
            .edges()
            .iter()
            .filter(|e| e.input == outlet && matches!(ports.get(&e.to), Some(Ports::Outputs)))
            .copied()
            .collect();
        let value = emitter.sum(flow, &feeds, None).unwrap_or(Operand::Literal(0.0));
        emitter
            .body
            .push(Instruction::Store(Target::Outlet(OutletRef(outlet)), value));
    }
    function.body = emitter.body;

    let mut check = library.clone();
    for helper in &helpers {
        check.insert((**helper).clone())?;
    }
    validate(&function, Some(&check))?;

    tracing::debug!(
        flow = flow.name(),
        calls = calls.len(),
        instructions = function.body.len(),
        "flow_lower: done"
    );

    Ok(Lowered {
        function,
        helpers,
        order: calls,
    })
}

// ---------------------------------------------------------------------------
// Scheduling
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq)]
enum Step {
    /// Emit the node's call.
    Node(NodeId),
    /// Load the node's lag field before the node has run.
    Break(NodeId, rill_ir::DataRef),
}

fn schedule(flow: &Flow, ports: &BTreeMap<NodeId, Ports>) -> Result<Vec<Step>> {
    let lag_capable = |id: &NodeId| ports.get(id).is_some_and(Ports::is_lag_capable);

    // Phase 1: without edges out of lag-capable nodes the graph must be
    // acyclic.
    let acyclic_edges: Vec<Edge> = flow
        .edges()
        .iter()
        .filter(|e| !lag_capable(&e.from))
        .copied()
        .collect();
    let leftover = kahn(ports.keys().copied(), &acyclic_edges);
    if !leftover.is_empty() {
        return Err(FlowError::CyclicGraph {
            nodes: leftover.into_iter().map(|id| id.0).collect(),
        });
    }

    // Phase 2: full graph, breaking lag-capable nodes when stuck.
    let mut in_degree: BTreeMap<NodeId, usize> = ports.keys().map(|id| (*id, 0)).collect();
    for edge in flow.edges() {
        *in_degree.entry(edge.to).or_default() += 1;
    }
    let mut ready: BTreeSet<NodeId> = in_degree
        .iter()
        .filter(|(_, d)| **d == 0)
        .map(|(id, _)| *id)
        .collect();
    let mut done = BTreeSet::new();
    let mut broken = BTreeSet::new();
    let mut steps = Vec::with_capacity(ports.len());

    let release = |from: NodeId,
                   in_degree: &mut BTreeMap<NodeId, usize>,
                   ready: &mut BTreeSet<NodeId>,
                   done: &BTreeSet<NodeId>| {
        for edge in flow.edges().iter().filter(|e| e.from == from) {
            if let Some(d) = in_degree.get_mut(&edge.to) {
                *d -= 1;
                if *d == 0 && !done.contains(&edge.to) {
                    ready.insert(edge.to);
                }
            }
        }
    };

    while done.len() < ports.len() {
        if let Some(id) = ready.pop_first() {
            done.insert(id);
            steps.push(Step::Node(id));
            if !broken.contains(&id) {
                release(id, &mut in_degree, &mut ready, &done);
            }
            continue;
        }

        // Only a node on a remaining cycle may be broken; nodes merely
        // downstream of one wait for their inputs.
        let victim = in_degree.keys().copied().find(|id| {
            !done.contains(id)
                && !broken.contains(id)
                && lag_capable(id)
                && on_pending_cycle(flow, *id, &done, &broken)
        });
        let Some(victim) = victim else {
            // Unreachable after phase 1; report what is left rather than loop.
            let nodes = in_degree
                .keys()
                .filter(|id| !done.contains(*id))
                .map(|id| id.0)
                .collect();
            return Err(FlowError::CyclicGraph { nodes });
        };
        let field = match ports.get(&victim) {
            Some(Ports::Function(func)) => func.lag.map(|lag| lag.field),
            _ => None,
        }
        .ok_or(FlowError::CyclicGraph {
            nodes: vec![victim.0],
        })?;

        tracing::debug!(node = victim.0, "flow_lower: breaking cycle at lag node");
        broken.insert(victim);
        steps.push(Step::Break(victim, field));
        release(victim, &mut in_degree, &mut ready, &done);
    }

    Ok(steps)
}

/// Whether `start` can reach itself over edges still holding back a node:
/// edges whose source has neither run nor been broken.
fn on_pending_cycle(
    flow: &Flow,
    start: NodeId,
    done: &BTreeSet<NodeId>,
    broken: &BTreeSet<NodeId>,
) -> bool {
    let pending = |e: &&Edge| {
        !done.contains(&e.from) && !broken.contains(&e.from) && !done.contains(&e.to)
    };
    let mut seen = BTreeSet::new();
    let mut stack = vec![start];
    while let Some(id) = stack.pop() {
        for edge in flow.edges().iter().filter(pending).filter(|e| e.from == id) {
            if edge.to == start {
                return true;
            }
            if seen.insert(edge.to) {
                stack.push(edge.to);
            }
        }
    }
    false
}

/// Kahn's algorithm; returns the nodes left unordered, ascending.
fn kahn(nodes: impl Iterator<Item = NodeId>, edges: &[Edge]) -> Vec<NodeId> {
    let mut in_degree: BTreeMap<NodeId, usize> = nodes.map(|id| (id, 0)).collect();
    for edge in edges {
        *in_degree.entry(edge.to).or_default() += 1;
    }
    let mut queue: Vec<NodeId> = in_degree
        .iter()
        .filter(|(_, d)| **d == 0)
        .map(|(id, _)| *id)
        .collect();
    let mut sorted = BTreeSet::new();
    while let Some(id) = queue.pop() {
        sorted.insert(id);
        for edge in edges.iter().filter(|e| e.from == id) {
            if let Some(d) = in_degree.get_mut(&edge.to) {
                *d -= 1;
                if *d == 0 {
                    queue.push(edge.to);
                }
            }
        }
    }
    in_degree
        .into_keys()
        .filter(|id| !sorted.contains(id))
        .collect()
}

// ---------------------------------------------------------------------------
// Emission
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
enum Value {
    /// Outlet of a node that has run.
    Output(NodeId, u32),
    /// Lag field of a broken node.
    Lagged(NodeId),
}

struct Emitter {
    body: Vec<Instruction>,
    next_var: u32,
    values: HashMap<Value, Operand>,
}

impl Emitter {
    fn fresh(&mut self) -> VarRef {
        self.next_var += 1;
        VarRef(self.next_var - 1)
    }

    /// Operand carried by `edge`.
    fn source(&self, flow: &Flow, edge: &Edge, broken: Option<&BTreeSet<NodeId>>) -> Operand {
        if let Some(node) = flow.node(edge.from)
            && matches!(node.kind, NodeKind::Inputs)
        {
            return Operand::Arg(edge.output);
        }
        let lagged = broken.is_none_or(|b| b.contains(&edge.from));
        if lagged && let Some(op) = self.values.get(&Value::Lagged(edge.from)) {
            return *op;
        }
        self.values
            .get(&Value::Output(edge.from, edge.output))
            .copied()
            .unwrap_or(Operand::Literal(0.0))
    }

    /// Sum of the operands carried by `edges`, or `None` when there are none.
    fn sum(
        &mut self,
        flow: &Flow,
        edges: &[Edge],
        broken: Option<&BTreeSet<NodeId>>,
    ) -> Option<Operand> {
        let mut total: Option<Operand> = None;
        for edge in edges {
            let value = self.source(flow, edge, broken);
            total = Some(match total {
                None => value,
                Some(acc) => {
                    let dst = self.fresh();
                    self.body
                        .push(Instruction::Binary(dst, BinaryOp::Add, acc, value));
                    Operand::Var(dst)
                }
            });
        }
        total
    }

    fn call(
        &mut self,
        flow: &Flow,
        id: NodeId,
        name: &str,
        func: &IrFunction,
        broken: &BTreeSet<NodeId>,
    ) {
        let mut args = Vec::with_capacity(func.inlets.len());
        let mut skipped = false;
        for (idx, inlet) in func.inlets.iter().enumerate() {
            let feeds: Vec<Edge> = flow
                .edges()
                .iter()
                .filter(|e| e.to == id && e.input == idx as u32)
                .copied()
                .collect();
            let operand = match self.sum(flow, &feeds, Some(broken)) {
                Some(op) => op,
                None => match inlet.fallback {
                    Fallback::Value(v) => Operand::Literal(v),
                    Fallback::Normal => args.last().copied().unwrap_or(Operand::Literal(0.0)),
                    Fallback::EmptyArray => Operand::Constant(Constant::EmptyArray),
                    Fallback::Skip => {
                        skipped = true;
                        Operand::Literal(0.0)
                    }
                },
            };
            args.push(operand);
        }

        let results: Vec<VarRef> = func.outlets.iter().map(|_| self.fresh()).collect();
        let call = Instruction::Call(CallId(id.0), name.to_owned(), args, results.clone());

        if skipped {
            // Keep the call site and its state without running it; consumers
            // see the held lag field.
            self.body
                .push(Instruction::Conditional(Operand::Literal(0.0), vec![call], Vec::new()));
            if let Some(lag) = func.lag {
                let held = self.fresh();
                self.body
                    .push(Instruction::Load(held, Source::LastValue(CallId(id.0), lag.field)));
                for outlet in 0..func.outlets.len() as u32 {
                    self.values
                        .insert(Value::Output(id, outlet), Operand::Var(held));
                }
            }
        } else {
            self.body.push(call);
            for (outlet, var) in results.into_iter().enumerate() {
                self.values
                    .insert(Value::Output(id, outlet as u32), Operand::Var(var));
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn lib() -> Library {
        Library::core().unwrap()
    }

    fn calls(func: &IrFunction) -> Vec<(u32, String)> {
        let mut out = Vec::new();
        rill_ir::walk_body(&func.body, |inst| {
            if let Instruction::Call(id, name, ..) = inst {
                out.push((id.0, name.clone()));
            }
        });
        out
    }

    #[test]
    fn chain_lowers_in_dependency_order() {
        let lib = lib();
        let mut flow = Flow::new("main");
        let out = flow.add_node("outputs", &lib).unwrap();
        let abs = flow.add_node("abs", &lib).unwrap();
        let input = flow.add_node("inputs", &lib).unwrap();
        let floor = flow.add_node("floor", &lib).unwrap();
        flow.connect(Edge::new(input, 0, floor, 0), &lib).unwrap();
        flow.connect(Edge::new(floor, 0, abs, 0), &lib).unwrap();
        flow.connect(Edge::new(abs, 0, out, 0), &lib).unwrap();

        let lowered = lower(&flow, &lib).unwrap();
        assert_eq!(lowered.function.inlets.len(), 1);
        assert_eq!(lowered.function.outlets.len(), 1);
        assert_eq!(
            calls(&lowered.function),
            vec![(floor.0, "floor".into()), (abs.0, "abs".into())]
        );
        assert_eq!(lowered.order, vec![floor, abs]);
    }

    #[test]
    fn boundary_port_counts_follow_highest_index() {
        let lib = lib();
        let mut flow = Flow::new("main");
        let input = flow.add_node("inputs", &lib).unwrap();
        let out = flow.add_node("outputs", &lib).unwrap();
        flow.connect(Edge::new(input, 2, out, 3), &lib).unwrap();
        let lowered = lower(&flow, &lib).unwrap();
        assert_eq!(lowered.function.inlets.len(), 3);
        assert_eq!(lowered.function.outlets.len(), 4);
        // Unconnected outlets store zero.
        assert!(lowered.function.body.contains(&Instruction::Store(
            Target::Outlet(OutletRef(0)),
            Operand::Literal(0.0)
        )));
        assert!(lowered.function.body.contains(&Instruction::Store(
            Target::Outlet(OutletRef(3)),
            Operand::Arg(2)
        )));
    }

    #[test]
    fn cycle_without_lag_is_rejected() {
        let lib = lib();
        let mut flow = Flow::new("main");
        let a = flow.add_node("abs", &lib).unwrap();
        let b = flow.add_node("floor", &lib).unwrap();
        let c = flow.add_node("abs", &lib).unwrap();
        flow.connect(Edge::new(a, 0, b, 0), &lib).unwrap();
        flow.connect(Edge::new(b, 0, a, 0), &lib).unwrap();
        flow.connect(Edge::new(b, 0, c, 0), &lib).unwrap();
        let err = lower(&flow, &lib).unwrap_err();
        assert!(
            matches!(&err, FlowError::CyclicGraph { nodes } if nodes == &vec![a.0, b.0, c.0]),
            "{err}"
        );
    }

    #[test]
    fn cycle_through_lag_reads_lag_field_first() {
        let lib = lib();
        let mut flow = Flow::new("main");
        let abs = flow.add_node("abs", &lib).unwrap();
        let lag = flow.add_node("lag", &lib).unwrap();
        flow.connect(Edge::new(abs, 0, lag, 0), &lib).unwrap();
        flow.connect(Edge::new(lag, 0, abs, 0), &lib).unwrap();

        let lowered = lower(&flow, &lib).unwrap();
        let body = &lowered.function.body;
        assert_eq!(
            body[0],
            Instruction::Load(VarRef(0), Source::LastValue(CallId(lag.0), rill_ir::DataRef(0)))
        );
        let Instruction::Call(_, name, args, _) = &body[1] else {
            panic!("expected abs call, got {:?}", body[1]);
        };
        assert_eq!(name, "abs");
        assert_eq!(args[0], Operand::Var(VarRef(0)));
        assert!(matches!(&body[2], Instruction::Call(id, ..) if id.0 == lag.0));
    }

    #[test]
    fn fan_in_is_summed_and_fallbacks_apply() {
        let lib = lib();
        let mut flow = Flow::new("main");
        let input = flow.add_node("inputs", &lib).unwrap();
        let switch = flow.add_node("switch", &lib).unwrap();
        flow.connect(Edge::new(input, 0, switch, 1), &lib).unwrap();
        flow.connect(Edge::new(input, 1, switch, 1), &lib).unwrap();

        let lowered = lower(&flow, &lib).unwrap();
        let body = &lowered.function.body;
        assert_eq!(
            body[0],
            Instruction::Binary(VarRef(0), BinaryOp::Add, Operand::Arg(0), Operand::Arg(1))
        );
        let Instruction::Call(_, _, args, _) = &body[1] else {
            panic!("expected call");
        };
        assert_eq!(
            args,
            &vec![Operand::Literal(0.0), Operand::Var(VarRef(0)), Operand::Literal(0.0)]
        );
    }

    #[test]
    fn unconnected_skip_inlet_keeps_call_site() {
        let lib = lib();
        let mut flow = Flow::new("main");
        let lag = flow.add_node("lag", &lib).unwrap();
        let out = flow.add_node("outputs", &lib).unwrap();
        flow.connect(Edge::new(lag, 0, out, 0), &lib).unwrap();

        let lowered = lower(&flow, &lib).unwrap();
        let body = &lowered.function.body;
        assert!(matches!(&body[0], Instruction::Conditional(Operand::Literal(v), then, _)
            if *v == 0.0 && matches!(&then[0], Instruction::Call(..))));
        assert!(matches!(
            body[1],
            Instruction::Load(_, Source::LastValue(CallId(id), _)) if id == lag.0
        ));
    }

    #[test]
    fn math_nodes_become_helpers() {
        let lib = lib();
        let mut flow = Flow::new("patch");
        let input = flow.add_node("inputs", &lib).unwrap();
        let math = flow.add_node("= $0 * 2 + lag($0)", &lib).unwrap();
        let out = flow.add_node("outputs", &lib).unwrap();
        flow.connect(Edge::new(input, 0, math, 0), &lib).unwrap();
        flow.connect(Edge::new(math, 0, out, 0), &lib).unwrap();

        let lowered = lower(&flow, &lib).unwrap();
        assert_eq!(lowered.helpers.len(), 1);
        assert_eq!(lowered.helpers[0].name, format!("patch:math{}", math.0));
        let extended = lowered.library(&lib).unwrap();
        assert!(extended.contains("patch:math1"));
    }
}
