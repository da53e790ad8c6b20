//! Lowering scenarios through the public API.

use proptest::prelude::*;
use rill_flow::{Edge, Flow, FlowError, NodeId, lower};
use rill_ir::{Instruction, Library, Source};

fn library() -> Library {
    Library::core().unwrap()
}

#[test]
fn feedback_loop_through_delta_lowers() {
    let lib = library();
    let mut flow = Flow::new("main");
    let input = flow.add_node("inputs", &lib).unwrap();
    let sum = flow.add_node("= $0 + $1", &lib).unwrap();
    let delta = flow.add_node("delta", &lib).unwrap();
    let out = flow.add_node("outputs", &lib).unwrap();
    flow.connect(Edge::new(input, 0, sum, 0), &lib).unwrap();
    flow.connect(Edge::new(sum, 0, delta, 0), &lib).unwrap();
    flow.connect(Edge::new(delta, 0, sum, 1), &lib).unwrap();
    flow.connect(Edge::new(delta, 0, out, 0), &lib).unwrap();

    let lowered = lower(&flow, &lib).unwrap();
    let first_load = lowered
        .function
        .body
        .iter()
        .position(|i| matches!(i, Instruction::Load(_, Source::LastValue(..))))
        .unwrap();
    let first_call = lowered
        .function
        .body
        .iter()
        .position(|i| matches!(i, Instruction::Call(..)))
        .unwrap();
    assert!(first_load < first_call);
    assert_eq!(lowered.order, vec![sum, delta]);
}

#[test]
fn removing_the_lag_node_from_a_loop_is_caught() {
    let lib = library();
    let mut flow = Flow::new("main");
    let a = flow.add_node("= $0 * 0.5", &lib).unwrap();
    let lag = flow.add_node("lag", &lib).unwrap();
    flow.connect(Edge::new(a, 0, lag, 0), &lib).unwrap();
    flow.connect(Edge::new(lag, 0, a, 0), &lib).unwrap();
    lower(&flow, &lib).unwrap();

    let b = flow.add_node("abs", &lib).unwrap();
    flow.connect(Edge::new(a, 0, b, 0), &lib).unwrap();
    flow.connect(Edge::new(b, 0, a, 0), &lib).unwrap();
    // The lag node sits downstream of the stateless loop, so it is left
    // unordered too.
    let err = lower(&flow, &lib).unwrap_err();
    assert!(matches!(err, FlowError::CyclicGraph { ref nodes } if nodes == &vec![a.0, lag.0, b.0]), "{err}");
}

#[test]
fn lag_node_below_a_loop_is_not_broken() {
    let lib = library();
    let mut flow = Flow::new("main");
    let input = flow.add_node("inputs", &lib).unwrap();
    let delta = flow.add_node("delta", &lib).unwrap();
    let abs = flow.add_node("abs", &lib).unwrap();
    let lag = flow.add_node("lag", &lib).unwrap();
    let out = flow.add_node("outputs", &lib).unwrap();
    flow.connect(Edge::new(input, 0, abs, 0), &lib).unwrap();
    flow.connect(Edge::new(abs, 0, lag, 0), &lib).unwrap();
    flow.connect(Edge::new(lag, 0, abs, 0), &lib).unwrap();
    flow.connect(Edge::new(abs, 0, delta, 0), &lib).unwrap();
    flow.connect(Edge::new(delta, 0, out, 0), &lib).unwrap();

    let lowered = lower(&flow, &lib).unwrap();
    let broken: Vec<u32> = lowered
        .function
        .body
        .iter()
        .filter_map(|i| match i {
            Instruction::Load(_, Source::LastValue(call, _)) => Some(call.0),
            _ => None,
        })
        .collect();
    assert_eq!(broken, vec![lag.0]);
    assert_eq!(lowered.order, vec![abs, delta, lag]);
}

proptest! {
    /// Random chains of stateless nodes always lower, with one call per node.
    #[test]
    fn random_chains_lower(kinds in proptest::collection::vec(0usize..3, 1..12)) {
        let lib = library();
        let names = ["abs", "floor", "= $0 * 2"];
        let mut flow = Flow::new("chain");
        let input = flow.add_node("inputs", &lib).unwrap();
        let mut prev = input;
        for kind in &kinds {
            let id = flow.add_node(names[*kind], &lib).unwrap();
            flow.connect(Edge::new(prev, 0, id, 0), &lib).unwrap();
            prev = id;
        }
        let out = flow.add_node("outputs", &lib).unwrap();
        flow.connect(Edge::new(prev, 0, out, 0), &lib).unwrap();

        let lowered = lower(&flow, &lib).unwrap();
        prop_assert_eq!(lowered.order.len(), kinds.len());
        let expected: Vec<NodeId> = (1..=kinds.len() as u32).map(NodeId).collect();
        prop_assert_eq!(lowered.order, expected);
    }
}
