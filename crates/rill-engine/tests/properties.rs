//! Property-based tests for the core primitives, run on every backend.
//!
//! Each primitive is wrapped in a one-call program and driven frame by
//! frame; the interpreter and the JIT must both satisfy the property and
//! agree with each other bit for bit.

use std::sync::Arc;

use proptest::prelude::*;
use rill_engine::{Backend, DataPresets, Engine, EngineError, Interpreter, Preset};
use rill_flow::{Edge, Flow, lower};
use rill_ir::{IrFunction, Library, compile_expression, parse_function};

fn backends() -> Vec<Arc<dyn Backend>> {
    let mut backends: Vec<Arc<dyn Backend>> = vec![Arc::new(Interpreter)];
    #[cfg(feature = "jit")]
    backends.push(Arc::new(rill_engine::Jit::new(rill_engine::OptLevel::Speed)));
    backends
}

/// Runs `source` once per frame on every backend and returns the outputs of
/// each backend, after checking that they agree.
fn run(source: &str, presets: &DataPresets, frames: &[Vec<f32>]) -> Vec<Vec<f32>> {
    let library = Library::core().unwrap();
    let entry = parse_function(source).unwrap();
    run_function(&entry, &library, presets, frames)
}

fn run_function(
    entry: &IrFunction,
    library: &Library,
    presets: &DataPresets,
    frames: &[Vec<f32>],
) -> Vec<Vec<f32>> {
    let mut results = backends().into_iter().map(|backend| {
        let engine = Engine::new(backend, 48000.0);
        let (_handle, mut proc) = engine.instantiate(entry, library, presets).unwrap();
        frames
            .iter()
            .map(|inputs| {
                let mut out = vec![0.0; entry.outlets.len()];
                proc.run(inputs, &mut out);
                out
            })
            .collect::<Vec<_>>()
    });
    let first = results.next().unwrap();
    for other in results {
        // NaN payloads may differ; any NaN matches any other.
        let bits = |v: &[Vec<f32>]| -> Vec<u32> {
            v.iter()
                .flatten()
                .map(|x| if x.is_nan() { u32::MAX } else { x.to_bits() })
                .collect()
        };
        assert_eq!(bits(&first), bits(&other), "backends disagree");
    }
    first
}

fn single(call: &str, inlets: &str, args: &str) -> String {
    format!("func main({inlets}) -> (out: float)\nbegin\n  call {call}#0({args}) -> %o\n  store #out, %o\nend\n")
}

fn sampler(len: usize) -> (String, DataPresets) {
    let source = "func main(pos: float) -> (out: float)\nbegin\n  call buffer#1() -> %buf\n  call sample#2(%buf, $pos) -> %v\n  store #out, %v\nend\n";
    let mut presets = DataPresets::new();
    let samples: Vec<f32> = (0..len).map(|i| (i as f32 * 0.37).sin()).collect();
    presets
        .set(1, Preset::Buffer("b".into()))
        .insert_buffer("b", Arc::from(samples));
    (source.to_owned(), presets)
}

fn close(a: f32, b: f32) -> bool {
    (a - b).abs() <= 1e-4
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(48))]

    /// `lag` outputs its previous input, starting from the declared default.
    #[test]
    fn lag_delays_by_one_frame(xs in prop::collection::vec(-100.0f32..100.0, 1..32)) {
        let frames: Vec<Vec<f32>> = xs.iter().map(|x| vec![*x]).collect();
        let out = run(&single("lag", "x: float", "$x"), &DataPresets::new(), &frames);
        prop_assert_eq!(out[0][0], 0.0);
        for i in 1..xs.len() {
            prop_assert_eq!(out[i][0], xs[i - 1]);
        }
    }

    /// `switch` picks `left` on a zero test and `right` otherwise.
    #[test]
    fn switch_selects_by_test(
        test in prop_oneof![Just(0.0f32), Just(-0.0f32), -10.0f32..10.0, Just(f32::NAN)],
        a in -10.0f32..10.0,
        b in -10.0f32..10.0,
    ) {
        let out = run(
            &single("switch", "t: float, a: float, b: float", "$t, $a, $b"),
            &DataPresets::new(),
            &[vec![test, a, b]],
        );
        let expected = if test == 0.0 { a } else { b };
        prop_assert_eq!(out[0][0], expected);
    }

    /// `delta` outputs the difference to the previous input.
    #[test]
    fn delta_differences(xs in prop::collection::vec(-100.0f32..100.0, 1..32)) {
        let frames: Vec<Vec<f32>> = xs.iter().map(|x| vec![*x]).collect();
        let out = run(&single("delta", "x: float", "$x"), &DataPresets::new(), &frames);
        let mut prev = 0.0;
        for (x, o) in xs.iter().zip(&out) {
            prop_assert_eq!(o[0], *x - prev);
            prev = *x;
        }
    }

    /// `latch` holds the last value seen with a nonzero update.
    #[test]
    fn latch_holds(steps in prop::collection::vec((-10.0f32..10.0, prop::bool::ANY), 1..32)) {
        let frames: Vec<Vec<f32>> = steps
            .iter()
            .map(|(v, u)| vec![*v, if *u { 1.0 } else { 0.0 }])
            .collect();
        let out = run(&single("latch", "v: float, u: float", "$v, $u"), &DataPresets::new(), &frames);
        let mut held = 0.0;
        for ((v, u), o) in steps.iter().zip(&out) {
            if *u {
                held = *v;
            }
            prop_assert_eq!(o[0], held);
        }
    }

    /// `sample` hits stored values at `k / len` and averages neighbours at
    /// the midpoint, wrapping around the end.
    #[test]
    fn sample_interpolates(len in 1usize..16, k in 0usize..16) {
        let k = k % len;
        let (source, presets) = sampler(len);
        let data = presets.buffer("b").unwrap().clone();
        let at = |pos: f32| run(&source, &presets, &[vec![pos]])[0][0];

        prop_assert_eq!(at(0.0), data[0]);
        prop_assert!(close(at(k as f32 / len as f32), data[k]));
        let mid = (k as f32 + 0.5) / len as f32;
        prop_assert!(close(at(mid), (data[k] + data[(k + 1) % len]) / 2.0));
        prop_assert!(close(at(1.0 + k as f32 / len as f32), data[k]));
        prop_assert!(close(at(k as f32 / len as f32 - 1.0), data[k]));
    }

    /// Reads and writes outside `[0, len)` are silent.
    #[test]
    fn array_bounds_are_silent(idx in prop_oneof![-50.0f32..50.0, Just(f32::NAN)], v in -1.0f32..1.0) {
        let source = "func main(idx: float, v: float) -> (r: float, first: float, n: float)\nbegin\n  call buffer#1() -> %buf\n  call write#2(%buf, $idx, $v)\n  call read#3(%buf, $idx) -> %r\n  call read#4(%buf, 0) -> %first\n  call length#5(%buf) -> %n\n  store #r, %r\n  store #first, %first\n  store #n, %n\nend\n";
        let mut presets = DataPresets::new();
        presets
            .set(1, Preset::Buffer("b".into()))
            .insert_buffer("b", Arc::from([9.0f32; 4]));
        let out = run(source, &presets, &[vec![idx, v]]);
        let in_range = idx >= 0.0 && idx < 4.0;
        prop_assert_eq!(out[0][0], if in_range { v } else { 0.0 });
        prop_assert_eq!(out[0][1], if in_range && idx < 1.0 { v } else { 9.0 });
        prop_assert_eq!(out[0][2], 4.0);
    }

    /// Math expressions agree across backends for arbitrary inputs.
    #[test]
    fn math_agrees_across_backends(a in -1e3f32..1e3, b in -1e3f32..1e3) {
        for text in ["= $0 + $1 * 2", "= ($0 - $1) / ($1 % 3)", "= -$0 >= $1", "= lag($0 * SampleRate) - $1"] {
            let func = compile_expression("expr", text, None).unwrap();
            run(&func.to_string(), &DataPresets::new(), &[vec![a, b], vec![b, a]]);
        }
    }
}

#[test]
fn sample_of_empty_buffer_is_silent() {
    let (source, presets) = sampler(0);
    let out = run(&source, &presets, &[vec![0.0], vec![0.5], vec![-3.0]]);
    assert_eq!(out, vec![vec![0.0]; 3]);
}

#[test]
fn precedence_follows_arithmetic() {
    let func = compile_expression("expr", "= $0 + $1 * 2", None).unwrap();
    let out = run(&func.to_string(), &DataPresets::new(), &[vec![3.0, 4.0]]);
    assert_eq!(out, vec![vec![11.0]]);
}

#[test]
fn nodes_bound_to_one_buffer_share_it() {
    let source = "func main(x: float) -> (out: float)
begin
  call buffer#1() -> %a
  call buffer#2() -> %b
  call write#3(%a, 0, $x)
  call read#4(%b, 0) -> %v
  store #out, %v
end
";
    let mut presets = DataPresets::new();
    presets
        .set(1, Preset::Buffer("shared".into()))
        .set(2, Preset::Buffer("shared".into()))
        .insert_buffer("shared", Arc::from([0.0f32; 4]));
    let out = run(source, &presets, &[vec![0.5], vec![0.25]]);
    assert_eq!(out, vec![vec![0.5], vec![0.25]]);
}

#[test]
fn delta_below_a_feedback_loop_is_not_delayed() {
    let library = Library::core().unwrap();
    let mut flow = Flow::new("main");
    let input = flow.add_node("inputs", &library).unwrap();
    let delta = flow.add_node("delta", &library).unwrap();
    let abs = flow.add_node("abs", &library).unwrap();
    let lag = flow.add_node("lag", &library).unwrap();
    let out = flow.add_node("outputs", &library).unwrap();
    for edge in [
        Edge::new(input, 0, abs, 0),
        Edge::new(lag, 0, abs, 0),
        Edge::new(abs, 0, lag, 0),
        Edge::new(abs, 0, delta, 0),
        Edge::new(delta, 0, out, 0),
    ] {
        flow.connect(edge, &library).unwrap();
    }

    let lowered = lower(&flow, &library).unwrap();
    let lib = lowered.library(&library).unwrap();
    let frames = vec![vec![1.0]; 3];
    let out = run_function(&lowered.function, &lib, &DataPresets::new(), &frames);
    // abs accumulates 1, 2, 3; delta sees each step in the same frame.
    assert_eq!(out, vec![vec![1.0]; 3]);
}

#[test]
fn branch_local_temporaries_are_rejected() {
    let library = Library::core().unwrap();
    let entry = parse_function(
        "func main(x: float) -> (out: float)
begin
  if $x
    add %v, $x, 1
  end
  store #out, %v
end
",
    )
    .unwrap();
    for backend in backends() {
        let engine = Engine::new(backend, 48000.0);
        let err = engine
            .instantiate(&entry, &library, &DataPresets::new())
            .unwrap_err();
        assert!(matches!(err, EngineError::Invalid(_)), "{err}");
    }
}
