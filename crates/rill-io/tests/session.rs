//! Session tests driving real-time processing through the capturing clock.

use crossbeam_channel::Receiver;
use rill_config::EngineSettings;
use rill_engine::Generation;
use rill_flow::{Edge, FlowError, NodeId};
use rill_io::{ClockBackend, Error, Session, WavSpec, write_wav};

const STEP: f32 = 0.0005;

fn settings() -> EngineSettings {
    EngineSettings {
        backend: "interpreter".into(),
        channels: 1,
        block_size: 32,
        ..Default::default()
    }
}

/// lag -> (= $0 + STEP) -> outputs, with the sum fed back into the lag.
fn ramp(session: &mut Session) -> (NodeId, NodeId, NodeId) {
    let lag = session.add_node("lag").unwrap();
    let math = session.add_node(&format!("= $0 + {STEP}")).unwrap();
    let out = session.add_node("outputs").unwrap();
    session.connect(Edge::new(lag, 0, math, 0)).unwrap();
    session.connect(Edge::new(math, 0, lag, 0)).unwrap();
    session.connect(Edge::new(math, 0, out, 0)).unwrap();
    (lag, math, out)
}

fn assert_ramp(samples: &[f32]) {
    for pair in samples.windows(2) {
        assert!(
            (pair[1] - pair[0] - STEP).abs() < 1e-5,
            "ramp broke between {} and {}",
            pair[0],
            pair[1]
        );
    }
}

/// Collects blocks until `done` holds, giving up after `limit` blocks.
fn collect_until(
    rx: &Receiver<Vec<f32>>,
    limit: usize,
    mut done: impl FnMut(&[f32]) -> bool,
) -> Vec<f32> {
    let mut samples = Vec::new();
    for _ in 0..limit {
        let block = rx.recv().unwrap();
        samples.extend_from_slice(&block);
        if done(&samples) {
            return samples;
        }
    }
    panic!("condition not met after {limit} blocks");
}

#[test]
fn edits_while_running_keep_node_state() {
    let mut session = Session::new(settings()).unwrap();
    let (_, _, out) = ramp(&mut session);
    let (backend, rx) = ClockBackend::capture(4);
    session.start(&backend).unwrap();
    assert_eq!(session.generation(), Some(Generation(0)));

    let mut samples = collect_until(&rx, 4, |s| s.len() >= 64);

    let control = session.add_node("control").unwrap();
    session.connect(Edge::new(control, 0, out, 1)).unwrap();
    for _ in 0..64 {
        samples.extend(rx.recv().unwrap());
        if session.generation() == Some(Generation(2)) {
            break;
        }
    }
    samples.extend(rx.recv().unwrap());

    assert_eq!(session.generation(), Some(Generation(2)));
    assert!((samples[0] - STEP).abs() < 1e-6);
    assert_ramp(&samples);
    session.stop();
    assert!(!session.is_running());
}

#[test]
fn controls_are_live_and_persist() {
    let mut session = Session::new(settings()).unwrap();
    let control = session.add_node("control").unwrap();
    let out = session.add_node("outputs").unwrap();
    session.connect(Edge::new(control, 0, out, 0)).unwrap();

    let (backend, rx) = ClockBackend::capture(4);
    session.start(&backend).unwrap();
    collect_until(&rx, 4, |s| s.iter().all(|x| *x == 0.0));

    session.set_control(control.0, 0.5).unwrap();
    collect_until(&rx, 16, |s| s.last() == Some(&0.5));
    assert_eq!(session.control_value(control.0), Some(0.5));

    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("knob.toml");
    session.save(Some(&path)).unwrap();
    session.stop();

    let mut reopened = Session::new(settings()).unwrap();
    reopened.open(&path).unwrap();
    assert_eq!(reopened.path(), Some(path.as_path()));
    assert_eq!(reopened.control_value(control.0), Some(0.5));
}

#[test]
fn watches_follow_the_running_program() {
    let mut session = Session::new(settings()).unwrap();
    let (lag, _, _) = ramp(&mut session);
    session.watch(lag.0).unwrap();
    assert!(session.drain_watch(lag.0).is_empty(), "nothing before start");

    let (backend, rx) = ClockBackend::capture(2);
    session.start(&backend).unwrap();
    for _ in 0..4 {
        rx.recv().unwrap();
    }
    let values = session.drain_watch(lag.0);
    assert!(values.len() >= 4 * 32, "got {} values", values.len());
    assert!((values[0] - STEP).abs() < 1e-6, "lag holds the first sum");
    assert_ramp(&values);

    session.remove_node(lag).unwrap();
    assert!(!session.unwatch(lag.0));
}

#[test]
fn cyclic_edit_reports_and_keeps_running() {
    let mut session = Session::new(settings()).unwrap();
    let (_, _, out) = ramp(&mut session);
    let a = session.add_node("= $0 * 0.5").unwrap();
    let b = session.add_node("= $0 + 1").unwrap();
    session.connect(Edge::new(a, 0, b, 0)).unwrap();

    let (backend, rx) = ClockBackend::capture(4);
    session.start(&backend).unwrap();
    rx.recv().unwrap();

    let err = session.connect(Edge::new(b, 0, a, 0)).unwrap_err();
    assert!(matches!(err, Error::Flow(FlowError::CyclicGraph { .. })));
    assert_eq!(session.generation(), Some(Generation(0)));
    let samples = collect_until(&rx, 4, |s| s.len() >= 64);
    assert_ramp(&samples);

    session.disconnect(Edge::new(b, 0, a, 0)).unwrap();
    session.connect(Edge::new(b, 0, out, 1)).unwrap();
    session.stop();
}

#[test]
fn wav_buffer_feeds_sample_node() {
    let dir = tempfile::tempdir().unwrap();
    let wav = dir.path().join("ramp.wav");
    write_wav(&wav, &[0.0, 0.25, 0.5, 0.75], WavSpec::default()).unwrap();

    let mut session = Session::new(settings()).unwrap();
    assert_eq!(session.load_buffer("ramp", &wav).unwrap(), 4);
    let buffer = session.add_node("buffer").unwrap();
    let index = session.add_node("control").unwrap();
    let read = session.add_node("read").unwrap();
    let out = session.add_node("outputs").unwrap();
    session.set_buffer(buffer, Some("ramp")).unwrap();
    session.connect(Edge::new(buffer, 0, read, 0)).unwrap();
    session.connect(Edge::new(index, 0, read, 1)).unwrap();
    session.connect(Edge::new(read, 0, out, 0)).unwrap();
    session.set_control(index.0, 2.0).unwrap();

    let rendered = session.render(3, None, |_| {}).unwrap();
    assert_eq!(rendered, vec![0.5; 3]);

    let path = dir.path().join("reader.toml");
    session.save(Some(&path)).unwrap();
    let mut reopened = Session::new(settings()).unwrap();
    reopened.open(&path).unwrap();
    assert_eq!(reopened.buffers().get("ramp").map(|b| b.len()), Some(4));
    assert_eq!(reopened.render(1, None, |_| {}).unwrap(), vec![0.5]);
}

#[test]
fn metadata_queries() {
    let session = Session::new(settings()).unwrap();
    let lag = session.function_info("lag").unwrap();
    assert!(lag.lag_capable);
    assert_eq!(lag.inlets.len(), 1);
    assert!(session.function_info("no_such_function").is_none());
    assert!(session.functions().iter().any(|f| f.name == "switch"));
}
