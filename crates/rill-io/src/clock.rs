//! Headless backend driven by a timer thread.
//!
//! [`ClockBackend`] calls the output callback from its own thread, one
//! buffer per period, so flows can run without an audio device. With
//! [`ClockBackend::capture`] every produced buffer is also sent to a
//! channel, which is how the session tests observe real-time output.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::thread::JoinHandle;
use std::time::{Duration, Instant};

use crossbeam_channel::{Receiver, SendTimeoutError, Sender, bounded};

use crate::Result;
use crate::backend::{AudioBackend, BackendStreamConfig, ErrorCallback, OutputCallback, StreamHandle};

const SEND_POLL: Duration = Duration::from_millis(5);

/// Paced callback thread standing in for an audio device.
#[derive(Debug, Clone)]
pub struct ClockBackend {
    paced: bool,
    sink: Option<Sender<Vec<f32>>>,
}

impl ClockBackend {
    /// Runs one buffer per `buffer_size / sample_rate` seconds and discards
    /// the output.
    pub fn new() -> Self {
        Self {
            paced: true,
            sink: None,
        }
    }

    /// Runs as fast as the receiver drains, sending a copy of every buffer.
    /// At most `capacity` buffers wait in the channel.
    pub fn capture(capacity: usize) -> (Self, Receiver<Vec<f32>>) {
        let (tx, rx) = bounded(capacity);
        (
            Self {
                paced: false,
                sink: Some(tx),
            },
            rx,
        )
    }
}

impl Default for ClockBackend {
    fn default() -> Self {
        Self::new()
    }
}

struct ClockStream {
    stop: Arc<AtomicBool>,
    thread: Option<JoinHandle<()>>,
}

impl Drop for ClockStream {
    fn drop(&mut self) {
        self.stop.store(true, Ordering::Release);
        if let Some(thread) = self.thread.take()
            && thread.join().is_err()
        {
            tracing::warn!("clock thread panicked");
        }
    }
}

/// Sends `buffer` unless the stream stops first. Returns false once the
/// stream should end.
fn forward(sink: &Sender<Vec<f32>>, mut buffer: Vec<f32>, stop: &AtomicBool) -> bool {
    loop {
        match sink.send_timeout(buffer, SEND_POLL) {
            Ok(()) => return true,
            Err(SendTimeoutError::Timeout(back)) => {
                if stop.load(Ordering::Acquire) {
                    return false;
                }
                buffer = back;
            }
            Err(SendTimeoutError::Disconnected(_)) => return false,
        }
    }
}

impl AudioBackend for ClockBackend {
    fn name(&self) -> &'static str {
        "clock"
    }

    fn build_output_stream(
        &self,
        config: &BackendStreamConfig,
        mut callback: OutputCallback,
        _error_callback: ErrorCallback,
    ) -> Result<StreamHandle> {
        let frames = config.buffer_size.max(1) as usize;
        let len = frames * usize::from(config.channels.max(1));
        let period = Duration::from_secs_f64(frames as f64 / f64::from(config.sample_rate.max(1)));
        let stop = Arc::new(AtomicBool::new(false));
        let flag = Arc::clone(&stop);
        let sink = self.sink.clone();
        let paced = self.paced;

        let thread = std::thread::Builder::new()
            .name("rill-clock".into())
            .spawn(move || {
                let mut buffer = vec![0.0; len];
                let mut deadline = Instant::now();
                while !flag.load(Ordering::Acquire) {
                    callback(&mut buffer);
                    if let Some(sink) = &sink
                        && !forward(sink, buffer.clone(), &flag)
                    {
                        break;
                    }
                    if paced {
                        deadline += period;
                        let now = Instant::now();
                        if deadline > now {
                            std::thread::sleep(deadline - now);
                        } else {
                            deadline = now;
                        }
                    }
                }
            })?;

        tracing::info!(
            channels = config.channels,
            sample_rate = config.sample_rate,
            paced,
            "clock stream started"
        );
        Ok(StreamHandle::new(ClockStream {
            stop,
            thread: Some(thread),
        }))
    }
}
