//! Watch rings: per-frame samples of a node's lag field, pushed by the
//! processor and drained by the control side.

use crossbeam_channel::{Receiver, Sender, TrySendError, bounded};

use crate::instance::Binding;

/// Identifies one watch on an execution handle.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct WatchId(pub u32);

/// Default ring capacity, in frames.
pub const DEFAULT_WATCH_CAPACITY: usize = 4096;

#[derive(Debug)]
pub(crate) struct Watch {
    pub id: WatchId,
    pub node: u32,
    tx: Sender<f32>,
    // Held by the producer too, so a full ring can drop its oldest value.
    rx: Receiver<f32>,
}

impl Watch {
    pub fn new(id: WatchId, node: u32, capacity: usize) -> Self {
        let (tx, rx) = bounded(capacity.max(1));
        Self { id, node, tx, rx }
    }

    /// Pushes `value`, evicting the oldest sample when full. Never blocks.
    #[inline]
    pub fn push(&self, value: f32) {
        if let Err(TrySendError::Full(value)) = self.tx.try_send(value) {
            let _ = self.rx.try_recv();
            let _ = self.tx.try_send(value);
        }
    }

    /// Samples the watched node from `binding`, if it has a lag field there.
    #[inline]
    pub fn sample(&self, binding: &Binding) {
        if let Some(slot) = binding.layout.lag_slot(self.node) {
            self.push(binding.read(slot));
        }
    }

    /// Takes everything queued so far. NaN reads as 0.
    pub fn drain(&self) -> Vec<f32> {
        self.rx
            .try_iter()
            .map(|v| if v.is_nan() { 0.0 } else { v })
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn full_ring_drops_oldest() {
        let watch = Watch::new(WatchId(0), 1, 3);
        for v in 0..5 {
            watch.push(v as f32);
        }
        assert_eq!(watch.drain(), vec![2.0, 3.0, 4.0]);
        assert!(watch.drain().is_empty());
    }

    #[test]
    fn drain_replaces_nan() {
        let watch = Watch::new(WatchId(0), 1, 8);
        watch.push(f32::NAN);
        watch.push(0.5);
        assert_eq!(watch.drain(), vec![0.0, 0.5]);
    }
}
