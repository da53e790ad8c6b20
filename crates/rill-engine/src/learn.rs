//! MIDI-learn style binding of controller events to control nodes.

use std::collections::HashMap;

/// Controller events are addressed by `(channel, controller)`.
pub type ControllerKey = (u8, u8);

/// Binding table from controller events to node ids.
///
/// [`learn`](Self::learn) arms the table for one node; the next event binds
/// its controller to that node. Later events on a bound controller resolve
/// to `(node, value / 127)`.
#[derive(Debug, Clone, Default)]
pub struct LearnTable {
    armed: Option<u32>,
    bindings: HashMap<ControllerKey, u32>,
}

impl LearnTable {
    /// Creates an empty table.
    pub fn new() -> Self {
        Self::default()
    }

    /// Binds the next incoming controller to `node`.
    pub fn learn(&mut self, node: u32) {
        self.armed = Some(node);
    }

    /// Disarms without binding.
    pub fn cancel(&mut self) {
        self.armed = None;
    }

    /// Node waiting for a controller, if any.
    pub fn learning(&self) -> Option<u32> {
        self.armed
    }

    /// Handles one controller event.
    ///
    /// Returns the node and normalised value when the controller is bound.
    /// The event that completes a binding only binds.
    pub fn handle(&mut self, channel: u8, controller: u8, value: u8) -> Option<(u32, f32)> {
        let key = (channel, controller);
        if let Some(node) = self.armed.take() {
            self.bindings.retain(|_, n| *n != node);
            self.bindings.insert(key, node);
            tracing::debug!(channel, controller, node, "controller bound");
            return None;
        }
        let node = *self.bindings.get(&key)?;
        Some((node, f32::from(value.min(127)) / 127.0))
    }

    /// Removes the binding of `node`.
    pub fn unbind(&mut self, node: u32) {
        self.bindings.retain(|_, n| *n != node);
    }

    /// Controller bound to `node`.
    pub fn binding(&self, node: u32) -> Option<ControllerKey> {
        self.bindings
            .iter()
            .find(|(_, n)| **n == node)
            .map(|(key, _)| *key)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn next_event_binds_then_resolves() {
        let mut table = LearnTable::new();
        assert_eq!(table.handle(0, 7, 64), None);

        table.learn(12);
        assert_eq!(table.learning(), Some(12));
        assert_eq!(table.handle(1, 74, 100), None);
        assert_eq!(table.learning(), None);
        assert_eq!(table.binding(12), Some((1, 74)));

        assert_eq!(table.handle(1, 74, 127), Some((12, 1.0)));
        assert_eq!(table.handle(1, 74, 0), Some((12, 0.0)));
        assert_eq!(table.handle(2, 74, 127), None);
    }

    #[test]
    fn relearning_moves_the_binding() {
        let mut table = LearnTable::new();
        table.learn(3);
        table.handle(0, 1, 0);
        table.learn(3);
        table.handle(0, 2, 0);
        assert_eq!(table.handle(0, 1, 127), None);
        assert!(table.handle(0, 2, 127).is_some());

        table.unbind(3);
        assert_eq!(table.binding(3), None);
    }
}
