//! Per-device flow-control gate (the netdev TX queue start/stop/wake state).
//!
//! The gate is advisory: it never blocks a transmit by itself. It tells queueing layers outside
//! the engine whether the device can currently take more work.

use serde::Serialize;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum GateState {
    Open,
    Closed,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FlowGate {
    state: GateState,
}

impl FlowGate {
    /// Gates start closed; a device's queue is stopped until the device is opened.
    pub const fn new() -> Self {
        Self {
            state: GateState::Closed,
        }
    }

    /// Open the gate. Returns `true` if this call changed the state.
    pub fn open(&mut self) -> bool {
        let changed = self.state == GateState::Closed;
        self.state = GateState::Open;
        changed
    }

    /// Close the gate. Returns `true` if this call changed the state.
    pub fn close(&mut self) -> bool {
        let changed = self.state == GateState::Open;
        self.state = GateState::Closed;
        changed
    }

    pub fn is_open(&self) -> bool {
        self.state == GateState::Open
    }

    pub fn state(&self) -> GateState {
        self.state
    }
}

impl Default for FlowGate {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn starts_closed() {
        assert!(!FlowGate::new().is_open());
    }

    #[test]
    fn transitions_are_idempotent() {
        let mut gate = FlowGate::new();

        assert!(gate.open());
        assert!(!gate.open());
        assert!(gate.is_open());

        assert!(gate.close());
        assert!(!gate.close());
        assert_eq!(gate.state(), GateState::Closed);
    }
}
