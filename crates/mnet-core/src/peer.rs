//! Two-device bridge topology.

use std::sync::{Arc, Weak};

use crate::device::{Device, LinkState};
use crate::error::TopologyError;

/// The device `device` is bridged to, if it has one and it is still alive.
pub fn resolve_peer(device: &Device) -> Option<Arc<Device>> {
    device.peer.get().and_then(Weak::upgrade)
}

/// Make `a` and `b` each other's peer.
///
/// Both devices must still be in setup (peering is fixed once a device has been opened) and
/// neither may already have a peer.
pub(crate) fn link_peers(a: &Arc<Device>, b: &Arc<Device>) -> Result<(), TopologyError> {
    if Arc::ptr_eq(a, b) {
        return Err(TopologyError::InvalidTopology(format!(
            "{} cannot be its own peer",
            a.name()
        )));
    }
    for device in [a, b] {
        let state = device.link_state();
        if state != LinkState::Created {
            return Err(TopologyError::InvalidTopology(format!(
                "{} is {state:?}; peers can only be linked during setup",
                device.name()
            )));
        }
        if device.has_peer() {
            return Err(TopologyError::DoubleRegistration(format!(
                "{} already has a peer",
                device.name()
            )));
        }
    }

    // Callers serialize topology changes, so neither slot can be filled concurrently.
    if a.peer.set(Arc::downgrade(b)).is_err() || b.peer.set(Arc::downgrade(a)).is_err() {
        return Err(TopologyError::DoubleRegistration(format!(
            "{} <-> {} raced with another peer registration",
            a.name(),
            b.name()
        )));
    }

    tracing::info!(a = %a.name(), b = %b.name(), "peers linked");
    Ok(())
}
