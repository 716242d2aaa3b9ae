//! Bridging a virtual device onto a real device it does not own.
//!
//! Outbound, frames accepted by the virtual device are pushed onto the external device's transmit
//! path. Inbound, a tap registered on the external device copies every arriving frame into the
//! virtual device and delivers it upward synchronously. The tap never consumes the original: the
//! external device keeps delivering its own traffic as if the tap were not there.

use std::sync::{Arc, Mutex, MutexGuard, Weak};

use mnet_backend::{ExternalDevice, Frame, RxDisposition, RxHandler};
use serde::Serialize;

use crate::device::{Device, LinkState};
use crate::error::TopologyError;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum MirrorState {
    Unattached,
    /// The tap is registered on the external device.
    Attached,
    /// The tap has been removed; the link is dead for good.
    Detached,
}

pub struct MirrorLink {
    external: Arc<dyn ExternalDevice>,
    state: Mutex<MirrorState>,
}

impl MirrorLink {
    pub(crate) fn new(external: Arc<dyn ExternalDevice>) -> Self {
        Self {
            external,
            state: Mutex::new(MirrorState::Unattached),
        }
    }

    pub fn state(&self) -> MirrorState {
        *self.lock()
    }

    pub fn external(&self) -> &Arc<dyn ExternalDevice> {
        &self.external
    }

    /// Register `tap` on the external device. Only valid once, from `Unattached`.
    pub(crate) fn attach(&self, tap: Arc<dyn RxHandler>) -> Result<(), TopologyError> {
        let mut state = self.lock();
        if *state != MirrorState::Unattached {
            return Err(TopologyError::DoubleRegistration(format!(
                "mirror onto {} is already {:?}",
                self.external.name(),
                *state
            )));
        }
        self.external
            .register_rx_handler(tap)
            .map_err(|err| TopologyError::DoubleRegistration(err.to_string()))?;
        *state = MirrorState::Attached;
        tracing::info!(external = %self.external.name(), "rx tap registered");
        Ok(())
    }

    /// Unregister the tap. Returns `true` only for the call that actually removed it.
    pub(crate) fn detach(&self) -> bool {
        let mut state = self.lock();
        if *state != MirrorState::Attached {
            *state = MirrorState::Detached;
            return false;
        }
        *state = MirrorState::Detached;
        drop(state);

        if !self.external.unregister_rx_handler() {
            tracing::warn!(external = %self.external.name(), "rx tap was already gone");
        }
        tracing::info!(external = %self.external.name(), "rx tap unregistered");
        true
    }

    /// Push `frame` onto the external device's transmit path.
    ///
    /// Hands the frame back when the external device is down or the link is not attached.
    pub(crate) fn passthrough(&self, frame: Frame) -> Result<(), Frame> {
        if self.state() != MirrorState::Attached || !self.external.is_up() {
            return Err(frame);
        }
        self.external.transmit(frame);
        Ok(())
    }

    fn lock(&self) -> MutexGuard<'_, MirrorState> {
        self.state
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

impl std::fmt::Debug for MirrorLink {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MirrorLink")
            .field("external", &self.external.name())
            .field("state", &self.state())
            .finish()
    }
}

/// The receive handler installed on the external device.
///
/// Holds the virtual device weakly so a registered tap never keeps a destroyed device alive.
pub(crate) struct MirrorTap {
    device: Weak<Device>,
}

impl MirrorTap {
    pub(crate) fn new(device: &Arc<Device>) -> Self {
        Self {
            device: Arc::downgrade(device),
        }
    }
}

impl RxHandler for MirrorTap {
    fn on_inbound(&self, frame: &Frame) -> RxDisposition {
        if let Some(device) = self.device.upgrade() {
            device.receive_mirrored(frame);
        }
        RxDisposition::Pass
    }
}

impl Device {
    /// Inbound half of the mirror: copy `frame` into this device and deliver it upward now.
    ///
    /// Bypasses the completion queue. An allocation failure only costs the copy; it is counted in
    /// `rx_dropped`.
    pub(crate) fn receive_mirrored(&self, frame: &Frame) {
        if self.link_state() != LinkState::Up {
            return;
        }
        let copy = match self.ctx.allocator.alloc_copy(frame.as_slice()) {
            Ok(copy) => copy,
            Err(err) => {
                self.lock().stats.rx_dropped += 1;
                tracing::warn!(device = %self.name(), %err, "mirror copy allocation failed");
                return;
            }
        };

        {
            let mut state = self.lock();
            // Teardown may have started while the copy was made.
            if state.link != LinkState::Up {
                return;
            }
            state.stats.record_rx(copy.len());
        }
        tracing::trace!(device = %self.name(), len = copy.len(), "mirrored inbound frame");
        self.ctx.sink.on_frame_received(self.id(), copy);
    }
}
