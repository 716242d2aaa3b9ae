//! Transmit path: accept a frame, account for it, route it.

use std::sync::Arc;

use mnet_backend::Frame;

use crate::config::RxPath;
use crate::device::{Device, DeviceId, LinkState};
use crate::error::TxError;
use crate::peer;
use crate::queue::QueueFull;

/// Where an accepted frame went.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TxOutcome {
    /// Parked in `device`'s completion queue; a poll has been requested.
    Queued { device: DeviceId },
    /// Copied and delivered upward on `device` inside the transmit call.
    Delivered { device: DeviceId },
    /// Counted as sent, but the receive copy could not be allocated.
    Dropped,
    /// Re-injected onto the mirrored external device.
    Mirrored,
    /// Counted and freed.
    Consumed,
}

impl Device {
    /// `ndo_start_xmit`.
    ///
    /// Counts the frame as sent under this device's lock, releases the lock, then routes it:
    /// mirror first, then peer, then self-loopback. At most one device lock is held at any time.
    pub fn transmit(self: &Arc<Self>, frame: Frame) -> Result<TxOutcome, TxError> {
        {
            let mut state = self.lock();
            if state.link != LinkState::Up {
                return Err(TxError::DeviceDown { device: self.id() });
            }
            if frame.is_empty() {
                state.stats.tx_rejected += 1;
                drop(state);
                tracing::trace!(device = %self.name(), "zero-length frame rejected");
                return Err(TxError::EmptyFrame);
            }
            state.stats.record_tx(frame.len());
        }

        if let Some(mirror) = self.mirror() {
            return match mirror.passthrough(frame) {
                Ok(()) => Ok(TxOutcome::Mirrored),
                Err(frame) => {
                    self.lock().stats.tx_dropped += 1;
                    tracing::debug!(
                        device = %self.name(),
                        external = %mirror.external().name(),
                        len = frame.len(),
                        "mirrored device down, frame discarded"
                    );
                    Err(TxError::MirrorUnavailable)
                }
            };
        }

        let destination = if self.has_peer() {
            match peer::resolve_peer(self) {
                Some(peer) => peer,
                None => return Err(self.count_undeliverable(TxError::PeerUnavailable)),
            }
        } else {
            Arc::clone(self)
        };
        let to_peer = !Arc::ptr_eq(&destination, self);

        let routed = match self.ctx.config.rx_path {
            RxPath::Deferred => destination.enqueue(frame),
            RxPath::Immediate => destination.deliver_now(frame),
            RxPath::Discard => {
                drop(frame);
                Ok(TxOutcome::Consumed)
            }
        };

        match routed {
            Err(TxError::DeviceDown { .. }) if to_peer => {
                Err(self.count_undeliverable(TxError::PeerUnavailable))
            }
            Err(err @ TxError::DeviceDown { .. }) => Err(self.count_undeliverable(err)),
            other => other,
        }
    }

    fn count_undeliverable(&self, err: TxError) -> TxError {
        self.lock().stats.tx_dropped += 1;
        tracing::debug!(device = %self.name(), %err, "frame accepted but not deliverable");
        err
    }

    /// Producer half of the deferred receive path: park `frame` in this device's completion queue
    /// and request a poll.
    fn enqueue(self: &Arc<Self>, frame: Frame) -> Result<TxOutcome, TxError> {
        let requested = {
            let mut state = self.lock();
            if state.link != LinkState::Up {
                return Err(TxError::DeviceDown { device: self.id() });
            }
            if let Err(QueueFull(frame)) = state.queue.try_push(frame) {
                state.stats.rx_dropped += 1;
                drop(state);
                tracing::debug!(device = %self.name(), len = frame.len(), "completion queue full, frame dropped");
                return Err(TxError::Backpressure { device: self.id() });
            }
            if state.queue.is_full() && state.gate.close() {
                tracing::debug!(device = %self.name(), "queue stopped");
            }
            // A running poll re-checks the queue before it finishes.
            let requested = !state.scheduled && state.polling.is_none();
            if requested {
                state.scheduled = true;
            }
            requested
        };
        tracing::trace!(device = %self.name(), "frame queued");
        self.kick(requested);
        Ok(TxOutcome::Queued { device: self.id() })
    }

    /// Synchronous receive: copy into a fresh receive buffer and hand it upward immediately.
    fn deliver_now(&self, frame: Frame) -> Result<TxOutcome, TxError> {
        if self.link_state() != LinkState::Up {
            return Err(TxError::DeviceDown { device: self.id() });
        }
        let copy = match self.ctx.allocator.alloc_copy(frame.as_slice()) {
            Ok(copy) => copy,
            Err(err) => {
                self.lock().stats.rx_dropped += 1;
                tracing::warn!(device = %self.name(), %err, "receive buffer allocation failed");
                return Ok(TxOutcome::Dropped);
            }
        };
        drop(frame);
        self.lock().stats.record_rx(copy.len());
        self.ctx.sink.on_frame_received(self.id(), copy);
        Ok(TxOutcome::Delivered { device: self.id() })
    }
}
