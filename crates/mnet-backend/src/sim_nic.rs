use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};

use crate::{ExternalDevice, Frame, HandlerError, RxDisposition, RxHandler};

/// Stats for [`SimNic`].
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct SimNicStats {
    pub tx_frames: u64,
    pub tx_bytes: u64,
    pub tx_dropped_down: u64,
    pub tx_dropped_full: u64,

    pub rx_frames: u64,
    pub rx_bytes: u64,
    /// Inbound frames taken by the registered handler instead of reaching the NIC's own stack.
    pub rx_consumed: u64,
    pub rx_dropped_full: u64,
}

struct SimNicQueues {
    tx: VecDeque<Frame>,
    rx: VecDeque<Frame>,
    stats: SimNicStats,
}

/// In-memory stand-in for a physical NIC.
///
/// Frames transmitted on the NIC land in a bounded TX log; frames injected with
/// [`SimNic::inject_inbound`] first run through the registered [`RxHandler`] and, unless consumed,
/// land in a bounded RX log that plays the role of the NIC's own protocol stack. Both logs drop
/// (and count) frames once `capacity` is reached.
pub struct SimNic {
    name: String,
    up: AtomicBool,
    capacity: usize,
    handler: Mutex<Option<Arc<dyn RxHandler>>>,
    queues: Mutex<SimNicQueues>,
}

impl SimNic {
    pub const DEFAULT_CAPACITY: usize = 256;

    /// Create a NIC that starts operationally up.
    pub fn new(name: impl Into<String>) -> Self {
        Self::with_capacity(name, Self::DEFAULT_CAPACITY)
    }

    pub fn with_capacity(name: impl Into<String>, capacity: usize) -> Self {
        Self {
            name: name.into(),
            up: AtomicBool::new(true),
            capacity,
            handler: Mutex::new(None),
            queues: Mutex::new(SimNicQueues {
                tx: VecDeque::new(),
                rx: VecDeque::new(),
                stats: SimNicStats::default(),
            }),
        }
    }

    pub fn set_up(&self, up: bool) {
        let was = self.up.swap(up, Ordering::AcqRel);
        if was != up {
            tracing::info!(nic = %self.name, up, "external link state changed");
        }
    }

    pub fn has_rx_handler(&self) -> bool {
        self.handler_slot().is_some()
    }

    /// Deliver an inbound frame as if it had arrived on the wire.
    pub fn inject_inbound(&self, frame: Frame) -> RxDisposition {
        // Clone the handler out so it runs without the slot lock held.
        let handler = self.handler_slot().clone();
        let disposition = match handler {
            Some(handler) => handler.on_inbound(&frame),
            None => RxDisposition::Pass,
        };

        let mut queues = self.queues();
        match disposition {
            RxDisposition::Consumed => queues.stats.rx_consumed += 1,
            RxDisposition::Pass => {
                if queues.rx.len() >= self.capacity {
                    queues.stats.rx_dropped_full += 1;
                } else {
                    queues.stats.rx_frames += 1;
                    queues.stats.rx_bytes += frame.len() as u64;
                    queues.rx.push_back(frame);
                }
            }
        }
        disposition
    }

    pub fn drain_tx_frames(&self) -> Vec<Frame> {
        self.queues().tx.drain(..).collect()
    }

    pub fn drain_rx_frames(&self) -> Vec<Frame> {
        self.queues().rx.drain(..).collect()
    }

    pub fn stats(&self) -> SimNicStats {
        self.queues().stats
    }

    fn queues(&self) -> MutexGuard<'_, SimNicQueues> {
        self.queues
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    fn handler_slot(&self) -> MutexGuard<'_, Option<Arc<dyn RxHandler>>> {
        self.handler
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

impl ExternalDevice for SimNic {
    fn name(&self) -> &str {
        &self.name
    }

    fn is_up(&self) -> bool {
        self.up.load(Ordering::Acquire)
    }

    fn transmit(&self, frame: Frame) {
        let frame_len = frame.len() as u64;
        let mut queues = self.queues();
        if !self.is_up() {
            queues.stats.tx_dropped_down += 1;
            return;
        }
        if queues.tx.len() >= self.capacity {
            queues.stats.tx_dropped_full += 1;
            return;
        }
        queues.stats.tx_frames += 1;
        queues.stats.tx_bytes += frame_len;
        queues.tx.push_back(frame);
    }

    fn register_rx_handler(&self, handler: Arc<dyn RxHandler>) -> Result<(), HandlerError> {
        let mut slot = self.handler_slot();
        if slot.is_some() {
            return Err(HandlerError::Busy {
                device: self.name.clone(),
            });
        }
        *slot = Some(handler);
        Ok(())
    }

    fn unregister_rx_handler(&self) -> bool {
        self.handler_slot().take().is_some()
    }
}
