//! Upward delivery: the protocol-stack side of the engine.

use std::sync::{Mutex, MutexGuard};

use mnet_backend::Frame;

use crate::device::DeviceId;

/// Receives every frame the engine delivers upward (`netif_receive_skb` / `netif_rx`).
///
/// Called from whichever context drains the frame: a poll worker, or the transmit/mirror caller
/// for synchronous paths. A nested `poll` of the same device returns 0; stopping or destroying the
/// device from here is allowed and ends the running poll after the current frame.
pub trait FrameSink: Send + Sync {
    fn on_frame_received(&self, device: DeviceId, frame: Frame);
}

impl<F> FrameSink for F
where
    F: Fn(DeviceId, Frame) + Send + Sync,
{
    fn on_frame_received(&self, device: DeviceId, frame: Frame) {
        self(device, frame)
    }
}

/// Drops everything.
#[derive(Debug, Default, Clone, Copy)]
pub struct NullSink;

impl FrameSink for NullSink {
    fn on_frame_received(&self, _device: DeviceId, _frame: Frame) {}
}

/// Keeps every delivered frame, in delivery order.
#[derive(Debug, Default)]
pub struct RecordingSink {
    frames: Mutex<Vec<(DeviceId, Frame)>>,
}

impl RecordingSink {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.frames().len()
    }

    pub fn is_empty(&self) -> bool {
        self.frames().is_empty()
    }

    pub fn count_for(&self, device: DeviceId) -> usize {
        self.frames().iter().filter(|(id, _)| *id == device).count()
    }

    pub fn drain(&self) -> Vec<(DeviceId, Frame)> {
        self.frames().drain(..).collect()
    }

    fn frames(&self) -> MutexGuard<'_, Vec<(DeviceId, Frame)>> {
        self.frames
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

impl FrameSink for RecordingSink {
    fn on_frame_received(&self, device: DeviceId, frame: Frame) {
        self.frames().push((device, frame));
    }
}
