//! Receive scheduler: the consumer half of the deferred receive path (NAPI poll).

use std::sync::Arc;
use std::thread;

use crate::device::{Device, LinkState};

/// Emit a heartbeat event every this many frames processed by poll (device lifetime count).
pub const HEARTBEAT_INTERVAL: u64 = 10;

impl Device {
    /// Drain up to `budget` frames from the completion queue and deliver them upward.
    ///
    /// Returns the number of frames delivered. At most one poll runs per device: a call that finds
    /// another poll in flight returns 0 immediately. Frames are delivered with the device lock
    /// released. When the poll finishes the gate reopens if the queue has room, and if frames are
    /// still queued (budget exhausted, or a transmit raced with the last pop) a new poll is
    /// requested from the scheduler.
    pub fn poll(self: &Arc<Self>, budget: usize) -> usize {
        {
            let mut state = self.lock();
            state.scheduled = false;
            if state.polling.is_some() || state.link != LinkState::Up {
                return 0;
            }
            state.polling = Some(thread::current().id());
        }

        let mut work_done = 0;
        while work_done < budget {
            let frame = {
                let mut state = self.lock();
                if state.link != LinkState::Up {
                    break;
                }
                match state.queue.pop() {
                    Some(frame) => frame,
                    None => break,
                }
            };

            let len = frame.len();
            self.ctx.sink.on_frame_received(self.id(), frame);
            work_done += 1;

            let processed = {
                let mut state = self.lock();
                state.stats.record_rx(len);
                state.polled_frames += 1;
                state.polled_frames
            };
            if processed % HEARTBEAT_INTERVAL == 0 {
                tracing::debug!(device = %self.name(), processed, "poll heartbeat");
            }
        }

        let requested = {
            let mut state = self.lock();
            state.polling = None;
            let up = state.link == LinkState::Up;
            if up && !state.queue.is_full() && state.gate.open() {
                tracing::debug!(device = %self.name(), "queue woken");
            }
            let requested = up && !state.queue.is_empty() && !state.scheduled;
            if requested {
                state.scheduled = true;
            }
            requested
        };
        self.notify_poll_idle();
        self.kick(requested);

        tracing::trace!(device = %self.name(), work_done, budget, "poll complete");
        work_done
    }
}
