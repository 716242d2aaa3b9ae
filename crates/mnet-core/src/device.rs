use std::fmt;
use std::sync::{Arc, Condvar, Mutex, MutexGuard, OnceLock, Weak};
use std::thread::{self, ThreadId};

use mnet_backend::FrameAllocator;
use serde::Serialize;

use crate::config::EngineConfig;
use crate::gate::{FlowGate, GateState};
use crate::mirror::MirrorLink;
use crate::queue::CompletionQueue;
use crate::sched::PollScheduler;
use crate::sink::FrameSink;
use crate::stats::DeviceStats;

/// Stable index of a virtual device within its [`crate::Engine`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
#[serde(transparent)]
pub struct DeviceId(pub u32);

impl fmt::Display for DeviceId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{}", self.0)
    }
}

/// Device lifecycle.
///
/// ```text
/// Created --open--> Up <--open/stop--> Down
///    |                \                 /
///    |                 +--> Destroying --> Destroyed
///    +--setup error--> Faulted
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum LinkState {
    Created,
    Up,
    Down,
    Faulted,
    Destroying,
    Destroyed,
}

/// Everything a device shares with its engine: configuration and the three collaborators.
pub(crate) struct EngineContext {
    pub(crate) config: EngineConfig,
    pub(crate) sink: Arc<dyn FrameSink>,
    pub(crate) scheduler: Arc<dyn PollScheduler>,
    pub(crate) allocator: Arc<dyn FrameAllocator>,
}

/// Mutable per-device state. One lock guards all of it.
pub(crate) struct DeviceState {
    pub(crate) link: LinkState,
    pub(crate) stats: DeviceStats,
    pub(crate) gate: FlowGate,
    pub(crate) queue: CompletionQueue,
    /// The thread executing a poll right now, if any (single-flight guard).
    pub(crate) polling: Option<ThreadId>,
    /// A poll has been requested from the scheduler and has not started yet.
    pub(crate) scheduled: bool,
    /// Frames delivered by poll over the device lifetime; drives the heartbeat.
    pub(crate) polled_frames: u64,
}

/// One virtual network interface.
///
/// Devices are created and owned by an [`crate::Engine`]; schedulers and other devices only hold
/// `Arc`/`Weak` references. Packet-path entry points are [`Device::transmit`] (see `transmit.rs`)
/// and [`Device::poll`] (see `poll.rs`).
pub struct Device {
    id: DeviceId,
    name: String,
    state: Mutex<DeviceState>,
    /// Signalled whenever a poll finishes; teardown waits on it.
    idle: Condvar,
    pub(crate) peer: OnceLock<Weak<Device>>,
    pub(crate) mirror: OnceLock<Arc<MirrorLink>>,
    pub(crate) ctx: Arc<EngineContext>,
}

impl Device {
    pub(crate) fn new(id: DeviceId, name: String, ctx: Arc<EngineContext>) -> Self {
        let queue = CompletionQueue::new(ctx.config.queue_depth);
        Self {
            id,
            name,
            state: Mutex::new(DeviceState {
                link: LinkState::Created,
                stats: DeviceStats::default(),
                gate: FlowGate::new(),
                queue,
                polling: None,
                scheduled: false,
                polled_frames: 0,
            }),
            idle: Condvar::new(),
            peer: OnceLock::new(),
            mirror: OnceLock::new(),
            ctx,
        }
    }

    pub fn id(&self) -> DeviceId {
        self.id
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn stats(&self) -> DeviceStats {
        self.lock().stats
    }

    pub fn link_state(&self) -> LinkState {
        self.lock().link
    }

    /// The flow-control gate as seen by queueing layers: `true` while the device accepts work.
    pub fn queue_active(&self) -> bool {
        self.lock().gate.is_open()
    }

    pub fn gate_state(&self) -> GateState {
        self.lock().gate.state()
    }

    pub fn queued_frames(&self) -> usize {
        self.lock().queue.len()
    }

    /// `true` when no frame is queued and no poll is running or pending.
    pub fn is_idle(&self) -> bool {
        let state = self.lock();
        state.queue.is_empty() && state.polling.is_none() && !state.scheduled
    }

    pub fn has_peer(&self) -> bool {
        self.peer.get().is_some()
    }

    pub fn mirror(&self) -> Option<&Arc<MirrorLink>> {
        self.mirror.get()
    }

    pub(crate) fn lock(&self) -> MutexGuard<'_, DeviceState> {
        self.state
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// Block until no poll is executing on this device. Returns the re-acquired guard.
    ///
    /// A poll running on the calling thread (a delivery callback stopping or destroying its own
    /// device) is not waited for; it sees the link change and stops after the frame in hand.
    pub(crate) fn wait_poll_idle<'a>(
        &'a self,
        mut state: MutexGuard<'a, DeviceState>,
    ) -> MutexGuard<'a, DeviceState> {
        let current = thread::current().id();
        while state.polling.is_some_and(|poller| poller != current) {
            state = self
                .idle
                .wait(state)
                .unwrap_or_else(|poisoned| poisoned.into_inner());
        }
        state
    }

    pub(crate) fn notify_poll_idle(&self) {
        self.idle.notify_all();
    }

    /// Hand the device to the scheduler if a poll was requested under the lock.
    pub(crate) fn kick(self: &Arc<Self>, requested: bool) {
        if requested {
            self.ctx.scheduler.schedule(self);
        }
    }

    /// `ndo_open`: bring the link up and start the queue.
    pub(crate) fn open(self: &Arc<Self>) -> Result<(), crate::TopologyError> {
        let requested = {
            let mut state = self.lock();
            match state.link {
                LinkState::Up => return Ok(()),
                LinkState::Created | LinkState::Down => {}
                LinkState::Faulted => return Err(crate::TopologyError::Faulted(self.id)),
                other => {
                    return Err(crate::TopologyError::InvalidState {
                        device: self.id,
                        state: other,
                    })
                }
            }
            state.link = LinkState::Up;
            if !state.queue.is_full() {
                state.gate.open();
            }
            // Frames parked while the device was down still need a poll.
            let requested = !state.queue.is_empty() && !state.scheduled;
            if requested {
                state.scheduled = true;
            }
            requested
        };
        tracing::info!(device = %self.name, "device opened");
        self.kick(requested);
        Ok(())
    }

    /// `ndo_stop`: stop the queue and wait out any in-flight poll (`napi_disable`).
    ///
    /// Queued frames stay parked and are delivered after the next open.
    pub(crate) fn stop(&self) {
        let mut state = self.lock();
        if state.link != LinkState::Up {
            return;
        }
        state.link = LinkState::Down;
        state.gate.close();
        state.scheduled = false;
        drop(self.wait_poll_idle(state));
        tracing::info!(device = %self.name, "device stopped");
    }

    /// Only a device still in setup can be faulted; a running device keeps its state.
    pub(crate) fn fault(&self) {
        let mut state = self.lock();
        if state.link == LinkState::Created {
            state.link = LinkState::Faulted;
            state.gate.close();
        }
    }

    /// First half of teardown: stop accepting transmits and polls.
    ///
    /// Returns `false` if another teardown already started.
    pub(crate) fn begin_teardown(&self) -> bool {
        let mut state = self.lock();
        if matches!(state.link, LinkState::Destroying | LinkState::Destroyed) {
            return false;
        }
        state.link = LinkState::Destroying;
        state.gate.close();
        state.scheduled = false;
        true
    }

    /// Second half of teardown: wait for an in-flight poll to finish, release queued frames
    /// without delivering them, then detach the mirror tap. Returns the number of frames released.
    pub(crate) fn finish_teardown(&self) -> usize {
        let mut state = self.wait_poll_idle(self.lock());
        let released = state.queue.discard_all();
        state.stats.rx_dropped += released as u64;
        drop(state);

        if let Some(mirror) = self.mirror.get() {
            mirror.detach();
        }

        self.lock().link = LinkState::Destroyed;
        tracing::info!(device = %self.name, released, "device destroyed");
        released
    }
}

impl fmt::Debug for Device {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Device")
            .field("id", &self.id)
            .field("name", &self.name)
            .field("link", &self.link_state())
            .finish_non_exhaustive()
    }
}
