//! Tokio poll workers for the packet-path engine.
//!
//! Each device gets one long-lived task that waits on a [`Notify`]. A poll request from the engine
//! is a `notify_one`, so polls for one device never overlap while different devices are polled in
//! parallel on the runtime's worker threads:
//! 1. A transmit parks a frame and asks the scheduler for a poll.
//! 2. The device's task wakes and calls [`Device::poll`] with the configured budget.
//! 3. If the budget ran out with frames left, the poll asks again and the task runs another round.
#![forbid(unsafe_code)]

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, Weak};
use std::time::Duration;

use mnet_backend::Frame;
use mnet_core::{Device, DeviceId, Engine, FrameSink, PollScheduler};
use tokio::runtime::{Handle, TryCurrentError};
use tokio::sync::{mpsc, Notify};
use tokio::task::JoinHandle;

/// Default frame budget per poll (the classic NAPI weight).
pub const DEFAULT_POLL_BUDGET: usize = 64;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PumpConfig {
    /// Frames a single poll may deliver before yielding back to the runtime. At least 1.
    pub budget: usize,
}

impl Default for PumpConfig {
    fn default() -> Self {
        Self {
            budget: DEFAULT_POLL_BUDGET,
        }
    }
}

/// Work done by one device's worker.
#[must_use]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct PumpCounts {
    /// Polls run.
    pub polls: u64,
    /// Frames delivered upward by those polls.
    pub frames: u64,
    /// Polls that found nothing to do (a request raced with an earlier poll).
    pub empty_polls: u64,
}

impl std::ops::Add for PumpCounts {
    type Output = Self;

    fn add(self, rhs: Self) -> Self {
        Self {
            polls: self.polls + rhs.polls,
            frames: self.frames + rhs.frames,
            empty_polls: self.empty_polls + rhs.empty_polls,
        }
    }
}

#[derive(Default)]
struct WorkerCounts {
    polls: AtomicU64,
    frames: AtomicU64,
    empty_polls: AtomicU64,
}

impl WorkerCounts {
    fn record(&self, frames: usize) {
        self.polls.fetch_add(1, Ordering::Relaxed);
        self.frames.fetch_add(frames as u64, Ordering::Relaxed);
        if frames == 0 {
            self.empty_polls.fetch_add(1, Ordering::Relaxed);
        }
    }

    fn snapshot(&self) -> PumpCounts {
        PumpCounts {
            polls: self.polls.load(Ordering::Relaxed),
            frames: self.frames.load(Ordering::Relaxed),
            empty_polls: self.empty_polls.load(Ordering::Relaxed),
        }
    }
}

struct Worker {
    notify: Arc<Notify>,
    counts: Arc<WorkerCounts>,
    task: JoinHandle<()>,
}

/// [`PollScheduler`] running one tokio task per device.
///
/// Tasks hold their device weakly; [`PollScheduler::detach`] aborts the task.
pub struct PollWorkers {
    handle: Handle,
    config: PumpConfig,
    workers: Mutex<HashMap<DeviceId, Worker>>,
}

impl PollWorkers {
    /// A zero budget is raised to 1: a worker that never delivers would re-poll forever.
    pub fn new(handle: Handle, mut config: PumpConfig) -> Self {
        if config.budget == 0 {
            tracing::warn!("poll budget 0 raised to 1");
            config.budget = 1;
        }
        Self {
            handle,
            config,
            workers: Mutex::new(HashMap::new()),
        }
    }

    /// Spawn workers on the runtime the caller is running in.
    pub fn from_current(config: PumpConfig) -> Result<Self, TryCurrentError> {
        Ok(Self::new(Handle::try_current()?, config))
    }

    pub fn config(&self) -> PumpConfig {
        self.config
    }

    pub fn counts(&self, device: DeviceId) -> Option<PumpCounts> {
        self.workers()
            .get(&device)
            .map(|worker| worker.counts.snapshot())
    }

    pub fn total(&self) -> PumpCounts {
        self.workers()
            .values()
            .map(|worker| worker.counts.snapshot())
            .fold(PumpCounts::default(), |acc, counts| acc + counts)
    }

    pub fn active_workers(&self) -> usize {
        self.workers().len()
    }

    fn workers(&self) -> MutexGuard<'_, HashMap<DeviceId, Worker>> {
        self.workers
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

impl PollScheduler for PollWorkers {
    fn attach(&self, device: &Arc<Device>) {
        let notify = Arc::new(Notify::new());
        let counts = Arc::new(WorkerCounts::default());
        let task = self.handle.spawn(run_worker(
            Arc::downgrade(device),
            Arc::clone(&notify),
            Arc::clone(&counts),
            self.config.budget,
        ));
        tracing::debug!(device = %device.name(), "poll worker started");

        let previous = self.workers().insert(
            device.id(),
            Worker {
                notify,
                counts,
                task,
            },
        );
        if let Some(previous) = previous {
            previous.task.abort();
        }
    }

    fn schedule(&self, device: &Arc<Device>) {
        match self.workers().get(&device.id()) {
            Some(worker) => worker.notify.notify_one(),
            None => tracing::trace!(device = %device.name(), "poll requested with no worker"),
        }
    }

    fn detach(&self, device: DeviceId) {
        if let Some(worker) = self.workers().remove(&device) {
            worker.task.abort();
            tracing::debug!(%device, "poll worker stopped");
        }
    }
}

impl Drop for PollWorkers {
    fn drop(&mut self) {
        for (_, worker) in self.workers().drain() {
            worker.task.abort();
        }
    }
}

impl std::fmt::Debug for PollWorkers {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PollWorkers")
            .field("config", &self.config)
            .field("workers", &self.active_workers())
            .finish_non_exhaustive()
    }
}

async fn run_worker(
    target: Weak<Device>,
    notify: Arc<Notify>,
    counts: Arc<WorkerCounts>,
    budget: usize,
) {
    loop {
        notify.notified().await;
        let Some(device) = target.upgrade() else {
            return;
        };
        let frames = device.poll(budget);
        counts.record(frames);
    }
}

/// [`FrameSink`] forwarding every delivered frame into an unbounded channel.
#[derive(Debug, Clone)]
pub struct ChannelSink {
    tx: mpsc::UnboundedSender<(DeviceId, Frame)>,
}

impl ChannelSink {
    pub fn channel() -> (Self, mpsc::UnboundedReceiver<(DeviceId, Frame)>) {
        let (tx, rx) = mpsc::unbounded_channel();
        (Self { tx }, rx)
    }
}

impl FrameSink for ChannelSink {
    fn on_frame_received(&self, device: DeviceId, frame: Frame) {
        if self.tx.send((device, frame)).is_err() {
            tracing::trace!(%device, "frame receiver gone, frame dropped");
        }
    }
}

/// Wait until `engine` has no queued frames and no pending or running poll.
///
/// Returns `false` if that did not happen within `timeout`.
pub async fn settle(engine: &Engine, timeout: Duration) -> bool {
    let wait = async {
        while !engine.is_quiescent() {
            tokio::time::sleep(Duration::from_millis(1)).await;
        }
    };
    tokio::time::timeout(timeout, wait).await.is_ok()
}
