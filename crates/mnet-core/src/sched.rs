//! How a poll request gets turned into a call to [`Device::poll`].

use std::collections::VecDeque;
use std::sync::{Arc, Mutex, MutexGuard, Weak};

use crate::device::{Device, DeviceId};

/// Runs polls on behalf of the engine.
///
/// `schedule` is called with no device lock held, at most once per outstanding request: the
/// device tracks whether a request is pending and does not ask again until that poll starts.
/// Implementations may poll inline, defer to a worker, or record the request for later.
pub trait PollScheduler: Send + Sync {
    /// Called once when a device is created.
    fn attach(&self, _device: &Arc<Device>) {}

    fn schedule(&self, device: &Arc<Device>);

    /// Called during teardown, once no poll can start for `device`. A poll on the tearing-down
    /// thread itself (teardown from a delivery callback) may still be unwinding.
    fn detach(&self, _device: DeviceId) {}
}

/// Records poll requests and runs them when told to.
///
/// This is the deterministic tick used by tests and single-threaded drivers.
#[derive(Debug, Default)]
pub struct ManualScheduler {
    pending: Mutex<VecDeque<Weak<Device>>>,
}

impl ManualScheduler {
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of outstanding poll requests.
    pub fn pending(&self) -> usize {
        self.queue().len()
    }

    /// Run every poll request outstanding at the time of the call, each with `budget`.
    ///
    /// Requests raised while these polls run are left for the next call. Returns the number of
    /// frames delivered.
    pub fn run_pending(&self, budget: usize) -> usize {
        let batch: Vec<Weak<Device>> = self.queue().drain(..).collect();
        batch
            .iter()
            .filter_map(Weak::upgrade)
            .map(|device| device.poll(budget))
            .sum()
    }

    /// Keep running rounds until no request is outstanding or `max_rounds` is reached.
    pub fn run_until_idle(&self, budget: usize, max_rounds: usize) -> usize {
        let mut delivered = 0;
        for _ in 0..max_rounds {
            if self.pending() == 0 {
                break;
            }
            delivered += self.run_pending(budget);
        }
        delivered
    }

    fn queue(&self) -> MutexGuard<'_, VecDeque<Weak<Device>>> {
        self.pending
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

impl PollScheduler for ManualScheduler {
    fn schedule(&self, device: &Arc<Device>) {
        self.queue().push_back(Arc::downgrade(device));
    }

    fn detach(&self, device: DeviceId) {
        self.queue().retain(|pending| {
            pending
                .upgrade()
                .is_some_and(|pending| pending.id() != device)
        });
    }
}
