//! The device registry: owns every virtual device and the topology between them.

use std::collections::BTreeMap;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, RwLock};

use mnet_backend::{ExternalDevice, Frame, FrameAllocator, HeapAllocator};

use crate::config::EngineConfig;
use crate::device::{Device, DeviceId, EngineContext};
use crate::error::{TopologyError, TxError};
use crate::mirror::{MirrorLink, MirrorState, MirrorTap};
use crate::peer;
use crate::report::{self, DeviceReport};
use crate::sched::{ManualScheduler, PollScheduler};
use crate::sink::{FrameSink, NullSink};
use crate::stats::DeviceStats;
use crate::transmit::TxOutcome;

/// Longest accepted interface name (`IFNAMSIZ - 1`).
pub const MAX_NAME_LEN: usize = 15;

pub struct EngineBuilder {
    config: EngineConfig,
    sink: Arc<dyn FrameSink>,
    scheduler: Arc<dyn PollScheduler>,
    allocator: Arc<dyn FrameAllocator>,
}

impl EngineBuilder {
    pub fn config(mut self, config: EngineConfig) -> Self {
        self.config = config;
        self
    }

    pub fn sink(mut self, sink: Arc<dyn FrameSink>) -> Self {
        self.sink = sink;
        self
    }

    pub fn scheduler(mut self, scheduler: Arc<dyn PollScheduler>) -> Self {
        self.scheduler = scheduler;
        self
    }

    pub fn allocator(mut self, allocator: Arc<dyn FrameAllocator>) -> Self {
        self.allocator = allocator;
        self
    }

    pub fn build(self) -> Engine {
        Engine {
            ctx: Arc::new(EngineContext {
                config: self.config,
                sink: self.sink,
                scheduler: self.scheduler,
                allocator: self.allocator,
            }),
            devices: RwLock::new(BTreeMap::new()),
            next_id: AtomicU32::new(0),
            topology: Mutex::new(()),
        }
    }
}

impl Default for EngineBuilder {
    fn default() -> Self {
        Self {
            config: EngineConfig::default(),
            sink: Arc::new(NullSink),
            scheduler: Arc::new(ManualScheduler::new()),
            allocator: Arc::new(HeapAllocator),
        }
    }
}

/// Owns the virtual devices.
///
/// Setup calls (`create`, `attach_*`, `open`, `stop`, `destroy`) are serialized against each
/// other; the packet path (`transmit`, `poll`) only takes per-device locks. Dropping the engine
/// destroys every remaining device.
pub struct Engine {
    ctx: Arc<EngineContext>,
    devices: RwLock<BTreeMap<DeviceId, Arc<Device>>>,
    next_id: AtomicU32,
    topology: Mutex<()>,
}

impl Engine {
    pub fn builder() -> EngineBuilder {
        EngineBuilder::default()
    }

    pub fn new(config: EngineConfig) -> Self {
        Self::builder().config(config).build()
    }

    pub fn config(&self) -> &EngineConfig {
        &self.ctx.config
    }

    /// Register a device called `name`. A `%d` in the name is replaced by the lowest index that
    /// gives a free name, like `alloc_netdev("mnet%d")`.
    pub fn create(&self, name: &str) -> Result<DeviceId, TopologyError> {
        let _topology = self.lock_topology();
        let name = self.expand_name(name)?;
        validate_name(&name)?;
        if self.find(&name).is_some() {
            return Err(TopologyError::NameTaken(name));
        }

        let id = DeviceId(self.next_id.fetch_add(1, Ordering::Relaxed));
        let device = Arc::new(Device::new(id, name, Arc::clone(&self.ctx)));
        self.ctx.scheduler.attach(&device);
        tracing::info!(device = %device.name(), %id, "device created");
        self.write_devices().insert(id, device);
        Ok(id)
    }

    /// Register a device named after [`EngineConfig::name_template`].
    pub fn create_next(&self) -> Result<DeviceId, TopologyError> {
        let template = self.ctx.config.name_template.clone();
        self.create(&template)
    }

    pub fn device(&self, id: DeviceId) -> Result<Arc<Device>, TopologyError> {
        self.read_devices()
            .get(&id)
            .cloned()
            .ok_or(TopologyError::UnknownDevice(id))
    }

    pub fn find(&self, name: &str) -> Option<DeviceId> {
        self.read_devices()
            .values()
            .find(|device| device.name() == name)
            .map(|device| device.id())
    }

    pub fn device_ids(&self) -> Vec<DeviceId> {
        self.read_devices().keys().copied().collect()
    }

    pub fn len(&self) -> usize {
        self.read_devices().len()
    }

    pub fn is_empty(&self) -> bool {
        self.read_devices().is_empty()
    }

    /// Bridge `a` and `b`: each one's transmits land in the other's completion queue.
    ///
    /// On failure both devices are faulted and can no longer be opened.
    pub fn attach_peer(&self, a: DeviceId, b: DeviceId) -> Result<(), TopologyError> {
        let _topology = self.lock_topology();
        let a = self.device(a)?;
        let b = self.device(b)?;
        peer::link_peers(&a, &b).inspect_err(|err| {
            tracing::warn!(a = %a.name(), b = %b.name(), %err, "peer setup failed");
            a.fault();
            b.fault();
        })
    }

    /// Mirror device `id` onto `external`.
    ///
    /// Registers the receive tap on `external`. On failure the device is faulted.
    pub fn attach_mirror(
        &self,
        id: DeviceId,
        external: Arc<dyn ExternalDevice>,
    ) -> Result<(), TopologyError> {
        let _topology = self.lock_topology();
        let device = self.device(id)?;
        Self::link_mirror(&device, external).inspect_err(|err| {
            tracing::warn!(device = %device.name(), %err, "mirror setup failed");
            device.fault();
        })
    }

    fn link_mirror(
        device: &Arc<Device>,
        external: Arc<dyn ExternalDevice>,
    ) -> Result<(), TopologyError> {
        let state = device.link_state();
        if state != crate::LinkState::Created {
            return Err(TopologyError::InvalidState {
                device: device.id(),
                state,
            });
        }
        if let Some(existing) = device.mirror() {
            return Err(TopologyError::DoubleRegistration(format!(
                "{} already mirrors {}",
                device.name(),
                existing.external().name()
            )));
        }

        let link = Arc::new(MirrorLink::new(external));
        link.attach(Arc::new(MirrorTap::new(device)))?;
        if device.mirror.set(Arc::clone(&link)).is_err() {
            link.detach();
            return Err(TopologyError::DoubleRegistration(format!(
                "{} raced with another mirror registration",
                device.name()
            )));
        }
        Ok(())
    }

    pub fn open(&self, id: DeviceId) -> Result<(), TopologyError> {
        let _topology = self.lock_topology();
        self.device(id)?.open()
    }

    /// Bring the link down. Waits for an in-flight poll; queued frames are kept.
    pub fn stop(&self, id: DeviceId) -> Result<(), TopologyError> {
        // The link change is atomic under the device lock; the poll wait runs outside the topology
        // lock so a delivery callback can still reconfigure devices.
        self.device(id)?.stop();
        Ok(())
    }

    /// Quiesce and unregister a device. Returns its final counters.
    ///
    /// Frames still queued are released without delivery and counted in `rx_dropped`. Once this
    /// returns no poll runs for the device and the mirror tap is gone. Called from the device's own
    /// delivery callback, it does not wait for the poll that invoked it; that poll stops after the
    /// frame in hand, which is still counted as received.
    pub fn destroy(&self, id: DeviceId) -> Result<DeviceStats, TopologyError> {
        let device = {
            let _topology = self.lock_topology();
            let device = self.device(id)?;
            if !device.begin_teardown() {
                return Err(TopologyError::UnknownDevice(id));
            }
            device
        };
        device.finish_teardown();
        self.ctx.scheduler.detach(id);
        self.write_devices().remove(&id);
        Ok(device.stats())
    }

    /// Destroy every device.
    pub fn shutdown(&self) {
        for id in self.device_ids() {
            if let Err(err) = self.destroy(id) {
                tracing::warn!(%id, %err, "destroy during shutdown failed");
            }
        }
    }

    pub fn transmit(&self, id: DeviceId, frame: Frame) -> Result<TxOutcome, TxError> {
        let device = self
            .device(id)
            .map_err(|_| TxError::UnknownDevice(id))?;
        device.transmit(frame)
    }

    pub fn poll(&self, id: DeviceId, budget: usize) -> Result<usize, TopologyError> {
        Ok(self.device(id)?.poll(budget))
    }

    pub fn stats(&self, id: DeviceId) -> Result<DeviceStats, TopologyError> {
        Ok(self.device(id)?.stats())
    }

    pub fn queue_active(&self, id: DeviceId) -> Result<bool, TopologyError> {
        Ok(self.device(id)?.queue_active())
    }

    pub fn peer_of(&self, id: DeviceId) -> Result<Option<DeviceId>, TopologyError> {
        let device = self.device(id)?;
        Ok(peer::resolve_peer(&device).map(|peer| peer.id()))
    }

    pub fn mirror_state(&self, id: DeviceId) -> Result<Option<MirrorState>, TopologyError> {
        Ok(self.device(id)?.mirror().map(|mirror| mirror.state()))
    }

    /// `true` when no device has queued frames or a pending/running poll.
    pub fn is_quiescent(&self) -> bool {
        self.read_devices().values().all(|device| device.is_idle())
    }

    pub fn snapshot(&self) -> Vec<DeviceReport> {
        let devices: Vec<Arc<Device>> = self.read_devices().values().cloned().collect();
        devices
            .iter()
            .map(|device| DeviceReport::capture(device))
            .collect()
    }

    pub fn render_counters(&self) -> String {
        report::render_counters(&self.snapshot())
    }

    fn expand_name(&self, name: &str) -> Result<String, TopologyError> {
        match name.matches("%d").count() {
            0 => Ok(name.to_string()),
            1 => {
                let taken: Vec<String> = self
                    .read_devices()
                    .values()
                    .map(|device| device.name().to_string())
                    .collect();
                // With n names taken, one of the first n + 1 indices is free.
                (0..=taken.len())
                    .map(|index| name.replacen("%d", &index.to_string(), 1))
                    .find(|candidate| !taken.contains(candidate))
                    .ok_or_else(|| TopologyError::NameTaken(name.to_string()))
            }
            _ => Err(TopologyError::InvalidName(name.to_string())),
        }
    }

    fn lock_topology(&self) -> MutexGuard<'_, ()> {
        self.topology
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    fn read_devices(&self) -> std::sync::RwLockReadGuard<'_, BTreeMap<DeviceId, Arc<Device>>> {
        self.devices
            .read()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    fn write_devices(&self) -> std::sync::RwLockWriteGuard<'_, BTreeMap<DeviceId, Arc<Device>>> {
        self.devices
            .write()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

impl Drop for Engine {
    fn drop(&mut self) {
        self.shutdown();
    }
}

impl std::fmt::Debug for Engine {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Engine")
            .field("config", &self.ctx.config)
            .field("devices", &self.device_ids())
            .finish_non_exhaustive()
    }
}

fn validate_name(name: &str) -> Result<(), TopologyError> {
    let valid = !name.is_empty()
        && name.len() <= MAX_NAME_LEN
        && !name.contains('/')
        && !name.chars().any(char::is_whitespace);
    if valid {
        Ok(())
    } else {
        Err(TopologyError::InvalidName(name.to_string()))
    }
}
