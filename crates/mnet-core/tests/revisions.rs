//! Mirror bridging and the synchronous / discard receive paths.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use mnet_backend::{FrameError, RxDisposition, SimNic};
use mnet_core::{
    DeviceStats, Engine, EngineConfig, Frame, FrameAllocator, HeapAllocator, ManualScheduler,
    RecordingSink, RxPath, TxError, TxOutcome,
};
use pretty_assertions::assert_eq;

fn frame(len: usize, tag: u8) -> Frame {
    Frame::new(vec![tag; len]).unwrap()
}

/// Heap allocator that can be switched into failing every request.
#[derive(Default)]
struct FlakyAllocator {
    exhausted: AtomicBool,
}

impl FlakyAllocator {
    fn exhaust(&self, exhausted: bool) {
        self.exhausted.store(exhausted, Ordering::SeqCst);
    }
}

impl FrameAllocator for FlakyAllocator {
    fn alloc_copy(&self, data: &[u8]) -> Result<Frame, FrameError> {
        if self.exhausted.load(Ordering::SeqCst) {
            return Err(FrameError::AllocationFailure { len: data.len() });
        }
        HeapAllocator.alloc_copy(data)
    }
}

struct Bridge {
    engine: Engine,
    nic: Arc<SimNic>,
    sink: Arc<RecordingSink>,
    alloc: Arc<FlakyAllocator>,
    sched: Arc<ManualScheduler>,
}

fn bridge() -> (Bridge, mnet_core::DeviceId) {
    let nic = Arc::new(SimNic::new("eth0"));
    let sink = Arc::new(RecordingSink::new());
    let alloc = Arc::new(FlakyAllocator::default());
    let sched = Arc::new(ManualScheduler::new());
    let engine = Engine::builder()
        .sink(sink.clone())
        .allocator(alloc.clone())
        .scheduler(sched.clone())
        .build();
    let dev = engine.create("mnet0").unwrap();
    engine.attach_mirror(dev, nic.clone()).unwrap();
    engine.open(dev).unwrap();
    (
        Bridge {
            engine,
            nic,
            sink,
            alloc,
            sched,
        },
        dev,
    )
}

#[test]
fn mirrored_transmit_lands_on_external_device() {
    let (b, dev) = bridge();

    assert_eq!(b.engine.transmit(dev, frame(60, 7)), Ok(TxOutcome::Mirrored));

    let sent = b.nic.drain_tx_frames();
    assert_eq!(sent.len(), 1);
    assert_eq!(sent[0].as_slice(), &[7; 60][..]);
    assert_eq!(b.nic.stats().tx_frames, 1);

    // No local completion queue or poll is involved.
    assert_eq!(b.sched.pending(), 0);
    let stats = b.engine.stats(dev).unwrap();
    assert_eq!((stats.tx_packets, stats.tx_bytes, stats.rx_packets), (1, 60, 0));
}

#[test]
fn mirror_down_counts_and_discards() {
    let (b, dev) = bridge();
    b.nic.set_up(false);

    assert_eq!(
        b.engine.transmit(dev, frame(60, 1)),
        Err(TxError::MirrorUnavailable)
    );

    assert!(b.nic.drain_tx_frames().is_empty());
    let stats = b.engine.stats(dev).unwrap();
    assert_eq!(stats.tx_packets, 1);
    assert_eq!(stats.tx_bytes, 60);
    assert_eq!(stats.tx_dropped, 1);
    assert_eq!(stats.rx_packets, 0);
}

#[test]
fn inbound_frames_are_cloned_into_the_virtual_device() {
    let (b, dev) = bridge();

    assert_eq!(b.nic.inject_inbound(frame(90, 3)), RxDisposition::Pass);

    // The original continues on the external device.
    let original = b.nic.drain_rx_frames();
    assert_eq!(original.len(), 1);
    assert_eq!(original[0].len(), 90);

    // The clone was delivered synchronously, without the completion queue.
    let delivered = b.sink.drain();
    assert_eq!(delivered.len(), 1);
    assert_eq!(delivered[0].0, dev);
    assert_eq!(delivered[0].1.as_slice(), &[3; 90][..]);
    assert_eq!(b.sched.pending(), 0);

    let stats = b.engine.stats(dev).unwrap();
    assert_eq!((stats.rx_packets, stats.rx_bytes), (1, 90));
}

#[test]
fn inbound_clone_failure_leaves_original_untouched() {
    let (b, dev) = bridge();
    b.alloc.exhaust(true);

    assert_eq!(b.nic.inject_inbound(frame(60, 4)), RxDisposition::Pass);

    assert_eq!(b.nic.drain_rx_frames().len(), 1);
    assert!(b.sink.is_empty());
    assert_eq!(
        b.engine.stats(dev).unwrap(),
        DeviceStats {
            rx_dropped: 1,
            ..Default::default()
        }
    );

    // Recoverable on the next event.
    b.alloc.exhaust(false);
    b.nic.inject_inbound(frame(60, 5));
    assert_eq!(b.engine.stats(dev).unwrap().rx_packets, 1);
}

#[test]
fn tap_ignores_traffic_while_device_is_down() {
    let (b, dev) = bridge();
    b.engine.stop(dev).unwrap();

    b.nic.inject_inbound(frame(60, 6));

    assert!(b.sink.is_empty());
    assert_eq!(b.engine.stats(dev).unwrap(), DeviceStats::default());
    assert_eq!(b.nic.stats().rx_frames, 1);
}

#[test]
fn immediate_path_delivers_inside_transmit() {
    let sink = Arc::new(RecordingSink::new());
    let sched = Arc::new(ManualScheduler::new());
    let engine = Engine::builder()
        .config(EngineConfig::default().with_rx_path(RxPath::Immediate))
        .sink(sink.clone())
        .scheduler(sched.clone())
        .build();
    let dev = engine.create("mnet0").unwrap();
    engine.open(dev).unwrap();

    for tag in 0..3 {
        assert_eq!(
            engine.transmit(dev, frame(60, tag)),
            Ok(TxOutcome::Delivered { device: dev })
        );
    }

    assert_eq!(sink.len(), 3);
    assert_eq!(sched.pending(), 0);
    assert_eq!(engine.queue_active(dev), Ok(true));
    let stats = engine.stats(dev).unwrap();
    assert_eq!((stats.tx_packets, stats.rx_packets, stats.rx_bytes), (3, 3, 180));
}

#[test]
fn immediate_path_allocation_failure_counts_rx_dropped() {
    let alloc = Arc::new(FlakyAllocator::default());
    alloc.exhaust(true);
    let sink = Arc::new(RecordingSink::new());
    let engine = Engine::builder()
        .config(EngineConfig::default().with_rx_path(RxPath::Immediate))
        .allocator(alloc)
        .sink(sink.clone())
        .build();
    let dev = engine.create("mnet0").unwrap();
    engine.open(dev).unwrap();

    assert_eq!(engine.transmit(dev, frame(60, 0)), Ok(TxOutcome::Dropped));
    let stats = engine.stats(dev).unwrap();
    assert_eq!((stats.tx_packets, stats.rx_packets, stats.rx_dropped), (1, 0, 1));
    assert!(sink.is_empty());
}

#[test]
fn immediate_path_follows_the_peer() {
    let sink = Arc::new(RecordingSink::new());
    let engine = Engine::builder()
        .config(EngineConfig::default().with_rx_path(RxPath::Immediate))
        .sink(sink.clone())
        .build();
    let a = engine.create("mnet0").unwrap();
    let b = engine.create("mnet1").unwrap();
    engine.attach_peer(a, b).unwrap();
    engine.open(a).unwrap();
    engine.open(b).unwrap();

    assert_eq!(
        engine.transmit(a, frame(60, 0)),
        Ok(TxOutcome::Delivered { device: b })
    );
    assert_eq!(sink.count_for(b), 1);
    assert_eq!(engine.stats(b).unwrap().rx_packets, 1);
}

#[test]
fn discard_path_counts_and_frees() {
    let sink = Arc::new(RecordingSink::new());
    let sched = Arc::new(ManualScheduler::new());
    let engine = Engine::builder()
        .config(EngineConfig::default().with_rx_path(RxPath::Discard))
        .sink(sink.clone())
        .scheduler(sched.clone())
        .build();
    let dev = engine.create("mnet0").unwrap();
    engine.open(dev).unwrap();

    assert_eq!(engine.transmit(dev, frame(60, 0)), Ok(TxOutcome::Consumed));
    assert_eq!(engine.transmit(dev, frame(60, 0)), Ok(TxOutcome::Consumed));

    assert!(sink.is_empty());
    assert_eq!(sched.pending(), 0);
    assert_eq!(
        engine.stats(dev).unwrap(),
        DeviceStats {
            tx_packets: 2,
            tx_bytes: 120,
            ..Default::default()
        }
    );
}

#[test]
fn counters_render_for_every_device() {
    let (b, dev) = bridge();
    b.engine.transmit(dev, frame(60, 0)).unwrap();
    let other = b.engine.create("mnet1").unwrap();
    b.engine.open(other).unwrap();

    let text = b.engine.render_counters();
    assert!(text.contains("mnet0/tx_packets 1\n"));
    assert!(text.contains("mnet0/tx_bytes 60\n"));
    assert!(text.contains("mnet1/tx_packets 0\n"));
    assert_eq!(text.lines().count(), 14);

    let reports = b.engine.snapshot();
    assert_eq!(reports.len(), 2);
    let mirror = reports[0].mirror.as_ref().unwrap();
    assert_eq!(mirror.external, "eth0");
}
