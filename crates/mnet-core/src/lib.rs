//! Packet-path engine for virtual Ethernet interfaces.
//!
//! A transmit on a device is counted, then routed to a mirrored real device, to a bridged peer,
//! or back to the device itself. Routed frames are parked in the destination's bounded completion
//! queue and drained by a budget-limited [`Device::poll`], which delivers them upward through a
//! [`FrameSink`]. A per-device [`FlowGate`] tells queueing layers when a device's queue is full.
//!
//! Polls are requested through a [`PollScheduler`]: [`ManualScheduler`] runs them on demand,
//! `mnet-pump` runs them on tokio tasks.
#![forbid(unsafe_code)]

mod device;
mod engine;
mod error;
mod poll;
mod transmit;

pub mod config;
pub mod gate;
pub mod mirror;
pub mod peer;
pub mod queue;
pub mod report;
pub mod sched;
pub mod sink;
pub mod stats;

pub use config::{EngineConfig, RxPath};
pub use device::{Device, DeviceId, LinkState};
pub use engine::{Engine, EngineBuilder, MAX_NAME_LEN};
pub use error::{TopologyError, TxError};
pub use gate::{FlowGate, GateState};
pub use mirror::{MirrorLink, MirrorState};
pub use poll::HEARTBEAT_INTERVAL;
pub use queue::{CompletionQueue, QueueFull, DEFAULT_QUEUE_DEPTH};
pub use report::{DeviceReport, MirrorReport};
pub use sched::{ManualScheduler, PollScheduler};
pub use sink::{FrameSink, NullSink, RecordingSink};
pub use stats::DeviceStats;
pub use transmit::TxOutcome;

pub use mnet_backend::{
    ExternalDevice, Frame, FrameAllocator, FrameError, HeapAllocator, RxDisposition, RxHandler,
};
