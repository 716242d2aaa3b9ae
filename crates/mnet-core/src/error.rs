use thiserror::Error;

use crate::device::{DeviceId, LinkState};

/// Packet-path failures.
///
/// None of these are fatal: they are surfaced to the caller of `transmit` and reflected in the
/// device counters, and the next transmit proceeds normally.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum TxError {
    /// Zero-length transmit (the spurious control transmits some stacks emit). Counted in
    /// `tx_rejected` only.
    #[error("zero-length frame rejected")]
    EmptyFrame,

    /// The destination completion queue was occupied. The frame was dropped and counted in the
    /// destination's `rx_dropped`; retry once the destination's gate reopens.
    #[error("completion queue of device {device} is full")]
    Backpressure { device: DeviceId },

    /// The bridged peer has been torn down or is not up.
    #[error("peer device is unavailable")]
    PeerUnavailable,

    /// The mirrored external device is down; the frame was counted as sent and discarded.
    #[error("mirrored device is unavailable")]
    MirrorUnavailable,

    #[error("device {device} is not up")]
    DeviceDown { device: DeviceId },

    #[error("unknown device {0}")]
    UnknownDevice(DeviceId),
}

impl TxError {
    /// Whether retrying the same transmit later can succeed without any topology change.
    pub fn is_retryable(&self) -> bool {
        matches!(self, TxError::Backpressure { .. })
    }
}

/// Setup and lifecycle failures.
///
/// These indicate a programming-level misconfiguration; a device involved in a failed topology
/// call is marked faulted and can no longer be opened.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum TopologyError {
    #[error("unknown device {0}")]
    UnknownDevice(DeviceId),

    #[error("invalid device name {0:?}")]
    InvalidName(String),

    #[error("device name {0:?} is already in use")]
    NameTaken(String),

    #[error("double registration: {0}")]
    DoubleRegistration(String),

    #[error("invalid topology: {0}")]
    InvalidTopology(String),

    #[error("device {0} was faulted by an earlier setup error")]
    Faulted(DeviceId),

    #[error("device {device} is {state:?}")]
    InvalidState { device: DeviceId, state: LinkState },
}
