use std::fmt;

use serde::Serialize;

/// Per-device counters.
///
/// Counters only ever increase. They are mutated under the owning device's lock, so a snapshot
/// taken through [`crate::Device::stats`] is a consistent point-in-time view.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct DeviceStats {
    pub tx_packets: u64,
    pub tx_bytes: u64,
    pub rx_packets: u64,
    pub rx_bytes: u64,
    /// Frames destined for this device that were dropped: queue full, receive-buffer allocation
    /// failure, or discarded at teardown.
    pub rx_dropped: u64,
    /// Frames accepted for transmit that could not be handed on (mirror down, peer gone).
    pub tx_dropped: u64,
    /// Zero-length transmits filtered before they reached the statistics.
    pub tx_rejected: u64,
}

impl DeviceStats {
    pub(crate) fn record_tx(&mut self, len: usize) {
        self.tx_packets += 1;
        self.tx_bytes += len as u64;
    }

    pub(crate) fn record_rx(&mut self, len: usize) {
        self.rx_packets += 1;
        self.rx_bytes += len as u64;
    }

    /// Counter names and values in export order.
    pub fn counters(&self) -> [(&'static str, u64); 7] {
        [
            ("tx_packets", self.tx_packets),
            ("tx_bytes", self.tx_bytes),
            ("rx_packets", self.rx_packets),
            ("rx_bytes", self.rx_bytes),
            ("rx_dropped", self.rx_dropped),
            ("tx_dropped", self.tx_dropped),
            ("tx_rejected", self.tx_rejected),
        ]
    }
}

impl fmt::Display for DeviceStats {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "tx: {} pkts/{} bytes, rx: {} pkts/{} bytes, drop: rx {}/tx {}, rejected: {}",
            self.tx_packets,
            self.tx_bytes,
            self.rx_packets,
            self.rx_bytes,
            self.rx_dropped,
            self.tx_dropped,
            self.tx_rejected
        )
    }
}
