//! Read-only export of per-device state: the debugfs counter files, as text or as serde data.

use serde::Serialize;

use crate::device::{Device, DeviceId, LinkState};
use crate::gate::GateState;
use crate::mirror::MirrorState;
use crate::peer;
use crate::stats::DeviceStats;

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct DeviceReport {
    pub id: DeviceId,
    pub name: String,
    pub link: LinkState,
    pub gate: GateState,
    pub queued: usize,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub peer: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub mirror: Option<MirrorReport>,
    pub stats: DeviceStats,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct MirrorReport {
    pub external: String,
    pub state: MirrorState,
}

impl DeviceReport {
    pub fn capture(device: &Device) -> Self {
        // Stats, gate and queue depth come from one lock acquisition so they agree.
        let (link, gate, queued, stats) = {
            let state = device.lock();
            (
                state.link,
                state.gate.state(),
                state.queue.len(),
                state.stats,
            )
        };
        Self {
            id: device.id(),
            name: device.name().to_string(),
            link,
            gate,
            queued,
            peer: peer::resolve_peer(device).map(|peer| peer.name().to_string()),
            mirror: device.mirror().map(|mirror| MirrorReport {
                external: mirror.external().name().to_string(),
                state: mirror.state(),
            }),
            stats,
        }
    }
}

/// One `<device>/<counter> <value>` line per counter, devices in report order.
pub fn render_counters(reports: &[DeviceReport]) -> String {
    let mut out = String::new();
    for report in reports {
        for (counter, value) in report.stats.counters() {
            push_counter(&mut out, &report.name, counter, value);
        }
    }
    out
}

fn push_counter(out: &mut String, device: &str, counter: &str, value: u64) {
    out.push_str(device);
    out.push('/');
    out.push_str(counter);
    out.push(' ');
    out.push_str(&value.to_string());
    out.push('\n');
}

#[cfg(test)]
mod tests {
    use pretty_assertions::assert_eq;

    use super::*;

    fn report(name: &str, stats: DeviceStats) -> DeviceReport {
        DeviceReport {
            id: DeviceId(0),
            name: name.to_string(),
            link: LinkState::Up,
            gate: GateState::Open,
            queued: 0,
            peer: None,
            mirror: None,
            stats,
        }
    }

    #[test]
    fn renders_debugfs_layout() {
        let stats = DeviceStats {
            tx_packets: 3,
            tx_bytes: 180,
            rx_packets: 2,
            rx_bytes: 120,
            rx_dropped: 1,
            ..Default::default()
        };
        let text = render_counters(&[report("mnet0", stats)]);

        assert_eq!(
            text,
            "mnet0/tx_packets 3\n\
             mnet0/tx_bytes 180\n\
             mnet0/rx_packets 2\n\
             mnet0/rx_bytes 120\n\
             mnet0/rx_dropped 1\n\
             mnet0/tx_dropped 0\n\
             mnet0/tx_rejected 0\n"
        );
    }

    #[test]
    fn json_omits_absent_relations() {
        let value = serde_json::to_value(report("mnet1", DeviceStats::default())).unwrap();

        assert_eq!(value["name"], "mnet1");
        assert_eq!(value["link"], "up");
        assert_eq!(value["gate"], "open");
        assert_eq!(value["stats"]["rx_dropped"], 0);
        assert!(value.get("peer").is_none());
        assert!(value.get("mirror").is_none());
    }
}
