use clap::ValueEnum;
use mnet_core::RxPath;
use serde::Serialize;

/// The driver revisions the engine can stand in for.
#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum, Serialize)]
#[serde(rename_all = "kebab-case")]
pub enum Profile {
    /// Pure software loopback: every frame is copied and received inside transmit.
    Loopback,
    /// Loopback through the completion slot and a budgeted poll.
    Napi,
    /// NAPI loopback fed with interleaved zero-length transmits that must be filtered.
    NapiFiltered,
    /// Two devices bridged to each other.
    Peer,
    /// One device mirrored onto a (simulated) real NIC.
    Bridge,
    /// No-op skeleton: frames are counted and freed.
    Skeleton,
}

impl Profile {
    pub fn rx_path(self) -> RxPath {
        match self {
            Profile::Loopback => RxPath::Immediate,
            Profile::Napi | Profile::NapiFiltered | Profile::Peer | Profile::Bridge => {
                RxPath::Deferred
            }
            Profile::Skeleton => RxPath::Discard,
        }
    }

    /// Number of virtual devices the revision registers.
    pub fn device_count(self) -> usize {
        match self {
            Profile::Peer => 2,
            _ => 1,
        }
    }

    pub fn uses_external_nic(self) -> bool {
        self == Profile::Bridge
    }

    /// Whether a zero-length transmit follows every real one.
    pub fn sends_empty_frames(self) -> bool {
        self == Profile::NapiFiltered
    }
}

impl std::fmt::Display for Profile {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self.to_possible_value() {
            Some(value) => f.write_str(value.get_name()),
            None => write!(f, "{self:?}"),
        }
    }
}
