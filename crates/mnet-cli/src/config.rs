use anyhow::{bail, Result};
use clap::{Parser, ValueEnum};
use mnet_backend::{ETH_HLEN, MAX_FRAME_LEN};
use mnet_pump::DEFAULT_POLL_BUDGET;

use crate::profile::Profile;

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum OutputFormat {
    Text,
    Json,
}

/// Drive frames through one driver revision and print the resulting counters.
#[derive(Debug, Clone, Parser)]
#[command(name = "mnet", version, about)]
pub struct Config {
    /// Driver revision to run.
    ///
    /// Environment variable: `MNET_PROFILE`.
    #[arg(long, value_enum, env = "MNET_PROFILE", default_value_t = Profile::Napi)]
    pub profile: Profile,

    /// Frames transmitted per device (and injected on the real NIC for `bridge`).
    ///
    /// Environment variable: `MNET_FRAMES`.
    #[arg(long, env = "MNET_FRAMES", default_value_t = 100)]
    pub frames: usize,

    /// Length of every generated frame, Ethernet header included.
    ///
    /// Environment variable: `MNET_FRAME_LEN`.
    #[arg(long, env = "MNET_FRAME_LEN", default_value_t = 60)]
    pub frame_len: usize,

    /// Frames a single poll may deliver.
    ///
    /// Environment variable: `MNET_BUDGET`.
    #[arg(long, env = "MNET_BUDGET", default_value_t = DEFAULT_POLL_BUDGET)]
    pub budget: usize,

    /// Completion queue depth per device; 1 is the classic single slot.
    ///
    /// Environment variable: `MNET_QUEUE_DEPTH`.
    #[arg(long, env = "MNET_QUEUE_DEPTH", default_value_t = mnet_core::DEFAULT_QUEUE_DEPTH)]
    pub queue_depth: usize,

    /// Environment variable: `MNET_OUTPUT`.
    #[arg(long, value_enum, env = "MNET_OUTPUT", default_value_t = OutputFormat::Text)]
    pub output: OutputFormat,

    /// Keep the simulated real NIC down (`bridge` only), so mirrored transmits are discarded.
    ///
    /// Environment variable: `MNET_EXTERNAL_DOWN`.
    #[arg(long, env = "MNET_EXTERNAL_DOWN")]
    pub external_down: bool,
}

impl Config {
    pub fn validate(&self) -> Result<()> {
        if !(ETH_HLEN..=MAX_FRAME_LEN).contains(&self.frame_len) {
            bail!(
                "frame length {} outside {ETH_HLEN}..={MAX_FRAME_LEN}",
                self.frame_len
            );
        }
        if self.budget == 0 {
            bail!("poll budget must be at least 1");
        }
        if self.queue_depth == 0 {
            bail!("queue depth must be at least 1");
        }
        if self.external_down && !self.profile.uses_external_nic() {
            bail!(
                "--external-down only applies to the bridge profile, not {}",
                self.profile
            );
        }
        Ok(())
    }
}
