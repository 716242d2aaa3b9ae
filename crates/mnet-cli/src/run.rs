//! One end-to-end run: build a revision's topology, push traffic through it, collect counters.

use std::sync::Arc;
use std::time::Duration;

use anyhow::{bail, Context, Result};
use mnet_backend::{ExternalDevice, Frame, SimNic, ETH_HLEN};
use mnet_core::{DeviceId, DeviceReport, Engine, EngineConfig, TxError};
use mnet_pump::{settle, ChannelSink, PollWorkers, PumpConfig};
use serde::Serialize;

use crate::config::{Config, OutputFormat};
use crate::profile::Profile;

/// Ethertype for local experiments (IEEE 802 "Local Experimental Ethertype 1").
const ETHERTYPE_EXPERIMENTAL: u16 = 0x88b5;
const SETTLE_TIMEOUT: Duration = Duration::from_secs(10);
/// How long a producer waits for a closed gate before transmitting anyway.
const GATE_TIMEOUT: Duration = Duration::from_secs(1);
const GATE_BACKOFF_MIN: Duration = Duration::from_micros(50);
const GATE_BACKOFF_MAX: Duration = Duration::from_millis(2);

/// Outcomes of every transmit issued during a run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize)]
pub struct TxTally {
    pub accepted: u64,
    pub backpressure: u64,
    pub rejected: u64,
    pub undeliverable: u64,
}

impl TxTally {
    fn record(&mut self, result: Result<mnet_core::TxOutcome, TxError>) -> Result<()> {
        match result {
            Ok(_) => self.accepted += 1,
            Err(TxError::Backpressure { .. }) => self.backpressure += 1,
            Err(TxError::EmptyFrame) => self.rejected += 1,
            Err(TxError::MirrorUnavailable | TxError::PeerUnavailable) => self.undeliverable += 1,
            Err(err) => return Err(err).context("transmit failed"),
        }
        Ok(())
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ExternalReport {
    pub name: String,
    pub up: bool,
    pub tx_frames: u64,
    pub tx_dropped: u64,
    pub rx_frames: u64,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct RunReport {
    pub profile: Profile,
    pub frames: usize,
    pub frame_len: usize,
    pub tx: TxTally,
    /// Frames the protocol-stack side actually received.
    pub delivered: u64,
    pub polls: u64,
    pub empty_polls: u64,
    pub devices: Vec<DeviceReport>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub external: Option<ExternalReport>,
}

impl RunReport {
    pub fn render(&self, format: OutputFormat) -> Result<String> {
        match format {
            OutputFormat::Json => Ok(serde_json::to_string_pretty(self)?),
            OutputFormat::Text => Ok(self.render_text()),
        }
    }

    fn render_text(&self) -> String {
        let mut out = format!(
            "profile {}: {} frames x {} bytes per device\n",
            self.profile, self.frames, self.frame_len
        );
        out.push_str(&format!(
            "transmits: {} accepted, {} backpressure, {} rejected, {} undeliverable\n",
            self.tx.accepted, self.tx.backpressure, self.tx.rejected, self.tx.undeliverable
        ));
        out.push_str(&format!(
            "delivered upward: {} ({} polls, {} empty)\n",
            self.delivered, self.polls, self.empty_polls
        ));
        for device in &self.devices {
            out.push_str(&format!(
                "{} [{:?}, gate {:?}]: {}\n",
                device.name, device.link, device.gate, device.stats
            ));
        }
        if let Some(external) = &self.external {
            out.push_str(&format!(
                "{} [{}]: tx {} (dropped {}), rx {}\n",
                external.name,
                if external.up { "up" } else { "down" },
                external.tx_frames,
                external.tx_dropped,
                external.rx_frames
            ));
        }
        out.push_str(&mnet_core::report::render_counters(&self.devices));
        out
    }
}

struct Topology {
    devices: Vec<DeviceId>,
    nic: Option<Arc<SimNic>>,
}

fn build_topology(engine: &Engine, config: &Config) -> Result<Topology> {
    let mut devices = Vec::with_capacity(config.profile.device_count());
    for _ in 0..config.profile.device_count() {
        devices.push(engine.create_next()?);
    }
    if let [a, b] = devices[..] {
        engine.attach_peer(a, b)?;
    }

    let nic = if config.profile.uses_external_nic() {
        let nic = Arc::new(SimNic::new("eth0"));
        nic.set_up(!config.external_down);
        engine.attach_mirror(devices[0], nic.clone())?;
        Some(nic)
    } else {
        None
    };

    for &id in &devices {
        engine.open(id)?;
    }
    Ok(Topology { devices, nic })
}

/// A broadcast frame from a locally administered address carrying `seq` after the header.
pub fn test_frame(len: usize, seq: u32) -> Result<Frame> {
    let mut data = vec![0u8; len];
    let mut header = [0u8; ETH_HLEN];
    header[..6].copy_from_slice(&[0xff; 6]);
    header[6..12].copy_from_slice(&[0x02, 0x00, 0x5e, 0x00, 0x00, 0x01]);
    header[12..].copy_from_slice(&ETHERTYPE_EXPERIMENTAL.to_be_bytes());
    let head = len.min(ETH_HLEN);
    data[..head].copy_from_slice(&header[..head]);
    let seq = seq.to_be_bytes();
    if let Some(payload) = data.get_mut(ETH_HLEN..ETH_HLEN + seq.len()) {
        payload.copy_from_slice(&seq);
    }
    Ok(Frame::new(data)?)
}

/// Wait for `device`'s gate the way a queueing discipline would before handing it a frame.
async fn wait_for_gate(engine: &Engine, device: DeviceId) -> Result<()> {
    let open = tokio::time::timeout(GATE_TIMEOUT, async {
        let mut backoff = GATE_BACKOFF_MIN;
        loop {
            match engine.queue_active(device) {
                Ok(true) => return Ok(()),
                Ok(false) => {
                    tokio::time::sleep(backoff).await;
                    backoff = (backoff * 2).min(GATE_BACKOFF_MAX);
                }
                Err(err) => return Err(err),
            }
        }
    })
    .await;
    match open {
        Ok(result) => Ok(result?),
        Err(_) => {
            tracing::warn!(%device, "gate stayed closed, transmitting anyway");
            Ok(())
        }
    }
}

pub async fn run(config: &Config) -> Result<RunReport> {
    config.validate()?;

    let workers = Arc::new(PollWorkers::from_current(PumpConfig {
        budget: config.budget,
    })?);
    let (sink, mut delivered_rx) = ChannelSink::channel();
    let engine = Engine::builder()
        .config(
            EngineConfig::default()
                .with_rx_path(config.profile.rx_path())
                .with_queue_depth(config.queue_depth),
        )
        .scheduler(workers.clone())
        .sink(Arc::new(sink))
        .build();

    let topology = build_topology(&engine, config)?;
    tracing::info!(profile = %config.profile, devices = topology.devices.len(), "topology ready");

    let mut tx = TxTally::default();
    for seq in 0..config.frames {
        for &id in &topology.devices {
            // A bridged device feeds its peer's queue, so that is the gate to respect.
            let destination = engine.peer_of(id)?.unwrap_or(id);
            wait_for_gate(&engine, destination).await?;
            tx.record(engine.transmit(id, test_frame(config.frame_len, seq as u32)?))?;
            if config.profile.sends_empty_frames() {
                tx.record(engine.transmit(id, Frame::new(Vec::new())?))?;
            }
        }
    }

    if let Some(nic) = &topology.nic {
        for seq in 0..config.frames {
            nic.inject_inbound(test_frame(config.frame_len, seq as u32)?);
        }
    }

    if !settle(&engine, SETTLE_TIMEOUT).await {
        bail!("engine did not settle within {SETTLE_TIMEOUT:?}");
    }

    let mut delivered = 0;
    while delivered_rx.try_recv().is_ok() {
        delivered += 1;
    }
    let devices = engine.snapshot();
    let pump = workers.total();
    let external = topology.nic.as_ref().map(|nic| {
        let stats = nic.stats();
        ExternalReport {
            name: nic.name().to_string(),
            up: nic.is_up(),
            tx_frames: stats.tx_frames,
            tx_dropped: stats.tx_dropped_down + stats.tx_dropped_full,
            rx_frames: stats.rx_frames,
        }
    });
    engine.shutdown();

    Ok(RunReport {
        profile: config.profile,
        frames: config.frames,
        frame_len: config.frame_len,
        tx,
        delivered,
        polls: pump.polls,
        empty_polls: pump.empty_polls,
        devices,
        external,
    })
}
