use clap::Parser;
use mnet_cli::{run, Config, OutputFormat, Profile, RunReport};
use pretty_assertions::assert_eq;

const FRAMES: u64 = 20;

async fn run_profile(extra: &[&str]) -> RunReport {
    let args = ["mnet", "--frames", "20", "--frame-len", "60"]
        .into_iter()
        .chain(extra.iter().copied());
    let config = Config::try_parse_from(args).unwrap();
    run(&config).await.unwrap()
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn loopback_receives_inside_transmit() {
    let report = run_profile(&["--profile", "loopback"]).await;

    assert_eq!(report.profile, Profile::Loopback);
    assert_eq!(report.tx.accepted, FRAMES);
    assert_eq!(report.delivered, FRAMES);
    assert_eq!(report.polls, 0);
    let stats = report.devices[0].stats;
    assert_eq!((stats.rx_packets, stats.rx_bytes), (FRAMES, FRAMES * 60));
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn napi_respects_the_gate_and_drops_nothing() {
    let report = run_profile(&["--profile", "napi"]).await;

    assert_eq!(report.tx.accepted, FRAMES);
    assert_eq!(report.tx.backpressure, 0);
    assert_eq!(report.delivered, FRAMES);
    let stats = report.devices[0].stats;
    assert_eq!(stats.tx_packets, FRAMES);
    assert_eq!(stats.rx_packets, FRAMES);
    assert_eq!(stats.rx_dropped, 0);
    assert!(report.polls >= 1);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn napi_filtered_rejects_empty_frames() {
    let report = run_profile(&["--profile", "napi-filtered"]).await;

    assert_eq!(report.tx.accepted, FRAMES);
    assert_eq!(report.tx.rejected, FRAMES);
    let stats = report.devices[0].stats;
    assert_eq!(stats.tx_packets, FRAMES);
    assert_eq!(stats.tx_rejected, FRAMES);
    assert_eq!(stats.rx_packets, FRAMES);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn peer_devices_receive_each_others_frames() {
    let report = run_profile(&["--profile", "peer", "--queue-depth", "4"]).await;

    assert_eq!(report.devices.len(), 2);
    assert_eq!(report.tx.accepted, 2 * FRAMES);
    assert_eq!(report.delivered, 2 * FRAMES);
    assert_eq!(report.devices[0].peer.as_deref(), Some("mnet1"));
    for device in &report.devices {
        assert_eq!(device.stats.tx_packets, FRAMES);
        assert_eq!(device.stats.rx_packets, FRAMES);
    }
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn bridge_mirrors_both_directions() {
    let report = run_profile(&["--profile", "bridge"]).await;

    let external = report.external.as_ref().unwrap();
    assert_eq!((external.name.as_str(), external.up), ("eth0", true));
    assert_eq!(external.tx_frames, FRAMES);
    assert_eq!(external.rx_frames, FRAMES);
    assert_eq!(report.tx.accepted, FRAMES);
    // Only the inbound clones reach the virtual device's stack.
    assert_eq!(report.delivered, FRAMES);
    let stats = report.devices[0].stats;
    assert_eq!(stats.tx_packets, FRAMES);
    assert_eq!(stats.rx_packets, FRAMES);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn bridge_with_nic_down_counts_discards() {
    let report = run_profile(&["--profile", "bridge", "--external-down"]).await;

    assert_eq!(report.tx.undeliverable, FRAMES);
    let external = report.external.as_ref().unwrap();
    assert!(!external.up);
    assert_eq!(external.tx_frames, 0);
    let stats = report.devices[0].stats;
    assert_eq!(stats.tx_packets, FRAMES);
    assert_eq!(stats.tx_dropped, FRAMES);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn skeleton_counts_and_frees() {
    let report = run_profile(&["--profile", "skeleton"]).await;

    assert_eq!(report.tx.accepted, FRAMES);
    assert_eq!(report.delivered, 0);
    assert_eq!(report.devices[0].stats.rx_packets, 0);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn renders_text_and_json() {
    let report = run_profile(&["--profile", "napi"]).await;

    let text = report.render(OutputFormat::Text).unwrap();
    assert!(text.starts_with("profile napi: 20 frames x 60 bytes per device\n"));
    assert!(text.contains("mnet0/rx_packets 20\n"));

    let json: serde_json::Value =
        serde_json::from_str(&report.render(OutputFormat::Json).unwrap()).unwrap();
    assert_eq!(json["profile"], "napi");
    assert_eq!(json["devices"][0]["stats"]["tx_packets"], 20);
    assert!(json.get("external").is_none());
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn invalid_config_is_refused() {
    let config = Config::try_parse_from(["mnet", "--budget", "0"]).unwrap();
    let err = run(&config).await.unwrap_err();
    assert!(err.to_string().contains("budget"));
}
