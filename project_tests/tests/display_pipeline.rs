use lib_relay::SourceKind;
use lib_relay::core::{DetectorKind, UNAVAILABLE_SENTINEL};
use project_tests::{RelayUnderTest, append_bytes, unused_addr, wait_for_contents};
use servers::relay_logic::config::DisplaySettings;
use servers::relay_logic::display;
use std::path::{Path, PathBuf};
use std::time::Duration;
use tokio_util::sync::CancellationToken;

fn display_settings(radar_url: String, rt_url: String, output_path: &Path) -> DisplaySettings {
    DisplaySettings {
        radar_url,
        rt_url,
        output_path: output_path.to_path_buf(),
        snapshot_period: Duration::from_millis(50),
        reconnect_delay: Duration::from_millis(50),
        silence_timeout: Duration::from_secs(2),
        log_dir: PathBuf::from("./logs"),
        log_level: "info".to_string(),
    }
}

#[tokio::test]
async fn test_display_merges_both_relays_and_survives_outage() {
    let dir = tempfile::tempdir().unwrap();
    let radar_path = dir.path().join("radar");
    let rt_path = dir.path().join("rt");
    let output = dir.path().join("holoscreen");
    append_bytes(&radar_path, b"100,100,0,50,0,0,0\n1,1,1,0,0,0,0\n").unwrap();
    append_bytes(&rt_path, b"").unwrap();

    let radar = RelayUnderTest::start(SourceKind::Radar, &radar_path, DetectorKind::Poll).await.unwrap();
    let rt = RelayUnderTest::start(SourceKind::Rt, &rt_path, DetectorKind::Watch).await.unwrap();
    let rt_addr = rt.addr;

    let settings = display_settings(radar.events_url(), rt.events_url(), &output);
    let shutdown = CancellationToken::new();
    let token = shutdown.clone();
    let display = tokio::spawn(async move { display::run(&settings, token).await });

    // Zero reflectivity keeps 1:1:1 out of the snapshot.
    wait_for_contents(&output, "100,100,0,50,0,0,0").await.unwrap();

    append_bytes(&rt_path, b"100,100,0,2400:10,2401:20\n").unwrap();
    wait_for_contents(&output, "100,100,0,50,0,0,0,2400:10,2401:20").await.unwrap();

    append_bytes(&radar_path, b"7,7,7,3,1,1,1\n100,100,0,60,1,2,3\n").unwrap();
    wait_for_contents(&output, "100,100,0,60,1,2,3,2400:10,2401:20\n7,7,7,3,1,1,1").await.unwrap();

    // One relay down: snapshots continue.
    radar.stop().await.unwrap();
    append_bytes(&rt_path, b"7,7,7,100:1\n").unwrap();
    wait_for_contents(&output, "100,100,0,60,1,2,3,2400:10,2401:20\n7,7,7,3,1,1,1,100:1").await.unwrap();

    // Both down: the sentinel replaces the output.
    rt.stop().await.unwrap();
    wait_for_contents(&output, UNAVAILABLE_SENTINEL).await.unwrap();

    // Either coming back resumes snapshots from the retained table.
    let rt = RelayUnderTest::start_on(rt_addr, SourceKind::Rt, &rt_path, DetectorKind::Watch).await.unwrap();
    wait_for_contents(&output, "100,100,0,60,1,2,3,2400:10,2401:20\n7,7,7,3,1,1,1,100:1").await.unwrap();

    shutdown.cancel();
    let coordinator = tokio::time::timeout(Duration::from_secs(5), display).await.unwrap().unwrap();
    assert_eq!(coordinator.store().len(), 3);
    rt.stop().await.unwrap();
}

#[tokio::test]
async fn test_sentinel_when_no_relay_is_reachable() {
    let dir = tempfile::tempdir().unwrap();
    let output = dir.path().join("holoscreen");
    let radar_url = format!("http://{}/events", unused_addr().await.unwrap());
    let rt_url = format!("http://{}/events", unused_addr().await.unwrap());

    let settings = display_settings(radar_url, rt_url, &output);
    let shutdown = CancellationToken::new();
    let token = shutdown.clone();
    let display = tokio::spawn(async move { display::run(&settings, token).await });

    wait_for_contents(&output, UNAVAILABLE_SENTINEL).await.unwrap();

    shutdown.cancel();
    let coordinator = tokio::time::timeout(Duration::from_secs(5), display).await.unwrap().unwrap();
    assert!(coordinator.store().is_empty());
}
