use lib_relay::core::DetectorKind;
use lib_relay::stream::INDEX_BODY;
use lib_relay::{Record, SourceKind};
use project_tests::{RelayUnderTest, SseReader, append_bytes};

fn radar_batch(data: &str) -> Vec<Record> {
    SourceKind::Radar.parse_batch(data).expect("append data is a radar batch")
}

#[tokio::test]
async fn test_radar_relay_streams_catch_up_then_appends() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("radar");
    append_bytes(&path, b"100,100,0,50,0,0,0\n").unwrap();

    let relay = RelayUnderTest::start(SourceKind::Radar, &path, DetectorKind::Poll).await.unwrap();
    let mut reader = SseReader::open(&relay.events_url(), None).await.unwrap();
    assert_eq!(reader.header("content-type"), Some("text/event-stream"));
    assert_eq!(reader.header("cache-control"), Some("no-cache"));
    assert_eq!(reader.header("x-accel-buffering"), Some("no"));

    let first = reader.next_data_event().await.unwrap();
    assert!(reader.raw.starts_with('\n'));
    assert_eq!(first.event, "append");
    assert_eq!(first.id.as_deref(), Some("19"));
    let records = radar_batch(&first.data);
    assert_eq!(records.len(), 1);
    assert_eq!(records[0].position().key(), "100:100:0");

    append_bytes(&path, b"1,2,3,4,5,6,7\n").unwrap();
    let second = reader.next_data_event().await.unwrap();
    assert_eq!(second.id.as_deref(), Some("33"));
    assert_eq!(radar_batch(&second.data)[0].position().key(), "1:2:3");

    relay.stop().await.unwrap();
}

#[tokio::test]
async fn test_resume_from_last_event_id_skips_seen_bytes() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("radar");
    append_bytes(&path, b"100,100,0,50,0,0,0\n1,2,3,4,5,6,7\n").unwrap();

    let relay = RelayUnderTest::start(SourceKind::Radar, &path, DetectorKind::Poll).await.unwrap();

    let mut resumed = SseReader::open(&relay.events_url(), Some("19")).await.unwrap();
    let event = resumed.next_data_event().await.unwrap();
    assert_eq!(event.id.as_deref(), Some("33"));
    let records = radar_batch(&event.data);
    assert_eq!(records.len(), 1);
    assert_eq!(records[0].position().key(), "1:2:3");

    // Garbage resume ids start from the beginning.
    let mut fresh = SseReader::open(&relay.events_url(), Some("not-a-number")).await.unwrap();
    let event = fresh.next_data_event().await.unwrap();
    assert_eq!(event.id.as_deref(), Some("33"));
    assert_eq!(radar_batch(&event.data).len(), 2);

    relay.stop().await.unwrap();
}

#[tokio::test]
async fn test_rt_relay_with_watch_detector_and_heartbeats() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("rt");
    append_bytes(&path, b"").unwrap();

    let relay = RelayUnderTest::start(SourceKind::Rt, &path, DetectorKind::Watch).await.unwrap();
    let mut reader = SseReader::open(&relay.events_url(), None).await.unwrap();

    // Nothing to catch up on: the first thing after the preamble is a heartbeat.
    let heartbeat = reader.next_event().await.unwrap();
    assert_eq!(heartbeat.event, "heartbeat");
    assert_eq!(heartbeat.data, "heartbeat");

    append_bytes(&path, b"5,6,7,2400:10,2401:20\n").unwrap();
    let event = reader.next_data_event().await.unwrap();
    assert_eq!(event.event, "append");
    assert_eq!(event.id.as_deref(), Some("22"));
    match &SourceKind::Rt.parse_batch(&event.data).unwrap()[0] {
        Record::Rt(rt) => {
            assert_eq!((rt.x, rt.y, rt.z), (Some(5), Some(6), Some(7)));
            assert_eq!(rt.emissions.len(), 2);
        }
        other => panic!("expected rt record, got {:?}", other),
    }

    relay.stop().await.unwrap();
}

#[tokio::test]
async fn test_partial_write_sends_error_then_recovers() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("radar");
    append_bytes(&path, b"").unwrap();

    let relay = RelayUnderTest::start(SourceKind::Radar, &path, DetectorKind::Poll).await.unwrap();
    let mut reader = SseReader::open(&relay.events_url(), None).await.unwrap();

    // Stop in the middle of a two-byte character.
    append_bytes(&path, b"1,1,1,1,1,1,1\n\xC3").unwrap();
    let error = reader.next_data_event().await.unwrap();
    assert_eq!(error.event, "error");
    assert!(error.data.starts_with('"'));
    assert!(!reader.raw.contains("id: "));

    append_bytes(&path, b"\xA9\n").unwrap();
    let event = loop {
        let event = reader.next_data_event().await.unwrap();
        if event.event == "append" {
            break event;
        }
    };
    assert_eq!(event.id.as_deref(), Some("17"));
    assert_eq!(radar_batch(&event.data).len(), 2);

    relay.stop().await.unwrap();
}

#[tokio::test]
async fn test_every_subscriber_gets_the_same_delta() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("radar");
    append_bytes(&path, b"").unwrap();

    let relay = RelayUnderTest::start(SourceKind::Radar, &path, DetectorKind::Poll).await.unwrap();
    let mut a = SseReader::open(&relay.events_url(), None).await.unwrap();
    let mut b = SseReader::open(&relay.events_url(), None).await.unwrap();

    append_bytes(&path, b"9,9,9,9,9,9,9\n").unwrap();
    let ea = a.next_data_event().await.unwrap();
    let eb = b.next_data_event().await.unwrap();
    assert_eq!(ea, eb);
    assert_eq!(ea.id.as_deref(), Some("14"));

    relay.stop().await.unwrap();
}

#[tokio::test]
async fn test_other_paths_serve_the_index_page() {
    let dir = tempfile::tempdir().unwrap();
    let relay = RelayUnderTest::start(SourceKind::Rt, &dir.path().join("rt"), DetectorKind::Poll).await.unwrap();

    for path in ["/", "/status", "/events/extra"] {
        let response = reqwest::get(relay.url(path)).await.unwrap();
        assert_eq!(response.status(), 200);
        assert_eq!(response.text().await.unwrap(), INDEX_BODY);
    }

    relay.stop().await.unwrap();
}
