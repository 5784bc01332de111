//! End-to-end tests driving the watcher over canned and NDJSON sources.

use claimwatch::normalizer::claim_object;
use claimwatch::source::CannedItem;
use claimwatch::{
    CannedSource, CapacityRecord, CapacityState, CapacityTracker, DriverConfig, EventNormalizer,
    JsonLinesSink, MemorySink, NdjsonSource, Quantity, RawClaimList, RawWatchEvent, Selector, Unit,
    WatchDriver,
};
use serde_json::json;
use std::io::Write;
use std::sync::{Arc, Mutex};
use tempfile::NamedTempFile;
use tokio::io::BufReader;
use tokio::sync::watch;

fn gi(n: i64) -> Quantity {
    Quantity::new(n, Unit::Gi)
}

fn listing(claims: &[(&str, &str)]) -> RawClaimList {
    RawClaimList {
        items: claims
            .iter()
            .map(|(name, size)| claim_object("default", name, size))
            .collect(),
    }
}

fn event(kind: &str, name: &str, size: &str) -> RawWatchEvent {
    RawWatchEvent::new(kind, claim_object("default", name, size))
}

fn driver<S: claimwatch::ClaimSource>(source: S, namespace: Option<&str>) -> (WatchDriver<S>, MemorySink) {
    let sink = MemorySink::new();
    let driver = WatchDriver::new(
        source,
        EventNormalizer::new(namespace.map(str::to_string)),
        CapacityTracker::new(gi(150)),
        DriverConfig::default(),
    )
    .with_sink(Box::new(sink.clone()));
    (driver, sink)
}

#[derive(Clone, Default)]
struct SharedBuf(Arc<Mutex<Vec<u8>>>);

impl Write for SharedBuf {
    fn write(&mut self, buf: &[u8]) -> std::io::Result<usize> {
        self.0.lock().unwrap().extend_from_slice(buf);
        Ok(buf.len())
    }

    fn flush(&mut self) -> std::io::Result<()> {
        Ok(())
    }
}

#[tokio::test]
async fn test_exceeded_then_restored_scenario() {
    let source = CannedSource::new()
        .with_listing(listing(&[("a", "50Gi"), ("b", "50Gi")]))
        .with_event(event("ADDED", "c", "50Gi"))
        .with_event(event("DELETED", "a", "50Gi"));
    let (mut driver, sink) = driver(source, None);

    let (_tx, rx) = watch::channel(false);
    let stats = driver.run(rx).await.unwrap();

    assert_eq!(
        sink.alerts(),
        vec![
            CapacityRecord::CapacityExceeded {
                total: gi(150),
                max: gi(150),
            },
            CapacityRecord::CapacityRestored {
                total: gi(100),
                max: gi(150),
            },
        ]
    );
    assert_eq!(stats.added, 1);
    assert_eq!(stats.deleted, 1);
    assert_eq!(driver.tracker().total_capacity(), gi(100));
    assert_eq!(driver.tracker().state(), CapacityState::Normal);
}

#[tokio::test]
async fn test_edge_triggered_exceeded() {
    let source = CannedSource::new()
        .with_event(event("ADDED", "a", "100Gi"))
        .with_event(event("ADDED", "b", "60Gi"))
        .with_event(event("ADDED", "c", "10Gi"));
    let (mut driver, sink) = driver(source, None);

    let (_tx, rx) = watch::channel(false);
    driver.run(rx).await.unwrap();

    assert_eq!(
        sink.alerts(),
        vec![CapacityRecord::CapacityExceeded {
            total: gi(160),
            max: gi(150),
        }]
    );
    assert_eq!(driver.tracker().total_capacity(), gi(170));
}

#[tokio::test]
async fn test_unknown_delete_and_bad_events_do_not_stop_the_watch() {
    let source = CannedSource::new()
        .with_listing(listing(&[("a", "10Gi")]))
        .with_event(event("DELETED", "ghost", "5Gi"))
        .with_event(event("ADDED", "b", "lots"))
        .with_event(RawWatchEvent::new("ADDED", json!({ "metadata": { "name": "c" } })))
        .with_event(RawWatchEvent::new("BOOKMARK", json!({})))
        .with_event(event("ADDED", "d", "5Gi"));
    let (mut driver, sink) = driver(source, None);

    let (_tx, rx) = watch::channel(false);
    let stats = driver.run(rx).await.unwrap();

    assert!(sink.alerts().is_empty());
    assert_eq!(stats.unknown_claims, 1);
    assert_eq!(stats.skipped, 2);
    assert_eq!(stats.added, 1);
    assert_eq!(driver.tracker().total_capacity(), gi(15));
}

#[tokio::test]
async fn test_stream_gone_reseeds_from_fresh_listing() {
    let source = CannedSource::new()
        .with_listing(listing(&[("a", "100Gi")]))
        .with_listing(listing(&[("a", "100Gi"), ("b", "60Gi")]))
        .with_item(CannedItem::Gone("too old resource version".to_string()))
        .with_event(event("DELETED", "b", "60Gi"));
    let (mut driver, sink) = driver(source, None);

    let (_tx, rx) = watch::channel(false);
    let stats = driver.run(rx).await.unwrap();

    assert_eq!(stats.seeds, 2);
    assert_eq!(
        sink.alerts(),
        vec![
            CapacityRecord::CapacityExceeded {
                total: gi(160),
                max: gi(150),
            },
            CapacityRecord::CapacityRestored {
                total: gi(100),
                max: gi(150),
            },
        ]
    );
    assert_eq!(driver.source().list_calls(), 2);
}

#[tokio::test]
async fn test_namespace_filter() {
    let source = CannedSource::new()
        .with_event(RawWatchEvent::new("ADDED", claim_object("prod", "a", "100Gi")))
        .with_event(RawWatchEvent::new("ADDED", claim_object("dev", "b", "100Gi")))
        .with_event(RawWatchEvent::new("ADDED", claim_object("prod", "c", "10Gi")));
    let (mut driver, sink) = driver(source, Some("prod"));

    let (_tx, rx) = watch::channel(false);
    driver.run(rx).await.unwrap();

    assert!(sink.alerts().is_empty());
    assert_eq!(driver.tracker().total_capacity(), gi(110));
    assert_eq!(driver.tracker().claim_count(), 2);
}

#[tokio::test]
async fn test_ndjson_source_with_listing_file() {
    let mut file = NamedTempFile::with_suffix(".json").unwrap();
    let listing = json!({
        "kind": "PersistentVolumeClaimList",
        "items": [
            {
                "metadata": { "name": "data-0", "namespace": "prod", "resourceVersion": "10" },
                "spec": { "resources": { "requests": { "storage": "100Gi" } }, "volumeName": "pvc-1" },
                "status": { "phase": "Bound" }
            }
        ]
    });
    write!(file, "{}", listing).unwrap();

    let events = concat!(
        r#"{"type":"MODIFIED","object":{"metadata":{"name":"data-0","namespace":"prod","resourceVersion":"10"},"spec":{"resources":{"requests":{"storage":"100Gi"}}}}}"#,
        "\n",
        r#"{"type":"ADDED","object":{"metadata":{"name":"data-1","namespace":"prod","resourceVersion":"11"},"spec":{"resources":{"requests":{"storage":"50Gi"}}}}}"#,
        "\n",
        r#"{"type":"MODIFIED","object":{"metadata":{"name":"data-1","namespace":"prod","resourceVersion":"12"},"spec":{"resources":{"requests":{"storage":"40Gi"}}}}}"#,
        "\n",
    );
    let source = NdjsonSource::new(
        BufReader::new(events.as_bytes()),
        Some(file.path().to_path_buf()),
    );
    let (mut driver, sink) = driver(source, None);

    let (_tx, rx) = watch::channel(false);
    let stats = driver.run(rx).await.unwrap();

    assert_eq!(stats.duplicates, 1);
    assert_eq!(stats.added, 1);
    assert_eq!(stats.modified, 1);
    assert_eq!(
        sink.alerts(),
        vec![
            CapacityRecord::CapacityExceeded {
                total: gi(150),
                max: gi(150),
            },
            CapacityRecord::CapacityRestored {
                total: gi(140),
                max: gi(150),
            },
        ]
    );
    let table = driver.tracker().claim_table();
    assert!(table.contains("data-0"));
    assert!(table.contains("pvc-1"));
    assert!(table.contains("Total capacity claimed: 140Gi"));
}

#[tokio::test]
async fn test_json_lines_output() {
    let source = CannedSource::new()
        .with_listing(listing(&[("a", "100Gi")]))
        .with_event(event("ADDED", "b", "50Gi"));
    let buf = SharedBuf::default();
    let mut driver = WatchDriver::new(
        source,
        EventNormalizer::default(),
        CapacityTracker::new(gi(150)),
        DriverConfig::default(),
    )
    .with_sink(Box::new(JsonLinesSink::new(buf.clone())));

    let (_tx, rx) = watch::channel(false);
    driver.run(rx).await.unwrap();

    let out = String::from_utf8(buf.0.lock().unwrap().clone()).unwrap();
    let records: Vec<serde_json::Value> = out
        .lines()
        .map(|line| serde_json::from_str(line).unwrap())
        .collect();
    let names: Vec<&str> = records
        .iter()
        .map(|r| r["record"].as_str().unwrap())
        .collect();

    assert_eq!(
        names,
        vec![
            "ledger_seeded",
            "capacity_percentage",
            "claim_added",
            "capacity_exceeded",
            "capacity_percentage",
        ]
    );
    assert_eq!(records[2]["claim"]["name"], "b");
    assert_eq!(records[2]["total"], "150Gi");
    assert_eq!(records[3]["max"], "150Gi");
}

#[tokio::test]
async fn test_delete_without_size_uses_ledger_size() {
    let source = CannedSource::new()
        .with_listing(listing(&[("a", "100Gi"), ("b", "60Gi")]))
        .with_event(RawWatchEvent::new(
            "DELETED",
            json!({ "metadata": { "name": "b", "namespace": "default" } }),
        ));
    let (mut driver, sink) = driver(source, None);

    let (_tx, rx) = watch::channel(false);
    let stats = driver.run(rx).await.unwrap();

    assert_eq!(stats.skipped, 0);
    assert_eq!(stats.deleted, 1);
    assert_eq!(driver.tracker().total_capacity(), gi(100));
    assert_eq!(driver.tracker().state(), CapacityState::Normal);
    assert_eq!(
        sink.alerts(),
        vec![
            CapacityRecord::CapacityExceeded {
                total: gi(160),
                max: gi(150),
            },
            CapacityRecord::CapacityRestored {
                total: gi(100),
                max: gi(150),
            },
        ]
    );
}

#[tokio::test]
async fn test_label_selector_scopes_listing_and_events() {
    let labelled = |name: &str, size: &str, app: &str| {
        json!({
            "metadata": { "name": name, "namespace": "default", "labels": { "app": app } },
            "spec": { "resources": { "requests": { "storage": size } } }
        })
    };
    let source = CannedSource::new()
        .with_listing(RawClaimList {
            items: vec![labelled("a", "100Gi", "db"), labelled("b", "100Gi", "web")],
        })
        .with_event(RawWatchEvent::new("ADDED", labelled("c", "40Gi", "db")))
        .with_event(RawWatchEvent::new("ADDED", labelled("d", "500Gi", "web")))
        .with_event(RawWatchEvent::new("MODIFIED", labelled("c", "40Gi", "web")));
    let sink = MemorySink::new();
    let mut driver = WatchDriver::new(
        source,
        EventNormalizer::default().with_label_selector(Selector::parse("app=db").unwrap()),
        CapacityTracker::new(gi(150)),
        DriverConfig::default(),
    )
    .with_sink(Box::new(sink.clone()));

    let (_tx, rx) = watch::channel(false);
    let stats = driver.run(rx).await.unwrap();

    assert_eq!(stats.added, 1);
    assert_eq!(stats.deleted, 1);
    assert!(sink.alerts().is_empty());
    assert_eq!(driver.tracker().claim_count(), 1);
    assert_eq!(driver.tracker().total_capacity(), gi(100));
}
