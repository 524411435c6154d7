//! Queueing behavior observed through the in-memory backend's trace.

use std::io;
use std::path::Path;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use serde_json::json;
use tokio::sync::oneshot;

use jsondb::fs_backend::{MemoryBackend, Op, OpKind, Phase};
use jsondb::{Error, JsonDb, StoreConfig, StoreEvent};

const LATENCY: Duration = Duration::from_millis(10);

fn db_with(backend: MemoryBackend) -> JsonDb<Arc<MemoryBackend>> {
    JsonDb::with_backend(StoreConfig::new("/db", ".bin"), Arc::new(backend))
}

fn ops_on(backend: &MemoryBackend, path: &str) -> Vec<(OpKind, Phase)> {
    backend
        .trace()
        .into_iter()
        .filter(|op| op.path == Path::new(path))
        .map(|op| (op.kind, op.phase))
        .collect()
}

#[tokio::test(start_paused = true)]
async fn concurrent_reads_share_one_io() {
    let backend = MemoryBackend::new().with_latency(LATENCY);
    backend.insert_file("/db/p.json", r#"{"a":1}"#);
    let db = db_with(backend);

    let seen = Arc::new(Mutex::new(Vec::new()));
    for i in 0..4 {
        let seen = seen.clone();
        db.get_with("p", move |result| {
            seen.lock().unwrap().push((i, result.unwrap().into_value()));
        });
    }
    let last = db.get("p").await.unwrap();

    assert_eq!(last.into_value(), json!({"a": 1}));
    let seen = seen.lock().unwrap();
    let order: Vec<_> = seen.iter().map(|(i, _)| *i).collect();
    assert_eq!(order, vec![0, 1, 2, 3]);
    assert!(seen.iter().all(|(_, value)| *value == json!({"a": 1})));
    assert_eq!(db.backend().count(OpKind::Read, Path::new("/db/p.json")), 1);
}

#[tokio::test(start_paused = true)]
async fn batched_read_failure_reaches_every_caller() {
    let backend = MemoryBackend::new().with_latency(LATENCY);
    backend.insert_file("/db/bad.json", "{nope");
    let db = db_with(backend);

    let reads: Vec<_> = (0..3).map(|_| db.get("bad")).collect();
    for read in reads {
        let err = read.await.unwrap_err();
        assert!(matches!(err, Error::InvalidJson { .. }));
    }
    assert_eq!(db.backend().count(OpKind::Read, Path::new("/db/bad.json")), 1);
    // A bad document stops before the attachment is read.
    assert_eq!(db.backend().count(OpKind::Read, Path::new("/db/bad.bin")), 0);
}

#[tokio::test(start_paused = true)]
async fn write_read_write_keeps_arrival_order() {
    let db = db_with(MemoryBackend::new().with_latency(LATENCY));

    let first = db.put("p", json!({"v": "A"}));
    let read = db.get("p");
    let second = db.put("p", json!({"v": "B"}));

    assert_eq!(read.await.unwrap().into_value(), json!({"v": "A"}));
    first.await.unwrap();
    second.await.unwrap();
    assert_eq!(db.get("p").await.unwrap().into_value(), json!({"v": "B"}));

    let backend = db.backend();
    assert_eq!(
        ops_on(backend, "/db/p.json"),
        vec![
            (OpKind::Write, Phase::Start),
            (OpKind::Write, Phase::Finish),
            (OpKind::Read, Phase::Start),
            (OpKind::Read, Phase::Finish),
            (OpKind::Write, Phase::Start),
            (OpKind::Write, Phase::Finish),
            (OpKind::Read, Phase::Start),
            (OpKind::Read, Phase::Finish),
        ]
    );
    assert_eq!(backend.max_in_flight(Path::new("/db/p.json")), 1);
}

#[tokio::test(start_paused = true)]
async fn reads_behind_a_write_batch_until_the_next_write() {
    let backend = MemoryBackend::new().with_latency(LATENCY);
    backend.insert_file("/db/p.json", "{}");
    let db = db_with(backend);

    let write = db.put("p", json!({"n": 1}));
    let batch_one: Vec<_> = (0..3).map(|_| db.get("p")).collect();
    let second_write = db.put("p", json!({"n": 2}));
    let batch_two: Vec<_> = (0..2).map(|_| db.get("p")).collect();

    write.await.unwrap();
    for read in batch_one {
        assert_eq!(read.await.unwrap().into_value(), json!({"n": 1}));
    }
    second_write.await.unwrap();
    for read in batch_two {
        assert_eq!(read.await.unwrap().into_value(), json!({"n": 2}));
    }

    let backend = db.backend();
    assert_eq!(backend.count(OpKind::Read, Path::new("/db/p.json")), 2);
    assert_eq!(backend.count(OpKind::Write, Path::new("/db/p.json")), 2);
    assert_eq!(backend.max_in_flight(Path::new("/db/p.json")), 1);
}

#[tokio::test(start_paused = true)]
async fn one_io_per_record_across_document_attachment_and_listing() {
    let backend = MemoryBackend::new().with_latency(LATENCY);
    backend.insert_file("/db/p/child.json", "{}");
    let db = db_with(backend);

    // No p.json yet, so the first read lists the p/ directory.
    let listing = db.get("p");
    let with_attachment = db.put("p", json!({"a": 1, "attachment": "X"}));
    let merged = db.get("p");
    let plain = db.put("p", json!({"a": 2}));
    let stale = db.get("p");
    let other = db.put("q", json!({"attachment": "Y"}));
    let other_read = db.get("q");

    assert_eq!(listing.await.unwrap().into_listing().unwrap(), vec!["child"]);
    with_attachment.await.unwrap();
    assert_eq!(
        merged.await.unwrap().into_value(),
        json!({"a": 1, "attachment": "X"})
    );
    plain.await.unwrap();
    assert_eq!(
        stale.await.unwrap().into_value(),
        json!({"a": 2, "attachment": "X"})
    );
    other.await.unwrap();
    assert_eq!(other_read.await.unwrap().into_value(), json!({"attachment": "Y"}));

    let backend = db.backend();
    assert_eq!(backend.count(OpKind::List, Path::new("/db/p")), 1);
    assert_eq!(backend.count(OpKind::Write, Path::new("/db/p.bin")), 1);
    assert_eq!(backend.count(OpKind::Read, Path::new("/db/p.bin")), 2);
    assert_eq!(backend.max_in_flight_for_key(Path::new("/db/p")), 1);
    assert_eq!(backend.max_in_flight_for_key(Path::new("/db/q")), 1);
}

#[tokio::test(start_paused = true)]
async fn writes_are_never_merged() {
    let db = db_with(MemoryBackend::new().with_latency(LATENCY));

    let writes: Vec<_> = (0..5).map(|n| db.put("counter", json!(n))).collect();
    for write in writes {
        write.await.unwrap();
    }

    let backend = db.backend();
    assert_eq!(backend.count(OpKind::Write, Path::new("/db/counter.json")), 5);
    assert_eq!(backend.max_in_flight(Path::new("/db/counter.json")), 1);
    assert_eq!(
        backend.file(Path::new("/db/counter.json")).unwrap(),
        bytes::Bytes::from_static(b"4")
    );
}

#[tokio::test(start_paused = true)]
async fn unrelated_paths_run_concurrently() {
    let db = db_with(MemoryBackend::new().with_latency(LATENCY));

    let a = db.put("a", json!({}));
    let b = db.put("b", json!({}));
    assert_eq!(db.busy_count(), 2);
    a.await.unwrap();
    b.await.unwrap();

    let trace: Vec<Op> = db.backend().trace();
    assert_eq!(trace[0].phase, Phase::Start);
    assert_eq!(trace[1].phase, Phase::Start);
    assert_ne!(trace[0].path, trace[1].path);
}

#[tokio::test(start_paused = true)]
async fn callbacks_run_after_queue_advances() {
    let db = db_with(MemoryBackend::new().with_latency(LATENCY));

    let (first_tx, first_rx) = oneshot::channel();
    let observer = db.clone();
    db.put_with("p", json!(1), move |result| {
        result.unwrap();
        // The queued read is already the running operation.
        let _ = first_tx.send(observer.is_busy("p"));
    });

    let (second_tx, second_rx) = oneshot::channel();
    let observer = db.clone();
    db.get_with("p", move |result| {
        result.unwrap();
        // Nothing was queued behind the read, so the path is idle already.
        let _ = second_tx.send(observer.is_busy("p"));
    });

    assert!(first_rx.await.unwrap());
    assert!(!second_rx.await.unwrap());
    assert_eq!(db.busy_count(), 0);
}

#[tokio::test(start_paused = true)]
async fn events_follow_queue_advancement() {
    let db = db_with(MemoryBackend::new().with_latency(LATENCY));
    let mut events = db.subscribe();

    db.put("p", json!({"a": 1, "attachment": "X"})).await.unwrap();

    match events.recv().await.unwrap() {
        StoreEvent::Unlock { path } => assert_eq!(path, "p"),
        other => panic!("expected unlock first, got {other:?}"),
    }
    match events.recv().await.unwrap() {
        StoreEvent::Change {
            path,
            record,
            error,
        } => {
            assert_eq!(path, "p");
            assert_eq!(record.document, json!({"a": 1}));
            assert_eq!(record.attachment_str(), Some("X"));
            assert!(error.is_none());
        }
        other => panic!("expected change, got {other:?}"),
    }
}

#[tokio::test(start_paused = true)]
async fn unlock_fires_once_per_drain_cycle() {
    let db = db_with(MemoryBackend::new().with_latency(LATENCY));
    let mut events = db.subscribe();

    let ops = vec![db.put("p", json!(1)), db.put("p", json!(2))];
    for op in ops {
        op.await.unwrap();
    }
    db.get("p").await.unwrap();

    let mut unlocks = 0;
    while let Ok(event) = events.try_recv() {
        if event.is_unlock() {
            unlocks += 1;
        }
    }
    // One cycle for the two queued writes, one for the later read.
    assert_eq!(unlocks, 2);
}

#[tokio::test(start_paused = true)]
async fn failed_write_still_notifies() {
    let backend = MemoryBackend::new().with_latency(LATENCY);
    backend.fail_on("/db/p.json", io::ErrorKind::PermissionDenied);
    let db = db_with(backend);
    let mut events = db.subscribe();

    let err = db.put("p", json!({})).await.unwrap_err();
    assert_eq!(err.io_kind(), Some(io::ErrorKind::PermissionDenied));

    loop {
        match events.recv().await.unwrap() {
            StoreEvent::Change { error, .. } => {
                assert_eq!(
                    error.and_then(|e| e.io_kind()),
                    Some(io::ErrorKind::PermissionDenied)
                );
                break;
            }
            StoreEvent::Unlock { .. } => {}
        }
    }
    assert!(!db.is_busy("p"));
}

#[tokio::test(start_paused = true)]
async fn failed_document_write_skips_attachment() {
    let backend = MemoryBackend::new();
    backend.fail_on("/db/p.json", io::ErrorKind::Other);
    let db = db_with(backend);

    db.put("p", json!({"attachment": "X"})).await.unwrap_err();
    assert_eq!(db.backend().count(OpKind::Write, Path::new("/db/p.bin")), 0);
}

#[tokio::test(start_paused = true)]
async fn attachment_read_failure_fails_the_read() {
    let backend = MemoryBackend::new();
    backend.insert_file("/db/p.json", "{}");
    backend.insert_file("/db/p.bin", "data");
    backend.fail_on("/db/p.bin", io::ErrorKind::PermissionDenied);
    let db = db_with(backend);

    let err = db.get("p").await.unwrap_err();
    assert_eq!(err.io_kind(), Some(io::ErrorKind::PermissionDenied));
}

#[tokio::test(start_paused = true)]
async fn missing_document_falls_back_to_listing() {
    let backend = MemoryBackend::new();
    backend.insert_file("/db/dir/a.json", "{}");
    backend.insert_file("/db/dir/a.bin", "x");
    backend.insert_dir("/db/dir/sub");
    let db = db_with(backend);

    let names = db.get("dir").await.unwrap().into_listing().unwrap();
    assert_eq!(names, vec!["a"]);

    let backend = db.backend();
    assert_eq!(backend.count(OpKind::Read, Path::new("/db/dir.json")), 1);
    assert_eq!(backend.count(OpKind::List, Path::new("/db/dir")), 1);
}

#[tokio::test(start_paused = true)]
async fn wait_idle_resolves_after_drain() {
    let db = db_with(MemoryBackend::new().with_latency(LATENCY));

    let write = db.put("p", json!(1));
    assert!(db.is_busy("p"));
    db.wait_idle("p").await;
    assert!(!db.is_busy("p"));
    write.await.unwrap();

    // Idle paths resolve immediately.
    db.wait_idle("never-used").await;
}
