//! Request Archive Integration Tests
//!
//! Drives the archive worker and the `/set_bits` capture middleware end to
//! end and checks what lands on disk.

mod common;

use axum::{
    body::{to_bytes, Body},
    http::{Request, StatusCode},
};
use common::*;
use pilosa_core::{
    api::WebService,
    archive::{ArchiveWorker, ARCHIVE_BUFFER_CAPACITY},
};
use std::time::Duration;
use tempfile::TempDir;
use tokio::time::timeout;
use tower::ServiceExt;

fn record_counts(root: &std::path::Path) -> Vec<usize> {
    let mut counts: Vec<usize> = archive_files(root)
        .iter()
        .map(|path| read_records(path).len())
        .collect();
    counts.sort();
    counts
}

/// A full buffer produces exactly one file holding every record
#[tokio::test]
async fn test_full_buffer_writes_one_file() {
    let dir = TempDir::new().unwrap();
    let archive = ArchiveWorker::new(dir.path(), "w1").spawn();

    for i in 0..ARCHIVE_BUFFER_CAPACITY {
        archive.archive(format!("request {}", i).into_bytes()).await.unwrap();
    }

    let stats = timeout(Duration::from_secs(10), archive.shutdown())
        .await
        .expect("shutdown timed out")
        .unwrap();

    // The shutdown flush runs on an empty buffer and leaves an empty file
    assert_eq!(record_counts(dir.path()), vec![0, ARCHIVE_BUFFER_CAPACITY]);
    assert_eq!(stats.records_archived, ARCHIVE_BUFFER_CAPACITY as u64);
    assert_eq!(stats.files_written, 2);
    assert_eq!(stats.records_dropped, 0);
}

/// Records keep arrival order and decode to the original bytes
#[tokio::test]
async fn test_records_round_trip_in_order() {
    let dir = TempDir::new().unwrap();
    let archive = ArchiveWorker::new(dir.path(), "w1").spawn();

    let payloads: Vec<Vec<u8>> = (0..5)
        .map(|i| format!("POST /set_bits HTTP/1.1\r\n\r\n[{}]", i).into_bytes())
        .collect();
    for payload in &payloads {
        archive.archive(payload.clone()).await.unwrap();
    }
    archive.shutdown().await.unwrap();

    let files = archive_files(dir.path());
    assert_eq!(files.len(), 1);

    let decoded: Vec<Vec<u8>> = read_records(&files[0])
        .iter()
        .map(|record| record.decode().unwrap())
        .collect();
    assert_eq!(decoded, payloads);
}

/// Captured `/set_bits` requests are archived verbatim
#[tokio::test]
async fn test_set_bits_requests_are_archived() {
    let (config, dir) = test_config(true);
    let (_bus, bus) = local_bus();
    let (collaborators, executor) = recording_collaborators(&config, bus.clone());
    let service = WebService::new(config, collaborators, bus);
    let archive = service.spawn_archive();

    let body = r#"[{"db":"3","frame":"b.n","profile_id":122,"filter":0,"bitmap_id":123}]"#;
    let response = service
        .router(&archive)
        .oneshot(
            Request::post("/set_bits")
                .header("host", "pilosa.local")
                .body(Body::from(body))
                .unwrap(),
        )
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    let _ = to_bytes(response.into_body(), usize::MAX).await.unwrap();

    assert_eq!(
        executor.queries(),
        vec![("3".to_string(), "set(123, b.n, 0, 122)".to_string())]
    );

    archive.shutdown().await.unwrap();

    let files = archive_files(dir.path());
    assert_eq!(files.len(), 1);
    let records = read_records(&files[0]);
    assert_eq!(records.len(), 1);

    let dump = String::from_utf8(records[0].decode().unwrap()).unwrap();
    assert!(dump.starts_with("POST /set_bits HTTP/1.1\r\n"));
    assert!(dump.contains("host: pilosa.local\r\n"));
    assert!(dump.ends_with(&format!("\r\n\r\n{}", body)));
}

/// Rejected requests are still archived
#[tokio::test]
async fn test_failed_set_bits_is_archived() {
    let (config, dir) = test_config(true);
    let (_bus, bus) = local_bus();
    let (collaborators, executor) = recording_collaborators(&config, bus.clone());
    let service = WebService::new(config, collaborators, bus);
    let archive = service.spawn_archive();

    let response = service
        .router(&archive)
        .oneshot(Request::post("/set_bits").body(Body::from("not json")).unwrap())
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    assert!(executor.queries().is_empty());

    archive.shutdown().await.unwrap();
    assert_eq!(record_counts(dir.path()), vec![1]);
}

/// Without the archive flag nothing is captured
#[tokio::test]
async fn test_set_bits_not_archived_when_disabled() {
    let (config, dir) = test_config(false);
    let (_bus, bus) = local_bus();
    let (collaborators, _executor) = recording_collaborators(&config, bus.clone());
    let service = WebService::new(config, collaborators, bus);
    let archive = service.spawn_archive();

    let body = r#"[{"db":"3","frame":"b.n","profile_id":122,"filter":0,"bitmap_id":123}]"#;
    let response = service
        .router(&archive)
        .oneshot(Request::post("/set_bits").body(Body::from(body)).unwrap())
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);

    archive.shutdown().await.unwrap();
    assert_eq!(record_counts(dir.path()), vec![0]);
}

/// `/flush` writes out a partial batch without stopping the worker
#[tokio::test]
async fn test_flush_route_writes_partial_batch() {
    let (config, dir) = test_config(true);
    let (_bus, bus) = local_bus();
    let (collaborators, _executor) = recording_collaborators(&config, bus.clone());
    let service = WebService::new(config, collaborators, bus);
    let archive = service.spawn_archive();

    let body = r#"[{"db":"3","frame":"b.n","profile_id":1,"filter":0,"bitmap_id":2}]"#;
    for _ in 0..3 {
        let response = service
            .router(&archive)
            .oneshot(Request::post("/set_bits").body(Body::from(body)).unwrap())
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
    }

    let response = service
        .router(&archive)
        .oneshot(Request::post("/flush").body(Body::empty()).unwrap())
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);

    timeout(Duration::from_secs(5), async {
        while archive_files(dir.path()).is_empty() {
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
    })
    .await
    .expect("flush never produced a file");
    assert!(archive.is_running());

    let stats = archive.shutdown().await.unwrap();
    assert_eq!(stats.records_archived, 3);
    assert_eq!(record_counts(dir.path()), vec![0, 3]);
}
