//! Shared helpers for integration tests

#![allow(dead_code)]

use async_trait::async_trait;
use chrono::NaiveDateTime;
use pilosa_core::{
    collaborators::{BatchRequest, QueryResult, TimeQuantum},
    Collaborators, EventBus, Executor, LocalBus, LogRecord, Result, ServiceConfig,
};
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};
use tempfile::TempDir;

/// Executor that records every query it receives
#[derive(Default)]
pub struct RecordingExecutor {
    pub queries: Mutex<Vec<(String, String)>>,
}

impl RecordingExecutor {
    pub fn queries(&self) -> Vec<(String, String)> {
        self.queries.lock().unwrap().clone()
    }
}

#[async_trait]
impl Executor for RecordingExecutor {
    async fn run_pql(&self, db: &str, pql: &str) -> Result<QueryResult> {
        self.queries
            .lock()
            .unwrap()
            .push((db.to_string(), pql.to_string()));
        Ok(QueryResult::Value(serde_json::Value::Bool(true)))
    }

    async fn batch(&self, request: BatchRequest) -> Result<serde_json::Value> {
        Ok(serde_json::json!({ "slice": request.slice, "id": request.bitmap_id }))
    }

    /// One id per quantum level: base*10, base*10+1, ...
    fn time_ids(&self, base_id: u64, _time: NaiveDateTime, quantum: TimeQuantum) -> Vec<u64> {
        let levels = match quantum {
            TimeQuantum::Y => 1,
            TimeQuantum::YM => 2,
            TimeQuantum::YMD => 3,
            TimeQuantum::YMDH => 4,
        };
        (0..levels).map(|level| base_id * 10 + level).collect()
    }
}

/// Config writing archives into a fresh temporary directory
pub fn test_config(log_set_bit_request: bool) -> (ServiceConfig, TempDir) {
    let dir = TempDir::new().unwrap();
    let config = ServiceConfig {
        id: "test".to_string(),
        request_log_path: dir.path().to_path_buf(),
        log_set_bit_request,
        ..ServiceConfig::default()
    };
    (config, dir)
}

/// Collaborators backed by a [`RecordingExecutor`]
pub fn recording_collaborators(
    config: &ServiceConfig,
    bus: Arc<dyn EventBus>,
) -> (Collaborators, Arc<RecordingExecutor>) {
    let executor = Arc::new(RecordingExecutor::default());
    let mut collaborators = Collaborators::detached(config, bus);
    collaborators.executor = executor.clone() as Arc<dyn Executor>;
    (collaborators, executor)
}

pub fn local_bus() -> (Arc<LocalBus>, Arc<dyn EventBus>) {
    let bus = Arc::new(LocalBus::new());
    let dyn_bus: Arc<dyn EventBus> = bus.clone();
    (bus, dyn_bus)
}

/// Every `.log` file below `root`, sorted
pub fn archive_files(root: &Path) -> Vec<PathBuf> {
    let mut files = Vec::new();
    let mut pending = vec![root.to_path_buf()];

    while let Some(dir) = pending.pop() {
        for entry in std::fs::read_dir(&dir).unwrap() {
            let path = entry.unwrap().path();
            if path.is_dir() {
                pending.push(path);
            } else if path.extension().and_then(|ext| ext.to_str()) == Some("log") {
                files.push(path);
            }
        }
    }

    files.sort();
    files
}

/// Parse the records of one archive file
pub fn read_records(path: &Path) -> Vec<LogRecord> {
    std::fs::read_to_string(path)
        .unwrap()
        .lines()
        .map(|line| serde_json::from_str(line).unwrap())
        .collect()
}
