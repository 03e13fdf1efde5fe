//! Archive worker
//!
//! A single background task that owns the [`ArchiveBuffer`] and writes it
//! out as newline-delimited JSON files. Three triggers cause a flush:
//!
//! - the buffer reaching capacity while ingesting a payload
//! - an explicit flush-now signal (skipped when nothing is buffered)
//! - the shutdown signal (always flushes, then the worker stops for good)
//!
//! Flushes run inline in the worker loop, so at most one is in progress and
//! the buffer is never touched from anywhere else.

use chrono::{DateTime, Utc};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tokio::fs::{self, OpenOptions};
use tokio::io::{AsyncWriteExt, BufWriter};
use tokio::sync::{mpsc, Mutex};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use super::buffer::ArchiveBuffer;
use super::record::LogRecord;
use crate::error::{PilosaError, Result};

/// Capacity of the raw payload channel
pub const ARCHIVE_CHANNEL_CAPACITY: usize = 1024;

/// Upper bound on suffixed names tried when a cycle's file already exists
const MAX_NAME_COLLISIONS: u32 = 1000;

/// Sending side of the payload channel, handed to the archiving adapter
pub type ArchiveSender = mpsc::Sender<Vec<u8>>;

/// One unit of work for the worker loop
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ArchiveEvent {
    /// A raw captured request
    Payload(Vec<u8>),
    /// Write out whatever is buffered
    FlushNow,
    /// Final flush, then stop
    Shutdown,
}

/// Lifecycle of the worker
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WorkerState {
    Running,
    Draining,
    Stopped,
}

/// Counters reported when the worker stops
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ArchiveStats {
    /// Records written to archive files
    pub records_archived: u64,
    /// Archive files created
    pub files_written: u64,
    /// Flush cycles started
    pub flush_cycles: u64,
    /// Flush cycles that failed to write their file
    pub failed_flushes: u64,
    /// Records lost to failed flushes or encoding errors
    pub records_dropped: u64,
}

/// Build the archive path for a flush cycle:
/// `<base>/YYYY/MM/DD/HH/MM-SS.<worker_id>.log`
pub fn archive_file_path(base: &Path, now: DateTime<Utc>, worker_id: &str) -> PathBuf {
    base.join(now.format("%Y/%m/%d/%H").to_string())
        .join(format!("{}.{}.log", now.format("%M-%S"), worker_id))
}

/// Path used for the n-th collision within the same second
fn suffixed_path(base: &Path, now: DateTime<Utc>, worker_id: &str, n: u32) -> PathBuf {
    base.join(now.format("%Y/%m/%d/%H").to_string())
        .join(format!("{}.{}.{}.log", now.format("%M-%S"), worker_id, n))
}

/// Background archiver state
pub struct ArchiveWorker {
    base_path: PathBuf,
    worker_id: String,
    buffer: ArchiveBuffer,
    state: WorkerState,
    stats: ArchiveStats,
}

impl ArchiveWorker {
    /// Create a worker writing below `base_path`
    pub fn new(base_path: impl Into<PathBuf>, worker_id: impl Into<String>) -> Self {
        Self {
            base_path: base_path.into(),
            worker_id: worker_id.into(),
            buffer: ArchiveBuffer::new(),
            state: WorkerState::Running,
            stats: ArchiveStats::default(),
        }
    }

    /// Spawn the worker loop and return a handle to feed and stop it
    pub fn spawn(self) -> ArchiveHandle {
        let (payload_tx, payload_rx) = mpsc::channel(ARCHIVE_CHANNEL_CAPACITY);
        // One pending flush request is enough; extra requests coalesce
        let (flush_tx, flush_rx) = mpsc::channel(1);
        let shutdown = CancellationToken::new();

        info!(
            "Starting archive worker {} (base path: {})",
            self.worker_id,
            self.base_path.display()
        );

        let task = tokio::spawn(self.run(payload_rx, flush_rx, shutdown.clone()));

        ArchiveHandle {
            payload_tx,
            flush_tx,
            shutdown,
            task: Arc::new(Mutex::new(Some(task))),
        }
    }

    async fn run(
        mut self,
        mut payload_rx: mpsc::Receiver<Vec<u8>>,
        mut flush_rx: mpsc::Receiver<()>,
        shutdown: CancellationToken,
    ) -> ArchiveStats {
        loop {
            // Signals are polled first so a busy payload channel cannot
            // starve them
            let event = tokio::select! {
                biased;
                _ = shutdown.cancelled() => ArchiveEvent::Shutdown,
                Some(()) = flush_rx.recv() => ArchiveEvent::FlushNow,
                raw = payload_rx.recv() => match raw {
                    Some(raw) => ArchiveEvent::Payload(raw),
                    None => {
                        debug!("Archive payload channel closed, shutting down");
                        ArchiveEvent::Shutdown
                    }
                },
            };

            // Payloads already queued when a signal fires belong to its cycle
            match event {
                ArchiveEvent::Shutdown => {
                    // No new payloads; senders holding a permit still get through
                    payload_rx.close();
                    let mut drained = 0;
                    while let Some(raw) = payload_rx.recv().await {
                        self.ingest(&raw).await;
                        drained += 1;
                    }
                    debug!("Drained {} queued payloads before shutdown", drained);
                }
                ArchiveEvent::FlushNow => {
                    let limit = payload_rx.max_capacity();
                    self.drain_queued(&mut payload_rx, limit).await;
                }
                ArchiveEvent::Payload(_) => {}
            }

            if self.handle(event).await == WorkerState::Stopped {
                break;
            }
        }

        self.stats
    }

    /// Ingest up to `limit` payloads that are already waiting in the channel
    async fn drain_queued(&mut self, payload_rx: &mut mpsc::Receiver<Vec<u8>>, limit: usize) {
        let mut drained = 0;
        while drained < limit {
            match payload_rx.try_recv() {
                Ok(raw) => {
                    self.ingest(&raw).await;
                    drained += 1;
                }
                Err(_) => break,
            }
        }
        if drained > 0 {
            debug!("Drained {} queued payloads ahead of flush", drained);
        }
    }

    /// Process a single event and return the resulting state
    pub async fn handle(&mut self, event: ArchiveEvent) -> WorkerState {
        if self.state == WorkerState::Stopped {
            warn!("Archive worker {} is stopped, ignoring {} event", self.worker_id, kind(&event));
            return self.state;
        }

        match event {
            ArchiveEvent::Payload(raw) => self.ingest(&raw).await,
            ArchiveEvent::FlushNow => {
                if !self.buffer.is_empty() {
                    self.flush().await;
                }
            }
            ArchiveEvent::Shutdown => {
                self.state = WorkerState::Draining;
                self.flush().await;
                self.state = WorkerState::Stopped;
                info!(
                    "Shutdown archive worker {} ({} records archived in {} files)",
                    self.worker_id, self.stats.records_archived, self.stats.files_written
                );
            }
        }

        self.state
    }

    async fn ingest(&mut self, raw: &[u8]) {
        let record = match LogRecord::encode(Utc::now(), raw) {
            Ok(record) => record,
            Err(e) => {
                error!("Failed to encode archive record: {}", e);
                self.stats.records_dropped += 1;
                return;
            }
        };

        if self.buffer.push(record) {
            debug!("Archive buffer full ({} records), flushing", self.buffer.len());
            self.flush().await;
        }
    }

    /// Write `[0, count)` to a fresh file and rewind the buffer.
    ///
    /// A failed write drops the cycle's records.
    async fn flush(&mut self) {
        self.stats.flush_cycles += 1;
        let count = self.buffer.len() as u64;

        match self.write_cycle().await {
            Ok(path) => {
                self.stats.files_written += 1;
                self.stats.records_archived += count;
                debug!("Archived {} records to {}", count, path.display());
            }
            Err(e) => {
                self.stats.failed_flushes += 1;
                self.stats.records_dropped += count;
                error!("Error writing archive file, dropping {} records: {}", count, e);
            }
        }

        self.buffer.reset();
    }

    async fn write_cycle(&self) -> Result<PathBuf> {
        let (path, file) = self.create_file(Utc::now()).await?;

        let mut writer = BufWriter::new(file);
        for record in self.buffer.records() {
            let mut line = serde_json::to_vec(record)?;
            line.push(b'\n');
            writer.write_all(&line).await?;
        }
        writer.flush().await?;
        writer.get_ref().sync_all().await?;

        Ok(path)
    }

    async fn create_file(&self, now: DateTime<Utc>) -> Result<(PathBuf, fs::File)> {
        let path = archive_file_path(&self.base_path, now, &self.worker_id);
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent).await?;
        }

        let mut candidate = path;
        for n in 1..=MAX_NAME_COLLISIONS {
            match OpenOptions::new().write(true).create_new(true).open(&candidate).await {
                Ok(file) => return Ok((candidate, file)),
                Err(e) if e.kind() == std::io::ErrorKind::AlreadyExists => {
                    candidate = suffixed_path(&self.base_path, now, &self.worker_id, n);
                }
                Err(e) => return Err(e.into()),
            }
        }

        Err(PilosaError::Other(format!(
            "no free archive file name after {} attempts",
            MAX_NAME_COLLISIONS
        )))
    }

    /// Records buffered in the current cycle
    pub fn buffered(&self) -> usize {
        self.buffer.len()
    }

    pub fn state(&self) -> WorkerState {
        self.state
    }

    pub fn stats(&self) -> &ArchiveStats {
        &self.stats
    }
}

fn kind(event: &ArchiveEvent) -> &'static str {
    match event {
        ArchiveEvent::Payload(_) => "payload",
        ArchiveEvent::FlushNow => "flush",
        ArchiveEvent::Shutdown => "shutdown",
    }
}

/// Handle to a spawned [`ArchiveWorker`]
#[derive(Clone)]
pub struct ArchiveHandle {
    payload_tx: ArchiveSender,
    flush_tx: mpsc::Sender<()>,
    shutdown: CancellationToken,
    task: Arc<Mutex<Option<JoinHandle<ArchiveStats>>>>,
}

impl ArchiveHandle {
    /// Sender for raw payloads
    pub fn sender(&self) -> ArchiveSender {
        self.payload_tx.clone()
    }

    /// Queue a payload, waiting while the channel is full
    pub async fn archive(&self, raw: Vec<u8>) -> Result<()> {
        self.payload_tx
            .send(raw)
            .await
            .map_err(|_| PilosaError::ArchiveClosed)
    }

    /// Request a flush without waiting for it
    pub fn flush(&self) {
        match self.flush_tx.try_send(()) {
            Ok(()) => debug!("Archive flush requested"),
            Err(mpsc::error::TrySendError::Full(())) => {
                debug!("Archive flush already pending");
            }
            Err(mpsc::error::TrySendError::Closed(())) => {
                debug!("Archive worker stopped, flush request ignored");
            }
        }
    }

    /// Signal shutdown and wait for the final flush
    pub async fn shutdown(&self) -> Result<ArchiveStats> {
        self.shutdown.cancel();

        let task = self.task.lock().await.take();
        match task {
            Some(task) => task.await.map_err(|e| {
                PilosaError::Other(format!("Archive worker task failed: {}", e))
            }),
            None => Err(PilosaError::ArchiveClosed),
        }
    }

    /// Whether the worker loop is still alive
    pub fn is_running(&self) -> bool {
        !self.payload_tx.is_closed()
    }

    /// Free slots in the payload channel
    pub fn queue_available(&self) -> usize {
        self.payload_tx.capacity()
    }

    pub fn queue_capacity(&self) -> usize {
        self.payload_tx.max_capacity()
    }
}
