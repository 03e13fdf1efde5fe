//! Request archive
//!
//! Captured request traffic is compressed into [`LogRecord`]s, batched in
//! an [`ArchiveBuffer`] by the [`ArchiveWorker`] and written to
//! `<base>/YYYY/MM/DD/HH/MM-SS.<worker-id>.log` files, one JSON record per
//! line.

pub mod buffer;
pub mod capture;
pub mod record;
pub mod worker;

pub use buffer::{ArchiveBuffer, ARCHIVE_BUFFER_CAPACITY};
pub use capture::{archive_request, dump_request};
pub use record::LogRecord;
pub use worker::{
    archive_file_path, ArchiveEvent, ArchiveHandle, ArchiveSender, ArchiveStats, ArchiveWorker,
    WorkerState, ARCHIVE_CHANNEL_CAPACITY,
};
