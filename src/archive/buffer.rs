//! Fixed-capacity record buffer reused across flush cycles

use super::record::LogRecord;

/// Number of records held before a flush is forced
pub const ARCHIVE_BUFFER_CAPACITY: usize = 2048;

/// Ordered record buffer with a logical length cursor.
///
/// Slots at or past `count` may still hold records from an earlier cycle;
/// only `[0, count)` is ever exposed.
#[derive(Debug)]
pub struct ArchiveBuffer {
    slots: Vec<LogRecord>,
    count: usize,
    capacity: usize,
}

impl ArchiveBuffer {
    /// Create a buffer with the standard capacity
    pub fn new() -> Self {
        Self::with_capacity(ARCHIVE_BUFFER_CAPACITY)
    }

    /// Create a buffer with a custom capacity
    pub fn with_capacity(capacity: usize) -> Self {
        assert!(capacity > 0, "archive buffer capacity must be positive");
        Self {
            slots: Vec::with_capacity(capacity),
            count: 0,
            capacity,
        }
    }

    /// Append a record at the cursor.
    ///
    /// Returns `true` when the buffer became full and must be flushed
    /// before the next push.
    pub fn push(&mut self, record: LogRecord) -> bool {
        debug_assert!(self.count < self.capacity, "push into a full archive buffer");

        if self.count < self.slots.len() {
            self.slots[self.count] = record;
        } else {
            self.slots.push(record);
        }
        self.count += 1;

        self.is_full()
    }

    /// Live records of the current cycle
    pub fn records(&self) -> &[LogRecord] {
        &self.slots[..self.count]
    }

    /// Rewind the cursor; stale slots are overwritten by later pushes
    pub fn reset(&mut self) {
        self.count = 0;
    }

    pub fn len(&self) -> usize {
        self.count
    }

    pub fn is_empty(&self) -> bool {
        self.count == 0
    }

    pub fn is_full(&self) -> bool {
        self.count == self.capacity
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }
}

impl Default for ArchiveBuffer {
    fn default() -> Self {
        Self::new()
    }
}
