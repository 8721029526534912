//! Streaming record reassembly
//!
//! Notification transports deliver a record in several chunks. The
//! `RecordAssembler` is the pure state machine that stitches them together;
//! `LatestRecord` is the single slot finished records land in.
//!
//! The slot holds one record. A record that is not taken before the next
//! one completes is overwritten: consumers that fall behind lose data, and
//! every loss is counted and logged.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use bytes::{Bytes, BytesMut};
use parking_lot::Mutex;
use solar_codec::ProtocolDefinition;
use tokio::sync::Notify;
use tracing::{debug, warn};

// ============================================================================
// Accumulator
// ============================================================================

/// Accumulates notification chunks until they form one complete record
#[derive(Debug)]
pub struct RecordAssembler {
    protocol: Arc<ProtocolDefinition>,
    buffer: BytesMut,
}

impl RecordAssembler {
    pub fn new(protocol: Arc<ProtocolDefinition>) -> Self {
        let capacity = protocol.max_record_len();
        Self {
            protocol,
            buffer: BytesMut::with_capacity(capacity),
        }
    }

    /// Feed one chunk; returns the record it completes, if any
    ///
    /// A buffer that no longer looks like a record start is replaced by the
    /// chunk alone, so a chunk carrying a fresh header restarts assembly.
    pub fn push(&mut self, chunk: &[u8]) -> Option<Bytes> {
        self.buffer.extend_from_slice(chunk);

        if !self.protocol.is_record_start(&self.buffer) {
            debug!(
                "Not a record start, restarting with {} byte chunk",
                chunk.len()
            );
            self.buffer.clear();
            self.buffer.extend_from_slice(chunk);
        }

        if self.buffer.len() > self.protocol.max_record_len() {
            debug!(
                "Discarding {} buffered bytes past the record limit",
                self.buffer.len()
            );
            self.buffer.clear();
            return None;
        }

        if self.protocol.is_record_complete(&self.buffer) {
            return Some(self.buffer.split().freeze());
        }
        None
    }

    /// Bytes currently held
    pub fn buffered(&self) -> &[u8] {
        &self.buffer
    }

    pub fn reset(&mut self) {
        self.buffer.clear();
    }
}

// ============================================================================
// Latest record slot
// ============================================================================

/// Single-slot hand-off between the notification path and one reader
#[derive(Debug, Default)]
pub struct LatestRecord {
    slot: Mutex<Option<Bytes>>,
    notify: Notify,
    superseded: AtomicU64,
}

impl LatestRecord {
    pub fn new() -> Self {
        Self::default()
    }

    /// Store `record`, overwriting one nobody has taken yet
    pub fn publish(&self, record: Bytes) {
        let previous = self.slot.lock().replace(record);
        if let Some(lost) = previous {
            let total = self.superseded.fetch_add(1, Ordering::Relaxed) + 1;
            warn!(
                "Unread {} byte record superseded by a newer one ({} so far)",
                lost.len(),
                total
            );
        }
        self.notify.notify_one();
    }

    /// Take the record out of the slot
    pub fn take(&self) -> Option<Bytes> {
        self.slot.lock().take()
    }

    /// Empty the slot without counting a loss
    pub fn clear(&self) {
        self.slot.lock().take();
    }

    /// Wait until a record is available and take it
    pub async fn wait(&self) -> Bytes {
        loop {
            if let Some(record) = self.take() {
                return record;
            }
            self.notify.notified().await;
        }
    }

    /// Records overwritten before anyone read them
    pub fn superseded(&self) -> u64 {
        self.superseded.load(Ordering::Relaxed)
    }
}
