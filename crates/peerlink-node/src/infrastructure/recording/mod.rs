//! Bundled [`RecordSink`] implementations.
//!
//! Real file formats live with the application embedding the node; these two
//! sinks cover tests, dry runs and the command-line binary.
//!
//! - [`MemorySink`] keeps every segment and record in memory.  Clones share
//!   the same storage, so a test can hand one clone to the recorder and
//!   inspect the other.
//! - [`LogSink`] writes each record to the `tracing` log.

use std::sync::{Arc, Mutex, MutexGuard};

use tracing::info;

use crate::application::consume_data::{DataRecord, RecordSink, SinkError};

// ── MemorySink ────────────────────────────────────────────────────────────────

#[derive(Debug, Default)]
struct MemoryState {
    open: Option<String>,
    segments: Vec<String>,
    records: Vec<(String, DataRecord)>,
    refuse_opens: bool,
}

#[derive(Debug, Clone, Default)]
pub struct MemorySink {
    state: Arc<Mutex<MemoryState>>,
}

impl MemorySink {
    pub fn new() -> Self {
        Self::default()
    }

    /// Makes every subsequent `open` fail, to exercise error replies.
    pub fn refuse_opens(&self, refuse: bool) {
        self.lock().refuse_opens = refuse;
    }

    /// Names of every segment opened so far, in order.
    pub fn segments(&self) -> Vec<String> {
        self.lock().segments.clone()
    }

    /// Every record written, paired with its segment name.
    pub fn records(&self) -> Vec<(String, DataRecord)> {
        self.lock().records.clone()
    }

    pub fn is_open(&self) -> bool {
        self.lock().open.is_some()
    }

    fn lock(&self) -> MutexGuard<'_, MemoryState> {
        self.state.lock().unwrap_or_else(|e| e.into_inner())
    }
}

impl RecordSink for MemorySink {
    fn open(&mut self, name: &str) -> Result<(), SinkError> {
        let mut state = self.lock();
        if state.refuse_opens {
            return Err(SinkError::OpenFailed {
                name: name.to_string(),
                reason: "refused".to_string(),
            });
        }
        state.open = Some(name.to_string());
        state.segments.push(name.to_string());
        Ok(())
    }

    fn write(&mut self, record: &DataRecord) -> Result<(), SinkError> {
        let mut state = self.lock();
        let segment = state.open.clone().ok_or(SinkError::NotOpen)?;
        state.records.push((segment, record.clone()));
        Ok(())
    }

    fn close(&mut self) -> Result<(), SinkError> {
        self.lock().open = None;
        Ok(())
    }
}

// ── LogSink ───────────────────────────────────────────────────────────────────

/// Logs each record at `info` level under the `peerlink::data` target.
#[derive(Debug, Default)]
pub struct LogSink {
    segment: Option<String>,
    written: u64,
}

impl LogSink {
    pub fn new() -> Self {
        Self::default()
    }
}

impl RecordSink for LogSink {
    fn open(&mut self, name: &str) -> Result<(), SinkError> {
        self.segment = Some(name.to_string());
        self.written = 0;
        info!(target: "peerlink::data", "segment {name} opened");
        Ok(())
    }

    fn write(&mut self, record: &DataRecord) -> Result<(), SinkError> {
        let segment = self.segment.as_deref().ok_or(SinkError::NotOpen)?;
        self.written += 1;
        info!(
            target: "peerlink::data",
            "[{segment}] {} {}={}",
            record.timestamp_ms, record.payload_type, record.value
        );
        Ok(())
    }

    fn close(&mut self) -> Result<(), SinkError> {
        if let Some(name) = self.segment.take() {
            info!(target: "peerlink::data", "segment {name} closed after {} records", self.written);
        }
        Ok(())
    }
}
