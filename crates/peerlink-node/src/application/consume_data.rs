//! Data consumption: the seam between the session engine and storage.
//!
//! The session's receive thread must never block on disk, so DATA frames are
//! handed to a [`DataConsumer`] whose `append` only enqueues.  The
//! [`BufferedRecorder`] is the production consumer: a mutex-protected queue
//! in front of a [`RecordSink`], drained by [`spawn_persistence_worker`] on
//! its own thread.
//!
//! # Segments
//!
//! Records are grouped into *segments* (one per `OPEN_FILE` ... `CLOSE_FILE`
//! span).  DATA that arrives while no segment is open is dropped and
//! counted, matching the behaviour peers expect from the recorder.
//! Closing a segment only queues the close behind its records, so
//! `CLOSE_FILE` and `SHUTDOWN` return without touching the sink.
//!
//! # Lock order
//!
//! `segment` → `sink` → `queue`.  Every method that takes more than one lock
//! takes them in this order.

use std::collections::VecDeque;
use std::sync::{
    atomic::{AtomicBool, AtomicU64, Ordering},
    Arc, Mutex, MutexGuard,
};
use std::thread::JoinHandle;
use std::time::{Duration, SystemTime, UNIX_EPOCH};

use thiserror::Error;
use tracing::{debug, info, warn};

/// Error type for [`RecordSink`] operations.
#[derive(Debug, Error)]
pub enum SinkError {
    /// A segment is already open; it must be closed first.
    #[error("segment {0:?} is already open")]
    AlreadyOpen(String),

    #[error("failed to open segment {name:?}: {reason}")]
    OpenFailed { name: String, reason: String },

    #[error("no segment is open")]
    NotOpen,

    #[error("write failed: {0}")]
    Write(String),
}

/// Error type for [`DataConsumer::flush`].
#[derive(Debug, Error)]
pub enum ConsumerError {
    #[error("flush failed: {0}")]
    Sink(#[from] SinkError),
}

/// One application payload as received from the peer.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DataRecord {
    /// Milliseconds since the Unix epoch at which the frame was received.
    pub timestamp_ms: u64,
    pub payload_type: String,
    pub value: String,
}

// ── Traits ────────────────────────────────────────────────────────────────────

/// Receives DATA payloads from the session.
///
/// `append` is called on the session's receive thread and must return
/// quickly.  `flush` is called once while the session shuts down.
pub trait DataConsumer: Send + Sync {
    fn append(&self, timestamp_ms: u64, payload_type: &str, value: &str);

    /// Persists anything still buffered.
    fn flush(&self) -> Result<(), ConsumerError> {
        Ok(())
    }
}

impl<F> DataConsumer for F
where
    F: Fn(u64, &str, &str) + Send + Sync,
{
    fn append(&self, timestamp_ms: u64, payload_type: &str, value: &str) {
        self(timestamp_ms, payload_type, value)
    }
}

/// Durable destination for records.  Implemented outside this crate for real
/// file formats; see `infrastructure::recording` for the bundled sinks.
pub trait RecordSink: Send {
    fn open(&mut self, name: &str) -> Result<(), SinkError>;
    fn write(&mut self, record: &DataRecord) -> Result<(), SinkError>;
    fn close(&mut self) -> Result<(), SinkError>;
}

// ── BufferedRecorder ──────────────────────────────────────────────────────────

/// Point-in-time view of the recorder, reported by `GET_STATUS`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RecorderStatus {
    pub segment: Option<String>,
    /// Records accepted into the current segment.
    pub data_count: u64,
    pub segments_created: u64,
    /// Records dropped because no segment was open or the sink failed.
    pub discarded: u64,
    pub written: u64,
    pub queued: usize,
}

/// One entry of the recorder's queue.
#[derive(Debug)]
enum Pending {
    Record(DataRecord),
    /// Closes the sink once every record queued before it is written.
    Close { segment: String, records: u64 },
}

/// Queue-backed [`DataConsumer`] that persists to a [`RecordSink`].
pub struct BufferedRecorder {
    segment: Mutex<Option<String>>,
    sink: Mutex<Box<dyn RecordSink>>,
    queue: Mutex<VecDeque<Pending>>,
    data_count: AtomicU64,
    segments_created: AtomicU64,
    discarded: AtomicU64,
    written: AtomicU64,
}

impl BufferedRecorder {
    pub fn new(sink: impl RecordSink + 'static) -> Self {
        Self {
            segment: Mutex::new(None),
            sink: Mutex::new(Box::new(sink)),
            queue: Mutex::new(VecDeque::new()),
            data_count: AtomicU64::new(0),
            segments_created: AtomicU64::new(0),
            discarded: AtomicU64::new(0),
            written: AtomicU64::new(0),
        }
    }

    /// Opens a new segment, generating a name when `name` is `None` or empty.
    ///
    /// The tail of a previously closed segment that is still queued is
    /// written and closed first, so the sink never sees two open segments.
    ///
    /// # Errors
    ///
    /// Returns [`SinkError::AlreadyOpen`] if a segment is open, or whatever
    /// the sink reports when it cannot open the segment.
    pub fn open_segment(&self, name: Option<&str>) -> Result<String, SinkError> {
        let mut segment = lock(&self.segment);
        if let Some(open) = segment.as_ref() {
            return Err(SinkError::AlreadyOpen(open.clone()));
        }

        let name = match name.filter(|n| !n.is_empty()) {
            Some(n) => n.to_string(),
            None => generate_segment_name(self.segments_created.load(Ordering::Relaxed)),
        };
        let mut sink = lock(&self.sink);
        if let Err(e) = self.drain_into(&mut **sink) {
            warn!("previous segment did not persist cleanly: {e}");
        }
        sink.open(&name)?;

        *segment = Some(name.clone());
        self.data_count.store(0, Ordering::Relaxed);
        self.segments_created.fetch_add(1, Ordering::Relaxed);
        info!("opened data segment {name}");
        Ok(name)
    }

    /// Stops accepting records into the open segment and queues its close.
    ///
    /// Nothing touches the sink here: the queued records and the close are
    /// written by the next [`drain`](Self::drain), either from the
    /// persistence worker or from the session's final flush.  Returns the
    /// closed segment's name, or `None` if nothing was open.
    pub fn close_segment(&self) -> Option<String> {
        let mut segment = lock(&self.segment);
        let Some(name) = segment.take() else {
            debug!("close requested with no open segment");
            return None;
        };

        let records = self.data_count.load(Ordering::Relaxed);
        lock(&self.queue).push_back(Pending::Close {
            segment: name.clone(),
            records,
        });
        debug!("data segment {name} closing after {records} records");
        Some(name)
    }

    /// Writes every queued record to the sink and performs queued closes.
    /// Returns how many records were written.
    ///
    /// # Errors
    ///
    /// Returns the first sink error; records after the failing one are
    /// counted as discarded.
    pub fn drain(&self) -> Result<usize, SinkError> {
        let mut sink = lock(&self.sink);
        self.drain_into(&mut **sink)
    }

    pub fn status(&self) -> RecorderStatus {
        let segment = lock(&self.segment).clone();
        let queued = lock(&self.queue)
            .iter()
            .filter(|p| matches!(p, Pending::Record(_)))
            .count();
        RecorderStatus {
            segment,
            data_count: self.data_count.load(Ordering::Relaxed),
            segments_created: self.segments_created.load(Ordering::Relaxed),
            discarded: self.discarded.load(Ordering::Relaxed),
            written: self.written.load(Ordering::Relaxed),
            queued,
        }
    }

    pub fn is_open(&self) -> bool {
        lock(&self.segment).is_some()
    }

    fn drain_into(&self, sink: &mut dyn RecordSink) -> Result<usize, SinkError> {
        let batch: Vec<Pending> = lock(&self.queue).drain(..).collect();
        let mut written = 0;
        let mut first_error = None;
        for pending in batch {
            match pending {
                Pending::Record(_) if first_error.is_some() => {
                    self.discarded.fetch_add(1, Ordering::Relaxed);
                }
                Pending::Record(record) => match sink.write(&record) {
                    Ok(()) => {
                        written += 1;
                        self.written.fetch_add(1, Ordering::Relaxed);
                    }
                    Err(e) => {
                        self.discarded.fetch_add(1, Ordering::Relaxed);
                        warn!("sink write failed, dropping the rest of the batch: {e}");
                        first_error = Some(e);
                    }
                },
                Pending::Close { segment, records } => match sink.close() {
                    Ok(()) => info!("closed data segment {segment} ({records} records)"),
                    Err(e) => {
                        warn!("failed to close data segment {segment}: {e}");
                        first_error.get_or_insert(e);
                    }
                },
            }
        }
        match first_error {
            Some(e) => Err(e),
            None => Ok(written),
        }
    }
}

impl DataConsumer for BufferedRecorder {
    fn append(&self, timestamp_ms: u64, payload_type: &str, value: &str) {
        let segment = lock(&self.segment);
        if segment.is_none() {
            self.discarded.fetch_add(1, Ordering::Relaxed);
            return;
        }
        lock(&self.queue).push_back(Pending::Record(DataRecord {
            timestamp_ms,
            payload_type: payload_type.to_string(),
            value: value.to_string(),
        }));
        let count = self.data_count.fetch_add(1, Ordering::Relaxed) + 1;
        if count % 100 == 0 {
            debug!("{count} records accepted into current segment");
        }
    }

    fn flush(&self) -> Result<(), ConsumerError> {
        self.drain()?;
        Ok(())
    }
}

impl std::fmt::Debug for BufferedRecorder {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("BufferedRecorder")
            .field("status", &self.status())
            .finish()
    }
}

// ── Persistence worker ────────────────────────────────────────────────────────

/// Spawns the thread that drains `recorder` every `interval` until `running`
/// is cleared, then drains once more.
///
/// # Errors
///
/// Returns the OS error if the thread cannot be spawned.
pub fn spawn_persistence_worker(
    recorder: Arc<BufferedRecorder>,
    interval: Duration,
    running: Arc<AtomicBool>,
) -> std::io::Result<JoinHandle<()>> {
    std::thread::Builder::new()
        .name("peerlink-persist".to_string())
        .spawn(move || {
            while running.load(Ordering::Relaxed) {
                std::thread::sleep(interval);
                if let Err(e) = recorder.drain() {
                    warn!("persistence drain failed: {e}");
                }
            }
            if let Err(e) = recorder.drain() {
                warn!("final persistence drain failed: {e}");
            }
            debug!("persistence worker stopped");
        })
}

/// Milliseconds since the Unix epoch.
pub fn current_timestamp_ms() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_millis() as u64)
        .unwrap_or(0)
}

fn generate_segment_name(sequence: u64) -> String {
    let secs = SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_secs())
        .unwrap_or(0);
    format!("session_{secs}_{sequence}")
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(|e| e.into_inner())
}

// ── Tests ─────────────────────────────────────────────────────────────────────
