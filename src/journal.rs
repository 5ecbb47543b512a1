//! Append-only message journal
//!
//! The journal is the single durable, totally ordered record of every
//! delivery attempt and lifecycle event, one JSON object per line. Append
//! ordering is the sole synchronization point of the whole system: all
//! cross-component coordination is expressed as "has a record with outcome
//! X and task id Y appeared in the journal yet", never through shared
//! mutable counters.

use std::fs::{File, OpenOptions};
use std::io::{BufRead, BufReader, Write};
use std::path::{Path, PathBuf};

use chrono::Utc;
use futures::stream::BoxStream;
use futures::StreamExt;
use parking_lot::Mutex;
use tokio_util::codec::{FramedRead, LinesCodec};

use crate::error::{RelayError, Result};
use crate::types::{AgentIdentity, DeliveryOutcome, LifecycleEvent, MessageRecord, TaskId};

/// Everything a caller provides for one append; the journal itself assigns
/// the sequence number and timestamp.
#[derive(Debug, Clone)]
pub struct LogEntry {
    /// Originating identity
    pub source: AgentIdentity,
    /// Identity the record concerns
    pub target: AgentIdentity,
    /// Task this record belongs to, if any
    pub task: Option<TaskId>,
    /// Message body or lifecycle description
    pub payload: String,
    /// Delivery outcome
    pub outcome: DeliveryOutcome,
    /// Lifecycle tag for standalone status events
    pub event: Option<LifecycleEvent>,
}

impl LogEntry {
    /// Entry for one delivery attempt (the terminal message of a task)
    pub fn delivery(
        source: AgentIdentity,
        target: AgentIdentity,
        task: TaskId,
        payload: impl Into<String>,
        outcome: DeliveryOutcome,
    ) -> Self {
        Self {
            source,
            target,
            task: Some(task),
            payload: payload.into(),
            outcome,
            event: None,
        }
    }

    /// Entry for a standalone lifecycle event
    pub fn lifecycle(
        event: LifecycleEvent,
        target: AgentIdentity,
        task: Option<TaskId>,
        payload: impl Into<String>,
    ) -> Self {
        Self {
            source: AgentIdentity::system(),
            target,
            task,
            payload: payload.into(),
            outcome: DeliveryOutcome::Sent,
            event: Some(event),
        }
    }
}

struct JournalWriter {
    file: File,
    next_seq: u64,
}

/// Append-only, sequence-numbered journal backed by a JSON Lines file
pub struct MessageLog {
    path: PathBuf,
    writer: Mutex<JournalWriter>,
}

impl MessageLog {
    /// Open (or create) the journal at `path`
    ///
    /// An existing file is scanned to recover the next sequence number, so
    /// numbers are never reused across process restarts. Lines that fail to
    /// parse (a torn tail after a crash) are skipped during recovery.
    ///
    /// # Errors
    /// Returns `Persistence` if the file cannot be opened or scanned.
    pub fn open(path: impl Into<PathBuf>) -> Result<Self> {
        let path = path.into();
        let next_seq = recover_next_seq(&path)?;

        let file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&path)
            .map_err(|e| RelayError::persistence(format!("open {}: {e}", path.display())))?;

        log::debug!(
            "Journal opened at {} (next seq {})",
            path.display(),
            next_seq
        );

        Ok(Self {
            path,
            writer: Mutex::new(JournalWriter { file, next_seq }),
        })
    }

    /// Path of the backing file
    #[must_use]
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Sequence number the next append will receive
    #[must_use]
    pub fn next_seq(&self) -> u64 {
        self.writer.lock().next_seq
    }

    /// Append one record, assigning the next sequence number atomically
    ///
    /// The line is flushed before the sequence number is advanced, so a
    /// record is only ever observable once it is durable.
    ///
    /// # Errors
    /// Returns `Persistence` on any write failure; this is fatal to the
    /// system (the journal is the source of truth).
    pub fn append(&self, entry: LogEntry) -> Result<MessageRecord> {
        let mut writer = self.writer.lock();

        let record = MessageRecord {
            seq: writer.next_seq,
            ts: Utc::now(),
            source: entry.source,
            target: entry.target,
            task: entry.task,
            payload: entry.payload,
            outcome: entry.outcome,
            event: entry.event,
        };

        let mut line = serde_json::to_string(&record)
            .map_err(|e| RelayError::persistence(format!("encode record: {e}")))?;
        line.push('\n');

        writer
            .file
            .write_all(line.as_bytes())
            .map_err(|e| RelayError::persistence(format!("append: {e}")))?;
        writer
            .file
            .flush()
            .map_err(|e| RelayError::persistence(format!("flush: {e}")))?;

        writer.next_seq += 1;
        Ok(record)
    }

    /// Lazily read committed records with `seq >= from`, in order
    ///
    /// Reads from a fresh file handle, so the stream is finite (bounded by
    /// the journal length at read time) and restartable from any prior
    /// sequence number - a reader can resume exactly where it left off.
    pub fn read_from(&self, from: u64) -> BoxStream<'static, Result<MessageRecord>> {
        let path = self.path.clone();

        async_stream::try_stream! {
            let file = tokio::fs::File::open(&path)
                .await
                .map_err(|e| RelayError::persistence(format!("open {}: {e}", path.display())))?;
            let mut lines = FramedRead::new(file, LinesCodec::new());

            while let Some(line) = lines.next().await {
                let line = line
                    .map_err(|e| RelayError::persistence(format!("read journal line: {e}")))?;
                if line.trim().is_empty() {
                    continue;
                }
                let record: MessageRecord = serde_json::from_str(&line)?;
                if record.seq >= from {
                    yield record;
                }
            }
        }
        .boxed()
    }

    /// Full replay of the journal from the first record
    pub fn read_all(&self) -> BoxStream<'static, Result<MessageRecord>> {
        self.read_from(0)
    }
}

/// Scan an existing journal file for the next free sequence number
fn recover_next_seq(path: &Path) -> Result<u64> {
    let file = match File::open(path) {
        Ok(f) => f,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(0),
        Err(e) => {
            return Err(RelayError::persistence(format!(
                "scan {}: {e}",
                path.display()
            )));
        }
    };

    let mut next = 0u64;
    for line in BufReader::new(file).lines() {
        let line = line.map_err(|e| RelayError::persistence(format!("scan line: {e}")))?;
        if line.trim().is_empty() {
            continue;
        }
        match serde_json::from_str::<MessageRecord>(&line) {
            Ok(record) => next = next.max(record.seq + 1),
            Err(e) => log::warn!("Skipping unparseable journal line during recovery: {e}"),
        }
    }
    Ok(next)
}
