//! Dead-letter log for operations that exhausted their retries.
//!
//! Entries are kept in memory and, when a file is configured, appended to
//! it as JSON lines so that a later process can pick them up with
//! [`DeadLetterLog::open`] and reconcile them with [`DeadLetterLog::replay`].
//! After a replay the file is rewritten to hold only what is left.

use crate::error::QueueResult;
use crate::queue::IndexQueue;
use indexsync_core::IndexOperation;
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::fs::{File, OpenOptions};
use std::io::{BufRead, BufReader, Write};
use std::path::{Path, PathBuf};
use std::time::SystemTime;

/// An operation the pipeline gave up on.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DeadLetter {
    /// The operation that failed.
    pub operation: IndexOperation,
    /// Number of attempts made.
    pub attempts: u32,
    /// Display form of the last error.
    pub last_error: String,
    /// When the operation was dead-lettered, in milliseconds since the Unix epoch.
    pub failed_at: u64,
}

impl DeadLetter {
    /// Creates a dead letter stamped with the current time.
    pub fn new(operation: IndexOperation, attempts: u32, error: impl fmt::Display) -> Self {
        let failed_at = SystemTime::now()
            .duration_since(SystemTime::UNIX_EPOCH)
            .map(|d| u64::try_from(d.as_millis()).unwrap_or(u64::MAX))
            .unwrap_or(0);
        Self {
            operation,
            attempts,
            last_error: error.to_string(),
            failed_at,
        }
    }
}

/// Collects dead letters.
#[derive(Debug, Default)]
pub struct DeadLetterLog {
    entries: Mutex<Vec<DeadLetter>>,
    file: Option<PathBuf>,
}

impl DeadLetterLog {
    /// Creates an in-memory log.
    pub fn new() -> Self {
        Self::default()
    }

    /// Creates a log that also appends every entry to a JSON-lines file.
    pub fn with_file(path: impl Into<PathBuf>) -> Self {
        Self {
            entries: Mutex::new(Vec::new()),
            file: Some(path.into()),
        }
    }

    /// Opens a file-backed log, loading the entries already in the file.
    ///
    /// A missing file is an empty log; it is created on the first record.
    pub fn open(path: impl Into<PathBuf>) -> QueueResult<Self> {
        let path = path.into();
        let entries = if path.exists() {
            Self::load(&path)?
        } else {
            Vec::new()
        };
        Ok(Self {
            entries: Mutex::new(entries),
            file: Some(path),
        })
    }

    /// Returns the backing file, if any.
    pub fn path(&self) -> Option<&Path> {
        self.file.as_deref()
    }

    /// Records an entry, appending it to the file when one is configured.
    ///
    /// The entry is kept in memory even if the file write fails.
    pub fn record(&self, letter: DeadLetter) -> QueueResult<()> {
        let mut entries = self.entries.lock();
        let written = match &self.file {
            Some(path) => append_line(path, &letter),
            None => Ok(()),
        };
        entries.push(letter);
        written
    }

    /// Returns a copy of all entries.
    pub fn entries(&self) -> Vec<DeadLetter> {
        self.entries.lock().clone()
    }

    /// Returns the number of entries.
    pub fn len(&self) -> usize {
        self.entries.lock().len()
    }

    /// Returns true if no operation was dead-lettered.
    pub fn is_empty(&self) -> bool {
        self.entries.lock().is_empty()
    }

    /// Removes and returns all in-memory entries. The file is left untouched
    /// until the next [`DeadLetterLog::compact`].
    pub fn drain(&self) -> Vec<DeadLetter> {
        std::mem::take(&mut *self.entries.lock())
    }

    /// Reads every entry of a JSON-lines file. Blank lines are ignored.
    pub fn load(path: impl AsRef<Path>) -> QueueResult<Vec<DeadLetter>> {
        let reader = BufReader::new(File::open(path)?);
        let mut letters = Vec::new();
        for line in reader.lines() {
            let line = line?;
            if line.trim().is_empty() {
                continue;
            }
            letters.push(serde_json::from_str(&line)?);
        }
        Ok(letters)
    }

    /// Rewrites the backing file to hold exactly the in-memory entries.
    ///
    /// Without a file this does nothing. The new content is written next to
    /// the file and renamed over it.
    pub fn compact(&self) -> QueueResult<()> {
        let Some(path) = &self.file else {
            return Ok(());
        };
        let entries = self.entries.lock();
        let staging = path.with_extension("compact");
        let mut content = Vec::new();
        for letter in entries.iter() {
            serde_json::to_writer(&mut content, letter)?;
            content.push(b'\n');
        }
        std::fs::write(&staging, &content)?;
        std::fs::rename(&staging, path)?;
        tracing::debug!(
            path = %path.display(),
            remaining = entries.len(),
            "compacted dead-letter file"
        );
        Ok(())
    }

    /// Drains the in-memory entries and enqueues their operations again.
    ///
    /// Returns the number of operations enqueued. Entries that cannot be
    /// enqueued are put back into the log and the first error is returned.
    /// Either way the backing file is then compacted, so replayed entries
    /// leave it. Operations that fail again are recorded anew.
    pub async fn replay(&self, queue: &IndexQueue) -> QueueResult<usize> {
        let mut pending = self.drain().into_iter();
        let mut replayed = 0;
        while let Some(letter) = pending.next() {
            if let Err(err) = queue.enqueue_wait(letter.operation.clone()).await {
                {
                    let mut entries = self.entries.lock();
                    entries.push(letter);
                    entries.extend(pending);
                }
                if let Err(compact_err) = self.compact() {
                    tracing::error!(error = %compact_err, "failed to compact dead-letter file");
                }
                return Err(err);
            }
            replayed += 1;
        }
        self.compact()?;
        tracing::info!(replayed, "replayed dead-lettered operations");
        Ok(replayed)
    }
}

fn append_line(path: &Path, letter: &DeadLetter) -> QueueResult<()> {
    let mut line = serde_json::to_vec(letter)?;
    line.push(b'\n');
    let mut file = OpenOptions::new().create(true).append(true).open(path)?;
    file.write_all(&line)?;
    Ok(())
}
