//! # Append-Only Journal
//!
//! JSON-lines log of accepted events and their results, written by a
//! background task so `store_event` never waits on the disk.
//!
//! ## Durability
//!
//! Entries travel through a bounded queue. When the queue is full the entry
//! is dropped and counted, never blocking the caller. Entries still queued
//! when the process crashes are lost; `close()` flushes everything queued.

use crate::domain::event::Event;
use crate::domain::result::EventResult;
use crate::error::StoreError;
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use std::fs;
use std::io::{BufRead, BufReader};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tokio::io::AsyncWriteExt;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

/// One journal line.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "lowercase")]
pub enum JournalEntry {
    Event { event: Event },
    Result { result: EventResult },
}

pub struct Journal {
    path: PathBuf,
    sender: Mutex<Option<mpsc::Sender<JournalEntry>>>,
    writer: Mutex<Option<JoinHandle<()>>>,
    errors: Arc<AtomicU64>,
    written: Arc<AtomicU64>,
}

impl Journal {
    /// Open (or create) the journal file for appending and start the writer.
    ///
    /// Must be called from within a Tokio runtime.
    pub async fn open(path: impl AsRef<Path>, capacity: usize) -> Result<Self, StoreError> {
        let path = path.as_ref().to_path_buf();
        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() {
                tokio::fs::create_dir_all(parent).await?;
            }
        }

        let file = tokio::fs::OpenOptions::new()
            .create(true)
            .append(true)
            .open(&path)
            .await?;

        let (sender, receiver) = mpsc::channel(capacity.max(1));
        let errors = Arc::new(AtomicU64::new(0));
        let written = Arc::new(AtomicU64::new(0));
        let writer = tokio::spawn(write_loop(
            file,
            receiver,
            errors.clone(),
            written.clone(),
            path.clone(),
        ));

        info!(path = %path.display(), capacity, "Journal opened");

        Ok(Self {
            path,
            sender: Mutex::new(Some(sender)),
            writer: Mutex::new(Some(writer)),
            errors,
            written,
        })
    }

    /// Queue an entry without waiting.
    ///
    /// # Errors
    ///
    /// - `StoreError::JournalBackpressure` - queue full, entry dropped
    /// - `StoreError::JournalClosed` - `close()` already ran
    pub fn append(&self, entry: JournalEntry) -> Result<(), StoreError> {
        let guard = self.sender.lock();
        let Some(sender) = guard.as_ref() else {
            return Err(StoreError::JournalClosed);
        };

        match sender.try_send(entry) {
            Ok(()) => Ok(()),
            Err(mpsc::error::TrySendError::Full(_)) => {
                self.errors.fetch_add(1, Ordering::Relaxed);
                Err(StoreError::JournalBackpressure)
            }
            Err(mpsc::error::TrySendError::Closed(_)) => {
                self.errors.fetch_add(1, Ordering::Relaxed);
                Err(StoreError::JournalClosed)
            }
        }
    }

    /// Stop accepting entries and wait for the writer to flush.
    pub async fn close(&self) {
        drop(self.sender.lock().take());
        let writer = self.writer.lock().take();
        if let Some(writer) = writer {
            if let Err(e) = writer.await {
                warn!(path = %self.path.display(), error = %e, "Journal writer ended abnormally");
            }
        }
    }

    #[must_use]
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Entries dropped or failed to write.
    #[must_use]
    pub fn errors(&self) -> u64 {
        self.errors.load(Ordering::Relaxed)
    }

    /// Entries written to the file so far.
    #[must_use]
    pub fn written(&self) -> u64 {
        self.written.load(Ordering::Relaxed)
    }

    /// Read every well-formed entry from a journal file.
    ///
    /// Malformed lines (e.g. a torn final write) are skipped with a warning.
    pub fn restore(path: impl AsRef<Path>) -> Result<Vec<JournalEntry>, StoreError> {
        let path = path.as_ref();
        let reader = BufReader::new(fs::File::open(path)?);
        let mut entries = Vec::new();

        for (line_no, line) in reader.lines().enumerate() {
            let line = line?;
            if line.trim().is_empty() {
                continue;
            }
            match serde_json::from_str::<JournalEntry>(&line) {
                Ok(entry) => entries.push(entry),
                Err(e) => {
                    warn!(
                        path = %path.display(),
                        line = line_no + 1,
                        error = %e,
                        "Skipping malformed journal line"
                    );
                }
            }
        }

        debug!(path = %path.display(), entries = entries.len(), "Journal restored");
        Ok(entries)
    }
}

async fn write_loop(
    file: tokio::fs::File,
    mut receiver: mpsc::Receiver<JournalEntry>,
    errors: Arc<AtomicU64>,
    written: Arc<AtomicU64>,
    path: PathBuf,
) {
    let mut writer = tokio::io::BufWriter::new(file);

    while let Some(entry) = receiver.recv().await {
        write_entry(&mut writer, &entry, &errors, &written, &path).await;
        // Drain whatever else is queued, then flush once.
        while let Ok(entry) = receiver.try_recv() {
            write_entry(&mut writer, &entry, &errors, &written, &path).await;
        }
        if let Err(e) = writer.flush().await {
            errors.fetch_add(1, Ordering::Relaxed);
            warn!(path = %path.display(), error = %e, "Journal flush failed");
        }
    }

    if let Err(e) = writer.flush().await {
        errors.fetch_add(1, Ordering::Relaxed);
        warn!(path = %path.display(), error = %e, "Final journal flush failed");
    }
    debug!(path = %path.display(), "Journal writer stopped");
}

async fn write_entry(
    writer: &mut tokio::io::BufWriter<tokio::fs::File>,
    entry: &JournalEntry,
    errors: &AtomicU64,
    written: &AtomicU64,
    path: &Path,
) {
    let mut line = match serde_json::to_vec(entry) {
        Ok(line) => line,
        Err(e) => {
            errors.fetch_add(1, Ordering::Relaxed);
            warn!(path = %path.display(), error = %e, "Journal entry not serializable");
            return;
        }
    };
    line.push(b'\n');

    match writer.write_all(&line).await {
        Ok(()) => {
            written.fetch_add(1, Ordering::Relaxed);
        }
        Err(e) => {
            errors.fetch_add(1, Ordering::Relaxed);
            warn!(path = %path.display(), error = %e, "Journal write failed");
        }
    }
}
