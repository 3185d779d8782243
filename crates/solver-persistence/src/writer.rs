//! Buffered, date-rotated JSON Lines writer.
//!
//! Files open in append mode (`<prefix>_YYYY-MM-DD.jsonl`); interrupted
//! runs never truncate existing data. The buffer flushes at capacity and
//! on drop.

use crate::error::PersistenceResult;
use chrono::Utc;
use serde::Serialize;
use std::fs::{File, OpenOptions};
use std::io::{BufWriter, Write};
use tracing::{debug, info, warn};

struct ActiveWriter {
    writer: BufWriter<File>,
    date: String,
    records_written: usize,
}

/// Generic JSON Lines writer for one audit stream.
pub struct JsonlWriter<T: Serialize> {
    base_dir: String,
    prefix: String,
    buffer: Vec<T>,
    max_buffer_size: usize,
    active: Option<ActiveWriter>,
}

impl<T: Serialize> JsonlWriter<T> {
    /// Create a writer for `<base_dir>/<prefix>_<date>.jsonl`.
    pub fn new(base_dir: &str, prefix: &str, max_buffer_size: usize) -> Self {
        if let Err(e) = std::fs::create_dir_all(base_dir) {
            warn!(?e, dir = base_dir, "Failed to create audit directory");
        }
        Self {
            base_dir: base_dir.to_string(),
            prefix: prefix.to_string(),
            buffer: Vec::with_capacity(max_buffer_size),
            max_buffer_size,
            active: None,
        }
    }

    /// Buffer a record, flushing when the buffer fills.
    pub fn append(&mut self, record: T) -> PersistenceResult<()> {
        self.buffer.push(record);
        if self.buffer.len() >= self.max_buffer_size {
            self.flush()?;
        }
        Ok(())
    }

    fn close_active(&mut self) {
        if let Some(mut active) = self.active.take() {
            if let Err(e) = active.writer.flush() {
                warn!(?e, "Failed to flush writer on close");
            }
            info!(
                prefix = %self.prefix,
                date = %active.date,
                records = active.records_written,
                "Closed JSONL stream"
            );
        }
    }

    fn open_for(&mut self, date: &str) -> PersistenceResult<()> {
        let filename = format!("{}/{}_{}.jsonl", self.base_dir, self.prefix, date);
        let file = OpenOptions::new().create(true).append(true).open(&filename)?;
        info!(filename = %filename, "Opened JSONL stream (append)");
        self.active = Some(ActiveWriter {
            writer: BufWriter::new(file),
            date: date.to_string(),
            records_written: 0,
        });
        Ok(())
    }

    /// Write the buffer out, rotating at a date change.
    pub fn flush(&mut self) -> PersistenceResult<()> {
        if self.buffer.is_empty() {
            return Ok(());
        }

        let today = Utc::now().format("%Y-%m-%d").to_string();
        let rotate = self
            .active
            .as_ref()
            .map(|a| a.date != today)
            .unwrap_or(false);
        if rotate {
            self.close_active();
        }
        if self.active.is_none() {
            self.open_for(&today)?;
        }

        let count = self.buffer.len();
        let active = self.active.as_mut().expect("writer opened above");
        for record in &self.buffer {
            let line = serde_json::to_string(record)?;
            writeln!(active.writer, "{line}")?;
        }
        active.writer.flush()?;
        active.records_written += count;
        self.buffer.clear();

        debug!(prefix = %self.prefix, records = count, "Flushed JSONL records");
        Ok(())
    }

    /// Flush and close the stream.
    pub fn close(&mut self) -> PersistenceResult<()> {
        self.flush()?;
        self.close_active();
        Ok(())
    }
}

impl<T: Serialize> Drop for JsonlWriter<T> {
    fn drop(&mut self) {
        if let Err(e) = self.flush() {
            warn!(?e, "Failed to flush JSONL buffer on drop");
        }
        self.close_active();
    }
}
