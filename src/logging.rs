//! JSONL request log with a bounded in-memory ring buffer.
//!
//! Operator logs go through `tracing`; this log keeps a structured per-request trail
//! (one JSON object per line) that survives restarts and can be inspected while the
//! gateway runs.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::VecDeque;
use std::fs::{File, OpenOptions};
use std::io::{BufRead, BufReader, BufWriter, Write};
use std::path::Path;
use std::sync::{Arc, Mutex};

const MAX_ENTRIES: usize = 10_000;

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LogLevel {
    Debug,
    Info,
    Warn,
    Error,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LogEntry {
    pub timestamp: DateTime<Utc>,
    pub level: LogLevel,
    /// Which gateway stage produced the entry: "server", "dispatch", "stream", "startup".
    pub scope: String,
    pub message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub detail: Option<serde_json::Value>,
}

impl LogEntry {
    pub fn new(level: LogLevel, scope: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            timestamp: Utc::now(),
            level,
            scope: scope.into(),
            message: message.into(),
            detail: None,
        }
    }

    pub fn with_detail(mut self, detail: serde_json::Value) -> Self {
        self.detail = Some(detail);
        self
    }
}

/// Ring-buffer log that persists entries to a JSONL file.
pub struct RequestLog {
    entries: VecDeque<LogEntry>,
    file_path: std::path::PathBuf,
    writer: Option<BufWriter<File>>,
}

impl RequestLog {
    pub fn new(file_path: impl AsRef<Path>) -> std::io::Result<Self> {
        let file_path = file_path.as_ref().to_path_buf();

        if let Some(parent) = file_path.parent() {
            std::fs::create_dir_all(parent)?;
        }

        let mut entries = VecDeque::with_capacity(MAX_ENTRIES);
        let mut overflowed = false;

        if file_path.exists() {
            let file = File::open(&file_path)?;
            let reader = BufReader::new(file);
            for line in reader.lines().map_while(std::result::Result::ok) {
                if let Ok(entry) = serde_json::from_str::<LogEntry>(&line) {
                    if entries.len() >= MAX_ENTRIES {
                        entries.pop_front();
                        overflowed = true;
                    }
                    entries.push_back(entry);
                }
            }
        }

        let file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&file_path)?;
        let writer = BufWriter::new(file);

        let mut log = Self {
            entries,
            file_path,
            writer: Some(writer),
        };
        // The file holds more lines than the ring keeps; rewrite it to the
        // retained window so it stays bounded across restarts.
        if overflowed {
            log.compact()?;
        }
        Ok(log)
    }

    pub fn push(&mut self, entry: LogEntry) {
        if let Some(ref mut writer) = self.writer {
            if let Ok(json) = serde_json::to_string(&entry) {
                let _ = writeln!(writer, "{}", json);
                let _ = writer.flush();
            }
        }
        if self.entries.len() >= MAX_ENTRIES {
            self.entries.pop_front();
        }
        self.entries.push_back(entry);
    }

    pub fn recent(&self, limit: usize) -> Vec<LogEntry> {
        self.entries.iter().rev().take(limit).cloned().collect()
    }

    /// Rewrite the file to contain only the entries still in the ring.
    pub fn compact(&mut self) -> std::io::Result<()> {
        self.writer = None;
        let file = OpenOptions::new()
            .create(true)
            .write(true)
            .truncate(true)
            .open(&self.file_path)?;
        let mut writer = BufWriter::new(file);
        for entry in &self.entries {
            if let Ok(json) = serde_json::to_string(entry) {
                writeln!(writer, "{}", json)?;
            }
        }
        writer.flush()?;
        let file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&self.file_path)?;
        self.writer = Some(BufWriter::new(file));
        Ok(())
    }
}

#[derive(Clone)]
pub struct SharedLog(Arc<Mutex<RequestLog>>);

impl SharedLog {
    pub fn new(file_path: impl AsRef<Path>) -> std::io::Result<Self> {
        Ok(Self(Arc::new(Mutex::new(RequestLog::new(file_path)?))))
    }

    pub fn push(&self, entry: LogEntry) {
        if let Ok(mut log) = self.0.lock() {
            log.push(entry);
        }
    }

    pub fn info(&self, scope: impl Into<String>, message: impl Into<String>) {
        self.push(LogEntry::new(LogLevel::Info, scope, message));
    }

    pub fn warn(&self, scope: impl Into<String>, message: impl Into<String>) {
        self.push(LogEntry::new(LogLevel::Warn, scope, message));
    }

    pub fn error(&self, scope: impl Into<String>, message: impl Into<String>) {
        self.push(LogEntry::new(LogLevel::Error, scope, message));
    }

    pub fn debug(&self, scope: impl Into<String>, message: impl Into<String>) {
        self.push(LogEntry::new(LogLevel::Debug, scope, message));
    }

    pub fn with_detail(
        &self,
        level: LogLevel,
        scope: impl Into<String>,
        message: impl Into<String>,
        detail: serde_json::Value,
    ) {
        self.push(LogEntry::new(level, scope, message).with_detail(detail));
    }

    pub fn recent(&self, limit: usize) -> Vec<LogEntry> {
        self.0.lock().map(|l| l.recent(limit)).unwrap_or_default()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn test_entries_persist_and_reload() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("gateway.log");

        {
            let log = SharedLog::new(&path).unwrap();
            log.info("server", "request accepted");
            log.with_detail(
                LogLevel::Info,
                "dispatch",
                "completed",
                serde_json::json!({"input_tokens": 12, "output_tokens": 3}),
            );
        }

        let reloaded = SharedLog::new(&path).unwrap();
        let recent = reloaded.recent(10);
        assert_eq!(recent.len(), 2);
        assert_eq!(recent[0].scope, "dispatch");
        assert!(recent[0].detail.is_some());
    }

    #[test]
    fn test_reload_compacts_oversized_file() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("gateway.log");

        {
            let mut writer = BufWriter::new(File::create(&path).unwrap());
            for i in 0..MAX_ENTRIES + 25 {
                let entry = LogEntry::new(LogLevel::Info, "server", format!("entry {i}"));
                writeln!(writer, "{}", serde_json::to_string(&entry).unwrap()).unwrap();
            }
            writer.flush().unwrap();
        }

        let log = RequestLog::new(&path).unwrap();
        assert_eq!(log.recent(MAX_ENTRIES + 25).len(), MAX_ENTRIES);
        // Newest entry survives; the overflow fell off the front.
        assert_eq!(
            log.recent(1)[0].message,
            format!("entry {}", MAX_ENTRIES + 24)
        );

        let lines = BufReader::new(File::open(&path).unwrap()).lines().count();
        assert_eq!(lines, MAX_ENTRIES);
    }
}
