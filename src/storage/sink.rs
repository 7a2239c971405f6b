use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use crate::device::constants::{ADVERTISEMENT_HEADER, TELEMETRY_HEADER};
use crate::error::SinkError;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum LogStream {
    Telemetry,
    Advertisements,
}

impl LogStream {
    pub fn file_prefix(&self) -> &'static str {
        match self {
            LogStream::Telemetry => "ppg_ring",
            LogStream::Advertisements => "bluetooth",
        }
    }

    pub fn header(&self) -> &'static str {
        match self {
            LogStream::Telemetry => TELEMETRY_HEADER,
            LogStream::Advertisements => ADVERTISEMENT_HEADER,
        }
    }
}

impl std::fmt::Display for LogStream {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.file_prefix())
    }
}

/// Append-only log destination for decoded rows.
///
/// `append` returns only once the row is durable. A stream without an open file gets one on
/// its first append.
pub trait TelemetrySink: Send {
    fn append(&mut self, stream: LogStream, row: &str) -> Result<(), SinkError>;

    /// Closes the current file of `stream` and opens a new one.
    fn rotate(&mut self, stream: LogStream) -> Result<(), SinkError>;
}

/// Keeps every file in memory. Clones share the same storage.
#[derive(Debug, Clone, Default)]
pub struct MemorySink {
    files: Arc<Mutex<HashMap<LogStream, Vec<Vec<String>>>>>,
}

impl MemorySink {
    pub fn new() -> Self {
        Self::default()
    }

    /// Rows of every file opened for `stream`, oldest file first.
    pub fn files(&self, stream: LogStream) -> Vec<Vec<String>> {
        self.lock().get(&stream).cloned().unwrap_or_default()
    }

    pub fn rows(&self, stream: LogStream) -> Vec<String> {
        self.files(stream).into_iter().flatten().collect()
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, HashMap<LogStream, Vec<Vec<String>>>> {
        self.files.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

impl TelemetrySink for MemorySink {
    fn append(&mut self, stream: LogStream, row: &str) -> Result<(), SinkError> {
        let mut files = self.lock();
        let stream_files = files.entry(stream).or_default();
        if stream_files.is_empty() {
            stream_files.push(Vec::new());
        }
        if let Some(current) = stream_files.last_mut() {
            current.push(row.to_string());
        }
        Ok(())
    }

    fn rotate(&mut self, stream: LogStream) -> Result<(), SinkError> {
        self.lock().entry(stream).or_default().push(Vec::new());
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn first_append_opens_a_file() {
        let mut sink = MemorySink::new();
        sink.append(LogStream::Telemetry, "1,2").unwrap();

        assert_eq!(sink.files(LogStream::Telemetry), vec![vec!["1,2".to_string()]]);
        assert!(sink.files(LogStream::Advertisements).is_empty());
    }

    #[test]
    fn rotate_starts_a_new_file_and_clones_share_storage() {
        let observer = MemorySink::new();
        let mut sink = observer.clone();
        sink.append(LogStream::Advertisements, "a").unwrap();
        sink.rotate(LogStream::Advertisements).unwrap();
        sink.append(LogStream::Advertisements, "b").unwrap();

        assert_eq!(
            observer.files(LogStream::Advertisements),
            vec![vec!["a".to_string()], vec!["b".to_string()]],
        );
        assert_eq!(observer.rows(LogStream::Advertisements), vec!["a", "b"]);
    }
}
