use std::collections::HashMap;
use std::fs::{File, OpenOptions};
use std::io::{self, Write};
use std::path::{Path, PathBuf};
use log::info;

use crate::error::SinkError;
use crate::storage::sink::{LogStream, TelemetrySink};
use crate::storage::unix_millis;

struct OpenLog {
    file: File,
    path: PathBuf,
}

/// Writes each stream to CSV files in one directory, each file starting with the stream header.
pub struct CsvFileSink {
    directory: PathBuf,
    open: HashMap<LogStream, OpenLog>,
}

impl CsvFileSink {
    pub fn new(directory: impl Into<PathBuf>) -> Result<Self, SinkError> {
        let directory = directory.into();
        std::fs::create_dir_all(&directory)?;
        info!("Writing logs to {}", directory.to_string_lossy());

        Ok(CsvFileSink {
            directory,
            open: HashMap::new(),
        })
    }

    pub fn directory(&self) -> &Path {
        &self.directory
    }

    /// Path of the file currently receiving rows for `stream`.
    pub fn current_path(&self, stream: LogStream) -> Option<&Path> {
        self.open.get(&stream).map(|log| log.path.as_path())
    }

    fn open_new(&mut self, stream: LogStream) -> Result<(), SinkError> {
        let stamp = unix_millis();
        let mut attempt = 0;

        let (file, path) = loop {
            let name = match attempt {
                0 => format!("{}_{}.csv", stream.file_prefix(), stamp),
                n => format!("{}_{}_{}.csv", stream.file_prefix(), stamp, n),
            };
            let path = self.directory.join(name);

            match OpenOptions::new().append(true).create_new(true).open(&path) {
                Ok(file) => break (file, path),
                Err(err) if err.kind() == io::ErrorKind::AlreadyExists => attempt += 1,
                Err(err) => return Err(err.into()),
            }
        };

        let mut log = OpenLog { file, path };
        write_line(&mut log.file, stream.header())?;
        info!("Opened {} log {}", stream, log.path.to_string_lossy());

        self.open.insert(stream, log);
        Ok(())
    }
}

fn write_line(file: &mut File, line: &str) -> Result<(), SinkError> {
    file.write_all(line.as_bytes())?;
    file.write_all(b"\n")?;
    file.flush()?;
    file.sync_data()?;
    Ok(())
}

impl TelemetrySink for CsvFileSink {
    fn append(&mut self, stream: LogStream, row: &str) -> Result<(), SinkError> {
        if !self.open.contains_key(&stream) {
            self.open_new(stream)?;
        }

        match self.open.get_mut(&stream) {
            Some(log) => write_line(&mut log.file, row),
            None => Ok(()),
        }
    }

    fn rotate(&mut self, stream: LogStream) -> Result<(), SinkError> {
        // dropping the previous handle closes it; every row was already synced
        self.open.remove(&stream);
        self.open_new(stream)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn read(path: &Path) -> Vec<String> {
        std::fs::read_to_string(path).unwrap().lines().map(String::from).collect()
    }

    #[test]
    fn rows_follow_the_header() {
        let dir = tempfile::tempdir().unwrap();
        let mut sink = CsvFileSink::new(dir.path().join("logs")).unwrap();

        sink.append(LogStream::Telemetry, "1,2,3").unwrap();
        sink.append(LogStream::Telemetry, "4,5,6").unwrap();

        let path = sink.current_path(LogStream::Telemetry).unwrap().to_path_buf();
        assert!(path.file_name().unwrap().to_string_lossy().starts_with("ppg_ring_"));
        assert_eq!(read(&path), vec![LogStream::Telemetry.header(), "1,2,3", "4,5,6"]);
    }

    #[test]
    fn rotate_opens_a_distinct_file() {
        let dir = tempfile::tempdir().unwrap();
        let mut sink = CsvFileSink::new(dir.path()).unwrap();

        sink.rotate(LogStream::Advertisements).unwrap();
        sink.append(LogStream::Advertisements, "first").unwrap();
        let first = sink.current_path(LogStream::Advertisements).unwrap().to_path_buf();

        sink.rotate(LogStream::Advertisements).unwrap();
        sink.append(LogStream::Advertisements, "second").unwrap();
        let second = sink.current_path(LogStream::Advertisements).unwrap().to_path_buf();

        assert_ne!(first, second);
        assert_eq!(read(&first), vec![LogStream::Advertisements.header(), "first"]);
        assert_eq!(read(&second), vec![LogStream::Advertisements.header(), "second"]);
        assert_eq!(std::fs::read_dir(dir.path()).unwrap().count(), 2);
    }
}
