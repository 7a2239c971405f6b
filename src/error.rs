use std::io;
use thiserror::Error;
use std::str::Utf8Error;
use btleplug;
use serde_json;

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("Failed to determine path to config file")]
    NoConfigPath,

    #[error("Failed to acquire file lock on config file: {source}")]
    CanNotLock { source: io::Error },

    #[error("Failed to encode/decode config as utf-8: {source}")]
    Utf8Error { #[from] source: Utf8Error },

    #[error("Failed to read/write config file: {source}")]
    IOError { #[from] source: io::Error },

    #[error("Failed to parse/build config file: {source}")]
    JsonError { #[from] source: serde_json::Error },
}

impl ConfigError {
    pub fn is_file_not_found_error(&self) -> bool {
        match self {
            ConfigError::IOError { source } => source.kind() == io::ErrorKind::NotFound,
            _ => false,
        }
    }
}

#[derive(Error, Debug)]
pub enum DeviceError {
    #[error("Error communicating with device (btleplug): {source}")]
    Btle { #[from] source: btleplug::Error },

    #[error("No bluetooth adapter is available")]
    NoAdapter,

    #[error("The platform does not allow changing the adapter power state")]
    PowerControlUnsupported,

    #[error("Peripheral {0} has not been seen by the adapter")]
    UnknownPeripheral(String),

    #[error("A required bluetooth characteristic is not available")]
    MissingCharacteristic,

    #[error("Connecting to the peripheral took longer than {0} ms")]
    ConnectTimeout(u64),
}

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum FormatError {
    #[error("Payload of {len} bytes is not a whole number of 4 byte values")]
    TrailingBytes { len: usize },

    #[error("Frame has {actual} channels, expected {expected}")]
    ChannelCount { expected: usize, actual: usize },
}

#[derive(Error, Debug)]
pub enum SinkError {
    #[error("Failed to write telemetry log: {source}")]
    IOError { #[from] source: io::Error },
}

#[derive(Error, Debug)]
pub enum AppRunError {
    #[error("Failed to start collector (config): {source}")]
    ConfigError { #[from] source: ConfigError },

    #[error("Failed to start collector (device): {source}")]
    DeviceError { #[from] source: DeviceError },

    #[error("Failed to start collector (storage): {source}")]
    SinkError { #[from] source: SinkError },
}
