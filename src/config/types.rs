use std::path::PathBuf;
use std::time::Duration;
use serde::{Deserialize, Serialize};

use crate::device::constants::{CHANNEL_COUNT, CONNECT_TIMEOUT, DEVICE_NAME_PREFIX, ROWS_PER_FILE};

/// How a session decides that the notification subscription is active.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum SubscriptionAck {
    /// Wait for the peripheral to confirm the client characteristic configuration write.
    DescriptorWrite,
    /// Start streaming as soon as the subscription request has been issued.
    Immediate,
}

impl std::fmt::Display for SubscriptionAck {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let result = match self {
            SubscriptionAck::DescriptorWrite => "descriptorWrite",
            SubscriptionAck::Immediate => "immediate",
        };

        write!(f, "{}", result)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct Config {
    pub device_name_prefix: String,
    pub channel_count: usize,
    pub rows_per_file: usize,
    pub connect_timeout_ms: u64,
    pub subscription_ack: SubscriptionAck,
    pub log_directory: Option<PathBuf>,
    pub address_hash_salt: String,
}

impl Config {
    pub fn connect_timeout(&self) -> Duration {
        Duration::from_millis(self.connect_timeout_ms)
    }

    pub fn session_config(&self) -> SessionConfig {
        SessionConfig {
            channel_count: self.channel_count,
            rows_per_file: self.rows_per_file.max(1),
            subscription_ack: self.subscription_ack,
        }
    }
}

impl Default for Config {
    fn default() -> Self {
        Config {
            device_name_prefix: String::from(DEVICE_NAME_PREFIX),
            channel_count: CHANNEL_COUNT,
            rows_per_file: ROWS_PER_FILE,
            connect_timeout_ms: CONNECT_TIMEOUT,
            subscription_ack: SubscriptionAck::DescriptorWrite,
            log_directory: None,
            address_hash_salt: String::new(),
        }
    }
}

/// The part of [`Config`] a single peripheral session needs.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SessionConfig {
    pub channel_count: usize,
    pub rows_per_file: usize,
    pub subscription_ack: SubscriptionAck,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Config::default().session_config()
    }
}
