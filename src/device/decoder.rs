use crate::device::constants::CHANNEL_WIDTH;
use crate::error::FormatError;

/// One decoded sample set, stamped with the local receive time.
#[derive(Debug, Clone, PartialEq)]
pub struct TelemetryFrame {
    pub timestamp_millis: i64,
    pub channels: Vec<f32>,
}

impl TelemetryFrame {
    /// `<unix_epoch_millis>,<float_1>,...,<float_n>`
    pub fn to_row(&self) -> String {
        let mut row = self.timestamp_millis.to_string();
        for value in &self.channels {
            row.push(',');
            row.push_str(&value.to_string());
        }
        row
    }
}

/// Interprets `bytes` as consecutive little-endian IEEE-754 single precision values.
pub fn decode(bytes: &[u8]) -> Result<Vec<f32>, FormatError> {
    if bytes.len() % CHANNEL_WIDTH != 0 {
        return Err(FormatError::TrailingBytes { len: bytes.len() });
    }

    Ok(bytes
        .chunks_exact(CHANNEL_WIDTH)
        .map(|chunk| f32::from_le_bytes([chunk[0], chunk[1], chunk[2], chunk[3]]))
        .collect())
}

/// Decodes a notification payload into a frame with exactly `channel_count` channels.
pub fn decode_frame(bytes: &[u8], channel_count: usize, timestamp_millis: i64) -> Result<TelemetryFrame, FormatError> {
    let channels = decode(bytes)?;
    if channels.len() != channel_count {
        return Err(FormatError::ChannelCount { expected: channel_count, actual: channels.len() });
    }

    Ok(TelemetryFrame { timestamp_millis, channels })
}

pub fn hex_dump(bytes: &[u8]) -> String {
    bytes.iter().map(|byte| format!("{:02x}", byte)).collect::<Vec<_>>().join(" ")
}
