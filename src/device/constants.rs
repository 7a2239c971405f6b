use uuid::Uuid;

/**
 * Advertised names of the target peripheral start with this token (case-sensitive).
 */
pub const DEVICE_NAME_PREFIX: &str = "PPG_Ring";

/**
 * The UUID of the telemetry GATT service of the ring.
 */
pub const TELEMETRY_SERVICE: Uuid = Uuid::from_u128(0x6e400001_b5a3_f393_e0a9_e50e24dcca9e);

/**
 * The UUID of the characteristic that notifies telemetry frames.
 */
pub const TELEMETRY_CHARACTERISTIC: Uuid = Uuid::from_u128(0x6e400003_b5a3_f393_e0a9_e50e24dcca9e);

/**
 * The standard client characteristic configuration descriptor, written to enable notifications.
 */
pub const CLIENT_CHARACTERISTIC_CONFIG: Uuid = Uuid::from_u128(0x00002902_0000_1000_8000_00805f9b34fb);

/**
 * Channels per frame: PPG red/IR/green, accelerometer xyz, gyroscope xyz, magnetometer xyz.
 */
pub const CHANNEL_COUNT: usize = 12;

/**
 * Size in bytes of one encoded channel value.
 */
pub const CHANNEL_WIDTH: usize = 4;

/**
 * Telemetry rows written to one log file before a new file is opened.
 */
pub const ROWS_PER_FILE: usize = 1000;

/**
 * How long (milliseconds) a connection attempt may take before it is reported as failed.
 */
pub const CONNECT_TIMEOUT: u64 = 10_000;

/**
 * How long (milliseconds) to wait after shutdown so queued disconnect requests reach the adapter.
 */
pub const SHUTDOWN_DELAY: u64 = 500;

/**
 * How many hardware events may be queued for the event loop.
 */
pub const EVENT_QUEUE_DEPTH: usize = 256;

pub const TELEMETRY_HEADER: &str = "timestamp,PPG_red,PPG_IR,PPG_Green,IMU_Accel_x,IMU_Accel_y,IMU_Accel_z,IMU_Gyro_x,IMU_Gyro_y,IMU_Gyro_z,IMU_Mag_x,IMU_Mag_y,IMU_Mag_z";

pub const ADVERTISEMENT_HEADER: &str = "timestamp, hashed MAC, RSSI";

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn protocol_identifiers_match_their_published_form() {
        assert_eq!(TELEMETRY_SERVICE.to_string(), "6e400001-b5a3-f393-e0a9-e50e24dcca9e");
        assert_eq!(TELEMETRY_CHARACTERISTIC.to_string(), "6e400003-b5a3-f393-e0a9-e50e24dcca9e");
        assert_eq!(CLIENT_CHARACTERISTIC_CONFIG.to_string(), "00002902-0000-1000-8000-00805f9b34fb");
        assert_eq!(TELEMETRY_HEADER.split(',').count(), CHANNEL_COUNT + 1);
    }
}
