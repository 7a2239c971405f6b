use uuid::Uuid;

use crate::error::DeviceError;

/// The host radio capability.
///
/// Every request only starts the operation and returns immediately. Its outcome arrives later
/// as a [`crate::device::types::RadioEvent`]. An `Err` means the request could not even be
/// issued. One handle is shared by the power arbiter, the scan coordinator and the active
/// session; only the arbiter calls [`Radio::request_power`].
pub trait Radio: Send + Sync {
    /// Current adapter power, or `None` when the device has no adapter at all.
    fn power_state(&self) -> Option<bool>;

    fn request_power(&self, on: bool) -> Result<(), DeviceError>;

    fn start_scan(&self) -> Result<(), DeviceError>;

    fn stop_scan(&self) -> Result<(), DeviceError>;

    fn connect(&self, address: &str) -> Result<(), DeviceError>;

    fn discover_services(&self, address: &str) -> Result<(), DeviceError>;

    fn subscribe(&self, address: &str, characteristic: Uuid) -> Result<(), DeviceError>;

    fn unsubscribe(&self, address: &str, characteristic: Uuid) -> Result<(), DeviceError>;

    /// Releases the connection handle; safe to call when no connection exists.
    fn disconnect(&self, address: &str) -> Result<(), DeviceError>;
}
