use uuid::Uuid;

/// A peripheral as seen in one advertisement.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PeripheralIdentity {
    pub address: String,
    pub display_name: String,
}

impl PeripheralIdentity {
    pub fn new(address: impl Into<String>, display_name: impl Into<String>) -> Self {
        PeripheralIdentity {
            address: address.into(),
            display_name: display_name.into(),
        }
    }

    /// Whether the advertised name starts with `prefix` (case-sensitive).
    pub fn matches_prefix(&self, prefix: &str) -> bool {
        self.display_name.starts_with(prefix)
    }
}

/// Adapter power state as reported by the host.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HardwareState {
    On,
    Off,
    TurningOn,
    TurningOff,
    Error,
}

/// One (service, characteristic) pair found during service discovery.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct GattPair {
    pub service: Uuid,
    pub characteristic: Uuid,
}

/// Outcomes of asynchronous radio requests and unsolicited hardware reports, delivered serially
/// to the [`crate::device::scanner::ScanCoordinator`].
#[derive(Debug, Clone, PartialEq)]
pub enum RadioEvent {
    AdapterState(HardwareState),
    /// The user or OS changed its own preference for the adapter power.
    EnvironmentPreference(bool),
    Advertisement {
        identity: PeripheralIdentity,
        rssi: i16,
    },
    ScanFailed {
        reason: String,
    },
    Connected {
        address: String,
    },
    ConnectFailed {
        address: String,
        reason: String,
    },
    Disconnected {
        address: String,
    },
    ServicesDiscovered {
        address: String,
        result: Result<Vec<GattPair>, String>,
    },
    DescriptorWritten {
        address: String,
        characteristic: Uuid,
        success: bool,
    },
    Notification {
        address: String,
        characteristic: Uuid,
        value: Vec<u8>,
    },
}

impl RadioEvent {
    /// The peripheral this event belongs to, if it is a per-peripheral event.
    pub fn address(&self) -> Option<&str> {
        match self {
            RadioEvent::Connected { address }
            | RadioEvent::ConnectFailed { address, .. }
            | RadioEvent::Disconnected { address }
            | RadioEvent::ServicesDiscovered { address, .. }
            | RadioEvent::DescriptorWritten { address, .. }
            | RadioEvent::Notification { address, .. } => Some(address),
            RadioEvent::AdapterState(_)
            | RadioEvent::EnvironmentPreference(_)
            | RadioEvent::Advertisement { .. }
            | RadioEvent::ScanFailed { .. } => None,
        }
    }
}

/// Coarse summary of the subsystem, for logging.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DeviceState {
    Idle,
    WaitingForRadio,
    Scanning,
    Connecting,
    Streaming,
    Unavailable,
}
