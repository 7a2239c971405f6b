use std::sync::Arc;
use log::{debug, error, info, warn};
use uuid::Uuid;

use crate::config::types::{SessionConfig, SubscriptionAck};
use crate::device::constants::{CLIENT_CHARACTERISTIC_CONFIG, TELEMETRY_CHARACTERISTIC, TELEMETRY_SERVICE};
use crate::device::decoder::{decode_frame, hex_dump};
use crate::device::radio::Radio;
use crate::device::types::{GattPair, PeripheralIdentity, RadioEvent};
use crate::error::FormatError;
use crate::storage::sink::{LogStream, TelemetrySink};
use crate::storage::unix_millis;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionState {
    Disconnected,
    Connecting,
    ServicesDiscovering,
    Subscribing,
    Streaming,
    Closing,
}

/// A [`RadioEvent`] addressed to one peripheral, without the address.
#[derive(Debug, Clone, PartialEq)]
pub enum SessionEvent {
    Connected,
    ConnectFailed(String),
    Disconnected,
    ServicesDiscovered(Result<Vec<GattPair>, String>),
    DescriptorWritten { characteristic: Uuid, success: bool },
    Notification { characteristic: Uuid, value: Vec<u8> },
}

impl SessionEvent {
    pub fn from_radio(event: RadioEvent) -> Option<SessionEvent> {
        match event {
            RadioEvent::Connected { .. } => Some(SessionEvent::Connected),
            RadioEvent::ConnectFailed { reason, .. } => Some(SessionEvent::ConnectFailed(reason)),
            RadioEvent::Disconnected { .. } => Some(SessionEvent::Disconnected),
            RadioEvent::ServicesDiscovered { result, .. } => Some(SessionEvent::ServicesDiscovered(result)),
            RadioEvent::DescriptorWritten { characteristic, success, .. } => {
                Some(SessionEvent::DescriptorWritten { characteristic, success })
            },
            RadioEvent::Notification { characteristic, value, .. } => {
                Some(SessionEvent::Notification { characteristic, value })
            },
            RadioEvent::AdapterState(_)
            | RadioEvent::EnvironmentPreference(_)
            | RadioEvent::Advertisement { .. }
            | RadioEvent::ScanFailed { .. } => None,
        }
    }
}

/// What [`PeripheralSession::handle`] did with an event.
#[derive(Debug, Clone, PartialEq)]
pub enum SessionOutcome {
    Advanced(ConnectionState),
    FrameWritten,
    FrameDropped(FormatError),
    SinkFailed,
    /// The event arrived after the session ended, or carries nothing for this session.
    Ignored,
    /// The event makes no sense in the current state.
    Unexpected,
}

/// Connection, discovery, subscription and streaming for one peripheral.
///
/// A session never reconnects. Once it reaches [`ConnectionState::Disconnected`] it is finished
/// and every further event is ignored.
pub struct PeripheralSession {
    identity: PeripheralIdentity,
    state: ConnectionState,
    telemetry_characteristic: Option<Uuid>,
    rows_in_file: usize,
    needs_new_file: bool,
    frames_written: u64,
    frames_dropped: u64,
    config: SessionConfig,
    radio: Arc<dyn Radio>,
}

impl PeripheralSession {
    /// Begins connecting. The session's telemetry log file is opened with its first frame.
    pub fn open(identity: PeripheralIdentity, radio: Arc<dyn Radio>, config: SessionConfig) -> Self {
        let mut session = PeripheralSession {
            identity,
            state: ConnectionState::Disconnected,
            telemetry_characteristic: None,
            rows_in_file: 0,
            needs_new_file: true,
            frames_written: 0,
            frames_dropped: 0,
            config,
            radio,
        };

        info!("Connecting to peripheral {} ({})", session.identity.display_name, session.identity.address);
        match session.radio.connect(&session.identity.address) {
            Ok(()) => session.state = ConnectionState::Connecting,
            Err(err) => warn!("Could not start connecting to {}: {}", session.identity.address, err),
        }

        session
    }

    pub fn identity(&self) -> &PeripheralIdentity {
        &self.identity
    }

    pub fn address(&self) -> &str {
        &self.identity.address
    }

    pub fn state(&self) -> ConnectionState {
        self.state
    }

    pub fn is_finished(&self) -> bool {
        self.state == ConnectionState::Disconnected
    }

    pub fn rows_in_current_file(&self) -> usize {
        self.rows_in_file
    }

    pub fn frames_written(&self) -> u64 {
        self.frames_written
    }

    pub fn frames_dropped(&self) -> u64 {
        self.frames_dropped
    }

    pub fn handle(&mut self, event: SessionEvent, sink: &mut dyn TelemetrySink) -> SessionOutcome {
        match (self.state, event) {
            (ConnectionState::Disconnected, event) | (ConnectionState::Closing, event) => {
                debug!("Ignoring {:?} for ended session with {}", event, self.identity.address);
                SessionOutcome::Ignored
            },
            (_, SessionEvent::Disconnected) => {
                info!("Peripheral {} disconnected", self.identity.address);
                self.teardown(false)
            },
            (ConnectionState::Connecting, SessionEvent::Connected) => {
                info!("Connected; Discovering services...");
                match self.radio.discover_services(&self.identity.address) {
                    Ok(()) => self.advance(ConnectionState::ServicesDiscovering),
                    Err(err) => {
                        warn!("Could not start service discovery: {}", err);
                        self.teardown(false)
                    },
                }
            },
            (ConnectionState::Connecting, SessionEvent::ConnectFailed(reason)) => {
                warn!("Connecting to peripheral {} failed: {}", self.identity.address, reason);
                self.teardown(false)
            },
            (ConnectionState::ServicesDiscovering, SessionEvent::ServicesDiscovered(Ok(pairs))) => {
                self.subscribe(&pairs)
            },
            (ConnectionState::ServicesDiscovering, SessionEvent::ServicesDiscovered(Err(reason))) => {
                warn!("Service discovery on {} failed: {}", self.identity.address, reason);
                self.teardown(false)
            },
            (ConnectionState::Subscribing, SessionEvent::DescriptorWritten { characteristic, success }) => {
                if Some(characteristic) != self.telemetry_characteristic {
                    debug!("Descriptor write for unrelated characteristic {}", characteristic);
                    return SessionOutcome::Ignored;
                }

                if success {
                    info!("Notifications enabled; streaming telemetry");
                    self.advance(ConnectionState::Streaming)
                } else {
                    warn!("Peripheral {} refused to enable notifications", self.identity.address);
                    self.teardown(false)
                }
            },
            (ConnectionState::Subscribing, SessionEvent::Notification { characteristic, value }) => {
                if Some(characteristic) != self.telemetry_characteristic {
                    return SessionOutcome::Ignored;
                }

                // data only flows once the descriptor is written, the confirmation is late
                info!("Telemetry arrived before the subscription was confirmed; streaming");
                self.state = ConnectionState::Streaming;
                self.write_frame(&value, sink)
            },
            (ConnectionState::Streaming, SessionEvent::Notification { characteristic, value }) => {
                if Some(characteristic) != self.telemetry_characteristic {
                    debug!("Notification from unrelated characteristic {}", characteristic);
                    return SessionOutcome::Ignored;
                }

                self.write_frame(&value, sink)
            },
            (ConnectionState::Streaming, SessionEvent::DescriptorWritten { characteristic, success }) => {
                if Some(characteristic) != self.telemetry_characteristic || success {
                    debug!("Descriptor write for {} confirmed after streaming started", characteristic);
                    return SessionOutcome::Ignored;
                }

                warn!("Peripheral {} refused to enable notifications", self.identity.address);
                self.teardown(false)
            },
            (state, event) => {
                warn!("Unexpected {:?} while {:?} with {}", event, state, self.identity.address);
                SessionOutcome::Unexpected
            },
        }
    }

    /// App initiated close; always releases the connection.
    pub fn close(&mut self) {
        if self.is_finished() {
            return;
        }

        info!("Closing session with {}", self.identity.address);
        self.teardown(true);
    }

    fn advance(&mut self, state: ConnectionState) -> SessionOutcome {
        debug!("Session {}: {:?} -> {:?}", self.identity.address, self.state, state);
        self.state = state;
        SessionOutcome::Advanced(state)
    }

    fn subscribe(&mut self, pairs: &[GattPair]) -> SessionOutcome {
        for pair in pairs {
            debug!("Found service {} characteristic {}", pair.service, pair.characteristic);
        }

        let found = pairs
            .iter()
            .filter(|pair| pair.characteristic == TELEMETRY_CHARACTERISTIC)
            .min_by_key(|pair| pair.service != TELEMETRY_SERVICE);

        let pair = match found {
            Some(pair) => *pair,
            None => {
                warn!("Peripheral {} has no telemetry characteristic", self.identity.address);
                return self.teardown(false);
            },
        };

        info!("Subscribing to characteristic {} {}", pair.service, pair.characteristic);
        debug!("Enabling notifications through descriptor {}", CLIENT_CHARACTERISTIC_CONFIG);
        self.telemetry_characteristic = Some(pair.characteristic);

        if let Err(err) = self.radio.subscribe(&self.identity.address, pair.characteristic) {
            warn!("Could not enable notifications: {}", err);
            return self.teardown(false);
        }

        match self.config.subscription_ack {
            SubscriptionAck::DescriptorWrite => self.advance(ConnectionState::Subscribing),
            SubscriptionAck::Immediate => {
                self.advance(ConnectionState::Subscribing);
                self.advance(ConnectionState::Streaming)
            },
        }
    }

    fn write_frame(&mut self, value: &[u8], sink: &mut dyn TelemetrySink) -> SessionOutcome {
        debug!("Notification from {}: {}", self.identity.address, hex_dump(value));

        let frame = match decode_frame(value, self.config.channel_count, unix_millis()) {
            Ok(frame) => frame,
            Err(err) => {
                error!("Dropping telemetry payload from {}: {}", self.identity.address, err);
                self.frames_dropped += 1;
                return SessionOutcome::FrameDropped(err);
            },
        };

        if self.needs_new_file || self.rows_in_file >= self.config.rows_per_file {
            if let Err(err) = sink.rotate(LogStream::Telemetry) {
                error!("Failed to open a telemetry log for {}: {}", self.identity.display_name, err);
            }
            self.needs_new_file = false;
            self.rows_in_file = 0;
        }

        match sink.append(LogStream::Telemetry, &frame.to_row()) {
            Ok(()) => {
                self.rows_in_file += 1;
                self.frames_written += 1;
                SessionOutcome::FrameWritten
            },
            Err(err) => {
                error!("Failed to write telemetry row: {}", err);
                SessionOutcome::SinkFailed
            },
        }
    }

    fn teardown(&mut self, unsubscribe: bool) -> SessionOutcome {
        let streaming = matches!(self.state, ConnectionState::Subscribing | ConnectionState::Streaming);
        self.state = ConnectionState::Closing;

        if unsubscribe && streaming {
            if let Some(characteristic) = self.telemetry_characteristic {
                if let Err(err) = self.radio.unsubscribe(&self.identity.address, characteristic) {
                    warn!("Could not disable notifications: {}", err);
                }
            }
        }

        if let Err(err) = self.radio.disconnect(&self.identity.address) {
            warn!("Could not release connection to {}: {}", self.identity.address, err);
        }

        info!(
            "Session with {} ended ({} frames written, {} dropped)",
            self.identity.address, self.frames_written, self.frames_dropped,
        );

        self.telemetry_characteristic = None;
        self.rows_in_file = 0;
        self.advance(ConnectionState::Disconnected)
    }
}
