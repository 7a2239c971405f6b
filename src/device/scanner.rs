use std::sync::Arc;
use log::{debug, error, info, warn};

use crate::config::types::{Config, SessionConfig};
use crate::device::power::RadioPowerArbiter;
use crate::device::radio::Radio;
use crate::device::session::{ConnectionState, PeripheralSession, SessionEvent};
use crate::device::types::{DeviceState, HardwareState, PeripheralIdentity, RadioEvent};
use crate::storage::hash::AddressHasher;
use crate::storage::sink::{LogStream, TelemetrySink};
use crate::storage::unix_millis;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ScanState {
    Idle,
    Requested,
    Active,
}

/// Owns the scan intent, the power arbiter and the one active peripheral session.
///
/// All radio events enter through [`ScanCoordinator::handle_event`], one at a time.
pub struct ScanCoordinator {
    state: ScanState,
    arbiter: RadioPowerArbiter,
    session: Option<PeripheralSession>,
    radio: Arc<dyn Radio>,
    sink: Box<dyn TelemetrySink>,
    hasher: AddressHasher,
    name_prefix: String,
    session_config: SessionConfig,
}

impl ScanCoordinator {
    pub fn new(radio: Arc<dyn Radio>, mut sink: Box<dyn TelemetrySink>, config: &Config) -> Self {
        if let Err(err) = sink.rotate(LogStream::Advertisements) {
            error!("Failed to open the advertisement log: {}", err);
        }

        ScanCoordinator {
            state: ScanState::Idle,
            arbiter: RadioPowerArbiter::new(radio.clone()),
            session: None,
            radio,
            sink,
            hasher: AddressHasher::new(config.address_hash_salt.clone()),
            name_prefix: config.device_name_prefix.clone(),
            session_config: config.session_config(),
        }
    }

    pub fn scan_state(&self) -> ScanState {
        self.state
    }

    pub fn arbiter(&self) -> &RadioPowerArbiter {
        &self.arbiter
    }

    pub fn session(&self) -> Option<&PeripheralSession> {
        self.session.as_ref()
    }

    pub fn status(&self) -> DeviceState {
        if !self.arbiter.is_available() {
            return DeviceState::Unavailable;
        }

        match (&self.session, self.state) {
            (Some(session), _) if session.state() == ConnectionState::Streaming => DeviceState::Streaming,
            (Some(_), _) => DeviceState::Connecting,
            (None, ScanState::Idle) => DeviceState::Idle,
            (None, ScanState::Requested) => DeviceState::WaitingForRadio,
            (None, ScanState::Active) => DeviceState::Scanning,
        }
    }

    pub fn start_scanning(&mut self) {
        if !self.arbiter.is_available() {
            debug!("Not scanning, adapter unavailable");
            return;
        }

        if self.state == ScanState::Active {
            return;
        }

        info!("Scan requested");
        self.state = ScanState::Requested;
        self.arbiter.set_app_want(true);

        if self.arbiter.is_radio_on() {
            self.begin_scan();
        } else {
            info!("Waiting for the adapter to power on");
        }
    }

    /// Stops scanning and lets go of the radio. An active session is left alone.
    pub fn stop_scanning(&mut self) {
        if self.state == ScanState::Idle {
            return;
        }

        info!("Stopping scan");
        self.state = ScanState::Idle;

        // the host may never confirm the stop, nothing waits for it
        if let Err(err) = self.radio.stop_scan() {
            warn!("Failed to stop scanning: {}", err);
        }

        self.arbiter.set_app_want(false);
    }

    /// Closes any session, then stops scanning.
    pub fn shutdown(&mut self) {
        if let Some(mut session) = self.session.take() {
            session.close();
        }
        self.stop_scanning();
    }

    pub fn on_advertisement_seen(&mut self, identity: PeripheralIdentity, rssi: i16) {
        let row = format!("{}, {}, {}", unix_millis(), self.hasher.hash(&identity.address), rssi);
        if let Err(err) = self.sink.append(LogStream::Advertisements, &row) {
            error!("Failed to log advertisement: {}", err);
        }

        if !identity.matches_prefix(&self.name_prefix) {
            return;
        }

        if self.state != ScanState::Active {
            debug!("Ignoring {} seen while not scanning", identity.display_name);
            return;
        }

        if let Some(session) = &self.session {
            debug!(
                "Ignoring {} ({}), already in a session with {}",
                identity.display_name, identity.address, session.address(),
            );
            return;
        }

        info!("Found peripheral {} ({}) rssi {}", identity.display_name, identity.address, rssi);
        let session = PeripheralSession::open(identity, self.radio.clone(), self.session_config);
        if session.is_finished() {
            info!("Session ended before connecting; continuing to scan");
        } else {
            self.session = Some(session);
        }
    }

    pub fn handle_event(&mut self, event: RadioEvent) {
        match event {
            RadioEvent::AdapterState(state) => self.on_adapter_state(state),
            RadioEvent::EnvironmentPreference(on) => self.arbiter.notify_environment_changed(on),
            RadioEvent::Advertisement { identity, rssi } => self.on_advertisement_seen(identity, rssi),
            RadioEvent::ScanFailed { reason } => {
                warn!("Scan failed: {}", reason);
                if self.state == ScanState::Active {
                    self.state = ScanState::Requested;
                }
            },
            event => self.route_to_session(event),
        }
    }

    fn on_adapter_state(&mut self, state: HardwareState) {
        let ready = self.arbiter.notify_hardware_state(state);

        if ready && self.state == ScanState::Requested {
            self.begin_scan();
        }

        if matches!(state, HardwareState::Off | HardwareState::Error) {
            if self.state == ScanState::Active {
                self.state = ScanState::Requested;
            }

            if let Some(mut session) = self.session.take() {
                info!("Adapter went away during session with {}", session.address());
                session.close();
            }
        }
    }

    fn begin_scan(&mut self) {
        match self.radio.start_scan() {
            Ok(()) => {
                info!("Scanning for peripherals named {}*", self.name_prefix);
                self.state = ScanState::Active;
            },
            Err(err) => warn!("Failed to start scanning: {}", err),
        }
    }

    fn route_to_session(&mut self, event: RadioEvent) {
        let session = match &mut self.session {
            Some(session) if event.address() == Some(session.address()) => session,
            _ => {
                debug!("No session for {:?}; ignoring", event);
                return;
            },
        };

        if let Some(event) = SessionEvent::from_radio(event) {
            session.handle(event, self.sink.as_mut());
        }

        if session.is_finished() {
            info!("Session ended; returning to scanning");
            self.session = None;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::device::radio::fake::{FakeRadio, RadioCall};
    use crate::storage::sink::MemorySink;

    fn coordinator(power: Option<bool>) -> (ScanCoordinator, Arc<FakeRadio>, MemorySink) {
        let radio = Arc::new(FakeRadio::new(power));
        let sink = MemorySink::new();
        let coordinator = ScanCoordinator::new(radio.clone(), Box::new(sink.clone()), &Config::default());
        (coordinator, radio, sink)
    }

    fn ring(address: &str) -> PeripheralIdentity {
        PeripheralIdentity::new(address, "PPG_Ring#1")
    }

    #[test]
    fn scan_starts_at_once_when_the_radio_is_on() {
        let (mut coordinator, radio, _sink) = coordinator(Some(true));
        coordinator.start_scanning();

        assert_eq!(coordinator.scan_state(), ScanState::Active);
        assert_eq!(radio.calls(), vec![RadioCall::StartScan]);
        assert_eq!(coordinator.status(), DeviceState::Scanning);
    }

    #[test]
    fn scan_waits_for_power_on_confirmation() {
        let (mut coordinator, radio, _sink) = coordinator(Some(false));
        coordinator.start_scanning();

        assert_eq!(coordinator.scan_state(), ScanState::Requested);
        assert_eq!(coordinator.status(), DeviceState::WaitingForRadio);
        assert_eq!(radio.calls(), vec![RadioCall::RequestPower(true)]);

        coordinator.handle_event(RadioEvent::AdapterState(HardwareState::TurningOn));
        assert_eq!(coordinator.scan_state(), ScanState::Requested);
        coordinator.handle_event(RadioEvent::AdapterState(HardwareState::On));
        assert_eq!(coordinator.scan_state(), ScanState::Active);
        assert_eq!(radio.calls(), vec![RadioCall::RequestPower(true), RadioCall::StartScan]);
    }

    #[test]
    fn stop_returns_a_borrowed_radio() {
        let (mut coordinator, radio, _sink) = coordinator(Some(false));
        coordinator.start_scanning();
        coordinator.handle_event(RadioEvent::AdapterState(HardwareState::On));
        radio.clear();

        coordinator.stop_scanning();
        assert_eq!(coordinator.scan_state(), ScanState::Idle);
        assert_eq!(radio.calls(), vec![RadioCall::StopScan, RadioCall::RequestPower(false)]);
    }

    #[test]
    fn radio_the_user_turned_on_stays_on_when_power_control_is_refused() {
        let (mut coordinator, radio, _sink) = coordinator(Some(false));
        radio.fail_power_requests();
        coordinator.start_scanning();
        assert_eq!(coordinator.scan_state(), ScanState::Requested);

        coordinator.handle_event(RadioEvent::AdapterState(HardwareState::TurningOn));
        coordinator.handle_event(RadioEvent::AdapterState(HardwareState::On));
        assert_eq!(coordinator.scan_state(), ScanState::Active);

        coordinator.shutdown();
        assert_eq!(radio.calls(), vec![RadioCall::RequestPower(true), RadioCall::StartScan, RadioCall::StopScan]);
    }

    #[test]
    fn stop_keeps_an_environment_owned_radio_on() {
        let (mut coordinator, radio, _sink) = coordinator(Some(true));
        coordinator.start_scanning();
        coordinator.stop_scanning();

        assert_eq!(radio.calls(), vec![RadioCall::StartScan, RadioCall::StopScan]);
    }

    #[test]
    fn every_sighting_is_logged_with_a_hashed_address() {
        let (mut coordinator, _radio, sink) = coordinator(Some(true));
        coordinator.start_scanning();

        coordinator.on_advertisement_seen(PeripheralIdentity::new("11:22:33:44:55:66", "Headphones"), -70);
        coordinator.on_advertisement_seen(ring("AA:BB:CC:DD:EE:FF"), -55);

        let rows = sink.rows(LogStream::Advertisements);
        assert_eq!(rows.len(), 2);
        for row in &rows {
            assert!(!row.contains("11:22:33") && !row.contains("AA:BB:CC"));
        }
        let fields: Vec<&str> = rows[0].split(", ").collect();
        assert_eq!(fields.len(), 3);
        assert_eq!(fields[1], AddressHasher::default().hash("11:22:33:44:55:66"));
        assert_eq!(fields[2], "-70");
    }

    #[test]
    fn only_matching_names_start_a_session() {
        let (mut coordinator, radio, _sink) = coordinator(Some(true));
        coordinator.start_scanning();

        coordinator.on_advertisement_seen(PeripheralIdentity::new("11:22:33:44:55:66", "ppg_ring#1"), -60);
        coordinator.on_advertisement_seen(PeripheralIdentity::new("11:22:33:44:55:67", "My PPG_Ring"), -60);
        assert!(coordinator.session().is_none());

        coordinator.on_advertisement_seen(ring("AA:BB:CC:DD:EE:FF"), -60);
        assert!(coordinator.session().is_some());
        assert_eq!(coordinator.status(), DeviceState::Connecting);
        assert_eq!(radio.calls().last(), Some(&RadioCall::Connect("AA:BB:CC:DD:EE:FF".to_string())));
    }

    #[test]
    fn second_matching_device_is_ignored_while_a_session_is_active() {
        let (mut coordinator, radio, _sink) = coordinator(Some(true));
        coordinator.start_scanning();
        coordinator.on_advertisement_seen(ring("AA:BB:CC:DD:EE:FF"), -60);
        coordinator.on_advertisement_seen(ring("AA:BB:CC:DD:EE:FF"), -60);
        coordinator.on_advertisement_seen(ring("00:11:22:33:44:55"), -60);

        let connects = radio.calls().into_iter().filter(|call| matches!(call, RadioCall::Connect(_))).count();
        assert_eq!(connects, 1);
        assert_eq!(coordinator.session().map(|session| session.address()), Some("AA:BB:CC:DD:EE:FF"));
    }

    #[test]
    fn sightings_while_not_scanning_start_nothing() {
        let (mut coordinator, radio, sink) = coordinator(Some(true));
        coordinator.on_advertisement_seen(ring("AA:BB:CC:DD:EE:FF"), -60);

        assert!(coordinator.session().is_none());
        assert!(radio.calls().is_empty());
        assert_eq!(sink.rows(LogStream::Advertisements).len(), 1);
    }

    #[test]
    fn session_failure_frees_the_slot_for_the_next_sighting() {
        let (mut coordinator, radio, _sink) = coordinator(Some(true));
        coordinator.start_scanning();
        coordinator.on_advertisement_seen(ring("AA:BB:CC:DD:EE:FF"), -60);

        coordinator.handle_event(RadioEvent::ConnectFailed { address: "AA:BB:CC:DD:EE:FF".to_string(), reason: "timeout".to_string() });
        assert!(coordinator.session().is_none());
        assert_eq!(coordinator.scan_state(), ScanState::Active);

        // late duplicate for the ended session
        coordinator.handle_event(RadioEvent::Connected { address: "AA:BB:CC:DD:EE:FF".to_string() });
        assert!(coordinator.session().is_none());

        coordinator.on_advertisement_seen(ring("AA:BB:CC:DD:EE:FF"), -60);
        assert!(coordinator.session().is_some());
        let connects = radio.calls().into_iter().filter(|call| matches!(call, RadioCall::Connect(_))).count();
        assert_eq!(connects, 2);
    }

    #[test]
    fn events_for_other_addresses_do_not_reach_the_session() {
        let (mut coordinator, _radio, _sink) = coordinator(Some(true));
        coordinator.start_scanning();
        coordinator.on_advertisement_seen(ring("AA:BB:CC:DD:EE:FF"), -60);

        coordinator.handle_event(RadioEvent::Disconnected { address: "00:00:00:00:00:01".to_string() });
        assert_eq!(coordinator.session().map(|session| session.state()), Some(ConnectionState::Connecting));
    }

    #[test]
    fn scan_failure_and_power_loss_wait_for_the_next_power_on() {
        let (mut coordinator, radio, _sink) = coordinator(Some(true));
        coordinator.start_scanning();

        coordinator.handle_event(RadioEvent::ScanFailed { reason: "code 2".to_string() });
        assert_eq!(coordinator.scan_state(), ScanState::Requested);
        coordinator.handle_event(RadioEvent::AdapterState(HardwareState::On));
        assert_eq!(coordinator.scan_state(), ScanState::Active);

        coordinator.on_advertisement_seen(ring("AA:BB:CC:DD:EE:FF"), -60);
        coordinator.handle_event(RadioEvent::AdapterState(HardwareState::TurningOff));
        coordinator.handle_event(RadioEvent::AdapterState(HardwareState::Off));
        assert_eq!(coordinator.scan_state(), ScanState::Requested);
        assert!(coordinator.session().is_none());
        assert!(radio.calls().contains(&RadioCall::Disconnect("AA:BB:CC:DD:EE:FF".to_string())));
    }

    #[test]
    fn absent_adapter_makes_scanning_a_no_op() {
        let (mut coordinator, radio, _sink) = coordinator(None);
        coordinator.start_scanning();

        assert_eq!(coordinator.scan_state(), ScanState::Idle);
        assert_eq!(coordinator.status(), DeviceState::Unavailable);
        assert!(radio.calls().is_empty());
    }

    #[test]
    fn adapter_error_degrades_to_unavailable() {
        let (mut coordinator, radio, _sink) = coordinator(Some(true));
        coordinator.start_scanning();
        coordinator.handle_event(RadioEvent::AdapterState(HardwareState::Error));
        radio.clear();

        assert_eq!(coordinator.status(), DeviceState::Unavailable);
        coordinator.stop_scanning();
        coordinator.start_scanning();
        assert_eq!(radio.calls(), vec![RadioCall::StopScan]);
    }

    #[test]
    fn shutdown_closes_the_session() {
        let (mut coordinator, radio, _sink) = coordinator(Some(true));
        coordinator.start_scanning();
        coordinator.on_advertisement_seen(ring("AA:BB:CC:DD:EE:FF"), -60);

        coordinator.shutdown();
        assert!(coordinator.session().is_none());
        assert_eq!(coordinator.scan_state(), ScanState::Idle);
        assert!(radio.calls().contains(&RadioCall::Disconnect("AA:BB:CC:DD:EE:FF".to_string())));
    }
}
