use std::sync::Arc;
use std::time::SystemTime;
use log::{debug, error, info, warn};

use crate::device::radio::Radio;
use crate::device::types::HardwareState;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PowerCommand {
    PowerOn,
    PowerOff,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PowerInput {
    AppWant(bool),
    EnvironmentChanged(bool),
    Hardware(HardwareState),
}

/// Who wants the adapter powered, and what the hardware last reported.
///
/// `pending` is the last command issued that the hardware has not confirmed yet.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PowerIntent {
    pub wanted_by_app: bool,
    pub wanted_by_environment: bool,
    pub hardware_on: bool,
    pub pending: Option<PowerCommand>,
}

impl PowerIntent {
    /// Whatever state the adapter is in at startup is what the environment wants.
    pub fn new(hardware_on: bool) -> Self {
        PowerIntent {
            wanted_by_app: false,
            wanted_by_environment: hardware_on,
            hardware_on,
            pending: None,
        }
    }

    /// Where the adapter is heading once the pending command completes.
    fn heading_on(&self) -> bool {
        match self.pending {
            Some(PowerCommand::PowerOn) => true,
            Some(PowerCommand::PowerOff) => false,
            None => self.hardware_on,
        }
    }

    /// Never yields `PowerOff` while the environment wants the adapter on, nor `PowerOn` while
    /// the app does not want it.
    pub fn transition(self, input: PowerInput) -> (PowerIntent, Option<PowerCommand>) {
        let mut next = self;

        let command = match input {
            PowerInput::AppWant(true) => {
                next.wanted_by_app = true;
                if next.heading_on() { None } else { Some(PowerCommand::PowerOn) }
            },
            PowerInput::AppWant(false) => {
                next.wanted_by_app = false;
                if !next.wanted_by_environment && next.heading_on() { Some(PowerCommand::PowerOff) } else { None }
            },
            PowerInput::EnvironmentChanged(on) => {
                next.wanted_by_environment = on;
                if !on && !next.wanted_by_app && next.heading_on() { Some(PowerCommand::PowerOff) } else { None }
            },
            PowerInput::Hardware(HardwareState::TurningOn) => {
                // no request of ours is in flight, so somebody else asked for it
                if next.pending != Some(PowerCommand::PowerOn) {
                    next.wanted_by_environment = true;
                }
                None
            },
            PowerInput::Hardware(HardwareState::TurningOff) => {
                // we only ever turn it off when the environment agrees
                next.wanted_by_environment = false;
                None
            },
            PowerInput::Hardware(HardwareState::On) => {
                next.hardware_on = true;
                if next.pending == Some(PowerCommand::PowerOn) {
                    next.pending = None;
                }
                None
            },
            PowerInput::Hardware(HardwareState::Off) => {
                next.hardware_on = false;
                if next.pending == Some(PowerCommand::PowerOff) {
                    next.pending = None;
                }
                None
            },
            PowerInput::Hardware(HardwareState::Error) => None,
        };

        if command.is_some() {
            next.pending = command;
        }

        (next, command)
    }
}

/// The only component allowed to request adapter power changes.
pub struct RadioPowerArbiter {
    intent: PowerIntent,
    hardware_absent: bool,
    radio: Arc<dyn Radio>,
    last_power_on_request: Option<SystemTime>,
    last_power_off_request: Option<SystemTime>,
}

impl RadioPowerArbiter {
    pub fn new(radio: Arc<dyn Radio>) -> Self {
        let power = radio.power_state();
        if power.is_none() {
            warn!("No bluetooth adapter available; radio requests will be ignored");
        }

        RadioPowerArbiter {
            intent: PowerIntent::new(power.unwrap_or(false)),
            hardware_absent: power.is_none(),
            radio,
            last_power_on_request: None,
            last_power_off_request: None,
        }
    }

    pub fn intent(&self) -> PowerIntent {
        self.intent
    }

    pub fn is_available(&self) -> bool {
        !self.hardware_absent
    }

    pub fn is_radio_on(&self) -> bool {
        !self.hardware_absent && self.intent.hardware_on
    }

    pub fn last_power_on_request(&self) -> Option<SystemTime> {
        self.last_power_on_request
    }

    pub fn last_power_off_request(&self) -> Option<SystemTime> {
        self.last_power_off_request
    }

    pub fn set_app_want(&mut self, on: bool) {
        self.apply(PowerInput::AppWant(on));
    }

    pub fn notify_environment_changed(&mut self, on: bool) {
        self.apply(PowerInput::EnvironmentChanged(on));
    }

    /// Returns true when the adapter has just reported that it is powered on.
    pub fn notify_hardware_state(&mut self, state: HardwareState) -> bool {
        if self.hardware_absent {
            debug!("Ignoring adapter state {:?}, adapter unavailable", state);
            return false;
        }

        if state == HardwareState::Error {
            error!("Bluetooth adapter reported an error; treating it as absent from now on");
            self.hardware_absent = true;
            return false;
        }

        self.apply(PowerInput::Hardware(state));
        state == HardwareState::On
    }

    fn apply(&mut self, input: PowerInput) {
        if self.hardware_absent {
            debug!("Ignoring {:?}, adapter unavailable", input);
            return;
        }

        let (next, command) = self.intent.transition(input);
        debug!("Power {:?}: {:?} -> {:?}", input, self.intent, next);
        self.intent = next;

        if let Some(command) = command {
            self.issue(command);
        }
    }

    fn issue(&mut self, command: PowerCommand) {
        let on = command == PowerCommand::PowerOn;
        info!("Requesting adapter power {}", if on { "on" } else { "off" });

        if on {
            self.last_power_on_request = Some(SystemTime::now());
        } else {
            self.last_power_off_request = Some(SystemTime::now());
        }

        if let Err(err) = self.radio.request_power(on) {
            warn!("Adapter power request failed: {}", err);
            // nothing is in flight, so the next want may retry
            self.intent.pending = None;
        }
    }
}
