use std::collections::HashMap;
use std::future::Future;
use std::sync::{Arc, Mutex, MutexGuard};
use btleplug::api::{Central, CentralEvent, CentralState, Manager as _, Peripheral as _, ScanFilter};
use btleplug::platform::{Adapter, Manager, Peripheral, PeripheralId};
use futures::channel::mpsc::{channel, Receiver, Sender};
use futures::{SinkExt, Stream, StreamExt};
use log::{debug, info, warn};
use tokio::runtime::Handle;
use tokio::task::JoinHandle;
use tokio::time::{sleep, timeout, Duration};
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

use crate::config::types::Config;
use crate::device::constants::{EVENT_QUEUE_DEPTH, SHUTDOWN_DELAY};
use crate::device::radio::Radio;
use crate::device::scanner::ScanCoordinator;
use crate::device::types::{DeviceState, GattPair, HardwareState, PeripheralIdentity, RadioEvent};
use crate::error::DeviceError;
use crate::storage::sink::TelemetrySink;

#[derive(Default)]
struct BtleRadioInner {
    peripherals: HashMap<String, Peripheral>,
    notification_tasks: HashMap<String, CancellationToken>,
}

/// [`Radio`] backed by the first btleplug adapter of the host.
///
/// Each request is spawned as a task; its outcome is sent to the receiver returned by
/// [`BtleRadio::new`].
pub struct BtleRadio {
    adapter: Option<Adapter>,
    powered: Option<bool>,
    events: Sender<RadioEvent>,
    inner: Arc<Mutex<BtleRadioInner>>,
    connect_timeout: Duration,
    runtime: Handle,
    cancel: CancellationToken,
}

impl BtleRadio {
    pub async fn new(config: &Config, cancel: CancellationToken) -> Result<(BtleRadio, Receiver<RadioEvent>), DeviceError> {
        let manager = Manager::new().await?;
        let adapter = manager.adapters().await?.into_iter().next();
        let (sender, receiver) = channel::<RadioEvent>(EVENT_QUEUE_DEPTH);

        let powered = match &adapter {
            None => {
                warn!("No bluetooth adapter found");
                None
            },
            Some(adapter) => {
                info!("Using adapter {}", adapter.adapter_info().await.unwrap_or("UNKNOWN".to_string()));
                match adapter.adapter_state().await {
                    Ok(CentralState::PoweredOn) => Some(true),
                    Ok(state) => {
                        info!("Adapter state is {:?}", state);
                        Some(false)
                    },
                    Err(err) => {
                        warn!("Could not query adapter state: {}", err);
                        Some(false)
                    },
                }
            },
        };

        let radio = BtleRadio {
            adapter,
            powered,
            events: sender,
            inner: Arc::new(Mutex::new(BtleRadioInner::default())),
            connect_timeout: config.connect_timeout(),
            runtime: Handle::current(),
            cancel,
        };

        if let Some(adapter) = &radio.adapter {
            let central_events = adapter.events().await?;
            central_events_task(
                radio.cancel.child_token(),
                adapter.clone(),
                config.device_name_prefix.clone(),
                central_events,
                radio.inner.clone(),
                radio.events.clone(),
            );
        }

        Ok((radio, receiver))
    }

    fn lock(&self) -> MutexGuard<'_, BtleRadioInner> {
        lock_inner(&self.inner)
    }

    fn adapter(&self) -> Result<Adapter, DeviceError> {
        self.adapter.clone().ok_or(DeviceError::NoAdapter)
    }

    fn peripheral(&self, address: &str) -> Result<Peripheral, DeviceError> {
        self.lock()
            .peripherals
            .get(address)
            .cloned()
            .ok_or_else(|| DeviceError::UnknownPeripheral(address.to_string()))
    }

    /// Runs `request` in the background and forwards the event it yields, if any.
    fn send_later<F>(&self, request: F)
    where
        F: Future<Output = Option<RadioEvent>> + Send + 'static,
    {
        let mut sender = self.events.clone();
        self.runtime.spawn(async move {
            if let Some(event) = request.await {
                if sender.send(event).await.is_err() {
                    debug!("Event loop has stopped; dropping radio event");
                }
            }
        });
    }
}

fn lock_inner(inner: &Mutex<BtleRadioInner>) -> MutexGuard<'_, BtleRadioInner> {
    inner.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

async fn advertisement(
    adapter: &Adapter,
    id: &PeripheralId,
    name_prefix: &str,
    inner: &Mutex<BtleRadioInner>,
) -> Option<RadioEvent> {
    let peripheral = match adapter.peripheral(id).await {
        Ok(peripheral) => peripheral,
        Err(err) => {
            warn!("Failed to look up peripheral {}: {}", id, err);
            return None;
        },
    };

    let properties = match peripheral.properties().await {
        Ok(Some(properties)) => properties,
        Ok(None) => {
            debug!("Peripheral {} has no properties", id);
            return None;
        },
        Err(err) => {
            warn!("Could not query peripheral for properties: {:?}", err);
            return None;
        },
    };

    let identity = PeripheralIdentity::new(id.to_string(), properties.local_name.unwrap_or_default());
    // only rings can be connected to, everything else is just logged
    if identity.matches_prefix(name_prefix) {
        lock_inner(inner).peripherals.insert(identity.address.clone(), peripheral);
    }

    Some(RadioEvent::Advertisement {
        identity,
        rssi: properties.rssi.unwrap_or(0),
    })
}

fn central_events_task<S>(
    cancel: CancellationToken,
    adapter: Adapter,
    name_prefix: String,
    mut central_events: S,
    inner: Arc<Mutex<BtleRadioInner>>,
    mut sender: Sender<RadioEvent>,
) -> JoinHandle<()>
where
    S: Stream<Item = CentralEvent> + Send + Unpin + 'static,
{
    tokio::spawn(async move {
        'mainloop: loop {
            let central_event = tokio::select! {
                _ = cancel.cancelled() => break 'mainloop,
                central_event = central_events.next() => match central_event {
                    Some(central_event) => central_event,
                    None => break 'mainloop,
                },
            };

            // btleplug only reports settled states, the transition is reported as well so the
            // arbiter can tell who asked for it
            let events: Vec<RadioEvent> = match central_event {
                CentralEvent::DeviceDiscovered(id) | CentralEvent::DeviceUpdated(id) => {
                    advertisement(&adapter, &id, &name_prefix, &inner).await.into_iter().collect()
                },
                CentralEvent::DeviceDisconnected(id) => vec![RadioEvent::Disconnected { address: id.to_string() }],
                CentralEvent::StateUpdate(CentralState::PoweredOn) => vec![
                    RadioEvent::AdapterState(HardwareState::TurningOn),
                    RadioEvent::AdapterState(HardwareState::On),
                ],
                CentralEvent::StateUpdate(CentralState::PoweredOff) => vec![
                    RadioEvent::AdapterState(HardwareState::TurningOff),
                    RadioEvent::AdapterState(HardwareState::Off),
                ],
                _ => vec![],
            };

            for event in events {
                if sender.send(event).await.is_err() {
                    break 'mainloop;
                }
            }
        }

        debug!("Adapter event task stopped");
    })
}

impl Radio for BtleRadio {
    fn power_state(&self) -> Option<bool> {
        self.powered
    }

    fn request_power(&self, _on: bool) -> Result<(), DeviceError> {
        Err(DeviceError::PowerControlUnsupported)
    }

    fn start_scan(&self) -> Result<(), DeviceError> {
        let adapter = self.adapter()?;
        self.send_later(async move {
            match adapter.start_scan(ScanFilter::default()).await {
                Ok(()) => None,
                Err(err) => Some(RadioEvent::ScanFailed { reason: err.to_string() }),
            }
        });
        Ok(())
    }

    fn stop_scan(&self) -> Result<(), DeviceError> {
        let adapter = self.adapter()?;
        self.send_later(async move {
            if let Err(err) = adapter.stop_scan().await {
                warn!("Stopping the scan failed: {}", err);
            }
            None
        });
        Ok(())
    }

    fn connect(&self, address: &str) -> Result<(), DeviceError> {
        let peripheral = self.peripheral(address)?;
        let address = address.to_string();
        let deadline = self.connect_timeout;

        self.send_later(async move {
            let reason = match timeout(deadline, peripheral.connect()).await {
                Ok(Ok(())) => return Some(RadioEvent::Connected { address }),
                Ok(Err(err)) => err.to_string(),
                Err(_) => DeviceError::ConnectTimeout(deadline.as_millis() as u64).to_string(),
            };
            Some(RadioEvent::ConnectFailed { address, reason })
        });
        Ok(())
    }

    fn discover_services(&self, address: &str) -> Result<(), DeviceError> {
        let peripheral = self.peripheral(address)?;
        let address = address.to_string();

        self.send_later(async move {
            let result = match peripheral.discover_services().await {
                Ok(()) => Ok(peripheral
                    .services()
                    .into_iter()
                    .flat_map(|service| {
                        service.characteristics.into_iter().map(move |characteristic| GattPair {
                            service: service.uuid,
                            characteristic: characteristic.uuid,
                        })
                    })
                    .collect()),
                Err(err) => Err(err.to_string()),
            };
            Some(RadioEvent::ServicesDiscovered { address, result })
        });
        Ok(())
    }

    fn subscribe(&self, address: &str, characteristic: Uuid) -> Result<(), DeviceError> {
        let peripheral = self.peripheral(address)?;
        let target = peripheral
            .characteristics()
            .into_iter()
            .find(|candidate| candidate.uuid == characteristic)
            .ok_or(DeviceError::MissingCharacteristic)?;

        let cancel = self.cancel.child_token();
        if let Some(previous) = self.lock().notification_tasks.insert(address.to_string(), cancel.clone()) {
            previous.cancel();
        }

        let address = address.to_string();
        let mut sender = self.events.clone();
        self.runtime.spawn(async move {
            // open the stream first so no notification after the descriptor write is missed
            let notifications = peripheral.notifications().await;
            let subscribed = match notifications {
                Ok(_) => peripheral.subscribe(&target).await.map_err(|err| err.to_string()),
                Err(ref err) => Err(err.to_string()),
            };

            if let Err(reason) = &subscribed {
                warn!("Enabling notifications on {} failed: {}", address, reason);
            }
            let written = RadioEvent::DescriptorWritten {
                address: address.clone(),
                characteristic,
                success: subscribed.is_ok(),
            };
            if sender.send(written).await.is_err() {
                return;
            }

            let mut notifications = match (subscribed, notifications) {
                (Ok(()), Ok(notifications)) => notifications,
                _ => return,
            };

            'mainloop: loop {
                tokio::select! {
                    _ = cancel.cancelled() => {
                        break 'mainloop;
                    },
                    notification = notifications.next() => match notification {
                        Some(notification) => {
                            let event = RadioEvent::Notification {
                                address: address.clone(),
                                characteristic: notification.uuid,
                                value: notification.value,
                            };
                            if sender.send(event).await.is_err() {
                                break 'mainloop;
                            }
                        },
                        None => break 'mainloop,
                    },
                }
            }

            debug!("Notification task for {} stopped", address);
        });
        Ok(())
    }

    fn unsubscribe(&self, address: &str, characteristic: Uuid) -> Result<(), DeviceError> {
        let peripheral = self.peripheral(address)?;
        let target = peripheral
            .characteristics()
            .into_iter()
            .find(|candidate| candidate.uuid == characteristic)
            .ok_or(DeviceError::MissingCharacteristic)?;

        self.send_later(async move {
            if let Err(err) = peripheral.unsubscribe(&target).await {
                warn!("Disabling notifications failed: {}", err);
            }
            None
        });
        Ok(())
    }

    fn disconnect(&self, address: &str) -> Result<(), DeviceError> {
        if let Some(cancel) = self.lock().notification_tasks.remove(address) {
            cancel.cancel();
        }

        let peripheral = match self.lock().peripherals.get(address).cloned() {
            Some(peripheral) => peripheral,
            None => return Ok(()),
        };

        self.send_later(async move {
            if let Err(err) = peripheral.disconnect().await {
                warn!("Disconnecting failed: {}", err);
            }
            None
        });
        Ok(())
    }
}

/// Feeds radio events into the coordinator one at a time until cancelled.
pub async fn run_event_loop<S>(cancel: CancellationToken, mut events: S, coordinator: &mut ScanCoordinator)
where
    S: Stream<Item = RadioEvent> + Unpin,
{
    let mut previous_device_state: Option<DeviceState> = None;
    coordinator.start_scanning();

    'mainloop: loop {
        let device_state = coordinator.status();
        if previous_device_state != Some(device_state) {
            info!("Collector state: {:?}", device_state);
            previous_device_state = Some(device_state);
        }

        tokio::select! {
            _ = cancel.cancelled() => {
                break 'mainloop;
            },
            event = events.next() => match event {
                Some(event) => coordinator.handle_event(event),
                None => {
                    warn!("Radio event stream ended");
                    break 'mainloop;
                },
            },
        }
    }

    info!("Shutting down");
    coordinator.shutdown();
}

/// Collects telemetry from the ring through the host adapter until `cancel` fires.
pub async fn connect_device(config: &Config, sink: Box<dyn TelemetrySink>, cancel: CancellationToken) -> Result<(), DeviceError> {
    let (radio, events) = BtleRadio::new(config, cancel.child_token()).await?;
    let radio = Arc::new(radio);
    let mut coordinator = ScanCoordinator::new(radio.clone(), sink, config);

    run_event_loop(cancel.clone(), events, &mut coordinator).await;

    // let the spawned stop/disconnect requests reach the adapter before the runtime goes away
    sleep(Duration::from_millis(SHUTDOWN_DELAY)).await;
    radio.cancel.cancel();
    Ok(())
}
