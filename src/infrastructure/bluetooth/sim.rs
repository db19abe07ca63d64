//! In-process radio
//!
//! Stands in for a host BLE stack: peripherals are registered up front, link
//! callbacks are delivered on the event channel immediately, and every write
//! and connect attempt is recorded for inspection.

use crate::domain::models::{Address, PeripheralIdentity};
use crate::infrastructure::bluetooth::protocol;
use crate::infrastructure::bluetooth::radio::{
    Advertisement, CharacteristicProperties, GattCharacteristic, GattService, LinkId, Radio,
    RadioError, RadioEvent,
};
use std::collections::HashMap;
use std::future::Future;
use std::sync::{Mutex, MutexGuard, PoisonError};
use std::time::Duration;
use tokio::sync::mpsc;
use tracing::{debug, trace};
use uuid::Uuid;

/// ATT "Write Not Permitted"
const GATT_WRITE_NOT_PERMITTED: i32 = 0x03;

#[derive(Debug, Clone)]
pub struct SimPeripheral {
    pub name: Option<String>,
    pub advertised_services: Vec<Uuid>,
    pub services: Vec<GattService>,
    pub rssi: i16,
    /// Accepts link attempts; otherwise they fail straight away
    pub reachable: bool,
    /// Reports the link as up; otherwise the attempt stays pending
    pub answers_connect: bool,
    /// Completes service discovery; otherwise discovery hangs forever
    pub answers_discovery: bool,
    /// Rejects every write on an open link
    pub rejects_writes: bool,
}

impl SimPeripheral {
    /// A typical strip controller exposing FFF0 / FFF3
    pub fn led_controller(name: &str) -> Self {
        Self {
            name: Some(name.to_string()),
            advertised_services: vec![protocol::SERVICE_UUID],
            services: vec![GattService {
                uuid: protocol::SERVICE_UUID,
                characteristics: vec![GattCharacteristic {
                    uuid: protocol::COMMAND_CHAR_UUID,
                    properties: CharacteristicProperties::WRITE
                        | CharacteristicProperties::WRITE_WITHOUT_RESPONSE,
                }],
            }],
            rssi: -55,
            reachable: true,
            answers_connect: true,
            answers_discovery: true,
            rejects_writes: false,
        }
    }

    pub fn with_services(mut self, services: Vec<GattService>) -> Self {
        self.services = services;
        self
    }

    pub fn unreachable(mut self) -> Self {
        self.reachable = false;
        self
    }

    pub fn hanging_connect(mut self) -> Self {
        self.answers_connect = false;
        self
    }

    pub fn silent_discovery(mut self) -> Self {
        self.answers_discovery = false;
        self
    }

    pub fn failing_writes(mut self) -> Self {
        self.rejects_writes = true;
        self
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WriteRecord {
    pub link: LinkId,
    pub address: Address,
    pub characteristic: Uuid,
    pub payload: Vec<u8>,
}

#[derive(Default)]
struct SimState {
    peripherals: HashMap<Address, SimPeripheral>,
    links: HashMap<LinkId, Address>,
    writes: Vec<WriteRecord>,
    write_attempts: usize,
    connect_calls: Vec<Address>,
    scanning: bool,
    scan_starts: usize,
    fail_scan_start: bool,
    system_connected: Vec<Address>,
    system_query_denied: bool,
    system_query_delay: Option<Duration>,
}

pub struct SimRadio {
    events: mpsc::UnboundedSender<RadioEvent>,
    state: Mutex<SimState>,
}

impl SimRadio {
    pub fn new(events: mpsc::UnboundedSender<RadioEvent>) -> Self {
        Self {
            events,
            state: Mutex::new(SimState::default()),
        }
    }

    fn state(&self) -> MutexGuard<'_, SimState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn emit(&self, event: RadioEvent) {
        trace!("sim radio -> {:?}", event);
        let _ = self.events.send(event);
    }

    pub fn add_peripheral(&self, address: Address, peripheral: SimPeripheral) {
        self.state().peripherals.insert(address, peripheral);
    }

    /// Broadcast one advertisement for a registered peripheral.
    /// Returns false when no scan is running or the address is unknown.
    pub fn advertise(&self, address: &Address) -> bool {
        let adv = {
            let state = self.state();
            if !state.scanning {
                return false;
            }
            match state.peripherals.get(address) {
                Some(p) => Advertisement {
                    address: address.clone(),
                    name: p.name.clone(),
                    service_uuids: p.advertised_services.clone(),
                    rssi: p.rssi,
                },
                None => return false,
            }
        };
        self.emit(RadioEvent::Advertisement(adv));
        true
    }

    /// Radio-loss style disconnect of every open link to an address
    pub fn drop_links_to(&self, address: &Address) {
        let links: Vec<LinkId> = self
            .state()
            .links
            .iter()
            .filter(|(_, a)| *a == address)
            .map(|(l, _)| *l)
            .collect();
        for link in links {
            self.emit(RadioEvent::Disconnected { link });
        }
    }

    /// Deliver an arbitrary event, e.g. a late callback from a stale link
    pub fn inject(&self, event: RadioEvent) {
        self.emit(event);
    }

    pub fn set_system_connected(&self, addresses: Vec<Address>) {
        self.state().system_connected = addresses;
    }

    pub fn deny_system_query(&self, denied: bool) {
        self.state().system_query_denied = denied;
    }

    /// Make the system connected-devices query take this long to answer
    pub fn delay_system_query(&self, delay: Duration) {
        self.state().system_query_delay = Some(delay);
    }

    pub fn fail_scan_start(&self, fail: bool) {
        self.state().fail_scan_start = fail;
    }

    pub fn writes(&self) -> Vec<WriteRecord> {
        self.state().writes.clone()
    }

    /// Every write issued, accepted or not
    pub fn write_attempts(&self) -> usize {
        self.state().write_attempts
    }

    pub fn connect_calls(&self) -> Vec<Address> {
        self.state().connect_calls.clone()
    }

    pub fn open_links(&self) -> usize {
        self.state().links.len()
    }

    pub fn is_scanning(&self) -> bool {
        self.state().scanning
    }

    pub fn scan_starts(&self) -> usize {
        self.state().scan_starts
    }
}

impl Radio for SimRadio {
    fn start_scan(&self) -> Result<(), RadioError> {
        let mut state = self.state();
        if state.fail_scan_start {
            return Err(RadioError::Platform("scan start rejected".to_string()));
        }
        state.scanning = true;
        state.scan_starts += 1;
        Ok(())
    }

    fn stop_scan(&self) -> Result<(), RadioError> {
        self.state().scanning = false;
        Ok(())
    }

    fn connect(&self, link: LinkId, address: &Address) -> Result<(), RadioError> {
        let (reachable, answers) = {
            let mut state = self.state();
            state.connect_calls.push(address.clone());
            let (reachable, answers) = state
                .peripherals
                .get(address)
                .map_or((false, false), |p| (p.reachable, p.answers_connect));
            if reachable {
                state.links.insert(link, address.clone());
            }
            (reachable, answers)
        };

        debug!("sim connect {} to {} (reachable: {})", link, address, reachable);
        match (reachable, answers) {
            (true, true) => self.emit(RadioEvent::Connected { link }),
            (true, false) => {}
            (false, _) => self.emit(RadioEvent::Disconnected { link }),
        }
        Ok(())
    }

    fn discover_services(&self, link: LinkId) -> Result<(), RadioError> {
        let services = {
            let state = self.state();
            let address = state.links.get(&link).ok_or(RadioError::UnknownLink(link))?;
            state
                .peripherals
                .get(address)
                .filter(|p| p.answers_discovery)
                .map(|p| p.services.clone())
        };

        if let Some(services) = services {
            self.emit(RadioEvent::ServicesDiscovered {
                link,
                result: Ok(services),
            });
        }
        Ok(())
    }

    fn write_without_response(
        &self,
        link: LinkId,
        characteristic: Uuid,
        payload: &[u8],
    ) -> Result<(), RadioError> {
        let mut state = self.state();
        let address = state
            .links
            .get(&link)
            .cloned()
            .ok_or(RadioError::UnknownLink(link))?;
        state.write_attempts += 1;
        if state.peripherals.get(&address).is_some_and(|p| p.rejects_writes) {
            return Err(RadioError::GattStatus(GATT_WRITE_NOT_PERMITTED));
        }
        state.writes.push(WriteRecord {
            link,
            address,
            characteristic,
            payload: payload.to_vec(),
        });
        Ok(())
    }

    fn disconnect(&self, link: LinkId) -> Result<(), RadioError> {
        if !self.state().links.contains_key(&link) {
            return Err(RadioError::UnknownLink(link));
        }
        self.emit(RadioEvent::Disconnected { link });
        Ok(())
    }

    fn close(&self, link: LinkId) {
        self.state().links.remove(&link);
    }

    fn system_connected_devices(
        &self,
    ) -> impl Future<Output = Result<Vec<PeripheralIdentity>, RadioError>> + Send {
        let (result, delay) = {
            let state = self.state();
            let delay = state.system_query_delay;
            let result = if state.system_query_denied {
                Err(RadioError::PermissionDenied(
                    "connected device query".to_string(),
                ))
            } else {
                Ok(state
                    .system_connected
                    .iter()
                    .map(|address| PeripheralIdentity {
                        address: address.clone(),
                        name: state.peripherals.get(address).and_then(|p| p.name.clone()),
                    })
                    .collect())
            };
            (result, delay)
        };
        async move {
            if let Some(delay) = delay {
                tokio::time::sleep(delay).await;
            }
            result
        }
    }
}
