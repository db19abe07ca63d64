//! BLE Connection Module
//!
//! Per-address link bookkeeping and command characteristic lookup.

use crate::domain::models::{Address, ConnectionState, DeviceStatus};
use crate::infrastructure::bluetooth::protocol;
use crate::infrastructure::bluetooth::radio::{CharacteristicProperties, GattService, LinkId};
use std::collections::{BTreeMap, HashMap};
use tracing::{debug, info};
use uuid::Uuid;

/// A link owned by the connection manager
#[derive(Debug, Clone)]
pub struct ActiveConnection {
    pub link: LinkId,
    pub address: Address,
    pub state: ConnectionState,
    /// Writable command characteristic, once discovery found one
    pub command_char: Option<Uuid>,
    /// Advertised name from this session's scan, or the name the OS reported
    /// for an adopted link. Stored as the known-device name once bound.
    pub name_hint: Option<String>,
}

impl ActiveConnection {
    pub fn status(&self) -> DeviceStatus {
        DeviceStatus {
            state: self.state,
            command_bound: self.command_char.is_some(),
        }
    }
}

/// Pick the characteristic that accepts color frames.
///
/// Services are tried in [`protocol::KNOWN_SERVICE_UUIDS`] order. Inside the
/// first one present, the command UUID is preferred; otherwise the first
/// characteristic writable without response is used.
pub fn select_command_characteristic(services: &[GattService]) -> Option<Uuid> {
    let service = protocol::KNOWN_SERVICE_UUIDS
        .iter()
        .find_map(|uuid| services.iter().find(|s| &s.uuid == uuid))?;

    debug!("Using service {}", service.uuid);

    if let Some(c) = service
        .characteristics
        .iter()
        .find(|c| c.uuid == protocol::COMMAND_CHAR_UUID)
    {
        return Some(c.uuid);
    }

    service
        .characteristics
        .iter()
        .find(|c| {
            c.properties
                .contains(CharacteristicProperties::WRITE_WITHOUT_RESPONSE)
        })
        .map(|c| c.uuid)
}

#[derive(Debug, Default)]
pub struct ConnectionTable {
    by_address: HashMap<Address, ActiveConnection>,
    next_link: u64,
}

impl ConnectionTable {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn next_link_id(&mut self) -> LinkId {
        self.next_link += 1;
        LinkId(self.next_link)
    }

    /// Register a fresh attempt, returning whatever link it replaces
    pub fn insert(&mut self, connection: ActiveConnection) -> Option<ActiveConnection> {
        info!(
            "Tracking {} for {} ({:?})",
            connection.link, connection.address, connection.state
        );
        self.by_address
            .insert(connection.address.clone(), connection)
    }

    pub fn get(&self, address: &Address) -> Option<&ActiveConnection> {
        self.by_address.get(address)
    }

    pub fn by_link_mut(&mut self, link: LinkId) -> Option<&mut ActiveConnection> {
        self.by_address.values_mut().find(|c| c.link == link)
    }

    pub fn remove_link(&mut self, link: LinkId) -> Option<ActiveConnection> {
        let address = self
            .by_address
            .values()
            .find(|c| c.link == link)
            .map(|c| c.address.clone())?;
        self.by_address.remove(&address)
    }

    pub fn drain(&mut self) -> Vec<ActiveConnection> {
        self.by_address.drain().map(|(_, c)| c).collect()
    }

    /// Links with a usable command characteristic
    pub fn bound(&self) -> impl Iterator<Item = (LinkId, Uuid)> + '_ {
        self.by_address
            .values()
            .filter(|c| c.state == ConnectionState::Connected)
            .filter_map(|c| c.command_char.map(|uuid| (c.link, uuid)))
    }

    pub fn has_bound(&self) -> bool {
        self.bound().next().is_some()
    }

    pub fn statuses(&self) -> BTreeMap<Address, DeviceStatus> {
        self.by_address
            .iter()
            .map(|(address, c)| (address.clone(), c.status()))
            .collect()
    }

    /// Connected if any link is, else Connecting if any is, else Disconnected
    pub fn aggregate_state(&self) -> ConnectionState {
        let states = self.by_address.values().map(|c| c.state);
        let mut result = ConnectionState::Disconnected;
        for state in states {
            match state {
                ConnectionState::Connected => return ConnectionState::Connected,
                ConnectionState::Connecting => result = ConnectionState::Connecting,
                ConnectionState::Disconnected => {}
            }
        }
        result
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::infrastructure::bluetooth::radio::GattCharacteristic;

    fn characteristic(short: u16, properties: CharacteristicProperties) -> GattCharacteristic {
        GattCharacteristic {
            uuid: Uuid::from_u128(((short as u128) << 96) | 0x0000_1000_8000_00805f9b34fb),
            properties,
        }
    }

    fn service(uuid: Uuid, characteristics: Vec<GattCharacteristic>) -> GattService {
        GattService {
            uuid,
            characteristics,
        }
    }

    #[test]
    fn test_prefers_command_uuid() {
        let services = vec![service(
            protocol::SERVICE_UUID,
            vec![
                characteristic(0xfff1, CharacteristicProperties::WRITE_WITHOUT_RESPONSE),
                characteristic(0xfff3, CharacteristicProperties::WRITE),
            ],
        )];
        assert_eq!(
            select_command_characteristic(&services),
            Some(protocol::COMMAND_CHAR_UUID)
        );
    }

    #[test]
    fn test_falls_back_to_write_without_response() {
        let services = vec![service(
            protocol::SERVICE_UUID_ALT_1,
            vec![
                characteristic(0xffe2, CharacteristicProperties::NOTIFY),
                characteristic(
                    0xffe1,
                    CharacteristicProperties::READ | CharacteristicProperties::WRITE_WITHOUT_RESPONSE,
                ),
            ],
        )];
        let chosen = select_command_characteristic(&services).unwrap();
        assert_eq!(chosen.to_string(), "0000ffe1-0000-1000-8000-00805f9b34fb");
    }

    #[test]
    fn test_unknown_services_yield_nothing() {
        let battery = Uuid::from_u128(0x0000180f_0000_1000_8000_00805f9b34fb);
        let services = vec![service(
            battery,
            vec![characteristic(0x2a19, CharacteristicProperties::WRITE_WITHOUT_RESPONSE)],
        )];
        assert_eq!(select_command_characteristic(&services), None);
    }

    #[test]
    fn test_service_without_writable_characteristic() {
        let services = vec![service(
            protocol::SERVICE_UUID,
            vec![characteristic(0xfff4, CharacteristicProperties::NOTIFY)],
        )];
        assert_eq!(select_command_characteristic(&services), None);
    }

    #[test]
    fn test_aggregate_state() {
        let mut table = ConnectionTable::new();
        assert_eq!(table.aggregate_state(), ConnectionState::Disconnected);

        let first = table.next_link_id();
        table.insert(ActiveConnection {
            link: first,
            address: Address::new("AA:AA:AA:AA:AA:AA"),
            state: ConnectionState::Connecting,
            command_char: None,
            name_hint: None,
        });
        assert_eq!(table.aggregate_state(), ConnectionState::Connecting);

        let second = table.next_link_id();
        assert_ne!(first, second);
        table.insert(ActiveConnection {
            link: second,
            address: Address::new("BB:BB:BB:BB:BB:BB"),
            state: ConnectionState::Connected,
            command_char: Some(protocol::COMMAND_CHAR_UUID),
            name_hint: None,
        });
        assert_eq!(table.aggregate_state(), ConnectionState::Connected);
        assert_eq!(table.bound().count(), 1);

        assert!(table.remove_link(second).is_some());
        assert!(!table.has_bound());
    }
}
