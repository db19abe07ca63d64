//! Known-Device Store
//!
//! Previously connected controllers plus the last connection target. Every
//! mutation rewrites the full list in the backing store before returning.

use crate::domain::models::{Address, KnownDevice};
use crate::infrastructure::storage::{KeyValueStore, StoreError};
use std::sync::Arc;
use tracing::{debug, error, warn};

const KNOWN_DEVICES_KEY: &str = "known_devices_list";
const LAST_TARGET_KEY: &str = "last_device_address";

pub struct KnownDeviceStore {
    backend: Arc<dyn KeyValueStore>,
    devices: Vec<KnownDevice>,
    last_target: Option<Address>,
}

impl KnownDeviceStore {
    pub fn load(backend: Arc<dyn KeyValueStore>) -> Self {
        let devices = match backend.get(KNOWN_DEVICES_KEY) {
            Some(json) => serde_json::from_str::<Vec<KnownDevice>>(&json).unwrap_or_else(|e| {
                warn!("Discarding unreadable known device list: {}", e);
                Vec::new()
            }),
            None => Vec::new(),
        };
        let last_target = backend
            .get(LAST_TARGET_KEY)
            .filter(|raw| !raw.trim().is_empty())
            .map(Address::new);

        debug!(
            "Loaded {} known devices, last target {:?}",
            devices.len(),
            last_target
        );

        Self {
            backend,
            devices,
            last_target,
        }
    }

    /// Insert or rename. Returns whether anything changed.
    pub fn add(&mut self, device: KnownDevice) -> bool {
        match self.devices.iter_mut().find(|d| d.address == device.address) {
            Some(existing) if existing.name == device.name => return false,
            Some(existing) => existing.name = device.name,
            None => self.devices.push(device),
        }
        self.persist();
        true
    }

    pub fn remove(&mut self, address: &Address) -> bool {
        let before = self.devices.len();
        self.devices.retain(|d| &d.address != address);
        let removed = self.devices.len() != before;
        if removed {
            self.persist();
        }
        removed
    }

    pub fn list(&self) -> Vec<KnownDevice> {
        self.devices.clone()
    }

    pub fn contains(&self, address: &Address) -> bool {
        self.devices.iter().any(|d| &d.address == address)
    }

    pub fn name_of(&self, address: &Address) -> Option<&str> {
        self.devices
            .iter()
            .find(|d| &d.address == address)
            .map(|d| d.name.as_str())
    }

    pub fn last_target(&self) -> Option<&Address> {
        self.last_target.as_ref()
    }

    pub fn set_last_target(&mut self, address: Address) {
        if self.last_target.as_ref() == Some(&address) {
            return;
        }
        if let Err(e) = self.backend.put(LAST_TARGET_KEY, address.as_str()) {
            error!("Failed to persist last target {}: {}", address, e);
        }
        self.last_target = Some(address);
    }

    fn persist(&self) {
        let result = serde_json::to_string(&self.devices)
            .map_err(StoreError::from)
            .and_then(|json| self.backend.put(KNOWN_DEVICES_KEY, &json));
        if let Err(e) = result {
            error!("Failed to persist known devices: {}", e);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::infrastructure::storage::MemoryStore;

    fn device(name: &str, address: &str) -> KnownDevice {
        KnownDevice {
            name: name.to_string(),
            address: Address::new(address),
        }
    }

    #[test]
    fn test_add_same_address_keeps_one_entry_with_latest_name() {
        let backend = Arc::new(MemoryStore::new());
        let mut store = KnownDeviceStore::load(backend.clone());

        assert!(store.add(device("ELK-BLEDOM", "AA:BB:CC:DD:EE:FF")));
        assert!(store.add(device("Desk strip", "aa:bb:cc:dd:ee:ff")));
        assert!(!store.add(device("Desk strip", "AA:BB:CC:DD:EE:FF")));

        let list = store.list();
        assert_eq!(list.len(), 1);
        assert_eq!(list[0].name, "Desk strip");
    }

    #[test]
    fn test_round_trip_through_restart() {
        let backend = Arc::new(MemoryStore::new());
        {
            let mut store = KnownDeviceStore::load(backend.clone());
            store.add(device("Triones-01", "11:22:33:44:55:66"));
            store.add(device("Lotus", "66:55:44:33:22:11"));
            store.set_last_target(Address::new("11:22:33:44:55:66"));
        }

        let store = KnownDeviceStore::load(backend);
        assert_eq!(
            store.list(),
            vec![
                device("Triones-01", "11:22:33:44:55:66"),
                device("Lotus", "66:55:44:33:22:11"),
            ]
        );
        assert_eq!(
            store.last_target(),
            Some(&Address::new("11:22:33:44:55:66"))
        );
    }

    #[test]
    fn test_name_of_known_address() {
        let mut store = KnownDeviceStore::load(Arc::new(MemoryStore::new()));
        store.add(device("Lotus", "66:55:44:33:22:11"));
        assert_eq!(store.name_of(&Address::new("66:55:44:33:22:11")), Some("Lotus"));
        assert_eq!(store.name_of(&Address::new("00:00:00:00:00:00")), None);
    }

    #[test]
    fn test_remove_persists() {
        let backend = Arc::new(MemoryStore::new());
        let mut store = KnownDeviceStore::load(backend.clone());
        store.add(device("LED", "AA:AA:AA:AA:AA:AA"));

        assert!(store.remove(&Address::new("AA:AA:AA:AA:AA:AA")));
        assert!(!store.remove(&Address::new("AA:AA:AA:AA:AA:AA")));
        assert!(KnownDeviceStore::load(backend).list().is_empty());
    }

    #[test]
    fn test_corrupt_list_starts_empty() {
        let backend = Arc::new(MemoryStore::new());
        backend.put(KNOWN_DEVICES_KEY, "{oops").unwrap();
        let store = KnownDeviceStore::load(backend);
        assert!(store.list().is_empty());
        assert!(store.last_target().is_none());
    }
}
