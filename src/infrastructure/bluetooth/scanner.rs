//! BLE Scanner Module
//!
//! Decides which advertisements look like LED controllers and keeps the
//! address-deduplicated result list for the current scan session.

use crate::domain::known_devices::KnownDeviceStore;
use crate::domain::models::{Address, ScanMode, ScannedDevice};
use crate::infrastructure::bluetooth::protocol;
use crate::infrastructure::bluetooth::radio::Advertisement;
use tokio::task::JoinHandle;
use tracing::debug;

/// Inclusion predicate for discovery results
pub struct ScanFilter<'a> {
    pub target: Option<&'a Address>,
    pub known_devices: &'a KnownDeviceStore,
}

impl ScanFilter<'_> {
    pub fn matches(&self, adv: &Advertisement) -> bool {
        // Previous target or known device always wins
        if self.target == Some(&adv.address) || self.known_devices.contains(&adv.address) {
            return true;
        }

        if adv
            .name
            .as_deref()
            .is_some_and(|name| !name.is_empty() && protocol::is_known_led_name(name))
        {
            return true;
        }

        adv.service_uuids
            .iter()
            .any(|uuid| protocol::KNOWN_SERVICE_UUIDS.contains(uuid))
    }
}

/// Scan session state owned by the connection manager
#[derive(Default)]
pub struct BleScanner {
    mode: Option<ScanMode>,
    generation: u64,
    timeout: Option<JoinHandle<()>>,
    results: Vec<ScannedDevice>,
}

impl BleScanner {
    pub fn new() -> Self {
        Self::default()
    }

    /// Mark a new session as running and return its generation.
    ///
    /// Any pending timeout from an earlier session is cancelled.
    pub fn begin(&mut self, mode: ScanMode) -> u64 {
        self.cancel_timeout();
        if mode == ScanMode::Manual {
            self.results.clear();
        }
        self.generation += 1;
        self.mode = Some(mode);
        debug!("Scan session {} started ({:?})", self.generation, mode);
        self.generation
    }

    pub fn arm_timeout(&mut self, handle: JoinHandle<()>) {
        self.cancel_timeout();
        self.timeout = Some(handle);
    }

    /// Close the session. Returns whether one was running.
    pub fn end(&mut self) -> bool {
        self.cancel_timeout();
        self.mode.take().is_some()
    }

    pub fn is_scanning(&self) -> bool {
        self.mode.is_some()
    }

    pub fn mode(&self) -> Option<ScanMode> {
        self.mode
    }

    pub fn is_current(&self, generation: u64) -> bool {
        self.is_scanning() && self.generation == generation
    }

    /// Insert or replace the entry for this address; the latest advertisement wins
    pub fn record(&mut self, adv: &Advertisement) {
        let device = ScannedDevice {
            name: adv.name.clone().filter(|n| !n.is_empty()),
            address: adv.address.clone(),
            signal_strength: adv.rssi,
        };

        match self.results.iter_mut().find(|d| d.address == device.address) {
            Some(existing) => *existing = device,
            None => self.results.push(device),
        }
    }

    pub fn results(&self) -> &[ScannedDevice] {
        &self.results
    }

    /// Last advertised name seen for an address
    pub fn name_of(&self, address: &Address) -> Option<&str> {
        self.results
            .iter()
            .find(|d| &d.address == address)
            .and_then(|d| d.name.as_deref())
    }

    fn cancel_timeout(&mut self) {
        if let Some(handle) = self.timeout.take() {
            handle.abort();
        }
    }
}

impl Drop for BleScanner {
    fn drop(&mut self) {
        self.cancel_timeout();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::models::KnownDevice;
    use crate::infrastructure::storage::MemoryStore;
    use std::sync::Arc;
    use uuid::Uuid;

    fn adv(address: &str, name: Option<&str>, services: Vec<Uuid>) -> Advertisement {
        Advertisement {
            address: Address::new(address),
            name: name.map(str::to_string),
            service_uuids: services,
            rssi: -60,
        }
    }

    fn empty_store() -> KnownDeviceStore {
        KnownDeviceStore::load(Arc::new(MemoryStore::new()))
    }

    #[test]
    fn test_vendor_name_included() {
        let known = empty_store();
        let filter = ScanFilter {
            target: None,
            known_devices: &known,
        };
        assert!(filter.matches(&adv("01:02:03:04:05:06", Some("Triones-XYZ"), vec![])));
    }

    #[test]
    fn test_unrelated_device_excluded() {
        let known = empty_store();
        let filter = ScanFilter {
            target: None,
            known_devices: &known,
        };
        let speaker = adv(
            "01:02:03:04:05:06",
            Some("Generic Speaker"),
            vec![Uuid::from_u128(0x0000180f_0000_1000_8000_00805f9b34fb)],
        );
        assert!(!filter.matches(&speaker));
        assert!(!filter.matches(&adv("01:02:03:04:05:06", None, vec![])));
    }

    #[test]
    fn test_service_uuid_included() {
        let known = empty_store();
        let filter = ScanFilter {
            target: None,
            known_devices: &known,
        };
        assert!(filter.matches(&adv(
            "01:02:03:04:05:06",
            None,
            vec![protocol::SERVICE_UUID_ALT_2]
        )));
    }

    #[test]
    fn test_target_and_known_addresses_included() {
        let mut known = empty_store();
        known.add(KnownDevice {
            name: "Bedroom".to_string(),
            address: Address::new("AA:AA:AA:AA:AA:AA"),
        });
        let target = Address::new("BB:BB:BB:BB:BB:BB");
        let filter = ScanFilter {
            target: Some(&target),
            known_devices: &known,
        };

        assert!(filter.matches(&adv("aa:aa:aa:aa:aa:aa", Some("Speaker"), vec![])));
        assert!(filter.matches(&adv("BB:BB:BB:BB:BB:BB", None, vec![])));
        assert!(!filter.matches(&adv("CC:CC:CC:CC:CC:CC", Some("Speaker"), vec![])));
    }

    #[test]
    fn test_record_replaces_same_address() {
        let mut scanner = BleScanner::new();
        scanner.begin(ScanMode::Manual);
        scanner.record(&adv("AA:AA:AA:AA:AA:AA", Some("LED-1"), vec![]));
        scanner.record(&adv("BB:BB:BB:BB:BB:BB", Some("LED-2"), vec![]));

        let mut update = adv("AA:AA:AA:AA:AA:AA", Some("LED-1 renamed"), vec![]);
        update.rssi = -40;
        scanner.record(&update);

        assert_eq!(scanner.results().len(), 2);
        assert_eq!(scanner.results()[0].signal_strength, -40);
        assert_eq!(
            scanner.name_of(&Address::new("AA:AA:AA:AA:AA:AA")),
            Some("LED-1 renamed")
        );
    }

    #[test]
    fn test_manual_begin_clears_background_keeps() {
        let mut scanner = BleScanner::new();
        let first = scanner.begin(ScanMode::Background);
        scanner.record(&adv("AA:AA:AA:AA:AA:AA", Some("LED"), vec![]));

        let second = scanner.begin(ScanMode::Background);
        assert_eq!(scanner.results().len(), 1);
        assert!(!scanner.is_current(first));
        assert!(scanner.is_current(second));

        scanner.begin(ScanMode::Manual);
        assert!(scanner.results().is_empty());

        assert!(scanner.end());
        assert!(!scanner.end());
    }
}
