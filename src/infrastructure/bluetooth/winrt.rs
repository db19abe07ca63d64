//! WinRT radio
//!
//! Windows has no explicit connect call: a `BluetoothLEDevice` links lazily
//! on the first GATT operation. A `GattSession` with `MaintainConnection` is
//! opened so the link stays up between color writes.

use crate::domain::models::{Address, PeripheralIdentity};
use crate::infrastructure::bluetooth::radio::{
    Advertisement, CharacteristicProperties, GattCharacteristic, GattService, LinkId, Radio,
    RadioError, RadioEvent,
};
use std::collections::HashMap;
use std::future::Future;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use tokio::sync::mpsc;
use tracing::{debug, info, warn};
use uuid::Uuid;
use windows::core::GUID;
use windows::Devices::Bluetooth::Advertisement::{
    BluetoothLEAdvertisementReceivedEventArgs, BluetoothLEAdvertisementWatcher,
    BluetoothLEScanningMode,
};
use windows::Devices::Bluetooth::GenericAttributeProfile::{
    GattCharacteristic as WinCharacteristic, GattCommunicationStatus, GattSession,
    GattWriteOption,
};
use windows::Devices::Bluetooth::{BluetoothConnectionStatus, BluetoothLEDevice};
use windows::Devices::Enumeration::DeviceInformation;
use windows::Foundation::TypedEventHandler;
use windows::Storage::Streams::DataWriter;

impl From<windows::core::Error> for RadioError {
    fn from(e: windows::core::Error) -> Self {
        // E_ACCESSDENIED
        if e.code().0 as u32 == 0x8007_0005 {
            RadioError::PermissionDenied(e.message().to_string())
        } else {
            RadioError::Platform(format!("{:?}", e))
        }
    }
}

fn to_uuid(guid: GUID) -> Uuid {
    Uuid::from_u128(guid.to_u128())
}

#[derive(Default)]
struct WinLink {
    device: Option<BluetoothLEDevice>,
    session: Option<GattSession>,
    characteristics: HashMap<Uuid, WinCharacteristic>,
}

impl WinLink {
    fn release(self) {
        if let Some(session) = self.session {
            let _ = session.Close();
        }
        if let Some(device) = self.device {
            let _ = device.Close();
        }
    }
}

type LinkMap = Arc<Mutex<HashMap<LinkId, WinLink>>>;

fn lock(links: &LinkMap) -> MutexGuard<'_, HashMap<LinkId, WinLink>> {
    links.lock().unwrap_or_else(PoisonError::into_inner)
}

pub struct WinRtRadio {
    events: mpsc::UnboundedSender<RadioEvent>,
    watcher: Mutex<Option<BluetoothLEAdvertisementWatcher>>,
    links: LinkMap,
}

impl WinRtRadio {
    pub fn new(events: mpsc::UnboundedSender<RadioEvent>) -> Self {
        Self {
            events,
            watcher: Mutex::new(None),
            links: Arc::new(Mutex::new(HashMap::new())),
        }
    }

    async fn open_link(
        links: LinkMap,
        events: mpsc::UnboundedSender<RadioEvent>,
        link: LinkId,
        raw_address: u64,
    ) -> Result<(), RadioError> {
        let device = BluetoothLEDevice::FromBluetoothAddressAsync(raw_address)?.await?;
        info!("Device object ready: {:?}", device.Name()?);

        let status_events = events.clone();
        let status_handler =
            TypedEventHandler::new(move |dev: windows::core::Ref<BluetoothLEDevice>, _| {
                if let Some(dev) = dev.as_ref() {
                    if dev.ConnectionStatus()? == BluetoothConnectionStatus::Disconnected {
                        let _ = status_events.send(RadioEvent::Disconnected { link });
                    }
                }
                Ok(())
            });
        device.ConnectionStatusChanged(&status_handler)?;

        let session = GattSession::FromDeviceIdAsync(&device.BluetoothDeviceId()?)?.await?;
        session.SetMaintainConnection(true)?;

        let mut links = lock(&links);
        match links.get_mut(&link) {
            Some(entry) => {
                entry.device = Some(device);
                entry.session = Some(session);
                let _ = events.send(RadioEvent::Connected { link });
            }
            None => {
                // Closed while the device was being resolved
                let _ = session.Close();
                let _ = device.Close();
            }
        }
        Ok(())
    }

    async fn discover(links: LinkMap, link: LinkId) -> Result<Vec<GattService>, RadioError> {
        let device = lock(&links)
            .get(&link)
            .and_then(|l| l.device.clone())
            .ok_or(RadioError::UnknownLink(link))?;

        let services_result = device.GetGattServicesAsync()?.await?;
        let status = services_result.Status()?;
        if status != GattCommunicationStatus::Success {
            return Err(RadioError::GattStatus(status.0));
        }

        let mut tree = Vec::new();
        let mut found = HashMap::new();
        let services = services_result.Services()?;
        for i in 0..services.Size()? {
            let service = services.GetAt(i)?;
            let chars_result = service.GetCharacteristicsAsync()?.await?;
            if chars_result.Status()? != GattCommunicationStatus::Success {
                debug!("Skipping service {:?}: characteristics unavailable", service.Uuid()?);
                continue;
            }

            let characteristics = chars_result.Characteristics()?;
            let mut entries = Vec::new();
            for j in 0..characteristics.Size()? {
                let c = characteristics.GetAt(j)?;
                let uuid = to_uuid(c.Uuid()?);
                entries.push(GattCharacteristic {
                    uuid,
                    properties: CharacteristicProperties::from_bits(
                        c.CharacteristicProperties()?.0 as u8,
                    ),
                });
                found.insert(uuid, c);
            }
            tree.push(GattService {
                uuid: to_uuid(service.Uuid()?),
                characteristics: entries,
            });
        }

        if let Some(entry) = lock(&links).get_mut(&link) {
            entry.characteristics = found;
        }
        Ok(tree)
    }
}

impl Radio for WinRtRadio {
    fn start_scan(&self) -> Result<(), RadioError> {
        let mut slot = self.watcher.lock().unwrap_or_else(PoisonError::into_inner);
        if let Some(old) = slot.take() {
            let _ = old.Stop();
        }

        let watcher = BluetoothLEAdvertisementWatcher::new()?;
        watcher.SetScanningMode(BluetoothLEScanningMode::Active)?;

        let sender = self.events.clone();
        let handler = TypedEventHandler::new(
            move |_: windows::core::Ref<BluetoothLEAdvertisementWatcher>,
                  args: windows::core::Ref<BluetoothLEAdvertisementReceivedEventArgs>| {
                if let Some(args) = args.as_ref() {
                    let adv = args.Advertisement()?;
                    let uuids = adv.ServiceUuids()?;
                    let mut service_uuids = Vec::new();
                    for i in 0..uuids.Size()? {
                        service_uuids.push(to_uuid(uuids.GetAt(i)?));
                    }
                    let name = adv.LocalName()?.to_string();

                    let _ = sender.send(RadioEvent::Advertisement(Advertisement {
                        address: Address::from_u64(args.BluetoothAddress()?),
                        name: (!name.is_empty()).then_some(name),
                        service_uuids,
                        rssi: args.RawSignalStrengthInDBm()?,
                    }));
                }
                Ok(())
            },
        );

        watcher.Received(&handler)?;
        watcher.Start()?;
        *slot = Some(watcher);
        Ok(())
    }

    fn stop_scan(&self) -> Result<(), RadioError> {
        let watcher = self
            .watcher
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take();
        if let Some(watcher) = watcher {
            watcher.Stop()?;
        }
        Ok(())
    }

    fn connect(&self, link: LinkId, address: &Address) -> Result<(), RadioError> {
        let raw_address = address
            .to_u64()
            .ok_or_else(|| RadioError::Platform(format!("not a MAC address: {}", address)))?;
        lock(&self.links).insert(link, WinLink::default());

        let links = self.links.clone();
        let events = self.events.clone();
        tokio::spawn(async move {
            if let Err(e) = Self::open_link(links.clone(), events.clone(), link, raw_address).await
            {
                warn!("Link {} failed: {}", link, e);
                if let Some(entry) = lock(&links).remove(&link) {
                    entry.release();
                }
                let _ = events.send(RadioEvent::Disconnected { link });
            }
        });
        Ok(())
    }

    fn discover_services(&self, link: LinkId) -> Result<(), RadioError> {
        if !lock(&self.links).contains_key(&link) {
            return Err(RadioError::UnknownLink(link));
        }

        let links = self.links.clone();
        let events = self.events.clone();
        tokio::spawn(async move {
            let result = Self::discover(links, link).await;
            let _ = events.send(RadioEvent::ServicesDiscovered { link, result });
        });
        Ok(())
    }

    fn write_without_response(
        &self,
        link: LinkId,
        characteristic: Uuid,
        payload: &[u8],
    ) -> Result<(), RadioError> {
        let target = lock(&self.links)
            .get(&link)
            .ok_or(RadioError::UnknownLink(link))?
            .characteristics
            .get(&characteristic)
            .cloned()
            .ok_or_else(|| RadioError::Platform(format!("{} not discovered", characteristic)))?;

        let writer = DataWriter::new()?;
        writer.WriteBytes(payload)?;
        let buffer = writer.DetachBuffer()?;

        // The caller does not wait; failures are only logged
        let operation =
            target.WriteValueWithOptionAsync(&buffer, GattWriteOption::WriteWithoutResponse)?;
        tokio::spawn(async move {
            match operation.await {
                Ok(status) if status == GattCommunicationStatus::Success => {}
                Ok(status) => warn!("Write on {} rejected with status {}", link, status.0),
                Err(e) => warn!("Write on {} failed: {:?}", link, e),
            }
        });
        Ok(())
    }

    fn disconnect(&self, link: LinkId) -> Result<(), RadioError> {
        let entry = lock(&self.links)
            .remove(&link)
            .ok_or(RadioError::UnknownLink(link))?;
        entry.release();
        // Closing the device object raises no status change, so report it here
        let _ = self.events.send(RadioEvent::Disconnected { link });
        Ok(())
    }

    fn close(&self, link: LinkId) {
        if let Some(entry) = lock(&self.links).remove(&link) {
            entry.release();
        }
    }

    fn system_connected_devices(
        &self,
    ) -> impl Future<Output = Result<Vec<PeripheralIdentity>, RadioError>> + Send {
        async move {
            let selector = BluetoothLEDevice::GetDeviceSelectorFromConnectionStatus(
                BluetoothConnectionStatus::Connected,
            )?;
            let infos = DeviceInformation::FindAllAsyncAqsFilter(&selector)?.await?;

            let mut linked = Vec::new();
            for i in 0..infos.Size()? {
                let info = infos.GetAt(i)?;
                let device = BluetoothLEDevice::FromIdAsync(&info.Id()?)?.await?;
                let name = device.Name()?.to_string();
                linked.push(PeripheralIdentity {
                    address: Address::from_u64(device.BluetoothAddress()?),
                    name: (!name.is_empty()).then_some(name),
                });
            }
            Ok(linked)
        }
    }
}

impl Drop for WinRtRadio {
    fn drop(&mut self) {
        let _ = self.stop_scan();
        for (_, entry) in lock(&self.links).drain() {
            entry.release();
        }
    }
}
