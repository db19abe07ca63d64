//! Link-layer boundary
//!
//! A [`Radio`] starts operations and returns immediately. Their outcomes come
//! back later as [`RadioEvent`]s on the channel handed to the radio at
//! construction, tagged with the [`LinkId`] of the attempt they belong to.

use crate::domain::models::{Address, PeripheralIdentity};
use std::fmt;
use std::future::Future;
use thiserror::Error;
use uuid::Uuid;

/// One connection attempt. A new id is minted for every `connect`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct LinkId(pub u64);

impl fmt::Display for LinkId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "link#{}", self.0)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct CharacteristicProperties(u8);

impl CharacteristicProperties {
    pub const READ: Self = Self(0x02);
    pub const WRITE_WITHOUT_RESPONSE: Self = Self(0x04);
    pub const WRITE: Self = Self(0x08);
    pub const NOTIFY: Self = Self(0x10);

    pub const fn empty() -> Self {
        Self(0)
    }

    /// Standard GATT characteristic property bits
    pub const fn from_bits(bits: u8) -> Self {
        Self(bits)
    }

    pub const fn union(self, other: Self) -> Self {
        Self(self.0 | other.0)
    }

    pub const fn contains(self, other: Self) -> bool {
        self.0 & other.0 == other.0
    }
}

impl std::ops::BitOr for CharacteristicProperties {
    type Output = Self;

    fn bitor(self, rhs: Self) -> Self {
        self.union(rhs)
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GattCharacteristic {
    pub uuid: Uuid,
    pub properties: CharacteristicProperties,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GattService {
    pub uuid: Uuid,
    pub characteristics: Vec<GattCharacteristic>,
}

/// One advertisement packet as seen during a scan
#[derive(Debug, Clone, PartialEq)]
pub struct Advertisement {
    pub address: Address,
    pub name: Option<String>,
    pub service_uuids: Vec<Uuid>,
    pub rssi: i16,
}

#[derive(Debug, Clone, PartialEq)]
pub enum RadioEvent {
    Advertisement(Advertisement),
    ScanFailed { code: i32 },
    Connected { link: LinkId },
    ServicesDiscovered {
        link: LinkId,
        result: Result<Vec<GattService>, RadioError>,
    },
    Disconnected { link: LinkId },
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum RadioError {
    #[error("bluetooth adapter unavailable")]
    AdapterUnavailable,
    #[error("permission denied: {0}")]
    PermissionDenied(String),
    #[error("no such link {0}")]
    UnknownLink(LinkId),
    #[error("GATT operation failed with status {0}")]
    GattStatus(i32),
    #[error("radio platform error: {0}")]
    Platform(String),
}

/// Host BLE stack as seen by the connection manager.
///
/// Implementations must not block: anything slow is started here and
/// reported through [`RadioEvent`]s.
pub trait Radio: Send + Sync + 'static {
    fn start_scan(&self) -> Result<(), RadioError>;

    fn stop_scan(&self) -> Result<(), RadioError>;

    /// Begin a link attempt. Completion arrives as `Connected` or `Disconnected`.
    fn connect(&self, link: LinkId, address: &Address) -> Result<(), RadioError>;

    /// Completion arrives as `ServicesDiscovered`.
    fn discover_services(&self, link: LinkId) -> Result<(), RadioError>;

    fn write_without_response(
        &self,
        link: LinkId,
        characteristic: Uuid,
        payload: &[u8],
    ) -> Result<(), RadioError>;

    /// Request a graceful disconnect. Completion arrives as `Disconnected`.
    fn disconnect(&self, link: LinkId) -> Result<(), RadioError>;

    /// Release the link object. No further events are delivered for it.
    fn close(&self, link: LinkId);

    /// Peripherals the host OS already holds a GATT link to
    fn system_connected_devices(
        &self,
    ) -> impl Future<Output = Result<Vec<PeripheralIdentity>, RadioError>> + Send;
}
