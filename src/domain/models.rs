use serde::{Deserialize, Serialize};
use std::fmt;

/// Link-layer identifier of a peripheral.
///
/// Either a MAC (`AA:BB:CC:DD:EE:FF`) or a platform-assigned identifier.
/// Stored upper-cased so the same device always compares equal.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Address(String);

impl Address {
    pub fn new(raw: impl AsRef<str>) -> Self {
        Self(raw.as_ref().trim().to_ascii_uppercase())
    }

    /// Format a 48-bit Bluetooth address as `AA:BB:CC:DD:EE:FF`
    pub fn from_u64(raw: u64) -> Self {
        let bytes = raw.to_be_bytes();
        let parts: Vec<String> = bytes[2..].iter().map(|b| format!("{:02X}", b)).collect();
        Self(parts.join(":"))
    }

    /// Parse back into a 48-bit value. `None` for non-MAC identifiers.
    pub fn to_u64(&self) -> Option<u64> {
        let hex: String = self.0.split(':').collect();
        if hex.len() != 12 || self.0.split(':').count() != 6 {
            return None;
        }
        u64::from_str_radix(&hex, 16).ok()
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for Address {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// A peripheral as reported by the radio: stable address, possibly stale name.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PeripheralIdentity {
    pub address: Address,
    pub name: Option<String>,
}

/// A previously connected device, persisted for reconnection and listing.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct KnownDevice {
    pub name: String,
    pub address: Address,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ConnectionState {
    #[default]
    Disconnected,
    Connecting,
    Connected,
}

/// Per-address view published to observers.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct DeviceStatus {
    pub state: ConnectionState,
    /// A writable command characteristic has been found on this link
    pub command_bound: bool,
}

/// Latest advertisement data for a matching peripheral
#[derive(Debug, Clone, PartialEq)]
pub struct ScannedDevice {
    pub name: Option<String>,
    pub address: Address,
    pub signal_strength: i16,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ScanMode {
    /// User asked for a refresh: clear results, never auto-connect
    Manual,
    /// Lifecycle-triggered scan looking for the last target
    Background,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
pub struct Rgb {
    pub r: u8,
    pub g: u8,
    pub b: u8,
}

impl Rgb {
    pub const OFF: Rgb = Rgb::new(0, 0, 0);

    pub const fn new(r: u8, g: u8, b: u8) -> Self {
        Self { r, g, b }
    }

    /// Convert hue (degrees), saturation and value (0..=1) to RGB.
    ///
    /// Out-of-range inputs are wrapped (hue) or clamped (saturation, value).
    pub fn from_hsv(hue: f32, saturation: f32, value: f32) -> Self {
        let h = hue.rem_euclid(360.0) / 60.0;
        let s = saturation.clamp(0.0, 1.0);
        let v = value.clamp(0.0, 1.0);

        let sector = h.floor();
        let f = h - sector;
        let p = v * (1.0 - s);
        let q = v * (1.0 - s * f);
        let t = v * (1.0 - s * (1.0 - f));

        // A tiny negative hue wraps to exactly 360.0, which is red again
        let (r, g, b) = match sector as u8 {
            0 | 6 => (v, t, p),
            1 => (q, v, p),
            2 => (p, v, t),
            3 => (p, q, v),
            4 => (t, p, v),
            _ => (v, p, q),
        };

        let to_byte = |c: f32| (c * 255.0).round().clamp(0.0, 255.0) as u8;
        Self::new(to_byte(r), to_byte(g), to_byte(b))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_address_normalized() {
        assert_eq!(Address::new(" aa:bb:cc:dd:ee:ff "), Address::new("AA:BB:CC:DD:EE:FF"));
    }

    #[test]
    fn test_address_u64_conversion() {
        let address = Address::from_u64(0xAABB_CCDD_EEFF);
        assert_eq!(address.as_str(), "AA:BB:CC:DD:EE:FF");
        assert_eq!(address.to_u64(), Some(0xAABB_CCDD_EEFF));
        assert_eq!(Address::new("not-a-mac").to_u64(), None);
    }

    #[test]
    fn test_hsv_primaries() {
        assert_eq!(Rgb::from_hsv(0.0, 1.0, 1.0), Rgb::new(255, 0, 0));
        assert_eq!(Rgb::from_hsv(120.0, 1.0, 1.0), Rgb::new(0, 255, 0));
        assert_eq!(Rgb::from_hsv(240.0, 1.0, 1.0), Rgb::new(0, 0, 255));
        assert_eq!(Rgb::from_hsv(360.0, 1.0, 1.0), Rgb::new(255, 0, 0));
    }

    #[test]
    fn test_hsv_tiny_negative_hue_is_red() {
        assert_eq!(Rgb::from_hsv(-1e-6, 1.0, 1.0), Rgb::new(255, 0, 0));
        assert_eq!(Rgb::from_hsv(-0.0001, 1.0, 1.0), Rgb::new(255, 0, 0));
    }

    #[test]
    fn test_hsv_grey_and_black() {
        assert_eq!(Rgb::from_hsv(42.0, 0.0, 1.0), Rgb::new(255, 255, 255));
        assert_eq!(Rgb::from_hsv(200.0, 1.0, 0.0), Rgb::OFF);
    }
}
