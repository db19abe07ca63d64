//! LED Controller Protocol
//!
//! Wire format shared by the Triones / ELK-BLEDOM / Lotus family of cheap
//! BLE strip controllers. One GATT service, one writable characteristic, one
//! "set solid color" frame. Writes are unacknowledged and nothing is ever
//! read back, so there is no decoder.

use crate::domain::models::Rgb;
use uuid::Uuid;

/// Primary LED controller service (0xFFF0)
pub const SERVICE_UUID: Uuid = Uuid::from_u128(0x0000fff0_0000_1000_8000_00805f9b34fb);

/// Alternate services seen on generic controllers (0xFFE0, 0xAE00)
pub const SERVICE_UUID_ALT_1: Uuid = Uuid::from_u128(0x0000ffe0_0000_1000_8000_00805f9b34fb);
pub const SERVICE_UUID_ALT_2: Uuid = Uuid::from_u128(0x0000ae00_0000_1000_8000_00805f9b34fb);

/// Services tried in order after discovery
pub const KNOWN_SERVICE_UUIDS: [Uuid; 3] = [SERVICE_UUID, SERVICE_UUID_ALT_1, SERVICE_UUID_ALT_2];

/// Command characteristic (0xFFF3)
pub const COMMAND_CHAR_UUID: Uuid = Uuid::from_u128(0x0000fff3_0000_1000_8000_00805f9b34fb);

/// Advertised-name fragments of known controller vendors, matched case-insensitively
pub const KNOWN_LED_NAMES: &[&str] = &[
    "LED", "Light", "Lotus", "Happy", "ELK", "BLEDOM", "Triones", "QHM", "JTY", "OA", "duoCo",
    "Melpo", "Ks", "Marvel", "Zengge",
];

pub const FRAME_LEN: usize = 9;

const FRAME_HEADER: [u8; 4] = [0x7E, 0x00, 0x05, 0x03];
const FRAME_TRAILER: [u8; 2] = [0x00, 0xEF];

/// A "set solid color" command
///
/// # Frame Structure (9 bytes)
///
/// ```text
/// [0]   : 0x7E  start marker
/// [1]   : 0x00
/// [2]   : 0x05  command group
/// [3]   : 0x03  set color
/// [4]   : red
/// [5]   : green
/// [6]   : blue
/// [7]   : 0x00
/// [8]   : 0xEF  end marker
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CommandFrame([u8; FRAME_LEN]);

impl CommandFrame {
    pub fn as_bytes(&self) -> &[u8; FRAME_LEN] {
        &self.0
    }
}

impl From<Rgb> for CommandFrame {
    fn from(color: Rgb) -> Self {
        Self(encode(color.r, color.g, color.b))
    }
}

/// Build the 9-byte color frame
pub fn encode(r: u8, g: u8, b: u8) -> [u8; FRAME_LEN] {
    let mut frame = [0u8; FRAME_LEN];
    frame[..4].copy_from_slice(&FRAME_HEADER);
    frame[4] = r;
    frame[5] = g;
    frame[6] = b;
    frame[7..].copy_from_slice(&FRAME_TRAILER);
    frame
}

/// Does an advertised name look like a known controller?
pub fn is_known_led_name(name: &str) -> bool {
    let lowered = name.to_lowercase();
    KNOWN_LED_NAMES
        .iter()
        .any(|fragment| lowered.contains(&fragment.to_lowercase()))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_encode_red() {
        assert_eq!(
            encode(0xFF, 0x00, 0x00),
            [0x7E, 0x00, 0x05, 0x03, 0xFF, 0x00, 0x00, 0x00, 0xEF]
        );
    }

    #[test]
    fn test_encode_channels_land_in_place() {
        for (r, g, b) in [(0, 0, 0), (1, 2, 3), (255, 255, 255), (0x12, 0xAB, 0x7F)] {
            let frame = encode(r, g, b);
            assert_eq!(frame.len(), FRAME_LEN);
            assert_eq!(&frame[..4], &[0x7E, 0x00, 0x05, 0x03]);
            assert_eq!(&frame[4..7], &[r, g, b]);
            assert_eq!(&frame[7..], &[0x00, 0xEF]);
        }
    }

    #[test]
    fn test_frame_from_rgb() {
        let frame = CommandFrame::from(Rgb::new(10, 20, 30));
        assert_eq!(frame.as_bytes(), &encode(10, 20, 30));
    }

    #[test]
    fn test_service_uuid_strings() {
        assert_eq!(
            SERVICE_UUID.to_string(),
            "0000fff0-0000-1000-8000-00805f9b34fb"
        );
        assert_eq!(
            COMMAND_CHAR_UUID.to_string(),
            "0000fff3-0000-1000-8000-00805f9b34fb"
        );
    }

    #[test]
    fn test_known_names_case_insensitive() {
        assert!(is_known_led_name("Triones-XYZ"));
        assert!(is_known_led_name("elk-bledom"));
        assert!(is_known_led_name("my zengge bulb"));
        assert!(!is_known_led_name("Generic Speaker"));
    }
}
