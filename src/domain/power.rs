//! Power toggle
//!
//! Remembers whether the strip is on and which color to restore when it is
//! switched back on. Every change goes through
//! [`BluetoothService::execute_command`], so it works with or without a live
//! link.

use crate::domain::models::Rgb;
use crate::infrastructure::bluetooth::BluetoothService;
use crate::infrastructure::storage::{KeyValueStore, StoreError};
use std::sync::Arc;
use tracing::{error, info};

const POWER_KEY: &str = "saved_power";
const HUE_KEY: &str = "saved_hue";
const SATURATION_KEY: &str = "saved_sat";
const BRIGHTNESS_KEY: &str = "saved_bri";

/// Color restored on power-on, kept as HSV so brightness survives a toggle
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct SavedColor {
    /// Degrees
    pub hue: f32,
    pub saturation: f32,
    pub brightness: f32,
}

impl Default for SavedColor {
    /// Full-brightness white
    fn default() -> Self {
        Self {
            hue: 0.0,
            saturation: 0.0,
            brightness: 1.0,
        }
    }
}

impl SavedColor {
    pub fn to_rgb(self) -> Rgb {
        Rgb::from_hsv(self.hue, self.saturation, self.brightness)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PowerOutcome {
    /// State after the change, persisted whether or not a device answered
    pub on: bool,
    /// A controller took the resulting color
    pub delivered: bool,
}

pub struct PowerControl {
    backend: Arc<dyn KeyValueStore>,
}

impl PowerControl {
    pub fn new(backend: Arc<dyn KeyValueStore>) -> Self {
        Self { backend }
    }

    pub fn is_on(&self) -> bool {
        self.backend
            .get(POWER_KEY)
            .and_then(|raw| raw.parse().ok())
            .unwrap_or(false)
    }

    pub fn saved_color(&self) -> SavedColor {
        let defaults = SavedColor::default();
        let read = |key: &str, fallback: f32| {
            self.backend
                .get(key)
                .and_then(|raw| raw.parse::<f32>().ok())
                .filter(|v| v.is_finite())
                .unwrap_or(fallback)
        };
        SavedColor {
            hue: read(HUE_KEY, defaults.hue),
            saturation: read(SATURATION_KEY, defaults.saturation),
            brightness: read(BRIGHTNESS_KEY, defaults.brightness),
        }
    }

    pub fn save_color(&self, color: SavedColor) -> Result<(), StoreError> {
        self.backend.put(HUE_KEY, &color.hue.to_string())?;
        self.backend
            .put(SATURATION_KEY, &color.saturation.to_string())?;
        self.backend
            .put(BRIGHTNESS_KEY, &color.brightness.to_string())
    }

    /// Switch on (saved color) or off (black)
    pub async fn set(&self, service: &BluetoothService, on: bool) -> PowerOutcome {
        // Recorded up front: the requested state stands even if no device answers
        if let Err(e) = self.backend.put(POWER_KEY, if on { "true" } else { "false" }) {
            error!("Failed to persist power state: {}", e);
        }

        let color = if on {
            self.saved_color().to_rgb()
        } else {
            Rgb::OFF
        };
        info!("Power {} ({:?})", if on { "on" } else { "off" }, color);

        PowerOutcome {
            on,
            delivered: service.execute_command(color).await,
        }
    }

    pub async fn toggle(&self, service: &BluetoothService) -> PowerOutcome {
        self.set(service, !self.is_on()).await
    }

    /// Remember a new color and switch on with it
    pub async fn set_color(&self, service: &BluetoothService, color: SavedColor) -> PowerOutcome {
        if let Err(e) = self.save_color(color) {
            error!("Failed to persist color: {}", e);
        }
        self.set(service, true).await
    }
}
