//! Audio-reactive color pump
//!
//! The amplitude itself comes from an external feature extractor publishing a
//! smoothed value in `[0, 1]` on a watch channel. This module only paces those
//! values and turns them into `send_color` calls through a caller mapping.

use crate::domain::models::Rgb;
use crate::infrastructure::bluetooth::BluetoothService;
use std::time::Duration;
use tokio::sync::watch;
use tracing::{debug, info};

/// Smoothed amplitude in `[0, 1]`, published by the feature extractor
pub type AmplitudeSource = watch::Receiver<f32>;

/// ~25 updates per second
pub const DEFAULT_MIN_INTERVAL: Duration = Duration::from_millis(40);

pub struct AudioSync<F> {
    service: BluetoothService,
    mapping: F,
    min_interval: Duration,
}

impl<F> AudioSync<F>
where
    F: FnMut(f32) -> Rgb,
{
    pub fn new(service: BluetoothService, mapping: F) -> Self {
        Self {
            service,
            mapping,
            min_interval: DEFAULT_MIN_INTERVAL,
        }
    }

    pub fn with_min_interval(mut self, min_interval: Duration) -> Self {
        self.min_interval = min_interval;
        self
    }

    /// Forward amplitude updates until the extractor goes away.
    ///
    /// At most one color per `min_interval`; values arriving in between are
    /// collapsed so the latest one is sent next. Returns the number of colors sent.
    pub async fn run(mut self, mut amplitude: AmplitudeSource) -> usize {
        info!("Audio sync started");
        let mut sent = 0;

        while amplitude.changed().await.is_ok() {
            let level = amplitude.borrow_and_update().clamp(0.0, 1.0);
            let color = (self.mapping)(level);
            self.service.send_color(color).await;
            sent += 1;
            tokio::time::sleep(self.min_interval).await;
        }

        debug!("Amplitude source closed after {} colors", sent);
        sent
    }
}
