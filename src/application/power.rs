use crate::domain::settings::PowerSettings;
use crate::ports::camera::Camera;
use crate::ports::power::PowerControl;
use std::sync::Arc;
use tracing::{info, warn};

/// Switches off HDMI and the LEDs for the duration of a capture run.
///
/// Failures are logged and never stop capture: power saving is best effort.
pub struct PowerSaver {
    control: Arc<dyn PowerControl>,
}

impl PowerSaver {
    pub fn new(control: Arc<dyn PowerControl>) -> Self {
        Self { control }
    }

    pub async fn apply(&self, settings: &PowerSettings, camera: &mut dyn Camera) {
        if settings.disable_hdmi {
            match self.control.set_hdmi(false).await {
                Ok(()) => info!("HDMI disabled"),
                Err(e) => warn!(error = %e, "Failed to disable HDMI"),
            }
        }
        if settings.disable_board_leds {
            if let Err(e) = self.control.set_board_leds(false).await {
                warn!(error = %e, "Failed to disable board LEDs");
            }
        }
        if settings.disable_camera_led {
            if let Err(e) = camera.set_led(false).await {
                warn!(error = %e, "Failed to disable camera LED");
            }
        }
    }

    pub async fn restore(&self, settings: &PowerSettings, camera: &mut dyn Camera) {
        if settings.disable_hdmi {
            match self.control.set_hdmi(true).await {
                Ok(()) => info!("HDMI enabled"),
                Err(e) => warn!(error = %e, "Failed to enable HDMI"),
            }
        }
        if settings.disable_board_leds {
            if let Err(e) = self.control.set_board_leds(true).await {
                warn!(error = %e, "Failed to restore board LEDs");
            }
        }
        if settings.disable_camera_led {
            if let Err(e) = camera.set_led(true).await {
                warn!(error = %e, "Failed to restore camera LED");
            }
        }
    }
}
