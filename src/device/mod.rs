//! The panel-device boundary: an opaque command set over the attached
//! hardware, with per-variant behavior supplied as data ([`PanelProfile`])
//! instead of duplicated control flow.

pub mod simulator;

#[cfg(feature = "hardware")]
pub mod waveshare;

/// Panel-specific constants discovered at startup.
#[derive(Debug, Clone, Copy)]
pub struct PanelProfile {
    pub name: &'static str,
    pub width: u32,
    pub height: u32,
    pub color_mode: crate::quantize::ColorMode,
    pub supports_partial: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RefreshMode {
    /// Complete redraw; clears ghosting at the cost of a visible flash.
    Full,
    /// Sub-region update; faster, higher ghosting risk. Never used for
    /// color-alphabet panels.
    Partial,
}

#[derive(Debug, thiserror::Error)]
pub enum DeviceError {
    #[error("Panel transport failed during {operation}: {details}")]
    Transport {
        operation: &'static str,
        details: String,
    },

    #[error("Frame is {frame_width}x{frame_height} but the panel is {panel_width}x{panel_height}")]
    FrameMismatch {
        frame_width: u32,
        frame_height: u32,
        panel_width: u32,
        panel_height: u32,
    },

    #[error("Refresh requested with no frame loaded")]
    NothingLoaded,

    #[error("Failed to write simulator frame to '{path}'")]
    SimulatorWrite {
        path: camino::Utf8PathBuf,
        #[source]
        source: image::ImageError,
    },

    #[error("This build has no driver for '{device}'; rebuild with the 'hardware' feature")]
    HardwareSupportNotBuilt { device: &'static str },
}

/// Fixed command set of the external panel device.
///
/// Calls block until the hardware settles; the controller runs them on the
/// blocking pool and owns all sequencing and timeout policy.
pub trait PanelDevice: Send {
    fn profile(&self) -> PanelProfile;

    /// Power up and initialize. Also wakes the device from deep sleep.
    fn init(&mut self) -> Result<(), DeviceError>;

    /// Transfer a composed frame into the device's addressable memory.
    fn load_frame(&mut self, frame: &crate::quantize::FrameBuffer) -> Result<(), DeviceError>;

    /// Trigger a redraw of the loaded frame and wait for completion.
    fn refresh(&mut self, mode: RefreshMode) -> Result<(), DeviceError>;

    /// Write an all-background frame and perform a full refresh.
    fn clear(&mut self) -> Result<(), DeviceError>;

    /// Enter the lowest-power state.
    fn sleep(&mut self) -> Result<(), DeviceError>;
}

/// Opens the configured panel device.
pub fn open(config: &crate::config::PanelConfig) -> Result<Box<dyn PanelDevice>, DeviceError> {
    match config.device {
        crate::config::DeviceKind::Simulator => Ok(Box::new(
            simulator::SimulatorDevice::new(&config.simulator),
        )),

        #[cfg(feature = "hardware")]
        crate::config::DeviceKind::Epd7in5V2 => {
            waveshare::WaveshareDevice::open(&config.spi).map(|device| {
                let device: Box<dyn PanelDevice> = Box::new(device);
                device
            })
        }

        #[cfg(not(feature = "hardware"))]
        crate::config::DeviceKind::Epd7in5V2 => Err(DeviceError::HardwareSupportNotBuilt {
            device: "epd7in5-v2",
        }),
    }
}

#[cfg(test)]
pub mod testing {
    use super::*;
    use std::sync::{Arc, Mutex};

    /// Every command the controller issued, in order.
    #[derive(Clone, Default)]
    pub struct CallLog(Arc<Mutex<Vec<&'static str>>>);

    impl CallLog {
        pub fn push(&self, call: &'static str) {
            self.0.lock().unwrap().push(call);
        }

        pub fn calls(&self) -> Vec<&'static str> {
            self.0.lock().unwrap().clone()
        }

        pub fn count(&self, call: &'static str) -> usize {
            self.0.lock().unwrap().iter().filter(|c| **c == call).count()
        }
    }

    pub fn profile(width: u32, height: u32) -> PanelProfile {
        PanelProfile {
            name: "test-panel",
            width,
            height,
            color_mode: crate::quantize::ColorMode::Grayscale { levels: 16 },
            supports_partial: false,
        }
    }

    /// Device double that records calls; the refresh can be slowed down or
    /// made to fail.
    pub struct RecordingDevice {
        pub log: CallLog,
        pub profile: PanelProfile,
        pub refresh_delay: std::time::Duration,
        pub fail_refresh: bool,
    }

    impl RecordingDevice {
        pub fn new(profile: PanelProfile) -> (Self, CallLog) {
            let log = CallLog::default();
            (
                Self {
                    log: log.clone(),
                    profile,
                    refresh_delay: std::time::Duration::ZERO,
                    fail_refresh: false,
                },
                log,
            )
        }
    }

    impl PanelDevice for RecordingDevice {
        fn profile(&self) -> PanelProfile {
            self.profile
        }

        fn init(&mut self) -> Result<(), DeviceError> {
            self.log.push("init");
            Ok(())
        }

        fn load_frame(&mut self, frame: &crate::quantize::FrameBuffer) -> Result<(), DeviceError> {
            if (frame.width(), frame.height()) != (self.profile.width, self.profile.height) {
                return Err(DeviceError::FrameMismatch {
                    frame_width: frame.width(),
                    frame_height: frame.height(),
                    panel_width: self.profile.width,
                    panel_height: self.profile.height,
                });
            }
            self.log.push("load_frame");
            Ok(())
        }

        fn refresh(&mut self, mode: RefreshMode) -> Result<(), DeviceError> {
            if !self.refresh_delay.is_zero() {
                std::thread::sleep(self.refresh_delay);
            }
            if self.fail_refresh {
                return Err(DeviceError::Transport {
                    operation: "refresh",
                    details: "injected failure".into(),
                });
            }
            self.log.push(match mode {
                RefreshMode::Full => "refresh:full",
                RefreshMode::Partial => "refresh:partial",
            });
            Ok(())
        }

        fn clear(&mut self) -> Result<(), DeviceError> {
            self.log.push("clear");
            Ok(())
        }

        fn sleep(&mut self) -> Result<(), DeviceError> {
            self.log.push("sleep");
            Ok(())
        }
    }
}
