//! Panel device that renders frames into a PNG on disk instead of driving
//! hardware. Default device for development hosts without a panel attached.

use crate::device::{DeviceError, PanelDevice, PanelProfile, RefreshMode};

pub struct SimulatorDevice {
    profile: PanelProfile,
    output: camino::Utf8PathBuf,
    loaded: Option<crate::quantize::FrameBuffer>,
}

impl SimulatorDevice {
    pub fn new(config: &crate::config::SimulatorConfig) -> Self {
        Self {
            profile: PanelProfile {
                name: "simulator",
                width: config.width,
                height: config.height,
                color_mode: config.color_mode.into(),
                supports_partial: true,
            },
            output: config.output.clone(),
            loaded: None,
        }
    }

    fn write_png(&self, frame: &crate::quantize::FrameBuffer) -> Result<(), DeviceError> {
        let mode = frame.color_mode();
        let bitmap = image::RgbImage::from_fn(frame.width(), frame.height(), |x, y| {
            image::Rgb(frame.pixel(x, y).rgb(mode))
        });

        bitmap
            .save(self.output.as_std_path())
            .map_err(|source| DeviceError::SimulatorWrite {
                path: self.output.clone(),
                source,
            })
    }

    fn blank_frame(&self) -> Result<crate::quantize::FrameBuffer, DeviceError> {
        let background = self.profile.color_mode.background();
        let bitmap = image::RgbImage::from_pixel(
            self.profile.width,
            self.profile.height,
            image::Rgb(background.rgb(self.profile.color_mode)),
        );
        crate::quantize::quantize(&bitmap, self.profile.color_mode).map_err(|error| {
            DeviceError::Transport {
                operation: "clear",
                details: error.to_string(),
            }
        })
    }
}

impl PanelDevice for SimulatorDevice {
    fn profile(&self) -> PanelProfile {
        self.profile
    }

    fn init(&mut self) -> Result<(), DeviceError> {
        tracing::debug!(panel = self.profile.name, "Simulated panel initialized");
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
        self.loaded = Some(frame.clone());
        Ok(())
    }

    fn refresh(&mut self, mode: RefreshMode) -> Result<(), DeviceError> {
        let frame = self.loaded.as_ref().ok_or(DeviceError::NothingLoaded)?;
        self.write_png(frame)?;
        tracing::info!(
            ?mode,
            output = %self.output,
            "Simulated panel refreshed"
        );
        Ok(())
    }

    fn clear(&mut self) -> Result<(), DeviceError> {
        let blank = self.blank_frame()?;
        self.write_png(&blank)?;
        self.loaded = None;
        tracing::info!(output = %self.output, "Simulated panel cleared");
        Ok(())
    }

    fn sleep(&mut self) -> Result<(), DeviceError> {
        tracing::debug!(panel = self.profile.name, "Simulated panel sleeping");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn config(dir: &std::path::Path) -> crate::config::SimulatorConfig {
        crate::config::SimulatorConfig {
            width: 16,
            height: 8,
            color_mode: crate::config::ColorModeConfig::BlackRedWhite,
            output: camino::Utf8PathBuf::from(dir.join("panel.png").display().to_string()),
        }
    }

    #[test]
    fn refresh_writes_the_loaded_frame() {
        let dir = tempfile::tempdir().unwrap();
        let mut device = SimulatorDevice::new(&config(dir.path()));

        let bitmap = image::RgbImage::from_pixel(16, 8, image::Rgb([250, 10, 10]));
        let frame =
            crate::quantize::quantize(&bitmap, crate::quantize::ColorMode::BlackRedWhite).unwrap();

        device.init().unwrap();
        device.load_frame(&frame).unwrap();
        device.refresh(RefreshMode::Full).unwrap();

        let written = image::open(dir.path().join("panel.png")).unwrap().to_rgb8();
        assert_eq!(written.dimensions(), (16, 8));
        assert_eq!(*written.get_pixel(0, 0), image::Rgb([255, 0, 0]));
    }

    #[test]
    fn refresh_without_a_frame_fails() {
        let dir = tempfile::tempdir().unwrap();
        let mut device = SimulatorDevice::new(&config(dir.path()));

        assert!(matches!(
            device.refresh(RefreshMode::Full),
            Err(DeviceError::NothingLoaded)
        ));
    }

    #[test]
    fn clear_writes_the_background() {
        let dir = tempfile::tempdir().unwrap();
        let mut device = SimulatorDevice::new(&config(dir.path()));

        device.clear().unwrap();

        let written = image::open(dir.path().join("panel.png")).unwrap().to_rgb8();
        assert!(written.pixels().all(|p| *p == image::Rgb([255, 255, 255])));
    }

    #[test]
    fn mismatched_frame_is_rejected() {
        let dir = tempfile::tempdir().unwrap();
        let mut device = SimulatorDevice::new(&config(dir.path()));

        let bitmap = image::RgbImage::from_pixel(4, 4, image::Rgb([0, 0, 0]));
        let frame =
            crate::quantize::quantize(&bitmap, crate::quantize::ColorMode::BlackRedWhite).unwrap();

        assert!(matches!(
            device.load_frame(&frame),
            Err(DeviceError::FrameMismatch { .. })
        ));
    }
}
