//! Waveshare 7.5" v2 HAT binding over Linux SPI and GPIO character devices.
//!
//! The epd-waveshare driver owns the register protocol; this adapter only
//! packs frames into the panel's 1bpp layout and forwards the command set.

use epd_waveshare::epd7in5_v2::{Epd7in5, HEIGHT, WIDTH};
use epd_waveshare::prelude::WaveshareDisplay;
use linux_embedded_hal::gpio_cdev::{Chip, LineRequestFlags};
use linux_embedded_hal::spidev::{SpiModeFlags, SpidevOptions};
use linux_embedded_hal::{CdevPin, Delay, SpidevDevice};

use crate::device::{DeviceError, PanelDevice, PanelProfile, RefreshMode};

const SPI_SPEED_HZ: u32 = 4_000_000;

const PROFILE: PanelProfile = PanelProfile {
    name: "epd7in5-v2",
    width: WIDTH,
    height: HEIGHT,
    color_mode: crate::quantize::ColorMode::Grayscale { levels: 2 },
    supports_partial: false,
};

pub struct WaveshareDevice {
    spi: SpidevDevice,
    delay: Delay,
    epd: Epd7in5<SpidevDevice, CdevPin, CdevPin, CdevPin, Delay>,
}

fn transport(operation: &'static str, details: impl std::fmt::Display) -> DeviceError {
    DeviceError::Transport {
        operation,
        details: details.to_string(),
    }
}

impl WaveshareDevice {
    pub fn open(config: &crate::config::SpiConfig) -> Result<Self, DeviceError> {
        let mut spi = SpidevDevice::open(config.bus.as_std_path())
            .map_err(|error| transport("spi-open", error))?;
        let options = SpidevOptions::new()
            .bits_per_word(8)
            .max_speed_hz(SPI_SPEED_HZ)
            .mode(SpiModeFlags::SPI_MODE_0)
            .build();
        spi.0
            .configure(&options)
            .map_err(|error| transport("spi-configure", error))?;

        let mut chip = Chip::new(config.chip.as_std_path())
            .map_err(|error| transport("gpio-open", error))?;
        let busy = request_pin(&mut chip, config.busy_pin, LineRequestFlags::INPUT, 0)?;
        let dc = request_pin(&mut chip, config.dc_pin, LineRequestFlags::OUTPUT, 0)?;
        let rst = request_pin(&mut chip, config.reset_pin, LineRequestFlags::OUTPUT, 1)?;

        let mut delay = Delay {};
        let epd = Epd7in5::new(&mut spi, busy, dc, rst, &mut delay, None)
            .map_err(|error| transport("init", format!("{error:?}")))?;

        tracing::info!(bus = %config.bus, "Opened Waveshare 7.5\" v2 panel");
        Ok(Self { spi, delay, epd })
    }
}

fn request_pin(
    chip: &mut Chip,
    offset: u32,
    flags: LineRequestFlags,
    default: u8,
) -> Result<CdevPin, DeviceError> {
    let handle = chip
        .get_line(offset)
        .map_err(|error| transport("gpio-line", error))?
        .request(flags, default, "epaper-panel")
        .map_err(|error| transport("gpio-request", error))?;
    CdevPin::new(handle).map_err(|error| transport("gpio-pin", error))
}

// 1bpp, MSB first, one bit per pixel with 1 = white (the driver's
// background convention).
fn pack_frame(frame: &crate::quantize::FrameBuffer) -> Vec<u8> {
    let row_bytes = (frame.width() as usize + 7) / 8;
    let mut buffer = vec![0u8; row_bytes * frame.height() as usize];

    for y in 0..frame.height() {
        for x in 0..frame.width() {
            if is_light(frame.color_mode(), frame.pixel(x, y)) {
                buffer[y as usize * row_bytes + (x / 8) as usize] |= 0x80 >> (x % 8);
            }
        }
    }

    buffer
}

fn is_light(mode: crate::quantize::ColorMode, color: crate::quantize::PanelColor) -> bool {
    use crate::quantize::{ColorMode, PanelColor};
    match color {
        PanelColor::White => true,
        // Red content stays visible as dark pixels on a monochrome panel.
        PanelColor::Black | PanelColor::Red => false,
        PanelColor::Gray(level) => match mode {
            ColorMode::Grayscale { levels } => u16::from(level) * 2 >= u16::from(levels),
            ColorMode::BlackRedWhite => level > 0,
        },
    }
}

impl PanelDevice for WaveshareDevice {
    fn profile(&self) -> PanelProfile {
        PROFILE
    }

    fn init(&mut self) -> Result<(), DeviceError> {
        self.epd
            .wake_up(&mut self.spi, &mut self.delay)
            .map_err(|error| transport("wake", format!("{error:?}")))
    }

    fn load_frame(&mut self, frame: &crate::quantize::FrameBuffer) -> Result<(), DeviceError> {
        if (frame.width(), frame.height()) != (PROFILE.width, PROFILE.height) {
            return Err(DeviceError::FrameMismatch {
                frame_width: frame.width(),
                frame_height: frame.height(),
                panel_width: PROFILE.width,
                panel_height: PROFILE.height,
            });
        }

        let buffer = pack_frame(frame);
        self.epd
            .update_frame(&mut self.spi, &buffer, &mut self.delay)
            .map_err(|error| transport("load", format!("{error:?}")))
    }

    fn refresh(&mut self, _mode: RefreshMode) -> Result<(), DeviceError> {
        // The v2 driver exposes no partial LUT; every refresh is full.
        self.epd
            .display_frame(&mut self.spi, &mut self.delay)
            .map_err(|error| transport("refresh", format!("{error:?}")))
    }

    fn clear(&mut self) -> Result<(), DeviceError> {
        self.epd
            .clear_frame(&mut self.spi, &mut self.delay)
            .map_err(|error| transport("clear", format!("{error:?}")))?;
        self.epd
            .display_frame(&mut self.spi, &mut self.delay)
            .map_err(|error| transport("clear-refresh", format!("{error:?}")))
    }

    fn sleep(&mut self) -> Result<(), DeviceError> {
        self.epd
            .sleep(&mut self.spi, &mut self.delay)
            .map_err(|error| transport("sleep", format!("{error:?}")))
    }
}
