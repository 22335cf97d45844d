#[derive(Debug, serde::Deserialize)]
pub struct Config {
    pub capture: CaptureConfig,
    pub panel: PanelConfig,
    #[serde(default)]
    pub schedule: ScheduleConfig,
}

#[derive(Debug, Clone, serde::Deserialize)]
pub struct CaptureConfig {
    /// Page to render onto the panel.
    pub url: String,

    #[serde(default = "default_browser")]
    pub browser: camino::Utf8PathBuf,

    /// Page-load timeout.
    #[serde(with = "humantime_serde", default = "default_load_timeout")]
    pub load_timeout: std::time::Duration,

    /// Wait after load so lazy client-side content finishes rendering.
    #[serde(with = "humantime_serde", default = "default_settle_delay")]
    pub settle_delay: std::time::Duration,
}

#[derive(Debug, serde::Deserialize)]
pub struct PanelConfig {
    pub device: DeviceKind,

    #[serde(default)]
    pub orientation: Orientation,

    #[serde(default)]
    pub alignment: Alignment,

    #[serde(default)]
    pub quantize_at: QuantizePhase,

    #[serde(with = "humantime_serde", default = "default_refresh_timeout")]
    pub refresh_timeout: std::time::Duration,

    #[serde(default)]
    pub simulator: SimulatorConfig,

    #[cfg(feature = "hardware")]
    #[serde(default)]
    pub spi: SpiConfig,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum DeviceKind {
    Simulator,
    #[serde(rename = "epd7in5-v2")]
    Epd7in5V2,
}

#[derive(Debug, Clone, Copy, Default, serde::Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum Orientation {
    #[default]
    Landscape,
    Portrait,
}

impl From<Orientation> for crate::compose::Orientation {
    fn from(value: Orientation) -> Self {
        match value {
            Orientation::Landscape => crate::compose::Orientation::Landscape,
            Orientation::Portrait => crate::compose::Orientation::Portrait,
        }
    }
}

#[derive(Debug, Clone, Copy, Default, serde::Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum Alignment {
    #[default]
    BottomLeft,
    Origin,
}

impl From<Alignment> for crate::compose::Alignment {
    fn from(value: Alignment) -> Self {
        match value {
            Alignment::BottomLeft => crate::compose::Alignment::BottomLeft,
            Alignment::Origin => crate::compose::Alignment::Origin,
        }
    }
}

#[derive(Debug, Clone, Copy, Default, serde::Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum QuantizePhase {
    #[default]
    Scaled,
    FullResolution,
}

impl From<QuantizePhase> for crate::compose::QuantizePhase {
    fn from(value: QuantizePhase) -> Self {
        match value {
            QuantizePhase::Scaled => crate::compose::QuantizePhase::Scaled,
            QuantizePhase::FullResolution => crate::compose::QuantizePhase::FullResolution,
        }
    }
}

#[derive(Debug, Clone, Copy, Default, serde::Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum ColorModeConfig {
    /// 16-level grayscale, IT8951-class panels.
    #[default]
    Gray16,
    /// Plain black/white.
    Bw,
    BlackRedWhite,
}

impl From<ColorModeConfig> for crate::quantize::ColorMode {
    fn from(value: ColorModeConfig) -> Self {
        match value {
            ColorModeConfig::Gray16 => crate::quantize::ColorMode::Grayscale { levels: 16 },
            ColorModeConfig::Bw => crate::quantize::ColorMode::Grayscale { levels: 2 },
            ColorModeConfig::BlackRedWhite => crate::quantize::ColorMode::BlackRedWhite,
        }
    }
}

#[derive(Debug, Clone, serde::Deserialize)]
pub struct SimulatorConfig {
    #[serde(default = "default_simulator_width")]
    pub width: u32,

    #[serde(default = "default_simulator_height")]
    pub height: u32,

    #[serde(default)]
    pub color_mode: ColorModeConfig,

    /// Where the simulated panel writes its frame.
    #[serde(default = "default_simulator_output")]
    pub output: camino::Utf8PathBuf,
}

impl Default for SimulatorConfig {
    fn default() -> Self {
        Self {
            width: default_simulator_width(),
            height: default_simulator_height(),
            color_mode: ColorModeConfig::default(),
            output: default_simulator_output(),
        }
    }
}

#[cfg(feature = "hardware")]
#[derive(Debug, Clone, serde::Deserialize)]
pub struct SpiConfig {
    #[serde(default = "default_spi_bus")]
    pub bus: camino::Utf8PathBuf,

    #[serde(default = "default_gpio_chip")]
    pub chip: camino::Utf8PathBuf,

    #[serde(default = "default_reset_pin")]
    pub reset_pin: u32,

    #[serde(default = "default_dc_pin")]
    pub dc_pin: u32,

    #[serde(default = "default_busy_pin")]
    pub busy_pin: u32,
}

#[cfg(feature = "hardware")]
impl Default for SpiConfig {
    fn default() -> Self {
        Self {
            bus: default_spi_bus(),
            chip: default_gpio_chip(),
            reset_pin: default_reset_pin(),
            dc_pin: default_dc_pin(),
            busy_pin: default_busy_pin(),
        }
    }
}

#[derive(Debug, Clone, serde::Deserialize)]
pub struct ScheduleConfig {
    /// Five-field cron expression; absent means run exactly once.
    #[serde(default)]
    pub cron: Option<String>,

    /// How long shutdown waits for an in-flight cycle before proceeding to
    /// best-effort cleanup.
    #[serde(with = "humantime_serde", default = "default_grace_period")]
    pub grace_period: std::time::Duration,
}

impl Default for ScheduleConfig {
    fn default() -> Self {
        Self {
            cron: None,
            grace_period: default_grace_period(),
        }
    }
}

fn default_browser() -> camino::Utf8PathBuf {
    camino::Utf8PathBuf::from("/usr/bin/chromium-browser")
}

fn default_load_timeout() -> std::time::Duration {
    std::time::Duration::from_secs(60)
}

fn default_settle_delay() -> std::time::Duration {
    std::time::Duration::from_secs(18)
}

fn default_refresh_timeout() -> std::time::Duration {
    std::time::Duration::from_secs(90)
}

fn default_simulator_width() -> u32 {
    1200
}

fn default_simulator_height() -> u32 {
    825
}

fn default_simulator_output() -> camino::Utf8PathBuf {
    camino::Utf8PathBuf::from("panel.png")
}

#[cfg(feature = "hardware")]
fn default_spi_bus() -> camino::Utf8PathBuf {
    camino::Utf8PathBuf::from("/dev/spidev0.0")
}

#[cfg(feature = "hardware")]
fn default_gpio_chip() -> camino::Utf8PathBuf {
    camino::Utf8PathBuf::from("/dev/gpiochip0")
}

#[cfg(feature = "hardware")]
fn default_reset_pin() -> u32 {
    17
}

#[cfg(feature = "hardware")]
fn default_dc_pin() -> u32 {
    25
}

#[cfg(feature = "hardware")]
fn default_busy_pin() -> u32 {
    24
}

fn default_grace_period() -> std::time::Duration {
    std::time::Duration::from_secs(30)
}

impl Config {
    pub async fn load(path: &camino::Utf8Path) -> Result<Self, ConfigError> {
        let config_str =
            tokio::fs::read_to_string(path)
                .await
                .map_err(|source| ConfigError::ReadingFile {
                    path: path.to_path_buf(),
                    source,
                })?;

        toml::from_str(&config_str).map_err(ConfigError::ParsingConfig)
    }
}

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Failed to read configuration file from path '{}'", .path)]
    ReadingFile {
        path: camino::Utf8PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error(transparent)]
    ParsingConfig(#[from] toml::de::Error),
}
