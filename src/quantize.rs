//! Maps captured RGB bitmaps onto the discrete color alphabet an e-paper
//! panel can physically display.
//!
//! Bicolor panels cannot render blended shades, so anti-aliasing artifacts
//! from font/graphics rendering must be collapsed into hard colors before
//! transfer. The classifier is a fixed three-way threshold; quantization is
//! fully deterministic for a given input.

/// Color alphabets supported by the attached panel.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ColorMode {
    /// `levels` discrete gray values, 0 = black, `levels - 1` = white.
    Grayscale { levels: u8 },

    /// Black/red/white tri-color panels.
    BlackRedWhite,
}

impl ColorMode {
    /// The panel's blank/background color.
    pub fn background(self) -> PanelColor {
        match self {
            ColorMode::Grayscale { levels } => PanelColor::Gray(levels.saturating_sub(1)),
            ColorMode::BlackRedWhite => PanelColor::White,
        }
    }
}

/// One pixel restricted to a panel alphabet.
///
/// `Gray` carries the level index for grayscale modes; the named colors are
/// the tri-color alphabet.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PanelColor {
    Black,
    White,
    Red,
    Gray(u8),
}

impl PanelColor {
    /// Canonical RGB value of this panel color, for rendering a frame back
    /// into an ordinary raster (simulator output, pre-scale snapping).
    pub fn rgb(self, mode: ColorMode) -> [u8; 3] {
        match self {
            PanelColor::Black => [0, 0, 0],
            PanelColor::White => [255, 255, 255],
            PanelColor::Red => [255, 0, 0],
            PanelColor::Gray(level) => {
                let steps = match mode {
                    ColorMode::Grayscale { levels } => u32::from(levels.saturating_sub(1)).max(1),
                    ColorMode::BlackRedWhite => 1,
                };
                let value = (u32::from(level) * 255 / steps).min(255) as u8;
                [value, value, value]
            }
        }
    }
}

/// A frame with every pixel already restricted to the panel alphabet.
///
/// Built fresh each refresh cycle; its dimensions always equal the panel
/// geometry it was composed for.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FrameBuffer {
    width: u32,
    height: u32,
    color_mode: ColorMode,
    pixels: Vec<PanelColor>,
}

impl FrameBuffer {
    pub fn width(&self) -> u32 {
        self.width
    }

    pub fn height(&self) -> u32 {
        self.height
    }

    pub fn color_mode(&self) -> ColorMode {
        self.color_mode
    }

    pub fn pixel(&self, x: u32, y: u32) -> PanelColor {
        self.pixels[(y * self.width + x) as usize]
    }
}

#[derive(Debug, thiserror::Error)]
pub enum QuantizeError {
    #[error("Unsupported image format: zero dimensions ({width}x{height})")]
    UnsupportedImageFormat { width: u32, height: u32 },

    #[error("Unsupported image format: channel depth is not 8 bit")]
    UnsupportedChannelDepth,

    #[error("Unsupported color mode: grayscale needs at least 2 levels, got {levels}")]
    UnsupportedLevelCount { levels: u8 },
}

// Fixed thresholds of the tri-color classifier. Intermediate shades from
// anti-aliased rendering land on white unless both chroma channels are low.
const RED_CHANNEL_SPLIT: u8 = 230;
const CHROMA_MAX: u8 = 135;

/// Classifies a single RGB sample into the given alphabet.
pub fn classify(mode: ColorMode, [r, g, b]: [u8; 3]) -> Result<PanelColor, QuantizeError> {
    match mode {
        ColorMode::BlackRedWhite => Ok(classify_tricolor(r, g, b)),
        ColorMode::Grayscale { levels } => {
            if levels < 2 {
                return Err(QuantizeError::UnsupportedLevelCount { levels });
            }
            Ok(PanelColor::Gray(gray_level(luma(r, g, b), levels)))
        }
    }
}

fn classify_tricolor(r: u8, g: u8, b: u8) -> PanelColor {
    if g <= CHROMA_MAX && b <= CHROMA_MAX {
        if r <= RED_CHANNEL_SPLIT {
            PanelColor::Black
        } else {
            PanelColor::Red
        }
    } else {
        PanelColor::White
    }
}

// Integer Rec.601 luma, matching the rounding of the original renderer.
fn luma(r: u8, g: u8, b: u8) -> u8 {
    ((u32::from(r) * 299 + u32::from(g) * 587 + u32::from(b) * 114) / 1000) as u8
}

fn gray_level(luma: u8, levels: u8) -> u8 {
    let steps = u32::from(levels - 1);
    ((u32::from(luma) * steps + 127) / 255) as u8
}

/// Quantizes a full bitmap into a [`FrameBuffer`]-compatible pixel grid.
pub fn quantize(
    bitmap: &image::RgbImage,
    mode: ColorMode,
) -> Result<FrameBuffer, QuantizeError> {
    let (width, height) = bitmap.dimensions();
    if width == 0 || height == 0 {
        return Err(QuantizeError::UnsupportedImageFormat { width, height });
    }

    let mut pixels = Vec::with_capacity((width * height) as usize);
    for pixel in bitmap.pixels() {
        pixels.push(classify(mode, pixel.0)?);
    }

    Ok(FrameBuffer {
        width,
        height,
        color_mode: mode,
        pixels,
    })
}

/// Replaces every pixel with the canonical RGB value of its panel color.
///
/// Used by the full-resolution composition policy: classification happens at
/// capture resolution, and the snapped image survives a nearest-neighbor
/// downscale with its alphabet intact.
pub fn snap(
    bitmap: &image::RgbImage,
    mode: ColorMode,
) -> Result<image::RgbImage, QuantizeError> {
    let (width, height) = bitmap.dimensions();
    if width == 0 || height == 0 {
        return Err(QuantizeError::UnsupportedImageFormat { width, height });
    }

    let mut snapped = image::RgbImage::new(width, height);
    for (source, target) in bitmap.pixels().zip(snapped.pixels_mut()) {
        *target = image::Rgb(classify(mode, source.0)?.rgb(mode));
    }

    Ok(snapped)
}

/// Rejects captures the pipeline cannot faithfully quantize: zero-sized
/// bitmaps and non-8-bit channel depths are never silently coerced.
pub fn ensure_supported(bitmap: &image::DynamicImage) -> Result<(), QuantizeError> {
    let (width, height) = (bitmap.width(), bitmap.height());
    if width == 0 || height == 0 {
        return Err(QuantizeError::UnsupportedImageFormat { width, height });
    }

    use image::DynamicImage;
    match bitmap {
        DynamicImage::ImageLuma8(_)
        | DynamicImage::ImageLumaA8(_)
        | DynamicImage::ImageRgb8(_)
        | DynamicImage::ImageRgba8(_) => Ok(()),
        _ => Err(QuantizeError::UnsupportedChannelDepth),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const BWR: ColorMode = ColorMode::BlackRedWhite;
    const GRAY16: ColorMode = ColorMode::Grayscale { levels: 16 };

    #[test]
    fn tricolor_classification_vectors() {
        assert_eq!(classify(BWR, [10, 10, 10]).unwrap(), PanelColor::Black);
        assert_eq!(classify(BWR, [250, 10, 10]).unwrap(), PanelColor::Red);
        assert_eq!(classify(BWR, [250, 250, 250]).unwrap(), PanelColor::White);
        // Satisfies neither the black nor the red predicate.
        assert_eq!(classify(BWR, [200, 140, 140]).unwrap(), PanelColor::White);
    }

    #[test]
    fn tricolor_boundary_prefers_black() {
        // r == 230 satisfies both predicates; black wins.
        assert_eq!(classify(BWR, [230, 135, 135]).unwrap(), PanelColor::Black);
        assert_eq!(classify(BWR, [231, 135, 135]).unwrap(), PanelColor::Red);
        assert_eq!(classify(BWR, [230, 136, 135]).unwrap(), PanelColor::White);
    }

    #[test]
    fn grayscale_endpoints_and_midpoint() {
        assert_eq!(classify(GRAY16, [0, 0, 0]).unwrap(), PanelColor::Gray(0));
        assert_eq!(
            classify(GRAY16, [255, 255, 255]).unwrap(),
            PanelColor::Gray(15)
        );
        // luma(128,128,128) = 128 -> level (128*15 + 127) / 255 = 8
        assert_eq!(
            classify(GRAY16, [128, 128, 128]).unwrap(),
            PanelColor::Gray(8)
        );
    }

    #[test]
    fn single_level_grayscale_is_rejected() {
        assert!(matches!(
            classify(ColorMode::Grayscale { levels: 1 }, [0, 0, 0]),
            Err(QuantizeError::UnsupportedLevelCount { levels: 1 })
        ));
    }

    #[test]
    fn zero_dimension_bitmap_is_rejected() {
        let empty = image::RgbImage::new(0, 12);
        assert!(matches!(
            quantize(&empty, GRAY16),
            Err(QuantizeError::UnsupportedImageFormat {
                width: 0,
                height: 12
            })
        ));
    }

    #[test]
    fn sixteen_bit_depth_is_rejected() {
        let deep = image::DynamicImage::ImageRgb16(image::ImageBuffer::new(4, 4));
        assert!(matches!(
            ensure_supported(&deep),
            Err(QuantizeError::UnsupportedChannelDepth)
        ));
    }

    #[test]
    fn quantization_is_deterministic() {
        let bitmap = image::RgbImage::from_fn(31, 17, |x, y| {
            image::Rgb([(x * 8) as u8, (y * 13) as u8, ((x + y) * 5) as u8])
        });

        let first = quantize(&bitmap, BWR).unwrap();
        let second = quantize(&bitmap, BWR).unwrap();
        assert_eq!(first, second);
    }

    proptest::proptest! {
        #![proptest_config(proptest::prelude::ProptestConfig::with_cases(64))]

        #[test]
        fn tricolor_output_stays_in_alphabet(r: u8, g: u8, b: u8) {
            let color = classify(BWR, [r, g, b]).unwrap();
            proptest::prop_assert!(matches!(
                color,
                PanelColor::Black | PanelColor::White | PanelColor::Red
            ));
        }

        #[test]
        fn gray_levels_stay_in_range(r: u8, g: u8, b: u8) {
            let PanelColor::Gray(level) = classify(GRAY16, [r, g, b]).unwrap() else {
                panic!("grayscale quantization produced a non-gray pixel");
            };
            proptest::prop_assert!(level < 16);
        }

        #[test]
        fn snapping_is_idempotent_under_quantization(seed: u8) {
            let bitmap = image::RgbImage::from_fn(9, 7, |x, y| {
                image::Rgb([
                    seed.wrapping_mul(x as u8 + 1),
                    seed.wrapping_add((y * 31) as u8),
                    seed ^ (x + y) as u8,
                ])
            });

            let snapped = snap(&bitmap, BWR).unwrap();
            proptest::prop_assert_eq!(
                quantize(&bitmap, BWR).unwrap(),
                quantize(&snapped, BWR).unwrap()
            );
        }
    }
}
