//! Composes a captured bitmap into a frame sized for the panel geometry:
//! rotation for the physical mounting, downscale-only fitting, and alignment
//! onto a fully rewritten background canvas.

/// Physical mounting of the panel relative to the rendered page's natural
/// landscape orientation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Orientation {
    Landscape,
    Portrait,
}

/// Where the scaled image sits inside the frame. One documented constant per
/// deployment, never inferred per image.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Alignment {
    /// Flush to the bottom-left corner of the frame.
    BottomLeft,
    /// Pasted at the coordinate origin, covering the frame from the top-left.
    Origin,
}

/// Whether color classification happens on the full-resolution capture or on
/// the already scaled frame.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum QuantizePhase {
    /// Smooth downscale first, classify after.
    Scaled,
    /// Classify at capture resolution, then downscale nearest-neighbor so the
    /// alphabet survives the resize.
    FullResolution,
}

#[derive(Debug, Clone, Copy)]
pub struct ComposePolicy {
    pub alignment: Alignment,
    pub quantize_at: QuantizePhase,
}

/// Pixel geometry and color alphabet of the attached panel. Fixed at startup,
/// never mutated during a run.
#[derive(Debug, Clone, Copy)]
pub struct PanelGeometry {
    pub width: u32,
    pub height: u32,
    pub orientation: Orientation,
    pub color_mode: crate::quantize::ColorMode,
}

impl PanelGeometry {
    /// Viewport requested from the capture collaborator: the panel dimensions
    /// before the portrait rotation is applied.
    pub fn viewport(&self) -> crate::capture::Viewport {
        match self.orientation {
            Orientation::Landscape => crate::capture::Viewport {
                width: self.width,
                height: self.height,
            },
            Orientation::Portrait => crate::capture::Viewport {
                width: self.height,
                height: self.width,
            },
        }
    }
}

#[derive(Debug, thiserror::Error)]
pub enum ComposeError {
    #[error("Failed to decode captured image '{path}'")]
    Decode {
        path: camino::Utf8PathBuf,
        #[source]
        source: image::ImageError,
    },

    #[error(transparent)]
    UnsupportedImageFormat(#[from] crate::quantize::QuantizeError),
}

/// Decodes a captured screenshot from disk into an RGB bitmap.
pub fn decode(path: &std::path::Path) -> Result<image::RgbImage, ComposeError> {
    let bitmap = image::open(path).map_err(|source| ComposeError::Decode {
        path: camino::Utf8PathBuf::from(path.display().to_string()),
        source,
    })?;

    crate::quantize::ensure_supported(&bitmap)?;

    Ok(bitmap.to_rgb8())
}

/// Builds the frame canvas: rotate, fit, align. The canvas is exactly
/// `geometry.width x geometry.height` and is fully overwritten each call;
/// uncovered area is the panel background (white).
pub fn compose(
    bitmap: &image::RgbImage,
    geometry: &PanelGeometry,
    policy: ComposePolicy,
) -> Result<image::RgbImage, ComposeError> {
    let source = match policy.quantize_at {
        QuantizePhase::Scaled => bitmap.clone(),
        QuantizePhase::FullResolution => crate::quantize::snap(bitmap, geometry.color_mode)?,
    };

    // Rotation direction is fixed by the physical mounting: counter-clockwise,
    // so the top of the page faces the panel's left edge.
    let source = match geometry.orientation {
        Orientation::Landscape => source,
        Orientation::Portrait => image::imageops::rotate270(&source),
    };

    let (scaled_width, scaled_height) =
        fit_within(source.dimensions(), (geometry.width, geometry.height));
    let scaled = if (scaled_width, scaled_height) == source.dimensions() {
        source
    } else {
        let filter = match policy.quantize_at {
            QuantizePhase::Scaled => image::imageops::FilterType::Lanczos3,
            QuantizePhase::FullResolution => image::imageops::FilterType::Nearest,
        };
        image::imageops::resize(&source, scaled_width, scaled_height, filter)
    };

    let mut canvas = image::RgbImage::from_pixel(
        geometry.width,
        geometry.height,
        image::Rgb([255, 255, 255]),
    );

    let (x, y) = match policy.alignment {
        Alignment::BottomLeft => (0, i64::from(geometry.height) - i64::from(scaled_height)),
        Alignment::Origin => (0, 0),
    };
    image::imageops::replace(&mut canvas, &scaled, x, y);

    Ok(canvas)
}

// Downscale-only fit preserving aspect ratio; never upscales past the source.
fn fit_within((width, height): (u32, u32), (max_width, max_height): (u32, u32)) -> (u32, u32) {
    if width <= max_width && height <= max_height {
        return (width, height);
    }

    let ratio = (f64::from(max_width) / f64::from(width))
        .min(f64::from(max_height) / f64::from(height));

    (
        ((f64::from(width) * ratio) as u32).max(1),
        ((f64::from(height) * ratio) as u32).max(1),
    )
}
