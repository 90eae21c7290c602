//! Screenshot normalization, diffing and the archive decision.
//!
//! Everything here except the load/save helpers is a pure function over
//! in-memory images, so the comparison can be exercised without touching disk.

pub mod color;
pub mod decision;
pub mod diff;
pub mod normalize;

use std::io::Cursor;
use std::path::Path;

use image::{ImageFormat, RgbImage, RgbaImage};
use tracing::debug;

use crate::error::PipelineError;

pub use color::{Color, ColorError, Fuzz};
pub use decision::{decide, Decision, Thresholds};
pub use diff::{diff, DiffResult, DiffSettings};
pub use normalize::{normalize, MaskingError, MaskingRule, MaskingRules};

/// Load an image from disk as RGBA.
pub fn load_image(path: &Path) -> Result<RgbaImage, PipelineError> {
    let img = image::open(path).map_err(|source| PipelineError::Image {
        path: path.to_path_buf(),
        source,
    })?;
    debug!("Loaded {:?}: {}x{}", path, img.width(), img.height());
    Ok(img.to_rgba8())
}

/// Decode image bytes (e.g. a downloaded reference) as RGBA.
pub fn decode_image(bytes: &[u8]) -> Result<RgbaImage, image::ImageError> {
    Ok(image::load_from_memory(bytes)?.to_rgba8())
}

pub fn save_png(img: &RgbImage, path: &Path) -> Result<(), PipelineError> {
    img.save_with_format(path, ImageFormat::Png)
        .map_err(|source| PipelineError::Image {
            path: path.to_path_buf(),
            source,
        })
}

/// Encode to PNG in memory.
pub fn encode_png(img: &RgbaImage) -> Result<Vec<u8>, image::ImageError> {
    let mut buffer = Cursor::new(Vec::new());
    img.write_to(&mut buffer, ImageFormat::Png)?;
    Ok(buffer.into_inner())
}
