//! Image file I/O and size parsing.

use std::path::Path;

use anyhow::{anyhow, Context};

use svdsteg_core::ImageData;

/// Decode any supported image file into an RGBA buffer.
pub fn load(path: &Path) -> anyhow::Result<ImageData> {
    let rgba = image::open(path)
        .with_context(|| format!("Failed to open image {}", path.display()))?
        .into_rgba8();
    let (width, height) = rgba.dimensions();
    Ok(ImageData::from_rgba(width, height, rgba.into_raw())?)
}

/// Write an RGBA buffer as PNG. Lossy formats would destroy the hidden bits.
pub fn save_png(path: &Path, image: &ImageData) -> anyhow::Result<()> {
    let buffer = image::RgbaImage::from_raw(image.width, image.height, image.data.clone())
        .ok_or_else(|| anyhow!("pixel buffer does not match {}x{}", image.width, image.height))?;
    buffer
        .save_with_format(path, image::ImageFormat::Png)
        .with_context(|| format!("Failed to write {}", path.display()))?;
    Ok(())
}

/// Parse `WIDTHxHEIGHT`.
pub fn parse_size(s: &str) -> Result<(u32, u32), String> {
    let (w, h) = s
        .split_once(['x', 'X'])
        .ok_or_else(|| format!("expected WIDTHxHEIGHT, got '{}'", s))?;
    let parse = |v: &str| {
        v.trim()
            .parse::<u32>()
            .map_err(|e| format!("bad dimension '{}': {}", v, e))
    };
    Ok((parse(w)?, parse(h)?))
}
