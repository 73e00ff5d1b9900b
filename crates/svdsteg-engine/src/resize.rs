//! Resize engine: scales an RGBA buffer by a factor.

use image::imageops::{self, FilterType};
use image::RgbaImage;
use serde::{Deserialize, Serialize};
use tracing::debug;

use svdsteg_core::capacity::resized_dimension;
use svdsteg_core::{EngineConfig, Error, ImageData, ResizeFilter, Result};

use crate::engine::{CancelToken, Engine, EngineRequest, Tagged};

pub const RESIZE_REQUEST: &str = "resize";
pub const RESIZED: &str = "RESIZED";

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ResizeRequest {
    pub image: ImageData,
    pub scale: f64,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "msg", rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ResizeResponse {
    Resized { image: ImageData },
}

impl Tagged for ResizeRequest {
    fn tag(&self) -> &'static str {
        RESIZE_REQUEST
    }
}

impl EngineRequest for ResizeRequest {
    fn expected_response(&self) -> &'static str {
        RESIZED
    }
}

impl Tagged for ResizeResponse {
    fn tag(&self) -> &'static str {
        match self {
            Self::Resized { .. } => RESIZED,
        }
    }
}

/// Target size for scaling `width × height` by `scale`; never below 1×1.
pub fn scaled_dimensions(width: u32, height: u32, scale: f64) -> (u32, u32) {
    let dim = |d: u32| resized_dimension(d, scale).max(1);
    (dim(width), dim(height))
}

fn filter_type(filter: ResizeFilter) -> FilterType {
    match filter {
        ResizeFilter::Nearest => FilterType::Nearest,
        ResizeFilter::Triangle => FilterType::Triangle,
        ResizeFilter::CatmullRom => FilterType::CatmullRom,
        ResizeFilter::Lanczos3 => FilterType::Lanczos3,
    }
}

/// Resample `image` to `round(w·s) × round(h·s)`.
pub fn resize_image(image: &ImageData, scale: f64, filter: ResizeFilter) -> Result<ImageData> {
    if !scale.is_finite() || scale <= 0.0 {
        return Err(Error::InvalidParameter(format!(
            "resize scale must be positive, got {}",
            scale
        )));
    }
    let (width, height) = scaled_dimensions(image.width, image.height, scale);
    if width == image.width && height == image.height {
        return Ok(image.clone());
    }
    let source = RgbaImage::from_raw(image.width, image.height, image.data.clone()).ok_or_else(|| {
        Error::Image(format!(
            "buffer of {} bytes does not hold a {}x{} RGBA image",
            image.data.len(),
            image.width,
            image.height
        ))
    })?;
    let resized = imageops::resize(&source, width, height, filter_type(filter));
    ImageData::from_rgba(width, height, resized.into_raw())
}

/// Stateless engine; the filter comes from [`EngineConfig`].
pub struct ResizeEngine {
    filter: ResizeFilter,
}

impl ResizeEngine {
    pub fn new(config: &EngineConfig) -> Self {
        Self {
            filter: config.resize_filter,
        }
    }
}

impl Engine for ResizeEngine {
    type Request = ResizeRequest;
    type Response = ResizeResponse;

    fn handle(&mut self, request: ResizeRequest, cancel: &CancelToken) -> Result<ResizeResponse> {
        cancel.check()?;
        let image = resize_image(&request.image, request.scale, self.filter)?;
        debug!(
            "Resize engine: {}x{} -> {}x{} (scale {})",
            request.image.width, request.image.height, image.width, image.height, request.scale
        );
        Ok(ResizeResponse::Resized { image })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn gradient(width: u32, height: u32) -> ImageData {
        let mut data = Vec::new();
        for y in 0..height {
            for x in 0..width {
                data.extend_from_slice(&[(x * 10) as u8, (y * 10) as u8, 128, 255]);
            }
        }
        ImageData::from_rgba(width, height, data).unwrap()
    }

    #[test]
    fn test_scaled_dimensions_round() {
        assert_eq!(scaled_dimensions(600, 402, 0.5), (300, 201));
        assert_eq!(scaled_dimensions(5, 3, 0.25), (1, 1));
        assert_eq!(scaled_dimensions(3, 3, 0.5), (2, 2));
        assert_eq!(scaled_dimensions(10, 4, 2.25), (23, 9));
    }

    #[test]
    fn test_resize_changes_dimensions() {
        let img = gradient(10, 6);
        let out = resize_image(&img, 0.5, ResizeFilter::CatmullRom).unwrap();
        assert_eq!((out.width, out.height), (5, 3));
        assert_eq!(out.data.len(), 5 * 3 * 4);
    }

    #[test]
    fn test_nearest_preserves_flat_colour() {
        let img = ImageData::from_rgba(4, 4, [7u8, 8, 9, 255].repeat(16)).unwrap();
        let out = resize_image(&img, 2.0, ResizeFilter::Nearest).unwrap();
        assert_eq!((out.width, out.height), (8, 8));
        assert!(out.data.chunks(4).all(|p| p == [7, 8, 9, 255]));
    }

    #[test]
    fn test_unit_scale_is_identity() {
        let img = gradient(3, 2);
        assert_eq!(resize_image(&img, 1.0, ResizeFilter::Lanczos3).unwrap(), img);
    }

    #[test]
    fn test_rejects_bad_scale() {
        let img = gradient(3, 2);
        assert!(resize_image(&img, 0.0, ResizeFilter::Nearest).is_err());
        assert!(resize_image(&img, f64::NAN, ResizeFilter::Nearest).is_err());
    }

    #[test]
    fn test_engine_answers_with_resized_tag() {
        let mut engine = ResizeEngine::new(&EngineConfig::default());
        let request = ResizeRequest {
            image: gradient(4, 4),
            scale: 0.5,
        };
        assert_eq!(request.expected_response(), RESIZED);
        let response = engine.handle(request, &CancelToken::new()).unwrap();
        assert_eq!(response.tag(), RESIZED);
        let ResizeResponse::Resized { image } = response;
        assert_eq!((image.width, image.height), (2, 2));
    }

    #[test]
    fn test_engine_honours_cancel() {
        let mut engine = ResizeEngine::new(&EngineConfig::default());
        let cancel = CancelToken::new();
        cancel.cancel();
        let request = ResizeRequest {
            image: gradient(2, 2),
            scale: 2.0,
        };
        assert!(matches!(engine.handle(request, &cancel), Err(Error::Cancelled)));
    }
}
