//! Steganography engine: packs a rank-K factor pair per colour channel
//! into the low bits of a cover image and unpacks it again.
//!
//! Payload layout: width, height and rank as 16-bit values, then for each
//! of R, G, B the left factor bytes followed by the right factor bytes,
//! every 16-bit entry little-endian.

use ndarray::{Array2, ShapeBuilder};
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use svdsteg_core::capacity::{MAX_LSB, METADATA_BYTES, MIN_LSB};
use svdsteg_core::{Error, ImageData, Result, Rgb};

use crate::engine::{CancelToken, Engine, EngineRequest, Tagged};
use crate::lsb::{capacity_bits, LsbReader, LsbWriter};
use crate::svd::RHS_SCALE;

pub const ENCODE: &str = "encode";
pub const DECODE: &str = "decode";
pub const ENCODED: &str = "ENCODED";
pub const DECODED: &str = "DECODED";

pub const ENCODE_CAPACITY_MESSAGE: &str =
    "Cover image not large enough to hold hidden image! Adjust the image parameters until it fits!";
pub const DECODE_CAPACITY_MESSAGE: &str =
    "Cover image not large enough to hold hidden image! Has the hidden image actually been encoded?";

const HEADER_FIELD_BITS: u32 = 16;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EncodeRequest {
    pub cover: ImageData,
    pub lhs: Rgb<Vec<u16>>,
    pub rhs: Rgb<Vec<u16>>,
    pub rank: u32,
    pub max_lsb: u32,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "msg", rename_all = "lowercase")]
pub enum StegRequest {
    Encode(EncodeRequest),
    Decode { image: ImageData },
}

/// Capacity problems come back as an empty payload plus `error`, never as
/// an `Err`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "msg", rename_all = "UPPERCASE")]
pub enum StegResponse {
    Encoded {
        data: Vec<u8>,
        error: Option<String>,
    },
    Decoded {
        data: Vec<u8>,
        width: u32,
        height: u32,
        error: Option<String>,
    },
}

impl Tagged for StegRequest {
    fn tag(&self) -> &'static str {
        match self {
            Self::Encode(_) => ENCODE,
            Self::Decode { .. } => DECODE,
        }
    }
}

impl EngineRequest for StegRequest {
    fn expected_response(&self) -> &'static str {
        match self {
            Self::Encode(_) => ENCODED,
            Self::Decode { .. } => DECODED,
        }
    }
}

impl Tagged for StegResponse {
    fn tag(&self) -> &'static str {
        match self {
            Self::Encoded { .. } => ENCODED,
            Self::Decoded { .. } => DECODED,
        }
    }
}

/// Bytes needed to carry a `width × height` image at `rank`.
pub fn payload_bytes(width: u64, height: u64, rank: u64) -> u64 {
    (width + height) * rank * 3 * 2 + METADATA_BYTES
}

fn header_value(name: &str, value: usize) -> Result<u32> {
    if value > u16::MAX as usize {
        return Err(Error::InvalidParameter(format!(
            "{} {} does not fit the 16-bit header",
            name, value
        )));
    }
    Ok(value as u32)
}

/// Hide the factors in a copy of the cover's pixels.
pub fn encode(request: &EncodeRequest, cancel: &CancelToken) -> Result<Vec<u8>> {
    let EncodeRequest {
        cover,
        lhs,
        rhs,
        rank,
        max_lsb,
    } = request;
    cover.check()?;
    if !(MIN_LSB..=MAX_LSB).contains(max_lsb) {
        return Err(Error::InvalidParameter(format!(
            "max LSB {} outside [{}, {}]",
            max_lsb, MIN_LSB, MAX_LSB
        )));
    }
    let rank = *rank as usize;
    if rank == 0 || lhs.red.len() % rank != 0 || rhs.red.len() % rank != 0 {
        return Err(Error::InvalidParameter(format!(
            "factor lengths {}/{} do not divide by rank {}",
            lhs.red.len(),
            rhs.red.len(),
            rank
        )));
    }
    let height = lhs.red.len() / rank;
    let width = rhs.red.len() / rank;
    if lhs.iter().any(|c| c.len() != height * rank) || rhs.iter().any(|c| c.len() != width * rank) {
        return Err(Error::InvalidParameter(
            "colour channels carry factors of different shapes".into(),
        ));
    }

    let available = capacity_bits(cover.pixel_count(), *max_lsb) as u64 / 8;
    let needed = payload_bytes(width as u64, height as u64, rank as u64);
    if needed > available {
        debug!(
            "Steg engine: payload {} bytes exceeds capacity {} bytes",
            needed, available
        );
        return Err(Error::Capacity(ENCODE_CAPACITY_MESSAGE.into()));
    }

    let mut data = cover.data.clone();
    let mut writer = LsbWriter::new(&mut data, *max_lsb);
    writer.put_bits(header_value("width", width)?, HEADER_FIELD_BITS)?;
    writer.put_bits(header_value("height", height)?, HEADER_FIELD_BITS)?;
    writer.put_bits(header_value("rank", rank)?, HEADER_FIELD_BITS)?;
    for (left, right) in lhs.iter().zip(rhs.iter()) {
        cancel.check()?;
        for entry in left.iter().chain(right.iter()) {
            for byte in entry.to_le_bytes() {
                writer.put_byte(byte)?;
            }
        }
    }
    Ok(data)
}

fn read_factor(reader: &mut LsbReader<'_>, len: usize) -> Result<Vec<f64>> {
    (0..len)
        .map(|_| {
            let lo = reader.read_byte()?;
            let hi = reader.read_byte()?;
            Ok(i16::from_le_bytes([lo, hi]) as f64)
        })
        .collect()
}

/// Recover the hidden image from an encoded cover.
pub fn decode(image: &ImageData, cancel: &CancelToken) -> Result<ImageData> {
    image.check()?;
    let capacity_err = || Error::Capacity(DECODE_CAPACITY_MESSAGE.into());
    let mut reader = LsbReader::new(&image.data, MAX_LSB);
    let width = reader.read_bits(HEADER_FIELD_BITS).map_err(|_| capacity_err())? as usize;
    let height = reader.read_bits(HEADER_FIELD_BITS).map_err(|_| capacity_err())? as usize;
    let rank = reader.read_bits(HEADER_FIELD_BITS).map_err(|_| capacity_err())? as usize;

    let needed_bits = payload_bytes(width as u64, height as u64, rank as u64) * 8;
    let available_bits = capacity_bits(image.pixel_count(), MAX_LSB) as u64;
    if width == 0 || height == 0 || rank == 0 || needed_bits > available_bits {
        debug!(
            "Steg engine: header {}x{} rank {} does not fit {}x{}",
            width, height, rank, image.width, image.height
        );
        return Err(capacity_err());
    }

    let mut channels: Vec<Array2<f64>> = Vec::with_capacity(3);
    for _ in 0..3 {
        cancel.check()?;
        let lhs = read_factor(&mut reader, height * rank)?;
        let rhs: Vec<f64> = read_factor(&mut reader, rank * width)?
            .into_iter()
            .map(|x| x / RHS_SCALE)
            .collect();
        let lhs = Array2::from_shape_vec((height, rank).f(), lhs)
            .map_err(|e| Error::Worker(e.to_string()))?;
        let rhs = Array2::from_shape_vec((rank, width).f(), rhs)
            .map_err(|e| Error::Worker(e.to_string()))?;
        channels.push(lhs.dot(&rhs));
    }

    let mut data = Vec::with_capacity(width * height * 4);
    for y in 0..height {
        for x in 0..width {
            for channel in &channels {
                data.push(channel[(y, x)].round().clamp(0.0, 255.0) as u8);
            }
            data.push(255);
        }
    }
    ImageData::from_rgba(width as u32, height as u32, data)
}

/// Stateless; every request carries everything it needs.
#[derive(Debug, Default)]
pub struct StegEngine;

impl StegEngine {
    pub fn new() -> Self {
        Self
    }
}

impl Engine for StegEngine {
    type Request = StegRequest;
    type Response = StegResponse;

    fn handle(&mut self, request: StegRequest, cancel: &CancelToken) -> Result<StegResponse> {
        match request {
            StegRequest::Encode(request) => match encode(&request, cancel) {
                Ok(data) => Ok(StegResponse::Encoded { data, error: None }),
                Err(Error::Capacity(message)) => {
                    warn!("Steg engine: {}", message);
                    Ok(StegResponse::Encoded {
                        data: Vec::new(),
                        error: Some(message),
                    })
                }
                Err(e) => Err(e),
            },
            StegRequest::Decode { image } => match decode(&image, cancel) {
                Ok(decoded) => Ok(StegResponse::Decoded {
                    data: decoded.data,
                    width: decoded.width,
                    height: decoded.height,
                    error: None,
                }),
                Err(Error::Capacity(message)) => {
                    warn!("Steg engine: {}", message);
                    Ok(StegResponse::Decoded {
                        data: Vec::new(),
                        width: 0,
                        height: 0,
                        error: Some(message),
                    })
                }
                Err(e) => Err(e),
            },
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::svd::Factorization;

    fn cover(width: u32, height: u32) -> ImageData {
        let data = (0..width * height * 4)
            .map(|i| if i % 4 == 3 { 255 } else { (i * 13 % 256) as u8 })
            .collect();
        ImageData::from_rgba(width, height, data).unwrap()
    }

    fn hidden(width: u32, height: u32) -> ImageData {
        let mut data = Vec::new();
        for y in 0..height {
            for x in 0..width {
                data.extend_from_slice(&[(x * 20) as u8, (y * 30) as u8, ((x + y) * 10) as u8, 255]);
            }
        }
        ImageData::from_rgba(width, height, data).unwrap()
    }

    fn factors(image: &ImageData, rank: usize) -> (Rgb<Vec<u16>>, Rgb<Vec<u16>>) {
        let rows = image.height as usize;
        let cols = image.width as usize;
        let approx = image.to_channels().unwrap().map(|channel| {
            let mut f = Factorization::compute(&channel, rows, cols, &CancelToken::new())
                .unwrap();
            f.low_rank(rank)
        });
        (
            approx.as_ref().map(|a| a.lhs.clone()),
            approx.as_ref().map(|a| a.rhs.clone()),
        )
    }

    #[test]
    fn test_payload_bytes_scenario() {
        assert_eq!(payload_bytes(600, 402, 50), 300_606);
        assert_eq!(payload_bytes(600, 402, 400), 2_404_806);
    }

    #[test]
    fn test_encode_then_decode_recovers_hidden_image() {
        let secret = hidden(6, 5);
        let (lhs, rhs) = factors(&secret, 5);
        let request = EncodeRequest {
            cover: cover(24, 24),
            lhs,
            rhs,
            rank: 5,
            max_lsb: 2,
        };
        let cancel = CancelToken::new();
        let encoded = encode(&request, &cancel).unwrap();
        assert_eq!(encoded.len(), request.cover.data.len());
        // Only the two lowest bits of RGB bytes may change; alpha never does.
        for (i, (a, b)) in encoded.iter().zip(&request.cover.data).enumerate() {
            if i % 4 == 3 {
                assert_eq!(a, b);
            } else {
                assert_eq!(a & !0b11, b & !0b11);
            }
        }

        let encoded = ImageData::from_rgba(24, 24, encoded).unwrap();
        let decoded = decode(&encoded, &cancel).unwrap();
        assert_eq!((decoded.width, decoded.height), (6, 5));
        for (a, b) in decoded.data.iter().zip(&secret.data) {
            assert!((*a as i32 - *b as i32).abs() <= 2, "{} vs {}", a, b);
        }
    }

    #[test]
    fn test_exact_fit_is_accepted() {
        // 2x1 hidden at rank 1: (2 + 1) * 1 * 6 + 6 = 24 bytes = 192 bits.
        // A 8x8 cover at one bit per channel carries exactly 192 bits.
        let request = EncodeRequest {
            cover: cover(8, 8),
            lhs: Rgb::from_fn(|| vec![7u16]),
            rhs: Rgb::from_fn(|| vec![5000u16, 10000]),
            rank: 1,
            max_lsb: 1,
        };
        assert!(encode(&request, &CancelToken::new()).is_ok());
    }

    #[test]
    fn test_engine_reports_capacity_as_payload() {
        let mut engine = StegEngine::new();
        let request = StegRequest::Encode(EncodeRequest {
            cover: cover(4, 4),
            lhs: Rgb::from_fn(|| vec![0u16; 10 * 3]),
            rhs: Rgb::from_fn(|| vec![0u16; 3 * 10]),
            rank: 3,
            max_lsb: 1,
        });
        let response = engine.handle(request, &CancelToken::new()).unwrap();
        assert_eq!(
            response,
            StegResponse::Encoded {
                data: Vec::new(),
                error: Some(ENCODE_CAPACITY_MESSAGE.to_string()),
            }
        );
    }

    #[test]
    fn test_truncated_cover_is_an_image_error() {
        let mut engine = StegEngine::new();
        let mut truncated = cover(4, 4);
        truncated.data.truncate(40);
        let request = StegRequest::Encode(EncodeRequest {
            cover: truncated,
            lhs: Rgb::from_fn(|| vec![0u16; 2]),
            rhs: Rgb::from_fn(|| vec![0u16; 2]),
            rank: 1,
            max_lsb: 1,
        });
        let result = engine.handle(request, &CancelToken::new());
        assert!(matches!(result, Err(Error::Image(_))));
    }

    #[test]
    fn test_decode_of_plain_image_reports_capacity() {
        let mut engine = StegEngine::new();
        // All-white image decodes to an enormous header.
        let image = ImageData::from_rgba(4, 4, vec![255; 64]).unwrap();
        let response = engine
            .handle(StegRequest::Decode { image }, &CancelToken::new())
            .unwrap();
        match response {
            StegResponse::Decoded {
                data,
                width,
                height,
                error,
            } => {
                assert!(data.is_empty());
                assert_eq!((width, height), (0, 0));
                assert_eq!(error.as_deref(), Some(DECODE_CAPACITY_MESSAGE));
            }
            other => panic!("unexpected {}", other.tag()),
        }
    }

    #[test]
    fn test_decode_rejects_zero_header() {
        let image = ImageData::from_rgba(4, 4, vec![0; 64]).unwrap();
        assert!(matches!(
            decode(&image, &CancelToken::new()),
            Err(Error::Capacity(_))
        ));
    }

    #[test]
    fn test_invalid_shapes_are_errors() {
        let request = EncodeRequest {
            cover: cover(8, 8),
            lhs: Rgb::new(vec![1u16, 2], vec![1], vec![1, 2]),
            rhs: Rgb::from_fn(|| vec![1u16, 2]),
            rank: 1,
            max_lsb: 4,
        };
        assert!(matches!(
            encode(&request, &CancelToken::new()),
            Err(Error::InvalidParameter(_))
        ));

        let request = EncodeRequest {
            max_lsb: 9,
            ..request
        };
        assert!(matches!(
            encode(&request, &CancelToken::new()),
            Err(Error::InvalidParameter(_))
        ));
    }

    #[test]
    fn test_tags() {
        let decode = StegRequest::Decode {
            image: ImageData::blank(1, 1),
        };
        assert_eq!(decode.tag(), DECODE);
        assert_eq!(decode.expected_response(), DECODED);
    }
}
