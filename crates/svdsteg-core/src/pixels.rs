//! RGBA pixel buffers and per-channel matrix layout.
//!
//! Channel matrices are stored column-major with `rows = height` and
//! `cols = width`, so pixel `(x, y)` lives at `x * height + y`.

use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};
use crate::rgb::Rgb;

/// Row-major RGBA image, four bytes per pixel.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct ImageData {
    pub width: u32,
    pub height: u32,
    pub data: Vec<u8>,
}

impl ImageData {
    /// Wrap an RGBA buffer, checking its length against the dimensions.
    pub fn from_rgba(width: u32, height: u32, data: Vec<u8>) -> Result<Self> {
        let image = Self {
            width,
            height,
            data,
        };
        image.check()?;
        Ok(image)
    }

    /// Fail unless `data` holds exactly `width × height` RGBA pixels.
    pub fn check(&self) -> Result<()> {
        let expected = self.pixel_count() * 4;
        if self.data.len() != expected {
            return Err(Error::Image(format!(
                "RGBA buffer has {} bytes, expected {} for {}x{}",
                self.data.len(),
                expected,
                self.width,
                self.height
            )));
        }
        Ok(())
    }

    /// Opaque black image.
    pub fn blank(width: u32, height: u32) -> Self {
        let mut data = vec![0u8; width as usize * height as usize * 4];
        for alpha in data.iter_mut().skip(3).step_by(4) {
            *alpha = 255;
        }
        Self {
            width,
            height,
            data,
        }
    }

    pub fn pixel_count(&self) -> usize {
        self.width as usize * self.height as usize
    }

    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }

    /// Split into column-major R, G, B matrices (alpha dropped).
    pub fn to_channels(&self) -> Result<Rgb<Vec<u8>>> {
        self.check()?;
        let rows = self.height as usize;
        let cols = self.width as usize;
        let mut channels = Rgb::from_fn(|| vec![0u8; rows * cols]);
        let mut i = 0;
        for y in 0..rows {
            for x in 0..cols {
                let q = x * rows + y;
                channels.red[q] = self.data[i];
                channels.green[q] = self.data[i + 1];
                channels.blue[q] = self.data[i + 2];
                i += 4;
            }
        }
        Ok(channels)
    }

    /// Merge column-major channel matrices back into an opaque RGBA image.
    pub fn from_channels(rows: usize, cols: usize, channels: Rgb<&[u8]>) -> Result<Self> {
        let len = rows * cols;
        if channels.iter().any(|c| c.len() != len) {
            return Err(Error::Image(format!(
                "channel matrices do not match {}x{}",
                rows, cols
            )));
        }
        let mut data = Vec::with_capacity(len * 4);
        for y in 0..rows {
            for x in 0..cols {
                let q = x * rows + y;
                data.push(channels.red[q]);
                data.push(channels.green[q]);
                data.push(channels.blue[q]);
                data.push(255);
            }
        }
        Ok(Self {
            width: cols as u32,
            height: rows as u32,
            data,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_from_rgba_rejects_bad_length() {
        assert!(ImageData::from_rgba(2, 2, vec![0; 15]).is_err());
        assert!(ImageData::from_rgba(2, 2, vec![0; 16]).is_ok());
    }

    #[test]
    fn test_channels_are_column_major() {
        // 2 wide, 1 tall: pixel (0,0) red=1, pixel (1,0) red=2
        let img = ImageData::from_rgba(2, 1, vec![1, 10, 20, 255, 2, 11, 21, 255]).unwrap();
        let channels = img.to_channels().unwrap();
        assert_eq!(channels.red, vec![1, 2]);
        assert_eq!(channels.blue, vec![20, 21]);

        // 1 wide, 2 tall
        let img = ImageData::from_rgba(1, 2, vec![5, 0, 0, 255, 6, 0, 0, 255]).unwrap();
        assert_eq!(img.to_channels().unwrap().red, vec![5, 6]);
    }

    #[test]
    fn test_channels_restore_image() {
        let data: Vec<u8> = (0..3 * 2 * 4)
            .map(|i| if i % 4 == 3 { 255 } else { i as u8 })
            .collect();
        let img = ImageData::from_rgba(3, 2, data).unwrap();
        let channels = img.to_channels().unwrap();
        let restored = ImageData::from_channels(
            2,
            3,
            Rgb::new(
                channels.red.as_slice(),
                channels.green.as_slice(),
                channels.blue.as_slice(),
            ),
        )
        .unwrap();
        assert_eq!(restored, img);
    }

    #[test]
    fn test_short_buffer_is_rejected_not_indexed() {
        let img = ImageData {
            width: 4,
            height: 4,
            data: vec![0; 12],
        };
        assert!(img.check().is_err());
        assert!(matches!(img.to_channels(), Err(Error::Image(_))));
    }

    #[test]
    fn test_blank_is_opaque() {
        let img = ImageData::blank(2, 2);
        assert_eq!(img.data.len(), 16);
        assert!(img.data.chunks(4).all(|p| p == [0, 0, 0, 255]));
    }
}
