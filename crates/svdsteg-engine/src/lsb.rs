//! Least-significant-bit codec over the RGB bytes of an RGBA buffer.
//!
//! Slots are visited pixel by pixel in R, G, B order. When the last pixel
//! is used up the cursor wraps to the first pixel one bit plane higher, so
//! the whole image carries bit 0 before any byte gives up bit 1. Alpha
//! bytes are never touched. Values are written most significant bit first.

use svdsteg_core::{Error, Result};

const RGB_CHANNELS: usize = 3;
const BYTES_PER_PIXEL: usize = 4;

/// Bits an image of `pixels` pixels carries with `max_lsb` planes in use.
pub fn capacity_bits(pixels: usize, max_lsb: u32) -> usize {
    pixels * RGB_CHANNELS * max_lsb as usize
}

#[derive(Debug, Clone, Copy)]
struct SlotCursor {
    pixels: usize,
    max_lsb: u32,
    pixel: usize,
    channel: usize,
    plane: u32,
}

impl SlotCursor {
    fn new(buffer_len: usize, max_lsb: u32) -> Self {
        Self {
            pixels: buffer_len / BYTES_PER_PIXEL,
            max_lsb,
            pixel: 0,
            channel: 0,
            plane: 0,
        }
    }

    /// Byte index and bit plane of the next slot, then step past it.
    fn next(&mut self) -> Result<(usize, u32)> {
        if self.pixels == 0 || self.plane >= self.max_lsb {
            return Err(Error::Capacity("no bit slots remaining".into()));
        }
        let slot = (self.pixel * BYTES_PER_PIXEL + self.channel, self.plane);
        self.channel += 1;
        if self.channel == RGB_CHANNELS {
            self.channel = 0;
            self.pixel += 1;
            if self.pixel == self.pixels {
                self.pixel = 0;
                self.plane += 1;
            }
        }
        Ok(slot)
    }
}

/// Writes bits into an RGBA buffer in place.
pub struct LsbWriter<'a> {
    image: &'a mut [u8],
    cursor: SlotCursor,
}

impl<'a> LsbWriter<'a> {
    pub fn new(image: &'a mut [u8], max_lsb: u32) -> Self {
        let cursor = SlotCursor::new(image.len(), max_lsb);
        Self { image, cursor }
    }

    pub fn put_bit(&mut self, bit: bool) -> Result<()> {
        let (index, plane) = self.cursor.next()?;
        let mask = 1u8 << plane;
        if bit {
            self.image[index] |= mask;
        } else {
            self.image[index] &= !mask;
        }
        Ok(())
    }

    /// Write the low `bits` bits of `value`, MSB first.
    pub fn put_bits(&mut self, value: u32, bits: u32) -> Result<()> {
        for i in (0..bits).rev() {
            self.put_bit((value >> i) & 1 == 1)?;
        }
        Ok(())
    }

    pub fn put_byte(&mut self, byte: u8) -> Result<()> {
        self.put_bits(byte as u32, 8)
    }
}

/// Reads bits back in the order [`LsbWriter`] wrote them.
pub struct LsbReader<'a> {
    image: &'a [u8],
    cursor: SlotCursor,
}

impl<'a> LsbReader<'a> {
    pub fn new(image: &'a [u8], max_lsb: u32) -> Self {
        Self {
            image,
            cursor: SlotCursor::new(image.len(), max_lsb),
        }
    }

    pub fn read_bit(&mut self) -> Result<bool> {
        let (index, plane) = self.cursor.next()?;
        Ok(self.image[index] & (1u8 << plane) != 0)
    }

    pub fn read_bits(&mut self, bits: u32) -> Result<u32> {
        let mut value = 0u32;
        for _ in 0..bits {
            value = (value << 1) | self.read_bit()? as u32;
        }
        Ok(value)
    }

    pub fn read_byte(&mut self) -> Result<u8> {
        Ok(self.read_bits(8)? as u8)
    }
}
