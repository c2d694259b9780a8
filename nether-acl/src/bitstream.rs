//! MSB-first bit packing
//!
//! Values are written most significant bit first into a byte buffer. Readers are
//! bounded to a bit range and fail with `CorruptStream` instead of reading past it.

use crate::error::{AclError, Result};

/// Append-only bit writer
#[derive(Debug, Default, Clone)]
pub struct BitWriter {
    bytes: Vec<u8>,
    bit_len: usize,
}

impl BitWriter {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_capacity(bytes: usize) -> Self {
        Self {
            bytes: Vec::with_capacity(bytes),
            bit_len: 0,
        }
    }

    /// Write the low `num_bits` bits of `value` (0..=32 bits)
    pub fn write_bits(&mut self, value: u32, num_bits: u32) {
        debug_assert!(num_bits <= 32);
        let mut remaining = num_bits;
        let value = value as u64;
        while remaining > 0 {
            let byte_index = self.bit_len / 8;
            let bit_offset = (self.bit_len % 8) as u32;
            if byte_index == self.bytes.len() {
                self.bytes.push(0);
            }
            let free = 8 - bit_offset;
            let take = free.min(remaining);
            let chunk = (value >> (remaining - take)) & ((1u64 << take) - 1);
            self.bytes[byte_index] |= (chunk << (free - take)) as u8;
            self.bit_len += take as usize;
            remaining -= take;
        }
    }

    /// Pad with zero bits up to the next byte boundary
    pub fn align_to_byte(&mut self) {
        self.bit_len = self.bytes.len() * 8;
    }

    pub fn bit_len(&self) -> usize {
        self.bit_len
    }

    pub fn as_bytes(&self) -> &[u8] {
        &self.bytes
    }

    pub fn into_bytes(self) -> Vec<u8> {
        self.bytes
    }
}

/// Bounded bit reader over a byte slice
#[derive(Debug, Clone)]
pub struct BitReader<'a> {
    data: &'a [u8],
    bit_pos: usize,
    bit_end: usize,
}

impl<'a> BitReader<'a> {
    /// Reader over the whole slice
    pub fn new(data: &'a [u8]) -> Self {
        Self {
            data,
            bit_pos: 0,
            bit_end: data.len() * 8,
        }
    }

    /// Move to an absolute bit position
    pub fn seek(&mut self, bit_pos: usize) -> Result<()> {
        if bit_pos > self.bit_end {
            return Err(AclError::corrupt(format!(
                "seek to bit {} past end of segment ({} bits)",
                bit_pos, self.bit_end
            )));
        }
        self.bit_pos = bit_pos;
        Ok(())
    }

    pub fn position(&self) -> usize {
        self.bit_pos
    }

    pub fn remaining(&self) -> usize {
        self.bit_end - self.bit_pos
    }

    /// Read `num_bits` bits (0..=32)
    pub fn read_bits(&mut self, num_bits: u32) -> Result<u32> {
        if num_bits > 32 {
            return Err(AclError::corrupt(format!("bit rate {} out of range", num_bits)));
        }
        if num_bits as usize > self.remaining() {
            return Err(AclError::corrupt(format!(
                "read of {} bits at bit {} overruns segment ({} bits)",
                num_bits, self.bit_pos, self.bit_end
            )));
        }

        let mut value = 0u64;
        let mut remaining = num_bits;
        while remaining > 0 {
            let byte = self.data[self.bit_pos / 8] as u64;
            let bit_offset = (self.bit_pos % 8) as u32;
            let available = 8 - bit_offset;
            let take = available.min(remaining);
            let chunk = (byte >> (available - take)) & ((1u64 << take) - 1);
            value = (value << take) | chunk;
            self.bit_pos += take as usize;
            remaining -= take;
        }
        Ok(value as u32)
    }
}
