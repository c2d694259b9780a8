//! Compressed clip header

use crate::error::{AclError, Result};
use crate::settings::{RotationFormat, VectorFormat};

/// Magic bytes at the start of every compressed clip
pub const MAGIC: [u8; 4] = *b"NACL";

/// Current stream version
pub const VERSION: u16 = 1;

/// Compressed clip header (48 bytes)
///
/// Note: Not packed - we use explicit little-endian serialization.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ClipHeader {
    /// Reserved flags (must be 0)
    pub flags: u16,
    pub bone_count: u16,
    pub curve_count: u16,
    /// Number of samples per track
    pub frame_count: u32,
    /// Samples per second
    pub sample_rate: f32,
    pub segment_count: u32,
    /// Frames per segment (the last segment may be shorter)
    pub segment_length: u32,
    pub rotation_format: RotationFormat,
    pub translation_format: VectorFormat,
    pub scale_format: VectorFormat,
    /// Size of the packed segment data in bytes
    pub data_size: u32,
    /// Bits occupied by one frame of every animated track
    pub frame_bit_size: u32,
    /// xxh3-64 of everything after the header
    pub hash: u64,
}

impl ClipHeader {
    pub const SIZE: usize = 48;

    /// Number of entries in the track metadata table
    pub fn num_tracks(&self) -> usize {
        self.bone_count as usize * 3 + self.curve_count as usize
    }

    /// Write header to bytes
    pub fn to_bytes(&self) -> [u8; Self::SIZE] {
        let mut bytes = [0u8; Self::SIZE];
        bytes[0..4].copy_from_slice(&MAGIC);
        bytes[4..6].copy_from_slice(&VERSION.to_le_bytes());
        bytes[6..8].copy_from_slice(&self.flags.to_le_bytes());
        bytes[8..10].copy_from_slice(&self.bone_count.to_le_bytes());
        bytes[10..12].copy_from_slice(&self.curve_count.to_le_bytes());
        bytes[12..16].copy_from_slice(&self.frame_count.to_le_bytes());
        bytes[16..20].copy_from_slice(&self.sample_rate.to_le_bytes());
        bytes[20..24].copy_from_slice(&self.segment_count.to_le_bytes());
        bytes[24..28].copy_from_slice(&self.segment_length.to_le_bytes());
        bytes[28] = self.rotation_format.to_u8();
        bytes[29] = self.translation_format.to_u8();
        bytes[30] = self.scale_format.to_u8();
        bytes[31] = 0;
        bytes[32..36].copy_from_slice(&self.data_size.to_le_bytes());
        bytes[36..40].copy_from_slice(&self.frame_bit_size.to_le_bytes());
        bytes[40..48].copy_from_slice(&self.hash.to_le_bytes());
        bytes
    }

    /// Read header from bytes, checking magic, version and format tags
    pub fn from_bytes(bytes: &[u8]) -> Result<Self> {
        if bytes.len() < Self::SIZE {
            return Err(AclError::corrupt(format!(
                "stream is {} bytes, header needs {}",
                bytes.len(),
                Self::SIZE
            )));
        }
        if bytes[0..4] != MAGIC {
            return Err(AclError::corrupt("bad magic"));
        }
        let version = u16::from_le_bytes([bytes[4], bytes[5]]);
        if version != VERSION {
            return Err(AclError::corrupt(format!(
                "unsupported version {} (expected {})",
                version, VERSION
            )));
        }

        let header = Self {
            flags: u16::from_le_bytes([bytes[6], bytes[7]]),
            bone_count: u16::from_le_bytes([bytes[8], bytes[9]]),
            curve_count: u16::from_le_bytes([bytes[10], bytes[11]]),
            frame_count: read_u32(bytes, 12),
            sample_rate: f32::from_bits(read_u32(bytes, 16)),
            segment_count: read_u32(bytes, 20),
            segment_length: read_u32(bytes, 24),
            rotation_format: RotationFormat::from_u8(bytes[28])
                .ok_or_else(|| AclError::corrupt(format!("unknown rotation format {}", bytes[28])))?,
            translation_format: VectorFormat::from_u8(bytes[29]).ok_or_else(|| {
                AclError::corrupt(format!("unknown translation format {}", bytes[29]))
            })?,
            scale_format: VectorFormat::from_u8(bytes[30])
                .ok_or_else(|| AclError::corrupt(format!("unknown scale format {}", bytes[30])))?,
            data_size: read_u32(bytes, 32),
            frame_bit_size: read_u32(bytes, 36),
            hash: u64::from_le_bytes([
                bytes[40], bytes[41], bytes[42], bytes[43], bytes[44], bytes[45], bytes[46],
                bytes[47],
            ]),
        };
        header.validate()?;
        Ok(header)
    }

    /// Validate header fields that do not depend on the tables
    pub fn validate(&self) -> Result<()> {
        if self.flags != 0 {
            return Err(AclError::corrupt(format!("unknown flags {:#06x}", self.flags)));
        }
        if self.frame_count == 0 {
            return Err(AclError::corrupt("frame count is 0"));
        }
        if !(self.sample_rate.is_finite() && self.sample_rate > 0.0) {
            return Err(AclError::corrupt(format!(
                "invalid sample rate {}",
                self.sample_rate
            )));
        }
        if self.segment_length == 0 {
            return Err(AclError::corrupt("segment length is 0"));
        }
        if self.num_tracks() == 0 {
            return Err(AclError::corrupt("clip has no tracks"));
        }
        let expected_segments = self.frame_count.div_ceil(self.segment_length);
        if self.segment_count != expected_segments {
            return Err(AclError::corrupt(format!(
                "{} segments declared, {} frames at {} per segment need {}",
                self.segment_count, self.frame_count, self.segment_length, expected_segments
            )));
        }
        Ok(())
    }
}

#[inline]
pub(crate) fn read_u32(bytes: &[u8], offset: usize) -> u32 {
    u32::from_le_bytes([
        bytes[offset],
        bytes[offset + 1],
        bytes[offset + 2],
        bytes[offset + 3],
    ])
}
