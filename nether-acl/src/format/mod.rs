//! Compressed clip binary format
//!
//! Layout (little-endian):
//!
//! ```text
//! [ClipHeader: 48 bytes]
//! [track metadata: 36 bytes × (bone_count × 3 + curve_count)]
//! [segment table: 12 bytes × segment_count]
//! [packed segment data: data_size bytes]
//! ```
//!
//! Track `3 * bone` is the bone's rotation, `3 * bone + 1` its translation and
//! `3 * bone + 2` its scale; curves follow. Every frame of a clip occupies
//! `frame_bit_size` bits and each segment starts on a byte boundary.

mod header;


pub use header::{ClipHeader, MAGIC, VERSION};

use glam::Vec4;

use crate::analysis::TrackRange;
use crate::error::{AclError, Result};
use crate::quantize::{MAX_BIT_RATE, TrackEncoding, TrackFormat};
use crate::settings::{RotationFormat, VectorFormat};
use crate::track::TrackKind;
use header::read_u32;

/// Size of one track metadata entry
pub const TRACK_METADATA_SIZE: usize = 36;

/// Size of one segment table entry
pub const SEGMENT_ENTRY_SIZE: usize = 12;

/// Independently seekable run of frames
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SegmentHeader {
    /// Byte offset inside the packed data
    pub offset: u32,
    pub start_frame: u32,
    pub num_frames: u32,
}

impl SegmentHeader {
    pub fn to_bytes(&self) -> [u8; SEGMENT_ENTRY_SIZE] {
        let mut bytes = [0u8; SEGMENT_ENTRY_SIZE];
        bytes[0..4].copy_from_slice(&self.offset.to_le_bytes());
        bytes[4..8].copy_from_slice(&self.start_frame.to_le_bytes());
        bytes[8..12].copy_from_slice(&self.num_frames.to_le_bytes());
        bytes
    }

    pub fn from_bytes(bytes: &[u8]) -> Option<Self> {
        if bytes.len() < SEGMENT_ENTRY_SIZE {
            return None;
        }
        Some(Self {
            offset: read_u32(bytes, 0),
            start_frame: read_u32(bytes, 4),
            num_frames: read_u32(bytes, 8),
        })
    }

    /// Packed size of the segment: every frame, padded to a byte
    pub fn byte_size(&self, frame_bit_size: u32) -> u64 {
        (self.num_frames as u64 * frame_bit_size as u64).div_ceil(8)
    }
}

fn write_track_metadata(encoding: &TrackEncoding, out: &mut Vec<u8>) {
    out.push(encoding.format.to_u8());
    out.push(encoding.bit_rate);
    out.push(encoding.num_channels);
    out.push(0);
    for v in encoding.range.min.to_array() {
        out.extend_from_slice(&v.to_le_bytes());
    }
    for v in encoding.range.extent.to_array() {
        out.extend_from_slice(&v.to_le_bytes());
    }
}

fn read_track_metadata(bytes: &[u8], index: usize, kind: TrackKind) -> Result<TrackEncoding> {
    let format = TrackFormat::from_u8(bytes[0])
        .ok_or_else(|| AclError::corrupt(format!("track {} has unknown format tag {}", index, bytes[0])))?;
    let bit_rate = bytes[1];
    let num_channels = bytes[2];

    if bit_rate > MAX_BIT_RATE {
        return Err(AclError::corrupt(format!(
            "track {} has bit rate {} (maximum {})",
            index, bit_rate, MAX_BIT_RATE
        )));
    }
    if num_channels as usize != kind.num_channels() {
        return Err(AclError::corrupt(format!(
            "track {} has {} channels, {:?} tracks have {}",
            index,
            num_channels,
            kind,
            kind.num_channels()
        )));
    }
    let rate_ok = match format {
        TrackFormat::QuantizedLinear => bit_rate >= 1,
        TrackFormat::QuantizedQuaternion => bit_rate >= 1 && kind == TrackKind::Rotation,
        TrackFormat::Constant | TrackFormat::Default => bit_rate == 0,
    };
    if !rate_ok {
        return Err(AclError::corrupt(format!(
            "track {} ({:?}) cannot use {:?} at bit rate {}",
            index, kind, format, bit_rate
        )));
    }

    let read_vec4 = |offset: usize| {
        Vec4::new(
            f32::from_bits(read_u32(bytes, offset)),
            f32::from_bits(read_u32(bytes, offset + 4)),
            f32::from_bits(read_u32(bytes, offset + 8)),
            f32::from_bits(read_u32(bytes, offset + 12)),
        )
    };
    let range = TrackRange {
        min: read_vec4(4),
        extent: read_vec4(20),
    };
    if !range.min.is_finite() || !range.extent.is_finite() || range.extent.min_element() < 0.0 {
        return Err(AclError::corrupt(format!("track {} has an invalid range", index)));
    }

    Ok(TrackEncoding {
        format,
        bit_rate,
        num_channels,
        range,
    })
}

/// Kind of the track at `index` in a clip with `bone_count` bones
pub(crate) fn track_kind(index: usize, bone_count: usize) -> TrackKind {
    if index < bone_count * 3 {
        TrackKind::for_bone_slot(index % 3)
    } else {
        TrackKind::Scalar
    }
}

/// Validated compressed clip.
///
/// Owns its bytes; the parsed tables are kept alongside for decompression.
#[derive(Debug, Clone, PartialEq)]
pub struct CompressedClip {
    bytes: Vec<u8>,
    header: ClipHeader,
    tracks: Vec<TrackEncoding>,
    /// Bit offset of each track inside a frame
    track_bit_offsets: Vec<u32>,
    segments: Vec<SegmentHeader>,
    data_offset: usize,
}

impl CompressedClip {
    /// Serialize tables and data, filling in `data_size` and `hash`
    pub(crate) fn assemble(
        mut header: ClipHeader,
        tracks: &[TrackEncoding],
        segments: &[SegmentHeader],
        data: &[u8],
    ) -> Result<Self> {
        header.data_size = u32::try_from(data.len())
            .map_err(|_| AclError::config("packed data exceeds 4 GiB"))?;

        let mut body = Vec::with_capacity(
            tracks.len() * TRACK_METADATA_SIZE + segments.len() * SEGMENT_ENTRY_SIZE + data.len(),
        );
        for track in tracks {
            write_track_metadata(track, &mut body);
        }
        for segment in segments {
            body.extend_from_slice(&segment.to_bytes());
        }
        body.extend_from_slice(data);
        header.hash = xxhash_rust::xxh3::xxh3_64(&body);

        let mut bytes = Vec::with_capacity(ClipHeader::SIZE + body.len());
        bytes.extend_from_slice(&header.to_bytes());
        bytes.extend_from_slice(&body);
        Self::from_bytes(bytes)
    }

    /// Parse and validate a compressed clip
    pub fn from_bytes(bytes: Vec<u8>) -> Result<Self> {
        let header = ClipHeader::from_bytes(&bytes)?;

        let num_tracks = header.num_tracks();
        let metadata_size = num_tracks as u64 * TRACK_METADATA_SIZE as u64;
        let segment_table_size = header.segment_count as u64 * SEGMENT_ENTRY_SIZE as u64;
        let expected =
            ClipHeader::SIZE as u64 + metadata_size + segment_table_size + header.data_size as u64;
        if bytes.len() as u64 != expected {
            return Err(AclError::corrupt(format!(
                "stream is {} bytes, header declares {}",
                bytes.len(),
                expected
            )));
        }

        let hash = xxhash_rust::xxh3::xxh3_64(&bytes[ClipHeader::SIZE..]);
        if hash != header.hash {
            return Err(AclError::corrupt(format!(
                "hash mismatch: stored {:#018x}, computed {:#018x}",
                header.hash, hash
            )));
        }

        let bone_count = header.bone_count as usize;
        let mut tracks = Vec::with_capacity(num_tracks);
        let mut track_bit_offsets = Vec::with_capacity(num_tracks);
        let mut frame_bits = 0u64;
        for (index, entry) in bytes[ClipHeader::SIZE..]
            .chunks_exact(TRACK_METADATA_SIZE)
            .take(num_tracks)
            .enumerate()
        {
            let kind = track_kind(index, bone_count);
            let encoding = read_track_metadata(entry, index, kind)?;
            check_track_format(&header, index, kind, &encoding)?;
            track_bit_offsets.push(frame_bits as u32);
            frame_bits += encoding.sample_bits() as u64;
            if frame_bits > u32::MAX as u64 {
                return Err(AclError::corrupt("frame bit size overflows"));
            }
            tracks.push(encoding);
        }
        if frame_bits != header.frame_bit_size as u64 {
            return Err(AclError::corrupt(format!(
                "tracks need {} bits per frame, header declares {}",
                frame_bits, header.frame_bit_size
            )));
        }

        let table_start = ClipHeader::SIZE + num_tracks * TRACK_METADATA_SIZE;
        let data_offset = table_start + header.segment_count as usize * SEGMENT_ENTRY_SIZE;
        let mut segments = Vec::with_capacity(header.segment_count as usize);
        let mut next_offset = 0u64;
        for (index, entry) in bytes[table_start..data_offset]
            .chunks_exact(SEGMENT_ENTRY_SIZE)
            .enumerate()
        {
            let segment = SegmentHeader::from_bytes(entry)
                .ok_or_else(|| AclError::corrupt(format!("segment {} truncated", index)))?;
            let start = index as u64 * header.segment_length as u64;
            let frames = (header.frame_count as u64 - start).min(header.segment_length as u64);
            if segment.start_frame as u64 != start
                || segment.num_frames as u64 != frames
                || segment.offset as u64 != next_offset
            {
                return Err(AclError::corrupt(format!(
                    "segment {} is inconsistent (offset {}, start {}, frames {})",
                    index, segment.offset, segment.start_frame, segment.num_frames
                )));
            }
            next_offset += segment.byte_size(header.frame_bit_size);
            segments.push(segment);
        }
        if next_offset != header.data_size as u64 {
            return Err(AclError::corrupt(format!(
                "segments need {} bytes, header declares {}",
                next_offset, header.data_size
            )));
        }

        Ok(Self {
            bytes,
            header,
            tracks,
            track_bit_offsets,
            segments,
            data_offset,
        })
    }

    pub fn header(&self) -> &ClipHeader {
        &self.header
    }

    pub fn as_bytes(&self) -> &[u8] {
        &self.bytes
    }

    pub fn into_bytes(self) -> Vec<u8> {
        self.bytes
    }

    /// Total size in bytes
    pub fn size(&self) -> usize {
        self.bytes.len()
    }

    pub fn num_bones(&self) -> usize {
        self.header.bone_count as usize
    }

    pub fn num_curves(&self) -> usize {
        self.header.curve_count as usize
    }

    pub fn num_samples(&self) -> u32 {
        self.header.frame_count
    }

    pub fn sample_rate(&self) -> f32 {
        self.header.sample_rate
    }

    /// Duration in seconds
    pub fn duration(&self) -> f32 {
        (self.header.frame_count - 1) as f32 / self.header.sample_rate
    }

    pub fn tracks(&self) -> &[TrackEncoding] {
        &self.tracks
    }

    pub fn track(&self, index: usize) -> &TrackEncoding {
        &self.tracks[index]
    }

    pub(crate) fn track_bit_offset(&self, index: usize) -> u32 {
        self.track_bit_offsets[index]
    }

    pub fn segments(&self) -> &[SegmentHeader] {
        &self.segments
    }

    /// Packed bytes of one segment
    pub fn segment_data(&self, index: usize) -> &[u8] {
        let segment = &self.segments[index];
        let start = self.data_offset + segment.offset as usize;
        let len = segment.byte_size(self.header.frame_bit_size) as usize;
        &self.bytes[start..start + len]
    }
}

/// Track formats must agree with the clip-wide formats in the header
fn check_track_format(
    header: &ClipHeader,
    index: usize,
    kind: TrackKind,
    encoding: &TrackEncoding,
) -> Result<()> {
    if !encoding.format.is_animated() {
        return Ok(());
    }
    let ok = match kind {
        TrackKind::Rotation => match header.rotation_format {
            RotationFormat::QuatFull => {
                encoding.format == TrackFormat::QuantizedLinear && encoding.bit_rate == MAX_BIT_RATE
            }
            RotationFormat::SmallestThreeFull => {
                encoding.format == TrackFormat::QuantizedQuaternion
                    && encoding.bit_rate == MAX_BIT_RATE
            }
            RotationFormat::SmallestThreeVariable => {
                encoding.format == TrackFormat::QuantizedQuaternion
            }
        },
        TrackKind::Translation => vector_format_ok(header.translation_format, encoding),
        TrackKind::Scale => vector_format_ok(header.scale_format, encoding),
        TrackKind::Scalar => encoding.format == TrackFormat::QuantizedLinear,
    };
    if ok {
        Ok(())
    } else {
        Err(AclError::corrupt(format!(
            "track {} ({:?}) encoding {:?} at {} bits disagrees with the clip formats",
            index, kind, encoding.format, encoding.bit_rate
        )))
    }
}

fn vector_format_ok(format: VectorFormat, encoding: &TrackEncoding) -> bool {
    encoding.format == TrackFormat::QuantizedLinear
        && (format == VectorFormat::Variable || encoding.bit_rate == MAX_BIT_RATE)
}
