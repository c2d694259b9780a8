//! Quantization codec
//!
//! Per-track sample encoding: range-reduced linear quantization for vectors and
//! curves, smallest-three for rotations, and raw `f32` bits at full precision.
//! Constant and default tracks take no per-sample bits at all.

use glam::Vec4;

use crate::analysis::TrackRange;
use crate::bitstream::{BitReader, BitWriter};
use crate::error::{AclError, Result};
use crate::math::{channels_to_quat, quat_to_channels, try_normalize_quat};

/// Bit rate that stores the raw IEEE-754 bits
pub const FULL_PRECISION: u8 = 32;

/// Largest bit rate accepted anywhere
pub const MAX_BIT_RATE: u8 = FULL_PRECISION;

/// Dropped component index (2 bits) plus its sign (1 bit)
pub const SMALLEST_THREE_HEADER_BITS: u32 = 3;

/// Largest magnitude of a non-dropped smallest-three component
const SMALLEST_THREE_BOUND: f32 = std::f32::consts::FRAC_1_SQRT_2;

/// Storage format of one track
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TrackFormat {
    /// Range-reduced per-channel quantization (raw `f32` at rate 32)
    QuantizedLinear,
    /// Smallest-three rotation
    QuantizedQuaternion,
    /// One value in the metadata table
    Constant,
    /// Rest-pose value, no data
    Default,
}

impl TrackFormat {
    pub(crate) fn to_u8(self) -> u8 {
        match self {
            Self::QuantizedLinear => 0,
            Self::QuantizedQuaternion => 1,
            Self::Constant => 2,
            Self::Default => 3,
        }
    }

    pub(crate) fn from_u8(value: u8) -> Option<Self> {
        match value {
            0 => Some(Self::QuantizedLinear),
            1 => Some(Self::QuantizedQuaternion),
            2 => Some(Self::Constant),
            3 => Some(Self::Default),
            _ => None,
        }
    }

    /// Whether samples of this format live in the packed segment data
    pub fn is_animated(self) -> bool {
        matches!(self, Self::QuantizedLinear | Self::QuantizedQuaternion)
    }
}

/// Reject bit rates above full precision
pub fn validate_bit_rate(bit_rate: u8) -> Result<()> {
    if bit_rate > MAX_BIT_RATE {
        return Err(AclError::config(format!(
            "bit rate {} exceeds {}",
            bit_rate, MAX_BIT_RATE
        )));
    }
    Ok(())
}

#[inline]
fn max_code(bits: u8) -> u32 {
    ((1u64 << bits) - 1) as u32
}

/// Quantize a value in [0, 1] to `bits` bits (1..=31)
#[inline]
pub fn quantize_unsigned(normalized: f32, bits: u8) -> u32 {
    let max = max_code(bits);
    let code = (normalized.clamp(0.0, 1.0) * max as f32).round() as u32;
    code.min(max)
}

#[inline]
pub fn dequantize_unsigned(code: u32, bits: u8) -> f32 {
    code as f32 / max_code(bits) as f32
}

/// Code of `value` inside `[min, min + extent]` at `bits` bits.
///
/// Rate 32 stores the raw bits and ignores the range. Rate 0 is only valid for
/// a zero extent.
pub fn quantize_value(value: f32, min: f32, extent: f32, bits: u8) -> Result<u32> {
    validate_bit_rate(bits)?;
    match bits {
        FULL_PRECISION => Ok(value.to_bits()),
        0 if extent > 0.0 => Err(AclError::config(format!(
            "bit rate 0 used for a non-constant range (extent {})",
            extent
        ))),
        0 => Ok(0),
        _ if extent <= 0.0 => Ok(0),
        _ => Ok(quantize_unsigned((value - min) / extent, bits)),
    }
}

/// Inverse of [`quantize_value`]
pub fn dequantize_value(code: u32, min: f32, extent: f32, bits: u8) -> f32 {
    match bits {
        FULL_PRECISION => f32::from_bits(code),
        0 => min,
        _ if extent <= 0.0 => min,
        _ => min + dequantize_unsigned(code, bits) * extent,
    }
}

/// Maximum error of linear quantization over `extent` at `bits` bits
pub fn quantization_step(extent: f32, bits: u8) -> f32 {
    match bits {
        0 => extent,
        FULL_PRECISION => 0.0,
        _ => extent / max_code(bits) as f32,
    }
}

/// Codes of one sample before they hit the bit stream
#[derive(Debug, Clone, Copy, Default)]
struct PackedSample {
    header: u32,
    codes: [u32; 4],
}

/// Everything needed to encode or decode the samples of one track
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct TrackEncoding {
    pub format: TrackFormat,
    /// Bits per channel (0 for constant and default tracks)
    pub bit_rate: u8,
    pub num_channels: u8,
    /// Quantization range. Constant and default tracks keep their value in `min`.
    pub range: TrackRange,
}

impl TrackEncoding {
    /// Track stored as a single value
    pub fn constant(format: TrackFormat, num_channels: u8, value: Vec4) -> Self {
        Self {
            format,
            bit_rate: 0,
            num_channels,
            range: TrackRange {
                min: value,
                extent: Vec4::ZERO,
            },
        }
    }

    /// Bits one sample of this track occupies in a frame
    pub fn sample_bits(&self) -> u32 {
        let rate = self.bit_rate as u32;
        match self.format {
            TrackFormat::QuantizedLinear => self.num_channels as u32 * rate,
            TrackFormat::QuantizedQuaternion => SMALLEST_THREE_HEADER_BITS + 3 * rate,
            TrackFormat::Constant | TrackFormat::Default => 0,
        }
    }

    fn pack(&self, value: Vec4) -> Result<PackedSample> {
        validate_bit_rate(self.bit_rate)?;
        let mut packed = PackedSample::default();
        match self.format {
            TrackFormat::QuantizedLinear => {
                for c in 0..self.num_channels as usize {
                    packed.codes[c] = quantize_value(
                        value[c],
                        self.range.min[c],
                        self.range.extent[c],
                        self.bit_rate,
                    )?;
                }
            }
            TrackFormat::QuantizedQuaternion => {
                if self.bit_rate == 0 {
                    return Err(AclError::config("bit rate 0 used for an animated rotation"));
                }
                let (index, negative, rest) = split_smallest_three(value);
                packed.header = ((index as u32) << 1) | negative as u32;
                for (c, v) in rest.into_iter().enumerate() {
                    packed.codes[c] = if self.bit_rate == FULL_PRECISION {
                        v.to_bits()
                    } else {
                        let normalized = (v + SMALLEST_THREE_BOUND) / (2.0 * SMALLEST_THREE_BOUND);
                        quantize_unsigned(normalized, self.bit_rate)
                    };
                }
            }
            TrackFormat::Constant | TrackFormat::Default => {}
        }
        Ok(packed)
    }

    fn unpack(&self, packed: &PackedSample) -> Vec4 {
        match self.format {
            TrackFormat::QuantizedLinear => {
                let mut value = Vec4::ZERO;
                for c in 0..self.num_channels as usize {
                    value[c] = dequantize_value(
                        packed.codes[c],
                        self.range.min[c],
                        self.range.extent[c],
                        self.bit_rate,
                    );
                }
                if self.num_channels == 4 {
                    normalize_channels(value)
                } else {
                    value
                }
            }
            TrackFormat::QuantizedQuaternion => {
                let index = (packed.header >> 1) as usize & 0x3;
                let negative = packed.header & 1 != 0;
                let mut rest = [0.0f32; 3];
                for (c, v) in rest.iter_mut().enumerate() {
                    *v = if self.bit_rate == FULL_PRECISION {
                        f32::from_bits(packed.codes[c])
                    } else {
                        dequantize_unsigned(packed.codes[c], self.bit_rate)
                            * (2.0 * SMALLEST_THREE_BOUND)
                            - SMALLEST_THREE_BOUND
                    };
                }
                join_smallest_three(index, negative, rest)
            }
            TrackFormat::Constant | TrackFormat::Default => self.range.min,
        }
    }

    /// Value the decoder will produce for `value`, without touching a bit stream
    pub fn reconstruct(&self, value: Vec4) -> Result<Vec4> {
        let packed = self.pack(value)?;
        Ok(self.unpack(&packed))
    }

    /// Append one sample to `writer`
    pub fn encode_sample(&self, writer: &mut BitWriter, value: Vec4) -> Result<()> {
        let packed = self.pack(value)?;
        let rate = self.bit_rate as u32;
        match self.format {
            TrackFormat::QuantizedLinear => {
                for code in &packed.codes[..self.num_channels as usize] {
                    writer.write_bits(*code, rate);
                }
            }
            TrackFormat::QuantizedQuaternion => {
                writer.write_bits(packed.header, SMALLEST_THREE_HEADER_BITS);
                for code in &packed.codes[..3] {
                    writer.write_bits(*code, rate);
                }
            }
            TrackFormat::Constant | TrackFormat::Default => {}
        }
        Ok(())
    }

    /// Read one sample from `reader`
    pub fn decode_sample(&self, reader: &mut BitReader<'_>) -> Result<Vec4> {
        let rate = self.bit_rate as u32;
        let mut packed = PackedSample::default();
        match self.format {
            TrackFormat::QuantizedLinear => {
                for code in &mut packed.codes[..self.num_channels as usize] {
                    *code = reader.read_bits(rate)?;
                }
            }
            TrackFormat::QuantizedQuaternion => {
                packed.header = reader.read_bits(SMALLEST_THREE_HEADER_BITS)?;
                for code in &mut packed.codes[..3] {
                    *code = reader.read_bits(rate)?;
                }
            }
            TrackFormat::Constant | TrackFormat::Default => {}
        }
        Ok(self.unpack(&packed))
    }
}

fn normalize_channels(value: Vec4) -> Vec4 {
    try_normalize_quat(channels_to_quat(value))
        .map(quat_to_channels)
        .unwrap_or(Vec4::W)
}

/// Split a quaternion into (dropped index, dropped sign, remaining three)
fn split_smallest_three(q: Vec4) -> (usize, bool, [f32; 3]) {
    let abs = q.abs();
    let index = if abs.x > abs.y && abs.x > abs.z && abs.x > abs.w {
        0
    } else if abs.y > abs.z && abs.y > abs.w {
        1
    } else if abs.z > abs.w {
        2
    } else {
        3
    };

    let clamp = |v: f32| v.clamp(-SMALLEST_THREE_BOUND, SMALLEST_THREE_BOUND);
    let rest = match index {
        0 => [q.y, q.z, q.w],
        1 => [q.x, q.z, q.w],
        2 => [q.x, q.y, q.w],
        _ => [q.x, q.y, q.z],
    };
    (index, q[index] < 0.0, rest.map(clamp))
}

fn join_smallest_three(index: usize, negative: bool, [a, b, c]: [f32; 3]) -> Vec4 {
    // Radicand goes negative when quantization pushes the three past unit length
    let mut largest = (1.0 - a * a - b * b - c * c).max(0.0).sqrt();
    if negative {
        largest = -largest;
    }
    let q = match index {
        0 => Vec4::new(largest, a, b, c),
        1 => Vec4::new(a, largest, b, c),
        2 => Vec4::new(a, b, largest, c),
        _ => Vec4::new(a, b, c, largest),
    };
    normalize_channels(q)
}

#[cfg(test)]
mod tests {
    use super::*;
    use glam::Quat;

    fn linear(range: TrackRange, bit_rate: u8, num_channels: u8) -> TrackEncoding {
        TrackEncoding {
            format: TrackFormat::QuantizedLinear,
            bit_rate,
            num_channels,
            range,
        }
    }

    fn rotation(bit_rate: u8) -> TrackEncoding {
        TrackEncoding {
            format: TrackFormat::QuantizedQuaternion,
            bit_rate,
            num_channels: 4,
            range: TrackRange::default(),
        }
    }

    #[test]
    fn test_linear_error_within_one_step() {
        let samples: Vec<Vec4> = (0..50)
            .map(|i| {
                let t = i as f32 * 0.37;
                Vec4::new(t.sin() * 4.0, t.cos() - 2.0, t * 0.1, 0.0)
            })
            .collect();
        let range = TrackRange::from_samples(&samples, 3);

        for bits in [8u8, 12, 16, 23] {
            let encoding = linear(range, bits, 3);
            for s in &samples {
                let decoded = encoding.reconstruct(*s).unwrap();
                for c in 0..3 {
                    let step = quantization_step(range.extent[c], bits);
                    let err = (decoded[c] - s[c]).abs();
                    assert!(
                        err <= step + 1.0e-5,
                        "bits {} channel {}: error {} > step {}",
                        bits,
                        c,
                        err,
                        step
                    );
                }
            }
        }
    }

    #[test]
    fn test_full_precision_is_bit_exact() {
        let value = Vec4::new(1.0e-7, -123.456, 3.0e8, 0.0);
        let encoding = linear(TrackRange::from_samples(&[value], 3), FULL_PRECISION, 3);
        assert_eq!(encoding.reconstruct(value).unwrap(), value);
    }

    #[test]
    fn test_rate_zero_on_animated_range_rejected() {
        assert!(matches!(
            quantize_value(0.5, 0.0, 1.0, 0),
            Err(AclError::InvalidConfiguration(_))
        ));
        assert_eq!(quantize_value(2.0, 2.0, 0.0, 0).unwrap(), 0);
        assert!(matches!(
            rotation(0).reconstruct(Vec4::W),
            Err(AclError::InvalidConfiguration(_))
        ));
    }

    #[test]
    fn test_rate_above_32_rejected() {
        assert!(validate_bit_rate(33).is_err());
        assert!(quantize_value(0.0, 0.0, 1.0, 40).is_err());
    }

    #[test]
    fn test_zero_extent_decodes_min() {
        let encoding = linear(
            TrackRange {
                min: Vec4::new(5.0, 0.0, 0.0, 0.0),
                extent: Vec4::ZERO,
            },
            8,
            1,
        );
        assert_eq!(encoding.reconstruct(Vec4::splat(5.0)).unwrap().x, 5.0);
    }

    #[test]
    fn test_smallest_three_high_rate_accuracy() {
        let q = Quat::from_euler(glam::EulerRot::XYZ, 0.3, -1.1, 2.0);
        for bits in [12u8, 16, FULL_PRECISION] {
            let decoded = channels_to_quat(rotation(bits).reconstruct(quat_to_channels(q)).unwrap());
            assert!(
                decoded.angle_between(q) < 1.0e-2,
                "bits {}: angle {}",
                bits,
                decoded.angle_between(q)
            );
        }
    }

    #[test]
    fn test_smallest_three_keeps_sign() {
        // Same rotation, opposite hemispheres: decoded keys must keep their sign
        let q = quat_to_channels(Quat::from_rotation_y(0.4));
        let pos = rotation(16).reconstruct(q).unwrap();
        let neg = rotation(16).reconstruct(-q).unwrap();
        assert!(pos.dot(q) > 0.99);
        assert!(neg.dot(-q) > 0.99);
    }

    #[test]
    fn test_smallest_three_radicand_clamped() {
        // At 1 bit every component snaps to +-1/sqrt(2): sum of squares exceeds 1
        let q = quat_to_channels(Quat::from_xyzw(0.5, 0.5, 0.5, 0.5));
        let decoded = rotation(1).reconstruct(q).unwrap();
        assert!(decoded.is_finite());
        assert!((decoded.length() - 1.0).abs() < 1.0e-5);
    }

    #[test]
    fn test_bit_stream_matches_reconstruct() {
        let encoding = rotation(11);
        let values: Vec<Vec4> = (0..5)
            .map(|i| quat_to_channels(Quat::from_rotation_z(i as f32 * 0.7)))
            .collect();

        let mut writer = BitWriter::new();
        for v in &values {
            encoding.encode_sample(&mut writer, *v).unwrap();
        }
        assert_eq!(writer.bit_len(), 5 * encoding.sample_bits() as usize);

        let bytes = writer.into_bytes();
        let mut reader = BitReader::new(&bytes);
        for v in &values {
            let decoded = encoding.decode_sample(&mut reader).unwrap();
            assert_eq!(decoded, encoding.reconstruct(*v).unwrap());
        }
    }

    #[test]
    fn test_sample_bits_per_format() {
        assert_eq!(rotation(10).sample_bits(), 33);
        assert_eq!(rotation(FULL_PRECISION).sample_bits(), 99);
        assert_eq!(linear(TrackRange::default(), 7, 3).sample_bits(), 21);
        assert_eq!(
            TrackEncoding::constant(TrackFormat::Default, 3, Vec4::ZERO).sample_bits(),
            0
        );
    }
}
