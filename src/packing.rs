//! Packing 8-bit grayscale samples into the wire pixel formats
//!
//! Samples are reduced by keeping their top bits, 1bpp thresholds at 128.
//! Pixels fill each byte from the most significant bits down and a trailing
//! partial byte is zero padded.
//!
//! There are two implementations. The scalar one walks sample by sample,
//! the bulk one works on eight samples per `u64`. Both produce the same
//! bytes for every input, [`PixelCodec`] picks one by input size.

use crate::models::PixelFormat;

/// Inputs at least this long take the bulk path by default
pub const DEFAULT_BULK_THRESHOLD: usize = 4096;

/// Number of bytes `samples` pixels take in `format`
pub fn packed_len(samples: usize, format: PixelFormat) -> usize {
    (samples * format.bits_per_pixel() as usize + 7) / 8
}

/// Sample by sample packing
pub fn pack_scalar(samples: &[u8], format: PixelFormat) -> Vec<u8> {
    let mut out = Vec::with_capacity(packed_len(samples.len(), format));
    pack_scalar_into(samples, format, &mut out);
    out
}

fn pack_scalar_into(samples: &[u8], format: PixelFormat, out: &mut Vec<u8>) {
    if format == PixelFormat::Bpp8 {
        out.extend_from_slice(samples);
        return;
    }
    let bpp = format.bits_per_pixel();
    for group in samples.chunks(format.pixels_per_byte()) {
        let mut byte = 0u8;
        for (i, &s) in group.iter().enumerate() {
            let value = match format {
                PixelFormat::Bpp1 => u8::from(s >= 128),
                _ => s >> (8 - bpp),
            };
            byte |= value << (8 - bpp * (i as u32 + 1));
        }
        out.push(byte);
    }
}

/// Eight samples per step, packed with shifts and masks on a `u64`.
///
/// Eight samples always make whole output bytes for every format, so the
/// remainder is handed to the scalar path without any carry over.
pub fn pack_bulk(samples: &[u8], format: PixelFormat) -> Vec<u8> {
    if format == PixelFormat::Bpp8 {
        return samples.to_vec();
    }
    let mut out = Vec::with_capacity(packed_len(samples.len(), format));
    let mut chunks = samples.chunks_exact(8);
    for chunk in &mut chunks {
        let mut bytes = [0u8; 8];
        bytes.copy_from_slice(chunk);
        let x = u64::from_be_bytes(bytes);
        match format {
            PixelFormat::Bpp1 => {
                // The top bit of each sample, gathered into the top byte
                let bits = (x >> 7) & 0x0101_0101_0101_0101;
                out.push((bits.wrapping_mul(0x0102_0408_1020_4080) >> 56) as u8);
            }
            PixelFormat::Bpp2 => {
                let m = (x >> 6) & 0x0303_0303_0303_0303;
                let packed = ((m >> 18) & 0x0000_00C0_0000_00C0)
                    | ((m >> 12) & 0x0000_0030_0000_0030)
                    | ((m >> 6) & 0x0000_000C_0000_000C)
                    | (m & 0x0000_0003_0000_0003);
                let b = packed.to_be_bytes();
                out.extend_from_slice(&[b[3], b[7]]);
            }
            PixelFormat::Bpp4 => {
                let packed =
                    ((x >> 8) & 0x00F0_00F0_00F0_00F0) | ((x >> 4) & 0x000F_000F_000F_000F);
                let b = packed.to_be_bytes();
                out.extend_from_slice(&[b[1], b[3], b[5], b[7]]);
            }
            PixelFormat::Bpp8 => unreachable!(),
        }
    }
    pack_scalar_into(chunks.remainder(), format, &mut out);
    out
}

/// Reverses the bit order of every byte, for panels reading 1bpp data LSB first
pub fn reverse_bits_1bpp(bytes: &[u8]) -> Vec<u8> {
    bytes.iter().map(|b| b.reverse_bits()).collect()
}

/// Packs samples, choosing the implementation by input size
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PixelCodec {
    bulk_threshold: usize,
}

impl Default for PixelCodec {
    fn default() -> Self {
        PixelCodec {
            bulk_threshold: DEFAULT_BULK_THRESHOLD,
        }
    }
}

impl PixelCodec {
    /// Codec taking the bulk path for inputs of at least `bulk_threshold` samples
    pub fn new(bulk_threshold: usize) -> Self {
        PixelCodec { bulk_threshold }
    }

    /// The configured threshold
    pub fn bulk_threshold(&self) -> usize {
        self.bulk_threshold
    }

    /// Packs `samples` into `format`
    pub fn pack(&self, samples: &[u8], format: PixelFormat) -> Vec<u8> {
        if samples.len() >= self.bulk_threshold {
            pack_bulk(samples, format)
        } else {
            pack_scalar(samples, format)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    #[test]
    fn known_vectors() {
        let samples = [0x00, 0xFF, 0x80, 0x40, 0xC0, 0x20];
        assert_eq!(pack_scalar(&samples, PixelFormat::Bpp4), [0x0F, 0x84, 0xC2]);

        let samples = [0x00, 0xFF, 0x80, 0x40, 0xC0, 0x20, 0x60, 0xA0];
        assert_eq!(pack_scalar(&samples, PixelFormat::Bpp2), [0x39, 0xC6]);
        assert_eq!(pack_bulk(&samples, PixelFormat::Bpp2), [0x39, 0xC6]);
        assert_eq!(pack_bulk(&samples, PixelFormat::Bpp4), [0x0F, 0x84, 0xC2, 0x6A]);
        assert_eq!(pack_bulk(&samples, PixelFormat::Bpp1), [0b0110_1001]);
    }

    #[test]
    fn one_bit_threshold() {
        assert_eq!(pack_scalar(&[127, 128], PixelFormat::Bpp1), [0b0100_0000]);
        assert_eq!(pack_scalar(&[255; 8], PixelFormat::Bpp1), [0xFF]);
    }

    #[test]
    fn trailing_group_zero_padded() {
        assert_eq!(pack_scalar(&[0xFF], PixelFormat::Bpp4), [0xF0]);
        assert_eq!(pack_scalar(&[0xFF, 0xFF, 0xFF], PixelFormat::Bpp2), [0xFC]);
        assert_eq!(pack_bulk(&[0xFF; 9], PixelFormat::Bpp1), [0xFF, 0x80]);
    }

    #[test]
    fn eight_bit_passthrough() {
        let samples = [1, 2, 3, 250];
        assert_eq!(pack_scalar(&samples, PixelFormat::Bpp8), samples);
        assert_eq!(pack_bulk(&samples, PixelFormat::Bpp8), samples);
    }

    #[test]
    fn lengths() {
        assert_eq!(packed_len(6, PixelFormat::Bpp4), 3);
        assert_eq!(packed_len(7, PixelFormat::Bpp4), 4);
        assert_eq!(packed_len(9, PixelFormat::Bpp1), 2);
        assert_eq!(packed_len(5, PixelFormat::Bpp2), 2);
        assert_eq!(packed_len(0, PixelFormat::Bpp8), 0);
    }

    #[test]
    fn codec_switches_on_threshold() {
        let codec = PixelCodec::new(8);
        let samples: Vec<u8> = (0..16).map(|i| i * 16).collect();
        assert_eq!(
            codec.pack(&samples, PixelFormat::Bpp4),
            pack_scalar(&samples, PixelFormat::Bpp4)
        );
        assert_eq!(PixelCodec::default().bulk_threshold(), DEFAULT_BULK_THRESHOLD);
    }

    #[test]
    fn reverse_bits() {
        assert_eq!(reverse_bits_1bpp(&[0b1000_0001, 0b1100_0000]), [0b1000_0001, 0b0000_0011]);
    }

    fn any_format() -> impl Strategy<Value = PixelFormat> {
        prop::sample::select(PixelFormat::ALL.to_vec())
    }

    proptest! {
        #[test]
        fn bulk_matches_scalar(
            samples in prop::collection::vec(any::<u8>(), 0..200),
            format in any_format(),
        ) {
            prop_assert_eq!(pack_bulk(&samples, format), pack_scalar(&samples, format));
        }

        #[test]
        fn packed_len_matches_output(
            samples in prop::collection::vec(any::<u8>(), 0..64),
            format in any_format(),
        ) {
            prop_assert_eq!(pack_scalar(&samples, format).len(), packed_len(samples.len(), format));
        }
    }
}
