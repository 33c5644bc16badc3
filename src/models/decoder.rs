//! Base64 chunked float32 weight buffers

use crate::error::{NoteScanError, Result};
use base64::alphabet;
use base64::engine::general_purpose::{GeneralPurpose, PAD};
use base64::engine::DecodePaddingMode;
use base64::Engine as _;

const FLOAT_BYTES: usize = std::mem::size_of::<f32>();

/// Standard alphabet; encodes with padding, decodes with or without it
const WEIGHTS: GeneralPurpose = GeneralPurpose::new(
    &alphabet::STANDARD,
    PAD.with_decode_padding_mode(DecodePaddingMode::Indifferent),
);

/// Decodes artifact weight chunks into flat float arrays.
pub struct WeightDecoder;

impl WeightDecoder {
    /// Decode ordered base64 chunks of a little-endian float32 buffer.
    ///
    /// Each chunk is decoded on its own and must hold a whole number of
    /// floats. Output preserves chunk order. No chunks yields an empty vec.
    pub fn decode<S: AsRef<str>>(chunks: &[S]) -> Result<Vec<f32>> {
        let mut values = Vec::new();

        for (index, chunk) in chunks.iter().enumerate() {
            let bytes = WEIGHTS
                .decode(chunk.as_ref().trim())
                .map_err(|e| NoteScanError::Decode {
                    chunk: index,
                    message: e.to_string(),
                })?;

            if bytes.len() % FLOAT_BYTES != 0 {
                return Err(NoteScanError::Decode {
                    chunk: index,
                    message: format!(
                        "byte length {} is not a multiple of {}",
                        bytes.len(),
                        FLOAT_BYTES
                    ),
                });
            }

            values.reserve(bytes.len() / FLOAT_BYTES);
            values.extend(
                bytes
                    .chunks_exact(FLOAT_BYTES)
                    .map(|b| f32::from_le_bytes([b[0], b[1], b[2], b[3]])),
            );
        }

        Ok(values)
    }
}

/// Encodes float buffers the way artifacts store them.
pub struct WeightEncoder;

impl WeightEncoder {
    /// Split `values` into chunks of at most `chunk_floats` floats and
    /// base64 encode each as little-endian bytes.
    pub fn encode(values: &[f32], chunk_floats: usize) -> Vec<String> {
        let chunk_floats = chunk_floats.max(1);
        values
            .chunks(chunk_floats)
            .map(|slice| {
                let bytes: Vec<u8> = slice.iter().flat_map(|v| v.to_le_bytes()).collect();
                WEIGHTS.encode(bytes)
            })
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rand::Rng;

    #[test]
    fn test_empty_input_yields_empty_output() {
        let chunks: Vec<String> = Vec::new();
        assert!(WeightDecoder::decode(&chunks).unwrap().is_empty());
    }

    #[test]
    fn test_round_trip_across_chunk_boundaries() {
        let mut rng = rand::thread_rng();
        let values: Vec<f32> = (0..257).map(|_| rng.gen_range(-10.0..10.0)).collect();

        for chunk_floats in [1, 3, 64, 256, 257, 1000] {
            let chunks = WeightEncoder::encode(&values, chunk_floats);
            let decoded = WeightDecoder::decode(&chunks).unwrap();
            assert_eq!(decoded, values, "chunk size {}", chunk_floats);
        }
    }

    #[test]
    fn test_chunk_order_is_preserved() {
        let first = WeightEncoder::encode(&[1.0, 2.0], 2);
        let second = WeightEncoder::encode(&[3.0], 1);
        let chunks = vec![second[0].clone(), first[0].clone()];
        assert_eq!(WeightDecoder::decode(&chunks).unwrap(), vec![3.0, 1.0, 2.0]);
    }

    #[test]
    fn test_known_little_endian_bytes() {
        // 1.0f32 == 0x3F800000
        let chunk = WEIGHTS.encode([0x00, 0x00, 0x80, 0x3F]);
        assert_eq!(WeightDecoder::decode(&[chunk]).unwrap(), vec![1.0]);
    }

    #[test]
    fn test_invalid_base64_is_decode_error() {
        let err = WeightDecoder::decode(&["not*base64!"]).unwrap_err();
        assert!(matches!(err, NoteScanError::Decode { chunk: 0, .. }));
    }

    #[test]
    fn test_partial_float_is_decode_error() {
        let good = WeightEncoder::encode(&[1.0], 1).remove(0);
        let bad = WEIGHTS.encode([1u8, 2, 3]);
        let err = WeightDecoder::decode(&[good, bad]).unwrap_err();
        assert!(matches!(err, NoteScanError::Decode { chunk: 1, .. }));
    }

    #[test]
    fn test_unpadded_chunk_is_accepted() {
        // [1.0, 2.0] is 8 bytes, which needs one '=' of padding
        let padded = WeightEncoder::encode(&[1.0, 2.0], 2).remove(0);
        assert!(padded.ends_with('='));
        let unpadded = padded.trim_end_matches('=');
        assert_eq!(WeightDecoder::decode(&[unpadded]).unwrap(), vec![1.0, 2.0]);
        assert_eq!(WeightDecoder::decode(&[padded]).unwrap(), vec![1.0, 2.0]);
    }
}
