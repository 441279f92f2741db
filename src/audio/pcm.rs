//! Base64 PCM16 ⇄ f32 transcoding.
//!
//! The wire format is base64 text of little-endian signed 16-bit mono samples.

use super::{AudioError, Result};
use base64::Engine;
use base64::engine::general_purpose::STANDARD;

/// Decode a base64 PCM16 chunk to samples in [-1, 1).
pub fn decode(data: &str) -> Result<Vec<f32>> {
    let bytes = STANDARD.decode(data.trim())?;
    if bytes.len() % 2 != 0 {
        return Err(AudioError::OddLength(bytes.len()));
    }
    Ok(bytes
        .chunks_exact(2)
        .map(|pair| i16::from_le_bytes([pair[0], pair[1]]) as f32 / 32768.0)
        .collect())
}

/// Convert samples to PCM16, clamping to [-1, 1]. Negative values scale by
/// 32768 and positive by 32767 so both extremes are representable.
pub fn to_i16(samples: &[f32]) -> Vec<i16> {
    samples
        .iter()
        .map(|&s| {
            let s = if s.is_nan() { 0.0 } else { s.clamp(-1.0, 1.0) };
            if s < 0.0 {
                (s * 32768.0) as i16
            } else {
                (s * 32767.0) as i16
            }
        })
        .collect()
}

/// Encode samples as base64 PCM16.
pub fn encode(samples: &[f32]) -> String {
    let pcm: Vec<i16> = to_i16(samples).into_iter().map(i16::to_le).collect();
    STANDARD.encode(bytemuck::cast_slice::<i16, u8>(&pcm))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn b64(samples: &[i16]) -> String {
        let bytes: Vec<u8> = samples.iter().flat_map(|s| s.to_le_bytes()).collect();
        STANDARD.encode(bytes)
    }

    #[test]
    fn test_decode_scale() {
        let samples = decode(&b64(&[0, 16384, -32768, 32767])).unwrap();
        assert_eq!(samples[0], 0.0);
        assert_eq!(samples[1], 0.5);
        assert_eq!(samples[2], -1.0);
        assert!(samples[3] < 1.0);
    }

    #[test]
    fn test_encode_asymmetric_scale_and_clamp() {
        let pcm = to_i16(&[1.0, -1.0, 2.5, -7.0, 0.5, -0.5]);
        assert_eq!(pcm, vec![32767, -32768, 32767, -32768, 16383, -16384]);
    }

    #[test]
    fn test_encode_is_little_endian() {
        let bytes = STANDARD.decode(encode(&[-1.0])).unwrap();
        assert_eq!(bytes, vec![0x00, 0x80]);
    }

    #[test]
    fn test_reencode_within_one_step() {
        let original: Vec<i16> = vec![0, 1, -1, 100, -100, 12345, -12345, 32767, -32768, 16384];
        let decoded = decode(&b64(&original)).unwrap();
        let reencoded = decode(&encode(&decoded)).unwrap();

        for (a, b) in original.iter().zip(&reencoded) {
            let b = (b * 32768.0).round() as i32;
            assert!((*a as i32 - b).abs() <= 1, "{} vs {}", a, b);
        }
    }

    #[test]
    fn test_decode_errors() {
        assert!(matches!(decode("!!not base64"), Err(AudioError::Decode(_))));
        assert!(matches!(
            decode(&STANDARD.encode([1u8, 2, 3])),
            Err(AudioError::OddLength(3))
        ));
        assert!(decode("").unwrap().is_empty());
    }
}
