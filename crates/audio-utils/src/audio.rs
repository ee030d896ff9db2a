use base64::Engine;

/// Sample rate of the PCM16 audio the client streams upstream.
pub const INPUT_SAMPLE_RATE: u32 = 16_000;
/// Sample rate of the PCM16 audio the upstream model speaks with.
pub const OUTPUT_SAMPLE_RATE: u32 = 24_000;

/// Mime type attached to every inbound audio chunk sent upstream.
pub const INPUT_MIME_TYPE: &str = "audio/pcm;rate=16000";
/// Mime type reported for outbound audio when the upstream omits one.
pub const OUTPUT_MIME_TYPE: &str = "audio/pcm;rate=24000";

/// Decodes a base64 string into raw bytes.
pub fn decode_bytes(base64_fragment: &str) -> anyhow::Result<Vec<u8>> {
    Ok(base64::engine::general_purpose::STANDARD.decode(base64_fragment)?)
}

/// Encodes raw bytes as a base64 string.
pub fn encode_bytes(bytes: &[u8]) -> String {
    base64::engine::general_purpose::STANDARD.encode(bytes)
}

/// Converts little-endian PCM16 bytes into normalized f32 samples.
///
/// Each sample is mapped with `sample / 32768.0`, so the result lies in `[-1.0, 1.0)`.
/// A trailing odd byte cannot form a sample and is dropped.
pub fn pcm16_to_f32(bytes: &[u8]) -> Vec<f32> {
    if bytes.len() % 2 != 0 {
        tracing::warn!(
            "PCM16 fragment has an odd length ({} bytes), dropping trailing byte",
            bytes.len()
        );
    }
    bytes
        .chunks_exact(2)
        .map(|chunk| i16::from_le_bytes([chunk[0], chunk[1]]) as f32 / 32768.0)
        .collect()
}

/// Encodes a slice of i16 samples into a base64 PCM16 string.
pub fn encode_i16(pcm16: &[i16]) -> String {
    encode_bytes(&pcm16.to_binary())
}

/// Converts a slice of f32 samples to a vector of i16 samples.
pub fn convert_f32_to_i16(pcm32: &[f32]) -> Vec<i16> {
    pcm32
        .iter()
        .map(|&sample| (sample * 32768.0).clamp(i16::MIN as f32, i16::MAX as f32) as i16)
        .collect()
}

/// A trait for converting audio sample types to a binary representation (Vec<u8>).
pub trait ToBinary {
    fn to_binary(&self) -> Vec<u8>;
}

impl ToBinary for [i16] {
    fn to_binary(&self) -> Vec<u8> {
        self.iter().flat_map(|&sample| sample.to_le_bytes()).collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn pcm16_is_normalized_by_32768() {
        let bytes = [0x00, 0x80, 0x00, 0x40, 0x00, 0x00, 0xff, 0x7f];
        let samples = pcm16_to_f32(&bytes);
        assert_eq!(samples, vec![-1.0, 0.5, 0.0, 32767.0 / 32768.0]);
    }

    #[test]
    fn odd_trailing_byte_is_dropped() {
        let samples = pcm16_to_f32(&[0x00, 0x40, 0x12]);
        assert_eq!(samples, vec![0.5]);
    }

    #[test]
    fn invalid_base64_is_an_error() {
        assert!(decode_bytes("not base64!").is_err());
    }

    #[test]
    fn i16_samples_encode_little_endian() {
        let encoded = encode_i16(&[i16::MIN, 1, i16::MAX]);
        let bytes = decode_bytes(&encoded).unwrap();
        assert_eq!(bytes, vec![0x00, 0x80, 0x01, 0x00, 0xff, 0x7f]);
        assert_eq!(pcm16_to_f32(&bytes)[0], -1.0);
    }

    #[test]
    fn f32_conversion_saturates() {
        assert_eq!(convert_f32_to_i16(&[2.0, -2.0, 0.5]), vec![i16::MAX, i16::MIN, 16384]);
    }
}
