//! Sample codecs.

pub mod adpcm;

pub use adpcm::CodecState;

/// Converts signed 16-bit little-endian bytes to samples. A trailing odd byte is ignored.
pub fn pcm16_from_bytes(bytes: &[u8]) -> Vec<i16> {
    bytes
        .chunks_exact(2)
        .map(|pair| i16::from_le_bytes([pair[0], pair[1]]))
        .collect()
}

pub fn pcm16_to_bytes(samples: &[i16]) -> Vec<u8> {
    samples.iter().flat_map(|s| s.to_le_bytes()).collect()
}

/// Unsigned 8-bit PCM to signed 16-bit.
pub fn pcm8_to_pcm16(bytes: &[u8]) -> Vec<i16> {
    bytes.iter().map(|&b| ((b as i16) - 128) << 8).collect()
}
