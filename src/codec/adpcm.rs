//! IMA/DVI ADPCM for 16-bit mono PCM, 4 bits per sample.
//!
//! Both directions are stateful: a stream may be processed in chunks as long as the
//! same [`CodecState`] is carried from one call to the next. Two codes are packed per
//! byte, high nibble first. A chunk with an odd sample count ends on a half-filled byte
//! whose low nibble is zero, so chunked streams should use even chunk sizes if the
//! encoded bytes are to be concatenated.

/// Adaptive step sizes indexed by [`CodecState::step_index`].
pub const STEP_TABLE: [i32; 89] = [
    7, 8, 9, 10, 11, 12, 13, 14, 16, 17, 19, 21, 23, 25, 28, 31, 34, 37, 41, 45, 50, 55, 60, 66,
    73, 80, 88, 97, 107, 118, 130, 143, 157, 173, 190, 209, 230, 253, 279, 307, 337, 371, 408,
    449, 494, 544, 598, 658, 724, 796, 876, 963, 1060, 1166, 1282, 1411, 1552, 1707, 1878, 2066,
    2272, 2499, 2749, 3024, 3327, 3660, 4026, 4428, 4871, 5358, 5894, 6484, 7132, 7845, 8630,
    9493, 10442, 11487, 12635, 13899, 15289, 16818, 18500, 20350, 22385, 24623, 27086, 29794,
    32767,
];

/// Step index adjustment for each 4-bit code (sign bit clear, then set).
pub const INDEX_TABLE: [i8; 16] = [-1, -1, -1, -1, 2, 4, 6, 8, -1, -1, -1, -1, 2, 4, 6, 8];

const MAX_STEP_INDEX: i32 = STEP_TABLE.len() as i32 - 1;

/// Predictor state shared by the encoder and decoder.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct CodecState {
    pub previous_sample: i16,
    pub step_index: u8,
}

impl CodecState {
    pub fn new() -> Self {
        Self::default()
    }

    /// Step size the next sample will be quantized with.
    pub fn step(&self) -> i32 {
        STEP_TABLE[self.step_index as usize]
    }

    fn advance_index(&mut self, code: u8) {
        let index = self.step_index as i32 + INDEX_TABLE[code as usize] as i32;
        self.step_index = index.clamp(0, MAX_STEP_INDEX) as u8;
    }

    fn apply(&mut self, sign: bool, vpdiff: i32) {
        let predicted = self.previous_sample as i32;
        let predicted = if sign {
            predicted - vpdiff
        } else {
            predicted + vpdiff
        };
        self.previous_sample = predicted.clamp(i16::MIN as i32, i16::MAX as i32) as i16;
    }

    fn encode_sample(&mut self, sample: i16) -> u8 {
        let mut step = self.step();
        let mut diff = sample as i32 - self.previous_sample as i32;
        let sign = diff < 0;
        if sign {
            diff = -diff;
        }

        let mut code = 0u8;
        let mut vpdiff = step >> 3;
        if diff >= step {
            code = 4;
            diff -= step;
            vpdiff += step;
        }
        step >>= 1;
        if diff >= step {
            code |= 2;
            diff -= step;
            vpdiff += step;
        }
        step >>= 1;
        if diff >= step {
            code |= 1;
            vpdiff += step;
        }

        self.apply(sign, vpdiff);
        if sign {
            code |= 8;
        }
        self.advance_index(code);
        code
    }

    fn decode_sample(&mut self, code: u8) -> i16 {
        let step = self.step();
        let magnitude = code & 7;

        let mut vpdiff = step >> 3;
        if magnitude & 4 != 0 {
            vpdiff += step;
        }
        if magnitude & 2 != 0 {
            vpdiff += step >> 1;
        }
        if magnitude & 1 != 0 {
            vpdiff += step >> 2;
        }

        self.apply(code & 8 != 0, vpdiff);
        self.advance_index(code);
        self.previous_sample
    }
}

/// Encodes PCM samples, updating `state` so the next chunk continues the stream.
pub fn encode(pcm: &[i16], state: &mut CodecState) -> Vec<u8> {
    let mut out = Vec::with_capacity(encoded_len(pcm.len()));
    for pair in pcm.chunks(2) {
        let high = state.encode_sample(pair[0]);
        let low = match pair.get(1) {
            Some(&sample) => state.encode_sample(sample),
            None => 0,
        };
        out.push((high << 4) | low);
    }
    out
}

/// Decodes `sample_count` samples from `adpcm`, updating `state`.
///
/// Decoding stops early if `adpcm` holds fewer than `sample_count` codes.
pub fn decode(adpcm: &[u8], sample_count: u32, state: &mut CodecState) -> Vec<i16> {
    let available = adpcm.len() * 2;
    let count = (sample_count as usize).min(available);
    let mut out = Vec::with_capacity(count);

    for i in 0..count {
        let byte = adpcm[i / 2];
        let code = if i % 2 == 0 { byte >> 4 } else { byte & 0x0f };
        out.push(state.decode_sample(code));
    }
    out
}

/// Encoded size in bytes of `sample_count` samples.
pub fn encoded_len(sample_count: usize) -> usize {
    sample_count.div_ceil(2)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sine(len: usize, amplitude: f32, period: f32) -> Vec<i16> {
        (0..len)
            .map(|i| {
                let phase = i as f32 / period * std::f32::consts::TAU;
                (phase.sin() * amplitude) as i16
            })
            .collect()
    }

    #[test]
    fn silence_round_trips_exactly() {
        let pcm = vec![0i16; 1000];
        let encoded = encode(&pcm, &mut CodecState::new());
        assert_eq!(encoded.len(), 500);

        let decoded = decode(&encoded, 1000, &mut CodecState::new());
        assert_eq!(decoded, pcm);
    }

    #[test]
    fn decoder_tracks_encoder_predictor() {
        let pcm = sine(2048, 12000.0, 97.0);
        let mut enc_state = CodecState::new();
        let encoded = encode(&pcm, &mut enc_state);

        let mut dec_state = CodecState::new();
        let decoded = decode(&encoded, pcm.len() as u32, &mut dec_state);

        assert_eq!(decoded.len(), pcm.len());
        assert_eq!(enc_state, dec_state);
    }

    #[test]
    fn error_is_bounded_by_step_size() {
        let pcm = sine(8000, 4000.0, 400.0);
        let mut tracker = CodecState::new();
        let mut steps = Vec::with_capacity(pcm.len());
        for &sample in &pcm {
            steps.push(tracker.step());
            tracker.encode_sample(sample);
        }

        let encoded = encode(&pcm, &mut CodecState::new());
        let decoded = decode(&encoded, pcm.len() as u32, &mut CodecState::new());

        for (i, ((&original, &restored), &step)) in
            pcm.iter().zip(&decoded).zip(&steps).enumerate().skip(256)
        {
            let error = (original as i32 - restored as i32).abs();
            assert!(
                error <= step,
                "sample {i}: error {error} exceeds step {step}"
            );
        }
    }

    #[test]
    fn chunked_encoding_matches_single_pass() {
        let pcm = sine(1000, 9000.0, 64.0);
        let whole = encode(&pcm, &mut CodecState::new());

        let mut state = CodecState::new();
        let mut chunked = Vec::new();
        for chunk in pcm.chunks(100) {
            chunked.extend(encode(chunk, &mut state));
        }
        assert_eq!(whole, chunked);

        let mut state = CodecState::new();
        let mut restored = Vec::new();
        for chunk in chunked.chunks(50) {
            restored.extend(decode(chunk, 100, &mut state));
        }
        assert_eq!(restored, decode(&whole, 1000, &mut CodecState::new()));
    }

    #[test]
    fn odd_sample_count_flushes_half_byte() {
        let mut state = CodecState::new();
        let encoded = encode(&[1000, 2000, 3000], &mut state);
        assert_eq!(encoded.len(), 2);
        assert_eq!(encoded[1] & 0x0f, 0);
    }

    #[test]
    fn extreme_input_saturates_silently() {
        let pcm: Vec<i16> = (0..512)
            .map(|i| if i % 2 == 0 { i16::MAX } else { i16::MIN })
            .collect();
        let mut state = CodecState::new();
        let encoded = encode(&pcm, &mut state);
        let decoded = decode(&encoded, pcm.len() as u32, &mut CodecState::new());
        assert_eq!(decoded.len(), pcm.len());
        assert!(state.step_index as usize <= STEP_TABLE.len() - 1);
    }

    #[test]
    fn decode_stops_at_available_data() {
        let decoded = decode(&[0x00], 10, &mut CodecState::new());
        assert_eq!(decoded.len(), 2);
    }
}
