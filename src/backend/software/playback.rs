use super::QueueEntry;
use crate::buffer::decode_to_pcm16;
use crate::codec::CodecState;

/// Read position inside one queued buffer, decoded to f32 on first use.
#[derive(Debug)]
pub(crate) struct PlaybackCursor {
    /// Keeps the buffer alive while the mixer reads it
    entry: QueueEntry,
    samples: Vec<f32>,
    channels: usize,
    frames: usize,
    frequency: u32,
    /// Fractional frame position
    position: f64,
}

impl PlaybackCursor {
    /// Decodes `entry`. Returns `None` if the buffer is locked for writing right now.
    ///
    /// ADPCM decoding continues from `codec`, so consecutive streaming buffers decode
    /// as one stream.
    pub fn load(entry: &QueueEntry, codec: &mut CodecState) -> Option<Self> {
        let decoded = entry.buffer.try_with_bytes(|format, bytes| {
            format.map(|format| (format, decode_to_pcm16(format, bytes, codec)))
        })?;

        let (channels, frequency, samples) = match decoded {
            Some((format, pcm)) => (
                format.channels.max(1) as usize,
                format.frequency,
                pcm.into_iter().map(|s| s as f32 / 32768.0).collect(),
            ),
            None => (1, 1, Vec::new()),
        };

        Some(Self {
            entry: entry.clone(),
            frames: samples.len() / channels,
            samples,
            channels,
            frequency,
            position: 0.0,
        })
    }

    /// The buffer was refilled or reformatted after it was queued.
    pub fn is_stale(&self) -> bool {
        self.entry.buffer.generation() != self.entry.generation
    }

    pub fn is_finished(&self) -> bool {
        self.position >= self.frames as f64
    }

    pub fn frames(&self) -> usize {
        self.frames
    }

    pub fn rewind(&mut self) {
        self.position = (self.position - self.frames as f64).max(0.0);
    }

    /// Source frames advanced per output frame.
    pub fn step(&self, pitch: f32, output_rate: u32) -> f64 {
        pitch.max(0.0) as f64 * self.frequency as f64 / output_rate.max(1) as f64
    }

    /// Mixes into interleaved stereo `out` until it is full or the buffer ends.
    /// Returns the number of output frames written.
    pub fn fill(&mut self, out: &mut [f32], left_gain: f32, right_gain: f32, step: f64) -> usize {
        let frame_count = out.len() / 2;
        let mut frames_filled = 0;

        while frames_filled < frame_count && !self.is_finished() {
            let index = self.position as usize;
            let frac = (self.position - index as f64) as f32;
            let next = (index + 1).min(self.frames - 1);

            let (left, right) = if self.channels == 1 {
                let s = lerp(self.samples[index], self.samples[next], frac);
                (s, s)
            } else {
                let a = index * self.channels;
                let b = next * self.channels;
                (
                    lerp(self.samples[a], self.samples[b], frac),
                    lerp(self.samples[a + 1], self.samples[b + 1], frac),
                )
            };

            out[frames_filled * 2] += left * left_gain;
            out[frames_filled * 2 + 1] += right * right_gain;

            self.position += step;
            frames_filled += 1;
            if step <= 0.0 {
                // A zero rate would never advance; hold the sample for this block only.
                break;
            }
        }
        frames_filled
    }
}

fn lerp(a: f32, b: f32, t: f32) -> f32 {
    a + (b - a) * t
}
