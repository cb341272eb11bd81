//! Comb/all-pass reverb driven by [`ReverbParams`].

use crate::effect::ReverbParams;
use crate::spatial::attenuation::mb_to_gain;

// Tunings at 44.1 kHz for a room size of 7.5 m.
const COMB_TUNING: [usize; 4] = [1116, 1188, 1277, 1356];
const ALLPASS_TUNING: [usize; 2] = [556, 441];
const STEREO_SPREAD: usize = 23;
const REFERENCE_RATE: f32 = 44100.0;
const REFERENCE_ROOM: f32 = 7.5;
const INPUT_GAIN: f32 = 0.1;

#[derive(Debug, Clone)]
struct Delay {
    line: Vec<f32>,
    index: usize,
}

impl Delay {
    fn new(len: usize) -> Self {
        Self {
            line: vec![0.0; len],
            index: 0,
        }
    }

    fn process(&mut self, input: f32) -> f32 {
        if self.line.is_empty() {
            return input;
        }
        let out = self.line[self.index];
        self.line[self.index] = input;
        self.index = (self.index + 1) % self.line.len();
        out
    }
}

#[derive(Debug, Clone)]
struct Comb {
    line: Vec<f32>,
    index: usize,
    feedback: f32,
    damp: f32,
    store: f32,
}

impl Comb {
    fn process(&mut self, input: f32) -> f32 {
        let out = self.line[self.index];
        self.store = out * (1.0 - self.damp) + self.store * self.damp;
        self.line[self.index] = input + self.store * self.feedback;
        self.index = (self.index + 1) % self.line.len();
        out
    }
}

#[derive(Debug, Clone)]
struct Allpass {
    line: Vec<f32>,
    index: usize,
    feedback: f32,
}

impl Allpass {
    fn process(&mut self, input: f32) -> f32 {
        let buffered = self.line[self.index];
        self.line[self.index] = input + buffered * self.feedback;
        self.index = (self.index + 1) % self.line.len();
        buffered - input
    }
}

#[derive(Debug, Clone)]
struct Channel {
    reflections: Delay,
    late: Delay,
    combs: Vec<Comb>,
    allpasses: Vec<Allpass>,
}

/// Stereo reverb. Input and output are interleaved stereo.
#[derive(Debug, Clone)]
pub struct Reverb {
    sample_rate: u32,
    params: ReverbParams,
    channels: [Channel; 2],
    room_gain: f32,
    reflections_gain: f32,
    late_gain: f32,
}

impl Reverb {
    pub fn new(sample_rate: u32, params: &ReverbParams) -> Self {
        let params = params.clamped();
        Self {
            sample_rate,
            channels: [
                build_channel(sample_rate, &params, 0),
                build_channel(sample_rate, &params, STEREO_SPREAD),
            ],
            room_gain: mb_to_gain(params.room),
            reflections_gain: mb_to_gain(params.reflections),
            late_gain: mb_to_gain(params.late_reverb),
            params,
        }
    }

    pub fn params(&self) -> &ReverbParams {
        &self.params
    }

    /// Replaces the parameters. The tail is cleared.
    pub fn set_params(&mut self, params: &ReverbParams) {
        *self = Self::new(self.sample_rate, params);
    }

    /// Writes the wet signal for `input` into `output`.
    pub fn process(&mut self, input: &[f32], output: &mut [f32]) {
        for (frame_in, frame_out) in input.chunks_exact(2).zip(output.chunks_exact_mut(2)) {
            for (c, channel) in self.channels.iter_mut().enumerate() {
                let early = channel.reflections.process(frame_in[c]);
                let late_in = channel.late.process(early) * INPUT_GAIN;

                let mut late: f32 = channel.combs.iter_mut().map(|comb| comb.process(late_in)).sum();
                for allpass in &mut channel.allpasses {
                    late = allpass.process(late);
                }

                frame_out[c] =
                    self.room_gain * (early * self.reflections_gain + late * self.late_gain);
            }
        }
    }
}

fn build_channel(sample_rate: u32, params: &ReverbParams, spread: usize) -> Channel {
    let rate_scale = sample_rate as f32 / REFERENCE_RATE;
    let size_scale = (params.room_size / REFERENCE_ROOM).clamp(0.25, 4.0);
    // Lower density packs the echoes closer together.
    let density_scale = 0.8 + 0.2 * params.density / 100.0;

    // High frequencies die faster for a low HF ratio or an attenuated HF room filter.
    let damp = ((1.0 - params.decay_hf_ratio.min(1.0)) * 0.4
        + (1.0 - mb_to_gain(params.room_hf)) * 0.4)
        .clamp(0.0, 0.8);

    let combs = COMB_TUNING
        .iter()
        .map(|&tuning| {
            let len = (((tuning + spread) as f32) * rate_scale * size_scale * density_scale)
                .max(1.0) as usize;
            let seconds = len as f32 / sample_rate as f32;
            // 60 dB of decay over decay_time.
            let feedback = 10f32.powf(-3.0 * seconds / params.decay_time);
            Comb {
                line: vec![0.0; len],
                index: 0,
                feedback,
                damp,
                store: 0.0,
            }
        })
        .collect();

    let allpass_feedback = 0.3 + 0.4 * params.diffusion / 100.0;
    let allpasses = ALLPASS_TUNING
        .iter()
        .map(|&tuning| {
            let len = (((tuning + spread) as f32) * rate_scale).max(1.0) as usize;
            Allpass {
                line: vec![0.0; len],
                index: 0,
                feedback: allpass_feedback,
            }
        })
        .collect();

    Channel {
        reflections: Delay::new((params.reflections_delay * sample_rate as f32) as usize),
        late: Delay::new((params.late_reverb_delay * sample_rate as f32) as usize),
        combs,
        allpasses,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::effect::ReverbPreset;

    const RATE: u32 = 48000;

    fn energy(samples: &[f32]) -> f32 {
        samples.iter().map(|s| s * s).sum()
    }

    fn impulse_response(params: &ReverbParams, seconds: f32) -> Vec<f32> {
        let mut reverb = Reverb::new(RATE, params);
        let frames = (seconds * RATE as f32) as usize;
        let mut input = vec![0.0f32; frames * 2];
        input[0] = 1.0;
        input[1] = 1.0;
        let mut output = vec![0.0f32; frames * 2];
        reverb.process(&input, &mut output);
        output
    }

    #[test]
    fn silence_in_silence_out() {
        let mut reverb = Reverb::new(RATE, &ReverbParams::default());
        let input = vec![0.0f32; 1024];
        let mut output = vec![1.0f32; 1024];
        reverb.process(&input, &mut output);
        assert!(output.iter().all(|&s| s == 0.0));
    }

    #[test]
    fn impulse_tail_decays() {
        let out = impulse_response(&ReverbPreset::StoneRoom.params(), 3.0);
        let block = RATE as usize / 5 * 2;
        let early = energy(&out[block..2 * block]);
        let late = energy(&out[out.len() - block..]);
        assert!(early > 0.0);
        assert!(late < early * 0.1, "late {late} early {early}");
        assert!(out.iter().all(|s| s.is_finite()));
    }

    #[test]
    fn longer_decay_rings_longer() {
        let short = ReverbParams {
            decay_time: 0.5,
            ..ReverbParams::default()
        };
        let long = ReverbParams {
            decay_time: 5.0,
            ..ReverbParams::default()
        };
        let tail = |out: &[f32]| energy(&out[out.len() / 2..]);
        assert!(tail(&impulse_response(&long, 2.0)) > tail(&impulse_response(&short, 2.0)));
    }

    #[test]
    fn muted_room_is_near_silent() {
        let params = ReverbParams {
            room: -10000,
            ..ReverbParams::default()
        };
        let out = impulse_response(&params, 0.5);
        assert!(out.iter().all(|s| s.abs() < 1e-3));
    }
}
