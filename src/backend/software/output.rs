use crate::backend::Mixer;
use crate::config::SonanceDesc;
use crate::error::{Result, SonanceError};
use cpal::traits::{DeviceTrait, HostTrait, StreamTrait};
use cpal::{FromSample, SizedSample};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};

/// Drives a [`Mixer`] from the default output device.
///
/// The cpal stream is not `Send`, so keep this value on the thread that created it.
/// Dropping it stops the stream and drops the mixer.
pub struct DeviceOutput {
    stream: Option<cpal::Stream>,
    is_running: Arc<AtomicBool>,
    frames_processed: Arc<AtomicUsize>,
}

impl DeviceOutput {
    /// Opens the default output device at the session's rate and block size and starts
    /// pulling audio from `mixer`.
    pub fn start(mixer: Box<dyn Mixer>, desc: &SonanceDesc) -> Result<Self> {
        let host = cpal::default_host();
        let device = host
            .default_output_device()
            .ok_or_else(|| SonanceError::DeviceInit("No default output device available".into()))?;

        let config = cpal::StreamConfig {
            channels: mixer.channels(),
            sample_rate: cpal::SampleRate(mixer.sample_rate()),
            buffer_size: cpal::BufferSize::Fixed(desc.block_size as u32),
        };

        let default_config = device.default_output_config().map_err(|e| {
            SonanceError::DeviceInit(format!("Failed to get default config: {}", e))
        })?;

        let is_running = Arc::new(AtomicBool::new(true));
        let frames_processed = Arc::new(AtomicUsize::new(0));
        let scratch = desc.block_size * config.channels as usize;

        let stream = match default_config.sample_format() {
            cpal::SampleFormat::F32 => create_stream::<f32>(
                &device,
                &config,
                mixer,
                scratch,
                is_running.clone(),
                frames_processed.clone(),
            )?,
            cpal::SampleFormat::I16 => create_stream::<i16>(
                &device,
                &config,
                mixer,
                scratch,
                is_running.clone(),
                frames_processed.clone(),
            )?,
            cpal::SampleFormat::U16 => create_stream::<u16>(
                &device,
                &config,
                mixer,
                scratch,
                is_running.clone(),
                frames_processed.clone(),
            )?,
            other => {
                return Err(SonanceError::DeviceInit(format!(
                    "Unsupported device sample format {:?}",
                    other
                )));
            }
        };

        stream
            .play()
            .map_err(|e| SonanceError::DeviceInit(format!("Failed to start stream: {}", e)))?;

        log::info!(
            "Device output started at {} Hz, {} channels",
            config.sample_rate.0,
            config.channels
        );

        Ok(Self {
            stream: Some(stream),
            is_running,
            frames_processed,
        })
    }

    pub fn stop(&mut self) {
        if let Some(stream) = self.stream.take() {
            self.is_running.store(false, Ordering::Relaxed);
            drop(stream);
            log::info!("Device output stopped");
        }
    }

    pub fn is_running(&self) -> bool {
        self.is_running.load(Ordering::Relaxed)
    }

    /// Frames the mixer produced since start.
    pub fn frames_processed(&self) -> usize {
        self.frames_processed.load(Ordering::Relaxed)
    }
}

impl Drop for DeviceOutput {
    fn drop(&mut self) {
        self.stop();
    }
}

fn create_stream<T>(
    device: &cpal::Device,
    config: &cpal::StreamConfig,
    mut mixer: Box<dyn Mixer>,
    scratch_len: usize,
    is_running: Arc<AtomicBool>,
    frames_processed: Arc<AtomicUsize>,
) -> Result<cpal::Stream>
where
    T: SizedSample + FromSample<f32>,
{
    let mut scratch = vec![0.0f32; scratch_len];

    device
        .build_output_stream(
            config,
            move |data: &mut [T], _: &cpal::OutputCallbackInfo| {
                if !is_running.load(Ordering::Relaxed) {
                    data.fill(T::from_sample(0.0f32));
                    return;
                }

                if scratch.len() < data.len() {
                    // Hosts may hand out a larger block than requested.
                    scratch.resize(data.len(), 0.0);
                }
                let block = &mut scratch[..data.len()];
                let frames = mixer.render(block);

                for (out, &sample) in data.iter_mut().zip(block.iter()) {
                    *out = T::from_sample(sample.clamp(-1.0, 1.0));
                }
                frames_processed.fetch_add(frames, Ordering::Relaxed);
            },
            move |err| {
                log::error!("Audio stream error: {}", err);
            },
            None,
        )
        .map_err(|e| SonanceError::DeviceInit(format!("Failed to build stream: {}", e)))
}
