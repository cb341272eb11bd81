use super::{BackendShared, SoftwareVoice};
use crate::backend::{Voice, VoiceParams};
use crate::buffer::Buffer;
use crate::error::{Result, SonanceError};
use crate::music::MusicChannel;
use std::collections::HashMap;
use std::sync::{Arc, RwLock};

/// Named tracks the software music channels can play. Cloning shares the table.
#[derive(Debug, Clone, Default)]
pub struct MusicLibrary {
    tracks: Arc<RwLock<HashMap<String, Arc<Buffer>>>>,
}

impl MusicLibrary {
    pub fn insert(&self, path: impl Into<String>, buffer: Arc<Buffer>) {
        let path = path.into();
        log::debug!("Registered music track '{}'", path);
        self.tracks
            .write()
            .unwrap_or_else(|e| e.into_inner())
            .insert(path, buffer);
    }

    pub fn remove(&self, path: &str) -> Option<Arc<Buffer>> {
        self.tracks
            .write()
            .unwrap_or_else(|e| e.into_inner())
            .remove(path)
    }

    pub fn get(&self, path: &str) -> Option<Arc<Buffer>> {
        self.tracks
            .read()
            .unwrap_or_else(|e| e.into_inner())
            .get(path)
            .cloned()
    }

    pub fn contains(&self, path: &str) -> bool {
        self.get(path).is_some()
    }
}

/// Music channel playing library tracks on a dedicated voice outside the source limit.
pub struct SoftwareMusicChannel {
    backend: Arc<BackendShared>,
    library: MusicLibrary,
    voice: Option<SoftwareVoice>,
    volume: f32,
}

impl SoftwareMusicChannel {
    pub(crate) fn new(backend: Arc<BackendShared>, library: MusicLibrary) -> Self {
        Self {
            backend,
            library,
            voice: None,
            volume: 1.0,
        }
    }

    fn params(&self) -> VoiceParams {
        VoiceParams {
            gain: self.volume,
            ..Default::default()
        }
    }
}

impl MusicChannel for SoftwareMusicChannel {
    fn play(&mut self, path: &str, async_load: bool, looping: bool) -> Result<()> {
        self.stop();

        let buffer = self
            .library
            .get(path)
            .ok_or_else(|| SonanceError::NotFound(path.to_string()))?;
        let format = buffer.format().ok_or(SonanceError::FormatNotSet)?;
        if async_load {
            // Library tracks are already in memory.
            log::debug!("'{}' is resident, loading synchronously", path);
        }

        let mut voice = self.backend.spawn_voice(format, false)?;
        voice.set_looping(looping);
        voice.apply(&self.params());
        voice.submit(buffer)?;
        voice.start()?;
        log::info!("Music channel playing '{}' (loop: {})", path, looping);
        self.voice = Some(voice);
        Ok(())
    }

    fn stop(&mut self) {
        // Dropping the voice releases it in the mixer.
        self.voice = None;
    }

    fn pause(&mut self) {
        if let Some(voice) = self.voice.as_mut() {
            voice.pause();
        }
    }

    fn resume(&mut self) {
        if let Some(voice) = self.voice.as_mut() {
            voice.resume();
        }
    }

    fn is_ended(&self) -> bool {
        self.voice.as_ref().is_none_or(|voice| !voice.is_playing())
    }

    fn set_volume(&mut self, volume: f32) {
        self.volume = volume.clamp(0.0, 1.0);
        let params = self.params();
        if let Some(voice) = self.voice.as_mut() {
            voice.apply(&params);
        }
    }
}
