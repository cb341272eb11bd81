//! Sample buffers.
//!
//! A [`Buffer`] owns raw sample bytes plus the format they are stored in. Buffers are
//! shared as `Arc<Buffer>`: the subsystem that created one owns it, sources keep a weak
//! reference, and a backend voice holds a strong reference only while the data is
//! queued or playing. Dropping the last owner therefore unbinds the buffer everywhere
//! while the audio thread finishes with its own reference.

use crate::codec::{self, CodecState, adpcm};
use crate::error::{Result, SonanceError};
use std::ops::{Deref, DerefMut};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{RwLock, RwLockReadGuard, RwLockWriteGuard};
use std::time::Duration;

/// Sample encoding of a buffer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum SampleFormat {
    Pcm,
    Adpcm,
}

/// Where the backend should keep the buffer's data.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum StorageMode {
    HardwarePreferred,
    SoftwareOnly,
    #[default]
    Auto,
}

/// Complete description of a buffer's sample layout.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct BufferFormat {
    pub format: SampleFormat,
    pub channels: u16,
    pub bits_per_sample: u16,
    pub frequency: u32,
}

impl BufferFormat {
    pub fn pcm(channels: u16, bits_per_sample: u16, frequency: u32) -> Self {
        Self {
            format: SampleFormat::Pcm,
            channels,
            bits_per_sample,
            frequency,
        }
    }

    /// ADPCM is always mono with 16-bit logical samples.
    pub fn adpcm(frequency: u32) -> Self {
        Self {
            format: SampleFormat::Adpcm,
            channels: 1,
            bits_per_sample: 16,
            frequency,
        }
    }

    pub fn validate(&self) -> Result<()> {
        let valid = match self.format {
            SampleFormat::Pcm => {
                matches!(self.channels, 1 | 2) && matches!(self.bits_per_sample, 8 | 16)
            }
            SampleFormat::Adpcm => self.channels == 1 && self.bits_per_sample == 16,
        };
        if !valid || self.frequency == 0 {
            return Err(SonanceError::InvalidFormat {
                format: self.format,
                channels: self.channels,
                bits: self.bits_per_sample,
            });
        }
        Ok(())
    }

    pub fn is_stereo(&self) -> bool {
        self.channels > 1
    }

    /// Bytes per PCM frame. ADPCM has no whole-byte frame and reports 1.
    pub fn block_align(&self) -> usize {
        match self.format {
            SampleFormat::Pcm => self.channels as usize * (self.bits_per_sample as usize / 8),
            SampleFormat::Adpcm => 1,
        }
    }

    /// Number of frames stored in `byte_len` bytes.
    pub fn frames_in(&self, byte_len: usize) -> usize {
        match self.format {
            SampleFormat::Pcm => byte_len / self.block_align(),
            SampleFormat::Adpcm => byte_len * 2,
        }
    }

    pub fn duration_of(&self, byte_len: usize) -> Duration {
        Duration::from_secs_f64(self.frames_in(byte_len) as f64 / self.frequency as f64)
    }
}

#[derive(Debug, Default)]
struct BufferInner {
    format: Option<BufferFormat>,
    data: Vec<u8>,
    storage: StorageMode,
    loaded: bool,
}

/// Raw sample storage with format metadata.
#[derive(Debug)]
pub struct Buffer {
    id: u64,
    name: String,
    allow_adpcm: bool,
    force_software: bool,
    inner: RwLock<BufferInner>,
    generation: AtomicU64,
    /// A `BufferWriter` is outstanding
    locked: AtomicBool,
}

impl Buffer {
    /// Creates an empty buffer. Backends call this from their factory.
    pub fn new(id: u64, name: impl Into<String>, allow_adpcm: bool, force_software: bool) -> Self {
        Self {
            id,
            name: name.into(),
            allow_adpcm,
            force_software,
            inner: RwLock::new(BufferInner::default()),
            generation: AtomicU64::new(0),
            locked: AtomicBool::new(false),
        }
    }

    pub fn id(&self) -> u64 {
        self.id
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// Incremented on every successful format change or fill. Voices prepared
    /// against an older generation are stale.
    pub fn generation(&self) -> u64 {
        self.generation.load(Ordering::Acquire)
    }

    fn read(&self) -> RwLockReadGuard<'_, BufferInner> {
        self.inner.read().unwrap_or_else(|e| e.into_inner())
    }

    fn write(&self) -> RwLockWriteGuard<'_, BufferInner> {
        self.inner.write().unwrap_or_else(|e| e.into_inner())
    }

    fn invalidate(&self) {
        self.generation.fetch_add(1, Ordering::AcqRel);
    }

    /// Fixes the sample layout. Existing data is discarded.
    pub fn set_format(&self, format: BufferFormat) -> Result<()> {
        format.validate()?;
        if format.format == SampleFormat::Adpcm && !self.allow_adpcm {
            return Err(SonanceError::Unsupported("ADPCM buffers"));
        }

        let mut inner = self.write();
        inner.format = Some(format);
        inner.data.clear();
        inner.loaded = false;
        drop(inner);

        self.invalidate();
        log::debug!("Buffer '{}' format set to {:?}", self.name, format);
        Ok(())
    }

    pub fn format(&self) -> Option<BufferFormat> {
        self.read().format
    }

    pub fn set_storage_mode(&self, mode: StorageMode) {
        self.write().storage = mode;
    }

    /// Effective storage mode after the backend's software-buffer override.
    pub fn storage_mode(&self) -> StorageMode {
        if self.force_software {
            StorageMode::SoftwareOnly
        } else {
            self.read().storage
        }
    }

    /// Replaces the contents. Filling twice with the same bytes yields the same buffer.
    pub fn fill(&self, bytes: &[u8]) -> Result<()> {
        let mut inner = self.write();
        let format = inner.format.ok_or(SonanceError::FormatNotSet)?;
        let block_align = format.block_align();
        if bytes.len() % block_align != 0 {
            return Err(SonanceError::MisalignedData {
                len: bytes.len(),
                block_align,
            });
        }

        inner.data.clear();
        inner.data.extend_from_slice(bytes);
        inner.loaded = true;
        drop(inner);

        self.invalidate();
        Ok(())
    }

    /// Convenience for 16-bit PCM data. The format must already be 16-bit PCM.
    pub fn fill_pcm16(&self, samples: &[i16]) -> Result<()> {
        match self.format() {
            Some(f) if f.format == SampleFormat::Pcm && f.bits_per_sample == 16 => {
                self.fill(&codec::pcm16_to_bytes(samples))
            }
            Some(f) => Err(SonanceError::InvalidFormat {
                format: f.format,
                channels: f.channels,
                bits: f.bits_per_sample,
            }),
            None => Err(SonanceError::FormatNotSet),
        }
    }

    /// Encodes mono 16-bit PCM into this ADPCM buffer.
    pub fn fill_adpcm_from_pcm(&self, samples: &[i16]) -> Result<()> {
        match self.format() {
            Some(f) if f.format == SampleFormat::Adpcm => {
                let encoded = adpcm::encode(samples, &mut CodecState::new());
                self.fill(&encoded)
            }
            Some(f) => Err(SonanceError::InvalidFormat {
                format: f.format,
                channels: f.channels,
                bits: f.bits_per_sample,
            }),
            None => Err(SonanceError::FormatNotSet),
        }
    }

    /// Locks `capacity` bytes for writing. Finish with [`BufferWriter::unlock`].
    ///
    /// The previous contents are handed to the writer, so until it is unlocked the
    /// buffer reads as not loaded and the mixer holds back queued uses of it. Only one
    /// writer may be outstanding.
    pub fn lock(&self, capacity: usize) -> Result<BufferWriter<'_>> {
        let mut inner = self.write();
        if inner.format.is_none() {
            return Err(SonanceError::FormatNotSet);
        }
        if self.locked.swap(true, Ordering::AcqRel) {
            return Err(SonanceError::AlreadyLocked);
        }
        let mut data = std::mem::take(&mut inner.data);
        inner.loaded = false;
        drop(inner);

        data.clear();
        data.resize(capacity, 0);
        Ok(BufferWriter {
            buffer: self,
            data,
            capacity,
            committed: false,
        })
    }

    pub fn is_locked(&self) -> bool {
        self.locked.load(Ordering::Acquire)
    }

    pub fn size(&self) -> usize {
        self.read().data.len()
    }

    pub fn is_loaded(&self) -> bool {
        self.read().loaded
    }

    pub fn frame_count(&self) -> usize {
        let inner = self.read();
        inner.format.map_or(0, |f| f.frames_in(inner.data.len()))
    }

    /// Playback duration. ADPCM counts two samples per encoded byte.
    pub fn duration(&self) -> Duration {
        let inner = self.read();
        inner
            .format
            .map_or(Duration::ZERO, |f| f.duration_of(inner.data.len()))
    }

    /// Copies the raw bytes out.
    pub fn bytes(&self) -> Vec<u8> {
        self.read().data.clone()
    }

    /// Runs `f` over the raw bytes without blocking; returns `None` if a writer holds
    /// the buffer. Used by the mixer, which must never wait on the application thread.
    pub fn try_with_bytes<R>(&self, f: impl FnOnce(Option<BufferFormat>, &[u8]) -> R) -> Option<R> {
        if self.is_locked() {
            return None;
        }
        let inner = self.inner.try_read().ok()?;
        Some(f(inner.format, &inner.data))
    }

    /// Decodes the contents to interleaved signed 16-bit samples.
    pub fn read_pcm16(&self) -> Result<Vec<i16>> {
        let inner = self.read();
        let format = inner.format.ok_or(SonanceError::FormatNotSet)?;
        Ok(decode_to_pcm16(format, &inner.data, &mut CodecState::new()))
    }
}

/// Decodes `data` in `format` to interleaved 16-bit samples. `state` is only used for
/// ADPCM and is left positioned after the last decoded sample.
pub(crate) fn decode_to_pcm16(format: BufferFormat, data: &[u8], state: &mut CodecState) -> Vec<i16> {
    match (format.format, format.bits_per_sample) {
        (SampleFormat::Adpcm, _) => adpcm::decode(data, (data.len() * 2) as u32, state),
        (SampleFormat::Pcm, 8) => codec::pcm8_to_pcm16(data),
        (SampleFormat::Pcm, _) => codec::pcm16_from_bytes(data),
    }
}

/// Write access to a locked buffer.
pub struct BufferWriter<'a> {
    buffer: &'a Buffer,
    data: Vec<u8>,
    capacity: usize,
    committed: bool,
}

impl BufferWriter<'_> {
    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// Commits `written_size` bytes. The committed size is clamped to the locked
    /// capacity and rounded down to whole frames; either adjustment is reported as
    /// [`SonanceError::CapacityExceeded`] or [`SonanceError::MisalignedData`].
    pub fn unlock(mut self, written_size: usize) -> Result<()> {
        self.finish(written_size)
    }

    fn finish(&mut self, written_size: usize) -> Result<()> {
        if std::mem::replace(&mut self.committed, true) {
            return Ok(());
        }
        let mut data = std::mem::take(&mut self.data);

        let mut inner = self.buffer.write();
        let block_align = inner.format.map_or(1, |f| f.block_align());
        let clamped = written_size.min(self.capacity);
        let size = clamped - clamped % block_align;
        data.truncate(size);
        inner.data = data;
        inner.loaded = true;
        drop(inner);

        self.buffer.locked.store(false, Ordering::Release);
        self.buffer.invalidate();

        if written_size > self.capacity {
            log::warn!(
                "Buffer '{}' unlocked with {} bytes, clamped to {}",
                self.buffer.name,
                written_size,
                size
            );
            return Err(SonanceError::CapacityExceeded {
                written: written_size,
                capacity: self.capacity,
            });
        }
        if size != clamped {
            log::warn!(
                "Buffer '{}' unlocked with {} bytes, truncated to {} whole frames",
                self.buffer.name,
                written_size,
                size
            );
            return Err(SonanceError::MisalignedData {
                len: written_size,
                block_align,
            });
        }
        Ok(())
    }
}

impl Deref for BufferWriter<'_> {
    type Target = [u8];

    fn deref(&self) -> &[u8] {
        &self.data
    }
}

impl DerefMut for BufferWriter<'_> {
    fn deref_mut(&mut self) -> &mut [u8] {
        &mut self.data
    }
}

impl Drop for BufferWriter<'_> {
    fn drop(&mut self) {
        // Dropped without unlock: keep everything that was locked.
        let capacity = self.capacity;
        let _ = self.finish(capacity);
    }
}
