//! Error types for Sonance

use crate::buffer::SampleFormat;
use thiserror::Error;

#[derive(Error, Debug, Clone, PartialEq)]
pub enum SonanceError {
    #[error("Buffer format must be set before writing sample data")]
    FormatNotSet,

    #[error("Invalid buffer format: {format:?} with {channels} channel(s) at {bits} bits")]
    InvalidFormat {
        format: SampleFormat,
        channels: u16,
        bits: u16,
    },

    #[error("Data length {len} is not a multiple of the block alignment {block_align}")]
    MisalignedData { len: usize, block_align: usize },

    #[error("Wrote {written} bytes into a lock of {capacity} bytes")]
    CapacityExceeded { written: usize, capacity: usize },

    #[error("Pitch must be greater than zero (got {0})")]
    InvalidPitch(f32),

    #[error("Operation not supported by this backend: {0}")]
    Unsupported(&'static str),

    #[error("All {0} voices are in use")]
    VoiceLimit(usize),

    #[error("Streaming queue is full ({0} buffers)")]
    QueueFull(usize),

    #[error("No sample data is bound to the source")]
    NoData,

    #[error("Buffer is already locked for writing")]
    AlreadyLocked,

    #[error("Not found: {0}")]
    NotFound(String),

    #[error("Device initialization error: {0}")]
    DeviceInit(String),

    #[error("Unknown backend: {0}")]
    UnknownBackend(String),
}

impl SonanceError {
    /// Recoverable errors: the caller may retry later or carry on muted.
    pub fn is_recoverable(&self) -> bool {
        matches!(
            self,
            Self::VoiceLimit(_) | Self::QueueFull(_) | Self::Unsupported(_) | Self::NoData
        )
    }
}

pub type Result<T> = std::result::Result<T, SonanceError>;
