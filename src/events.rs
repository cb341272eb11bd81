//! Event types for Sonance

use crate::source::SourceId;

/// Notifications surfaced by [`SonanceSession::poll_events`](crate::session::SonanceSession::poll_events).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SonanceEvent {
    /// The source ran out of data and stopped.
    SourceCompleted { source_id: SourceId },
    /// One queued buffer was fully played and left the streaming queue.
    BufferProcessed { source_id: SourceId },
    /// A buffer was refilled while queued; playback stopped.
    SourceInvalidated { source_id: SourceId },
}

impl SonanceEvent {
    pub fn source_id(&self) -> SourceId {
        match self {
            Self::SourceCompleted { source_id }
            | Self::BufferProcessed { source_id }
            | Self::SourceInvalidated { source_id } => *source_id,
        }
    }

    pub fn is_error(&self) -> bool {
        matches!(self, Self::SourceInvalidated { .. })
    }
}
