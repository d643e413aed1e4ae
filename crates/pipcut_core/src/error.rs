use crate::types::{MediaKind, TrackId};
use thiserror::Error;

#[derive(Debug, Error)]
pub enum CompositionError {
    #[error("clip '{clip}' has no {kind} track")]
    MissingTrack { clip: String, kind: MediaKind },

    #[error("insert into track {track} rejected: {reason}")]
    InsertFailed { track: TrackId, reason: String },

    #[error("scale factor must be in (0, 1], got {0}")]
    InvalidScaleFactor(f64),

    #[error("invalid instruction: {0}")]
    InvalidInstruction(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

impl CompositionError {
    pub(crate) fn insert(track: TrackId, reason: impl Into<String>) -> Self {
        Self::InsertFailed {
            track,
            reason: reason.into(),
        }
    }
}

pub type Result<T> = std::result::Result<T, CompositionError>;
