use pipcut_core::error::CompositionError;
use pipcut_core::types::TrackId;
use std::path::PathBuf;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum RenderError {
    #[error("file not found: {0}")]
    FileNotFound(PathBuf),

    #[error("failed to execute ffprobe: {0}")]
    FfprobeExec(String),

    #[error("ffprobe failed: {0}")]
    FfprobeFailed(String),

    #[error("ffmpeg not found")]
    FfmpegNotFound,

    #[error("ffmpeg failed: {0}")]
    FfmpegFailed(String),

    #[error("an export to {0} is already running")]
    DestinationBusy(PathBuf),

    #[error("layer {0} uses a transform that is not a scale, flip or quarter turn")]
    UnsupportedTransform(TrackId),

    #[error("nothing to render")]
    EmptyComposition,

    #[error("export cancelled")]
    Cancelled,

    #[error(transparent)]
    Composition(#[from] CompositionError),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

pub type Result<T> = std::result::Result<T, RenderError>;
