//! ffmpeg-backed probing, render planning and export for pipcut compositions.

pub mod error;
pub mod export;
pub mod plan;
pub mod probe;
pub mod transcode;

pub use error::{RenderError, Result};
pub use export::{ExportJob, ExportState, ExportStatus, Exporter};
pub use plan::{build_ffmpeg_args, compile, RenderPlan};
pub use probe::probe_clip;
pub use transcode::{FfmpegTranscoder, RenderProgress, Transcoder};
