//! Timeline model and composer for the concatenate-plus-overlay render.

pub mod compose;
pub mod error;
pub mod instruction;
pub mod session;
pub mod settings;
pub mod timeline;
pub mod types;

pub use compose::{compose, Composer, DEFAULT_OVERLAY_SCALE};
pub use error::{CompositionError, Result};
pub use instruction::{CompositionInstruction, LayerInstruction, RenderSpec};
pub use timeline::CompositionBuilder;
