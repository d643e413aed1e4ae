use crate::error::{CompositionError, Result};
use crate::types::*;
use serde::{Deserialize, Serialize};

/// A value that takes effect at `at` and holds until the next key.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq)]
pub struct Keyed<T> {
    pub at: TimeUs,
    pub value: T,
}

// ---------------------------------------------------------------------------
// LayerInstruction
// ---------------------------------------------------------------------------

/// Per-track transform and opacity used while rendering.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct LayerInstruction {
    pub track_id: TrackId,
    pub transforms: Vec<Keyed<Transform>>,
    pub opacities: Vec<Keyed<f64>>,
}

impl LayerInstruction {
    pub fn new(track_id: TrackId) -> Self {
        Self {
            track_id,
            transforms: Vec::new(),
            opacities: Vec::new(),
        }
    }

    pub fn set_transform(&mut self, transform: Transform, at: TimeUs) -> &mut Self {
        set_key(&mut self.transforms, transform, at);
        self
    }

    pub fn set_opacity(&mut self, opacity: f64, at: TimeUs) -> &mut Self {
        set_key(&mut self.opacities, opacity, at);
        self
    }

    pub fn transform_at(&self, t: TimeUs) -> Transform {
        value_at(&self.transforms, t).unwrap_or(Transform::IDENTITY)
    }

    pub fn opacity_at(&self, t: TimeUs) -> f64 {
        value_at(&self.opacities, t).unwrap_or(1.0)
    }

    /// True when neither transform nor opacity changes after time zero.
    pub fn is_static(&self) -> bool {
        self.transforms.len() <= 1 && self.opacities.len() <= 1
    }

    pub fn validate(&self) -> Result<()> {
        if self.transforms.first().map(|k| k.at) != Some(TimeUs::ZERO) {
            return Err(CompositionError::InvalidInstruction(format!(
                "layer {} has no transform at time zero",
                self.track_id
            )));
        }
        if self.opacities.first().map(|k| k.at) != Some(TimeUs::ZERO) {
            return Err(CompositionError::InvalidInstruction(format!(
                "layer {} has no opacity at time zero",
                self.track_id
            )));
        }
        if let Some(bad) = self
            .opacities
            .iter()
            .find(|k| !(0.0..=1.0).contains(&k.value))
        {
            return Err(CompositionError::InvalidInstruction(format!(
                "layer {} opacity {} out of range",
                self.track_id, bad.value
            )));
        }
        Ok(())
    }
}

fn set_key<T>(keys: &mut Vec<Keyed<T>>, value: T, at: TimeUs) {
    match keys.binary_search_by_key(&at, |k| k.at) {
        Ok(i) => keys[i].value = value,
        Err(i) => keys.insert(i, Keyed { at, value }),
    }
}

fn value_at<T: Copy>(keys: &[Keyed<T>], t: TimeUs) -> Option<T> {
    keys.iter().take_while(|k| k.at <= t).last().map(|k| k.value)
}

// ---------------------------------------------------------------------------
// CompositionInstruction
// ---------------------------------------------------------------------------

/// Layers to draw over `time_range`. The first layer is the topmost.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct CompositionInstruction {
    pub time_range: TimeRange,
    pub layers: Vec<LayerInstruction>,
    pub background: Rgba,
}

impl CompositionInstruction {
    /// Position of a track in the stacking order, 0 being the top.
    pub fn stack_position(&self, track_id: TrackId) -> Option<usize> {
        self.layers.iter().position(|l| l.track_id == track_id)
    }

    pub fn validate(&self, composition: &Composition) -> Result<()> {
        for (i, layer) in self.layers.iter().enumerate() {
            layer.validate()?;
            let track = composition.track(layer.track_id).ok_or_else(|| {
                CompositionError::InvalidInstruction(format!(
                    "layer {} refers to a missing track",
                    layer.track_id
                ))
            })?;
            if track.kind != MediaKind::Video {
                return Err(CompositionError::InvalidInstruction(format!(
                    "layer {} refers to an {} track",
                    layer.track_id, track.kind
                )));
            }
            if self.layers[..i].iter().any(|l| l.track_id == layer.track_id) {
                return Err(CompositionError::InvalidInstruction(format!(
                    "track {} is layered twice",
                    layer.track_id
                )));
            }
        }
        Ok(())
    }
}

// ---------------------------------------------------------------------------
// RenderSpec
// ---------------------------------------------------------------------------

/// Output canvas, frame rate and the instructions that fill it.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct RenderSpec {
    pub render_size: Size,
    pub frame_rate: Rational,
    pub instructions: Vec<CompositionInstruction>,
}

impl RenderSpec {
    pub fn frame_duration(&self) -> TimeUs {
        self.frame_rate.frame_duration()
    }

    /// End of the last instruction.
    pub fn duration(&self) -> TimeUs {
        self.instructions
            .iter()
            .map(|i| i.time_range.end())
            .max()
            .unwrap_or(TimeUs::ZERO)
    }

    pub fn validate(&self, composition: &Composition) -> Result<()> {
        if self.render_size.width <= 0.0 || self.render_size.height <= 0.0 {
            return Err(CompositionError::InvalidInstruction(format!(
                "render size {} is empty",
                self.render_size
            )));
        }
        if self.frame_rate.num == 0 || self.frame_rate.den == 0 {
            return Err(CompositionError::InvalidInstruction(format!(
                "frame rate {} is invalid",
                self.frame_rate
            )));
        }
        if self.instructions.is_empty() {
            return Err(CompositionError::InvalidInstruction(
                "no composition instructions".into(),
            ));
        }
        for instruction in &self.instructions {
            instruction.validate(composition)?;
        }
        if self.duration() < composition.duration() {
            return Err(CompositionError::InvalidInstruction(format!(
                "instructions end at {} but the composition runs to {}",
                self.duration(),
                composition.duration()
            )));
        }
        Ok(())
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
