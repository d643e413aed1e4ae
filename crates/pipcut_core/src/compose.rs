use crate::error::{CompositionError, Result};
use crate::instruction::{CompositionInstruction, LayerInstruction, RenderSpec};
use crate::settings::ExportSettings;
use crate::timeline::CompositionBuilder;
use crate::types::*;

/// Default ratio applied to the overlay clip's natural size.
pub const DEFAULT_OVERLAY_SCALE: f64 = 0.25;

/// Builds the "two clips back to back, third clip picture-in-picture" timeline.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Composer {
    pub scale_factor: f64,
    pub frame_rate: Rational,
}

impl Default for Composer {
    fn default() -> Self {
        Self {
            scale_factor: DEFAULT_OVERLAY_SCALE,
            frame_rate: Rational::FPS_30,
        }
    }
}

impl Composer {
    pub fn new(scale_factor: f64) -> Self {
        Self {
            scale_factor,
            ..Self::default()
        }
    }

    pub fn from_settings(settings: &ExportSettings) -> Self {
        Self {
            scale_factor: settings.scale_factor,
            frame_rate: settings.frame_rate,
        }
    }

    /// Compose `first` and `second` one after the other with `overlay` scaled
    /// down and pinned to the bottom-left for the whole timeline.
    ///
    /// Tracks are allocated in a fixed order: joined video, joined audio,
    /// overlay video. The overlay clip's audio is never used.
    ///
    /// Only `first`'s preferred transform is applied to the joined track, and
    /// the overlay is anchored using `first`'s height even when `second` is
    /// taller. Both are kept as-is for output compatibility.
    pub fn compose(
        &self,
        first: &ClipHandle,
        second: &ClipHandle,
        overlay: &ClipHandle,
    ) -> Result<(Composition, RenderSpec)> {
        if !(self.scale_factor > 0.0 && self.scale_factor <= 1.0) {
            return Err(CompositionError::InvalidScaleFactor(self.scale_factor));
        }

        let bases = [first, second];
        let base_videos = bases
            .iter()
            .map(|clip| require(clip, MediaKind::Video))
            .collect::<Result<Vec<_>>>()?;
        let base_audios = bases
            .iter()
            .map(|clip| require(clip, MediaKind::Audio))
            .collect::<Result<Vec<_>>>()?;
        let overlay_video = require(overlay, MediaKind::Video)?;

        let mut builder = CompositionBuilder::new();
        let joined_video = builder.add_track(MediaKind::Video);
        let joined_audio = builder.add_track(MediaKind::Audio);
        let overlay_track = builder.add_track(MediaKind::Video);

        let mut offset = TimeUs::ZERO;
        for ((clip, video), audio) in bases.iter().zip(&base_videos).zip(&base_audios) {
            let range = clip.full_range();
            builder
                .insert_time_range(joined_video, clip, video, range, offset)
                .insert_time_range(joined_audio, clip, audio, range, offset);
            offset = offset + clip.duration;
        }
        let joined_duration = offset;

        builder.insert_time_range(
            overlay_track,
            overlay,
            overlay_video,
            overlay.full_range(),
            TimeUs::ZERO,
        );

        let composition = builder.build()?;

        let canvas = base_videos
            .iter()
            .fold(Size::ZERO, |acc, v| acc.max(v.natural_size));

        let anchor = base_videos[0];
        let mut joined_layer = LayerInstruction::new(joined_video);
        joined_layer
            .set_transform(anchor.preferred_transform, TimeUs::ZERO)
            .set_opacity(1.0, TimeUs::ZERO);

        let overlay_transform = overlay_video
            .preferred_transform
            .translated_by(
                0.0,
                canvas.height - anchor.natural_size.height * self.scale_factor,
            )
            .scaled_by(self.scale_factor, self.scale_factor);
        let mut overlay_layer = LayerInstruction::new(overlay_track);
        overlay_layer
            .set_transform(overlay_transform, TimeUs::ZERO)
            .set_opacity(1.0, TimeUs::ZERO);

        let total = joined_duration.max(overlay.duration);
        let instruction = CompositionInstruction {
            time_range: TimeRange::from_zero(total),
            layers: vec![overlay_layer, joined_layer],
            background: Rgba::TRANSPARENT,
        };

        let spec = RenderSpec {
            render_size: canvas,
            frame_rate: self.frame_rate,
            instructions: vec![instruction],
        };

        tracing::info!(
            canvas = %canvas,
            joined = %joined_duration,
            total = %total,
            scale = self.scale_factor,
            "composed picture-in-picture timeline"
        );

        Ok((composition, spec))
    }
}

/// Compose with the default frame rate.
pub fn compose(
    first: &ClipHandle,
    second: &ClipHandle,
    overlay: &ClipHandle,
    scale_factor: f64,
) -> Result<(Composition, RenderSpec)> {
    Composer::new(scale_factor).compose(first, second, overlay)
}

fn require(clip: &ClipHandle, kind: MediaKind) -> Result<&SourceTrack> {
    clip.first_track(kind)
        .ok_or_else(|| CompositionError::MissingTrack {
            clip: clip.name.clone(),
            kind,
        })
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
