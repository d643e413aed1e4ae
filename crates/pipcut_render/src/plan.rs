use crate::error::{RenderError, Result};
use pipcut_core::instruction::RenderSpec;
use pipcut_core::types::*;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use uuid::Uuid;

/// Sample rate every audio segment is normalized to before joining.
const AUDIO_SAMPLE_RATE: u32 = 48_000;

/// A compiled render plan ready for ffmpeg execution.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RenderPlan {
    pub inputs: Vec<RenderInput>,
    pub filter_graph: String,
    pub output_args: Vec<String>,
    pub output_path: PathBuf,
    pub duration: TimeUs,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RenderInput {
    pub path: PathBuf,
    pub index: usize,
}

/// How a static layer transform is realized with ffmpeg filters.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LayerGeometry {
    /// Swap the x and y axes (`transpose=0`).
    pub transpose: bool,
    pub hflip: bool,
    pub vflip: bool,
    pub width: u32,
    pub height: u32,
    pub x: i64,
    pub y: i64,
}

/// Decompose `transform` applied to a `source`-sized frame.
///
/// Returns `None` for rotations that are not quarter turns, skews, or
/// transforms that collapse the frame.
pub fn layer_geometry(transform: &Transform, source: Size) -> Option<LayerGeometry> {
    if !transform.is_axis_aligned() || source.width <= 0.0 || source.height <= 0.0 {
        return None;
    }
    let transpose = transform.a == 0.0 && transform.d == 0.0;
    let (sx, sy) = if transpose {
        (transform.c, transform.b)
    } else {
        (transform.a, transform.d)
    };
    if sx == 0.0 || sy == 0.0 {
        return None;
    }

    let corners = [
        (0.0, 0.0),
        (source.width, 0.0),
        (0.0, source.height),
        (source.width, source.height),
    ]
    .map(|(x, y)| transform.apply(x, y));
    let min_x = corners.iter().map(|p| p.0).fold(f64::INFINITY, f64::min);
    let max_x = corners.iter().map(|p| p.0).fold(f64::NEG_INFINITY, f64::max);
    let min_y = corners.iter().map(|p| p.1).fold(f64::INFINITY, f64::min);
    let max_y = corners.iter().map(|p| p.1).fold(f64::NEG_INFINITY, f64::max);

    let width = (max_x - min_x).round() as u32;
    let height = (max_y - min_y).round() as u32;
    if width == 0 || height == 0 {
        return None;
    }

    Some(LayerGeometry {
        transpose,
        hflip: sx < 0.0,
        vflip: sy < 0.0,
        width,
        height,
        x: min_x.round() as i64,
        y: min_y.round() as i64,
    })
}

/// Compile a composition and its render spec into an ffmpeg render plan.
///
/// Video tracks are trimmed and joined per segment, then each layer is
/// transformed and overlaid on a canvas of the render size, bottom layer
/// first. Audio tracks are joined, mixed, and padded with silence to the
/// composite duration.
pub fn compile(
    composition: &Composition,
    spec: &RenderSpec,
    output_path: impl AsRef<Path>,
) -> Result<RenderPlan> {
    spec.validate(composition)?;

    let duration = spec.duration().max(composition.duration());
    if !duration.is_positive() {
        return Err(RenderError::EmptyComposition);
    }

    // Deduplicate inputs by clip path
    let mut path_to_index: HashMap<PathBuf, usize> = HashMap::new();
    let mut clip_to_input: HashMap<Uuid, usize> = HashMap::new();
    let mut inputs: Vec<RenderInput> = Vec::new();
    for track in &composition.tracks {
        for segment in &track.segments {
            if clip_to_input.contains_key(&segment.clip_id) {
                continue;
            }
            let clip = lookup_clip(composition, segment.clip_id)?;
            let idx = *path_to_index.entry(clip.path.clone()).or_insert_with(|| {
                let idx = inputs.len();
                inputs.push(RenderInput {
                    path: clip.path.clone(),
                    index: idx,
                });
                idx
            });
            clip_to_input.insert(segment.clip_id, idx);
        }
    }

    let rate = spec.frame_rate;
    let mut filters: Vec<String> = Vec::new();

    // Per-track video streams
    let mut track_extent: HashMap<TrackId, Size> = HashMap::new();
    for track in composition.tracks_of(MediaKind::Video) {
        if track.segments.is_empty() {
            continue;
        }
        let extent = video_extent(composition, track)?;
        track_extent.insert(track.id, extent);

        let mut cursor = TimeUs::ZERO;
        let mut labels = Vec::new();
        for (j, segment) in track.segments.iter().enumerate() {
            let input = clip_to_input[&segment.clip_id];
            let clip = lookup_clip(composition, segment.clip_id)?;
            let size = clip
                .track(MediaKind::Video, segment.source_track)
                .map(|t| t.natural_size)
                .unwrap_or(extent);

            let mut chain = format!(
                "[{input}:v:{src}]trim=start={start}:end={end},setpts=PTS-STARTPTS,fps={rate},format=rgba",
                src = segment.source_track,
                start = segment.source_range.start.as_seconds(),
                end = segment.source_range.end().as_seconds(),
            );
            if size != extent {
                chain.push_str(&format!(
                    ",pad={w}:{h}:0:0:color={clear}",
                    w = extent.width,
                    h = extent.height,
                    clear = Rgba::TRANSPARENT.to_hex(),
                ));
            }
            chain.push_str(",setsar=1");
            if segment.destination > cursor {
                chain.push_str(&format!(
                    ",tpad=start_duration={gap}:color={clear}",
                    gap = (segment.destination - cursor).as_seconds(),
                    clear = Rgba::TRANSPARENT.to_hex(),
                ));
            }
            let label = format!("v{}s{j}", track.id.0);
            filters.push(format!("{chain}[{label}]"));
            labels.push(label);
            cursor = segment.destination_end();
        }
        filters.push(join_segments(&labels, &format!("v{}", track.id.0), "v=1:a=0"));
    }

    // Canvas and layers, bottom-up
    let canvas_w = spec.render_size.width.round() as u32;
    let canvas_h = spec.render_size.height.round() as u32;
    let total_s = duration.as_seconds();
    let background = spec.instructions[0].background;
    filters.push(format!(
        "color=c={bg}:s={canvas_w}x{canvas_h}:r={rate}:d={total_s},format=rgba[canvas]",
        bg = background.to_hex(),
    ));

    let windowed = spec.instructions.len() > 1;
    let mut layered: Vec<TrackId> = Vec::new();
    let mut current = "canvas".to_string();
    let mut step = 0;
    for instruction in &spec.instructions {
        let at = instruction.time_range.start;
        for layer in instruction.layers.iter().rev() {
            let Some(extent) = track_extent.get(&layer.track_id).copied() else {
                continue;
            };
            if layered.contains(&layer.track_id) {
                return Err(pipcut_core::CompositionError::InvalidInstruction(format!(
                    "track {} appears in more than one instruction",
                    layer.track_id
                ))
                .into());
            }
            layered.push(layer.track_id);

            let geometry = layer_geometry(&layer.transform_at(at), extent)
                .ok_or(RenderError::UnsupportedTransform(layer.track_id))?;
            let opacity = layer.opacity_at(at);

            let mut ops: Vec<String> = Vec::new();
            if geometry.transpose {
                ops.push("transpose=0".into());
            }
            if geometry.hflip {
                ops.push("hflip".into());
            }
            if geometry.vflip {
                ops.push("vflip".into());
            }
            let (base_w, base_h) = if geometry.transpose {
                (extent.height, extent.width)
            } else {
                (extent.width, extent.height)
            };
            if geometry.width != base_w.round() as u32 || geometry.height != base_h.round() as u32 {
                ops.push(format!("scale={}:{}", geometry.width, geometry.height));
            }
            if opacity < 1.0 {
                ops.push(format!("colorchannelmixer=aa={opacity}"));
            }

            let source = format!("v{}", layer.track_id.0);
            let layer_label = if ops.is_empty() {
                source
            } else {
                let label = format!("l{}", layer.track_id.0);
                filters.push(format!("[{source}]{}[{label}]", ops.join(",")));
                label
            };

            let enable = if windowed {
                format!(
                    ":enable='between(t,{},{})'",
                    at.as_seconds(),
                    instruction.time_range.end().as_seconds()
                )
            } else {
                String::new()
            };
            let next = format!("c{step}");
            filters.push(format!(
                "[{current}][{layer_label}]overlay=x={x}:y={y}:eof_action=repeat{enable}[{next}]",
                x = geometry.x,
                y = geometry.y,
            ));
            current = next;
            step += 1;
        }
    }

    let even_w = canvas_w + canvas_w % 2;
    let even_h = canvas_h + canvas_h % 2;
    let pad = if even_w != canvas_w || even_h != canvas_h {
        format!("pad={even_w}:{even_h}:0:0,")
    } else {
        String::new()
    };
    filters.push(format!("[{current}]{pad}format=yuv420p[outv]"));

    // Audio tracks
    let mut audio_labels = Vec::new();
    for track in composition.tracks_of(MediaKind::Audio) {
        if track.segments.is_empty() {
            continue;
        }
        let mut cursor = TimeUs::ZERO;
        let mut labels = Vec::new();
        for (j, segment) in track.segments.iter().enumerate() {
            let input = clip_to_input[&segment.clip_id];
            let mut chain = format!(
                "[{input}:a:{src}]atrim=start={start}:end={end},asetpts=PTS-STARTPTS,aformat=sample_rates={AUDIO_SAMPLE_RATE}:channel_layouts=stereo",
                src = segment.source_track,
                start = segment.source_range.start.as_seconds(),
                end = segment.source_range.end().as_seconds(),
            );
            if segment.destination > cursor {
                let delay_ms = (segment.destination - cursor).0 / 1000;
                chain.push_str(&format!(",adelay={delay_ms}|{delay_ms}"));
            }
            let label = format!("a{}s{j}", track.id.0);
            filters.push(format!("{chain}[{label}]"));
            labels.push(label);
            cursor = segment.destination_end();
        }
        let label = format!("a{}", track.id.0);
        filters.push(join_segments(&labels, &label, "v=0:a=1"));
        audio_labels.push(label);
    }

    let has_audio = !audio_labels.is_empty();
    if has_audio {
        let mixed = if audio_labels.len() > 1 {
            let mix_inputs: String = audio_labels.iter().map(|l| format!("[{l}]")).collect();
            filters.push(format!(
                "{mix_inputs}amix=inputs={}:duration=longest:dropout_transition=0[amixed]",
                audio_labels.len()
            ));
            "amixed".to_string()
        } else {
            audio_labels[0].clone()
        };
        filters.push(format!("[{mixed}]apad=whole_dur={total_s}[outa]"));
    }

    let filter_graph = filters.join(";");
    let output_args = output_args(rate, duration, has_audio);

    Ok(RenderPlan {
        inputs,
        filter_graph,
        output_args,
        output_path: output_path.as_ref().to_path_buf(),
        duration,
    })
}

/// Fixed output policy: MP4, H.264 high quality, AAC, fast-start layout.
fn output_args(rate: Rational, duration: TimeUs, has_audio: bool) -> Vec<String> {
    let mut args = vec!["-map".to_string(), "[outv]".to_string()];
    if has_audio {
        args.extend(["-map".to_string(), "[outa]".to_string()]);
    }
    args.extend(
        [
            "-c:v", "libx264", "-preset", "slow", "-crf", "18", "-pix_fmt", "yuv420p",
        ]
        .map(String::from),
    );
    if has_audio {
        args.extend(["-c:a", "aac", "-b:a", "192k", "-ar", "48000"].map(String::from));
    } else {
        args.push("-an".to_string());
    }
    args.extend([
        "-r".to_string(),
        rate.to_string(),
        "-t".to_string(),
        format!("{}", duration.as_seconds()),
        "-movflags".to_string(),
        "+faststart".to_string(),
        "-f".to_string(),
        "mp4".to_string(),
    ]);
    args
}

fn join_segments(labels: &[String], out: &str, streams: &str) -> String {
    let inputs: String = labels.iter().map(|l| format!("[{l}]")).collect();
    if labels.len() == 1 {
        let kind = if streams.starts_with("v=1") { "null" } else { "anull" };
        format!("{inputs}{kind}[{out}]")
    } else {
        format!("{inputs}concat=n={}:{streams}[{out}]", labels.len())
    }
}

fn lookup_clip(composition: &Composition, id: Uuid) -> Result<&ClipHandle> {
    composition.clip(id).ok_or_else(|| {
        RenderError::Composition(pipcut_core::CompositionError::InvalidInstruction(format!(
            "segment refers to unknown clip {id}"
        )))
    })
}

/// Largest natural size among a video track's segments.
fn video_extent(composition: &Composition, track: &Track) -> Result<Size> {
    let mut extent = Size::ZERO;
    for segment in &track.segments {
        let clip = lookup_clip(composition, segment.clip_id)?;
        if let Some(source) = clip.track(MediaKind::Video, segment.source_track) {
            extent = extent.max(source.natural_size);
        }
    }
    Ok(extent)
}

/// Build ffmpeg args from a render plan.
pub fn build_ffmpeg_args(plan: &RenderPlan) -> Vec<String> {
    let mut args = vec![
        "-y".to_string(),
        "-hide_banner".to_string(),
        "-nostdin".to_string(),
    ];

    // The layer transforms already carry the display rotation.
    for input in &plan.inputs {
        args.push("-noautorotate".to_string());
        args.push("-i".to_string());
        args.push(input.path.to_string_lossy().to_string());
    }

    args.push("-filter_complex".to_string());
    args.push(plan.filter_graph.clone());

    args.extend(plan.output_args.clone());

    args.push(plan.output_path.to_string_lossy().to_string());

    args
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
