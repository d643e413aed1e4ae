use pipcut_core::types::{ClipHandle, MediaKind, Size, SourceTrack, TimeUs, Transform};
use serde::Deserialize;
use std::path::Path;
use uuid::Uuid;

use crate::error::{RenderError, Result};

// ---------------------------------------------------------------------------
// ffprobe JSON output structures
// ---------------------------------------------------------------------------

#[derive(Debug, Deserialize)]
struct FfprobeOutput {
    #[serde(default)]
    streams: Vec<FfprobeStream>,
    format: FfprobeFormat,
}

#[derive(Debug, Deserialize)]
struct FfprobeStream {
    codec_type: String,
    width: Option<u32>,
    height: Option<u32>,
    r_frame_rate: Option<String>,
    duration: Option<String>,
    #[serde(default)]
    tags: FfprobeTags,
    #[serde(default)]
    side_data_list: Vec<FfprobeSideData>,
}

#[derive(Debug, Default, Deserialize)]
struct FfprobeTags {
    rotate: Option<String>,
}

#[derive(Debug, Deserialize)]
struct FfprobeSideData {
    rotation: Option<f64>,
}

#[derive(Debug, Deserialize)]
struct FfprobeFormat {
    duration: Option<String>,
}

// ---------------------------------------------------------------------------
// Public API
// ---------------------------------------------------------------------------

/// Run ffprobe on a media file and describe it as a `ClipHandle`.
pub fn probe_clip(path: impl AsRef<Path>) -> Result<ClipHandle> {
    let path = path.as_ref();
    if !path.exists() {
        return Err(RenderError::FileNotFound(path.to_path_buf()));
    }

    let output = std::process::Command::new("ffprobe")
        .args([
            "-v",
            "quiet",
            "-print_format",
            "json",
            "-show_format",
            "-show_streams",
        ])
        .arg(path)
        .output()
        .map_err(|e| RenderError::FfprobeExec(e.to_string()))?;

    if !output.status.success() {
        let stderr = String::from_utf8_lossy(&output.stderr);
        return Err(RenderError::FfprobeFailed(stderr.into_owned()));
    }

    let probe: FfprobeOutput = serde_json::from_slice(&output.stdout)?;
    let clip = clip_from_probe(path, &probe);
    tracing::info!(
        clip = %clip.name,
        duration = %clip.duration,
        tracks = clip.tracks.len(),
        "probed clip"
    );
    Ok(clip)
}

// ---------------------------------------------------------------------------
// Internal helpers
// ---------------------------------------------------------------------------

fn clip_from_probe(path: &Path, probe: &FfprobeOutput) -> ClipHandle {
    let mut video_index = 0;
    let mut audio_index = 0;
    let mut tracks = Vec::new();

    for stream in &probe.streams {
        let kind = match stream.codec_type.as_str() {
            "video" => MediaKind::Video,
            "audio" => MediaKind::Audio,
            _ => continue,
        };
        let counter = match kind {
            MediaKind::Video => &mut video_index,
            MediaKind::Audio => &mut audio_index,
        };
        let index = *counter;
        *counter += 1;

        let track = match kind {
            MediaKind::Video => {
                let width = stream.width.unwrap_or(0) as f64;
                let height = stream.height.unwrap_or(0) as f64;
                SourceTrack {
                    index,
                    kind,
                    natural_size: Size::new(width, height),
                    preferred_transform: rotation_transform(
                        stream_rotation(stream),
                        width,
                        height,
                    ),
                    nominal_fps: stream.r_frame_rate.as_deref().and_then(parse_frame_rate),
                }
            }
            MediaKind::Audio => SourceTrack {
                index,
                kind,
                natural_size: Size::ZERO,
                preferred_transform: Transform::IDENTITY,
                nominal_fps: None,
            },
        };
        tracks.push(track);
    }

    let duration = probe
        .format
        .duration
        .as_deref()
        .and_then(parse_seconds)
        .or_else(|| {
            probe
                .streams
                .iter()
                .filter_map(|s| s.duration.as_deref().and_then(parse_seconds))
                .max()
        })
        .unwrap_or(TimeUs::ZERO);

    let name = path
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_else(|| "unknown".to_string());

    ClipHandle {
        id: Uuid::new_v4(),
        name,
        path: path.to_path_buf(),
        duration,
        tracks,
    }
}

fn parse_seconds(s: &str) -> Option<TimeUs> {
    s.parse::<f64>().ok().map(TimeUs::from_seconds)
}

/// Clockwise display rotation in degrees, normalized to 0, 90, 180 or 270.
fn stream_rotation(stream: &FfprobeStream) -> u32 {
    // Display matrix rotation is counter-clockwise; the legacy tag is clockwise.
    let degrees = stream
        .side_data_list
        .iter()
        .find_map(|sd| sd.rotation)
        .map(|r| -r)
        .or_else(|| {
            stream
                .tags
                .rotate
                .as_deref()
                .and_then(|r| r.parse::<f64>().ok())
        })
        .unwrap_or(0.0);

    let quarter = (degrees / 90.0).round() as i64;
    (quarter.rem_euclid(4) * 90) as u32
}

/// Transform that turns a `width`x`height` frame clockwise by `degrees`
/// while keeping it in the positive quadrant.
fn rotation_transform(degrees: u32, width: f64, height: f64) -> Transform {
    match degrees {
        90 => Transform {
            a: 0.0,
            b: 1.0,
            c: -1.0,
            d: 0.0,
            tx: height,
            ty: 0.0,
        },
        180 => Transform {
            a: -1.0,
            b: 0.0,
            c: 0.0,
            d: -1.0,
            tx: width,
            ty: height,
        },
        270 => Transform {
            a: 0.0,
            b: -1.0,
            c: 1.0,
            d: 0.0,
            tx: 0.0,
            ty: width,
        },
        _ => Transform::IDENTITY,
    }
}

/// Parse ffprobe frame rate string like "30000/1001" or "30/1" into f64.
fn parse_frame_rate(rate: &str) -> Option<f64> {
    if let Some((num, den)) = rate.split_once('/') {
        let n: f64 = num.parse().ok()?;
        let d: f64 = den.parse().ok()?;
        if d == 0.0 {
            return None;
        }
        Some(n / d)
    } else {
        rate.parse().ok()
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;

    fn parse(json: &str) -> ClipHandle {
        let output: FfprobeOutput = serde_json::from_str(json).unwrap();
        clip_from_probe(Path::new("/media/clip.mov"), &output)
    }

    #[test]
    fn parse_frame_rate_fraction() {
        assert!((parse_frame_rate("30000/1001").unwrap() - 29.97).abs() < 0.01);
        assert!((parse_frame_rate("30/1").unwrap() - 30.0).abs() < f64::EPSILON);
    }

    #[test]
    fn parse_frame_rate_plain_and_zero_denominator() {
        assert!((parse_frame_rate("29.97").unwrap() - 29.97).abs() < 0.01);
        assert!(parse_frame_rate("30/0").is_none());
    }

    #[test]
    fn video_and_audio_streams_become_tracks() {
        let clip = parse(
            r#"{
                "streams": [
                    {
                        "codec_type": "video",
                        "width": 1920,
                        "height": 1080,
                        "r_frame_rate": "30/1"
                    },
                    { "codec_type": "audio" },
                    { "codec_type": "data" },
                    { "codec_type": "audio" }
                ],
                "format": { "duration": "5.0" }
            }"#,
        );

        assert_eq!(clip.name, "clip.mov");
        assert_eq!(clip.duration, TimeUs::from_seconds(5.0));
        assert_eq!(clip.tracks.len(), 3);

        let video = clip.first_track(MediaKind::Video).unwrap();
        assert_eq!(video.natural_size, Size::new(1920.0, 1080.0));
        assert_eq!(video.preferred_transform, Transform::IDENTITY);
        assert_eq!(video.nominal_fps, Some(30.0));

        let audio: Vec<usize> = clip.tracks_of(MediaKind::Audio).map(|t| t.index).collect();
        assert_eq!(audio, vec![0, 1]);
    }

    #[test]
    fn silent_clip_has_no_audio_track() {
        let clip = parse(
            r#"{
                "streams": [{ "codec_type": "video", "width": 640, "height": 480 }],
                "format": { "duration": "10" }
            }"#,
        );
        assert!(clip.first_track(MediaKind::Audio).is_none());
        assert!(clip.first_track(MediaKind::Video).is_some());
    }

    #[test]
    fn duration_falls_back_to_streams() {
        let clip = parse(
            r#"{
                "streams": [
                    { "codec_type": "video", "width": 2, "height": 2, "duration": "3.5" },
                    { "codec_type": "audio", "duration": "4.0" }
                ],
                "format": {}
            }"#,
        );
        assert_eq!(clip.duration, TimeUs::from_seconds(4.0));
    }

    #[test]
    fn missing_everything_yields_empty_clip() {
        let clip = parse(r#"{ "format": {} }"#);
        assert!(clip.tracks.is_empty());
        assert_eq!(clip.duration, TimeUs::ZERO);
    }

    #[test]
    fn display_matrix_rotation_maps_to_quarter_turn() {
        let clip = parse(
            r#"{
                "streams": [{
                    "codec_type": "video",
                    "width": 1920,
                    "height": 1080,
                    "side_data_list": [{ "side_data_type": "Display Matrix", "rotation": -90 }]
                }],
                "format": { "duration": "1" }
            }"#,
        );
        let t = clip.tracks[0].preferred_transform;
        assert_eq!((t.a, t.b, t.c, t.d), (0.0, 1.0, -1.0, 0.0));
        // The rotated frame stays inside [0, 1080] x [0, 1920].
        assert_eq!(t.apply(0.0, 0.0), (1080.0, 0.0));
        assert_eq!(t.apply(1920.0, 1080.0), (0.0, 1920.0));
    }

    #[test]
    fn legacy_rotate_tag_is_honoured() {
        let clip = parse(
            r#"{
                "streams": [{
                    "codec_type": "video",
                    "width": 640,
                    "height": 480,
                    "tags": { "rotate": "180" }
                }],
                "format": { "duration": "1" }
            }"#,
        );
        let t = clip.tracks[0].preferred_transform;
        assert_eq!(t.apply(0.0, 0.0), (640.0, 480.0));
        assert_eq!(t.apply(640.0, 480.0), (0.0, 0.0));
    }

    #[test]
    fn rotation_normalization() {
        let rotate_tag = |r: &str| FfprobeStream {
            codec_type: "video".into(),
            width: None,
            height: None,
            r_frame_rate: None,
            duration: None,
            tags: FfprobeTags {
                rotate: Some(r.into()),
            },
            side_data_list: vec![],
        };
        assert_eq!(stream_rotation(&rotate_tag("-90")), 270);
        assert_eq!(stream_rotation(&rotate_tag("450")), 90);
        assert_eq!(stream_rotation(&rotate_tag("0")), 0);
        assert_eq!(rotation_transform(270, 640.0, 480.0).apply(640.0, 0.0), (0.0, 0.0));
    }

    #[test]
    fn probe_nonexistent_file_returns_error() {
        let result = probe_clip("/tmp/does_not_exist_pipcut_probe_test.mp4");
        assert!(matches!(result, Err(RenderError::FileNotFound(_))));
    }
}
