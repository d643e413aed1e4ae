use serde::{Deserialize, Serialize};
use std::fmt;
use std::ops::{Add, Div, Mul, Sub};
use std::path::PathBuf;
use uuid::Uuid;

// ---------------------------------------------------------------------------
// TimeUs
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct TimeUs(pub i64);

impl TimeUs {
    pub const ZERO: Self = Self(0);

    pub fn from_seconds(s: f64) -> Self {
        Self((s * 1_000_000.0).round() as i64)
    }

    pub fn as_seconds(&self) -> f64 {
        self.0 as f64 / 1_000_000.0
    }

    pub fn is_positive(&self) -> bool {
        self.0 > 0
    }
}

impl Add for TimeUs {
    type Output = Self;
    fn add(self, rhs: Self) -> Self {
        Self(self.0 + rhs.0)
    }
}

impl Sub for TimeUs {
    type Output = Self;
    fn sub(self, rhs: Self) -> Self {
        Self(self.0 - rhs.0)
    }
}

impl Mul<i64> for TimeUs {
    type Output = Self;
    fn mul(self, rhs: i64) -> Self {
        Self(self.0 * rhs)
    }
}

impl Div<i64> for TimeUs {
    type Output = Self;
    fn div(self, rhs: i64) -> Self {
        Self(self.0 / rhs)
    }
}

impl fmt::Display for TimeUs {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let total_us = self.0.unsigned_abs();
        let total_ms = total_us / 1_000;
        let ms = total_ms % 1_000;
        let total_secs = total_ms / 1_000;
        let secs = total_secs % 60;
        let total_mins = total_secs / 60;
        let mins = total_mins % 60;
        let hours = total_mins / 60;
        if self.0 < 0 {
            write!(f, "-{:02}:{:02}:{:02}.{:03}", hours, mins, secs, ms)
        } else {
            write!(f, "{:02}:{:02}:{:02}.{:03}", hours, mins, secs, ms)
        }
    }
}

// ---------------------------------------------------------------------------
// TimeRange
// ---------------------------------------------------------------------------

/// Half-open range `[start, start + duration)`.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
pub struct TimeRange {
    pub start: TimeUs,
    pub duration: TimeUs,
}

impl TimeRange {
    pub fn new(start: TimeUs, duration: TimeUs) -> Self {
        Self { start, duration }
    }

    /// Range starting at zero, as used for "the whole clip".
    pub fn from_zero(duration: TimeUs) -> Self {
        Self::new(TimeUs::ZERO, duration)
    }

    pub fn end(&self) -> TimeUs {
        self.start + self.duration
    }

    pub fn is_empty(&self) -> bool {
        !self.duration.is_positive()
    }

    pub fn contains(&self, t: TimeUs) -> bool {
        t >= self.start && t < self.end()
    }

    pub fn overlaps(&self, other: &TimeRange) -> bool {
        self.start < other.end() && other.start < self.end()
    }
}

// ---------------------------------------------------------------------------
// Rational
// ---------------------------------------------------------------------------

/// Frame rate expressed as `num / den` frames per second.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
pub struct Rational {
    pub num: u32,
    pub den: u32,
}

impl Rational {
    pub const FPS_30: Self = Self { num: 30, den: 1 };

    pub fn new(num: u32, den: u32) -> Self {
        Self { num, den }
    }

    pub fn as_f64(&self) -> f64 {
        if self.den == 0 {
            return 0.0;
        }
        self.num as f64 / self.den as f64
    }

    /// Duration of a single frame at this rate.
    pub fn frame_duration(&self) -> TimeUs {
        if self.num == 0 {
            return TimeUs::ZERO;
        }
        TimeUs((self.den as i64 * 1_000_000) / self.num as i64)
    }
}

impl Default for Rational {
    fn default() -> Self {
        Self::FPS_30
    }
}

impl fmt::Display for Rational {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.num, self.den)
    }
}

// ---------------------------------------------------------------------------
// MediaKind
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
pub enum MediaKind {
    Video,
    Audio,
}

impl fmt::Display for MediaKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            MediaKind::Video => f.write_str("video"),
            MediaKind::Audio => f.write_str("audio"),
        }
    }
}

// ---------------------------------------------------------------------------
// Size
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize, PartialEq)]
pub struct Size {
    pub width: f64,
    pub height: f64,
}

impl Size {
    pub const ZERO: Self = Self {
        width: 0.0,
        height: 0.0,
    };

    pub fn new(width: f64, height: f64) -> Self {
        Self { width, height }
    }

    /// Component-wise maximum of two sizes.
    pub fn max(self, other: Size) -> Size {
        Size::new(self.width.max(other.width), self.height.max(other.height))
    }
}

impl fmt::Display for Size {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}x{}", self.width, self.height)
    }
}

// ---------------------------------------------------------------------------
// Transform
// ---------------------------------------------------------------------------

/// 2-D affine transform in row-vector form:
/// `x' = a*x + c*y + tx`, `y' = b*x + d*y + ty`.
///
/// `translated_by` and `scaled_by` prepend the new operation, so the most
/// recently added operation is the first one applied to a point.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq)]
pub struct Transform {
    pub a: f64,
    pub b: f64,
    pub c: f64,
    pub d: f64,
    pub tx: f64,
    pub ty: f64,
}

impl Transform {
    pub const IDENTITY: Self = Self {
        a: 1.0,
        b: 0.0,
        c: 0.0,
        d: 1.0,
        tx: 0.0,
        ty: 0.0,
    };

    pub fn translate(tx: f64, ty: f64) -> Self {
        Self {
            tx,
            ty,
            ..Self::IDENTITY
        }
    }

    pub fn scale(sx: f64, sy: f64) -> Self {
        Self {
            a: sx,
            d: sy,
            ..Self::IDENTITY
        }
    }

    /// `self` applied first, then `next`.
    pub fn concat(&self, next: &Transform) -> Transform {
        Transform {
            a: self.a * next.a + self.b * next.c,
            b: self.a * next.b + self.b * next.d,
            c: self.c * next.a + self.d * next.c,
            d: self.c * next.b + self.d * next.d,
            tx: self.tx * next.a + self.ty * next.c + next.tx,
            ty: self.tx * next.b + self.ty * next.d + next.ty,
        }
    }

    pub fn translated_by(&self, tx: f64, ty: f64) -> Transform {
        Transform::translate(tx, ty).concat(self)
    }

    pub fn scaled_by(&self, sx: f64, sy: f64) -> Transform {
        Transform::scale(sx, sy).concat(self)
    }

    pub fn apply(&self, x: f64, y: f64) -> (f64, f64) {
        (
            self.a * x + self.c * y + self.tx,
            self.b * x + self.d * y + self.ty,
        )
    }

    pub fn is_identity(&self) -> bool {
        *self == Self::IDENTITY
    }

    /// True when the linear part only scales, flips, or turns by quarter turns.
    pub fn is_axis_aligned(&self) -> bool {
        (self.b == 0.0 && self.c == 0.0) || (self.a == 0.0 && self.d == 0.0)
    }
}

impl Default for Transform {
    fn default() -> Self {
        Self::IDENTITY
    }
}

// ---------------------------------------------------------------------------
// Rgba
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
pub struct Rgba {
    pub r: u8,
    pub g: u8,
    pub b: u8,
    pub a: u8,
}

impl Rgba {
    pub const TRANSPARENT: Self = Self {
        r: 0,
        g: 0,
        b: 0,
        a: 0,
    };

    pub const BLACK: Self = Self {
        r: 0,
        g: 0,
        b: 0,
        a: 255,
    };

    /// `0xRRGGBBAA` as understood by ffmpeg color options.
    pub fn to_hex(&self) -> String {
        format!("0x{:02X}{:02X}{:02X}{:02X}", self.r, self.g, self.b, self.a)
    }
}

// ---------------------------------------------------------------------------
// SourceTrack / ClipHandle
// ---------------------------------------------------------------------------

/// One decodable stream inside a clip.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct SourceTrack {
    /// Index among the clip's streams of the same kind (ffmpeg `v:N` / `a:N`).
    pub index: usize,
    pub kind: MediaKind,
    pub natural_size: Size,
    pub preferred_transform: Transform,
    pub nominal_fps: Option<f64>,
}

/// Read-only description of a source media file.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ClipHandle {
    pub id: Uuid,
    pub name: String,
    pub path: PathBuf,
    pub duration: TimeUs,
    pub tracks: Vec<SourceTrack>,
}

impl ClipHandle {
    pub fn tracks_of(&self, kind: MediaKind) -> impl Iterator<Item = &SourceTrack> {
        self.tracks.iter().filter(move |t| t.kind == kind)
    }

    pub fn first_track(&self, kind: MediaKind) -> Option<&SourceTrack> {
        self.tracks_of(kind).next()
    }

    pub fn track(&self, kind: MediaKind, index: usize) -> Option<&SourceTrack> {
        self.tracks_of(kind).find(|t| t.index == index)
    }

    pub fn full_range(&self) -> TimeRange {
        TimeRange::from_zero(self.duration)
    }
}

// ---------------------------------------------------------------------------
// Timeline
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct TrackId(pub u32);

impl fmt::Display for TrackId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{}", self.0)
    }
}

/// One `(source range -> destination offset)` mapping inside a track.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Segment {
    pub clip_id: Uuid,
    pub source_track: usize,
    pub source_range: TimeRange,
    pub destination: TimeUs,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Track {
    pub id: TrackId,
    pub kind: MediaKind,
    pub segments: Vec<Segment>,
}

/// Materialized timeline: tracks plus the clips their segments read from.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Composition {
    pub tracks: Vec<Track>,
    pub clips: Vec<ClipHandle>,
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn time_us_add_sub() {
        let a = TimeUs(5_000_000);
        let b = TimeUs(3_000_000);
        assert_eq!(a + b, TimeUs(8_000_000));
        assert_eq!(a - b, TimeUs(2_000_000));
    }

    #[test]
    fn time_us_from_seconds_as_seconds() {
        let t = TimeUs::from_seconds(2.5);
        assert_eq!(t, TimeUs(2_500_000));
        assert!((t.as_seconds() - 2.5).abs() < 1e-9);
    }

    #[test]
    fn time_us_display() {
        assert_eq!(TimeUs(0).to_string(), "00:00:00.000");
        assert_eq!(TimeUs(1_500_000).to_string(), "00:00:01.500");
        assert_eq!(TimeUs::from_seconds(3661.5).to_string(), "01:01:01.500");
    }

    #[test]
    fn time_us_mul_div() {
        let t = TimeUs(2_000_000);
        assert_eq!(t * 3, TimeUs(6_000_000));
        assert_eq!(t / 2, TimeUs(1_000_000));
    }

    #[test]
    fn time_range_end_and_overlap() {
        let a = TimeRange::new(TimeUs(0), TimeUs(5_000_000));
        let b = TimeRange::new(TimeUs(5_000_000), TimeUs(3_000_000));
        let c = TimeRange::new(TimeUs(4_000_000), TimeUs(2_000_000));

        assert_eq!(a.end(), TimeUs(5_000_000));
        // Touching ranges do not overlap.
        assert!(!a.overlaps(&b));
        assert!(a.overlaps(&c));
        assert!(b.overlaps(&c));
        assert!(a.contains(TimeUs(4_999_999)));
        assert!(!a.contains(TimeUs(5_000_000)));
    }

    #[test]
    fn time_range_empty() {
        assert!(TimeRange::from_zero(TimeUs::ZERO).is_empty());
        assert!(TimeRange::from_zero(TimeUs(-1)).is_empty());
        assert!(!TimeRange::from_zero(TimeUs(1)).is_empty());
    }

    #[test]
    fn rational_frame_duration() {
        assert_eq!(Rational::FPS_30.frame_duration(), TimeUs(33_333));
        assert_eq!(Rational::new(25, 1).frame_duration(), TimeUs(40_000));
        assert_eq!(Rational::new(0, 1).frame_duration(), TimeUs::ZERO);
        assert!((Rational::new(30_000, 1001).as_f64() - 29.97).abs() < 0.01);
        assert_eq!(Rational::FPS_30.to_string(), "30/1");
    }

    #[test]
    fn size_max_is_component_wise() {
        let a = Size::new(1920.0, 720.0);
        let b = Size::new(1280.0, 1080.0);
        assert_eq!(a.max(b), Size::new(1920.0, 1080.0));
    }

    #[test]
    fn transform_translate_then_scale_order() {
        // Scale is applied to the point first, then the translation.
        let t = Transform::IDENTITY
            .translated_by(0.0, 810.0)
            .scaled_by(0.25, 0.25);
        assert_eq!(t.apply(0.0, 0.0), (0.0, 810.0));
        assert_eq!(t.apply(640.0, 480.0), (160.0, 930.0));
        assert_eq!(t.a, 0.25);
        assert_eq!(t.d, 0.25);
        assert_eq!(t.ty, 810.0);
    }

    #[test]
    fn transform_builds_on_existing_transform() {
        // A quarter turn that keeps a 1080-wide frame in the positive quadrant.
        let rotate = Transform {
            a: 0.0,
            b: 1.0,
            c: -1.0,
            d: 0.0,
            tx: 1080.0,
            ty: 0.0,
        };
        let t = rotate.translated_by(10.0, 20.0);
        assert_eq!(t.apply(0.0, 0.0), rotate.apply(10.0, 20.0));
        assert!(t.is_axis_aligned());
    }

    #[test]
    fn transform_concat_identity() {
        let t = Transform::translate(3.0, 4.0).concat(&Transform::scale(2.0, 2.0));
        assert_eq!(t.apply(1.0, 1.0), (8.0, 10.0));
        assert_eq!(Transform::IDENTITY.concat(&t), t);
        assert!(Transform::default().is_identity());
    }

    #[test]
    fn transform_axis_alignment() {
        assert!(Transform::scale(-1.0, 1.0).is_axis_aligned());
        let skew = Transform {
            a: 0.7,
            b: 0.7,
            c: -0.7,
            d: 0.7,
            tx: 0.0,
            ty: 0.0,
        };
        assert!(!skew.is_axis_aligned());
    }

    #[test]
    fn rgba_hex() {
        assert_eq!(Rgba::TRANSPARENT.to_hex(), "0x00000000");
        assert_eq!(Rgba::BLACK.to_hex(), "0x000000FF");
    }

    #[test]
    fn clip_handle_track_lookup() {
        let clip = ClipHandle {
            id: Uuid::new_v4(),
            name: "a.mp4".to_string(),
            path: PathBuf::from("/tmp/a.mp4"),
            duration: TimeUs(5_000_000),
            tracks: vec![
                SourceTrack {
                    index: 0,
                    kind: MediaKind::Video,
                    natural_size: Size::new(1920.0, 1080.0),
                    preferred_transform: Transform::IDENTITY,
                    nominal_fps: Some(30.0),
                },
                SourceTrack {
                    index: 0,
                    kind: MediaKind::Audio,
                    natural_size: Size::ZERO,
                    preferred_transform: Transform::IDENTITY,
                    nominal_fps: None,
                },
            ],
        };

        assert_eq!(clip.tracks_of(MediaKind::Video).count(), 1);
        assert_eq!(
            clip.first_track(MediaKind::Audio).map(|t| t.kind),
            Some(MediaKind::Audio)
        );
        assert!(clip.track(MediaKind::Video, 1).is_none());
        assert_eq!(clip.full_range(), TimeRange::from_zero(TimeUs(5_000_000)));
    }

    #[test]
    fn serde_roundtrip_composition() {
        let composition = Composition {
            tracks: vec![Track {
                id: TrackId(1),
                kind: MediaKind::Video,
                segments: vec![Segment {
                    clip_id: Uuid::new_v4(),
                    source_track: 0,
                    source_range: TimeRange::from_zero(TimeUs(1_000_000)),
                    destination: TimeUs::ZERO,
                }],
            }],
            clips: vec![],
        };
        let json = serde_json::to_string(&composition).unwrap();
        let back: Composition = serde_json::from_str(&json).unwrap();
        assert_eq!(composition, back);
    }
}
