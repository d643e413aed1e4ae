use crate::error::{CompositionError, Result};
use crate::types::*;
use uuid::Uuid;

impl Segment {
    pub fn destination_range(&self) -> TimeRange {
        TimeRange::new(self.destination, self.source_range.duration)
    }

    pub fn destination_end(&self) -> TimeUs {
        self.destination_range().end()
    }
}

impl Track {
    /// End of the last segment on the destination timeline.
    pub fn end(&self) -> TimeUs {
        self.segments
            .iter()
            .map(Segment::destination_end)
            .max()
            .unwrap_or(TimeUs::ZERO)
    }

    /// Sum of the segment durations, i.e. how long the track actually plays.
    pub fn playable_duration(&self) -> TimeUs {
        self.segments
            .iter()
            .fold(TimeUs::ZERO, |acc, s| acc + s.source_range.duration)
    }

    /// True when segments cover `[0, end)` with no gaps.
    pub fn is_contiguous(&self) -> bool {
        let mut cursor = TimeUs::ZERO;
        for segment in &self.segments {
            if segment.destination != cursor {
                return false;
            }
            cursor = segment.destination_end();
        }
        true
    }

    pub fn segment_at(&self, t: TimeUs) -> Option<&Segment> {
        self.segments
            .iter()
            .find(|s| s.destination_range().contains(t))
    }
}

impl Composition {
    /// Longest track end across the whole composition.
    pub fn duration(&self) -> TimeUs {
        self.tracks
            .iter()
            .map(Track::end)
            .max()
            .unwrap_or(TimeUs::ZERO)
    }

    pub fn track(&self, id: TrackId) -> Option<&Track> {
        self.tracks.iter().find(|t| t.id == id)
    }

    pub fn tracks_of(&self, kind: MediaKind) -> impl Iterator<Item = &Track> {
        self.tracks.iter().filter(move |t| t.kind == kind)
    }

    pub fn clip(&self, id: Uuid) -> Option<&ClipHandle> {
        self.clips.iter().find(|c| c.id == id)
    }
}

// ---------------------------------------------------------------------------
// CompositionBuilder
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq)]
enum Placement {
    At(TimeUs),
    End,
}

#[derive(Debug, Clone, PartialEq)]
struct InsertRecord {
    track: TrackId,
    clip_id: Uuid,
    kind: MediaKind,
    source_track: usize,
    source_range: TimeRange,
    placement: Placement,
}

/// Collects track allocations and range insertions, then validates and
/// materializes them in one step.
///
/// Nothing is applied until [`CompositionBuilder::build`]; a rejected
/// insertion fails the whole build and no composition is produced.
#[derive(Debug, Default)]
pub struct CompositionBuilder {
    tracks: Vec<(TrackId, MediaKind)>,
    clips: Vec<ClipHandle>,
    records: Vec<InsertRecord>,
}

impl CompositionBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    /// Allocate an empty track of the given kind.
    pub fn add_track(&mut self, kind: MediaKind) -> TrackId {
        let id = TrackId(self.tracks.len() as u32 + 1);
        self.tracks.push((id, kind));
        id
    }

    /// Insert `range` of `source` (a stream of `clip`) into `track` at `at`.
    pub fn insert_time_range(
        &mut self,
        track: TrackId,
        clip: &ClipHandle,
        source: &SourceTrack,
        range: TimeRange,
        at: TimeUs,
    ) -> &mut Self {
        self.record(track, clip, source, range, Placement::At(at))
    }

    /// Append `range` of `source` right after the current end of `track`.
    pub fn append(
        &mut self,
        track: TrackId,
        clip: &ClipHandle,
        source: &SourceTrack,
        range: TimeRange,
    ) -> &mut Self {
        self.record(track, clip, source, range, Placement::End)
    }

    fn record(
        &mut self,
        track: TrackId,
        clip: &ClipHandle,
        source: &SourceTrack,
        range: TimeRange,
        placement: Placement,
    ) -> &mut Self {
        if !self.clips.iter().any(|c| c.id == clip.id) {
            self.clips.push(clip.clone());
        }
        self.records.push(InsertRecord {
            track,
            clip_id: clip.id,
            kind: source.kind,
            source_track: source.index,
            source_range: range,
            placement,
        });
        self
    }

    pub fn build(self) -> Result<Composition> {
        let mut tracks: Vec<Track> = self
            .tracks
            .iter()
            .map(|&(id, kind)| Track {
                id,
                kind,
                segments: Vec::new(),
            })
            .collect();

        for record in &self.records {
            let track = tracks
                .iter_mut()
                .find(|t| t.id == record.track)
                .ok_or_else(|| CompositionError::insert(record.track, "unknown track"))?;
            let segment = validate_record(record, track, &self.clips)?;
            track.segments.push(segment);
            track.segments.sort_by_key(|s| s.destination);
        }

        tracing::debug!(
            tracks = tracks.len(),
            inserts = self.records.len(),
            "composition materialized"
        );

        Ok(Composition {
            tracks,
            clips: self.clips,
        })
    }
}

fn validate_record(record: &InsertRecord, track: &Track, clips: &[ClipHandle]) -> Result<Segment> {
    let fail = |reason: String| CompositionError::insert(track.id, reason);

    if track.kind != record.kind {
        return Err(fail(format!(
            "cannot insert {} media into a {} track",
            record.kind, track.kind
        )));
    }

    let clip = clips
        .iter()
        .find(|c| c.id == record.clip_id)
        .ok_or_else(|| fail(format!("unknown clip {}", record.clip_id)))?;

    if clip.track(record.kind, record.source_track).is_none() {
        return Err(fail(format!(
            "clip '{}' has no {} stream {}",
            clip.name, record.kind, record.source_track
        )));
    }

    let range = record.source_range;
    if range.is_empty() {
        return Err(fail(format!("empty source range from clip '{}'", clip.name)));
    }
    if range.start < TimeUs::ZERO || range.end() > clip.duration {
        return Err(fail(format!(
            "source range {}..{} outside clip '{}' ({})",
            range.start,
            range.end(),
            clip.name,
            clip.duration
        )));
    }

    let destination = match record.placement {
        Placement::At(at) => at,
        Placement::End => track.end(),
    };
    if destination < TimeUs::ZERO {
        return Err(fail(format!("negative destination offset {}", destination)));
    }

    let segment = Segment {
        clip_id: clip.id,
        source_track: record.source_track,
        source_range: range,
        destination,
    };

    let dest = segment.destination_range();
    if track
        .segments
        .iter()
        .any(|s| s.destination_range().overlaps(&dest))
    {
        return Err(fail(format!(
            "segment at {} overlaps existing media",
            destination
        )));
    }

    Ok(segment)
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
