use std::time::Duration;

use super::backend::ComputeBackend;
use super::classifier::{FrameClassifier, Resolution};
use super::data::{SceneKind, Segment};
use crate::video::VideoSource;
use crate::Result;

/// Moves segment boundaries outward to the nearest scene change.
///
/// Frames near each boundary are decoded again at full resolution, in chunks,
/// so that the cut is located more precisely than the analysis cadence allows.
/// A start never moves later and an end never moves earlier.
#[derive(Clone, Copy, Debug)]
pub struct Snapper {
    scene_threshold: f32,
    black_threshold: f32,
    chunk: Duration,
    max_distance: Duration,
    backend: ComputeBackend,
}

impl Default for Snapper {
    fn default() -> Self {
        Self::new(
            super::DEFAULT_SCENE_CHANGE_THRESHOLD,
            super::DEFAULT_BLACK_WHITE_THRESHOLD,
            ComputeBackend::select(),
        )
    }
}

impl Snapper {
    pub fn new(scene_threshold: f32, black_threshold: f32, backend: ComputeBackend) -> Self {
        Self {
            scene_threshold,
            black_threshold,
            chunk: super::DEFAULT_SNAP_CHUNK,
            max_distance: super::DEFAULT_SNAP_MAX_DISTANCE,
            backend,
        }
    }

    /// Returns a new [Snapper] that decodes `chunk` at a time.
    pub fn with_chunk(mut self, chunk: Duration) -> Self {
        if !chunk.is_zero() {
            self.chunk = chunk;
        }
        self
    }

    /// Returns a new [Snapper] that moves boundaries by at most `max_distance`.
    pub fn with_max_distance(mut self, max_distance: Duration) -> Self {
        self.max_distance = max_distance;
        self
    }

    /// Snaps each of the (time ordered) `segments`.
    ///
    /// A start is searched for between the end of the previous snapped segment
    /// and the original start. An end is searched for between the original end and
    /// the start of the next segment (or the end of the video).
    pub fn snap<S: VideoSource + ?Sized>(
        &self,
        source: &mut S,
        segments: &[Segment],
    ) -> Result<Vec<Segment>> {
        let span = tracing::span!(tracing::Level::TRACE, "snap");
        let _enter = span.enter();

        let duration = source.duration();
        let mut snapped: Vec<Segment> = Vec::with_capacity(segments.len());

        for (i, segment) in segments.iter().enumerate() {
            let previous_end = snapped.last().map(|s| s.end).unwrap_or(Duration::ZERO);
            let floor = previous_end.max(segment.start.saturating_sub(self.max_distance));
            let next_start = segments.get(i + 1).map(|s| s.start).unwrap_or(duration);
            let ceiling = next_start.min(segment.end + self.max_distance);

            let start = self
                .search_backward(source, segment.start, floor)?
                .unwrap_or(segment.start);
            let end = self
                .search_forward(source, segment.end, ceiling)?
                .unwrap_or(segment.end);

            let adjusted = Segment::new(start.min(segment.start), end.max(segment.end));
            if adjusted != *segment {
                tracing::debug!(original = ?segment, snapped = ?adjusted, "snapped segment");
            }
            snapped.push(adjusted);
        }

        Ok(snapped)
    }

    // Latest scene change in `[floor, from]`.
    fn search_backward<S: VideoSource + ?Sized>(
        &self,
        source: &mut S,
        from: Duration,
        floor: Duration,
    ) -> Result<Option<Duration>> {
        let mut chunk_end = from;
        while chunk_end > floor {
            let chunk_start = chunk_end.saturating_sub(self.chunk).max(floor);
            let found = self
                .scene_changes(source, chunk_start, chunk_end)?
                .into_iter()
                .rev()
                .find(|t| *t >= floor && *t <= from);
            if found.is_some() {
                return Ok(found);
            }
            chunk_end = chunk_start;
        }
        Ok(None)
    }

    // Earliest scene change in `[from, ceiling]`.
    fn search_forward<S: VideoSource + ?Sized>(
        &self,
        source: &mut S,
        from: Duration,
        ceiling: Duration,
    ) -> Result<Option<Duration>> {
        let mut chunk_start = from;
        while chunk_start < ceiling {
            let chunk_end = (chunk_start + self.chunk).min(ceiling);
            let found = self
                .scene_changes(source, chunk_start, chunk_end)?
                .into_iter()
                .find(|t| *t >= from && *t <= ceiling);
            if found.is_some() {
                return Ok(found);
            }
            chunk_start = chunk_end;
        }
        Ok(None)
    }

    /// Returns the times of scene changes between `from` and `to`.
    ///
    /// Decoding stops at the first frame after `to`, which is still classified,
    /// so a cut that lands between two chunks is not lost.
    pub fn scene_changes<S: VideoSource + ?Sized>(
        &self,
        source: &mut S,
        from: Duration,
        to: Duration,
    ) -> Result<Vec<Duration>> {
        let mut classifier =
            FrameClassifier::new(self.scene_threshold, self.black_threshold, self.backend)
                .with_resolution(Resolution::Full);
        let mut changes = Vec::new();

        let mut next = source.seek(from)?;
        while let Some(frame) = next {
            if let Some(event) = classifier.classify(&frame) {
                if event.kind == SceneKind::SceneChange {
                    changes.push(event.time);
                }
            }
            if frame.timestamp > to {
                break;
            }
            next = source.read_next(false)?;
        }

        Ok(changes)
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::testing::{self, SyntheticSource};

    const INTERVAL: Duration = Duration::from_millis(250);

    // 60s of frames whose brightness jumps at each of `cuts`.
    fn source(cuts: &[f64]) -> SyntheticSource {
        let cuts = cuts.to_vec();
        SyntheticSource::from_fn(INTERVAL, 240, move |i| {
            let t = i as f64 * INTERVAL.as_secs_f64();
            let level = cuts.iter().filter(|&&c| t >= c).count();
            testing::uniform_luma([0.2, 0.8, 0.3, 0.9][level % 4])
        })
    }

    fn secs(s: f64) -> Duration {
        Duration::from_secs_f64(s)
    }

    fn snapper() -> Snapper {
        Snapper::new(0.2, 0.1, ComputeBackend::Vectorized)
    }

    #[test]
    fn test_snaps_outward_to_cuts() {
        let mut source = source(&[18.5, 43.0]);
        let segments = [Segment::new(secs(20.0), secs(40.0))];
        let snapped = snapper().snap(&mut source, &segments).unwrap();
        assert_eq!(snapped, vec![Segment::new(secs(18.5), secs(43.0))]);
    }

    #[test]
    fn test_neighbours_bound_the_search() {
        let mut source = source(&[10.0, 45.0]);
        let segments = [
            Segment::new(secs(20.0), secs(30.0)),
            Segment::new(secs(33.0), secs(40.0)),
        ];
        let snapped = snapper().snap(&mut source, &segments).unwrap();
        assert_eq!(
            snapped,
            vec![
                Segment::new(secs(10.0), secs(30.0)),
                Segment::new(secs(33.0), secs(45.0)),
            ]
        );
    }

    #[test]
    fn test_max_distance() {
        let mut source = source(&[10.0, 45.0]);
        let segments = [Segment::new(secs(20.0), secs(40.0))];
        let snapped = snapper()
            .with_max_distance(secs(5.0))
            .snap(&mut source, &segments)
            .unwrap();
        assert_eq!(snapped, vec![Segment::new(secs(20.0), secs(45.0))]);
    }

    #[test]
    fn test_no_cuts_leaves_segments_unchanged() {
        let mut source = SyntheticSource::uniform(INTERVAL, 240, 0.5);
        let segments = [
            Segment::new(secs(5.0), secs(20.0)),
            Segment::new(secs(30.0), secs(50.0)),
        ];
        let snapped = snapper().snap(&mut source, &segments).unwrap();
        assert_eq!(snapped, segments.to_vec());
        assert!(source.seeks > 0);
    }
}
