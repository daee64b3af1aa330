use std::path::Path;
use std::time::Duration;

use ndarray::{s, ArrayView2};
use serde::{Deserialize, Serialize};

use super::backend::ComputeBackend;
use super::cache;
use super::edges::{detect_edges_with, interior, EdgeMap};
use crate::video::VideoSource;
use crate::{Error, Result};

/// Axis-aligned rectangle in pixel coordinates.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Rect {
    pub x: usize,
    pub y: usize,
    pub width: usize,
    pub height: usize,
}

impl Rect {
    pub fn new(x: usize, y: usize, width: usize, height: usize) -> Self {
        Self {
            x,
            y,
            width,
            height,
        }
    }

    /// Rectangle covering an entire `width` x `height` frame.
    pub fn full(width: usize, height: usize) -> Self {
        Self::new(0, 0, width, height)
    }

    pub fn area(&self) -> usize {
        self.width * self.height
    }

    pub fn is_empty(&self) -> bool {
        self.area() == 0
    }

    pub fn right(&self) -> usize {
        self.x + self.width
    }

    pub fn bottom(&self) -> usize {
        self.y + self.height
    }

    /// Returns the overlap of two rectangles (empty if they are disjoint).
    pub fn intersect(&self, other: &Rect) -> Rect {
        let x = self.x.max(other.x);
        let y = self.y.max(other.y);
        let right = self.right().min(other.right());
        let bottom = self.bottom().min(other.bottom());
        if right <= x || bottom <= y {
            return Rect::default();
        }
        Rect::new(x, y, right - x, bottom - y)
    }

    /// Grows the rectangle by `padding` on every side, clamped to a `width` x
    /// `height` frame.
    pub fn pad(&self, padding: usize, width: usize, height: usize) -> Rect {
        let x = self.x.saturating_sub(padding);
        let y = self.y.saturating_sub(padding);
        let right = (self.right() + padding).min(width);
        let bottom = (self.bottom() + padding).min(height);
        Rect::new(x, y, right.saturating_sub(x), bottom.saturating_sub(y))
    }

    /// Returns a view of the part of `m` covered by this rectangle. The rectangle
    /// must lie inside the matrix.
    pub fn slice<'a>(&self, m: &'a EdgeMap) -> ArrayView2<'a, f32> {
        m.slice(s![self.y..self.bottom(), self.x..self.right()])
    }
}

/// Averaged edge map of a channel's logo, plus where the logo sits.
///
/// Immutable once built; share it with `Arc`.
#[derive(Clone, Debug, PartialEq)]
pub struct LogoReference {
    pub matrix: EdgeMap,
    /// `None` (or an empty rect) means the box is not known yet and must be
    /// discovered.
    pub bounding_rect: Option<Rect>,
    /// Set when a [BoundingBoxConfirmer] rejected the box. The rect is then empty
    /// and stays that way across cache reloads.
    pub no_logo: bool,
}

impl LogoReference {
    pub fn new(matrix: EdgeMap, bounding_rect: Option<Rect>) -> Self {
        Self {
            matrix,
            bounding_rect,
            no_logo: false,
        }
    }

    /// Reference for a video confirmed to have no logo. Every sample scores 0.
    pub fn without_logo(matrix: EdgeMap) -> Self {
        Self {
            matrix,
            bounding_rect: Some(Rect::default()),
            no_logo: true,
        }
    }

    fn needs_discovery(&self) -> bool {
        !self.no_logo && self.bounding_rect.map_or(true, |r| r.is_empty())
    }

    /// Returns `(width, height)` of the reference.
    pub fn dimensions(&self) -> (usize, usize) {
        let (height, width) = self.matrix.dim();
        (width, height)
    }

    /// Region compared against incoming frames: the bounding box, restricted to
    /// the part of the frame outside the zeroed edge margin.
    pub fn comparison_rect(&self) -> Rect {
        let (width, height) = self.dimensions();
        self.bounding_rect
            .unwrap_or_else(|| Rect::full(width, height))
            .intersect(&interior(width, height))
    }
}

/// Outcome of [discover_bounding_box].
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct BoundingBoxDiscovery {
    /// Tight box around the qualifying pixels, before padding. `None` if no pixel
    /// qualified.
    pub rect: Option<Rect>,
    /// Deviation threshold the result was found with.
    pub threshold: f32,
    pub retries: usize,
    /// Largest deviation seen on the final scan.
    pub max_deviation: f32,
}

// Tight bounding box of all interior pixels whose deviation from `baseline`
// exceeds `threshold`, and the largest deviation seen.
fn scan(matrix: &EdgeMap, baseline: f32, threshold: f32) -> (Option<Rect>, f32) {
    let (height, width) = matrix.dim();
    let inner = interior(width, height);
    let mut max_deviation = 0.0f32;
    let mut bounds: Option<(usize, usize, usize, usize)> = None;

    for ((y, x), &v) in inner.slice(matrix).indexed_iter() {
        let deviation = (v - baseline).abs();
        max_deviation = max_deviation.max(deviation);
        if deviation <= threshold {
            continue;
        }
        let (x, y) = (x + inner.x, y + inner.y);
        bounds = Some(match bounds {
            None => (x, y, x, y),
            Some((x0, y0, x1, y1)) => (x0.min(x), y0.min(y), x1.max(x), y1.max(y)),
        });
    }

    let rect = bounds.map(|(x0, y0, x1, y1)| Rect::new(x0, y0, x1 - x0 + 1, y1 - y0 + 1));
    (rect, max_deviation)
}

/// Finds the logo in an averaged edge map.
///
/// Pixels whose distance from the edge bias exceeds `0.2 × bias` belong to the
/// logo. Up to two retries adjust the threshold: it is halved when nothing
/// qualifies, and raised by half (once) when the box covers more than a quarter
/// of the frame while the strongest pixel is well above the threshold, which
/// points at background motion rather than a compact logo. If the raise loses
/// the logo entirely, the box found before it is kept.
pub fn discover_bounding_box(matrix: &EdgeMap) -> BoundingBoxDiscovery {
    let baseline = super::EDGE_BIAS;
    let frame_area = matrix.len() as f32;
    let mut threshold = super::BOX_THRESHOLD_FACTOR * baseline;
    let mut retries = 0;
    let mut before_raise: Option<(Rect, f32, f32)> = None;

    loop {
        let (rect, max_deviation) = scan(matrix, baseline, threshold);
        let result = BoundingBoxDiscovery {
            rect,
            threshold,
            retries,
            max_deviation,
        };

        match rect {
            None => {
                if let Some((rect, threshold, max_deviation)) = before_raise {
                    return BoundingBoxDiscovery {
                        rect: Some(rect),
                        threshold,
                        retries,
                        max_deviation,
                    };
                }
                if retries >= super::BOX_MAX_RETRIES {
                    return result;
                }
                tracing::debug!(threshold, "no logo pixels found; lowering threshold");
                threshold *= 0.5;
            }
            Some(r) => {
                let too_large = r.area() as f32 > super::BOX_MAX_AREA_FRACTION * frame_area;
                let noisy = max_deviation > super::BOX_NOISE_RATIO * threshold;
                if !too_large
                    || !noisy
                    || before_raise.is_some()
                    || retries >= super::BOX_MAX_RETRIES
                {
                    return result;
                }
                tracing::debug!(
                    threshold,
                    area = r.area(),
                    "logo box too large; raising threshold"
                );
                before_raise = Some((r, threshold, max_deviation));
                threshold *= super::BOX_RAISE_FACTOR;
            }
        }

        retries += 1;
    }
}

/// Lets a user (or any other collaborator) confirm or adjust a discovered
/// bounding box.
pub trait BoundingBoxConfirmer: Send + Sync + std::fmt::Debug {
    fn confirm(&self, candidate: Rect, reference: &EdgeMap) -> Confirmation;
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Confirmation {
    Accepted(Rect),
    /// There is no logo in this video.
    Rejected,
}

/// Non-interactive [BoundingBoxConfirmer] that accepts every candidate as is.
#[derive(Clone, Copy, Debug, Default)]
pub struct AcceptCandidate;

impl BoundingBoxConfirmer for AcceptCandidate {
    fn confirm(&self, candidate: Rect, _reference: &EdgeMap) -> Confirmation {
        Confirmation::Accepted(candidate)
    }
}

/// Builds (or loads) the [LogoReference] for a video.
///
/// Frames are sampled at evenly spaced timestamps between 10% and 70% of the
/// video, edge-detected, and averaged. The result is cached next to the video
/// so later runs skip the sampling pass unless `force` is set.
pub struct ReferenceBuilder<'c> {
    sample_count: usize,
    sample_window: (f32, f32),
    force: bool,
    backend: ComputeBackend,
    confirmer: &'c dyn BoundingBoxConfirmer,
}

impl Default for ReferenceBuilder<'static> {
    fn default() -> Self {
        Self {
            sample_count: super::DEFAULT_REFERENCE_SAMPLES,
            sample_window: super::REFERENCE_SAMPLE_WINDOW,
            force: false,
            backend: ComputeBackend::select(),
            confirmer: &AcceptCandidate,
        }
    }
}

impl<'c> ReferenceBuilder<'c> {
    /// Returns a new [ReferenceBuilder] with the provided `sample_count`.
    pub fn with_sample_count(mut self, sample_count: usize) -> Self {
        self.sample_count = sample_count.max(1);
        self
    }

    /// Returns a new [ReferenceBuilder] with `force` set to the provided value.
    pub fn with_force(mut self, force: bool) -> Self {
        self.force = force;
        self
    }

    /// Returns a new [ReferenceBuilder] with the provided `backend`.
    pub fn with_backend(mut self, backend: ComputeBackend) -> Self {
        self.backend = backend;
        self
    }

    /// Returns a new [ReferenceBuilder] that asks `confirmer` about each discovered box.
    pub fn with_confirmer<'d>(self, confirmer: &'d dyn BoundingBoxConfirmer) -> ReferenceBuilder<'d> {
        ReferenceBuilder {
            sample_count: self.sample_count,
            sample_window: self.sample_window,
            force: self.force,
            backend: self.backend,
            confirmer,
        }
    }

    /// Returns the reference for the video behind `source`, using the cache at
    /// `cache_path` when it is present and valid.
    pub fn build<S: VideoSource + ?Sized>(
        &self,
        source: &mut S,
        cache_path: &Path,
    ) -> Result<LogoReference> {
        let span = tracing::span!(tracing::Level::TRACE, "build_reference");
        let _enter = span.enter();

        if !self.force {
            match cache::load(cache_path, source.dimensions()) {
                Ok(Some(reference)) => {
                    tracing::debug!("loaded logo reference from {}", cache_path.display());
                    if !reference.needs_discovery() {
                        return Ok(reference);
                    }
                    let reference = self.confirmed(reference.matrix);
                    Self::persist(&reference, cache_path);
                    return Ok(reference);
                }
                Ok(None) => (),
                Err(e) => tracing::warn!(
                    error = %e,
                    "ignoring logo reference cache at {}",
                    cache_path.display()
                ),
            }
        }

        let reference = self.confirmed(self.sample_mean(source)?);
        Self::persist(&reference, cache_path);

        Ok(reference)
    }

    fn persist(reference: &LogoReference, cache_path: &Path) {
        if let Err(e) = cache::save(reference, cache_path) {
            tracing::warn!(
                error = %e,
                "failed to write logo reference cache to {}",
                cache_path.display()
            );
        }
    }

    // Averages the edge maps of frames sampled across the configured window.
    fn sample_mean<S: VideoSource + ?Sized>(&self, source: &mut S) -> Result<EdgeMap> {
        let times = sample_times(source.duration(), self.sample_window, self.sample_count);

        let mut sum: Option<EdgeMap> = None;
        let mut count = 0usize;

        for t in times {
            let frame = match source.seek(t)? {
                Some(frame) => frame,
                None => {
                    tracing::debug!(requested = ?t, "no frame at sample time; stopping");
                    break;
                }
            };

            let edges = detect_edges_with(&frame.luma, self.backend);
            match sum.as_mut() {
                None => sum = Some(edges),
                Some(sum) if sum.dim() == edges.dim() => self.backend.add_assign(sum, &edges),
                Some(_) => {
                    tracing::warn!(at = ?frame.timestamp, "skipping frame with mismatched size");
                    continue;
                }
            }
            count += 1;

            if count % 50 == 0 {
                tracing::debug!(count, total = self.sample_count, "sampling reference frames");
            }
        }

        let mut sum = sum.ok_or(Error::NoDecodableFrames)?;
        sum /= count as f32;
        tracing::debug!(count, "averaged reference frames");

        Ok(sum)
    }

    fn confirmed(&self, matrix: EdgeMap) -> LogoReference {
        match self.locate(&matrix) {
            Some(rect) => LogoReference::new(matrix, Some(rect)),
            None => LogoReference::without_logo(matrix),
        }
    }

    // Discovers, pads and confirms the logo box. `None` if the box was rejected.
    fn locate(&self, matrix: &EdgeMap) -> Option<Rect> {
        let (height, width) = matrix.dim();
        let discovery = discover_bounding_box(matrix);

        let candidate = match discovery.rect {
            Some(rect) => rect.pad(super::BOX_PADDING, width, height),
            None => {
                tracing::warn!(
                    retries = discovery.retries,
                    "no logo found in reference; comparing the whole frame"
                );
                Rect::full(width, height)
            }
        };

        match self.confirmer.confirm(candidate, matrix) {
            Confirmation::Accepted(rect) => Some(rect),
            Confirmation::Rejected => {
                tracing::info!("logo bounding box rejected; video has no logo");
                None
            }
        }
    }
}

// Evenly spaced timestamps covering `window` (fractions of `duration`).
fn sample_times(duration: Duration, window: (f32, f32), count: usize) -> Vec<Duration> {
    let start = duration.mul_f32(window.0);
    let span = duration.mul_f32(window.1).saturating_sub(start);
    (0..count)
        .map(|i| start + span.mul_f64(i as f64 / count as f64))
        .collect()
}

#[cfg(test)]
mod test {
    use ndarray::Array2;

    use super::*;
    use crate::logo::edges::blank_edge_map;
    use crate::logo::{EDGE_BIAS, REFERENCE_SAMPLE_WINDOW};
    use crate::testing::{self, SyntheticSource, HEIGHT, WIDTH};
    use std::sync::atomic::{AtomicUsize, Ordering};

    #[derive(Debug)]
    struct RejectAll;

    impl BoundingBoxConfirmer for RejectAll {
        fn confirm(&self, _candidate: Rect, _reference: &EdgeMap) -> Confirmation {
            Confirmation::Rejected
        }
    }

    fn logo_source() -> SyntheticSource {
        // Logo on screen for the whole sampled window.
        SyntheticSource::from_fn(Duration::from_secs(1), 100, |_| testing::logo_luma(24, 24, 16))
    }

    #[test]
    fn test_uniform_reference_falls_back_to_full_frame() {
        let matrix = blank_edge_map(WIDTH, HEIGHT);
        let discovery = discover_bounding_box(&matrix);
        assert_eq!(discovery.retries, 2);
        assert_eq!(discovery.rect, None);
        assert!((discovery.threshold - 0.2 * EDGE_BIAS / 4.0).abs() < 1e-6);

        let builder = ReferenceBuilder::default();
        assert_eq!(builder.locate(&matrix), Some(Rect::full(WIDTH, HEIGHT)));
    }

    #[test]
    fn test_weak_logo_found_after_halving() {
        let mut matrix = blank_edge_map(WIDTH, HEIGHT);
        // Deviation of 0.07 is below the initial threshold (0.1) but above half of it.
        matrix
            .slice_mut(s![30..36, 40..48])
            .fill(EDGE_BIAS + 0.07);
        let discovery = discover_bounding_box(&matrix);
        assert_eq!(discovery.retries, 1);
        assert_eq!(discovery.rect, Some(Rect::new(40, 30, 8, 6)));
    }

    #[test]
    fn test_large_noisy_box_raises_threshold() {
        let mut matrix = blank_edge_map(WIDTH, HEIGHT);
        let inner = interior(WIDTH, HEIGHT);
        // Background motion everywhere, slightly above the threshold.
        matrix
            .slice_mut(s![inner.y..inner.bottom(), inner.x..inner.right()])
            .fill(EDGE_BIAS + 0.12);
        // A compact, strong logo.
        matrix.slice_mut(s![20..26, 30..36]).fill(EDGE_BIAS + 0.4);

        let discovery = discover_bounding_box(&matrix);
        assert_eq!(discovery.retries, 1);
        assert_eq!(discovery.rect, Some(Rect::new(30, 20, 6, 6)));
        assert!((discovery.threshold - 0.15).abs() < 1e-6);
    }

    #[test]
    fn test_large_uniform_box_is_kept() {
        let mut matrix = blank_edge_map(WIDTH, HEIGHT);
        let inner = interior(WIDTH, HEIGHT);
        // No pixel stands out from the rest, so there is nothing to raise towards.
        matrix
            .slice_mut(s![inner.y..inner.bottom(), inner.x..inner.right()])
            .fill(EDGE_BIAS + 0.14);

        let discovery = discover_bounding_box(&matrix);
        assert_eq!(discovery.retries, 0);
        assert_eq!(discovery.rect, Some(inner));
    }

    #[test]
    fn test_sample_times_cover_window() {
        let times = sample_times(Duration::from_secs(100), REFERENCE_SAMPLE_WINDOW, 4);
        assert_eq!(
            times,
            vec![
                Duration::from_secs(10),
                Duration::from_secs(25),
                Duration::from_secs(40),
                Duration::from_secs(55),
            ]
        );
    }

    #[test]
    fn test_pad_is_clamped() {
        let rect = Rect::new(5, 50, 10, 10).pad(10, 64, 64);
        assert_eq!(rect, Rect::new(0, 40, 25, 24));
    }

    #[test]
    fn test_intersect() {
        let a = Rect::new(0, 0, 20, 20);
        assert_eq!(a.intersect(&Rect::new(10, 15, 20, 20)), Rect::new(10, 15, 10, 5));
        assert!(a.intersect(&Rect::new(30, 30, 5, 5)).is_empty());
    }

    #[test]
    fn test_build_finds_logo_and_caches() {
        let dir = tempfile::tempdir().unwrap();
        let cache_path = dir.path().join("video.bugwatch.logo.txt");
        let mut source = logo_source();

        let builder = ReferenceBuilder::default().with_sample_count(20);
        let reference = builder.build(&mut source, &cache_path).unwrap();
        assert_eq!(source.seeks, 20);
        assert!(cache_path.exists());

        // The checkerboard covers [24, 40) on both axes; its edges reach one pixel
        // further up/left through the forward differences. Padded by 10.
        let rect = reference.bounding_rect.unwrap();
        assert!(rect.x <= 14 && rect.y <= 14);
        assert!(rect.right() >= 50 && rect.bottom() >= 50);
        assert!(rect.area() < WIDTH * HEIGHT);

        // Second build comes from the cache without touching the video.
        let mut source = logo_source();
        let cached = builder.build(&mut source, &cache_path).unwrap();
        assert_eq!(source.seeks, 0);
        assert_eq!(cached.bounding_rect, reference.bounding_rect);
        assert!(cached
            .matrix
            .iter()
            .zip(reference.matrix.iter())
            .all(|(a, b)| (a - b).abs() < 1e-5));
    }

    #[test]
    fn test_force_rebuild_ignores_cache() {
        let dir = tempfile::tempdir().unwrap();
        let cache_path = dir.path().join("video.bugwatch.logo.txt");
        let builder = ReferenceBuilder::default().with_sample_count(10);
        builder.build(&mut logo_source(), &cache_path).unwrap();

        let mut source = logo_source();
        builder
            .with_force(true)
            .build(&mut source, &cache_path)
            .unwrap();
        assert_eq!(source.seeks, 10);
    }

    #[test]
    fn test_cache_without_box_rediscovers_only() {
        let dir = tempfile::tempdir().unwrap();
        let cache_path = dir.path().join("video.bugwatch.logo.txt");
        let mut matrix = blank_edge_map(WIDTH, HEIGHT);
        matrix.slice_mut(s![30..34, 30..34]).fill(EDGE_BIAS + 0.3);
        cache::save(&LogoReference::new(matrix, None), &cache_path).unwrap();

        let mut source = logo_source();
        let reference = ReferenceBuilder::default()
            .build(&mut source, &cache_path)
            .unwrap();
        assert_eq!(source.seeks, 0);
        assert_eq!(reference.bounding_rect, Some(Rect::new(20, 20, 24, 24)));

        // The discovered box was written back.
        let reloaded = cache::load(&cache_path, (WIDTH, HEIGHT)).unwrap().unwrap();
        assert_eq!(reloaded.bounding_rect, Some(Rect::new(20, 20, 24, 24)));
    }

    #[test]
    fn test_malformed_cache_triggers_rebuild() {
        let dir = tempfile::tempdir().unwrap();
        let cache_path = dir.path().join("video.bugwatch.logo.txt");
        std::fs::write(&cache_path, "64,64\n1,2,3\n").unwrap();

        let mut source = logo_source();
        let reference = ReferenceBuilder::default()
            .with_sample_count(5)
            .build(&mut source, &cache_path)
            .unwrap();
        assert_eq!(source.seeks, 5);
        assert!(reference.bounding_rect.is_some());
    }

    #[test]
    fn test_rejected_box_is_empty() {
        let dir = tempfile::tempdir().unwrap();
        let cache_path = dir.path().join("video.bugwatch.logo.txt");
        let reference = ReferenceBuilder::default()
            .with_sample_count(5)
            .with_confirmer(&RejectAll)
            .build(&mut logo_source(), &cache_path)
            .unwrap();
        assert_eq!(reference.bounding_rect, Some(Rect::default()));
        assert!(reference.no_logo);
        assert!(reference.comparison_rect().is_empty());
    }

    #[derive(Debug, Default)]
    struct CountingConfirmer {
        calls: AtomicUsize,
    }

    impl BoundingBoxConfirmer for CountingConfirmer {
        fn confirm(&self, candidate: Rect, _reference: &EdgeMap) -> Confirmation {
            self.calls.fetch_add(1, Ordering::SeqCst);
            Confirmation::Accepted(candidate)
        }
    }

    #[test]
    fn test_rejected_box_survives_reload() {
        let dir = tempfile::tempdir().unwrap();
        let cache_path = dir.path().join("video.bugwatch.logo.txt");
        ReferenceBuilder::default()
            .with_sample_count(5)
            .with_confirmer(&RejectAll)
            .build(&mut logo_source(), &cache_path)
            .unwrap();

        let confirmer = CountingConfirmer::default();
        let mut source = logo_source();
        let reference = ReferenceBuilder::default()
            .with_sample_count(5)
            .with_confirmer(&confirmer)
            .build(&mut source, &cache_path)
            .unwrap();
        assert!(reference.no_logo);
        assert!(reference.comparison_rect().is_empty());
        assert_eq!(confirmer.calls.load(Ordering::SeqCst), 0);
        assert_eq!(source.seeks, 0);
    }

    #[test]
    fn test_empty_video_is_fatal() {
        let dir = tempfile::tempdir().unwrap();
        let cache_path = dir.path().join("video.bugwatch.logo.txt");
        let mut source = SyntheticSource::uniform(Duration::from_secs(1), 0, 0.5);
        let err = ReferenceBuilder::default()
            .build(&mut source, &cache_path)
            .err()
            .unwrap();
        assert!(matches!(err, Error::NoDecodableFrames));
    }

    #[test]
    fn test_comparison_rect_excludes_margin() {
        let reference = LogoReference::new(Array2::zeros((HEIGHT, WIDTH)), None);
        assert_eq!(reference.comparison_rect(), interior(WIDTH, HEIGHT));
    }
}
