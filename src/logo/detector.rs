use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::time::Duration;

#[cfg(feature = "rayon")]
use rayon::prelude::*;
use serde::{Deserialize, Serialize};

use super::analyzer::Analyzer;
use super::data::{AnalysisData, Segment};
use super::segments::SegmentBuilder;
use super::snap::Snapper;
use crate::output::{self, CutListFormat};
use crate::util;
use crate::video::{FrameSource, VideoSource};
use crate::Result;

#[derive(Deserialize, Serialize)]
struct ResultFile {
    /// `(start, end)` in milliseconds.
    pub segments: Vec<(u64, u64)>,
    pub md5: String,
}

/// Finds the segments of each video where the logo is on screen.
///
/// The [Detector] works from the [AnalysisData] stored next to each video, or runs
/// an [Analyzer] in place if asked to. Segment boundaries can optionally be snapped
/// outward to nearby scene changes, which requires decoding again around each
/// boundary.
///
/// # Example
///
/// ```no_run
/// use std::path::PathBuf;
/// use bugwatch::logo::Detector;
///
/// let video_paths = vec![PathBuf::from("episode-01.mkv")];
/// let detector = Detector::from_files(video_paths).with_snap(true);
/// let segments = detector.run(true, false, false, true, false).unwrap();
/// ```
#[derive(Debug)]
pub struct Detector<P: AsRef<Path>> {
    videos: Vec<P>,
    logo_threshold: f32,
    min_duration: Duration,
    snap: bool,
    snap_max_distance: Duration,
    cut_list: Option<CutListFormat>,
    analyzer: Analyzer<PathBuf>,
}

impl<P: AsRef<Path>> Default for Detector<P> {
    fn default() -> Self {
        Self {
            videos: Default::default(),
            logo_threshold: super::DEFAULT_LOGO_THRESHOLD,
            min_duration: Duration::from_secs(super::DEFAULT_MIN_SEGMENT_DURATION as u64),
            snap: false,
            snap_max_distance: super::DEFAULT_SNAP_MAX_DISTANCE,
            cut_list: None,
            analyzer: Analyzer::default(),
        }
    }
}

impl<P: AsRef<Path>> Detector<P> {
    /// Constructs a [Detector] from a list of video paths.
    pub fn from_files(videos: impl Into<Vec<P>>) -> Self {
        let mut videos = videos.into();
        videos.sort_by(|a: &P, b: &P| a.as_ref().cmp(b.as_ref()));
        Self {
            videos,
            ..Default::default()
        }
    }

    /// Returns the video paths used by this detector.
    pub fn videos(&self) -> &[P] {
        &self.videos
    }

    /// Returns a new [Detector] with the provided `logo_threshold`.
    pub fn with_logo_threshold(mut self, logo_threshold: f32) -> Self {
        self.logo_threshold = logo_threshold;
        self
    }

    /// Returns a new [Detector] with the provided `min_duration`.
    pub fn with_min_duration(mut self, min_duration: Duration) -> Self {
        self.min_duration = min_duration;
        self
    }

    /// Returns a new [Detector] with boundary snapping set to the provided value.
    pub fn with_snap(mut self, snap: bool) -> Self {
        self.snap = snap;
        self
    }

    /// Returns a new [Detector] that moves boundaries by at most `snap_max_distance`.
    pub fn with_snap_max_distance(mut self, snap_max_distance: Duration) -> Self {
        self.snap_max_distance = snap_max_distance;
        self
    }

    /// Returns a new [Detector] that writes a cut list next to each video.
    pub fn with_cut_list(mut self, cut_list: Option<CutListFormat>) -> Self {
        self.cut_list = cut_list;
        self
    }

    /// Returns a new [Detector] that uses `analyzer`'s settings for in-place analysis
    /// and snapping. The analyzer's own video list is ignored.
    pub fn with_analyzer(mut self, analyzer: Analyzer<PathBuf>) -> Self {
        self.analyzer = analyzer;
        self
    }

    fn snapper(&self) -> Snapper {
        Snapper::new(
            self.analyzer.scene_change_threshold(),
            self.analyzer.black_threshold(),
            self.analyzer.backend(),
        )
        .with_max_distance(self.snap_max_distance)
    }

    /// Builds the segments for one video from its analysis data. If snapping is
    /// enabled, boundaries are refined against `source`.
    pub fn detect<S: VideoSource + ?Sized>(
        &self,
        data: &AnalysisData,
        source: Option<&mut S>,
    ) -> Result<Vec<Segment>> {
        let segments =
            SegmentBuilder::new(self.logo_threshold, self.min_duration).build(data.samples());
        match source {
            Some(source) if self.snap && !segments.is_empty() => {
                self.snapper().snap(source, &segments)
            }
            _ => Ok(segments),
        }
    }

    fn check_result_file(video: impl AsRef<Path>) -> Result<Option<Vec<Segment>>> {
        let result_file = video.as_ref().with_extension(super::RESULT_FILE_EXT);
        if !result_file.exists() {
            return Ok(None);
        }

        // Compute MD5 hash of the video header.
        let md5 = util::compute_header_md5sum(&video)?;

        // Read existing result file and compare MD5 hashes.
        let f = std::fs::File::open(&result_file)?;
        let result: ResultFile = match serde_json::from_reader(std::io::BufReader::new(f)) {
            Ok(result) => result,
            Err(e) => {
                tracing::warn!(error = %e, "ignoring unreadable result file {}", result_file.display());
                return Ok(None);
            }
        };
        if result.md5 != md5 {
            return Ok(None);
        }

        Ok(Some(
            result
                .segments
                .into_iter()
                .map(|(start, end)| {
                    Segment::new(Duration::from_millis(start), Duration::from_millis(end))
                })
                .collect(),
        ))
    }

    fn create_result_file(video: impl AsRef<Path>, segments: &[Segment]) -> Result<()> {
        let md5 = util::compute_header_md5sum(&video)?;
        let result_file = video.as_ref().with_extension(super::RESULT_FILE_EXT);
        let mut f = std::fs::File::create(result_file)?;
        let data = ResultFile {
            segments: segments
                .iter()
                .map(|s| (s.start.as_millis() as u64, s.end.as_millis() as u64))
                .collect(),
            md5,
        };
        serde_json::to_writer(&mut f, &data)?;

        Ok(())
    }

    fn display_segments(&self, segments: &[Segment]) {
        if segments.is_empty() {
            println!("No logo found.");
            return;
        }
        for (i, segment) in segments.iter().enumerate() {
            println!(
                "* Segment {} - {}-{}",
                i + 1,
                util::format_time(segment.start),
                util::format_time(segment.end)
            );
        }
    }

    fn search(&self, video: &Path, analyze: bool) -> Result<Vec<Segment>> {
        let span = tracing::span!(tracing::Level::TRACE, "search");
        let _enter = span.enter();

        let data = if analyze {
            self.analyzer.run_single(video, true)?
        } else {
            AnalysisData::from_video(video)?
        };

        if !self.snap {
            return self.detect::<FrameSource>(&data, None);
        }
        let mut source = FrameSource::open(video, self.analyzer.source_options())?;
        self.detect(&data, Some(&mut source))
    }
}

impl<P: AsRef<Path> + Sync> Detector<P> {
    /// Runs the detector.
    ///
    /// * If `analyze` is set to true, an [Analyzer] is run in-place for each video instead of
    /// reading existing analysis data from disk.
    /// * If `use_result_files` is set and a result file matching the video already exists, its
    /// segments are reused. If `write_result_files` is set, a result file is written once the
    /// segments are known.
    /// * If `display` is set, the final results will be printed to stdout.
    pub fn run(
        &self,
        analyze: bool,
        display: bool,
        use_result_files: bool,
        write_result_files: bool,
        threading: bool,
    ) -> Result<BTreeMap<PathBuf, Vec<Segment>>> {
        let search = |video: &P| -> Result<(bool, Vec<Segment>)> {
            let video = video.as_ref();
            if use_result_files {
                if let Some(segments) = Self::check_result_file(video)? {
                    return Ok((true, segments));
                }
            }
            Ok((false, self.search(video, analyze)?))
        };

        let mut results = Vec::new();
        if cfg!(feature = "rayon") && threading {
            // Search all videos in parallel.
            #[cfg(feature = "rayon")]
            {
                results = self
                    .videos
                    .par_iter()
                    .map(search)
                    .collect::<Result<Vec<_>>>()?;
            }
        } else {
            results = self.videos.iter().map(search).collect::<Result<Vec<_>>>()?;
        }

        let mut segment_map = BTreeMap::new();

        for (video, (from_result_file, segments)) in self.videos.iter().zip(results) {
            let path = video.as_ref().to_owned();
            if display {
                println!("\n{}\n", path.display());
                if from_result_file {
                    println!("Using existing result file...");
                }
                self.display_segments(&segments);
            }
            if write_result_files && !from_result_file {
                Self::create_result_file(&path, &segments)?;
            }
            if let Some(format) = self.cut_list {
                output::write_cut_list(&path, &segments, format)?;
            }
            segment_map.insert(path, segments);
        }

        Ok(segment_map)
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::logo::{ComputeBackend, LogoSample};
    use crate::testing::SyntheticSource;

    fn data(scores: &[(u64, f32)]) -> AnalysisData {
        AnalysisData {
            samples: scores
                .iter()
                .map(|&(secs, score)| LogoSample {
                    time: Duration::from_secs(secs),
                    score,
                })
                .collect(),
            duration: Duration::from_secs(60),
            ..Default::default()
        }
    }

    fn detector() -> Detector<PathBuf> {
        Detector::default()
            .with_logo_threshold(0.5)
            .with_min_duration(Duration::from_secs(10))
            .with_analyzer(Analyzer::default().with_backend(ComputeBackend::Vectorized))
    }

    fn step_scores() -> AnalysisData {
        data(&(0..60).map(|s| (s, if (20..40).contains(&s) { 0.9 } else { 0.1 })).collect::<Vec<_>>())
    }

    #[test]
    fn test_detect_without_snap() {
        let segments = detector()
            .detect::<SyntheticSource>(&step_scores(), None)
            .unwrap();
        assert_eq!(
            segments,
            vec![Segment::new(Duration::from_secs(20), Duration::from_secs(40))]
        );
    }

    #[test]
    fn test_detect_with_snap() {
        // Cuts at 17s and 44s.
        let mut source = SyntheticSource::from_fn(Duration::from_millis(500), 120, |i| {
            let level = match i {
                0..=33 => 0.2,
                34..=87 => 0.8,
                _ => 0.3,
            };
            crate::testing::uniform_luma(level)
        });
        let segments = detector()
            .with_snap(true)
            .detect(&step_scores(), Some(&mut source))
            .unwrap();
        assert_eq!(
            segments,
            vec![Segment::new(Duration::from_secs(17), Duration::from_secs(44))]
        );
    }

    #[test]
    fn test_result_file_round_trip() {
        let dir = tempfile::tempdir().unwrap();
        let video = dir.path().join("episode.mkv");
        std::fs::write(&video, b"not really a video").unwrap();

        assert!(Detector::<PathBuf>::check_result_file(&video).unwrap().is_none());

        let segments = vec![Segment::new(
            Duration::from_millis(1500),
            Duration::from_secs(95),
        )];
        Detector::<PathBuf>::create_result_file(&video, &segments).unwrap();
        let loaded = Detector::<PathBuf>::check_result_file(&video).unwrap().unwrap();
        assert_eq!(loaded, segments);

        // A different video invalidates the result file.
        std::fs::write(&video, b"another video entirely").unwrap();
        assert!(Detector::<PathBuf>::check_result_file(&video).unwrap().is_none());
    }

    #[test]
    fn test_result_file_keeps_millisecond_precision() {
        let dir = tempfile::tempdir().unwrap();
        let video = dir.path().join("movie.mkv");
        std::fs::write(&video, b"not really a video").unwrap();

        let segments = vec![Segment::new(
            Duration::from_millis(3 * 3600 * 1000 + 123),
            Duration::from_millis(3 * 3600 * 1000 + 45_678),
        )];
        Detector::<PathBuf>::create_result_file(&video, &segments).unwrap();
        let loaded = Detector::<PathBuf>::check_result_file(&video).unwrap().unwrap();
        assert_eq!(loaded, segments);

        // Fractional seconds are not a valid segment and leave the file stale.
        let md5 = util::compute_header_md5sum(&video).unwrap();
        std::fs::write(
            video.with_extension(crate::logo::RESULT_FILE_EXT),
            format!(r#"{{"segments":[[10800.123,10845.678]],"md5":"{}"}}"#, md5),
        )
        .unwrap();
        assert!(Detector::<PathBuf>::check_result_file(&video).unwrap().is_none());
    }

    #[test]
    fn test_run_from_analysis_data() {
        let dir = tempfile::tempdir().unwrap();
        let video = dir.path().join("episode.mkv");
        std::fs::write(&video, b"not really a video").unwrap();
        step_scores().write_to(AnalysisData::path_for(&video)).unwrap();

        let detector = Detector::from_files(vec![video.clone()])
            .with_logo_threshold(0.5)
            .with_min_duration(Duration::from_secs(10))
            .with_cut_list(Some(CutListFormat::Csv));
        let results = detector.run(false, false, false, true, false).unwrap();

        let expected = vec![Segment::new(Duration::from_secs(20), Duration::from_secs(40))];
        assert_eq!(results[&video], expected);
        assert!(dir.path().join("episode.bugwatch.json").exists());
        assert_eq!(
            std::fs::read_to_string(dir.path().join("episode.bugwatch.csv")).unwrap(),
            "00:00:20.000,00:00:40.000\n"
        );

        // The result file is picked up on the next run.
        let results = detector.run(false, false, true, false, false).unwrap();
        assert_eq!(results[&video], expected);
    }

    #[test]
    fn test_missing_analysis_data() {
        let dir = tempfile::tempdir().unwrap();
        let video = dir.path().join("episode.mkv");
        let detector = Detector::from_files(vec![video]);
        assert!(matches!(
            detector.run(false, false, false, false, false),
            Err(crate::Error::AnalysisDataNotFound(_))
        ));
    }
}
