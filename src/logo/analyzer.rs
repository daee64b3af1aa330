use std::path::Path;
use std::sync::mpsc;
use std::sync::Arc;
use std::time::Duration;

#[cfg(feature = "rayon")]
use rayon::prelude::*;

use super::backend::ComputeBackend;
use super::classifier::FrameClassifier;
use super::data::AnalysisData;
use super::matcher::LogoMatcher;
use super::reference::{AcceptCandidate, BoundingBoxConfirmer, LogoReference, ReferenceBuilder};
use crate::video::{Frame, FrameSampler, FrameSource, SampleMode, SourceOptions, VideoSource};
use crate::{Error, Result};

/// A stage of the streaming pass. Every processor sees every sampled frame,
/// in timestamp order.
pub trait Processor: Send {
    fn process(&mut self, frame: &Frame) -> Result<()>;

    /// Called once after the last frame, including when the pass stops early.
    fn complete(&mut self) -> Result<()>;
}

/// Analyzes one or more videos for the presence of a broadcaster logo.
///
/// If `threaded_decoding` is set to `true`, FFmpeg decodes each video with frame
/// threading. If `force` is set, any existing logo reference cache or analysis
/// data on disk will be **ignored**.
///
/// At a high-level, the analyzer does the following for a given video:
///
/// 1. Builds (or loads from cache) a [LogoReference] from frames sampled across the video
/// 2. Streams the video once at the sampling cadence, scoring a rolling window of frames against
///    the reference and classifying each frame for black/white frames and scene changes
/// 3. Returns an [AnalysisData] instance with both time series and (optionally) writes it to
///    disk alongside the video
///
/// # Example
///
/// ```no_run
/// use std::path::PathBuf;
/// use bugwatch::logo::Analyzer;
///
/// let video_paths = vec![PathBuf::from("episode-01.mkv")];
/// let analyzer = Analyzer::from_files(video_paths, false, false);
/// let data = analyzer.run(true, false).unwrap();
/// ```
#[derive(Debug)]
pub struct Analyzer<P: AsRef<Path>> {
    pub(crate) videos: Vec<P>,
    scene_change_threshold: f32,
    black_threshold: f32,
    window_length: Duration,
    sample_mode: SampleMode,
    frame_limit: Option<usize>,
    reference_samples: usize,
    source_options: SourceOptions,
    backend: ComputeBackend,
    confirmer: Arc<dyn BoundingBoxConfirmer>,
    force: bool,
}

impl<P: AsRef<Path>> Default for Analyzer<P> {
    fn default() -> Self {
        Self {
            videos: Default::default(),
            scene_change_threshold: super::DEFAULT_SCENE_CHANGE_THRESHOLD,
            black_threshold: super::DEFAULT_BLACK_WHITE_THRESHOLD,
            window_length: super::DEFAULT_WINDOW_LENGTH,
            sample_mode: SampleMode::Period(crate::video::DEFAULT_SAMPLE_PERIOD),
            frame_limit: None,
            reference_samples: super::DEFAULT_REFERENCE_SAMPLES,
            source_options: SourceOptions::default(),
            backend: ComputeBackend::select(),
            confirmer: Arc::new(AcceptCandidate),
            force: false,
        }
    }
}

impl<P: AsRef<Path>> Analyzer<P> {
    /// Constructs a new [Analyzer] from a list of video paths.
    pub fn from_files(videos: impl Into<Vec<P>>, threaded_decoding: bool, force: bool) -> Self {
        let mut analyzer = Self::default()
            .with_threaded_decoding(threaded_decoding)
            .with_force(force);
        analyzer.videos = videos.into();
        analyzer
    }

    /// Returns the video paths used by this analyzer.
    pub fn videos(&self) -> &[P] {
        &self.videos
    }

    /// Returns a new [Analyzer] with the provided `scene_change_threshold`.
    pub fn with_scene_change_threshold(mut self, scene_change_threshold: f32) -> Self {
        self.scene_change_threshold = scene_change_threshold;
        self
    }

    /// Returns a new [Analyzer] with the provided `black_threshold`.
    pub fn with_black_threshold(mut self, black_threshold: f32) -> Self {
        self.black_threshold = black_threshold;
        self
    }

    /// Returns a new [Analyzer] with the provided rolling `window_length`.
    pub fn with_window_length(mut self, window_length: Duration) -> Self {
        self.window_length = window_length;
        self
    }

    /// Returns a new [Analyzer] with the provided `sample_mode`.
    pub fn with_sample_mode(mut self, sample_mode: SampleMode) -> Self {
        self.sample_mode = sample_mode;
        self
    }

    /// Returns a new [Analyzer] that stops after `frame_limit` frames.
    pub fn with_frame_limit(mut self, frame_limit: Option<usize>) -> Self {
        self.frame_limit = frame_limit;
        self
    }

    /// Returns a new [Analyzer] that averages `reference_samples` frames into each logo reference.
    pub fn with_reference_samples(mut self, reference_samples: usize) -> Self {
        self.reference_samples = reference_samples;
        self
    }

    /// Returns a new [Analyzer] with `thread_decoding` set to the provided value.
    pub fn with_threaded_decoding(mut self, threaded_decoding: bool) -> Self {
        self.source_options = self.source_options.with_threaded_decoding(threaded_decoding);
        self
    }

    /// Returns a new [Analyzer] with hardware decoding set to the provided value.
    pub fn with_hardware_decoding(mut self, hardware: bool) -> Self {
        self.source_options = self.source_options.with_hardware(hardware);
        self
    }

    /// Returns a new [Analyzer] with the provided compute `backend`.
    pub fn with_backend(mut self, backend: ComputeBackend) -> Self {
        self.backend = backend;
        self
    }

    /// Returns a new [Analyzer] that asks `confirmer` about each newly discovered logo box.
    pub fn with_confirmer(mut self, confirmer: Arc<dyn BoundingBoxConfirmer>) -> Self {
        self.confirmer = confirmer;
        self
    }

    /// Returns a new [Analyzer] with `force` set to the provided value.
    pub fn with_force(mut self, force: bool) -> Self {
        self.force = force;
        self
    }

    pub(crate) fn source_options(&self) -> SourceOptions {
        self.source_options
    }

    pub(crate) fn backend(&self) -> ComputeBackend {
        self.backend
    }

    pub(crate) fn scene_change_threshold(&self) -> f32 {
        self.scene_change_threshold
    }

    pub(crate) fn black_threshold(&self) -> f32 {
        self.black_threshold
    }

    fn reference_builder(&self) -> ReferenceBuilder<'_> {
        ReferenceBuilder::default()
            .with_sample_count(self.reference_samples)
            .with_force(self.force)
            .with_backend(self.backend)
            .with_confirmer(self.confirmer.as_ref())
    }

    // Runs the matcher and classifier over `frames`, stopping early at the
    // frame limit.
    fn process_frames<I>(
        &self,
        frames: I,
        reference: Arc<LogoReference>,
        duration: Duration,
    ) -> Result<AnalysisData>
    where
        I: IntoIterator<Item = Result<Frame>>,
    {
        let span = tracing::span!(tracing::Level::TRACE, "process_frames");
        let _enter = span.enter();

        let mut matcher = LogoMatcher::new(
            reference,
            self.window_length,
            self.sample_mode.cadence(),
            self.backend,
        );
        let mut classifier =
            FrameClassifier::new(self.scene_change_threshold, self.black_threshold, self.backend);

        let mut frames_processed = 0;
        for frame in frames {
            if self.frame_limit.map_or(false, |limit| frames_processed >= limit) {
                tracing::debug!(frames_processed, "reached frame limit");
                break;
            }
            let frame = frame?;

            #[cfg(feature = "rayon")]
            let (m, c) = rayon::join(|| matcher.process(&frame), || classifier.process(&frame));
            #[cfg(not(feature = "rayon"))]
            let (m, c) = (matcher.process(&frame), classifier.process(&frame));
            m?;
            c?;

            frames_processed += 1;
        }

        matcher.complete()?;
        classifier.complete()?;

        Ok(AnalysisData {
            samples: matcher.into_samples(),
            events: classifier.into_events(),
            duration,
            frames_processed,
            md5: String::new(),
        })
    }

    /// Analyzes an already opened `source`, without prefetching.
    ///
    /// The logo reference is built from (or cached at) `cache_path`.
    pub fn analyze_source<S: VideoSource + ?Sized>(
        &self,
        source: &mut S,
        cache_path: &Path,
    ) -> Result<AnalysisData> {
        let reference = Arc::new(self.reference_builder().build(source, cache_path)?);
        let duration = source.duration();
        match source.seek(Duration::ZERO)? {
            Some(first) => {
                let sampler = FrameSampler::starting_with(source, self.sample_mode, first);
                self.process_frames(sampler, reference, duration)
            }
            None => self.process_frames(std::iter::empty(), reference, duration),
        }
    }

    pub(crate) fn run_single(&self, path: impl AsRef<Path>, persist: bool) -> Result<AnalysisData> {
        let span = tracing::span!(tracing::Level::TRACE, "run");
        let _enter = span.enter();

        let path = path.as_ref();
        let data_path = AnalysisData::path_for(path);

        // Check if we've already analyzed this video by comparing MD5 hashes.
        let md5 = crate::util::compute_header_md5sum(path)?;
        if !self.force {
            if let Ok(data) = AnalysisData::from_path(&data_path) {
                if data.md5() == md5 {
                    tracing::info!("skipping analysis for {}", path.display());
                    return Ok(data);
                }
            }
        }

        let cache_path = path.with_extension(super::LOGO_CACHE_FILE_EXT);
        let (reference, duration) = {
            let mut source = FrameSource::open(path, self.source_options)?;
            if source.tier().is_hardware() {
                tracing::debug!(tier = ?source.tier(), "using hardware decoding");
            }
            let reference = self.reference_builder().build(&mut source, &cache_path)?;
            (Arc::new(reference), source.duration())
        };

        tracing::debug!("starting frame processing for {}", path.display());

        // A reader thread decodes the next frame while the current one is being
        // processed.
        let (tx, rx) = mpsc::sync_channel::<Result<Frame>>(1);
        let options = self.source_options;
        let mode = self.sample_mode;
        let mut data = std::thread::scope(|s| {
            s.spawn(move || {
                let mut source = match FrameSource::open(path, options) {
                    Ok(source) => source,
                    Err(e) => {
                        let _ = tx.send(Err(e));
                        return;
                    }
                };
                for frame in FrameSampler::new(&mut source, mode) {
                    // The receiver is gone once the frame limit is hit.
                    if tx.send(frame).is_err() {
                        break;
                    }
                }
            });
            self.process_frames(rx, reference, duration)
        })?;

        tracing::debug!(
            samples = data.samples.len(),
            events = data.events.len(),
            frames = data.frames_processed,
            "completed frame processing for {}",
            path.display(),
        );

        data.md5 = md5;

        // Write results to disk.
        if persist {
            data.write_to(&data_path)?;
        }

        Ok(data)
    }
}

impl<P: AsRef<Path> + Sync> Analyzer<P> {
    /// Runs this analyzer.
    pub fn run(&self, persist: bool, threading: bool) -> Result<Vec<AnalysisData>> {
        if self.videos.is_empty() {
            return Err(Error::AnalyzerMissingPaths);
        }

        if cfg!(feature = "rayon") && threading {
            #[cfg(feature = "rayon")]
            return self
                .videos
                .par_iter()
                .map(|path| self.run_single(path, persist))
                .collect();
        }

        self.videos
            .iter()
            .map(|path| self.run_single(path, persist))
            .collect()
    }
}
