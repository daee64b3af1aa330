use std::io::Write;
use std::path::Path;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::{Error, Result};

/// Logo similarity of the rolling window centered at `time`.
#[derive(Clone, Copy, Debug, PartialEq, Deserialize, Serialize)]
pub struct LogoSample {
    pub time: Duration,
    pub score: f32,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Deserialize, Serialize)]
pub enum SceneKind {
    /// Large luminance change between consecutive frames.
    SceneChange,
    Black,
    White,
}

/// A notable frame found while analyzing a video.
#[derive(Clone, Copy, Debug, PartialEq, Deserialize, Serialize)]
pub struct SceneEvent {
    pub time: Duration,
    /// Mean luminance difference for scene changes; fraction of dark (or bright)
    /// pixels for black (or white) frames.
    pub magnitude: f32,
    pub kind: SceneKind,
}

/// A span of the video where the logo is on screen.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Deserialize, Serialize)]
pub struct Segment {
    pub start: Duration,
    pub end: Duration,
}

impl Segment {
    pub fn new(start: Duration, end: Duration) -> Self {
        Self { start, end }
    }

    pub fn duration(&self) -> Duration {
        self.end.saturating_sub(self.start)
    }
}

// NOTE: Modifying this struct is a breaking change.
/// Everything produced by one analysis pass over a video.
///
/// This is persisted next to the video so that segments can be rebuilt with
/// different thresholds without decoding it again.
#[derive(Clone, Debug, Default, Deserialize, Serialize)]
pub struct AnalysisData {
    pub(crate) samples: Vec<LogoSample>,
    pub(crate) events: Vec<SceneEvent>,
    pub(crate) duration: Duration,
    pub(crate) frames_processed: usize,
    /// MD5 hash of the first few KB of the video. Used to detect if the video
    /// changed since this data was generated.
    pub(crate) md5: String,
}

impl AnalysisData {
    pub fn samples(&self) -> &[LogoSample] {
        &self.samples
    }

    pub fn events(&self) -> &[SceneEvent] {
        &self.events
    }

    pub fn duration(&self) -> Duration {
        self.duration
    }

    pub fn frames_processed(&self) -> usize {
        self.frames_processed
    }

    pub fn md5(&self) -> &str {
        &self.md5
    }

    /// Reads analysis data from a `.bin` file.
    pub fn from_path(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let f = std::fs::File::open(path).map_err(|e| match e.kind() {
            std::io::ErrorKind::NotFound => Error::AnalysisDataNotFound(path.to_owned()),
            _ => e.into(),
        })?;
        Ok(bincode::deserialize_from(std::io::BufReader::new(f))?)
    }

    /// Reads the analysis data stored next to `video`.
    pub fn from_video(video: impl AsRef<Path>) -> Result<Self> {
        Self::from_path(Self::path_for(video))
    }

    /// Path of the analysis data file for `video`.
    pub fn path_for(video: impl AsRef<Path>) -> std::path::PathBuf {
        video.as_ref().with_extension(super::ANALYSIS_DATA_FILE_EXT)
    }

    pub fn write_to(&self, path: impl AsRef<Path>) -> Result<()> {
        let mut f = std::io::BufWriter::new(std::fs::File::create(path)?);
        bincode::serialize_into(&mut f, self)?;
        f.flush()?;
        Ok(())
    }
}
