use std::path::PathBuf;

pub mod logo;
pub mod output;
pub mod util;
pub mod video;

#[cfg(test)]
pub(crate) mod testing;

#[derive(thiserror::Error, Debug)]
pub enum Error {
    #[error("unable to open video container {path:?}: {source}")]
    OpenContainer {
        path: PathBuf,
        #[source]
        source: ffmpeg_next::Error,
    },
    #[error("no video stream found in {0:?}")]
    NoVideoStream(PathBuf),
    #[error("no decoder available for codec {0:?}")]
    UnsupportedCodec(ffmpeg_next::codec::Id),
    #[error("no decodable frames found in video")]
    NoDecodableFrames,
    #[error("analysis data not found at: {0:?}")]
    AnalysisDataNotFound(PathBuf),
    #[error("no paths provided to analyzer")]
    AnalyzerMissingPaths,
    #[error("FFmpeg error: {0}")]
    FFmpegError(#[from] ffmpeg_next::Error),
    #[error("bincode error: {0}")]
    BincodeError(#[from] bincode::Error),
    #[error("serde_json error: {0}")]
    SerdeJSONError(#[from] serde_json::Error),
    #[error("IO error: {0}")]
    IOError(#[from] std::io::Error),
}

impl Error {
    /// Returns `true` if this error means the video has no usable stream.
    ///
    /// These are the only conditions that abort a run. Everything else the
    /// pipeline hits along the way (a bad packet, a missing hardware decoder,
    /// a stale cache) is absorbed with a fallback.
    pub fn is_open_error(&self) -> bool {
        matches!(
            self,
            Error::OpenContainer { .. }
                | Error::NoVideoStream(_)
                | Error::UnsupportedCodec(_)
                | Error::NoDecodableFrames
        )
    }
}

pub type Result<T> = std::result::Result<T, Error>;
