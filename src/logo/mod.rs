//! Logo detection: reference construction, rolling matching, scene
//! classification and segment building.

use std::time::Duration;

mod analyzer;
mod backend;
mod cache;
mod classifier;
mod data;
mod detector;
mod edges;
mod matcher;
mod reference;
mod segments;
mod snap;
mod window;

pub use analyzer::{Analyzer, Processor};
pub use backend::ComputeBackend;
pub use cache::CacheFormatError;
pub use classifier::{FrameClassifier, Resolution};
pub use data::{AnalysisData, LogoSample, SceneEvent, SceneKind, Segment};
pub use detector::Detector;
pub use edges::{blank_edge_map, detect_edges, detect_edges_with, interior, EdgeMap};
pub use matcher::LogoMatcher;
pub use reference::{
    discover_bounding_box, AcceptCandidate, BoundingBoxConfirmer, BoundingBoxDiscovery,
    Confirmation, LogoReference, Rect, ReferenceBuilder,
};
pub use segments::SegmentBuilder;
pub use snap::Snapper;
pub use window::RollingWindow;

/// Default logo similarity threshold.
///
/// A sample is considered to contain the logo if its score is at least this value. Scores are
/// normalized against the reference, so a window that looks exactly like the reference scores 1.0.
pub const DEFAULT_LOGO_THRESHOLD: f32 = 0.5;

/// Default scene change threshold.
///
/// Mean absolute luminance difference (0 to 1) between consecutive analyzed frames above which
/// a scene change is reported.
pub const DEFAULT_SCENE_CHANGE_THRESHOLD: f32 = 0.2;

/// Default black/white frame threshold.
///
/// A frame is black if its luminance is below this value (white if above `1 - value`).
pub const DEFAULT_BLACK_WHITE_THRESHOLD: f32 = 0.1;

/// Default minimum segment duration (seconds).
///
/// Runs of logo presence shorter than this are dropped.
pub const DEFAULT_MIN_SEGMENT_DURATION: u16 = 30; // seconds

/// Default rolling window length.
///
/// Edge maps are averaged over this much time before being compared against the reference.
pub const DEFAULT_WINDOW_LENGTH: Duration = Duration::from_secs(30);

/// Value that edge maps are centered on. Half of the (normalized) maximum luminance.
pub const EDGE_BIAS: f32 = 0.5;

/// Width (pixels) of the border that is zeroed in every edge map.
pub const EDGE_MARGIN: usize = 10;

/// Number of frames averaged into a logo reference.
pub const DEFAULT_REFERENCE_SAMPLES: usize = 500;

/// Portion of the video (as fractions of its duration) that reference frames are sampled from.
/// Skips cold opens and end credits.
pub const REFERENCE_SAMPLE_WINDOW: (f32, f32) = (0.10, 0.70);

// Bounding box discovery parameters.
const BOX_THRESHOLD_FACTOR: f32 = 0.2;
const BOX_MAX_RETRIES: usize = 2;
const BOX_MAX_AREA_FRACTION: f32 = 0.25;
const BOX_NOISE_RATIO: f32 = 1.6;
const BOX_RAISE_FACTOR: f32 = 1.5;
const BOX_PADDING: usize = 10;

/// Fraction of pixels that must individually be dark (or bright) for a frame to count as black
/// (or white).
const UNIFORM_PIXEL_FRACTION: f64 = 0.95;

/// Default length of each chunk decoded while searching for a scene change near a segment boundary.
pub const DEFAULT_SNAP_CHUNK: Duration = Duration::from_secs(5);

/// Default maximum distance a segment boundary is moved while snapping to a scene change.
pub const DEFAULT_SNAP_MAX_DISTANCE: Duration = Duration::from_secs(30);

static LOGO_CACHE_FILE_EXT: &str = "bugwatch.logo.txt";
static ANALYSIS_DATA_FILE_EXT: &str = "bugwatch.bin";
static RESULT_FILE_EXT: &str = "bugwatch.json";
