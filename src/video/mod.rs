//! Decoding layer: turns a video file into a stream of luminance [Frame]s.

mod accel;
mod frame;
mod sampler;
mod source;

pub use accel::{decoder_name, AccelerationTier, ProbeError};
pub use frame::{Frame, Luma};
pub use sampler::{FrameSampler, SampleMode};
pub use source::{FrameSource, SourceOptions, VideoSource};

/// Default period between analyzed frames.
///
/// Classification runs at one sample per second; boundaries are refined later
/// against scene changes.
pub const DEFAULT_SAMPLE_PERIOD: std::time::Duration = std::time::Duration::from_secs(1);

/// Downscale factor (per axis) of [Frame::reduced]. A factor of 2 on each axis
/// gives a quarter of the pixels.
pub const REDUCED_SCALE_FACTOR: u32 = 2;

/// Expected spacing of keyframes. Only sizes the initial rolling window in
/// keyframe mode; the window grows when keyframes are closer together.
pub const KEYFRAME_CADENCE_HINT: std::time::Duration = std::time::Duration::from_millis(500);
