use std::time::Duration;

use ndarray::Array2;

/// Luminance matrix, indexed `[[y, x]]`, with values normalized to `[0, 1]`.
pub type Luma = Array2<f32>;

/// A single decoded frame.
///
/// Frames are handed to each processor by reference and dropped once every
/// processor has seen them. Nothing downstream keeps a frame around.
#[derive(Clone, Debug)]
pub struct Frame {
    /// Presentation time relative to the start of the stream.
    pub timestamp: Duration,
    /// Full resolution luminance.
    pub luma: Luma,
    /// Quarter resolution (half width, half height) luminance.
    pub reduced: Luma,
}

impl Frame {
    pub fn new(timestamp: Duration, luma: Luma, reduced: Luma) -> Self {
        Self {
            timestamp,
            luma,
            reduced,
        }
    }

    /// Returns `(width, height)` of the full resolution luminance.
    pub fn dimensions(&self) -> (usize, usize) {
        let (height, width) = self.luma.dim();
        (width, height)
    }
}

// Copies the first plane of a GRAY8 frame into a normalized matrix.
//
// FFmpeg pads each row out to `stride` bytes, so the plane can't be
// reinterpreted directly.
pub(crate) fn luma_from_gray8(frame: &ffmpeg_next::frame::Video) -> Luma {
    let (width, height) = (frame.width() as usize, frame.height() as usize);
    let stride = frame.stride(0);
    let data = frame.data(0);
    Array2::from_shape_fn((height, width), |(y, x)| {
        f32::from(data[y * stride + x]) / 255.0
    })
}
