use ndarray::{s, Array2, Zip};

use super::backend::ComputeBackend;
use super::reference::Rect;
use super::{EDGE_BIAS, EDGE_MARGIN};
use crate::video::Luma;

/// Edge map of a luminance frame: forward differences centered on [EDGE_BIAS],
/// with an [EDGE_MARGIN] wide border set to zero.
pub type EdgeMap = Array2<f32>;

#[inline(always)]
fn edge_kernel(e: &mut f32, &center: &f32, &right: &f32, &down: &f32) {
    *e = (right - center) + (down - center) + EDGE_BIAS;
}

/// Computes the edge map of `luma` (see [detect_edges_with]).
pub fn detect_edges(luma: &Luma) -> EdgeMap {
    detect_edges_with(luma, ComputeBackend::Vectorized)
}

/// Computes the edge map of `luma` with the given backend.
///
/// The frame is padded by one zero pixel on each side, then each pixel becomes
/// `(right - center) + (down - center) + EDGE_BIAS`. This is a cheap stand-in for
/// a Sobel filter that keeps fine static detail such as an embossed logo. The
/// outer [EDGE_MARGIN] pixels are zeroed to drop artifacts at the frame border.
pub fn detect_edges_with(luma: &Luma, backend: ComputeBackend) -> EdgeMap {
    let (height, width) = luma.dim();
    let mut padded = Array2::<f32>::zeros((height + 2, width + 2));
    padded
        .slice_mut(s![1..height + 1, 1..width + 1])
        .assign(luma);

    let center = padded.slice(s![1..height + 1, 1..width + 1]);
    let right = padded.slice(s![1..height + 1, 2..width + 2]);
    let down = padded.slice(s![2..height + 2, 1..width + 1]);

    let mut edges = Array2::<f32>::zeros((height, width));
    match backend {
        #[cfg(feature = "rayon")]
        ComputeBackend::Parallel => Zip::from(&mut edges)
            .and(&center)
            .and(&right)
            .and(&down)
            .par_for_each(edge_kernel),
        ComputeBackend::Scalar => {
            for y in 0..height {
                for x in 0..width {
                    edge_kernel(
                        &mut edges[[y, x]],
                        &center[[y, x]],
                        &right[[y, x]],
                        &down[[y, x]],
                    );
                }
            }
        }
        _ => Zip::from(&mut edges)
            .and(&center)
            .and(&right)
            .and(&down)
            .for_each(edge_kernel),
    }

    zero_margin(&mut edges, EDGE_MARGIN);
    edges
}

/// Edge map of a featureless frame. Used to pre-fill rolling windows.
pub fn blank_edge_map(width: usize, height: usize) -> EdgeMap {
    let mut edges = Array2::from_elem((height, width), EDGE_BIAS);
    zero_margin(&mut edges, EDGE_MARGIN);
    edges
}

/// Region of a `width` x `height` edge map that lies inside the zeroed margin.
pub fn interior(width: usize, height: usize) -> Rect {
    Rect::new(
        EDGE_MARGIN.min(width),
        EDGE_MARGIN.min(height),
        width.saturating_sub(2 * EDGE_MARGIN),
        height.saturating_sub(2 * EDGE_MARGIN),
    )
}

fn zero_margin(edges: &mut EdgeMap, margin: usize) {
    let (height, width) = edges.dim();
    let mh = margin.min(height);
    let mw = margin.min(width);
    edges.slice_mut(s![..mh, ..]).fill(0.0);
    edges.slice_mut(s![height - mh.., ..]).fill(0.0);
    edges.slice_mut(s![.., ..mw]).fill(0.0);
    edges.slice_mut(s![.., width - mw..]).fill(0.0);
}
