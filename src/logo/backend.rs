use ndarray::{Array2, ArrayView2, Zip};
#[cfg(feature = "rayon")]
use rayon::prelude::*;

/// Strategy used for the matrix kernels of the pipeline.
///
/// A backend is picked once with [ComputeBackend::select] and handed to each
/// component that does matrix work. All variants produce the same results up to
/// floating point rounding.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum ComputeBackend {
    /// Rows are spread over the rayon thread pool.
    Parallel,
    /// Single-threaded ndarray iteration.
    Vectorized,
    /// Plain indexed loops.
    Scalar,
}

impl Default for ComputeBackend {
    fn default() -> Self {
        Self::select()
    }
}

impl ComputeBackend {
    pub const PROBE_ORDER: [ComputeBackend; 3] = [
        ComputeBackend::Parallel,
        ComputeBackend::Vectorized,
        ComputeBackend::Scalar,
    ];

    /// Returns the first available backend in [ComputeBackend::PROBE_ORDER].
    pub fn select() -> Self {
        let backend = Self::PROBE_ORDER
            .into_iter()
            .find(|b| b.is_available())
            .unwrap_or(ComputeBackend::Scalar);
        tracing::debug!(?backend, "selected compute backend");
        backend
    }

    pub fn is_available(&self) -> bool {
        match self {
            ComputeBackend::Parallel => worker_threads() > 1,
            ComputeBackend::Vectorized | ComputeBackend::Scalar => true,
        }
    }

    /// `acc += m`, element-wise. Both matrices must have the same shape.
    pub fn add_assign(&self, acc: &mut Array2<f32>, m: &Array2<f32>) {
        match self {
            #[cfg(feature = "rayon")]
            ComputeBackend::Parallel => Zip::from(acc).and(m).par_for_each(|a, &b| *a += b),
            ComputeBackend::Scalar => {
                for ((y, x), a) in acc.indexed_iter_mut() {
                    *a += m[[y, x]];
                }
            }
            _ => Zip::from(acc).and(m).for_each(|a, &b| *a += b),
        }
    }

    /// `acc -= m`, element-wise. Both matrices must have the same shape.
    pub fn sub_assign(&self, acc: &mut Array2<f32>, m: &Array2<f32>) {
        match self {
            #[cfg(feature = "rayon")]
            ComputeBackend::Parallel => Zip::from(acc).and(m).par_for_each(|a, &b| *a -= b),
            ComputeBackend::Scalar => {
                for ((y, x), a) in acc.indexed_iter_mut() {
                    *a -= m[[y, x]];
                }
            }
            _ => Zip::from(acc).and(m).for_each(|a, &b| *a -= b),
        }
    }

    /// Centered cross-correlation between a reference and the average of a window.
    ///
    /// `window_sum` holds the sum of `count` matrices. Both inputs are centered on
    /// `bias` before multiplying. Returns `(Σ r·c, Σ r²)`.
    pub fn correlate(
        &self,
        reference: ArrayView2<f32>,
        window_sum: ArrayView2<f32>,
        count: f32,
        bias: f32,
    ) -> (f64, f64) {
        let inv_count = if count > 0.0 { 1.0 / count } else { 0.0 };
        self.reduce_pairs(reference, window_sum, move |r, s| {
            let r = f64::from(r - bias);
            let c = f64::from(s * inv_count - bias);
            (r * c, r * r)
        })
    }

    pub fn mean(&self, m: ArrayView2<f32>) -> f64 {
        if m.is_empty() {
            return 0.0;
        }
        let (sum, _) = self.reduce_pairs(m, m, |a, _| (f64::from(a), 0.0));
        sum / m.len() as f64
    }

    /// Mean of `|a - b|` over all elements.
    pub fn mean_abs_diff(&self, a: ArrayView2<f32>, b: ArrayView2<f32>) -> f64 {
        if a.is_empty() {
            return 0.0;
        }
        let (sum, _) = self.reduce_pairs(a, b, |x, y| (f64::from((x - y).abs()), 0.0));
        sum / a.len() as f64
    }

    /// Fraction of elements strictly below `threshold`.
    pub fn fraction_below(&self, m: ArrayView2<f32>, threshold: f32) -> f64 {
        self.fraction_where(m, move |v| v < threshold)
    }

    /// Fraction of elements strictly above `threshold`.
    pub fn fraction_above(&self, m: ArrayView2<f32>, threshold: f32) -> f64 {
        self.fraction_where(m, move |v| v > threshold)
    }

    fn fraction_where<F>(&self, m: ArrayView2<f32>, pred: F) -> f64
    where
        F: Fn(f32) -> bool + Send + Sync,
    {
        if m.is_empty() {
            return 0.0;
        }
        let (count, _) = self.reduce_pairs(m, m, |v, _| (if pred(v) { 1.0 } else { 0.0 }, 0.0));
        count / m.len() as f64
    }

    // Maps each pair of elements to two partial sums and adds them all up.
    fn reduce_pairs<F>(&self, a: ArrayView2<f32>, b: ArrayView2<f32>, f: F) -> (f64, f64)
    where
        F: Fn(f32, f32) -> (f64, f64) + Send + Sync,
    {
        debug_assert_eq!(a.dim(), b.dim());
        let add = |x: (f64, f64), y: (f64, f64)| (x.0 + y.0, x.1 + y.1);

        match self {
            #[cfg(feature = "rayon")]
            ComputeBackend::Parallel => (0..a.nrows())
                .into_par_iter()
                .map(|y| {
                    a.row(y)
                        .iter()
                        .zip(b.row(y).iter())
                        .map(|(&x, &z)| f(x, z))
                        .fold((0.0, 0.0), add)
                })
                .reduce(|| (0.0, 0.0), add),
            ComputeBackend::Scalar => {
                let (height, width) = a.dim();
                let mut acc = (0.0, 0.0);
                for y in 0..height {
                    for x in 0..width {
                        acc = add(acc, f(a[[y, x]], b[[y, x]]));
                    }
                }
                acc
            }
            _ => a
                .iter()
                .zip(b.iter())
                .map(|(&x, &z)| f(x, z))
                .fold((0.0, 0.0), add),
        }
    }
}

#[cfg(feature = "rayon")]
fn worker_threads() -> usize {
    rayon::current_num_threads()
}

#[cfg(not(feature = "rayon"))]
fn worker_threads() -> usize {
    1
}

#[cfg(test)]
mod test {
    use super::*;

    fn pattern(height: usize, width: usize, seed: usize) -> Array2<f32> {
        Array2::from_shape_fn((height, width), |(y, x)| {
            ((x * 7 + y * 13 + seed * 31) % 17) as f32 / 16.0
        })
    }

    #[test]
    fn test_backends_agree() {
        let a = pattern(48, 40, 1);
        let b = pattern(48, 40, 2);

        let results: Vec<(f64, f64, f64, f64)> = ComputeBackend::PROBE_ORDER
            .iter()
            .map(|backend| {
                let (num, den) = backend.correlate(a.view(), b.view(), 3.0, 0.5);
                (
                    num / den,
                    backend.mean(a.view()),
                    backend.mean_abs_diff(a.view(), b.view()),
                    backend.fraction_below(a.view(), 0.25),
                )
            })
            .collect();

        for r in &results[1..] {
            assert!((r.0 - results[0].0).abs() < 1e-9);
            assert!((r.1 - results[0].1).abs() < 1e-9);
            assert!((r.2 - results[0].2).abs() < 1e-9);
            assert!((r.3 - results[0].3).abs() < 1e-12);
        }
    }

    #[test]
    fn test_add_then_sub_restores() {
        for backend in ComputeBackend::PROBE_ORDER {
            let original = pattern(16, 16, 3);
            let mut acc = original.clone();
            let m = pattern(16, 16, 4);
            backend.add_assign(&mut acc, &m);
            assert!((acc[[5, 5]] - (original[[5, 5]] + m[[5, 5]])).abs() < 1e-6);
            backend.sub_assign(&mut acc, &m);
            assert!(acc
                .iter()
                .zip(original.iter())
                .all(|(a, b)| (a - b).abs() < 1e-6));
        }
    }

    #[test]
    fn test_mean_and_fractions() {
        let backend = ComputeBackend::Vectorized;
        let m = Array2::from_shape_fn((4, 4), |(y, _)| if y == 0 { 0.0 } else { 1.0 });
        assert!((backend.mean(m.view()) - 0.75).abs() < 1e-12);
        assert!((backend.fraction_below(m.view(), 0.5) - 0.25).abs() < 1e-12);
        assert!((backend.fraction_above(m.view(), 0.5) - 0.75).abs() < 1e-12);
    }

    #[test]
    fn test_correlate_self_is_one() {
        let r = pattern(20, 20, 5);
        // A window sum of 4 copies of the reference averages back to the reference.
        let sum = r.mapv(|v| v * 4.0);
        let (num, den) = ComputeBackend::Scalar.correlate(r.view(), sum.view(), 4.0, 0.5);
        assert!((num / den - 1.0).abs() < 1e-6);
    }

    #[test]
    fn test_select_returns_available_backend() {
        assert!(ComputeBackend::select().is_available());
    }
}
