use std::collections::VecDeque;
use std::time::Duration;

use ndarray::Array2;

use super::backend::ComputeBackend;
use super::edges::EdgeMap;

/// Time-bounded window of edge maps with a running element-wise sum.
///
/// Pushing adds the new map to the sum and evicting subtracts the old one, so
/// the average is available without summing the whole window again.
///
/// With a span set (see [RollingWindow::with_span]) the capacity is only a
/// starting size: a push into a full window grows it instead of evicting an
/// entry that is still within the span of the new one.
#[derive(Debug)]
pub struct RollingWindow {
    entries: VecDeque<(f64, EdgeMap)>,
    capacity: usize,
    span: Option<f64>,
    sum: EdgeMap,
    backend: ComputeBackend,
}

impl RollingWindow {
    /// Creates an empty window of edge maps with shape `dim` (`(height, width)`).
    pub fn new(dim: (usize, usize), capacity: usize, backend: ComputeBackend) -> Self {
        let capacity = capacity.max(1);
        Self {
            entries: VecDeque::with_capacity(capacity),
            capacity,
            span: None,
            sum: Array2::zeros(dim),
            backend,
        }
    }

    /// Returns a new [RollingWindow] that keeps every entry within `span` of
    /// the newest one, growing past its capacity when frames arrive faster
    /// than it was sized for.
    pub fn with_span(mut self, span: Duration) -> Self {
        self.span = Some(span.as_secs_f64());
        self
    }

    /// Number of entries needed to cover `window` at one entry per `cadence`.
    pub fn capacity_for(window: Duration, cadence: Duration) -> usize {
        if cadence.is_zero() {
            return 1;
        }
        (window.as_secs_f64() / cadence.as_secs_f64()).ceil() as usize + 1
    }

    /// Fills the window with copies of `blank` at times `-k * cadence`, so that
    /// the average starts out as a featureless frame instead of being dominated by
    /// the first few real frames.
    pub fn prefill(&mut self, blank: &EdgeMap, cadence: Duration) {
        for k in (1..self.capacity).rev() {
            self.push(-(k as f64) * cadence.as_secs_f64(), blank.clone());
        }
    }

    /// Adds `map` at `time` (seconds). If the window is full, the oldest entry is
    /// evicted and returned, unless it is still within the span of `time`.
    pub fn push(&mut self, time: f64, map: EdgeMap) -> Option<(f64, EdgeMap)> {
        let evicted = if self.entries.len() < self.capacity {
            None
        } else if self.covers(time) {
            self.capacity += 1;
            tracing::trace!(capacity = self.capacity, "growing rolling window");
            None
        } else {
            self.pop_front()
        };
        self.backend.add_assign(&mut self.sum, &map);
        self.entries.push_back((time, map));
        evicted
    }

    /// Evicts every entry older than `cutoff` (seconds). Returns the number evicted.
    pub fn evict_before(&mut self, cutoff: f64) -> usize {
        let mut evicted = 0;
        while matches!(self.entries.front(), Some((t, _)) if *t < cutoff) {
            self.pop_front();
            evicted += 1;
        }
        evicted
    }

    // Whether the oldest entry is still inside the span ending at `time`.
    fn covers(&self, time: f64) -> bool {
        match (self.span, self.oldest()) {
            (Some(span), Some(oldest)) => oldest >= time - span,
            _ => false,
        }
    }

    fn pop_front(&mut self) -> Option<(f64, EdgeMap)> {
        let (time, map) = self.entries.pop_front()?;
        self.backend.sub_assign(&mut self.sum, &map);
        Some((time, map))
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// Element-wise sum of every map in the window.
    pub fn sum(&self) -> &EdgeMap {
        &self.sum
    }

    /// Element-wise average of the window, or zeros if it is empty.
    pub fn average(&self) -> EdgeMap {
        if self.entries.is_empty() {
            return Array2::zeros(self.sum.dim());
        }
        &self.sum / self.entries.len() as f32
    }

    /// Timestamp (seconds) of the oldest entry.
    pub fn oldest(&self) -> Option<f64> {
        self.entries.front().map(|(t, _)| *t)
    }

    pub fn dim(&self) -> (usize, usize) {
        self.sum.dim()
    }
}
