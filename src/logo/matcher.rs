use std::sync::Arc;
use std::time::Duration;

use super::analyzer::Processor;
use super::backend::ComputeBackend;
use super::data::LogoSample;
use super::edges::{blank_edge_map, detect_edges_with, EdgeMap};
use super::reference::{LogoReference, Rect};
use super::window::RollingWindow;
use super::EDGE_BIAS;
use crate::video::Frame;
use crate::Result;

/// Scores how closely a rolling average of recent frames matches a
/// [LogoReference].
///
/// Each sample is timestamped at the center of the window that produced it,
/// so nothing is emitted for the first `window_length / 2` of the video.
pub struct LogoMatcher {
    reference: Arc<LogoReference>,
    rect: Rect,
    window: RollingWindow,
    window_length: Duration,
    backend: ComputeBackend,
    samples: Vec<LogoSample>,
}

impl LogoMatcher {
    /// Creates a matcher for frames arriving every `cadence`.
    ///
    /// The window is sized for `window_length` and pre-filled with blank edge
    /// maps. If frames turn out to arrive faster than `cadence`, the window grows
    /// so that it still spans `window_length`.
    pub fn new(
        reference: Arc<LogoReference>,
        window_length: Duration,
        cadence: Duration,
        backend: ComputeBackend,
    ) -> Self {
        let (width, height) = reference.dimensions();
        let capacity = RollingWindow::capacity_for(window_length, cadence);
        let mut window =
            RollingWindow::new((height, width), capacity, backend).with_span(window_length);
        window.prefill(&blank_edge_map(width, height), cadence);

        let rect = reference.comparison_rect();
        if rect.is_empty() {
            tracing::info!("logo bounding box is empty; every sample will score 0");
        }

        Self {
            reference,
            rect,
            window,
            window_length,
            backend,
            samples: Vec::new(),
        }
    }

    /// Adds `frame` to the window and returns the resulting sample, if its
    /// centered time is not negative.
    pub fn observe(&mut self, frame: &Frame) -> Option<LogoSample> {
        let edges = detect_edges_with(&frame.luma, self.backend);
        if edges.dim() != self.window.dim() {
            tracing::warn!(
                at = ?frame.timestamp,
                "frame size does not match logo reference; skipping"
            );
            return None;
        }

        let now = frame.timestamp.as_secs_f64();
        self.window.push(now, edges);
        self.window
            .evict_before(now - self.window_length.as_secs_f64());

        let centered = now - self.window_length.as_secs_f64() / 2.0;
        if centered < 0.0 {
            return None;
        }

        Some(LogoSample {
            time: Duration::from_secs_f64(centered),
            score: self.score(),
        })
    }

    /// Normalized correlation between the window average and the reference,
    /// over the comparison rectangle. 1.0 means the window looks exactly like
    /// the reference.
    pub fn score(&self) -> f32 {
        if self.rect.is_empty() || self.window.is_empty() {
            return 0.0;
        }
        let (num, den) = self.backend.correlate(
            self.rect.slice(&self.reference.matrix),
            self.rect.slice(self.window.sum()),
            self.window.len() as f32,
            EDGE_BIAS,
        );
        if den <= f64::EPSILON {
            return 0.0;
        }
        (num / den) as f32
    }

    pub fn window_average(&self) -> EdgeMap {
        self.window.average()
    }

    pub fn samples(&self) -> &[LogoSample] {
        &self.samples
    }

    pub fn into_samples(self) -> Vec<LogoSample> {
        self.samples
    }
}

impl Processor for LogoMatcher {
    fn process(&mut self, frame: &Frame) -> Result<()> {
        if let Some(sample) = self.observe(frame) {
            self.samples.push(sample);
        }
        Ok(())
    }

    fn complete(&mut self) -> Result<()> {
        tracing::debug!(samples = self.samples.len(), "logo matching complete");
        Ok(())
    }
}
