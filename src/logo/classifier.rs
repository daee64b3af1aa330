use std::time::Duration;

use super::analyzer::Processor;
use super::backend::ComputeBackend;
use super::data::{SceneEvent, SceneKind};
use super::UNIFORM_PIXEL_FRACTION;
use crate::video::{Frame, Luma};
use crate::Result;

/// Which luminance matrix of a [Frame] the classifier looks at.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum Resolution {
    /// Quarter-size luminance. Cheap enough for a full streaming pass.
    #[default]
    Reduced,
    Full,
}

/// Flags black frames, white frames and scene changes.
///
/// At most one event is reported per frame. Black takes precedence over white,
/// which takes precedence over a scene change.
pub struct FrameClassifier {
    scene_threshold: f32,
    black_threshold: f32,
    resolution: Resolution,
    previous: Option<Luma>,
    backend: ComputeBackend,
    events: Vec<SceneEvent>,
}

impl FrameClassifier {
    pub fn new(scene_threshold: f32, black_threshold: f32, backend: ComputeBackend) -> Self {
        Self {
            scene_threshold,
            black_threshold,
            resolution: Resolution::default(),
            previous: None,
            backend,
            events: Vec::new(),
        }
    }

    /// Returns a new [FrameClassifier] that reads the given `resolution`.
    pub fn with_resolution(mut self, resolution: Resolution) -> Self {
        self.resolution = resolution;
        self
    }

    /// Classifies `frame` against the previously classified frame.
    pub fn classify(&mut self, frame: &Frame) -> Option<SceneEvent> {
        let luma = match self.resolution {
            Resolution::Reduced => &frame.reduced,
            Resolution::Full => &frame.luma,
        };
        self.classify_luma(frame.timestamp, luma)
    }

    pub fn classify_luma(&mut self, time: Duration, luma: &Luma) -> Option<SceneEvent> {
        let event = self.uniform_event(time, luma).or_else(|| {
            let previous = self.previous.as_ref().filter(|p| p.dim() == luma.dim())?;
            let magnitude = self.backend.mean_abs_diff(luma.view(), previous.view()) as f32;
            (magnitude > self.scene_threshold).then(|| SceneEvent {
                time,
                magnitude,
                kind: SceneKind::SceneChange,
            })
        });

        self.previous = Some(luma.clone());
        event
    }

    // Black or white frame test. The mean must cross the threshold and nearly
    // every pixel must cross it too, which rules out letterboxed frames.
    fn uniform_event(&self, time: Duration, luma: &Luma) -> Option<SceneEvent> {
        let mean = self.backend.mean(luma.view()) as f32;

        let (kind, fraction) = if mean < self.black_threshold {
            (
                SceneKind::Black,
                self.backend.fraction_below(luma.view(), self.black_threshold),
            )
        } else if mean > 1.0 - self.black_threshold {
            (
                SceneKind::White,
                self.backend
                    .fraction_above(luma.view(), 1.0 - self.black_threshold),
            )
        } else {
            return None;
        };

        (fraction >= UNIFORM_PIXEL_FRACTION).then(|| SceneEvent {
            time,
            magnitude: fraction as f32,
            kind,
        })
    }

    pub fn events(&self) -> &[SceneEvent] {
        &self.events
    }

    pub fn into_events(self) -> Vec<SceneEvent> {
        self.events
    }
}

impl Processor for FrameClassifier {
    fn process(&mut self, frame: &Frame) -> Result<()> {
        if let Some(event) = self.classify(frame) {
            tracing::trace!(?event, "scene event");
            self.events.push(event);
        }
        Ok(())
    }

    fn complete(&mut self) -> Result<()> {
        self.previous = None;
        tracing::debug!(events = self.events.len(), "frame classification complete");
        Ok(())
    }
}

#[cfg(test)]
mod test {
    use ndarray::{s, Array2};

    use super::*;
    use crate::logo::{DEFAULT_BLACK_WHITE_THRESHOLD, DEFAULT_SCENE_CHANGE_THRESHOLD};
    use crate::testing;

    fn classifier() -> FrameClassifier {
        FrameClassifier::new(
            DEFAULT_SCENE_CHANGE_THRESHOLD,
            DEFAULT_BLACK_WHITE_THRESHOLD,
            ComputeBackend::Vectorized,
        )
        .with_resolution(Resolution::Full)
    }

    fn at(secs: u64) -> Duration {
        Duration::from_secs(secs)
    }

    #[test]
    fn test_black_and_white_frames() {
        let mut c = classifier();
        let black = c.classify_luma(at(0), &testing::uniform_luma(0.02)).unwrap();
        assert_eq!(black.kind, SceneKind::Black);
        assert_eq!(black.magnitude, 1.0);

        // Black to white is also a scene change, but white wins.
        let white = c.classify_luma(at(1), &testing::uniform_luma(0.97)).unwrap();
        assert_eq!(white.kind, SceneKind::White);
    }

    #[test]
    fn test_letterboxed_dark_frame_is_not_black() {
        let mut c = classifier();
        // Mean is below the threshold but a bright strip covers 10% of the frame.
        let mut luma = testing::uniform_luma(0.0);
        luma.slice_mut(s![..6, ..]).fill(0.9);
        assert!(c.classify_luma(at(0), &luma).is_none());
    }

    #[test]
    fn test_scene_change() {
        let mut c = classifier();
        assert!(c.classify_luma(at(0), &testing::uniform_luma(0.3)).is_none());
        assert!(c.classify_luma(at(1), &testing::uniform_luma(0.35)).is_none());

        let event = c.classify_luma(at(2), &testing::uniform_luma(0.8)).unwrap();
        assert_eq!(event.kind, SceneKind::SceneChange);
        assert!((event.magnitude - 0.45).abs() < 1e-5);
        assert_eq!(event.time, at(2));
    }

    #[test]
    fn test_size_change_is_not_a_scene_change() {
        let mut c = classifier();
        c.classify_luma(at(0), &testing::uniform_luma(0.3));
        assert!(c
            .classify_luma(at(1), &Array2::from_elem((8, 8), 0.8))
            .is_none());
    }

    #[test]
    fn test_processor_uses_reduced_luma() {
        let mut c = FrameClassifier::new(0.2, 0.1, ComputeBackend::Scalar);
        let frames = [
            (0.5, 0.5),
            // Only the reduced matrix changes.
            (0.5, 0.85),
        ];
        for (i, (full, reduced)) in frames.into_iter().enumerate() {
            let frame = Frame::new(
                at(i as u64),
                testing::uniform_luma(full),
                Array2::from_elem((32, 32), reduced),
            );
            c.process(&frame).unwrap();
        }
        c.complete().unwrap();
        assert_eq!(c.events().len(), 1);
        assert_eq!(c.into_events()[0].time, at(1));
    }
}
