use std::time::Duration;

use super::data::{LogoSample, Segment};

/// Turns a logo score time series into [Segment]s.
#[derive(Clone, Copy, Debug)]
pub struct SegmentBuilder {
    threshold: f32,
    min_duration: Duration,
}

impl Default for SegmentBuilder {
    fn default() -> Self {
        Self::new(
            super::DEFAULT_LOGO_THRESHOLD,
            Duration::from_secs(super::DEFAULT_MIN_SEGMENT_DURATION as u64),
        )
    }
}

impl SegmentBuilder {
    pub fn new(threshold: f32, min_duration: Duration) -> Self {
        Self {
            threshold,
            min_duration,
        }
    }

    /// Walks `samples` in order and returns every run of samples scoring at least
    /// the threshold that lasts `min_duration` or more.
    ///
    /// A run ends at the time of the first sample below the threshold. A run
    /// still open after the last sample ends at that sample's time.
    pub fn build(&self, samples: &[LogoSample]) -> Vec<Segment> {
        let mut segments = Vec::new();
        let mut open: Option<Duration> = None;

        for sample in samples {
            let has_logo = sample.score >= self.threshold;
            match (open, has_logo) {
                (None, true) => open = Some(sample.time),
                (Some(start), false) => {
                    self.close(&mut segments, start, sample.time);
                    open = None;
                }
                _ => (),
            }
        }

        if let (Some(start), Some(last)) = (open, samples.last()) {
            self.close(&mut segments, start, last.time);
        }

        segments
    }

    fn close(&self, segments: &mut Vec<Segment>, start: Duration, end: Duration) {
        let segment = Segment::new(start, end);
        if segment.duration() >= self.min_duration {
            segments.push(segment);
        } else {
            tracing::trace!(?segment, "dropping short segment");
        }
    }
}
