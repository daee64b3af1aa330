use std::time::Duration;

use super::frame::Frame;
use super::source::VideoSource;
use crate::Result;

/// How frames are picked from a stream for analysis.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum SampleMode {
    /// One frame per period, on a grid aligned to the start of the stream.
    Period(Duration),
    /// Every keyframe; nothing else is decoded.
    Keyframes,
}

impl SampleMode {
    /// Returns the expected spacing between sampled frames.
    pub fn cadence(&self) -> Duration {
        match self {
            SampleMode::Period(period) => *period,
            SampleMode::Keyframes => super::KEYFRAME_CADENCE_HINT,
        }
    }
}

/// Iterates over a [VideoSource], yielding frames picked by a [SampleMode].
///
/// Iteration ends at the end of the stream or after the first error.
pub struct FrameSampler<'a, S: VideoSource + ?Sized> {
    source: &'a mut S,
    mode: SampleMode,
    next_due: Duration,
    pending: Option<Frame>,
    done: bool,
}

impl<'a, S: VideoSource + ?Sized> FrameSampler<'a, S> {
    pub fn new(source: &'a mut S, mode: SampleMode) -> Self {
        Self {
            source,
            mode,
            next_due: Duration::ZERO,
            pending: None,
            done: false,
        }
    }

    /// Returns a sampler that yields `first` (typically the frame returned by a
    /// seek) before reading on from the source.
    pub fn starting_with(source: &'a mut S, mode: SampleMode, first: Frame) -> Self {
        let mut sampler = Self::new(source, mode);
        sampler.advance(first.timestamp);
        sampler.pending = Some(first);
        sampler
    }

    // Moves the next due time to the grid slot after `timestamp`.
    fn advance(&mut self, timestamp: Duration) {
        if let SampleMode::Period(period) = self.mode {
            if period.is_zero() {
                self.next_due = timestamp;
            } else {
                let slots = (timestamp.as_secs_f64() / period.as_secs_f64()).floor() as u32 + 1;
                self.next_due = period * slots;
            }
        }
    }

    fn read(&mut self) -> Result<Option<Frame>> {
        match self.mode {
            SampleMode::Keyframes => self.source.read_next(true),
            SampleMode::Period(_) => {
                let frame = self.source.read_next_at_or_after(self.next_due, false)?;
                if let Some(frame) = &frame {
                    self.advance(frame.timestamp);
                }
                Ok(frame)
            }
        }
    }
}

impl<'a, S: VideoSource + ?Sized> Iterator for FrameSampler<'a, S> {
    type Item = Result<Frame>;

    fn next(&mut self) -> Option<Self::Item> {
        if let Some(frame) = self.pending.take() {
            return Some(Ok(frame));
        }
        if self.done {
            return None;
        }
        match self.read() {
            Ok(Some(frame)) => Some(Ok(frame)),
            Ok(None) => {
                self.done = true;
                None
            }
            Err(e) => {
                self.done = true;
                Some(Err(e))
            }
        }
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::testing::SyntheticSource;

    #[test]
    fn test_period_sampling_picks_one_frame_per_period() {
        // 10 seconds at 4 frames per second.
        let mut source = SyntheticSource::uniform(Duration::from_millis(250), 40, 0.5);
        let times: Vec<Duration> = FrameSampler::new(&mut source, SampleMode::Period(Duration::from_secs(1)))
            .map(|f| f.unwrap().timestamp)
            .collect();

        let expected: Vec<Duration> = (0..10).map(Duration::from_secs).collect();
        assert_eq!(times, expected);
    }

    #[test]
    fn test_period_sampling_with_coarse_source() {
        // Frames every 1.5s, sampled every 1s: every frame is used.
        let mut source = SyntheticSource::uniform(Duration::from_millis(1500), 6, 0.5);
        let count = FrameSampler::new(&mut source, SampleMode::Period(Duration::from_secs(1)))
            .count();
        assert_eq!(count, 6);
    }

    #[test]
    fn test_starting_with_seeked_frame() {
        let mut source = SyntheticSource::uniform(Duration::from_millis(250), 40, 0.5);
        let first = source.seek(Duration::from_millis(2100)).unwrap().unwrap();
        let times: Vec<Duration> =
            FrameSampler::starting_with(&mut source, SampleMode::Period(Duration::from_secs(1)), first)
                .map(|f| f.unwrap().timestamp)
                .collect();

        let mut expected = vec![Duration::from_millis(2250)];
        expected.extend((3..10).map(Duration::from_secs));
        assert_eq!(times, expected);
    }

    #[test]
    fn test_keyframe_sampling() {
        let mut source = SyntheticSource::uniform(Duration::from_secs(1), 12, 0.5)
            .with_keyframe_interval(4);
        let times: Vec<u64> = FrameSampler::new(&mut source, SampleMode::Keyframes)
            .map(|f| f.unwrap().timestamp.as_secs())
            .collect();
        assert_eq!(times, vec![0, 4, 8]);
    }
}
