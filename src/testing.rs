//! In-memory video sources for tests.

use std::time::Duration;

use ndarray::{s, Array2};

use crate::video::{Frame, Luma, VideoSource};
use crate::Result;

pub(crate) const WIDTH: usize = 64;
pub(crate) const HEIGHT: usize = 64;

/// A fixed list of frames at a constant interval.
pub(crate) struct SyntheticSource {
    frames: Vec<Frame>,
    cursor: usize,
    keyframe_interval: usize,
    duration: Duration,
    pub(crate) seeks: usize,
}

impl SyntheticSource {
    pub(crate) fn from_fn(interval: Duration, count: usize, luma: impl Fn(usize) -> Luma) -> Self {
        let frames = (0..count)
            .map(|i| {
                let luma = luma(i);
                let reduced = reduce(&luma);
                Frame::new(interval * i as u32, luma, reduced)
            })
            .collect();
        Self {
            frames,
            cursor: 0,
            keyframe_interval: 1,
            duration: interval * count as u32,
            seeks: 0,
        }
    }

    pub(crate) fn uniform(interval: Duration, count: usize, value: f32) -> Self {
        Self::from_fn(interval, count, |_| uniform_luma(value))
    }

    pub(crate) fn with_keyframe_interval(mut self, keyframe_interval: usize) -> Self {
        self.keyframe_interval = keyframe_interval.max(1);
        self
    }
}

impl VideoSource for SyntheticSource {
    fn read_next(&mut self, keyframes_only: bool) -> Result<Option<Frame>> {
        while self.cursor < self.frames.len() {
            let idx = self.cursor;
            self.cursor += 1;
            if keyframes_only && idx % self.keyframe_interval != 0 {
                continue;
            }
            return Ok(Some(self.frames[idx].clone()));
        }
        Ok(None)
    }

    fn seek(&mut self, timestamp: Duration) -> Result<Option<Frame>> {
        self.seeks += 1;
        if timestamp > self.duration {
            return Ok(None);
        }
        match self.frames.iter().position(|f| f.timestamp >= timestamp) {
            Some(idx) => {
                self.cursor = idx + 1;
                Ok(Some(self.frames[idx].clone()))
            }
            None => {
                self.cursor = self.frames.len();
                Ok(None)
            }
        }
    }

    fn duration(&self) -> Duration {
        self.duration
    }

    fn dimensions(&self) -> (usize, usize) {
        (WIDTH, HEIGHT)
    }
}

pub(crate) fn uniform_luma(value: f32) -> Luma {
    Array2::from_elem((HEIGHT, WIDTH), value)
}

/// Mid-gray frame with a one-pixel checkerboard patch at `(x, y)`.
pub(crate) fn logo_luma(x: usize, y: usize, size: usize) -> Luma {
    let mut luma = uniform_luma(0.5);
    luma.slice_mut(s![y..y + size, x..x + size])
        .indexed_iter_mut()
        .for_each(|((py, px), v)| *v = if (px + py) % 2 == 0 { 1.0 } else { 0.0 });
    luma
}

/// Downsamples by taking every other pixel on each axis.
pub(crate) fn reduce(luma: &Luma) -> Luma {
    luma.slice(s![..;2, ..;2]).to_owned()
}
