use std::path::{Path, PathBuf};
use std::time::Duration;

use ffmpeg_next::format::Pixel;
use ffmpeg_next::software::scaling;
use ffmpeg_next::Rational;

use super::accel::{self, AccelerationTier};
use super::frame::{luma_from_gray8, Frame};
use crate::{Error, Result};

// Container-level timestamps (duration, seek targets) are in microseconds.
const AV_TIME_BASE: f64 = 1_000_000.0;

/// A seekable stream of luminance frames.
///
/// [FrameSource] is the FFmpeg-backed implementation. Implementations must
/// produce non-decreasing timestamps between seeks.
pub trait VideoSource {
    /// Decodes and returns the next frame, or `None` at the end of the stream.
    ///
    /// If `keyframes_only` is set, only keyframes are decoded.
    fn read_next(&mut self, keyframes_only: bool) -> Result<Option<Frame>>;

    /// Returns the first frame whose timestamp is at or after `target`.
    ///
    /// Frames before the target are skipped; implementations may avoid
    /// converting them.
    fn read_next_at_or_after(
        &mut self,
        target: Duration,
        keyframes_only: bool,
    ) -> Result<Option<Frame>> {
        while let Some(frame) = self.read_next(keyframes_only)? {
            if frame.timestamp >= target {
                return Ok(Some(frame));
            }
        }
        Ok(None)
    }

    /// Moves the read cursor to `timestamp` and returns the first frame at or
    /// after it. Returns `None` if the target lies beyond the stream.
    fn seek(&mut self, timestamp: Duration) -> Result<Option<Frame>>;

    /// Returns the duration of the stream.
    fn duration(&self) -> Duration;

    /// Returns `(width, height)` of full resolution frames.
    fn dimensions(&self) -> (usize, usize);
}

/// Options used when opening a [FrameSource].
#[derive(Clone, Copy, Debug)]
pub struct SourceOptions {
    hardware: bool,
    threaded_decoding: bool,
}

impl Default for SourceOptions {
    fn default() -> Self {
        Self {
            hardware: true,
            threaded_decoding: false,
        }
    }
}

impl SourceOptions {
    /// Returns new [SourceOptions] with hardware decoding set to the provided value.
    pub fn with_hardware(mut self, hardware: bool) -> Self {
        self.hardware = hardware;
        self
    }

    /// Returns new [SourceOptions] with `threaded_decoding` set to the provided value.
    pub fn with_threaded_decoding(mut self, threaded_decoding: bool) -> Self {
        self.threaded_decoding = threaded_decoding;
        self
    }
}

// Converts a timestamp in time base units into a [Duration].
pub(crate) fn to_timestamp(time_base: Rational, raw_timestamp: i64) -> Duration {
    let time_base: f64 = time_base.into();
    let ts = raw_timestamp as f64 * time_base;
    Duration::from_secs_f64(ts.max(0.0))
}

/// Decodes the best video stream of a file into [Frame]s.
///
/// The decoder tier is negotiated once in [FrameSource::open]. Every frame is
/// scaled to GRAY8 at full and reduced resolution. The native decoder, scaler
/// and frame buffers are owned here and released when the source is dropped.
///
/// A source has a single read cursor, so it must not be shared between two
/// readers.
pub struct FrameSource {
    path: PathBuf,
    input: ffmpeg_next::format::context::Input,
    decoder: ffmpeg_next::codec::decoder::Video,
    tier: AccelerationTier,
    stream_idx: usize,
    time_base: Rational,
    start_time: i64,
    duration: Duration,
    full_scaler: Option<scaling::Context>,
    reduced_scaler: Option<scaling::Context>,
    decoded: ffmpeg_next::frame::Video,
    eof_sent: bool,
    last_timestamp: Duration,
}

impl FrameSource {
    /// Opens the video at `path`.
    ///
    /// Fails only if the container can't be read, holds no video stream, or no
    /// decoder (hardware or software) can handle the codec.
    pub fn open(path: impl AsRef<Path>, options: SourceOptions) -> Result<Self> {
        let path = path.as_ref();
        let input = ffmpeg_next::format::input(&path).map_err(|source| Error::OpenContainer {
            path: path.to_owned(),
            source,
        })?;

        let (decoder, tier, stream_idx, time_base, start_time, stream_duration) = {
            let stream = input
                .streams()
                .best(ffmpeg_next::media::Type::Video)
                .ok_or_else(|| Error::NoVideoStream(path.to_owned()))?;
            let (decoder, tier) =
                accel::negotiate(&stream, options.hardware, options.threaded_decoding)?;
            (
                decoder,
                tier,
                stream.index(),
                stream.time_base(),
                // Covers AV_NOPTS_VALUE too.
                stream.start_time().max(0),
                stream.duration(),
            )
        };

        // Some containers (e.g., Matroska) only store the duration in the format
        // context, not in the stream.
        let duration = if stream_duration > 0 {
            to_timestamp(time_base, stream_duration)
        } else if input.duration() > 0 {
            Duration::from_secs_f64(input.duration() as f64 / AV_TIME_BASE)
        } else {
            tracing::warn!("no duration found for {}", path.display());
            Duration::ZERO
        };

        tracing::debug!(
            path = %path.display(),
            ?tier,
            width = decoder.width(),
            height = decoder.height(),
            duration_secs = duration.as_secs_f64(),
            "opened video source"
        );

        Ok(Self {
            path: path.to_owned(),
            input,
            decoder,
            tier,
            stream_idx,
            time_base,
            start_time,
            duration,
            full_scaler: None,
            reduced_scaler: None,
            decoded: ffmpeg_next::frame::Video::empty(),
            eof_sent: false,
            last_timestamp: Duration::ZERO,
        })
    }

    /// Returns the path this source was opened from.
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Returns the decode tier selected at open time.
    pub fn tier(&self) -> AccelerationTier {
        self.tier
    }

    // Pulls the next decoded frame into `self.decoded`. Returns `false` once the
    // decoder is fully drained.
    //
    // Packets that fail to decode are skipped.
    fn decode_next(&mut self, keyframes_only: bool) -> Result<bool> {
        loop {
            match self.decoder.receive_frame(&mut self.decoded) {
                Ok(()) => return Ok(true),
                Err(ffmpeg_next::Error::Eof) => return Ok(false),
                Err(_) if self.eof_sent => return Ok(false),
                // Needs more input.
                Err(_) => (),
            }

            let mut packet = ffmpeg_next::Packet::empty();
            match packet.read(&mut self.input) {
                Ok(()) => {
                    if packet.stream() != self.stream_idx || (keyframes_only && !packet.is_key()) {
                        continue;
                    }
                    if let Err(e) = self.decoder.send_packet(&packet) {
                        tracing::warn!(error = %e, pts = ?packet.pts(), "skipping undecodable packet");
                    }
                }
                Err(ffmpeg_next::Error::Eof) => self.send_eof(),
                Err(e) => {
                    tracing::warn!(error = %e, "failed to read packet; treating as end of stream");
                    self.send_eof();
                }
            }
        }
    }

    fn send_eof(&mut self) {
        if let Err(e) = self.decoder.send_eof() {
            tracing::debug!(error = %e, "failed to signal end of stream to decoder");
        }
        self.eof_sent = true;
    }

    // Timestamp of the frame in `self.decoded`, clamped so that it never goes
    // backwards within a read loop.
    fn current_timestamp(&mut self) -> Duration {
        let raw = self.decoded.timestamp().or_else(|| self.decoded.pts());
        let ts = match raw {
            Some(raw) => to_timestamp(self.time_base, raw - self.start_time),
            None => self.last_timestamp,
        };
        let ts = ts.max(self.last_timestamp);
        self.last_timestamp = ts;
        ts
    }

    // (Re)builds a GRAY8 scaler if the decoded frame layout changed. Hardware
    // decoders report their output format only on the first frame, so scalers
    // are created lazily.
    fn ensure_scaler(
        scaler: &mut Option<scaling::Context>,
        source: &ffmpeg_next::frame::Video,
        width: u32,
        height: u32,
    ) -> Result<()> {
        let stale = match scaler {
            Some(s) => {
                let input = s.input();
                input.format != source.format()
                    || input.width != source.width()
                    || input.height != source.height()
            }
            None => true,
        };
        if stale {
            *scaler = Some(scaling::Context::get(
                source.format(),
                source.width(),
                source.height(),
                Pixel::GRAY8,
                width,
                height,
                scaling::Flags::BILINEAR,
            )?);
        }
        Ok(())
    }

    fn convert_current(&mut self, timestamp: Duration) -> Result<Frame> {
        let (width, height) = (self.decoded.width(), self.decoded.height());
        let reduced_width = (width / super::REDUCED_SCALE_FACTOR).max(1);
        let reduced_height = (height / super::REDUCED_SCALE_FACTOR).max(1);

        Self::ensure_scaler(&mut self.full_scaler, &self.decoded, width, height)?;
        Self::ensure_scaler(
            &mut self.reduced_scaler,
            &self.decoded,
            reduced_width,
            reduced_height,
        )?;

        let mut gray = ffmpeg_next::frame::Video::empty();
        let mut gray_reduced = ffmpeg_next::frame::Video::empty();
        if let Some(scaler) = self.full_scaler.as_mut() {
            scaler.run(&self.decoded, &mut gray)?;
        }
        if let Some(scaler) = self.reduced_scaler.as_mut() {
            scaler.run(&self.decoded, &mut gray_reduced)?;
        }

        Ok(Frame::new(
            timestamp,
            luma_from_gray8(&gray),
            luma_from_gray8(&gray_reduced),
        ))
    }
}

impl VideoSource for FrameSource {
    fn read_next(&mut self, keyframes_only: bool) -> Result<Option<Frame>> {
        self.read_next_at_or_after(Duration::ZERO, keyframes_only)
    }

    fn read_next_at_or_after(
        &mut self,
        target: Duration,
        keyframes_only: bool,
    ) -> Result<Option<Frame>> {
        while self.decode_next(keyframes_only)? {
            let ts = self.current_timestamp();
            if ts >= target {
                return self.convert_current(ts).map(Some);
            }
        }
        Ok(None)
    }

    // Seeks backwards to the closest keyframe, then decodes forward to the target.
    fn seek(&mut self, timestamp: Duration) -> Result<Option<Frame>> {
        if timestamp > self.duration {
            tracing::debug!(
                requested = ?timestamp,
                duration = ?self.duration,
                "seek past end of stream"
            );
            return Ok(None);
        }

        let start_offset = self.start_time as f64 * f64::from(self.time_base);
        let target = ((timestamp.as_secs_f64() + start_offset) * AV_TIME_BASE) as i64;
        if let Err(e) = self.input.seek(target, ..target) {
            tracing::debug!(requested = ?timestamp, error = %e, "seek failed");
            return Ok(None);
        }

        self.decoder.flush();
        self.eof_sent = false;
        self.last_timestamp = Duration::ZERO;

        self.read_next_at_or_after(timestamp, false)
    }

    fn duration(&self) -> Duration {
        self.duration
    }

    fn dimensions(&self) -> (usize, usize) {
        (self.decoder.width() as usize, self.decoder.height() as usize)
    }
}
