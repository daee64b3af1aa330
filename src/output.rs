//! Cut lists and diagnostic time series.

use std::io::{BufWriter, Write};
use std::path::{Path, PathBuf};

use crate::logo::{LogoSample, SceneEvent, SceneKind, Segment};
use crate::util::{format_timecode, format_timestamp};

/// Encoding of a cut list written next to a video.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum CutListFormat {
    /// One `HH:MM:SS.mmm,HH:MM:SS.mmm` line per segment.
    Csv,
    /// One CMX3600-style `HH:MM:SS:FF HH:MM:SS:FF C <description>` line per segment.
    Edl,
}

impl CutListFormat {
    pub fn extension(&self) -> &'static str {
        match self {
            CutListFormat::Csv => "bugwatch.csv",
            CutListFormat::Edl => "bugwatch.edl",
        }
    }
}

/// Writes `segments` as a two column timestamp CSV.
pub fn write_csv<W: Write>(w: &mut W, segments: &[Segment]) -> std::io::Result<()> {
    for segment in segments {
        writeln!(
            w,
            "{},{}",
            format_timestamp(segment.start),
            format_timestamp(segment.end)
        )?;
    }
    Ok(())
}

/// Writes `segments` as EDL lines. Frame numbers assume 30 fps.
pub fn write_edl<W: Write>(w: &mut W, segments: &[Segment], description: &str) -> std::io::Result<()> {
    for segment in segments {
        writeln!(
            w,
            "{} {} C {}",
            format_timecode(segment.start),
            format_timecode(segment.end),
            description
        )?;
    }
    Ok(())
}

/// Writes the cut list for `video` next to it and returns its path.
pub fn write_cut_list(
    video: impl AsRef<Path>,
    segments: &[Segment],
    format: CutListFormat,
) -> crate::Result<PathBuf> {
    let video = video.as_ref();
    let path = video.with_extension(format.extension());
    let mut w = BufWriter::new(std::fs::File::create(&path)?);

    match format {
        CutListFormat::Csv => write_csv(&mut w, segments)?,
        CutListFormat::Edl => {
            let description = video
                .file_stem()
                .map(|s| s.to_string_lossy().into_owned())
                .unwrap_or_default();
            write_edl(&mut w, segments, &description)?
        }
    }
    w.flush()?;

    tracing::debug!("wrote cut list to {}", path.display());
    Ok(path)
}

/// Writes the logo score time series as CSV.
pub fn write_samples_csv<W: Write>(w: &mut W, samples: &[LogoSample]) -> std::io::Result<()> {
    writeln!(w, "time,score")?;
    for sample in samples {
        writeln!(w, "{:.3},{:.6}", sample.time.as_secs_f64(), sample.score)?;
    }
    Ok(())
}

/// Writes scene events as CSV.
pub fn write_events_csv<W: Write>(w: &mut W, events: &[SceneEvent]) -> std::io::Result<()> {
    writeln!(w, "time,kind,magnitude")?;
    for event in events {
        let kind = match event.kind {
            SceneKind::SceneChange => "scene_change",
            SceneKind::Black => "black",
            SceneKind::White => "white",
        };
        writeln!(
            w,
            "{:.3},{},{:.6}",
            event.time.as_secs_f64(),
            kind,
            event.magnitude
        )?;
    }
    Ok(())
}
