//! Plain-text cache for [LogoReference]s.
//!
//! The first line holds `height,width`. Each of the next `height` lines holds
//! `width` comma-separated values (edge values scaled by 255). An optional final
//! line `BoundingRect,x,y,width,height` stores the logo box, or
//! `BoundingRect,rejected` if the video was confirmed to have no logo.

use std::fs::File;
use std::io::{BufRead, BufReader, BufWriter, Write};
use std::path::Path;

use ndarray::Array2;

use super::reference::{LogoReference, Rect};

const SCALE: f64 = 255.0;
const BOUNDING_RECT_TAG: &str = "BoundingRect";
const REJECTED_MARKER: &str = "rejected";

#[derive(thiserror::Error, Debug)]
pub enum CacheFormatError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
    #[error("invalid header: {0:?}")]
    Header(String),
    #[error("row {row} has {found} values, expected {expected}")]
    RowLength {
        row: usize,
        found: usize,
        expected: usize,
    },
    #[error("invalid value {value:?} on row {row}")]
    Value { row: usize, value: String },
    #[error("expected {expected} rows, found {found}")]
    RowCount { expected: usize, found: usize },
    #[error("invalid bounding rect line: {0:?}")]
    BoundingRect(String),
    #[error("cached reference is {found:?}, video is {expected:?}")]
    Dimensions {
        found: (usize, usize),
        expected: (usize, usize),
    },
}

/// Writes `reference` to `path`, replacing any existing file.
pub(crate) fn save(reference: &LogoReference, path: &Path) -> std::io::Result<()> {
    let mut w = BufWriter::new(File::create(path)?);
    write(reference, &mut w)?;
    w.flush()
}

pub(crate) fn write<W: Write>(reference: &LogoReference, w: &mut W) -> std::io::Result<()> {
    let (height, width) = reference.matrix.dim();
    writeln!(w, "{},{}", height, width)?;

    for row in reference.matrix.rows() {
        let mut first = true;
        for &v in row {
            if !first {
                w.write_all(b",")?;
            }
            first = false;
            write!(w, "{:.6}", f64::from(v) * SCALE)?;
        }
        w.write_all(b"\n")?;
    }

    if reference.no_logo {
        writeln!(w, "{},{}", BOUNDING_RECT_TAG, REJECTED_MARKER)?;
    } else if let Some(r) = reference.bounding_rect {
        writeln!(
            w,
            "{},{},{},{},{}",
            BOUNDING_RECT_TAG, r.x, r.y, r.width, r.height
        )?;
    }

    Ok(())
}

/// Loads the reference cached at `path`.
///
/// Returns `Ok(None)` if there is no cache file. A cache whose `(width, height)`
/// differs from `expected` is reported as [CacheFormatError::Dimensions] before
/// any of its rows are read.
pub(crate) fn load(
    path: &Path,
    expected: (usize, usize),
) -> Result<Option<LogoReference>, CacheFormatError> {
    let f = match File::open(path) {
        Ok(f) => f,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(None),
        Err(e) => return Err(e.into()),
    };

    Ok(Some(read(BufReader::new(f), expected)?))
}

/// Parses a cache for a `(width, height)` video.
pub(crate) fn read<R: BufRead>(
    r: R,
    expected: (usize, usize),
) -> Result<LogoReference, CacheFormatError> {
    let mut lines = r.lines();

    let header = lines
        .next()
        .transpose()?
        .ok_or_else(|| CacheFormatError::Header(String::new()))?;
    let (height, width) = parse_header(&header)?;
    if (width, height) != expected {
        return Err(CacheFormatError::Dimensions {
            found: (width, height),
            expected,
        });
    }

    let mut values = Vec::with_capacity(width.saturating_mul(height));
    for row in 0..height {
        let line = match lines.next().transpose()? {
            Some(line) => line,
            None => {
                return Err(CacheFormatError::RowCount {
                    expected: height,
                    found: row,
                })
            }
        };

        let before = values.len();
        for field in line.trim().split(',') {
            let v: f64 = field.trim().parse().map_err(|_| CacheFormatError::Value {
                row,
                value: field.to_string(),
            })?;
            values.push((v / SCALE) as f32);
        }

        let found = values.len() - before;
        if found != width {
            return Err(CacheFormatError::RowLength {
                row,
                found,
                expected: width,
            });
        }
    }

    let mut bounding_rect = None;
    let mut no_logo = false;
    for line in lines {
        let line = line?;
        let line = line.trim();
        if line.is_empty() {
            continue;
        }
        if bounding_rect.is_some() {
            return Err(CacheFormatError::RowCount {
                expected: height,
                found: height + 1,
            });
        }
        match parse_bounding_rect(line)? {
            Some(rect) => bounding_rect = Some(rect),
            None => {
                bounding_rect = Some(Rect::default());
                no_logo = true;
            }
        }
    }

    // Shape always matches the number of values collected above.
    let matrix = Array2::from_shape_vec((height, width), values)
        .map_err(|_| CacheFormatError::Header(header.clone()))?;

    if no_logo {
        return Ok(LogoReference::without_logo(matrix));
    }
    Ok(LogoReference::new(matrix, bounding_rect))
}

fn parse_header(line: &str) -> Result<(usize, usize), CacheFormatError> {
    let err = || CacheFormatError::Header(line.to_string());
    let mut parts = line.trim().split(',');
    let height = parts.next().and_then(|p| p.trim().parse().ok()).ok_or_else(err)?;
    let width = parts.next().and_then(|p| p.trim().parse().ok()).ok_or_else(err)?;
    if parts.next().is_some() || height == 0 || width == 0 {
        return Err(err());
    }
    Ok((height, width))
}

// `None` is the rejected marker.
fn parse_bounding_rect(line: &str) -> Result<Option<Rect>, CacheFormatError> {
    let err = || CacheFormatError::BoundingRect(line.to_string());
    let mut parts = line.split(',').map(str::trim).peekable();
    if parts.next() != Some(BOUNDING_RECT_TAG) {
        return Err(err());
    }
    if parts.peek() == Some(&REJECTED_MARKER) {
        parts.next();
        return match parts.next() {
            None => Ok(None),
            Some(_) => Err(err()),
        };
    }
    let fields = parts
        .map(|p| p.parse::<usize>())
        .collect::<Result<Vec<_>, _>>()
        .map_err(|_| err())?;
    match fields[..] {
        [x, y, width, height] => Ok(Some(Rect::new(x, y, width, height))),
        _ => Err(err()),
    }
}
