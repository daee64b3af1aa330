use std::io::Read;
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Frame rate assumed when converting milliseconds into EDL timecode frames.
pub const EDL_REFERENCE_FPS: u64 = 30;

/// Formats the given [Duration] as "MM:SSs"
pub fn format_time(t: Duration) -> String {
    let minutes = t.as_secs() / 60;
    let seconds = t.as_secs() % 60;
    format!("{:02}:{:02}s", minutes, seconds)
}

/// Formats the given [Duration] as "HH:MM:SS.mmm".
pub fn format_timestamp(t: Duration) -> String {
    let millis = t.as_millis() as u64;
    let (hours, minutes, seconds) = split_hms(millis / 1000);
    format!(
        "{:02}:{:02}:{:02}.{:03}",
        hours,
        minutes,
        seconds,
        millis % 1000
    )
}

/// Formats the given [Duration] as a SMPTE-style "HH:MM:SS:FF" timecode.
///
/// The frame number is derived from the millisecond remainder at
/// [EDL_REFERENCE_FPS], regardless of the video's real frame rate.
pub fn format_timecode(t: Duration) -> String {
    let millis = t.as_millis() as u64;
    let (hours, minutes, seconds) = split_hms(millis / 1000);
    let frames = (millis % 1000) * EDL_REFERENCE_FPS / 1000;
    format!(
        "{:02}:{:02}:{:02}:{:02}",
        hours, minutes, seconds, frames
    )
}

fn split_hms(total_seconds: u64) -> (u64, u64, u64) {
    (
        total_seconds / 3600,
        (total_seconds % 3600) / 60,
        total_seconds % 60,
    )
}

/// Checks if the given path points to a valid video file.
///
/// If `full` is set to **false**, only the file header will be checked. This is a very cheap
/// operation, but it does not guarantee validity. If set to **true**, FFmpeg will be used to
/// check that the container opens and holds at least one video stream - note that this is more
/// expensive, but much more accurate.
pub fn is_valid_video_file(path: impl AsRef<Path>, full: bool) -> bool {
    if !full {
        let mut buf = [0u8; 8192];
        let n = match std::fs::File::open(path.as_ref()).and_then(|mut f| f.read(&mut buf)) {
            Ok(n) => n,
            Err(_) => return false,
        };
        return infer::is_video(&buf[..n]);
    }

    if let Ok(input) = ffmpeg_next::format::input(&path.as_ref()) {
        input
            .streams()
            .any(|s| s.parameters().medium() == ffmpeg_next::util::media::Type::Video)
    } else {
        false
    }
}

/// Expands the given paths into a sorted list of video files.
///
/// Directories are walked one level deep. Files that do not look like videos
/// (see [is_valid_video_file]) are skipped, as are the sidecar files that
/// bugwatch writes next to each video.
pub fn find_video_files(paths: &[impl AsRef<Path>], full: bool) -> crate::Result<Vec<PathBuf>> {
    let mut videos = Vec::new();

    for path in paths {
        let path = path.as_ref();
        if path.is_dir() {
            for entry in std::fs::read_dir(path)? {
                let entry = entry?.path();
                if entry.is_file() && !is_sidecar_file(&entry) && is_valid_video_file(&entry, full)
                {
                    videos.push(entry);
                }
            }
        } else if is_valid_video_file(path, full) {
            videos.push(path.to_owned());
        } else {
            tracing::debug!("skipping {}: not a video file", path.display());
        }
    }

    videos.sort();
    videos.dedup();

    Ok(videos)
}

fn is_sidecar_file(path: &Path) -> bool {
    path.file_name()
        .and_then(|name| name.to_str())
        .map(|name| name.contains(".bugwatch."))
        .unwrap_or(false)
}

/// Returns the MD5 digest of the first 8 KiB of the video.
///
/// Used to tell whether data persisted next to a video still belongs to it.
pub(crate) fn compute_header_md5sum(video: impl AsRef<Path>) -> crate::Result<String> {
    let mut buf = Vec::with_capacity(8192);
    let f = std::fs::File::open(video.as_ref())?;
    f.take(8192).read_to_end(&mut buf)?;
    let hash = format!("{:x}", md5::compute(&buf));
    Ok(hash)
}

/// Returns the underlying FFmpeg version integer used by bugwatch.
pub fn ffmpeg_version() -> u32 {
    ffmpeg_next::util::version()
}

/// Returns the underlying FFmpeg version string used by bugwatch.
pub fn ffmpeg_version_string() -> String {
    let version_int = ffmpeg_version();

    // Reference: https://github.com/FFmpeg/FFmpeg/blob/130d19bf2044ac76372d1b97ab87ab283c8b37f8/libavutil/version.h#L64
    format!(
        "{}.{}.{}",
        version_int >> 16,             // MAJOR
        (version_int & 0x00FF00) >> 8, // MINOR
        version_int & 0xFF             // MICRO
    )
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn test_format_timestamp() {
        insta::assert_snapshot!(format_timestamp(Duration::ZERO), @"00:00:00.000");
        insta::assert_snapshot!(format_timestamp(Duration::from_millis(3_723_045)), @"01:02:03.045");
        insta::assert_snapshot!(format_timestamp(Duration::from_secs(36_000)), @"10:00:00.000");
    }

    #[test]
    fn test_format_timecode() {
        // 500 ms at 30 fps is frame 15.
        insta::assert_snapshot!(format_timecode(Duration::from_millis(61_500)), @"00:01:01:15");
        insta::assert_snapshot!(format_timecode(Duration::from_millis(999)), @"00:00:00:29");
        insta::assert_snapshot!(format_timecode(Duration::from_secs(7200)), @"02:00:00:00");
    }

    #[test]
    fn test_format_time() {
        assert_eq!(format_time(Duration::from_secs(125)), "02:05s");
    }

    #[test]
    fn test_header_md5sum_short_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("short.bin");
        std::fs::write(&path, b"not much here").unwrap();

        let hash = compute_header_md5sum(&path).unwrap();
        assert_eq!(hash, format!("{:x}", md5::compute(b"not much here")));
    }

    #[test]
    fn test_find_video_files_skips_non_videos() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("notes.txt"), b"hello").unwrap();
        std::fs::write(dir.path().join("ep1.bugwatch.json"), b"{}").unwrap();

        let videos = find_video_files(&[dir.path()], false).unwrap();
        assert!(videos.is_empty());
    }
}
