//! Media validation: the single place a bad upload is rejected.
//!
//! Checks run in order: file exists, file is non-empty, container opens and
//! exposes a usable frame rate and frame count. When the declared frame count
//! is ≤ 0 the stream is fully decoded once to count frames.
//! Everything downstream may assume a valid, seekable video.

use std::path::Path;

use tracing::{debug, warn};

use super::{MediaDecoder, MediaError, MediaStream, VideoMeta};

pub fn validate(
    decoder: &dyn MediaDecoder,
    path: &Path,
) -> Result<(Box<dyn MediaStream>, VideoMeta), MediaError> {
    let metadata = std::fs::metadata(path).map_err(|e| {
        MediaError::InvalidMedia(format!("{} is not readable: {e}", path.display()))
    })?;
    if !metadata.is_file() {
        return Err(MediaError::InvalidMedia(format!(
            "{} is not a regular file",
            path.display()
        )));
    }
    if metadata.len() == 0 {
        return Err(MediaError::InvalidMedia(format!(
            "{} is empty",
            path.display()
        )));
    }

    let mut stream = decoder.open(path).map_err(|e| match e {
        MediaError::InvalidMedia(msg) => MediaError::InvalidMedia(msg),
        other => MediaError::InvalidMedia(format!("container could not be opened: {other}")),
    })?;

    let fps = stream.fps();
    if !fps.is_finite() || fps <= 0.0 {
        return Err(MediaError::InvalidMedia(format!(
            "video frame rate is not usable ({fps})"
        )));
    }

    let declared = stream.declared_frame_count();
    let frame_count = if declared > 0 {
        declared as u64
    } else {
        warn!(
            "{}: container declares {declared} frames, counting by full decode",
            path.display()
        );
        stream.count_frames().map_err(|e| {
            MediaError::InvalidMedia(format!("frame count could not be determined: {e}"))
        })?
    };
    if frame_count == 0 {
        return Err(MediaError::InvalidMedia("video has no frames".to_string()));
    }

    let (width, height) = stream.dimensions();
    if width == 0 || height == 0 {
        return Err(MediaError::InvalidMedia(format!(
            "video has degenerate dimensions {width}x{height}"
        )));
    }

    let meta = VideoMeta {
        frame_count,
        fps,
        duration_secs: frame_count as f64 / fps,
        width,
        height,
    };
    debug!("validated {}: {:?}", path.display(), meta);
    Ok((stream, meta))
}
