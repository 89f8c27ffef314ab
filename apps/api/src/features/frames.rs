//! Evenly spaced frame sampling with a bounded neighbour search.

use image::RgbImage;
use tracing::{debug, warn};

use crate::media::{MediaError, MediaStream, VideoMeta};

pub const DEFAULT_SAMPLES: usize = 6;

/// Frames searched on each side of an unreadable target.
pub const RETRY_RADIUS: i64 = 5;

#[derive(Debug, Clone, Copy)]
pub struct FrameSampler {
    k: usize,
}

impl Default for FrameSampler {
    fn default() -> Self {
        Self { k: DEFAULT_SAMPLES }
    }
}

impl FrameSampler {
    pub fn new(k: usize) -> Result<Self, MediaError> {
        if k < 2 {
            return Err(MediaError::InvalidSampleCount(k));
        }
        Ok(Self { k })
    }

    pub fn samples(&self) -> usize {
        self.k
    }

    /// Target frame index for each of the k time points, first at 0 and last
    /// at the final frame.
    pub fn target_indices(&self, meta: &VideoMeta) -> Vec<u64> {
        let last = meta.frame_count.saturating_sub(1);
        (0..self.k)
            .map(|i| {
                let t = meta.duration_secs * i as f64 / (self.k - 1) as f64;
                let idx = (t * meta.fps).round();
                if idx <= 0.0 {
                    0
                } else {
                    (idx as u64).min(last)
                }
            })
            .collect()
    }

    pub fn sample(
        &self,
        stream: &mut dyn MediaStream,
        meta: &VideoMeta,
    ) -> Result<Vec<RgbImage>, MediaError> {
        if meta.frame_count < self.k as u64 {
            return Err(MediaError::InsufficientFrames {
                required: self.k,
                available: meta.frame_count,
            });
        }

        let mut frames = Vec::with_capacity(self.k);
        for target in self.target_indices(meta) {
            frames.push(read_near(stream, target, meta.frame_count)?);
        }
        Ok(frames)
    }
}

/// Offsets tried around a target, nearest first: 0, -1, +1, -2, +2, ...
fn retry_offsets() -> impl Iterator<Item = i64> {
    std::iter::once(0).chain((1..=RETRY_RADIUS).flat_map(|d| [-d, d]))
}

fn read_near(
    stream: &mut dyn MediaStream,
    target: u64,
    frame_count: u64,
) -> Result<RgbImage, MediaError> {
    let mut attempts = 0;
    for offset in retry_offsets() {
        let candidate = target as i64 + offset;
        if candidate < 0 || candidate as u64 >= frame_count {
            continue;
        }
        attempts += 1;
        match stream.seek_and_read_frame(candidate as u64) {
            Ok(frame) => {
                if offset != 0 {
                    debug!("frame {target} unreadable, used neighbour {candidate}");
                }
                return Ok(frame);
            }
            Err(e) => debug!("frame {candidate} read failed: {e}"),
        }
    }
    warn!("no readable frame within ±{RETRY_RADIUS} of {target} ({attempts} attempts)");
    Err(MediaError::FrameReadError { target, attempts })
}
