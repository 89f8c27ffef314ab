//! Media access: a narrow decoder capability the pipeline is written against.
//!
//! `MediaDecoder` opens a stored answer video; the returned `MediaStream` exposes
//! only what feature extraction needs (frame count, fps, random frame access,
//! mono PCM). `ffmpeg::FfmpegDecoder` is the production backend.

pub mod ffmpeg;
pub mod validator;

#[cfg(test)]
pub mod synthetic;

use std::path::{Path, PathBuf};

use image::RgbImage;
use serde::{Deserialize, Serialize};
use thiserror::Error;

#[derive(Debug, Error)]
pub enum MediaError {
    #[error("invalid media: {0}")]
    InvalidMedia(String),

    #[error("insufficient frames: need {required}, video has {available}")]
    InsufficientFrames { required: usize, available: u64 },

    #[error("could not read frame {target} after {attempts} attempts")]
    FrameReadError { target: u64, attempts: usize },

    #[error("frame sample count must be at least 2, got {0}")]
    InvalidSampleCount(usize),

    #[error("decode error: {0}")]
    Decode(String),

    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
}

/// Stable locator of an answer video: the local file the decoder reads and the
/// key under which the upload layer archived it.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct VideoLocator {
    pub path: PathBuf,
    pub archive_key: String,
}

impl VideoLocator {
    pub fn new(path: impl Into<PathBuf>, archive_key: impl Into<String>) -> Self {
        Self {
            path: path.into(),
            archive_key: archive_key.into(),
        }
    }
}

/// Container facts established by `validator::validate`.
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct VideoMeta {
    pub frame_count: u64,
    pub fps: f64,
    pub duration_secs: f64,
    pub width: u32,
    pub height: u32,
}

pub trait MediaDecoder: Send + Sync {
    fn open(&self, path: &Path) -> Result<Box<dyn MediaStream>, MediaError>;
}

/// An opened, seekable video.
pub trait MediaStream: Send {
    /// Frame count from container metadata. May be ≤ 0 when the container lies.
    fn declared_frame_count(&self) -> i64;

    fn fps(&self) -> f64;

    /// (width, height) of decoded frames.
    fn dimensions(&self) -> (u32, u32);

    /// Decodes every frame sequentially and returns the total. Leaves the stream
    /// positioned at frame 0.
    fn count_frames(&mut self) -> Result<u64, MediaError>;

    fn seek_and_read_frame(&mut self, index: u64) -> Result<RgbImage, MediaError>;

    /// Mono f32 PCM resampled to `sample_rate`. Empty when there is no audio track.
    fn read_audio_pcm(&mut self, sample_rate: u32) -> Result<Vec<f32>, MediaError>;
}
