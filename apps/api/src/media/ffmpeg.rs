//! ffmpeg/ffprobe-backed `MediaDecoder`.
//!
//! Every operation shells out to the ffmpeg tools; nothing is cached besides the
//! probe result, so a stream is cheap to hold and trivially "rewound".
//! All calls block and must run on a blocking thread.

use std::path::{Path, PathBuf};
use std::process::Command;

use image::RgbImage;
use serde::Deserialize;
use tracing::debug;

use super::{MediaDecoder, MediaError, MediaStream};

#[derive(Debug, Clone)]
pub struct FfmpegDecoder {
    ffmpeg_path: PathBuf,
    ffprobe_path: PathBuf,
}

impl FfmpegDecoder {
    pub fn new(ffmpeg_path: impl Into<PathBuf>, ffprobe_path: impl Into<PathBuf>) -> Self {
        Self {
            ffmpeg_path: ffmpeg_path.into(),
            ffprobe_path: ffprobe_path.into(),
        }
    }
}

#[derive(Debug, Deserialize)]
struct ProbeOutput {
    #[serde(default)]
    streams: Vec<ProbeStream>,
}

#[derive(Debug, Deserialize)]
struct ProbeStream {
    codec_type: Option<String>,
    width: Option<u32>,
    height: Option<u32>,
    nb_frames: Option<String>,
    avg_frame_rate: Option<String>,
    r_frame_rate: Option<String>,
    /// Legacy rotation metadata (`rotate` tag).
    #[serde(default)]
    tags: Option<ProbeTags>,
    /// Display matrix rotation, newer ffmpeg.
    #[serde(default)]
    side_data_list: Vec<ProbeSideData>,
}

#[derive(Debug, Default, Deserialize)]
struct ProbeTags {
    rotate: Option<String>,
}

#[derive(Debug, Deserialize)]
struct ProbeSideData {
    rotation: Option<f64>,
}

impl ProbeStream {
    fn rotation_degrees(&self) -> i64 {
        let side = self
            .side_data_list
            .iter()
            .find_map(|d| d.rotation)
            .map(|r| r.round() as i64);
        let tag = self
            .tags
            .as_ref()
            .and_then(|t| t.rotate.as_deref())
            .and_then(|r| r.trim().parse::<i64>().ok());
        side.or(tag).unwrap_or(0)
    }

    /// Size of the frames ffmpeg emits. ffmpeg applies rotation metadata when
    /// decoding, so a quarter turn swaps the coded width and height.
    fn display_dimensions(&self) -> (u32, u32) {
        let (w, h) = (self.width.unwrap_or(0), self.height.unwrap_or(0));
        if self.rotation_degrees().rem_euclid(180) == 90 {
            (h, w)
        } else {
            (w, h)
        }
    }
}

impl MediaDecoder for FfmpegDecoder {
    fn open(&self, path: &Path) -> Result<Box<dyn MediaStream>, MediaError> {
        let output = Command::new(&self.ffprobe_path)
            .args([
                "-v",
                "error",
                "-show_entries",
                "stream=codec_type,width,height,nb_frames,avg_frame_rate,r_frame_rate\
                 :stream_tags=rotate:stream_side_data=rotation",
                "-of",
                "json",
            ])
            .arg(path)
            .output()?;

        if !output.status.success() {
            return Err(MediaError::InvalidMedia(format!(
                "ffprobe failed for {}: {}",
                path.display(),
                String::from_utf8_lossy(&output.stderr).trim()
            )));
        }

        let probe: ProbeOutput = serde_json::from_slice(&output.stdout)
            .map_err(|e| MediaError::InvalidMedia(format!("unreadable ffprobe output: {e}")))?;

        let video = probe
            .streams
            .iter()
            .find(|s| s.codec_type.as_deref() == Some("video"))
            .ok_or_else(|| MediaError::InvalidMedia("no video stream".to_string()))?;
        let has_audio = probe
            .streams
            .iter()
            .any(|s| s.codec_type.as_deref() == Some("audio"));

        // avg_frame_rate is "0/0" for some containers; r_frame_rate is the fallback.
        let fps = video
            .avg_frame_rate
            .as_deref()
            .and_then(parse_frame_rate)
            .or_else(|| video.r_frame_rate.as_deref().and_then(parse_frame_rate))
            .unwrap_or(0.0);

        let declared_frames = video
            .nb_frames
            .as_deref()
            .and_then(|n| n.parse::<i64>().ok())
            .unwrap_or(0);

        let (width, height) = video.display_dimensions();

        debug!(
            "probed {}: {}x{} (rotation {}) {:.3} fps, {} declared frames, audio={}",
            path.display(),
            width,
            height,
            video.rotation_degrees(),
            fps,
            declared_frames,
            has_audio
        );

        Ok(Box::new(FfmpegStream {
            path: path.to_path_buf(),
            ffmpeg_path: self.ffmpeg_path.clone(),
            ffprobe_path: self.ffprobe_path.clone(),
            width,
            height,
            fps,
            declared_frames,
            has_audio,
        }))
    }
}

pub struct FfmpegStream {
    path: PathBuf,
    ffmpeg_path: PathBuf,
    ffprobe_path: PathBuf,
    width: u32,
    height: u32,
    fps: f64,
    declared_frames: i64,
    has_audio: bool,
}

impl MediaStream for FfmpegStream {
    fn declared_frame_count(&self) -> i64 {
        self.declared_frames
    }

    fn fps(&self) -> f64 {
        self.fps
    }

    fn dimensions(&self) -> (u32, u32) {
        (self.width, self.height)
    }

    fn count_frames(&mut self) -> Result<u64, MediaError> {
        let output = Command::new(&self.ffprobe_path)
            .args([
                "-v",
                "error",
                "-count_frames",
                "-select_streams",
                "v:0",
                "-show_entries",
                "stream=nb_read_frames",
                "-of",
                "default=noprint_wrappers=1:nokey=1",
            ])
            .arg(&self.path)
            .output()?;

        if !output.status.success() {
            return Err(MediaError::Decode(format!(
                "frame count pass failed: {}",
                String::from_utf8_lossy(&output.stderr).trim()
            )));
        }

        let stdout = String::from_utf8_lossy(&output.stdout);
        stdout
            .trim()
            .parse::<u64>()
            .map_err(|e| MediaError::Decode(format!("cannot parse frame count '{}': {e}", stdout.trim())))
    }

    fn seek_and_read_frame(&mut self, index: u64) -> Result<RgbImage, MediaError> {
        let filter = format!("select=eq(n\\,{index})");
        let output = Command::new(&self.ffmpeg_path)
            .args(["-v", "error", "-i"])
            .arg(&self.path)
            .args([
                "-vf",
                &filter,
                "-fps_mode",
                "passthrough",
                "-frames:v",
                "1",
                "-f",
                "rawvideo",
                "-pix_fmt",
                "rgb24",
                "pipe:1",
            ])
            .output()?;

        if !output.status.success() {
            return Err(MediaError::Decode(format!(
                "frame {index}: {}",
                String::from_utf8_lossy(&output.stderr).trim()
            )));
        }

        let expected = self.width as usize * self.height as usize * 3;
        if output.stdout.len() != expected {
            return Err(MediaError::Decode(format!(
                "frame {index}: got {} bytes, expected {expected}",
                output.stdout.len()
            )));
        }

        RgbImage::from_raw(self.width, self.height, output.stdout)
            .ok_or_else(|| MediaError::Decode(format!("frame {index}: buffer size mismatch")))
    }

    fn read_audio_pcm(&mut self, sample_rate: u32) -> Result<Vec<f32>, MediaError> {
        if !self.has_audio {
            return Ok(Vec::new());
        }

        let rate = sample_rate.to_string();
        let output = Command::new(&self.ffmpeg_path)
            .args(["-v", "error", "-i"])
            .arg(&self.path)
            .args([
                "-vn", "-f", "f32le", "-acodec", "pcm_f32le", "-ac", "1", "-ar", &rate, "pipe:1",
            ])
            .output()?;

        if !output.status.success() {
            return Err(MediaError::Decode(format!(
                "audio demux failed: {}",
                String::from_utf8_lossy(&output.stderr).trim()
            )));
        }

        Ok(pcm_from_f32le(&output.stdout))
    }
}

fn pcm_from_f32le(bytes: &[u8]) -> Vec<f32> {
    bytes
        .chunks_exact(4)
        .map(|c| f32::from_le_bytes([c[0], c[1], c[2], c[3]]))
        .collect()
}

/// Parses ffprobe rationals such as `30000/1001` or plain `25`.
fn parse_frame_rate(raw: &str) -> Option<f64> {
    let rate = match raw.split_once('/') {
        Some((num, den)) => {
            let num: f64 = num.trim().parse().ok()?;
            let den: f64 = den.trim().parse().ok()?;
            if den == 0.0 {
                return None;
            }
            num / den
        }
        None => raw.trim().parse().ok()?,
    };
    (rate.is_finite() && rate > 0.0).then_some(rate)
}
