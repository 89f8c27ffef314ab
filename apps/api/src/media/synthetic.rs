//! In-memory decoder used by tests across the crate.

use std::collections::HashSet;
use std::path::Path;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use image::{Rgb, RgbImage};

use super::{MediaDecoder, MediaError, MediaStream};

#[derive(Debug, Clone)]
pub struct SyntheticVideo {
    pub declared_frames: i64,
    pub decodable_frames: u64,
    pub fps: f64,
    pub width: u32,
    pub height: u32,
    pub audio_secs: f64,
    pub unreadable: HashSet<u64>,
    pub fail_open: bool,
}

impl SyntheticVideo {
    pub fn new(frames: u64, fps: f64) -> Self {
        Self {
            declared_frames: frames as i64,
            decodable_frames: frames,
            fps,
            width: 320,
            height: 180,
            audio_secs: frames as f64 / fps,
            unreadable: HashSet::new(),
            fail_open: false,
        }
    }

    pub fn with_unreadable(mut self, indices: impl IntoIterator<Item = u64>) -> Self {
        self.unreadable.extend(indices);
        self
    }

    pub fn with_declared_frames(mut self, declared: i64) -> Self {
        self.declared_frames = declared;
        self
    }

    pub fn with_audio_secs(mut self, secs: f64) -> Self {
        self.audio_secs = secs;
        self
    }
}

/// Call counters shared between a decoder and every stream it opens.
#[derive(Debug, Default)]
pub struct DecoderCalls {
    pub opens: AtomicUsize,
    pub frame_reads: AtomicUsize,
    pub full_counts: AtomicUsize,
    pub pcm_reads: AtomicUsize,
}

impl DecoderCalls {
    pub fn frame_reads(&self) -> usize {
        self.frame_reads.load(Ordering::SeqCst)
    }

    pub fn full_counts(&self) -> usize {
        self.full_counts.load(Ordering::SeqCst)
    }

    pub fn pcm_reads(&self) -> usize {
        self.pcm_reads.load(Ordering::SeqCst)
    }
}

pub struct SyntheticDecoder {
    pub video: SyntheticVideo,
    pub calls: Arc<DecoderCalls>,
    pub read_log: Arc<std::sync::Mutex<Vec<u64>>>,
}

impl SyntheticDecoder {
    pub fn new(video: SyntheticVideo) -> Self {
        Self {
            video,
            calls: Arc::new(DecoderCalls::default()),
            read_log: Arc::new(std::sync::Mutex::new(Vec::new())),
        }
    }

    pub fn read_log(&self) -> Vec<u64> {
        self.read_log.lock().map(|l| l.clone()).unwrap_or_default()
    }
}

impl MediaDecoder for SyntheticDecoder {
    fn open(&self, _path: &Path) -> Result<Box<dyn MediaStream>, MediaError> {
        self.calls.opens.fetch_add(1, Ordering::SeqCst);
        if self.video.fail_open {
            return Err(MediaError::InvalidMedia("container could not be opened".into()));
        }
        Ok(Box::new(SyntheticStream {
            video: self.video.clone(),
            calls: self.calls.clone(),
            read_log: self.read_log.clone(),
        }))
    }
}

pub struct SyntheticStream {
    video: SyntheticVideo,
    calls: Arc<DecoderCalls>,
    read_log: Arc<std::sync::Mutex<Vec<u64>>>,
}

impl MediaStream for SyntheticStream {
    fn declared_frame_count(&self) -> i64 {
        self.video.declared_frames
    }

    fn fps(&self) -> f64 {
        self.video.fps
    }

    fn dimensions(&self) -> (u32, u32) {
        (self.video.width, self.video.height)
    }

    fn count_frames(&mut self) -> Result<u64, MediaError> {
        self.calls.full_counts.fetch_add(1, Ordering::SeqCst);
        Ok(self.video.decodable_frames)
    }

    fn seek_and_read_frame(&mut self, index: u64) -> Result<RgbImage, MediaError> {
        self.calls.frame_reads.fetch_add(1, Ordering::SeqCst);
        if let Ok(mut log) = self.read_log.lock() {
            log.push(index);
        }
        if index >= self.video.decodable_frames || self.video.unreadable.contains(&index) {
            return Err(MediaError::Decode(format!("frame {index} unreadable")));
        }
        // Pixel value encodes the frame index so tests can tell frames apart.
        let shade = (index % 256) as u8;
        Ok(RgbImage::from_pixel(
            self.video.width,
            self.video.height,
            Rgb([shade, 128, 255 - shade]),
        ))
    }

    fn read_audio_pcm(&mut self, sample_rate: u32) -> Result<Vec<f32>, MediaError> {
        self.calls.pcm_reads.fetch_add(1, Ordering::SeqCst);
        let n = (self.video.audio_secs * f64::from(sample_rate)) as usize;
        Ok(sine_wave(440.0, sample_rate, n))
    }
}

pub fn sine_wave(freq: f32, sample_rate: u32, n: usize) -> Vec<f32> {
    (0..n)
        .map(|i| {
            let t = i as f32 / sample_rate as f32;
            0.5 * (2.0 * std::f32::consts::PI * freq * t).sin()
        })
        .collect()
}
