//! Frame normalisation: resize to the 248×140 working size, crop the centred
//! 128×128 window, scale pixels to [0, 1].

use image::imageops::{self, FilterType};
use image::RgbImage;
use ndarray::{Array3, Array4};

pub const WORK_WIDTH: u32 = 248;
pub const WORK_HEIGHT: u32 = 140;
pub const CROP: u32 = 128;

/// (k, 128, 128, 3), RGB, values in [0, 1].
pub type ImageStack = Array4<f32>;

#[derive(Debug, Clone, Copy, Default)]
pub struct ImageNormalizer;

impl ImageNormalizer {
    /// (128, 128, 3) float image from one decoded RGB frame.
    pub fn normalize(&self, frame: &RgbImage) -> Array3<f32> {
        let resized = imageops::resize(frame, WORK_WIDTH, WORK_HEIGHT, FilterType::Triangle);
        let x0 = (WORK_WIDTH - CROP) / 2;
        let y0 = (WORK_HEIGHT - CROP) / 2;
        let cropped = imageops::crop_imm(&resized, x0, y0, CROP, CROP).to_image();

        let mut out = Array3::<f32>::zeros((CROP as usize, CROP as usize, 3));
        for (x, y, pixel) in cropped.enumerate_pixels() {
            for c in 0..3 {
                out[[y as usize, x as usize, c]] = f32::from(pixel[c]) / 255.0;
            }
        }
        out
    }

    /// Stacks frames in the given order.
    pub fn stack(&self, frames: &[RgbImage]) -> ImageStack {
        let mut stack = Array4::<f32>::zeros((frames.len(), CROP as usize, CROP as usize, 3));
        for (i, frame) in frames.iter().enumerate() {
            stack
                .index_axis_mut(ndarray::Axis(0), i)
                .assign(&self.normalize(frame));
        }
        stack
    }
}
