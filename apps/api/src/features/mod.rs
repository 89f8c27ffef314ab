//! Fixed-shape model inputs derived from a validated answer video.

pub mod audio;
pub mod frames;
pub mod image;
