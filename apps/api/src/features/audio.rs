//! Cepstral audio features for the trait model.
//!
//! Mono 44.1 kHz PCM → 24 MFCCs per 512-sample hop, standardised over the whole
//! matrix, then fitted to a fixed 1319-frame width. The parameters reproduce the
//! librosa defaults the trait model was trained against:
//! n_fft 2048, periodic Hann window, centred frames with zero padding, power
//! spectrum, 128 Slaney mel bands over 0..sr/2, power_to_db(ref=1, amin=1e-10,
//! top_db=80), orthonormal DCT-II.
//!
//! Width policy: shorter matrices are left-padded with zeros; longer ones keep
//! their first 1319 frames. Output shape is always (24, 1319, 1).

use std::sync::Arc;

use ndarray::Array3;
use rustfft::num_complex::Complex;
use rustfft::{Fft, FftPlanner};
use tracing::debug;

use crate::media::{MediaError, MediaStream};

pub const SAMPLE_RATE: u32 = 44_100;
pub const N_MFCC: usize = 24;
pub const FEATURE_WIDTH: usize = 1319;

const N_FFT: usize = 2048;
const HOP: usize = 512;
const N_MELS: usize = 128;
const AMIN: f64 = 1e-10;
const TOP_DB: f64 = 80.0;

/// (N_MFCC, FEATURE_WIDTH, 1)
pub type AudioFeatureMatrix = Array3<f32>;

pub struct AudioFeatureExtractor {
    fft: Arc<dyn Fft<f64>>,
    window: Vec<f64>,
    mel: MelFilterBank,
    dct: Vec<f64>,
}

impl AudioFeatureExtractor {
    pub fn new() -> Self {
        let mut planner = FftPlanner::new();
        Self {
            fft: planner.plan_fft_forward(N_FFT),
            window: hann_window(N_FFT),
            mel: MelFilterBank::slaney(SAMPLE_RATE as f64, N_FFT, N_MELS),
            dct: dct_ortho_matrix(N_MFCC, N_MELS),
        }
    }

    /// Demuxes the stream's audio and computes the fixed-shape feature matrix.
    pub fn extract(&self, stream: &mut dyn MediaStream) -> Result<AudioFeatureMatrix, MediaError> {
        let pcm = stream.read_audio_pcm(SAMPLE_RATE)?;
        Ok(self.compute(&pcm))
    }

    pub fn compute(&self, samples: &[f32]) -> AudioFeatureMatrix {
        let mfcc = self.mfcc(samples);
        let frames = mfcc.len();
        let standardized = standardize(mfcc);
        if frames > FEATURE_WIDTH {
            debug!(
                "audio features span {frames} frames, keeping first {FEATURE_WIDTH}"
            );
        }
        fit_width(&standardized)
    }

    /// One `[f64; N_MFCC]` column per frame.
    fn mfcc(&self, samples: &[f32]) -> Vec<[f64; N_MFCC]> {
        let pad = N_FFT / 2;
        let mut padded = vec![0.0_f64; samples.len() + 2 * pad];
        for (dst, src) in padded[pad..pad + samples.len()].iter_mut().zip(samples) {
            *dst = f64::from(*src);
        }
        let n_frames = 1 + (padded.len() - N_FFT) / HOP;

        let mut buffer = vec![Complex::new(0.0, 0.0); N_FFT];
        let mut power = vec![0.0_f64; N_FFT / 2 + 1];
        let mut mel_db: Vec<[f64; N_MELS]> = Vec::with_capacity(n_frames);
        let mut max_db = f64::NEG_INFINITY;

        for t in 0..n_frames {
            let frame = &padded[t * HOP..t * HOP + N_FFT];
            for ((slot, x), w) in buffer.iter_mut().zip(frame).zip(&self.window) {
                *slot = Complex::new(x * w, 0.0);
            }
            self.fft.process(&mut buffer);
            for (p, c) in power.iter_mut().zip(&buffer) {
                *p = c.norm_sqr();
            }

            let mut bands = [0.0_f64; N_MELS];
            for (band, filter) in bands.iter_mut().zip(&self.mel.filters) {
                let energy: f64 = filter
                    .weights
                    .iter()
                    .zip(&power[filter.start..])
                    .map(|(w, p)| w * p)
                    .sum();
                *band = 10.0 * energy.max(AMIN).log10();
                max_db = max_db.max(*band);
            }
            mel_db.push(bands);
        }

        let floor = max_db - TOP_DB;
        mel_db
            .iter()
            .map(|bands| {
                let mut coeffs = [0.0_f64; N_MFCC];
                for (k, c) in coeffs.iter_mut().enumerate() {
                    let row = &self.dct[k * N_MELS..(k + 1) * N_MELS];
                    *c = row.iter().zip(bands).map(|(d, b)| d * b.max(floor)).sum();
                }
                coeffs
            })
            .collect()
    }
}

impl Default for AudioFeatureExtractor {
    fn default() -> Self {
        Self::new()
    }
}

/// Zero mean, unit (population) variance over every value in the matrix.
/// A flat matrix (silence, no audio) standardises to all zeros.
fn standardize(mut columns: Vec<[f64; N_MFCC]>) -> Vec<[f64; N_MFCC]> {
    let count = (columns.len() * N_MFCC) as f64;
    if count == 0.0 {
        return columns;
    }
    let mean = columns.iter().flatten().sum::<f64>() / count;
    let variance = columns
        .iter()
        .flatten()
        .map(|v| (v - mean).powi(2))
        .sum::<f64>()
        / count;
    let std = variance.sqrt();

    for v in columns.iter_mut().flatten() {
        *v = if std > f64::EPSILON && std.is_finite() {
            (*v - mean) / std
        } else {
            0.0
        };
    }
    columns
}

fn fit_width(columns: &[[f64; N_MFCC]]) -> AudioFeatureMatrix {
    let mut out = Array3::<f32>::zeros((N_MFCC, FEATURE_WIDTH, 1));
    let kept = columns.len().min(FEATURE_WIDTH);
    let offset = FEATURE_WIDTH - kept;
    for (t, column) in columns.iter().take(kept).enumerate() {
        for (k, v) in column.iter().enumerate() {
            out[[k, offset + t, 0]] = *v as f32;
        }
    }
    out
}

fn hann_window(n: usize) -> Vec<f64> {
    (0..n)
        .map(|i| 0.5 - 0.5 * (2.0 * std::f64::consts::PI * i as f64 / n as f64).cos())
        .collect()
}

/// Row-major (n_out, n_in) orthonormal DCT-II basis.
fn dct_ortho_matrix(n_out: usize, n_in: usize) -> Vec<f64> {
    let n = n_in as f64;
    let mut m = Vec::with_capacity(n_out * n_in);
    for k in 0..n_out {
        let scale = if k == 0 { (1.0 / n).sqrt() } else { (2.0 / n).sqrt() };
        for i in 0..n_in {
            let angle = std::f64::consts::PI * k as f64 * (2 * i + 1) as f64 / (2.0 * n);
            m.push(scale * angle.cos());
        }
    }
    m
}

// ────────────────────────────────────────────────────────────────────────────
// Mel filter bank (Slaney scale, Slaney area normalisation)
// ────────────────────────────────────────────────────────────────────────────

/// Non-zero span of one triangular filter over the FFT bins.
struct MelFilter {
    start: usize,
    weights: Vec<f64>,
}

struct MelFilterBank {
    filters: Vec<MelFilter>,
}

const F_SP: f64 = 200.0 / 3.0;
const MIN_LOG_HZ: f64 = 1000.0;
const MIN_LOG_MEL: f64 = MIN_LOG_HZ / F_SP;

fn log_step() -> f64 {
    6.4_f64.ln() / 27.0
}

fn hz_to_mel(hz: f64) -> f64 {
    if hz >= MIN_LOG_HZ {
        MIN_LOG_MEL + (hz / MIN_LOG_HZ).ln() / log_step()
    } else {
        hz / F_SP
    }
}

fn mel_to_hz(mel: f64) -> f64 {
    if mel >= MIN_LOG_MEL {
        MIN_LOG_HZ * (log_step() * (mel - MIN_LOG_MEL)).exp()
    } else {
        F_SP * mel
    }
}

impl MelFilterBank {
    fn slaney(sample_rate: f64, n_fft: usize, n_mels: usize) -> Self {
        let n_bins = n_fft / 2 + 1;
        let nyquist = sample_rate / 2.0;
        let fft_freqs: Vec<f64> = (0..n_bins)
            .map(|i| nyquist * i as f64 / (n_bins - 1) as f64)
            .collect();

        let mel_max = hz_to_mel(nyquist);
        let mel_f: Vec<f64> = (0..n_mels + 2)
            .map(|i| mel_to_hz(mel_max * i as f64 / (n_mels + 1) as f64))
            .collect();

        let filters = (0..n_mels)
            .map(|m| {
                let (lo, center, hi) = (mel_f[m], mel_f[m + 1], mel_f[m + 2]);
                let enorm = 2.0 / (hi - lo);
                let dense: Vec<f64> = fft_freqs
                    .iter()
                    .map(|&f| {
                        let lower = (f - lo) / (center - lo);
                        let upper = (hi - f) / (hi - center);
                        lower.min(upper).max(0.0) * enorm
                    })
                    .collect();
                let start = dense.iter().position(|w| *w > 0.0).unwrap_or(0);
                let end = dense
                    .iter()
                    .rposition(|w| *w > 0.0)
                    .map(|i| i + 1)
                    .unwrap_or(start);
                MelFilter {
                    start,
                    weights: dense[start..end].to_vec(),
                }
            })
            .collect();

        Self { filters }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::media::synthetic::sine_wave;

    #[test]
    fn test_one_second_clip_has_fixed_shape() {
        let extractor = AudioFeatureExtractor::new();
        let features = extractor.compute(&sine_wave(440.0, SAMPLE_RATE, SAMPLE_RATE as usize));
        assert_eq!(features.shape(), &[N_MFCC, FEATURE_WIDTH, 1]);
    }

    #[test]
    fn test_sixty_second_clip_has_fixed_shape() {
        let extractor = AudioFeatureExtractor::new();
        let samples = sine_wave(220.0, SAMPLE_RATE, 60 * SAMPLE_RATE as usize);
        let features = extractor.compute(&samples);
        assert_eq!(features.shape(), &[N_MFCC, FEATURE_WIDTH, 1]);
        // Truncated, not padded: the leading column carries signal.
        assert!((0..N_MFCC).any(|k| features[[k, 0, 0]] != 0.0));
    }

    #[test]
    fn test_short_clip_is_left_padded() {
        let extractor = AudioFeatureExtractor::new();
        let samples = sine_wave(440.0, SAMPLE_RATE, SAMPLE_RATE as usize);
        let frames = 1 + samples.len() / HOP;
        let features = extractor.compute(&samples);
        let pad = FEATURE_WIDTH - frames;
        for t in 0..pad {
            for k in 0..N_MFCC {
                assert_eq!(features[[k, t, 0]], 0.0);
            }
        }
        assert!((0..N_MFCC).any(|k| features[[k, pad, 0]] != 0.0));
    }

    #[test]
    fn test_standardized_values_have_zero_mean_unit_variance() {
        let extractor = AudioFeatureExtractor::new();
        let samples = sine_wave(330.0, SAMPLE_RATE, SAMPLE_RATE as usize * 2);
        let columns = standardize(extractor.mfcc(&samples));
        let n = (columns.len() * N_MFCC) as f64;
        let mean = columns.iter().flatten().sum::<f64>() / n;
        let var = columns.iter().flatten().map(|v| (v - mean).powi(2)).sum::<f64>() / n;
        assert!(mean.abs() < 1e-9, "mean was {mean}");
        assert!((var - 1.0).abs() < 1e-9, "variance was {var}");
    }

    #[test]
    fn test_silence_yields_finite_features() {
        let extractor = AudioFeatureExtractor::new();
        let features = extractor.compute(&vec![0.0; SAMPLE_RATE as usize]);
        assert!(features.iter().all(|v| v.is_finite()));
    }

    #[test]
    fn test_flat_matrix_standardizes_to_zeros() {
        let columns = standardize(vec![[-100.0; N_MFCC]; 5]);
        assert!(columns.iter().flatten().all(|v| *v == 0.0));
    }

    #[test]
    fn test_empty_audio_yields_zeros() {
        let extractor = AudioFeatureExtractor::new();
        let features = extractor.compute(&[]);
        assert_eq!(features.shape(), &[N_MFCC, FEATURE_WIDTH, 1]);
        assert!(features.iter().all(|v| v.is_finite()));
    }

    #[test]
    fn test_frame_count_matches_centered_stft() {
        let extractor = AudioFeatureExtractor::new();
        assert_eq!(extractor.mfcc(&vec![0.1; 44_100]).len(), 1 + 44_100 / HOP);
        assert_eq!(extractor.mfcc(&[0.1; 10]).len(), 1);
    }

    #[test]
    fn test_mel_scale_round_trips() {
        for hz in [0.0, 300.0, 999.0, 1000.0, 4000.0, 22_050.0] {
            assert!((mel_to_hz(hz_to_mel(hz)) - hz).abs() < 1e-6);
        }
    }

    #[test]
    fn test_filter_bank_shape() {
        let bank = MelFilterBank::slaney(SAMPLE_RATE as f64, N_FFT, N_MELS);
        assert_eq!(bank.filters.len(), N_MELS);
        for f in &bank.filters {
            assert!(f.weights.iter().all(|w| *w >= 0.0));
            assert!(f.start + f.weights.len() <= N_FFT / 2 + 1);
        }
        // Upper filters are wider than lower ones on the mel scale.
        assert!(bank.filters[N_MELS - 1].weights.len() > bank.filters[10].weights.len());
    }

    #[test]
    fn test_dct_of_constant_keeps_only_dc() {
        let dct = dct_ortho_matrix(N_MFCC, N_MELS);
        let x = [1.0_f64; N_MELS];
        for k in 0..N_MFCC {
            let y: f64 = dct[k * N_MELS..(k + 1) * N_MELS].iter().zip(&x).map(|(d, v)| d * v).sum();
            if k == 0 {
                assert!((y - (N_MELS as f64).sqrt()).abs() < 1e-9);
            } else {
                assert!(y.abs() < 1e-9);
            }
        }
    }
}
