// Short-time chroma analysis.
//
// Slides a Hann-windowed FFT frame across the waveform and folds each
// bin's power into one of 12 pitch classes (12-TET, A4 = 440 Hz).
// Each frame is scaled so its strongest pitch class is 1.0; silent frames
// stay all-zero. No normalization across time happens here.

use rustfft::{num_complex::Complex, FftPlanner};
use std::f64::consts::PI;

use super::decoder::Waveform;

/// FFT window size for chroma frames.
/// 4096 samples gives ~10Hz resolution at 44100Hz, enough to separate
/// adjacent semitones down to C2.
pub const FFT_SIZE: usize = 4096;

/// Hop between consecutive frames (50% overlap).
pub const HOP_SIZE: usize = 2048;

/// Below ~C2 bass rumble and noise dominate.
const MIN_FREQ: f64 = 65.0;

/// Above this, harmonics rather than fundamentals dominate.
const MAX_FREQ: f64 = 2000.0;

const SILENCE_FLOOR: f64 = 1e-12;

/// 12 x F pitch-class energy matrix, stored frame-major.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ChromaMatrix {
    frames: Vec<[f64; 12]>,
}

impl ChromaMatrix {
    pub fn from_frames(frames: Vec<[f64; 12]>) -> Self {
        Self { frames }
    }

    pub fn num_frames(&self) -> usize {
        self.frames.len()
    }

    pub fn frames(&self) -> &[[f64; 12]] {
        &self.frames
    }

    /// Energy of one pitch class across all frames.
    #[cfg(test)]
    fn row(&self, pitch_class: usize) -> impl Iterator<Item = f64> + '_ {
        self.frames.iter().map(move |frame| frame[pitch_class])
    }

    /// Average energy per pitch class over time. Zero frames → zero vector.
    pub fn mean(&self) -> [f64; 12] {
        let mut mean = [0.0f64; 12];
        if self.frames.is_empty() {
            return mean;
        }
        for frame in &self.frames {
            for (acc, value) in mean.iter_mut().zip(frame) {
                *acc += value;
            }
        }
        let n = self.frames.len() as f64;
        for value in mean.iter_mut() {
            *value /= n;
        }
        mean
    }
}

/// Compute the chromagram of a waveform.
///
/// Input shorter than one FFT frame is zero-padded into a single frame;
/// an empty waveform yields a matrix with no frames.
pub fn extract_chroma(waveform: &Waveform) -> ChromaMatrix {
    let samples = &waveform.samples;
    if samples.is_empty() || waveform.sample_rate == 0 {
        return ChromaMatrix::default();
    }

    let mut planner = FftPlanner::new();
    let fft = planner.plan_fft_forward(FFT_SIZE);

    let window: Vec<f64> = (0..FFT_SIZE)
        .map(|i| 0.5 * (1.0 - (2.0 * PI * i as f64 / (FFT_SIZE - 1) as f64).cos()))
        .collect();

    let bin_to_pitch_class = pitch_class_map(waveform.sample_rate);

    let num_frames = samples.len().saturating_sub(FFT_SIZE) / HOP_SIZE + 1;
    let mut frames = Vec::with_capacity(num_frames);
    let mut buffer: Vec<Complex<f64>> = vec![Complex::new(0.0, 0.0); FFT_SIZE];

    for frame_idx in 0..num_frames {
        let start = frame_idx * HOP_SIZE;
        for (i, slot) in buffer.iter_mut().enumerate() {
            let sample = samples.get(start + i).copied().unwrap_or(0.0);
            *slot = Complex::new(sample as f64 * window[i], 0.0);
        }

        fft.process(&mut buffer);

        let mut chroma = [0.0f64; 12];
        for (bin, pc) in bin_to_pitch_class.iter().enumerate() {
            if let Some(pc) = pc {
                chroma[*pc] += buffer[bin].norm_sqr();
            }
        }

        let peak = chroma.iter().copied().fold(0.0f64, f64::max);
        if peak > SILENCE_FLOOR {
            for value in chroma.iter_mut() {
                *value /= peak;
            }
        } else {
            chroma = [0.0; 12];
        }

        frames.push(chroma);
    }

    log::trace!(
        "Chroma: {} frames from {} samples at {} Hz",
        frames.len(),
        samples.len(),
        waveform.sample_rate
    );

    ChromaMatrix::from_frames(frames)
}

/// Map each FFT bin to a pitch class (C = 0 .. B = 11), or None outside
/// the musical range.
fn pitch_class_map(sample_rate: u32) -> Vec<Option<usize>> {
    (0..FFT_SIZE / 2 + 1)
        .map(|bin| {
            let freq = bin as f64 * sample_rate as f64 / FFT_SIZE as f64;
            if !(MIN_FREQ..=MAX_FREQ).contains(&freq) {
                None
            } else {
                // +9 shifts A (semitone 0 relative to 440 Hz) to index 9
                let semitones_from_a = 12.0 * (freq / 440.0).log2();
                let pitch_class = (semitones_from_a.round() as i32 + 9).rem_euclid(12);
                Some(pitch_class as usize)
            }
        })
        .collect()
}
