// Tempo (BPM) estimation using aubio's Tempo tracker.
//
// Algorithm overview:
// 1. Feed the mono waveform in hop-sized frames to aubio's Tempo tracker
//    (spectral-flux onsets + autocorrelation beat tracking)
// 2. Read the tracker's period estimate as a single BPM value
// 3. Reject silent, failed or implausible results as 0.0
// 4. Fold half/double tempo into the 80-200 BPM range
//
// Callers only ever see one scalar; 0.0 means no periodic onsets were
// found (silence, a single hit, too short).

use bliss_audio_aubio_rs::{OnsetMode, Tempo};

use super::decoder::Waveform;

/// FFT window for onset detection.
const BUF_SIZE: usize = 1024;

/// 512 samples ≈ 23ms at 22050Hz, ≈ 12ms at 44100Hz.
const HOP_SIZE: usize = 512;

/// Tracker output outside this range is treated as no tempo.
const MIN_BPM: f64 = 40.0;
const MAX_BPM: f64 = 300.0;

/// Folding target, matching what DJ software reports.
const FOLD_LOW: f64 = 80.0;
const FOLD_HIGH: f64 = 200.0;

/// Peak amplitude below which the clip is treated as silence.
const SILENCE_FLOOR: f32 = 1e-6;

/// Estimate the tempo of a waveform as a single BPM value.
pub fn estimate_tempo(waveform: &Waveform) -> f64 {
    if waveform.sample_rate == 0 || waveform.samples.len() < HOP_SIZE {
        return 0.0;
    }

    let peak = waveform.samples.iter().fold(0.0f32, |m, s| m.max(s.abs()));
    if peak <= SILENCE_FLOOR {
        log::debug!("Silent clip, reporting tempo 0");
        return 0.0;
    }

    match track_bpm(waveform) {
        Ok((bpm, confidence)) => {
            let folded = fold_tempo(bpm);
            log::debug!(
                "Tempo: raw {:.1} BPM, confidence {:.3}, reported {:.1}",
                bpm,
                confidence,
                folded
            );
            folded
        }
        Err(e) => {
            log::warn!("Tempo tracking failed: {:?}", e);
            0.0
        }
    }
}

/// Run the aubio tracker over the whole clip; returns (bpm, confidence).
fn track_bpm(waveform: &Waveform) -> Result<(f64, f64), bliss_audio_aubio_rs::Error> {
    let mut tempo = Tempo::new(OnsetMode::SpecFlux, BUF_SIZE, HOP_SIZE, waveform.sample_rate)?;

    for frame in waveform.samples.chunks_exact(HOP_SIZE) {
        tempo.do_result(frame)?;
    }

    Ok((tempo.get_bpm() as f64, tempo.get_confidence() as f64))
}

/// Normalize one tracker reading: 0.0 when there is no usable tempo,
/// otherwise the value folded once into the DJ range.
fn fold_tempo(bpm: f64) -> f64 {
    if !(MIN_BPM..=MAX_BPM).contains(&bpm) {
        return 0.0;
    }

    if bpm < FOLD_LOW {
        bpm * 2.0
    } else if bpm > FOLD_HIGH {
        bpm / 2.0
    } else {
        bpm
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::f32::consts::PI;

    /// Decaying 1kHz clicks at a fixed BPM.
    fn generate_click_track(bpm: f64, sample_rate: u32, duration_seconds: f64) -> Waveform {
        let total_samples = (sample_rate as f64 * duration_seconds) as usize;
        let mut samples = vec![0.0f32; total_samples];
        let samples_per_beat = (60.0 / bpm) * sample_rate as f64;
        let click_duration = (sample_rate as f64 * 0.005) as usize;

        let mut position = 0.0f64;
        while (position as usize) < total_samples {
            let start = position as usize;
            for j in 0..click_duration {
                let idx = start + j;
                if idx < total_samples {
                    let t = j as f32 / sample_rate as f32;
                    samples[idx] = (2.0 * PI * 1000.0 * t).sin() * (-t * 500.0).exp();
                }
            }
            position += samples_per_beat;
        }

        Waveform::new(samples, sample_rate)
    }

    fn assert_bpm_near(waveform: &Waveform, expected: f64, tolerance: f64) {
        let bpm = estimate_tempo(waveform);
        assert!(
            (bpm - expected).abs() < tolerance,
            "Expected BPM ~{}, got {:.2}",
            expected,
            bpm
        );
    }

    #[test]
    fn test_click_track_120bpm() {
        assert_bpm_near(&generate_click_track(120.0, 44100, 30.0), 120.0, 2.0);
    }

    #[test]
    fn test_click_track_128bpm() {
        assert_bpm_near(&generate_click_track(128.0, 44100, 30.0), 128.0, 2.0);
    }

    #[test]
    fn test_click_track_140bpm() {
        assert_bpm_near(&generate_click_track(140.0, 44100, 30.0), 140.0, 3.0);
    }

    #[test]
    fn test_click_track_48000() {
        assert_bpm_near(&generate_click_track(125.0, 48000, 30.0), 125.0, 2.0);
    }

    #[test]
    fn test_silence_is_zero() {
        let waveform = Waveform::new(vec![0.0; 22050 * 5], 22050);
        assert_eq!(estimate_tempo(&waveform), 0.0);
    }

    #[test]
    fn test_empty_and_short_input_is_zero() {
        assert_eq!(estimate_tempo(&Waveform::new(Vec::new(), 44100)), 0.0);
        assert_eq!(estimate_tempo(&Waveform::new(vec![0.3; 100], 44100)), 0.0);
        assert_eq!(estimate_tempo(&Waveform::new(vec![0.3; 1000], 0)), 0.0);
    }

    #[test]
    fn test_short_clip_does_not_fail() {
        let bpm = estimate_tempo(&generate_click_track(126.0, 44100, 2.0));
        assert!(bpm == 0.0 || (FOLD_LOW..=FOLD_HIGH).contains(&bpm), "{}", bpm);
    }

    #[test]
    fn test_near_silent_noise_does_not_fail() {
        // Deterministic low-level pseudo-noise
        let mut state = 0x2545F491u32;
        let samples: Vec<f32> = (0..22050 * 3)
            .map(|_| {
                state ^= state << 13;
                state ^= state >> 17;
                state ^= state << 5;
                (state as f32 / u32::MAX as f32 - 0.5) * 1e-4
            })
            .collect();
        let bpm = estimate_tempo(&Waveform::new(samples, 22050));
        assert!(bpm.is_finite());
        assert!(bpm == 0.0 || (FOLD_LOW..=FOLD_HIGH).contains(&bpm), "{}", bpm);
    }

    #[test]
    fn test_fold_half_and_double_tempo() {
        assert_eq!(fold_tempo(70.0), 140.0);
        assert_eq!(fold_tempo(64.0), 128.0);
        assert_eq!(fold_tempo(240.0), 120.0);
        assert_eq!(fold_tempo(120.0), 120.0);
        assert_eq!(fold_tempo(FOLD_LOW), FOLD_LOW);
        assert_eq!(fold_tempo(FOLD_HIGH), FOLD_HIGH);
    }

    #[test]
    fn test_fold_rejects_unusable_readings() {
        assert_eq!(fold_tempo(0.0), 0.0);
        assert_eq!(fold_tempo(20.0), 0.0);
        assert_eq!(fold_tempo(400.0), 0.0);
        assert_eq!(fold_tempo(f64::NAN), 0.0);
    }
}
