use std::io::Cursor;
use std::path::Path;
use symphonia::core::audio::{AudioBuffer, AudioBufferRef, Signal};
use symphonia::core::codecs::DecoderOptions;
use symphonia::core::conv::FromSample;
use symphonia::core::errors::Error as SymphoniaError;
use symphonia::core::formats::FormatOptions;
use symphonia::core::io::{MediaSource, MediaSourceStream};
use symphonia::core::meta::MetadataOptions;
use symphonia::core::probe::Hint;
use symphonia::core::sample::Sample;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum DecodeError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
    #[error("Failed to probe audio format: {0}")]
    Probe(String),
    #[error("No audio tracks found")]
    NoTrack,
    #[error("Audio track has no sample rate")]
    NoSampleRate,
    #[error("Failed to create decoder: {0}")]
    Codec(String),
    #[error("Error reading packet: {0}")]
    Packet(String),
    #[error("Audio stream decoded to zero samples")]
    Empty,
}

/// Decoded mono waveform at its native sample rate.
/// This is the only input the analysis pipeline consumes.
#[derive(Debug, Clone)]
pub struct Waveform {
    /// Mono samples in range [-1.0, 1.0]
    pub samples: Vec<f32>,
    /// Sample rate in Hz (e.g., 22050, 44100, 48000)
    pub sample_rate: u32,
}

impl Waveform {
    pub fn new(samples: Vec<f32>, sample_rate: u32) -> Self {
        Self {
            samples,
            sample_rate,
        }
    }

    pub fn duration_ms(&self) -> u64 {
        if self.sample_rate == 0 {
            return 0;
        }
        self.samples.len() as u64 * 1000 / self.sample_rate as u64
    }
}

/// Decode an entire audio file to a mono waveform.
///
/// Reads the full file, decodes all packets, converts to f32 and mixes
/// down to mono. Samples are NOT resampled.
pub fn decode_to_mono(path: &Path) -> Result<Waveform, DecodeError> {
    let file = std::fs::File::open(path)?;

    let mut hint = Hint::new();
    if let Some(ext) = path.extension() {
        hint.with_extension(&ext.to_string_lossy());
    }

    decode_source(Box::new(file), hint)
}

/// Decode an in-memory encoded clip (e.g. an HTTP response body).
/// `extension` is only a probing hint; the container is still sniffed.
pub fn decode_bytes(bytes: Vec<u8>, extension: Option<&str>) -> Result<Waveform, DecodeError> {
    let mut hint = Hint::new();
    if let Some(ext) = extension {
        hint.with_extension(ext);
    }

    decode_source(Box::new(Cursor::new(bytes)), hint)
}

fn decode_source(source: Box<dyn MediaSource>, hint: Hint) -> Result<Waveform, DecodeError> {
    let mss = MediaSourceStream::new(source, Default::default());

    let probed = symphonia::default::get_probe()
        .format(&hint, mss, &FormatOptions::default(), &MetadataOptions::default())
        .map_err(|e| DecodeError::Probe(e.to_string()))?;

    let mut format_reader = probed.format;

    let track = format_reader.default_track().ok_or(DecodeError::NoTrack)?;
    let track_id = track.id;
    let sample_rate = track
        .codec_params
        .sample_rate
        .ok_or(DecodeError::NoSampleRate)?;

    let mut decoder = symphonia::default::get_codecs()
        .make(&track.codec_params, &DecoderOptions::default())
        .map_err(|e| DecodeError::Codec(e.to_string()))?;

    let mut samples: Vec<f32> = Vec::new();

    loop {
        let packet = match format_reader.next_packet() {
            Ok(packet) => packet,
            Err(SymphoniaError::IoError(e)) if e.kind() == std::io::ErrorKind::UnexpectedEof => {
                break;
            }
            Err(e) => return Err(DecodeError::Packet(e.to_string())),
        };

        if packet.track_id() != track_id {
            continue;
        }

        let decoded = match decoder.decode(&packet) {
            Ok(decoded) => decoded,
            Err(SymphoniaError::DecodeError(msg)) => {
                log::warn!("Skipping corrupted packet: {}", msg);
                continue;
            }
            Err(e) => return Err(DecodeError::Packet(e.to_string())),
        };

        samples.extend_from_slice(&convert_to_mono_f32(&decoded));
    }

    if samples.is_empty() {
        return Err(DecodeError::Empty);
    }

    log::debug!(
        "Decoded {} mono samples at {} Hz",
        samples.len(),
        sample_rate
    );

    Ok(Waveform::new(samples, sample_rate))
}

/// Convert decoded audio buffer to mono f32 samples.
/// If stereo/multichannel, averages all channels to produce mono output.
fn convert_to_mono_f32(decoded: &AudioBufferRef) -> Vec<f32> {
    match decoded {
        AudioBufferRef::F32(buf) => mix_to_mono_f32(buf),
        AudioBufferRef::U8(buf) => mix_to_mono(buf),
        AudioBufferRef::U16(buf) => mix_to_mono(buf),
        AudioBufferRef::U24(buf) => mix_to_mono(buf),
        AudioBufferRef::U32(buf) => mix_to_mono(buf),
        AudioBufferRef::S8(buf) => mix_to_mono(buf),
        AudioBufferRef::S16(buf) => mix_to_mono(buf),
        AudioBufferRef::S24(buf) => mix_to_mono(buf),
        AudioBufferRef::S32(buf) => mix_to_mono(buf),
        AudioBufferRef::F64(buf) => mix_to_mono(buf),
    }
}

fn mix_to_mono_f32(buf: &AudioBuffer<f32>) -> Vec<f32> {
    let channels = buf.spec().channels.count();
    if channels == 0 || buf.frames() == 0 {
        return Vec::new();
    }
    if channels == 1 {
        return buf.chan(0).to_vec();
    }

    let mut mono = vec![0.0f32; buf.frames()];
    let scale = 1.0 / channels as f32;
    for ch in 0..channels {
        for (i, &sample) in buf.chan(ch).iter().enumerate() {
            mono[i] += sample * scale;
        }
    }
    mono
}

/// Generic mixer: any sample format to f32 mono
fn mix_to_mono<S>(buf: &AudioBuffer<S>) -> Vec<f32>
where
    S: Sample,
    f32: FromSample<S>,
{
    let channels = buf.spec().channels.count();
    let frames = buf.frames();

    if channels == 0 || frames == 0 {
        return Vec::new();
    }

    if channels == 1 {
        return buf.chan(0).iter().map(|&s| f32::from_sample(s)).collect();
    }

    let mut mono = vec![0.0f32; frames];
    let scale = 1.0 / channels as f32;
    for ch in 0..channels {
        for (i, &sample) in buf.chan(ch).iter().enumerate() {
            mono[i] += f32::from_sample(sample) * scale;
        }
    }
    mono
}

#[cfg(test)]
/// Encode 16-bit PCM samples as a minimal RIFF/WAVE file.
pub(crate) fn wav_bytes(channels: u16, sample_rate: u32, interleaved: &[i16]) -> Vec<u8> {
    let data_len = (interleaved.len() * 2) as u32;
    let block_align = channels * 2;
    let mut out = Vec::with_capacity(44 + data_len as usize);
    out.extend_from_slice(b"RIFF");
    out.extend_from_slice(&(36 + data_len).to_le_bytes());
    out.extend_from_slice(b"WAVE");
    out.extend_from_slice(b"fmt ");
    out.extend_from_slice(&16u32.to_le_bytes());
    out.extend_from_slice(&1u16.to_le_bytes()); // PCM
    out.extend_from_slice(&channels.to_le_bytes());
    out.extend_from_slice(&sample_rate.to_le_bytes());
    out.extend_from_slice(&(sample_rate * block_align as u32).to_le_bytes());
    out.extend_from_slice(&block_align.to_le_bytes());
    out.extend_from_slice(&16u16.to_le_bytes());
    out.extend_from_slice(b"data");
    out.extend_from_slice(&data_len.to_le_bytes());
    for s in interleaved {
        out.extend_from_slice(&s.to_le_bytes());
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn test_decode_mono_wav_file() {
        let samples: Vec<i16> = (0..8000).map(|i| ((i % 100) * 100) as i16).collect();
        let mut file = tempfile::Builder::new().suffix(".wav").tempfile().unwrap();
        file.write_all(&wav_bytes(1, 8000, &samples)).unwrap();

        let waveform = decode_to_mono(file.path()).expect("WAV should decode");
        assert_eq!(waveform.sample_rate, 8000);
        assert_eq!(waveform.samples.len(), 8000);
        assert_eq!(waveform.duration_ms(), 1000);
    }

    #[test]
    fn test_decode_stereo_bytes_mixes_to_mono() {
        // Left at +half scale, right at -half scale: mono mix is silence
        let frames = 4410;
        let mut interleaved = Vec::with_capacity(frames * 2);
        for _ in 0..frames {
            interleaved.push(16384);
            interleaved.push(-16384);
        }

        let waveform = decode_bytes(wav_bytes(2, 44100, &interleaved), Some("wav"))
            .expect("WAV bytes should decode");
        assert_eq!(waveform.sample_rate, 44100);
        assert_eq!(waveform.samples.len(), frames);
        assert!(waveform.samples.iter().all(|s| s.abs() < 1e-3));
    }

    #[test]
    fn test_decode_garbage_fails() {
        let result = decode_bytes(vec![0x42; 512], None);
        assert!(result.is_err(), "Random bytes should not decode");
    }

    #[test]
    fn test_decode_missing_file_is_io_error() {
        let result = decode_to_mono(Path::new("/nonexistent/clip.wav"));
        assert!(matches!(result, Err(DecodeError::Io(_))));
    }

    #[test]
    fn test_decode_empty_data_chunk() {
        let result = decode_bytes(wav_bytes(1, 22050, &[]), Some("wav"));
        assert!(result.is_err(), "Zero-sample WAV should be rejected");
    }
}
