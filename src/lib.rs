// Modules
pub mod audio;
pub mod config;
pub mod detection;
pub mod server;

pub use audio::decoder::Waveform;
pub use audio::key::{KeyEstimate, KeyProfiles, Mode};
pub use detection::gate::{AdmissionGate, AdmissionPermit};
pub use detection::source::{ClipRequest, RemoteAudioSource, WaveformSource};
pub use detection::{analyze_waveform, DetectionError, FeatureDetector, FeatureReport};
