// Audio processing (DSP)
// Modules: decoder, chroma, key, bpm

pub mod bpm;
pub mod chroma;
pub mod decoder;
pub mod key;
