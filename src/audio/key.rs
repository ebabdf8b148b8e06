// Musical key estimation (Krumhansl-Schmuckler).
//
// 1. Average the chromagram over time into one 12-vector
// 2. Standardize it (zero mean, unit variance; zero vector if flat)
// 3. Dot it with every row of the major and minor correlation matrices.
//    Row t is the standardized profile rotated so its tonic sits on pitch class t.
// 4. Best major vs best minor; major only wins with a strictly higher score.
//
// Reference: Krumhansl, C.L. (1990). Cognitive Foundations of Musical Pitch.

use serde::{Serialize, Serializer};
use std::fmt;

use super::chroma::ChromaMatrix;

/// Krumhansl-Kessler probe-tone ratings, major context (tonic first)
pub const KS_MAJOR: [f64; 12] = [
    6.35, 2.23, 3.48, 2.33, 4.38, 4.09, 2.52, 5.19, 2.39, 3.66, 2.29, 2.88,
];

/// Krumhansl-Kessler probe-tone ratings, minor context (tonic first)
pub const KS_MINOR: [f64; 12] = [
    6.33, 2.68, 3.52, 5.38, 2.60, 3.53, 2.54, 4.75, 3.98, 2.69, 3.34, 3.17,
];

/// Tonic names indexed by pitch class (0=C, ..., 11=B), sharp spelling
pub const PITCH_CLASS_NAMES: [&str; 12] = [
    "C", "C#", "D", "D#", "E", "F", "F#", "G", "G#", "A", "A#", "B",
];

/// Camelot wheel notation for major keys (indexed by pitch class).
/// Major keys use the "B" suffix (inner ring).
const CAMELOT_MAJOR: [&str; 12] = [
    "8B", "3B", "10B", "5B", "12B", "7B", "2B", "9B", "4B", "11B", "6B", "1B",
];

/// Camelot wheel notation for minor keys (indexed by pitch class).
/// Minor keys use the "A" suffix (outer ring).
const CAMELOT_MINOR: [&str; 12] = [
    "5A", "12A", "7A", "2A", "9A", "4A", "11A", "6A", "1A", "8A", "3A", "10A",
];

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Mode {
    Major,
    Minor,
}

impl Mode {
    pub fn as_str(&self) -> &'static str {
        match self {
            Mode::Major => "major",
            Mode::Minor => "minor",
        }
    }
}

/// Global key of a clip. Serializes as "<Tonic> <mode>", e.g. "A minor".
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct KeyEstimate {
    /// Pitch class of the tonic, 0 = C .. 11 = B
    pub tonic: usize,
    pub mode: Mode,
}

impl KeyEstimate {
    pub fn tonic_name(&self) -> &'static str {
        PITCH_CLASS_NAMES[self.tonic % 12]
    }

    pub fn camelot(&self) -> &'static str {
        match self.mode {
            Mode::Major => CAMELOT_MAJOR[self.tonic % 12],
            Mode::Minor => CAMELOT_MINOR[self.tonic % 12],
        }
    }
}

impl fmt::Display for KeyEstimate {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} {}", self.tonic_name(), self.mode.as_str())
    }
}

impl Serialize for KeyEstimate {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.collect_str(self)
    }
}

/// A standardized key profile expanded into its 12 rotations.
/// Row t holds the profile with its tonic moved to pitch class t.
#[derive(Debug, Clone, PartialEq)]
pub struct ProfileMatrix {
    rows: [[f64; 12]; 12],
}

impl ProfileMatrix {
    pub fn from_profile(profile: &[f64; 12]) -> Self {
        let standardized = standardize(profile);
        let mut rows = [[0.0f64; 12]; 12];
        for (tonic, row) in rows.iter_mut().enumerate() {
            for (pc, value) in row.iter_mut().enumerate() {
                *value = standardized[(pc + 12 - tonic) % 12];
            }
        }
        Self { rows }
    }

    #[cfg(test)]
    fn row(&self, tonic: usize) -> &[f64; 12] {
        &self.rows[tonic]
    }

    /// Score of `vector` against every tonic in one pass.
    pub fn scores(&self, vector: &[f64; 12]) -> [f64; 12] {
        let mut scores = [0.0f64; 12];
        for (score, row) in scores.iter_mut().zip(&self.rows) {
            *score = row.iter().zip(vector).map(|(a, b)| a * b).sum();
        }
        scores
    }
}

/// Major and minor correlation matrices. Built once at startup and shared
/// read-only by every request.
#[derive(Debug, Clone, PartialEq)]
pub struct KeyProfiles {
    major: ProfileMatrix,
    minor: ProfileMatrix,
}

impl KeyProfiles {
    pub fn krumhansl() -> Self {
        Self::new(&KS_MAJOR, &KS_MINOR)
    }

    pub fn new(major: &[f64; 12], minor: &[f64; 12]) -> Self {
        Self {
            major: ProfileMatrix::from_profile(major),
            minor: ProfileMatrix::from_profile(minor),
        }
    }

    /// Estimate the global key of a chromagram. Never fails: flat or empty
    /// input standardizes to zeros and resolves to C minor.
    pub fn estimate(&self, chroma: &ChromaMatrix) -> KeyEstimate {
        self.estimate_from_mean(&chroma.mean())
    }

    /// Estimate from an already time-averaged chroma vector.
    pub fn estimate_from_mean(&self, mean_chroma: &[f64; 12]) -> KeyEstimate {
        let standardized = standardize(mean_chroma);
        let major_scores = self.major.scores(&standardized);
        let minor_scores = self.minor.scores(&standardized);
        let estimate = pick_key(&major_scores, &minor_scores);

        log::trace!(
            "Key scores: major={:?} minor={:?} -> {}",
            major_scores,
            minor_scores,
            estimate
        );

        estimate
    }
}

impl Default for KeyProfiles {
    fn default() -> Self {
        Self::krumhansl()
    }
}

/// Choose between the best major and best minor tonic.
/// Ties inside a mode go to the lowest tonic; ties across modes go to minor.
pub fn pick_key(major_scores: &[f64; 12], minor_scores: &[f64; 12]) -> KeyEstimate {
    let (best_major, major_max) = first_argmax(major_scores);
    let (best_minor, minor_max) = first_argmax(minor_scores);

    if major_max > minor_max {
        KeyEstimate {
            tonic: best_major,
            mode: Mode::Major,
        }
    } else {
        KeyEstimate {
            tonic: best_minor,
            mode: Mode::Minor,
        }
    }
}

/// Index and value of the first maximum.
fn first_argmax(values: &[f64; 12]) -> (usize, f64) {
    let mut best = 0;
    for (i, &value) in values.iter().enumerate().skip(1) {
        if value > values[best] {
            best = i;
        }
    }
    (best, values[best])
}

/// Z-score with population standard deviation. Zero variance → all zeros.
pub fn standardize(values: &[f64; 12]) -> [f64; 12] {
    let mean = values.iter().sum::<f64>() / 12.0;
    let variance = values.iter().map(|v| (v - mean).powi(2)).sum::<f64>() / 12.0;
    let std_dev = variance.sqrt();

    let mut out = [0.0f64; 12];
    if std_dev <= f64::EPSILON * mean.abs().max(1.0) {
        return out;
    }
    for (o, v) in out.iter_mut().zip(values) {
        *o = (v - mean) / std_dev;
    }
    out
}
