// Feature detection: one clip in, tempo + key out.
//
// Request flow:
// 1. admit: take a slot from the admission gate or fail with Overloaded
// 2. acquire: ask the waveform source for decoded audio
// 3. analyze: chroma once, then key and tempo
// 4. the acquired clip (and any scratch file) is dropped, then the permit

pub mod gate;
pub mod source;

use serde::Serialize;
use std::sync::Arc;
use thiserror::Error;

use crate::audio::bpm::estimate_tempo;
use crate::audio::chroma::extract_chroma;
use crate::audio::decoder::Waveform;
use crate::audio::key::{KeyEstimate, KeyProfiles};
use gate::{AdmissionGate, AdmissionPermit};
use source::{ClipRequest, SourceError, WaveformSource};

#[derive(Error, Debug)]
pub enum DetectionError {
    #[error("Too many ongoing jobs.")]
    Overloaded,
    #[error("audio source unavailable for {id}: {source}")]
    SourceUnavailable {
        id: String,
        #[source]
        source: SourceError,
    },
}

/// Result body: `{"tempo": 120.2, "key": "A minor"}`
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct FeatureReport {
    pub tempo: f64,
    pub key: KeyEstimate,
}

/// Run the full analysis on an already decoded waveform.
pub fn analyze_waveform(waveform: &Waveform, profiles: &KeyProfiles) -> FeatureReport {
    let chroma = extract_chroma(waveform);
    let key = profiles.estimate(&chroma);
    let tempo = estimate_tempo(waveform);
    FeatureReport { tempo, key }
}

/// Gated feature detection over a waveform source.
pub struct FeatureDetector {
    gate: Arc<AdmissionGate>,
    profiles: Arc<KeyProfiles>,
    source: Arc<dyn WaveformSource>,
}

impl FeatureDetector {
    pub fn new(
        gate: Arc<AdmissionGate>,
        profiles: Arc<KeyProfiles>,
        source: Arc<dyn WaveformSource>,
    ) -> Self {
        Self {
            gate,
            profiles,
            source,
        }
    }

    pub fn gate(&self) -> &Arc<AdmissionGate> {
        &self.gate
    }

    /// Reserve a pipeline slot without doing any work.
    pub fn admit(&self) -> Result<AdmissionPermit, DetectionError> {
        self.gate.try_acquire().ok_or_else(|| {
            log::warn!(
                "Rejecting job: {} of {} slots in use",
                self.gate.in_flight(),
                self.gate.capacity()
            );
            DetectionError::Overloaded
        })
    }

    /// Run the pipeline for an admitted request. The permit is released
    /// when this returns, on success, error or unwind alike.
    pub fn run(
        &self,
        _permit: AdmissionPermit,
        request: &ClipRequest,
    ) -> Result<FeatureReport, DetectionError> {
        let id = request.id();
        let started = std::time::Instant::now();

        let clip = self.source.acquire(request).map_err(|source| {
            log::warn!("Clip {}: source failed: {}", id, source);
            DetectionError::SourceUnavailable {
                id: id.clone(),
                source,
            }
        })?;

        let report = analyze_waveform(&clip.waveform, &self.profiles);
        drop(clip);

        log::info!(
            "Clip {}: {} at {:.1} BPM ({} ms)",
            id,
            report.key,
            report.tempo,
            started.elapsed().as_millis()
        );

        Ok(report)
    }

    /// Admit and run in one call.
    pub fn detect(&self, request: &ClipRequest) -> Result<FeatureReport, DetectionError> {
        let permit = self.admit()?;
        self.run(permit, request)
    }
}


#[cfg(test)]
mod tests {
    use super::test_support::*;
    use super::*;
    use crate::audio::key::Mode;

    fn detector_with(source: Arc<FakeSource>, capacity: usize) -> FeatureDetector {
        FeatureDetector::new(
            AdmissionGate::new(capacity),
            Arc::new(KeyProfiles::krumhansl()),
            source,
        )
    }

    fn search(term: &str) -> ClipRequest {
        ClipRequest::SearchTerm(term.to_string())
    }

    #[test]
    fn test_a_minor_arpeggio_end_to_end() {
        let report = analyze_waveform(&a_minor_arpeggio(), &KeyProfiles::krumhansl());
        assert_eq!(report.key.to_string(), "A minor");
        assert!(
            (report.tempo - 120.0).abs() <= 5.0,
            "Expected ~120 BPM, got {:.2}",
            report.tempo
        );
    }

    #[test]
    fn test_fast_arpeggio_is_not_halved() {
        let clip = arpeggio(&[220.0, 261.63, 329.63], 140.0, 22050, 5.0);
        let report = analyze_waveform(&clip, &KeyProfiles::krumhansl());
        assert_eq!(report.key.to_string(), "A minor");
        assert!(
            (report.tempo - 140.0).abs() <= 5.0,
            "Expected ~140 BPM, got {:.2}",
            report.tempo
        );
    }

    #[test]
    fn test_detect_through_source() {
        let source = Arc::new(FakeSource::serving(a_minor_arpeggio()));
        let detector = detector_with(source.clone(), 5);

        let report = detector.detect(&search("some song")).expect("detection should succeed");
        assert_eq!(report.key.mode, Mode::Minor);
        assert_eq!(report.key.tonic, 9);
        assert_eq!(source.calls(), 1);
        assert_eq!(detector.gate().in_flight(), 0);
    }

    #[test]
    fn test_saturated_gate_rejects_without_fetching() {
        let source = Arc::new(FakeSource::serving(a_minor_arpeggio()));
        let detector = detector_with(source.clone(), 5);

        let held: Vec<_> = (0..5).map(|_| detector.admit().unwrap()).collect();
        let result = detector.detect(&search("sixth"));
        assert!(matches!(result, Err(DetectionError::Overloaded)));
        assert_eq!(source.calls(), 0);

        drop(held);
        assert!(detector.detect(&search("after release")).is_ok());
        assert_eq!(source.calls(), 1);
    }

    #[test]
    fn test_source_failure_propagates_and_releases() {
        let source = Arc::new(FakeSource::failing());
        let detector = detector_with(source.clone(), 1);

        let result = detector.detect(&search("missing"));
        match result {
            Err(DetectionError::SourceUnavailable { id, .. }) => {
                assert_eq!(id, search("missing").id());
            }
            other => panic!("expected SourceUnavailable, got {:?}", other),
        }
        assert_eq!(detector.gate().in_flight(), 0);
        // Slot is usable again
        assert!(detector.admit().is_ok());
    }

    #[test]
    fn test_scratch_file_removed_after_detection() {
        let dir = tempfile::tempdir().unwrap();
        let scratch = dir.path().join("clip.wav");
        let source = Arc::new(FakeSource {
            scratch: Some(scratch.clone()),
            ..FakeSource::serving(Waveform::new(vec![0.0; 22050], 22050))
        });
        let detector = detector_with(source.clone(), 5);

        detector.detect(&search("quiet")).unwrap();
        assert_eq!(source.calls(), 1);
        assert!(!scratch.exists());
    }

    #[test]
    fn test_silence_gives_default_estimate() {
        let report = analyze_waveform(
            &Waveform::new(vec![0.0; 22050 * 3], 22050),
            &KeyProfiles::krumhansl(),
        );
        assert_eq!(report.key.to_string(), "C minor");
        assert_eq!(report.tempo, 0.0);
    }

    #[test]
    fn test_report_json_shape() {
        let report = FeatureReport {
            tempo: 120.5,
            key: crate::audio::key::KeyEstimate {
                tonic: 9,
                mode: Mode::Minor,
            },
        };
        let json = serde_json::to_value(&report).unwrap();
        assert_eq!(json, serde_json::json!({"tempo": 120.5, "key": "A minor"}));
    }

    #[test]
    fn test_overloaded_message() {
        assert_eq!(DetectionError::Overloaded.to_string(), "Too many ongoing jobs.");
    }
}
