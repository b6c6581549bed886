//! Core audio data types for the voice module. Samples are always mono f32.

use serde::{Deserialize, Serialize};

/// A fixed-length block of mono samples, the unit the segmenter consumes.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AudioFrame {
    /// Samples in -1.0..1.0.
    pub samples: Vec<f32>,
    pub sample_rate: u32,
}

impl AudioFrame {
    pub fn new(samples: Vec<f32>, sample_rate: u32) -> Self {
        Self {
            samples,
            sample_rate,
        }
    }

    pub fn silence(sample_rate: u32, num_samples: usize) -> Self {
        Self::new(vec![0.0; num_samples], sample_rate)
    }

    /// A constant-amplitude frame, handy for driving detectors in tests.
    pub fn constant(amplitude: f32, sample_rate: u32, num_samples: usize) -> Self {
        Self::new(vec![amplitude; num_samples], sample_rate)
    }

    pub fn duration_secs(&self) -> f32 {
        duration(self.samples.len(), self.sample_rate)
    }

    /// Root mean square energy of the frame.
    pub fn rms_energy(&self) -> f32 {
        if self.samples.is_empty() {
            return 0.0;
        }
        let sum_sq: f32 = self.samples.iter().map(|s| s * s).sum();
        (sum_sq / self.samples.len() as f32).sqrt()
    }

    pub fn is_empty(&self) -> bool {
        self.samples.is_empty()
    }
}

/// One continuous span of detected speech: every frame buffered between
/// speech start and speech end, concatenated.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Utterance {
    pub samples: Vec<f32>,
    pub sample_rate: u32,
    /// Number of frames the utterance was assembled from; never zero.
    pub frame_count: usize,
}

impl Utterance {
    /// Concatenate frames. Returns `None` when there are none.
    pub fn from_frames(frames: Vec<AudioFrame>) -> Option<Self> {
        let sample_rate = frames.first()?.sample_rate;
        let frame_count = frames.len();
        let samples = frames.into_iter().flat_map(|f| f.samples).collect();
        Some(Self {
            samples,
            sample_rate,
            frame_count,
        })
    }

    pub fn duration_secs(&self) -> f32 {
        duration(self.samples.len(), self.sample_rate)
    }

    pub fn is_empty(&self) -> bool {
        self.samples.is_empty()
    }
}

fn duration(samples: usize, sample_rate: u32) -> f32 {
    if sample_rate == 0 {
        return 0.0;
    }
    samples as f32 / sample_rate as f32
}

/// Result of a speech-to-text transcription.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct TranscriptionResult {
    pub text: String,
    /// Overall confidence (0.0 - 1.0).
    pub confidence: f32,
    /// Detected language code (e.g., "en").
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub language: Option<String>,
    pub duration_secs: f32,
}

impl TranscriptionResult {
    pub fn text(text: impl Into<String>) -> Self {
        Self {
            text: text.into(),
            confidence: 1.0,
            ..Default::default()
        }
    }
}

/// A request to synthesize speech from text.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SynthesisRequest {
    pub text: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub voice: Option<String>,
    /// Speed multiplier (1.0 = normal).
    pub speed: f32,
}

impl SynthesisRequest {
    pub fn new(text: impl Into<String>) -> Self {
        Self {
            text: text.into(),
            voice: None,
            speed: 1.0,
        }
    }

    pub fn with_voice(mut self, voice: impl Into<String>) -> Self {
        self.voice = Some(voice.into());
        self
    }

    pub fn with_speed(mut self, speed: f32) -> Self {
        self.speed = speed;
        self
    }
}

/// Result of a text-to-speech synthesis.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SynthesisResult {
    pub samples: Vec<f32>,
    pub sample_rate: u32,
    pub duration_secs: f32,
    pub characters_used: usize,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_frame_energy() {
        assert_eq!(AudioFrame::silence(16_000, 160).rms_energy(), 0.0);
        let loud = AudioFrame::constant(0.5, 16_000, 160);
        assert!((loud.rms_energy() - 0.5).abs() < 1e-6);
        assert_eq!(AudioFrame::new(Vec::new(), 16_000).rms_energy(), 0.0);
    }

    #[test]
    fn test_frame_duration() {
        let frame = AudioFrame::silence(16_000, 8_000);
        assert!((frame.duration_secs() - 0.5).abs() < f32::EPSILON);
        assert_eq!(AudioFrame::silence(0, 10).duration_secs(), 0.0);
    }

    #[test]
    fn test_utterance_from_frames() {
        let frames = vec![
            AudioFrame::constant(0.1, 16_000, 4),
            AudioFrame::constant(0.2, 16_000, 4),
        ];
        let utterance = Utterance::from_frames(frames).unwrap();
        assert_eq!(utterance.frame_count, 2);
        assert_eq!(utterance.samples.len(), 8);
        assert_eq!(utterance.samples[4], 0.2);
        assert!(Utterance::from_frames(Vec::new()).is_none());
    }

    #[test]
    fn test_synthesis_request_builder() {
        let request = SynthesisRequest::new("hi").with_voice("nova").with_speed(1.25);
        assert_eq!(request.voice.as_deref(), Some("nova"));
        assert!((request.speed - 1.25).abs() < f32::EPSILON);
    }
}
