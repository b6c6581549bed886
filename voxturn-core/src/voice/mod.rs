//! Voice front-end and back-end.
//!
//! Frames, voice-activity detection, utterance segmentation, speech-to-text,
//! text-to-speech, the capture queue and the voice loop that ties them to
//! the turn orchestrator.
//!
//! ## Feature Gating
//!
//! Everything here is available without native audio. Microphone capture
//! through cpal requires the `voice` feature.

pub mod audio_io;
pub mod pipeline;
pub mod segmenter;
pub mod speech;
pub mod stt;
pub mod tts;
pub mod types;
pub mod vad;

pub use audio_io::{
    CaptureSink, FrameAssembler, FrameSender, audio_convert, frame_channel, frames_from_wav,
};
pub use pipeline::{LoopStats, VoiceLoop, VoiceLoopEvent};
pub use segmenter::{SegmenterState, SpeechSegmenter};
pub use speech::{
    ConsoleSpeech, MockSpeech, SpeechOutput, SynthesizedSpeech, clean_for_speech,
};
pub use stt::{MockSttProvider, OpenAiSttProvider, SttProvider};
pub use tts::{MockTtsProvider, OpenAiTtsProvider, TtsProvider};
pub use types::{AudioFrame, SynthesisRequest, SynthesisResult, TranscriptionResult, Utterance};
pub use vad::{ActivityDetector, EnergyVad, ScriptedDetector};

#[cfg(feature = "voice")]
pub use audio_io::MicrophoneCapture;
