//! End-to-end voice tests: WAV audio through activity detection,
//! segmentation, the orchestrator and speech output, using mock providers.
//!
//! These do not require the `voice` feature or any audio hardware.

use std::sync::Arc;
use std::time::{Duration, Instant};

use pretty_assertions::assert_eq;
use tokio_util::sync::CancellationToken;

use voxturn_core::brain::MockGenerationBackend;
use voxturn_core::config::{AssistantConfig, SegmentationConfig};
use voxturn_core::gating::MockClassifier;
use voxturn_core::orchestrator::TurnOrchestrator;
use voxturn_core::types::TurnKind;
use voxturn_core::voice::{
    AudioFrame, MockSpeech, MockSttProvider, MockTtsProvider, SynthesizedSpeech, VoiceLoop,
    VoiceLoopEvent, audio_convert, frame_channel, frames_from_wav,
};

const RATE: u32 = 16_000;
/// 100 ms frames.
const FRAME: usize = 1_600;

fn segmentation() -> SegmentationConfig {
    SegmentationConfig {
        hangover_secs: 1.0,
        vad_threshold: 0.1,
        vad_smoothing_frames: 1,
    }
}

fn orchestrator(texts: &[&str], backend: Arc<MockGenerationBackend>) -> TurnOrchestrator {
    TurnOrchestrator::new(
        &AssistantConfig::default(),
        Arc::new(MockSttProvider::with_texts(texts.iter().copied())),
        backend,
    )
    .unwrap()
    .with_actionable(Arc::new(MockClassifier::fixed("actionable", true)))
    .with_contextable(Arc::new(MockClassifier::fixed("contextable", false)))
}

/// Alternating spans of loud tone and silence, in seconds.
fn recording(spans: &[(bool, f32)]) -> Vec<u8> {
    let mut samples = Vec::new();
    for (speech, secs) in spans {
        let n = (RATE as f32 * secs) as usize;
        let amplitude = if *speech { 0.5 } else { 0.0 };
        samples.extend(std::iter::repeat_n(amplitude, n));
    }
    audio_convert::encode_wav(&samples, RATE).unwrap()
}

#[tokio::test]
async fn test_two_utterances_from_a_recording() {
    let wav = recording(&[(true, 1.0), (false, 2.0), (true, 1.0), (false, 0.5)]);
    let frames = frames_from_wav(&wav, FRAME, RATE).unwrap();
    assert_eq!(frames.len(), 45);

    let backend = Arc::new(MockGenerationBackend::with_response("Four."));
    backend.queue_response("Two plus two is four.");
    let speech = Arc::new(MockSpeech::new());
    let mut voice_loop = VoiceLoop::from_config(
        &segmentation(),
        orchestrator(&["what is two plus two", "thanks"], backend.clone()),
        speech.clone(),
    );

    let start = Instant::now();
    let mut outcomes = Vec::new();
    for (i, frame) in frames.into_iter().enumerate() {
        let at = start + Duration::from_millis(i as u64 * 100);
        if let Some(outcome) = voice_loop.process_frame(frame, at).await {
            outcomes.push((i, outcome));
        }
    }

    // The first utterance closes once silence exceeds the hangover; the
    // second is still open when the recording ends.
    assert_eq!(outcomes.len(), 1);
    let (closed_at, outcome) = &outcomes[0];
    assert_eq!(*closed_at, 20);
    assert_eq!(outcome.user_text, "what is two plus two");
    assert_eq!(outcome.kind, TurnKind::Answered);
    assert_eq!(speech.spoken(), vec!["Two plus two is four.".to_string()]);
    assert_eq!(backend.call_count(), 1);
}

#[tokio::test]
async fn test_run_over_queue_flushes_trailing_speech() {
    let wav = recording(&[(true, 0.5), (false, 0.3)]);
    let frames = frames_from_wav(&wav, FRAME, RATE).unwrap();

    let backend = Arc::new(MockGenerationBackend::with_response("Hello!"));
    let speech = Arc::new(MockSpeech::new());
    let (events_tx, mut events_rx) = tokio::sync::mpsc::unbounded_channel();
    let mut voice_loop = VoiceLoop::from_config(
        &segmentation(),
        orchestrator(&["hello"], backend),
        speech.clone(),
    )
    .with_events(events_tx);

    let (sender, receiver) = frame_channel(64);
    let producer = tokio::spawn(async move {
        for frame in frames {
            sender.send(frame).await.unwrap();
        }
    });

    let stats = voice_loop.run(receiver, CancellationToken::new()).await;
    producer.await.unwrap();

    assert_eq!(stats.frames, 8);
    assert_eq!(stats.utterances, 1);
    assert_eq!(stats.turns, 1);
    assert_eq!(speech.spoken(), vec!["Hello!".to_string()]);

    match events_rx.recv().await {
        Some(VoiceLoopEvent::UtteranceReady { duration_secs }) => {
            assert!((duration_secs - 0.5).abs() < 0.01);
        }
        other => panic!("unexpected event: {other:?}"),
    }
    assert!(matches!(
        events_rx.recv().await,
        Some(VoiceLoopEvent::TurnCompleted(_))
    ));
}

#[tokio::test]
async fn test_silence_only_produces_nothing() {
    let backend = Arc::new(MockGenerationBackend::new());
    let stt = Arc::new(MockSttProvider::new());
    let orchestrator = TurnOrchestrator::new(&AssistantConfig::default(), stt.clone(), backend.clone())
        .unwrap();
    let speech = Arc::new(MockSpeech::new());
    let mut voice_loop = VoiceLoop::from_config(&segmentation(), orchestrator, speech.clone());

    let (sender, receiver) = frame_channel(16);
    for _ in 0..10 {
        assert!(sender.offer(AudioFrame::silence(RATE, FRAME)));
    }
    drop(sender);

    let stats = voice_loop.run(receiver, CancellationToken::new()).await;
    assert_eq!(stats.frames, 10);
    assert_eq!(stats.utterances, 0);
    assert_eq!(stt.call_count(), 0);
    assert_eq!(backend.call_count(), 0);
    assert!(speech.spoken().is_empty());
}

#[tokio::test]
async fn test_failed_transcription_is_skipped_and_loop_continues() {
    let stt = Arc::new(MockSttProvider::new());
    stt.queue_error("service unavailable");
    stt.queue_text("second try");
    let backend = Arc::new(MockGenerationBackend::with_response("Got it."));
    let orchestrator = TurnOrchestrator::new(&AssistantConfig::default(), stt, backend)
        .unwrap()
        .with_actionable(Arc::new(MockClassifier::fixed("actionable", true)))
        .with_contextable(Arc::new(MockClassifier::fixed("contextable", false)));
    let speech = Arc::new(MockSpeech::new());
    let mut voice_loop = VoiceLoop::from_config(&segmentation(), orchestrator, speech.clone());

    let start = Instant::now();
    let loud = || AudioFrame::constant(0.5, RATE, FRAME);
    let quiet = || AudioFrame::silence(RATE, FRAME);

    assert!(voice_loop.process_frame(loud(), start).await.is_none());
    assert!(
        voice_loop
            .process_frame(quiet(), start + Duration::from_millis(1200))
            .await
            .is_none()
    );
    assert_eq!(voice_loop.stats().aborted, 1);

    assert!(
        voice_loop
            .process_frame(loud(), start + Duration::from_millis(1300))
            .await
            .is_none()
    );
    let outcome = voice_loop
        .process_frame(quiet(), start + Duration::from_millis(2400))
        .await
        .unwrap();
    assert_eq!(outcome.user_text, "second try");
    assert_eq!(speech.spoken(), vec!["Got it.".to_string()]);
    assert_eq!(voice_loop.orchestrator().memory().len(), 1);
}

#[tokio::test]
async fn test_synthesized_speech_receives_cleaned_response() {
    let backend = Arc::new(MockGenerationBackend::with_response(
        "**Note**: see Dr. Smith, e.g. tomorrow.",
    ));
    let tts = Arc::new(MockTtsProvider::new());
    let speech = Arc::new(SynthesizedSpeech::new(tts.clone()));
    let mut voice_loop = VoiceLoop::from_config(
        &segmentation(),
        orchestrator(&["who should I see"], backend),
        speech.clone(),
    );

    let (sender, receiver) = frame_channel(4);
    sender.send(AudioFrame::constant(0.5, RATE, FRAME)).await.unwrap();
    drop(sender);
    voice_loop.run(receiver, CancellationToken::new()).await;

    assert_eq!(speech.rendered(), 1);
    let requests = tts.requests();
    assert_eq!(requests.len(), 1);
    assert_eq!(
        requests[0].text,
        "Note: see Doctor Smith, for example tomorrow."
    );
}
