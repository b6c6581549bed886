//! The `listen` command: audio in, spoken answers out.

use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use anyhow::Context;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};
use voxturn_core::TurnOrchestrator;
use voxturn_core::config::AssistantConfig;
use voxturn_core::voice::{
    AudioFrame, FrameSender, LoopStats, SpeechOutput, VoiceLoop, VoiceLoopEvent, frame_channel,
    frames_from_wav,
};

/// Run the voice loop until the audio source ends or Ctrl-C is pressed.
pub async fn run_listen(
    config: &AssistantConfig,
    orchestrator: TurnOrchestrator,
    speech: Arc<dyn SpeechOutput>,
    file: Option<&Path>,
) -> anyhow::Result<LoopStats> {
    let cancel = CancellationToken::new();
    let interrupt = cancel.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            info!("Interrupted, stopping voice loop");
            interrupt.cancel();
        }
    });

    let (sender, frames) = frame_channel(config.audio.queue_capacity);
    let (events_tx, events_rx) = mpsc::unbounded_channel();
    let printer = tokio::spawn(print_events(events_rx));
    let mut voice_loop =
        VoiceLoop::from_config(&config.segmentation, orchestrator, speech).with_events(events_tx);

    let stats = match file {
        Some(path) => {
            let data = tokio::fs::read(path)
                .await
                .with_context(|| format!("Failed to read {}", path.display()))?;
            let audio = frames_from_wav(&data, config.audio.frame_samples(), config.audio.sample_rate)
                .with_context(|| format!("Failed to decode {}", path.display()))?;
            info!(path = %path.display(), frames = audio.len(), "Playing audio file");
            let pace = Duration::from_secs_f32(config.audio.block_duration_secs.max(0.001));
            tokio::spawn(feed_frames(audio, sender, pace, cancel.clone()));
            voice_loop.run(frames, cancel).await
        }
        None => run_microphone(config, &mut voice_loop, sender, frames, cancel).await?,
    };

    drop(voice_loop);
    let _ = printer.await;
    println!(
        "Processed {} utterance(s): {} answered, {} dropped.",
        stats.utterances, stats.turns, stats.aborted
    );
    Ok(stats)
}

#[cfg(feature = "voice")]
async fn run_microphone(
    config: &AssistantConfig,
    voice_loop: &mut VoiceLoop,
    sender: FrameSender,
    frames: mpsc::Receiver<AudioFrame>,
    cancel: CancellationToken,
) -> anyhow::Result<LoopStats> {
    use voxturn_core::voice::MicrophoneCapture;

    let capture = MicrophoneCapture::start(&config.audio, sender)
        .map_err(|e| anyhow::anyhow!("Failed to open microphone: {}", e))?;
    println!("Listening on '{}'. Press Ctrl-C to stop.", capture.device_name());
    let stats = voice_loop.run(frames, cancel).await;
    drop(capture);
    Ok(stats)
}

#[cfg(not(feature = "voice"))]
async fn run_microphone(
    _config: &AssistantConfig,
    _voice_loop: &mut VoiceLoop,
    _sender: FrameSender,
    _frames: mpsc::Receiver<AudioFrame>,
    _cancel: CancellationToken,
) -> anyhow::Result<LoopStats> {
    anyhow::bail!(
        "Microphone capture requires the 'voice' feature. \
         Rebuild with --features voice, or pass --file <WAV>."
    )
}

/// Deliver frames at the rate a microphone would, so hangover timing
/// behaves as it does live. Dropping the sender closes the queue.
async fn feed_frames(
    frames: Vec<AudioFrame>,
    sender: FrameSender,
    pace: Duration,
    cancel: CancellationToken,
) {
    let mut ticker = tokio::time::interval(pace);
    for frame in frames {
        tokio::select! {
            biased;
            _ = cancel.cancelled() => return,
            _ = ticker.tick() => {}
        }
        if let Err(e) = sender.send(frame).await {
            warn!(error = %e, "Voice loop stopped before the file ended");
            return;
        }
    }
}

async fn print_events(mut events: mpsc::UnboundedReceiver<VoiceLoopEvent>) {
    while let Some(event) = events.recv().await {
        match event {
            VoiceLoopEvent::UtteranceReady { duration_secs } => {
                info!(duration_secs, "Heard an utterance");
            }
            VoiceLoopEvent::TurnCompleted(outcome) => {
                println!("You: {}", outcome.user_text);
            }
            VoiceLoopEvent::TurnAborted(reason) => {
                info!(%reason, "Utterance dropped");
            }
            VoiceLoopEvent::SpeechFailed { message } => {
                eprintln!("Could not speak the response: {message}");
            }
        }
    }
}
