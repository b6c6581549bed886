//! The voice loop: frames in, spoken responses out.
//!
//! A single consumer drains the frame queue, runs activity detection and
//! segmentation on each frame, and hands every finished utterance to the
//! orchestrator before pulling the next frame. Turns never overlap.

use std::sync::Arc;
use std::time::{Duration, Instant};

use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use super::segmenter::SpeechSegmenter;
use super::speech::SpeechOutput;
use super::types::{AudioFrame, Utterance};
use super::vad::{ActivityDetector, EnergyVad};
use crate::config::SegmentationConfig;
use crate::error::TurnAborted;
use crate::orchestrator::TurnOrchestrator;
use crate::types::TurnOutcome;

/// Events emitted by the voice loop.
#[derive(Debug, Clone, PartialEq)]
pub enum VoiceLoopEvent {
    /// An utterance was closed and is being processed.
    UtteranceReady { duration_secs: f32 },
    TurnCompleted(TurnOutcome),
    TurnAborted(TurnAborted),
    /// The response could not be spoken.
    SpeechFailed { message: String },
}

/// Counters reported when the loop stops.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct LoopStats {
    pub frames: u64,
    pub utterances: u64,
    pub turns: u64,
    pub aborted: u64,
}

pub struct VoiceLoop {
    orchestrator: TurnOrchestrator,
    detector: Box<dyn ActivityDetector>,
    segmenter: SpeechSegmenter,
    speech: Arc<dyn SpeechOutput>,
    events: Option<mpsc::UnboundedSender<VoiceLoopEvent>>,
    stats: LoopStats,
}

impl VoiceLoop {
    pub fn new(
        orchestrator: TurnOrchestrator,
        detector: Box<dyn ActivityDetector>,
        segmenter: SpeechSegmenter,
        speech: Arc<dyn SpeechOutput>,
    ) -> Self {
        Self {
            orchestrator,
            detector,
            segmenter,
            speech,
            events: None,
            stats: LoopStats::default(),
        }
    }

    /// An energy-threshold detector and a segmenter with the configured
    /// hangover.
    pub fn from_config(
        config: &SegmentationConfig,
        orchestrator: TurnOrchestrator,
        speech: Arc<dyn SpeechOutput>,
    ) -> Self {
        let detector = EnergyVad::new(config.vad_threshold, config.vad_smoothing_frames);
        let hangover = Duration::from_secs_f32(config.hangover_secs.max(0.0));
        Self::new(
            orchestrator,
            Box::new(detector),
            SpeechSegmenter::new(hangover),
            speech,
        )
    }

    /// Receive a [`VoiceLoopEvent`] for every utterance and turn.
    pub fn with_events(mut self, events: mpsc::UnboundedSender<VoiceLoopEvent>) -> Self {
        self.events = Some(events);
        self
    }

    pub fn orchestrator(&self) -> &TurnOrchestrator {
        &self.orchestrator
    }

    pub fn orchestrator_mut(&mut self) -> &mut TurnOrchestrator {
        &mut self.orchestrator
    }

    pub fn stats(&self) -> LoopStats {
        self.stats
    }

    /// Drain `frames` until the queue closes or `cancel` fires.
    ///
    /// When the queue closes, a pending utterance is still processed. On
    /// cancellation buffered audio is dropped.
    pub async fn run(
        &mut self,
        mut frames: mpsc::Receiver<AudioFrame>,
        cancel: CancellationToken,
    ) -> LoopStats {
        info!("Voice loop started");
        loop {
            tokio::select! {
                biased;
                _ = cancel.cancelled() => {
                    let dropped = self.segmenter.buffered_samples();
                    self.segmenter.reset();
                    self.detector.reset();
                    info!(dropped_samples = dropped, "Voice loop interrupted");
                    break;
                }
                frame = frames.recv() => match frame {
                    Some(frame) => {
                        self.process_frame(frame, Instant::now()).await;
                    }
                    None => {
                        if let Some(utterance) = self.segmenter.flush() {
                            self.handle_utterance(utterance).await;
                        }
                        debug!("Frame source closed");
                        break;
                    }
                },
            }
        }
        info!(
            frames = self.stats.frames,
            utterances = self.stats.utterances,
            turns = self.stats.turns,
            "Voice loop stopped"
        );
        self.stats
    }

    /// Feed one frame observed at `now`. Returns the outcome of the turn it
    /// completed, if any.
    pub async fn process_frame(&mut self, frame: AudioFrame, now: Instant) -> Option<TurnOutcome> {
        self.stats.frames += 1;
        let active = self.detector.detect(&frame);
        let utterance = self.segmenter.push(frame, active, now)?;
        self.handle_utterance(utterance).await
    }

    async fn handle_utterance(&mut self, utterance: Utterance) -> Option<TurnOutcome> {
        self.stats.utterances += 1;
        self.emit(VoiceLoopEvent::UtteranceReady {
            duration_secs: utterance.duration_secs(),
        });

        match self.orchestrator.on_utterance(&utterance).await {
            Ok(outcome) => {
                self.stats.turns += 1;
                info!(
                    response = %outcome.response,
                    degraded = outcome.is_degraded(),
                    "Turn completed"
                );
                if let Err(e) = self.speech.speak(&outcome.response).await {
                    warn!(error = %e, "Failed to speak response");
                    self.emit(VoiceLoopEvent::SpeechFailed {
                        message: e.to_string(),
                    });
                }
                self.emit(VoiceLoopEvent::TurnCompleted(outcome.clone()));
                Some(outcome)
            }
            Err(reason) => {
                self.stats.aborted += 1;
                debug!(reason = %reason, "Turn aborted");
                self.emit(VoiceLoopEvent::TurnAborted(reason));
                None
            }
        }
    }

    fn emit(&self, event: VoiceLoopEvent) {
        if let Some(events) = &self.events {
            let _ = events.send(event);
        }
    }
}
