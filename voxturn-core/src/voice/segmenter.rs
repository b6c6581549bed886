//! Speech segmentation: turns a stream of frames plus activity verdicts into
//! discrete utterances.
//!
//! Two states. `Idle` waits for the first speech frame. `Active` buffers
//! speech frames and closes the utterance once no speech has been seen for
//! longer than the hangover. Silent frames inside the hangover window are
//! neither buffered nor extend it. The observation instant is passed in, so
//! the machine is independent of how frames are delivered.

use std::time::{Duration, Instant};

use tracing::{debug, trace};

use super::types::{AudioFrame, Utterance};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SegmenterState {
    Idle,
    Active,
}

#[derive(Debug)]
pub struct SpeechSegmenter {
    state: SegmenterState,
    buffer: Vec<AudioFrame>,
    last_speech: Option<Instant>,
    hangover: Duration,
}

impl SpeechSegmenter {
    pub fn new(hangover: Duration) -> Self {
        Self {
            state: SegmenterState::Idle,
            buffer: Vec::new(),
            last_speech: None,
            hangover,
        }
    }

    /// Feed one frame with its activity verdict, observed at `now`.
    ///
    /// Returns the finished utterance when this frame closes one.
    pub fn push(&mut self, frame: AudioFrame, active: bool, now: Instant) -> Option<Utterance> {
        match (self.state, active) {
            (SegmenterState::Idle, true) => {
                debug!("Speech started");
                self.state = SegmenterState::Active;
                self.buffer.push(frame);
                self.last_speech = Some(now);
                None
            }
            (SegmenterState::Idle, false) => None,
            (SegmenterState::Active, true) => {
                self.buffer.push(frame);
                self.last_speech = Some(now);
                None
            }
            (SegmenterState::Active, false) => {
                let silent_for = self
                    .last_speech
                    .map(|t| now.saturating_duration_since(t))
                    .unwrap_or_default();
                if silent_for > self.hangover {
                    self.finish()
                } else {
                    trace!(silent_ms = silent_for.as_millis() as u64, "Within hangover");
                    None
                }
            }
        }
    }

    fn finish(&mut self) -> Option<Utterance> {
        self.state = SegmenterState::Idle;
        self.last_speech = None;
        let utterance = Utterance::from_frames(std::mem::take(&mut self.buffer));
        if let Some(u) = &utterance {
            debug!(
                frames = u.frame_count,
                duration_secs = u.duration_secs(),
                "Speech ended"
            );
        }
        utterance
    }

    /// Close the current utterance without waiting for the hangover. Used
    /// when the frame source ends.
    pub fn flush(&mut self) -> Option<Utterance> {
        match self.state {
            SegmenterState::Active => self.finish(),
            SegmenterState::Idle => None,
        }
    }

    /// Drop any buffered audio and return to `Idle`.
    pub fn reset(&mut self) {
        self.state = SegmenterState::Idle;
        self.buffer.clear();
        self.last_speech = None;
    }

    pub fn state(&self) -> SegmenterState {
        self.state
    }

    pub fn buffered_samples(&self) -> usize {
        self.buffer.iter().map(|f| f.samples.len()).sum()
    }

    pub fn hangover(&self) -> Duration {
        self.hangover
    }
}

impl Default for SpeechSegmenter {
    fn default() -> Self {
        Self::new(Duration::from_secs(1))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn frame(marker: f32) -> AudioFrame {
        AudioFrame::constant(marker, 16_000, 4)
    }

    fn at(start: Instant, ms: u64) -> Instant {
        start + Duration::from_millis(ms)
    }

    #[test]
    fn test_idle_ignores_silence() {
        let start = Instant::now();
        let mut seg = SpeechSegmenter::default();
        assert!(seg.push(frame(0.0), false, start).is_none());
        assert_eq!(seg.state(), SegmenterState::Idle);
        assert_eq!(seg.buffered_samples(), 0);
    }

    #[test]
    fn test_utterance_closes_after_hangover() {
        let start = Instant::now();
        let mut seg = SpeechSegmenter::new(Duration::from_millis(1000));

        assert!(seg.push(frame(0.1), true, at(start, 0)).is_none());
        assert_eq!(seg.state(), SegmenterState::Active);
        assert!(seg.push(frame(0.2), true, at(start, 500)).is_none());
        // Silent, inside the hangover: not buffered
        assert!(seg.push(frame(0.0), false, at(start, 1000)).is_none());
        assert_eq!(seg.buffered_samples(), 8);
        // Exactly at the hangover is not past it
        assert!(seg.push(frame(0.0), false, at(start, 1500)).is_none());

        let utterance = seg.push(frame(0.0), false, at(start, 1501)).unwrap();
        assert_eq!(utterance.frame_count, 2);
        assert_eq!(utterance.samples[0], 0.1);
        assert_eq!(utterance.samples[4], 0.2);
        assert_eq!(seg.state(), SegmenterState::Idle);
        assert_eq!(seg.buffered_samples(), 0);
    }

    #[test]
    fn test_short_pause_keeps_one_utterance() {
        let start = Instant::now();
        let mut seg = SpeechSegmenter::new(Duration::from_millis(1000));
        let mut emitted = Vec::new();

        let script = [
            (0, true),
            (500, false),
            (1000, true),
            (1500, false),
            (2000, true),
            (3500, false),
        ];
        for (ms, active) in script {
            if let Some(u) = seg.push(frame(0.3), active, at(start, ms)) {
                emitted.push(u);
            }
        }
        assert_eq!(emitted.len(), 1);
        assert_eq!(emitted[0].frame_count, 3);
    }

    #[test]
    fn test_flush_closes_active_utterance() {
        let start = Instant::now();
        let mut seg = SpeechSegmenter::default();
        assert!(seg.flush().is_none());
        seg.push(frame(0.5), true, start);
        let utterance = seg.flush().unwrap();
        assert_eq!(utterance.frame_count, 1);
        assert_eq!(seg.state(), SegmenterState::Idle);
    }

    #[test]
    fn test_reset_drops_buffer() {
        let start = Instant::now();
        let mut seg = SpeechSegmenter::default();
        seg.push(frame(0.4), true, start);
        seg.reset();
        assert_eq!(seg.state(), SegmenterState::Idle);
        assert_eq!(seg.buffered_samples(), 0);
        assert!(seg.push(frame(0.0), false, at(start, 5000)).is_none());
    }
}
