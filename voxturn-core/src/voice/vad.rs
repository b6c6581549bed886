//! Voice activity detection: a per-frame speech / no-speech verdict.

use super::types::AudioFrame;

/// Decides whether a frame contains speech. Stateful detectors may smooth
/// over recent frames, hence `&mut self`.
pub trait ActivityDetector: Send {
    fn detect(&mut self, frame: &AudioFrame) -> bool;

    /// Forget any smoothing history.
    fn reset(&mut self) {}
}

/// RMS energy thresholding with a moving-average smoothing window.
#[derive(Debug, Clone)]
pub struct EnergyVad {
    threshold: f32,
    energy_history: Vec<f32>,
    history_size: usize,
}

impl EnergyVad {
    /// A detector that reports speech when the average RMS energy of the last
    /// `history_size` frames exceeds `threshold`.
    pub fn new(threshold: f32, history_size: usize) -> Self {
        let history_size = history_size.max(1);
        Self {
            threshold,
            energy_history: Vec::with_capacity(history_size),
            history_size,
        }
    }

    /// Average energy over recent history.
    pub fn current_energy(&self) -> f32 {
        if self.energy_history.is_empty() {
            return 0.0;
        }
        self.energy_history.iter().sum::<f32>() / self.energy_history.len() as f32
    }

    pub fn threshold(&self) -> f32 {
        self.threshold
    }
}

impl ActivityDetector for EnergyVad {
    fn detect(&mut self, frame: &AudioFrame) -> bool {
        if self.energy_history.len() >= self.history_size {
            self.energy_history.remove(0);
        }
        self.energy_history.push(frame.rms_energy());
        self.current_energy() > self.threshold
    }

    fn reset(&mut self) {
        self.energy_history.clear();
    }
}

/// Replays a fixed sequence of verdicts, then reports silence.
#[derive(Debug, Clone, Default)]
pub struct ScriptedDetector {
    verdicts: std::collections::VecDeque<bool>,
}

impl ScriptedDetector {
    pub fn new(verdicts: impl IntoIterator<Item = bool>) -> Self {
        Self {
            verdicts: verdicts.into_iter().collect(),
        }
    }
}

impl ActivityDetector for ScriptedDetector {
    fn detect(&mut self, _frame: &AudioFrame) -> bool {
        self.verdicts.pop_front().unwrap_or(false)
    }
}
