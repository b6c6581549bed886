//! Actionable / contextable gates.
//!
//! A [`Classifier`] gives a binary verdict with a confidence for one
//! utterance. The orchestrator runs two of them per turn: one deciding
//! whether the utterance asks for something, one deciding whether it is
//! worth keeping in long-term context.

use std::collections::VecDeque;
use std::sync::Mutex;
use std::sync::atomic::{AtomicUsize, Ordering};

use async_trait::async_trait;

use crate::config::GatingConfig;
use crate::error::ClassifierError;
use crate::types::Classification;

#[async_trait]
pub trait Classifier: Send + Sync {
    async fn classify(&self, text: &str) -> Result<Classification, ClassifierError>;

    fn name(&self) -> &str;
}

/// Scores an utterance by how many of its keywords it contains.
///
/// Keywords match on whole words (multi-word keywords on whole phrases). The
/// confidence is `matched / saturation`, clamped to 1.0, and the verdict is
/// positive once it reaches the threshold.
#[derive(Debug, Clone)]
pub struct KeywordClassifier {
    name: String,
    positive_label: String,
    negative_label: String,
    keywords: Vec<String>,
    threshold: f32,
    saturation: usize,
}

impl KeywordClassifier {
    pub fn new(name: impl Into<String>, keywords: Vec<String>, threshold: f32) -> Self {
        Self {
            name: name.into(),
            positive_label: "positive".to_string(),
            negative_label: "negative".to_string(),
            keywords: keywords.into_iter().map(|k| k.to_lowercase()).collect(),
            threshold,
            saturation: 2,
        }
    }

    pub fn with_labels(mut self, positive: impl Into<String>, negative: impl Into<String>) -> Self {
        self.positive_label = positive.into();
        self.negative_label = negative.into();
        self
    }

    /// Number of matches that yields full confidence.
    pub fn with_saturation(mut self, saturation: usize) -> Self {
        self.saturation = saturation.max(1);
        self
    }

    pub fn actionable(config: &GatingConfig) -> Self {
        Self::new(
            "actionable",
            config.actionable_keywords.clone(),
            config.threshold,
        )
        .with_labels("Actionable", "Non-actionable")
    }

    pub fn contextable(config: &GatingConfig) -> Self {
        Self::new(
            "contextable",
            config.contextable_keywords.clone(),
            config.threshold,
        )
        .with_labels("Contextable", "Non-contextable")
    }

    fn score(&self, text: &str) -> f32 {
        if self.keywords.is_empty() {
            return 0.0;
        }
        let normalized = normalize(text);
        let matched = self
            .keywords
            .iter()
            .filter(|kw| normalized.contains(&format!(" {kw} ")))
            .count();
        (matched as f32 / self.saturation as f32).clamp(0.0, 1.0)
    }
}

/// Lowercased words separated by single spaces, padded on both ends so a
/// keyword can be matched as ` word `.
fn normalize(text: &str) -> String {
    let lower = text.to_lowercase();
    let words: Vec<&str> = lower
        .split(|c: char| !(c.is_alphanumeric() || c == '\''))
        .filter(|w| !w.is_empty())
        .collect();
    format!(" {} ", words.join(" "))
}

#[async_trait]
impl Classifier for KeywordClassifier {
    async fn classify(&self, text: &str) -> Result<Classification, ClassifierError> {
        let confidence = self.score(text);
        if confidence >= self.threshold && confidence > 0.0 {
            Ok(Classification::positive(&self.positive_label, confidence))
        } else {
            Ok(Classification::negative(
                &self.negative_label,
                1.0 - confidence,
            ))
        }
    }

    fn name(&self) -> &str {
        &self.name
    }
}

/// A classifier with scripted verdicts, for tests.
pub struct MockClassifier {
    name: String,
    default: Result<Classification, String>,
    queued: Mutex<VecDeque<Result<Classification, String>>>,
    inputs: Mutex<Vec<String>>,
    call_count: AtomicUsize,
}

impl MockClassifier {
    /// Always answers `positive` with full confidence.
    pub fn fixed(name: impl Into<String>, positive: bool) -> Self {
        let verdict = if positive {
            Classification::positive("positive", 1.0)
        } else {
            Classification::negative("negative", 1.0)
        };
        Self::with_default(name, Ok(verdict))
    }

    /// Always fails.
    pub fn failing(name: impl Into<String>, message: impl Into<String>) -> Self {
        Self::with_default(name, Err(message.into()))
    }

    fn with_default(name: impl Into<String>, default: Result<Classification, String>) -> Self {
        Self {
            name: name.into(),
            default,
            queued: Mutex::new(VecDeque::new()),
            inputs: Mutex::new(Vec::new()),
            call_count: AtomicUsize::new(0),
        }
    }

    /// Answer the next call with `verdict` instead of the default.
    pub fn queue(&self, verdict: Classification) {
        if let Ok(mut queued) = self.queued.lock() {
            queued.push_back(Ok(verdict));
        }
    }

    pub fn call_count(&self) -> usize {
        self.call_count.load(Ordering::SeqCst)
    }

    pub fn inputs(&self) -> Vec<String> {
        self.inputs.lock().map(|i| i.clone()).unwrap_or_default()
    }
}

#[async_trait]
impl Classifier for MockClassifier {
    async fn classify(&self, text: &str) -> Result<Classification, ClassifierError> {
        self.call_count.fetch_add(1, Ordering::SeqCst);
        if let Ok(mut inputs) = self.inputs.lock() {
            inputs.push(text.to_string());
        }
        let verdict = self
            .queued
            .lock()
            .ok()
            .and_then(|mut q| q.pop_front())
            .unwrap_or_else(|| self.default.clone());
        verdict.map_err(|message| ClassifierError::Failed { message })
    }

    fn name(&self) -> &str {
        &self.name
    }
}
