//! Text-to-speech providers.

use std::sync::Mutex;
use std::sync::atomic::{AtomicUsize, Ordering};

use async_trait::async_trait;

use super::audio_io::audio_convert;
use super::types::{SynthesisRequest, SynthesisResult};
use crate::error::VoiceError;

#[async_trait]
pub trait TtsProvider: Send + Sync {
    async fn synthesize(&self, request: &SynthesisRequest) -> Result<SynthesisResult, VoiceError>;

    fn name(&self) -> &str;
}

/// Generates a quiet 440 Hz tone whose length follows the text length.
pub struct MockTtsProvider {
    call_count: AtomicUsize,
    requests: Mutex<Vec<SynthesisRequest>>,
    fail: bool,
}

impl MockTtsProvider {
    pub fn new() -> Self {
        Self {
            call_count: AtomicUsize::new(0),
            requests: Mutex::new(Vec::new()),
            fail: false,
        }
    }

    /// A provider whose every synthesis fails.
    pub fn failing() -> Self {
        Self {
            fail: true,
            ..Self::new()
        }
    }

    pub fn call_count(&self) -> usize {
        self.call_count.load(Ordering::Relaxed)
    }

    pub fn requests(&self) -> Vec<SynthesisRequest> {
        self.requests.lock().map(|r| r.clone()).unwrap_or_default()
    }
}

impl Default for MockTtsProvider {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl TtsProvider for MockTtsProvider {
    async fn synthesize(&self, request: &SynthesisRequest) -> Result<SynthesisResult, VoiceError> {
        self.call_count.fetch_add(1, Ordering::Relaxed);
        if let Ok(mut requests) = self.requests.lock() {
            requests.push(request.clone());
        }
        if self.fail {
            return Err(VoiceError::SynthesisFailed {
                message: "mock synthesis failure".into(),
            });
        }

        let sample_rate = 16_000u32;
        let duration_secs =
            (request.text.chars().count() as f32 * 0.05).max(0.1) / request.speed.max(0.1);
        let num_samples = (sample_rate as f32 * duration_secs) as usize;
        let samples = (0..num_samples)
            .map(|i| {
                let t = i as f32 / sample_rate as f32;
                (2.0 * std::f32::consts::PI * 440.0 * t).sin() * 0.5
            })
            .collect();

        Ok(SynthesisResult {
            samples,
            sample_rate,
            duration_secs,
            characters_used: request.text.chars().count(),
        })
    }

    fn name(&self) -> &str {
        "mock"
    }
}

/// OpenAI-style `/audio/speech` synthesis returning WAV.
pub struct OpenAiTtsProvider {
    api_key: String,
    model: String,
    voice: String,
    base_url: String,
    client: reqwest::Client,
}

impl OpenAiTtsProvider {
    pub fn new(api_key: impl Into<String>) -> Self {
        Self {
            api_key: api_key.into(),
            model: "tts-1".to_string(),
            voice: "alloy".to_string(),
            base_url: "https://api.openai.com/v1".to_string(),
            client: reqwest::Client::new(),
        }
    }

    pub fn with_model(mut self, model: impl Into<String>) -> Self {
        self.model = model.into();
        self
    }

    /// Voice used when a request doesn't name one.
    pub fn with_voice(mut self, voice: impl Into<String>) -> Self {
        self.voice = voice.into();
        self
    }

    pub fn with_base_url(mut self, url: impl Into<String>) -> Self {
        self.base_url = url.into().trim_end_matches('/').to_string();
        self
    }

    pub fn endpoint(&self) -> String {
        format!("{}/audio/speech", self.base_url)
    }

    pub fn request_body(&self, request: &SynthesisRequest) -> serde_json::Value {
        serde_json::json!({
            "model": self.model,
            "input": request.text,
            "voice": request.voice.as_deref().unwrap_or(&self.voice),
            "speed": request.speed,
            "response_format": "wav",
        })
    }
}

#[async_trait]
impl TtsProvider for OpenAiTtsProvider {
    async fn synthesize(&self, request: &SynthesisRequest) -> Result<SynthesisResult, VoiceError> {
        let response = self
            .client
            .post(self.endpoint())
            .bearer_auth(&self.api_key)
            .json(&self.request_body(request))
            .send()
            .await
            .map_err(|e| VoiceError::SynthesisFailed {
                message: format!("HTTP request failed: {e}"),
            })?;

        if !response.status().is_success() {
            let status = response.status();
            let body = response.text().await.unwrap_or_default();
            return Err(VoiceError::SynthesisFailed {
                message: format!("API returned {status}: {body}"),
            });
        }

        let bytes = response
            .bytes()
            .await
            .map_err(|e| VoiceError::SynthesisFailed {
                message: format!("Failed to read response: {e}"),
            })?;
        let (samples, sample_rate) = audio_convert::decode_wav(&bytes)?;
        let duration_secs = if sample_rate == 0 {
            0.0
        } else {
            samples.len() as f32 / sample_rate as f32
        };

        Ok(SynthesisResult {
            samples,
            sample_rate,
            duration_secs,
            characters_used: request.text.chars().count(),
        })
    }

    fn name(&self) -> &str {
        "openai"
    }
}
