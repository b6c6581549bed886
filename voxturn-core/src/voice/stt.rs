//! Speech-to-text providers.

use std::collections::VecDeque;
use std::sync::Mutex;
use std::sync::atomic::{AtomicUsize, Ordering};

use async_trait::async_trait;
use tracing::debug;

use super::audio_io::audio_convert;
use super::types::{TranscriptionResult, Utterance};
use crate::error::VoiceError;

#[async_trait]
pub trait SttProvider: Send + Sync {
    async fn transcribe(&self, utterance: &Utterance) -> Result<TranscriptionResult, VoiceError>;

    /// Provider name for logging.
    fn name(&self) -> &str;
}

/// Replays queued transcriptions. An empty queue is an error.
pub struct MockSttProvider {
    responses: Mutex<VecDeque<Result<TranscriptionResult, String>>>,
    call_count: AtomicUsize,
}

impl MockSttProvider {
    pub fn new() -> Self {
        Self {
            responses: Mutex::new(VecDeque::new()),
            call_count: AtomicUsize::new(0),
        }
    }

    /// A mock that transcribes successive utterances as `texts`.
    pub fn with_texts<I, S>(texts: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let mock = Self::new();
        for text in texts {
            mock.queue_text(text);
        }
        mock
    }

    pub fn queue_text(&self, text: impl Into<String>) {
        if let Ok(mut responses) = self.responses.lock() {
            responses.push_back(Ok(TranscriptionResult::text(text)));
        }
    }

    pub fn queue_error(&self, message: impl Into<String>) {
        if let Ok(mut responses) = self.responses.lock() {
            responses.push_back(Err(message.into()));
        }
    }

    pub fn call_count(&self) -> usize {
        self.call_count.load(Ordering::Relaxed)
    }
}

impl Default for MockSttProvider {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl SttProvider for MockSttProvider {
    async fn transcribe(&self, _utterance: &Utterance) -> Result<TranscriptionResult, VoiceError> {
        self.call_count.fetch_add(1, Ordering::Relaxed);
        let next = self
            .responses
            .lock()
            .ok()
            .and_then(|mut responses| responses.pop_front());
        match next {
            Some(Ok(result)) => Ok(result),
            Some(Err(message)) => Err(VoiceError::TranscriptionFailed { message }),
            None => Err(VoiceError::TranscriptionFailed {
                message: "no mock responses queued".into(),
            }),
        }
    }

    fn name(&self) -> &str {
        "mock"
    }
}

/// Whisper-style transcription over HTTP: the utterance is posted as a WAV
/// multipart upload.
pub struct OpenAiSttProvider {
    api_key: String,
    model: String,
    language: Option<String>,
    base_url: String,
    client: reqwest::Client,
}

impl OpenAiSttProvider {
    pub fn new(api_key: impl Into<String>) -> Self {
        Self {
            api_key: api_key.into(),
            model: "whisper-1".to_string(),
            language: None,
            base_url: "https://api.openai.com/v1".to_string(),
            client: reqwest::Client::new(),
        }
    }

    pub fn with_model(mut self, model: impl Into<String>) -> Self {
        self.model = model.into();
        self
    }

    pub fn with_language(mut self, language: impl Into<String>) -> Self {
        self.language = Some(language.into());
        self
    }

    pub fn with_base_url(mut self, url: impl Into<String>) -> Self {
        self.base_url = url.into().trim_end_matches('/').to_string();
        self
    }

    pub fn model(&self) -> &str {
        &self.model
    }

    pub fn endpoint(&self) -> String {
        format!("{}/audio/transcriptions", self.base_url)
    }

    /// Pull text, language and duration out of a `verbose_json` response.
    pub fn parse_response(json: &serde_json::Value) -> TranscriptionResult {
        TranscriptionResult {
            text: json["text"].as_str().unwrap_or("").trim().to_string(),
            confidence: 1.0,
            language: json["language"].as_str().map(str::to_string),
            duration_secs: json["duration"].as_f64().unwrap_or(0.0) as f32,
        }
    }
}

#[async_trait]
impl SttProvider for OpenAiSttProvider {
    async fn transcribe(&self, utterance: &Utterance) -> Result<TranscriptionResult, VoiceError> {
        if utterance.is_empty() {
            return Ok(TranscriptionResult::default());
        }

        let wav_bytes = audio_convert::encode_wav(&utterance.samples, utterance.sample_rate)?;
        debug!(
            bytes = wav_bytes.len(),
            duration_secs = utterance.duration_secs(),
            "Uploading utterance for transcription"
        );

        let part = reqwest::multipart::Part::bytes(wav_bytes)
            .file_name("utterance.wav")
            .mime_str("audio/wav")
            .map_err(|e| VoiceError::TranscriptionFailed {
                message: format!("MIME error: {e}"),
            })?;
        let mut form = reqwest::multipart::Form::new()
            .part("file", part)
            .text("model", self.model.clone())
            .text("response_format", "verbose_json");
        if let Some(language) = &self.language {
            form = form.text("language", language.clone());
        }

        let response = self
            .client
            .post(self.endpoint())
            .bearer_auth(&self.api_key)
            .multipart(form)
            .send()
            .await
            .map_err(|e| VoiceError::TranscriptionFailed {
                message: format!("HTTP request failed: {e}"),
            })?;

        if !response.status().is_success() {
            let status = response.status();
            let body = response.text().await.unwrap_or_default();
            return Err(VoiceError::TranscriptionFailed {
                message: format!("API returned {status}: {body}"),
            });
        }

        let json: serde_json::Value =
            response
                .json()
                .await
                .map_err(|e| VoiceError::TranscriptionFailed {
                    message: format!("JSON parse error: {e}"),
                })?;
        Ok(Self::parse_response(&json))
    }

    fn name(&self) -> &str {
        "openai"
    }
}
