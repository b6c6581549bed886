//! Speaking responses back to the user.

use std::path::PathBuf;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use tokio::io::AsyncWriteExt;
use tracing::{debug, info};

use super::audio_io::audio_convert;
use super::tts::TtsProvider;
use super::types::SynthesisRequest;
use crate::config::SpeechConfig;
use crate::error::VoiceError;

#[async_trait]
pub trait SpeechOutput: Send + Sync {
    /// Speak `text`. Implementations clean it with [`clean_for_speech`] first.
    async fn speak(&self, text: &str) -> Result<(), VoiceError>;
}

const ABBREVIATIONS: &[(&str, &str)] = &[
    ("e.g.", "for example"),
    ("i.e.", "that is"),
    ("etc.", "and so on"),
    ("vs.", "versus"),
    ("Dr.", "Doctor"),
    ("Mrs.", "Misses"),
    ("Mr.", "Mister"),
    ("Ms.", "Miss"),
];

/// Make generated text pleasant to read aloud: markdown emphasis and heading
/// symbols go, underscores become spaces, common abbreviations are spelled
/// out and whitespace is collapsed.
pub fn clean_for_speech(text: &str) -> String {
    let mut cleaned = text.replace(['*', '#'], "").replace('_', " ");
    for (abbrev, full) in ABBREVIATIONS {
        cleaned = cleaned.replace(abbrev, full);
    }
    cleaned.split_whitespace().collect::<Vec<_>>().join(" ")
}

/// Writes responses to stdout.
pub struct ConsoleSpeech {
    prefix: String,
}

impl ConsoleSpeech {
    pub fn new() -> Self {
        Self {
            prefix: "Assistant: ".to_string(),
        }
    }

    pub fn with_prefix(mut self, prefix: impl Into<String>) -> Self {
        self.prefix = prefix.into();
        self
    }
}

impl Default for ConsoleSpeech {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl SpeechOutput for ConsoleSpeech {
    async fn speak(&self, text: &str) -> Result<(), VoiceError> {
        let cleaned = clean_for_speech(text);
        if cleaned.is_empty() {
            return Ok(());
        }
        let mut stdout = tokio::io::stdout();
        let line = format!("{}{}\n", self.prefix, cleaned);
        stdout
            .write_all(line.as_bytes())
            .await
            .map_err(|e| VoiceError::AudioDevice {
                message: format!("stdout write failed: {e}"),
            })?;
        stdout.flush().await.map_err(|e| VoiceError::AudioDevice {
            message: format!("stdout flush failed: {e}"),
        })
    }
}

/// Synthesizes responses through a [`TtsProvider`], optionally keeping each
/// rendering as a WAV file.
pub struct SynthesizedSpeech {
    provider: Arc<dyn TtsProvider>,
    voice: Option<String>,
    speed: f32,
    dump_dir: Option<PathBuf>,
    rendered: AtomicUsize,
}

impl SynthesizedSpeech {
    pub fn new(provider: Arc<dyn TtsProvider>) -> Self {
        Self {
            provider,
            voice: None,
            speed: 1.0,
            dump_dir: None,
            rendered: AtomicUsize::new(0),
        }
    }

    pub fn from_config(provider: Arc<dyn TtsProvider>, config: &SpeechConfig) -> Self {
        let mut speech = Self::new(provider)
            .with_voice(config.voice.clone())
            .with_speed(config.speed);
        if let Some(dir) = &config.dump_dir {
            speech = speech.with_dump_dir(dir.clone());
        }
        speech
    }

    pub fn with_voice(mut self, voice: impl Into<String>) -> Self {
        self.voice = Some(voice.into());
        self
    }

    pub fn with_speed(mut self, speed: f32) -> Self {
        self.speed = speed;
        self
    }

    pub fn with_dump_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.dump_dir = Some(dir.into());
        self
    }

    /// Number of responses synthesized so far.
    pub fn rendered(&self) -> usize {
        self.rendered.load(Ordering::Relaxed)
    }
}

#[async_trait]
impl SpeechOutput for SynthesizedSpeech {
    async fn speak(&self, text: &str) -> Result<(), VoiceError> {
        let cleaned = clean_for_speech(text);
        if cleaned.is_empty() {
            return Ok(());
        }
        let mut request = SynthesisRequest::new(cleaned).with_speed(self.speed);
        if let Some(voice) = &self.voice {
            request = request.with_voice(voice.clone());
        }

        let result = self.provider.synthesize(&request).await?;
        let index = self.rendered.fetch_add(1, Ordering::Relaxed) + 1;
        debug!(
            provider = self.provider.name(),
            characters = result.characters_used,
            duration_secs = result.duration_secs,
            "Synthesized response"
        );

        if let Some(dir) = &self.dump_dir {
            let wav = audio_convert::encode_wav(&result.samples, result.sample_rate)?;
            let path = dir.join(format!(
                "response-{}-{index:04}.wav",
                chrono::Utc::now().format("%Y%m%dT%H%M%S")
            ));
            let write_failed = |e: std::io::Error| VoiceError::SynthesisFailed {
                message: format!("could not write {}: {e}", path.display()),
            };
            tokio::fs::create_dir_all(dir).await.map_err(write_failed)?;
            tokio::fs::write(&path, wav).await.map_err(write_failed)?;
            info!(path = %path.display(), "Saved synthesized response");
        }
        Ok(())
    }
}

/// Records what would have been spoken.
#[derive(Default)]
pub struct MockSpeech {
    spoken: Mutex<Vec<String>>,
}

impl MockSpeech {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn spoken(&self) -> Vec<String> {
        self.spoken.lock().map(|s| s.clone()).unwrap_or_default()
    }
}

#[async_trait]
impl SpeechOutput for MockSpeech {
    async fn speak(&self, text: &str) -> Result<(), VoiceError> {
        if let Ok(mut spoken) = self.spoken.lock() {
            spoken.push(clean_for_speech(text));
        }
        Ok(())
    }
}
