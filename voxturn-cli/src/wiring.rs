//! Builds the orchestrator and its collaborators from configuration.

use std::sync::Arc;

use anyhow::{Context, bail};
use tracing::{debug, info, warn};
use voxturn_core::config::{AssistantConfig, LlmConfig};
use voxturn_core::voice::{
    ConsoleSpeech, MockSttProvider, OpenAiSttProvider, OpenAiTtsProvider, SpeechOutput,
    SttProvider, SynthesizedSpeech,
};
use voxturn_core::{
    GenerationBackend, InMemoryRetrievalStore, MockGenerationBackend, OpenAiCompatibleBackend,
    RetrievalStore, TurnOrchestrator,
};

/// Whether the assistant will receive audio or typed text.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InputMode {
    Voice,
    Text,
}

/// Assemble a ready-to-run orchestrator.
pub fn build_orchestrator(
    config: &AssistantConfig,
    mode: InputMode,
) -> anyhow::Result<TurnOrchestrator> {
    for warning in config.llm.validate() {
        warn!("{}", warning);
    }

    let backend = build_backend(&config.llm)?;
    let stt = build_stt(&config.llm, mode)?;
    let mut orchestrator = TurnOrchestrator::new(config, stt, backend)
        .map_err(|e| anyhow::anyhow!("Invalid tool settings: {}", e))?;

    if let Some(store) = build_retrieval(config)? {
        orchestrator = orchestrator.with_retrieval(store);
    }

    if config.tools.enabled && config.tools.enable_builtins {
        voxturn_tools::register_builtin_tools(&mut orchestrator);
    }

    info!(
        provider = %config.llm.provider,
        model = %config.llm.model,
        tools = orchestrator.registry().len(),
        memory_turns = config.memory.max_turns,
        "Assistant ready"
    );
    Ok(orchestrator)
}

fn build_backend(llm: &LlmConfig) -> anyhow::Result<Arc<dyn GenerationBackend>> {
    match llm.provider.as_str() {
        "mock" => Ok(Arc::new(MockGenerationBackend::new())),
        "openai" | "openai-compatible" | "ollama" | "vllm" | "lmstudio" => {
            let backend = OpenAiCompatibleBackend::new(llm).with_context(|| {
                format!(
                    "Set {} or point llm.base_url at a local server",
                    llm.api_key_env
                )
            })?;
            Ok(Arc::new(backend))
        }
        other => bail!("Unknown LLM provider '{}'", other),
    }
}

fn build_stt(llm: &LlmConfig, mode: InputMode) -> anyhow::Result<Arc<dyn SttProvider>> {
    if llm.provider == "mock" {
        return Ok(Arc::new(MockSttProvider::new()));
    }
    let key = match (std::env::var(&llm.api_key_env).ok(), mode) {
        (Some(key), _) => key,
        (None, InputMode::Text) => {
            debug!("No transcription key; typed input bypasses transcription");
            String::new()
        }
        (None, InputMode::Voice) if is_local(llm) => "local".to_string(),
        (None, InputMode::Voice) => bail!(
            "Transcription needs an API key: set {}",
            llm.api_key_env
        ),
    };
    let mut provider = OpenAiSttProvider::new(key);
    if let Some(url) = &llm.base_url {
        provider = provider.with_base_url(url.clone());
    }
    Ok(Arc::new(provider))
}

fn build_retrieval(config: &AssistantConfig) -> anyhow::Result<Option<Arc<dyn RetrievalStore>>> {
    let retrieval = &config.retrieval;
    if !retrieval.enabled {
        return Ok(None);
    }
    let store: Arc<dyn RetrievalStore> = match &retrieval.persist_path {
        Some(path) => Arc::new(
            InMemoryRetrievalStore::with_persistence(retrieval.dimensions, path)
                .with_context(|| format!("Failed to open retrieval store {}", path.display()))?,
        ),
        None => Arc::new(InMemoryRetrievalStore::new(retrieval.dimensions)),
    };
    Ok(Some(store))
}

/// Where spoken responses go.
pub fn build_speech(config: &AssistantConfig) -> anyhow::Result<Arc<dyn SpeechOutput>> {
    match config.speech.provider.as_str() {
        "console" => Ok(Arc::new(ConsoleSpeech::new())),
        "openai" => {
            let key = std::env::var(&config.llm.api_key_env).with_context(|| {
                format!("Speech synthesis needs {}", config.llm.api_key_env)
            })?;
            let mut tts = OpenAiTtsProvider::new(key).with_voice(config.speech.voice.clone());
            if let Some(url) = &config.llm.base_url {
                tts = tts.with_base_url(url.clone());
            }
            Ok(Arc::new(SynthesizedSpeech::from_config(
                Arc::new(tts),
                &config.speech,
            )))
        }
        other => bail!("Unknown speech provider '{}'", other),
    }
}

fn is_local(llm: &LlmConfig) -> bool {
    llm.base_url
        .as_ref()
        .is_some_and(|u| u.contains("localhost") || u.contains("127.0.0.1"))
}
