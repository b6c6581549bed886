//! The turn orchestrator: one utterance in, one speech-ready response out.
//!
//! Each turn runs strictly in sequence: transcribe, check for the reset
//! command, guard against refusal loops, gate, retrieve, generate, decode and
//! dispatch any tool call, remember the turn, and index contextable input.
//! Collaborator failures degrade the affected step to a fixed fallback and
//! are recorded on the outcome. Only transcription can abort a turn.

use std::sync::Arc;

use serde_json::{Map, Value};
use tracing::{debug, info, warn};

use crate::brain::{GenerationBackend, GenerationParams, GenerationRequest, strip_think_tags};
use crate::config::{AssistantConfig, CommandsConfig};
use crate::error::{ConfigError, ToolError, TurnAborted};
use crate::gating::{Classifier, KeywordClassifier};
use crate::memory::TurnMemory;
use crate::protocol::{Decoded, ToolCallCodec};
use crate::retrieval::RetrievalStore;
use crate::tools::{ToolExecutor, ToolRegistry};
use crate::types::{Classification, Degradation, ToolDescriptor, TurnKind, TurnOutcome};
use crate::voice::stt::SttProvider;
use crate::voice::types::Utterance;

/// Tracing target for actionable utterances, kept separate so they can be
/// routed to their own sink.
pub const ACTIONABLE_TARGET: &str = "voxturn::actionable";

/// Per-turn settings lifted out of [`AssistantConfig`].
#[derive(Debug, Clone)]
struct TurnSettings {
    system_prompt: String,
    params: GenerationParams,
    include_history: bool,
    top_k: usize,
    fallback_actionable: bool,
    tools_enabled: bool,
    commands: CommandsConfig,
}

impl From<&AssistantConfig> for TurnSettings {
    fn from(config: &AssistantConfig) -> Self {
        Self {
            system_prompt: config.llm.system_prompt.clone(),
            params: GenerationParams::from(&config.llm),
            include_history: config.memory.include_in_prompt,
            top_k: config.retrieval.top_k,
            fallback_actionable: config.gating.fallback_actionable,
            tools_enabled: config.tools.enabled,
            commands: config.commands.clone(),
        }
    }
}

/// Drives utterances through the decision pipeline. Turn memory is the only
/// state that changes between turns.
pub struct TurnOrchestrator {
    stt: Arc<dyn SttProvider>,
    backend: Arc<dyn GenerationBackend>,
    actionable: Arc<dyn Classifier>,
    contextable: Arc<dyn Classifier>,
    retrieval: Option<Arc<dyn RetrievalStore>>,
    registry: ToolRegistry,
    codec: ToolCallCodec,
    memory: TurnMemory,
    settings: TurnSettings,
}

impl TurnOrchestrator {
    /// Build an orchestrator with keyword gates from `config`, no retrieval
    /// store and no tools.
    pub fn new(
        config: &AssistantConfig,
        stt: Arc<dyn SttProvider>,
        backend: Arc<dyn GenerationBackend>,
    ) -> Result<Self, ConfigError> {
        let codec = ToolCallCodec::new(config.tools.markers(), config.tools.repair.clone())?;
        Ok(Self {
            stt,
            backend,
            actionable: Arc::new(KeywordClassifier::actionable(&config.gating)),
            contextable: Arc::new(KeywordClassifier::contextable(&config.gating)),
            retrieval: None,
            registry: ToolRegistry::new(),
            codec,
            memory: TurnMemory::new(config.memory.max_turns),
            settings: TurnSettings::from(config),
        })
    }

    pub fn with_actionable(mut self, classifier: Arc<dyn Classifier>) -> Self {
        self.actionable = classifier;
        self
    }

    pub fn with_contextable(mut self, classifier: Arc<dyn Classifier>) -> Self {
        self.contextable = classifier;
        self
    }

    pub fn with_retrieval(mut self, store: Arc<dyn RetrievalStore>) -> Self {
        self.retrieval = Some(store);
        self
    }

    pub fn with_codec(mut self, codec: ToolCallCodec) -> Self {
        self.codec = codec;
        self
    }

    /// Register a tool; a previous tool of the same name is replaced.
    pub fn register_tool(
        &mut self,
        descriptor: ToolDescriptor,
        executor: Arc<dyn ToolExecutor>,
    ) -> Option<ToolDescriptor> {
        self.registry.register(descriptor, executor)
    }

    pub fn registry(&self) -> &ToolRegistry {
        &self.registry
    }

    pub fn registry_mut(&mut self) -> &mut ToolRegistry {
        &mut self.registry
    }

    pub fn codec(&self) -> &ToolCallCodec {
        &self.codec
    }

    pub fn memory(&self) -> &TurnMemory {
        &self.memory
    }

    pub fn clear_memory(&mut self) {
        self.memory.clear();
    }

    /// The tool-calling instructions sent with each request, if tools are on
    /// and any are registered.
    pub fn protocol_fragment(&self) -> Option<String> {
        (self.settings.tools_enabled && !self.registry.is_empty())
            .then(|| self.codec.encode(&self.registry.descriptors()))
    }

    /// Transcribe an utterance and run a turn on the text.
    pub async fn on_utterance(
        &mut self,
        utterance: &Utterance,
    ) -> Result<TurnOutcome, TurnAborted> {
        let transcription = self.stt.transcribe(utterance).await.map_err(|e| {
            warn!(
                provider = self.stt.name(),
                error = %e,
                "Transcription failed, dropping utterance"
            );
            TurnAborted::TranscriptionFailed {
                message: e.to_string(),
            }
        })?;
        info!(
            text = %transcription.text,
            duration_secs = utterance.duration_secs(),
            "Transcribed utterance"
        );
        self.handle_text(&transcription.text).await
    }

    /// Run a turn on already-transcribed text.
    pub async fn handle_text(&mut self, text: &str) -> Result<TurnOutcome, TurnAborted> {
        let user_text = text.trim();
        if user_text.is_empty() {
            debug!("Empty transcript, nothing to do");
            return Err(TurnAborted::EmptyTranscript);
        }

        if user_text.to_lowercase() == self.settings.commands.reset_phrase.trim().to_lowercase() {
            self.memory.clear();
            info!("Turn memory reset by command");
            return Ok(TurnOutcome {
                user_text: user_text.to_string(),
                response: self.settings.commands.reset_confirmation.clone(),
                kind: TurnKind::MemoryReset,
                degradations: Vec::new(),
            });
        }

        self.guard_refusal_loop();

        let mut degradations = Vec::new();
        let fallback = self.settings.fallback_actionable;
        let actionable = gate(
            "actionable",
            &*self.actionable,
            user_text,
            fallback,
            &mut degradations,
        )
        .await;
        let contextable = gate(
            "contextable",
            &*self.contextable,
            user_text,
            false,
            &mut degradations,
        )
        .await;

        let (response, kind) = if actionable.positive {
            info!(
                target: ACTIONABLE_TARGET,
                text = %user_text,
                confidence = actionable.confidence,
                "Actionable utterance"
            );
            self.answer(user_text, &mut degradations).await
        } else {
            debug!("Utterance not actionable, acknowledging");
            (
                self.settings.commands.acknowledgment.clone(),
                TurnKind::Acknowledged,
            )
        };

        self.memory.add_turn(user_text, response.clone());

        if contextable.positive {
            self.remember_context(user_text).await;
        }

        Ok(TurnOutcome {
            user_text: user_text.to_string(),
            response,
            kind,
            degradations,
        })
    }

    /// Two consecutive refusals mean the history is steering the model into
    /// a loop, so it is dropped.
    fn guard_refusal_loop(&mut self) {
        let marker = &self.settings.commands.refusal_marker;
        if marker.is_empty() || self.memory.len() < 2 {
            return;
        }
        if self
            .memory
            .recent_responses(2)
            .all(|response| response.contains(marker.as_str()))
        {
            warn!("Repeated refusals detected, clearing turn memory");
            self.memory.clear();
        }
    }

    async fn answer(
        &self,
        user_text: &str,
        degradations: &mut Vec<Degradation>,
    ) -> (String, TurnKind) {
        let context = self.retrieve(user_text, degradations).await;

        let mut request = GenerationRequest::new(user_text)
            .with_system(self.settings.system_prompt.clone())
            .with_context(context)
            .with_params(self.settings.params);
        if self.settings.include_history {
            request = request.with_history(self.memory.render());
        }
        if let Some(fragment) = self.protocol_fragment() {
            request = request.with_protocol(fragment);
        }

        let raw = match self.backend.generate(&request).await {
            Ok(raw) => strip_think_tags(&raw),
            Err(e) => {
                warn!(model = self.backend.model_name(), error = %e, "Generation failed");
                degradations.push(Degradation::GenerationUnavailable {
                    message: e.to_string(),
                });
                return (
                    self.settings.commands.generation_fallback.clone(),
                    TurnKind::Answered,
                );
            }
        };

        if !self.settings.tools_enabled {
            return (raw, TurnKind::Answered);
        }
        self.act(&raw, degradations).await
    }

    async fn retrieve(&self, user_text: &str, degradations: &mut Vec<Degradation>) -> Vec<String> {
        let Some(store) = &self.retrieval else {
            return Vec::new();
        };
        match store.retrieve(user_text, self.settings.top_k).await {
            Ok(snippets) => {
                debug!(count = snippets.len(), "Retrieved context");
                snippets
            }
            Err(e) => {
                warn!(error = %e, "Retrieval failed, continuing without context");
                degradations.push(Degradation::RetrievalUnavailable {
                    message: e.to_string(),
                });
                Vec::new()
            }
        }
    }

    /// Decode the generated text, run at most one tool and compose the
    /// spoken response.
    async fn act(&self, raw: &str, degradations: &mut Vec<Degradation>) -> (String, TurnKind) {
        let split = self.codec.split(raw);
        match split.decoded {
            Decoded::NoCall => (split.prose, TurnKind::Answered),
            Decoded::Malformed { reason } => {
                warn!(reason = %reason, "Could not parse tool call");
                let phrase = format!("Tool error: {reason}");
                degradations.push(Degradation::ToolParseError { reason });
                (compose(&split.prose, &phrase), TurnKind::Answered)
            }
            Decoded::Call(call) => {
                info!(tool = %call.tool_name, "Tool call requested");
                let result = self.registry.dispatch(call).await;
                if let Some(error) = result.error() {
                    degradations.push(match error {
                        ToolError::Unknown { name } => {
                            Degradation::ToolUnknown { name: name.clone() }
                        }
                        other => Degradation::ToolExecutionError {
                            name: result.tool_name.clone(),
                            message: other.to_string(),
                        },
                    });
                }
                let phrase = self.registry.format(&result);
                (compose(&split.prose, &phrase), TurnKind::ToolInvoked(result))
            }
        }
    }

    async fn remember_context(&self, user_text: &str) {
        let Some(store) = &self.retrieval else {
            return;
        };
        let mut metadata = Map::new();
        let now = chrono::Utc::now();
        metadata.insert(
            "timestamp".into(),
            Value::from(now.timestamp_micros() as f64 / 1_000_000.0),
        );
        match store.index(user_text, metadata).await {
            Ok(()) => debug!("Added utterance to long-term context"),
            Err(e) => warn!(error = %e, "Failed to index utterance"),
        }
    }
}

/// Run one gate. A failing classifier yields a verdict of `fallback` and a
/// recorded degradation.
async fn gate(
    name: &'static str,
    classifier: &dyn Classifier,
    text: &str,
    fallback: bool,
    degradations: &mut Vec<Degradation>,
) -> Classification {
    match classifier.classify(text).await {
        Ok(verdict) => {
            debug!(
                gate = name,
                classifier = classifier.name(),
                label = %verdict.label,
                confidence = verdict.confidence,
                "Classified utterance"
            );
            verdict
        }
        Err(e) => {
            warn!(gate = name, error = %e, fallback, "Classifier failed");
            degradations.push(Degradation::ClassificationUnavailable {
                gate: name,
                message: e.to_string(),
            });
            Classification {
                label: "unavailable".to_string(),
                confidence: 0.0,
                positive: fallback,
            }
        }
    }
}

/// Prose followed by the tool phrase, separated by a blank line.
fn compose(prose: &str, phrase: &str) -> String {
    if prose.is_empty() {
        phrase.to_string()
    } else {
        format!("{prose}\n\n{phrase}")
    }
}
