//! Configuration system for Voxturn.
//!
//! Uses `figment` for layered configuration: defaults -> user config file ->
//! workspace config file -> explicit config file -> environment -> overrides.
//! Configuration is loaded from `~/.config/voxturn/config.toml` and/or
//! `.voxturn/config.toml` in the workspace directory.

use figment::{
    Figment,
    providers::{Env, Format, Serialized, Toml},
};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

use crate::protocol::Markers;

/// Top-level configuration for the assistant.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct AssistantConfig {
    pub audio: AudioConfig,
    pub segmentation: SegmentationConfig,
    pub llm: LlmConfig,
    pub memory: MemoryConfig,
    pub retrieval: RetrievalConfig,
    pub gating: GatingConfig,
    pub tools: ToolsConfig,
    pub commands: CommandsConfig,
    pub speech: SpeechConfig,
}

/// Audio capture settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AudioConfig {
    /// Capture sample rate in Hz.
    pub sample_rate: u32,
    /// Length of one analysis frame in seconds.
    pub block_duration_secs: f32,
    /// Capacity of the bounded frame queue between capture and the turn loop.
    pub queue_capacity: usize,
    /// Audio input device name (None = system default).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub input_device: Option<String>,
}

impl Default for AudioConfig {
    fn default() -> Self {
        Self {
            sample_rate: 16_000,
            block_duration_secs: 0.5,
            queue_capacity: 64,
            input_device: None,
        }
    }
}

impl AudioConfig {
    /// Number of samples in one frame at the configured rate.
    pub fn frame_samples(&self) -> usize {
        ((self.sample_rate as f32) * self.block_duration_secs).round() as usize
    }
}

/// Speech segmentation and voice-activity settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SegmentationConfig {
    /// Silence required after the last speech frame before an utterance ends.
    pub hangover_secs: f32,
    /// Activity threshold for the energy detector (0.0-1.0).
    pub vad_threshold: f32,
    /// Number of frames the energy detector smooths over.
    pub vad_smoothing_frames: usize,
}

impl Default for SegmentationConfig {
    fn default() -> Self {
        Self {
            hangover_secs: 1.0,
            vad_threshold: 0.5,
            vad_smoothing_frames: 3,
        }
    }
}

/// Text-generation backend settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LlmConfig {
    /// Backend name: "openai" or "mock".
    pub provider: String,
    /// Model identifier.
    pub model: String,
    /// Environment variable name containing the API key.
    pub api_key_env: String,
    /// Optional base URL override for OpenAI-compatible servers.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub base_url: Option<String>,
    pub max_tokens: usize,
    pub temperature: f32,
    pub top_p: f32,
    /// System instructions placed ahead of every request.
    pub system_prompt: String,
}

impl Default for LlmConfig {
    fn default() -> Self {
        Self {
            provider: "openai".to_string(),
            model: "gpt-4o-mini".to_string(),
            api_key_env: "OPENAI_API_KEY".to_string(),
            base_url: None,
            max_tokens: 2000,
            temperature: 0.7,
            top_p: 0.9,
            system_prompt: "You are a helpful voice assistant. Answer briefly, in plain \
                            sentences that read well aloud."
                .to_string(),
        }
    }
}

impl LlmConfig {
    /// Validate this config and return any warnings.
    ///
    /// Returns an empty Vec if the config is valid.
    pub fn validate(&self) -> Vec<String> {
        let mut warnings = Vec::new();
        if self.max_tokens == 0 {
            warnings.push("max_tokens is 0; every completion will be empty".to_string());
        }
        if self.temperature < 0.0 || self.temperature > 2.0 {
            warnings.push(format!(
                "temperature ({}) is outside the typical range 0.0 to 2.0",
                self.temperature
            ));
        }
        if self.top_p <= 0.0 || self.top_p > 1.0 {
            warnings.push(format!("top_p ({}) should be in (0.0, 1.0]", self.top_p));
        }
        warnings
    }
}

/// Turn memory settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MemoryConfig {
    /// Number of (user, assistant) pairs kept. 0 disables memory.
    pub max_turns: usize,
    /// Whether the rendered history is placed into generation requests.
    pub include_in_prompt: bool,
}

impl Default for MemoryConfig {
    fn default() -> Self {
        Self {
            max_turns: 5,
            include_in_prompt: true,
        }
    }
}

/// Long-term retrieval store settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RetrievalConfig {
    pub enabled: bool,
    /// Number of snippets retrieved per turn.
    pub top_k: usize,
    /// Embedding dimensionality of the in-memory store.
    pub dimensions: usize,
    /// Optional JSON file the store is loaded from and saved to.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub persist_path: Option<PathBuf>,
}

impl Default for RetrievalConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            top_k: 5,
            dimensions: 128,
            persist_path: None,
        }
    }
}

/// Actionable / contextable gate settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GatingConfig {
    /// Minimum confidence for the keyword classifier to report a positive label.
    pub threshold: f32,
    /// Verdict used when the actionable classifier is unavailable.
    pub fallback_actionable: bool,
    /// Keywords that mark an utterance as a request for action.
    pub actionable_keywords: Vec<String>,
    /// Keywords that mark an utterance as worth remembering long-term.
    pub contextable_keywords: Vec<String>,
}

impl Default for GatingConfig {
    fn default() -> Self {
        let words = |list: &[&str]| list.iter().map(|w| w.to_string()).collect();
        Self {
            threshold: 0.5,
            fallback_actionable: false,
            actionable_keywords: words(&[
                "what", "how", "why", "when", "where", "who", "which", "can", "could", "please",
                "tell", "calculate", "compute", "schedule", "remind", "weather", "add", "set",
                "find", "explain",
            ]),
            contextable_keywords: words(&[
                "my", "i am", "i'm", "remember", "favorite", "name", "live", "work", "birthday",
                "prefer",
            ]),
        }
    }
}

/// Automatic repair applied to a call object that lacks `tool_name`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RepairPolicy {
    /// Key whose presence triggers the repair.
    pub key: String,
    /// Tool the bare object is routed to.
    pub default_tool: String,
}

impl Default for RepairPolicy {
    fn default() -> Self {
        Self {
            key: "expression".to_string(),
            default_tool: "calculator".to_string(),
        }
    }
}

/// Tool-calling protocol settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ToolsConfig {
    /// Whether tool descriptions are sent and tool calls honored.
    pub enabled: bool,
    /// Whether the built-in tools are registered at startup.
    pub enable_builtins: bool,
    pub open_marker: String,
    pub close_marker: String,
    /// Repair policy; `None` disables the repair.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub repair: Option<RepairPolicy>,
}

impl Default for ToolsConfig {
    fn default() -> Self {
        let markers = Markers::default();
        Self {
            enabled: true,
            enable_builtins: true,
            open_marker: markers.open,
            close_marker: markers.close,
            repair: Some(RepairPolicy::default()),
        }
    }
}

impl ToolsConfig {
    pub fn markers(&self) -> Markers {
        Markers::new(&self.open_marker, &self.close_marker)
    }
}

/// Fixed phrases used by the turn orchestrator.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CommandsConfig {
    /// Utterance (trimmed, lowercased) that clears turn memory.
    pub reset_phrase: String,
    pub reset_confirmation: String,
    /// Spoken when the actionable gate rejects an utterance.
    pub acknowledgment: String,
    /// Spoken when the generation backend fails.
    pub generation_fallback: String,
    /// Substring identifying a refusal; two consecutive refusals clear memory.
    pub refusal_marker: String,
}

impl Default for CommandsConfig {
    fn default() -> Self {
        Self {
            reset_phrase: "reset memory".to_string(),
            reset_confirmation: "Conversation memory has been reset.".to_string(),
            acknowledgment: "I heard you, but I'm not sure what action to take.".to_string(),
            generation_fallback: "Sorry, I couldn't come up with a response right now."
                .to_string(),
            refusal_marker: "I'm sorry, but I can't provide information".to_string(),
        }
    }
}

/// Speech output settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SpeechConfig {
    /// Output backend: "console", "openai" or "mock".
    pub provider: String,
    pub voice: String,
    pub speed: f32,
    /// Directory synthesized WAV files are written to, if any.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub dump_dir: Option<PathBuf>,
}

impl Default for SpeechConfig {
    fn default() -> Self {
        Self {
            provider: "console".to_string(),
            voice: "alloy".to_string(),
            speed: 1.0,
            dump_dir: None,
        }
    }
}

fn user_config_path() -> Option<PathBuf> {
    directories::ProjectDirs::from("dev", "voxturn", "voxturn")
        .map(|dirs| dirs.config_dir().join("config.toml"))
}

/// Load configuration from layered sources.
///
/// Priority (highest to lowest):
/// 1. Explicit overrides (passed as argument)
/// 2. Environment variables (prefixed with `VOXTURN_`)
/// 3. Explicit config file (`--config`)
/// 4. Workspace-local config (`.voxturn/config.toml`)
/// 5. User config (`~/.config/voxturn/config.toml`)
/// 6. Built-in defaults
pub fn load_config(
    workspace: Option<&Path>,
    config_file: Option<&Path>,
    overrides: Option<&AssistantConfig>,
) -> Result<AssistantConfig, Box<figment::Error>> {
    let mut figment = Figment::from(Serialized::defaults(AssistantConfig::default()));

    if let Some(user_config) = user_config_path()
        && user_config.exists()
    {
        figment = figment.merge(Toml::file(&user_config));
    }

    if let Some(ws) = workspace {
        let ws_config = ws.join(".voxturn").join("config.toml");
        if ws_config.exists() {
            figment = figment.merge(Toml::file(&ws_config));
        }
    }

    if let Some(path) = config_file {
        figment = figment.merge(Toml::file(path));
    }

    // VOXTURN_LLM__MODEL, VOXTURN_MEMORY__MAX_TURNS, ...
    figment = figment.merge(Env::prefixed("VOXTURN_").split("__"));

    if let Some(overrides) = overrides {
        figment = figment.merge(Serialized::defaults(overrides));
    }

    figment.extract().map_err(Box::new)
}

/// Check whether any configuration file exists (user-level or workspace-level).
pub fn config_exists(workspace: Option<&Path>) -> bool {
    if let Some(user_config) = user_config_path()
        && user_config.exists()
    {
        return true;
    }

    workspace.is_some_and(|ws| ws.join(".voxturn").join("config.toml").exists())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config() {
        let config = AssistantConfig::default();
        assert_eq!(config.audio.sample_rate, 16_000);
        assert_eq!(config.audio.frame_samples(), 8_000);
        assert_eq!(config.audio.queue_capacity, 64);
        assert!((config.segmentation.hangover_secs - 1.0).abs() < f32::EPSILON);
        assert_eq!(config.memory.max_turns, 5);
        assert_eq!(config.retrieval.top_k, 5);
        assert_eq!(config.llm.max_tokens, 2000);
        assert_eq!(config.commands.reset_phrase, "reset memory");
        assert_eq!(config.tools.open_marker, "<tool_call>");
        assert_eq!(config.tools.close_marker, "</tool_call>");
        assert_eq!(config.tools.repair, Some(RepairPolicy::default()));
        assert!(!config.gating.fallback_actionable);
    }

    #[test]
    fn test_config_serialization_roundtrip() {
        let config = AssistantConfig::default();
        let toml_str = toml::to_string(&config).unwrap();
        let deserialized: AssistantConfig = toml::from_str(&toml_str).unwrap();
        assert_eq!(deserialized.llm.model, config.llm.model);
        assert_eq!(deserialized.memory.max_turns, config.memory.max_turns);
        assert_eq!(deserialized.tools.repair, config.tools.repair);
    }

    #[test]
    fn test_llm_validate() {
        assert!(LlmConfig::default().validate().is_empty());

        let config = LlmConfig {
            temperature: 3.0,
            top_p: 0.0,
            ..Default::default()
        };
        assert_eq!(config.validate().len(), 2);
    }

    #[test]
    fn test_load_config_with_overrides() {
        let mut overrides = AssistantConfig::default();
        overrides.llm.model = "llama3".to_string();
        overrides.memory.max_turns = 9;

        let config = load_config(None, None, Some(&overrides)).unwrap();
        assert_eq!(config.llm.model, "llama3");
        assert_eq!(config.memory.max_turns, 9);
    }

    #[test]
    fn test_load_config_from_workspace() {
        let dir = tempfile::tempdir().unwrap();
        let voxturn_dir = dir.path().join(".voxturn");
        std::fs::create_dir_all(&voxturn_dir).unwrap();
        std::fs::write(
            voxturn_dir.join("config.toml"),
            r#"
[memory]
max_turns = 2
include_in_prompt = false

[tools]
open_marker = "<call>"
close_marker = "</call>"
"#,
        )
        .unwrap();

        let config = load_config(Some(dir.path()), None, None).unwrap();
        assert_eq!(config.memory.max_turns, 2);
        assert!(!config.memory.include_in_prompt);
        assert_eq!(config.tools.markers(), Markers::new("<call>", "</call>"));
        // Untouched sections keep their defaults
        assert_eq!(config.retrieval.top_k, 5);
        assert!(config_exists(Some(dir.path())));
    }

    #[test]
    fn test_load_config_explicit_file_wins_over_workspace() {
        let dir = tempfile::tempdir().unwrap();
        let voxturn_dir = dir.path().join(".voxturn");
        std::fs::create_dir_all(&voxturn_dir).unwrap();
        std::fs::write(voxturn_dir.join("config.toml"), "[retrieval]\ntop_k = 2\n").unwrap();

        let explicit = dir.path().join("custom.toml");
        std::fs::write(&explicit, "[retrieval]\ntop_k = 7\n").unwrap();

        let config = load_config(Some(dir.path()), Some(&explicit), None).unwrap();
        assert_eq!(config.retrieval.top_k, 7);
    }

    #[test]
    fn test_load_config_rejects_bad_types() {
        let dir = tempfile::tempdir().unwrap();
        let explicit = dir.path().join("bad.toml");
        std::fs::write(&explicit, "[memory]\nmax_turns = \"lots\"\n").unwrap();

        assert!(load_config(None, Some(&explicit), None).is_err());
    }
}
