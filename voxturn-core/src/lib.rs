//! # Voxturn Core
//!
//! The conversational turn engine behind the Voxturn voice assistant.
//! Provides speech segmentation, the gated turn orchestrator, the
//! tool-calling protocol codec, the tool registry and dispatcher, turn
//! memory, configuration and the collaborator traits for transcription,
//! classification, retrieval, generation and speech output.

pub mod brain;
pub mod config;
pub mod error;
pub mod gating;
pub mod memory;
pub mod orchestrator;
pub mod protocol;
pub mod retrieval;
pub mod tools;
pub mod types;
pub mod voice;

// Re-export commonly used types at the crate root.
pub use brain::{
    GenerationBackend, GenerationParams, GenerationRequest, MockGenerationBackend,
    OpenAiCompatibleBackend,
};
pub use config::{AssistantConfig, config_exists, load_config};
pub use error::{Result, ToolError, TurnAborted, VoxturnError};
pub use gating::{Classifier, KeywordClassifier, MockClassifier};
pub use memory::TurnMemory;
pub use orchestrator::TurnOrchestrator;
pub use protocol::{Decoded, Markers, Split, ToolCallCodec};
pub use retrieval::{InMemoryRetrievalStore, MockRetrievalStore, RetrievalStore};
pub use tools::{FnExecutor, FormatRule, ResultFormatter, ToolExecutor, ToolRegistry};
pub use types::{
    Classification, Degradation, ParamSpec, ParamType, ToolCall, ToolDescriptor, ToolResult, Turn,
    TurnKind, TurnOutcome,
};
