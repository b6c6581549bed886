//! Error types for the Voxturn turn engine.
//!
//! Uses `thiserror` for public API error types with structured variants
//! covering the voice front-end, the external model collaborators, tool
//! dispatch and configuration.

use std::path::PathBuf;

/// Top-level error type for the Voxturn core library.
#[derive(Debug, thiserror::Error)]
pub enum VoxturnError {
    #[error("Voice error: {0}")]
    Voice(#[from] VoiceError),

    #[error("Generation error: {0}")]
    Generation(#[from] GenerationError),

    #[error("Classifier error: {0}")]
    Classifier(#[from] ClassifierError),

    #[error("Retrieval error: {0}")]
    Retrieval(#[from] RetrievalError),

    #[error("Tool error: {0}")]
    Tool(#[from] ToolError),

    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

/// Errors from audio capture, speech-to-text and text-to-speech.
#[derive(Debug, thiserror::Error)]
pub enum VoiceError {
    #[error("Transcription failed: {message}")]
    TranscriptionFailed { message: String },

    #[error("Synthesis failed: {message}")]
    SynthesisFailed { message: String },

    #[error("Unsupported audio format: {format}")]
    UnsupportedFormat { format: String },

    #[error("Audio device error: {message}")]
    AudioDevice { message: String },

    #[error("Voice pipeline error: {message}")]
    PipelineError { message: String },
}

/// Errors from the text-generation backend.
#[derive(Debug, thiserror::Error)]
pub enum GenerationError {
    #[error("API request failed: {message}")]
    ApiRequest { message: String },

    #[error("API response parse error: {message}")]
    ResponseParse { message: String },

    #[error("Authentication failed for backend {backend}")]
    AuthFailed { backend: String },

    #[error("Rate limited by backend, retry after {retry_after_secs}s")]
    RateLimited { retry_after_secs: u64 },

    #[error("Backend returned an empty completion")]
    EmptyResponse,

    #[error("Backend unavailable: {message}")]
    Unavailable { message: String },
}

/// Errors from the actionable / contextable classifiers.
#[derive(Debug, thiserror::Error)]
pub enum ClassifierError {
    #[error("Classifier '{name}' is not loaded")]
    NotLoaded { name: String },

    #[error("Classification failed: {message}")]
    Failed { message: String },
}

/// Errors from the retrieval (long-term context) store.
#[derive(Debug, thiserror::Error)]
pub enum RetrievalError {
    #[error("Retrieval query failed: {message}")]
    QueryFailed { message: String },

    #[error("Indexing failed: {message}")]
    IndexFailed { message: String },

    #[error("Retrieval persistence error: {message}")]
    Persistence { message: String },
}

/// Errors from tool resolution, validation and execution.
///
/// Calls that cannot be decoded never reach the registry; they surface as
/// [`Decoded::Malformed`](crate::protocol::Decoded::Malformed).
///
/// Cloneable because a failed [`ToolResult`](crate::types::ToolResult)
/// carries one as its outcome.
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum ToolError {
    #[error("unknown tool '{name}'")]
    Unknown { name: String },

    #[error("invalid arguments for tool '{name}': {reason}")]
    InvalidArguments { name: String, reason: String },

    #[error("tool '{name}' failed: {message}")]
    ExecutionFailed { name: String, message: String },

    #[error("{message}")]
    Reported { name: String, message: String },
}

impl ToolError {
    /// Short category label used in logs and degradation reports.
    pub fn kind(&self) -> &'static str {
        match self {
            ToolError::Unknown { .. } => "unknown",
            ToolError::InvalidArguments { .. } => "invalid_arguments",
            ToolError::ExecutionFailed { .. } => "execution",
            ToolError::Reported { .. } => "reported",
        }
    }
}

/// Errors from the configuration system.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Configuration file not found: {path}")]
    FileNotFound { path: PathBuf },

    #[error("Invalid configuration: {message}")]
    Invalid { message: String },

    #[error("Environment variable not set: {var}")]
    EnvVarMissing { var: String },

    #[error("Configuration parse error: {message}")]
    ParseError { message: String },
}

/// Why a turn produced no response. Aborted turns leave no trace in memory.
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum TurnAborted {
    #[error("Transcription was empty")]
    EmptyTranscript,

    #[error("Transcription failed: {message}")]
    TranscriptionFailed { message: String },
}

/// A type alias for results using the top-level `VoxturnError`.
pub type Result<T> = std::result::Result<T, VoxturnError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_display_voice() {
        let err = VoxturnError::Voice(VoiceError::TranscriptionFailed {
            message: "connection refused".into(),
        });
        assert_eq!(
            err.to_string(),
            "Voice error: Transcription failed: connection refused"
        );
    }

    #[test]
    fn test_error_display_tool() {
        let err = VoxturnError::Tool(ToolError::Unknown {
            name: "nonexistent_tool".into(),
        });
        assert_eq!(
            err.to_string(),
            "Tool error: unknown tool 'nonexistent_tool'"
        );
    }

    #[test]
    fn test_error_display_config() {
        let err = VoxturnError::Config(ConfigError::FileNotFound {
            path: PathBuf::from("/etc/voxturn.toml"),
        });
        assert_eq!(
            err.to_string(),
            "Configuration error: Configuration file not found: /etc/voxturn.toml"
        );
    }

    #[test]
    fn test_error_from_io() {
        let io_err = std::io::Error::new(std::io::ErrorKind::NotFound, "file not found");
        let err: VoxturnError = io_err.into();
        assert!(matches!(err, VoxturnError::Io(_)));
    }

    #[test]
    fn test_error_from_serde() {
        let serde_err = serde_json::from_str::<serde_json::Value>("invalid json").unwrap_err();
        let err: VoxturnError = serde_err.into();
        assert!(matches!(err, VoxturnError::Serialization(_)));
    }

    #[test]
    fn test_tool_error_variants() {
        let err = ToolError::InvalidArguments {
            name: "calculator".into(),
            reason: "missing required parameter 'expression'".into(),
        };
        assert_eq!(
            err.to_string(),
            "invalid arguments for tool 'calculator': missing required parameter 'expression'"
        );
        assert_eq!(err.kind(), "invalid_arguments");

        let err = ToolError::Reported {
            name: "calculator".into(),
            message: "Division by zero".into(),
        };
        assert_eq!(err.to_string(), "Division by zero");
        assert_eq!(err.kind(), "reported");
    }

    #[test]
    fn test_generation_error_variants() {
        let err = GenerationError::RateLimited {
            retry_after_secs: 60,
        };
        assert_eq!(err.to_string(), "Rate limited by backend, retry after 60s");
        assert_eq!(
            GenerationError::EmptyResponse.to_string(),
            "Backend returned an empty completion"
        );
    }
}
