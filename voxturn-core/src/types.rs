//! Core data model for the turn engine.
//!
//! Conversation turns, tool descriptors and calls, tool results and the
//! outcome reported for every processed turn.

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value, json};

use crate::error::ToolError;

/// One user utterance paired with the system's final spoken response.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Turn {
    pub user_text: String,
    pub assistant_text: String,
}

impl Turn {
    pub fn new(user_text: impl Into<String>, assistant_text: impl Into<String>) -> Self {
        Self {
            user_text: user_text.into(),
            assistant_text: assistant_text.into(),
        }
    }
}

/// JSON type of a tool parameter.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ParamType {
    String,
    Number,
    Integer,
    Boolean,
    Object,
    Array,
}

impl ParamType {
    /// Whether a JSON value is acceptable for this type.
    ///
    /// Integers are accepted where a number is expected.
    pub fn accepts(&self, value: &Value) -> bool {
        match self {
            ParamType::String => value.is_string(),
            ParamType::Number => value.is_number(),
            ParamType::Integer => value.is_i64() || value.is_u64(),
            ParamType::Boolean => value.is_boolean(),
            ParamType::Object => value.is_object(),
            ParamType::Array => value.is_array(),
        }
    }
}

impl std::fmt::Display for ParamType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            ParamType::String => "string",
            ParamType::Number => "number",
            ParamType::Integer => "integer",
            ParamType::Boolean => "boolean",
            ParamType::Object => "object",
            ParamType::Array => "array",
        };
        write!(f, "{name}")
    }
}

/// Schema of a single tool parameter.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ParamSpec {
    pub name: String,
    pub param_type: ParamType,
    pub description: String,
    pub required: bool,
    /// Closed set of accepted values; empty means unrestricted.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub allowed_values: Vec<Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub default: Option<Value>,
}

impl ParamSpec {
    pub fn required(
        name: impl Into<String>,
        param_type: ParamType,
        description: impl Into<String>,
    ) -> Self {
        Self {
            name: name.into(),
            param_type,
            description: description.into(),
            required: true,
            allowed_values: Vec::new(),
            default: None,
        }
    }

    pub fn optional(
        name: impl Into<String>,
        param_type: ParamType,
        description: impl Into<String>,
    ) -> Self {
        Self {
            required: false,
            ..Self::required(name, param_type, description)
        }
    }

    pub fn with_allowed<I, V>(mut self, values: I) -> Self
    where
        I: IntoIterator<Item = V>,
        V: Into<Value>,
    {
        self.allowed_values = values.into_iter().map(Into::into).collect();
        self
    }

    pub fn with_default(mut self, value: impl Into<Value>) -> Self {
        self.default = Some(value.into());
        self
    }
}

/// Static description of a callable tool: its unique name, what it does and
/// the ordered list of parameters it accepts.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ToolDescriptor {
    pub name: String,
    pub description: String,
    pub parameters: Vec<ParamSpec>,
}

impl ToolDescriptor {
    pub fn new(name: impl Into<String>, description: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            description: description.into(),
            parameters: Vec::new(),
        }
    }

    pub fn with_param(mut self, spec: ParamSpec) -> Self {
        self.parameters.push(spec);
        self
    }

    pub fn param(&self, name: &str) -> Option<&ParamSpec> {
        self.parameters.iter().find(|p| p.name == name)
    }

    /// JSON Schema object for the parameters, in the shape function-calling
    /// APIs expect.
    pub fn to_json_schema(&self) -> Value {
        let mut properties = Map::new();
        for spec in &self.parameters {
            let mut prop = Map::new();
            prop.insert("type".into(), json!(spec.param_type.to_string()));
            prop.insert("description".into(), json!(spec.description));
            if !spec.allowed_values.is_empty() {
                prop.insert("enum".into(), Value::Array(spec.allowed_values.clone()));
            }
            if let Some(default) = &spec.default {
                prop.insert("default".into(), default.clone());
            }
            properties.insert(spec.name.clone(), Value::Object(prop));
        }
        let required: Vec<&str> = self
            .parameters
            .iter()
            .filter(|p| p.required)
            .map(|p| p.name.as_str())
            .collect();

        json!({
            "name": self.name,
            "description": self.description,
            "parameters": {
                "type": "object",
                "properties": properties,
                "required": required,
            }
        })
    }
}

/// A structured action request decoded from generated text.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ToolCall {
    pub tool_name: String,
    pub parameters: Map<String, Value>,
}

impl ToolCall {
    pub fn new(tool_name: impl Into<String>, parameters: Map<String, Value>) -> Self {
        Self {
            tool_name: tool_name.into(),
            parameters,
        }
    }
}

/// Normalized result of dispatching a [`ToolCall`].
#[derive(Debug, Clone, PartialEq)]
pub struct ToolResult {
    pub tool_name: String,
    /// Parameters as executed, after defaults were filled in.
    pub parameters: Map<String, Value>,
    pub outcome: Result<Value, ToolError>,
}

impl ToolResult {
    pub fn ok(call: ToolCall, payload: Value) -> Self {
        Self {
            tool_name: call.tool_name,
            parameters: call.parameters,
            outcome: Ok(payload),
        }
    }

    pub fn failed(call: ToolCall, error: ToolError) -> Self {
        Self {
            tool_name: call.tool_name,
            parameters: call.parameters,
            outcome: Err(error),
        }
    }

    pub fn success(&self) -> bool {
        self.outcome.is_ok()
    }

    pub fn error(&self) -> Option<&ToolError> {
        self.outcome.as_ref().err()
    }
}

/// Verdict of a text classifier.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Classification {
    pub label: String,
    pub confidence: f32,
    pub positive: bool,
}

impl Classification {
    pub fn positive(label: impl Into<String>, confidence: f32) -> Self {
        Self {
            label: label.into(),
            confidence,
            positive: true,
        }
    }

    pub fn negative(label: impl Into<String>, confidence: f32) -> Self {
        Self {
            label: label.into(),
            confidence,
            positive: false,
        }
    }
}

/// A step of a turn that failed and fell back to a default.
#[derive(Debug, Clone, PartialEq)]
pub enum Degradation {
    ClassificationUnavailable { gate: &'static str, message: String },
    RetrievalUnavailable { message: String },
    GenerationUnavailable { message: String },
    ToolParseError { reason: String },
    ToolUnknown { name: String },
    ToolExecutionError { name: String, message: String },
}

impl std::fmt::Display for Degradation {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Degradation::ClassificationUnavailable { gate, message } => {
                write!(f, "{gate} classifier unavailable: {message}")
            }
            Degradation::RetrievalUnavailable { message } => {
                write!(f, "retrieval unavailable: {message}")
            }
            Degradation::GenerationUnavailable { message } => {
                write!(f, "generation unavailable: {message}")
            }
            Degradation::ToolParseError { reason } => write!(f, "tool parse error: {reason}"),
            Degradation::ToolUnknown { name } => write!(f, "unknown tool: {name}"),
            Degradation::ToolExecutionError { name, message } => {
                write!(f, "tool {name} failed: {message}")
            }
        }
    }
}

/// How a turn was resolved.
#[derive(Debug, Clone, PartialEq)]
pub enum TurnKind {
    /// The reset phrase cleared turn memory.
    MemoryReset,
    /// The actionable gate rejected the utterance.
    Acknowledged,
    /// A generated response was spoken without a tool being dispatched.
    Answered,
    /// A tool call was dispatched (successfully or not).
    ToolInvoked(ToolResult),
}

/// Everything the orchestrator reports about one processed turn.
#[derive(Debug, Clone, PartialEq)]
pub struct TurnOutcome {
    pub user_text: String,
    /// Speech-ready response text.
    pub response: String,
    pub kind: TurnKind,
    pub degradations: Vec<Degradation>,
}

impl TurnOutcome {
    pub fn is_degraded(&self) -> bool {
        !self.degradations.is_empty()
    }

    pub fn tool_result(&self) -> Option<&ToolResult> {
        match &self.kind {
            TurnKind::ToolInvoked(result) => Some(result),
            _ => None,
        }
    }
}
