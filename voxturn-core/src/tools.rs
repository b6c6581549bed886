//! Tool registry and dispatcher.
//!
//! Tools are registered with a [`ToolDescriptor`] and an executor. The
//! dispatcher resolves a decoded [`ToolCall`] by name, validates its
//! arguments against the descriptor, runs the executor, and normalizes the
//! outcome into a [`ToolResult`]. Turning a result into speech is the job of
//! the table-driven [`ResultFormatter`].

use std::collections::HashMap;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;

use async_trait::async_trait;
use futures::FutureExt;
use serde_json::{Map, Value};
use tracing::{debug, info, warn};

use crate::error::ToolError;
use crate::types::{ToolCall, ToolDescriptor, ToolResult};

/// Executes one tool. Receives arguments already validated against the
/// tool's descriptor, with defaults filled in.
#[async_trait]
pub trait ToolExecutor: Send + Sync {
    async fn execute(&self, name: &str, params: &Map<String, Value>) -> Result<Value, ToolError>;
}

/// Adapter turning a synchronous closure into a [`ToolExecutor`].
pub struct FnExecutor<F> {
    func: F,
}

impl<F> FnExecutor<F>
where
    F: Fn(&Map<String, Value>) -> Result<Value, String> + Send + Sync,
{
    pub fn new(func: F) -> Self {
        Self { func }
    }
}

#[async_trait]
impl<F> ToolExecutor for FnExecutor<F>
where
    F: Fn(&Map<String, Value>) -> Result<Value, String> + Send + Sync,
{
    async fn execute(&self, name: &str, params: &Map<String, Value>) -> Result<Value, ToolError> {
        (self.func)(params).map_err(|message| ToolError::ExecutionFailed {
            name: name.to_string(),
            message,
        })
    }
}

/// How a successful payload of one tool is spoken.
#[derive(Clone)]
pub enum FormatRule {
    /// The first present field wins, rendered as `prefix` + value.
    Fields(Vec<(String, String)>),
    /// Arbitrary rendering; `None` falls through to the default rule.
    Custom(Arc<dyn Fn(&Value) -> Option<String> + Send + Sync>),
}

impl FormatRule {
    pub fn fields<I, K, P>(fields: I) -> Self
    where
        I: IntoIterator<Item = (K, P)>,
        K: Into<String>,
        P: Into<String>,
    {
        FormatRule::Fields(
            fields
                .into_iter()
                .map(|(k, p)| (k.into(), p.into()))
                .collect(),
        )
    }

    fn apply(&self, payload: &Value) -> Option<String> {
        match self {
            FormatRule::Fields(fields) => fields.iter().find_map(|(field, prefix)| {
                payload
                    .get(field)
                    .filter(|v| !v.is_null())
                    .map(|v| format!("{prefix}{}", plain(v)))
            }),
            FormatRule::Custom(render) => render(payload),
        }
    }
}

impl std::fmt::Debug for FormatRule {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            FormatRule::Fields(fields) => f.debug_tuple("Fields").field(fields).finish(),
            FormatRule::Custom(_) => f.write_str("Custom(..)"),
        }
    }
}

/// Converts tool results into speech-ready text, one rule per tool name.
#[derive(Debug, Clone)]
pub struct ResultFormatter {
    rules: HashMap<String, FormatRule>,
}

impl ResultFormatter {
    pub fn empty() -> Self {
        Self {
            rules: HashMap::new(),
        }
    }

    pub fn register(&mut self, tool: impl Into<String>, rule: FormatRule) {
        self.rules.insert(tool.into(), rule);
    }

    pub fn format(&self, result: &ToolResult) -> String {
        match &result.outcome {
            Ok(payload) => self
                .rules
                .get(&result.tool_name)
                .and_then(|rule| rule.apply(payload))
                .unwrap_or_else(|| format!("{}: {}", result.tool_name, payload)),
            Err(error) => format!("Tool error: {error}"),
        }
    }
}

impl Default for ResultFormatter {
    /// Rules for the tools the assistant knows how to speak about.
    fn default() -> Self {
        let mut formatter = Self::empty();
        formatter.register(
            "calculator",
            FormatRule::fields([
                ("calculation", ""),
                ("formatted_result", "Result: "),
                ("result", "Result: "),
            ]),
        );
        formatter.register("weather_checker", FormatRule::fields([("summary", "")]));
        formatter.register("calendar_scheduler", FormatRule::fields([("message", "")]));
        formatter
    }
}

fn plain(value: &Value) -> String {
    match value {
        Value::String(s) => s.clone(),
        other => other.to_string(),
    }
}

struct RegisteredTool {
    descriptor: ToolDescriptor,
    executor: Arc<dyn ToolExecutor>,
}

/// Name-keyed table of tools plus the formatter used to speak their results.
pub struct ToolRegistry {
    tools: HashMap<String, RegisteredTool>,
    /// Registration order, so the protocol fragment is stable.
    order: Vec<String>,
    formatter: ResultFormatter,
}

impl ToolRegistry {
    pub fn new() -> Self {
        Self {
            tools: HashMap::new(),
            order: Vec::new(),
            formatter: ResultFormatter::default(),
        }
    }

    /// Register a tool. A tool already registered under the same name is
    /// replaced and its descriptor returned.
    pub fn register(
        &mut self,
        descriptor: ToolDescriptor,
        executor: Arc<dyn ToolExecutor>,
    ) -> Option<ToolDescriptor> {
        let name = descriptor.name.clone();
        let entry = RegisteredTool {
            descriptor,
            executor,
        };
        match self.tools.insert(name.clone(), entry) {
            Some(previous) => {
                warn!(tool = %name, "Replacing previously registered tool");
                Some(previous.descriptor)
            }
            None => {
                debug!(tool = %name, "Registering tool");
                self.order.push(name);
                None
            }
        }
    }

    pub fn register_format_rule(&mut self, tool: impl Into<String>, rule: FormatRule) {
        self.formatter.register(tool, rule);
    }

    pub fn get(&self, name: &str) -> Option<&ToolDescriptor> {
        self.tools.get(name).map(|t| &t.descriptor)
    }

    /// Descriptors in registration order.
    pub fn descriptors(&self) -> Vec<ToolDescriptor> {
        self.order
            .iter()
            .filter_map(|name| self.tools.get(name))
            .map(|t| t.descriptor.clone())
            .collect()
    }

    pub fn list_names(&self) -> Vec<String> {
        self.order.clone()
    }

    pub fn len(&self) -> usize {
        self.tools.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tools.is_empty()
    }

    /// Resolve, validate and execute a call. Never returns an error
    /// directly: every failure is carried in the result's outcome.
    ///
    /// A panicking executor is caught and reported as
    /// [`ToolError::ExecutionFailed`] only when the build unwinds on panic;
    /// under the workspace release profile (`panic = "abort"`) it aborts the
    /// process.
    pub async fn dispatch(&self, call: ToolCall) -> ToolResult {
        let Some(tool) = self.tools.get(&call.tool_name) else {
            warn!(tool = %call.tool_name, "Call to unknown tool");
            let error = ToolError::Unknown {
                name: call.tool_name.clone(),
            };
            return ToolResult::failed(call, error);
        };

        let parameters = match validate(&tool.descriptor, &call.parameters) {
            Ok(parameters) => parameters,
            Err(error) => {
                warn!(tool = %call.tool_name, error = %error, "Rejected tool arguments");
                return ToolResult::failed(call, error);
            }
        };
        let call = ToolCall::new(call.tool_name, parameters);

        info!(tool = %call.tool_name, "Executing tool");
        let execution = AssertUnwindSafe(tool.executor.execute(&call.tool_name, &call.parameters))
            .catch_unwind()
            .await;

        let outcome = match execution {
            Ok(Ok(payload)) => match reported_error(&payload) {
                Some(message) => Err(ToolError::Reported {
                    name: call.tool_name.clone(),
                    message,
                }),
                None => Ok(payload),
            },
            Ok(Err(error)) => Err(error),
            Err(panic) => Err(ToolError::ExecutionFailed {
                name: call.tool_name.clone(),
                message: panic_message(panic.as_ref()),
            }),
        };

        match outcome {
            Ok(payload) => {
                debug!(tool = %call.tool_name, "Tool succeeded");
                ToolResult::ok(call, payload)
            }
            Err(error) => {
                warn!(tool = %call.tool_name, kind = error.kind(), error = %error, "Tool failed");
                ToolResult::failed(call, error)
            }
        }
    }

    pub fn format(&self, result: &ToolResult) -> String {
        self.formatter.format(result)
    }
}

impl Default for ToolRegistry {
    fn default() -> Self {
        Self::new()
    }
}

/// Check arguments against a descriptor and fill in defaults.
///
/// Arguments the descriptor does not mention are passed through untouched.
pub fn validate(
    descriptor: &ToolDescriptor,
    params: &Map<String, Value>,
) -> Result<Map<String, Value>, ToolError> {
    let invalid = |reason: String| ToolError::InvalidArguments {
        name: descriptor.name.clone(),
        reason,
    };
    let mut validated = params.clone();

    for spec in &descriptor.parameters {
        let value = match validated.get(&spec.name).filter(|v| !v.is_null()) {
            Some(value) => value,
            None => {
                if let Some(default) = &spec.default {
                    validated.insert(spec.name.clone(), default.clone());
                    continue;
                }
                if spec.required {
                    return Err(invalid(format!(
                        "missing required parameter '{}'",
                        spec.name
                    )));
                }
                validated.remove(&spec.name);
                continue;
            }
        };

        if !spec.param_type.accepts(value) {
            return Err(invalid(format!(
                "parameter '{}' must be of type {}",
                spec.name, spec.param_type
            )));
        }
        if !spec.allowed_values.is_empty() && !spec.allowed_values.contains(value) {
            let allowed: Vec<String> = spec.allowed_values.iter().map(plain).collect();
            return Err(invalid(format!(
                "parameter '{}' must be one of: {}",
                spec.name,
                allowed.join(", ")
            )));
        }
    }

    Ok(validated)
}

fn reported_error(payload: &Value) -> Option<String> {
    payload
        .get("error")
        .and_then(Value::as_str)
        .map(str::to_string)
}

fn panic_message(panic: &(dyn std::any::Any + Send)) -> String {
    if let Some(s) = panic.downcast_ref::<&str>() {
        format!("panicked: {s}")
    } else if let Some(s) = panic.downcast_ref::<String>() {
        format!("panicked: {s}")
    } else {
        "panicked".to_string()
    }
}
