//! Tool-calling protocol codec.
//!
//! Generated text may embed at most one structured call between an open and a
//! close marker. The codec renders the instruction fragment that teaches the
//! model this syntax, finds a call in free-form text through an ordered list
//! of [`ExtractionStrategy`] values, repairs common malformations, and strips
//! every call span so the remaining prose can be spoken.

pub mod encode;
pub mod extract;

use std::ops::Range;
use std::sync::LazyLock;

use regex::Regex;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use tracing::{debug, trace};

use crate::config::RepairPolicy;
use crate::error::ConfigError;
use crate::types::{ToolCall, ToolDescriptor};

pub use encode::{encode_call, protocol_fragment};
pub use extract::{
    BareObject, DelimitedBlock, Extraction, ExtractionStrategy, Span, UnterminatedBlock,
};

/// The pair of markers that wrap a call.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Markers {
    pub open: String,
    pub close: String,
}

impl Markers {
    pub fn new(open: impl Into<String>, close: impl Into<String>) -> Self {
        Self {
            open: open.into(),
            close: close.into(),
        }
    }

    fn validate(&self) -> Result<(), ConfigError> {
        if self.open.trim().is_empty() || self.close.trim().is_empty() {
            return Err(ConfigError::Invalid {
                message: "tool call markers must not be empty".into(),
            });
        }
        if self.open == self.close {
            return Err(ConfigError::Invalid {
                message: format!("open and close markers are identical: {}", self.open),
            });
        }
        Ok(())
    }
}

impl Default for Markers {
    fn default() -> Self {
        Self::new("<tool_call>", "</tool_call>")
    }
}

/// Result of decoding one response.
#[derive(Debug, Clone, PartialEq)]
pub enum Decoded {
    Call(ToolCall),
    NoCall,
    /// A call construct was found but no valid call could be parsed from it.
    Malformed { reason: String },
}

/// A decode together with the speakable prose that surrounds it.
#[derive(Debug, Clone, PartialEq)]
pub struct Split {
    pub decoded: Decoded,
    pub prose: String,
}

static BLANK_LINES: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"\n\s*\n").expect("valid regex"));

pub struct ToolCallCodec {
    markers: Markers,
    repair: Option<RepairPolicy>,
    strategies: Vec<Box<dyn ExtractionStrategy>>,
    complete_block: Regex,
    stray_marker: Regex,
}

impl std::fmt::Debug for ToolCallCodec {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ToolCallCodec")
            .field("markers", &self.markers)
            .field("repair", &self.repair)
            .field(
                "strategies",
                &self.strategies.iter().map(|s| s.name()).collect::<Vec<_>>(),
            )
            .finish()
    }
}

impl ToolCallCodec {
    /// Build a codec for the given markers with the standard strategy order:
    /// delimited block, unterminated block, bare object.
    pub fn new(markers: Markers, repair: Option<RepairPolicy>) -> Result<Self, ConfigError> {
        markers.validate()?;
        let invalid = |e: regex::Error| ConfigError::Invalid {
            message: format!("tool call markers do not form a valid pattern: {e}"),
        };

        let strategies: Vec<Box<dyn ExtractionStrategy>> = vec![
            Box::new(DelimitedBlock::new(&markers).map_err(invalid)?),
            Box::new(UnterminatedBlock::new(&markers)),
            Box::new(BareObject),
        ];
        let complete_block = Regex::new(&format!(
            r"(?s){}.*?{}",
            regex::escape(&markers.open),
            regex::escape(&markers.close)
        ))
        .map_err(invalid)?;
        let stray_marker = Regex::new(&stray_marker_pattern(&markers)).map_err(invalid)?;

        Ok(Self {
            markers,
            repair,
            strategies,
            complete_block,
            stray_marker,
        })
    }

    pub fn markers(&self) -> &Markers {
        &self.markers
    }

    pub fn repair_policy(&self) -> Option<&RepairPolicy> {
        self.repair.as_ref()
    }

    /// The instruction fragment describing the call syntax and the tools.
    pub fn encode(&self, descriptors: &[ToolDescriptor]) -> String {
        protocol_fragment(&self.markers, descriptors)
    }

    pub fn encode_call(&self, call: &ToolCall) -> String {
        encode_call(&self.markers, call)
    }

    pub fn decode(&self, text: &str) -> Decoded {
        self.locate(text).0
    }

    /// Remove every call span and leftover marker, then normalize blank lines.
    pub fn strip(&self, text: &str) -> String {
        let without_blocks = self.complete_block.replace_all(text, "");
        let without_unterminated = self.remove_unterminated(&without_blocks);
        let without_markers = self.stray_marker.replace_all(&without_unterminated, "");
        BLANK_LINES
            .replace_all(&without_markers, "\n")
            .trim()
            .to_string()
    }

    /// Decode a response and compute the prose left once the call is removed.
    ///
    /// A call found by the bare-object strategy is cut out of the prose too.
    pub fn split(&self, text: &str) -> Split {
        let (decoded, bare_range) = self.locate(text);
        let prose = match bare_range {
            Some(range) => {
                let mut remaining = String::with_capacity(text.len());
                remaining.push_str(&text[..range.start]);
                remaining.push_str(&text[range.end..]);
                self.strip(&remaining)
            }
            None => self.strip(text),
        };
        Split { decoded, prose }
    }

    fn locate(&self, text: &str) -> (Decoded, Option<Range<usize>>) {
        for strategy in &self.strategies {
            let Extraction::Match(span) = strategy.extract(text) else {
                continue;
            };
            debug!(strategy = strategy.name(), span = span.body, "Found tool call span");
            let decoded = self.parse_span(span.body);
            let bare_range = (strategy.survives_strip() && matches!(decoded, Decoded::Call(_)))
                .then_some(span.range);
            return (decoded, bare_range);
        }

        if text.contains(&self.markers.open) {
            return (
                Decoded::Malformed {
                    reason: "call marker is not followed by a JSON object".into(),
                },
                None,
            );
        }
        (Decoded::NoCall, None)
    }

    fn parse_span(&self, span: &str) -> Decoded {
        let span = span.trim();
        let candidates = [
            Some(span),
            extract::object_end(span).map(|end| &span[..end]),
            span.split_once(" 和 ").map(|(head, _)| head),
            span.split_once(" and ").map(|(head, _)| head),
            span.lines().next(),
        ];

        for candidate in candidates.into_iter().flatten() {
            let candidate = candidate.trim();
            if !(candidate.starts_with('{') && candidate.ends_with('}')) {
                continue;
            }
            let Ok(Value::Object(object)) = serde_json::from_str::<Value>(candidate) else {
                trace!(candidate, "Candidate is not a JSON object");
                continue;
            };
            if let Some(call) = self.to_call(object) {
                return Decoded::Call(call);
            }
        }

        Decoded::Malformed {
            reason: "could not parse any valid tool call JSON".into(),
        }
    }

    fn to_call(&self, mut object: Map<String, Value>) -> Option<ToolCall> {
        if let Some(policy) = &self.repair
            && object.contains_key(&policy.key)
            && !object.contains_key("tool_name")
        {
            debug!(tool = %policy.default_tool, "Repairing call without tool_name");
            return Some(ToolCall::new(policy.default_tool.clone(), object));
        }

        let tool_name = match object.remove("tool_name") {
            Some(Value::String(name)) => name,
            _ => return None,
        };
        match object.remove("parameters") {
            Some(Value::Object(parameters)) => Some(ToolCall::new(tool_name, parameters)),
            _ => None,
        }
    }

    fn remove_unterminated(&self, text: &str) -> String {
        let open = &self.markers.open;
        let mut out = String::with_capacity(text.len());
        let mut rest = text;
        while let Some(start) = rest.find(open.as_str()) {
            out.push_str(&rest[..start]);
            let after_marker = start + open.len();
            match extract::unterminated_value(rest, after_marker, open) {
                Some(range) => {
                    let tail = &rest[range.end..];
                    let spaces = tail.len() - tail.trim_start_matches([' ', '\t']).len();
                    let mut end = range.end + spaces;
                    if rest[end..].starts_with('\n') {
                        end += 1;
                    }
                    rest = &rest[end..];
                }
                None => {
                    // Leave the bare marker for the stray-marker pass.
                    out.push_str(open);
                    rest = &rest[after_marker..];
                }
            }
        }
        out.push_str(rest);
        out
    }
}

impl Default for ToolCallCodec {
    fn default() -> Self {
        Self::new(Markers::default(), Some(RepairPolicy::default()))
            .expect("default markers form a valid codec")
    }
}

/// Markers shaped like `<name>` / `</name>` also match attribute-carrying
/// variants such as `<name id="1">`; anything else is matched literally.
fn stray_marker_pattern(markers: &Markers) -> String {
    let tag = markers
        .open
        .strip_prefix('<')
        .and_then(|s| s.strip_suffix('>'))
        .filter(|name| {
            !name.is_empty()
                && name
                    .chars()
                    .all(|c| c.is_alphanumeric() || c == '_' || c == '-')
        });
    match tag {
        Some(name) if markers.close == format!("</{name}>") => {
            format!("</?{}[^>]*>", regex::escape(name))
        }
        _ => format!(
            "{}|{}",
            regex::escape(&markers.open),
            regex::escape(&markers.close)
        ),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;
    use serde_json::json;

    fn codec() -> ToolCallCodec {
        ToolCallCodec::default()
    }

    fn call_of(decoded: Decoded) -> ToolCall {
        match decoded {
            Decoded::Call(call) => call,
            other => panic!("expected a call, got {other:?}"),
        }
    }

    #[test]
    fn test_decode_delimited() {
        let text = "Let me work that out.\n<tool_call>\n{\"tool_name\": \"calculator\", \"parameters\": {\"expression\": \"2+2\"}}\n</tool_call>";
        let call = call_of(codec().decode(text));
        assert_eq!(call.tool_name, "calculator");
        assert_eq!(call.parameters.get("expression"), Some(&json!("2+2")));
    }

    #[test]
    fn test_decode_no_call() {
        assert_eq!(codec().decode("Paris is the capital of France."), Decoded::NoCall);
        assert_eq!(codec().decode(""), Decoded::NoCall);
    }

    #[test]
    fn test_decode_malformed_json() {
        let decoded = codec().decode("<tool_call>{not json}</tool_call>");
        assert!(matches!(decoded, Decoded::Malformed { .. }));
    }

    #[test]
    fn test_decode_marker_without_object_is_malformed() {
        let decoded = codec().decode("<tool_call> calculator please");
        assert!(matches!(decoded, Decoded::Malformed { .. }));
    }

    #[test]
    fn test_decode_missing_parameters_is_malformed() {
        let decoded = codec().decode("<tool_call>{\"tool_name\": \"calculator\"}</tool_call>");
        assert!(matches!(decoded, Decoded::Malformed { .. }));
    }

    #[test]
    fn test_decode_unterminated() {
        let text = "<tool_call>{\"tool_name\": \"weather_checker\", \"parameters\": {\"location\": \"Oslo\", \"action\": \"current\"}}\nChecking now.";
        let call = call_of(codec().decode(text));
        assert_eq!(call.tool_name, "weather_checker");
        assert_eq!(call.parameters.get("location"), Some(&json!("Oslo")));
    }

    #[test]
    fn test_decode_bare_object() {
        let text = "{\"tool_name\": \"calculator\", \"parameters\": {\"expression\": \"3*3\"}}";
        let call = call_of(codec().decode(text));
        assert_eq!(call.tool_name, "calculator");
    }

    #[test]
    fn test_repair_wraps_default_tool() {
        let call = call_of(codec().decode("<tool_call>{\"expression\": \"sqrt(16)\"}</tool_call>"));
        assert_eq!(call.tool_name, "calculator");
        assert_eq!(call.parameters.get("expression"), Some(&json!("sqrt(16)")));
    }

    #[test]
    fn test_repair_disabled() {
        let codec = ToolCallCodec::new(Markers::default(), None).unwrap();
        let decoded = codec.decode("<tool_call>{\"expression\": \"sqrt(16)\"}</tool_call>");
        assert!(matches!(decoded, Decoded::Malformed { .. }));
    }

    #[test]
    fn test_repair_custom_policy() {
        let policy = RepairPolicy {
            key: "location".into(),
            default_tool: "weather_checker".into(),
        };
        let codec = ToolCallCodec::new(Markers::default(), Some(policy)).unwrap();
        let call = call_of(codec.decode("<tool_call>{\"location\": \"Lima\"}</tool_call>"));
        assert_eq!(call.tool_name, "weather_checker");
    }

    #[test]
    fn test_concatenated_calls_first_wins() {
        let text = "<tool_call>{\"tool_name\": \"calculator\", \"parameters\": {\"expression\": \"1+1\"}} and {\"tool_name\": \"calculator\", \"parameters\": {\"expression\": \"2+2\"}}</tool_call>";
        let call = call_of(codec().decode(text));
        assert_eq!(call.parameters.get("expression"), Some(&json!("1+1")));
    }

    #[test]
    fn test_first_balanced_object_candidate() {
        let text = "<tool_call>{\"tool_name\": \"calendar_scheduler\", \"parameters\": {\"title\": \"Salt and pepper\"}} and {\"tool_name\": \"x\", \"parameters\": {}}</tool_call>";
        let call = call_of(codec().decode(text));
        assert_eq!(call.tool_name, "calendar_scheduler");
        assert_eq!(call.parameters.get("title"), Some(&json!("Salt and pepper")));
    }

    #[test]
    fn test_chinese_conjunction_candidate() {
        let text = "<tool_call>{\"tool_name\": \"calculator\", \"parameters\": {\"expression\": \"5-1\"}} 和 {\"tool_name\": \"x\", \"parameters\": {}}</tool_call>";
        let call = call_of(codec().decode(text));
        assert_eq!(call.parameters.get("expression"), Some(&json!("5-1")));
    }

    #[test]
    fn test_first_line_candidate() {
        let text = "<tool_call>{\"tool_name\": \"calculator\", \"parameters\": {\"expression\": \"7\"}}\nextra text</tool_call>";
        let call = call_of(codec().decode(text));
        assert_eq!(call.parameters.get("expression"), Some(&json!("7")));
    }

    #[test]
    fn test_strip_complete_block() {
        let text = "Sure thing.\n\n<tool_call>\n{\"tool_name\": \"calculator\", \"parameters\": {}}\n</tool_call>\n\nAnything else?";
        assert_eq!(codec().strip(text), "Sure thing.\nAnything else?");
    }

    #[test]
    fn test_strip_unterminated_and_stray() {
        let text = "Done</tool_call>\n<tool_call>{\"tool_name\": \"calculator\", \"parameters\": {\"expression\": \"1\"}}\nBye";
        assert_eq!(codec().strip(text), "Done\nBye");
    }

    #[test]
    fn test_strip_attribute_marker() {
        assert_eq!(codec().strip("Hi <tool_call id=\"3\">there"), "Hi there");
    }

    #[test]
    fn test_strip_without_spans_is_identity() {
        let text = "The capital of France is Paris.";
        assert_eq!(codec().strip(text), text);
    }

    #[test]
    fn test_split_removes_bare_object() {
        let text = "{\"tool_name\": \"calculator\", \"parameters\": {\"expression\": \"3*3\"}}";
        let split = codec().split(text);
        assert!(matches!(split.decoded, Decoded::Call(_)));
        assert_eq!(split.prose, "");
    }

    #[test]
    fn test_custom_markers() {
        let codec = ToolCallCodec::new(Markers::new("<call>", "</call>"), None).unwrap();
        let split = codec.split("<call>{\"tool_name\":\"calculator\",\"parameters\":{\"expression\":\"2+2\"}}</call>");
        assert_eq!(call_of(split.decoded).tool_name, "calculator");
        assert_eq!(split.prose, "");
    }

    #[test]
    fn test_non_tag_markers() {
        let codec = ToolCallCodec::new(Markers::new("[[call]]", "[[/call]]"), None).unwrap();
        let split = codec.split("ok [[call]]{\"tool_name\":\"a\",\"parameters\":{}}[[/call]] done");
        assert_eq!(call_of(split.decoded).tool_name, "a");
        assert_eq!(split.prose, "ok  done");
    }

    #[test]
    fn test_invalid_markers_rejected() {
        assert!(ToolCallCodec::new(Markers::new("", "</x>"), None).is_err());
        assert!(ToolCallCodec::new(Markers::new("@@", "@@"), None).is_err());
    }

    #[test]
    fn test_encode_then_decode() {
        let mut params = Map::new();
        params.insert("location".into(), json!("Tokyo"));
        params.insert("days".into(), json!(3));
        let call = ToolCall::new("weather_checker", params);
        let codec = codec();
        assert_eq!(call_of(codec.decode(&codec.encode_call(&call))), call);
    }
}
