//! Serializes tool descriptors into the instruction fragment placed in the
//! generation request.

use std::fmt::Write;

use serde_json::Value;

use super::Markers;
use crate::types::{ToolCall, ToolDescriptor};

/// Render the protocol fragment: call syntax, usage policy, then one block
/// per descriptor.
pub fn protocol_fragment(markers: &Markers, descriptors: &[ToolDescriptor]) -> String {
    let Markers { open, close } = markers;
    let mut out = String::new();

    let _ = write!(
        out,
        "AVAILABLE TOOLS:\n\
         You can call a tool when the user's request needs one. To call a tool, reply with \
         exactly this format:\n\
         {open}\n\
         {{\"tool_name\": \"<tool name>\", \"parameters\": {{\"<parameter>\": <value>}}}}\n\
         {close}\n\n\
         TOOL CALLING RULES:\n\
         1. Only call a tool when the request requires it. Answer general knowledge questions, \
         definitions and casual conversation directly.\n\
         2. Always wrap the JSON object with {open} and {close}.\n\
         3. The object must contain \"tool_name\" and \"parameters\".\n\
         4. Include every required parameter.\n\
         5. Call at most one tool per reply.\n\n\
         Tools:\n"
    );

    for descriptor in descriptors {
        let _ = writeln!(out, "\n{}: {}", descriptor.name, descriptor.description);
        if descriptor.parameters.is_empty() {
            out.push_str("  (no parameters)\n");
            continue;
        }
        for spec in &descriptor.parameters {
            let required = if spec.required { ", required" } else { "" };
            let _ = writeln!(
                out,
                "  - {} ({}{}): {}",
                spec.name, spec.param_type, required, spec.description
            );
            if !spec.allowed_values.is_empty() {
                let options: Vec<String> = spec.allowed_values.iter().map(plain).collect();
                let _ = writeln!(out, "    Options: {}", options.join(", "));
            }
            if let Some(default) = &spec.default {
                let _ = writeln!(out, "    Default: {}", plain(default));
            }
        }
    }

    out
}

/// Render a call in the canonical wire form.
pub fn encode_call(markers: &Markers, call: &ToolCall) -> String {
    let object = serde_json::json!({
        "tool_name": call.tool_name,
        "parameters": call.parameters,
    });
    format!("{}\n{}\n{}", markers.open, object, markers.close)
}

fn plain(value: &Value) -> String {
    match value {
        Value::String(s) => s.clone(),
        other => other.to_string(),
    }
}
