//! Extraction strategies for locating a tool call inside generated text.
//!
//! Each strategy is independent: it either reports the span that looks like
//! a call or reports no match. The codec tries them in priority order and
//! stops at the first match.

use std::ops::Range;
use std::sync::LazyLock;

use regex::Regex;

use super::Markers;

/// A region of the response that a strategy believes holds a call.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Span<'a> {
    /// Text handed to candidate parsing (markers excluded).
    pub body: &'a str,
    /// Byte range of the whole construct in the response, markers included.
    pub range: Range<usize>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Extraction<'a> {
    Match(Span<'a>),
    NoMatch,
}

pub trait ExtractionStrategy: Send + Sync {
    fn name(&self) -> &'static str;

    fn extract<'a>(&self, text: &'a str) -> Extraction<'a>;

    /// Whether a matched span is plain text that marker stripping leaves in
    /// place, so the caller has to cut it out of the prose itself.
    fn survives_strip(&self) -> bool {
        false
    }
}

/// `open … close` with anything in between.
#[derive(Debug, Clone)]
pub struct DelimitedBlock {
    pattern: Regex,
}

impl DelimitedBlock {
    pub fn new(markers: &Markers) -> Result<Self, regex::Error> {
        let pattern = Regex::new(&format!(
            r"(?s){}\s*(.*?)\s*{}",
            regex::escape(&markers.open),
            regex::escape(&markers.close)
        ))?;
        Ok(Self { pattern })
    }
}

impl ExtractionStrategy for DelimitedBlock {
    fn name(&self) -> &'static str {
        "delimited"
    }

    fn extract<'a>(&self, text: &'a str) -> Extraction<'a> {
        match self.pattern.captures(text) {
            Some(caps) => match (caps.get(0), caps.get(1)) {
                (Some(whole), Some(body)) => Extraction::Match(Span {
                    body: body.as_str(),
                    range: whole.range(),
                }),
                _ => Extraction::NoMatch,
            },
            None => Extraction::NoMatch,
        }
    }
}

/// An open marker followed by a `{…}` value and no close marker.
///
/// The value runs to its balancing brace, bounded by the next open marker.
/// When the braces never balance the span ends at the first line break (or
/// the end of the text), so a truncated object still surfaces as a match and
/// later fails to parse instead of silently reading as prose.
#[derive(Debug, Clone)]
pub struct UnterminatedBlock {
    open: String,
}

impl UnterminatedBlock {
    pub fn new(markers: &Markers) -> Self {
        Self {
            open: markers.open.clone(),
        }
    }
}

impl ExtractionStrategy for UnterminatedBlock {
    fn name(&self) -> &'static str {
        "unterminated"
    }

    fn extract<'a>(&self, text: &'a str) -> Extraction<'a> {
        let mut search_from = 0;
        while let Some(found) = text[search_from..].find(&self.open) {
            let start = search_from + found;
            let after_marker = start + self.open.len();
            if let Some(range) = unterminated_value(text, after_marker, &self.open) {
                return Extraction::Match(Span {
                    body: &text[range.clone()],
                    range: start..range.end,
                });
            }
            search_from = after_marker;
        }
        Extraction::NoMatch
    }
}

/// Byte range of the `{…}` value following an open marker, if there is one.
pub(crate) fn unterminated_value(text: &str, from: usize, open: &str) -> Option<Range<usize>> {
    let rest = &text[from..];
    let bounded = match rest.find(open) {
        Some(next) => &rest[..next],
        None => rest,
    };
    let lead = bounded.len() - bounded.trim_start().len();
    let value = &bounded[lead..];
    if !value.starts_with('{') {
        return None;
    }
    let len = object_end(value).unwrap_or_else(|| value.find('\n').unwrap_or(value.len()));
    let start = from + lead;
    Some(start..start + len)
}

/// Byte length of the JSON object at the start of `s`, found by balancing
/// braces outside string literals.
pub(crate) fn object_end(s: &str) -> Option<usize> {
    let mut depth = 0usize;
    let mut in_string = false;
    let mut escaped = false;
    for (i, c) in s.char_indices() {
        if in_string {
            match c {
                _ if escaped => escaped = false,
                '\\' => escaped = true,
                '"' => in_string = false,
                _ => {}
            }
            continue;
        }
        match c {
            '"' => in_string = true,
            '{' => depth += 1,
            '}' => {
                depth = depth.checked_sub(1)?;
                if depth == 0 {
                    return Some(i + 1);
                }
            }
            _ => {}
        }
    }
    None
}

static BARE_CALL_START: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r#"(?m)^[ \t]*(\{)\s*"tool_name"\s*:\s*"[^"]+"\s*,\s*"parameters"\s*:\s*\{"#)
        .expect("valid regex")
});

/// A line that starts with a `{"tool_name": …, "parameters": {…}}` object.
///
/// The body is the first balanced object on the line; the rest of the line
/// (typically further calls joined by "and") belongs to the construct.
#[derive(Debug, Clone, Copy, Default)]
pub struct BareObject;

impl ExtractionStrategy for BareObject {
    fn name(&self) -> &'static str {
        "bare"
    }

    fn survives_strip(&self) -> bool {
        true
    }

    fn extract<'a>(&self, text: &'a str) -> Extraction<'a> {
        for caps in BARE_CALL_START.captures_iter(text) {
            let Some(brace) = caps.get(1) else {
                continue;
            };
            let start = brace.start();
            let Some(len) = object_end(&text[start..]) else {
                continue;
            };
            let end = start + len;
            let line_end = text[end..]
                .find('\n')
                .map_or(text.len(), |offset| end + offset);
            return Extraction::Match(Span {
                body: &text[start..end],
                range: start..line_end,
            });
        }
        Extraction::NoMatch
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn body<'a>(extraction: &Extraction<'a>) -> Option<&'a str> {
        match extraction {
            Extraction::Match(span) => Some(span.body),
            Extraction::NoMatch => None,
        }
    }

    #[test]
    fn test_delimited_block() {
        let strategy = DelimitedBlock::new(&Markers::default()).unwrap();
        let text = "Sure.\n<tool_call>\n{\"tool_name\": \"calculator\"}\n</tool_call>\nDone.";
        let extraction = strategy.extract(text);
        assert_eq!(body(&extraction), Some("{\"tool_name\": \"calculator\"}"));
        if let Extraction::Match(span) = extraction {
            assert!(text[span.range].starts_with("<tool_call>"));
        }
    }

    #[test]
    fn test_delimited_takes_first_block() {
        let strategy = DelimitedBlock::new(&Markers::default()).unwrap();
        let text = "<tool_call>{\"a\":1}</tool_call> and <tool_call>{\"b\":2}</tool_call>";
        assert_eq!(body(&strategy.extract(text)), Some("{\"a\":1}"));
    }

    #[test]
    fn test_delimited_no_close() {
        let strategy = DelimitedBlock::new(&Markers::default()).unwrap();
        assert_eq!(
            strategy.extract("<tool_call>{\"a\":1}"),
            Extraction::NoMatch
        );
    }

    #[test]
    fn test_unterminated_nested_object() {
        let strategy = UnterminatedBlock::new(&Markers::default());
        let text = "<tool_call> {\"tool_name\":\"x\",\"parameters\":{\"a\":1}} trailing words";
        assert_eq!(
            body(&strategy.extract(text)),
            Some("{\"tool_name\":\"x\",\"parameters\":{\"a\":1}}")
        );
    }

    #[test]
    fn test_unterminated_truncated_runs_to_line_end() {
        let strategy = UnterminatedBlock::new(&Markers::default());
        let text = "<tool_call>{\"tool_name\": \"calc\nmore";
        assert_eq!(body(&strategy.extract(text)), Some("{\"tool_name\": \"calc"));
    }

    #[test]
    fn test_unterminated_requires_object() {
        let strategy = UnterminatedBlock::new(&Markers::default());
        assert_eq!(strategy.extract("<tool_call> hello"), Extraction::NoMatch);
        assert_eq!(strategy.extract("no marker {\"a\":1}"), Extraction::NoMatch);
    }

    #[test]
    fn test_bare_object() {
        let text = "{\"tool_name\": \"calculator\", \"parameters\": {\"expression\": \"1+1\"}}";
        assert_eq!(body(&BareObject.extract(text)), Some(text));
        assert_eq!(
            BareObject.extract("the answer is {\"tool_name\": \"x\", \"parameters\": {}}"),
            Extraction::NoMatch
        );
    }

    #[test]
    fn test_bare_object_with_nested_parameters() {
        let text = r#"{"tool_name": "calendar_scheduler", "parameters": {"action": "list_events", "filter": {"day": "mon"}}}"#;
        assert_eq!(body(&BareObject.extract(text)), Some(text));
    }

    #[test]
    fn test_bare_object_joined_by_and_takes_first() {
        let first = r#"{"tool_name":"calculator","parameters":{"expression":"1+1"}}"#;
        let text = format!(
            "{first} and {{\"tool_name\":\"calculator\",\"parameters\":{{\"expression\":\"2+2\"}}}}\nDone."
        );
        let extraction = BareObject.extract(&text);
        assert_eq!(body(&extraction), Some(first));
        if let Extraction::Match(span) = extraction {
            assert_eq!(&text[span.range.end..], "\nDone.");
        }
    }

    #[test]
    fn test_object_end_ignores_braces_in_strings() {
        assert_eq!(object_end(r#"{"a":"}"} rest"#), Some(9));
        assert_eq!(object_end(r#"{"a":"\"}"}"#), Some(11));
        assert_eq!(object_end("{\"a\":{"), None);
    }
}
