//! Extraction of edit batches from model responses.
//!
//! Models do not always honor the requested output schema, so parsing runs
//! through ordered tiers and stops at the first one that yields edits:
//!
//! 1. arguments of a provider-native structured (tool) call
//! 2. JSON embedded in the response text, fenced blocks first
//! 3. a labeled prose block such as `Description: ...`
//! 4. the raw text itself, kept as a draft at the fallback path
//!
//! Parsing is total: every input, including empty and garbage text, yields a
//! well-formed `EditBatch`.
//!
//! Provider envelopes differ in where tool calls and text live. They are
//! normalized into a `ModelResponse` first, by an adapter chosen for the
//! detected `Dialect`.

use crate::edit::{Edit, EditBatch, ParseTier};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::fmt;

/// Default target for heuristic and fallback edits.
pub const DEFAULT_FALLBACK_PATH: &str = "system.description.value";

/// A structured call emitted by the model.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ToolCall {
    pub name: String,
    /// JSON object, or a string holding JSON, depending on the provider.
    pub arguments: Value,
}

/// A provider response reduced to what the parser needs.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ModelResponse {
    #[serde(default)]
    pub tool_calls: Vec<ToolCall>,
    #[serde(default)]
    pub text: String,
}

impl ModelResponse {
    #[must_use]
    pub fn text(text: impl Into<String>) -> Self {
        Self {
            tool_calls: Vec::new(),
            text: text.into(),
        }
    }

    #[must_use]
    pub fn with_tool_call(mut self, name: impl Into<String>, arguments: Value) -> Self {
        self.tool_calls.push(ToolCall {
            name: name.into(),
            arguments,
        });
        self
    }

    /// Everything the model said, for the fallback draft.
    fn raw_text(&self) -> String {
        if !self.text.trim().is_empty() || self.tool_calls.is_empty() {
            return self.text.clone();
        }
        self.tool_calls
            .iter()
            .map(|call| match &call.arguments {
                Value::String(s) => s.clone(),
                other => other.to_string(),
            })
            .collect::<Vec<_>>()
            .join("\n")
    }
}

/// Response envelope family.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Dialect {
    /// `choices[0].message` with `tool_calls[].function`.
    OpenAi,
    /// Top-level `content` blocks of type `text` / `tool_use`.
    Anthropic,
    /// Top-level `message` with `content` and `tool_calls`.
    Ollama,
    /// Anything else: the body is the response text.
    PlainText,
}

impl fmt::Display for Dialect {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let label = match self {
            Self::OpenAi => "openai",
            Self::Anthropic => "anthropic",
            Self::Ollama => "ollama",
            Self::PlainText => "plain text",
        };
        f.write_str(label)
    }
}

/// Normalizes one envelope family.
pub trait EnvelopeAdapter: Sync {
    fn dialect(&self) -> Dialect;

    fn matches(&self, raw: &Value) -> bool;

    fn normalize(&self, raw: &Value) -> ModelResponse;
}

struct OpenAiAdapter;

impl EnvelopeAdapter for OpenAiAdapter {
    fn dialect(&self) -> Dialect {
        Dialect::OpenAi
    }

    fn matches(&self, raw: &Value) -> bool {
        raw.get("choices").is_some_and(Value::is_array)
    }

    fn normalize(&self, raw: &Value) -> ModelResponse {
        let message = raw.pointer("/choices/0/message");
        let text = message
            .and_then(|m| m.get("content"))
            .and_then(Value::as_str)
            .unwrap_or_default()
            .to_string();

        let tool_calls = message
            .and_then(|m| m.get("tool_calls"))
            .and_then(Value::as_array)
            .map(|calls| calls.iter().filter_map(function_call).collect())
            .unwrap_or_default();

        ModelResponse { tool_calls, text }
    }
}

struct OllamaAdapter;

impl EnvelopeAdapter for OllamaAdapter {
    fn dialect(&self) -> Dialect {
        Dialect::Ollama
    }

    fn matches(&self, raw: &Value) -> bool {
        raw.get("message").is_some_and(Value::is_object)
    }

    fn normalize(&self, raw: &Value) -> ModelResponse {
        let message = &raw["message"];
        let text = message["content"].as_str().unwrap_or_default().to_string();
        let tool_calls = message["tool_calls"]
            .as_array()
            .map(|calls| calls.iter().filter_map(function_call).collect())
            .unwrap_or_default();

        ModelResponse { tool_calls, text }
    }
}

struct AnthropicAdapter;

impl EnvelopeAdapter for AnthropicAdapter {
    fn dialect(&self) -> Dialect {
        Dialect::Anthropic
    }

    fn matches(&self, raw: &Value) -> bool {
        raw.get("content")
            .and_then(Value::as_array)
            .is_some_and(|blocks| blocks.iter().any(|b| b.get("type").is_some()))
    }

    fn normalize(&self, raw: &Value) -> ModelResponse {
        let mut response = ModelResponse::default();
        let mut texts = Vec::new();

        for block in raw["content"].as_array().into_iter().flatten() {
            match block["type"].as_str() {
                Some("text") => {
                    if let Some(text) = block["text"].as_str() {
                        texts.push(text);
                    }
                }
                Some("tool_use") => response.tool_calls.push(ToolCall {
                    name: block["name"].as_str().unwrap_or_default().to_string(),
                    arguments: block["input"].clone(),
                }),
                _ => {}
            }
        }

        response.text = texts.join("\n");
        response
    }
}

/// `{function: {name, arguments}}`, shared by OpenAI and Ollama.
fn function_call(call: &Value) -> Option<ToolCall> {
    let function = call.get("function")?;
    Some(ToolCall {
        name: function["name"].as_str().unwrap_or_default().to_string(),
        arguments: function.get("arguments").cloned().unwrap_or(Value::Null),
    })
}

static ADAPTERS: [&dyn EnvelopeAdapter; 3] = [&OpenAiAdapter, &AnthropicAdapter, &OllamaAdapter];

/// Dialect of a decoded envelope.
#[must_use]
pub fn detect_dialect(raw: &Value) -> Dialect {
    ADAPTERS
        .iter()
        .find(|adapter| adapter.matches(raw))
        .map_or(Dialect::PlainText, |adapter| adapter.dialect())
}

/// Normalize a decoded envelope. Unknown shapes become plain text.
#[must_use]
pub fn normalize_envelope(raw: &Value) -> ModelResponse {
    match ADAPTERS.iter().find(|adapter| adapter.matches(raw)) {
        Some(adapter) => adapter.normalize(raw),
        None => match raw {
            Value::String(text) => ModelResponse::text(text.clone()),
            other => ModelResponse::text(other.to_string()),
        },
    }
}

/// Normalize a raw response body, which may or may not be an envelope.
#[must_use]
pub fn normalize_body(body: &str) -> ModelResponse {
    match serde_json::from_str::<Value>(body) {
        Ok(raw) if detect_dialect(&raw) != Dialect::PlainText => normalize_envelope(&raw),
        _ => ModelResponse::text(body),
    }
}

/// A prose label and the path its block is written to.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct HeuristicLabel {
    pub label: String,
    pub path: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ParserOptions {
    /// Object fields that hold the edit list, in preference order.
    pub edit_fields: Vec<String>,
    /// Target for edits without a path and for the fallback draft.
    pub fallback_path: String,
    /// Labeled blocks tried by the heuristic tier.
    pub heuristic_labels: Vec<HeuristicLabel>,
}

impl Default for ParserOptions {
    fn default() -> Self {
        Self {
            edit_fields: vec!["changes".to_string(), "edits".to_string()],
            fallback_path: DEFAULT_FALLBACK_PATH.to_string(),
            heuristic_labels: vec![HeuristicLabel {
                label: "Description".to_string(),
                path: DEFAULT_FALLBACK_PATH.to_string(),
            }],
        }
    }
}

type Tier = fn(&ResponseParser, &ModelResponse) -> Option<EditBatch>;

#[derive(Debug, Clone, Default)]
pub struct ResponseParser {
    options: ParserOptions,
}

impl ResponseParser {
    const TIERS: [Tier; 3] = [
        Self::from_structured_call,
        Self::from_embedded_json,
        Self::from_labeled_block,
    ];

    #[must_use]
    pub const fn new(options: ParserOptions) -> Self {
        Self { options }
    }

    #[must_use]
    pub const fn options(&self) -> &ParserOptions {
        &self.options
    }

    /// Extract an edit batch. Never fails.
    #[must_use]
    pub fn parse(&self, response: &ModelResponse) -> EditBatch {
        Self::TIERS
            .iter()
            .find_map(|tier| tier(self, response))
            .unwrap_or_else(|| self.fallback(response))
    }

    /// Convenience for a bare text response.
    #[must_use]
    pub fn parse_text(&self, text: &str) -> EditBatch {
        self.parse(&ModelResponse::text(text))
    }

    fn from_structured_call(&self, response: &ModelResponse) -> Option<EditBatch> {
        response.tool_calls.iter().find_map(|call| {
            let arguments = match &call.arguments {
                Value::String(s) => serde_json::from_str(s).ok()?,
                other => other.clone(),
            };
            self.batch_from_json(&arguments, false, ParseTier::StructuredCall)
        })
    }

    fn from_embedded_json(&self, response: &ModelResponse) -> Option<EditBatch> {
        embedded_json(&response.text)
            .find_map(|value| self.batch_from_json(&value, true, ParseTier::EmbeddedJson))
    }

    fn from_labeled_block(&self, response: &ModelResponse) -> Option<EditBatch> {
        self.options.heuristic_labels.iter().find_map(|label| {
            let block = labeled_block(&response.text, &label.label)?;
            Some(EditBatch::new(
                vec![Edit::set(label.path.clone(), block)],
                format!("extracted from labeled '{}' block", label.label),
                ParseTier::Heuristic,
            ))
        })
    }

    fn fallback(&self, response: &ModelResponse) -> EditBatch {
        EditBatch::new(
            vec![Edit::set(self.options.fallback_path.clone(), response.raw_text())],
            "parse failure: no structured edits found in model response",
            ParseTier::Fallback,
        )
    }

    /// A bare array (when allowed) or an object exposing an edit field.
    fn batch_from_json(&self, value: &Value, allow_bare: bool, tier: ParseTier) -> Option<EditBatch> {
        let (items, reason) = match value {
            Value::Array(items) if allow_bare && items.iter().all(Value::is_object) => {
                (items, String::new())
            }
            Value::Object(map) => {
                let items = self
                    .options
                    .edit_fields
                    .iter()
                    .find_map(|field| map.get(field).and_then(Value::as_array))?;
                let reason = map
                    .get("reason")
                    .and_then(Value::as_str)
                    .unwrap_or_default()
                    .to_string();
                (items, reason)
            }
            _ => return None,
        };

        let edits = items
            .iter()
            .filter(|item| item.is_object())
            .map(|item| Edit::from_loose(item, &self.options.fallback_path))
            .collect();

        Some(EditBatch::new(edits, reason, tier))
    }
}

/// Every JSON object or array embedded in `text`, lazily.
///
/// Fenced blocks come first, then spans of the whole text in order of
/// appearance. Spans that are not valid JSON are skipped.
pub fn embedded_json(text: &str) -> impl Iterator<Item = Value> + '_ {
    fenced_blocks(text)
        .into_iter()
        .chain(std::iter::once(text))
        .flat_map(JsonSpans::new)
        .filter_map(|span| serde_json::from_str(span).ok())
}

/// Contents of ``` fenced blocks, in order. The info string line is dropped.
fn fenced_blocks(text: &str) -> Vec<&str> {
    let mut blocks = Vec::new();
    let mut rest = text;

    while let Some(open) = rest.find("```") {
        let after_fence = &rest[open + 3..];
        let body_start = after_fence.find('\n').map_or(after_fence.len(), |nl| nl + 1);
        let info = &after_fence[..body_start];
        // A fence opened and closed on one line carries its body inline.
        let (body_offset, body) = if info.contains("```") {
            (0, after_fence)
        } else {
            (body_start, &after_fence[body_start..])
        };
        let Some(close) = body.find("```") else {
            break;
        };
        blocks.push(&body[..close]);
        rest = &after_fence[body_offset + close + 3..];
    }

    blocks
}

/// Iterator over bracket-balanced `{...}` / `[...]` spans.
///
/// Strings are honored so braces inside them do not count. After a span the
/// scan restarts one byte past its opening bracket, which lets a caller that
/// rejects an outer span still reach spans nested inside it.
struct JsonSpans<'t> {
    text: &'t str,
    pos: usize,
}

impl<'t> JsonSpans<'t> {
    const fn new(text: &'t str) -> Self {
        Self { text, pos: 0 }
    }
}

impl<'t> Iterator for JsonSpans<'t> {
    type Item = &'t str;

    fn next(&mut self) -> Option<Self::Item> {
        let bytes = self.text.as_bytes();
        while self.pos < bytes.len() {
            let start = self.pos;
            self.pos += 1;
            if matches!(bytes[start], b'{' | b'[') {
                if let Some(end) = matching_close(bytes, start) {
                    return Some(&self.text[start..=end]);
                }
            }
        }
        None
    }
}

fn matching_close(bytes: &[u8], start: usize) -> Option<usize> {
    let mut expected = Vec::new();
    let mut in_string = false;
    let mut escaped = false;

    for (offset, &byte) in bytes[start..].iter().enumerate() {
        if in_string {
            match byte {
                _ if escaped => escaped = false,
                b'\\' => escaped = true,
                b'"' => in_string = false,
                _ => {}
            }
            continue;
        }

        match byte {
            b'"' => in_string = true,
            b'{' => expected.push(b'}'),
            b'[' => expected.push(b']'),
            b'}' | b']' => {
                if expected.pop() != Some(byte) {
                    return None;
                }
                if expected.is_empty() {
                    return Some(start + offset);
                }
            }
            _ => {}
        }
    }

    None
}

/// Text following `label:` up to the next blank line.
///
/// Markdown emphasis and heading markers around the label are ignored.
fn labeled_block(text: &str, label: &str) -> Option<String> {
    let mut lines = text.lines();

    while let Some(line) = lines.next() {
        let Some(first) = strip_label(line, label) else {
            continue;
        };

        let mut block = vec![first];
        block.extend(lines.by_ref().take_while(|l| !l.trim().is_empty()).map(str::trim));
        let joined = block
            .into_iter()
            .filter(|l| !l.is_empty())
            .collect::<Vec<_>>()
            .join("\n");

        if !joined.is_empty() {
            return Some(joined);
        }
    }

    None
}

fn strip_label<'l>(line: &'l str, label: &str) -> Option<&'l str> {
    let trimmed = line.trim().trim_start_matches(['#', '*', '_', ' ']);
    let head = trimmed.get(..label.len())?;
    if !head.eq_ignore_ascii_case(label) {
        return None;
    }
    let rest = trimmed[label.len()..].trim_start_matches(['*', '_']);
    let rest = rest.strip_prefix(':')?;
    Some(rest.trim_start_matches(['*', '_']).trim())
}

/// Parse with default options.
#[must_use]
pub fn parse_response(response: &ModelResponse) -> EditBatch {
    ResponseParser::default().parse(response)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::edit::Operation;
    use pretty_assertions::assert_eq;
    use serde_json::json;

    fn parse_text(text: &str) -> EditBatch {
        ResponseParser::default().parse_text(text)
    }

    #[test]
    fn test_fenced_json_in_prose() {
        let text = "Sure! Here is the rename you asked for.\n\n```json\n{\"changes\":[{\"path\":\"name\",\"value\":\"Renamed\",\"operation\":\"set\"}],\"reason\":\"rename\"}\n```\n\nLet me know if you need more.";
        let batch = parse_text(text);
        assert_eq!(batch.tier, ParseTier::EmbeddedJson);
        assert_eq!(batch.reason, "rename");
        assert_eq!(batch.edits, vec![Edit::set("name", "Renamed")]);
    }

    #[test]
    fn test_structured_call_openai_envelope() {
        let raw = json!({
            "choices": [{
                "message": {
                    "content": null,
                    "tool_calls": [{
                        "type": "function",
                        "function": {
                            "name": "propose_changes",
                            "arguments": "{\"changes\":[{\"path\":\"system.traits.value\",\"value\":\"flaming\",\"operation\":\"add\"}],\"reason\":\"fire theme\"}"
                        }
                    }]
                }
            }]
        });
        assert_eq!(detect_dialect(&raw), Dialect::OpenAi);

        let batch = parse_response(&normalize_envelope(&raw));
        assert_eq!(batch.tier, ParseTier::StructuredCall);
        assert_eq!(batch.reason, "fire theme");
        assert_eq!(batch.edits, vec![Edit::add("system.traits.value", "flaming")]);
    }

    #[test]
    fn test_structured_call_without_edit_field_falls_through() {
        let response = ModelResponse::text("```json\n[{\"path\":\"name\",\"value\":\"B\"}]\n```")
            .with_tool_call("propose_changes", json!({ "thoughts": "none" }));
        let batch = parse_response(&response);
        assert_eq!(batch.tier, ParseTier::EmbeddedJson);
        assert_eq!(batch.edits, vec![Edit::set("name", "B")]);
    }

    #[test]
    fn test_anthropic_and_ollama_envelopes() {
        let anthropic = json!({
            "type": "message",
            "content": [
                { "type": "text", "text": "Updating." },
                { "type": "tool_use", "name": "propose_changes", "input": { "edits": [{ "path": "name", "value": "C" }] } }
            ]
        });
        assert_eq!(detect_dialect(&anthropic), Dialect::Anthropic);
        let response = normalize_envelope(&anthropic);
        assert_eq!(response.text, "Updating.");
        assert_eq!(parse_response(&response).edits, vec![Edit::set("name", "C")]);

        let ollama = json!({
            "message": {
                "content": "",
                "tool_calls": [{ "function": { "name": "propose_changes", "arguments": { "changes": [] } } }]
            }
        });
        assert_eq!(detect_dialect(&ollama), Dialect::Ollama);
        let batch = parse_response(&normalize_envelope(&ollama));
        assert_eq!(batch.tier, ParseTier::StructuredCall);
        assert!(batch.is_empty());
    }

    #[test]
    fn test_normalize_body() {
        assert_eq!(normalize_body("just words"), ModelResponse::text("just words"));
        // JSON that is not an envelope is the response text itself.
        let body = r#"{"changes":[{"path":"name","value":"D"}]}"#;
        assert_eq!(normalize_body(body), ModelResponse::text(body));
        assert_eq!(parse_response(&normalize_body(body)).tier, ParseTier::EmbeddedJson);
    }

    #[test]
    fn test_bare_json_and_string_braces() {
        let text = r#"I changed it: {"reason": "uses } and { in text", "changes": [{"path": "system.notes", "value": "a [b] {c}"}]} done"#;
        let batch = parse_text(text);
        assert_eq!(batch.reason, "uses } and { in text");
        assert_eq!(batch.edits[0].value, json!("a [b] {c}"));
    }

    #[test]
    fn test_fenced_block_preferred_over_earlier_bare_json() {
        let text = "Old: {\"changes\":[{\"path\":\"a\",\"value\":1}]}\n```\n{\"changes\":[{\"path\":\"b\",\"value\":2}]}\n```";
        let batch = parse_text(text);
        assert_eq!(batch.edits, vec![Edit::set("b", 2)]);
    }

    #[test]
    fn test_skips_non_edit_json_to_later_candidate() {
        let text = "See [note 1] and {\"unrelated\": true}. Then {\"changes\": [{\"path\": \"x\", \"value\": 1, \"operation\": \"remove\"}]}";
        let batch = parse_text(text);
        assert_eq!(batch.edits, vec![Edit::remove("x", 1)]);
    }

    #[test]
    fn test_nested_candidate_inside_rejected_outer_span() {
        let text = "{ wrapper: {\"changes\": [{\"path\": \"y\"}]} }";
        let batch = parse_text(text);
        assert_eq!(batch.tier, ParseTier::EmbeddedJson);
        assert_eq!(batch.edits, vec![Edit::set("y", "")]);
    }

    #[test]
    fn test_edit_defaults() {
        let batch = parse_text(r#"[{"value": "orphan"}, {"path": "name", "operation": "ADD"}, 3]"#);
        // A list containing a non-object is not an edit list; falls to fallback.
        assert_eq!(batch.tier, ParseTier::Fallback);

        let batch = parse_text(r#"[{"value": "orphan"}, {"path": "name", "operation": "ADD"}]"#);
        assert_eq!(batch.edits[0].path, DEFAULT_FALLBACK_PATH);
        assert_eq!(batch.edits[0].operation, Operation::Set);
        assert_eq!(batch.edits[1].value, json!(""));
        assert_eq!(batch.edits[1].operation, Operation::Add);
    }

    #[test]
    fn test_heuristic_labeled_block() {
        let text = "I couldn't produce JSON, sorry.\n\n**Description:** A blade wreathed in flame.\nIt hums when drawn.\n\nHope that helps.";
        let batch = parse_text(text);
        assert_eq!(batch.tier, ParseTier::Heuristic);
        assert_eq!(
            batch.edits,
            vec![Edit::set(
                DEFAULT_FALLBACK_PATH,
                "A blade wreathed in flame.\nIt hums when drawn."
            )]
        );

        let batch = parse_text("Description:\nMultiline only\n");
        assert_eq!(batch.edits[0].value, json!("Multiline only"));
    }

    #[test]
    fn test_total_failure_keeps_raw_text() {
        let batch = parse_text("The model rambled without structure.");
        assert_eq!(batch.tier, ParseTier::Fallback);
        assert!(batch.reason.starts_with("parse failure"));
        assert_eq!(
            batch.edits,
            vec![Edit::set(DEFAULT_FALLBACK_PATH, "The model rambled without structure.")]
        );
    }

    #[test]
    fn test_never_panics() {
        let inputs = [
            "",
            " ",
            "{",
            "}",
            "[[[",
            "]]]{{",
            "```",
            "```json\n{",
            "``````",
            "\"unterminated",
            "{\"changes\": \"not a list\"}",
            "Description:",
            "descr",
            "ÿ€ {é: [ü]} 🙂",
            "null",
            "[]",
            "{}",
        ];
        for input in inputs {
            let batch = parse_text(input);
            assert!(!batch.edits.is_empty() || batch.tier == ParseTier::EmbeddedJson, "{input:?}");
        }
    }

    #[test]
    fn test_embedded_json_order() {
        let text = "first {\"a\": 1} then\n```\n[\"fenced\"]\n```\nnot json {oops}";
        let values: Vec<Value> = embedded_json(text).collect();
        assert_eq!(values[0], json!(["fenced"]));
        assert_eq!(values[1], json!({ "a": 1 }));
        assert!(values.contains(&json!(["fenced"])));
    }

    #[test]
    fn test_fenced_blocks() {
        let text = "a\n```json\n{\"x\":1}\n```\nb\n```\n[2]\n```\n```{\"inline\":true}```";
        assert_eq!(
            fenced_blocks(text),
            vec!["{\"x\":1}\n", "[2]\n", "{\"inline\":true}"]
        );
        assert!(fenced_blocks("```json\nunterminated").is_empty());
    }
}
