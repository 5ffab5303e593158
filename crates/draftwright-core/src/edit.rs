//! Proposed edits and edit batches.

use crate::error::{CoreError, Result};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::fmt;

/// What an edit does to its target.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Operation {
    /// Replace the target.
    #[default]
    Set,
    /// Append to the target list.
    Add,
    /// Drop matching elements from the target list, or clear a non-list.
    Remove,
}

impl Operation {
    /// Lenient reading of a model-supplied label. Unknown labels mean `Set`.
    #[must_use]
    pub fn from_label(label: &str) -> Self {
        match label.trim().to_ascii_lowercase().as_str() {
            "add" | "append" | "push" | "insert" => Self::Add,
            "remove" | "delete" | "drop" => Self::Remove,
            _ => Self::Set,
        }
    }
}

impl fmt::Display for Operation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Set => write!(f, "set"),
            Self::Add => write!(f, "add"),
            Self::Remove => write!(f, "remove"),
        }
    }
}

fn empty_string() -> Value {
    Value::String(String::new())
}

/// A single proposed change.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Edit {
    /// Path text, e.g. `system.traits.value` or `items[1].name`.
    pub path: String,
    #[serde(default = "empty_string")]
    pub value: Value,
    #[serde(default)]
    pub operation: Operation,
}

impl Edit {
    #[must_use]
    pub fn new(path: impl Into<String>, value: impl Into<Value>, operation: Operation) -> Self {
        Self {
            path: path.into(),
            value: value.into(),
            operation,
        }
    }

    #[must_use]
    pub fn set(path: impl Into<String>, value: impl Into<Value>) -> Self {
        Self::new(path, value, Operation::Set)
    }

    #[must_use]
    pub fn add(path: impl Into<String>, value: impl Into<Value>) -> Self {
        Self::new(path, value, Operation::Add)
    }

    #[must_use]
    pub fn remove(path: impl Into<String>, value: impl Into<Value>) -> Self {
        Self::new(path, value, Operation::Remove)
    }

    /// Parse `path=value`, `path+=value` or `path-=value`.
    ///
    /// The value is read as JSON when possible, otherwise as a string.
    ///
    /// # Errors
    /// Returns `CoreError::InvalidPath` if there is no `=` or the path is empty.
    pub fn parse(input: &str) -> Result<Self> {
        let (lhs, value) = split_assignment(input).ok_or_else(|| {
            CoreError::InvalidPath(format!("expected 'path=value', got '{input}'"))
        })?;

        let (path, operation) = if let Some(path) = lhs.strip_suffix('+') {
            (path, Operation::Add)
        } else if let Some(path) = lhs.strip_suffix('-') {
            (path, Operation::Remove)
        } else {
            (lhs, Operation::Set)
        };

        let path = path.trim();
        if path.is_empty() {
            return Err(CoreError::InvalidPath(format!("empty path in '{input}'")));
        }

        let value_str = value.trim();
        let value = serde_json::from_str(value_str)
            .unwrap_or_else(|_| Value::String(value_str.to_string()));

        Ok(Self::new(path, value, operation))
    }

    /// Build an edit from loosely-shaped model output.
    ///
    /// Missing operation means `Set`, missing value means `""`, and a missing
    /// or non-string path falls back to `fallback_path`.
    #[must_use]
    pub fn from_loose(raw: &Value, fallback_path: &str) -> Self {
        let path = raw
            .get("path")
            .and_then(Value::as_str)
            .map(str::trim)
            .filter(|p| !p.is_empty())
            .unwrap_or(fallback_path);

        let operation = raw
            .get("operation")
            .or_else(|| raw.get("op"))
            .and_then(Value::as_str)
            .map(Operation::from_label)
            .unwrap_or_default();

        let value = raw.get("value").cloned().unwrap_or_else(empty_string);

        Self::new(path, value, operation)
    }
}

/// Split at the first `=` outside brackets, so predicates survive.
fn split_assignment(input: &str) -> Option<(&str, &str)> {
    let mut depth = 0usize;
    for (pos, c) in input.char_indices() {
        match c {
            '[' => depth += 1,
            ']' => depth = depth.saturating_sub(1),
            '=' if depth == 0 => return Some((&input[..pos], &input[pos + 1..])),
            _ => {}
        }
    }
    None
}

/// Which parsing strategy produced a batch.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ParseTier {
    /// Arguments of a provider-native structured call.
    StructuredCall,
    /// JSON found in free text.
    EmbeddedJson,
    /// Labeled block in prose; lowest confidence.
    Heuristic,
    /// Nothing usable; the raw text is kept as a draft.
    Fallback,
    /// Written by hand rather than parsed.
    Manual,
}

impl fmt::Display for ParseTier {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let label = match self {
            Self::StructuredCall => "structured call",
            Self::EmbeddedJson => "embedded json",
            Self::Heuristic => "heuristic",
            Self::Fallback => "fallback",
            Self::Manual => "manual",
        };
        f.write_str(label)
    }
}

/// Ordered edits plus the model's stated reason.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EditBatch {
    #[serde(rename = "changes")]
    pub edits: Vec<Edit>,
    #[serde(default)]
    pub reason: String,
    #[serde(default = "manual_tier")]
    pub tier: ParseTier,
}

const fn manual_tier() -> ParseTier {
    ParseTier::Manual
}

impl EditBatch {
    #[must_use]
    pub fn new(edits: Vec<Edit>, reason: impl Into<String>, tier: ParseTier) -> Self {
        Self {
            edits,
            reason: reason.into(),
            tier,
        }
    }

    /// A hand-written batch.
    #[must_use]
    pub fn manual(edits: Vec<Edit>, reason: impl Into<String>) -> Self {
        Self::new(edits, reason, ParseTier::Manual)
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.edits.is_empty()
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.edits.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_edit_parse() {
        let edit = Edit::parse("name=Renamed Blade").unwrap();
        assert_eq!(edit, Edit::set("name", "Renamed Blade"));

        let edit = Edit::parse("system.level=3").unwrap();
        assert_eq!(edit.value, json!(3));

        let edit = Edit::parse("system.traits.value+=flaming").unwrap();
        assert_eq!(edit, Edit::add("system.traits.value", "flaming"));

        let edit = Edit::parse(r#"system.traits.value-=["fire","cold"]"#).unwrap();
        assert_eq!(edit.operation, Operation::Remove);
        assert_eq!(edit.value, json!(["fire", "cold"]));

        let edit = Edit::parse("items[?(@.type=='weapon')].name=Greatbow").unwrap();
        assert_eq!(edit.path, "items[?(@.type=='weapon')].name");
        assert_eq!(edit.value, json!("Greatbow"));

        assert!(Edit::parse("no equals sign").is_err());
        assert!(Edit::parse("=5").is_err());
    }

    #[test]
    fn test_operation_labels() {
        assert_eq!(Operation::from_label("SET"), Operation::Set);
        assert_eq!(Operation::from_label(" append "), Operation::Add);
        assert_eq!(Operation::from_label("delete"), Operation::Remove);
        assert_eq!(Operation::from_label("frobnicate"), Operation::Set);
    }

    #[test]
    fn test_from_loose_defaults() {
        let edit = Edit::from_loose(&json!({}), "system.description.value");
        assert_eq!(edit, Edit::set("system.description.value", ""));

        let edit = Edit::from_loose(
            &json!({ "path": "system.traits.value", "value": "fire", "operation": "add" }),
            "fallback",
        );
        assert_eq!(edit, Edit::add("system.traits.value", "fire"));

        let edit = Edit::from_loose(&json!({ "path": 7, "value": null }), "fallback");
        assert_eq!(edit.path, "fallback");
        assert_eq!(edit.value, Value::Null);
    }

    #[test]
    fn test_batch_serialization() {
        let batch = EditBatch::manual(vec![Edit::set("name", "X")], "rename");
        let json = serde_json::to_value(&batch).unwrap();
        assert_eq!(
            json,
            json!({
                "changes": [{ "path": "name", "value": "X", "operation": "set" }],
                "reason": "rename",
                "tier": "manual"
            })
        );

        let back: EditBatch =
            serde_json::from_value(json!({ "changes": [{ "path": "name" }] })).unwrap();
        assert_eq!(back.edits[0].value, json!(""));
        assert_eq!(back.tier, ParseTier::Manual);
    }
}
