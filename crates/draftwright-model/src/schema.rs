//! Machine-checkable output schemas sent alongside model requests.

use crate::ports::ToolDefinition;
use draftwright_core::{ModelResponse, embedded_json};
use serde_json::{Value, json};

pub const PROPOSE_TOOL: &str = "propose_changes";
pub const SELECT_TOOL: &str = "select_paths";

/// `{changes: [{path, value, operation}], reason}`.
#[must_use]
pub fn edit_list_schema() -> Value {
    json!({
        "type": "object",
        "properties": {
            "changes": {
                "type": "array",
                "items": {
                    "type": "object",
                    "properties": {
                        "path": {
                            "type": "string",
                            "description": "Dotted path, e.g. system.traits.value or items[0].name"
                        },
                        "value": {
                            "description": "New value, or the element(s) to add or remove"
                        },
                        "operation": {
                            "type": "string",
                            "enum": ["set", "add", "remove"]
                        }
                    },
                    "required": ["path", "value", "operation"]
                }
            },
            "reason": { "type": "string" }
        },
        "required": ["changes", "reason"]
    })
}

/// `{paths: [string]}`.
#[must_use]
pub fn path_selection_schema() -> Value {
    json!({
        "type": "object",
        "properties": {
            "paths": {
                "type": "array",
                "items": { "type": "string" }
            }
        },
        "required": ["paths"]
    })
}

#[must_use]
pub fn propose_tool() -> ToolDefinition {
    ToolDefinition {
        name: PROPOSE_TOOL.to_string(),
        description: "Propose an ordered list of changes to the document.".to_string(),
        parameters: edit_list_schema(),
    }
}

#[must_use]
pub fn select_tool() -> ToolDefinition {
    ToolDefinition {
        name: SELECT_TOOL.to_string(),
        description: "Choose the document paths needed to fulfil the request.".to_string(),
        parameters: path_selection_schema(),
    }
}

/// Paths chosen by the model, from a tool call or JSON in the text.
///
/// Accepts `{"paths": [...]}` or a bare array of strings. `None` when
/// nothing usable is found.
#[must_use]
pub fn selected_paths(response: &ModelResponse) -> Option<Vec<String>> {
    let from_calls = response.tool_calls.iter().find_map(|call| match &call.arguments {
        Value::String(s) => serde_json::from_str::<Value>(s).ok().as_ref().and_then(path_list),
        other => path_list(other),
    });

    from_calls.or_else(|| embedded_json(&response.text).find_map(|value| path_list(&value)))
}

fn path_list(value: &Value) -> Option<Vec<String>> {
    let items = match value {
        Value::Array(items) => items,
        Value::Object(map) => map.get("paths")?.as_array()?,
        _ => return None,
    };
    items
        .iter()
        .map(|item| item.as_str().map(str::to_string))
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_schemas_require_fields() {
        assert_eq!(edit_list_schema()["required"], json!(["changes", "reason"]));
        assert_eq!(
            edit_list_schema()["properties"]["changes"]["items"]["properties"]["operation"]["enum"],
            json!(["set", "add", "remove"])
        );
        assert_eq!(path_selection_schema()["required"], json!(["paths"]));
        assert_eq!(propose_tool().name, PROPOSE_TOOL);
        assert_eq!(select_tool().parameters, path_selection_schema());
    }

    #[test]
    fn test_selected_paths_from_tool_call() {
        let response = ModelResponse::default()
            .with_tool_call(SELECT_TOOL, json!("{\"paths\": [\"name\", \"system.traits.value\"]}"));
        assert_eq!(
            selected_paths(&response),
            Some(vec!["name".to_string(), "system.traits.value".to_string()])
        );
    }

    #[test]
    fn test_selected_paths_from_text() {
        let response = ModelResponse::text("I need these:\n```json\n[\"system.description.value\"]\n```");
        assert_eq!(
            selected_paths(&response),
            Some(vec!["system.description.value".to_string()])
        );

        assert_eq!(selected_paths(&ModelResponse::text("no idea")), None);
        assert_eq!(selected_paths(&ModelResponse::text("[1, 2]")), None);
    }
}
