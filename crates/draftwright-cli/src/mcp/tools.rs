//! MCP tool definitions and handlers.

use super::protocol::{ToolCallResult, ToolDefinition};
use crate::output::HumanDisplay;
use anyhow::{Context, Result, bail};
use chrono::{Duration, Utc};
use draftwright_core::{CommitInfo, ModelResponse, ParseTier};
use draftwright_fs::Workspace;
use draftwright_model::schema::{PROPOSE_TOOL, edit_list_schema};
use serde::Deserialize;
use serde_json::{Value, json};
use std::fmt::Write;
use std::path::Path;

const ACTOR: &str = "mcp";

/// All available tool definitions.
pub fn definitions() -> Vec<ToolDefinition> {
    let uid = json!({
        "type": "string",
        "description": "Document UID (e.g., doc:flame-blade)"
    });

    let mut propose_schema = edit_list_schema();
    if let Some(props) = propose_schema["properties"].as_object_mut() {
        props.insert("uid".into(), uid.clone());
        props.insert(
            "commit".into(),
            json!({
                "type": "boolean",
                "description": "Commit the resulting updates (default: false, preview only)",
                "default": false
            }),
        );
    }
    if let Some(required) = propose_schema["required"].as_array_mut() {
        required.push(json!("uid"));
    }

    vec![
        ToolDefinition {
            name: "draftwright_list",
            description: "List documents in the workspace.",
            input_schema: json!({
                "type": "object",
                "properties": {},
                "additionalProperties": false
            }),
        },
        ToolDefinition {
            name: "draftwright_structure",
            description: "Get the field structure of a document: keys and value types, no values. Use it to pick paths before reading or editing.",
            input_schema: json!({
                "type": "object",
                "properties": { "uid": uid },
                "required": ["uid"],
                "additionalProperties": false
            }),
        },
        ToolDefinition {
            name: "draftwright_select",
            description: "Get a reduced copy of a document containing only the given paths (e.g., system.traits.value, items[0].name).",
            input_schema: json!({
                "type": "object",
                "properties": {
                    "uid": uid,
                    "paths": {
                        "type": "array",
                        "items": { "type": "string" },
                        "description": "Dot paths to keep; empty keeps identity fields only"
                    }
                },
                "required": ["uid", "paths"],
                "additionalProperties": false
            }),
        },
        ToolDefinition {
            name: "draftwright_propose",
            description: "Propose edits to a document. Returns the update map that would be written; set commit=true to write it.",
            input_schema: propose_schema,
        },
        ToolDefinition {
            name: "draftwright_history",
            description: "Get the commit history of a document with old and new values per path.",
            input_schema: json!({
                "type": "object",
                "properties": {
                    "uid": uid,
                    "since_days": {
                        "type": "integer",
                        "description": "Only show commits from the last N days"
                    }
                },
                "required": ["uid"],
                "additionalProperties": false
            }),
        },
    ]
}

/// Handle a tool call and return the result.
pub fn call(workspace_path: &Path, name: &str, arguments: Option<Value>) -> ToolCallResult {
    let args = arguments.unwrap_or_else(|| json!({}));

    let outcome = Workspace::open(workspace_path)
        .context("Failed to open workspace")
        .and_then(|ws| match name {
            "draftwright_list" => list(&ws),
            "draftwright_structure" => structure(&ws, args),
            "draftwright_select" => select(&ws, args),
            "draftwright_propose" => propose(&ws, args),
            "draftwright_history" => history(&ws, args),
            _ => bail!("Unknown tool: {name}"),
        });

    match outcome {
        Ok(text) => ToolCallResult::text(text),
        Err(e) => ToolCallResult::error(format!("{e:#}")),
    }
}

fn parse_args<T: serde::de::DeserializeOwned>(args: Value) -> Result<T> {
    serde_json::from_value(args).context("Invalid arguments")
}

fn list(ws: &Workspace) -> Result<String> {
    let documents = ws.list_documents()?;
    if documents.is_empty() {
        return Ok("No documents found.".to_string());
    }

    let mut out = format!("Found {} document(s):\n", documents.len());
    for doc in &documents {
        write!(out, "\n• {} (rev {}) {}", doc.uid, doc.revision, doc.name)?;
    }
    Ok(out)
}

#[derive(Deserialize)]
struct UidArgs {
    uid: String,
}

fn structure(ws: &Workspace, args: Value) -> Result<String> {
    let args: UidArgs = parse_args(args)?;
    let document = ws.get_document(&args.uid)?;
    let shape = ws.config().extractor().extract(&document);
    Ok(serde_json::to_string_pretty(&shape.to_value())?)
}

#[derive(Deserialize)]
struct SelectArgs {
    uid: String,
    paths: Vec<String>,
}

fn select(ws: &Workspace, args: Value) -> Result<String> {
    let args: SelectArgs = parse_args(args)?;
    let document = ws.get_document(&args.uid)?;
    let reduced = ws.config().selector().filter_by_paths(&document, &args.paths);
    Ok(serde_json::to_string_pretty(&reduced)?)
}

#[derive(Deserialize)]
struct ProposeArgs {
    uid: String,
    #[serde(default)]
    commit: bool,
    /// Everything else is the edit list, as the model would send it.
    #[serde(flatten)]
    edits: serde_json::Map<String, Value>,
}

fn propose(ws: &Workspace, args: Value) -> Result<String> {
    let args: ProposeArgs = parse_args(args)?;
    let config = ws.config();

    let response = ModelResponse::default().with_tool_call(PROPOSE_TOOL, Value::Object(args.edits));
    let batch = config.parser().parse(&response);
    if batch.tier == ParseTier::Fallback {
        bail!("No edits recognized; expected {{\"changes\": [{{\"path\", \"value\", \"operation\"}}]}}");
    }

    let document = ws.get_document(&args.uid)?;
    let report = config.applicator().apply_report(&document, &batch);

    let commit = if args.commit {
        let info = CommitInfo::new(&batch.reason)
            .with_actor(ACTOR)
            .with_tier(batch.tier);
        ws.commit(&args.uid, &report.updates, info)?
    } else {
        None
    };

    Ok(serde_json::to_string_pretty(&json!({
        "reason": batch.reason,
        "updates": report.updates,
        "coerced": report.coerced,
        "committed": commit.as_ref().map(|record| &record.id),
    }))?)
}

#[derive(Deserialize)]
struct HistoryArgs {
    uid: String,
    since_days: Option<u32>,
}

fn history(ws: &Workspace, args: Value) -> Result<String> {
    let args: HistoryArgs = parse_args(args)?;
    let since = args
        .since_days
        .map(|days| Utc::now() - Duration::days(i64::from(days)));

    let records = ws.read_history(&args.uid, since)?;
    if records.is_empty() {
        return Ok("No commits found.".to_string());
    }

    Ok(format!(
        "History for {} ({} commits):\n\n{}",
        args.uid,
        records.len(),
        records.human_display()
    ))
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn setup() -> TempDir {
        let tmp = TempDir::new().unwrap();
        let ws = Workspace::init(tmp.path()).unwrap();
        ws.import_document(
            "Flame Blade",
            &json!({
                "_id": "it1",
                "name": "Flame Blade",
                "system": { "traits": { "value": ["fire"] }, "price": 10 }
            }),
        )
        .unwrap();
        tmp
    }

    #[test]
    fn test_definitions_cover_handlers() {
        let names: Vec<&str> = definitions().iter().map(|d| d.name).collect();
        assert_eq!(
            names,
            [
                "draftwright_list",
                "draftwright_structure",
                "draftwright_select",
                "draftwright_propose",
                "draftwright_history"
            ]
        );
        let propose = &definitions()[3];
        assert!(propose.input_schema["properties"]["changes"].is_object());
        assert!(
            propose.input_schema["required"]
                .as_array()
                .unwrap()
                .contains(&json!("uid"))
        );
    }

    #[test]
    fn test_structure_and_select() {
        let tmp = setup();
        let result = call(tmp.path(), "draftwright_structure", Some(json!({ "uid": "doc:flame-blade" })));
        assert!(!result.is_error);
        let shape: Value = serde_json::from_str(result.first_text()).unwrap();
        assert_eq!(shape["system"]["price"], json!("number"));
        assert!(shape.get("_id").is_none());

        let result = call(
            tmp.path(),
            "draftwright_select",
            Some(json!({ "uid": "doc:flame-blade", "paths": ["system.price"] })),
        );
        let reduced: Value = serde_json::from_str(result.first_text()).unwrap();
        assert_eq!(reduced["system"], json!({ "price": 10 }));
    }

    #[test]
    fn test_propose_preview_then_commit() {
        let tmp = setup();
        let args = json!({
            "uid": "doc:flame-blade",
            "changes": [{ "path": "system.traits.value", "value": "magical", "operation": "add" }],
            "reason": "enchant"
        });

        let preview = call(tmp.path(), "draftwright_propose", Some(args.clone()));
        let body: Value = serde_json::from_str(preview.first_text()).unwrap();
        assert_eq!(body["updates"], json!({ "system.traits.value": ["fire", "magical"] }));
        assert_eq!(body["committed"], Value::Null);

        let mut commit_args = args;
        commit_args["commit"] = json!(true);
        let committed = call(tmp.path(), "draftwright_propose", Some(commit_args));
        let body: Value = serde_json::from_str(committed.first_text()).unwrap();
        assert!(body["committed"].as_str().unwrap().starts_with("commit_"));

        let history = call(tmp.path(), "draftwright_history", Some(json!({ "uid": "doc:flame-blade" })));
        assert!(history.first_text().contains("1 commits"));
        assert!(history.first_text().contains("mcp (structured call): enchant"));
    }

    #[test]
    fn test_errors() {
        let tmp = setup();
        assert!(call(tmp.path(), "draftwright_nope", None).is_error);
        assert!(call(tmp.path(), "draftwright_structure", Some(json!({}))).is_error);

        let missing = call(tmp.path(), "draftwright_structure", Some(json!({ "uid": "doc:gone" })));
        assert!(missing.first_text().contains("document not found"));

        let no_edits = call(
            tmp.path(),
            "draftwright_propose",
            Some(json!({ "uid": "doc:flame-blade", "notes": "hello" })),
        );
        assert!(no_edits.is_error);
    }
}
