//! CLI command implementations.

use crate::interactive::{self, Review};
use crate::output::{self, OutputFormat, ProposalView};
use crate::source::WorkspaceSource;
use crate::{CommitArgs, ModelArgs};
use anyhow::{Context, Result, bail};
use chrono::{Duration, Utc};
use console::style;
use draftwright_core::{CommitInfo, Edit, EditBatch, UpdateMap, normalize_body};
use draftwright_fs::{ModelSettings, Workspace, WorkspaceConfig};
use draftwright_model::{
    DocumentSource, EditSession, OpenAiCompatClient, Proposal, RetryPolicy, RetryingClient,
};
use serde_json::{Value, json};
use std::io::Read;
use std::path::Path;

/// Initialize a new workspace.
pub fn init(path: &Path, name: Option<String>, format: OutputFormat) -> Result<()> {
    match name {
        Some(name) => Workspace::init_with(path, WorkspaceConfig::new(name)),
        None => Workspace::init(path),
    }
    .context("Failed to initialize workspace")?;

    output::print_success(&format!("Initialized workspace at {}", path.display()), format);
    Ok(())
}

/// Import a JSON document from a file or stdin.
pub fn import(path: &Path, name: &str, file: &Path, format: OutputFormat) -> Result<()> {
    let ws = Workspace::open(path).context("Failed to open workspace")?;

    let text = read_input(Some(file))?;
    let document: Value = serde_json::from_str(&text).context("Document is not valid JSON")?;

    let meta = ws
        .import_document(name, &document)
        .context("Failed to import document")?;
    output::print(&meta, format);
    Ok(())
}

/// List documents.
pub fn list(path: &Path, format: OutputFormat) -> Result<()> {
    let ws = Workspace::open(path).context("Failed to open workspace")?;
    let documents = ws.list_documents().context("Failed to list documents")?;
    output::print_document_list(&documents, format);
    Ok(())
}

/// Print a document or one value in it.
pub fn get(path: &Path, uid: &str, field: Option<&str>, format: OutputFormat) -> Result<()> {
    let ws = Workspace::open(path).context("Failed to open workspace")?;
    let document = ws.get_document(uid).context("Failed to get document")?;

    match field {
        None => output::print(&document, format),
        Some(field) => {
            let value = ws
                .config()
                .resolver()
                .get(&document, field)
                .with_context(|| format!("No value at '{field}' in {uid}"))?;
            output::print(value, format);
        }
    }
    Ok(())
}

/// Print the field structure of a document.
pub fn structure(path: &Path, uid: &str, format: OutputFormat) -> Result<()> {
    let ws = Workspace::open(path).context("Failed to open workspace")?;
    let document = ws.get_document(uid).context("Failed to get document")?;
    let shape = ws.config().extractor().extract(&document);
    output::print(&shape.to_value(), format);
    Ok(())
}

/// Print a reduced document.
pub fn select(path: &Path, uid: &str, paths: &[String], format: OutputFormat) -> Result<()> {
    let ws = Workspace::open(path).context("Failed to open workspace")?;
    let document = ws.get_document(uid).context("Failed to get document")?;
    let reduced = ws.config().selector().filter_by_paths(&document, paths);
    output::print(&reduced, format);
    Ok(())
}

/// Show how a path expression is written into an update map.
pub fn resolve(path: &Path, uid: &str, expr: &str, format: OutputFormat) -> Result<()> {
    let ws = Workspace::open(path).context("Failed to open workspace")?;
    let document = ws.get_document(uid).context("Failed to get document")?;
    let resolver = ws.config().resolver();

    let stable = resolver.to_stable_update_path(&document, expr);
    match format {
        OutputFormat::Human => println!("{stable}"),
        _ => output::print(
            &json!({
                "path": expr,
                "stable_path": stable,
                "value": resolver.get(&document, expr),
            }),
            format,
        ),
    }
    Ok(())
}

/// Parse a raw model response against a document without committing.
pub fn parse(path: &Path, uid: &str, file: Option<&Path>, format: OutputFormat) -> Result<()> {
    let ws = Workspace::open(path).context("Failed to open workspace")?;
    let proposal = proposal_from_response(&ws, uid, &read_input(file)?)?;
    print_proposal(&proposal, format);
    Ok(())
}

/// Propose edits from a response or from assignments, review, then commit.
pub fn propose(
    path: &Path,
    uid: &str,
    file: Option<&Path>,
    assignments: &[String],
    args: &CommitArgs,
    format: OutputFormat,
) -> Result<()> {
    let ws = Workspace::open(path).context("Failed to open workspace")?;

    let proposal = if assignments.is_empty() {
        proposal_from_response(&ws, uid, &read_input(file)?)?
    } else {
        let edits = assignments
            .iter()
            .map(|a| Edit::parse(a))
            .collect::<draftwright_core::Result<Vec<_>>>()
            .context("Failed to parse edits")?;
        let batch = EditBatch::manual(edits, args.reason.clone().unwrap_or_default());
        proposal_from_batch(&ws, uid, batch)?
    };

    print_proposal(&proposal, format);

    let source = WorkspaceSource::new(&ws, uid);
    let Some(updates) = confirm(&ws, &source, &proposal, args)? else {
        return Ok(());
    };

    let record = source
        .commit(&updates, commit_info(&proposal.batch, args))
        .map_err(anyhow::Error::from_boxed)
        .context("Failed to commit")?;
    output::print_commit(record.as_ref(), format);
    Ok(())
}

/// Run the full model pipeline for one instruction.
pub fn ask(
    path: &Path,
    uid: &str,
    instruction: Option<String>,
    model: &ModelArgs,
    args: &CommitArgs,
    format: OutputFormat,
) -> Result<()> {
    let ws = Workspace::open(path).context("Failed to open workspace")?;

    let instruction = match instruction {
        Some(instruction) => instruction,
        None => match interactive::prompt_instruction()? {
            Some(instruction) => instruction,
            None => {
                println!("{}", style("  Cancelled.").dim());
                return Ok(());
            }
        },
    };

    let settings = effective_settings(&ws.config().model, model);
    let session = model_session(ws.config(), &settings)?;
    let source = WorkspaceSource::new(&ws, uid);

    let rt = tokio::runtime::Runtime::new()?;
    let mut proposal = match rt.block_on(session.propose(&instruction, &source)) {
        Ok(proposal) => proposal,
        Err(err) => {
            // Reload and commit failures still carry the parsed batch.
            if let Some(batch) = err.batch() {
                eprintln!("{}", style("Proposed edits were not applied:").yellow());
                eprintln!("{}", serde_json::to_string_pretty(batch)?);
            }
            return Err(err).context("Model pipeline failed");
        }
    };

    print_proposal(&proposal, format);

    let Some(updates) = confirm(&ws, &source, &proposal, args)? else {
        return Ok(());
    };
    proposal.updates = updates;
    if let Some(reason) = &args.reason {
        proposal.batch.reason.clone_from(reason);
    }

    let record = session
        .commit(proposal, &source, args.actor.as_deref())
        .context("Failed to commit")?;
    output::print_commit(record.as_ref(), format);
    Ok(())
}

/// Show commit history.
pub fn history(path: &Path, uid: &str, since_days: Option<u32>, format: OutputFormat) -> Result<()> {
    let ws = Workspace::open(path).context("Failed to open workspace")?;

    let since = since_days.map(|days| Utc::now() - Duration::days(i64::from(days)));
    let records = ws.read_history(uid, since).context("Failed to read history")?;

    if records.is_empty() {
        output::print_success("No commits found", format);
        return Ok(());
    }

    output::print_list(&records, format);
    Ok(())
}

/// Start the tool server.
pub fn tool_serve(path: &Path, host: &str, port: u16) -> Result<()> {
    let rt = tokio::runtime::Runtime::new()?;
    rt.block_on(async { draftwright_toolserver::serve(path, host, port).await })
}

fn read_input(file: Option<&Path>) -> Result<String> {
    match file {
        Some(file) if file != Path::new("-") => std::fs::read_to_string(file)
            .with_context(|| format!("Failed to read {}", file.display())),
        _ => {
            let mut text = String::new();
            std::io::stdin()
                .read_to_string(&mut text)
                .context("Failed to read stdin")?;
            Ok(text)
        }
    }
}

fn proposal_from_response(ws: &Workspace, uid: &str, body: &str) -> Result<Proposal> {
    let batch = ws.config().parser().parse(&normalize_body(body));
    proposal_from_batch(ws, uid, batch)
}

fn proposal_from_batch(ws: &Workspace, uid: &str, batch: EditBatch) -> Result<Proposal> {
    let document = ws.get_document(uid).context("Failed to get document")?;
    let report = ws.config().applicator().apply_report(&document, &batch);
    Ok(Proposal {
        batch,
        updates: report.updates,
        selected: None,
        coerced: report.coerced,
    })
}

fn print_proposal(proposal: &Proposal, format: OutputFormat) {
    output::print(
        &ProposalView {
            batch: &proposal.batch,
            updates: &proposal.updates,
            coerced: &proposal.coerced,
            selected: proposal.selected.as_deref(),
        },
        format,
    );
}

/// The updates to commit, or `None` to stop without writing.
fn confirm(
    ws: &Workspace,
    source: &WorkspaceSource<'_>,
    proposal: &Proposal,
    args: &CommitArgs,
) -> Result<Option<UpdateMap>> {
    if proposal.is_noop() {
        return Ok(None);
    }
    if args.yes {
        return Ok(Some(proposal.updates.clone()));
    }
    if !console::user_attended() {
        bail!("Refusing to commit without review; pass --yes to commit non-interactively");
    }

    let current = source
        .load()
        .map_err(anyhow::Error::from_boxed)
        .with_context(|| format!("Failed to reload {}", source.uid()))?;

    match interactive::review_updates(&proposal.updates, &current, &ws.config().resolver())? {
        Review::Accept(updates) => Ok(Some(updates)),
        Review::Reject => {
            println!("{}", style("  Nothing committed.").dim());
            Ok(None)
        }
    }
}

fn commit_info(batch: &EditBatch, args: &CommitArgs) -> CommitInfo {
    let reason = args.reason.as_deref().unwrap_or(&batch.reason);
    let mut info = CommitInfo::new(reason).with_tier(batch.tier);
    if let Some(actor) = &args.actor {
        info = info.with_actor(actor);
    }
    info
}

/// Workspace model settings with command-line and environment overrides.
fn effective_settings(settings: &ModelSettings, args: &ModelArgs) -> ModelSettings {
    let mut settings = settings.clone();
    if let Some(url) = &args.url {
        settings.base_url.clone_from(url);
    }
    if let Some(model) = &args.model {
        settings.model.clone_from(model);
    }
    settings
}

fn model_session(
    config: &WorkspaceConfig,
    settings: &ModelSettings,
) -> Result<EditSession<RetryingClient<OpenAiCompatClient>>> {
    let mut client = OpenAiCompatClient::new(&settings.base_url, &settings.model);
    if let Some(var) = &settings.api_key_env {
        let key = std::env::var(var).with_context(|| format!("Model API key variable {var} is not set"))?;
        client = client.with_api_key(key);
    }

    let policy = retry_policy(settings);
    Ok(EditSession::new(RetryingClient::new(client, policy))
        .with_extractor(config.extractor())
        .with_selector(config.selector())
        .with_parser(config.parser())
        .with_applicator(config.applicator())
        .with_select_timeout(policy.total_budget()))
}

fn retry_policy(settings: &ModelSettings) -> RetryPolicy {
    RetryPolicy {
        max_retries: settings.max_retries,
        backoff: std::time::Duration::from_millis(settings.backoff_ms),
        timeout: std::time::Duration::from_secs(settings.timeout_secs),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use draftwright_core::ParseTier;
    use tempfile::TempDir;

    fn workspace() -> (TempDir, Workspace) {
        let tmp = TempDir::new().unwrap();
        let ws = Workspace::init(tmp.path()).unwrap();
        ws.import_document(
            "Flame Blade",
            &json!({
                "name": "Flame Blade",
                "system": { "traits": { "value": ["fire"] }, "description": { "value": "Hot." } }
            }),
        )
        .unwrap();
        (tmp, ws)
    }

    #[test]
    fn test_settings_overrides() {
        let base = ModelSettings::default();
        let unchanged = effective_settings(&base, &ModelArgs::default());
        assert_eq!(unchanged, base);

        let args = ModelArgs {
            url: Some("http://gpu-box:8000".into()),
            model: None,
        };
        let merged = effective_settings(&base, &args);
        assert_eq!(merged.base_url, "http://gpu-box:8000");
        assert_eq!(merged.model, base.model);
    }

    #[test]
    fn test_retry_policy_from_settings() {
        let settings = ModelSettings {
            timeout_secs: 5,
            max_retries: 4,
            backoff_ms: 250,
            ..ModelSettings::default()
        };
        let policy = retry_policy(&settings);
        assert_eq!(policy.max_retries, 4);
        assert_eq!(policy.backoff, std::time::Duration::from_millis(250));
        assert_eq!(policy.timeout, std::time::Duration::from_secs(5));
        // The selection round may spend every attempt plus the backoff between them.
        assert_eq!(policy.total_budget(), std::time::Duration::from_secs(26));
    }

    #[test]
    fn test_proposal_from_prose_response() {
        let (_tmp, ws) = workspace();
        let body = "Here you go:\n{\"changes\": [{\"path\": \"data.traits.value\", \"value\": \"magical\", \"operation\": \"add\"}], \"reason\": \"more magic\"}";

        let proposal = proposal_from_response(&ws, "doc:flame-blade", body).unwrap();
        assert_eq!(proposal.batch.tier, ParseTier::EmbeddedJson);
        assert_eq!(
            proposal.updates.get("system.traits.value"),
            Some(&json!(["fire", "magical"]))
        );
    }

    #[test]
    fn test_unparseable_response_becomes_description_draft() {
        let (_tmp, ws) = workspace();
        let proposal = proposal_from_response(&ws, "doc:flame-blade", "Make it glow.").unwrap();
        assert_eq!(proposal.batch.tier, ParseTier::Fallback);
        assert_eq!(
            proposal.updates.get("system.description.value"),
            Some(&json!("Make it glow."))
        );
    }

    #[test]
    fn test_commit_info_prefers_explicit_reason() {
        let batch = EditBatch::new(vec![], "model reason", ParseTier::Heuristic);
        let info = commit_info(&batch, &CommitArgs::default());
        assert_eq!(info.reason, "model reason");
        assert_eq!(info.tier, Some(ParseTier::Heuristic));

        let args = CommitArgs {
            reason: Some("mine".into()),
            actor: Some("ana".into()),
            yes: true,
        };
        let info = commit_info(&batch, &args);
        assert_eq!(info.reason, "mine");
        assert_eq!(info.actor.as_deref(), Some("ana"));
    }

    #[test]
    fn test_confirm_with_yes_and_noop() {
        let (_tmp, ws) = workspace();
        let source = WorkspaceSource::new(&ws, "doc:flame-blade");
        let args = CommitArgs {
            yes: true,
            ..CommitArgs::default()
        };

        let batch = EditBatch::manual(vec![Edit::set("name", "Frost Blade")], "");
        let proposal = proposal_from_batch(&ws, "doc:flame-blade", batch).unwrap();
        let updates = confirm(&ws, &source, &proposal, &args).unwrap().unwrap();
        assert_eq!(updates.get("name"), Some(&json!("Frost Blade")));

        let empty = proposal_from_batch(&ws, "doc:flame-blade", EditBatch::manual(vec![], "")).unwrap();
        assert!(confirm(&ws, &source, &empty, &args).unwrap().is_none());
    }
}
