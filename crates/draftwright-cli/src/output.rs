//! Output formatting for the CLI.

use chrono::{DateTime, Utc};
use draftwright_core::{CommitRecord, DocumentMeta, EditBatch, FieldChange, UpdateMap};
use serde::Serialize;
use serde_json::Value;
use std::fmt::Write;

/// Output format for CLI responses.
#[derive(Debug, Clone, Copy, Default, clap::ValueEnum)]
pub enum OutputFormat {
    /// Human-readable output
    #[default]
    Human,
    /// JSON output
    Json,
    /// YAML output
    Yaml,
}

/// Print output in the specified format.
pub fn print<T: Serialize + HumanDisplay + ?Sized>(value: &T, format: OutputFormat) {
    match format {
        OutputFormat::Human => println!("{}", value.human_display()),
        OutputFormat::Json => {
            println!(
                "{}",
                serde_json::to_string_pretty(value).expect("Failed to serialize to JSON")
            );
        }
        OutputFormat::Yaml => {
            print!(
                "{}",
                serde_yaml::to_string(value).expect("Failed to serialize to YAML")
            );
        }
    }
}

/// Print a list in the specified format.
pub fn print_list<T: Serialize + HumanDisplay>(values: &[T], format: OutputFormat) {
    match format {
        OutputFormat::Human => {
            for value in values {
                println!("{}", value.human_display());
            }
        }
        OutputFormat::Json | OutputFormat::Yaml => print(values, format),
    }
}

/// Print document summaries with dynamic column widths.
pub fn print_document_list(documents: &[DocumentMeta], format: OutputFormat) {
    if !matches!(format, OutputFormat::Human) {
        print(documents, format);
        return;
    }

    if documents.is_empty() {
        println!("No documents found.");
        return;
    }

    let uid_width = documents.iter().map(|d| d.uid.len()).max().unwrap_or(3).max(3);

    println!("{:<uid_width$}  {:>3}  {:<20}  NAME", "UID", "REV", "UPDATED");
    println!("{}", "-".repeat(uid_width + 40));

    for doc in documents {
        println!(
            "{:<uid_width$}  {:>3}  {:<20}  {}",
            doc.uid,
            doc.revision,
            doc.updated_at.format("%Y-%m-%d %H:%M"),
            doc.name,
        );
    }
}

/// Print a success message.
pub fn print_success(message: &str, format: OutputFormat) {
    match format {
        OutputFormat::Human => println!("{message}"),
        OutputFormat::Json | OutputFormat::Yaml => {
            print(&StatusMessage { status: "ok", message }, format);
        }
    }
}

#[derive(Serialize)]
struct StatusMessage<'a> {
    status: &'static str,
    message: &'a str,
}

impl HumanDisplay for StatusMessage<'_> {
    fn human_display(&self) -> String {
        self.message.to_string()
    }
}

/// Trait for human-readable display.
pub trait HumanDisplay {
    fn human_display(&self) -> String;
}

impl<T: HumanDisplay> HumanDisplay for [T] {
    fn human_display(&self) -> String {
        self.iter().map(HumanDisplay::human_display).collect::<Vec<_>>().join("\n")
    }
}

impl HumanDisplay for Value {
    fn human_display(&self) -> String {
        match self {
            Self::String(s) => s.clone(),
            other => serde_json::to_string_pretty(other).unwrap_or_else(|_| other.to_string()),
        }
    }
}

impl HumanDisplay for DocumentMeta {
    fn human_display(&self) -> String {
        let mut out = String::new();

        writeln!(out, "UID:       {}", self.uid).unwrap();
        writeln!(out, "Name:      {}", self.name).unwrap();
        writeln!(out, "Revision:  {}", self.revision).unwrap();
        writeln!(out, "Created:   {}", format_time(&self.created_at)).unwrap();
        write!(out, "Updated:   {}", format_time(&self.updated_at)).unwrap();

        out
    }
}

impl HumanDisplay for CommitRecord {
    fn human_display(&self) -> String {
        let actor = self.info.actor.as_deref().unwrap_or("user");
        let tier = self
            .info
            .tier
            .map_or_else(String::new, |tier| format!(" ({tier})"));

        let mut out = format!(
            "[{}] {actor}{tier}: {}",
            format_time(&self.timestamp),
            if self.info.reason.is_empty() { "-" } else { &self.info.reason }
        );
        for change in &self.changes {
            write!(out, "\n  {}", format_change(change)).unwrap();
        }
        out
    }
}

fn format_change(change: &FieldChange) -> String {
    match &change.old_value {
        Some(old) => format!("{}: {old} → {}", change.path, change.new_value),
        None => format!("{}: (new) {}", change.path, change.new_value),
    }
}

/// A proposal as printed by `parse`, `propose` and `ask`.
#[derive(Debug, Serialize)]
pub struct ProposalView<'a> {
    pub batch: &'a EditBatch,
    pub updates: &'a UpdateMap,
    #[serde(skip_serializing_if = "<[String]>::is_empty")]
    pub coerced: &'a [String],
    #[serde(skip_serializing_if = "Option::is_none")]
    pub selected: Option<&'a [String]>,
}

impl HumanDisplay for ProposalView<'_> {
    fn human_display(&self) -> String {
        let mut out = String::new();

        writeln!(out, "Parsed:    {} ({} edits)", self.batch.tier, self.batch.len()).unwrap();
        if !self.batch.reason.is_empty() {
            writeln!(out, "Reason:    {}", self.batch.reason).unwrap();
        }
        if let Some(selected) = self.selected {
            writeln!(out, "Context:   {}", selected.join(", ")).unwrap();
        }

        if !self.batch.is_empty() {
            writeln!(out, "Edits:").unwrap();
            for edit in &self.batch.edits {
                writeln!(out, "  {} {} {}", edit.operation, edit.path, edit.value).unwrap();
            }
        }

        if self.updates.is_empty() {
            write!(out, "Updates:   (none)").unwrap();
        } else {
            write!(out, "Updates:").unwrap();
            for (key, value) in self.updates {
                let note = if self.coerced.contains(key) { "  (was not a list)" } else { "" };
                write!(out, "\n  {key} = {value}{note}").unwrap();
            }
        }

        out
    }
}

/// A commit outcome, or the note that nothing changed.
pub fn print_commit(record: Option<&CommitRecord>, format: OutputFormat) {
    match (record, format) {
        (None, _) => print_success("No changes to commit", format),
        (Some(record), OutputFormat::Human) => {
            println!("Committed {} ({} changes)", record.id, record.changes.len());
        }
        (Some(record), _) => print(record, format),
    }
}

fn format_time(dt: &DateTime<Utc>) -> String {
    dt.format("%Y-%m-%d %H:%M:%S UTC").to_string()
}
