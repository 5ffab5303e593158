//! Interactive review of proposed updates before they are committed.

use anyhow::{Context, Result};
use console::style;
use dialoguer::{Editor, Input, MultiSelect, Select, theme::ColorfulTheme};
use draftwright_core::{PathResolver, UpdateMap};
use serde_json::Value;

/// Outcome of a review.
#[derive(Debug, PartialEq)]
pub enum Review {
    /// Commit these updates; may be a subset of, or differ from, the proposal.
    Accept(UpdateMap),
    Reject,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Action {
    Commit,
    Choose,
    EditValue,
    Cancel,
}

const ACTIONS: &[(Action, &str)] = &[
    (Action::Commit, "Commit"),
    (Action::Choose, "Choose changes"),
    (Action::EditValue, "Edit a value"),
    (Action::Cancel, "Cancel"),
];

/// Ask for an instruction when none was given on the command line.
pub fn prompt_instruction() -> Result<Option<String>> {
    let theme = ColorfulTheme::default();
    let result: String = Input::with_theme(&theme)
        .with_prompt("Instruction")
        .allow_empty(true)
        .interact_text()
        .context("Failed to read instruction")?;

    let trimmed = result.trim();
    Ok((!trimmed.is_empty()).then(|| trimmed.to_string()))
}

/// Walk the user through `proposed`, showing each key against `current`.
pub fn review_updates(
    proposed: &UpdateMap,
    current: &Value,
    resolver: &PathResolver,
) -> Result<Review> {
    let theme = ColorfulTheme::default();
    let keys: Vec<&String> = proposed.keys().collect();
    let mut included: Vec<usize> = (0..keys.len()).collect();
    let mut pending = proposed.clone();

    loop {
        print_summary(&pending, current, resolver);

        let labels: Vec<&str> = ACTIONS.iter().map(|(_, label)| *label).collect();
        let selection = Select::with_theme(&theme)
            .with_prompt("Action")
            .items(&labels)
            .default(0)
            .interact_opt()
            .context("Failed to read action")?;

        match selection.map(|idx| ACTIONS[idx].0) {
            Some(Action::Commit) => {
                if pending.is_empty() {
                    return Ok(Review::Reject);
                }
                return Ok(Review::Accept(pending));
            }
            Some(Action::Choose) => {
                let defaults: Vec<bool> = (0..keys.len()).map(|i| included.contains(&i)).collect();
                let chosen = MultiSelect::with_theme(&theme)
                    .with_prompt("Changes to keep (space to toggle, Esc to go back)")
                    .items(&keys)
                    .defaults(&defaults)
                    .interact_opt()
                    .context("Failed to read selection")?;

                if let Some(chosen) = chosen {
                    let edited = pending.clone();
                    pending = retain_keys(proposed, &chosen);
                    // Hand-edited values survive re-selection.
                    for (key, value) in edited {
                        if let Some(slot) = pending.get_mut(&key) {
                            *slot = value;
                        }
                    }
                    included = chosen;
                }
            }
            Some(Action::EditValue) => edit_value(&theme, &mut pending)?,
            Some(Action::Cancel) | None => return Ok(Review::Reject),
        }
    }
}

fn edit_value(theme: &ColorfulTheme, pending: &mut UpdateMap) -> Result<()> {
    if pending.is_empty() {
        println!("  {}", style("Nothing selected").dim());
        return Ok(());
    }

    let keys: Vec<String> = pending.keys().cloned().collect();
    let Some(idx) = Select::with_theme(theme)
        .with_prompt("Value to edit (Esc to go back)")
        .items(&keys)
        .default(0)
        .interact_opt()
        .context("Failed to read key")?
    else {
        return Ok(());
    };

    let key = &keys[idx];
    let current = serde_json::to_string_pretty(&pending[key])?;
    let Some(text) = Editor::new()
        .extension(".json")
        .edit(&current)
        .context("Failed to open editor")?
    else {
        return Ok(());
    };

    match serde_json::from_str::<Value>(&text) {
        Ok(value) => {
            pending.insert(key.clone(), value);
        }
        Err(e) => println!("  {}", style(format!("Not valid JSON, value unchanged: {e}")).red()),
    }
    Ok(())
}

fn print_summary(pending: &UpdateMap, current: &Value, resolver: &PathResolver) {
    println!();
    println!("{}", style("  ┌─ Proposed updates ────────────────────").dim());
    if pending.is_empty() {
        println!("  │ {}", style("(none selected)").dim());
    }
    for (key, new) in pending {
        println!("  │ {}", describe_change(key, resolver.get(current, key), new));
    }
    println!("{}", style("  └─────────────────────────────────────────").dim());
    println!();
}

/// One summary line: `key: old → new`.
fn describe_change(key: &str, old: Option<&Value>, new: &Value) -> String {
    let new = style(preview(new)).green();
    match old {
        Some(old) => format!("{key}: {} → {new}", style(preview(old)).red()),
        None => format!("{key}: {} {new}", style("(new)").yellow()),
    }
}

fn preview(value: &Value) -> String {
    const LIMIT: usize = 60;
    let text = value.to_string();
    if text.chars().count() > LIMIT {
        let cut: String = text.chars().take(LIMIT - 3).collect();
        format!("{cut}...")
    } else {
        text
    }
}

/// The entries of `updates` at positions `keep`, in map order.
fn retain_keys(updates: &UpdateMap, keep: &[usize]) -> UpdateMap {
    updates
        .iter()
        .enumerate()
        .filter(|(i, _)| keep.contains(i))
        .map(|(_, (key, value))| (key.clone(), value.clone()))
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn updates() -> UpdateMap {
        let mut map = UpdateMap::new();
        map.insert("name".into(), json!("Lantern"));
        map.insert("system.traits.value".into(), json!(["fire", "light"]));
        map.insert("items.a1.name".into(), json!("Wick"));
        map
    }

    #[test]
    fn test_retain_keys_keeps_order() {
        let kept = retain_keys(&updates(), &[2, 0]);
        let keys: Vec<&str> = kept.keys().map(String::as_str).collect();
        assert_eq!(keys, ["name", "items.a1.name"]);
        assert!(retain_keys(&updates(), &[]).is_empty());
    }

    #[test]
    fn test_describe_change() {
        console::set_colors_enabled(false);
        assert_eq!(
            describe_change("name", Some(&json!("Torch")), &json!("Lantern")),
            "name: \"Torch\" → \"Lantern\""
        );
        assert_eq!(describe_change("flags.lit", None, &json!(true)), "flags.lit: (new) true");
    }

    #[test]
    fn test_preview_truncates() {
        let long = json!("x".repeat(100));
        let text = preview(&long);
        assert_eq!(text.chars().count(), 60);
        assert!(text.ends_with("..."));
        assert_eq!(preview(&json!(3)), "3");
    }
}
