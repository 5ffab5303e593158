//! Turning edit batches into update maps, and applying update maps.
//!
//! `PatchApplicator::apply` has no side effects: it reads the document and
//! returns a flat `stable path -> value` map. Committing that map is the
//! caller's business; `apply_updates` is the in-memory half of a commit.

use crate::edit::{EditBatch, Operation};
use crate::error::Result;
use crate::path::PathResolver;
use crate::record::FieldChange;
use serde_json::{Map, Value};

/// Flat map from stable path to new value, in first-write order.
pub type UpdateMap = Map<String, Value>;

/// Outcome of applying a batch, with notes the caller may want to surface.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct PatchReport {
    pub updates: UpdateMap,
    /// Keys where `Add` found a non-list target and started from `[]`.
    pub coerced: Vec<String>,
}

#[derive(Debug, Clone, Default)]
pub struct PatchApplicator {
    resolver: PathResolver,
}

impl PatchApplicator {
    #[must_use]
    pub const fn new(resolver: PathResolver) -> Self {
        Self { resolver }
    }

    #[must_use]
    pub const fn resolver(&self) -> &PathResolver {
        &self.resolver
    }

    /// Fold `batch` into one update map against `document`.
    #[must_use]
    pub fn apply(&self, document: &Value, batch: &EditBatch) -> UpdateMap {
        self.apply_report(document, batch).updates
    }

    /// Like `apply`, also reporting coerced `Add` targets.
    ///
    /// Edits apply in order. `Add` and `Remove` read the pending value for
    /// their resolved key first, so later edits see earlier ones.
    #[must_use]
    pub fn apply_report(&self, document: &Value, batch: &EditBatch) -> PatchReport {
        let mut report = PatchReport::default();

        for edit in &batch.edits {
            let key = self.resolver.to_stable_update_path(document, &edit.path);

            let value = match edit.operation {
                Operation::Set => edit.value.clone(),
                Operation::Add => {
                    let mut items = match self.current(document, &report.updates, &key) {
                        Some(Value::Array(items)) => items,
                        _ => {
                            report.coerced.push(key.clone());
                            Vec::new()
                        }
                    };
                    match &edit.value {
                        Value::Array(incoming) => items.extend(incoming.iter().cloned()),
                        other => items.push(other.clone()),
                    }
                    Value::Array(items)
                }
                Operation::Remove => match self.current(document, &report.updates, &key) {
                    Some(Value::Array(mut items)) => {
                        let doomed = match &edit.value {
                            Value::Array(values) => values.as_slice(),
                            single => std::slice::from_ref(single),
                        };
                        items.retain(|item| !doomed.contains(item));
                        Value::Array(items)
                    }
                    _ => Value::Null,
                },
            };

            report.updates.insert(key, value);
        }

        report
    }

    /// Pending value for `key`, else the document's.
    fn current(&self, document: &Value, pending: &UpdateMap, key: &str) -> Option<Value> {
        pending
            .get(key)
            .or_else(|| self.resolver.get(document, key))
            .cloned()
    }

    /// Write every entry of `updates` into `document`.
    ///
    /// All-or-nothing: on error `document` is left untouched.
    ///
    /// # Errors
    /// Returns an error if any path is malformed or cannot be written.
    pub fn apply_updates(&self, document: &mut Value, updates: &UpdateMap) -> Result<Vec<FieldChange>> {
        let mut staged = document.clone();
        let mut changes = Vec::with_capacity(updates.len());

        for (path, value) in updates {
            let old_value = self.resolver.set_path(&mut staged, path, value.clone())?;
            changes.push(FieldChange {
                path: path.clone(),
                old_value,
                new_value: value.clone(),
            });
        }

        *document = staged;
        Ok(changes)
    }
}

/// Apply `batch` with default options.
#[must_use]
pub fn apply(document: &Value, batch: &EditBatch) -> UpdateMap {
    PatchApplicator::default().apply(document, batch)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::edit::Edit;
    use pretty_assertions::assert_eq;
    use serde_json::json;

    fn batch(edits: Vec<Edit>) -> EditBatch {
        EditBatch::manual(edits, "test")
    }

    #[test]
    fn test_add_appends_to_existing_list() {
        let doc = json!({ "name": "Blade", "system": { "traits": { "value": ["fire"] } } });
        let updates = apply(&doc, &batch(vec![Edit::add("system.traits.value", "flaming")]));
        assert_eq!(
            Value::Object(updates),
            json!({ "system.traits.value": ["fire", "flaming"] })
        );
    }

    #[test]
    fn test_add_then_remove_same_path() {
        let doc = json!({ "system": { "traits": { "value": ["fire"] } } });
        let updates = apply(
            &doc,
            &batch(vec![
                Edit::add("system.traits.value", "cold"),
                Edit::remove("system.traits.value", "cold"),
            ]),
        );
        assert_eq!(updates["system.traits.value"], json!(["fire"]));
    }

    #[test]
    fn test_set_uses_stable_path() {
        let doc = json!({ "items": [{ "id": "a1", "name": "Potion" }, { "id": "b2", "name": "Scroll" }] });
        let updates = apply(&doc, &batch(vec![Edit::set("items[1].name", "Tome")]));
        assert_eq!(Value::Object(updates), json!({ "items.b2.name": "Tome" }));
    }

    #[test]
    fn test_last_write_wins() {
        let doc = json!({ "items": [{ "id": "a1", "name": "Potion" }] });
        let updates = apply(
            &doc,
            &batch(vec![
                Edit::set("items[0].name", "First"),
                Edit::set("items.a1.name", "Second"),
            ]),
        );
        assert_eq!(updates.len(), 1);
        assert_eq!(updates["items.a1.name"], json!("Second"));
    }

    #[test]
    fn test_add_coerces_non_list() {
        let doc = json!({ "system": { "notes": "text" } });
        let report = PatchApplicator::default().apply_report(
            &doc,
            &batch(vec![
                Edit::add("system.notes", json!(["a", "b"])),
                Edit::add("system.missing", "c"),
            ]),
        );
        assert_eq!(report.updates["system.notes"], json!(["a", "b"]));
        assert_eq!(report.updates["system.missing"], json!(["c"]));
        assert_eq!(report.coerced, vec!["system.notes", "system.missing"]);
    }

    #[test]
    fn test_remove() {
        let doc = json!({ "tags": ["a", "b", "c", "a"], "title": "x" });
        let updates = apply(
            &doc,
            &batch(vec![
                Edit::remove("tags", json!(["a", "c"])),
                Edit::remove("title", ""),
            ]),
        );
        assert_eq!(updates["tags"], json!(["b"]));
        assert_eq!(updates["title"], Value::Null);
    }

    #[test]
    fn test_empty_batch_is_noop() {
        let updates = apply(&json!({ "a": 1 }), &batch(Vec::new()));
        assert!(updates.is_empty());
    }

    #[test]
    fn test_apply_updates() {
        let applicator = PatchApplicator::default();
        let mut doc = json!({
            "name": "Blade",
            "items": [{ "id": "a1", "name": "Potion" }]
        });
        let mut updates = UpdateMap::new();
        updates.insert("name".into(), json!("Flame Blade"));
        updates.insert("items.a1.name".into(), json!("Elixir"));
        updates.insert("system.traits.value".into(), json!(["fire"]));

        let changes = applicator.apply_updates(&mut doc, &updates).unwrap();
        assert_eq!(doc["name"], json!("Flame Blade"));
        assert_eq!(doc["items"][0]["name"], json!("Elixir"));
        assert_eq!(doc["system"]["traits"]["value"], json!(["fire"]));
        assert_eq!(changes[0].old_value, Some(json!("Blade")));
        assert_eq!(changes[2].old_value, None);
    }

    #[test]
    fn test_apply_updates_is_all_or_nothing() {
        let applicator = PatchApplicator::default();
        let mut doc = json!({ "name": "Blade", "level": 3 });
        let mut updates = UpdateMap::new();
        updates.insert("name".into(), json!("Changed"));
        updates.insert("level.deeper".into(), json!(1));

        assert!(applicator.apply_updates(&mut doc, &updates).is_err());
        assert_eq!(doc, json!({ "name": "Blade", "level": 3 }));
    }
}
