//! Reducing a document to the fields a request needs.

use crate::path::{Hop, PathResolver, Step};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

/// Root fields copied into every reduced document.
pub const DEFAULT_IDENTITY_FIELDS: &[&str] = &["_id", "id", "uuid", "name", "type", "img"];

/// Rewrites string leaves of a reduced document, e.g. to localize labels.
pub trait TextNormalizer {
    fn normalize(&self, text: &str) -> String;
}

impl<F: Fn(&str) -> String> TextNormalizer for F {
    fn normalize(&self, text: &str) -> String {
        self(text)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct SelectOptions {
    pub identity_fields: Vec<String>,
}

impl Default for SelectOptions {
    fn default() -> Self {
        Self {
            identity_fields: DEFAULT_IDENTITY_FIELDS.iter().map(ToString::to_string).collect(),
        }
    }
}

#[derive(Debug, Clone, Default)]
pub struct FieldSelector {
    resolver: PathResolver,
    options: SelectOptions,
}

impl FieldSelector {
    #[must_use]
    pub const fn new(resolver: PathResolver, options: SelectOptions) -> Self {
        Self { resolver, options }
    }

    /// Copy of `document` holding only identity fields and `paths`.
    ///
    /// Paths that do not resolve are skipped. Intermediate containers mirror
    /// the source: a list stays a list, with earlier positions padded by
    /// `null`, and a map inside a list keeps its element's stable key.
    #[must_use]
    pub fn filter_by_paths<S: AsRef<str>>(&self, document: &Value, paths: &[S]) -> Value {
        let mut reduced = Value::Object(Map::new());

        if let (Value::Object(source), Value::Object(out)) = (document, &mut reduced) {
            for field in &self.options.identity_fields {
                if let Some(value) = source.get(field) {
                    out.insert(field.clone(), value.clone());
                }
            }
        }

        for path in paths {
            let Some(hops) = self
                .resolver
                .parse(path.as_ref())
                .ok()
                .and_then(|expr| self.resolver.trace(document, &expr))
            else {
                continue;
            };

            if hops.is_empty() {
                return document.clone();
            }
            self.graft(&mut reduced, &hops);
        }

        reduced
    }

    /// `filter_by_paths` followed by a pass over every string leaf.
    #[must_use]
    pub fn filter_normalized<S: AsRef<str>>(
        &self,
        document: &Value,
        paths: &[S],
        normalizer: &dyn TextNormalizer,
    ) -> Value {
        let mut reduced = self.filter_by_paths(document, paths);
        normalize_strings(&mut reduced, normalizer);
        reduced
    }

    fn graft(&self, out: &mut Value, hops: &[Hop<'_>]) {
        let mut cursor = out;

        for (depth, hop) in hops.iter().enumerate() {
            let slot = child_slot(cursor, &hop.step);

            match hops.get(depth + 1) {
                None => *slot = hop.value.clone(),
                Some(next) => {
                    let fresh = slot.is_null();
                    match next.step {
                        Step::Key(_) if !slot.is_object() => *slot = Value::Object(Map::new()),
                        Step::Index(_) if !slot.is_array() => *slot = Value::Array(Vec::new()),
                        _ => {}
                    }
                    if fresh && matches!(hop.step, Step::Index(_)) {
                        self.copy_key_fields(slot, hop.value);
                    }
                }
            }

            cursor = slot;
        }
    }

    fn copy_key_fields(&self, target: &mut Value, source: &Value) {
        let (Value::Object(target), Value::Object(source)) = (target, source) else {
            return;
        };
        let options = self.resolver.options();
        for field in options.id_fields.iter().chain(std::iter::once(&options.name_field)) {
            if let Some(value) = source.get(field) {
                target.insert(field.clone(), value.clone());
            }
        }
    }
}

/// Child slot of `container` for `step`, reshaping the container if needed.
fn child_slot<'v>(container: &'v mut Value, step: &Step) -> &'v mut Value {
    match step {
        Step::Key(key) => {
            if !container.is_object() {
                *container = Value::Object(Map::new());
            }
            let Value::Object(map) = container else {
                unreachable!("container was just made a map");
            };
            map.entry(key.clone()).or_insert(Value::Null)
        }
        Step::Index(index) => {
            if !container.is_array() {
                *container = Value::Array(Vec::new());
            }
            let Value::Array(items) = container else {
                unreachable!("container was just made a list");
            };
            if items.len() <= *index {
                items.resize(index + 1, Value::Null);
            }
            &mut items[*index]
        }
    }
}

fn normalize_strings(value: &mut Value, normalizer: &dyn TextNormalizer) {
    match value {
        Value::String(text) => *text = normalizer.normalize(text),
        Value::Array(items) => {
            for item in items {
                normalize_strings(item, normalizer);
            }
        }
        Value::Object(map) => {
            for item in map.values_mut() {
                normalize_strings(item, normalizer);
            }
        }
        _ => {}
    }
}

/// Reduce with default options.
#[must_use]
pub fn filter_by_paths<S: AsRef<str>>(document: &Value, paths: &[S]) -> Value {
    FieldSelector::default().filter_by_paths(document, paths)
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;
    use serde_json::json;

    fn actor() -> Value {
        json!({
            "_id": "act1",
            "name": "Aria",
            "type": "character",
            "img": "aria.webp",
            "system": {
                "attributes": { "hp": { "value": 12, "max": 20 } },
                "traits": { "value": ["fire", "agile"] },
                "description": { "value": "A wandering bard." }
            },
            "items": [
                { "id": "a1", "name": "Potion", "type": "consumable", "system": { "qty": 2 } },
                { "id": "b2", "name": "Scroll", "type": "consumable", "system": { "qty": 1 } }
            ]
        })
    }

    #[test]
    fn test_empty_paths_keep_identity() {
        let none: [&str; 0] = [];
        assert_eq!(
            filter_by_paths(&actor(), &none),
            json!({ "_id": "act1", "name": "Aria", "type": "character", "img": "aria.webp" })
        );
    }

    #[test]
    fn test_nested_map_path() {
        let reduced = filter_by_paths(&actor(), &["system.attributes.hp.value", "data.description"]);
        assert_eq!(reduced["system"], json!({
            "attributes": { "hp": { "value": 12 } },
            "description": { "value": "A wandering bard." }
        }));
    }

    #[test]
    fn test_list_paths_keep_position_and_key() {
        let reduced = filter_by_paths(&actor(), &["items[1].system.qty"]);
        assert_eq!(
            reduced["items"],
            json!([null, { "id": "b2", "name": "Scroll", "system": { "qty": 1 } }])
        );

        let by_key = filter_by_paths(&actor(), &["items.b2.system.qty"]);
        assert_eq!(by_key["items"], reduced["items"]);

        let by_filter = filter_by_paths(&actor(), &["items[?(@.name=='Potion')].type"]);
        assert_eq!(
            by_filter["items"],
            json!([{ "id": "a1", "name": "Potion", "type": "consumable" }])
        );
    }

    #[test]
    fn test_scalar_list_element() {
        let reduced = filter_by_paths(&actor(), &["system.traits.value[1]"]);
        assert_eq!(reduced["system"], json!({ "traits": { "value": [null, "agile"] } }));
    }

    #[test]
    fn test_reduced_document_stays_addressable() {
        let doc = actor();
        let reduced = filter_by_paths(&doc, &["items[1].system.qty"]);
        assert_eq!(crate::path::get(&reduced, "items.b2.system.qty"), Some(&json!(1)));
    }

    #[test]
    fn test_misses_are_skipped() {
        let reduced = filter_by_paths(&actor(), &["system.nope", "items[9].name", "items[?(@.x==", "name"]);
        assert_eq!(
            reduced,
            json!({ "_id": "act1", "name": "Aria", "type": "character", "img": "aria.webp" })
        );
    }

    #[test]
    fn test_normalizer_rewrites_strings() {
        let selector = FieldSelector::default();
        let shout = |text: &str| text.to_uppercase();
        let reduced = selector.filter_normalized(&actor(), &["system.traits.value"], &shout);
        assert_eq!(reduced["system"]["traits"]["value"], json!(["FIRE", "AGILE"]));
        assert_eq!(reduced["name"], json!("ARIA"));
    }
}
