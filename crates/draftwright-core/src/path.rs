//! Path addressing for schema-less documents.
//!
//! Paths are dot-separated with optional bracket segments:
//! - `system.traits.value`
//! - `items[1].name` or `items.1.name`
//! - `items[?(@.type=='weapon')].name` (first element whose `type` is `weapon`)
//! - `flags['my.module'].enabled`
//!
//! Resolution never fails loudly: malformed text and misses both come back as
//! `None`, so a single bad path cannot abort a larger batch.

use crate::error::{CoreError, Result};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::fmt;
use std::str::FromStr;

/// Identifier fields preferred for stable addressing, in priority order.
pub const DEFAULT_ID_FIELDS: &[&str] = &["_id", "id"];
/// Fallback field for stable addressing.
pub const DEFAULT_NAME_FIELD: &str = "name";

/// One step of a parsed path.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Segment {
    /// Map key, or a stable key when applied to a list.
    Key(String),
    /// List position, or a numeric key when applied to a map.
    Index(usize),
    /// First list element whose own `field` is the string `literal`.
    Filter { field: String, literal: String },
}

impl fmt::Display for Segment {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Key(key) if needs_brackets(key) => write!(f, "[{}]", Quoted(key)),
            Self::Key(key) => write!(f, "{key}"),
            Self::Index(index) => write!(f, "{index}"),
            Self::Filter { field, literal } => write!(f, "[?(@.{field}=={})]", Quoted(literal)),
        }
    }
}

/// A bracket literal, in double quotes when it contains a single quote.
struct Quoted<'a>(&'a str);

impl fmt::Display for Quoted<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.0.contains('\'') {
            write!(f, "\"{}\"", self.0)
        } else {
            write!(f, "'{}'", self.0)
        }
    }
}

fn needs_brackets(key: &str) -> bool {
    key.is_empty() || key.contains(['.', '[', ']']) || is_numeral(key)
}

/// Whether `key` survives a display-then-parse cycle.
fn is_addressable(key: &str) -> bool {
    !(needs_brackets(key) && key.contains('\'') && key.contains('"'))
}

fn is_numeral(text: &str) -> bool {
    !text.is_empty() && text.bytes().all(|b| b.is_ascii_digit())
}

/// Table of deprecated root names and their canonical replacements.
///
/// Only the first segment of a path is ever rewritten.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct AliasTable {
    entries: Vec<RootAlias>,
}

/// A single `legacy -> canonical` root rename.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RootAlias {
    pub legacy: String,
    pub canonical: String,
}

impl AliasTable {
    /// An empty table that rewrites nothing.
    #[must_use]
    pub const fn empty() -> Self {
        Self {
            entries: Vec::new(),
        }
    }

    /// Add a rename.
    #[must_use]
    pub fn with(mut self, legacy: impl Into<String>, canonical: impl Into<String>) -> Self {
        self.entries.push(RootAlias {
            legacy: legacy.into(),
            canonical: canonical.into(),
        });
        self
    }

    /// Canonical name for a root segment, if it is a known legacy alias.
    #[must_use]
    pub fn canonical(&self, root: &str) -> Option<&str> {
        self.entries
            .iter()
            .find(|alias| alias.legacy == root)
            .map(|alias| alias.canonical.as_str())
    }
}

impl Default for AliasTable {
    fn default() -> Self {
        Self::empty().with("data", "system")
    }
}

/// A parsed path.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct PathExpression {
    segments: Vec<Segment>,
}

impl PathExpression {
    /// Parse path text, applying the default alias table.
    ///
    /// # Errors
    /// Returns `CoreError::InvalidPath` or `CoreError::InvalidPredicate` for
    /// malformed text.
    pub fn parse(text: &str) -> Result<Self> {
        Self::parse_with(text, &AliasTable::default())
    }

    /// Parse path text with an explicit alias table.
    ///
    /// # Errors
    /// Returns `CoreError::InvalidPath` or `CoreError::InvalidPredicate` for
    /// malformed text.
    pub fn parse_with(text: &str, aliases: &AliasTable) -> Result<Self> {
        let mut segments = tokenize(text)?;
        if let Some(Segment::Key(root)) = segments.first_mut() {
            if let Some(canonical) = aliases.canonical(root) {
                *root = canonical.to_string();
            }
        }
        Ok(Self { segments })
    }

    /// Build a path from already-parsed segments.
    #[must_use]
    pub const fn from_segments(segments: Vec<Segment>) -> Self {
        Self { segments }
    }

    #[must_use]
    pub fn segments(&self) -> &[Segment] {
        &self.segments
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.segments.is_empty()
    }

    pub fn push(&mut self, segment: Segment) {
        self.segments.push(segment);
    }
}

impl fmt::Display for PathExpression {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for (i, segment) in self.segments.iter().enumerate() {
            let bracketed = match segment {
                Segment::Filter { .. } => true,
                Segment::Key(key) => needs_brackets(key),
                Segment::Index(_) => false,
            };
            if i > 0 && !bracketed {
                f.write_str(".")?;
            }
            write!(f, "{segment}")?;
        }
        Ok(())
    }
}

impl FromStr for PathExpression {
    type Err = CoreError;

    fn from_str(s: &str) -> Result<Self> {
        Self::parse(s)
    }
}

fn tokenize(text: &str) -> Result<Vec<Segment>> {
    let mut segments = Vec::new();
    let mut current = String::new();
    // Set after `]` so that `a[0].b` does not read as an empty segment.
    let mut after_bracket = false;
    let mut chars = text.char_indices().peekable();

    while let Some((pos, c)) = chars.next() {
        match c {
            '.' => {
                if current.is_empty() && !after_bracket {
                    return Err(CoreError::InvalidPath(format!(
                        "empty segment at offset {pos} in '{text}'"
                    )));
                }
                flush(&mut current, &mut segments);
                after_bracket = false;
                if chars.peek().is_none() {
                    return Err(CoreError::InvalidPath(format!("trailing '.' in '{text}'")));
                }
            }
            '[' => {
                flush(&mut current, &mut segments);
                let content = read_bracket(&mut chars, text)?;
                segments.push(bracket_segment(&content, text)?);
                after_bracket = true;
            }
            ']' => {
                return Err(CoreError::InvalidPath(format!(
                    "unbalanced ']' at offset {pos} in '{text}'"
                )));
            }
            _ => {
                if after_bracket {
                    return Err(CoreError::InvalidPath(format!(
                        "expected '.' or '[' after ']' at offset {pos} in '{text}'"
                    )));
                }
                current.push(c);
            }
        }
    }

    flush(&mut current, &mut segments);
    Ok(segments)
}

fn flush(current: &mut String, segments: &mut Vec<Segment>) {
    if current.is_empty() {
        return;
    }
    let token = std::mem::take(current);
    match token.parse::<usize>() {
        Ok(index) if is_numeral(&token) => segments.push(Segment::Index(index)),
        _ => segments.push(Segment::Key(token)),
    }
}

/// Read up to the matching `]`, honoring quotes so literals may contain `]`.
fn read_bracket(
    chars: &mut std::iter::Peekable<std::str::CharIndices<'_>>,
    text: &str,
) -> Result<String> {
    let mut content = String::new();
    let mut quote: Option<char> = None;

    for (_, c) in chars.by_ref() {
        match (quote, c) {
            (Some(q), c) if c == q => {
                quote = None;
                content.push(c);
            }
            (None, '\'' | '"') => {
                quote = Some(c);
                content.push(c);
            }
            (None, ']') => return Ok(content),
            _ => content.push(c),
        }
    }

    Err(CoreError::InvalidPath(format!("unclosed '[' in '{text}'")))
}

fn bracket_segment(content: &str, text: &str) -> Result<Segment> {
    let content = content.trim();

    if let Some(predicate) = content.strip_prefix('?') {
        return parse_predicate(predicate, text);
    }

    if let Some(key) = unquote(content) {
        return Ok(Segment::Key(key.to_string()));
    }

    if is_numeral(content) {
        return content
            .parse()
            .map(Segment::Index)
            .map_err(|_| CoreError::InvalidPath(format!("index out of range in '{text}'")));
    }

    Err(CoreError::InvalidPath(format!(
        "unsupported bracket segment '[{content}]' in '{text}'"
    )))
}

/// `(@.key=='value')`, also accepting `===` and double quotes.
fn parse_predicate(predicate: &str, text: &str) -> Result<Segment> {
    let invalid = || CoreError::InvalidPredicate {
        path: text.to_string(),
        predicate: predicate.to_string(),
    };

    let inner = predicate
        .trim()
        .strip_prefix('(')
        .and_then(|p| p.strip_suffix(')'))
        .ok_or_else(invalid)?;

    let (left, right) = inner
        .split_once("===")
        .or_else(|| inner.split_once("=="))
        .ok_or_else(invalid)?;

    let field = left.trim().strip_prefix("@.").ok_or_else(invalid)?.trim();
    if field.is_empty() {
        return Err(invalid());
    }
    let literal = unquote(right.trim()).ok_or_else(invalid)?;

    Ok(Segment::Filter {
        field: field.to_string(),
        literal: literal.to_string(),
    })
}

fn unquote(text: &str) -> Option<&str> {
    ['\'', '"'].into_iter().find_map(|q| {
        text.strip_prefix(q)
            .and_then(|rest| rest.strip_suffix(q))
            .filter(|inner| !inner.contains(q))
    })
}

/// A concrete step taken while walking a document.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Step {
    Key(String),
    Index(usize),
}

/// One resolved hop of a walk: where we went and what we found.
#[derive(Debug, Clone)]
pub struct Hop<'a> {
    pub step: Step,
    pub value: &'a Value,
}

/// Options controlling parsing and stable addressing.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct PathOptions {
    /// Legacy root renames applied at parse time.
    pub aliases: AliasTable,
    /// Identifier fields, most preferred first.
    pub id_fields: Vec<String>,
    /// Fallback field when no identifier is present.
    pub name_field: String,
}

impl Default for PathOptions {
    fn default() -> Self {
        Self {
            aliases: AliasTable::default(),
            id_fields: DEFAULT_ID_FIELDS.iter().map(ToString::to_string).collect(),
            name_field: DEFAULT_NAME_FIELD.to_string(),
        }
    }
}

/// Stateless evaluator for paths over a caller-supplied root.
#[derive(Debug, Clone, Default)]
pub struct PathResolver {
    options: PathOptions,
}

impl PathResolver {
    #[must_use]
    pub const fn new(options: PathOptions) -> Self {
        Self { options }
    }

    #[must_use]
    pub const fn options(&self) -> &PathOptions {
        &self.options
    }

    /// Parse path text with this resolver's alias table.
    ///
    /// # Errors
    /// Returns an error for malformed path text.
    pub fn parse(&self, text: &str) -> Result<PathExpression> {
        PathExpression::parse_with(text, &self.options.aliases)
    }

    /// Resolve path text against `root`.
    #[must_use]
    pub fn get<'a>(&self, root: &'a Value, text: &str) -> Option<&'a Value> {
        let expr = self.parse(text).ok()?;
        self.get_expr(root, &expr)
    }

    /// Resolve an already-parsed path against `root`.
    #[must_use]
    pub fn get_expr<'a>(&self, root: &'a Value, expr: &PathExpression) -> Option<&'a Value> {
        expr.segments()
            .iter()
            .try_fold(root, |current, segment| {
                self.step(current, segment).map(|hop| hop.value)
            })
    }

    /// Walk `expr` and return every hop, or `None` on the first miss.
    #[must_use]
    pub fn trace<'a>(&self, root: &'a Value, expr: &PathExpression) -> Option<Vec<Hop<'a>>> {
        let mut hops = Vec::with_capacity(expr.segments().len());
        let mut current = root;
        for segment in expr.segments() {
            let hop = self.step(current, segment)?;
            current = hop.value;
            hops.push(hop);
        }
        Some(hops)
    }

    /// Take one step from `current`.
    #[must_use]
    pub fn step<'a>(&self, current: &'a Value, segment: &Segment) -> Option<Hop<'a>> {
        match current {
            Value::Object(map) => {
                let key = match segment {
                    Segment::Key(key) => key.clone(),
                    Segment::Index(index) => index.to_string(),
                    Segment::Filter { .. } => return None,
                };
                let value = map.get(&key)?;
                Some(Hop {
                    step: Step::Key(key),
                    value,
                })
            }
            Value::Array(items) => {
                let index = self.locate(items, segment)?;
                Some(Hop {
                    step: Step::Index(index),
                    value: items.get(index)?,
                })
            }
            _ => None,
        }
    }

    /// Position within `items` that `segment` designates.
    fn locate(&self, items: &[Value], segment: &Segment) -> Option<usize> {
        match segment {
            Segment::Index(index) => (*index < items.len()).then_some(*index),
            Segment::Key(key) => self.find_by_stable_key(items, key),
            Segment::Filter { field, literal } => items
                .iter()
                .position(|item| item.get(field).and_then(Value::as_str) == Some(literal)),
        }
    }

    /// Position of the element whose identifier (or, failing that, name) is `key`.
    fn find_by_stable_key(&self, items: &[Value], key: &str) -> Option<usize> {
        self.options
            .id_fields
            .iter()
            .find_map(|field| {
                items
                    .iter()
                    .position(|item| key_field(item, field).as_deref() == Some(key))
            })
            .or_else(|| {
                items.iter().position(|item| {
                    key_field(item, &self.options.name_field).as_deref() == Some(key)
                })
            })
    }

    /// The content-derived key an element can be addressed by.
    ///
    /// All-digit values are refused since they would read back as positions,
    /// as are keys no path text can spell.
    #[must_use]
    pub fn stable_key(&self, element: &Value) -> Option<String> {
        self.key_candidates(element).next()
    }

    fn key_candidates<'v>(&'v self, element: &'v Value) -> impl Iterator<Item = String> + 'v {
        self.options
            .id_fields
            .iter()
            .chain(std::iter::once(&self.options.name_field))
            .filter_map(move |field| key_field(element, field))
            .filter(|key| !key.is_empty() && !is_numeral(key) && is_addressable(key))
    }

    /// The first key of `items[index]` that looks up `index` again.
    ///
    /// Duplicate names, or an id equal to another element's name, make a key
    /// land elsewhere; such keys are skipped.
    fn stable_key_at(&self, items: &[Value], index: usize) -> Option<String> {
        let element = items.get(index)?;
        self.key_candidates(element)
            .find(|key| self.find_by_stable_key(items, key) == Some(index))
    }

    /// Rewrite list positions in `text` to content-derived keys.
    ///
    /// `items[1].name` becomes `items.b2.name` when the second item has id
    /// `b2`. Segments that cannot be rewritten are kept verbatim, and text that
    /// does not parse is returned unchanged.
    #[must_use]
    pub fn to_stable_update_path(&self, root: &Value, text: &str) -> String {
        match self.parse(text) {
            Ok(expr) => self.stabilize(root, &expr).to_string(),
            Err(_) => text.to_string(),
        }
    }

    /// Stable form of an already-parsed path.
    #[must_use]
    pub fn stabilize(&self, root: &Value, expr: &PathExpression) -> PathExpression {
        let mut out = PathExpression::default();
        let mut current = Some(root);

        for segment in expr.segments() {
            let Some(container) = current else {
                out.push(segment.clone());
                continue;
            };

            let hop = self.step(container, segment);
            let rewritten = match (&hop, container, segment) {
                (
                    Some(Hop {
                        step: Step::Index(index),
                        ..
                    }),
                    Value::Array(items),
                    Segment::Index(_) | Segment::Filter { .. },
                ) => self
                    .stable_key_at(items, *index)
                    .map_or(Segment::Index(*index), Segment::Key),
                _ => segment.clone(),
            };

            out.push(rewritten);
            current = hop.map(|hop| hop.value);
        }

        out
    }

    /// Write `value` at `text`, creating intermediate maps where missing.
    ///
    /// Returns the previous value, if any.
    ///
    /// # Errors
    /// Returns an error when the path is malformed, crosses a scalar, or names
    /// a list element that does not exist.
    pub fn set_path(&self, root: &mut Value, text: &str, value: Value) -> Result<Option<Value>> {
        let expr = self.parse(text)?;
        let Some((last, parents)) = expr.segments().split_last() else {
            return Ok(Some(std::mem::replace(root, value)));
        };

        let mut current = root;
        for segment in parents {
            current = self.child_mut(current, segment, text)?;
        }

        if current.is_null() {
            *current = Value::Object(Map::new());
        }

        match current {
            Value::Object(map) => {
                let key = match last {
                    Segment::Key(key) => key.clone(),
                    Segment::Index(index) => index.to_string(),
                    Segment::Filter { .. } => return Err(unwritable(text, "filter on a map")),
                };
                Ok(map.insert(key, value))
            }
            Value::Array(items) => match self.locate(items, last) {
                Some(index) => Ok(Some(std::mem::replace(&mut items[index], value))),
                None if *last == Segment::Index(items.len()) => {
                    items.push(value);
                    Ok(None)
                }
                None => Err(unwritable(text, "no such list element")),
            },
            _ => Err(unwritable(text, "cannot descend into a scalar")),
        }
    }

    fn child_mut<'a>(
        &self,
        current: &'a mut Value,
        segment: &Segment,
        text: &str,
    ) -> Result<&'a mut Value> {
        if current.is_null() {
            *current = Value::Object(Map::new());
        }

        match current {
            Value::Object(map) => {
                let key = match segment {
                    Segment::Key(key) => key.clone(),
                    Segment::Index(index) => index.to_string(),
                    Segment::Filter { .. } => return Err(unwritable(text, "filter on a map")),
                };
                Ok(map.entry(key).or_insert_with(|| Value::Object(Map::new())))
            }
            Value::Array(items) => {
                let index = self
                    .locate(items, segment)
                    .ok_or_else(|| unwritable(text, "no such list element"))?;
                Ok(&mut items[index])
            }
            _ => Err(unwritable(text, "cannot descend into a scalar")),
        }
    }
}

fn unwritable(path: &str, reason: &str) -> CoreError {
    CoreError::Unwritable {
        path: path.to_string(),
        reason: reason.to_string(),
    }
}

/// String form of an element's key field, if it is a string or number.
fn key_field(element: &Value, field: &str) -> Option<String> {
    match element.get(field)? {
        Value::String(s) => Some(s.clone()),
        Value::Number(n) => Some(n.to_string()),
        _ => None,
    }
}

/// Resolve `text` against `root` with default options.
#[must_use]
pub fn get<'a>(root: &'a Value, text: &str) -> Option<&'a Value> {
    PathResolver::default().get(root, text)
}

/// Stable form of `text` against `root` with default options.
#[must_use]
pub fn to_stable_update_path(root: &Value, text: &str) -> String {
    PathResolver::default().to_stable_update_path(root, text)
}
