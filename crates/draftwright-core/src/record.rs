//! Append-only commit history.

use crate::edit::ParseTier;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use uuid::Uuid;

/// One path written by a commit.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(deny_unknown_fields)]
pub struct FieldChange {
    pub path: String,
    /// `None` when the path did not exist before.
    #[serde(default)]
    pub old_value: Option<Value>,
    pub new_value: Value,
}

/// Who committed and why.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct CommitInfo {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub actor: Option<String>,
    #[serde(default)]
    pub reason: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tier: Option<ParseTier>,
}

impl CommitInfo {
    #[must_use]
    pub fn new(reason: impl Into<String>) -> Self {
        Self {
            reason: reason.into(),
            ..Self::default()
        }
    }

    #[must_use]
    pub fn with_actor(mut self, actor: impl Into<String>) -> Self {
        self.actor = Some(actor.into());
        self
    }

    #[must_use]
    pub const fn with_tier(mut self, tier: ParseTier) -> Self {
        self.tier = Some(tier);
        self
    }
}

/// A single committed update map.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct CommitRecord {
    /// `commit_<uuid>`.
    pub id: String,

    pub timestamp: DateTime<Utc>,

    #[serde(flatten)]
    pub info: CommitInfo,

    pub changes: Vec<FieldChange>,
}

impl CommitRecord {
    /// New record with a generated id and the current time.
    #[must_use]
    pub fn new(info: CommitInfo, changes: Vec<FieldChange>) -> Self {
        Self {
            id: format!("commit_{}", Uuid::new_v4().as_simple()),
            timestamp: Utc::now(),
            info,
            changes,
        }
    }

    /// Paths touched by this commit.
    pub fn paths(&self) -> impl Iterator<Item = &str> {
        self.changes.iter().map(|c| c.path.as_str())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_record_serialization() {
        let record = CommitRecord::new(
            CommitInfo::new("rename")
                .with_actor("alice")
                .with_tier(ParseTier::EmbeddedJson),
            vec![FieldChange {
                path: "name".into(),
                old_value: Some(json!("Blade")),
                new_value: json!("Renamed"),
            }],
        );

        assert!(record.id.starts_with("commit_"));
        let json = serde_json::to_value(&record).unwrap();
        assert_eq!(json["actor"], json!("alice"));
        assert_eq!(json["reason"], json!("rename"));
        assert_eq!(json["tier"], json!("embedded_json"));
        assert_eq!(json["changes"][0]["old_value"], json!("Blade"));

        let back: CommitRecord = serde_json::from_value(json).unwrap();
        assert_eq!(back, record);
    }

    #[test]
    fn test_paths() {
        let record = CommitRecord::new(
            CommitInfo::default(),
            vec![
                FieldChange { path: "a".into(), old_value: None, new_value: json!(1) },
                FieldChange { path: "b.c".into(), old_value: None, new_value: json!(2) },
            ],
        );
        assert_eq!(record.paths().collect::<Vec<_>>(), vec!["a", "b.c"]);
        assert!(record.info.actor.is_none());
    }
}
