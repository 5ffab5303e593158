//! Metadata kept alongside a stored document.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct DocumentMeta {
    /// Stable identifier, e.g. `doc:flame-blade`.
    pub uid: String,

    /// Human-readable name.
    pub name: String,

    pub created_at: DateTime<Utc>,

    pub updated_at: DateTime<Utc>,

    /// Number of commits applied since import.
    #[serde(default)]
    pub revision: u64,
}

impl DocumentMeta {
    #[must_use]
    pub fn new(uid: impl Into<String>, name: impl Into<String>) -> Self {
        let now = Utc::now();
        Self {
            uid: uid.into(),
            name: name.into(),
            created_at: now,
            updated_at: now,
            revision: 0,
        }
    }

    /// Record one more commit.
    pub fn touch(&mut self) {
        self.updated_at = Utc::now();
        self.revision += 1;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_new_meta() {
        let meta = DocumentMeta::new("doc:blade", "Blade");
        assert_eq!(meta.uid, "doc:blade");
        assert_eq!(meta.revision, 0);
        assert_eq!(meta.created_at, meta.updated_at);
    }

    #[test]
    fn test_touch() {
        let mut meta = DocumentMeta::new("doc:blade", "Blade");
        meta.touch();
        meta.touch();
        assert_eq!(meta.revision, 2);
        assert!(meta.updated_at >= meta.created_at);
    }

    #[test]
    fn test_revision_defaults_when_absent() {
        let raw = r#"{"uid":"doc:x","name":"X","created_at":"2024-01-01T00:00:00Z","updated_at":"2024-01-01T00:00:00Z"}"#;
        let meta: DocumentMeta = serde_json::from_str(raw).unwrap();
        assert_eq!(meta.revision, 0);
    }
}
