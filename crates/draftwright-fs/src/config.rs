//! Workspace configuration.

use draftwright_core::{
    FieldSelector, ParserOptions, PatchApplicator, PathOptions, PathResolver, ResponseParser,
    SelectOptions, ShapeOptions, StructureExtractor,
};
use serde::{Deserialize, Serialize};

/// Configuration stored in `.draftwright/config.yml`.
///
/// Every section is optional; missing sections take their defaults.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WorkspaceConfig {
    #[serde(default = "default_version")]
    pub version: u32,

    #[serde(default)]
    pub workspace: WorkspaceSettings,

    /// Aliases and stable key fields.
    #[serde(default)]
    pub paths: PathOptions,

    /// Fields always kept by selection.
    #[serde(default)]
    pub select: SelectOptions,

    /// Keys hidden from shape extraction.
    #[serde(default)]
    pub shape: ShapeOptions,

    #[serde(default)]
    pub parser: ParserOptions,

    #[serde(default)]
    pub model: ModelSettings,
}

const fn default_version() -> u32 {
    1
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct WorkspaceSettings {
    #[serde(default)]
    pub name: Option<String>,
}

/// Model endpoint and call policy.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ModelSettings {
    /// Base URL of an OpenAI-compatible server.
    pub base_url: String,
    pub model: String,
    /// Environment variable holding the API key, if the server needs one.
    pub api_key_env: Option<String>,
    /// Per-attempt timeout.
    pub timeout_secs: u64,
    /// Retries after the first attempt.
    pub max_retries: u32,
    /// Fixed delay between attempts.
    pub backoff_ms: u64,
}

impl Default for ModelSettings {
    fn default() -> Self {
        Self {
            base_url: "http://localhost:11434".to_string(),
            model: "llama3.1".to_string(),
            api_key_env: None,
            timeout_secs: 60,
            max_retries: 2,
            backoff_ms: 1000,
        }
    }
}

impl Default for WorkspaceConfig {
    fn default() -> Self {
        Self {
            version: default_version(),
            workspace: WorkspaceSettings::default(),
            paths: PathOptions::default(),
            select: SelectOptions::default(),
            shape: ShapeOptions::default(),
            parser: ParserOptions::default(),
            model: ModelSettings::default(),
        }
    }
}

impl WorkspaceConfig {
    #[must_use]
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            workspace: WorkspaceSettings {
                name: Some(name.into()),
            },
            ..Default::default()
        }
    }

    #[must_use]
    pub fn resolver(&self) -> PathResolver {
        PathResolver::new(self.paths.clone())
    }

    #[must_use]
    pub fn selector(&self) -> FieldSelector {
        FieldSelector::new(self.resolver(), self.select.clone())
    }

    #[must_use]
    pub fn extractor(&self) -> StructureExtractor {
        StructureExtractor::new(self.shape.clone())
    }

    #[must_use]
    pub fn parser(&self) -> ResponseParser {
        ResponseParser::new(self.parser.clone())
    }

    #[must_use]
    pub fn applicator(&self) -> PatchApplicator {
        PatchApplicator::new(self.resolver())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_partial_yaml_fills_defaults() {
        let yaml = "
workspace:
  name: campaign
paths:
  aliases:
    - legacy: data
      canonical: system
    - legacy: flags
      canonical: meta
model:
  model: qwen2.5
  max_retries: 5
";
        let config: WorkspaceConfig = serde_yaml::from_str(yaml).unwrap();
        assert_eq!(config.version, 1);
        assert_eq!(config.workspace.name.as_deref(), Some("campaign"));
        assert_eq!(config.paths.aliases.canonical("flags"), Some("meta"));
        assert_eq!(config.paths.id_fields, vec!["_id", "id"]);
        assert_eq!(config.model.model, "qwen2.5");
        assert_eq!(config.model.max_retries, 5);
        assert_eq!(config.model.timeout_secs, 60);
        assert_eq!(config.parser, ParserOptions::default());
    }

    #[test]
    fn test_round_trip() {
        let config = WorkspaceConfig::new("demo");
        let yaml = serde_yaml::to_string(&config).unwrap();
        let back: WorkspaceConfig = serde_yaml::from_str(&yaml).unwrap();
        assert_eq!(back.workspace.name.as_deref(), Some("demo"));
        assert_eq!(back.shape, config.shape);
        assert_eq!(back.model, config.model);
    }
}
