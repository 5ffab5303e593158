//! Workspace management and document operations.

use crate::config::WorkspaceConfig;
use crate::error::{FsError, Result};
use chrono::{DateTime, Utc};
use draftwright_core::{CommitInfo, CommitRecord, DocumentMeta, UpdateMap};
use serde_json::Value;
use slug::slugify;
use std::collections::HashMap;
use std::fs::{self, File, OpenOptions};
use std::io::{BufRead, BufReader, Write};
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, OnceLock, PoisonError};
use tempfile::NamedTempFile;
use tracing::{debug, info, warn};
use walkdir::WalkDir;

const DRAFTWRIGHT_DIR: &str = ".draftwright";
const CONFIG_FILE: &str = "config.yml";
const DOCUMENTS_DIR: &str = "documents";
const META_FILE: &str = "meta.yml";
const DOCUMENT_FILE: &str = "document.json";
const HISTORY_FILE: &str = "history.ndjson";
const UID_PREFIX: &str = "doc:";

/// A directory of documents plus their configuration.
#[derive(Debug)]
pub struct Workspace {
    root: PathBuf,
    config: WorkspaceConfig,
}

impl Workspace {
    /// Initialize a new workspace at the given path.
    ///
    /// # Errors
    /// Returns error if a workspace already exists there or IO fails.
    pub fn init(path: impl AsRef<Path>) -> Result<Self> {
        Self::init_with(path, WorkspaceConfig::default())
    }

    /// Initialize with an explicit configuration.
    ///
    /// # Errors
    /// Returns error if a workspace already exists there or IO fails.
    pub fn init_with(path: impl AsRef<Path>, config: WorkspaceConfig) -> Result<Self> {
        let root = path.as_ref().to_path_buf();
        let dot_dir = root.join(DRAFTWRIGHT_DIR);

        if dot_dir.exists() {
            return Err(FsError::WorkspaceExists(root));
        }

        fs::create_dir_all(&dot_dir)?;
        fs::create_dir_all(root.join(DOCUMENTS_DIR))?;
        fs::write(dot_dir.join(CONFIG_FILE), serde_yaml::to_string(&config)?)?;

        info!(path = %root.display(), "Initialized workspace");

        Ok(Self { root, config })
    }

    /// Open an existing workspace.
    ///
    /// # Errors
    /// Returns error if no workspace exists there or the config is invalid.
    pub fn open(path: impl AsRef<Path>) -> Result<Self> {
        let root = path.as_ref().to_path_buf();
        let config_path = root.join(DRAFTWRIGHT_DIR).join(CONFIG_FILE);

        if !config_path.exists() {
            return Err(FsError::WorkspaceNotFound(root));
        }

        let config: WorkspaceConfig = serde_yaml::from_str(&fs::read_to_string(&config_path)?)?;

        debug!(path = %root.display(), "Opened workspace");

        Ok(Self { root, config })
    }

    #[must_use]
    pub fn root(&self) -> &Path {
        &self.root
    }

    #[must_use]
    pub const fn config(&self) -> &WorkspaceConfig {
        &self.config
    }

    fn documents_dir(&self) -> PathBuf {
        self.root.join(DOCUMENTS_DIR)
    }

    fn document_dir(&self, slug: &str) -> PathBuf {
        self.documents_dir().join(slug)
    }

    fn slug_from_uid(uid: &str) -> Result<&str> {
        uid.strip_prefix(UID_PREFIX)
            .filter(|slug| !slug.is_empty() && *slug == slugify(slug))
            .ok_or_else(|| FsError::InvalidUid(uid.to_string()))
    }

    /// Directory of an existing document.
    fn existing_dir(&self, uid: &str) -> Result<PathBuf> {
        let dir = self.document_dir(Self::slug_from_uid(uid)?);
        if dir.join(META_FILE).exists() {
            Ok(dir)
        } else {
            Err(FsError::DocumentNotFound(uid.to_string()))
        }
    }

    /// Store `document` under a uid derived from `name`.
    ///
    /// # Errors
    /// Returns error if the name has no usable characters, the document
    /// already exists, or IO fails.
    pub fn import_document(&self, name: impl Into<String>, document: &Value) -> Result<DocumentMeta> {
        let name = name.into();
        let slug = slugify(&name);
        if slug.is_empty() {
            return Err(FsError::InvalidName(name));
        }
        let uid = format!("{UID_PREFIX}{slug}");

        let dir = self.document_dir(&slug);
        if dir.exists() {
            return Err(FsError::DocumentExists(uid));
        }
        fs::create_dir_all(&dir)?;

        let meta = DocumentMeta::new(&uid, &name);
        write_atomic(&dir.join(DOCUMENT_FILE), &serde_json::to_vec_pretty(document)?)?;
        write_atomic(&dir.join(META_FILE), serde_yaml::to_string(&meta)?.as_bytes())?;

        info!(uid = %uid, name = %name, "Imported document");

        Ok(meta)
    }

    /// Current contents of a document.
    ///
    /// # Errors
    /// Returns error if the document doesn't exist or is not valid JSON.
    pub fn get_document(&self, uid: &str) -> Result<Value> {
        let dir = self.existing_dir(uid)?;
        let content = fs::read(dir.join(DOCUMENT_FILE))?;
        Ok(serde_json::from_slice(&content)?)
    }

    /// # Errors
    /// Returns error if the document doesn't exist or meta is invalid.
    pub fn read_meta(&self, uid: &str) -> Result<DocumentMeta> {
        let dir = self.existing_dir(uid)?;
        read_meta_file(&dir.join(META_FILE))
    }

    /// All documents, most recently updated first. Unreadable entries are
    /// skipped.
    ///
    /// # Errors
    /// Returns error if the documents directory cannot be walked.
    pub fn list_documents(&self) -> Result<Vec<DocumentMeta>> {
        let documents_dir = self.documents_dir();
        if !documents_dir.exists() {
            return Ok(Vec::new());
        }

        let mut documents = Vec::new();

        for entry in WalkDir::new(&documents_dir).min_depth(2).max_depth(2) {
            let entry = entry?;
            if entry.file_name() != META_FILE {
                continue;
            }

            match read_meta_file(entry.path()) {
                Ok(meta) => documents.push(meta),
                Err(e) => {
                    debug!(path = %entry.path().display(), error = %e, "Failed to read document meta, skipping");
                }
            }
        }

        documents.sort_by(|a, b| b.updated_at.cmp(&a.updated_at));

        Ok(documents)
    }

    /// Apply `updates` to a document as one transaction.
    ///
    /// The new document is written to a temporary file and renamed over the
    /// old one, then a `CommitRecord` is appended to the history. An empty
    /// map writes nothing and returns `None`. Commits to one document are
    /// serialized across every `Workspace` in the process, so each applies
    /// on top of the previous one.
    ///
    /// # Errors
    /// Returns error if the document doesn't exist, a path cannot be written,
    /// or IO fails. On a path error nothing is written.
    pub fn commit(&self, uid: &str, updates: &UpdateMap, info: CommitInfo) -> Result<Option<CommitRecord>> {
        if updates.is_empty() {
            debug!(uid = %uid, "Empty update map, nothing to commit");
            return Ok(None);
        }

        let dir = self.existing_dir(uid)?;
        let lock = commit_lock(&dir)?;
        let _guard = lock.lock().unwrap_or_else(PoisonError::into_inner);

        let mut document: Value = serde_json::from_slice(&fs::read(dir.join(DOCUMENT_FILE))?)?;
        let mut meta = read_meta_file(&dir.join(META_FILE))?;

        let changes = self.config.applicator().apply_updates(&mut document, updates)?;

        write_atomic(&dir.join(DOCUMENT_FILE), &serde_json::to_vec_pretty(&document)?)?;

        let record = CommitRecord::new(info, changes);
        if let Err(e) = append_record(&dir.join(HISTORY_FILE), &record) {
            // The document is already replaced, so the commit stands.
            warn!(uid = %uid, error = %e, "Failed to append commit record");
        }

        meta.touch();
        write_atomic(&dir.join(META_FILE), serde_yaml::to_string(&meta)?.as_bytes())?;

        info!(uid = %uid, commit = %record.id, paths = record.changes.len(), "Committed update map");

        Ok(Some(record))
    }

    /// Commit history of a document, oldest first.
    ///
    /// # Errors
    /// Returns error if the document doesn't exist or a record is invalid.
    pub fn read_history(&self, uid: &str, since: Option<DateTime<Utc>>) -> Result<Vec<CommitRecord>> {
        let history_path = self.existing_dir(uid)?.join(HISTORY_FILE);

        if !history_path.exists() {
            return Ok(Vec::new());
        }

        let reader = BufReader::new(File::open(&history_path)?);
        let mut records = Vec::new();

        for line in reader.lines() {
            let line = line?;
            if line.trim().is_empty() {
                continue;
            }

            let record: CommitRecord = serde_json::from_str(&line)?;

            if since.is_none_or(|s| record.timestamp >= s) {
                records.push(record);
            }
        }

        Ok(records)
    }
}

fn read_meta_file(path: &Path) -> Result<DocumentMeta> {
    Ok(serde_yaml::from_str(&fs::read_to_string(path)?)?)
}

/// The in-process commit lock for a document directory.
fn commit_lock(dir: &Path) -> Result<Arc<Mutex<()>>> {
    static LOCKS: OnceLock<Mutex<HashMap<PathBuf, Arc<Mutex<()>>>>> = OnceLock::new();

    let key = fs::canonicalize(dir)?;
    let mut locks = LOCKS
        .get_or_init(Mutex::default)
        .lock()
        .unwrap_or_else(PoisonError::into_inner);
    Ok(Arc::clone(locks.entry(key).or_default()))
}

/// Write to a uniquely named sibling temp file, then rename over `path`.
fn write_atomic(path: &Path, content: &[u8]) -> Result<()> {
    let dir = path.parent().unwrap_or_else(|| Path::new("."));
    let mut tmp = NamedTempFile::new_in(dir)?;
    tmp.write_all(content)?;
    tmp.as_file().sync_all()?;
    tmp.persist(path).map_err(|e| e.error)?;
    Ok(())
}

fn append_record(path: &Path, record: &CommitRecord) -> Result<()> {
    let mut file = OpenOptions::new().create(true).append(true).open(path)?;
    writeln!(file, "{}", serde_json::to_string(record)?)?;
    debug!(commit = %record.id, "Appended commit record");
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use draftwright_core::{Edit, EditBatch, ParseTier};
    use pretty_assertions::assert_eq;
    use serde_json::json;
    use tempfile::TempDir;

    fn setup() -> (TempDir, Workspace) {
        let tmp = TempDir::new().unwrap();
        let ws = Workspace::init(tmp.path()).unwrap();
        (tmp, ws)
    }

    fn blade() -> Value {
        json!({
            "_id": "it1",
            "name": "Blade",
            "type": "weapon",
            "system": { "traits": { "value": ["fire"] } },
            "effects": [{ "id": "e1", "name": "Glow", "disabled": false }]
        })
    }

    fn updates(pairs: &[(&str, Value)]) -> UpdateMap {
        pairs.iter().map(|(k, v)| ((*k).to_string(), v.clone())).collect()
    }

    #[test]
    fn test_init_workspace() {
        let (tmp, ws) = setup();
        assert!(tmp.path().join(".draftwright/config.yml").exists());
        assert!(tmp.path().join("documents").exists());
        assert_eq!(ws.config().version, 1);
    }

    #[test]
    fn test_init_existing_fails() {
        let (tmp, _ws) = setup();
        let result = Workspace::init(tmp.path());
        assert!(matches!(result, Err(FsError::WorkspaceExists(_))));
    }

    #[test]
    fn test_open_missing_fails() {
        let tmp = TempDir::new().unwrap();
        assert!(matches!(Workspace::open(tmp.path()), Err(FsError::WorkspaceNotFound(_))));
    }

    #[test]
    fn test_open_reads_config() {
        let tmp = TempDir::new().unwrap();
        Workspace::init_with(tmp.path(), WorkspaceConfig::new("campaign")).unwrap();
        let ws = Workspace::open(tmp.path()).unwrap();
        assert_eq!(ws.config().workspace.name.as_deref(), Some("campaign"));
    }

    #[test]
    fn test_import_and_get() {
        let (_tmp, ws) = setup();

        let meta = ws.import_document("Flame Blade", &blade()).unwrap();
        assert_eq!(meta.uid, "doc:flame-blade");
        assert_eq!(meta.name, "Flame Blade");

        assert_eq!(ws.get_document("doc:flame-blade").unwrap(), blade());
        assert_eq!(ws.read_meta("doc:flame-blade").unwrap(), meta);

        assert!(matches!(
            ws.import_document("flame blade", &blade()),
            Err(FsError::DocumentExists(_))
        ));
        assert!(matches!(ws.import_document("!!!", &blade()), Err(FsError::InvalidName(_))));
    }

    #[test]
    fn test_bad_uids() {
        let (_tmp, ws) = setup();
        assert!(matches!(ws.get_document("flame-blade"), Err(FsError::InvalidUid(_))));
        assert!(matches!(ws.get_document("doc:../escape"), Err(FsError::InvalidUid(_))));
        assert!(matches!(ws.get_document("doc:missing"), Err(FsError::DocumentNotFound(_))));
    }

    #[test]
    fn test_list_documents() {
        let (_tmp, ws) = setup();
        ws.import_document("One", &json!({})).unwrap();
        ws.import_document("Two", &json!({})).unwrap();
        fs::create_dir_all(ws.documents_dir().join("stray")).unwrap();

        let mut uids: Vec<_> = ws.list_documents().unwrap().into_iter().map(|m| m.uid).collect();
        uids.sort();
        assert_eq!(uids, vec!["doc:one", "doc:two"]);
    }

    #[test]
    fn test_commit_applies_and_records() {
        let (_tmp, ws) = setup();
        ws.import_document("Blade", &blade()).unwrap();

        let doc = ws.get_document("doc:blade").unwrap();
        let batch = EditBatch::new(
            vec![
                Edit::add("system.traits.value", "flaming"),
                Edit::set("effects[0].disabled", true),
            ],
            "fire theme",
            ParseTier::EmbeddedJson,
        );
        let map = ws.config().applicator().apply(&doc, &batch);
        assert_eq!(
            map,
            updates(&[
                ("system.traits.value", json!(["fire", "flaming"])),
                ("effects.e1.disabled", json!(true)),
            ])
        );

        let record = ws
            .commit("doc:blade", &map, CommitInfo::new(&batch.reason).with_tier(batch.tier))
            .unwrap()
            .unwrap();
        assert_eq!(record.changes.len(), 2);
        assert_eq!(record.changes[1].old_value, Some(json!(false)));

        let after = ws.get_document("doc:blade").unwrap();
        assert_eq!(after["system"]["traits"]["value"], json!(["fire", "flaming"]));
        assert_eq!(after["effects"][0]["disabled"], json!(true));
        assert_eq!(ws.read_meta("doc:blade").unwrap().revision, 1);

        let history = ws.read_history("doc:blade", None).unwrap();
        assert_eq!(history, vec![record]);
    }

    #[test]
    fn test_concurrent_commits_keep_every_update() {
        let (tmp, ws) = setup();
        ws.import_document("Blade", &blade()).unwrap();

        std::thread::scope(|scope| {
            for writer in ["a", "b"] {
                let root = tmp.path();
                scope.spawn(move || {
                    let ws = Workspace::open(root).unwrap();
                    for i in 0..10 {
                        let path = format!("marks.{writer}{i}");
                        let map = updates(&[(path.as_str(), json!(true))]);
                        ws.commit("doc:blade", &map, CommitInfo::new(writer)).unwrap();
                    }
                });
            }
        });

        let after = ws.get_document("doc:blade").unwrap();
        assert_eq!(after["marks"].as_object().unwrap().len(), 20);
        assert_eq!(after["name"], json!("Blade"));
        assert_eq!(ws.read_meta("doc:blade").unwrap().revision, 20);
        assert_eq!(ws.read_history("doc:blade", None).unwrap().len(), 20);

        let leftovers: Vec<_> = fs::read_dir(ws.document_dir("blade"))
            .unwrap()
            .filter_map(|entry| entry.ok())
            .filter(|entry| entry.file_name().to_string_lossy().starts_with(".tmp"))
            .collect();
        assert!(leftovers.is_empty());
    }

    #[test]
    fn test_empty_commit_is_noop() {
        let (_tmp, ws) = setup();
        ws.import_document("Blade", &blade()).unwrap();

        let record = ws.commit("doc:blade", &UpdateMap::new(), CommitInfo::default()).unwrap();
        assert!(record.is_none());
        assert!(ws.read_history("doc:blade", None).unwrap().is_empty());
        assert_eq!(ws.read_meta("doc:blade").unwrap().revision, 0);
    }

    #[test]
    fn test_failed_commit_writes_nothing() {
        let (_tmp, ws) = setup();
        ws.import_document("Blade", &blade()).unwrap();

        let map = updates(&[("name", json!("Changed")), ("name.deeper", json!(1))]);
        let result = ws.commit("doc:blade", &map, CommitInfo::default());
        assert!(matches!(result, Err(FsError::Core(_))));
        assert_eq!(ws.get_document("doc:blade").unwrap(), blade());
        assert!(ws.read_history("doc:blade", None).unwrap().is_empty());
    }

    #[test]
    fn test_history_since() {
        let (_tmp, ws) = setup();
        ws.import_document("Blade", &blade()).unwrap();

        ws.commit("doc:blade", &updates(&[("name", json!("A"))]), CommitInfo::default())
            .unwrap();
        let cutoff = Utc::now();
        ws.commit("doc:blade", &updates(&[("name", json!("B"))]), CommitInfo::default())
            .unwrap();

        let all = ws.read_history("doc:blade", None).unwrap();
        assert_eq!(all.len(), 2);
        let recent = ws.read_history("doc:blade", Some(cutoff)).unwrap();
        assert_eq!(recent.len(), 1);
        assert_eq!(recent[0].changes[0].new_value, json!("B"));
    }
}
