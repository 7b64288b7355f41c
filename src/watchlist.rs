//! Persisted set of watched entities.
//!
//! The [`WatchList`] is shared between the scheduler and the command surface.
//! Every successful mutation rewrites the whole JSON document before the call
//! returns, so a reply sent to an operator is never ahead of durable state.

use std::collections::BTreeSet;
use std::fs;
use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::{Mutex, MutexGuard};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::{error, info, warn};

use crate::error::{LivecapError, Result};

/// Normalizes a raw identifier: surrounding whitespace and a single leading
/// `@` are removed, case is preserved. Empty results are rejected.
pub fn normalize_entity(raw: &str) -> Option<String> {
    let trimmed = raw.trim();
    let id = trimmed.strip_prefix('@').unwrap_or(trimmed).trim();
    if id.is_empty() || id.chars().any(char::is_whitespace) {
        None
    } else {
        Some(id.to_string())
    }
}

/// On-disk document. `users` is written sorted for display.
#[derive(Debug, Serialize, Deserialize)]
struct WatchListFile {
    #[serde(default)]
    users: Vec<String>,
    #[serde(default)]
    last_updated: Option<DateTime<Utc>>,
}

#[derive(Debug, Default)]
struct Inner {
    users: BTreeSet<String>,
    last_updated: Option<DateTime<Utc>>,
}

#[derive(Debug)]
pub struct WatchList {
    path: PathBuf,
    inner: Mutex<Inner>,
}

impl WatchList {
    /// Loads the list from `path`.
    ///
    /// A missing file is initialized from `seed` and written immediately; a
    /// corrupt file degrades to an empty list.
    pub fn load(path: impl Into<PathBuf>, seed: &[String]) -> Self {
        let path = path.into();
        let inner = match fs::read_to_string(&path) {
            Ok(contents) => match serde_json::from_str::<WatchListFile>(&contents) {
                Ok(file) => {
                    let users: BTreeSet<String> =
                        file.users.iter().filter_map(|u| normalize_entity(u)).collect();
                    info!(path = %path.display(), count = users.len(), "loaded watch list");
                    Inner {
                        users,
                        last_updated: file.last_updated,
                    }
                }
                Err(e) => {
                    error!(path = %path.display(), error = %e, "watch list is corrupt, starting empty");
                    Inner::default()
                }
            },
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                let users: BTreeSet<String> =
                    seed.iter().filter_map(|u| normalize_entity(u)).collect();
                let mut inner = Inner {
                    users,
                    last_updated: None,
                };
                if let Err(e) = persist(&path, &mut inner) {
                    warn!(path = %path.display(), error = %e, "failed to write initial watch list");
                }
                info!(path = %path.display(), count = inner.users.len(), "created watch list");
                inner
            }
            Err(e) => {
                error!(path = %path.display(), error = %e, "cannot read watch list, starting empty");
                Inner::default()
            }
        };

        Self {
            path,
            inner: Mutex::new(inner),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Adds an entity. Returns `false` without touching disk when it is
    /// already present.
    pub fn add(&self, raw: &str) -> Result<bool> {
        let id = normalize_entity(raw).ok_or_else(|| LivecapError::InvalidEntity(raw.into()))?;
        let mut inner = self.lock();
        if !inner.users.insert(id.clone()) {
            return Ok(false);
        }
        if let Err(e) = persist(&self.path, &mut inner) {
            warn!(entity = %id, error = %e, "watch list not persisted, keeping in-memory change");
        }
        info!(entity = %id, "added to watch list");
        Ok(true)
    }

    /// Removes an entity. Returns `false` when it was not watched.
    pub fn remove(&self, raw: &str) -> Result<bool> {
        let id = normalize_entity(raw).ok_or_else(|| LivecapError::InvalidEntity(raw.into()))?;
        let mut inner = self.lock();
        if !inner.users.remove(&id) {
            return Ok(false);
        }
        if let Err(e) = persist(&self.path, &mut inner) {
            warn!(entity = %id, error = %e, "watch list not persisted, keeping in-memory change");
        }
        info!(entity = %id, "removed from watch list");
        Ok(true)
    }

    /// Point-in-time sorted copy of the watched entities.
    pub fn snapshot(&self) -> Vec<String> {
        self.lock().users.iter().cloned().collect()
    }

    pub fn contains(&self, raw: &str) -> bool {
        normalize_entity(raw).is_some_and(|id| self.lock().users.contains(&id))
    }

    pub fn len(&self) -> usize {
        self.lock().users.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn last_updated(&self) -> Option<DateTime<Utc>> {
        self.lock().last_updated
    }

    fn lock(&self) -> MutexGuard<'_, Inner> {
        self.inner.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

/// Rewrites the whole document through a temp file + rename.
fn persist(path: &Path, inner: &mut Inner) -> std::io::Result<()> {
    let now = Utc::now();
    let doc = WatchListFile {
        users: inner.users.iter().cloned().collect(),
        last_updated: Some(now),
    };
    let json = serde_json::to_string_pretty(&doc).map_err(std::io::Error::other)?;

    if let Some(parent) = path.parent()
        && !parent.as_os_str().is_empty()
    {
        fs::create_dir_all(parent)?;
    }

    let tmp = path.with_extension("json.tmp");
    {
        let mut file = fs::File::create(&tmp)?;
        file.write_all(json.as_bytes())?;
        file.sync_all()?;
    }
    fs::rename(&tmp, path)?;

    inner.last_updated = Some(now);
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;
    use tempfile::TempDir;

    fn list_in(dir: &TempDir) -> WatchList {
        WatchList::load(dir.path().join("monitoring_list.json"), &[])
    }

    #[test]
    fn normalize_strips_sigil_and_whitespace() {
        assert_eq!(normalize_entity("  @Alice "), Some("Alice".to_string()));
        assert_eq!(normalize_entity("bob.tv8"), Some("bob.tv8".to_string()));
        assert_eq!(normalize_entity("@"), None);
        assert_eq!(normalize_entity("   "), None);
        assert_eq!(normalize_entity("two words"), None);
    }

    #[test]
    fn add_then_snapshot() {
        let dir = TempDir::new().unwrap();
        let list = list_in(&dir);
        assert!(list.add("alice").unwrap());
        assert_eq!(list.snapshot(), vec!["alice"]);
    }

    #[test]
    fn duplicate_add_is_rejected() {
        let dir = TempDir::new().unwrap();
        let list = list_in(&dir);
        assert!(list.add("@alice").unwrap());
        assert!(!list.add("alice").unwrap());
        assert_eq!(list.len(), 1);
    }

    #[test]
    fn remove_missing_returns_false() {
        let dir = TempDir::new().unwrap();
        let list = list_in(&dir);
        assert!(!list.remove("ghost").unwrap());
    }

    #[test]
    fn empty_identifier_is_invalid() {
        let dir = TempDir::new().unwrap();
        let list = list_in(&dir);
        assert!(matches!(list.add("@"), Err(LivecapError::InvalidEntity(_))));
    }

    #[test]
    fn snapshot_is_sorted() {
        let dir = TempDir::new().unwrap();
        let list = list_in(&dir);
        for id in ["carol", "alice", "bob"] {
            list.add(id).unwrap();
        }
        assert_eq!(list.snapshot(), vec!["alice", "bob", "carol"]);
    }

    #[test]
    fn mutations_survive_reload() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("monitoring_list.json");
        {
            let list = WatchList::load(&path, &[]);
            list.add("alice").unwrap();
            list.add("bob").unwrap();
            list.remove("alice").unwrap();
        }
        let reloaded = WatchList::load(&path, &[]);
        assert_eq!(reloaded.snapshot(), vec!["bob"]);
        assert!(reloaded.last_updated().is_some());
    }

    #[test]
    fn missing_file_is_seeded_and_written() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("nested").join("list.json");
        let seed = vec!["@zed".to_string(), "amy".to_string()];
        let list = WatchList::load(&path, &seed);
        assert_eq!(list.snapshot(), vec!["amy", "zed"]);
        assert!(path.exists());
    }

    #[test]
    fn corrupt_file_degrades_to_empty() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("list.json");
        fs::write(&path, "{ not json").unwrap();
        let list = WatchList::load(&path, &["seed".to_string()]);
        assert!(list.is_empty());
    }

    #[test]
    fn document_format_matches_expected_shape() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("list.json");
        let list = WatchList::load(&path, &[]);
        list.add("bob").unwrap();
        list.add("alice").unwrap();

        let raw: serde_json::Value =
            serde_json::from_str(&fs::read_to_string(&path).unwrap()).unwrap();
        assert_eq!(raw["users"], serde_json::json!(["alice", "bob"]));
        assert!(raw["last_updated"].is_string());
    }

    #[derive(Debug, Clone)]
    enum Op {
        Add(String),
        Remove(String),
    }

    fn op_strategy() -> impl Strategy<Value = Op> {
        let id = prop_oneof![Just("a"), Just("b"), Just("c"), Just("@a"), Just("d")]
            .prop_map(String::from);
        prop_oneof![id.clone().prop_map(Op::Add), id.prop_map(Op::Remove)]
    }

    proptest! {
        #![proptest_config(ProptestConfig::with_cases(32))]

        #[test]
        fn snapshot_reflects_net_effect(ops in proptest::collection::vec(op_strategy(), 0..24)) {
            let dir = TempDir::new().unwrap();
            let list = list_in(&dir);
            let mut model = BTreeSet::new();

            for op in ops {
                match op {
                    Op::Add(raw) => {
                        let id = normalize_entity(&raw).unwrap();
                        prop_assert_eq!(list.add(&raw).unwrap(), model.insert(id));
                    }
                    Op::Remove(raw) => {
                        let id = normalize_entity(&raw).unwrap();
                        prop_assert_eq!(list.remove(&raw).unwrap(), model.remove(&id));
                    }
                }
                let expected: Vec<String> = model.iter().cloned().collect();
                prop_assert_eq!(list.snapshot(), expected.clone());
                prop_assert_eq!(WatchList::load(list.path(), &[]).snapshot(), expected);
            }
        }
    }
}
