//! Locating the recording a capture job left behind.

use std::fs;
use std::path::{Path, PathBuf};
use std::time::SystemTime;

use tracing::debug;

/// Finds the newest recording for an entity in an output directory.
#[derive(Debug, Clone)]
pub struct ArtifactLocator {
    extensions: Vec<String>,
}

impl Default for ArtifactLocator {
    fn default() -> Self {
        Self::new(["mp4", "mkv", "flv", "ts"])
    }
}

impl ArtifactLocator {
    /// Extensions are matched case-insensitively; a leading dot is optional.
    pub fn new<I, S>(extensions: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        let extensions = extensions
            .into_iter()
            .map(|e| e.as_ref().trim_start_matches('.').to_ascii_lowercase())
            .filter(|e| !e.is_empty())
            .collect();
        Self { extensions }
    }

    pub fn extensions(&self) -> &[String] {
        &self.extensions
    }

    /// Whether `path`'s file name mentions `entity` and carries a recognized
    /// extension.
    pub fn matches(&self, path: &Path, entity: &str) -> bool {
        let Some(name) = path.file_name().and_then(|n| n.to_str()) else {
            return false;
        };
        let Some(ext) = path.extension().and_then(|e| e.to_str()) else {
            return false;
        };
        name.contains(entity) && self.extensions.iter().any(|e| e.eq_ignore_ascii_case(ext))
    }

    /// Non-recursive scan of `root`. Returns the match with the latest
    /// modification time, or `None` when the directory is absent or holds no
    /// match. Entries that cannot be inspected are skipped.
    pub fn locate(&self, root: &Path, entity: &str) -> Option<PathBuf> {
        let entries = match fs::read_dir(root) {
            Ok(entries) => entries,
            Err(e) => {
                debug!(root = %root.display(), error = %e, "output directory not readable");
                return None;
            }
        };

        let mut latest: Option<(SystemTime, PathBuf)> = None;
        for entry in entries {
            let Ok(entry) = entry else { continue };
            let path = entry.path();
            if !self.matches(&path, entity) {
                continue;
            }
            let Ok(meta) = entry.metadata() else { continue };
            if !meta.is_file() {
                continue;
            }
            let Ok(modified) = meta.modified() else { continue };
            if latest.as_ref().is_none_or(|(best, _)| modified > *best) {
                latest = Some((modified, path));
            }
        }

        latest.map(|(_, path)| path)
    }
}
