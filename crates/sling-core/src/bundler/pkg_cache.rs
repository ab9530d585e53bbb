//! Package metadata cache.
//!
//! Parsed `package.json` files keyed by absolute path. Entries live until the
//! file changes or no cached module depends on them anymore.

use rustc_hash::{FxHashMap, FxHashSet};
use serde::Deserialize;
use std::path::{Path, PathBuf};
use std::sync::Arc;

/// Fields of `package.json` the resolver uses.
#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
pub struct PackageJson {
    #[serde(default, deserialize_with = "string_only")]
    pub main: Option<String>,
    /// Browser entry override. Only the string form is honored.
    #[serde(default, deserialize_with = "string_only")]
    pub browser: Option<String>,
}

impl PackageJson {
    /// Entry point relative to the package directory, preferring `browser`.
    #[must_use]
    pub fn entry(&self) -> Option<&str> {
        self.browser
            .as_deref()
            .or(self.main.as_deref())
            .filter(|e| !e.is_empty())
    }
}

/// Accept a string value, treat any other JSON type as absent.
fn string_only<'de, D>(deserializer: D) -> Result<Option<String>, D::Error>
where
    D: serde::Deserializer<'de>,
{
    let value = serde_json::Value::deserialize(deserializer)?;
    Ok(match value {
        serde_json::Value::String(s) => Some(s),
        _ => None,
    })
}

/// Cache of parsed package metadata.
#[derive(Debug, Default)]
pub struct PackageCache {
    entries: FxHashMap<PathBuf, Arc<PackageJson>>,
}

impl PackageCache {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Load `path`, reading it only on a cache miss.
    ///
    /// Returns `Ok(None)` when the file does not exist.
    pub fn load(&mut self, path: &Path) -> Result<Option<Arc<PackageJson>>, String> {
        if let Some(pkg) = self.entries.get(path) {
            return Ok(Some(Arc::clone(pkg)));
        }
        if !path.is_file() {
            return Ok(None);
        }

        let content = std::fs::read_to_string(path).map_err(|e| e.to_string())?;
        let pkg: PackageJson =
            serde_json::from_str(&content).map_err(|e| format!("invalid package.json: {e}"))?;
        let pkg = Arc::new(pkg);
        self.entries.insert(path.to_path_buf(), Arc::clone(&pkg));
        tracing::trace!(path = %path.display(), "package metadata loaded");
        Ok(Some(pkg))
    }

    /// Drop `path`; returns whether it was cached.
    pub fn invalidate(&mut self, path: &Path) -> bool {
        self.entries.remove(path).is_some()
    }

    /// Keep only entries in `referenced`.
    pub fn retain(&mut self, referenced: &FxHashSet<PathBuf>) {
        self.entries.retain(|path, _| referenced.contains(path));
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn test_browser_field_wins() {
        let pkg: PackageJson =
            serde_json::from_str(r#"{"main": "index.js", "browser": "browser.js"}"#).unwrap();
        assert_eq!(pkg.entry(), Some("browser.js"));

        let pkg: PackageJson =
            serde_json::from_str(r#"{"main": "lib/main.js", "browser": {"fs": false}}"#).unwrap();
        assert_eq!(pkg.entry(), Some("lib/main.js"));
    }

    #[test]
    fn test_load_caches_until_invalidated() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("package.json");
        std::fs::write(&path, r#"{"main": "a.js"}"#).unwrap();

        let mut cache = PackageCache::new();
        assert_eq!(cache.load(&path).unwrap().unwrap().entry(), Some("a.js"));

        std::fs::write(&path, r#"{"main": "b.js"}"#).unwrap();
        assert_eq!(cache.load(&path).unwrap().unwrap().entry(), Some("a.js"));

        assert!(cache.invalidate(&path));
        assert_eq!(cache.load(&path).unwrap().unwrap().entry(), Some("b.js"));
    }

    #[test]
    fn test_missing_and_invalid() {
        let dir = tempdir().unwrap();
        let mut cache = PackageCache::new();
        assert!(cache.load(&dir.path().join("package.json")).unwrap().is_none());

        let path = dir.path().join("package.json");
        std::fs::write(&path, "{ not json").unwrap();
        assert!(cache.load(&path).unwrap_err().contains("invalid package.json"));
        assert!(cache.is_empty());
    }
}
