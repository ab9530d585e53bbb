//! Module cache.
//!
//! Resolved and transformed modules keyed by canonical path, plus a reverse
//! index from extra input files (inlined files, `package.json`) to the modules
//! that read them.

use rustc_hash::{FxHashMap, FxHashSet};
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;

/// Where a `require` specifier points.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Dependency {
    Module(PathBuf),
    /// Node builtin, bundled as an empty object.
    Builtin(String),
}

/// A module after reading, transforming and resolving.
#[derive(Debug, Clone)]
pub struct CachedModule {
    /// Canonical absolute path.
    pub path: PathBuf,
    /// Source as read from disk.
    pub source: String,
    /// Source after the transform pipeline.
    pub code: String,
    /// Specifier -> target, in specifier order.
    pub dependencies: BTreeMap<String, Dependency>,
    /// Files other than `path` whose contents affected this entry.
    pub inputs: Vec<PathBuf>,
    /// BLAKE3 of `code`.
    pub digest: String,
}

impl CachedModule {
    /// Paths of local modules this module requires.
    pub fn module_dependencies(&self) -> impl Iterator<Item = &Path> {
        self.dependencies.values().filter_map(|dep| match dep {
            Dependency::Module(path) => Some(path.as_path()),
            Dependency::Builtin(_) => None,
        })
    }
}

/// The resolved-module cache.
#[derive(Debug, Default)]
pub struct ModuleCache {
    modules: FxHashMap<PathBuf, Arc<CachedModule>>,
    /// Input file -> modules that read it.
    dependents: FxHashMap<PathBuf, FxHashSet<PathBuf>>,
}

impl ModuleCache {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    #[must_use]
    pub fn get(&self, path: &Path) -> Option<&Arc<CachedModule>> {
        self.modules.get(path)
    }

    pub fn insert(&mut self, module: CachedModule) -> Arc<CachedModule> {
        for input in &module.inputs {
            self.dependents
                .entry(input.clone())
                .or_default()
                .insert(module.path.clone());
        }
        let module = Arc::new(module);
        if let Some(old) = self
            .modules
            .insert(module.path.clone(), Arc::clone(&module))
        {
            self.unindex(&old);
        }
        module
    }

    /// Remove a module; returns whether it was cached.
    pub fn remove(&mut self, path: &Path) -> bool {
        match self.modules.remove(path) {
            Some(old) => {
                self.unindex(&old);
                true
            }
            None => false,
        }
    }

    fn unindex(&mut self, module: &CachedModule) {
        for input in &module.inputs {
            let still_used = self
                .modules
                .get(&module.path)
                .is_some_and(|current| current.inputs.contains(input));
            if still_used {
                continue;
            }
            if let Some(set) = self.dependents.get_mut(input) {
                set.remove(&module.path);
                if set.is_empty() {
                    self.dependents.remove(input);
                }
            }
        }
    }

    /// Modules that read `input` while being built.
    #[must_use]
    pub fn dependents_of(&self, input: &Path) -> Vec<PathBuf> {
        self.dependents
            .get(input)
            .map(|set| set.iter().cloned().collect())
            .unwrap_or_default()
    }

    /// Modules whose `require` calls resolve to `path`.
    #[must_use]
    pub fn importers_of(&self, path: &Path) -> Vec<PathBuf> {
        self.modules
            .values()
            .filter(|m| m.module_dependencies().any(|dep| dep == path))
            .map(|m| m.path.clone())
            .collect()
    }

    /// Keep only the modules in `reachable`.
    pub fn retain(&mut self, reachable: &FxHashSet<PathBuf>) {
        let evicted: Vec<PathBuf> = self
            .modules
            .keys()
            .filter(|path| !reachable.contains(*path))
            .cloned()
            .collect();
        for path in evicted {
            tracing::trace!(path = %path.display(), "evicting unreachable module");
            self.remove(&path);
        }
    }

    /// Every extra input referenced by a cached module.
    #[must_use]
    pub fn inputs(&self) -> FxHashSet<PathBuf> {
        self.dependents.keys().cloned().collect()
    }

    pub fn iter(&self) -> impl Iterator<Item = &Arc<CachedModule>> {
        self.modules.values()
    }

    #[must_use]
    pub fn contains(&self, path: &Path) -> bool {
        self.modules.contains_key(path)
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.modules.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.modules.is_empty()
    }
}
