//! Bundle graph builder.
//!
//! Builds one bundle from an entry module, reusing cached modules across
//! builds.
//!
//! ## Usage
//!
//! ```ignore
//! use sling_core::{build_pipeline, BuildConfig, Builder};
//!
//! let config = BuildConfig::new(cwd);
//! let mut builder = Builder::new("src/main.js", &config, build_pipeline(&config));
//! let stream = builder.build();
//! ```
//!
//! ## Architecture
//!
//! 1. **Resolution** - Resolve `require` specifiers to file paths
//! 2. **Graph** - Discover modules breadth-first from the entry
//! 3. **Transform** - Run each new or invalidated module through the pipeline
//! 4. **Emit** - Stream the wrapped modules into a single bundle

mod emit;
mod graph;
mod pkg_cache;
mod resolve;
mod scan;

pub use graph::{CachedModule, Dependency, ModuleCache};
pub use pkg_cache::{PackageCache, PackageJson};
pub use resolve::{Resolution, ResolveError, ResolveResult, Resolver};
pub use scan::{scan_requires, RequireSpec};

use crate::config::BuildConfig;
use crate::pipeline::{Pipeline, TransformContext, TransformError};
use bytes::Bytes;
use futures::stream::{self, BoxStream, StreamExt};
use rustc_hash::{FxHashMap, FxHashSet};
use std::collections::{BTreeMap, BTreeSet, VecDeque};
use std::path::{Path, PathBuf};
use std::sync::Arc;

/// Bundle output, rendered chunk by chunk as it is polled.
pub type BundleStream = BoxStream<'static, Result<Bytes, BundleError>>;

/// Errors of a single build cycle.
#[derive(Debug, thiserror::Error)]
pub enum BundleError {
    #[error("entry module not found: {}", path.display())]
    EntryNotFound {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error(transparent)]
    Resolution(#[from] ResolveError),

    #[error("failed to read {}: {source}", path.display())]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error(transparent)]
    Transform(#[from] TransformError),

    #[error("failed to write {}: {source}", path.display())]
    Write {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
}

impl BundleError {
    /// Stable machine-readable code.
    #[must_use]
    pub fn code(&self) -> &'static str {
        match self {
            Self::EntryNotFound { .. } => "BUNDLE_ENTRY_NOT_FOUND",
            Self::Resolution(_) => "BUNDLE_RESOLVE_ERROR",
            Self::Read { .. } => "BUNDLE_READ_ERROR",
            Self::Transform(_) => "BUNDLE_TRANSFORM_ERROR",
            Self::Write { .. } => "BUNDLE_WRITE_ERROR",
        }
    }

    /// Whether the error is a failure to resolve a module.
    #[must_use]
    pub fn is_resolution(&self) -> bool {
        matches!(self, Self::EntryNotFound { .. } | Self::Resolution(_))
    }
}

/// Cumulative counters across every build of a [`Builder`].
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct BuildStats {
    /// Module sources read from disk.
    pub reads: u64,
    /// Modules served from the cache.
    pub cache_hits: u64,
}

/// Builds bundles for one entry, caching modules between builds.
pub struct Builder {
    entry: PathBuf,
    cwd: PathBuf,
    full_paths: bool,
    debug: bool,
    banner: bool,
    pipeline: Pipeline,
    modules: ModuleCache,
    packages: PackageCache,
    stats: BuildStats,
    read_counts: FxHashMap<PathBuf, u64>,
    watch_set: BTreeSet<PathBuf>,
    last_build_ok: bool,
}

impl Builder {
    /// Create a builder for `entry` (relative paths are taken from the config's cwd).
    pub fn new(entry: impl AsRef<Path>, config: &BuildConfig, pipeline: Pipeline) -> Self {
        Self {
            entry: config.absolute(entry.as_ref()),
            cwd: config.cwd.clone(),
            full_paths: config.full_paths,
            debug: config.debug,
            banner: config.minify.is_none(),
            pipeline,
            modules: ModuleCache::new(),
            packages: PackageCache::new(),
            stats: BuildStats::default(),
            read_counts: FxHashMap::default(),
            watch_set: BTreeSet::new(),
            last_build_ok: false,
        }
    }

    /// Build the bundle.
    ///
    /// Graph discovery happens now; module chunks are rendered as the stream is
    /// polled. Failures surface as a single `Err` item.
    pub fn build(&mut self) -> BundleStream {
        match self.discover() {
            Ok(plan) => {
                self.last_build_ok = true;
                tracing::debug!(
                    modules = plan.modules.len(),
                    reads = self.stats.reads,
                    cache_hits = self.stats.cache_hits,
                    "bundle graph resolved"
                );
                emit::render(plan)
            }
            Err(err) => {
                self.last_build_ok = false;
                tracing::debug!(code = err.code(), "bundle graph failed");
                stream::once(async move { Err::<Bytes, _>(err) }).boxed()
            }
        }
    }

    fn discover(&mut self) -> Result<emit::BundlePlan, BundleError> {
        let (entry, entry_inputs) = self.resolve_entry()?;

        let mut reachable: FxHashSet<PathBuf> = FxHashSet::default();
        let mut queue = VecDeque::from([entry.clone()]);
        reachable.insert(entry.clone());
        let mut visited = Vec::new();

        while let Some(path) = queue.pop_front() {
            // A failed build keeps everything it touched under watch.
            self.watch_set.insert(path.clone());
            let module = self.load(&path)?;
            for input in &module.inputs {
                self.watch_set.insert(input.clone());
            }
            for dep in module.module_dependencies() {
                if reachable.insert(dep.to_path_buf()) {
                    queue.push_back(dep.to_path_buf());
                }
            }
            visited.push(module);
        }

        self.modules.retain(&reachable);
        let mut inputs = self.modules.inputs();
        inputs.extend(entry_inputs);
        self.packages.retain(&inputs);

        self.watch_set = reachable.iter().chain(inputs.iter()).cloned().collect();

        visited.sort_by(|a, b| a.path.cmp(&b.path));
        Ok(emit::BundlePlan {
            modules: visited,
            entry,
            full_paths: self.full_paths,
            debug: self.debug,
            banner: self.banner,
            cwd: self.cwd.clone(),
        })
    }

    /// Locate the entry on the module search path.
    ///
    /// Returns the entry file plus the package metadata read to find it.
    fn resolve_entry(&mut self) -> Result<(PathBuf, Vec<PathBuf>), BundleError> {
        let resolution = Resolver::new(&mut self.packages).resolve_entry(&self.entry);
        match resolution {
            Ok(Some(Resolution {
                result: ResolveResult::Found(path),
                consulted,
            })) => {
                self.watch_set.extend(consulted.iter().cloned());
                Ok((path, consulted))
            }
            Ok(_) => {
                self.watch_set.insert(self.entry.clone());
                Err(BundleError::EntryNotFound {
                    path: self.entry.clone(),
                    source: std::io::Error::new(
                        std::io::ErrorKind::NotFound,
                        "no matching file or directory entry",
                    ),
                })
            }
            Err(e) => {
                self.watch_set.insert(self.entry.clone());
                Err(e.into())
            }
        }
    }

    /// Cached module, or read, transform, scan and resolve it.
    fn load(&mut self, path: &Path) -> Result<Arc<CachedModule>, BundleError> {
        if let Some(module) = self.modules.get(path) {
            self.stats.cache_hits += 1;
            return Ok(Arc::clone(module));
        }

        let source = sling_util::fs::read_to_string_lossy(path).map_err(|source| {
            BundleError::Read {
                path: path.to_path_buf(),
                source,
            }
        })?;
        self.stats.reads += 1;
        *self.read_counts.entry(path.to_path_buf()).or_default() += 1;

        let wrapped;
        let input = if path.extension().is_some_and(|ext| ext == "json") {
            wrapped = format!("module.exports = {};", source.trim_end());
            wrapped.as_str()
        } else {
            source.as_str()
        };

        let ctx = TransformContext::new(path);
        let transformed = self.pipeline.run(&ctx, input)?;

        let requires = scan_requires(&transformed.code).map_err(|e| {
            TransformError::new(
                "require-scan",
                path,
                format!("{} (line {})", e.message, e.line),
            )
        })?;

        let mut dependencies = BTreeMap::new();
        let mut inputs = transformed.dependencies;
        for spec in requires {
            let resolution = Resolver::new(&mut self.packages).resolve(&spec.specifier, path)?;
            for consulted in resolution.consulted {
                if !inputs.contains(&consulted) {
                    inputs.push(consulted);
                }
            }
            let dep = match resolution.result {
                ResolveResult::Found(target) => Dependency::Module(target),
                ResolveResult::Builtin(name) => Dependency::Builtin(name),
            };
            dependencies.insert(spec.specifier, dep);
        }

        let digest = sling_util::hash::blake3_bytes(transformed.code.as_bytes());
        tracing::trace!(path = %path.display(), digest = %digest, "module built");

        Ok(self.modules.insert(CachedModule {
            path: path.to_path_buf(),
            source,
            code: transformed.code,
            dependencies,
            inputs,
            digest,
        }))
    }

    /// Drop every cache entry affected by a change to `path`.
    ///
    /// Removes the module at `path`, modules that read `path` as an extra
    /// input, and, when `path` no longer exists, modules that require it.
    /// Returns the number of modules removed.
    pub fn invalidate(&mut self, path: &Path) -> usize {
        let path = normalize(path);
        if self.packages.invalidate(&path) {
            tracing::trace!(path = %path.display(), "package metadata invalidated");
        }

        let mut targets = vec![path.clone()];
        targets.extend(self.modules.dependents_of(&path));
        if !path.exists() {
            targets.extend(self.modules.importers_of(&path));
        }

        let removed = targets.iter().filter(|t| self.modules.remove(t)).count();
        tracing::debug!(path = %path.display(), removed, "invalidated");
        removed
    }

    /// Files whose changes affect the next build.
    #[must_use]
    pub fn watch_set(&self) -> &BTreeSet<PathBuf> {
        &self.watch_set
    }

    #[must_use]
    pub fn last_build_ok(&self) -> bool {
        self.last_build_ok
    }

    #[must_use]
    pub fn stats(&self) -> BuildStats {
        self.stats
    }

    /// How many times the module at `path` has been read from disk.
    #[must_use]
    pub fn read_count(&self, path: &Path) -> u64 {
        self.read_counts.get(&normalize(path)).copied().unwrap_or(0)
    }

    /// Digest of each cached module's transformed code.
    #[must_use]
    pub fn module_digests(&self) -> BTreeMap<PathBuf, String> {
        self.modules
            .iter()
            .map(|m| (m.path.clone(), m.digest.clone()))
            .collect()
    }

    /// Number of cached modules.
    #[must_use]
    pub fn cached_modules(&self) -> usize {
        self.modules.len()
    }
}

/// Canonical form of `path`, also for paths that no longer exist.
fn normalize(path: &Path) -> PathBuf {
    if let Ok(canonical) = dunce::canonicalize(path) {
        return canonical;
    }
    match (path.parent(), path.file_name()) {
        (Some(parent), Some(name)) => dunce::canonicalize(parent)
            .map(|p| p.join(name))
            .unwrap_or_else(|_| path.to_path_buf()),
        _ => path.to_path_buf(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::MinifyScope;
    use crate::pipeline::build_pipeline;
    use std::fs;
    use tempfile::tempdir;

    async fn collect(stream: BundleStream) -> Result<String, BundleError> {
        let chunks: Vec<_> = stream.collect().await;
        let mut out = Vec::new();
        for chunk in chunks {
            out.extend_from_slice(&chunk?);
        }
        Ok(String::from_utf8(out).unwrap())
    }

    fn project() -> tempfile::TempDir {
        let dir = tempdir().unwrap();
        fs::write(
            dir.path().join("a.js"),
            "var b = require('./b');\nvar c = require('./lib/c');\nconsole.log(b + c);\n",
        )
        .unwrap();
        fs::write(dir.path().join("b.js"), "module.exports = require('./lib/c') + 1;\n").unwrap();
        fs::create_dir(dir.path().join("lib")).unwrap();
        fs::write(dir.path().join("lib/c.js"), "module.exports = 41;\n").unwrap();
        dir
    }

    fn builder(config: BuildConfig) -> Builder {
        let pipeline = build_pipeline(&config);
        Builder::new("a.js", &config, pipeline)
    }

    #[tokio::test]
    async fn test_module_closure() {
        let dir = project();
        let config = BuildConfig::new(dir.path().to_path_buf());
        let mut builder = builder(config);
        let out = collect(builder.build()).await.unwrap();

        assert_eq!(out.matches("console.log(b + c);").count(), 1);
        assert_eq!(out.matches("module.exports = 41;").count(), 1);
        assert_eq!(out.matches("module.exports = require('./lib/c') + 1;").count(), 1);
        assert_eq!(builder.cached_modules(), 3);
        assert!(builder.last_build_ok());
    }

    #[tokio::test]
    async fn test_idempotent_output() {
        let dir = project();
        for full_paths in [false, true] {
            let config = BuildConfig::new(dir.path().to_path_buf()).with_full_paths(full_paths);
            let first = collect(builder(config.clone()).build()).await.unwrap();
            let second = collect(builder(config).build()).await.unwrap();
            assert_eq!(first, second);
        }
    }

    #[tokio::test]
    async fn test_full_paths_only_change_ids() {
        let dir = project();
        let config = BuildConfig::new(dir.path().to_path_buf()).with_full_paths(true);
        let out = collect(builder(config).build()).await.unwrap();
        let c = dunce::canonicalize(dir.path().join("lib/c.js")).unwrap();
        let c_id = serde_json::to_string(&c.display().to_string()).unwrap();
        assert!(out.contains(&format!("{c_id}: [function")));
        assert!(out.contains(&format!("\"./lib/c\":{c_id}")));
    }

    #[tokio::test]
    async fn test_incremental_digest_and_cache_reuse() {
        let dir = project();
        let config = BuildConfig::new(dir.path().to_path_buf());
        let mut builder = builder(config);
        collect(builder.build()).await.unwrap();
        let before = builder.module_digests();
        assert_eq!(builder.stats().reads, 3);

        let c = dir.path().join("lib/c.js");
        fs::write(&c, "module.exports = 42;\n").unwrap();
        assert_eq!(builder.invalidate(&c), 1);
        let out = collect(builder.build()).await.unwrap();
        assert!(out.contains("module.exports = 42;"));

        let after = builder.module_digests();
        let changed: Vec<_> = before
            .iter()
            .filter(|(path, digest)| after.get(*path) != Some(*digest))
            .map(|(path, _)| path.clone())
            .collect();
        assert_eq!(changed, vec![dunce::canonicalize(&c).unwrap()]);

        assert_eq!(builder.stats().reads, 4);
        assert_eq!(builder.read_count(&dir.path().join("a.js")), 1);
        assert_eq!(builder.read_count(&dir.path().join("b.js")), 1);
        assert_eq!(builder.read_count(&c), 2);
        assert_eq!(builder.stats().cache_hits, 2);
    }

    #[tokio::test]
    async fn test_unreachable_modules_are_evicted() {
        let dir = project();
        let config = BuildConfig::new(dir.path().to_path_buf());
        let mut builder = builder(config);
        collect(builder.build()).await.unwrap();

        let b = dir.path().join("b.js");
        fs::write(dir.path().join("a.js"), "module.exports = 1;\n").unwrap();
        builder.invalidate(&dir.path().join("a.js"));
        collect(builder.build()).await.unwrap();

        assert_eq!(builder.cached_modules(), 1);
        assert!(!builder.watch_set().contains(&dunce::canonicalize(&b).unwrap()));
    }

    #[tokio::test]
    async fn test_deleted_module_invalidates_importers() {
        let dir = project();
        let config = BuildConfig::new(dir.path().to_path_buf());
        let mut builder = builder(config);
        collect(builder.build()).await.unwrap();

        let c = dir.path().join("lib/c.js");
        fs::remove_file(&c).unwrap();
        assert_eq!(builder.invalidate(&c), 3);

        let err = collect(builder.build()).await.unwrap_err();
        assert_eq!(err.code(), "BUNDLE_RESOLVE_ERROR");
        assert!(!builder.last_build_ok());
    }

    #[tokio::test]
    async fn test_missing_entry() {
        let dir = tempdir().unwrap();
        let config = BuildConfig::new(dir.path().to_path_buf());
        let mut builder = Builder::new("nope.js", &config, build_pipeline(&config));
        let err = collect(builder.build()).await.unwrap_err();
        assert!(matches!(err, BundleError::EntryNotFound { .. }));
        assert!(err.is_resolution());
    }

    #[tokio::test]
    async fn test_entry_on_search_path() {
        let dir = tempdir().unwrap();
        let src = dir.path().join("src");
        fs::create_dir(&src).unwrap();
        fs::write(src.join("app.js"), "module.exports = 'app';\n").unwrap();
        fs::write(src.join("index.js"), "module.exports = 'index';\n").unwrap();
        let config = BuildConfig::new(dir.path().to_path_buf());

        let mut builder = Builder::new("src/app", &config, build_pipeline(&config));
        let out = collect(builder.build()).await.unwrap();
        assert!(out.contains("module.exports = 'app';"));
        assert!(out.ends_with("}, [1]);\n"));

        let mut builder = Builder::new("src", &config, build_pipeline(&config));
        let out = collect(builder.build()).await.unwrap();
        assert!(out.contains("module.exports = 'index';"));
        let index = dunce::canonicalize(src.join("index.js")).unwrap();
        assert!(builder.watch_set().contains(&index));
    }

    #[tokio::test]
    async fn test_package_directory_entry_watches_metadata() {
        let dir = tempdir().unwrap();
        let app = dir.path().join("app");
        fs::create_dir(&app).unwrap();
        fs::write(app.join("package.json"), r#"{"main": "start.js"}"#).unwrap();
        fs::write(app.join("start.js"), "module.exports = 'start';\n").unwrap();
        let config = BuildConfig::new(dir.path().to_path_buf());

        let mut builder = Builder::new("app", &config, build_pipeline(&config));
        let out = collect(builder.build()).await.unwrap();
        assert!(out.contains("module.exports = 'start';"));
        let pkg_json = dunce::canonicalize(app.join("package.json")).unwrap();
        assert!(builder.watch_set().contains(&pkg_json));

        fs::write(app.join("package.json"), r#"{"main": "next.js"}"#).unwrap();
        fs::write(app.join("next.js"), "module.exports = 'next';\n").unwrap();
        builder.invalidate(&app.join("package.json"));
        let out = collect(builder.build()).await.unwrap();
        assert!(out.contains("module.exports = 'next';"));
        assert!(!out.contains("module.exports = 'start';"));
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_symlinked_package_metadata_invalidates() {
        let dir = tempdir().unwrap();
        fs::write(dir.path().join("a.js"), "module.exports = require('dep');\n").unwrap();
        let store = dir.path().join("store/dep");
        fs::create_dir_all(&store).unwrap();
        fs::write(store.join("package.json"), r#"{"main": "one.js"}"#).unwrap();
        fs::write(store.join("one.js"), "module.exports = 'one';\n").unwrap();
        fs::write(store.join("two.js"), "module.exports = 'two';\n").unwrap();
        fs::create_dir(dir.path().join("node_modules")).unwrap();
        std::os::unix::fs::symlink(&store, dir.path().join("node_modules/dep")).unwrap();

        let config = BuildConfig::new(dir.path().to_path_buf());
        let mut builder = builder(config);
        let out = collect(builder.build()).await.unwrap();
        assert!(out.contains("'one'"));

        let linked = dir.path().join("node_modules/dep/package.json");
        fs::write(&linked, r#"{"main": "two.js"}"#).unwrap();
        assert!(builder.invalidate(&linked) > 0);
        let out = collect(builder.build()).await.unwrap();
        assert!(out.contains("'two'"));
        assert!(!out.contains("'one'"));
    }

    #[tokio::test]
    async fn test_json_and_packages_and_builtins() {
        let dir = tempdir().unwrap();
        fs::write(
            dir.path().join("a.js"),
            "var d = require('./data.json');\nvar dep = require('dep');\nvar fs = require('fs');\n",
        )
        .unwrap();
        fs::write(dir.path().join("data.json"), "{\"x\": 1}\n").unwrap();
        let pkg = dir.path().join("node_modules/dep");
        fs::create_dir_all(&pkg).unwrap();
        fs::write(pkg.join("package.json"), r#"{"main": "main.js"}"#).unwrap();
        fs::write(pkg.join("main.js"), "// dep\nmodule.exports = 'dep';\n").unwrap();

        let config = BuildConfig::new(dir.path().to_path_buf())
            .with_minify(Some(MinifyScope::Local));
        let mut builder = builder(config);
        let out = collect(builder.build()).await.unwrap();

        assert!(out.contains("module.exports={\"x\":1};"));
        assert!(out.contains("// dep\nmodule.exports = 'dep';"));
        assert!(out.contains("\"fs\":null"));
        let pkg_json = dunce::canonicalize(pkg.join("package.json")).unwrap();
        assert!(builder.watch_set().contains(&pkg_json));

        fs::write(pkg.join("package.json"), r#"{"main": "other.js"}"#).unwrap();
        fs::write(pkg.join("other.js"), "module.exports = 'other';\n").unwrap();
        assert_eq!(builder.invalidate(&pkg.join("package.json")), 1);
        let out = collect(builder.build()).await.unwrap();
        assert!(out.contains("module.exports = 'other';"));
    }

    #[tokio::test]
    async fn test_transform_error_fails_build() {
        let dir = tempdir().unwrap();
        fs::write(dir.path().join("a.js"), "var s = 'unterminated;\n").unwrap();
        let config = BuildConfig::new(dir.path().to_path_buf()).with_downlevel(true);
        let err = collect(builder(config).build()).await.unwrap_err();
        assert_eq!(err.code(), "BUNDLE_TRANSFORM_ERROR");
    }
}
