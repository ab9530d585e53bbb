//! `require` specifier resolution.
//!
//! Resolves specifiers to absolute file paths the way Node does for
//! CommonJS, with browser-field preference.
//!
//! ## Specifier Types
//!
//! - Relative: `./utils`, `../lib/foo`
//! - Absolute: `/abs/path/to/module`
//! - Bare: `lodash`, `@scope/pkg`, `lodash/get` (walks `node_modules` upward)
//! - Builtin: `fs`, `node:path` (bundled as an empty object)

use super::pkg_cache::PackageCache;
use std::path::{Path, PathBuf};

/// Extensions tried when a specifier names no existing file.
const EXTENSIONS: &[&str] = &["js", "json"];

/// Index files tried inside a directory.
const INDEX_FILES: &[&str] = &["index.js", "index.json"];

/// Node core modules. A package of the same name in `node_modules` wins.
const BUILTINS: &[&str] = &[
    "assert",
    "buffer",
    "child_process",
    "cluster",
    "console",
    "constants",
    "crypto",
    "dgram",
    "dns",
    "domain",
    "events",
    "fs",
    "http",
    "https",
    "module",
    "net",
    "os",
    "path",
    "process",
    "punycode",
    "querystring",
    "readline",
    "repl",
    "stream",
    "string_decoder",
    "sys",
    "timers",
    "tls",
    "tty",
    "url",
    "util",
    "vm",
    "zlib",
];

/// Target of a resolved specifier.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ResolveResult {
    /// Successfully resolved to a file path.
    Found(PathBuf),
    /// Built-in module (`fs`, `node:path`, ...).
    Builtin(String),
}

/// A resolution plus the package metadata files it read.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Resolution {
    pub result: ResolveResult,
    /// `package.json` files consulted along the way.
    pub consulted: Vec<PathBuf>,
}

/// Error during resolution.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("Cannot resolve '{specifier}' from '{from}': {message}")]
pub struct ResolveError {
    pub specifier: String,
    pub from: String,
    pub message: String,
}

/// Resolver for one lookup. Package metadata goes through the shared cache.
pub struct Resolver<'a> {
    packages: &'a mut PackageCache,
    consulted: Vec<PathBuf>,
}

impl<'a> Resolver<'a> {
    pub fn new(packages: &'a mut PackageCache) -> Self {
        Self {
            packages,
            consulted: Vec::new(),
        }
    }

    /// Resolve `specifier` as required from the module at `from`.
    pub fn resolve(mut self, specifier: &str, from: &Path) -> Result<Resolution, ResolveError> {
        let result = self.resolve_inner(specifier, from)?;
        Ok(Resolution {
            result,
            consulted: self.consulted,
        })
    }

    /// Locate an entry module at `target`: the file itself, the file with a
    /// known extension, or a directory's package entry or index file.
    ///
    /// Returns `Ok(None)` when nothing matches.
    pub fn resolve_entry(mut self, target: &Path) -> Result<Option<Resolution>, ResolveError> {
        let specifier = target.display().to_string();
        match self.load_file_or_directory(target, &specifier, target)? {
            Some(path) => Ok(Some(Resolution {
                result: ResolveResult::Found(path),
                consulted: self.consulted,
            })),
            None => Ok(None),
        }
    }

    fn resolve_inner(&mut self, specifier: &str, from: &Path) -> Result<ResolveResult, ResolveError> {
        if let Some(name) = specifier.strip_prefix("node:") {
            return Ok(ResolveResult::Builtin(name.to_string()));
        }

        let from_dir = from.parent().unwrap_or(Path::new("/"));

        if specifier.starts_with("./")
            || specifier.starts_with("../")
            || specifier == "."
            || specifier == ".."
        {
            return self.resolve_path(&from_dir.join(specifier), specifier, from);
        }

        if specifier.starts_with('/') {
            return self.resolve_path(Path::new(specifier), specifier, from);
        }

        match self.resolve_bare(specifier, from_dir, from)? {
            Some(found) => Ok(found),
            None if BUILTINS.contains(&specifier) => {
                Ok(ResolveResult::Builtin(specifier.to_string()))
            }
            None => Err(error(
                specifier,
                from,
                format!(
                    "Cannot find package '{}' in node_modules",
                    parse_bare_specifier(specifier).0
                ),
            )),
        }
    }

    fn resolve_path(
        &mut self,
        target: &Path,
        specifier: &str,
        from: &Path,
    ) -> Result<ResolveResult, ResolveError> {
        match self.load_file_or_directory(target, specifier, from)? {
            Some(path) => Ok(ResolveResult::Found(path)),
            None => Err(error(specifier, from, "File not found")),
        }
    }

    /// Walk `node_modules` directories from `from_dir` up to the filesystem root.
    fn resolve_bare(
        &mut self,
        specifier: &str,
        from_dir: &Path,
        from: &Path,
    ) -> Result<Option<ResolveResult>, ResolveError> {
        let (pkg_name, subpath) = parse_bare_specifier(specifier);

        for dir in from_dir.ancestors() {
            if dir.file_name().is_some_and(|n| n == "node_modules") {
                continue;
            }
            let pkg_dir = dir.join("node_modules").join(pkg_name);
            if !pkg_dir.is_dir() {
                continue;
            }

            let found = match subpath {
                Some(sub) => self.load_file_or_directory(&pkg_dir.join(sub), specifier, from)?,
                None => self.load_directory(&pkg_dir, specifier, from)?,
            };
            if let Some(path) = found {
                return Ok(Some(ResolveResult::Found(path)));
            }
        }

        Ok(None)
    }

    fn load_file_or_directory(
        &mut self,
        target: &Path,
        specifier: &str,
        from: &Path,
    ) -> Result<Option<PathBuf>, ResolveError> {
        if let Some(file) = load_file(target, specifier, from)? {
            return Ok(Some(file));
        }
        if target.is_dir() {
            return self.load_directory(target, specifier, from);
        }
        Ok(None)
    }

    /// Package entry (`browser`, then `main`), then index files.
    fn load_directory(
        &mut self,
        dir: &Path,
        specifier: &str,
        from: &Path,
    ) -> Result<Option<PathBuf>, ResolveError> {
        // Canonical key, matching how `Builder::invalidate` looks paths up.
        let pkg_json = dir.join("package.json");
        let pkg_json = dunce::canonicalize(&pkg_json).unwrap_or(pkg_json);
        let pkg = self
            .packages
            .load(&pkg_json)
            .map_err(|message| error(specifier, from, message))?;

        if let Some(pkg) = pkg {
            self.consulted.push(pkg_json);
            if let Some(entry) = pkg.entry() {
                let target = dir.join(entry);
                if let Some(file) = load_file(&target, specifier, from)? {
                    return Ok(Some(file));
                }
                if let Some(index) = load_index(&target, specifier, from)? {
                    return Ok(Some(index));
                }
            }
        }

        load_index(dir, specifier, from)
    }
}

/// The file itself, then with each known extension appended.
fn load_file(target: &Path, specifier: &str, from: &Path) -> Result<Option<PathBuf>, ResolveError> {
    if target.is_file() {
        return canonical(target, specifier, from).map(Some);
    }
    for ext in EXTENSIONS {
        let with_ext = PathBuf::from(format!("{}.{ext}", target.display()));
        if with_ext.is_file() {
            return canonical(&with_ext, specifier, from).map(Some);
        }
    }
    Ok(None)
}

fn load_index(dir: &Path, specifier: &str, from: &Path) -> Result<Option<PathBuf>, ResolveError> {
    for index in INDEX_FILES {
        let index_path = dir.join(index);
        if index_path.is_file() {
            return canonical(&index_path, specifier, from).map(Some);
        }
    }
    Ok(None)
}

fn canonical(path: &Path, specifier: &str, from: &Path) -> Result<PathBuf, ResolveError> {
    dunce::canonicalize(path).map_err(|e| error(specifier, from, e.to_string()))
}

fn error(specifier: &str, from: &Path, message: impl Into<String>) -> ResolveError {
    ResolveError {
        specifier: specifier.to_string(),
        from: from.display().to_string(),
        message: message.into(),
    }
}

/// Split a bare specifier into package name and subpath.
fn parse_bare_specifier(specifier: &str) -> (&str, Option<&str>) {
    let split_at = if specifier.starts_with('@') {
        specifier
            .match_indices('/')
            .nth(1)
            .map(|(idx, _)| idx)
    } else {
        specifier.find('/')
    };

    match split_at {
        Some(idx) => (&specifier[..idx], Some(&specifier[idx + 1..])),
        None => (specifier, None),
    }
}
