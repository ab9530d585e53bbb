//! Build configuration.
//!
//! [`BuildConfig`] is created once (CLI flags layered over an optional
//! `sling.config.json`) and passed by reference to every component. It is
//! never mutated after construction.
//!
//! ## Config file
//!
//! ```json
//! {
//!   "downlevel": true,
//!   "minify": true,
//!   "minifyGlobal": false,
//!   "inlineFiles": true,
//!   "lint": true,
//!   "lintTerminate": true,
//!   "serve": "public",
//!   "port": 8080
//! }
//! ```

use crate::error::Error;
use serde::Deserialize;
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Default preview server port.
pub const DEFAULT_PORT: u16 = 8080;

/// Default coalescing window for file change events.
pub const DEFAULT_DEBOUNCE: Duration = Duration::from_millis(100);

/// Default lint command.
pub const DEFAULT_LINT_COMMAND: &str = "jshint";

/// Config file names in priority order.
const CONFIG_FILES: &[&str] = &["sling.config.json", ".slingrc.json"];

/// Which modules the minify stage applies to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MinifyScope {
    /// Project modules only; third-party modules under `node_modules` pass through.
    Local,
    /// Every module, including third-party ones.
    Global,
}

/// Lint pass configuration.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LintConfig {
    /// Linter command line (binary plus optional leading arguments).
    pub command: String,
    /// Exit non-zero when the initial lint pass reports diagnostics.
    pub terminate: bool,
}

impl Default for LintConfig {
    fn default() -> Self {
        Self {
            command: DEFAULT_LINT_COMMAND.to_string(),
            terminate: false,
        }
    }
}

/// Preview server configuration.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ServeConfig {
    /// Directory to serve (absolute).
    pub webroot: PathBuf,
    /// Port to listen on.
    pub port: u16,
}

/// Immutable record of enabled build options.
#[derive(Debug, Clone)]
pub struct BuildConfig {
    /// Working directory; relative paths are resolved against it.
    pub cwd: PathBuf,
    /// Inline source-mapping metadata into the bundle.
    pub debug: bool,
    /// Use absolute paths as module identifiers.
    pub full_paths: bool,
    /// Minify stage (and its scope).
    pub minify: Option<MinifyScope>,
    /// Syntax downleveling stage.
    pub downlevel: bool,
    /// Inline `fs.readFileSync` contents as strings.
    pub inline_files: bool,
    /// Lint before each build.
    pub lint: Option<LintConfig>,
    /// Incremental rebuild mode.
    pub watch: bool,
    /// Coalescing window for change events.
    pub debounce: Duration,
    /// Preview server.
    pub serve: Option<ServeConfig>,
}

impl Default for BuildConfig {
    fn default() -> Self {
        Self {
            cwd: std::env::current_dir().unwrap_or_else(|_| PathBuf::from(".")),
            debug: false,
            full_paths: false,
            minify: None,
            downlevel: false,
            inline_files: false,
            lint: None,
            watch: false,
            debounce: DEFAULT_DEBOUNCE,
            serve: None,
        }
    }
}

impl BuildConfig {
    /// Create a config with every feature disabled.
    #[must_use]
    pub fn new(cwd: PathBuf) -> Self {
        Self {
            cwd,
            ..Default::default()
        }
    }

    #[must_use]
    pub fn with_full_paths(mut self, full_paths: bool) -> Self {
        self.full_paths = full_paths;
        self
    }

    #[must_use]
    pub fn with_minify(mut self, minify: Option<MinifyScope>) -> Self {
        self.minify = minify;
        self
    }

    #[must_use]
    pub fn with_downlevel(mut self, downlevel: bool) -> Self {
        self.downlevel = downlevel;
        self
    }

    #[must_use]
    pub fn with_inline_files(mut self, inline_files: bool) -> Self {
        self.inline_files = inline_files;
        self
    }

    /// Resolve `path` against the working directory.
    #[must_use]
    pub fn absolute(&self, path: &Path) -> PathBuf {
        if path.is_absolute() {
            path.to_path_buf()
        } else {
            self.cwd.join(path)
        }
    }
}

/// Options read from a config file. Every field is optional; CLI flags win.
#[derive(Debug, Clone, Default, Deserialize, PartialEq, Eq)]
#[serde(default, rename_all = "camelCase", deny_unknown_fields)]
pub struct FileConfig {
    pub debug: Option<bool>,
    pub full_paths: Option<bool>,
    pub minify: Option<bool>,
    pub minify_global: Option<bool>,
    pub downlevel: Option<bool>,
    pub inline_files: Option<bool>,
    pub lint: Option<bool>,
    pub lint_terminate: Option<bool>,
    pub lint_command: Option<String>,
    pub watch: Option<bool>,
    pub debounce_ms: Option<u64>,
    pub serve: Option<PathBuf>,
    pub port: Option<u16>,
}

impl FileConfig {
    /// Lint settings from the file, whether or not the file enables linting.
    ///
    /// A flag that turns linting on starts from these.
    #[must_use]
    pub fn lint_settings(&self) -> LintConfig {
        LintConfig {
            command: self
                .lint_command
                .clone()
                .unwrap_or_else(|| DEFAULT_LINT_COMMAND.to_string()),
            terminate: self.lint_terminate.unwrap_or(false),
        }
    }

    /// Build the base config these file options describe.
    #[must_use]
    pub fn into_build_config(self, cwd: PathBuf) -> BuildConfig {
        let minify = match (self.minify, self.minify_global) {
            (_, Some(true)) => Some(MinifyScope::Global),
            (Some(true), _) => Some(MinifyScope::Local),
            _ => None,
        };

        let lint = (self.lint.unwrap_or(false) || self.lint_terminate.unwrap_or(false))
            .then(|| self.lint_settings());

        let serve = self.serve.map(|dir| ServeConfig {
            webroot: if dir.is_absolute() { dir } else { cwd.join(dir) },
            port: self.port.unwrap_or(DEFAULT_PORT),
        });

        BuildConfig {
            debug: self.debug.unwrap_or(false),
            full_paths: self.full_paths.unwrap_or(false),
            minify,
            downlevel: self.downlevel.unwrap_or(false),
            inline_files: self.inline_files.unwrap_or(false),
            lint,
            watch: self.watch.unwrap_or(false),
            debounce: self
                .debounce_ms
                .map_or(DEFAULT_DEBOUNCE, Duration::from_millis),
            serve,
            cwd,
        }
    }
}

/// Find a config file in the given root directory.
#[must_use]
pub fn find_config_file(root: &Path) -> Option<PathBuf> {
    CONFIG_FILES
        .iter()
        .map(|name| root.join(name))
        .find(|path| path.is_file())
}

/// Load configuration from a config file in the given root directory.
///
/// If `config_path` is `Some`, use that specific file. Otherwise, auto-discover.
pub fn load_config(
    root: &Path,
    config_path: Option<&Path>,
) -> Result<Option<(PathBuf, FileConfig)>, Error> {
    let path = match config_path {
        Some(p) => {
            let abs = if p.is_absolute() {
                p.to_path_buf()
            } else {
                root.join(p)
            };
            if !abs.exists() {
                return Err(Error::ConfigNotFound { path: abs });
            }
            abs
        }
        None => match find_config_file(root) {
            Some(p) => p,
            None => return Ok(None),
        },
    };

    let source = std::fs::read_to_string(&path).map_err(|source| Error::ConfigRead {
        path: path.clone(),
        source,
    })?;

    let config = serde_json::from_str(&source).map_err(|source| Error::ConfigParse {
        path: path.clone(),
        source,
    })?;

    Ok(Some((path, config)))
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn test_default_has_no_stages() {
        let config = BuildConfig::new(PathBuf::from("/project"));
        assert!(!config.downlevel);
        assert!(config.minify.is_none());
        assert!(!config.inline_files);
        assert!(config.lint.is_none());
        assert!(config.serve.is_none());
        assert_eq!(config.debounce, DEFAULT_DEBOUNCE);
    }

    #[test]
    fn test_absolute_joins_relative_paths() {
        let config = BuildConfig::new(PathBuf::from("/project"));
        assert_eq!(
            config.absolute(Path::new("src/a.js")),
            PathBuf::from("/project/src/a.js")
        );
        assert_eq!(
            config.absolute(Path::new("/elsewhere/a.js")),
            PathBuf::from("/elsewhere/a.js")
        );
    }

    #[test]
    fn test_load_config_absent() {
        let dir = tempdir().unwrap();
        assert!(load_config(dir.path(), None).unwrap().is_none());
    }

    #[test]
    fn test_load_config_discovers_file() {
        let dir = tempdir().unwrap();
        std::fs::write(
            dir.path().join("sling.config.json"),
            r#"{"minifyGlobal": true, "lintTerminate": true, "serve": "public"}"#,
        )
        .unwrap();

        let (path, file) = load_config(dir.path(), None).unwrap().unwrap();
        assert!(path.ends_with("sling.config.json"));

        let config = file.into_build_config(dir.path().to_path_buf());
        assert_eq!(config.minify, Some(MinifyScope::Global));
        let lint = config.lint.unwrap();
        assert!(lint.terminate);
        assert_eq!(lint.command, "jshint");
        let serve = config.serve.unwrap();
        assert_eq!(serve.webroot, dir.path().join("public"));
        assert_eq!(serve.port, DEFAULT_PORT);
    }

    #[test]
    fn test_lint_command_kept_while_lint_off() {
        let file: FileConfig = serde_json::from_str(r#"{"lintCommand": "eslint"}"#).unwrap();
        assert_eq!(file.lint_settings().command, "eslint");
        assert!(!file.lint_settings().terminate);
        assert!(file.into_build_config(PathBuf::from("/p")).lint.is_none());

        let file = FileConfig::default();
        assert_eq!(file.lint_settings(), LintConfig::default());
    }

    #[test]
    fn test_load_config_explicit_missing() {
        let dir = tempdir().unwrap();
        let err = load_config(dir.path(), Some(Path::new("nope.json"))).unwrap_err();
        assert!(matches!(err, Error::ConfigNotFound { .. }));
    }

    #[test]
    fn test_load_config_rejects_unknown_keys() {
        let dir = tempdir().unwrap();
        std::fs::write(dir.path().join("sling.config.json"), r#"{"minfy": true}"#).unwrap();
        let err = load_config(dir.path(), None).unwrap_err();
        assert!(matches!(err, Error::ConfigParse { .. }));
    }
}
