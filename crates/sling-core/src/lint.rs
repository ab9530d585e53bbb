//! External linter runner.
//!
//! Runs the configured linter over the working directory before a build. Any
//! output on stdout is treated as diagnostics.

use crate::config::LintConfig;
use std::path::{Path, PathBuf};
use std::process::Stdio;
use tokio::process::Command;

/// Result of one lint pass.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LintReport {
    /// Linter binary that ran.
    pub program: PathBuf,
    /// Diagnostics printed by the linter (empty when clean).
    pub diagnostics: String,
    /// Exit code, if the linter exited normally.
    pub exit_code: Option<i32>,
}

impl LintReport {
    #[must_use]
    pub fn is_clean(&self) -> bool {
        self.diagnostics.trim().is_empty()
    }
}

/// Lint runner error.
#[derive(Debug, thiserror::Error)]
pub enum LintError {
    #[error("linter '{command}' not found in node_modules/.bin or on PATH")]
    NotFound { command: String },

    #[error("lint command is empty")]
    EmptyCommand,

    #[error("failed to run {}: {source}", program.display())]
    Spawn {
        program: PathBuf,
        #[source]
        source: std::io::Error,
    },
}

/// Locate `binary`: `<cwd>/node_modules/.bin` first, then `PATH`.
#[must_use]
pub fn locate(binary: &str, cwd: &Path) -> Option<PathBuf> {
    let local = cwd.join("node_modules").join(".bin").join(binary);
    if local.is_file() {
        return Some(local);
    }
    which::which(binary).ok()
}

/// Run the linter described by `config` over `cwd`.
pub async fn run(config: &LintConfig, cwd: &Path) -> Result<LintReport, LintError> {
    let mut parts = config.command.split_whitespace();
    let binary = parts.next().ok_or(LintError::EmptyCommand)?;
    let program = locate(binary, cwd).ok_or_else(|| LintError::NotFound {
        command: binary.to_string(),
    })?;

    tracing::debug!(program = %program.display(), "running linter");

    let output = Command::new(&program)
        .args(parts)
        .arg(cwd.join("."))
        .current_dir(cwd)
        .stdin(Stdio::null())
        .stdout(Stdio::piped())
        .stderr(Stdio::inherit())
        .output()
        .await
        .map_err(|source| LintError::Spawn {
            program: program.clone(),
            source,
        })?;

    let report = LintReport {
        program,
        diagnostics: String::from_utf8_lossy(&output.stdout).into_owned(),
        exit_code: output.status.code(),
    };
    tracing::debug!(
        clean = report.is_clean(),
        exit_code = ?report.exit_code,
        "linter finished"
    );
    Ok(report)
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[tokio::test]
    async fn test_missing_linter() {
        let dir = tempdir().unwrap();
        let config = LintConfig {
            command: "sling-no-such-linter".to_string(),
            terminate: false,
        };
        let err = run(&config, dir.path()).await.unwrap_err();
        assert!(matches!(err, LintError::NotFound { .. }));
    }

    #[tokio::test]
    async fn test_empty_command() {
        let dir = tempdir().unwrap();
        let config = LintConfig {
            command: "  ".to_string(),
            terminate: false,
        };
        assert!(matches!(
            run(&config, dir.path()).await.unwrap_err(),
            LintError::EmptyCommand
        ));
    }

    #[cfg(unix)]
    fn fake_linter(dir: &Path, script: &str) {
        use std::os::unix::fs::PermissionsExt;
        let bin = dir.join("node_modules").join(".bin");
        std::fs::create_dir_all(&bin).unwrap();
        let path = bin.join("jshint");
        std::fs::write(&path, script).unwrap();
        std::fs::set_permissions(&path, std::fs::Permissions::from_mode(0o755)).unwrap();
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_local_linter_reports_diagnostics() {
        let dir = tempdir().unwrap();
        fake_linter(dir.path(), "#!/bin/sh\necho \"$1: line 1, Missing semicolon.\"\nexit 2\n");

        let report = run(&LintConfig::default(), dir.path()).await.unwrap();
        assert!(!report.is_clean());
        assert!(report.diagnostics.contains("Missing semicolon."));
        assert_eq!(report.exit_code, Some(2));
        assert!(report.program.ends_with("node_modules/.bin/jshint"));
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_clean_lint() {
        let dir = tempdir().unwrap();
        fake_linter(dir.path(), "#!/bin/sh\nexit 0\n");
        let report = run(&LintConfig::default(), dir.path()).await.unwrap();
        assert!(report.is_clean());
    }
}
