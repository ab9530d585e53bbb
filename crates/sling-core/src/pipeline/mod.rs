//! Transform pipeline.
//!
//! A [`Pipeline`] is an ordered list of [`Transform`] stages. Each stage
//! receives the previous stage's output. The order is fixed regardless of
//! which flags are set: downlevel, then inline-files, then minify.

mod downlevel;
mod inline;
pub mod lexer;
mod minify;

pub use downlevel::Downlevel;
pub use inline::InlineFiles;
pub use minify::Minify;

use crate::config::BuildConfig;
use std::fmt;
use std::path::{Path, PathBuf};

/// Per-module information available to a stage.
#[derive(Debug, Clone, Copy)]
pub struct TransformContext<'a> {
    /// Absolute path of the module being transformed.
    pub path: &'a Path,
    /// Whether the module lives under a `node_modules` directory.
    pub third_party: bool,
}

impl<'a> TransformContext<'a> {
    #[must_use]
    pub fn new(path: &'a Path) -> Self {
        Self {
            path,
            third_party: sling_util::fs::is_in_node_modules(path),
        }
    }
}

/// Output of a stage.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct TransformOutput {
    /// Rewritten source.
    pub code: String,
    /// Extra files read while producing `code`.
    pub dependencies: Vec<PathBuf>,
}

impl TransformOutput {
    /// Output with no extra inputs.
    pub fn code(code: impl Into<String>) -> Self {
        Self {
            code: code.into(),
            dependencies: Vec::new(),
        }
    }
}

/// A stage failed on a module.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("[{stage}] {path}: {message}")]
pub struct TransformError {
    /// Name of the failing stage.
    pub stage: &'static str,
    /// Module being transformed.
    pub path: String,
    pub message: String,
}

impl TransformError {
    pub fn new(stage: &'static str, path: &Path, message: impl Into<String>) -> Self {
        Self {
            stage,
            path: path.display().to_string(),
            message: message.into(),
        }
    }
}

/// A source rewrite applied to every module before concatenation.
pub trait Transform: Send + Sync {
    /// Stage name, used in logs and errors.
    fn name(&self) -> &'static str;

    /// Rewrite `source`.
    fn apply(
        &self,
        ctx: &TransformContext<'_>,
        source: &str,
    ) -> Result<TransformOutput, TransformError>;
}

/// Ordered list of stages.
#[derive(Default)]
pub struct Pipeline {
    stages: Vec<Box<dyn Transform>>,
}

impl fmt::Debug for Pipeline {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_list().entries(self.stage_names()).finish()
    }
}

impl Pipeline {
    /// An empty pipeline; modules pass through unchanged.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Append a stage.
    pub fn push(&mut self, stage: Box<dyn Transform>) {
        self.stages.push(stage);
    }

    #[must_use]
    pub fn stage_names(&self) -> Vec<&'static str> {
        self.stages.iter().map(|s| s.name()).collect()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.stages.is_empty()
    }

    /// Thread `source` through every stage in order.
    ///
    /// The returned dependencies are the union of every stage's extra inputs.
    pub fn run(
        &self,
        ctx: &TransformContext<'_>,
        source: &str,
    ) -> Result<TransformOutput, TransformError> {
        let mut current = TransformOutput::code(source);
        for stage in &self.stages {
            let out = stage.apply(ctx, &current.code)?;
            tracing::trace!(stage = stage.name(), path = %ctx.path.display(), "transformed");
            current.code = out.code;
            for dep in out.dependencies {
                if !current.dependencies.contains(&dep) {
                    current.dependencies.push(dep);
                }
            }
        }
        Ok(current)
    }
}

/// Build the stage list for `config`.
///
/// Disabled features contribute no stage at all.
#[must_use]
pub fn build_pipeline(config: &BuildConfig) -> Pipeline {
    let mut pipeline = Pipeline::new();

    if config.downlevel {
        pipeline.push(Box::new(Downlevel));
    }
    if config.inline_files {
        pipeline.push(Box::new(InlineFiles));
    }
    if let Some(scope) = config.minify {
        pipeline.push(Box::new(Minify::new(scope)));
    }

    tracing::debug!(stages = ?pipeline.stage_names(), "pipeline built");
    pipeline
}
