#![deny(clippy::all)]
#![warn(clippy::pedantic)]
#![allow(clippy::module_name_repetitions)]
#![allow(clippy::missing_errors_doc)]
#![allow(clippy::too_many_lines)]
#![allow(clippy::cast_possible_truncation)]
#![allow(clippy::needless_pass_by_value)]
#![allow(clippy::return_self_not_must_use)]

//! Core of the sling bundler.
//!
//! ## Architecture
//!
//! 1. **Pipeline** - Ordered transform stages chosen from the [`BuildConfig`]
//! 2. **Bundler** - Resolve the `require` graph from the entry, transform and cache each module
//! 3. **Watch** - Invalidate cached modules on file changes and trigger rebuilds
//! 4. **Executor** - Stream a build into the destination file
//! 5. **Serve** - Static preview server for the output directory

pub mod bundler;
pub mod config;
pub mod error;
pub mod executor;
pub mod lint;
pub mod pipeline;
pub mod serve;
pub mod version;
pub mod watch;

pub use bundler::{BuildStats, BundleError, BundleStream, Builder};
pub use config::{BuildConfig, FileConfig, LintConfig, MinifyScope, ServeConfig};
pub use error::Error;
pub use executor::{BuildKind, BuildResult};
pub use pipeline::{build_pipeline, Pipeline, Transform, TransformError};
pub use serve::{PreviewServer, ServerHandle};
pub use version::VERSION;
pub use watch::{RebuildWatcher, Update};
