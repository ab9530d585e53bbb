//! `sling <SOURCE> <DESTINATION>` implementation.
//!
//! One-shot builds exit with the build's status. Watch mode keeps rebuilding
//! until Ctrl+C. A panic inside a build cycle is logged and the process keeps
//! going.

use crate::ui;
use futures::FutureExt;
use miette::{IntoDiagnostic, Result};
use sling_core::executor::{self, BuildKind, BuildResult};
use sling_core::{
    build_pipeline, lint, BuildConfig, BundleStream, Builder, LintConfig, PreviewServer,
    RebuildWatcher, ServerHandle,
};
use std::panic::AssertUnwindSafe;
use std::path::{Path, PathBuf};

/// Bundle command action.
#[derive(Debug, Clone)]
pub struct BundleAction {
    /// Entry module, relative to the working directory.
    pub entry: PathBuf,
    /// Bundle file, relative to the working directory.
    pub destination: PathBuf,
    pub config: BuildConfig,
}

/// Run the bundle command on a single-threaded runtime. Returns the exit code.
pub fn run(action: BundleAction) -> Result<i32> {
    let runtime = tokio::runtime::Builder::new_current_thread()
        .enable_all()
        .build()
        .into_diagnostic()?;
    Ok(runtime.block_on(execute(action)))
}

async fn execute(action: BundleAction) -> i32 {
    let config = action.config;
    let destination = config.absolute(&action.destination);
    let server = start_server(&config).await;

    if let Some(lint) = &config.lint {
        if !run_lint(lint, &config.cwd).await && lint.terminate {
            ui::failure("lint reported errors, bundle not built");
            stop_server(server).await;
            return 1;
        }
    }

    let builder = Builder::new(&action.entry, &config, build_pipeline(&config));
    let code = if config.watch {
        watch(builder, &destination, &config).await
    } else {
        one_shot(builder, &destination, server.is_some()).await
    };

    stop_server(server).await;
    code
}

async fn one_shot(mut builder: Builder, destination: &Path, serving: bool) -> i32 {
    let ok = cycle(|| builder.build(), destination, BuildKind::Initial).await;
    if serving {
        ui::notice("press Ctrl+C to stop the preview server");
        wait_for_ctrl_c().await;
    }
    i32::from(!ok)
}

async fn watch(builder: Builder, destination: &Path, config: &BuildConfig) -> i32 {
    let mut watcher = match RebuildWatcher::new(builder, config.debounce) {
        Ok(watcher) => watcher,
        Err(e) => {
            ui::failure(&format!("failed to start watcher: {e}"));
            return 1;
        }
    };

    cycle(|| watcher.build(), destination, BuildKind::Initial).await;
    ui::notice("watching for changes, press Ctrl+C to stop");

    let ctrl_c = tokio::signal::ctrl_c();
    tokio::pin!(ctrl_c);

    loop {
        tokio::select! {
            _ = &mut ctrl_c => {
                ui::notice("shutting down");
                break;
            }
            update = watcher.next_update() => {
                let Some(update) = update else {
                    tracing::warn!("file event source closed");
                    break;
                };
                tracing::debug!(
                    changed = update.changed.len(),
                    invalidated = update.invalidated,
                    "rebuilding"
                );
                if let Some(lint) = &config.lint {
                    run_lint(lint, &config.cwd).await;
                }
                cycle(|| watcher.build(), destination, BuildKind::Rebuild).await;
            }
        }
    }

    watcher.stop();
    0
}

/// One build cycle: build, write, report. Returns whether a bundle was written.
async fn cycle(
    build: impl FnOnce() -> BundleStream,
    destination: &Path,
    kind: BuildKind,
) -> bool {
    let attempt = async move {
        let stream = build();
        executor::run(stream, destination, kind).await
    };

    match AssertUnwindSafe(attempt).catch_unwind().await {
        Ok(result) => report(&result),
        Err(payload) => {
            let message = panic_message(payload.as_ref());
            tracing::error!(panic = %message, "build cycle panicked");
            ui::failure(&format!("internal error during build: {message}"));
            false
        }
    }
}

fn report(result: &BuildResult) -> bool {
    match result {
        BuildResult::Built { kind, .. } => {
            ui::success(kind.success_message());
            true
        }
        BuildResult::Failed { error, .. } => {
            ui::failure(&format!("bundle build failed: {error}"));
            false
        }
    }
}

fn panic_message(payload: &(dyn std::any::Any + Send)) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        (*s).to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "unknown panic".to_string()
    }
}

/// Returns `false` when the linter reported diagnostics. A linter that cannot
/// run is reported and treated as clean.
async fn run_lint(config: &LintConfig, cwd: &Path) -> bool {
    match lint::run(config, cwd).await {
        Ok(report) if report.is_clean() => true,
        Ok(report) => {
            ui::lint_errors(&report.diagnostics);
            false
        }
        Err(e) => {
            tracing::warn!(error = %e, "lint skipped");
            ui::failure(&format!("lint skipped: {e}"));
            true
        }
    }
}

async fn start_server(config: &BuildConfig) -> Option<ServerHandle> {
    let serve = config.serve.as_ref()?;
    match PreviewServer::new(serve.webroot.clone(), serve.port).start().await {
        Ok(handle) => {
            ui::notice(&format!(
                "server listening on port {}",
                handle.local_addr().port()
            ));
            Some(handle)
        }
        Err(e) => {
            tracing::error!(error = %e, "preview server failed to start");
            ui::failure(&format!("preview server failed to start: {e}"));
            None
        }
    }
}

async fn stop_server(server: Option<ServerHandle>) {
    if let Some(server) = server {
        server.stop().await;
    }
}

async fn wait_for_ctrl_c() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        tracing::warn!(error = %e, "failed to listen for Ctrl+C");
    }
}
