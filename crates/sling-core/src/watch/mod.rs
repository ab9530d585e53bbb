//! Incremental rebuild watcher.
//!
//! Watches the files of the last build, coalesces change events, invalidates
//! the affected cache entries and lets the caller rebuild.

use crate::bundler::{Builder, BundleStream};
use notify::{
    event::{CreateKind, ModifyKind, RemoveKind},
    Config, Event, EventKind, RecommendedWatcher, RecursiveMode, Watcher as NotifyWatcher,
};
use std::collections::BTreeSet;
use std::path::{Path, PathBuf};
use std::time::Duration;
use tokio::sync::mpsc;
use tracing::{debug, error, info, trace, warn};

/// One coalesced batch of relevant changes.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Update {
    /// Changed paths, sorted.
    pub changed: Vec<PathBuf>,
    /// Cache entries dropped because of the change.
    pub invalidated: usize,
}

/// Watcher error.
#[derive(Debug, thiserror::Error)]
pub enum WatchError {
    #[error("failed to start file watcher: {0}")]
    Init(#[source] notify::Error),

    #[error("failed to watch {}: {source}", path.display())]
    Watch {
        path: PathBuf,
        #[source]
        source: notify::Error,
    },
}

/// Groups raw change events that arrive within a quiet window.
#[derive(Debug, Clone, Copy)]
pub struct Debouncer {
    window: Duration,
}

impl Debouncer {
    #[must_use]
    pub fn new(window: Duration) -> Self {
        Self { window }
    }

    /// Wait for the next event, then collect until `window` passes without one.
    ///
    /// Returns `None` once the channel is closed and drained.
    pub async fn next_batch(
        &self,
        rx: &mut mpsc::UnboundedReceiver<PathBuf>,
    ) -> Option<BTreeSet<PathBuf>> {
        let first = rx.recv().await?;
        let mut batch = BTreeSet::from([first]);

        loop {
            match tokio::time::timeout(self.window, rx.recv()).await {
                Ok(Some(path)) => {
                    batch.insert(path);
                }
                Ok(None) | Err(_) => break,
            }
        }

        debug!(count = batch.len(), "coalesced file events");
        Some(batch)
    }
}

/// Wraps a [`Builder`] and rebuilds it when its inputs change.
pub struct RebuildWatcher {
    builder: Builder,
    debouncer: Debouncer,
    watcher: RecommendedWatcher,
    rx: mpsc::UnboundedReceiver<PathBuf>,
    watched_dirs: BTreeSet<PathBuf>,
    watched_files: BTreeSet<PathBuf>,
}

impl RebuildWatcher {
    /// Create a watcher. Nothing is watched until the first [`build`](Self::build).
    pub fn new(builder: Builder, debounce: Duration) -> Result<Self, WatchError> {
        let (tx, rx) = mpsc::unbounded_channel::<PathBuf>();

        let watcher = RecommendedWatcher::new(
            move |res: Result<Event, notify::Error>| match res {
                Ok(event) => {
                    if should_process_event(&event) {
                        for path in event.paths {
                            if let Err(e) = tx.send(path) {
                                warn!(error = %e, "Failed to send watch event");
                            }
                        }
                    }
                }
                Err(e) => {
                    error!(error = %e, "Watch error");
                }
            },
            Config::default(),
        )
        .map_err(WatchError::Init)?;

        Ok(Self {
            builder,
            debouncer: Debouncer::new(debounce),
            watcher,
            rx,
            watched_dirs: BTreeSet::new(),
            watched_files: BTreeSet::new(),
        })
    }

    /// Build through the wrapped builder, then re-sync watches with its watch set.
    pub fn build(&mut self) -> BundleStream {
        let stream = self.builder.build();
        self.sync_watches();
        stream
    }

    /// Wait for the next batch of relevant changes and invalidate them.
    ///
    /// Batches that touch no watched file are discarded. After a failed build
    /// every event in a watched directory counts, so creating a missing file
    /// triggers a rebuild. Returns `None` if the event source is gone.
    pub async fn next_update(&mut self) -> Option<Update> {
        loop {
            let batch = self.debouncer.next_batch(&mut self.rx).await?;
            let accept_all = !self.builder.last_build_ok();
            let changed: Vec<PathBuf> = batch
                .into_iter()
                .filter(|path| accept_all || self.watched_files.contains(path))
                .collect();

            if changed.is_empty() {
                trace!("ignoring batch with no watched files");
                continue;
            }

            let invalidated: usize = changed
                .iter()
                .map(|path| self.builder.invalidate(path))
                .sum();
            for path in &changed {
                debug!(path = %path.display(), "file changed");
            }
            return Some(Update {
                changed,
                invalidated,
            });
        }
    }

    /// Watch the parent directory of every file in the builder's watch set.
    fn sync_watches(&mut self) {
        let files = self.builder.watch_set().clone();
        let dirs: BTreeSet<PathBuf> = files
            .iter()
            .filter_map(|file| file.parent().map(Path::to_path_buf))
            .collect();

        let mut watched = BTreeSet::new();
        for dir in &dirs {
            if self.watched_dirs.contains(dir) {
                watched.insert(dir.clone());
                continue;
            }
            match self.watcher.watch(dir, RecursiveMode::NonRecursive) {
                Ok(()) => {
                    trace!(dir = %dir.display(), "watching directory");
                    watched.insert(dir.clone());
                }
                Err(source) => {
                    let err = WatchError::Watch {
                        path: dir.clone(),
                        source,
                    };
                    warn!(error = %err, "watch failed");
                }
            }
        }
        for dir in self.watched_dirs.difference(&dirs) {
            if let Err(e) = self.watcher.unwatch(dir) {
                trace!(dir = %dir.display(), error = %e, "unwatch failed");
            }
        }

        debug!(
            files = files.len(),
            dirs = watched.len(),
            "watch set synchronized"
        );
        self.watched_dirs = watched;
        self.watched_files = files;
    }

    /// Release every filesystem watch.
    pub fn stop(mut self) {
        for dir in std::mem::take(&mut self.watched_dirs) {
            let _ = self.watcher.unwatch(&dir);
        }
        info!("File watcher stopped");
    }

    #[must_use]
    pub fn builder(&self) -> &Builder {
        &self.builder
    }

    /// Files whose changes are considered relevant.
    #[must_use]
    pub fn watched_files(&self) -> &BTreeSet<PathBuf> {
        &self.watched_files
    }
}

/// Check if we should process this event.
fn should_process_event(event: &Event) -> bool {
    // Ignore directories, metadata changes, and access events
    matches!(
        &event.kind,
        EventKind::Create(CreateKind::File | CreateKind::Any)
            | EventKind::Modify(ModifyKind::Data(_) | ModifyKind::Any | ModifyKind::Name(_))
            | EventKind::Remove(RemoveKind::File | RemoveKind::Any)
    )
}
