//! Watch mode: rebuild when the source tree changes.
//!
//! ```text
//! ┌──────────┐    ┌───────────┐    ┌──────────────┐    ┌─────────────┐
//! │ notify   │───▶│ filter    │───▶│ debouncer    │───▶│ rebuild on  │
//! │ events   │    │ (ignores) │    │ (300ms)      │    │ own thread  │
//! └──────────┘    └───────────┘    └──────────────┘    └─────────────┘
//! ```
//!
//! Changes under the destination, ignored paths and editor temp files are
//! dropped. A burst of changes becomes one rebuild. Rebuilds are not
//! serialized: a change during a rebuild starts another one alongside it.
//! Stopping the watcher stops new rebuilds but lets running ones finish.

use crate::build::{BuildError, BuildReport, Pipeline};
use crate::walk::{IgnoreSet, WalkError, relative_path};
use notify::{Event, EventKind, RecommendedWatcher, RecursiveMode, Watcher};
use std::collections::BTreeSet;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::mpsc::{self, RecvTimeoutError};
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};
use thiserror::Error;

const DEBOUNCE_MS: u64 = 300;
const IDLE_POLL_MS: u64 = 250;

#[derive(Error, Debug)]
pub enum WatchError {
    #[error("Failed to create file watcher")]
    Watcher(#[source] notify::Error),
    #[error("Failed to watch {}", .path.display())]
    Watch {
        path: PathBuf,
        #[source]
        source: notify::Error,
    },
    #[error(transparent)]
    Ignore(#[from] WalkError),
}

/// Called with the result of every rebuild.
pub type BuildCallback = Arc<dyn Fn(Result<BuildReport, BuildError>) + Send + Sync>;

/// Check if path is a temp/backup file (editor artifacts).
fn is_temp_file(path: &Path) -> bool {
    let name = path.file_name().and_then(|n| n.to_str()).unwrap_or("");
    let ext = path.extension().and_then(|e| e.to_str()).unwrap_or("");

    matches!(ext, "bck" | "bak" | "backup" | "swp" | "swo" | "tmp")
        || name.ends_with('~')
        || name.starts_with(".#")
}

/// Decides which changed paths matter to a build.
pub struct ChangeFilter {
    src: PathBuf,
    dest: PathBuf,
    copy_dirs: Vec<PathBuf>,
    ignore: IgnoreSet,
}

impl ChangeFilter {
    pub fn new(pipeline: &Pipeline) -> Result<Self, WalkError> {
        Ok(Self {
            src: pipeline.src().to_path_buf(),
            dest: pipeline.dest().to_path_buf(),
            copy_dirs: pipeline.config().copy_paths(pipeline.src()),
            ignore: pipeline.ignore_set()?,
        })
    }

    /// Directories to watch recursively.
    pub fn roots(&self) -> Vec<PathBuf> {
        let mut roots = vec![self.src.clone()];
        roots.extend(
            self.copy_dirs
                .iter()
                .filter(|dir| !dir.starts_with(&self.src))
                .cloned(),
        );
        roots
    }

    pub fn is_relevant(&self, path: &Path) -> bool {
        if path.starts_with(&self.dest) || is_temp_file(path) {
            return false;
        }
        if self.copy_dirs.iter().any(|dir| path.starts_with(dir)) {
            return true;
        }
        if !path.starts_with(&self.src) {
            return false;
        }
        let relative = relative_path(&self.src, path);
        let parts: Vec<&str> = relative.split('/').collect();
        for depth in 1..parts.len() {
            if self.ignore.is_ignored(&parts[..depth].join("/"), true) {
                return false;
            }
        }
        !self.ignore.is_ignored(&relative, false)
    }
}

/// Batches rapid file events.
#[derive(Default)]
struct Debouncer {
    pending: BTreeSet<PathBuf>,
    last_event: Option<Instant>,
}

impl Debouncer {
    fn add(&mut self, paths: impl IntoIterator<Item = PathBuf>) {
        let before = self.pending.len();
        self.pending.extend(paths);
        if self.pending.len() > before {
            self.last_event = Some(Instant::now());
        }
    }

    fn ready(&self) -> bool {
        !self.pending.is_empty()
            && self
                .last_event
                .is_some_and(|t| t.elapsed() >= Duration::from_millis(DEBOUNCE_MS))
    }

    fn take(&mut self) -> Vec<PathBuf> {
        self.last_event = None;
        std::mem::take(&mut self.pending).into_iter().collect()
    }

    fn timeout(&self) -> Duration {
        if self.pending.is_empty() {
            Duration::from_millis(IDLE_POLL_MS)
        } else {
            Duration::from_millis(DEBOUNCE_MS)
        }
    }
}

fn is_change(event: &Event) -> bool {
    matches!(
        event.kind,
        EventKind::Create(_) | EventKind::Modify(_) | EventKind::Remove(_)
    )
}

/// A running watcher. Dropping it without [`WatchHandle::stop`] leaves the
/// event loop running until the process exits.
pub struct WatchHandle {
    stop: Arc<AtomicBool>,
    watcher: RecommendedWatcher,
    thread: JoinHandle<()>,
}

impl WatchHandle {
    /// Stop watching. Rebuilds already running are not interrupted.
    pub fn stop(self) {
        self.stop.store(true, Ordering::SeqCst);
        drop(self.watcher);
        if self.thread.join().is_err() {
            tracing::warn!("watch loop panicked");
        }
    }
}

/// Watch the pipeline's source tree and copy directories, rebuilding on
/// change.
pub fn watch(pipeline: Arc<Pipeline>, on_build: BuildCallback) -> Result<WatchHandle, WatchError> {
    let filter = ChangeFilter::new(&pipeline)?;
    let (tx, rx) = mpsc::channel();
    let mut watcher = notify::recommended_watcher(tx).map_err(WatchError::Watcher)?;
    for root in filter.roots() {
        watcher
            .watch(&root, RecursiveMode::Recursive)
            .map_err(|source| WatchError::Watch {
                path: root.clone(),
                source,
            })?;
        tracing::info!("watching {}", root.display());
    }

    let stop = Arc::new(AtomicBool::new(false));
    let stopped = stop.clone();
    let thread = thread::spawn(move || {
        let mut debouncer = Debouncer::default();
        while !stopped.load(Ordering::SeqCst) {
            match rx.recv_timeout(debouncer.timeout()) {
                Ok(Ok(event)) if is_change(&event) => {
                    debouncer.add(
                        event
                            .paths
                            .into_iter()
                            .filter(|path| filter.is_relevant(path)),
                    );
                }
                Ok(Err(err)) => tracing::warn!("watch error: {err}"),
                Err(RecvTimeoutError::Disconnected) => break,
                _ => {}
            }
            if debouncer.ready() && !stopped.load(Ordering::SeqCst) {
                let changed = debouncer.take();
                tracing::info!(
                    changed = changed.len(),
                    "rebuilding after change to {}",
                    changed[0].display()
                );
                let pipeline = pipeline.clone();
                let on_build = on_build.clone();
                thread::spawn(move || on_build(pipeline.build()));
            }
        }
    });

    Ok(WatchHandle {
        stop,
        watcher,
        thread,
    })
}
