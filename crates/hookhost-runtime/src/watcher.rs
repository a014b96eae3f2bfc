//! Change processor: watches the unit directory, debounces bursts of
//! file events and hands load/unload work to the tick thread.

use std::collections::{HashMap, HashSet};
use std::path::{Path, PathBuf};
use std::sync::Arc;

use notify::{Config, Event, EventKind, PollWatcher, RecommendedWatcher, RecursiveMode, Watcher};
use parking_lot::{Mutex, RwLock};
use serde::{Deserialize, Serialize};
use tokio::runtime::Handle;
use tracing::{debug, error, info, warn};

use hookhost_core::config::WatcherConfig;
use hookhost_core::error::AppError;
use hookhost_core::result::AppResult;

use crate::manager::HookRuntime;
use crate::tick::TickQueue;

/// Sources whose file events must not trigger a load.
#[derive(Debug, Default)]
pub struct IgnoreList {
    paths: RwLock<HashSet<PathBuf>>,
}

impl IgnoreList {
    /// Creates an empty list.
    pub fn new() -> Self {
        Self::default()
    }

    /// Ignores `path`.
    pub fn add(&self, path: &Path) {
        self.paths.write().insert(path.to_path_buf());
    }

    /// Stops ignoring `path`.
    pub fn clear(&self, path: &Path) {
        self.paths.write().remove(path);
    }

    /// Returns whether `path` is ignored.
    pub fn contains(&self, path: &Path) -> bool {
        self.paths.read().contains(path)
    }

    /// Ignored paths, sorted.
    pub fn paths(&self) -> Vec<PathBuf> {
        let mut paths: Vec<PathBuf> = self.paths.read().iter().cloned().collect();
        paths.sort();
        paths
    }
}

/// Where a watched source is in its change cycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum WatchState {
    /// Nothing pending.
    Idle,
    /// An event arrived.
    ChangeDetected,
    /// Waiting for the burst to settle.
    Debouncing,
    /// A load/unload callback sits in the tick queue.
    Queued,
    /// The tick thread is loading the source.
    Loading,
    /// The tick thread is unloading the source.
    Unloading,
}

#[derive(Debug)]
struct Entry {
    state: WatchState,
    generation: u64,
    rerun: bool,
}

impl Default for Entry {
    fn default() -> Self {
        Self {
            state: WatchState::Idle,
            generation: 0,
            rerun: false,
        }
    }
}

struct Inner {
    config: WatcherConfig,
    queue: Arc<TickQueue<HookRuntime>>,
    ignore: Arc<IgnoreList>,
    entries: Mutex<HashMap<PathBuf, Entry>>,
    handle: Handle,
}

/// Debouncing bridge between file events and the tick queue.
#[derive(Clone)]
pub struct ChangeProcessor {
    inner: Arc<Inner>,
}

impl std::fmt::Debug for ChangeProcessor {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ChangeProcessor")
            .field("directory", &self.inner.config.directory)
            .field("tracked", &self.inner.entries.lock().len())
            .finish()
    }
}

/// Keeps the file watcher alive; dropping it stops watching.
pub struct WatchGuard {
    _watcher: Box<dyn Watcher + Send>,
}

impl std::fmt::Debug for WatchGuard {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("WatchGuard").finish()
    }
}

impl ChangeProcessor {
    /// Creates a processor for the runtime's queue and ignore set.
    ///
    /// Must be called inside a tokio runtime; debounce timers run on it.
    pub fn new(config: WatcherConfig, runtime: &HookRuntime) -> Self {
        Self::with_parts(config, runtime.queue(), runtime.ignore_list(), Handle::current())
    }

    /// Creates a processor from its parts.
    pub fn with_parts(
        config: WatcherConfig,
        queue: Arc<TickQueue<HookRuntime>>,
        ignore: Arc<IgnoreList>,
        handle: Handle,
    ) -> Self {
        Self {
            inner: Arc::new(Inner {
                config,
                queue,
                ignore,
                entries: Mutex::new(HashMap::new()),
                handle,
            }),
        }
    }

    /// Number of paths with live watch state.
    pub fn tracked(&self) -> usize {
        self.inner.entries.lock().len()
    }

    /// Current state of `path`.
    pub fn state(&self, path: &Path) -> WatchState {
        self.inner
            .entries
            .lock()
            .get(path)
            .map(|e| e.state)
            .unwrap_or(WatchState::Idle)
    }

    /// Whether `path` has a watched extension.
    pub fn matches(&self, path: &Path) -> bool {
        path.extension()
            .and_then(|ext| ext.to_str())
            .is_some_and(|ext| self.inner.config.extensions.iter().any(|e| e == ext))
    }

    /// Handles one file event for `path`.
    ///
    /// Events for ignored sources are observed and dropped. Events while a
    /// callback is queued coalesce into it; events during a load schedule
    /// one more pass after it.
    pub fn notify_change(&self, path: &Path) {
        if !self.matches(path) {
            return;
        }
        if self.inner.ignore.contains(path) {
            debug!(path = %path.display(), "Change to ignored source");
            return;
        }

        let mut entries = self.inner.entries.lock();
        let entry = entries.entry(path.to_path_buf()).or_default();
        match entry.state {
            WatchState::Queued => {}
            WatchState::Loading | WatchState::Unloading => entry.rerun = true,
            WatchState::Idle | WatchState::ChangeDetected | WatchState::Debouncing => {
                entry.state = WatchState::ChangeDetected;
                self.debounce(path, entry);
            }
        }
    }

    /// Queues every matching file under the watched directory.
    pub fn scan(&self) -> usize {
        let mut files = Vec::new();
        collect(&self.inner.config.directory, self.inner.config.recursive, &mut files);
        files.sort();

        let mut queued = 0;
        for path in files.iter().filter(|p| self.matches(p) && !self.inner.ignore.contains(p)) {
            let mut entries = self.inner.entries.lock();
            let entry = entries.entry(path.clone()).or_default();
            if entry.state == WatchState::Idle {
                self.queue(path, entry);
                queued += 1;
            }
        }

        info!(directory = %self.inner.config.directory.display(), queued, "Initial scan complete");
        queued
    }

    /// Starts the OS (or polling) watcher on the configured directory.
    pub fn watch(&self) -> AppResult<WatchGuard> {
        let processor = self.clone();
        let handler = move |result: Result<Event, notify::Error>| match result {
            Ok(event) => {
                if matches!(event.kind, EventKind::Access(_)) {
                    return;
                }
                for path in &event.paths {
                    processor.notify_change(path);
                }
            }
            Err(e) => error!(error = %e, "Watch error"),
        };

        let config = &self.inner.config;
        let mut watcher: Box<dyn Watcher + Send> = if config.poll {
            let notify_config = Config::default().with_poll_interval(config.scan_rate());
            Box::new(PollWatcher::new(handler, notify_config).map_err(watch_error)?)
        } else {
            Box::new(RecommendedWatcher::new(handler, Config::default()).map_err(watch_error)?)
        };

        let mode = if config.recursive {
            RecursiveMode::Recursive
        } else {
            RecursiveMode::NonRecursive
        };
        watcher.watch(&config.directory, mode).map_err(watch_error)?;

        info!(
            directory = %config.directory.display(),
            recursive = config.recursive,
            poll = config.poll,
            "Watching unit directory"
        );
        Ok(WatchGuard { _watcher: watcher })
    }

    fn debounce(&self, path: &Path, entry: &mut Entry) {
        entry.generation += 1;
        entry.state = WatchState::Debouncing;

        let generation = entry.generation;
        let processor = self.clone();
        let path = path.to_path_buf();
        let delay = self.inner.config.debounce();
        self.inner.handle.spawn(async move {
            tokio::time::sleep(delay).await;
            processor.expire(&path, generation);
        });
    }

    fn expire(&self, path: &Path, generation: u64) {
        let mut entries = self.inner.entries.lock();
        let Some(entry) = entries.get_mut(path) else {
            return;
        };
        if entry.generation != generation || entry.state != WatchState::Debouncing {
            return;
        }
        self.queue(path, entry);
    }

    fn queue(&self, path: &Path, entry: &mut Entry) {
        entry.state = WatchState::Queued;
        let processor = self.clone();
        let path = path.to_path_buf();
        debug!(path = %path.display(), "Change queued");
        self.inner
            .queue
            .enqueue(move |runtime: &mut HookRuntime| processor.run(runtime, &path));
    }

    /// Runs on the tick thread.
    fn run(&self, runtime: &mut HookRuntime, path: &Path) {
        if self.inner.ignore.contains(path) {
            self.finish(path, false);
            return;
        }

        let exists = path.exists();
        self.set_state(
            path,
            if exists {
                WatchState::Loading
            } else {
                WatchState::Unloading
            },
        );

        if exists {
            let results = runtime.load_source(path);
            let ready = results.iter().filter(|r| r.is_ready()).count();
            info!(path = %path.display(), ready, total = results.len(), "Source loaded");
        } else {
            let unloaded = runtime.unload_source(path);
            info!(path = %path.display(), unloaded = unloaded.len(), "Source removed");
        }

        self.finish(path, !exists);
    }

    fn set_state(&self, path: &Path, state: WatchState) {
        if let Some(entry) = self.inner.entries.lock().get_mut(path) {
            entry.state = state;
        }
    }

    /// Settles the entry after a run. Entries for removed sources are dropped
    /// unless another change arrived meanwhile.
    fn finish(&self, path: &Path, removed: bool) {
        let mut entries = self.inner.entries.lock();
        let Some(entry) = entries.get_mut(path) else {
            return;
        };
        if std::mem::take(&mut entry.rerun) {
            self.debounce(path, entry);
        } else if removed {
            entries.remove(path);
        } else {
            entry.state = WatchState::Idle;
        }
    }
}

fn watch_error(e: notify::Error) -> AppError {
    AppError::io(format!("File watcher failed: {e}"))
}

fn collect(dir: &Path, recursive: bool, out: &mut Vec<PathBuf>) {
    let entries = match std::fs::read_dir(dir) {
        Ok(entries) => entries,
        Err(e) => {
            warn!(directory = %dir.display(), error = %e, "Cannot scan directory");
            return;
        }
    };
    for entry in entries.flatten() {
        let path = entry.path();
        if path.is_dir() {
            if recursive {
                collect(&path, recursive, out);
            }
        } else {
            out.push(path);
        }
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use super::*;

    fn config(dir: &Path) -> WatcherConfig {
        WatcherConfig {
            directory: dir.to_path_buf(),
            debounce_ms: 100,
            ..WatcherConfig::default()
        }
    }

    fn processor(dir: &Path) -> (ChangeProcessor, Arc<TickQueue<HookRuntime>>, Arc<IgnoreList>) {
        let queue = Arc::new(TickQueue::new());
        let ignore = Arc::new(IgnoreList::new());
        let p = ChangeProcessor::with_parts(config(dir), queue.clone(), ignore.clone(), Handle::current());
        (p, queue, ignore)
    }

    #[tokio::test(start_paused = true)]
    async fn test_burst_coalesces_into_one_queued_load() {
        let dir = tempfile::tempdir().expect("tempdir");
        let (p, queue, _) = processor(dir.path());
        let path = dir.path().join("a.toml");

        for _ in 0..5 {
            p.notify_change(&path);
            tokio::time::sleep(Duration::from_millis(30)).await;
        }
        assert_eq!(p.state(&path), WatchState::Debouncing);
        assert!(queue.is_empty());

        tokio::time::sleep(Duration::from_millis(150)).await;
        assert_eq!(queue.len(), 1);
        assert_eq!(p.state(&path), WatchState::Queued);

        p.notify_change(&path);
        assert_eq!(queue.len(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_ignored_and_foreign_files_are_dropped() {
        let dir = tempfile::tempdir().expect("tempdir");
        let (p, queue, ignore) = processor(dir.path());
        let ignored = dir.path().join("a.toml");
        ignore.add(&ignored);

        p.notify_change(&ignored);
        p.notify_change(&dir.path().join("notes.txt"));
        tokio::time::sleep(Duration::from_millis(200)).await;
        assert!(queue.is_empty());

        ignore.clear(&ignored);
        p.notify_change(&ignored);
        tokio::time::sleep(Duration::from_millis(200)).await;
        assert_eq!(queue.len(), 1);
    }

    #[tokio::test]
    async fn test_scan_respects_recursion() {
        let dir = tempfile::tempdir().expect("tempdir");
        std::fs::create_dir(dir.path().join("nested")).expect("mkdir");
        std::fs::write(dir.path().join("a.toml"), "").expect("write");
        std::fs::write(dir.path().join("nested/b.toml"), "").expect("write");
        std::fs::write(dir.path().join("readme.md"), "").expect("write");

        let (p, queue, _) = processor(dir.path());
        assert_eq!(p.scan(), 2);
        assert_eq!(queue.len(), 2);

        let queue = Arc::new(TickQueue::new());
        let flat = ChangeProcessor::with_parts(
            WatcherConfig {
                recursive: false,
                ..config(dir.path())
            },
            queue.clone(),
            Arc::new(IgnoreList::new()),
            Handle::current(),
        );
        assert_eq!(flat.scan(), 1);
    }
}
