use crate::config::WatcherConfig;
use crate::debounce::Debouncer;
use crate::types::{Signal, SignalSource};
use crossbeam_channel::{Receiver, RecvTimeoutError, Sender};
use notify::{
    event::{CreateKind, ModifyKind},
    EventKind, RecommendedWatcher, RecursiveMode, Watcher,
};
use std::collections::HashSet;
use std::path::{Component, Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread::JoinHandle;
use std::time::{Duration, Instant};
use tracing::{debug, info, warn};

const POLL_INTERVAL: Duration = Duration::from_millis(50);

#[derive(Debug, thiserror::Error)]
pub enum WatcherError {
    #[error("file watcher is already running")]
    AlreadyRunning,
    #[error("no watchable directories under {0}")]
    NoWatchableDirectories(PathBuf),
    #[error("notify: {0}")]
    Notify(#[from] notify::Error),
    #[error("failed to spawn watcher thread: {0}")]
    Spawn(#[from] std::io::Error),
}

/// Configuration for the file watcher.
#[derive(Debug, Clone)]
pub struct FileWatcherConfig {
    pub root_path: PathBuf,
    pub directories: Vec<String>,
    pub extensions: HashSet<String>,
    pub ignored_dirs: HashSet<String>,
    pub debounce: Duration,
}

impl FileWatcherConfig {
    pub fn from_settings(root_path: impl Into<PathBuf>, settings: &WatcherConfig) -> Self {
        Self {
            root_path: root_path.into(),
            directories: settings.directories.clone(),
            extensions: settings
                .extensions
                .iter()
                .map(|e| e.trim_start_matches('.').to_ascii_lowercase())
                .collect(),
            ignored_dirs: settings.ignored_dirs.iter().cloned().collect(),
            debounce: Duration::from_millis(settings.debounce_ms),
        }
    }

    /// Whether `path` passes the extension filter and sits outside every
    /// denylisted directory.
    pub fn is_relevant(&self, path: &Path) -> bool {
        let ext_ok = path
            .extension()
            .and_then(|e| e.to_str())
            .map(|e| self.extensions.contains(&e.to_ascii_lowercase()))
            .unwrap_or(false);
        if !ext_ok {
            return false;
        }
        !path.components().any(|c| match c {
            Component::Normal(name) => name
                .to_str()
                .map(|n| self.ignored_dirs.contains(n))
                .unwrap_or(false),
            _ => false,
        })
    }

    /// Existing subdirectories of the root that should be watched.
    pub fn watch_targets(&self) -> Vec<PathBuf> {
        self.directories
            .iter()
            .map(|d| self.root_path.join(d))
            .filter(|p| p.is_dir())
            .collect()
    }

    fn relative(&self, path: &Path) -> String {
        path.strip_prefix(&self.root_path)
            .unwrap_or(path)
            .to_string_lossy()
            .replace('\\', "/")
    }
}

/// Whether an event may have left new content at its paths. Removals,
/// folder creation, metadata and access events never do; a rename does,
/// at its destination.
fn touches_content(kind: &EventKind) -> bool {
    match kind {
        EventKind::Create(CreateKind::Folder) => false,
        EventKind::Create(_) => true,
        EventKind::Modify(ModifyKind::Metadata(_)) => false,
        EventKind::Modify(_) => true,
        _ => false,
    }
}

struct Running {
    // Dropping the watcher releases every OS watch handle.
    watcher: RecommendedWatcher,
    stop: Arc<AtomicBool>,
    thread: Option<JoinHandle<()>>,
    watched: Vec<PathBuf>,
}

/// Recursive watcher over the project's source directories.
///
/// OS events arrive on a crossbeam channel and are debounced per path on a
/// dedicated thread. Once a path settles, its current content is read and
/// forwarded to the sink as a filesystem [`Signal`].
pub struct FileWatcher {
    config: FileWatcherConfig,
    running: Option<Running>,
}

impl FileWatcher {
    pub fn new(config: FileWatcherConfig) -> Self {
        Self {
            config,
            running: None,
        }
    }

    pub fn config(&self) -> &FileWatcherConfig {
        &self.config
    }

    pub fn is_running(&self) -> bool {
        self.running.is_some()
    }

    pub fn watched_paths(&self) -> Vec<PathBuf> {
        self.running
            .as_ref()
            .map(|r| r.watched.clone())
            .unwrap_or_default()
    }

    /// Start watching. Best-effort: directories that cannot be watched are
    /// skipped, and an error is returned only when nothing could be watched.
    pub fn start(&mut self, sink: flume::Sender<Signal>) -> Result<Vec<PathBuf>, WatcherError> {
        if self.running.is_some() {
            return Err(WatcherError::AlreadyRunning);
        }

        let targets = self.config.watch_targets();
        if targets.is_empty() {
            return Err(WatcherError::NoWatchableDirectories(self.config.root_path.clone()));
        }

        let (tx, rx): (
            Sender<notify::Result<notify::Event>>,
            Receiver<notify::Result<notify::Event>>,
        ) = crossbeam_channel::unbounded();

        let mut watcher = notify::recommended_watcher(move |res| {
            let _ = tx.send(res);
        })?;

        let mut watched = Vec::new();
        let mut last_err = None;
        for target in targets {
            match watcher.watch(&target, RecursiveMode::Recursive) {
                Ok(()) => watched.push(target),
                Err(e) => {
                    warn!(path = %target.display(), error = %e, "failed to watch directory");
                    last_err = Some(e);
                }
            }
        }
        if watched.is_empty() {
            return Err(match last_err {
                Some(e) => WatcherError::Notify(e),
                None => WatcherError::NoWatchableDirectories(self.config.root_path.clone()),
            });
        }

        let stop = Arc::new(AtomicBool::new(false));
        let thread = {
            let stop = Arc::clone(&stop);
            let config = self.config.clone();
            std::thread::Builder::new()
                .name("lw-file-watcher".into())
                .spawn(move || dispatch_loop(config, rx, sink, stop))?
        };

        info!(directories = watched.len(), "file watcher started");
        self.running = Some(Running {
            watcher,
            stop,
            thread: Some(thread),
            watched: watched.clone(),
        });
        Ok(watched)
    }

    /// Stop watching. Idempotent.
    pub fn stop(&mut self) {
        let Some(mut running) = self.running.take() else {
            return;
        };
        running.stop.store(true, Ordering::SeqCst);
        for path in &running.watched {
            let _ = running.watcher.unwatch(path);
        }
        drop(running.watcher);
        if let Some(handle) = running.thread.take() {
            let _ = handle.join();
        }
        info!("file watcher stopped");
    }
}

impl Drop for FileWatcher {
    fn drop(&mut self) {
        self.stop();
    }
}

fn dispatch_loop(
    config: FileWatcherConfig,
    rx: Receiver<notify::Result<notify::Event>>,
    sink: flume::Sender<Signal>,
    stop: Arc<AtomicBool>,
) {
    let mut debouncer: Debouncer<PathBuf> = Debouncer::new(config.debounce);

    while !stop.load(Ordering::SeqCst) {
        match rx.recv_timeout(POLL_INTERVAL) {
            Ok(Ok(event)) => {
                if !touches_content(&event.kind) {
                    continue;
                }
                let now = Instant::now();
                for path in event.paths {
                    if config.is_relevant(&path) {
                        debouncer.record(path, now);
                    }
                }
            }
            Ok(Err(e)) => warn!(error = %e, "file watch error"),
            Err(RecvTimeoutError::Timeout) => {}
            Err(RecvTimeoutError::Disconnected) => break,
        }

        for path in debouncer.drain_ready(Instant::now()) {
            let content = match std::fs::read_to_string(&path) {
                Ok(c) => c,
                Err(e) => {
                    debug!(path = %path.display(), error = %e, "skipping unreadable file");
                    continue;
                }
            };
            let signal = Signal::text(SignalSource::Filesystem, content)
                .with_file(config.relative(&path));
            if sink.send(signal).is_err() {
                return;
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;

    fn config_for(root: &Path) -> FileWatcherConfig {
        let mut settings = WatcherConfig::default();
        settings.debounce_ms = 100;
        FileWatcherConfig::from_settings(root, &settings)
    }

    #[test]
    fn test_relevance_filter() {
        let cfg = config_for(Path::new("/proj"));
        assert!(cfg.is_relevant(Path::new("/proj/frontend/src/App.jsx")));
        assert!(cfg.is_relevant(Path::new("/proj/backend/main.PY")));
        assert!(!cfg.is_relevant(Path::new("/proj/frontend/node_modules/x/index.js")));
        assert!(!cfg.is_relevant(Path::new("/proj/backend/__pycache__/a.py")));
        assert!(!cfg.is_relevant(Path::new("/proj/frontend/logo.png")));
        assert!(!cfg.is_relevant(Path::new("/proj/frontend/Makefile")));
    }

    #[test]
    fn test_start_without_directories_fails() {
        let dir = tempfile::tempdir().unwrap();
        let mut watcher = FileWatcher::new(config_for(dir.path()));
        let (tx, _rx) = flume::unbounded();
        let err = watcher.start(tx).unwrap_err();
        assert!(matches!(err, WatcherError::NoWatchableDirectories(_)));
        assert!(!watcher.is_running());
    }

    #[test]
    fn test_stop_is_idempotent() {
        let dir = tempfile::tempdir().unwrap();
        fs::create_dir_all(dir.path().join("src")).unwrap();
        let mut watcher = FileWatcher::new(config_for(dir.path()));
        let (tx, _rx) = flume::unbounded();
        watcher.start(tx).expect("start");
        assert!(watcher.is_running());
        assert_eq!(watcher.watched_paths().len(), 1);

        watcher.stop();
        watcher.stop();
        assert!(!watcher.is_running());
        assert!(watcher.watched_paths().is_empty());
    }

    #[test]
    fn test_second_start_is_rejected() {
        let dir = tempfile::tempdir().unwrap();
        fs::create_dir_all(dir.path().join("backend")).unwrap();
        let mut watcher = FileWatcher::new(config_for(dir.path()));
        let (tx, _rx) = flume::unbounded();
        watcher.start(tx.clone()).expect("start");
        assert!(matches!(watcher.start(tx), Err(WatcherError::AlreadyRunning)));
    }

    #[test]
    fn test_content_events() {
        use notify::event::{AccessKind, DataChange, MetadataKind, RemoveKind, RenameMode};
        assert!(touches_content(&EventKind::Create(CreateKind::File)));
        assert!(!touches_content(&EventKind::Create(CreateKind::Folder)));
        assert!(touches_content(&EventKind::Modify(ModifyKind::Data(DataChange::Any))));
        assert!(touches_content(&EventKind::Modify(ModifyKind::Name(RenameMode::To))));
        assert!(!touches_content(&EventKind::Modify(ModifyKind::Metadata(MetadataKind::Any))));
        assert!(!touches_content(&EventKind::Remove(RemoveKind::File)));
        assert!(!touches_content(&EventKind::Access(AccessKind::Any)));
    }
}
