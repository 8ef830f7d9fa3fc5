//! Directory change notification.
//!
//! Produces a stream of changed-directory events on a channel, either from
//! the platform file watcher or from an mtime polling loop. Consumers treat
//! both the same way, so the polling fallback is functionally equivalent,
//! just slower to react.

use notify::{Event, EventKind, RecommendedWatcher, RecursiveMode, Watcher};
use std::collections::HashMap;
use std::path::PathBuf;
use std::time::{Duration, SystemTime};
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

/// Watches a set of directories for changes.
///
/// Keep the notifier alive for as long as events are wanted; dropping it
/// stops the underlying watcher.
pub struct ChangeNotifier {
    _watcher: Option<RecommendedWatcher>,
}

impl ChangeNotifier {
    /// Start watching `dirs`, delivering the affected directory on the
    /// returned channel.
    ///
    /// With `use_inotify` the platform watcher is tried first and polling
    /// every `poll_time` is the fallback; without it polling is used
    /// directly.
    pub fn spawn(
        dirs: Vec<PathBuf>,
        use_inotify: bool,
        poll_time: Duration,
        cancel: CancellationToken,
    ) -> (Self, mpsc::Receiver<PathBuf>) {
        let (tx, rx) = mpsc::channel(64);

        if use_inotify {
            match Self::spawn_watcher(&dirs, tx.clone()) {
                Ok(watcher) => {
                    return (
                        Self {
                            _watcher: Some(watcher),
                        },
                        rx,
                    )
                }
                Err(e) => {
                    warn!("file watcher unavailable ({}); falling back to polling", e);
                }
            }
        }

        tokio::spawn(poll_loop(dirs, poll_time, tx, cancel));
        (Self { _watcher: None }, rx)
    }

    fn spawn_watcher(
        dirs: &[PathBuf],
        tx: mpsc::Sender<PathBuf>,
    ) -> notify::Result<RecommendedWatcher> {
        let mut watcher = RecommendedWatcher::new(
            move |result: notify::Result<Event>| {
                let Ok(event) = result else { return };
                if !matches!(
                    event.kind,
                    EventKind::Create(_) | EventKind::Modify(_) | EventKind::Remove(_)
                ) {
                    return;
                }
                for path in &event.paths {
                    if let Some(dir) = path.parent() {
                        // a full channel drops the event; any later change
                        // re-triggers the scan
                        let _ = tx.try_send(dir.to_path_buf());
                    }
                }
            },
            notify::Config::default(),
        )?;
        for dir in dirs {
            watcher.watch(dir, RecursiveMode::NonRecursive)?;
        }
        Ok(watcher)
    }
}

/// mtime polling fallback.
async fn poll_loop(
    dirs: Vec<PathBuf>,
    poll_time: Duration,
    tx: mpsc::Sender<PathBuf>,
    cancel: CancellationToken,
) {
    let mut last_seen: HashMap<PathBuf, SystemTime> = HashMap::new();
    loop {
        tokio::select! {
            _ = cancel.cancelled() => break,
            _ = tokio::time::sleep(poll_time) => {}
        }
        for dir in &dirs {
            let Ok(mtime) = std::fs::metadata(dir).and_then(|m| m.modified()) else {
                continue;
            };
            match last_seen.insert(dir.clone(), mtime) {
                Some(previous) if previous >= mtime => {}
                Some(_) => {
                    debug!("poll: {} changed", dir.display());
                    let _ = tx.send(dir.clone()).await;
                }
                None => {
                    // first observation establishes the baseline
                }
            }
        }
    }
}
