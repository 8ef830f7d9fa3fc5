//! Retry queue for not-yet-installable uploads.

use std::collections::VecDeque;
use std::path::{Path, PathBuf};
use std::sync::Mutex;
use std::time::Duration;
use tokio::time::Instant;

/// Backoff cap for incomplete uploads.
pub const MAX_RETRY_DELAY: Duration = Duration::from_secs(3600);

/// Seed delay applied on the first incomplete-upload retry.
pub const INITIAL_RETRY_DELAY: Duration = Duration::from_secs(30);

/// One pending ingestion attempt for a manifest file.
#[derive(Debug, Clone)]
pub struct IngestionTask {
    /// Manifest path; the task's identity within the queue.
    pub filename: PathBuf,
    /// When the manifest was first observed.
    pub first_seen: Instant,
    /// Earliest time the next attempt may run.
    pub next_attempt: Instant,
    /// Current backoff delay.
    pub delay: Duration,
}

impl IngestionTask {
    /// Create a task that is due immediately.
    pub fn new(filename: PathBuf, now: Instant) -> Self {
        Self {
            filename,
            first_seen: now,
            next_attempt: now,
            delay: Duration::ZERO,
        }
    }

    /// The task after an incomplete-upload attempt: delay doubled (seeded
    /// with [`INITIAL_RETRY_DELAY`]), capped at [`MAX_RETRY_DELAY`].
    pub fn backed_off(mut self, now: Instant) -> Self {
        self.delay = if self.delay.is_zero() {
            INITIAL_RETRY_DELAY
        } else {
            (self.delay * 2).min(MAX_RETRY_DELAY)
        };
        self.next_attempt = now + self.delay;
        self
    }
}

/// Result of [`RetryQueue::take_ready`].
#[derive(Debug, Default)]
pub struct ReadyTasks {
    /// Tasks older than the retry window; to be rejected.
    pub expired: Vec<IngestionTask>,
    /// Tasks whose next attempt is due; to be processed.
    pub due: Vec<IngestionTask>,
}

/// An ordered queue of ingestion tasks, deduplicated by manifest filename.
///
/// The scanner inserts tasks while the worker loop drains them, so all
/// operations take the internal lock for a short, await-free critical
/// section. Tasks only leave the queue through [`RetryQueue::take_ready`] or
/// [`RetryQueue::remove`]; both correspond to a terminal outcome decided by
/// the caller.
#[derive(Debug, Default)]
pub struct RetryQueue {
    inner: Mutex<VecDeque<IngestionTask>>,
}

impl RetryQueue {
    /// Create an empty queue.
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert a task, or update the existing task with the same filename.
    ///
    /// An update keeps the original queue position; only the scheduling
    /// fields change.
    pub fn put(&self, task: IngestionTask) {
        let mut inner = self.inner.lock().unwrap();
        match inner.iter().position(|t| t.filename == task.filename) {
            Some(index) => inner[index] = task,
            None => inner.push_back(task),
        }
    }

    /// Whether a task for `filename` is queued.
    pub fn contains(&self, filename: &Path) -> bool {
        let inner = self.inner.lock().unwrap();
        inner.iter().any(|t| t.filename == filename)
    }

    /// Remove and return the task for `filename`, if queued.
    pub fn remove(&self, filename: &Path) -> Option<IngestionTask> {
        let mut inner = self.inner.lock().unwrap();
        let index = inner.iter().position(|t| t.filename == filename)?;
        inner.remove(index)
    }

    /// Atomically partition the queue: tasks first seen more than `max_age`
    /// ago come back as expired (regardless of their next-attempt time),
    /// tasks whose next attempt is due come back for processing, everything
    /// else stays queued.
    pub fn take_ready(&self, now: Instant, max_age: Duration) -> ReadyTasks {
        let mut inner = self.inner.lock().unwrap();
        let mut ready = ReadyTasks::default();
        let mut keep = VecDeque::with_capacity(inner.len());
        for task in inner.drain(..) {
            if now.saturating_duration_since(task.first_seen) > max_age {
                ready.expired.push(task);
            } else if task.next_attempt <= now {
                ready.due.push(task);
            } else {
                keep.push_back(task);
            }
        }
        *inner = keep;
        ready
    }

    /// The earliest next-attempt time of any queued task.
    pub fn next_due(&self) -> Option<Instant> {
        let inner = self.inner.lock().unwrap();
        inner.iter().map(|t| t.next_attempt).min()
    }

    /// Number of queued tasks.
    pub fn len(&self) -> usize {
        self.inner.lock().unwrap().len()
    }

    /// Whether the queue is empty.
    pub fn is_empty(&self) -> bool {
        self.inner.lock().unwrap().is_empty()
    }
}
