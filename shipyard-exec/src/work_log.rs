//! Append-only work log with debounced observer notification.
//!
//! Observers subscribe to a broadcast channel of [`WorkSnapshot`]s. Appends
//! pass through a [`Debouncer`]; deferred notifications are delivered by a
//! timer task on the current tokio runtime.

use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use tokio::sync::broadcast;
use tokio::time::Instant;
use tracing::debug;

use crate::debounce::{Debouncer, Decision};
use crate::record::CommandResult;

/// Minimum spacing between observer notifications.
pub const NOTIFY_INTERVAL: Duration = Duration::from_secs(1);

const OBSERVER_CAPACITY: usize = 16;

/// Full log contents at the moment of a notification.
pub type WorkSnapshot = Arc<Vec<CommandResult>>;

/// Cheaply cloneable handle to a shared log.
#[derive(Clone)]
pub struct WorkLog {
    inner: Arc<Inner>,
}

struct Inner {
    entries: Mutex<Vec<CommandResult>>,
    debounce: Mutex<Debouncer>,
    observers: broadcast::Sender<WorkSnapshot>,
}

impl Default for WorkLog {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Debug for WorkLog {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("WorkLog").field("entries", &self.len()).finish()
    }
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

impl WorkLog {
    pub fn new() -> Self {
        Self::with_interval(NOTIFY_INTERVAL)
    }

    pub fn with_interval(interval: Duration) -> Self {
        let (observers, _) = broadcast::channel(OBSERVER_CAPACITY);
        Self {
            inner: Arc::new(Inner {
                entries: Mutex::new(Vec::new()),
                debounce: Mutex::new(Debouncer::new(interval, Instant::now())),
                observers,
            }),
        }
    }

    /// Append a record and notify observers subject to the debounce.
    pub fn append(&self, record: CommandResult) {
        lock(&self.inner.entries).push(record);

        let decision = lock(&self.inner.debounce).on_event(Instant::now());
        match decision {
            Decision::EmitNow => self.emit(),
            Decision::Defer(delay) => self.emit_after(delay),
            Decision::Coalesced => {}
        }
    }

    /// Every record appended so far, oldest first.
    pub fn snapshot(&self) -> Vec<CommandResult> {
        lock(&self.inner.entries).clone()
    }

    pub fn len(&self) -> usize {
        lock(&self.inner.entries).len()
    }

    pub fn is_empty(&self) -> bool {
        lock(&self.inner.entries).is_empty()
    }

    /// Receive a snapshot on every (debounced) notification.
    pub fn subscribe(&self) -> broadcast::Receiver<WorkSnapshot> {
        self.inner.observers.subscribe()
    }

    fn emit_after(&self, delay: Duration) {
        let log = self.clone();
        match tokio::runtime::Handle::try_current() {
            Ok(runtime) => {
                runtime.spawn(async move {
                    tokio::time::sleep(delay).await;
                    log.fire();
                });
            }
            // No timer available outside a runtime; deliver the trailing
            // notification right away.
            Err(_) => log.fire(),
        }
    }

    fn fire(&self) {
        // Clear `pending` before snapshotting so an append racing with this
        // notification arms a fresh one instead of being dropped.
        lock(&self.inner.debounce).on_fire(Instant::now());
        self.emit();
    }

    fn emit(&self) {
        // Held across send so notifications go out in append order.
        let entries = lock(&self.inner.entries);
        let snapshot: WorkSnapshot = Arc::new(entries.clone());
        debug!(entries = snapshot.len(), "work log notification");
        // No observers is not an error.
        let _ = self.inner.observers.send(snapshot);
    }
}
