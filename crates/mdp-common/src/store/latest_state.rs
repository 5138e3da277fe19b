//! Generic single-writer latest-state store

use chrono::{DateTime, Utc};
use std::borrow::Borrow;
use std::collections::HashMap;
use std::hash::Hash;
use std::sync::atomic::{AtomicU8, Ordering};
use std::sync::{Arc, Mutex, RwLock, RwLockReadGuard, RwLockWriteGuard};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::info;

use crate::shutdown::Shutdown;

/// A record that can live in a [`LatestStateStore`].
pub trait LatestRecord: Clone + Send + Sync + 'static {
    type Key: Eq + Hash + Clone + Send + Sync + 'static;

    fn key(&self) -> Self::Key;

    /// Embedded event time used to resolve concurrent writes: the record
    /// with the greatest event time wins, not the most recently enqueued.
    fn event_time(&self) -> DateTime<Utc>;
}

/// Lifecycle of a store's monitor loop.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum MonitorState {
    NotStarted = 0,
    Running = 1,
    Stopped = 2,
}

/// Append-only intake queue drained by one dedicated monitor task that folds
/// records into a latest-wins map.
///
/// `enqueue` is non-blocking and safe for any number of concurrent callers.
/// The monitor task is the only writer performing upserts on the map, which
/// keeps the fold free of write contention; `get_all` snapshots under a read
/// lock. Enqueues that race the shutdown signal may be dropped: shutdown is
/// a best-effort drain, not a transactional boundary.
pub struct LatestStateStore<R: LatestRecord> {
    name: &'static str,
    intake_tx: mpsc::UnboundedSender<R>,
    intake_rx: Mutex<Option<mpsc::UnboundedReceiver<R>>>,
    latest: RwLock<HashMap<R::Key, R>>,
    state: AtomicU8,
    shutdown: Shutdown,
}

impl<R: LatestRecord> LatestStateStore<R> {
    pub fn new(name: &'static str, shutdown: Shutdown) -> Arc<Self> {
        let (intake_tx, intake_rx) = mpsc::unbounded_channel();
        Arc::new(Self {
            name,
            intake_tx,
            intake_rx: Mutex::new(Some(intake_rx)),
            latest: RwLock::new(HashMap::new()),
            state: AtomicU8::new(MonitorState::NotStarted as u8),
            shutdown,
        })
    }

    /// Queue a record for folding. Never blocks.
    pub fn enqueue(&self, record: R) {
        // Send only fails when the receiver is gone, i.e. the monitor loop
        // already exited; the record is dropped like any other enqueue that
        // races shutdown.
        let _ = self.intake_tx.send(record);
    }

    /// Start the monitor loop. At most one loop ever runs: a second call is
    /// a logged no-op, as is a call after shutdown has been requested.
    pub fn start_monitor(self: &Arc<Self>) -> Option<JoinHandle<()>> {
        if self.shutdown.is_requested() {
            info!("store '{}' is cancelled before starting to monitor", self.name);
            return None;
        }

        if self
            .state
            .compare_exchange(
                MonitorState::NotStarted as u8,
                MonitorState::Running as u8,
                Ordering::SeqCst,
                Ordering::SeqCst,
            )
            .is_err()
        {
            info!("store '{}' is already monitoring", self.name);
            return None;
        }

        let mut intake_rx = match self.take_intake_rx() {
            Some(rx) => rx,
            None => {
                // Unreachable in practice: the state guard above only lets
                // one caller through to take the receiver.
                self.state.store(MonitorState::Stopped as u8, Ordering::SeqCst);
                return None;
            }
        };

        info!("store '{}' starts to monitor", self.name);

        let store = Arc::clone(self);
        let mut shutdown = self.shutdown.clone();
        Some(tokio::spawn(async move {
            loop {
                tokio::select! {
                    biased;
                    _ = shutdown.triggered() => break,
                    received = intake_rx.recv() => match received {
                        Some(record) => store.fold(record),
                        None => break,
                    },
                }
            }

            store.state.store(MonitorState::Stopped as u8, Ordering::SeqCst);
            info!("store '{}' is signaled to stop monitoring", store.name);
        }))
    }

    /// Snapshot of the current values.
    pub fn get_all(&self) -> Vec<R> {
        self.read_map().values().cloned().collect()
    }

    pub fn len(&self) -> usize {
        self.read_map().len()
    }

    pub fn is_empty(&self) -> bool {
        self.read_map().is_empty()
    }

    pub fn monitor_state(&self) -> MonitorState {
        match self.state.load(Ordering::SeqCst) {
            0 => MonitorState::NotStarted,
            1 => MonitorState::Running,
            _ => MonitorState::Stopped,
        }
    }

    /// Remove the entry for `key`. Returns true iff an entry existed.
    pub(crate) fn remove<Q>(&self, key: &Q) -> bool
    where
        R::Key: Borrow<Q>,
        Q: Hash + Eq + ?Sized,
    {
        self.write_map().remove(key).is_some()
    }

    /// Remove the entry for `key` iff `predicate` accepts the stored record.
    pub(crate) fn remove_if<Q>(&self, key: &Q, predicate: impl FnOnce(&R) -> bool) -> bool
    where
        R::Key: Borrow<Q>,
        Q: Hash + Eq + ?Sized,
    {
        let mut map = self.write_map();
        match map.get(key) {
            Some(record) if predicate(record) => {
                map.remove(key);
                true
            }
            _ => false,
        }
    }

    /// Latest-wins merge: keep the existing record unless the incoming one
    /// carries a strictly later event time. Ties keep the existing record.
    fn fold(&self, incoming: R) {
        let mut map = self.write_map();
        match map.get(&incoming.key()) {
            Some(existing) if existing.event_time() >= incoming.event_time() => {}
            _ => {
                map.insert(incoming.key(), incoming);
            }
        }
    }

    fn take_intake_rx(&self) -> Option<mpsc::UnboundedReceiver<R>> {
        self.intake_rx
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .take()
    }

    fn read_map(&self) -> RwLockReadGuard<'_, HashMap<R::Key, R>> {
        self.latest
            .read()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    fn write_map(&self) -> RwLockWriteGuard<'_, HashMap<R::Key, R>> {
        self.latest
            .write()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}
