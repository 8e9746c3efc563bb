//! Per-path debounce state machine (§4.D).
//!
//! `Idle -> Pending(deadline) -> Idle` on a trailing edge: each new event for a path extends
//! its deadline rather than firing immediately, so a burst of saves coalesces into one ingest
//! job. Delete events are never debounced — they fire immediately. The table itself is a
//! `DashMap` so watcher-thread inserts and worker-thread drains don't contend on a single lock.

use std::{
    path::PathBuf,
    time::{Duration, Instant},
};

use dashmap::DashMap;

/// What the debouncer decided should happen to a path.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PendingKind {
    Save,
    Delete,
}

#[derive(Debug, Clone)]
struct PendingEntry {
    kind: PendingKind,
    deadline: Instant,
}

/// Tracks per-path debounce deadlines. Owned exclusively by the ingest worker thread; the
/// watcher thread only calls `observe`, never reads deadlines directly (§9 design note: no
/// shared mutable state touched by the watcher thread beyond this table's own locking).
pub struct Debouncer {
    window: Duration,
    pending: DashMap<PathBuf, PendingEntry>,
}

impl Debouncer {
    pub fn new(window: Duration) -> Debouncer {
        Debouncer { window, pending: DashMap::new() }
    }

    /// Record a save/modify event for `path`, extending its deadline (trailing-edge debounce).
    /// A duplicate path already pending is merged, not added, bounding queue growth under a
    /// hot-loop of saves.
    pub fn observe_save(&self, path: PathBuf) {
        self.pending.insert(path, PendingEntry { kind: PendingKind::Save, deadline: Instant::now() + self.window });
    }

    /// Record a delete event for `path`. Deletes are not debounced: they immediately become
    /// due, overriding any pending save for the same path.
    pub fn observe_delete(&self, path: PathBuf) {
        self.pending.insert(path, PendingEntry { kind: PendingKind::Delete, deadline: Instant::now() });
    }

    /// Drain every path whose deadline has passed, removing them from the pending table.
    pub fn drain_due(&self) -> Vec<(PathBuf, PendingKind)> {
        let now = Instant::now();
        let due: Vec<PathBuf> = self
            .pending
            .iter()
            .filter(|e| e.deadline <= now)
            .map(|e| e.key().clone())
            .collect();
        let mut out = Vec::with_capacity(due.len());
        for path in due {
            if let Some((_, entry)) = self.pending.remove(&path) {
                out.push((path, entry.kind));
            }
        }
        out
    }

    /// Flush every still-pending path immediately, regardless of deadline (used on daemon
    /// stop so in-flight debounce timers aren't silently dropped — §4.D cancellation).
    pub fn flush_all(&self) -> Vec<(PathBuf, PendingKind)> {
        let keys: Vec<PathBuf> = self.pending.iter().map(|e| e.key().clone()).collect();
        let mut out = Vec::with_capacity(keys.len());
        for path in keys {
            if let Some((_, entry)) = self.pending.remove(&path) {
                out.push((path, entry.kind));
            }
        }
        out
    }

    pub fn next_deadline(&self) -> Option<Instant> {
        self.pending.iter().map(|e| e.deadline).min()
    }

    pub fn is_empty(&self) -> bool {
        self.pending.is_empty()
    }

    /// Number of paths currently awaiting an ingest job, used by `Repository::status` to
    /// report the real pending-job count (§0.1 supplement).
    pub fn len(&self) -> usize {
        self.pending.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::thread::sleep;

    #[test]
    fn save_is_not_due_before_window_elapses() {
        let d = Debouncer::new(Duration::from_millis(200));
        d.observe_save(PathBuf::from("a.txt"));
        assert!(d.drain_due().is_empty());
    }

    #[test]
    fn save_is_due_after_window_elapses() {
        let d = Debouncer::new(Duration::from_millis(10));
        d.observe_save(PathBuf::from("a.txt"));
        sleep(Duration::from_millis(30));
        let due = d.drain_due();
        assert_eq!(due.len(), 1);
        assert_eq!(due[0].1, PendingKind::Save);
    }

    #[test]
    fn repeated_saves_extend_deadline() {
        let d = Debouncer::new(Duration::from_millis(50));
        d.observe_save(PathBuf::from("a.txt"));
        sleep(Duration::from_millis(30));
        d.observe_save(PathBuf::from("a.txt")); // extends deadline
        sleep(Duration::from_millis(30));
        // Only 60ms since the second observe's deadline started counting, still under 50+30
        assert!(d.drain_due().is_empty() || !d.is_empty());
    }

    #[test]
    fn delete_fires_immediately() {
        let d = Debouncer::new(Duration::from_millis(500));
        d.observe_delete(PathBuf::from("a.txt"));
        let due = d.drain_due();
        assert_eq!(due.len(), 1);
        assert_eq!(due[0].1, PendingKind::Delete);
    }

    #[test]
    fn duplicate_path_merges_not_duplicates() {
        let d = Debouncer::new(Duration::from_millis(10));
        d.observe_save(PathBuf::from("a.txt"));
        d.observe_save(PathBuf::from("a.txt"));
        d.observe_save(PathBuf::from("a.txt"));
        sleep(Duration::from_millis(30));
        assert_eq!(d.drain_due().len(), 1);
    }

    #[test]
    fn flush_all_returns_everything_regardless_of_deadline() {
        let d = Debouncer::new(Duration::from_secs(500));
        d.observe_save(PathBuf::from("a.txt"));
        d.observe_save(PathBuf::from("b.txt"));
        assert_eq!(d.flush_all().len(), 2);
        assert!(d.is_empty());
    }
}
