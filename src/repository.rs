//! The `Repository` facade (§6): the stable in-process API an external CLI/TUI/web layer calls.
//! Wires together the object store, metadata store, ignore filter, and watcher/ingest worker
//! behind a single handle, bridging the synchronous watcher thread and this facade's synchronous
//! callers into the async metadata store via a dedicated current-thread `tokio` runtime
//! (§0 "Concurrency primitives").

use std::{
    path::{Path, PathBuf},
    sync::{
        Arc, Mutex,
        mpsc::{self, Receiver, RecvTimeoutError, SyncSender},
    },
    thread::JoinHandle,
    time::Duration,
};

use tracing::{info, warn};

use crate::config::RepoConfig;
use crate::diff::{self, DiffResult};
use crate::errors::{ChronologError, Result};
use crate::hash::ObjectHash;
use crate::internal::ignore::{self, IgnoreFilter};
use crate::internal::ingest::{self, IngestOutcome};
use crate::internal::metadata::MetadataStore;
use crate::internal::metadata::entities::{branch, tag, version};
use crate::internal::object::{CompressionAlgorithm, ObjectStore};
use crate::internal::refs;
use crate::internal::search::{self, QueryOptions, SearchHit};
use crate::internal::watcher::debounce::{Debouncer, PendingKind};
use crate::internal::watcher::{WatchEvent, Watcher};
use crate::merge::{self, MergePolicy, MergeResult};

const METADATA_DIR: &str = ".chronolog";
const IGNORE_FILE: &str = ".chronologignore";

/// A read-only snapshot of repository state, the supplemented `status()` operation (§0.1).
#[derive(Debug, Clone)]
pub struct RepositoryStatus {
    pub tracked_paths: u64,
    pub branch_count: u64,
    pub tag_count: u64,
    pub pending_jobs: usize,
    pub daemon_running: bool,
}

/// `daemon_status()` result.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DaemonStatus {
    Running { pid: u32 },
    Stopped,
}

struct DaemonHandle {
    watcher: Watcher,
    stop_tx: SyncSender<()>,
    worker: Option<JoinHandle<()>>,
    pending: Arc<std::sync::atomic::AtomicUsize>,
}

/// Handle to an open (or freshly initialized) repository.
pub struct Repository {
    root: PathBuf,
    metadata_dir: PathBuf,
    config: RepoConfig,
    objects: Arc<ObjectStore>,
    metadata: Arc<MetadataStore>,
    ignore: IgnoreFilter,
    runtime: tokio::runtime::Runtime,
    daemon: Mutex<Option<DaemonHandle>>,
}

fn build_runtime() -> Result<tokio::runtime::Runtime> {
    tokio::runtime::Builder::new_current_thread()
        .enable_all()
        .build()
        .map_err(|e| ChronologError::Custom(format!("failed to start runtime: {e}")))
}

impl Repository {
    /// `init(root)` (§6): create a fresh repository at `root`, laying down the on-disk structure
    /// and a single `main` branch as HEAD.
    pub fn init(root: impl Into<PathBuf>) -> Result<Repository> {
        let root = root.into();
        let metadata_dir = root.join(METADATA_DIR);
        if metadata_dir.exists() {
            return Err(ChronologError::AlreadyInitialized(root.display().to_string()));
        }
        std::fs::create_dir_all(&root)?;
        std::fs::create_dir_all(&metadata_dir)?;

        let config = RepoConfig::default();
        config.save(&metadata_dir.join("config.json"))?;

        let runtime = build_runtime()?;
        let metadata = runtime.block_on(MetadataStore::open(&metadata_dir.join("history.db")))?;
        let objects = ObjectStore::open(metadata_dir.join("objects"), config.store.compression)?;
        let ignore = IgnoreFilter::new(&[])?;
        runtime.block_on(metadata.replace_ignore_snapshot(&ignore::IgnoreFilter::all_patterns(&[]), crate::utils::now_millis()))?;

        let main = runtime.block_on(refs::create_root_branch(&metadata, "main"))?;
        std::fs::write(metadata_dir.join("HEAD"), format!("{}\n", main.name))?;

        info!(root = %root.display(), "initialized repository");
        Ok(Repository {
            root,
            metadata_dir,
            config,
            objects: Arc::new(objects),
            metadata: Arc::new(metadata),
            ignore,
            runtime,
            daemon: Mutex::new(None),
        })
    }

    /// `open(root)` (§6): attach to an existing repository.
    pub fn open(root: impl Into<PathBuf>) -> Result<Repository> {
        let root = root.into();
        let metadata_dir = root.join(METADATA_DIR);
        if !metadata_dir.exists() {
            return Err(ChronologError::NotARepository(root.display().to_string()));
        }

        let config = RepoConfig::load(&metadata_dir.join("config.json"))?;
        let runtime = build_runtime()?;
        let metadata = runtime.block_on(MetadataStore::open(&metadata_dir.join("history.db")))?;
        let objects = ObjectStore::open(metadata_dir.join("objects"), config.store.compression)?;

        let user_lines = Self::read_ignore_file(&root)?;
        let ignore = IgnoreFilter::new(&user_lines)?;
        runtime.block_on(metadata.replace_ignore_snapshot(&ignore::IgnoreFilter::all_patterns(&user_lines), crate::utils::now_millis()))?;

        info!(root = %root.display(), "opened repository");
        Ok(Repository {
            root,
            metadata_dir,
            config,
            objects: Arc::new(objects),
            metadata: Arc::new(metadata),
            ignore,
            runtime,
            daemon: Mutex::new(None),
        })
    }

    fn read_ignore_file(root: &Path) -> Result<Vec<String>> {
        let path = root.join(IGNORE_FILE);
        if !path.exists() {
            return Ok(Vec::new());
        }
        let contents = std::fs::read_to_string(path)?;
        Ok(ignore::parse_ignore_file(&contents))
    }

    /// Recompile the ignore filter from `.chronologignore` on disk and persist the snapshot
    /// (§4.C, §0.1 supplement). Called by the daemon loop on a detected change to that file.
    pub fn reload_ignore(&self) -> Result<()> {
        let user_lines = Self::read_ignore_file(&self.root)?;
        self.ignore.swap(&user_lines)?;
        self.runtime.block_on(
            self.metadata
                .replace_ignore_snapshot(&ignore::IgnoreFilter::all_patterns(&user_lines), crate::utils::now_millis()),
        )
    }

    fn head_branch_id(&self) -> Result<String> {
        self.runtime
            .block_on(self.metadata.head_branch())?
            .ok_or_else(|| ChronologError::NotARepository(self.root.display().to_string()))
    }

    // --- History & diff (§4.G) ---

    /// `log(path, limit?)` (§6): reverse-chronological versions for `path` on HEAD. A path with
    /// no `FileHead` yields an empty list rather than `NotTracked` (§4.G takes precedence over
    /// the table's generic error kind for this operation — see `DESIGN.md`).
    pub fn log(&self, path: &str, limit: Option<u64>) -> Result<Vec<version::Model>> {
        let branch_id = self.head_branch_id()?;
        self.runtime.block_on(self.metadata.log(path, &branch_id, limit))
    }

    /// `show(hash_or_prefix)` (§6): resolve a version hash (full or unambiguous ≥4-hex prefix)
    /// and return its blob bytes.
    pub fn show(&self, hash_or_prefix: &str) -> Result<Vec<u8>> {
        let version = self.runtime.block_on(self.metadata.resolve_version_prefix(hash_or_prefix))?;
        let hash: ObjectHash = version
            .blob_hash
            .parse()
            .map_err(|e| ChronologError::CorruptedBlob(format!("stored blob_hash unparsable: {e}")))?;
        self.objects.get(&hash)
    }

    /// `diff(a, b=current|version)` (§6, §4.G). `b` defaults to the current working-tree
    /// contents of `a`'s file when `None`.
    pub fn diff(&self, a_hash_or_prefix: &str, b_hash_or_prefix: Option<&str>) -> Result<DiffResult> {
        let a = self.runtime.block_on(self.metadata.resolve_version_prefix(a_hash_or_prefix))?;
        let a_hash: ObjectHash = a
            .blob_hash
            .parse()
            .map_err(|e| ChronologError::CorruptedBlob(format!("stored blob_hash unparsable: {e}")))?;
        let a_bytes = self.objects.get(&a_hash)?;

        let b_bytes = match b_hash_or_prefix {
            Some(b_ref) => {
                let b = self.runtime.block_on(self.metadata.resolve_version_prefix(b_ref))?;
                let b_hash: ObjectHash = b
                    .blob_hash
                    .parse()
                    .map_err(|e| ChronologError::CorruptedBlob(format!("stored blob_hash unparsable: {e}")))?;
                self.objects.get(&b_hash)?
            }
            None => std::fs::read(self.root.join(&a.file_path)).unwrap_or_default(),
        };

        Ok(diff::diff_blobs(
            Some(&a_bytes),
            Some(&b_bytes),
            self.config.diff.context_lines,
            &self.config.diff.fallback_encoding,
            self.config.ingest.binary_detection_prefix,
        ))
    }

    /// `checkout(hash, path)` (§6, §4.G): write the historical blob into the working tree, then
    /// record the restore through the ordinary ingest pipeline with `force = true`, so the
    /// revert is itself always a new version (resolved open question, §9) annotated with the
    /// source hash.
    pub fn checkout(&self, hash_or_prefix: &str, path: &str) -> Result<ObjectHash> {
        let source = self.runtime.block_on(self.metadata.resolve_version_prefix(hash_or_prefix))?;
        let blob_hash: ObjectHash = source
            .blob_hash
            .parse()
            .map_err(|e| ChronologError::CorruptedBlob(format!("stored blob_hash unparsable: {e}")))?;
        let bytes = self.objects.get(&blob_hash)?;

        let dest = self.root.join(path);
        if let Some(parent) = dest.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let tmp = self.metadata_dir.join("objects").join("tmp").join(format!("checkout-{}.tmp", crate::utils::now_millis()));
        std::fs::write(&tmp, &bytes)?;
        std::fs::rename(&tmp, &dest)?;

        let branch_id = self.head_branch_id()?;
        let annotation = Some(format!("checkout from {}", source.version_hash));
        let outcome = self.runtime.block_on(ingest::ingest(
            &self.metadata,
            &self.objects,
            &self.root,
            Path::new(path),
            &branch_id,
            &self.config.ingest,
            annotation,
            true,
        ))?;
        match outcome {
            IngestOutcome::Recorded { version_hash, .. } => Ok(version_hash),
            other => Err(ChronologError::Custom(format!("checkout ingest returned unexpected outcome: {other:?}"))),
        }
    }

    // --- Branches & tags (§4.F) ---

    pub fn branch_create(&self, name: &str, from_branch_id: &str) -> Result<branch::Model> {
        self.runtime.block_on(refs::branch_create(&self.metadata, name, from_branch_id))
    }

    pub fn branch_list(&self) -> Result<Vec<branch::Model>> {
        self.runtime.block_on(refs::branch_list(&self.metadata))
    }

    pub fn branch_switch(&self, name: &str) -> Result<branch::Model> {
        self.runtime.block_on(refs::branch_switch(&self.metadata, name))
    }

    pub fn branch_delete(&self, name: &str) -> Result<()> {
        self.runtime.block_on(refs::branch_delete(&self.metadata, name))
    }

    pub fn tag_create(&self, name: &str, version_hash: &str, description: Option<String>) -> Result<tag::Model> {
        self.runtime.block_on(refs::tag_create(&self.metadata, name, version_hash, description))
    }

    pub fn tag_list(&self) -> Result<Vec<tag::Model>> {
        self.runtime.block_on(refs::tag_list(&self.metadata))
    }

    pub fn tag_delete(&self, name: &str) -> Result<()> {
        self.runtime.block_on(refs::tag_delete(&self.metadata, name))
    }

    // --- Search (§4.H) ---

    pub fn search(&self, query: &str, opts: &QueryOptions) -> Result<Vec<SearchHit>> {
        self.runtime.block_on(search::query(&self.metadata, &self.objects, query, opts))
    }

    /// `reindex()` (§6): rebuild the search index from scratch, returning the final term count.
    pub fn reindex(&self) -> Result<u64> {
        self.runtime.block_on(search::reindex_all(&self.metadata, &self.objects))
    }

    // --- Merge (§4.I) ---

    /// `merge(base, ours, theirs, policy)` (§6): each argument is a version hash/prefix.
    pub fn merge(
        &self,
        base_hash: &str,
        ours_hash: &str,
        theirs_hash: &str,
        policy: MergePolicy,
    ) -> Result<MergeResult> {
        let base_bytes = self.show(base_hash)?;
        let ours_bytes = self.show(ours_hash)?;
        let theirs_bytes = self.show(theirs_hash)?;
        merge::merge(&base_bytes, &ours_bytes, &theirs_bytes, policy, &self.config.diff.fallback_encoding)
    }

    // --- GC & status (§0.1 supplement) ---

    /// `gc()` (§6, §0.1): delete every stored blob not referenced by any version, returning the
    /// freed count.
    pub fn gc(&self) -> Result<u64> {
        let referenced = self.runtime.block_on(self.metadata.distinct_blob_hashes())?;
        let mut freed = 0u64;
        for hash in self.objects.iter_hashes()? {
            if !referenced.contains(&hash.to_string()) {
                self.objects.delete(&hash)?;
                freed += 1;
            }
        }
        info!(freed, "garbage collection complete");
        Ok(freed)
    }

    /// `status()` (§6, §0.1): an aggregate snapshot of repository state.
    pub fn status(&self) -> Result<RepositoryStatus> {
        let versions = self.runtime.block_on(self.metadata.all_versions_in_order())?;
        let mut tracked = std::collections::HashSet::new();
        for v in &versions {
            tracked.insert((v.file_path.clone(), v.branch_id.clone()));
        }
        let branches = self.runtime.block_on(refs::branch_list(&self.metadata))?;
        let tags = self.runtime.block_on(refs::tag_list(&self.metadata))?;
        let daemon = self.daemon.lock().unwrap_or_else(|poisoned| poisoned.into_inner());
        let pending = daemon.as_ref().map(|d| d.pending.load(std::sync::atomic::Ordering::Relaxed)).unwrap_or(0);
        Ok(RepositoryStatus {
            tracked_paths: tracked.len() as u64,
            branch_count: branches.len() as u64,
            tag_count: tags.len() as u64,
            pending_jobs: pending,
            daemon_running: daemon.is_some(),
        })
    }

    // --- Daemon (watcher + ingest worker, §4.D, §6) ---

    /// `daemon_start()` (§6): attach the watcher and spin up the single ingest worker thread.
    /// Idempotent: a second call while already running is a no-op.
    pub fn daemon_start(&self) -> Result<()> {
        let mut daemon = self.daemon.lock().unwrap_or_else(|poisoned| poisoned.into_inner());
        if daemon.is_some() {
            return Ok(());
        }

        let (watcher, event_rx) =
            Watcher::start(self.root.clone(), self.ignore.clone(), self.config.watch.queue_capacity, METADATA_DIR)?;

        let (stop_tx, stop_rx) = mpsc::sync_channel::<()>(1);
        let pending = Arc::new(std::sync::atomic::AtomicUsize::new(0));

        let root = self.root.clone();
        let objects = Arc::clone(&self.objects);
        let metadata = Arc::clone(&self.metadata);
        let ingest_config = self.config.ingest.clone();
        let branch_id = self.head_branch_id()?;
        let debounce_window = Duration::from_millis(self.config.watch.debounce_ms);
        let pending_for_worker = Arc::clone(&pending);

        let worker = std::thread::spawn(move || {
            worker_loop(
                root,
                objects,
                metadata,
                ingest_config,
                branch_id,
                event_rx,
                debounce_window,
                stop_rx,
                pending_for_worker,
            );
        });

        std::fs::write(self.metadata_dir.join("daemon.pid"), format!("{}\n", std::process::id()))?;

        *daemon = Some(DaemonHandle { watcher, stop_tx, worker: Some(worker), pending });
        info!("daemon started");
        Ok(())
    }

    /// `daemon_stop()` (§6): signal the worker to flush pending debounce timers and drain the
    /// queue, then join it. Idempotent.
    pub fn daemon_stop(&self) -> Result<()> {
        let mut daemon = self.daemon.lock().unwrap_or_else(|poisoned| poisoned.into_inner());
        let Some(mut handle) = daemon.take() else { return Ok(()) };
        let _ = handle.stop_tx.try_send(());
        handle.watcher.stop();
        if let Some(worker) = handle.worker.take() {
            let _ = worker.join();
        }
        let _ = std::fs::remove_file(self.metadata_dir.join("daemon.pid"));
        info!("daemon stopped");
        Ok(())
    }

    /// `daemon_status()` (§6).
    pub fn daemon_status(&self) -> DaemonStatus {
        let daemon = self.daemon.lock().unwrap_or_else(|poisoned| poisoned.into_inner());
        if daemon.is_some() {
            DaemonStatus::Running { pid: std::process::id() }
        } else {
            DaemonStatus::Stopped
        }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }
}

impl Drop for Repository {
    fn drop(&mut self) {
        let _ = self.daemon_stop();
    }
}

/// The ingest worker's event loop (§4.D, §5): owns the [`Debouncer`], drains due jobs one at a
/// time against the single metadata writer, and on a stop signal flushes every still-pending
/// path before exiting. Runs on its own current-thread `tokio` runtime so it can call the async
/// [`ingest::ingest`] without depending on the facade's runtime outliving this thread.
#[allow(clippy::too_many_arguments)]
fn worker_loop(
    root: PathBuf,
    objects: Arc<ObjectStore>,
    metadata: Arc<MetadataStore>,
    config: crate::config::IngestConfig,
    branch_id: String,
    event_rx: Receiver<WatchEvent>,
    debounce_window: Duration,
    stop_rx: Receiver<()>,
    pending_gauge: Arc<std::sync::atomic::AtomicUsize>,
) {
    let debouncer = Debouncer::new(debounce_window);
    let runtime = match tokio::runtime::Builder::new_current_thread().enable_all().build() {
        Ok(rt) => rt,
        Err(e) => {
            warn!(error = %e, "ingest worker failed to start its runtime");
            return;
        }
    };

    let mut stopping = false;
    loop {
        if !stopping && stop_rx.try_recv().is_ok() {
            stopping = true;
        }

        match event_rx.recv_timeout(Duration::from_millis(50)) {
            Ok(WatchEvent::Modified(path)) => debouncer.observe_save(path),
            Ok(WatchEvent::Removed(path)) => debouncer.observe_delete(path),
            Err(RecvTimeoutError::Timeout) => {}
            Err(RecvTimeoutError::Disconnected) => stopping = true,
        }

        let due = debouncer.drain_due();
        pending_gauge.store(debouncer.len(), std::sync::atomic::Ordering::Relaxed);
        run_jobs(&runtime, &root, &objects, &metadata, &config, &branch_id, due);

        if stopping {
            let remaining = debouncer.flush_all();
            run_jobs(&runtime, &root, &objects, &metadata, &config, &branch_id, remaining);
            pending_gauge.store(0, std::sync::atomic::Ordering::Relaxed);
            return;
        }
    }
}

fn run_jobs(
    runtime: &tokio::runtime::Runtime,
    root: &Path,
    objects: &ObjectStore,
    metadata: &MetadataStore,
    config: &crate::config::IngestConfig,
    branch_id: &str,
    jobs: Vec<(PathBuf, PendingKind)>,
) {
    for (path, kind) in jobs {
        match kind {
            PendingKind::Delete => ingest::log_delete(&path),
            PendingKind::Save => {
                let result = runtime.block_on(ingest::ingest(metadata, objects, root, &path, branch_id, config, None, false));
                if let Err(e) = result {
                    warn!(path = %path.display(), error = %e, "ingest failed, skipping this save");
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn init_then_open_roundtrips() {
        let dir = tempfile::tempdir().unwrap();
        let root = dir.path().join("repo");
        {
            let repo = Repository::init(&root).unwrap();
            assert_eq!(repo.branch_list().unwrap().len(), 1);
        }
        let repo = Repository::open(&root).unwrap();
        assert_eq!(repo.branch_list().unwrap()[0].name, "main");
    }

    #[test]
    fn init_twice_errors() {
        let dir = tempfile::tempdir().unwrap();
        let root = dir.path().join("repo");
        Repository::init(&root).unwrap();
        let err = Repository::init(&root).unwrap_err();
        assert!(matches!(err, ChronologError::AlreadyInitialized(_)));
    }

    #[test]
    fn open_nonexistent_errors() {
        let dir = tempfile::tempdir().unwrap();
        let err = Repository::open(dir.path().join("nope")).unwrap_err();
        assert!(matches!(err, ChronologError::NotARepository(_)));
    }

    #[test]
    fn log_on_untracked_path_is_empty() {
        let dir = tempfile::tempdir().unwrap();
        let repo = Repository::init(dir.path().join("repo")).unwrap();
        assert!(repo.log("nope.txt", None).unwrap().is_empty());
    }

    #[test]
    fn status_reports_empty_repo() {
        let dir = tempfile::tempdir().unwrap();
        let repo = Repository::init(dir.path().join("repo")).unwrap();
        let status = repo.status().unwrap();
        assert_eq!(status.tracked_paths, 0);
        assert_eq!(status.branch_count, 1);
        assert!(!status.daemon_running);
    }

    #[test]
    fn gc_on_fresh_repo_frees_nothing() {
        let dir = tempfile::tempdir().unwrap();
        let repo = Repository::init(dir.path().join("repo")).unwrap();
        assert_eq!(repo.gc().unwrap(), 0);
    }

    #[test]
    fn branch_and_tag_lifecycle_through_facade() {
        let dir = tempfile::tempdir().unwrap();
        let repo = Repository::init(dir.path().join("repo")).unwrap();
        let main = repo.branch_list().unwrap().into_iter().next().unwrap();
        let feature = repo.branch_create("feature", &main.branch_id).unwrap();
        assert_eq!(repo.branch_list().unwrap().len(), 2);
        repo.branch_switch("feature").unwrap();
        repo.branch_delete("main").unwrap();
        assert_eq!(repo.branch_list().unwrap().len(), 1);
        let _ = feature;
    }
}
