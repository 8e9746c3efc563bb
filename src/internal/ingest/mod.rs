//! The ingest pipeline (component E): turns a stable file save into a durable `Version` row,
//! following the algorithm in §4.E exactly.
//!
//! Only the ingest worker thread ever calls [`ingest`]; it is the sole writer against the
//! metadata store (§5 single-writer discipline). Concurrency and thread ownership live in
//! `Repository`/the watcher module — this module is the pure step-by-step algorithm plus the
//! bounded mid-read retry.

use std::path::Path;

use tracing::{debug, info, warn};

use crate::config::IngestConfig;
use crate::errors::{ChronologError, Result};
use crate::hash::ObjectHash;
use crate::internal::metadata::MetadataStore;
use crate::internal::metadata::entities::{search_term, version};
use crate::internal::object::ObjectStore;
use crate::internal::search::tokenize;
use crate::utils::{looks_binary, now_millis};

/// Outcome of one ingest attempt, distinguishing a recorded version from the no-ops the
/// algorithm defines (§4.E steps 2 and 4).
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum IngestOutcome {
    /// A new version was recorded.
    Recorded {
        version_hash: ObjectHash,
        blob_hash: ObjectHash,
    },
    /// The content was unchanged from the current `FileHead`; no version was recorded.
    NoOpUnchanged,
    /// The file was classified binary and the configured policy forbids it.
    SkippedBinary,
}

/// Read `path` under `root`, retrying a bounded number of times if the file's size changes
/// between the read and a follow-up stat (covers editors that write via rename-over, §4.E
/// step 1). A size mismatch either side of the read means the read observed a torn file.
fn read_stable(root: &Path, relative: &Path, attempts: u32) -> Result<Vec<u8>> {
    let full = root.join(relative);
    let mut last_err = None;
    for _ in 0..attempts.max(1) {
        let before = std::fs::metadata(&full).map(|m| m.len());
        match std::fs::read(&full) {
            Ok(bytes) => {
                let after = std::fs::metadata(&full).map(|m| m.len());
                let stable = match (before, after) {
                    (Ok(b), Ok(a)) => b == a && a as usize == bytes.len(),
                    _ => true, // can't verify either stat; accept what we read
                };
                if stable {
                    return Ok(bytes);
                }
                last_err = Some(ChronologError::Interrupted(format!(
                    "{} changed size mid-read, retrying",
                    relative.display()
                )));
            }
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                return Err(ChronologError::Interrupted(format!(
                    "{} disappeared mid-read",
                    relative.display()
                )));
            }
            Err(e) => last_err = Some(ChronologError::Io(e)),
        }
    }
    Err(last_err.unwrap_or_else(|| ChronologError::Interrupted(relative.display().to_string())))
}

/// Run the ingest algorithm for a non-ignored path whose debounce deadline has fired (§4.E).
///
/// `annotation` is `None` for ordinary watcher-driven saves and `Some(..)` when this ingest is
/// the result of a `checkout` (§4.G, §0.1 supplement: "Annotation text on ordinary ingests").
///
/// `force` bypasses the no-op short-circuit in step 4; only `Repository::checkout` sets it,
/// per the resolved open question that a checkout always records a new version even if it
/// restores content identical to the current `FileHead` (§9 Open Questions).
#[allow(clippy::too_many_arguments)]
pub async fn ingest(
    metadata: &MetadataStore,
    objects: &ObjectStore,
    root: &Path,
    relative_path: &Path,
    branch_id: &str,
    config: &IngestConfig,
    annotation: Option<String>,
    force: bool,
) -> Result<IngestOutcome> {
    let bytes = read_stable(root, relative_path, config.read_retry_attempts)?;

    let prefix_len = bytes.len().min(config.binary_detection_prefix);
    if config.forbid_binary && looks_binary(&bytes[..prefix_len]) {
        warn!(path = %relative_path.display(), "skipping binary file per policy");
        return Ok(IngestOutcome::SkippedBinary);
    }

    let blob_hash = ObjectHash::of(&bytes);
    let path_str = relative_path.to_string_lossy().replace('\\', "/");

    let current_head = metadata.file_head(metadata.connection(), &path_str, branch_id).await?;
    if !force {
        if let Some(head) = &current_head {
            if head.blob_hash == blob_hash.to_string() {
                debug!(path = %path_str, %blob_hash, "no-op save, blob unchanged");
                return Ok(IngestOutcome::NoOpUnchanged);
            }
        }
    }

    // The blob write is not transactional (§4.E step 5, §7): an orphan blob from a failure
    // later in this function is harmless and reclaimable by GC.
    objects.put(&bytes)?;

    let parent_version_hash = match &current_head {
        Some(head) => Some(head.version_hash.parse::<ObjectHash>().map_err(|e| {
            ChronologError::CorruptedBlob(format!("file_head version_hash unparsable: {e}"))
        })?),
        None => None,
    };
    let timestamp = now_millis();
    let version_hash = ObjectHash::for_version_event(
        &blob_hash,
        parent_version_hash.as_ref(),
        timestamp,
        branch_id,
        &path_str,
    );

    let tx = metadata.begin().await?;

    metadata
        .insert_version(
            &tx,
            version::Model {
                version_hash: version_hash.to_string(),
                file_path: path_str.clone(),
                blob_hash: blob_hash.to_string(),
                timestamp,
                parent_version_hash: parent_version_hash.map(|h| h.to_string()),
                branch_id: branch_id.to_string(),
                annotation: annotation.clone(),
            },
        )
        .await?;

    metadata.upsert_file_head(&tx, &path_str, branch_id, &version_hash.to_string()).await?;

    // Search index maintenance: drop the prior version's terms for this (path, branch), then
    // tokenize and insert the new content's terms (§4.E step 5, component H).
    if let Some(head) = &current_head {
        metadata.remove_search_terms_for_version(&tx, &head.version_hash).await?;
    }
    if !looks_binary(&bytes[..prefix_len]) {
        let text = String::from_utf8_lossy(&bytes);
        let tokens = tokenize(&text);
        let rows = tokens
            .into_iter()
            .map(|(token, positions)| search_term::Model {
                id: 0,
                version_hash: version_hash.to_string(),
                file_path: path_str.clone(),
                token,
                positions: positions
                    .iter()
                    .map(|p| p.to_string())
                    .collect::<Vec<_>>()
                    .join(","),
            })
            .collect();
        metadata.insert_search_terms(&tx, rows).await?;
    }

    use sea_orm::TransactionTrait;
    tx.commit().await?;

    info!(path = %path_str, %version_hash, %blob_hash, "ingested version");
    Ok(IngestOutcome::Recorded { version_hash, blob_hash })
}

/// Record a delete event: no blob/version is written (the spec defines no tombstone version
/// type), but any pending search terms tied to the current head are left as-is since the head
/// itself is retained as history. Delete events only clear debounce state upstream; this
/// function exists so the ingest worker has one call site to log the event uniformly.
pub fn log_delete(relative_path: &Path) {
    info!(path = %relative_path.display(), "observed delete event (no tombstone version recorded)");
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::internal::object::CompressionAlgorithm;

    async fn setup() -> (tempfile::TempDir, MetadataStore, ObjectStore) {
        let dir = tempfile::tempdir().unwrap();
        let metadata = MetadataStore::open_in_memory().await.unwrap();
        let objects = ObjectStore::open(dir.path().join("objects"), CompressionAlgorithm::Zlib).unwrap();
        (dir, metadata, objects)
    }

    #[tokio::test]
    async fn first_save_records_a_version_with_no_parent() {
        let (dir, metadata, objects) = setup().await;
        std::fs::write(dir.path().join("hello.txt"), b"A\n").unwrap();
        let outcome = ingest(
            &metadata,
            &objects,
            dir.path(),
            Path::new("hello.txt"),
            "main",
            &IngestConfig::default(),
            None,
            false,
        )
        .await
        .unwrap();
        match outcome {
            IngestOutcome::Recorded { blob_hash, .. } => {
                assert_eq!(blob_hash, ObjectHash::of(b"A\n"));
            }
            other => panic!("expected Recorded, got {other:?}"),
        }
        let head = metadata.file_head(metadata.connection(), "hello.txt", "main").await.unwrap();
        assert!(head.is_some());
    }

    #[tokio::test]
    async fn identical_resave_is_a_noop() {
        let (dir, metadata, objects) = setup().await;
        std::fs::write(dir.path().join("hello.txt"), b"A\n").unwrap();
        ingest(&metadata, &objects, dir.path(), Path::new("hello.txt"), "main", &IngestConfig::default(), None, false)
            .await
            .unwrap();
        let second = ingest(&metadata, &objects, dir.path(), Path::new("hello.txt"), "main", &IngestConfig::default(), None, false)
            .await
            .unwrap();
        assert_eq!(second, IngestOutcome::NoOpUnchanged);
    }

    #[tokio::test]
    async fn dedup_across_distinct_paths_shares_one_blob() {
        let (dir, metadata, objects) = setup().await;
        std::fs::write(dir.path().join("x.txt"), b"hi").unwrap();
        std::fs::write(dir.path().join("y.txt"), b"hi").unwrap();
        let a = ingest(&metadata, &objects, dir.path(), Path::new("x.txt"), "main", &IngestConfig::default(), None, false)
            .await
            .unwrap();
        let b = ingest(&metadata, &objects, dir.path(), Path::new("y.txt"), "main", &IngestConfig::default(), None, false)
            .await
            .unwrap();
        let (IngestOutcome::Recorded { blob_hash: h1, .. }, IngestOutcome::Recorded { blob_hash: h2, .. }) = (a, b) else {
            panic!("expected both recorded");
        };
        assert_eq!(h1, h2);
        assert_eq!(objects.iter_hashes().unwrap().len(), 1);
    }

    #[tokio::test]
    async fn binary_file_skipped_when_forbidden() {
        let (dir, metadata, objects) = setup().await;
        std::fs::write(dir.path().join("bin.dat"), [0u8, 1, 2, 3]).unwrap();
        let mut cfg = IngestConfig::default();
        cfg.forbid_binary = true;
        let outcome = ingest(&metadata, &objects, dir.path(), Path::new("bin.dat"), "main", &cfg, None, false)
            .await
            .unwrap();
        assert_eq!(outcome, IngestOutcome::SkippedBinary);
    }

    #[tokio::test]
    async fn second_distinct_save_chains_parent() {
        let (dir, metadata, objects) = setup().await;
        std::fs::write(dir.path().join("hello.txt"), b"A\n").unwrap();
        let first = ingest(&metadata, &objects, dir.path(), Path::new("hello.txt"), "main", &IngestConfig::default(), None, false)
            .await
            .unwrap();
        std::fs::write(dir.path().join("hello.txt"), b"B\n").unwrap();
        let second = ingest(&metadata, &objects, dir.path(), Path::new("hello.txt"), "main", &IngestConfig::default(), None, false)
            .await
            .unwrap();
        let IngestOutcome::Recorded { version_hash: v1, .. } = first else { panic!() };
        let IngestOutcome::Recorded { version_hash: v2, .. } = second else { panic!() };
        assert_ne!(v1, v2);
        let row = metadata.version_by_hash(&v2.to_string()).await.unwrap().unwrap();
        assert_eq!(row.parent_version_hash.as_deref(), Some(v1.to_string().as_str()));
    }
}
