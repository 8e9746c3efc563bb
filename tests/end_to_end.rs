//! End-to-end scenarios against a real working tree through the `Repository` facade: implicit
//! commits, blob dedup, short-hash lookup, checkout-records-history, and three-way merge.
//!
//! Saves are driven directly through the internal ingest function rather than the real file
//! watcher, so these tests are deterministic and don't depend on debounce timing.

use chronolog::hash::ObjectHash;
use chronolog::internal::ingest::{IngestOutcome, ingest};
use chronolog::internal::object::CompressionAlgorithm;
use chronolog::internal::object::ObjectStore;
use chronolog::internal::metadata::MetadataStore;
use chronolog::merge::{MergePolicy, merge};
use chronolog::repository::Repository;
use chronolog::config::IngestConfig;

async fn save(
    metadata: &MetadataStore,
    objects: &ObjectStore,
    root: &std::path::Path,
    relative: &str,
    contents: &[u8],
    branch_id: &str,
) -> IngestOutcome {
    std::fs::write(root.join(relative), contents).unwrap();
    ingest(
        metadata,
        objects,
        root,
        std::path::Path::new(relative),
        branch_id,
        &IngestConfig::default(),
        None,
        false,
    )
    .await
    .unwrap()
}

#[tokio::test]
async fn implicit_commit_records_two_distinct_versions() {
    let dir = tempfile::tempdir().unwrap();
    let metadata = MetadataStore::open_in_memory().await.unwrap();
    let objects = ObjectStore::open(dir.path().join("objects"), CompressionAlgorithm::Zlib).unwrap();

    save(&metadata, &objects, dir.path(), "hello.txt", b"A\n", "main").await;
    save(&metadata, &objects, dir.path(), "hello.txt", b"B\n", "main").await;

    let entries = metadata.log("hello.txt", "main", None).await.unwrap();
    assert_eq!(entries.len(), 2);
    assert_ne!(entries[0].version_hash, entries[1].version_hash);

    let newest = &entries[0];
    let oldest = &entries[1];
    assert_eq!(newest.blob_hash, ObjectHash::of(b"B\n").to_string());
    assert_eq!(oldest.blob_hash, ObjectHash::of(b"A\n").to_string());
    assert!(newest.timestamp >= oldest.timestamp);
}

#[tokio::test]
async fn dedup_shares_one_blob_across_paths() {
    let dir = tempfile::tempdir().unwrap();
    let metadata = MetadataStore::open_in_memory().await.unwrap();
    let objects = ObjectStore::open(dir.path().join("objects"), CompressionAlgorithm::Zlib).unwrap();

    let a = save(&metadata, &objects, dir.path(), "x.txt", b"hi", "main").await;
    let b = save(&metadata, &objects, dir.path(), "y.txt", b"hi", "main").await;

    let (IngestOutcome::Recorded { blob_hash: h1, .. }, IngestOutcome::Recorded { blob_hash: h2, .. }) = (a, b)
    else {
        panic!("expected both saves to record a version");
    };
    assert_eq!(h1, h2);
    assert_eq!(objects.iter_hashes().unwrap().len(), 1);
}

#[tokio::test]
async fn short_hash_resolves_to_the_same_version_as_the_full_hash() {
    let dir = tempfile::tempdir().unwrap();
    let metadata = MetadataStore::open_in_memory().await.unwrap();
    let objects = ObjectStore::open(dir.path().join("objects"), CompressionAlgorithm::Zlib).unwrap();

    save(&metadata, &objects, dir.path(), "hello.txt", b"A\n", "main").await;
    let second = save(&metadata, &objects, dir.path(), "hello.txt", b"B\n", "main").await;
    let IngestOutcome::Recorded { version_hash, .. } = second else { panic!("expected Recorded") };

    let full = version_hash.to_string();
    let short = &full[..6];
    let resolved = metadata.resolve_version_prefix(short).await.unwrap();
    assert_eq!(resolved.version_hash, full);
}

#[test]
fn checkout_through_facade_always_records_a_new_version() {
    let dir = tempfile::tempdir().unwrap();
    let root = dir.path().join("repo");
    let repo = Repository::init(&root).unwrap();
    repo.daemon_start().unwrap();

    std::fs::write(root.join("hello.txt"), b"A\n").unwrap();
    std::thread::sleep(std::time::Duration::from_millis(700));
    std::fs::write(root.join("hello.txt"), b"B\n").unwrap();
    std::thread::sleep(std::time::Duration::from_millis(700));

    let before = repo.log("hello.txt", None).unwrap();
    assert_eq!(before.len(), 2);
    let a_version = before.iter().find(|v| v.blob_hash == ObjectHash::of(b"A\n").to_string()).unwrap();
    let a_version_hash = a_version.version_hash.clone();

    repo.checkout(&a_version_hash, "hello.txt").unwrap();

    assert_eq!(std::fs::read(root.join("hello.txt")).unwrap(), b"A\n");
    let after = repo.log("hello.txt", None).unwrap();
    assert_eq!(after.len(), 3);
    assert_eq!(after[0].blob_hash, ObjectHash::of(b"A\n").to_string());
    assert!(after[0].annotation.as_deref().unwrap_or("").contains(&a_version_hash));

    repo.daemon_stop().unwrap();
}

#[test]
fn three_way_merge_disjoint_edits_combines_both_sides() {
    let base = b"1\n2\n3\n";
    let ours = b"1\n2a\n3\n";
    let theirs = b"1\n2\n3b\n";
    let result = merge(base, ours, theirs, MergePolicy::Auto, "windows-1252").unwrap();
    assert!(result.conflicts.is_empty());
    assert_eq!(result.content, "1\n2a\n3b\n");
}

#[test]
fn three_way_merge_conflict_under_each_policy() {
    let base = b"x\n";
    let ours = b"y\n";
    let theirs = b"z\n";

    let auto_err = merge(base, ours, theirs, MergePolicy::Auto, "windows-1252").unwrap_err();
    assert!(matches!(auto_err, chronolog::ChronologError::MergeConflict(_)));

    let ours_result = merge(base, ours, theirs, MergePolicy::Ours, "windows-1252").unwrap();
    assert_eq!(ours_result.content, "y\n");

    let theirs_result = merge(base, ours, theirs, MergePolicy::Theirs, "windows-1252").unwrap();
    assert_eq!(theirs_result.content, "z\n");

    let manual = merge(base, ours, theirs, MergePolicy::Manual, "windows-1252").unwrap();
    assert!(manual.content.contains("<<<<<<< ours\ny\n=======\nz\n>>>>>>> theirs\n"));
}
