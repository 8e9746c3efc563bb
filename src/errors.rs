//! Error taxonomy for the Chronolog engine.
//!
//! Variants are grouped by the buckets in the design spec's error taxonomy
//! (user input, repository state, I/O, merge conflicts, transient) so callers can match on
//! `ChronologError` kind without inspecting message text. `thiserror` drives `Display`/`Error`
//! plumbing and source chaining.

use thiserror::Error;

#[derive(Error, Debug)]
pub enum ChronologError {
    // --- UserInputError ---
    /// A short hash matched more than one stored hash.
    #[error("hash prefix `{0}` is ambiguous")]
    HashAmbiguous(String),

    /// No stored hash starts with the given prefix.
    #[error("no object matches hash `{0}`")]
    HashUnknown(String),

    /// The path has no `FileHead` on the given branch.
    #[error("path `{0}` is not tracked")]
    NotTracked(String),

    /// A glob or regex pattern failed to parse.
    #[error("invalid pattern `{0}`: {1}")]
    InvalidPattern(String, String),

    /// A branch/tag name failed validation (empty, contains path separators, etc).
    #[error("invalid name `{0}`: {1}")]
    InvalidName(String, String),

    /// `branch_delete` called on the current HEAD branch.
    #[error("cannot delete the current HEAD branch `{0}`")]
    IsHead(String),

    /// Creating a branch/tag whose name already exists.
    #[error("`{0}` already exists")]
    Exists(String),

    /// Referencing a branch/tag that does not exist.
    #[error("`{0}` does not exist")]
    Missing(String),

    /// `diff`/`merge` invoked on binary content.
    #[error("cannot diff binary content at `{0}`")]
    Binary(String),

    // --- StateError ---
    /// `open` called on a directory with no `.chronolog` metadata.
    #[error("not a chronolog repository: {0}")]
    NotARepository(String),

    /// `init` called on a directory that already has `.chronolog`.
    #[error("already a chronolog repository: {0}")]
    AlreadyInitialized(String),

    /// The on-disk schema version is newer than this binary understands.
    #[error("repository schema version {found} is newer than supported version {supported}")]
    SchemaTooNew { found: i32, supported: i32 },

    /// A blob's computed hash does not match its filename; quarantined rather than deleted.
    #[error("corrupted blob at `{0}`: hash mismatch")]
    CorruptedBlob(String),

    // --- IOError ---
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("file watcher registration failed: {0}")]
    WatcherError(String),

    // --- MergeConflict ---
    /// Raised only under the `auto` merge policy when conflicts remain.
    #[error("merge produced {0} unresolved conflict(s)")]
    MergeConflict(usize),

    // --- Transient ---
    /// The metadata store is locked by the single writer; retry with backoff.
    #[error("metadata store is locked, retry later")]
    StoreLocked,

    /// A read was interrupted before completion (e.g. concurrent truncation).
    #[error("read interrupted: {0}")]
    Interrupted(String),

    // --- Store-layer plumbing ---
    #[error("metadata store error: {0}")]
    Database(#[from] sea_orm::DbErr),

    #[error("serialization error: {0}")]
    Serde(#[from] serde_json::Error),

    #[error("{0}")]
    Custom(String),
}

pub type Result<T> = std::result::Result<T, ChronologError>;
