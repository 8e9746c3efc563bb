//! Internal building blocks that power the public `Repository` façade: the content-addressed
//! object store, the metadata database, the ignore filter, the watcher/debounce/ingest
//! pipeline, the branch/tag ref manager, and the full-text search index.

pub mod ignore;
pub mod ingest;
pub mod metadata;
pub mod object;
pub mod refs;
pub mod search;
pub mod watcher;
