//! The full-text search index (component H): tokenization, indexing, and querying with
//! regex/whole-word/recency/file-type/change-delta filters (§4.H).
//!
//! Index rows live in `search_terms` (durable, but derived — reproducible from `versions` +
//! blob content via [`reindex_all`]). Tokenization always lowercases (so the index itself is
//! case-insensitive); the `case_sensitive` query option and `regex` mode fall back to scanning
//! raw blob content directly rather than the precomputed token index, since case information
//! isn't retained once tokenized (documented open-question resolution, see `DESIGN.md`).

use ahash::AHashMap;
use regex::{Regex, RegexBuilder};
use similar::{Algorithm, ChangeTag, TextDiff};
use tracing::info;

use crate::errors::Result;
use crate::hash::ObjectHash;
use crate::internal::metadata::MetadataStore;
use crate::internal::metadata::entities::search_term;
use crate::internal::object::ObjectStore;
use crate::utils::looks_binary;

/// Split `text` on non-alphanumeric boundaries, lowercase each token, and record the 0-based
/// occurrence index of every position the token appears at (§4.H Tokenisation).
pub fn tokenize(text: &str) -> Vec<(String, Vec<usize>)> {
    let mut positions: AHashMap<String, Vec<usize>> = AHashMap::new();
    let mut index = 0usize;
    for word in text.split(|c: char| !c.is_alphanumeric()) {
        if word.is_empty() {
            continue;
        }
        positions.entry(word.to_lowercase()).or_default().push(index);
        index += 1;
    }
    positions.into_iter().collect()
}

/// Query options (§4.H "Query options").
#[derive(Debug, Clone)]
pub struct QueryOptions {
    pub regex: bool,
    pub whole_word: bool,
    pub case_sensitive: bool,
    /// Only match versions committed within this many days of now.
    pub recency_days: Option<i64>,
    /// Glob restricting matches to files whose path matches (e.g. `*.rs`).
    pub file_glob: Option<String>,
    pub max_results: Option<usize>,
    /// Restrict to lines added by the matching version relative to its parent.
    pub added: bool,
    /// Restrict to lines removed by the matching version relative to its parent.
    pub removed: bool,
}

impl Default for QueryOptions {
    fn default() -> Self {
        QueryOptions {
            regex: false,
            whole_word: false,
            case_sensitive: false,
            recency_days: None,
            file_glob: None,
            max_results: None,
            added: false,
            removed: false,
        }
    }
}

/// One ranked search result. `matched_text` is the matching token for plain/whole-word/regex
/// queries, or the full matching line for `--added`/`--removed` change queries.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SearchHit {
    pub version_hash: String,
    pub file_path: String,
    pub timestamp: i64,
    pub matched_text: String,
}

/// Translate a simple file-type glob (`*.rs`, `config.*`) into an anchored regex. Only `*` and
/// `?` are supported; this is deliberately smaller than the ignore filter's grammar since it
/// matches a single path component's worth of use (§4.H "file-type glob").
fn glob_to_anchored_regex(glob: &str) -> Result<Regex> {
    let mut pattern = String::from("(?i)^");
    for c in glob.chars() {
        match c {
            '*' => pattern.push_str(".*"),
            '?' => pattern.push('.'),
            other => pattern.push_str(&regex::escape(&other.to_string())),
        }
    }
    pattern.push('$');
    Regex::new(&pattern).map_err(|e| {
        crate::errors::ChronologError::InvalidPattern(glob.to_string(), e.to_string())
    })
}

fn passes_file_glob(file_path: &str, glob: &Option<String>) -> Result<bool> {
    match glob {
        None => Ok(true),
        Some(g) => {
            let file_name = file_path.rsplit('/').next().unwrap_or(file_path);
            Ok(glob_to_anchored_regex(g)?.is_match(file_name))
        }
    }
}

fn passes_recency(timestamp: i64, recency_days: Option<i64>) -> bool {
    match recency_days {
        None => true,
        Some(days) => {
            let now = crate::utils::now_millis();
            let window_ms = days.max(0) * 24 * 60 * 60 * 1000;
            now.saturating_sub(timestamp) <= window_ms
        }
    }
}

/// Index the terms for a single already-committed version, reading its blob from the object
/// store. Used by [`reindex_all`]; the ingest pipeline inlines an equivalent step itself since
/// it also needs to evict the *previous* version's terms in the same transaction (§4.E step 5).
pub async fn index_version(metadata: &MetadataStore, objects: &ObjectStore, version_hash: &str) -> Result<()> {
    let version = metadata
        .version_by_hash(version_hash)
        .await?
        .ok_or_else(|| crate::errors::ChronologError::HashUnknown(version_hash.to_string()))?;
    let blob_hash: ObjectHash = version.blob_hash.parse().map_err(|e| {
        crate::errors::ChronologError::CorruptedBlob(format!("unparsable blob_hash: {e}"))
    })?;
    let bytes = objects.get(&blob_hash)?;
    let prefix_len = bytes.len().min(8192);
    if looks_binary(&bytes[..prefix_len]) {
        return Ok(());
    }
    let text = String::from_utf8_lossy(&bytes);
    let tokens = tokenize(&text);
    let rows = tokens
        .into_iter()
        .map(|(token, positions)| search_term::Model {
            id: 0,
            version_hash: version_hash.to_string(),
            file_path: version.file_path.clone(),
            token,
            positions: positions.iter().map(|p| p.to_string()).collect::<Vec<_>>().join(","),
        })
        .collect();
    let conn = metadata.connection();
    metadata.remove_search_terms_for_version(conn, version_hash).await?;
    metadata.insert_search_terms(conn, rows).await?;
    Ok(())
}

/// Remove every term attributed to `version_hash`, used when a version is superseded.
pub async fn remove_version(metadata: &MetadataStore, version_hash: &str) -> Result<()> {
    let conn = metadata.connection();
    metadata.remove_search_terms_for_version(conn, version_hash).await
}

/// Drop the entire `search_terms` table and rebuild it from `versions` + blob content in
/// timestamp order (§4.H Reindex). Tokenization of each version's bytes is CPU-bound and
/// independent per version, so it runs over `rayon`'s global pool; inserts remain sequential
/// against the single metadata writer.
pub async fn reindex_all(metadata: &MetadataStore, objects: &ObjectStore) -> Result<u64> {
    use rayon::prelude::*;

    metadata.drop_all_search_terms().await?;
    let versions = metadata.all_versions_in_order().await?;
    info!(count = versions.len(), "reindex: tokenizing versions");

    let loaded: Vec<(String, String, Vec<u8>)> = versions
        .into_iter()
        .filter_map(|v| {
            let hash: ObjectHash = v.blob_hash.parse().ok()?;
            let bytes = objects.get(&hash).ok()?;
            Some((v.version_hash, v.file_path, bytes))
        })
        .collect();

    let per_version_rows: Vec<Vec<search_term::Model>> = loaded
        .par_iter()
        .map(|(version_hash, file_path, bytes)| {
            let prefix_len = bytes.len().min(8192);
            if looks_binary(&bytes[..prefix_len]) {
                return Vec::new();
            }
            let text = String::from_utf8_lossy(bytes);
            tokenize(&text)
                .into_iter()
                .map(|(token, positions)| search_term::Model {
                    id: 0,
                    version_hash: version_hash.clone(),
                    file_path: file_path.clone(),
                    token,
                    positions: positions.iter().map(|p| p.to_string()).collect::<Vec<_>>().join(","),
                })
                .collect()
        })
        .collect();

    let conn = metadata.connection();
    for rows in per_version_rows {
        metadata.insert_search_terms(conn, rows).await?;
    }

    let count = metadata.search_term_count().await?;
    info!(terms = count, "reindex complete");
    Ok(count)
}

/// Build the plain/whole-word matcher: substring match if `whole_word` is false, exact token
/// match otherwise. Both operate case-insensitively against the already-lowercased token index.
fn token_matches(token: &str, query_lower: &str, whole_word: bool) -> bool {
    if whole_word {
        token == query_lower
    } else {
        token.contains(query_lower)
    }
}

/// `query(q, opts)` (§4.H, §6). Plain/whole-word queries run against the precomputed token
/// index; `regex` or `case_sensitive` queries fall back to scanning each candidate version's
/// raw blob content. `--added`/`--removed` bypass both and search the line-level delta against
/// the matching version's parent instead (§4.H "Change queries").
pub async fn query(
    metadata: &MetadataStore,
    objects: &ObjectStore,
    q: &str,
    opts: &QueryOptions,
) -> Result<Vec<SearchHit>> {
    if opts.added || opts.removed {
        return query_change(metadata, objects, q, opts).await;
    }

    let mut hits = if opts.regex || opts.case_sensitive {
        query_raw_scan(metadata, objects, q, opts).await?
    } else {
        query_token_index(metadata, q, opts).await?
    };

    hits.sort_by(|a, b| b.timestamp.cmp(&a.timestamp));
    if let Some(max) = opts.max_results {
        hits.truncate(max);
    }
    Ok(hits)
}

async fn query_token_index(metadata: &MetadataStore, q: &str, opts: &QueryOptions) -> Result<Vec<SearchHit>> {
    let query_lower = q.to_lowercase();
    let rows = metadata.all_search_terms().await?;
    let mut by_version: AHashMap<String, (String, String)> = AHashMap::new();
    for row in &rows {
        if token_matches(&row.token, &query_lower, opts.whole_word) {
            by_version
                .entry(row.version_hash.clone())
                .or_insert_with(|| (row.file_path.clone(), row.token.clone()));
        }
    }

    let mut hits = Vec::new();
    for (version_hash, (file_path, token)) in by_version {
        let Some(version) = metadata.version_by_hash(&version_hash).await? else { continue };
        if !passes_recency(version.timestamp, opts.recency_days) {
            continue;
        }
        if !passes_file_glob(&file_path, &opts.file_glob)? {
            continue;
        }
        hits.push(SearchHit { version_hash, file_path, timestamp: version.timestamp, matched_text: token });
    }
    Ok(hits)
}

async fn query_raw_scan(
    metadata: &MetadataStore,
    objects: &ObjectStore,
    q: &str,
    opts: &QueryOptions,
) -> Result<Vec<SearchHit>> {
    let matcher: Box<dyn Fn(&str) -> bool> = if opts.regex {
        let re = RegexBuilder::new(q)
            .case_insensitive(!opts.case_sensitive)
            .build()
            .map_err(|e| crate::errors::ChronologError::InvalidPattern(q.to_string(), e.to_string()))?;
        Box::new(move |text: &str| re.is_match(text))
    } else {
        let query = q.to_string();
        Box::new(move |text: &str| text.contains(query.as_str()))
    };

    let mut hits = Vec::new();
    for version in metadata.all_versions_in_order().await? {
        if !passes_recency(version.timestamp, opts.recency_days) {
            continue;
        }
        if !passes_file_glob(&version.file_path, &opts.file_glob)? {
            continue;
        }
        let Ok(hash) = version.blob_hash.parse::<ObjectHash>() else { continue };
        let Ok(bytes) = objects.get(&hash) else { continue };
        let prefix_len = bytes.len().min(8192);
        if looks_binary(&bytes[..prefix_len]) {
            continue;
        }
        let text = String::from_utf8_lossy(&bytes);
        if matcher(&text) {
            hits.push(SearchHit {
                version_hash: version.version_hash,
                file_path: version.file_path,
                timestamp: version.timestamp,
                matched_text: q.to_string(),
            });
        }
    }
    Ok(hits)
}

async fn query_change(
    metadata: &MetadataStore,
    objects: &ObjectStore,
    q: &str,
    opts: &QueryOptions,
) -> Result<Vec<SearchHit>> {
    let query_lower = q.to_lowercase();
    let line_matches = |line: &str| -> bool {
        if opts.case_sensitive {
            line.contains(q)
        } else {
            line.to_lowercase().contains(&query_lower)
        }
    };

    let mut hits = Vec::new();
    for version in metadata.all_versions_in_order().await? {
        if !passes_recency(version.timestamp, opts.recency_days) {
            continue;
        }
        if !passes_file_glob(&version.file_path, &opts.file_glob)? {
            continue;
        }
        let Some(parent_hash) = &version.parent_version_hash else { continue };
        let Some(parent) = metadata.version_by_hash(parent_hash).await? else { continue };

        let (Ok(cur_hash), Ok(par_hash)) =
            (version.blob_hash.parse::<ObjectHash>(), parent.blob_hash.parse::<ObjectHash>())
        else {
            continue;
        };
        let (Ok(cur_bytes), Ok(par_bytes)) = (objects.get(&cur_hash), objects.get(&par_hash)) else {
            continue;
        };
        if looks_binary(&cur_bytes[..cur_bytes.len().min(8192)])
            || looks_binary(&par_bytes[..par_bytes.len().min(8192)])
        {
            continue;
        }

        let old_text = String::from_utf8_lossy(&par_bytes).into_owned();
        let new_text = String::from_utf8_lossy(&cur_bytes).into_owned();
        let diff = TextDiff::configure().algorithm(Algorithm::Myers).diff_lines(&old_text, &new_text);

        for change in diff.iter_all_changes() {
            let matches_sign = (opts.added && change.tag() == ChangeTag::Insert)
                || (opts.removed && change.tag() == ChangeTag::Delete);
            if !matches_sign {
                continue;
            }
            let line = change.value().trim_end_matches(['\r', '\n']);
            if line_matches(line) {
                hits.push(SearchHit {
                    version_hash: version.version_hash.clone(),
                    file_path: version.file_path.clone(),
                    timestamp: version.timestamp,
                    matched_text: line.to_string(),
                });
            }
        }
    }

    hits.sort_by(|a, b| b.timestamp.cmp(&a.timestamp));
    if let Some(max) = opts.max_results {
        hits.truncate(max);
    }
    Ok(hits)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::internal::object::CompressionAlgorithm;

    #[test]
    fn tokenize_splits_and_lowercases() {
        let tokens = tokenize("Hello, World! Hello again.");
        let hello = tokens.iter().find(|(t, _)| t == "hello").unwrap();
        assert_eq!(hello.1.len(), 2);
    }

    async fn setup() -> (tempfile::TempDir, MetadataStore, ObjectStore) {
        let dir = tempfile::tempdir().unwrap();
        let metadata = MetadataStore::open_in_memory().await.unwrap();
        let objects = ObjectStore::open(dir.path().join("objects"), CompressionAlgorithm::Zlib).unwrap();
        (dir, metadata, objects)
    }

    #[tokio::test]
    async fn reindex_then_query_matches_inline_index() {
        let (dir, metadata, objects) = setup().await;
        std::fs::write(dir.path().join("a.txt"), b"alpha beta gamma").unwrap();
        crate::internal::ingest::ingest(
            &metadata,
            &objects,
            dir.path(),
            std::path::Path::new("a.txt"),
            "main",
            &crate::config::IngestConfig::default(),
            None,
            false,
        )
        .await
        .unwrap();

        let before = query(&metadata, &objects, "beta", &QueryOptions::default()).await.unwrap();
        assert_eq!(before.len(), 1);

        reindex_all(&metadata, &objects).await.unwrap();
        let after = query(&metadata, &objects, "beta", &QueryOptions::default()).await.unwrap();
        assert_eq!(after.len(), 1);
        assert_eq!(before[0].version_hash, after[0].version_hash);
    }

    #[tokio::test]
    async fn whole_word_excludes_partial_matches() {
        let (dir, metadata, objects) = setup().await;
        std::fs::write(dir.path().join("a.txt"), b"cat category").unwrap();
        crate::internal::ingest::ingest(
            &metadata,
            &objects,
            dir.path(),
            std::path::Path::new("a.txt"),
            "main",
            &crate::config::IngestConfig::default(),
            None,
            false,
        )
        .await
        .unwrap();

        let mut opts = QueryOptions::default();
        opts.whole_word = true;
        let hits = query(&metadata, &objects, "cat", &opts).await.unwrap();
        assert_eq!(hits.len(), 1);
        assert_eq!(hits[0].matched_text, "cat");
    }

    #[tokio::test]
    async fn file_glob_filters_by_extension() {
        let (dir, metadata, objects) = setup().await;
        std::fs::write(dir.path().join("a.rs"), b"needle").unwrap();
        std::fs::write(dir.path().join("b.txt"), b"needle").unwrap();
        for name in ["a.rs", "b.txt"] {
            crate::internal::ingest::ingest(
                &metadata,
                &objects,
                dir.path(),
                std::path::Path::new(name),
                "main",
                &crate::config::IngestConfig::default(),
                None,
                false,
            )
            .await
            .unwrap();
        }
        let mut opts = QueryOptions::default();
        opts.file_glob = Some("*.rs".to_string());
        let hits = query(&metadata, &objects, "needle", &opts).await.unwrap();
        assert_eq!(hits.len(), 1);
        assert_eq!(hits[0].file_path, "a.rs");
    }

    #[tokio::test]
    async fn added_filter_finds_inserted_lines_only() {
        let (dir, metadata, objects) = setup().await;
        std::fs::write(dir.path().join("a.txt"), b"one\ntwo\n").unwrap();
        crate::internal::ingest::ingest(
            &metadata,
            &objects,
            dir.path(),
            std::path::Path::new("a.txt"),
            "main",
            &crate::config::IngestConfig::default(),
            None,
            false,
        )
        .await
        .unwrap();
        std::fs::write(dir.path().join("a.txt"), b"one\ntwo\nthree\n").unwrap();
        crate::internal::ingest::ingest(
            &metadata,
            &objects,
            dir.path(),
            std::path::Path::new("a.txt"),
            "main",
            &crate::config::IngestConfig::default(),
            None,
            false,
        )
        .await
        .unwrap();

        let mut opts = QueryOptions::default();
        opts.added = true;
        let hits = query(&metadata, &objects, "three", &opts).await.unwrap();
        assert_eq!(hits.len(), 1);
        assert_eq!(hits[0].matched_text, "three");
    }
}
