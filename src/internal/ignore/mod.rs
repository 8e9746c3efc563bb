//! The ignore filter (component C): a compiled, gitignore-semantics path matcher that gates
//! which paths the watcher may hand to ingest.
//!
//! Patterns are compiled in order (defaults, then the user's `.chronologignore`); later rules
//! override earlier ones, `!` re-includes, a trailing `/` means directory-only, `**` matches
//! any number of path components. The compiled form is swapped under a `RwLock` on pattern-file
//! change so in-flight watcher events observe either the whole old form or the whole new form,
//! never a torn view (§4.C).

use std::sync::{Arc, RwLock};

use regex::Regex;
use tracing::debug;

use crate::errors::{ChronologError, Result};

/// Default patterns baked into every repository, ahead of user rules: editor temp files, OS
/// metadata, and the repository's own metadata directory.
pub const DEFAULT_PATTERNS: &[&str] = &[
    ".chronolog/",
    ".chronologignore",
    "*~",
    "*.swp",
    "*.swo",
    "#*#",
    ".DS_Store",
    "Thumbs.db",
    "*.tmp",
];

#[derive(Clone, Debug)]
struct CompiledRule {
    regex: Regex,
    negated: bool,
    directory_only: bool,
    anchored: bool,
}

/// One gitignore-style pattern compiled to a regex, preserving negation/anchoring semantics.
fn compile_pattern(raw: &str) -> Result<CompiledRule> {
    let mut pattern = raw.trim_end().to_string();
    if pattern.is_empty() || pattern.starts_with('#') {
        return Err(ChronologError::InvalidPattern(raw.to_string(), "blank or comment".into()));
    }

    let negated = pattern.starts_with('!');
    if negated {
        pattern.remove(0);
    }

    let directory_only = pattern.ends_with('/');
    if directory_only {
        pattern.pop();
    }

    let anchored = pattern.starts_with('/');
    if anchored {
        pattern.remove(0);
    }

    let regex_str = glob_to_regex(&pattern, anchored);
    let regex = Regex::new(&regex_str)
        .map_err(|e| ChronologError::InvalidPattern(raw.to_string(), e.to_string()))?;

    Ok(CompiledRule { regex, negated, directory_only, anchored })
}

/// Translate one gitignore glob segment into an anchored regex matching a `/`-separated
/// relative path. `**` matches any number of path components (including zero); `*` matches
/// within one component; `?` matches one character; `[...]` is a standard character class.
fn glob_to_regex(glob: &str, anchored: bool) -> String {
    let mut out = String::from("^");
    if !anchored {
        // Unanchored patterns may match at any path component boundary.
        out.push_str("(?:.*/)?");
    }

    let chars: Vec<char> = glob.chars().collect();
    let mut i = 0;
    while i < chars.len() {
        match chars[i] {
            '*' => {
                if i + 1 < chars.len() && chars[i + 1] == '*' {
                    // `**` — any number of path components.
                    let followed_by_slash = i + 2 < chars.len() && chars[i + 2] == '/';
                    out.push_str(".*");
                    i += if followed_by_slash { 3 } else { 2 };
                    continue;
                } else {
                    out.push_str("[^/]*");
                }
            }
            '?' => out.push_str("[^/]"),
            '[' => {
                let close = glob[i..].find(']').map(|p| i + p);
                if let Some(close) = close {
                    out.push('[');
                    out.push_str(&glob[i + 1..close]);
                    out.push(']');
                    i = close + 1;
                    continue;
                } else {
                    out.push_str("\\[");
                }
            }
            c => {
                out.push_str(&regex::escape(&c.to_string()));
            }
        }
        i += 1;
    }
    out.push_str("(?:/.*)?$");
    out
}

/// A compiled, ordered list of ignore rules.
#[derive(Clone, Debug, Default)]
pub struct CompiledIgnore {
    rules: Vec<CompiledRule>,
}

impl CompiledIgnore {
    pub fn compile(raw_lines: &[String]) -> Result<CompiledIgnore> {
        let mut rules = Vec::new();
        for line in raw_lines {
            let trimmed = line.trim();
            if trimmed.is_empty() || trimmed.starts_with('#') {
                continue;
            }
            rules.push(compile_pattern(trimmed)?);
        }
        Ok(CompiledIgnore { rules })
    }

    /// Evaluate the rule list leaf-to-root (later rules override earlier ones): the last
    /// matching rule wins; `!` re-includes a path excluded by an earlier rule.
    pub fn is_ignored(&self, relative_path: &str, is_dir: bool) -> bool {
        let normalized = relative_path.replace('\\', "/");
        let mut ignored = false;
        for rule in &self.rules {
            if rule.directory_only && !is_dir {
                continue;
            }
            if rule.regex.is_match(&normalized) {
                ignored = !rule.negated;
            }
        }
        ignored
    }
}

/// Thread-safe, hot-swappable ignore filter. The compiled form is replaced atomically so no
/// watcher event can observe a torn mix of old and new rules.
#[derive(Clone)]
pub struct IgnoreFilter {
    inner: Arc<RwLock<CompiledIgnore>>,
}

impl IgnoreFilter {
    /// Build a filter from the default patterns plus the user's `.chronologignore` lines, in
    /// that order (user rules, including negations, can override defaults).
    pub fn new(user_lines: &[String]) -> Result<IgnoreFilter> {
        let mut all: Vec<String> = DEFAULT_PATTERNS.iter().map(|s| s.to_string()).collect();
        all.extend(user_lines.iter().cloned());
        let compiled = CompiledIgnore::compile(&all)?;
        Ok(IgnoreFilter { inner: Arc::new(RwLock::new(compiled)) })
    }

    pub fn is_ignored(&self, relative_path: &str, is_dir: bool) -> bool {
        self.inner
            .read()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .is_ignored(relative_path, is_dir)
    }

    /// Atomically swap in a freshly recompiled filter (§4.C, triggered when
    /// `.chronologignore` changes on disk).
    pub fn swap(&self, user_lines: &[String]) -> Result<()> {
        let mut all: Vec<String> = DEFAULT_PATTERNS.iter().map(|s| s.to_string()).collect();
        all.extend(user_lines.iter().cloned());
        let compiled = CompiledIgnore::compile(&all)?;
        debug!(rules = compiled.rules.len(), "ignore filter recompiled");
        *self.inner.write().unwrap_or_else(|poisoned| poisoned.into_inner()) = compiled;
        Ok(())
    }

    /// The raw user-supplied pattern lines last compiled, for persisting into
    /// `ignore_rules_snapshot` (§0.1 supplement).
    pub fn all_patterns(user_lines: &[String]) -> Vec<String> {
        let mut all: Vec<String> = DEFAULT_PATTERNS.iter().map(|s| s.to_string()).collect();
        all.extend(user_lines.iter().cloned());
        all
    }
}

/// Parse the textual contents of a `.chronologignore` file into pattern lines (comments and
/// blank lines are dropped here so callers don't need to special-case them downstream).
pub fn parse_ignore_file(contents: &str) -> Vec<String> {
    contents
        .lines()
        .map(|l| l.trim_end())
        .filter(|l| !l.is_empty() && !l.trim_start().starts_with('#'))
        .map(|l| l.to_string())
        .collect()
}
