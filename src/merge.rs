//! Three-way line merge (component I).
//!
//! Computes `LCS(base, ours)` and `LCS(base, theirs)` with the same Myers engine the diff
//! module uses (`similar`), partitions the base line sequence into stable (unchanged-on-both-
//! sides) runs and changed chunks, then resolves each chunk per §4.I step 4: one side changed →
//! take it; both changed identically → take the common change; both changed differently → a
//! conflict region. Policies (`auto`/`ours`/`theirs`/`manual`) decide how conflicts are
//! resolved into final content (§4.I "Policies exposed").

use similar::{Algorithm, DiffOp, capture_diff_slices};

use crate::errors::{ChronologError, Result};
use crate::utils::decode_text_lossy;

/// A contiguous run of base lines where both sides diverged from the base incompatibly
/// (§4.I step 4, GLOSSARY "Conflict region").
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConflictRegion {
    /// 1-based inclusive first base line of the conflict.
    pub start_line: usize,
    /// 1-based inclusive last base line of the conflict (may equal `start_line - 1` for a
    /// pure-insertion conflict with no underlying base lines).
    pub end_line: usize,
    pub base_lines: Vec<String>,
    pub our_lines: Vec<String>,
    pub their_lines: Vec<String>,
}

/// Conflict resolution strategy (§4.I "Policies exposed").
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MergePolicy {
    /// Succeed only if no conflicts remain; otherwise an error (§7 `MergeConflict`).
    Auto,
    /// Take our lines in every conflict.
    Ours,
    /// Take their lines in every conflict.
    Theirs,
    /// Return annotated text with `<<<<<<< ours … ======= … >>>>>>> theirs` markers; never an
    /// error (§7: "not an error under manual policy").
    Manual,
}

/// Outcome of a three-way merge.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MergeResult {
    /// True iff no unresolved conflicts remain in `content`.
    pub success: bool,
    pub content: String,
    /// Conflicts detected before policy resolution; populated even under `ours`/`theirs`
    /// (which silently resolve them) so callers can audit what was overridden, and always
    /// populated under `manual`.
    pub conflicts: Vec<ConflictRegion>,
}

#[derive(Debug, Clone, Copy)]
struct Op {
    base_start: usize,
    base_end: usize,
    other_start: usize,
    other_end: usize,
    equal: bool,
}

fn diff_ops(base: &[&str], other: &[&str]) -> Vec<Op> {
    capture_diff_slices(Algorithm::Myers, base, other)
        .into_iter()
        .map(|op| match op {
            DiffOp::Equal { old_index, new_index, len } => Op {
                base_start: old_index,
                base_end: old_index + len,
                other_start: new_index,
                other_end: new_index + len,
                equal: true,
            },
            DiffOp::Delete { old_index, old_len, new_index } => Op {
                base_start: old_index,
                base_end: old_index + old_len,
                other_start: new_index,
                other_end: new_index,
                equal: false,
            },
            DiffOp::Insert { old_index, new_index, new_len } => Op {
                base_start: old_index,
                base_end: old_index,
                other_start: new_index,
                other_end: new_index + new_len,
                equal: false,
            },
            DiffOp::Replace { old_index, old_len, new_index, new_len } => Op {
                base_start: old_index,
                base_end: old_index + old_len,
                other_start: new_index,
                other_end: new_index + new_len,
                equal: false,
            },
        })
        .collect()
}

/// Render the `other` side's lines corresponding to the base sub-range `[s, e)`, by walking
/// `ops` and, for each op overlapping the range, copying its own lines verbatim (non-equal ops
/// are always fully contained in a chunk by construction — see [`merge_chunks`]) or a clipped
/// slice of base-identical lines (equal ops, which may straddle a chunk boundary).
fn render_side(ops: &[Op], other_lines: &[&str], s: usize, e: usize) -> Vec<String> {
    let mut out = Vec::new();
    for op in ops {
        let included = if op.base_start == op.base_end {
            op.base_start >= s && op.base_start <= e
        } else {
            op.base_start < e && op.base_end > s
        };
        if !included {
            continue;
        }
        if op.equal {
            let clip_start = op.base_start.max(s);
            let clip_end = op.base_end.min(e);
            if clip_end > clip_start {
                let off_start = op.other_start + (clip_start - op.base_start);
                let off_end = op.other_start + (clip_end - op.base_start);
                out.extend(other_lines[off_start..off_end].iter().map(|s| s.to_string()));
            }
        } else {
            out.extend(other_lines[op.other_start..op.other_end].iter().map(|s| s.to_string()));
        }
    }
    out
}

/// Union all non-equal spans from both op lists into disjoint, touching-merged `[start, end)`
/// base-line ranges. Zero-width ranges (pure insertions) merge into any range that touches
/// their anchor point, or stand alone as their own zero-width chunk.
fn merge_chunks(ours_ops: &[Op], theirs_ops: &[Op]) -> Vec<(usize, usize)> {
    let mut spans: Vec<(usize, usize)> = ours_ops
        .iter()
        .chain(theirs_ops.iter())
        .filter(|op| !op.equal)
        .map(|op| (op.base_start, op.base_end))
        .collect();
    if spans.is_empty() {
        return Vec::new();
    }
    spans.sort_by_key(|s| s.0);

    let mut merged: Vec<(usize, usize)> = Vec::new();
    for (start, end) in spans {
        if let Some(last) = merged.last_mut() {
            if start <= last.1 {
                last.1 = last.1.max(end);
                continue;
            }
        }
        merged.push((start, end));
    }
    merged
}

fn touches(ops: &[Op], s: usize, e: usize) -> bool {
    ops.iter().any(|op| {
        if op.equal {
            return false;
        }
        if op.base_start == op.base_end {
            op.base_start >= s && op.base_start <= e
        } else {
            op.base_start < e && op.base_end > s
        }
    })
}

/// The core three-way merge, before policy resolution: split the base text at stable anchors
/// and resolve/record each changed chunk (§4.I steps 1-5).
fn merge_lines(base_lines: &[&str], ours_lines: &[&str], theirs_lines: &[&str]) -> (Vec<String>, Vec<ConflictRegion>) {
    let ours_ops = diff_ops(base_lines, ours_lines);
    let theirs_ops = diff_ops(base_lines, theirs_lines);
    let chunks = merge_chunks(&ours_ops, &theirs_ops);

    let mut out_lines: Vec<String> = Vec::new();
    let mut conflicts = Vec::new();
    let mut cursor = 0usize;

    for (s, e) in chunks {
        if s > cursor {
            out_lines.extend(base_lines[cursor..s].iter().map(|l| l.to_string()));
        }

        let ours_touched = touches(&ours_ops, s, e);
        let theirs_touched = touches(&theirs_ops, s, e);
        let ours_render = render_side(&ours_ops, ours_lines, s, e);
        let theirs_render = render_side(&theirs_ops, theirs_lines, s, e);

        if ours_render == theirs_render {
            out_lines.extend(ours_render);
        } else if ours_touched && !theirs_touched {
            out_lines.extend(ours_render);
        } else if theirs_touched && !ours_touched {
            out_lines.extend(theirs_render);
        } else {
            conflicts.push(ConflictRegion {
                start_line: s + 1,
                end_line: e,
                base_lines: base_lines[s..e].iter().map(|l| l.to_string()).collect(),
                our_lines: ours_render.clone(),
                their_lines: theirs_render.clone(),
            });
            // Placeholder; replaced by policy resolution below. Auto/manual substitute later,
            // but `merge_lines` itself always emits the conflict markers so `manual` needs no
            // further pass.
            out_lines.push("<<<<<<< ours".to_string());
            out_lines.extend(ours_render);
            out_lines.push("=======".to_string());
            out_lines.extend(theirs_render);
            out_lines.push(">>>>>>> theirs".to_string());
        }

        cursor = e.max(cursor);
    }

    if cursor < base_lines.len() {
        out_lines.extend(base_lines[cursor..].iter().map(|l| l.to_string()));
    }

    (out_lines, conflicts)
}

/// Split `text` into lines without trailing-newline artefacts, also returning whether the
/// original text ended with `\n` (so the caller can preserve that on reassembly).
fn split_lines(text: &str) -> (Vec<&str>, bool) {
    if text.is_empty() {
        return (Vec::new(), false);
    }
    let ends_with_newline = text.ends_with('\n');
    let trimmed = if ends_with_newline { &text[..text.len() - 1] } else { text };
    (trimmed.split('\n').collect(), ends_with_newline)
}

fn join_lines(lines: &[String], trailing_newline: bool) -> String {
    let mut out = lines.join("\n");
    if trailing_newline && !lines.is_empty() {
        out.push('\n');
    }
    out
}

/// Re-run the merge with conflicts pre-resolved to one side, used by the `ours`/`theirs`
/// policies so the returned content carries no markers.
fn merge_lines_resolved(
    base_lines: &[&str],
    ours_lines: &[&str],
    theirs_lines: &[&str],
    prefer_ours: bool,
) -> (Vec<String>, Vec<ConflictRegion>) {
    let ours_ops = diff_ops(base_lines, ours_lines);
    let theirs_ops = diff_ops(base_lines, theirs_lines);
    let chunks = merge_chunks(&ours_ops, &theirs_ops);

    let mut out_lines: Vec<String> = Vec::new();
    let mut conflicts = Vec::new();
    let mut cursor = 0usize;

    for (s, e) in chunks {
        if s > cursor {
            out_lines.extend(base_lines[cursor..s].iter().map(|l| l.to_string()));
        }
        let ours_touched = touches(&ours_ops, s, e);
        let theirs_touched = touches(&theirs_ops, s, e);
        let ours_render = render_side(&ours_ops, ours_lines, s, e);
        let theirs_render = render_side(&theirs_ops, theirs_lines, s, e);

        if ours_render == theirs_render {
            out_lines.extend(ours_render);
        } else if ours_touched && !theirs_touched {
            out_lines.extend(ours_render);
        } else if theirs_touched && !ours_touched {
            out_lines.extend(theirs_render);
        } else {
            conflicts.push(ConflictRegion {
                start_line: s + 1,
                end_line: e,
                base_lines: base_lines[s..e].iter().map(|l| l.to_string()).collect(),
                our_lines: ours_render.clone(),
                their_lines: theirs_render.clone(),
            });
            out_lines.extend(if prefer_ours { ours_render } else { theirs_render });
        }
        cursor = e.max(cursor);
    }
    if cursor < base_lines.len() {
        out_lines.extend(base_lines[cursor..].iter().map(|l| l.to_string()));
    }
    (out_lines, conflicts)
}

/// Three-way merge of `base`/`ours`/`theirs` under `policy`, decoding each blob as text with
/// `fallback_encoding` lossy fallback (§4.I step 1). Returns `Err(MergeConflict)` only under
/// `MergePolicy::Auto` with unresolved conflicts (§7).
pub fn merge(
    base: &[u8],
    ours: &[u8],
    theirs: &[u8],
    policy: MergePolicy,
    fallback_encoding: &str,
) -> Result<MergeResult> {
    let base_text = decode_text_lossy(base, fallback_encoding);
    let ours_text = decode_text_lossy(ours, fallback_encoding);
    let theirs_text = decode_text_lossy(theirs, fallback_encoding);

    let (base_lines, _) = split_lines(&base_text);
    let (ours_lines, ours_nl) = split_lines(&ours_text);
    let (theirs_lines, theirs_nl) = split_lines(&theirs_text);
    let trailing_newline = ours_nl || theirs_nl || base_text.ends_with('\n');

    match policy {
        MergePolicy::Manual => {
            let (lines, conflicts) = merge_lines(&base_lines, &ours_lines, &theirs_lines);
            Ok(MergeResult {
                success: conflicts.is_empty(),
                content: join_lines(&lines, trailing_newline),
                conflicts,
            })
        }
        MergePolicy::Auto => {
            let (lines, conflicts) = merge_lines_resolved(&base_lines, &ours_lines, &theirs_lines, true);
            if !conflicts.is_empty() {
                return Err(ChronologError::MergeConflict(conflicts.len()));
            }
            Ok(MergeResult { success: true, content: join_lines(&lines, trailing_newline), conflicts })
        }
        MergePolicy::Ours => {
            let (lines, conflicts) = merge_lines_resolved(&base_lines, &ours_lines, &theirs_lines, true);
            Ok(MergeResult { success: true, content: join_lines(&lines, trailing_newline), conflicts })
        }
        MergePolicy::Theirs => {
            let (lines, conflicts) = merge_lines_resolved(&base_lines, &ours_lines, &theirs_lines, false);
            Ok(MergeResult { success: true, content: join_lines(&lines, trailing_newline), conflicts })
        }
    }
}

/// Strip `<<<<<<< ours … ======= … >>>>>>> theirs` markers from manually-merged text, keeping
/// the side named by `keep_ours` in each conflict block (§4.I "round-trips through a resolver
/// that strips markers according to chosen side").
pub fn resolve_markers(text: &str, keep_ours: bool) -> String {
    let mut out = String::with_capacity(text.len());
    let mut in_ours = false;
    let mut in_theirs = false;
    for line in text.split_inclusive('\n') {
        let trimmed = line.trim_end_matches('\n');
        if trimmed == "<<<<<<< ours" {
            in_ours = true;
            continue;
        }
        if trimmed == "=======" && in_ours {
            in_ours = false;
            in_theirs = true;
            continue;
        }
        if trimmed == ">>>>>>> theirs" && in_theirs {
            in_theirs = false;
            continue;
        }
        if (in_ours && keep_ours) || (in_theirs && !keep_ours) || (!in_ours && !in_theirs) {
            out.push_str(line);
        }
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn merge_ours_ours_auto_is_ours() {
        let base = b"1\n2\n3\n";
        let ours = b"1\n2a\n3\n";
        let result = merge(base, ours, ours, MergePolicy::Auto, "windows-1252").unwrap();
        assert_eq!(result.content, "1\n2a\n3\n");
        assert!(result.success);
    }

    #[test]
    fn merge_base_theirs_auto_is_theirs() {
        let base = b"1\n2\n3\n";
        let theirs = b"1\n2b\n3\n";
        let result = merge(base, base, theirs, MergePolicy::Auto, "windows-1252").unwrap();
        assert_eq!(result.content, "1\n2b\n3\n");
    }

    #[test]
    fn disjoint_edits_auto_merge_succeeds() {
        let base = b"1\n2\n3\n";
        let ours = b"1\n2a\n3\n";
        let theirs = b"1\n2\n3b\n";
        let result = merge(base, ours, theirs, MergePolicy::Auto, "windows-1252").unwrap();
        assert!(result.success);
        assert_eq!(result.content, "1\n2a\n3b\n");
        assert!(result.conflicts.is_empty());
    }

    #[test]
    fn overlapping_edits_auto_errors() {
        let base = b"x\n";
        let ours = b"y\n";
        let theirs = b"z\n";
        let err = merge(base, ours, theirs, MergePolicy::Auto, "windows-1252").unwrap_err();
        assert!(matches!(err, ChronologError::MergeConflict(1)));
    }

    #[test]
    fn overlapping_edits_ours_policy() {
        let base = b"x\n";
        let ours = b"y\n";
        let theirs = b"z\n";
        let result = merge(base, ours, theirs, MergePolicy::Ours, "windows-1252").unwrap();
        assert_eq!(result.content, "y\n");
        assert_eq!(result.conflicts.len(), 1);
    }

    #[test]
    fn overlapping_edits_theirs_policy() {
        let base = b"x\n";
        let ours = b"y\n";
        let theirs = b"z\n";
        let result = merge(base, ours, theirs, MergePolicy::Theirs, "windows-1252").unwrap();
        assert_eq!(result.content, "z\n");
    }

    #[test]
    fn overlapping_edits_manual_policy_has_markers() {
        let base = b"x\n";
        let ours = b"y\n";
        let theirs = b"z\n";
        let result = merge(base, ours, theirs, MergePolicy::Manual, "windows-1252").unwrap();
        assert!(!result.success);
        assert_eq!(result.content, "<<<<<<< ours\ny\n=======\nz\n>>>>>>> theirs\n");
        assert_eq!(result.conflicts.len(), 1);
    }

    #[test]
    fn resolve_markers_keeps_chosen_side() {
        let marked = "<<<<<<< ours\ny\n=======\nz\n>>>>>>> theirs\n";
        assert_eq!(resolve_markers(marked, true), "y\n");
        assert_eq!(resolve_markers(marked, false), "z\n");
    }

    #[test]
    fn identical_sides_produce_no_conflicts() {
        let base = b"a\nb\nc\n";
        let result = merge(base, base, base, MergePolicy::Auto, "windows-1252").unwrap();
        assert_eq!(result.content, "a\nb\nc\n");
        assert!(result.conflicts.is_empty());
    }
}
