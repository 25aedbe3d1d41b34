//! Replay-time file-name matching.
//!
//! A recording names the files that were edited; the live run edits files
//! whose layout need not mirror the recording run. These pure helpers map a
//! recorded name back onto a live candidate: exact base-name matches are
//! handled by the tracker, everything else falls back to the deterministic
//! similarity score below. Best-effort by design.

use std::path::{Path, PathBuf};

/// Marker inserted into stored edit names to disambiguate collisions
/// (`report.txt`, `report.txt__copy2`, ...). Live paths containing the
/// marker can never be matched.
pub const DISAMBIGUATION_MARKER: &str = "__copy";

/// Strip the disambiguation suffix from a recorded name, recovering the
/// original base name.
pub fn strip_disambiguation(name: &str) -> &str {
    match name.find(DISAMBIGUATION_MARKER) {
        Some(index) => &name[..index],
        None => name,
    }
}

/// Similarity between a recorded name and a live candidate name.
///
/// Score is the length of the common prefix plus the length of the common
/// suffix, each computed character by character until either string runs
/// out. Candidates carrying the disambiguation marker score -1 and cannot
/// win. Callers compare with strict greater-than, so the first-seen
/// candidate wins ties.
pub fn match_score(recorded: &str, candidate: &str) -> i64 {
    if candidate.contains(DISAMBIGUATION_MARKER) {
        return -1;
    }
    let recorded: Vec<char> = recorded.chars().collect();
    let candidate: Vec<char> = candidate.chars().collect();
    let limit = recorded.len().min(candidate.len());

    let mut prefix = 0;
    while prefix < limit && recorded[prefix] == candidate[prefix] {
        prefix += 1;
    }

    let mut suffix = 0;
    while suffix < limit
        && recorded[recorded.len() - 1 - suffix] == candidate[candidate.len() - 1 - suffix]
    {
        suffix += 1;
    }

    (prefix + suffix) as i64
}

/// Rewrite a bind-mount-style path prefix into native drive-letter form,
/// e.g. `/cygdrive/c/work/file.txt` into `c:/work/file.txt`. Paths without
/// the prefix pass through unchanged.
pub fn translate_mount_prefix(path: &Path) -> PathBuf {
    let text = path.to_string_lossy();
    if let Some(rest) = text.strip_prefix("/cygdrive/") {
        let mut parts = rest.splitn(2, '/');
        if let Some(letter) = parts
            .next()
            .filter(|l| l.len() == 1 && l.chars().all(|c| c.is_ascii_alphabetic()))
        {
            let tail = parts.next().unwrap_or("");
            return PathBuf::from(format!("{letter}:/{tail}"));
        }
    }
    path.to_path_buf()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn strips_disambiguation_suffix() {
        assert_eq!(strip_disambiguation("report.txt__copy2"), "report.txt");
        assert_eq!(strip_disambiguation("report.txt"), "report.txt");
        assert_eq!(strip_disambiguation("__copy3"), "");
    }

    #[test]
    fn score_adds_prefix_and_suffix_lengths() {
        // "report_a.txt" vs "report_b.txt": prefix "report_" (7), suffix ".txt" (4)
        assert_eq!(match_score("report_a.txt", "report_b.txt"), 11);
        // Identical names double-count: whole prefix plus whole suffix.
        assert_eq!(match_score("abc", "abc"), 6);
        assert_eq!(match_score("abc", "xyz"), 0);
    }

    #[test]
    fn score_stops_when_either_string_is_exhausted() {
        assert_eq!(match_score("ab", "abcdab"), 4);
        assert_eq!(match_score("", "anything"), 0);
    }

    #[test]
    fn marker_candidates_can_never_win() {
        assert_eq!(match_score("report.txt", "report.txt__copy2"), -1);
        assert!(match_score("report.txt", "unrelated") > -1);
    }

    #[test]
    fn deterministic_for_equal_inputs() {
        let a = match_score("results.log", "results_old.log");
        let b = match_score("results.log", "results_old.log");
        assert_eq!(a, b);
    }

    #[test]
    fn translates_cygdrive_prefixes() {
        assert_eq!(
            translate_mount_prefix(Path::new("/cygdrive/c/work/file.txt")),
            PathBuf::from("c:/work/file.txt")
        );
        assert_eq!(
            translate_mount_prefix(Path::new("/cygdrive/D/deep/nested")),
            PathBuf::from("D:/deep/nested")
        );
        // Not a drive letter: unchanged.
        assert_eq!(
            translate_mount_prefix(Path::new("/cygdrive/data/file")),
            PathBuf::from("/cygdrive/data/file")
        );
        assert_eq!(
            translate_mount_prefix(Path::new("/plain/unix/path")),
            PathBuf::from("/plain/unix/path")
        );
    }
}
