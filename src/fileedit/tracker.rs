//! File-edit tracking: which filesystem locations a traffic item may
//! mutate, what state they were last seen in, and what changed since.
//!
//! Traffic items report top-level paths they might edit. The tracker keeps
//! those paths most-recently-touched first, snapshots every file and
//! symlinked subdirectory underneath them, and later diffs the live tree
//! against the snapshot. A vanished subtree collapses into one removal
//! entry naming the highest still-nonexistent ancestor.
//!
//! Tracking state is reset after each top-level interaction unless that
//! interaction produced an asynchronous edit; then it persists, sticky,
//! until a non-asynchronous interaction completes.

use std::collections::{HashMap, HashSet};
use std::path::{Path, PathBuf};
use std::time::SystemTime;

use tracing::{debug, trace};
use walkdir::WalkDir;

use super::matcher::{match_score, strip_disambiguation, translate_mount_prefix};

/// Last observed state of one tracked path.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FileStamp {
    pub mtime: SystemTime,
    pub size: u64,
}

/// Changes detected under one top-level path.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EditSet {
    pub root: PathBuf,
    /// Changed or newly created paths.
    pub changed: Vec<PathBuf>,
    /// Collapsed removals, with whether the removed entity was a directory.
    pub removed: Vec<(PathBuf, bool)>,
}

pub struct EditTracker {
    ignore_dirs: Vec<String>,
    /// Top-level paths, most recently touched first, no duplicates.
    top_level: Vec<PathBuf>,
    /// Every path found under a top-level path, with its last seen stamp.
    snapshots: HashMap<PathBuf, FileStamp>,
    /// Top-level entries already claimed by an exact match this round.
    consumed: HashSet<PathBuf>,
    /// Sticky: set by any asynchronous edit since the last reset.
    asynchronous: bool,
}

impl EditTracker {
    pub fn new(ignore_dirs: Vec<String>) -> Self {
        Self {
            ignore_dirs,
            top_level: Vec::new(),
            snapshots: HashMap::new(),
            consumed: HashSet::new(),
            asynchronous: false,
        }
    }

    /// Register paths a traffic item reports it might edit.
    ///
    /// Each path moves to the front of the tracked list; re-adding collapses
    /// the duplicate. With `snapshot` false (pure full replay, where on-disk
    /// timestamps are meaningless) no filesystem state is captured.
    pub fn register(&mut self, paths: Vec<PathBuf>, snapshot: bool) {
        for path in paths {
            self.top_level.retain(|existing| *existing != path);
            self.top_level.insert(0, path.clone());
            if snapshot {
                for (found, stamp) in self.walk(&path) {
                    self.snapshots.insert(found, stamp);
                }
            }
        }
        trace!(tracked = self.top_level.len(), "edit paths registered");
    }

    /// Diff every tracked root against its snapshot, in recency order.
    ///
    /// Returns one [`EditSet`] per root with any difference. Snapshots are
    /// refreshed and stale entries purged, so calling this again without
    /// intervening edits reports nothing.
    pub fn latest_edits(&mut self) -> Vec<EditSet> {
        let roots = self.top_level.clone();
        let mut sets = Vec::new();

        for root in roots {
            let current: HashMap<PathBuf, FileStamp> = self.walk(&root).into_iter().collect();

            let mut changed: Vec<PathBuf> = Vec::new();
            for (path, stamp) in &current {
                if self.snapshots.get(path) != Some(stamp) {
                    changed.push(path.clone());
                }
            }
            changed.sort();

            let mut removed_entities: Vec<(PathBuf, bool)> = Vec::new();
            let mut seen = HashSet::new();
            for missing in self.snapshots.keys() {
                if !missing.starts_with(&root) || current.contains_key(missing) {
                    continue;
                }
                let entity = collapse_removal(&root, missing);
                if seen.insert(entity.clone()) {
                    let was_dir = self
                        .snapshots
                        .keys()
                        .any(|path| path != &entity && path.starts_with(&entity));
                    removed_entities.push((entity, was_dir));
                }
            }
            removed_entities.sort();

            if changed.is_empty() && removed_entities.is_empty() {
                continue;
            }

            debug!(
                root = %root.display(),
                changed = changed.len(),
                removed = removed_entities.len(),
                "file edits detected"
            );

            // Refresh: drop stale entries under this root, keep the live tree.
            self.snapshots.retain(|path, _| !path.starts_with(&root));
            self.snapshots.extend(current);

            sets.push(EditSet {
                root,
                changed,
                removed: removed_entities,
            });
        }
        sets
    }

    /// Map a recorded file name onto the live path currently being edited.
    ///
    /// Scans tracked paths front to back. Candidates whose on-disk kind
    /// contradicts `expect_dir` are skipped. The first unconsumed exact
    /// base-name match wins immediately and is marked consumed; otherwise
    /// the single best similarity score wins, first-seen taking ties.
    pub fn file_being_edited(&mut self, recorded: &str, expect_dir: bool) -> Option<PathBuf> {
        let wanted = strip_disambiguation(recorded);
        let mut best: Option<(i64, PathBuf)> = None;

        for path in &self.top_level {
            if path.is_dir() != expect_dir {
                continue;
            }
            let Some(name) = path.file_name() else {
                continue;
            };
            let name = name.to_string_lossy();

            if name == wanted && !self.consumed.contains(path) {
                let winner = path.clone();
                self.consumed.insert(winner.clone());
                trace!(recorded, path = %winner.display(), "exact edit match");
                return Some(translate_mount_prefix(&winner));
            }

            let score = match_score(wanted, &name);
            if best.as_ref().is_none_or(|(top, _)| score > *top) {
                best = Some((score, path.clone()));
            }
        }

        best.filter(|(score, _)| *score >= 0).map(|(score, path)| {
            trace!(recorded, path = %path.display(), score, "fuzzy edit match");
            translate_mount_prefix(&path)
        })
    }

    pub fn mark_asynchronous(&mut self) {
        self.asynchronous = true;
    }

    pub fn is_asynchronous(&self) -> bool {
        self.asynchronous
    }

    /// Stop treating the pending edit as asynchronous without dropping the
    /// tracked state.
    pub fn clear_asynchronous(&mut self) {
        self.asynchronous = false;
    }

    /// Clear all tracking state, including the asynchronous flag.
    pub fn reset(&mut self) {
        self.top_level.clear();
        self.snapshots.clear();
        self.consumed.clear();
        self.asynchronous = false;
    }

    pub fn is_empty(&self) -> bool {
        self.top_level.is_empty() && self.snapshots.is_empty()
    }

    pub fn tracked_paths(&self) -> &[PathBuf] {
        &self.top_level
    }

    /// Enumerate every file and symlinked subdirectory under `root`.
    ///
    /// Plain directories are recursed into but not stamped themselves;
    /// symlinks are stamped as leaves and never followed. Ignored directory
    /// names are pruned together with their contents. A path that vanishes
    /// mid-walk is simply absent from the result.
    fn walk(&self, root: &Path) -> Vec<(PathBuf, FileStamp)> {
        let mut found = Vec::new();
        let walker = WalkDir::new(root).follow_links(false).into_iter();
        for entry in walker.filter_entry(|entry| {
            !(entry.file_type().is_dir()
                && entry
                    .file_name()
                    .to_str()
                    .is_some_and(|name| self.ignore_dirs.iter().any(|ignored| ignored == name)))
        }) {
            let Ok(entry) = entry else {
                continue;
            };
            let file_type = entry.file_type();
            if !file_type.is_file() && !file_type.is_symlink() {
                continue;
            }
            let Ok(metadata) = entry.metadata() else {
                continue;
            };
            let stamp = FileStamp {
                mtime: metadata.modified().unwrap_or(SystemTime::UNIX_EPOCH),
                size: metadata.len(),
            };
            found.push((entry.into_path(), stamp));
        }
        found
    }
}

/// Walk up from a missing path to the highest ancestor that also no longer
/// exists, staying at or below `root`.
fn collapse_removal(root: &Path, missing: &Path) -> PathBuf {
    let mut entity = missing.to_path_buf();
    while entity != root {
        match entity.parent() {
            Some(parent) if parent.starts_with(root) && !parent.exists() => {
                entity = parent.to_path_buf();
            }
            _ => break,
        }
    }
    entity
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;

    fn tracker() -> EditTracker {
        EditTracker::new(vec![".git".to_string()])
    }

    fn touch(path: &Path, content: &str) {
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent).unwrap();
        }
        fs::write(path, content).unwrap();
    }

    #[test]
    fn registration_is_recency_ordered_and_deduplicated() {
        let mut tracker = tracker();
        tracker.register(vec![PathBuf::from("/a"), PathBuf::from("/b")], false);
        tracker.register(vec![PathBuf::from("/a")], false);

        assert_eq!(
            tracker.tracked_paths(),
            &[PathBuf::from("/a"), PathBuf::from("/b")]
        );
    }

    #[test]
    fn unchanged_tree_reports_nothing() {
        let dir = tempfile::tempdir().unwrap();
        touch(&dir.path().join("a.txt"), "hello");

        let mut tracker = tracker();
        tracker.register(vec![dir.path().to_path_buf()], true);
        assert!(tracker.latest_edits().is_empty());
    }

    #[test]
    fn grown_file_and_deleted_subtree_yield_two_entries() {
        let dir = tempfile::tempdir().unwrap();
        let root = dir.path().join("report");
        touch(&root.join("a.txt"), "0123456789");
        touch(&root.join("sub/b.txt"), "b");

        let mut tracker = tracker();
        tracker.register(vec![root.clone()], true);

        touch(&root.join("a.txt"), "01234567890123456789");
        fs::remove_dir_all(root.join("sub")).unwrap();

        let sets = tracker.latest_edits();
        assert_eq!(sets.len(), 1);
        assert_eq!(sets[0].root, root);
        assert_eq!(sets[0].changed, vec![root.join("a.txt")]);
        assert_eq!(sets[0].removed, vec![(root.join("sub"), true)]);

        // Stale snapshot entries were purged: nothing further to report.
        assert!(tracker.latest_edits().is_empty());
    }

    #[test]
    fn deep_subtree_removal_collapses_to_one_entry() {
        let dir = tempfile::tempdir().unwrap();
        let root = dir.path().join("work");
        touch(&root.join("keep.txt"), "keep");
        touch(&root.join("gone/one.txt"), "1");
        touch(&root.join("gone/nested/two.txt"), "2");
        touch(&root.join("gone/nested/deeper/three.txt"), "3");

        let mut tracker = tracker();
        tracker.register(vec![root.clone()], true);
        fs::remove_dir_all(root.join("gone")).unwrap();

        let sets = tracker.latest_edits();
        assert_eq!(sets.len(), 1);
        assert!(sets[0].changed.is_empty());
        assert_eq!(sets[0].removed, vec![(root.join("gone"), true)]);
    }

    #[test]
    fn removed_single_file_is_not_a_directory() {
        let dir = tempfile::tempdir().unwrap();
        let root = dir.path().join("work");
        touch(&root.join("a.txt"), "a");
        touch(&root.join("b.txt"), "b");

        let mut tracker = tracker();
        tracker.register(vec![root.clone()], true);
        fs::remove_file(root.join("a.txt")).unwrap();

        let sets = tracker.latest_edits();
        assert_eq!(sets[0].removed, vec![(root.join("a.txt"), false)]);
    }

    #[test]
    fn new_files_count_as_changes() {
        let dir = tempfile::tempdir().unwrap();
        let root = dir.path().to_path_buf();

        let mut tracker = tracker();
        tracker.register(vec![root.clone()], true);
        touch(&root.join("fresh.txt"), "new");

        let sets = tracker.latest_edits();
        assert_eq!(sets[0].changed, vec![root.join("fresh.txt")]);
    }

    #[test]
    fn ignored_directories_are_pruned() {
        let dir = tempfile::tempdir().unwrap();
        let root = dir.path().to_path_buf();
        touch(&root.join("tracked.txt"), "x");

        let mut tracker = tracker();
        tracker.register(vec![root.clone()], true);
        touch(&root.join(".git/objects/blob"), "noise");

        assert!(tracker.latest_edits().is_empty());
    }

    #[test]
    fn reset_clears_state_unless_asynchronous() {
        let dir = tempfile::tempdir().unwrap();
        touch(&dir.path().join("a.txt"), "a");

        let mut tracker = tracker();
        tracker.register(vec![dir.path().to_path_buf()], true);
        assert!(!tracker.is_empty());

        tracker.mark_asynchronous();
        assert!(tracker.is_asynchronous());

        tracker.reset();
        assert!(tracker.is_empty());
        assert!(!tracker.is_asynchronous());
    }

    #[test]
    fn exact_match_beats_better_placed_fuzzy_candidate() {
        let dir = tempfile::tempdir().unwrap();
        let exact = dir.path().join("report.txt");
        let fuzzy = dir.path().join("report_old.txt");
        touch(&exact, "x");
        touch(&fuzzy, "y");

        let mut tracker = tracker();
        // Fuzzy candidate registered more recently: scanned first.
        tracker.register(vec![exact.clone()], false);
        tracker.register(vec![fuzzy], false);

        assert_eq!(tracker.file_being_edited("report.txt", false), Some(exact));
    }

    #[test]
    fn consumed_exact_match_yields_to_the_next_same_named_file() {
        let dir = tempfile::tempdir().unwrap();
        let first = dir.path().join("a/report.txt");
        let second = dir.path().join("b/report.txt");
        touch(&first, "1");
        touch(&second, "2");

        let mut tracker = tracker();
        tracker.register(vec![second.clone()], false);
        tracker.register(vec![first.clone()], false);

        assert_eq!(
            tracker.file_being_edited("report.txt", false),
            Some(first)
        );
        // First entry consumed: the second same-named file exact-matches now.
        assert_eq!(
            tracker.file_being_edited("report.txt__copy2", false),
            Some(second)
        );
    }

    #[test]
    fn matching_is_deterministic() {
        let dir = tempfile::tempdir().unwrap();
        let a = dir.path().join("run_a.log");
        let b = dir.path().join("run_b.log");
        touch(&a, "a");
        touch(&b, "b");

        let mut first = tracker();
        first.register(vec![b.clone(), a.clone()], false);
        let mut second = tracker();
        second.register(vec![b.clone(), a.clone()], false);

        assert_eq!(
            first.file_being_edited("run_x.log", false),
            second.file_being_edited("run_x.log", false)
        );
    }

    #[test]
    fn kind_mismatch_is_skipped() {
        let dir = tempfile::tempdir().unwrap();
        let file = dir.path().join("target");
        touch(&file, "x");

        let mut tracker = tracker();
        tracker.register(vec![file], false);
        assert_eq!(tracker.file_being_edited("target", true), None);
    }

    #[test]
    fn first_seen_candidate_wins_score_ties() {
        let dir = tempfile::tempdir().unwrap();
        let first = dir.path().join("aaa_result");
        let second = dir.path().join("bbb_result");
        touch(&first, "1");
        touch(&second, "2");

        let mut tracker = tracker();
        // `first` registered last, so it is scanned first.
        tracker.register(vec![second], false);
        tracker.register(vec![first.clone()], false);

        // Equal scores against an unrelated recorded name.
        assert_eq!(tracker.file_being_edited("zzz_result", false), Some(first));
    }

    #[test]
    fn disambiguated_recorded_name_still_matches() {
        let dir = tempfile::tempdir().unwrap();
        let live = dir.path().join("report.txt");
        touch(&live, "x");

        let mut tracker = tracker();
        tracker.register(vec![live.clone()], false);
        assert_eq!(
            tracker.file_being_edited("report.txt__copy2", false),
            Some(live)
        );
    }
}
