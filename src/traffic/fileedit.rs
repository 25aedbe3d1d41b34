//! File-edit traffic.
//!
//! Never sent by a SUT: the tracker synthesizes one item per changed
//! top-level root, and replay reconstructs the edit by matching each
//! recorded name onto the live path currently being edited, then copying
//! stored content over it (or deleting it).
//!
//! Payload format, one entry per line:
//!
//! ```text
//! report.txt
//! results/
//! old.log (deleted)
//! scratch/ (deleted)
//! ```

use std::fs;
use std::path::Path;

use async_trait::async_trait;
use tracing::warn;

use crate::error::Result;
use crate::fileedit::{EditSet, EditStore};
use crate::traffic::{BoxedTraffic, Direction, RebuildContext, Traffic};

pub const FILE_EDIT_TAG: &str = "FIL";

const DELETED_SUFFIX: &str = " (deleted)";

pub struct FileEditTraffic {
    text: String,
}

impl FileEditTraffic {
    pub fn from_text(text: String) -> Self {
        Self { text }
    }

    /// Build the record entry for a detected edit set. With a record-side
    /// store, each changed path is copied in and recorded under its stored
    /// name; otherwise only the base name is recorded.
    pub fn from_edit_set(set: &EditSet, store: Option<&EditStore>) -> Self {
        let mut lines = Vec::new();
        for path in &set.changed {
            let is_dir = path.is_dir();
            let name = match store {
                Some(store) => store.save(path).unwrap_or_else(|e| {
                    warn!(path = %path.display(), error = %e, "cannot store edit copy");
                    base_name(path)
                }),
                None => base_name(path),
            };
            lines.push(if is_dir { format!("{name}/") } else { name });
        }
        for (path, was_dir) in &set.removed {
            let name = base_name(path);
            let slash = if *was_dir { "/" } else { "" };
            lines.push(format!("{name}{slash}{DELETED_SUFFIX}"));
        }
        Self {
            text: lines.join("\n"),
        }
    }

    /// Reconstruct a recorded edit against the live filesystem.
    ///
    /// Entries that cannot be resolved are reported and skipped; if nothing
    /// resolves, the whole response is skipped.
    pub fn rebuild(
        _tag: &'static str,
        text: String,
        ctx: &RebuildContext<'_>,
    ) -> Result<Option<BoxedTraffic>> {
        let mut applied = false;
        for line in text.lines() {
            let Some(entry) = EditEntry::parse(line) else {
                warn!(line, "malformed recorded file edit entry");
                continue;
            };
            // Prefer the kind of the stored copy over the line's own marker.
            let is_dir = ctx
                .replay_edits
                .and_then(|store| store.recorded_kind(&entry.name))
                .unwrap_or(entry.is_dir);

            let target = ctx.tracker.lock().file_being_edited(&entry.name, is_dir);
            let Some(target) = target else {
                warn!(name = %entry.name, "no live file matches recorded edit");
                continue;
            };

            if entry.deleted {
                if remove_entry(&target) {
                    applied = true;
                }
            } else {
                match ctx.replay_edits {
                    Some(store) => match store.restore(&entry.name, &target) {
                        Ok(()) => applied = true,
                        Err(e) => {
                            warn!(name = %entry.name, error = %e, "cannot restore edit")
                        }
                    },
                    None => {
                        warn!(name = %entry.name, "no replay edit directory configured")
                    }
                }
            }
        }
        Ok(applied.then(|| Box::new(Self::from_text(text)) as BoxedTraffic))
    }
}

#[async_trait]
impl Traffic for FileEditTraffic {
    fn tag(&self) -> &'static str {
        FILE_EDIT_TAG
    }

    fn direction(&self) -> Direction {
        Direction::Out
    }

    fn text(&self) -> &str {
        &self.text
    }

    async fn forward(&self) -> Result<Vec<BoxedTraffic>> {
        Ok(Vec::new())
    }
}

/// One parsed payload line.
#[derive(Debug, PartialEq, Eq)]
struct EditEntry {
    name: String,
    is_dir: bool,
    deleted: bool,
}

impl EditEntry {
    fn parse(line: &str) -> Option<Self> {
        let (body, deleted) = match line.strip_suffix(DELETED_SUFFIX) {
            Some(body) => (body, true),
            None => (line, false),
        };
        let (name, is_dir) = match body.strip_suffix('/') {
            Some(name) => (name, true),
            None => (body, false),
        };
        (!name.is_empty()).then(|| Self {
            name: name.to_string(),
            is_dir,
            deleted,
        })
    }
}

/// Delete a live file or directory tree; already-gone targets count as done.
fn remove_entry(target: &Path) -> bool {
    let result = if target.is_dir() {
        fs::remove_dir_all(target)
    } else {
        fs::remove_file(target)
    };
    match result {
        Ok(()) => true,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => true,
        Err(e) => {
            warn!(target = %target.display(), error = %e, "cannot delete edit target");
            false
        }
    }
}

fn base_name(path: &Path) -> String {
    path.file_name()
        .map(|name| name.to_string_lossy().into_owned())
        .unwrap_or_else(|| path.display().to_string())
}
