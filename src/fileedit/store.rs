//! Edit store: copies of edited files kept alongside the record.
//!
//! When recording, each changed file or directory is copied into the store
//! under its base name; a name collision gets the disambiguation suffix
//! (`report.txt`, `report.txt__copy2`, ...). When replaying, stored content
//! is copied back over the live path the matcher resolved.

use std::fs;
use std::io;
use std::path::{Path, PathBuf};

use tracing::debug;

use super::matcher::DISAMBIGUATION_MARKER;

pub struct EditStore {
    dir: PathBuf,
}

impl EditStore {
    /// Open the store directory, creating it if needed.
    pub fn open(dir: impl Into<PathBuf>) -> io::Result<Self> {
        let dir = dir.into();
        fs::create_dir_all(&dir)?;
        Ok(Self { dir })
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    /// Copy `source` into the store and return the stored name.
    pub fn save(&self, source: &Path) -> io::Result<String> {
        let base = source
            .file_name()
            .map(|name| name.to_string_lossy().into_owned())
            .unwrap_or_else(|| "edit".to_string());

        let mut name = base.clone();
        let mut counter = 2;
        while self.dir.join(&name).exists() {
            name = format!("{base}{DISAMBIGUATION_MARKER}{counter}");
            counter += 1;
        }

        copy_entry(source, &self.dir.join(&name))?;
        debug!(source = %source.display(), stored = %name, "edit saved");
        Ok(name)
    }

    /// Whether a stored entry is a directory; `None` if it does not exist.
    pub fn recorded_kind(&self, stored: &str) -> Option<bool> {
        let path = self.dir.join(stored);
        path.exists().then(|| path.is_dir())
    }

    /// Copy stored content back over a live target.
    pub fn restore(&self, stored: &str, target: &Path) -> io::Result<()> {
        let source = self.dir.join(stored);
        debug!(stored, target = %target.display(), "edit restored");
        copy_entry(&source, target)
    }
}

/// Copy a file or a whole directory tree.
fn copy_entry(source: &Path, target: &Path) -> io::Result<()> {
    if source.is_dir() {
        fs::create_dir_all(target)?;
        for entry in fs::read_dir(source)? {
            let entry = entry?;
            copy_entry(&entry.path(), &target.join(entry.file_name()))?;
        }
        Ok(())
    } else {
        if let Some(parent) = target.parent() {
            fs::create_dir_all(parent)?;
        }
        fs::copy(source, target).map(|_| ())
    }
}
