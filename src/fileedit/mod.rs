//! File-edit tracking, matching and storage.

pub mod matcher;
pub mod store;
pub mod tracker;

pub use matcher::{
    match_score, strip_disambiguation, translate_mount_prefix, DISAMBIGUATION_MARKER,
};
pub use store::EditStore;
pub use tracker::{EditSet, EditTracker, FileStamp};
