//! Ordered record writer.
//!
//! Requests are handled concurrently and finish in arbitrary order, but the
//! record file must read as if they completed strictly in arrival order.
//! The writer buffers text for requests that are ahead of their turn and
//! flushes each request's text, contiguously, once every earlier request has
//! signalled completion.
//!
//! Every physical write reopens the file in append mode and flushes before
//! closing, so text flushed so far survives a crash.

use std::collections::{HashMap, HashSet};
use std::fs::OpenOptions;
use std::io::{self, Write};
use std::path::{Path, PathBuf};

use parking_lot::Mutex;
use tracing::{debug, trace};

/// Serializes concurrently-completing request output into one file in
/// strict request-arrival order.
pub struct OrderedRecordWriter {
    path: PathBuf,
    state: Mutex<WriterState>,
}

struct WriterState {
    /// Next request number allowed to touch the file.
    next_to_flush: u64,
    /// Buffered text per not-yet-flushable request.
    pending: HashMap<u64, String>,
    /// Requests whose processing finished but which wait behind `next_to_flush`.
    completed: HashSet<u64>,
}

impl OrderedRecordWriter {
    /// Create the writer, truncating any previous record at `path`.
    ///
    /// Failure here is fatal at startup; later write failures are surfaced
    /// to the affected connection only.
    pub fn create(path: impl Into<PathBuf>) -> io::Result<Self> {
        let path = path.into();
        OpenOptions::new()
            .create(true)
            .write(true)
            .truncate(true)
            .open(&path)?;
        Ok(Self {
            path,
            state: Mutex::new(WriterState {
                next_to_flush: 1,
                pending: HashMap::new(),
                completed: HashSet::new(),
            }),
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Record text for a request. May be called many times per request: once
    /// for the traffic itself, once per response.
    ///
    /// Text for the request currently at the head of the order goes straight
    /// to the file; anything else is buffered until its turn.
    pub fn record(&self, text: &str, request: u64) -> io::Result<()> {
        let mut state = self.state.lock();
        if request == state.next_to_flush {
            // Normally empty: nothing buffers for the head request.
            if let Some(buffered) = state.pending.remove(&request) {
                self.append(&buffered)?;
            }
            self.append(text)?;
        } else {
            trace!(request, "buffering out-of-turn record text");
            state.pending.entry(request).or_default().push_str(text);
        }
        Ok(())
    }

    /// Signal that a request's processing is finished. Called exactly once
    /// per request, after all of its `record` calls.
    ///
    /// When the head request completes, its remaining buffer is flushed and
    /// the head advances, cascading through any run of already-finished
    /// requests that were waiting their turn.
    pub fn request_complete(&self, request: u64) -> io::Result<()> {
        let mut state = self.state.lock();
        if request != state.next_to_flush {
            debug!(request, head = state.next_to_flush, "completed out of turn");
            state.completed.insert(request);
            return Ok(());
        }

        loop {
            let head = state.next_to_flush;
            if let Some(buffered) = state.pending.remove(&head) {
                self.append(&buffered)?;
            }
            state.next_to_flush += 1;
            let next = state.next_to_flush;
            if !state.completed.remove(&next) {
                break;
            }
        }
        Ok(())
    }

    fn append(&self, text: &str) -> io::Result<()> {
        if text.is_empty() {
            return Ok(());
        }
        let mut file = OpenOptions::new().append(true).open(&self.path)?;
        file.write_all(text.as_bytes())?;
        file.flush()
    }
}
