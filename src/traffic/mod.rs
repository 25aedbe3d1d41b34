//! Traffic kinds: the contract every intercepted interaction implements,
//! and the registry that classifies inbound messages.
//!
//! A kind owns everything the pipeline needs to stay generic: its wire tag,
//! which paths it might edit, whether it is worth persisting, how to
//! forward it to the real destination, and how to filter its replayed
//! responses. The registry is a closed set built at startup; classification
//! is first-match on the tag prefix with the empty-tag kind as fallback.

pub mod client;
pub mod command;
pub mod fileedit;

use std::path::PathBuf;
use std::sync::Arc;

use async_trait::async_trait;
use parking_lot::Mutex;

use crate::config::Config;
use crate::error::{ProtocolError, Result};
use crate::fileedit::{EditStore, EditTracker};
use crate::record::{INBOUND_MARKER, OUTBOUND_MARKER};

pub use client::{ClientTraffic, ServerReplyTraffic, SERVER_REPLY_TAG};
pub use command::{CommandOutputTraffic, CommandTraffic, COMMAND_TAG, EXIT_TAG, STDERR_TAG, STDOUT_TAG};
pub use fileedit::{FileEditTraffic, FILE_EDIT_TAG};

pub type BoxedTraffic = Box<dyn Traffic>;

/// Which way a traffic item travels relative to the SUT.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Direction {
    /// From the SUT into mockwire.
    In,
    /// Back towards the SUT, or a recorded side effect.
    Out,
}

impl Direction {
    pub fn marker(self) -> &'static str {
        match self {
            Direction::In => INBOUND_MARKER,
            Direction::Out => OUTBOUND_MARKER,
        }
    }
}

/// One intercepted interaction between the SUT and something external.
#[async_trait]
pub trait Traffic: Send + Sync {
    /// Registry tag; empty for the default kind.
    fn tag(&self) -> &'static str;

    fn direction(&self) -> Direction;

    /// Payload text, without tag or direction marker.
    fn text(&self) -> &str;

    /// Top-level paths this item might edit.
    fn possible_file_edits(&self) -> Vec<PathBuf> {
        Vec::new()
    }

    /// Whether forwarding this kind can itself mutate the filesystem.
    fn can_cause_file_edits(&self) -> bool {
        false
    }

    /// Whether edits may complete after this item's handling returns.
    fn makes_asynchronous_edits(&self) -> bool {
        false
    }

    /// Whether, given its responses, this interaction carries nothing worth
    /// persisting in the record.
    fn is_enquiry(&self, responses: &[BoxedTraffic]) -> bool {
        let _ = responses;
        false
    }

    /// Text to send back over the SUT connection, if the SUT awaits one.
    fn reply_text(&self) -> Option<&str> {
        None
    }

    /// Forward to the real destination, yielding response and chain items.
    async fn forward(&self) -> Result<Vec<BoxedTraffic>>;

    /// Adjust replayed responses; kinds may drop or reorder entries.
    fn filter_replayed(&self, responses: Vec<BoxedTraffic>) -> Vec<BoxedTraffic> {
        responses
    }

    /// Record-file representation: marker, tag, payload, one trailing newline.
    fn record_text(&self) -> String {
        let mut entry = format!(
            "{}{}:{}",
            self.direction().marker(),
            self.tag(),
            self.text().trim_end_matches('\n')
        );
        entry.push('\n');
        entry
    }
}

/// Everything a response kind needs to turn recorded text back into a live
/// response during replay.
pub struct RebuildContext<'a> {
    pub config: &'a Arc<Config>,
    pub tracker: &'a Mutex<EditTracker>,
    pub replay_edits: Option<&'a EditStore>,
}

type BuildFn = fn(String, Arc<Config>) -> BoxedTraffic;
type RebuildFn = fn(&'static str, String, &RebuildContext<'_>) -> Result<Option<BoxedTraffic>>;

struct IncomingKind {
    tag: &'static str,
    build: BuildFn,
}

struct ResponseKind {
    tag: &'static str,
    rebuild: RebuildFn,
}

/// Closed set of traffic kinds, built once at startup.
pub struct TrafficRegistry {
    config: Arc<Config>,
    incoming: Vec<IncomingKind>,
    responses: Vec<ResponseKind>,
}

impl TrafficRegistry {
    /// The standard kind set: command traffic, client-socket traffic as the
    /// fallback, and the response kinds both can replay.
    pub fn standard(config: Arc<Config>) -> Self {
        Self {
            config,
            incoming: vec![
                IncomingKind {
                    tag: COMMAND_TAG,
                    build: CommandTraffic::build,
                },
                IncomingKind {
                    tag: "",
                    build: ClientTraffic::build,
                },
            ],
            responses: vec![
                ResponseKind {
                    tag: SERVER_REPLY_TAG,
                    rebuild: ServerReplyTraffic::rebuild,
                },
                ResponseKind {
                    tag: STDOUT_TAG,
                    rebuild: CommandOutputTraffic::rebuild,
                },
                ResponseKind {
                    tag: STDERR_TAG,
                    rebuild: CommandOutputTraffic::rebuild,
                },
                ResponseKind {
                    tag: EXIT_TAG,
                    rebuild: CommandOutputTraffic::rebuild,
                },
                ResponseKind {
                    tag: FILE_EDIT_TAG,
                    rebuild: FileEditTraffic::rebuild,
                },
            ],
        }
    }

    /// Classify an inbound message: first kind whose tag prefixes it wins,
    /// the empty-tag kind matches anything. The payload is the remainder
    /// after `TAG:`.
    pub fn classify(&self, message: &str) -> Result<BoxedTraffic> {
        for kind in &self.incoming {
            let payload = if kind.tag.is_empty() {
                Some(message)
            } else {
                message
                    .strip_prefix(kind.tag)
                    .and_then(|rest| rest.strip_prefix(':'))
            };
            if let Some(payload) = payload {
                return Ok((kind.build)(payload.to_string(), Arc::clone(&self.config)));
            }
        }
        Err(ProtocolError::unknown_kind(message).into())
    }

    /// Tags of every known response kind, for the replay source.
    pub fn response_tags(&self) -> Vec<&'static str> {
        self.responses.iter().map(|kind| kind.tag).collect()
    }

    /// Turn one recorded response back into a live response object.
    ///
    /// `Ok(None)` means the kind chose to skip this entry (reported by the
    /// kind itself); an unknown tag is a protocol error.
    pub fn rebuild_response(
        &self,
        tag: &str,
        text: String,
        ctx: &RebuildContext<'_>,
    ) -> Result<Option<BoxedTraffic>> {
        let kind = self
            .responses
            .iter()
            .find(|kind| kind.tag == tag)
            .ok_or_else(|| ProtocolError::UnknownResponseKind {
                tag: tag.to_string(),
            })?;
        (kind.rebuild)(kind.tag, text, ctx)
    }
}
