//! Record-file parsing and the file-backed replay source.
//!
//! The record format is line-oriented. A marker line opens an entry:
//!
//! ```text
//! <-CMD:touch report.txt
//! ->FIL:report.txt
//! <-:raw client payload
//! ->SRV:reply text
//! ```
//!
//! `<-` marks inbound traffic (an interaction starts here), `->` marks a
//! response belonging to the interaction above it. The tag is empty for the
//! default kind. Any line that is not a marker continues the previous
//! payload.

use std::path::Path;

use parking_lot::Mutex;
use tracing::{debug, warn};

use crate::error::{ProtocolError, Result};

/// Marker prefix for inbound traffic.
pub const INBOUND_MARKER: &str = "<-";
/// Marker prefix for responses.
pub const OUTBOUND_MARKER: &str = "->";

/// One recorded response: its kind tag and full payload text.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RecordedResponse {
    pub tag: String,
    pub text: String,
}

/// One recorded interaction: inbound traffic plus its responses, in order.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RecordedInteraction {
    pub tag: String,
    pub text: String,
    pub responses: Vec<RecordedResponse>,
}

/// Splits a marker line into direction, tag and first payload line.
///
/// Returns `None` for continuation lines. Tags are short sequences of
/// ASCII uppercase letters; anything else before the colon disqualifies
/// the line as a marker so payloads containing arrows survive.
fn parse_marker(line: &str) -> Option<(bool, &str, &str)> {
    let (inbound, rest) = if let Some(rest) = line.strip_prefix(INBOUND_MARKER) {
        (true, rest)
    } else if let Some(rest) = line.strip_prefix(OUTBOUND_MARKER) {
        (false, rest)
    } else {
        return None;
    };
    let colon = rest.find(':')?;
    let tag = &rest[..colon];
    if tag.len() > 8 || !tag.chars().all(|c| c.is_ascii_uppercase()) {
        return None;
    }
    Some((inbound, tag, &rest[colon + 1..]))
}

/// Parse a whole record file into interactions.
///
/// A response marker before any inbound marker is a malformed entry; it is
/// reported and skipped rather than failing the load.
pub fn parse_record_text(content: &str) -> Vec<RecordedInteraction> {
    let mut interactions: Vec<RecordedInteraction> = Vec::new();
    // Whether a payload is open for continuation lines to attach to.
    let mut open_payload = false;

    for (index, line) in content.lines().enumerate() {
        match parse_marker(line) {
            Some((true, tag, first)) => {
                interactions.push(RecordedInteraction {
                    tag: tag.to_string(),
                    text: first.to_string(),
                    responses: Vec::new(),
                });
                open_payload = true;
            }
            Some((false, tag, first)) => match interactions.last_mut() {
                Some(interaction) => {
                    interaction.responses.push(RecordedResponse {
                        tag: tag.to_string(),
                        text: first.to_string(),
                    });
                    open_payload = true;
                }
                None => {
                    let err = ProtocolError::MalformedEntry {
                        line: index + 1,
                        reason: "response before any inbound traffic",
                    };
                    warn!(error = %err, "skipping malformed recorded entry");
                    open_payload = false;
                }
            },
            None => {
                if !open_payload {
                    continue;
                }
                let Some(interaction) = interactions.last_mut() else {
                    continue;
                };
                let payload = match interaction.responses.last_mut() {
                    Some(response) => &mut response.text,
                    None => &mut interaction.text,
                };
                payload.push('\n');
                payload.push_str(line);
            }
        }
    }
    interactions
}

/// Replay source backed by a previously written record file.
///
/// Each recorded interaction is consumed at most once, so repeated
/// identical traffic replays successive recorded answers.
pub struct FileReplaySource {
    interactions: Vec<RecordedInteraction>,
    consumed: Mutex<Vec<bool>>,
}

impl FileReplaySource {
    pub fn load(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)?;
        let interactions = parse_record_text(&content);
        debug!(
            path = %path.display(),
            interactions = interactions.len(),
            "replay source loaded"
        );
        Ok(Self::from_interactions(interactions))
    }

    pub fn from_interactions(interactions: Vec<RecordedInteraction>) -> Self {
        let consumed = Mutex::new(vec![false; interactions.len()]);
        Self {
            interactions,
            consumed,
        }
    }

    /// Replay covers the whole run: a replay file was supplied, so on-disk
    /// timestamps are meaningless and edit snapshotting is skipped.
    pub fn replay_all(&self) -> bool {
        true
    }

    /// Whether replay answers this specific traffic item.
    pub fn is_active_for(&self, tag: &str, text: &str) -> bool {
        let consumed = self.consumed.lock();
        self.interactions
            .iter()
            .zip(consumed.iter())
            .any(|(interaction, used)| {
                !used && interaction.tag == tag && interaction.text == text
            })
    }

    /// Consume the first unconsumed interaction matching this traffic and
    /// return its responses, restricted to `known_tags`. An entry with a
    /// tag outside the known response kinds is reported and dropped.
    pub fn responses_for(
        &self,
        tag: &str,
        text: &str,
        known_tags: &[&str],
    ) -> Option<Vec<RecordedResponse>> {
        let mut consumed = self.consumed.lock();
        let index = self
            .interactions
            .iter()
            .zip(consumed.iter())
            .position(|(interaction, used)| {
                !used && interaction.tag == tag && interaction.text == text
            })?;
        consumed[index] = true;

        let responses = self.interactions[index]
            .responses
            .iter()
            .filter(|response| {
                let known = known_tags.contains(&response.tag.as_str());
                if !known {
                    let err = ProtocolError::UnknownResponseKind {
                        tag: response.tag.clone(),
                    };
                    warn!(error = %err, "dropping recorded response");
                }
                known
            })
            .cloned()
            .collect();
        Some(responses)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const SAMPLE: &str = "\
<-CMD:touch report.txt
->OUT:done
->FIL:report.txt
<-:status please
->SRV:all good
";

    #[test]
    fn parses_interactions_with_responses() {
        let interactions = parse_record_text(SAMPLE);
        assert_eq!(interactions.len(), 2);

        assert_eq!(interactions[0].tag, "CMD");
        assert_eq!(interactions[0].text, "touch report.txt");
        assert_eq!(interactions[0].responses.len(), 2);
        assert_eq!(interactions[0].responses[1].tag, "FIL");

        assert_eq!(interactions[1].tag, "");
        assert_eq!(interactions[1].text, "status please");
        assert_eq!(interactions[1].responses[0].text, "all good");
    }

    #[test]
    fn continuation_lines_extend_the_previous_payload() {
        let text = "<-:first line\nsecond line\n->SRV:reply one\nreply two\n";
        let interactions = parse_record_text(text);
        assert_eq!(interactions[0].text, "first line\nsecond line");
        assert_eq!(interactions[0].responses[0].text, "reply one\nreply two");
    }

    #[test]
    fn leading_response_is_skipped_not_fatal() {
        let text = "->SRV:orphan\n<-:real\n->SRV:reply\n";
        let interactions = parse_record_text(text);
        assert_eq!(interactions.len(), 1);
        assert_eq!(interactions[0].text, "real");
        assert_eq!(interactions[0].responses.len(), 1);
    }

    #[test]
    fn lowercase_or_long_tags_are_payload_not_markers() {
        let text = "<-:payload with ->arrow: inside\nand <-more: text\n";
        let interactions = parse_record_text(text);
        assert_eq!(interactions.len(), 1);
        assert_eq!(
            interactions[0].text,
            "payload with ->arrow: inside\nand <-more: text"
        );
    }

    #[test]
    fn matching_interactions_are_consumed_in_order() {
        let source = FileReplaySource::from_interactions(parse_record_text(
            "<-:ping\n->SRV:pong one\n<-:ping\n->SRV:pong two\n",
        ));

        assert!(source.is_active_for("", "ping"));
        let first = source.responses_for("", "ping", &["SRV"]).unwrap();
        assert_eq!(first[0].text, "pong one");

        let second = source.responses_for("", "ping", &["SRV"]).unwrap();
        assert_eq!(second[0].text, "pong two");

        assert!(!source.is_active_for("", "ping"));
        assert!(source.responses_for("", "ping", &["SRV"]).is_none());
    }

    #[test]
    fn unknown_response_tags_are_dropped() {
        let source = FileReplaySource::from_interactions(parse_record_text(
            "<-:ping\n->SRV:pong\n->ZZZ:mystery\n",
        ));
        let responses = source.responses_for("", "ping", &["SRV"]).unwrap();
        assert_eq!(responses.len(), 1);
        assert_eq!(responses[0].tag, "SRV");
    }

    #[test]
    fn unmatched_traffic_is_not_active() {
        let source =
            FileReplaySource::from_interactions(parse_record_text("<-:ping\n->SRV:pong\n"));
        assert!(!source.is_active_for("CMD", "ping"));
        assert!(!source.is_active_for("", "other"));
    }
}
