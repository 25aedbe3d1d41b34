//! Traffic processing pipeline.
//!
//! Decides, per traffic item, whether to answer from the replay source or
//! forward to the real destination, folds in file edits discovered along
//! the way, and decides what gets persisted. Responses may chain into
//! further traffic; everything a request triggers is processed, and
//! recorded, under that request's number.

use std::future::Future;
use std::pin::Pin;

use tracing::{debug, warn};

use crate::daemon::ServerState;
use crate::error::Result;
use crate::traffic::{BoxedTraffic, FileEditTraffic, RebuildContext, Traffic};

pub struct Pipeline<'a> {
    state: &'a ServerState,
}

impl<'a> Pipeline<'a> {
    pub fn new(state: &'a ServerState) -> Self {
        Self { state }
    }

    /// Process one top-level traffic item under its request number.
    ///
    /// Reply text destined for the SUT is pushed onto `replies`; the caller
    /// owns writing it back over the connection.
    pub async fn process(
        &self,
        traffic: BoxedTraffic,
        request: u64,
        replies: &mut Vec<String>,
    ) -> Result<()> {
        let result = self.process_tracked(traffic, request, replies).await;
        // Unconditional: later requests must never wait on a failed one.
        self.state.writer.request_complete(request)?;
        result
    }

    async fn process_tracked(
        &self,
        traffic: BoxedTraffic,
        request: u64,
        replies: &mut Vec<String>,
    ) -> Result<()> {
        if !self.replay_active_for(&*traffic) {
            // Outstanding edits first: they may be side effects of a prior,
            // not-yet-accounted-for action.
            let pending = self.state.tracker.lock().latest_edits();
            for set in &pending {
                let edit = FileEditTraffic::from_edit_set(set, self.state.record_edits.as_ref());
                self.process_item(Box::new(edit), request, replies).await?;
            }
        }

        let asynchronous = traffic.makes_asynchronous_edits();
        self.process_item(traffic, request, replies).await?;

        let mut tracker = self.state.tracker.lock();
        if asynchronous {
            tracker.mark_asynchronous();
        } else if tracker.is_asynchronous() {
            // A prior asynchronous edit is still pending: keep its tracked
            // state for one more round, then stop persisting.
            tracker.clear_asynchronous();
        } else {
            tracker.reset();
        }
        Ok(())
    }

    /// Process a single traffic item, recursing into chained traffic.
    fn process_item<'f>(
        &'f self,
        traffic: BoxedTraffic,
        request: u64,
        replies: &'f mut Vec<String>,
    ) -> Pin<Box<dyn Future<Output = Result<()>> + Send + 'f>> {
        Box::pin(async move {
            let candidates = traffic.possible_file_edits();
            if !candidates.is_empty() {
                let snapshot = !self.full_replay();
                self.state.tracker.lock().register(candidates, snapshot);
            }

            let responses = if self.replay_active_for(&*traffic) {
                self.replayed_responses(&*traffic)
            } else {
                let mut responses = traffic.forward().await?;
                if traffic.can_cause_file_edits() {
                    // Edits discovered since tracking began go in front.
                    let sets = self.state.tracker.lock().latest_edits();
                    let mut with_edits: Vec<BoxedTraffic> = sets
                        .iter()
                        .map(|set| {
                            Box::new(FileEditTraffic::from_edit_set(
                                set,
                                self.state.record_edits.as_ref(),
                            )) as BoxedTraffic
                        })
                        .collect();
                    with_edits.append(&mut responses);
                    responses = with_edits;
                }
                responses
            };

            let recordable = !traffic.is_enquiry(&responses);
            if recordable {
                self.state.writer.record(&traffic.record_text(), request)?;
            } else {
                debug!(request, "enquiry-only interaction, not recorded");
            }

            for response in responses {
                if recordable {
                    self.state.writer.record(&response.record_text(), request)?;
                }
                if let Some(reply) = response.reply_text() {
                    replies.push(reply.to_string());
                }
                for chained in response.forward().await? {
                    self.process_item(chained, request, replies).await?;
                }
            }
            Ok(())
        })
    }

    /// Reconstruct this traffic's recorded responses as live objects and
    /// run them through the kind's replay filter.
    fn replayed_responses(&self, traffic: &dyn Traffic) -> Vec<BoxedTraffic> {
        let Some(replay) = self.state.replay.as_ref() else {
            return Vec::new();
        };
        let tags = self.state.registry.response_tags();
        let Some(recorded) = replay.responses_for(traffic.tag(), traffic.text(), &tags) else {
            return Vec::new();
        };

        let ctx = RebuildContext {
            config: &self.state.config,
            tracker: &self.state.tracker,
            replay_edits: self.state.replay_edits.as_ref(),
        };
        let mut rebuilt = Vec::new();
        for response in recorded {
            match self
                .state
                .registry
                .rebuild_response(&response.tag, response.text, &ctx)
            {
                Ok(Some(live)) => rebuilt.push(live),
                Ok(None) => {}
                Err(e) => warn!(error = %e, "skipping malformed recorded response"),
            }
        }
        traffic.filter_replayed(rebuilt)
    }

    fn replay_active_for(&self, traffic: &dyn Traffic) -> bool {
        self.state
            .replay
            .as_ref()
            .is_some_and(|replay| replay.is_active_for(traffic.tag(), traffic.text()))
    }

    fn full_replay(&self) -> bool {
        self.state
            .replay
            .as_ref()
            .is_some_and(|replay| replay.replay_all())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{Config, EditConfig, RecordConfig};
    use crate::daemon::ServerState;
    use crate::fileedit::EditStore;
    use crate::record::{parse_record_text, FileReplaySource, OrderedRecordWriter};
    use std::sync::Arc;

    fn make_state(dir: &tempfile::TempDir, config: Config) -> ServerState {
        let writer = OrderedRecordWriter::create(dir.path().join("record.log")).unwrap();
        ServerState::new(Arc::new(config), writer, None, None, None)
    }

    fn record_contents(state: &ServerState) -> String {
        std::fs::read_to_string(state.writer.path()).unwrap()
    }

    #[tokio::test]
    async fn enquiry_traffic_is_answered_but_not_recorded() {
        let dir = tempfile::tempdir().unwrap();
        let config = Config {
            record: RecordConfig {
                enquiries: vec!["STATUS".to_string()],
            },
            ..Config::default()
        };
        let state = make_state(&dir, config);

        let traffic = state.registry.classify("STATUS now").unwrap();
        let mut replies = Vec::new();
        Pipeline::new(&state)
            .process(traffic, 1, &mut replies)
            .await
            .unwrap();

        assert_eq!(record_contents(&state), "");

        // The writer still advanced past the enquiry request.
        let traffic = state.registry.classify("UPDATE row").unwrap();
        Pipeline::new(&state)
            .process(traffic, 2, &mut replies)
            .await
            .unwrap();
        assert_eq!(record_contents(&state), "<-:UPDATE row\n");
    }

    #[tokio::test]
    async fn replayed_interaction_answers_and_rerecords() {
        let dir = tempfile::tempdir().unwrap();
        let writer = OrderedRecordWriter::create(dir.path().join("record.log")).unwrap();
        let replay = FileReplaySource::from_interactions(parse_record_text(
            "<-:ping\n->SRV:pong\n",
        ));
        let state = ServerState::new(
            Arc::new(Config::default()),
            writer,
            Some(replay),
            None,
            None,
        );

        let traffic = state.registry.classify("ping").unwrap();
        let mut replies = Vec::new();
        Pipeline::new(&state)
            .process(traffic, 1, &mut replies)
            .await
            .unwrap();

        assert_eq!(replies, vec!["pong".to_string()]);
        assert_eq!(record_contents(&state), "<-:ping\n->SRV:pong\n");
    }

    #[tokio::test]
    async fn unmatched_traffic_falls_through_to_the_live_path() {
        let dir = tempfile::tempdir().unwrap();
        let writer = OrderedRecordWriter::create(dir.path().join("record.log")).unwrap();
        let replay = FileReplaySource::from_interactions(parse_record_text(
            "<-:ping\n->SRV:pong\n",
        ));
        let state = ServerState::new(
            Arc::new(Config::default()),
            writer,
            Some(replay),
            None,
            None,
        );

        // No recorded interaction and no destination: recorded, no responses.
        let traffic = state.registry.classify("other").unwrap();
        let mut replies = Vec::new();
        Pipeline::new(&state)
            .process(traffic, 1, &mut replies)
            .await
            .unwrap();

        assert!(replies.is_empty());
        assert_eq!(record_contents(&state), "<-:other\n");
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn live_command_edits_are_discovered_and_prepended() {
        let dir = tempfile::tempdir().unwrap();
        let sandbox = dir.path().join("sandbox");
        std::fs::create_dir_all(&sandbox).unwrap();
        let source = dir.path().join("src.txt");
        std::fs::write(&source, "content").unwrap();

        let store = EditStore::open(dir.path().join("edits")).unwrap();
        let writer = OrderedRecordWriter::create(dir.path().join("record.log")).unwrap();
        let state = ServerState::new(
            Arc::new(Config::default()),
            writer,
            None,
            Some(store),
            None,
        );

        // cp drops src.txt into sandbox: a change under the tracked directory.
        let line = format!("CMD:cp {} {}", source.display(), sandbox.display());
        let traffic = state.registry.classify(&line).unwrap();
        let mut replies = Vec::new();
        Pipeline::new(&state)
            .process(traffic, 1, &mut replies)
            .await
            .unwrap();

        let contents = record_contents(&state);
        let interactions = parse_record_text(&contents);
        assert_eq!(interactions.len(), 1);
        assert_eq!(interactions[0].tag, "CMD");
        assert_eq!(interactions[0].responses.len(), 1);
        assert_eq!(interactions[0].responses[0].tag, "FIL");
        assert_eq!(interactions[0].responses[0].text, "src.txt");

        // The copy landed in the record-side edit store.
        let stored = dir.path().join("edits/src.txt");
        assert_eq!(std::fs::read_to_string(stored).unwrap(), "content");
    }

    #[tokio::test]
    async fn asynchronous_edit_state_outlives_one_synchronous_item() {
        let dir = tempfile::tempdir().unwrap();
        let tracked = dir.path().join("notes.txt");
        std::fs::write(&tracked, "x").unwrap();

        let config = Config {
            edits: EditConfig {
                asynchronous_programs: vec!["editor".to_string()],
                ..Default::default()
            },
            ..Config::default()
        };
        let state = make_state(&dir, config);
        let pipeline = Pipeline::new(&state);
        let mut replies = Vec::new();

        // "editor" does not exist: no responses, but its edits are async.
        let line = format!("CMD:editor {}", tracked.display());
        let traffic = state.registry.classify(&line).unwrap();
        pipeline.process(traffic, 1, &mut replies).await.unwrap();
        assert!(!state.tracker.lock().is_empty());

        // A synchronous item inherits the still-pending tracked state.
        let traffic = state.registry.classify("ping").unwrap();
        pipeline.process(traffic, 2, &mut replies).await.unwrap();
        assert!(!state.tracker.lock().is_empty());

        // The next synchronous item finally resets it.
        let traffic = state.registry.classify("ping").unwrap();
        pipeline.process(traffic, 3, &mut replies).await.unwrap();
        assert!(state.tracker.lock().is_empty());
    }

    #[tokio::test]
    async fn synchronous_item_resets_tracking() {
        let dir = tempfile::tempdir().unwrap();
        let tracked = dir.path().join("notes.txt");
        std::fs::write(&tracked, "x").unwrap();

        let state = make_state(&dir, Config::default());
        let pipeline = Pipeline::new(&state);
        let mut replies = Vec::new();

        let line = format!("CMD:cat {}", tracked.display());
        let traffic = state.registry.classify(&line).unwrap();
        pipeline.process(traffic, 1, &mut replies).await.unwrap();
        assert!(state.tracker.lock().is_empty());
    }
}
