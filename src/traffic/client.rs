//! Client-socket traffic: the default kind.
//!
//! The SUT sends a raw payload; live handling forwards it to the configured
//! real destination and relays the reply. Payloads matching a configured
//! enquiry prefix are answered but excluded from the record.

use std::sync::Arc;

use async_trait::async_trait;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpStream;
use tracing::{debug, warn};

use crate::config::Config;
use crate::error::Result;
use crate::traffic::fileedit::FILE_EDIT_TAG;
use crate::traffic::{BoxedTraffic, Direction, RebuildContext, Traffic};

pub const SERVER_REPLY_TAG: &str = "SRV";

pub struct ClientTraffic {
    text: String,
    config: Arc<Config>,
}

impl ClientTraffic {
    pub fn build(payload: String, config: Arc<Config>) -> BoxedTraffic {
        Box::new(Self {
            text: payload,
            config,
        })
    }
}

#[async_trait]
impl Traffic for ClientTraffic {
    fn tag(&self) -> &'static str {
        ""
    }

    fn direction(&self) -> Direction {
        Direction::In
    }

    fn text(&self) -> &str {
        &self.text
    }

    fn is_enquiry(&self, _responses: &[BoxedTraffic]) -> bool {
        self.config
            .enquiry_prefixes()
            .iter()
            .any(|prefix| self.text.starts_with(prefix.as_str()))
    }

    async fn forward(&self) -> Result<Vec<BoxedTraffic>> {
        let Some(destination) = self.config.destination() else {
            warn!("no forward destination configured; client traffic gets no response");
            return Ok(Vec::new());
        };
        match exchange(destination, &self.text).await {
            Ok(reply) if reply.is_empty() => Ok(Vec::new()),
            Ok(reply) => Ok(vec![Box::new(ServerReplyTraffic::new(reply)) as BoxedTraffic]),
            Err(e) => {
                // Best effort: an unreachable destination is not fatal.
                warn!(destination, error = %e, "cannot reach real destination");
                Ok(Vec::new())
            }
        }
    }

    /// Recorded file edits apply before the reply goes back, matching the
    /// live path where discovered edits precede the responses.
    fn filter_replayed(&self, responses: Vec<BoxedTraffic>) -> Vec<BoxedTraffic> {
        let (mut edits, rest): (Vec<_>, Vec<_>) = responses
            .into_iter()
            .partition(|response| response.tag() == FILE_EDIT_TAG);
        edits.extend(rest);
        edits
    }
}

/// Send one payload to the real destination and read its reply to EOF.
async fn exchange(destination: &str, payload: &str) -> std::io::Result<String> {
    let mut stream = TcpStream::connect(destination).await?;
    stream.write_all(payload.as_bytes()).await?;
    stream.shutdown().await?;

    let mut reply = Vec::new();
    stream.read_to_end(&mut reply).await?;
    debug!(destination, bytes = reply.len(), "destination replied");
    Ok(String::from_utf8_lossy(&reply).into_owned())
}

/// Reply from the real server, relayed back to the SUT.
pub struct ServerReplyTraffic {
    text: String,
}

impl ServerReplyTraffic {
    pub fn new(text: String) -> Self {
        Self { text }
    }

    pub fn rebuild(
        _tag: &'static str,
        text: String,
        _ctx: &RebuildContext<'_>,
    ) -> Result<Option<BoxedTraffic>> {
        Ok(Some(Box::new(Self::new(text))))
    }
}

#[async_trait]
impl Traffic for ServerReplyTraffic {
    fn tag(&self) -> &'static str {
        SERVER_REPLY_TAG
    }

    fn direction(&self) -> Direction {
        Direction::Out
    }

    fn text(&self) -> &str {
        &self.text
    }

    fn reply_text(&self) -> Option<&str> {
        Some(&self.text)
    }

    async fn forward(&self) -> Result<Vec<BoxedTraffic>> {
        Ok(Vec::new())
    }
}
