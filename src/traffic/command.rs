//! Command invocation traffic.
//!
//! The SUT asks for a command-line sub-process to run. Live handling
//! executes the real command and captures its output streams and exit
//! status as responses; arguments naming existing filesystem entries are
//! registered as candidate edit paths before the command runs.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use async_trait::async_trait;
use tokio::process::Command;
use tracing::warn;

use crate::config::Config;
use crate::error::Result;
use crate::traffic::{BoxedTraffic, Direction, RebuildContext, Traffic};

pub const COMMAND_TAG: &str = "CMD";
pub const STDOUT_TAG: &str = "OUT";
pub const STDERR_TAG: &str = "ERR";
pub const EXIT_TAG: &str = "EXC";

pub struct CommandTraffic {
    line: String,
    config: Arc<Config>,
}

impl CommandTraffic {
    pub fn build(payload: String, config: Arc<Config>) -> BoxedTraffic {
        Box::new(Self {
            line: payload,
            config,
        })
    }

    fn program(&self) -> Option<&str> {
        self.line.split_whitespace().next()
    }
}

#[async_trait]
impl Traffic for CommandTraffic {
    fn tag(&self) -> &'static str {
        COMMAND_TAG
    }

    fn direction(&self) -> Direction {
        Direction::In
    }

    fn text(&self) -> &str {
        &self.line
    }

    /// Arguments naming existing filesystem entries are candidate edits.
    fn possible_file_edits(&self) -> Vec<PathBuf> {
        self.line
            .split_whitespace()
            .skip(1)
            .filter(|arg| Path::new(arg).exists())
            .map(PathBuf::from)
            .collect()
    }

    fn can_cause_file_edits(&self) -> bool {
        true
    }

    fn makes_asynchronous_edits(&self) -> bool {
        self.program().is_some_and(|program| {
            self.config
                .edits
                .asynchronous_programs
                .iter()
                .any(|name| name == program)
        })
    }

    async fn forward(&self) -> Result<Vec<BoxedTraffic>> {
        let mut words = self.line.split_whitespace();
        let Some(program) = words.next() else {
            return Ok(Vec::new());
        };

        let output = match Command::new(program).args(words).output().await {
            Ok(output) => output,
            Err(e) => {
                warn!(program, error = %e, "cannot run real command");
                return Ok(Vec::new());
            }
        };

        let mut responses: Vec<BoxedTraffic> = Vec::new();
        let stdout = String::from_utf8_lossy(&output.stdout);
        if !stdout.is_empty() {
            responses.push(Box::new(CommandOutputTraffic::new(
                STDOUT_TAG,
                stdout.into_owned(),
            )));
        }
        let stderr = String::from_utf8_lossy(&output.stderr);
        if !stderr.is_empty() {
            responses.push(Box::new(CommandOutputTraffic::new(
                STDERR_TAG,
                stderr.into_owned(),
            )));
        }
        if !output.status.success() {
            let text = match output.status.code() {
                Some(code) => code.to_string(),
                None => "terminated by signal".to_string(),
            };
            responses.push(Box::new(CommandOutputTraffic::new(EXIT_TAG, text)));
        }
        Ok(responses)
    }
}

/// Captured stdout, stderr or nonzero exit status of a forwarded command.
/// Record-only; nothing goes back over the SUT connection.
pub struct CommandOutputTraffic {
    tag: &'static str,
    text: String,
}

impl CommandOutputTraffic {
    pub fn new(tag: &'static str, text: String) -> Self {
        Self { tag, text }
    }

    pub fn rebuild(
        tag: &'static str,
        text: String,
        _ctx: &RebuildContext<'_>,
    ) -> Result<Option<BoxedTraffic>> {
        Ok(Some(Box::new(Self::new(tag, text))))
    }
}

#[async_trait]
impl Traffic for CommandOutputTraffic {
    fn tag(&self) -> &'static str {
        self.tag
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
