//! Daemon API for running mockwire.
//!
//! Wires configuration, the record writer, the optional replay source and
//! the edit stores into one [`ServerState`], and exposes bind / announce /
//! run / shutdown. Used by the `mockwired` binary and by tests driving the
//! dispatch loop over in-memory streams.
//!
//! ```ignore
//! let daemon = Daemon::new(config, options)?;
//! let listener = daemon.bind().await?;
//! daemon.announce(listener.local_addr()?)?;
//! daemon.run(listener).await?;
//! ```

use std::io::Write;
use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::Arc;

use parking_lot::Mutex;
use tokio::net::TcpListener;
use tracing::info;

use crate::config::Config;
use crate::error::Result;
use crate::fileedit::{EditStore, EditTracker};
use crate::record::{FileReplaySource, OrderedRecordWriter};
use crate::server::{DispatchLoop, Listener};
use crate::traffic::TrafficRegistry;

/// Process-wide server state, shared by the dispatch loop and every worker.
pub struct ServerState {
    pub config: Arc<Config>,
    pub registry: TrafficRegistry,
    pub writer: OrderedRecordWriter,
    pub replay: Option<FileReplaySource>,
    /// Record-side store for copies of edited files.
    pub record_edits: Option<EditStore>,
    /// Replay-side store holding the recorded copies to restore.
    pub replay_edits: Option<EditStore>,
    pub tracker: Mutex<EditTracker>,
}

impl ServerState {
    pub fn new(
        config: Arc<Config>,
        writer: OrderedRecordWriter,
        replay: Option<FileReplaySource>,
        record_edits: Option<EditStore>,
        replay_edits: Option<EditStore>,
    ) -> Self {
        let registry = TrafficRegistry::standard(Arc::clone(&config));
        let tracker = Mutex::new(EditTracker::new(config.ignore_dirs().to_vec()));
        Self {
            config,
            registry,
            writer,
            replay,
            record_edits,
            replay_edits,
            tracker,
        }
    }
}

/// Filesystem locations for one daemon run.
#[derive(Debug, Clone, Default)]
pub struct DaemonOptions {
    /// Record file; always written, truncated at startup.
    pub record_file: PathBuf,
    /// Previously written record to answer from.
    pub replay_file: Option<PathBuf>,
    /// Directory to store copies of edited files while recording.
    pub record_edits_dir: Option<PathBuf>,
    /// Directory holding recorded edit copies to restore while replaying.
    pub replay_edits_dir: Option<PathBuf>,
}

/// A runnable mockwire instance.
pub struct Daemon {
    state: Arc<ServerState>,
    dispatch: DispatchLoop,
}

impl Daemon {
    /// Build the daemon. Inability to open the record file or load the
    /// replay file is fatal here, before anything is announced.
    pub fn new(config: Config, options: DaemonOptions) -> Result<Self> {
        let config = Arc::new(config);
        let writer = OrderedRecordWriter::create(&options.record_file)?;
        let replay = options
            .replay_file
            .as_deref()
            .map(FileReplaySource::load)
            .transpose()?;
        let record_edits = options
            .record_edits_dir
            .map(EditStore::open)
            .transpose()?;
        let replay_edits = options
            .replay_edits_dir
            .map(EditStore::open)
            .transpose()?;

        let state = Arc::new(ServerState::new(
            config,
            writer,
            replay,
            record_edits,
            replay_edits,
        ));
        let dispatch = DispatchLoop::new(Arc::clone(&state));
        Ok(Self { state, dispatch })
    }

    pub fn state(&self) -> &Arc<ServerState> {
        &self.state
    }

    /// Bind an ephemeral port on the configured host.
    pub async fn bind(&self) -> Result<TcpListener> {
        let hostname = self.state.config.server.hostname.as_str();
        let listener = TcpListener::bind((hostname, 0)).await?;
        info!(
            address = %listener.local_addr()?,
            replaying = self.state.replay.is_some(),
            threaded = self.state.config.is_threaded(),
            "mockwire bound"
        );
        Ok(listener)
    }

    /// Write the discovery line to stdout and flush, so a launcher can read
    /// `host:port` before blocking on anything else.
    pub fn announce(&self, addr: SocketAddr) -> Result<()> {
        let mut stdout = std::io::stdout();
        writeln!(
            stdout,
            "{}:{}",
            self.state.config.server.hostname,
            addr.port()
        )?;
        stdout.flush()?;
        Ok(())
    }

    /// Drive the dispatch loop until shutdown.
    pub async fn run<L: Listener>(&self, listener: L) -> Result<()> {
        self.dispatch.run(listener).await
    }

    /// Request a cooperative shutdown: the loop stops accepting and joins
    /// in-flight workers before `run` returns.
    pub fn shutdown(&self) {
        self.dispatch.shutdown();
    }
}
