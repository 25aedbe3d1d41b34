//! mockwire: traffic interception, recording and replay for test automation.
//!
//! A System Under Test is configured to talk to mockwire instead of its
//! real collaborators. In record mode, traffic is forwarded to the real
//! destination and everything is written to a log in strict arrival order;
//! in replay mode, traffic is answered from that log without touching the
//! real destination, reproducing prior behaviour deterministically. File
//! edits caused along the way are detected, stored, and on replay mapped
//! back onto the files the live run is editing.
//!
//! # Library Usage
//!
//! The primary API is the [`Daemon`] struct:
//!
//! ```ignore
//! use mockwire::{Config, Daemon, DaemonOptions};
//!
//! let daemon = Daemon::new(Config::default(), DaemonOptions {
//!     record_file: "mockwire.log".into(),
//!     ..Default::default()
//! })?;
//! let listener = daemon.bind().await?;
//! daemon.announce(listener.local_addr()?)?;
//! daemon.run(listener).await?;
//! ```

pub mod config;
pub mod daemon;
pub mod error;
pub mod fileedit;
pub mod pipeline;
pub mod record;
pub mod server;
pub mod traffic;

pub use config::Config;
pub use daemon::{Daemon, DaemonOptions, ServerState};
pub use error::{ConfigError, Error, ProtocolError, Result};
pub use fileedit::{EditSet, EditStore, EditTracker};
pub use pipeline::Pipeline;
pub use record::{FileReplaySource, OrderedRecordWriter};
pub use server::{DispatchLoop, Listener, StreamListener, TERMINATE_LITERAL};
pub use traffic::{BoxedTraffic, Direction, Traffic, TrafficRegistry};
