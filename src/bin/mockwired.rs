//! mockwired daemon - traffic interception, record and replay server.

use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{Context, Result};
use clap::Parser;
use tokio::signal;
use tracing::{info, Level};
use tracing_subscriber::FmtSubscriber;

use mockwire::{Config, Daemon, DaemonOptions};

#[derive(Parser)]
#[command(
    name = "mockwired",
    about = "Traffic interception, record and replay server"
)]
struct Cli {
    /// Record file to write intercepted traffic to.
    record: PathBuf,

    /// Previously recorded file to replay answers from.
    #[arg(long)]
    replay: Option<PathBuf>,

    /// Directory to store copies of edited files while recording.
    #[arg(long)]
    record_edits: Option<PathBuf>,

    /// Directory holding recorded edit copies to restore while replaying.
    #[arg(long)]
    replay_edits: Option<PathBuf>,

    /// Configuration files; later files override earlier ones.
    #[arg(short, long)]
    config: Vec<PathBuf>,

    /// Handle connections inline instead of in worker tasks.
    #[arg(long)]
    serial: bool,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let subscriber = FmtSubscriber::builder()
        .with_max_level(Level::INFO)
        .with_writer(std::io::stderr)
        .finish();
    tracing::subscriber::set_global_default(subscriber)?;

    let mut config = if cli.config.is_empty() {
        Config::default()
    } else {
        Config::load_layered(&cli.config).context("Failed to load configuration")?
    };
    if cli.serial {
        config.server.threaded = false;
    }

    let options = DaemonOptions {
        record_file: cli.record,
        replay_file: cli.replay,
        record_edits_dir: cli.record_edits,
        replay_edits_dir: cli.replay_edits,
    };
    let daemon =
        Arc::new(Daemon::new(config, options).context("Failed to create daemon")?);

    let listener = daemon.bind().await.context("Failed to bind listener")?;
    let addr = listener.local_addr()?;
    // A launcher reads this line to learn where to point the SUT.
    daemon.announce(addr).context("Failed to announce address")?;

    let mut run = tokio::spawn({
        let daemon = Arc::clone(&daemon);
        async move { daemon.run(listener).await }
    });

    tokio::select! {
        result = &mut run => {
            result.context("Dispatch loop panicked")??;
        }
        _ = signal::ctrl_c() => {
            info!("received interrupt, draining");
            daemon.shutdown();
            run.await.context("Dispatch loop panicked")??;
        }
    }

    Ok(())
}
