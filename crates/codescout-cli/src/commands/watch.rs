//! Watch command - periodic incremental re-indexing
//!
//! Polls the workspace on an interval. Each pass runs the incremental
//! pipeline, so an unchanged workspace produces zero writes and the pass
//! costs little more than hashing the files.

use std::time::Duration;

use anyhow::Result;
use clap::Args;
use tracing::warn;

use crate::progress::{finish_spinner, spinner};
use crate::GlobalOptions;

/// Arguments for the watch command
#[derive(Args, Debug)]
pub struct WatchArgs {
    /// Seconds between passes
    #[arg(long, short = 'i', default_value_t = 10)]
    interval: u64,
}

/// Execute the watch command
pub async fn execute(args: WatchArgs, global: GlobalOptions) -> Result<()> {
    let (manager, _progress) = super::create_manager(&global).await?;

    let pb = spinner("Initial indexing pass...", global.quiet);
    manager.start_indexing().await?;
    finish_spinner(pb, "Initial pass complete; watching for changes (Ctrl-C to stop)");

    let mut ticker = tokio::time::interval(Duration::from_secs(args.interval.max(1)));
    ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
    ticker.tick().await; // first tick fires immediately

    loop {
        tokio::select! {
            _ = tokio::signal::ctrl_c() => {
                manager.cancel_indexing();
                manager.stop_watcher();
                if !global.quiet {
                    eprintln!("Stopped.");
                }
                return Ok(());
            }
            _ = ticker.tick() => {
                if let Err(e) = manager.start_indexing().await {
                    warn!("Watch pass failed: {}", e);
                }
            }
        }
    }
}
