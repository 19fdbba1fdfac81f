//! Index command - full or incremental workspace indexing

use anyhow::Result;
use clap::Args;

use crate::progress::{finish_spinner, finish_spinner_error, spinner};
use crate::GlobalOptions;

/// Arguments for the index command
#[derive(Args, Debug)]
pub struct IndexArgs {
    /// Drop all existing index data first
    #[arg(long)]
    pub rebuild: bool,
}

/// Execute the index command
pub async fn execute(args: IndexArgs, global: GlobalOptions) -> Result<()> {
    let (manager, progress) = super::create_manager(&global).await?;

    if args.rebuild {
        let pb = spinner("Clearing existing index data...", global.quiet);
        manager.clear_index_data().await?;
        finish_spinner(pb, "Existing index data cleared");
    }

    let pb = spinner("Indexing workspace...", global.quiet);

    // Mirror live progress into the spinner message
    let mut events = progress.subscribe();
    let watcher_pb = pb.clone();
    let reporter = tokio::spawn(async move {
        while let Ok(event) = events.recv().await {
            if let Some(pb) = &watcher_pb {
                pb.set_message(format!(
                    "Indexing: {}/{} files, {} blocks",
                    event.processed_files, event.total_files, event.processed_blocks
                ));
            }
        }
    });

    let result = manager.start_indexing().await;
    reporter.abort();

    match result {
        Ok(()) => {
            let status = manager.get_current_status().await;
            finish_spinner(
                pb,
                &format!(
                    "Indexed {} files ({} blocks in the sparse index)",
                    status.cached_files, status.bm25.doc_count
                ),
            );
            Ok(())
        }
        Err(e) => {
            finish_spinner_error(pb, &format!("Indexing failed: {e}"));
            Err(e.into())
        }
    }
}
