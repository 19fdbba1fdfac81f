//! Clear command - wipe all indexed data for the workspace

use anyhow::Result;
use clap::Args;

use crate::progress::{finish_spinner, spinner};
use crate::GlobalOptions;

/// Arguments for the clear command
#[derive(Args, Debug)]
pub struct ClearArgs {
    /// Skip the confirmation prompt
    #[arg(long, short = 'y')]
    yes: bool,
}

/// Execute the clear command
pub async fn execute(args: ClearArgs, global: GlobalOptions) -> Result<()> {
    if !args.yes {
        let workspace = global.workspace_root()?;
        eprintln!(
            "This deletes all indexed data for {:?}. Re-run with --yes to confirm.",
            workspace
        );
        return Ok(());
    }

    let (manager, _progress) = super::create_manager(&global).await?;
    let pb = spinner("Clearing index data...", global.quiet);
    manager.clear_index_data().await?;
    finish_spinner(pb, "Index data cleared");
    Ok(())
}
