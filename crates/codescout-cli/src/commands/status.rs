//! Status command - index state and store statistics

use anyhow::Result;
use clap::{Args, ValueEnum};

use crate::GlobalOptions;

/// Arguments for the status command
#[derive(Args, Debug)]
pub struct StatusArgs {
    /// Output format: text (default), json
    #[arg(long, short = 'o', value_enum, default_value = "text")]
    output: StatusFormat,

    /// Emit the full diagnostic snapshot instead of the summary
    #[arg(long)]
    diagnostics: bool,
}

#[derive(Debug, Clone, Copy, ValueEnum)]
pub enum StatusFormat {
    Text,
    Json,
}

/// Execute the status command
pub async fn execute(args: StatusArgs, global: GlobalOptions) -> Result<()> {
    let (manager, _progress) = super::create_manager(&global).await?;

    if args.diagnostics {
        let snapshot = manager.get_diagnostic_snapshot().await;
        println!("{}", serde_json::to_string_pretty(&snapshot)?);
        return Ok(());
    }

    let status = manager.get_current_status().await;
    match args.output {
        StatusFormat::Json => {
            println!("{}", serde_json::to_string_pretty(&status)?);
        }
        StatusFormat::Text => {
            println!("System state : {}", status.state.system.as_str());
            println!("Vector state : {}", status.state.vector.as_str());
            println!("Graph state  : {}", status.state.graph.as_str());
            if let Some(message) = &status.state.message {
                println!("Message      : {message}");
            }
            println!("Cached files : {}", status.cached_files);
            println!(
                "Sparse index : {} documents, {} terms, avg len {:.1}",
                status.bm25.doc_count, status.bm25.term_count, status.bm25.avg_doc_len
            );
            println!(
                "Embedder     : {} ({}, dim {})",
                status.embedder.provider, status.embedder.model, status.embedder.dimension
            );
        }
    }

    Ok(())
}
