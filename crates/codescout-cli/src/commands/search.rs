//! Search command - hybrid code search over the indexed workspace

use anyhow::Result;
use clap::{Args, ValueEnum};

use codescout_search::SearchOptions;

use crate::GlobalOptions;

/// Arguments for the search command
#[derive(Args, Debug)]
pub struct SearchArgs {
    /// Search query
    query: String,

    /// Maximum number of results to return
    #[arg(long, short = 'n')]
    limit: Option<usize>,

    /// Minimum vector similarity (0.0 - 1.0)
    #[arg(long)]
    min_score: Option<f32>,

    /// Restrict results to paths under this directory
    #[arg(long, short = 'd')]
    dir: Option<String>,

    /// Output format: text (default), json
    #[arg(long, short = 'o', value_enum, default_value = "text")]
    output: OutputFormat,

    /// Include code snippets in text output
    #[arg(long, short = 's')]
    snippets: bool,
}

#[derive(Debug, Clone, Copy, ValueEnum)]
pub enum OutputFormat {
    /// Human-readable text output
    Text,
    /// JSON output for scripting
    Json,
}

/// Execute the search command
pub async fn execute(args: SearchArgs, global: GlobalOptions) -> Result<()> {
    let (manager, _progress) = super::create_manager(&global).await?;

    let options = SearchOptions {
        max_results: args.limit,
        min_score: args.min_score,
        directory_prefix: args.dir.clone(),
        ..Default::default()
    };

    let response = manager.search(&args.query, options).await?;

    match args.output {
        OutputFormat::Json => {
            println!("{}", serde_json::to_string_pretty(&response)?);
        }
        OutputFormat::Text => {
            if response.results.is_empty() {
                println!("No results.");
                return Ok(());
            }
            println!(
                "{} results (intent: {}, backends: {:?})\n",
                response.results.len(),
                response.query_analysis.intent,
                response.used_backends
            );
            for (rank, item) in response.results.iter().enumerate() {
                let name = item.identifier.as_deref().unwrap_or("<anonymous>");
                println!(
                    "{:2}. [{:.3}] {}:{}-{}  {}",
                    rank + 1,
                    item.score,
                    item.file_path,
                    item.start_line,
                    item.end_line,
                    name
                );
                if args.snippets {
                    if let Some(snippet) = &item.snippet {
                        for line in snippet.lines().take(6) {
                            println!("      {line}");
                        }
                        println!();
                    }
                }
            }
        }
    }

    Ok(())
}
