//! CodeScout CLI
//!
//! Indexes a workspace into vector + BM25 (+ optional graph) stores and
//! answers natural-language queries against them.

mod commands;
mod progress;

use std::path::PathBuf;

use anyhow::Result;
use clap::{Parser, Subcommand};
use tracing_subscriber::EnvFilter;

/// CodeScout - codebase indexing and hybrid search
#[derive(Parser, Debug)]
#[command(name = "codescout", version, about)]
struct Cli {
    #[command(flatten)]
    global: GlobalOptions,

    #[command(subcommand)]
    command: Command,
}

/// Options shared by every command
#[derive(clap::Args, Debug, Clone)]
pub struct GlobalOptions {
    /// Workspace root (defaults to the current directory)
    #[arg(long, short = 'w', global = true)]
    pub workspace: Option<PathBuf>,

    /// Suppress progress output
    #[arg(long, short = 'q', global = true, default_value_t = false)]
    pub quiet: bool,
}

impl GlobalOptions {
    /// Resolve the workspace root.
    pub fn workspace_root(&self) -> Result<PathBuf> {
        match &self.workspace {
            Some(path) => Ok(path.clone()),
            None => Ok(std::env::current_dir()?),
        }
    }
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Index the workspace (full scan; unchanged files are skipped)
    Index(commands::index::IndexArgs),
    /// Search the indexed workspace
    Search(commands::search::SearchArgs),
    /// Re-index on an interval, picking up file changes
    Watch(commands::watch::WatchArgs),
    /// Show index status and store statistics
    Status(commands::status::StatusArgs),
    /// Delete all indexed data for the workspace
    Clear(commands::clear::ClearArgs),
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn")),
        )
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();

    match cli.command {
        Command::Index(args) => commands::index::execute(args, cli.global).await,
        Command::Search(args) => commands::search::execute(args, cli.global).await,
        Command::Watch(args) => commands::watch::execute(args, cli.global).await,
        Command::Status(args) => commands::status::execute(args, cli.global).await,
        Command::Clear(args) => commands::clear::execute(args, cli.global).await,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_cli_parses_index_command() {
        let cli = Cli::try_parse_from(["codescout", "index", "--rebuild"]).unwrap();
        assert!(matches!(cli.command, Command::Index(args) if args.rebuild));
    }

    #[test]
    fn test_cli_parses_search_with_globals() {
        let cli = Cli::try_parse_from([
            "codescout",
            "search",
            "who calls UserService",
            "-n",
            "5",
            "--quiet",
            "-w",
            "/tmp/ws",
        ])
        .unwrap();
        assert!(cli.global.quiet);
        assert_eq!(cli.global.workspace.as_deref(), Some(std::path::Path::new("/tmp/ws")));
        assert!(matches!(cli.command, Command::Search(_)));
    }

    #[test]
    fn test_cli_rejects_unknown_command() {
        assert!(Cli::try_parse_from(["codescout", "frobnicate"]).is_err());
    }

    #[test]
    fn test_workspace_defaults_to_cwd() {
        let global = GlobalOptions {
            workspace: None,
            quiet: false,
        };
        assert!(global.workspace_root().is_ok());
    }
}
