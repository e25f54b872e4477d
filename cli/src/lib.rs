pub mod commands;
mod journal_store;
mod store;

use std::path::PathBuf;

use clap::Parser;
use clap::Subcommand;

use commands::approve::ApproveArgs;
use commands::status::StatusArgs;
use commands::submit::SubmitArgs;
use commands::undo::UndoArgs;

/// Curator CLI: a thin, scriptable front end onto the Agent Manager and
/// Suggestion Execution Pipeline, standing in for the desktop UI's
/// scan-review-apply flow.
#[derive(Debug, Parser)]
#[clap(author, version)]
pub struct Cli {
    /// Override the directory `config.toml` and the journal export are read
    /// from (defaults to `CURATOR_HOME`, then `~/.config/curator`).
    #[arg(long, global = true)]
    pub curator_home: Option<PathBuf>,

    #[command(subcommand)]
    pub command: Command,
}

#[derive(Debug, Subcommand)]
pub enum Command {
    /// Submit one task and wait for it to finish.
    Submit(SubmitArgs),
    /// Report current slot capacity and system health.
    Status(StatusArgs),
    /// Run approved suggestions through the Suggestion Execution Pipeline.
    Approve(ApproveArgs),
    /// Roll back a previously committed journal entry or transaction.
    Undo(UndoArgs),
}

pub async fn run(cli: Cli) -> anyhow::Result<()> {
    let curator_home = match cli.curator_home {
        Some(path) => path,
        None => curator_core::find_curator_home()?,
    };
    tracing::debug!(curator_home = %curator_home.display(), command = ?cli.command, "dispatching");

    match cli.command {
        Command::Submit(args) => commands::submit::run(curator_home, args).await,
        Command::Status(args) => commands::status::run(curator_home, args).await,
        Command::Approve(args) => commands::approve::run(curator_home, args).await,
        Command::Undo(args) => commands::undo::run(curator_home, args).await,
    }
}
