//! `curator undo`: reload the journal persisted by `curator approve` and
//! roll back one entry or an entire transaction.

use std::path::PathBuf;

use clap::Args;
use curator_common::OutputFormatArg;
use serde::Serialize;
use uuid::Uuid;

use crate::journal_store;

#[derive(Args, Debug)]
pub struct UndoArgs {
    /// Undo a single journal entry by its id.
    #[arg(long, conflicts_with = "transaction")]
    pub entry: Option<Uuid>,

    /// Undo every entry belonging to this transaction, in reverse commit order.
    #[arg(long, conflicts_with = "entry")]
    pub transaction: Option<Uuid>,

    #[arg(long, value_enum, default_value = "text")]
    pub output: OutputFormatArg,
}

/// Mirrors `Journal::can_undo`'s structured result so a refused `--entry`
/// undo reports its `reason` and blocking `dependencies` instead of just
/// propagating `undo_entry`'s error.
#[derive(Serialize)]
struct UndoReport {
    undone: bool,
    entry: Option<Uuid>,
    transaction: Option<Uuid>,
    reason: Option<String>,
    dependencies: Vec<Uuid>,
}

pub async fn run(curator_home: PathBuf, args: UndoArgs) -> anyhow::Result<()> {
    let journal = journal_store::load(&curator_home)?;

    let report = match (args.entry, args.transaction) {
        (Some(entry_id), None) => {
            let check = journal.can_undo(entry_id);
            if check.can_undo {
                journal.undo_entry(entry_id)?;
            }
            UndoReport {
                undone: check.can_undo,
                entry: Some(entry_id),
                transaction: None,
                reason: check.reason,
                dependencies: check.dependencies,
            }
        }
        (None, Some(transaction_id)) => {
            journal.undo_transaction(transaction_id)?;
            UndoReport {
                undone: true,
                entry: None,
                transaction: Some(transaction_id),
                reason: None,
                dependencies: Vec::new(),
            }
        }
        _ => anyhow::bail!("specify exactly one of --entry or --transaction"),
    };

    journal_store::save(&curator_home, &journal.history())?;
    print_report(args.output, &report)?;

    if !report.undone {
        let reason = report.reason.as_deref().unwrap_or("blocked by later entries");
        if let Some(entry_id) = report.entry {
            anyhow::bail!("entry {entry_id} cannot be undone: {reason}");
        }
        anyhow::bail!("undo refused: {reason}");
    }
    Ok(())
}

fn print_report(output: OutputFormatArg, report: &UndoReport) -> anyhow::Result<()> {
    match output {
        OutputFormatArg::Json => println!("{}", serde_json::to_string_pretty(report)?),
        OutputFormatArg::Text => match (report.undone, report.entry, report.transaction) {
            (true, Some(entry_id), _) => println!("undid entry {entry_id}"),
            (true, _, Some(transaction_id)) => println!("undid transaction {transaction_id}"),
            (false, Some(entry_id), _) => {
                println!(
                    "cannot undo entry {entry_id}: {}",
                    report.reason.as_deref().unwrap_or("blocked by later entries")
                );
                if !report.dependencies.is_empty() {
                    println!("undo these first: {:?}", report.dependencies);
                }
            }
            _ => {}
        },
    }
    Ok(())
}
