use std::path::Path;
use std::path::PathBuf;

use chrono::DateTime;
use chrono::Utc;
use serde::Deserialize;
use serde::Serialize;
use uuid::Uuid;

use crate::fileop::OperationType;

/// The exact inverse of a committed `FileOperation`. Kept as a typed enum
/// rather than a serialized blob: the journal never crosses a process
/// boundary, so there is nothing to gain from stringly-typed storage.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum ReverseOperation {
    /// Rename/move back to `from`.
    RenameBack { from: PathBuf },
    /// Restore a deleted file from its backup location.
    RestoreFromBackup { backup_path: PathBuf },
    /// Remove a file that was copied into existence.
    RemoveCopy,
    /// Undo an overwrite-move: rename the mover back to `from`, then restore
    /// the file it clobbered at the target from `target_backup`.
    RestoreOverwrittenTarget {
        from: PathBuf,
        target_backup: PathBuf,
    },
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct UndoData {
    pub reverse_operation: ReverseOperation,
    pub original_exists: bool,
    /// Ids of the still-committed JournalEntry records this operation's
    /// source path was chained off of (i.e. their `target_path` is this
    /// operation's `source_path`), recorded once at commit time so the
    /// journal stays append-only. `Journal::can_undo` reads this field back
    /// via a reverse lookup: entry E cannot be undone while some other
    /// committed entry F still lists E's id here, since F must be undone
    /// first to restore the path E's own reverse operation needs.
    pub dependencies: Vec<Uuid>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum JournalStatus {
    Committed,
    RolledBack,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct JournalEntry {
    pub id: Uuid,
    pub transaction_id: Uuid,
    pub operation_id: Uuid,
    pub op_type: OperationType,
    pub source_path: PathBuf,
    pub target_path: Option<PathBuf>,
    pub undo_data: UndoData,
    pub status: JournalStatus,
    pub timestamp: DateTime<Utc>,
}

/// Apply a reverse operation to the filesystem, undoing one committed (or
/// not-yet-journaled, mid-transaction) `FileOperation`. Shared by the
/// Operation Journal's explicit `undo_entry` and the Transactional File
/// Manager's mid-transaction compensation path, so both apply the exact same
/// inverse semantics.
///
/// `original_source_path` is the operation's pre-image `sourcePath`;
/// `committed_target_path` is its `targetPath`, if it had one (renames/moves/
/// copies do, deletes don't).
pub fn apply_reverse_operation(
    reverse: &ReverseOperation,
    original_source_path: &Path,
    committed_target_path: Option<&Path>,
) -> std::io::Result<()> {
    match reverse {
        ReverseOperation::RenameBack { from } => {
            let current = committed_target_path.ok_or_else(|| {
                std::io::Error::new(std::io::ErrorKind::InvalidInput, "missing target for undo")
            })?;
            std::fs::rename(current, from)
        }
        ReverseOperation::RestoreFromBackup { backup_path } => {
            std::fs::copy(backup_path, original_source_path)?;
            let _ = std::fs::remove_file(backup_path);
            Ok(())
        }
        ReverseOperation::RemoveCopy => {
            let target = committed_target_path.ok_or_else(|| {
                std::io::Error::new(std::io::ErrorKind::InvalidInput, "missing target for undo")
            })?;
            std::fs::remove_file(target)
        }
        ReverseOperation::RestoreOverwrittenTarget { from, target_backup } => {
            let current = committed_target_path.ok_or_else(|| {
                std::io::Error::new(std::io::ErrorKind::InvalidInput, "missing target for undo")
            })?;
            std::fs::rename(current, from)?;
            std::fs::copy(target_backup, current)?;
            let _ = std::fs::remove_file(target_backup);
            Ok(())
        }
    }
}
