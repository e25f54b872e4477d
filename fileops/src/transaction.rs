//! Transactional File Manager: the sole component in this core that mutates
//! the filesystem. A prepare/execute/commit pipeline with backup-then-
//! compensate rollback on partial failure, built around per-operation
//! bookkeeping collected while walking a batch.

use std::fs;
use std::path::PathBuf;

use curator_protocol::FileOperation;
use curator_protocol::OperationType;
use curator_protocol::ReverseOperation;
use curator_protocol::Transaction;
use curator_protocol::TransactionState;
use curator_protocol::UndoData;
use uuid::Uuid;

use crate::error::FileOpsErr;
use crate::error::Result;
use crate::journal::Journal;

/// Where per-transaction backups are written before a destructive operation
/// is applied.
#[derive(Debug, Clone)]
pub struct TransactionManager {
    backup_dir: PathBuf,
}

impl TransactionManager {
    pub fn new(backup_dir: impl Into<PathBuf>) -> Self {
        Self {
            backup_dir: backup_dir.into(),
        }
    }

    pub fn create_transaction(&self) -> Transaction {
        Transaction::new()
    }

    /// Execute every operation in `transaction` against the filesystem. A
    /// `JournalEntry` is written only once every operation has succeeded
    /// (the Commit step) — a mid-transaction failure rolls the filesystem
    /// back via compensation and leaves no trace in the journal. On the
    /// first failure, everything already applied in this transaction is
    /// reversed in reverse order before the error is returned.
    pub fn execute_transaction(
        &self,
        transaction: &mut Transaction,
        journal: &Journal,
    ) -> Result<Vec<Uuid>> {
        transaction.state = TransactionState::Executing;
        fs::create_dir_all(&self.backup_dir)?;

        let mut applied: Vec<(FileOperation, UndoData)> = Vec::new();

        for op in transaction.operations.clone() {
            match self.apply_operation(&op, transaction.id) {
                Ok(undo_data) => {
                    let backup_path = match &undo_data.reverse_operation {
                        ReverseOperation::RestoreFromBackup { backup_path } => {
                            Some(backup_path.clone())
                        }
                        ReverseOperation::RestoreOverwrittenTarget { target_backup, .. } => {
                            Some(target_backup.clone())
                        }
                        _ => None,
                    };
                    transaction.backup_refs.push(backup_path);
                    applied.push((op, undo_data));
                }
                Err(err) => {
                    let compensation_failed = self.rollback(transaction.id, &applied);
                    transaction.state = if compensation_failed {
                        TransactionState::Failed
                    } else {
                        TransactionState::RolledBack
                    };
                    return Err(err);
                }
            }
        }

        let entry_ids = applied
            .into_iter()
            .map(|(op, mut undo_data)| {
                // This operation is chained off whichever still-committed
                // entries produced its source path; record their ids so
                // `Journal::can_undo` can block undoing them out of order.
                undo_data.dependencies = journal
                    .entries_with_target_path(&op.source_path)
                    .into_iter()
                    .map(|prior| prior.id)
                    .collect();
                journal.record_operation(transaction.id, &op, undo_data).id
            })
            .collect();
        transaction.state = TransactionState::Committed;
        Ok(entry_ids)
    }

    fn apply_operation(&self, op: &FileOperation, transaction_id: Uuid) -> Result<UndoData> {
        match op.op_type {
            OperationType::Delete => self.apply_delete(op, transaction_id),
            OperationType::Rename | OperationType::Move => self.apply_move(op, transaction_id),
            OperationType::Copy => self.apply_copy(op),
        }
    }

    fn apply_delete(&self, op: &FileOperation, transaction_id: Uuid) -> Result<UndoData> {
        let backup_path = self.backup_path_for(op.id, transaction_id);
        fs::copy(&op.source_path, &backup_path).map_err(|e| {
            FileOpsErr::Execution(format!(
                "failed to back up {} before delete: {e}",
                op.source_path.display()
            ))
        })?;
        fs::remove_file(&op.source_path).map_err(|e| {
            FileOpsErr::Execution(format!("failed to delete {}: {e}", op.source_path.display()))
        })?;
        Ok(UndoData {
            reverse_operation: ReverseOperation::RestoreFromBackup {
                backup_path,
            },
            original_exists: true,
            dependencies: Vec::new(),
        })
    }

    /// An overwrite-move (target exists, `force` set) backs up the file it
    /// is about to clobber before the rename, so compensation can restore
    /// it rather than silently destroying it.
    fn apply_move(&self, op: &FileOperation, transaction_id: Uuid) -> Result<UndoData> {
        let target = op
            .target_path
            .as_ref()
            .ok_or_else(|| FileOpsErr::Validation("move/rename requires a target".into()))?;

        let overwriting = target.exists();
        if overwriting && !op.metadata.force {
            return Err(FileOpsErr::Execution(format!(
                "target {} already exists",
                target.display()
            )));
        }

        if let Some(parent) = target.parent() {
            fs::create_dir_all(parent)?;
        }

        let target_backup = if overwriting {
            let backup_path = self.backup_path_for(op.id, transaction_id);
            fs::copy(target, &backup_path).map_err(|e| {
                FileOpsErr::Execution(format!(
                    "failed to back up {} before overwrite: {e}",
                    target.display()
                ))
            })?;
            Some(backup_path)
        } else {
            None
        };

        fs::rename(&op.source_path, target).map_err(|e| {
            FileOpsErr::Execution(format!(
                "failed to move {} to {}: {e}",
                op.source_path.display(),
                target.display()
            ))
        })?;

        let reverse_operation = match target_backup {
            Some(target_backup) => ReverseOperation::RestoreOverwrittenTarget {
                from: op.source_path.clone(),
                target_backup,
            },
            None => ReverseOperation::RenameBack {
                from: op.source_path.clone(),
            },
        };

        Ok(UndoData {
            reverse_operation,
            original_exists: true,
            dependencies: Vec::new(),
        })
    }

    fn apply_copy(&self, op: &FileOperation) -> Result<UndoData> {
        let target = op
            .target_path
            .as_ref()
            .ok_or_else(|| FileOpsErr::Validation("copy requires a target".into()))?;

        if target.exists() && !op.metadata.force {
            return Err(FileOpsErr::Execution(format!(
                "target {} already exists",
                target.display()
            )));
        }

        if let Some(parent) = target.parent() {
            fs::create_dir_all(parent)?;
        }

        fs::copy(&op.source_path, target).map_err(|e| {
            FileOpsErr::Execution(format!(
                "failed to copy {} to {}: {e}",
                op.source_path.display(),
                target.display()
            ))
        })?;

        Ok(UndoData {
            reverse_operation: ReverseOperation::RemoveCopy,
            original_exists: false,
            dependencies: Vec::new(),
        })
    }

    /// Reverse every operation applied so far in this (never-journaled)
    /// transaction, most recent first. Returns `true` if compensation itself
    /// failed for any step — the one fatal case (`TransactionState::Failed`,
    /// operator intervention required); otherwise the transaction is
    /// cleanly `RolledBack`.
    fn rollback(&self, transaction_id: Uuid, applied: &[(FileOperation, UndoData)]) -> bool {
        let mut compensation_failed = false;
        for (op, undo_data) in applied.iter().rev() {
            if let Err(err) = curator_protocol::apply_reverse_operation(
                &undo_data.reverse_operation,
                &op.source_path,
                op.target_path.as_deref(),
            ) {
                tracing::error!(
                    transaction_id = %transaction_id,
                    source = %op.source_path.display(),
                    error = %err,
                    "compensation failed while rolling back transaction"
                );
                compensation_failed = true;
            }
        }
        compensation_failed
    }

    fn backup_path_for(&self, operation_id: Uuid, transaction_id: Uuid) -> PathBuf {
        self.backup_dir
            .join(format!("{transaction_id}-{operation_id}.bak"))
    }

    pub fn status(&self, transaction: &Transaction) -> TransactionState {
        transaction.state
    }
}
