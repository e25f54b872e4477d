//! Operation Journal: an append-only record of every operation the
//! Transactional File Manager has committed, with the data needed to undo it
//! later. Kept as an in-process, mutex-guarded structure with secondary
//! indices rather than a serialized log — this core has no requirement to
//! survive a process restart.

// Poisoned mutex should fail the program
#![allow(clippy::expect_used)]

use std::collections::HashMap;
use std::path::Path;
use std::path::PathBuf;
use std::sync::Mutex;

use chrono::Utc;
use curator_protocol::FileOperation;
use curator_protocol::JournalEntry;
use curator_protocol::JournalStatus;
use curator_protocol::ReverseOperation;
use curator_protocol::UndoData;
use serde::Serialize;
use uuid::Uuid;

use crate::error::FileOpsErr;
use crate::error::Result;

#[derive(Default)]
struct JournalState {
    entries: Vec<JournalEntry>,
    by_transaction: HashMap<Uuid, Vec<usize>>,
    by_source_path: HashMap<PathBuf, Vec<usize>>,
    by_target_path: HashMap<PathBuf, Vec<usize>>,
}

pub struct Journal {
    state: Mutex<JournalState>,
}

/// Structured result of `Journal::can_undo`, mirroring spec's
/// `canUndo(id) → {canUndo, reason?, dependencies?}`: a bare `bool` loses the
/// "why not" and "undo these first" information a caller (`curator undo`)
/// needs to report back to the user.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct UndoCheck {
    pub can_undo: bool,
    pub reason: Option<String>,
    /// `operation_id`s of the still-committed entries that block this undo,
    /// in no particular order.
    pub dependencies: Vec<Uuid>,
}

impl Journal {
    pub fn new() -> Self {
        Self {
            state: Mutex::new(JournalState::default()),
        }
    }

    /// Append a committed operation. Returns the stored entry (cloned out of
    /// the lock) so callers can track its id without holding the lock.
    pub fn record_operation(
        &self,
        transaction_id: Uuid,
        op: &FileOperation,
        undo_data: UndoData,
    ) -> JournalEntry {
        let entry = JournalEntry {
            id: Uuid::new_v4(),
            transaction_id,
            operation_id: op.id,
            op_type: op.op_type,
            source_path: op.source_path.clone(),
            target_path: op.target_path.clone(),
            undo_data,
            status: JournalStatus::Committed,
            timestamp: Utc::now(),
        };

        let mut state = self.state.lock().expect("journal mutex poisoned");
        let index = state.entries.len();
        state
            .by_transaction
            .entry(transaction_id)
            .or_default()
            .push(index);
        state
            .by_source_path
            .entry(entry.source_path.clone())
            .or_default()
            .push(index);
        if let Some(target) = &entry.target_path {
            state
                .by_target_path
                .entry(target.clone())
                .or_default()
                .push(index);
        }
        state.entries.push(entry.clone());
        entry
    }

    /// Rebuild a `Journal` from previously recorded entries, reusing
    /// `record_operation`'s own indexing rules. Used by a caller that
    /// persists `history()` across process boundaries on its own (the CLI's
    /// `curator undo`, for instance); this core's own journal never does so
    /// by itself.
    pub fn from_entries(entries: Vec<JournalEntry>) -> Self {
        let mut state = JournalState::default();
        for (index, entry) in entries.into_iter().enumerate() {
            state
                .by_transaction
                .entry(entry.transaction_id)
                .or_default()
                .push(index);
            state
                .by_source_path
                .entry(entry.source_path.clone())
                .or_default()
                .push(index);
            if let Some(target) = &entry.target_path {
                state.by_target_path.entry(target.clone()).or_default().push(index);
            }
            state.entries.push(entry);
        }
        Self {
            state: Mutex::new(state),
        }
    }

    pub fn entry(&self, entry_id: Uuid) -> Option<JournalEntry> {
        let state = self.state.lock().expect("journal mutex poisoned");
        state.entries.iter().find(|e| e.id == entry_id).cloned()
    }

    pub fn history_for_transaction(&self, transaction_id: Uuid) -> Vec<JournalEntry> {
        let state = self.state.lock().expect("journal mutex poisoned");
        state
            .by_transaction
            .get(&transaction_id)
            .into_iter()
            .flatten()
            .map(|&i| state.entries[i].clone())
            .collect()
    }

    pub fn history(&self) -> Vec<JournalEntry> {
        let state = self.state.lock().expect("journal mutex poisoned");
        state.entries.clone()
    }

    /// Still-committed entries whose `target_path` is `path` — the direct
    /// predecessors a new operation starting at `path` is chained off of.
    /// Used by the Transactional File Manager to populate a new entry's
    /// `undo_data.dependencies` at record time.
    pub fn entries_with_target_path(&self, path: &Path) -> Vec<JournalEntry> {
        let state = self.state.lock().expect("journal mutex poisoned");
        state
            .by_target_path
            .get(path)
            .into_iter()
            .flatten()
            .map(|&i| state.entries[i].clone())
            .filter(|e| e.status == JournalStatus::Committed)
            .collect()
    }

    /// An entry can be undone only if it is still `Committed` and nothing
    /// that depends on it has been undone out of order. Checks the typed
    /// `undo_data.dependencies` links recorded at commit time (a later entry
    /// chained off this one's target path lists this entry's id as a
    /// dependency) plus a path-based scan as a fallback for entries that
    /// touch the same path without a direct chain.
    pub fn can_undo(&self, entry_id: Uuid) -> UndoCheck {
        let state = self.state.lock().expect("journal mutex poisoned");
        Self::can_undo_locked(&state, entry_id)
    }

    fn can_undo_locked(state: &JournalState, entry_id: Uuid) -> UndoCheck {
        let Some(entry) = state.entries.iter().find(|e| e.id == entry_id) else {
            return UndoCheck {
                can_undo: false,
                reason: Some(format!("unknown journal entry {entry_id}")),
                dependencies: Vec::new(),
            };
        };
        if entry.status != JournalStatus::Committed {
            return UndoCheck {
                can_undo: false,
                reason: Some(format!("entry {entry_id} is already {:?}", entry.status)),
                dependencies: Vec::new(),
            };
        }

        let mut blocking: Vec<Uuid> = Vec::new();

        // Entries recorded with this one as a dependency (chained off this
        // entry's target path) must be undone first.
        for other in state
            .entries
            .iter()
            .filter(|e| e.id != entry.id && e.status == JournalStatus::Committed)
        {
            if other.undo_data.dependencies.contains(&entry.id) && !blocking.contains(&other.operation_id)
            {
                blocking.push(other.operation_id);
            }
        }

        // Fallback: later committed entries that touch the same path this
        // entry wrote to, even without a recorded dependency link.
        for other in state
            .entries
            .iter()
            .filter(|e| e.id != entry.id && e.status == JournalStatus::Committed)
            .filter(|e| e.timestamp >= entry.timestamp)
        {
            let touches_same_path = other.source_path == entry.source_path
                || other.target_path == entry.target_path
                || Some(&other.source_path) == entry.target_path.as_ref();
            if touches_same_path && !blocking.contains(&other.operation_id) {
                blocking.push(other.operation_id);
            }
        }

        if blocking.is_empty() {
            UndoCheck {
                can_undo: true,
                reason: None,
                dependencies: Vec::new(),
            }
        } else {
            UndoCheck {
                can_undo: false,
                reason: Some(format!(
                    "{} later committed operation(s) must be undone first",
                    blocking.len()
                )),
                dependencies: blocking,
            }
        }
    }

    /// Apply an entry's reverse operation to the filesystem and mark it
    /// rolled back. Used both by explicit undo requests and by the
    /// Transactional File Manager's mid-transaction compensation path.
    pub fn undo_entry(&self, entry_id: Uuid) -> Result<()> {
        let mut state = self.state.lock().expect("journal mutex poisoned");
        let check = Self::can_undo_locked(&state, entry_id);
        if !check.can_undo {
            return Err(FileOpsErr::Compensation(
                check
                    .reason
                    .unwrap_or_else(|| format!("entry {entry_id} cannot be undone")),
            ));
        }
        let index = state
            .entries
            .iter()
            .position(|e| e.id == entry_id)
            .ok_or_else(|| FileOpsErr::Compensation(format!("unknown journal entry {entry_id}")))?;

        Self::apply_reverse(&state.entries[index])?;
        state.entries[index].status = JournalStatus::RolledBack;
        Ok(())
    }

    pub fn undo_transaction(&self, transaction_id: Uuid) -> Result<()> {
        let entry_ids: Vec<Uuid> = {
            let state = self.state.lock().expect("journal mutex poisoned");
            state
                .by_transaction
                .get(&transaction_id)
                .into_iter()
                .flatten()
                .map(|&i| state.entries[i].id)
                .collect()
        };
        // Undo in reverse commit order so dependents are cleared first.
        for entry_id in entry_ids.into_iter().rev() {
            self.undo_entry(entry_id)?;
        }
        Ok(())
    }

    fn apply_reverse(entry: &JournalEntry) -> Result<()> {
        curator_protocol::apply_reverse_operation(
            &entry.undo_data.reverse_operation,
            &entry.source_path,
            entry.target_path.as_deref(),
        )
        .map_err(|e| {
            FileOpsErr::Compensation(format!(
                "failed to undo {} ({:?}): {e}",
                entry.source_path.display(),
                entry.undo_data.reverse_operation
            ))
        })
    }
}

impl Default for Journal {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    #![allow(clippy::unwrap_used)]
    use super::*;
    use curator_protocol::FileOperationMetadata;
    use curator_protocol::OperationType;
    use std::fs;
    use tempfile::tempdir;

    fn op(source: PathBuf, target: Option<PathBuf>) -> FileOperation {
        FileOperation::new(OperationType::Move, source, target, FileOperationMetadata::default())
    }

    #[test]
    fn undo_moves_file_back_to_its_original_location() {
        let dir = tempdir().unwrap();
        let source = dir.path().join("a.txt");
        let target = dir.path().join("b.txt");
        fs::write(&source, "hi").unwrap();
        fs::rename(&source, &target).unwrap();

        let journal = Journal::new();
        let undo_data = UndoData {
            reverse_operation: ReverseOperation::RenameBack {
                from: source.clone(),
            },
            original_exists: true,
            dependencies: Vec::new(),
        };
        let entry = journal.record_operation(
            Uuid::new_v4(),
            &op(source.clone(), Some(target.clone())),
            undo_data,
        );

        assert!(journal.can_undo(entry.id).can_undo);
        journal.undo_entry(entry.id).unwrap();
        assert!(source.exists());
        assert!(!target.exists());
        assert_eq!(
            journal.entry(entry.id).unwrap().status,
            JournalStatus::RolledBack
        );
    }

    #[test]
    fn cannot_undo_out_of_order_when_a_later_entry_overwrote_the_target() {
        let dir = tempdir().unwrap();
        let a_source = dir.path().join("a.txt");
        let b = dir.path().join("b.txt");
        let c = dir.path().join("c.txt");
        fs::write(&a_source, "hi").unwrap();
        fs::rename(&a_source, &b).unwrap();
        fs::rename(&b, &c).unwrap();

        let journal = Journal::new();
        let txn = Uuid::new_v4();
        let first = journal.record_operation(
            txn,
            &op(a_source.clone(), Some(b.clone())),
            UndoData {
                reverse_operation: ReverseOperation::RenameBack {
                    from: a_source.clone(),
                },
                original_exists: true,
                dependencies: Vec::new(),
            },
        );
        std::thread::sleep(std::time::Duration::from_millis(2));
        let second = journal.record_operation(
            txn,
            &op(b.clone(), Some(c.clone())),
            UndoData {
                reverse_operation: ReverseOperation::RenameBack { from: b.clone() },
                original_exists: true,
                dependencies: Vec::new(),
            },
        );

        let blocked = journal.can_undo(first.id);
        assert!(!blocked.can_undo);
        assert_eq!(blocked.dependencies, vec![second.operation_id]);
        assert!(journal.can_undo(second.id).can_undo);
        journal.undo_entry(second.id).unwrap();
        assert!(journal.can_undo(first.id).can_undo);
    }

    #[test]
    fn undo_transaction_reverses_every_entry_in_commit_order() {
        let dir = tempdir().unwrap();
        let a_source = dir.path().join("a.txt");
        let b = dir.path().join("b.txt");
        fs::write(&a_source, "hi").unwrap();
        fs::rename(&a_source, &b).unwrap();

        let journal = Journal::new();
        let txn = Uuid::new_v4();
        journal.record_operation(
            txn,
            &op(a_source.clone(), Some(b.clone())),
            UndoData {
                reverse_operation: ReverseOperation::RenameBack {
                    from: a_source.clone(),
                },
                original_exists: true,
                dependencies: Vec::new(),
            },
        );

        journal.undo_transaction(txn).unwrap();
        assert!(a_source.exists());
        assert!(!b.exists());
    }

    #[test]
    fn from_entries_rebuilds_undo_ordering_after_a_round_trip() {
        let dir = tempdir().unwrap();
        let source = dir.path().join("a.txt");
        let target = dir.path().join("b.txt");
        fs::write(&source, "hi").unwrap();
        fs::rename(&source, &target).unwrap();

        let original = Journal::new();
        let entry = original.record_operation(
            Uuid::new_v4(),
            &op(source.clone(), Some(target.clone())),
            UndoData {
                reverse_operation: ReverseOperation::RenameBack {
                    from: source.clone(),
                },
                original_exists: true,
                dependencies: Vec::new(),
            },
        );

        let reloaded = Journal::from_entries(original.history());
        assert!(reloaded.can_undo(entry.id).can_undo);
        reloaded.undo_entry(entry.id).unwrap();
        assert!(source.exists());
        assert!(!target.exists());
    }
}
