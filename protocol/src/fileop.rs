use std::path::PathBuf;

use chrono::DateTime;
use chrono::Utc;
use serde::Deserialize;
use serde::Serialize;
use uuid::Uuid;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OperationType {
    Rename,
    Move,
    Delete,
    Copy,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FileOperationMetadata {
    pub confidence: f64,
    pub create_backup: bool,
    pub force: bool,
}

impl Default for FileOperationMetadata {
    fn default() -> Self {
        Self {
            confidence: 1.0,
            create_backup: false,
            force: false,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FileOperation {
    pub id: Uuid,
    pub op_type: OperationType,
    pub source_path: PathBuf,
    pub target_path: Option<PathBuf>,
    pub metadata: FileOperationMetadata,
}

impl FileOperation {
    pub fn new(
        op_type: OperationType,
        source_path: PathBuf,
        target_path: Option<PathBuf>,
        metadata: FileOperationMetadata,
    ) -> Self {
        Self {
            id: Uuid::new_v4(),
            op_type,
            source_path,
            target_path,
            metadata,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TransactionState {
    Open,
    Executing,
    Committed,
    RolledBack,
    Failed,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Transaction {
    pub id: Uuid,
    pub operations: Vec<FileOperation>,
    pub state: TransactionState,
    pub created_at: DateTime<Utc>,
    /// One backup path per operation that required one, in operation order.
    pub backup_refs: Vec<Option<PathBuf>>,
}

impl Transaction {
    pub fn new() -> Self {
        Self {
            id: Uuid::new_v4(),
            operations: Vec::new(),
            state: TransactionState::Open,
            created_at: Utc::now(),
            backup_refs: Vec::new(),
        }
    }
}

impl Default for Transaction {
    fn default() -> Self {
        Self::new()
    }
}
