//! Interfaces-only boundaries for components out of scope for this core: the
//! directory scanner's file-metadata store and the suggestion store. Neither
//! trait is implemented in production here; the core only consumes them.

use chrono::DateTime;
use chrono::Utc;
use serde::Deserialize;
use serde::Serialize;
use uuid::Uuid;

use crate::suggestion::Suggestion;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FileRecord {
    pub id: Uuid,
    pub path: String,
    pub size: u64,
    pub mtime: DateTime<Utc>,
}

/// Read-mostly collaborator owned by the directory scanner / DB layer.
pub trait FileMetadataStore: Send + Sync {
    fn get_file_by_id(&self, file_id: Uuid) -> Option<FileRecord>;
    fn get_files_by_root_path(&self, root_path: &str) -> Vec<FileRecord>;
    /// Optional: reflect a new path after a move/rename commits.
    fn upsert_file(&self, _record: FileRecord) {}
}

/// Read-only collaborator: the core never mutates an approved suggestion.
pub trait SuggestionStore: Send + Sync {
    fn approved_suggestions(&self) -> Vec<Suggestion>;
}
