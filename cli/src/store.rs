//! JSON-file-backed stand-in for the directory scanner's file-metadata store
//! and the suggestion store (modeled as traits in `curator_protocol::collab`).
//! A desktop UI would back these with a real database; this CLI reads two
//! flat JSON files instead so `curator approve` is exercisable without a
//! scanner or a GUI.

// Poisoned mutex should fail the program
#![allow(clippy::expect_used)]

use std::collections::HashMap;
use std::path::Path;
use std::sync::Mutex;

use curator_protocol::FileMetadataStore;
use curator_protocol::FileRecord;
use curator_protocol::Suggestion;
use uuid::Uuid;

pub struct JsonFileStore {
    files: Mutex<HashMap<Uuid, FileRecord>>,
}

impl JsonFileStore {
    pub fn load(path: &Path) -> anyhow::Result<Self> {
        let raw = std::fs::read_to_string(path)
            .map_err(|e| anyhow::anyhow!("reading {}: {e}", path.display()))?;
        let records: Vec<FileRecord> = serde_json::from_str(&raw)
            .map_err(|e| anyhow::anyhow!("parsing {} as a FileRecord array: {e}", path.display()))?;
        let files = records.into_iter().map(|r| (r.id, r)).collect();
        Ok(Self {
            files: Mutex::new(files),
        })
    }
}

impl FileMetadataStore for JsonFileStore {
    fn get_file_by_id(&self, file_id: Uuid) -> Option<FileRecord> {
        self.files.lock().expect("file store mutex poisoned").get(&file_id).cloned()
    }

    fn get_files_by_root_path(&self, root_path: &str) -> Vec<FileRecord> {
        self.files
            .lock()
            .expect("file store mutex poisoned")
            .values()
            .filter(|f| f.path.starts_with(root_path))
            .cloned()
            .collect()
    }

    fn upsert_file(&self, record: FileRecord) {
        self.files.lock().expect("file store mutex poisoned").insert(record.id, record);
    }
}

pub fn load_suggestions(path: &Path) -> anyhow::Result<Vec<Suggestion>> {
    let raw = std::fs::read_to_string(path)
        .map_err(|e| anyhow::anyhow!("reading {}: {e}", path.display()))?;
    serde_json::from_str(&raw)
        .map_err(|e| anyhow::anyhow!("parsing {} as a Suggestion array: {e}", path.display()))
}
