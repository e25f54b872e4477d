//! Cross-invocation bridge for the Operation Journal. `curator_fileops::Journal`
//! deliberately never persists itself (it has no requirement to survive a
//! process restart as a library); this CLI is a collection of one-shot
//! invocations, though, so `curator approve` writes out `history()` here and
//! `curator undo` reloads it via `Journal::from_entries` to act on it.

use std::path::Path;

use curator_fileops::Journal;
use curator_protocol::JournalEntry;

const JOURNAL_FILE: &str = "journal.json";

pub fn journal_path(curator_home: &Path) -> std::path::PathBuf {
    curator_home.join(JOURNAL_FILE)
}

pub fn save(curator_home: &Path, entries: &[JournalEntry]) -> anyhow::Result<()> {
    std::fs::create_dir_all(curator_home)?;
    let path = journal_path(curator_home);
    let raw = serde_json::to_string_pretty(entries)?;
    std::fs::write(path, raw)?;
    Ok(())
}

pub fn load(curator_home: &Path) -> anyhow::Result<Journal> {
    let path = journal_path(curator_home);
    match std::fs::read_to_string(&path) {
        Ok(raw) => {
            let entries: Vec<JournalEntry> = serde_json::from_str(&raw)?;
            Ok(Journal::from_entries(entries))
        }
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(Journal::new()),
        Err(e) => Err(e.into()),
    }
}

#[cfg(test)]
mod tests {
    #![allow(clippy::unwrap_used)]
    use super::*;

    #[test]
    fn missing_journal_file_loads_as_empty() {
        let dir = tempfile::tempdir().unwrap();
        let journal = load(dir.path()).unwrap();
        assert!(journal.history().is_empty());
    }

    #[test]
    fn save_then_load_round_trips_entries() {
        let dir = tempfile::tempdir().unwrap();
        let journal = Journal::new();
        save(dir.path(), &journal.history()).unwrap();
        let reloaded = load(dir.path()).unwrap();
        assert!(reloaded.history().is_empty());
    }
}
