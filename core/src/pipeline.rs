//! Suggestion Execution Pipeline: filter approved suggestions, convert each
//! into a `FileOperation`, validate the whole batch, group into batches,
//! execute each batch as a Transaction with its own retry/backoff, and stop
//! early on a bad failure rate.

// Poisoned mutex should fail the program
#![allow(clippy::expect_used)]

use std::collections::HashMap;
use std::collections::HashSet;
use std::path::Path;
use std::path::PathBuf;
use std::time::Duration;

use curator_fileops::FileOpsErr;
use curator_fileops::Journal;
use curator_fileops::TransactionManager;
use curator_fileops::ValidationReport;
use curator_fileops::ValidatorConfig;
use curator_fileops::validate_batch;
use curator_protocol::FileMetadataStore;
use curator_protocol::FileOperation;
use curator_protocol::FileOperationMetadata;
use curator_protocol::FileRecord;
use curator_protocol::OperationType;
use curator_protocol::Severity;
use curator_protocol::Suggestion;
use curator_protocol::Transaction;
use uuid::Uuid;

use crate::config::Config;

/// Retry backoff for recoverable operation failures: 1s, 2s, 4s.
/// Permission/system errors (`FileOpsErr::Validation`, `FileOpsErr::Io`)
/// are never retried.
const RETRY_BACKOFFS_SECS: [u64; 3] = [1, 2, 4];
const DEFAULT_FAILURE_RATE_CEILING: f64 = 0.20;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum GroupingPolicy {
    None,
    Confidence,
    Type,
    Directory,
}

#[derive(Debug, Clone)]
pub struct PipelineConfig {
    pub min_confidence: f64,
    pub include_ids: Option<HashSet<Uuid>>,
    pub exclude_ids: HashSet<Uuid>,
    pub operation_types: Option<HashSet<OperationType>>,
    pub grouping: GroupingPolicy,
    pub max_batch_size: usize,
    pub max_retry_attempts: u32,
    pub validator_config: ValidatorConfig,
}

impl PipelineConfig {
    /// Build a config from the core's effective `Config`. Batch size is 50
    /// normally, 25 when `selective` (the run was scoped by an explicit id
    /// set rather than "everything approved").
    pub fn from_core_config(config: &Config, selective: bool) -> Self {
        Self {
            min_confidence: 0.0,
            include_ids: None,
            exclude_ids: HashSet::new(),
            operation_types: None,
            grouping: GroupingPolicy::None,
            max_batch_size: if selective { 25 } else { config.max_batch_size },
            max_retry_attempts: 4,
            validator_config: ValidatorConfig::default(),
        }
    }
}

#[derive(Debug, Clone, Default)]
pub struct PipelineOutcome {
    pub committed_transactions: Vec<Uuid>,
    pub rolled_back_transactions: Vec<Uuid>,
    pub operations_committed: usize,
    pub operations_failed: usize,
    pub refused_reason: Option<String>,
    pub validation_report: Option<ValidationReport>,
}

/// Runs approved suggestions through to committed (or rolled-back)
/// filesystem transactions. Owns the Transactional File Manager and the
/// Operation Journal those transactions are recorded to; both outlive any
/// single `run()` call so a later `curator undo` can replay the journal.
pub struct SuggestionExecutionPipeline {
    transactions: TransactionManager,
    journal: Journal,
}

impl SuggestionExecutionPipeline {
    pub fn new(backup_dir: impl Into<PathBuf>) -> Self {
        Self {
            transactions: TransactionManager::new(backup_dir),
            journal: Journal::new(),
        }
    }

    pub fn journal(&self) -> &Journal {
        &self.journal
    }

    pub fn run(
        &self,
        suggestions: &[Suggestion],
        files: &dyn FileMetadataStore,
        config: &PipelineConfig,
    ) -> PipelineOutcome {
        let selected = filter_suggestions(suggestions, config);
        if selected.is_empty() {
            return PipelineOutcome::default();
        }

        let mut converted = Vec::new();
        for suggestion in selected {
            let Some(file) = files.get_file_by_id(suggestion.file_id) else {
                // Dangling reference to a file the store no longer knows
                // about; skip rather than fail the whole run.
                continue;
            };
            let operation = convert_to_operation(suggestion, &file);
            if let Some(allowed) = &config.operation_types {
                if !allowed.contains(&operation.op_type) {
                    continue;
                }
            }
            converted.push((suggestion.clone(), operation));
        }

        if converted.is_empty() {
            return PipelineOutcome::default();
        }

        let ops: Vec<FileOperation> = converted.iter().map(|(_, op)| op.clone()).collect();
        let report = validate_batch(&ops, &config.validator_config);
        let has_critical = report
            .errors
            .iter()
            .any(|issue| issue.severity == Severity::Critical);

        if has_critical || !report.is_valid {
            let reason = if has_critical {
                "critical validation error; refusing the run"
            } else {
                "validation errors present; refusing the run"
            };
            return PipelineOutcome {
                refused_reason: Some(reason.to_string()),
                validation_report: Some(report),
                ..Default::default()
            };
        }

        let groups = group_operations(converted, config.grouping);
        let batches = chunk_groups(groups, config.max_batch_size);
        let total_ops: usize = batches.iter().map(Vec::len).sum();

        let mut outcome = PipelineOutcome {
            validation_report: Some(report),
            ..Default::default()
        };
        let mut failed_so_far = 0usize;

        for batch in batches {
            let mut transaction = self.transactions.create_transaction();
            transaction.operations = batch.into_iter().map(|(_, op)| op).collect();
            let batch_size = transaction.operations.len();

            match self.execute_with_retry(&mut transaction, config.max_retry_attempts) {
                Ok(applied) => {
                    outcome.committed_transactions.push(transaction.id);
                    outcome.operations_committed += applied.len();
                }
                Err(err) => {
                    outcome.rolled_back_transactions.push(transaction.id);
                    outcome.operations_failed += batch_size;
                    failed_so_far += batch_size;

                    let is_critical_error = matches!(err, FileOpsErr::Validation(_));
                    let failure_rate = failed_so_far as f64 / total_ops.max(1) as f64;
                    if is_critical_error || failure_rate >= DEFAULT_FAILURE_RATE_CEILING {
                        outcome.refused_reason =
                            Some(format!("stopping after batch failure: {err}"));
                        break;
                    }
                }
            }
        }

        outcome
    }

    /// Retry a batch's execution on recoverable failures with the spec's
    /// fixed backoff schedule. Permission/system errors propagate on the
    /// first attempt.
    fn execute_with_retry(
        &self,
        transaction: &mut Transaction,
        max_attempts: u32,
    ) -> curator_fileops::Result<Vec<Uuid>> {
        let mut attempt = 0u32;
        loop {
            attempt += 1;
            match self.transactions.execute_transaction(transaction, &self.journal) {
                Ok(applied) => return Ok(applied),
                Err(err) => {
                    let retryable = matches!(err, FileOpsErr::Execution(_));
                    if !retryable || attempt >= max_attempts {
                        return Err(err);
                    }
                    let wait_secs = RETRY_BACKOFFS_SECS
                        .get((attempt - 1) as usize)
                        .copied()
                        .unwrap_or(4);
                    std::thread::sleep(Duration::from_secs(wait_secs));

                    let ops = transaction.operations.clone();
                    *transaction = self.transactions.create_transaction();
                    transaction.operations = ops;
                }
            }
        }
    }
}

fn filter_suggestions<'a>(suggestions: &'a [Suggestion], config: &PipelineConfig) -> Vec<&'a Suggestion> {
    suggestions
        .iter()
        .filter(|s| s.adjusted_confidence >= config.min_confidence)
        .filter(|s| match &config.include_ids {
            Some(ids) => ids.contains(&s.id),
            None => true,
        })
        .filter(|s| !config.exclude_ids.contains(&s.id))
        .collect()
}

/// Whether `suggested_value` names a path elsewhere in the tree (a move)
/// rather than just a new basename in the same directory (a rename).
fn is_move(suggested_value: &str) -> bool {
    suggested_value.contains('/') || suggested_value.contains('\\')
}

/// Target path: preserve the source directory and extension unless the
/// suggestion supplies both itself.
fn derive_target_path(source: &Path, suggested_value: &str) -> PathBuf {
    let suggested = Path::new(suggested_value);
    let has_dir = suggested.parent().is_some_and(|p| !p.as_os_str().is_empty());
    let has_ext = suggested.extension().is_some();

    if has_dir && has_ext {
        return suggested.to_path_buf();
    }

    let dir = source.parent().map(Path::to_path_buf).unwrap_or_default();
    if has_ext {
        let filename = suggested
            .file_name()
            .map(|f| f.to_os_string())
            .unwrap_or_else(|| suggested.as_os_str().to_os_string());
        return dir.join(filename);
    }

    match source.extension() {
        Some(ext) => dir.join(format!("{suggested_value}.{}", ext.to_string_lossy())),
        None => dir.join(suggested_value),
    }
}

fn convert_to_operation(suggestion: &Suggestion, file: &FileRecord) -> FileOperation {
    let source_path = PathBuf::from(&file.path);
    let target_path = derive_target_path(&source_path, &suggestion.suggested_value);
    let op_type = if is_move(&suggestion.suggested_value) {
        OperationType::Move
    } else {
        OperationType::Rename
    };

    FileOperation::new(
        op_type,
        source_path,
        Some(target_path),
        FileOperationMetadata {
            confidence: suggestion.adjusted_confidence,
            create_backup: true,
            force: false,
        },
    )
}

type SuggestionOp = (Suggestion, FileOperation);

fn group_operations(ops: Vec<SuggestionOp>, policy: GroupingPolicy) -> Vec<Vec<SuggestionOp>> {
    match policy {
        GroupingPolicy::None => vec![ops],
        GroupingPolicy::Confidence => {
            let mut high = Vec::new();
            let mut medium = Vec::new();
            let mut low = Vec::new();
            for pair in ops {
                let bucket = if pair.0.adjusted_confidence >= 0.9 {
                    &mut high
                } else if pair.0.adjusted_confidence >= 0.7 {
                    &mut medium
                } else {
                    &mut low
                };
                bucket.push(pair);
            }
            [high, medium, low].into_iter().filter(|b| !b.is_empty()).collect()
        }
        GroupingPolicy::Type => {
            let mut by_type: HashMap<OperationType, Vec<SuggestionOp>> = HashMap::new();
            for pair in ops {
                by_type.entry(pair.1.op_type).or_default().push(pair);
            }
            by_type.into_values().collect()
        }
        GroupingPolicy::Directory => {
            let mut by_dir: HashMap<PathBuf, Vec<SuggestionOp>> = HashMap::new();
            for pair in ops {
                let dir = pair.1.source_path.parent().map(Path::to_path_buf).unwrap_or_default();
                by_dir.entry(dir).or_default().push(pair);
            }
            by_dir.into_values().collect()
        }
    }
}

fn chunk_groups(groups: Vec<Vec<SuggestionOp>>, max_batch_size: usize) -> Vec<Vec<SuggestionOp>> {
    let size = max_batch_size.max(1);
    let mut out = Vec::new();
    for group in groups {
        for slice in group.chunks(size) {
            out.push(slice.to_vec());
        }
    }
    out
}

#[cfg(test)]
mod tests {
    #![allow(clippy::unwrap_used)]
    use super::*;
    use curator_protocol::AnalysisType;
    use std::sync::Mutex;
    use tempfile::tempdir;

    struct TestStore {
        files: Mutex<HashMap<Uuid, FileRecord>>,
    }

    impl FileMetadataStore for TestStore {
        fn get_file_by_id(&self, file_id: Uuid) -> Option<FileRecord> {
            self.files.lock().expect("store mutex poisoned").get(&file_id).cloned()
        }

        fn get_files_by_root_path(&self, _root_path: &str) -> Vec<FileRecord> {
            Vec::new()
        }
    }

    fn suggestion(file_id: Uuid, suggested_value: &str, confidence: f64) -> Suggestion {
        Suggestion {
            id: Uuid::new_v4(),
            file_id,
            suggested_value: suggested_value.to_string(),
            adjusted_confidence: confidence,
            analysis_type: AnalysisType::Classification,
            is_recommended: true,
        }
    }

    #[test]
    fn below_threshold_suggestions_are_dropped_before_conversion() {
        let dir = tempdir().unwrap();
        let source = dir.path().join("report.txt");
        std::fs::write(&source, "x").unwrap();
        let file_id = Uuid::new_v4();
        let store = TestStore {
            files: Mutex::new(HashMap::from([(
                file_id,
                FileRecord {
                    id: file_id,
                    path: source.to_string_lossy().to_string(),
                    size: 1,
                    mtime: chrono::Utc::now(),
                },
            )])),
        };

        let pipeline = SuggestionExecutionPipeline::new(dir.path().join("backups"));
        let config = PipelineConfig {
            min_confidence: 0.5,
            ..PipelineConfig::from_core_config(&Config::default(), false)
        };
        let low_confidence = suggestion(file_id, "renamed.txt", 0.1);
        let outcome = pipeline.run(&[low_confidence], &store, &config);

        assert_eq!(outcome.operations_committed, 0);
        assert!(outcome.refused_reason.is_none());
    }

    #[test]
    fn approved_rename_commits_a_transaction_and_moves_the_file() {
        let dir = tempdir().unwrap();
        let source = dir.path().join("draft.txt");
        std::fs::write(&source, "hello").unwrap();
        let file_id = Uuid::new_v4();
        let store = TestStore {
            files: Mutex::new(HashMap::from([(
                file_id,
                FileRecord {
                    id: file_id,
                    path: source.to_string_lossy().to_string(),
                    size: 5,
                    mtime: chrono::Utc::now(),
                },
            )])),
        };

        let pipeline = SuggestionExecutionPipeline::new(dir.path().join("backups"));
        let config = PipelineConfig::from_core_config(&Config::default(), false);
        let approved = suggestion(file_id, "final-report", 0.95);
        let outcome = pipeline.run(&[approved], &store, &config);

        assert_eq!(outcome.operations_committed, 1);
        assert_eq!(outcome.committed_transactions.len(), 1);
        assert!(!source.exists());
        assert!(dir.path().join("final-report.txt").exists());
    }

    #[test]
    fn critical_validation_failure_refuses_the_whole_run() {
        let dir = tempdir().unwrap();
        let file_id = Uuid::new_v4();
        let store = TestStore {
            files: Mutex::new(HashMap::from([(
                file_id,
                FileRecord {
                    id: file_id,
                    path: dir.path().join("missing.txt").to_string_lossy().to_string(),
                    size: 0,
                    mtime: chrono::Utc::now(),
                },
            )])),
        };

        let pipeline = SuggestionExecutionPipeline::new(dir.path().join("backups"));
        let config = PipelineConfig::from_core_config(&Config::default(), false);
        let approved = suggestion(file_id, "renamed.txt", 0.95);
        let outcome = pipeline.run(&[approved], &store, &config);

        assert_eq!(outcome.operations_committed, 0);
        assert!(outcome.refused_reason.is_some());
    }

    #[test]
    fn confidence_grouping_buckets_high_medium_low() {
        let a = (suggestion(Uuid::new_v4(), "a", 0.95), test_op("a"));
        let b = (suggestion(Uuid::new_v4(), "b", 0.75), test_op("b"));
        let c = (suggestion(Uuid::new_v4(), "c", 0.2), test_op("c"));
        let groups = group_operations(vec![a, b, c], GroupingPolicy::Confidence);
        assert_eq!(groups.len(), 3);
    }

    fn test_op(name: &str) -> FileOperation {
        FileOperation::new(
            OperationType::Rename,
            PathBuf::from(format!("/tmp/{name}")),
            Some(PathBuf::from(format!("/tmp/{name}-renamed"))),
            FileOperationMetadata::default(),
        )
    }
}
