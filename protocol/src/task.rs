use std::collections::HashMap;
use std::time::Duration;

use chrono::DateTime;
use chrono::Utc;
use serde::Deserialize;
use serde::Serialize;
use serde_json::Value;
use uuid::Uuid;

/// Lower number = higher priority (`Critical=0` ..
/// `Low=3`). `Ord` is derived in declaration order so `Priority::Critical <
/// Priority::Low` holds and a `BinaryHeap`/sorted-bucket scheduler can compare
/// priorities directly.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Priority {
    Critical = 0,
    High = 1,
    Normal = 2,
    Low = 3,
}

impl Priority {
    pub const ALL: [Priority; 4] = [
        Priority::Critical,
        Priority::High,
        Priority::Normal,
        Priority::Low,
    ];
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TaskState {
    Queued,
    Running,
    Completed,
    Failed,
    Cancelled,
    Timeout,
}

impl TaskState {
    pub fn is_terminal(self) -> bool {
        matches!(
            self,
            TaskState::Completed | TaskState::Failed | TaskState::Cancelled | TaskState::Timeout
        )
    }
}

/// Analysis strategy for a `FileAnalysis` task.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum AnalysisType {
    Classification,
    Summary,
    Extraction,
    Custom { template: String },
}

/// Whether `BatchProcessing` fans files out sequentially or with bounded
/// parallelism.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BatchStrategy {
    Sequential,
    BoundedParallel,
}

/// Ad-hoc polymorphic task payloads, discriminated by a real tagged enum
/// instead of a `type` string.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum TaskKind {
    FileAnalysis {
        file_path: String,
        analysis_type: AnalysisType,
        model: String,
        expected_response_format: ResponseFormat,
    },
    BatchProcessing {
        file_paths: Vec<String>,
        model: String,
        analysis_type: AnalysisType,
        strategy: BatchStrategy,
        batch_size: usize,
    },
    HealthCheck,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ResponseFormat {
    Text,
    Json,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Task {
    pub id: Uuid,
    pub kind: TaskKind,
    pub priority: Priority,
    pub state: TaskState,
    pub created_at: DateTime<Utc>,
    pub started_at: Option<DateTime<Utc>>,
    pub completed_at: Option<DateTime<Utc>>,
    pub timeout_ms: u64,
    pub retry_count: u32,
    pub max_retries: u32,
    pub estimated_memory_mb: Option<u64>,
    pub metadata: HashMap<String, Value>,
}

impl Task {
    pub fn new(kind: TaskKind, priority: Priority, timeout_ms: u64, max_retries: u32) -> Self {
        Self {
            id: Uuid::new_v4(),
            kind,
            priority,
            state: TaskState::Queued,
            created_at: Utc::now(),
            started_at: None,
            completed_at: None,
            timeout_ms,
            retry_count: 0,
            max_retries,
            estimated_memory_mb: None,
            metadata: HashMap::new(),
        }
    }

    pub fn deadline(&self) -> Option<DateTime<Utc>> {
        self.started_at
            .map(|started| started + chrono::Duration::milliseconds(self.timeout_ms as i64))
    }

    pub fn timeout(&self) -> Duration {
        Duration::from_millis(self.timeout_ms)
    }
}

/// A concurrent execution unit reserved for one running task.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Slot {
    pub slot_id: Uuid,
    pub task_id: Uuid,
    pub model_name: Option<String>,
    pub allocated_memory_mb: u64,
    pub start_time: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TaskResult {
    pub task_id: Uuid,
    pub success: bool,
    pub result: Option<Value>,
    pub error: Option<String>,
    pub execution_time_ms: u64,
    pub memory_used_mb: u64,
}

#[cfg(test)]
mod tests {
    use pretty_assertions::assert_eq;
    use super::*;

    #[test]
    fn file_analysis_kind_is_unchanged_by_a_json_round_trip() {
        let kind = TaskKind::FileAnalysis {
            file_path: "/tmp/report.txt".to_string(),
            analysis_type: AnalysisType::Custom {
                template: "{{content}}".to_string(),
            },
            model: "llama3".to_string(),
            expected_response_format: ResponseFormat::Json,
        };
        let raw = serde_json::to_string(&kind).expect("serialize");
        let restored: TaskKind = serde_json::from_str(&raw).expect("deserialize");
        assert_eq!(kind, restored);
    }

    #[test]
    fn priority_orders_critical_before_low() {
        assert!(Priority::Critical < Priority::High);
        assert!(Priority::High < Priority::Normal);
        assert!(Priority::Normal < Priority::Low);
    }

    #[test]
    fn new_task_starts_queued_with_no_timestamps() {
        let task = Task::new(TaskKind::HealthCheck, Priority::Normal, 30_000, 3);
        assert_eq!(task.state, TaskState::Queued);
        assert!(task.started_at.is_none());
        assert!(task.completed_at.is_none());
        assert_eq!(task.retry_count, 0);
    }

    #[test]
    fn terminal_states_are_identified() {
        assert!(TaskState::Completed.is_terminal());
        assert!(TaskState::Failed.is_terminal());
        assert!(TaskState::Cancelled.is_terminal());
        assert!(TaskState::Timeout.is_terminal());
        assert!(!TaskState::Queued.is_terminal());
        assert!(!TaskState::Running.is_terminal());
    }
}
