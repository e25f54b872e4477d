//! Shared data model and event vocabulary for the Curator agent-scheduling
//! and transactional file-operation core.
//!
//! This crate holds types only: no I/O, no locking, no scheduling logic.
//! Every other crate in the workspace depends on it.

pub mod collab;
pub mod error;
pub mod events;
pub mod fileop;
pub mod health;
pub mod journal;
pub mod model;
pub mod suggestion;
pub mod task;

pub use collab::FileMetadataStore;
pub use collab::FileRecord;
pub use collab::SuggestionStore;
pub use error::Severity;
pub use events::CuratorEvent;
pub use fileop::FileOperation;
pub use fileop::FileOperationMetadata;
pub use fileop::OperationType;
pub use fileop::Transaction;
pub use fileop::TransactionState;
pub use health::CpuSnapshot;
pub use health::MemorySnapshot;
pub use health::SystemHealth;
pub use journal::JournalEntry;
pub use journal::JournalStatus;
pub use journal::ReverseOperation;
pub use journal::UndoData;
pub use journal::apply_reverse_operation;
pub use model::ModelDescriptor;
pub use suggestion::Suggestion;
pub use task::AnalysisType;
pub use task::BatchStrategy;
pub use task::Priority;
pub use task::ResponseFormat;
pub use task::Slot;
pub use task::Task;
pub use task::TaskKind;
pub use task::TaskResult;
pub use task::TaskState;
