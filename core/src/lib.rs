//! Root of the `curator-core` library: the Agent Manager, System Monitor,
//! Priority Task Queue, and Suggestion Execution Pipeline that sit on top of
//! `curator-protocol`, `curator-fileops`, and `curator-inference`.

// Prevent accidental direct writes to stdout/stderr in library code. All
// user-visible output must go through the appropriate abstraction (e.g. the
// CLI or the tracing stack).
#![deny(clippy::print_stdout, clippy::print_stderr)]

pub mod agent_manager;
pub mod config;
pub mod error;
mod handlers;
pub mod monitor;
pub mod pipeline;
pub mod queue;

pub use agent_manager::AgentManager;
pub use agent_manager::AgentManagerStatus;
pub use config::Config;
pub use config::ConfigOverrides;
pub use config::ConfigToml;
pub use config::find_curator_home;
pub use error::AgentErr;
pub use error::Result;
pub use monitor::HostMetricsSource;
pub use monitor::SysinfoHostMetricsSource;
pub use pipeline::PipelineOutcome;
pub use pipeline::SuggestionExecutionPipeline;
pub use queue::PriorityQueue;
pub use queue::QueueStats;
