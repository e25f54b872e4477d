//! Shared CLI argument fragments reused across `curator-cli`'s subcommands,
//! gated behind the `cli` feature exactly as `codex-common`'s equivalents
//! are, so a non-CLI consumer of this crate never has to pull in `clap`.

use clap::Args;
use clap::ValueEnum;

use curator_core::ConfigOverrides;
use curator_protocol::Priority;

/// `--priority` value, mirroring `curator_protocol::Priority` so a caller
/// never has to depend on the protocol crate just to parse a flag.
#[derive(Clone, Copy, Debug, ValueEnum)]
#[value(rename_all = "kebab-case")]
pub enum PriorityArg {
    Critical,
    High,
    Normal,
    Low,
}

impl From<PriorityArg> for Priority {
    fn from(value: PriorityArg) -> Self {
        match value {
            PriorityArg::Critical => Priority::Critical,
            PriorityArg::High => Priority::High,
            PriorityArg::Normal => Priority::Normal,
            PriorityArg::Low => Priority::Low,
        }
    }
}

/// Output rendering chosen by `--output`.
#[derive(Clone, Copy, Debug, Default, ValueEnum)]
#[value(rename_all = "kebab-case")]
pub enum OutputFormatArg {
    #[default]
    Text,
    Json,
}

/// The subset of `ConfigOverrides` every subcommand that touches the Agent
/// Manager accepts on the command line, flattened into each subcommand's own
/// `Args` struct with `#[clap(flatten)]`.
#[derive(Args, Debug, Clone, Default)]
pub struct ConfigOverridesArgs {
    /// Hard cap on concurrent task executions.
    #[arg(long)]
    pub max_concurrent_slots: Option<usize>,

    /// Per-slot memory headroom multiplier.
    #[arg(long)]
    pub safety_factor: Option<f64>,

    /// Default per-task timeout, in milliseconds.
    #[arg(long)]
    pub task_timeout_ms: Option<u64>,

    /// Default per-task retry cap.
    #[arg(long)]
    pub max_retries: Option<u32>,

    /// Whether crossing the critical memory threshold triggers emergency mode.
    #[arg(long)]
    pub emergency_stop_enabled: Option<bool>,

    /// Directory the Transactional File Manager stages backups in.
    #[arg(long)]
    pub backup_dir: Option<std::path::PathBuf>,
}

impl From<ConfigOverridesArgs> for ConfigOverrides {
    fn from(value: ConfigOverridesArgs) -> Self {
        ConfigOverrides {
            max_concurrent_slots: value.max_concurrent_slots,
            safety_factor: value.safety_factor,
            task_timeout_ms: value.task_timeout_ms,
            max_retries: value.max_retries,
            emergency_stop_enabled: value.emergency_stop_enabled,
            backup_dir: value.backup_dir,
        }
    }
}
