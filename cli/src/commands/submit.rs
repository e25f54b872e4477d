//! `curator submit`: build one `Task`, run a fresh Agent Manager just long
//! enough to dispatch and complete it, print the `TaskResult`. One-shot by
//! design, the way `codex exec` runs a single turn and exits rather than
//! keeping a session alive.

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use clap::Args;
use clap::Subcommand;
use clap::ValueEnum;
use curator_common::ConfigOverridesArgs;
use curator_common::OutputFormatArg;
use curator_common::PriorityArg;
use curator_common::elapsed::format_duration;
use curator_core::AgentManager;
use curator_core::Config;
use curator_core::ConfigToml;
use curator_core::SysinfoHostMetricsSource;
use curator_inference::InferenceClient;
use curator_protocol::AnalysisType;
use curator_protocol::BatchStrategy;
use curator_protocol::CuratorEvent;
use curator_protocol::ResponseFormat;
use curator_protocol::Task;
use curator_protocol::TaskKind;

#[derive(Args, Debug)]
pub struct SubmitArgs {
    #[clap(flatten)]
    pub config_overrides: ConfigOverridesArgs,

    #[arg(long, value_enum, default_value = "normal")]
    pub priority: PriorityArg,

    #[arg(long)]
    pub timeout_ms: Option<u64>,

    #[arg(long)]
    pub max_retries: Option<u32>,

    /// Base URL of the Ollama-compatible inference daemon.
    #[arg(long, default_value = "http://127.0.0.1:11434")]
    pub daemon_url: String,

    #[arg(long, value_enum, default_value = "text")]
    pub output: OutputFormatArg,

    #[command(subcommand)]
    pub kind: TaskSpec,
}

#[derive(Subcommand, Debug)]
pub enum TaskSpec {
    /// Analyze a single file's content.
    FileAnalysis {
        #[arg(long)]
        path: String,
        #[arg(long, value_enum, default_value = "summary")]
        analysis_type: AnalysisTypeArg,
        #[arg(long)]
        model: String,
        #[arg(long, value_enum, default_value = "text")]
        response_format: ResponseFormatArg,
    },
    /// Analyze a batch of files.
    Batch {
        #[arg(long = "path")]
        paths: Vec<String>,
        #[arg(long, value_enum, default_value = "summary")]
        analysis_type: AnalysisTypeArg,
        #[arg(long)]
        model: String,
        #[arg(long, value_enum, default_value = "sequential")]
        strategy: BatchStrategyArg,
        #[arg(long, default_value_t = 1)]
        batch_size: usize,
    },
    /// A no-op task, useful for exercising scheduling without a daemon.
    HealthCheck,
}

#[derive(Clone, Copy, Debug, ValueEnum)]
#[value(rename_all = "kebab-case")]
pub enum AnalysisTypeArg {
    Classification,
    Summary,
    Extraction,
}

impl From<AnalysisTypeArg> for AnalysisType {
    fn from(value: AnalysisTypeArg) -> Self {
        match value {
            AnalysisTypeArg::Classification => AnalysisType::Classification,
            AnalysisTypeArg::Summary => AnalysisType::Summary,
            AnalysisTypeArg::Extraction => AnalysisType::Extraction,
        }
    }
}

#[derive(Clone, Copy, Debug, ValueEnum)]
#[value(rename_all = "kebab-case")]
pub enum ResponseFormatArg {
    Text,
    Json,
}

impl From<ResponseFormatArg> for ResponseFormat {
    fn from(value: ResponseFormatArg) -> Self {
        match value {
            ResponseFormatArg::Text => ResponseFormat::Text,
            ResponseFormatArg::Json => ResponseFormat::Json,
        }
    }
}

#[derive(Clone, Copy, Debug, ValueEnum)]
#[value(rename_all = "kebab-case")]
pub enum BatchStrategyArg {
    Sequential,
    BoundedParallel,
}

impl From<BatchStrategyArg> for BatchStrategy {
    fn from(value: BatchStrategyArg) -> Self {
        match value {
            BatchStrategyArg::Sequential => BatchStrategy::Sequential,
            BatchStrategyArg::BoundedParallel => BatchStrategy::BoundedParallel,
        }
    }
}

fn task_kind_from_spec(spec: TaskSpec) -> TaskKind {
    match spec {
        TaskSpec::FileAnalysis {
            path,
            analysis_type,
            model,
            response_format,
        } => TaskKind::FileAnalysis {
            file_path: path,
            analysis_type: analysis_type.into(),
            model,
            expected_response_format: response_format.into(),
        },
        TaskSpec::Batch {
            paths,
            analysis_type,
            model,
            strategy,
            batch_size,
        } => TaskKind::BatchProcessing {
            file_paths: paths,
            model,
            analysis_type: analysis_type.into(),
            strategy: strategy.into(),
            batch_size,
        },
        TaskSpec::HealthCheck => TaskKind::HealthCheck,
    }
}

pub async fn run(curator_home: PathBuf, args: SubmitArgs) -> anyhow::Result<()> {
    let toml_cfg = ConfigToml::load_from_home(&curator_home)?;
    let config =
        Config::load_from_base_config_with_overrides(toml_cfg, args.config_overrides.into());

    let timeout_ms = args.timeout_ms.unwrap_or(config.task_timeout_ms);
    let max_retries = args.max_retries.unwrap_or(config.max_retries);
    let task = Task::new(task_kind_from_spec(args.kind), args.priority.into(), timeout_ms, max_retries);
    let task_id = task.id;

    let manager = Arc::new(AgentManager::new(
        config,
        Arc::new(SysinfoHostMetricsSource::new()),
        Arc::new(InferenceClient::new(args.daemon_url)),
    ));
    let events = manager.subscribe_events();
    Arc::clone(&manager).start().await;
    manager.submit(task);

    let wait = tokio::time::timeout(Duration::from_millis(timeout_ms) + Duration::from_secs(5), async {
        loop {
            match events.recv().await {
                Ok(CuratorEvent::TaskCompleted { task_id: id, .. }) if id == task_id => break Ok(()),
                Ok(CuratorEvent::TaskFailed { task_id: id, reason }) if id == task_id => {
                    break Err(anyhow::anyhow!(reason))
                }
                Ok(CuratorEvent::TaskCancelled { task_id: id, reason }) if id == task_id => {
                    break Err(anyhow::anyhow!("cancelled: {reason}"))
                }
                Ok(_) => continue,
                Err(_) => break Err(anyhow::anyhow!("event stream closed before task finished")),
            }
        }
    })
    .await;

    let result = manager
        .queue()
        .history()
        .into_iter()
        .rev()
        .find(|r| r.task_id == task_id);
    manager.stop().await;

    match wait {
        Err(_) => anyhow::bail!("task {task_id} did not finish within its timeout"),
        Ok(Err(e)) => {
            if let Some(result) = &result {
                print_result(args.output, result);
            }
            return Err(e);
        }
        Ok(Ok(())) => {}
    }

    match result {
        Some(result) => {
            print_result(args.output, &result);
            if !result.success {
                anyhow::bail!("task {task_id} failed: {}", result.error.unwrap_or_default());
            }
            Ok(())
        }
        None => anyhow::bail!("task {task_id} completed but left no recorded result"),
    }
}

fn print_result(output: OutputFormatArg, result: &curator_protocol::TaskResult) {
    match output {
        OutputFormatArg::Json => {
            println!("{}", serde_json::to_string_pretty(result).unwrap_or_default());
        }
        OutputFormatArg::Text => {
            println!(
                "task {} {} in {}",
                result.task_id,
                if result.success { "succeeded" } else { "failed" },
                format_duration(Duration::from_millis(result.execution_time_ms))
            );
            if let Some(value) = &result.result {
                println!("{value}");
            }
            if let Some(error) = &result.error {
                println!("error: {error}");
            }
        }
    }
}
