//! `curator approve`: run the Suggestion Execution Pipeline against a JSON
//! suggestions file and a JSON file-metadata file, commit transactions, and
//! persist the resulting journal entries so a later `curator undo` can act
//! on them.

use std::path::PathBuf;

use clap::Args;
use clap::ValueEnum;
use curator_common::OutputFormatArg;
use curator_core::Config;
use curator_core::ConfigToml;
use curator_core::pipeline::GroupingPolicy;
use curator_core::pipeline::PipelineConfig;
use curator_core::pipeline::SuggestionExecutionPipeline;
use serde::Serialize;
use uuid::Uuid;

use crate::journal_store;
use crate::store::JsonFileStore;
use crate::store::load_suggestions;

#[derive(Args, Debug)]
pub struct ApproveArgs {
    /// JSON array of `Suggestion` records to run through the pipeline.
    #[arg(long)]
    pub suggestions: PathBuf,

    /// JSON array of `FileRecord`s the suggestions' `file_id`s resolve against.
    #[arg(long)]
    pub files: PathBuf,

    #[arg(long, default_value_t = 0.0)]
    pub min_confidence: f64,

    /// Only these suggestion ids; everything else is excluded.
    #[arg(long = "include")]
    pub include_ids: Vec<Uuid>,

    /// These suggestion ids are always excluded.
    #[arg(long = "exclude")]
    pub exclude_ids: Vec<Uuid>,

    #[arg(long, value_enum, default_value = "none")]
    pub grouping: GroupingArg,

    #[arg(long, value_enum, default_value = "text")]
    pub output: OutputFormatArg,
}

#[derive(Clone, Copy, Debug, ValueEnum)]
#[value(rename_all = "kebab-case")]
pub enum GroupingArg {
    None,
    Confidence,
    Type,
    Directory,
}

impl From<GroupingArg> for GroupingPolicy {
    fn from(value: GroupingArg) -> Self {
        match value {
            GroupingArg::None => GroupingPolicy::None,
            GroupingArg::Confidence => GroupingPolicy::Confidence,
            GroupingArg::Type => GroupingPolicy::Type,
            GroupingArg::Directory => GroupingPolicy::Directory,
        }
    }
}

#[derive(Serialize)]
struct ApproveReport {
    committed_transactions: Vec<Uuid>,
    rolled_back_transactions: Vec<Uuid>,
    operations_committed: usize,
    operations_failed: usize,
    refused_reason: Option<String>,
}

pub async fn run(curator_home: PathBuf, args: ApproveArgs) -> anyhow::Result<()> {
    let toml_cfg = ConfigToml::load_from_home(&curator_home)?;
    let config = Config::load_from_base_config_with_overrides(toml_cfg, Default::default());

    let suggestions = load_suggestions(&args.suggestions)?;
    let files = JsonFileStore::load(&args.files)?;
    let selective = !args.include_ids.is_empty() || !args.exclude_ids.is_empty();

    let pipeline_config = PipelineConfig {
        min_confidence: args.min_confidence,
        include_ids: (!args.include_ids.is_empty()).then(|| args.include_ids.iter().copied().collect()),
        exclude_ids: args.exclude_ids.iter().copied().collect(),
        operation_types: None,
        grouping: args.grouping.into(),
        ..PipelineConfig::from_core_config(&config, selective)
    };

    let backup_dir = config.backup_dir.clone();
    let (outcome, entries) = tokio::task::spawn_blocking(move || {
        let pipeline = SuggestionExecutionPipeline::new(backup_dir);
        let outcome = pipeline.run(&suggestions, &files, &pipeline_config);
        (outcome, pipeline.journal().history())
    })
    .await?;

    journal_store::save(&curator_home, &entries)?;

    let report = ApproveReport {
        committed_transactions: outcome.committed_transactions,
        rolled_back_transactions: outcome.rolled_back_transactions,
        operations_committed: outcome.operations_committed,
        operations_failed: outcome.operations_failed,
        refused_reason: outcome.refused_reason.clone(),
    };

    match args.output {
        OutputFormatArg::Json => println!("{}", serde_json::to_string_pretty(&report)?),
        OutputFormatArg::Text => {
            println!(
                "{} operation(s) committed across {} transaction(s), {} failed",
                report.operations_committed,
                report.committed_transactions.len(),
                report.operations_failed
            );
            if let Some(reason) = &report.refused_reason {
                println!("refused: {reason}");
            }
        }
    }

    if outcome.refused_reason.is_some() {
        anyhow::bail!("pipeline run was refused; see the report above");
    }
    Ok(())
}
