//! `curator status`: a one-shot read of the system health sample and the
//! slot capacity it implies, without dispatching anything.

use std::path::PathBuf;

use clap::Args;
use curator_common::ConfigOverridesArgs;
use curator_common::OutputFormatArg;
use curator_core::AgentManager;
use curator_core::Config;
use curator_core::ConfigToml;
use curator_core::SysinfoHostMetricsSource;
use curator_inference::InferenceClient;
use serde::Serialize;
use std::sync::Arc;

#[derive(Args, Debug)]
pub struct StatusArgs {
    #[clap(flatten)]
    pub config_overrides: ConfigOverridesArgs,

    #[arg(long, default_value = "http://127.0.0.1:11434")]
    pub daemon_url: String,

    #[arg(long, value_enum, default_value = "text")]
    pub output: OutputFormatArg,
}

#[derive(Serialize)]
struct StatusReport {
    total_slots: usize,
    available_slots: usize,
    queued: usize,
    running: usize,
    memory_pressure: f64,
    memory_available_for_agents_mb: u64,
    emergency_mode: bool,
}

pub async fn run(curator_home: PathBuf, args: StatusArgs) -> anyhow::Result<()> {
    let toml_cfg = ConfigToml::load_from_home(&curator_home)?;
    let config =
        Config::load_from_base_config_with_overrides(toml_cfg, args.config_overrides.into());

    let manager = AgentManager::new(
        config,
        Arc::new(SysinfoHostMetricsSource::new()),
        Arc::new(InferenceClient::new(args.daemon_url)),
    );
    manager.recompute_slot_capacity().await;
    let status = manager.status().await;

    let report = StatusReport {
        total_slots: status.total_slots,
        available_slots: status.available_slots,
        queued: status.queued,
        running: status.running_count,
        memory_pressure: status.memory_utilization,
        memory_available_for_agents_mb: status.health.memory.available_for_agents_mb,
        emergency_mode: status.emergency_mode,
    };

    match args.output {
        OutputFormatArg::Json => println!("{}", serde_json::to_string_pretty(&report)?),
        OutputFormatArg::Text => {
            println!(
                "slots: {}/{} available, {} queued, {} running",
                report.available_slots, report.total_slots, report.queued, report.running
            );
            println!(
                "memory: {:.1}% pressure, {} MiB available for agents",
                report.memory_pressure * 100.0,
                report.memory_available_for_agents_mb
            );
            if report.emergency_mode {
                println!("EMERGENCY MODE ACTIVE");
            }
        }
    }

    Ok(())
}
