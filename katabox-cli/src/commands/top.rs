//! Resource usage of running sandboxes.

use crate::cli::GlobalFlags;
use crate::formatter::{self, OutputFormat};
use clap::Args;
use katabox::SandboxMetrics;
use serde::Serialize;
use std::io::Write;
use tabled::Tabled;

#[derive(Args, Debug)]
pub struct TopArgs {
    /// Namespace
    #[arg(short = 'n', long, default_value = "default")]
    pub namespace: String,

    /// List across all namespaces
    #[arg(short = 'A', long = "all-namespaces")]
    pub all_namespaces: bool,

    /// Output format (table, json, yaml)
    #[arg(long, default_value = "table")]
    pub format: String,
}

#[derive(Tabled, Serialize)]
struct MetricsPresenter {
    #[tabled(rename = "NAME")]
    #[serde(rename = "name")]
    name: String,

    #[tabled(rename = "NAMESPACE")]
    #[serde(rename = "namespace")]
    namespace: String,

    #[tabled(rename = "CPU")]
    #[serde(rename = "cpu")]
    cpu: String,

    #[tabled(rename = "MEMORY")]
    #[serde(rename = "memory")]
    memory: String,
}

impl MetricsPresenter {
    fn from_metrics(metrics: &SandboxMetrics) -> Self {
        Self {
            name: metrics.name.clone(),
            namespace: metrics.namespace.clone(),
            cpu: metrics.cpu_usage.clone(),
            memory: metrics.memory_usage.clone(),
        }
    }
}

pub async fn execute(args: TopArgs, global: &GlobalFlags) -> anyhow::Result<()> {
    let format = OutputFormat::from_str(&args.format)?;
    let controller = global.create_controller()?;
    let namespace = (!args.all_namespaces).then_some(args.namespace.as_str());
    let metrics = controller.metrics(namespace).await?;
    let presenters: Vec<MetricsPresenter> =
        metrics.iter().map(MetricsPresenter::from_metrics).collect();

    formatter::print_output(
        &mut std::io::stdout().lock(),
        &presenters,
        format,
        |writer, data| {
            if data.is_empty() {
                writeln!(writer, "No running sandboxes with metrics")?;
            } else {
                writeln!(writer, "{}", formatter::create_table(data))?;
            }
            Ok(())
        },
    )
}
