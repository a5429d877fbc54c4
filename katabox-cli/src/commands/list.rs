//! List sandboxes across one or all namespaces.

use crate::cli::GlobalFlags;
use crate::formatter::{self, OutputFormat};
use clap::Args;
use katabox::SandboxState;
use serde::Serialize;
use std::io::Write;
use tabled::Tabled;

#[derive(Args, Debug)]
pub struct ListArgs {
    /// Namespace to list
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
pub(crate) struct SandboxPresenter {
    #[tabled(rename = "NAME")]
    #[serde(rename = "name")]
    pub name: String,

    #[tabled(rename = "NAMESPACE")]
    #[serde(rename = "namespace")]
    pub namespace: String,

    #[tabled(rename = "STATUS")]
    #[serde(rename = "status")]
    pub status: String,

    #[tabled(rename = "RESTARTS")]
    #[serde(rename = "restarts")]
    pub restarts: i32,

    #[tabled(rename = "AGE")]
    #[serde(rename = "age")]
    pub age: String,

    #[tabled(rename = "IMAGE")]
    #[serde(rename = "image")]
    pub image: String,
}

impl SandboxPresenter {
    pub(crate) fn from_state(state: &SandboxState) -> Self {
        Self {
            name: state.name.clone(),
            namespace: state.namespace.clone(),
            status: state.status.to_string(),
            restarts: state.restarts,
            age: formatter::format_age(state.created_at),
            image: state.image.clone().unwrap_or_else(|| "-".to_string()),
        }
    }
}

pub async fn execute(args: ListArgs, global: &GlobalFlags) -> anyhow::Result<()> {
    let format = OutputFormat::from_str(&args.format)?;
    let controller = global.create_controller()?;
    let namespace = (!args.all_namespaces).then_some(args.namespace.as_str());
    let states = controller.list(namespace).await?;
    let presenters: Vec<SandboxPresenter> =
        states.iter().map(SandboxPresenter::from_state).collect();

    formatter::print_output(
        &mut std::io::stdout().lock(),
        &presenters,
        format,
        |writer, data| {
            if data.is_empty() {
                writeln!(writer, "No sandboxes found")?;
            } else {
                writeln!(writer, "{}", formatter::create_table(data))?;
            }
            Ok(())
        },
    )
}
