//! Show one sandbox.

use crate::cli::GlobalFlags;
use crate::commands::list::SandboxPresenter;
use crate::formatter::{self, OutputFormat};
use clap::Args;
use std::io::Write;

#[derive(Args, Debug)]
pub struct GetArgs {
    /// Sandbox name
    #[arg(index = 1)]
    pub name: String,

    /// Namespace
    #[arg(short = 'n', long, default_value = "default")]
    pub namespace: String,

    /// Output format (table, json, yaml)
    #[arg(long, default_value = "table")]
    pub format: String,
}

pub async fn execute(args: GetArgs, global: &GlobalFlags) -> anyhow::Result<()> {
    let format = OutputFormat::from_str(&args.format)?;
    let controller = global.create_controller()?;
    let state = controller.get(&args.name, &args.namespace).await?;
    let presenters = vec![SandboxPresenter::from_state(&state)];

    formatter::print_output(
        &mut std::io::stdout().lock(),
        &presenters,
        format,
        |writer, data| {
            writeln!(writer, "{}", formatter::create_table(data))?;
            if let Some(reason) = &state.reason {
                writeln!(writer, "Reason: {}", reason)?;
            }
            Ok(())
        },
    )
}
