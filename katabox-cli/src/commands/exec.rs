//! One-shot command execution in a sandbox.

use std::io::Write;

use crate::cli::GlobalFlags;
use clap::Args;

#[derive(Args, Debug)]
pub struct ExecArgs {
    /// Sandbox name
    #[arg(index = 1)]
    pub name: String,

    /// Namespace
    #[arg(short = 'n', long, default_value = "default")]
    pub namespace: String,

    /// Command to run inside the sandbox
    #[arg(index = 2, last = true, required = true)]
    pub command: Vec<String>,
}

pub async fn execute(args: ExecArgs, global: &GlobalFlags) -> anyhow::Result<()> {
    let controller = global.create_controller()?;
    let command = args.command.join(" ");
    let result = controller
        .exec(&args.name, &args.namespace, &command)
        .await?;

    let mut stdout = std::io::stdout().lock();
    stdout.write_all(result.stdout.as_bytes())?;
    stdout.flush()?;
    if !result.stderr.is_empty() {
        let mut stderr = std::io::stderr().lock();
        stderr.write_all(result.stderr.as_bytes())?;
        stderr.flush()?;
    }

    if result.exit_code != 0 {
        std::process::exit(result.exit_code);
    }
    Ok(())
}
