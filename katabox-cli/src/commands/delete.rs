//! Delete one sandbox, or every sandbox in a namespace.

use std::io::{BufRead, Write};

use crate::cli::GlobalFlags;
use clap::Args;

#[derive(Args, Debug)]
pub struct DeleteArgs {
    /// Sandbox name
    #[arg(index = 1)]
    pub name: String,

    /// Namespace
    #[arg(short = 'n', long, default_value = "default")]
    pub namespace: String,
}

pub async fn execute(args: DeleteArgs, global: &GlobalFlags) -> anyhow::Result<()> {
    let controller = global.create_controller()?;
    controller.delete(&args.name, &args.namespace).await?;
    println!("Sandbox {} deleted", args.name);
    Ok(())
}

#[derive(Args, Debug)]
pub struct DeleteAllArgs {
    /// Namespace
    #[arg(short = 'n', long, default_value = "default")]
    pub namespace: String,

    /// Skip the interactive confirmation
    #[arg(short = 'y', long = "yes")]
    pub yes: bool,
}

pub async fn execute_all(args: DeleteAllArgs, global: &GlobalFlags) -> anyhow::Result<()> {
    let controller = global.create_controller()?;

    let sandboxes = controller.list(Some(&args.namespace)).await?;
    if sandboxes.is_empty() {
        println!("No sandboxes found in namespace {}", args.namespace);
        return Ok(());
    }

    println!(
        "Found {} sandbox(es) in namespace {}:",
        sandboxes.len(),
        args.namespace
    );
    for state in &sandboxes {
        println!("  - {}", state.name);
    }

    if !args.yes && !confirm("Delete all of these sandboxes?")? {
        println!("Deletion cancelled");
        return Ok(());
    }

    let report = controller.delete_all(&args.namespace, true).await?;
    println!("Deleted {} sandbox(es)", report.deleted);
    if !report.failed.is_empty() {
        eprintln!("{} deletion(s) failed:", report.failed.len());
        for failure in &report.failed {
            eprintln!("  - {}: {}", failure.name, failure.error);
        }
        std::process::exit(1);
    }
    Ok(())
}

fn confirm(prompt: &str) -> anyhow::Result<bool> {
    print!("{} [y/N] ", prompt);
    std::io::stdout().flush()?;
    let mut line = String::new();
    std::io::stdin().lock().read_line(&mut line)?;
    Ok(matches!(line.trim(), "y" | "Y" | "yes"))
}
