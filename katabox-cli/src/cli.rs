//! Command-line definition and dispatch.

use std::path::PathBuf;
use std::sync::Arc;

use clap::{Args, Parser, Subcommand};
use katabox::{ApiKeyStore, EngineOptions, HttpOrchestrator, LifecycleController};

use crate::commands;

#[derive(Parser, Debug)]
#[command(
    name = "katabox",
    version,
    about = "Manage VM-isolated code-execution sandboxes"
)]
pub struct Cli {
    #[command(flatten)]
    pub global: GlobalFlags,

    #[command(subcommand)]
    pub command: Command,
}

#[derive(Args, Debug)]
pub struct GlobalFlags {
    /// Kubeconfig used to reach the control plane
    #[arg(long, global = true, env = "KATABOX_KUBECONFIG", value_name = "PATH")]
    pub kubeconfig: Option<PathBuf>,
}

impl GlobalFlags {
    pub fn resolve_options(&self) -> anyhow::Result<EngineOptions> {
        let mut options = EngineOptions::from_env()?;
        if let Some(path) = &self.kubeconfig {
            options.kubeconfig = Some(path.clone());
        }
        Ok(options)
    }

    pub fn create_controller(&self) -> anyhow::Result<LifecycleController> {
        let options = self.resolve_options()?;
        tracing::debug!(kubeconfig = ?options.kubeconfig, "connecting to control plane");
        let orchestrator = HttpOrchestrator::from_kubeconfig(options.kubeconfig.as_deref())?;
        Ok(LifecycleController::new(Arc::new(orchestrator), options))
    }

    pub fn api_key_store(&self) -> anyhow::Result<ApiKeyStore> {
        let options = self.resolve_options()?;
        Ok(ApiKeyStore::new(options.api_keys_file))
    }
}

#[derive(Subcommand, Debug)]
pub enum Command {
    /// Create a sandbox from a YAML spec or CLI arguments
    Create(commands::create::CreateArgs),
    /// List sandboxes
    List(commands::list::ListArgs),
    /// Show one sandbox
    Get(commands::get::GetArgs),
    /// Delete a sandbox and all its objects
    Delete(commands::delete::DeleteArgs),
    /// Delete every sandbox in a namespace
    DeleteAll(commands::delete::DeleteAllArgs),
    /// Open an interactive shell in a sandbox (control-plane path)
    Shell(commands::shell::ShellArgs),
    /// Run a command in a sandbox and print its output
    Exec(commands::exec::ExecArgs),
    /// Show resource usage of running sandboxes
    Top(commands::top::TopArgs),
    /// Manage API keys for the remote interface
    #[command(subcommand)]
    Apikey(commands::apikey::ApiKeyCommand),
}

pub async fn dispatch(cli: Cli) -> anyhow::Result<()> {
    match cli.command {
        Command::Create(args) => commands::create::execute(args, &cli.global).await,
        Command::List(args) => commands::list::execute(args, &cli.global).await,
        Command::Get(args) => commands::get::execute(args, &cli.global).await,
        Command::Delete(args) => commands::delete::execute(args, &cli.global).await,
        Command::DeleteAll(args) => commands::delete::execute_all(args, &cli.global).await,
        Command::Shell(args) => commands::shell::execute(args, &cli.global).await,
        Command::Exec(args) => commands::exec::execute(args, &cli.global).await,
        Command::Top(args) => commands::top::execute(args, &cli.global).await,
        Command::Apikey(command) => commands::apikey::execute(command, &cli.global).await,
    }
}
