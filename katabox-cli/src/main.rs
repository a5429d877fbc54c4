use clap::Parser;
use tracing_subscriber::EnvFilter;

mod cli;
mod commands;
mod formatter;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .with_writer(std::io::stderr)
        .init();

    let parsed = cli::Cli::parse();
    cli::dispatch(parsed).await
}
