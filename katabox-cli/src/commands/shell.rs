//! Interactive shell into a sandbox.
//!
//! Rides the control-plane exec channel, so it keeps working when the
//! sandbox's ingress is fully locked down.

use crate::cli::GlobalFlags;
use clap::Args;
use futures::StreamExt;
use katabox::ExecMessage;
use tokio::io::{AsyncReadExt, AsyncWriteExt};

#[derive(Args, Debug)]
pub struct ShellArgs {
    /// Sandbox name
    #[arg(index = 1)]
    pub name: String,

    /// Namespace
    #[arg(short = 'n', long, default_value = "default")]
    pub namespace: String,
}

pub async fn execute(args: ShellArgs, global: &GlobalFlags) -> anyhow::Result<()> {
    let controller = global.create_controller()?;
    let channel = controller.shell(&args.name, &args.namespace).await?;
    let (mut remote_stdin, mut output) = channel.split();

    // Local stdin → remote shell.
    let input_pump = tokio::spawn(async move {
        let mut stdin = tokio::io::stdin();
        let mut buf = [0u8; 1024];
        loop {
            match stdin.read(&mut buf).await {
                Ok(0) | Err(_) => break,
                Ok(n) => {
                    if remote_stdin.write_all(&buf[..n]).await.is_err() {
                        break;
                    }
                }
            }
        }
    });

    let mut exit_code = 0;
    let mut stdout = tokio::io::stdout();
    let mut stderr = tokio::io::stderr();
    while let Some(message) = output.next().await {
        match message? {
            ExecMessage::Stdout(data) => {
                stdout.write_all(&data).await?;
                stdout.flush().await?;
            }
            ExecMessage::Stderr(data) => {
                stderr.write_all(&data).await?;
                stderr.flush().await?;
            }
            ExecMessage::Exited(status) => {
                exit_code = status.exit_code;
                break;
            }
        }
    }

    input_pump.abort();
    if exit_code != 0 {
        std::process::exit(exit_code);
    }
    Ok(())
}
