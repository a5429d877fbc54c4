//! API key management for the remote interface.

use crate::cli::GlobalFlags;
use crate::formatter::{self, OutputFormat};
use clap::{Args, Subcommand};
use katabox::ApiKeyMetadata;
use serde::Serialize;
use std::io::Write;
use tabled::Tabled;

#[derive(Subcommand, Debug)]
pub enum ApiKeyCommand {
    /// Generate a key; the plaintext is printed once and never stored
    Generate(GenerateArgs),
    /// List key metadata
    List(ListArgs),
    /// Revoke a key by id
    Revoke(RevokeArgs),
    /// Remove expired keys
    Sweep,
}

#[derive(Args, Debug)]
pub struct GenerateArgs {
    /// Key name (who or what uses it)
    #[arg(index = 1)]
    pub name: String,

    /// Days until the key expires; omit for no expiry
    #[arg(long = "expires-days")]
    pub expires_days: Option<i64>,
}

#[derive(Args, Debug)]
pub struct ListArgs {
    /// Output format (table, json, yaml)
    #[arg(long, default_value = "table")]
    pub format: String,
}

#[derive(Args, Debug)]
pub struct RevokeArgs {
    /// Key id (from `apikey list`)
    #[arg(index = 1)]
    pub id: String,
}

#[derive(Tabled, Serialize)]
struct KeyPresenter {
    #[tabled(rename = "ID")]
    #[serde(rename = "id")]
    id: String,

    #[tabled(rename = "NAME")]
    #[serde(rename = "name")]
    name: String,

    #[tabled(rename = "CREATED")]
    #[serde(rename = "created")]
    created: String,

    #[tabled(rename = "EXPIRES")]
    #[serde(rename = "expires")]
    expires: String,

    #[tabled(rename = "LAST USED")]
    #[serde(rename = "last_used")]
    last_used: String,
}

impl KeyPresenter {
    fn from_metadata(metadata: &ApiKeyMetadata) -> Self {
        let stamp = |t: Option<chrono::DateTime<chrono::Utc>>| {
            t.map(|t| t.format("%Y-%m-%d %H:%M").to_string())
                .unwrap_or_else(|| "-".to_string())
        };
        Self {
            id: metadata.id.clone(),
            name: metadata.name.clone(),
            created: stamp(Some(metadata.created_at)),
            expires: stamp(metadata.expires_at),
            last_used: stamp(metadata.last_used_at),
        }
    }
}

pub async fn execute(command: ApiKeyCommand, global: &GlobalFlags) -> anyhow::Result<()> {
    let store = global.api_key_store()?;
    match command {
        ApiKeyCommand::Generate(args) => {
            let generated = store.generate(&args.name, args.expires_days).await?;
            println!("id:  {}", generated.id);
            println!("key: {}", generated.plaintext);
            eprintln!("Store this key now; it cannot be shown again.");
            Ok(())
        }
        ApiKeyCommand::List(args) => {
            let format = OutputFormat::from_str(&args.format)?;
            let keys = store.list().await?;
            let presenters: Vec<KeyPresenter> =
                keys.iter().map(KeyPresenter::from_metadata).collect();
            formatter::print_output(
                &mut std::io::stdout().lock(),
                &presenters,
                format,
                |writer, data| {
                    if data.is_empty() {
                        writeln!(writer, "No API keys")?;
                    } else {
                        writeln!(writer, "{}", formatter::create_table(data))?;
                    }
                    Ok(())
                },
            )
        }
        ApiKeyCommand::Revoke(args) => {
            store.revoke(&args.id).await?;
            println!("Key {} revoked", args.id);
            Ok(())
        }
        ApiKeyCommand::Sweep => {
            let removed = store.sweep_expired().await?;
            println!("Removed {} expired key(s)", removed);
            Ok(())
        }
    }
}
