use crate::config::Config;
use crate::gateway;
use crate::queue::DeadLetterStore;
use anyhow::Result;
use clap::{Parser, Subcommand};
use std::path::PathBuf;
use std::sync::Arc;

#[derive(Parser)]
#[command(
    name = "crmbridge",
    about = "Webhook bridge reconciling a live-chat platform with a CRM",
    version
)]
pub struct Cli {
    /// Path to config.toml (defaults to the platform config directory)
    #[arg(long, global = true)]
    pub config: Option<PathBuf>,

    #[command(subcommand)]
    pub command: Command,
}

#[derive(Subcommand)]
pub enum Command {
    /// Run the webhook gateway and queue workers
    Serve {
        /// Override the configured bind host
        #[arg(long)]
        host: Option<String>,
        /// Override the configured bind port
        #[arg(long)]
        port: Option<u16>,
    },
    /// Inspect jobs that exhausted retries or failed permanently
    DeadLetter {
        #[command(subcommand)]
        command: DeadLetterCommand,
    },
}

#[derive(Subcommand)]
pub enum DeadLetterCommand {
    /// List the most recent dead-lettered jobs
    List {
        #[arg(long, default_value_t = 50)]
        limit: usize,
    },
}

pub async fn dispatch(cli: Cli, mut config: Config) -> Result<()> {
    match cli.command {
        Command::Serve { host, port } => {
            if let Some(host) = host {
                config.gateway.host = host;
            }
            if let Some(port) = port {
                config.gateway.port = port;
            }
            gateway::run_server(Arc::new(config)).await
        }
        Command::DeadLetter {
            command: DeadLetterCommand::List { limit },
        } => {
            let store = DeadLetterStore::new(&config.workspace_dir);
            let records = store.list(limit)?;
            if records.is_empty() {
                println!("No dead-lettered jobs.");
                return Ok(());
            }
            for record in records {
                println!(
                    "{}  {}  webhook={}  attempts={}  [{}] {}",
                    record.dead_lettered_at.to_rfc3339(),
                    record.event,
                    record.webhook_id.as_deref().unwrap_or("-"),
                    record.attempts,
                    record.error_class,
                    record.error
                );
            }
            Ok(())
        }
    }
}
