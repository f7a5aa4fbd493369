use std::path::PathBuf;

use clap::{Parser, Subcommand};
use hsn_client::{ClientConfig, DeliveryStatus, Node};
use hsn_shared::Fingerprint;
use tracing::info;
use tracing_subscriber::{fmt, EnvFilter};

#[derive(Parser)]
#[command(name = "hsn", version, about = "Offline-first signed messaging node")]
struct Cli {
    /// SQLite database path (overrides HSN_DB_PATH)
    #[arg(long, global = true)]
    db: Option<PathBuf>,

    /// Rendezvous WebSocket endpoint, repeatable (overrides HSN_SIGNAL_NODES)
    #[arg(long = "signal-node", global = true)]
    signal_nodes: Vec<String>,

    /// Transit gateway base URL (overrides HSN_TRANSIT_BASE)
    #[arg(long, global = true)]
    transit: Option<String>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Print the local fingerprint and reachability descriptor
    Id,
    /// Send a chat message
    Send {
        #[arg(long)]
        to: Fingerprint,
        text: String,
    },
    /// List materialized messages
    Messages,
    /// Number of undelivered transitions in the outbox
    Pending,
    /// Fetch and append envelopes waiting on the transit gateway
    Poll,
    /// Re-attempt delivery of every outbox entry
    Retry,
    /// Run as a long-lived node until Ctrl+C
    Run,
}

impl Cli {
    fn config(&self) -> ClientConfig {
        let mut config = ClientConfig::from_env();
        if let Some(db) = &self.db {
            config.db_path = Some(db.clone());
        }
        if !self.signal_nodes.is_empty() {
            config.signal_nodes = self.signal_nodes.clone();
        }
        if let Some(transit) = &self.transit {
            config.transit_base = Some(transit.clone());
        }
        config
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new("hsn_client=debug,hsn_net=debug,hsn_store=info,warn"));

    fmt()
        .with_env_filter(filter)
        .with_target(true)
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();
    let config = cli.config();
    let discovery_timeout = config.discovery_timeout;
    let mut node = Node::open(config)?;

    match cli.command {
        Command::Id => {
            println!("{}", node.fingerprint());
            println!("{}", serde_json::to_string_pretty(&node.hrd())?);
        }

        Command::Send { to, text } => {
            if let Some(discovery) = node.discovery() {
                discovery.wait_connected(discovery_timeout).await;
            }
            match node.orchestrator().send_text(&to, &text).await {
                Some(submission) => {
                    let status = match submission.status {
                        DeliveryStatus::Delivered(route) => format!("delivered via {route}"),
                        DeliveryStatus::Local => "stored locally".to_string(),
                        DeliveryStatus::Pending => "queued in outbox".to_string(),
                    };
                    println!("{} {}", submission.nonce, status);
                }
                None => anyhow::bail!("message could not be stored"),
            }
        }

        Command::Messages => {
            for message in node.orchestrator().messages()? {
                println!(
                    "[{}] {} -> {}: {}",
                    message.timestamp,
                    message.from.short(),
                    message.to.short(),
                    message.text
                );
            }
        }

        Command::Pending => {
            println!("{}", node.orchestrator().pending_count()?);
        }

        Command::Poll => {
            let report = node.poll_once().await?;
            println!(
                "fetched {} appended {} rejected {}",
                report.fetched, report.appended, report.rejected
            );
        }

        Command::Retry => {
            if let Some(discovery) = node.discovery() {
                discovery.wait_connected(discovery_timeout).await;
            }
            let report = node.orchestrator().retry_pending().await?;
            println!("attempted {} delivered {}", report.attempted, report.delivered);
        }

        Command::Run => {
            info!(fingerprint = %node.fingerprint(), "Starting HSN node");
            node.publish_reachability().await;
            let handles = node.spawn_loops();

            tokio::signal::ctrl_c().await?;
            info!("Received Ctrl+C, shutting down");
            for handle in handles {
                handle.abort();
            }
        }
    }

    Ok(())
}
