use std::sync::Arc;
use std::time::Duration;

use clap::Parser;
use tokio::sync::mpsc;
use tracing::{error, info, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use rmhb::cli;
use rmhb::node::{Node, NodeController, NodeHandle};
use rmhb::transport::{Transport, UdpReceiver, UdpTransport};

const CHANNEL_BUFFER: usize = 1000;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "rmhb=info".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    // Parse args and env vars
    let settings = cli::Cli::parse().into_settings();
    settings.validate()?;

    let transport = Arc::new(UdpTransport::bind(&settings.transport_config()?).await?);
    let local_addr = transport.local_addr();

    let (datagram_tx, datagram_rx) = mpsc::channel(CHANNEL_BUFFER);
    let receiver = UdpReceiver::new(transport.socket());
    let receiver_stats = receiver.stats_handle();
    receiver.spawn(datagram_tx);

    let node = Node::new(local_addr, settings.protocol_settings());
    let (handle, command_rx) = NodeHandle::new(CHANNEL_BUFFER);
    let controller = NodeController::new(node, Arc::clone(&transport));
    let controller_task = tokio::spawn(controller.start(datagram_rx, command_rx));
    info!("Starting rmhb {} node on {}", settings.role, local_addr);

    // Scripted operator actions for unattended deployments
    if let Some(start_after_ms) = settings.start_after_ms {
        let handle = handle.clone();
        let value = settings.start_value;
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(start_after_ms)).await;
            match handle.begin_dissemination(value).await {
                Ok(token) => info!(
                    "Disseminating {} (v: {})",
                    token.value, token.version
                ),
                Err(e) => error!("Scripted dissemination failed: {}", e),
            }
        });
    }
    if let Some(restart_after_ms) = settings.restart_after_ms {
        let handle = handle.clone();
        let delay = Duration::from_millis(settings.restart_delay_ms);
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(restart_after_ms)).await;
            if let Err(e) = handle.schedule_restart(delay).await {
                error!("Scripted restart failed: {}", e);
            }
        });
    }

    tokio::signal::ctrl_c().await?;
    info!("Shutting down");
    match handle.status().await {
        Ok(status) => info!("Final status: {}", serde_json::to_string(&status)?),
        Err(e) => warn!("Could not read final status: {}", e),
    }
    info!("Transport: {}", serde_json::to_string(&transport.stats())?);
    info!("Receiver: {}", serde_json::to_string(&receiver_stats.freeze())?);
    controller_task.abort();

    Ok(())
}
