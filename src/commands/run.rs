//! Run command implementation.

use anyhow::{anyhow, Result};
use std::sync::Arc;
use tokio::sync::mpsc;
use tracing::{info, warn};

use crate::config::Config;
use crate::controller::{FirewallController, UnifiClient};
use crate::error::BouncerError;
use crate::event_loop::EventLoop;
use crate::signal::ShutdownGuard;
use crate::stream::DecisionStream;

/// Connect, load remote state, then supervise the stream and the event loop.
///
/// Whichever task ends first decides the outcome. Only an end caused by
/// SIGINT/SIGTERM counts as success.
pub async fn run(config: Config) -> Result<()> {
    info!("cs-unifi-bouncer {} starting", env!("CARGO_PKG_VERSION"));

    let settings = config.engine_settings();
    let timings = config.timings()?;

    let controller = UnifiClient::connect(&config.unifi)
        .await
        .map_err(|e| BouncerError::Connection(format!("{:#}", e)))?;
    info!("Connected to {}", config.unifi.host);
    let controller: Arc<dyn FirewallController> = Arc::new(controller);

    let event_loop = EventLoop::bootstrap(controller, settings, timings).await?;
    let stream = DecisionStream::new(&config.crowdsec, timings.update_interval)?;

    let guard = ShutdownGuard::new();
    let shutdown = guard.token();
    let (tx, rx) = mpsc::channel(config.channel_capacity);

    let mut stream_task = tokio::spawn(stream.run(tx, shutdown.clone()));
    let mut loop_task = tokio::spawn(event_loop.run(rx, shutdown.clone()));

    let (task, joined, other, halted) = tokio::select! {
        joined = &mut stream_task => {
            ("decision stream", joined, loop_task, BouncerError::StreamHalted)
        }
        joined = &mut loop_task => (
            "event loop",
            joined,
            stream_task,
            BouncerError::EventLoopHalted("exited without shutdown".to_string()),
        ),
    };

    let requested = shutdown.is_cancelled();
    shutdown.cancel();
    if let Err(e) = other.await {
        warn!("Task did not stop cleanly: {}", e);
    }

    match joined {
        Ok(Ok(())) if requested => {
            info!("Shutdown complete");
            Ok(())
        }
        Ok(Ok(())) => Err(halted.into()),
        Ok(Err(e)) => Err(e.into()),
        Err(e) => Err(anyhow!("{} task failed: {}", task, e)),
    }
}
