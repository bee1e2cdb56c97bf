//! Wires the serial endpoint, the coordinator and the listener together.
//!
//! Startup order matters: the serial device is opened first, so a bad
//! `--serial` path fails the process before any client can connect.  Then the
//! listener is bound, and only then are the long-running tasks spawned.

use std::net::SocketAddr;
use std::sync::Arc;

use anyhow::Context;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

use crate::application::{BridgeService, BridgeTasks};
use crate::domain::{BridgeConfig, StatsSnapshot};
use crate::infrastructure::serial_link::{SerialLink, SerialOpener};
use crate::infrastructure::tcp_server::{bind_listener, serve};

/// A started bridge.
pub struct RunningBridge {
    local_addr: SocketAddr,
    service: Arc<BridgeService>,
    serial: Arc<SerialLink>,
    cancel: CancellationToken,
    bridge_tasks: BridgeTasks,
    supervisor: JoinHandle<()>,
    listener: JoinHandle<()>,
}

/// Opens the serial device, binds the listener and starts every task.
///
/// The bridge runs until `cancel` fires (or [`RunningBridge::shutdown`] is
/// called).
///
/// # Errors
///
/// Returns an error if the serial device cannot be opened or the listener
/// cannot be bound.  Nothing is left running in either case, and `cancel`
/// itself is left untouched.
pub async fn start_bridge(
    config: &BridgeConfig,
    opener: Arc<dyn SerialOpener>,
    cancel: CancellationToken,
) -> anyhow::Result<RunningBridge> {
    // The supervisor gets a child token so a failed start can stop it without
    // cancelling the caller's token.
    let serial_cancel = cancel.child_token();
    let opened = SerialLink::open(opener, config.reconnect, serial_cancel.clone())
        .await
        .with_context(|| format!("cannot start bridge on {}", config.serial_path))?;

    let listener = match bind_listener(&config.bind_host, config.port).await {
        Ok(listener) => listener,
        Err(e) => {
            serial_cancel.cancel();
            if let Err(join_err) = opened.supervisor.await {
                warn!("serial supervisor ended abnormally: {join_err}");
            }
            return Err(e);
        }
    };
    let local_addr = listener
        .local_addr()
        .context("listener has no local address")?;

    let (service, bridge_tasks) = BridgeService::start(
        opened.link.clone(),
        opened.events,
        config.max_clients,
        cancel.clone(),
    );
    let listener = tokio::spawn(serve(
        listener,
        Arc::clone(&service),
        config.client_queue_depth,
        cancel.clone(),
    ));

    info!(
        "bridging {} @ {} baud <-> tcp {}",
        opened.link.device(),
        config.baud_rate,
        local_addr
    );

    Ok(RunningBridge {
        local_addr,
        service,
        serial: opened.link,
        cancel,
        bridge_tasks,
        supervisor: opened.supervisor,
        listener,
    })
}

impl RunningBridge {
    /// The address the listener actually bound (useful with port 0).
    pub fn local_addr(&self) -> SocketAddr {
        self.local_addr
    }

    pub fn service(&self) -> &Arc<BridgeService> {
        &self.service
    }

    pub fn serial(&self) -> &Arc<SerialLink> {
        &self.serial
    }

    /// Waits for every task to finish after cancellation and returns the
    /// final counters.
    pub async fn wait(self) -> StatsSnapshot {
        if let Err(e) = self.listener.await {
            warn!("listener task ended abnormally: {e}");
        }
        self.bridge_tasks.join().await;
        if let Err(e) = self.supervisor.await {
            warn!("serial supervisor ended abnormally: {e}");
        }
        self.service.stats().snapshot()
    }

    /// Cancels the bridge and waits for it to stop.
    pub async fn shutdown(self) -> StatsSnapshot {
        self.cancel.cancel();
        self.wait().await
    }
}
