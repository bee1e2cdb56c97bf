//! Bridge coordinator: moves frames between the serial device and the clients.
//!
//! [`BridgeService`] owns the client registry and the traffic counters and
//! runs two long-lived tasks:
//!
//! ```text
//!                      ┌──────────────────────┐
//!  SerialEvent::Data ─►│ uplink pump          │─► ClientRegistry::broadcast
//!                      │  FrameDecoder        │
//!                      └──────────────────────┘
//!                      ┌──────────────────────┐
//!  submit_downlink ───►│ serial writer        │─► DeviceLink::write
//!  (every client)      │  one frame at a time │
//!                      └──────────────────────┘
//! ```
//!
//! # Why a single serial writer? (for beginners)
//!
//! Every client session can submit frames at any moment.  If each session
//! wrote to the serial device directly, two frames could interleave on the
//! wire and the radio would see garbage.  Funnelling every downlink frame
//! through one `mpsc` channel and one writer task means each frame's bytes
//! reach the device contiguously, in submission order.
//!
//! The service does not know how the serial device is opened; it talks to it
//! through the [`DeviceLink`] trait, which the infrastructure layer
//! implements.  Tests substitute an in-memory link.

use std::sync::Arc;

use async_trait::async_trait;
use bytes::Bytes;
use meshbridge_core::{encode_frame, Frame, FrameDecoder};
use thiserror::Error;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::application::client_registry::ClientRegistry;
use crate::domain::{BridgeStats, SerialEvent, SerialState};

/// Capacity of the queue between client sessions and the serial writer.
const DOWNLINK_QUEUE_DEPTH: usize = 256;

// ── Error type ────────────────────────────────────────────────────────────────

/// Errors from the device side of the bridge.
#[derive(Debug, Error)]
pub enum BridgeError {
    /// The serial device is not currently open.
    #[error("serial link is down")]
    LinkDown,

    /// Writing to the serial device failed.
    #[error("serial write failed")]
    LinkWrite(#[source] std::io::Error),
}

// ── Device seam ───────────────────────────────────────────────────────────────

/// The serial device as seen by the coordinator.
#[async_trait]
pub trait DeviceLink: Send + Sync + 'static {
    /// Current connection state.
    fn state(&self) -> SerialState;

    /// Writes one complete encoded frame to the device.
    ///
    /// # Errors
    ///
    /// [`BridgeError::LinkDown`] if the device is not open, or
    /// [`BridgeError::LinkWrite`] if the write itself failed.
    async fn write(&self, bytes: Bytes) -> Result<(), BridgeError>;
}

// ── Service ───────────────────────────────────────────────────────────────────

/// Join handles for the coordinator's background tasks.
#[derive(Debug)]
pub struct BridgeTasks {
    pub uplink: JoinHandle<()>,
    pub writer: JoinHandle<()>,
}

impl BridgeTasks {
    /// Waits for both tasks to finish.
    pub async fn join(self) {
        if let Err(e) = self.uplink.await {
            warn!("uplink task ended abnormally: {e}");
        }
        if let Err(e) = self.writer.await {
            warn!("serial writer task ended abnormally: {e}");
        }
    }
}

/// Coordinates one bridge instance.
pub struct BridgeService {
    link: Arc<dyn DeviceLink>,
    registry: ClientRegistry,
    stats: BridgeStats,
    downlink_tx: mpsc::Sender<Frame>,
}

impl std::fmt::Debug for BridgeService {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("BridgeService")
            .field("link_state", &self.link.state())
            .field("stats", &self.stats.snapshot())
            .finish()
    }
}

impl BridgeService {
    /// Creates the service and spawns the uplink pump and the serial writer.
    ///
    /// Both tasks run until `cancel` fires.  The uplink pump also ends if
    /// `serial_events` closes.
    pub fn start(
        link: Arc<dyn DeviceLink>,
        serial_events: mpsc::Receiver<SerialEvent>,
        max_clients: Option<usize>,
        cancel: CancellationToken,
    ) -> (Arc<Self>, BridgeTasks) {
        let (downlink_tx, downlink_rx) = mpsc::channel(DOWNLINK_QUEUE_DEPTH);
        let service = Arc::new(Self {
            link,
            registry: ClientRegistry::new(max_clients),
            stats: BridgeStats::new(),
            downlink_tx,
        });

        let uplink = tokio::spawn(Arc::clone(&service).run_uplink(serial_events, cancel.clone()));
        let writer = tokio::spawn(Arc::clone(&service).run_serial_writer(downlink_rx, cancel));

        (service, BridgeTasks { uplink, writer })
    }

    pub fn registry(&self) -> &ClientRegistry {
        &self.registry
    }

    pub fn stats(&self) -> &BridgeStats {
        &self.stats
    }

    /// Current serial link state.
    pub fn link_state(&self) -> SerialState {
        self.link.state()
    }

    /// Queues a frame from a client for the serial device.
    ///
    /// If the device is not connected the frame is dropped and counted; the
    /// client is not told and its session continues.  Waits for room in the
    /// downlink queue, so a slow serial line back-pressures client readers.
    pub async fn submit_downlink(&self, frame: Frame) {
        let state = self.link.state();
        if state != SerialState::Connected {
            warn!(
                "serial link {state}; dropping {}-byte downlink frame",
                frame.len()
            );
            self.stats.record_downlink_dropped();
            return;
        }

        if self.downlink_tx.send(frame).await.is_err() {
            debug!("serial writer stopped; dropping downlink frame");
            self.stats.record_downlink_dropped();
        }
    }

    /// Decodes serial bytes into frames and broadcasts each one.
    async fn run_uplink(
        self: Arc<Self>,
        mut events: mpsc::Receiver<SerialEvent>,
        cancel: CancellationToken,
    ) {
        let mut decoder = FrameDecoder::new();
        let mut seen_connect = false;

        loop {
            let event = tokio::select! {
                _ = cancel.cancelled() => break,
                event = events.recv() => match event {
                    Some(event) => event,
                    None => break,
                },
            };

            match event {
                SerialEvent::Data(chunk) => {
                    let noise_before = decoder.discarded_bytes();
                    let frames = decoder.feed(&chunk);
                    let noise = decoder.discarded_bytes() - noise_before;
                    if noise > 0 {
                        debug!("discarded {noise} noise bytes from serial stream");
                        self.stats.record_noise_bytes(noise);
                    }

                    for frame in frames {
                        let outcome = self.registry.broadcast(&frame).await;
                        self.stats.record_uplink_frame();
                        if outcome.evicted > 0 {
                            self.stats.record_clients_evicted(outcome.evicted as u64);
                        }
                        debug!(
                            "uplink frame ({} bytes) delivered to {} client(s)",
                            frame.len(),
                            outcome.delivered
                        );
                    }
                }
                SerialEvent::Connected => {
                    if seen_connect {
                        self.stats.record_serial_reconnect();
                        info!("serial link restored; uplink resumed");
                    }
                    seen_connect = true;
                }
                SerialEvent::Disconnected => {
                    if decoder.buffered_len() > 0 {
                        debug!(
                            "serial link lost; discarding {} buffered bytes",
                            decoder.buffered_len()
                        );
                    }
                    decoder.reset();
                }
            }
        }

        debug!("uplink pump stopped");
    }

    /// Writes queued downlink frames to the device, one at a time.
    async fn run_serial_writer(
        self: Arc<Self>,
        mut frames: mpsc::Receiver<Frame>,
        cancel: CancellationToken,
    ) {
        loop {
            let frame = tokio::select! {
                _ = cancel.cancelled() => break,
                frame = frames.recv() => match frame {
                    Some(frame) => frame,
                    None => break,
                },
            };

            // The write itself is not raced against cancellation so a frame
            // is never cut off half-way on the wire.
            match self.link.write(encode_frame(&frame)).await {
                Ok(()) => self.stats.record_downlink_frame(),
                Err(e) => {
                    warn!("dropping {}-byte downlink frame: {e}", frame.len());
                    self.stats.record_downlink_dropped();
                }
            }
        }

        debug!("serial writer stopped");
    }
}

// ── Tests ─────────────────────────────────────────────────────────────────────
