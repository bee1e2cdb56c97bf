//! TCP listener: accept loop and per-client session tasks.
//!
//! This module is responsible for:
//!
//! 1. Binding the TCP listener on the configured address.
//! 2. Accepting clients and registering each one with the coordinator
//!    (refusing them when the client cap is reached).
//! 3. Running one session task per client, which in turn runs:
//!    - **reader**: decodes frames from the socket and submits them for the
//!      serial device;
//!    - **writer**: drains the client's outbound queue onto the socket.
//! 4. Stopping every session when the bridge is cancelled.
//!
//! # Session teardown
//!
//! Whichever half finishes first ends the session.  The client is then
//! unregistered, which closes its outbound queue; the writer flushes what is
//! already queued and shuts the socket down.  A writer that cannot finish
//! within [`WRITER_DRAIN_TIMEOUT`] is aborted.

use std::fmt;
use std::io;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use anyhow::Context;
use futures_util::StreamExt;
use tokio::io::{AsyncWrite, AsyncWriteExt};
use tokio::net::tcp::OwnedReadHalf;
use tokio::net::{TcpListener, TcpStream};
use tokio::task::{JoinError, JoinSet};
use tokio_util::codec::FramedRead;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use crate::application::{BridgeService, ClientHandle, ClientOutbound};
use crate::infrastructure::frame_codec::MeshFrameCodec;

/// How long a closing session waits for its writer to flush queued frames.
pub const WRITER_DRAIN_TIMEOUT: Duration = Duration::from_secs(2);

/// Pause after a failed `accept()` (e.g. out of file descriptors).
const ACCEPT_ERROR_BACKOFF: Duration = Duration::from_millis(100);

/// Binds the client listener.
///
/// `host` may be an IP literal or a hostname; every address it resolves to
/// is tried in turn.
///
/// # Errors
///
/// Returns an error if the host does not resolve, the address is in use, or
/// the process lacks permission to bind it.
pub async fn bind_listener(host: &str, port: u16) -> anyhow::Result<TcpListener> {
    let listener = TcpListener::bind((host, port))
        .await
        .with_context(|| format!("failed to bind TCP listener on {host}:{port}"))?;
    let local = listener.local_addr().context("listener has no local address")?;
    info!("listening for clients on {local}");
    Ok(listener)
}

/// Accepts clients until `cancel` fires, then waits for every session to end.
pub async fn serve(
    listener: TcpListener,
    service: Arc<BridgeService>,
    queue_depth: usize,
    cancel: CancellationToken,
) {
    let mut sessions = JoinSet::new();

    loop {
        tokio::select! {
            _ = cancel.cancelled() => break,
            accepted = listener.accept() => match accepted {
                Ok((stream, peer)) => {
                    debug!("accepted connection from {peer}");
                    sessions.spawn(run_session(
                        stream,
                        peer,
                        Arc::clone(&service),
                        queue_depth,
                        cancel.clone(),
                    ));
                }
                Err(e) => {
                    error!("accept error: {e}");
                    tokio::time::sleep(ACCEPT_ERROR_BACKOFF).await;
                }
            },
        }

        while let Some(finished) = sessions.try_join_next() {
            if let Err(e) = finished {
                warn!("client session panicked: {e}");
            }
        }
    }

    drop(listener);
    let closed = service.registry().close_all().await;
    if closed > 0 {
        info!("closing {closed} client connection(s)");
    }
    while let Some(finished) = sessions.join_next().await {
        if let Err(e) = finished {
            warn!("client session panicked: {e}");
        }
    }
    info!("listener stopped");
}

// ── Per-client session ────────────────────────────────────────────────────────

/// Why a client session ended.
#[derive(Debug)]
enum SessionEnd {
    ClientClosed,
    ReadFailed(io::Error),
    /// The registry dropped the client during a broadcast.
    Evicted,
    WriteFailed(io::Error),
    Shutdown,
}

impl fmt::Display for SessionEnd {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SessionEnd::ClientClosed => f.write_str("closed by client"),
            SessionEnd::ReadFailed(e) => write!(f, "read error: {e}"),
            SessionEnd::Evicted => f.write_str("evicted"),
            SessionEnd::WriteFailed(e) => write!(f, "write error: {e}"),
            SessionEnd::Shutdown => f.write_str("bridge shutting down"),
        }
    }
}

async fn run_session(
    stream: TcpStream,
    peer: SocketAddr,
    service: Arc<BridgeService>,
    queue_depth: usize,
    cancel: CancellationToken,
) {
    if let Err(e) = stream.set_nodelay(true) {
        debug!("could not set TCP_NODELAY for {peer}: {e}");
    }

    let (handle, outbound) = ClientHandle::new(peer, queue_depth);
    let id = handle.id();
    match service.registry().register(handle).await {
        Ok(count) => {
            service.stats().record_client_accepted();
            info!("client {id} connected from {peer} ({count} connected)");
        }
        Err(e) => {
            service.stats().record_client_rejected();
            warn!("refusing {peer}: {e}");
            return;
        }
    }

    let (read_half, write_half) = stream.into_split();
    let mut writer = tokio::spawn(run_client_writer(write_half, outbound));
    let mut writer_done = false;

    let end = tokio::select! {
        _ = cancel.cancelled() => SessionEnd::Shutdown,
        end = run_client_reader(read_half, &service) => end,
        result = &mut writer => {
            writer_done = true;
            writer_end(result, cancel.is_cancelled())
        }
    };

    service.registry().unregister(id).await;

    if !writer_done {
        match tokio::time::timeout(WRITER_DRAIN_TIMEOUT, &mut writer).await {
            Ok(Ok(Err(e))) => debug!("client {id}: write error while draining: {e}"),
            Ok(_) => {}
            Err(_) => {
                debug!("client {id}: writer did not drain in time");
                writer.abort();
            }
        }
    }

    info!("client {id} ({peer}) disconnected: {end}");
}

/// Classifies a writer task that finished before the reader.
///
/// A queue closed cleanly means the registry dropped the client: at shutdown
/// that is `close_all`, otherwise an eviction.
fn writer_end(result: Result<io::Result<()>, JoinError>, shutting_down: bool) -> SessionEnd {
    match result {
        Ok(Ok(())) if shutting_down => SessionEnd::Shutdown,
        Ok(Ok(())) => SessionEnd::Evicted,
        Ok(Err(e)) => SessionEnd::WriteFailed(e),
        Err(e) => SessionEnd::WriteFailed(io::Error::other(e)),
    }
}

/// Decodes frames from the socket until it closes, submitting each one for
/// the serial device.
async fn run_client_reader(read_half: OwnedReadHalf, service: &BridgeService) -> SessionEnd {
    let mut frames = FramedRead::new(read_half, MeshFrameCodec::new());
    let mut noise_reported = 0;

    let end = loop {
        match frames.next().await {
            Some(Ok(frame)) => {
                record_noise(service, frames.decoder(), &mut noise_reported);
                service.submit_downlink(frame).await;
            }
            Some(Err(e)) => break SessionEnd::ReadFailed(e),
            None => break SessionEnd::ClientClosed,
        }
    };

    record_noise(service, frames.decoder(), &mut noise_reported);
    end
}

fn record_noise(service: &BridgeService, codec: &MeshFrameCodec, reported: &mut u64) {
    let total = codec.discarded_bytes();
    if total > *reported {
        service.stats().record_noise_bytes(total - *reported);
        *reported = total;
    }
}

/// Writes queued frames to the socket until the queue closes.
///
/// On a write error the client is marked dead so the next broadcast evicts
/// it.
async fn run_client_writer<W>(mut socket: W, mut outbound: ClientOutbound) -> io::Result<()>
where
    W: AsyncWrite + Unpin,
{
    while let Some(bytes) = outbound.recv().await {
        let written = async {
            socket.write_all(&bytes).await?;
            socket.flush().await
        }
        .await;
        if let Err(e) = written {
            outbound.mark_dead();
            return Err(e);
        }
    }

    if let Err(e) = socket.shutdown().await {
        debug!("socket shutdown failed: {e}");
    }
    Ok(())
}

// ── Tests ─────────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;
    use crate::application::{BridgeError, ClientRegistry, DeviceLink};
    use crate::domain::SerialState;
    use async_trait::async_trait;
    use bytes::Bytes;
    use meshbridge_core::Frame;
    use tokio::io::AsyncReadExt;
    use tokio::sync::mpsc;

    /// A link that is always down; enough for listener-level tests.
    struct DownLink;

    #[async_trait]
    impl DeviceLink for DownLink {
        fn state(&self) -> SerialState {
            SerialState::Disconnected
        }

        async fn write(&self, _bytes: Bytes) -> Result<(), BridgeError> {
            Err(BridgeError::LinkDown)
        }
    }

    async fn start_server(
        max_clients: Option<usize>,
    ) -> (SocketAddr, Arc<BridgeService>, CancellationToken, mpsc::Sender<crate::domain::SerialEvent>) {
        let cancel = CancellationToken::new();
        let (events_tx, events_rx) = mpsc::channel(8);
        let (service, _tasks) =
            BridgeService::start(Arc::new(DownLink), events_rx, max_clients, cancel.clone());
        let listener = bind_listener("127.0.0.1", 0).await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(serve(listener, Arc::clone(&service), 16, cancel.clone()));
        (addr, service, cancel, events_tx)
    }

    async fn wait_for_clients(registry: &ClientRegistry, want: usize) {
        for _ in 0..200 {
            if registry.len().await == want {
                return;
            }
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
        panic!("expected {want} registered clients");
    }

    #[test]
    fn test_writer_closed_at_shutdown_is_not_an_eviction() {
        // Arrange / Act
        let at_shutdown = writer_end(Ok(Ok(())), true);
        let while_running = writer_end(Ok(Ok(())), false);

        // Assert
        assert!(matches!(at_shutdown, SessionEnd::Shutdown));
        assert!(matches!(while_running, SessionEnd::Evicted));
    }

    #[test]
    fn test_writer_error_is_reported_even_at_shutdown() {
        let end = writer_end(Ok(Err(io::ErrorKind::BrokenPipe.into())), true);
        assert!(matches!(end, SessionEnd::WriteFailed(_)));
    }

    #[tokio::test]
    async fn test_bind_listener_accepts_hostname() {
        let listener = bind_listener("localhost", 0).await.unwrap();
        assert!(listener.local_addr().unwrap().ip().is_loopback());
    }

    #[tokio::test]
    async fn test_writer_sends_queued_frames_then_shuts_down() {
        // Arrange
        let (handle, outbound) = ClientHandle::new(SocketAddr::from(([127, 0, 0, 1], 1)), 4);
        let registry = ClientRegistry::new(None);
        registry.register(handle).await.unwrap();
        registry.broadcast(&Frame::new(&b"AB"[..]).unwrap()).await;
        registry.close_all().await;

        let socket = tokio_test::io::Builder::new()
            .write(&[0x3C, 0x02, 0x00, b'A', b'B'])
            .build();

        // Act / Assert
        run_client_writer(socket, outbound).await.unwrap();
    }

    #[tokio::test]
    async fn test_writer_failure_marks_client_dead() {
        // Arrange: a socket whose first write fails
        let (handle, outbound) = ClientHandle::new(SocketAddr::from(([127, 0, 0, 1], 1)), 4);
        let registry = ClientRegistry::new(None);
        registry.register(handle).await.unwrap();
        registry.broadcast(&Frame::empty()).await;

        let socket = tokio_test::io::Builder::new()
            .write_error(io::Error::new(io::ErrorKind::BrokenPipe, "gone"))
            .build();

        // Act
        let result = run_client_writer(socket, outbound).await;

        // Assert: error returned and the next broadcast evicts the client
        assert!(result.is_err());
        assert_eq!(registry.broadcast(&Frame::empty()).await.evicted, 1);
    }

    #[tokio::test]
    async fn test_client_is_registered_and_removed_on_close() {
        let (addr, service, cancel, _events) = start_server(None).await;

        let client = TcpStream::connect(addr).await.unwrap();
        wait_for_clients(service.registry(), 1).await;

        drop(client);
        wait_for_clients(service.registry(), 0).await;
        assert_eq!(service.stats().snapshot().clients_accepted, 1);

        cancel.cancel();
    }

    #[tokio::test]
    async fn test_client_over_cap_is_refused() {
        // Arrange: cap of one client, first client already connected
        let (addr, service, cancel, _events) = start_server(Some(1)).await;
        let _first = TcpStream::connect(addr).await.unwrap();
        wait_for_clients(service.registry(), 1).await;

        // Act
        let mut second = TcpStream::connect(addr).await.unwrap();

        // Assert: the second socket is closed by the bridge
        let mut buf = [0u8; 1];
        let n = tokio::time::timeout(Duration::from_secs(2), second.read(&mut buf))
            .await
            .unwrap()
            .unwrap_or(0);
        assert_eq!(n, 0);
        assert_eq!(service.registry().len().await, 1);
        assert_eq!(service.stats().snapshot().clients_rejected, 1);

        cancel.cancel();
    }

    #[tokio::test]
    async fn test_client_frames_dropped_while_serial_down() {
        let (addr, service, cancel, _events) = start_server(None).await;
        let mut client = TcpStream::connect(addr).await.unwrap();
        wait_for_clients(service.registry(), 1).await;

        client.write_all(&[0x3C, 0x01, 0x00, 0x55]).await.unwrap();

        for _ in 0..200 {
            if service.stats().downlink_dropped() == 1 {
                break;
            }
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
        assert_eq!(service.stats().downlink_dropped(), 1);
        // The session stays up.
        assert_eq!(service.registry().len().await, 1);

        cancel.cancel();
    }

    #[tokio::test]
    async fn test_shutdown_closes_client_sockets() {
        let (addr, service, cancel, _events) = start_server(None).await;
        let mut client = TcpStream::connect(addr).await.unwrap();
        wait_for_clients(service.registry(), 1).await;

        cancel.cancel();

        let mut buf = [0u8; 1];
        let n = tokio::time::timeout(Duration::from_secs(3), client.read(&mut buf))
            .await
            .unwrap()
            .unwrap_or(0);
        assert_eq!(n, 0);
    }
}
