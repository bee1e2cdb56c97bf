//! Serial endpoint: owns the device handle, reads it, and reopens it.
//!
//! The `serialport` crate exposes a blocking `Read + Write` handle.  This
//! module keeps those blocking calls off the async runtime:
//!
//! - reads run in a `spawn_blocking` loop with a short port timeout, so the
//!   loop can notice cancellation between reads;
//! - each write runs in its own `spawn_blocking` call;
//! - opening (and reopening) the device also runs on the blocking pool.
//!
//! # Connection lifecycle
//!
//! ```text
//!  open() ──ok──► Connected ──read error / EOF / write error──► Disconnected
//!    │                ▲                                              │
//!  error              └──────────── open ok ◄── Connecting ◄── backoff sleep
//!    ▼                                              │
//!  fatal                                         open error ─► backoff doubles
//! ```
//!
//! Only the first open is fatal.  After that the supervisor retries forever,
//! waiting [`ReconnectPolicy`] delays between attempts, until the bridge's
//! cancellation token fires.

use std::io::{self, Read, Write};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use bytes::Bytes;
use thiserror::Error;
use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::application::{BridgeError, DeviceLink};
use crate::domain::{ReconnectPolicy, SerialEvent, SerialState};

/// Port read timeout.  Bounds how long the read loop takes to notice that it
/// should stop.
pub const READ_TIMEOUT: Duration = Duration::from_millis(100);

const READ_CHUNK: usize = 1024;
const EVENT_QUEUE_DEPTH: usize = 256;

// ── Errors ────────────────────────────────────────────────────────────────────

/// Errors from the serial endpoint.
#[derive(Debug, Error)]
pub enum SerialError {
    /// The device could not be opened.
    #[error("failed to open serial device {path}")]
    Open {
        path: String,
        #[source]
        source: io::Error,
    },

    /// No device handle is currently open.
    #[error("serial device is not connected")]
    NotConnected,

    /// A write to the open device failed.  The link is torn down and reopened.
    #[error("serial write failed")]
    Write(#[source] io::Error),
}

// ── Opening the device ────────────────────────────────────────────────────────

/// Independent read and write handles to one open device.
pub struct SerialStreams {
    pub reader: Box<dyn Read + Send>,
    pub writer: Box<dyn Write + Send>,
}

/// Opens the serial device.  Called on the blocking pool.
///
/// The real implementation is [`SerialPortOpener`]; tests provide in-memory
/// devices.
pub trait SerialOpener: Send + Sync + 'static {
    /// Device name used in log messages and errors.
    fn device(&self) -> &str;

    fn open(&self) -> io::Result<SerialStreams>;
}

/// Opens a real port with the `serialport` crate: 8 data bits, no parity,
/// one stop bit, no flow control.
#[derive(Debug, Clone)]
pub struct SerialPortOpener {
    path: String,
    baud_rate: u32,
}

impl SerialPortOpener {
    pub fn new(path: impl Into<String>, baud_rate: u32) -> Self {
        Self {
            path: path.into(),
            baud_rate,
        }
    }
}

impl SerialOpener for SerialPortOpener {
    fn device(&self) -> &str {
        &self.path
    }

    fn open(&self) -> io::Result<SerialStreams> {
        let mut port = serialport::new(&self.path, self.baud_rate)
            .timeout(READ_TIMEOUT)
            .data_bits(serialport::DataBits::Eight)
            .stop_bits(serialport::StopBits::One)
            .parity(serialport::Parity::None)
            .flow_control(serialport::FlowControl::None)
            .open()?;

        // Many USB radios only start talking once DTR/RTS are asserted.
        if let Err(e) = port.write_data_terminal_ready(true) {
            debug!("could not assert DTR on {}: {e}", self.path);
        }
        if let Err(e) = port.write_request_to_send(true) {
            debug!("could not assert RTS on {}: {e}", self.path);
        }

        let reader = port.try_clone()?;
        Ok(SerialStreams {
            reader: Box::new(reader),
            writer: Box::new(port),
        })
    }
}

async fn open_blocking(opener: &Arc<dyn SerialOpener>) -> io::Result<SerialStreams> {
    let opener = Arc::clone(opener);
    tokio::task::spawn_blocking(move || opener.open())
        .await
        .map_err(io::Error::other)?
}

// ── Link ──────────────────────────────────────────────────────────────────────

/// The write side of the currently open device, plus the token that stops
/// its read loop.
struct ActiveLink {
    writer: Arc<Mutex<Box<dyn Write + Send>>>,
    token: CancellationToken,
}

/// Handle to the serial device, shared by the coordinator and the supervisor.
pub struct SerialLink {
    device: String,
    state_tx: watch::Sender<SerialState>,
    active: Mutex<Option<ActiveLink>>,
}

impl std::fmt::Debug for SerialLink {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SerialLink")
            .field("device", &self.device)
            .field("state", &self.state())
            .finish()
    }
}

/// Everything [`SerialLink::open`] hands back.
pub struct OpenedSerial {
    pub link: Arc<SerialLink>,
    /// Raw chunks and connect/disconnect notifications, in order.
    pub events: mpsc::Receiver<SerialEvent>,
    /// The read/reconnect task.  Ends after cancellation.
    pub supervisor: JoinHandle<()>,
}

impl SerialLink {
    /// Opens the device and starts the read/reconnect supervisor.
    ///
    /// # Errors
    ///
    /// Returns [`SerialError::Open`] if the first open fails.  Later failures
    /// are retried by the supervisor and never surface here.
    pub async fn open(
        opener: Arc<dyn SerialOpener>,
        policy: ReconnectPolicy,
        cancel: CancellationToken,
    ) -> Result<OpenedSerial, SerialError> {
        let device = opener.device().to_string();
        let streams = open_blocking(&opener)
            .await
            .map_err(|source| SerialError::Open {
                path: device.clone(),
                source,
            })?;
        info!("opened serial device {device}");

        let (state_tx, _) = watch::channel(SerialState::Disconnected);
        let link = Arc::new(SerialLink {
            device,
            state_tx,
            active: Mutex::new(None),
        });

        let token = cancel.child_token();
        link.install(streams.writer, token.clone());

        let (events_tx, events_rx) = mpsc::channel(EVENT_QUEUE_DEPTH);
        let supervisor = tokio::spawn(supervise(
            Arc::clone(&link),
            opener,
            policy,
            streams.reader,
            token,
            events_tx,
            cancel,
        ));

        Ok(OpenedSerial {
            link,
            events: events_rx,
            supervisor,
        })
    }

    pub fn device(&self) -> &str {
        &self.device
    }

    pub fn state(&self) -> SerialState {
        *self.state_tx.borrow()
    }

    /// Receiver that observes every state change.
    pub fn subscribe_state(&self) -> watch::Receiver<SerialState> {
        self.state_tx.subscribe()
    }

    /// Writes `bytes` to the device and flushes.
    ///
    /// A failed write tears the connection down; the supervisor then reopens
    /// the device.
    pub async fn write_bytes(&self, bytes: Bytes) -> Result<(), SerialError> {
        let (writer, token) = {
            let active = self.active.lock().unwrap_or_else(|p| p.into_inner());
            match active.as_ref() {
                Some(a) => (Arc::clone(&a.writer), a.token.clone()),
                None => return Err(SerialError::NotConnected),
            }
        };

        let result = tokio::task::spawn_blocking(move || {
            let mut writer = writer.lock().unwrap_or_else(|p| p.into_inner());
            writer.write_all(&bytes)?;
            writer.flush()
        })
        .await
        .map_err(io::Error::other)
        .and_then(|r| r);

        if let Err(e) = result {
            warn!("write to {} failed: {e}", self.device);
            token.cancel();
            return Err(SerialError::Write(e));
        }
        Ok(())
    }

    fn set_state(&self, state: SerialState) {
        let previous = self.state_tx.send_replace(state);
        if previous != state {
            debug!("serial {}: {previous} -> {state}", self.device);
        }
    }

    fn install(&self, writer: Box<dyn Write + Send>, token: CancellationToken) {
        *self.active.lock().unwrap_or_else(|p| p.into_inner()) = Some(ActiveLink {
            writer: Arc::new(Mutex::new(writer)),
            token,
        });
        self.set_state(SerialState::Connected);
    }

    fn uninstall(&self) {
        self.active.lock().unwrap_or_else(|p| p.into_inner()).take();
        self.set_state(SerialState::Disconnected);
    }
}

#[async_trait]
impl DeviceLink for SerialLink {
    fn state(&self) -> SerialState {
        SerialLink::state(self)
    }

    async fn write(&self, bytes: Bytes) -> Result<(), BridgeError> {
        self.write_bytes(bytes).await.map_err(|e| match e {
            SerialError::NotConnected => BridgeError::LinkDown,
            SerialError::Write(source) | SerialError::Open { source, .. } => {
                BridgeError::LinkWrite(source)
            }
        })
    }
}

// ── Supervisor ────────────────────────────────────────────────────────────────

/// How a read loop ended.
#[derive(Debug)]
enum ReadEnd {
    /// Its token was cancelled (shutdown or a failed write).
    Stopped,
    /// Nobody is consuming serial events any more.
    Abandoned,
    /// The device reported an error or end-of-file.
    Failed(io::Error),
}

fn read_loop(
    mut reader: Box<dyn Read + Send>,
    events: mpsc::Sender<SerialEvent>,
    token: CancellationToken,
) -> ReadEnd {
    let mut buf = [0u8; READ_CHUNK];
    loop {
        if token.is_cancelled() {
            return ReadEnd::Stopped;
        }
        match reader.read(&mut buf) {
            Ok(0) => {
                return ReadEnd::Failed(io::Error::new(
                    io::ErrorKind::UnexpectedEof,
                    "device closed",
                ))
            }
            Ok(n) => {
                let chunk = Bytes::copy_from_slice(&buf[..n]);
                if events.blocking_send(SerialEvent::Data(chunk)).is_err() {
                    return ReadEnd::Abandoned;
                }
            }
            Err(e)
                if matches!(
                    e.kind(),
                    io::ErrorKind::TimedOut | io::ErrorKind::WouldBlock | io::ErrorKind::Interrupted
                ) => {}
            Err(e) => return ReadEnd::Failed(e),
        }
    }
}

async fn supervise(
    link: Arc<SerialLink>,
    opener: Arc<dyn SerialOpener>,
    policy: ReconnectPolicy,
    mut reader: Box<dyn Read + Send>,
    mut token: CancellationToken,
    events: mpsc::Sender<SerialEvent>,
    cancel: CancellationToken,
) {
    loop {
        if events.send(SerialEvent::Connected).await.is_err() {
            break;
        }

        let read_task = tokio::task::spawn_blocking({
            let events = events.clone();
            let token = token.clone();
            move || read_loop(reader, events, token)
        });
        let end = read_task
            .await
            .unwrap_or_else(|e| ReadEnd::Failed(io::Error::other(e)));

        token.cancel();
        link.uninstall();

        if cancel.is_cancelled() {
            break;
        }
        match end {
            ReadEnd::Abandoned => break,
            ReadEnd::Stopped => warn!("serial link {} dropped after write failure", link.device),
            ReadEnd::Failed(e) => warn!("serial link {} lost: {e}", link.device),
        }
        if events.send(SerialEvent::Disconnected).await.is_err() {
            break;
        }

        let Some(streams) = reconnect(&link, &opener, policy, &cancel).await else {
            break;
        };
        token = cancel.child_token();
        link.install(streams.writer, token.clone());
        reader = streams.reader;
        info!("serial link {} reconnected", link.device);
    }

    link.uninstall();
    debug!("serial supervisor for {} stopped", link.device);
}

/// Retries opening the device until it succeeds or `cancel` fires.
async fn reconnect(
    link: &SerialLink,
    opener: &Arc<dyn SerialOpener>,
    policy: ReconnectPolicy,
    cancel: &CancellationToken,
) -> Option<SerialStreams> {
    let mut delay = policy.initial_delay;
    loop {
        info!("reopening {} in {:?}", link.device, delay);
        tokio::select! {
            _ = cancel.cancelled() => return None,
            _ = tokio::time::sleep(delay) => {}
        }

        link.set_state(SerialState::Connecting);
        match open_blocking(opener).await {
            Ok(streams) => return Some(streams),
            Err(e) => {
                warn!("reopen of {} failed: {e}", link.device);
                link.set_state(SerialState::Disconnected);
                delay = policy.next_delay(delay);
            }
        }
    }
}

// ── Tests ─────────────────────────────────────────────────────────────────────
