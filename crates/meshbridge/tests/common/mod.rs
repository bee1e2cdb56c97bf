//! In-memory serial device shared by the integration tests.
//!
//! Each call to `open()` consumes one queued session.  A session's reader
//! yields whatever the test pushes through its `SessionFeed`, reports a read
//! timeout when idle, and reports end-of-file once the feed is dropped.
//! Everything any session writes lands in one shared buffer.

#![allow(dead_code)]

use std::collections::VecDeque;
use std::io::{self, Read, Write};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::mpsc;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use meshbridge::domain::{BridgeConfig, ReconnectPolicy};
use meshbridge::infrastructure::{SerialOpener, SerialStreams};

/// Test-side handle that feeds one serial session.
pub struct SessionFeed(mpsc::Sender<Vec<u8>>);

impl SessionFeed {
    pub fn push(&self, bytes: &[u8]) {
        self.0.send(bytes.to_vec()).expect("session reader gone");
    }
}

#[derive(Default)]
pub struct MemorySerial {
    sessions: Mutex<VecDeque<mpsc::Receiver<Vec<u8>>>>,
    written: Arc<Mutex<Vec<u8>>>,
    opens: AtomicUsize,
}

impl MemorySerial {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    /// Queues a session for the next successful `open()`.
    pub fn add_session(&self) -> SessionFeed {
        let (tx, rx) = mpsc::channel();
        self.sessions.lock().unwrap().push_back(rx);
        SessionFeed(tx)
    }

    /// Every byte written to the device so far.
    pub fn written(&self) -> Vec<u8> {
        self.written.lock().unwrap().clone()
    }

    pub fn opens(&self) -> usize {
        self.opens.load(Ordering::SeqCst)
    }
}

impl SerialOpener for MemorySerial {
    fn device(&self) -> &str {
        "mem0"
    }

    fn open(&self) -> io::Result<SerialStreams> {
        self.opens.fetch_add(1, Ordering::SeqCst);
        let rx = self
            .sessions
            .lock()
            .unwrap()
            .pop_front()
            .ok_or_else(|| io::Error::new(io::ErrorKind::NotFound, "no such device"))?;
        Ok(SerialStreams {
            reader: Box::new(FeedReader {
                rx,
                pending: VecDeque::new(),
            }),
            writer: Box::new(SharedWriter(Arc::clone(&self.written))),
        })
    }
}

struct FeedReader {
    rx: mpsc::Receiver<Vec<u8>>,
    pending: VecDeque<u8>,
}

impl Read for FeedReader {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        if self.pending.is_empty() {
            match self.rx.recv_timeout(Duration::from_millis(10)) {
                Ok(bytes) => self.pending.extend(bytes),
                Err(mpsc::RecvTimeoutError::Timeout) => {
                    return Err(io::ErrorKind::TimedOut.into())
                }
                Err(mpsc::RecvTimeoutError::Disconnected) => return Ok(0),
            }
        }
        let n = buf.len().min(self.pending.len());
        for (slot, byte) in buf.iter_mut().zip(self.pending.drain(..n)) {
            *slot = byte;
        }
        Ok(n)
    }
}

struct SharedWriter(Arc<Mutex<Vec<u8>>>);

impl Write for SharedWriter {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        self.0.lock().unwrap().extend_from_slice(buf);
        Ok(buf.len())
    }

    fn flush(&mut self) -> io::Result<()> {
        Ok(())
    }
}

/// Loopback config on an ephemeral port with fast reconnects.
pub fn test_config() -> BridgeConfig {
    BridgeConfig {
        serial_path: "mem0".to_string(),
        bind_host: "127.0.0.1".to_string(),
        port: 0,
        reconnect: ReconnectPolicy {
            initial_delay: Duration::from_millis(10),
            max_delay: Duration::from_millis(50),
        },
        ..BridgeConfig::default()
    }
}

/// Polls `check` until it holds or two seconds pass.
pub async fn eventually<F: FnMut() -> bool>(mut check: F) {
    for _ in 0..400 {
        if check() {
            return;
        }
        tokio::time::sleep(Duration::from_millis(5)).await;
    }
    panic!("condition not reached in time");
}
