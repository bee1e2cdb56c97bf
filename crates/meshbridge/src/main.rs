//! meshbridge: serial-to-TCP bridge for mesh-radio companion devices.
//!
//! This binary opens a serial port that speaks the `0x3C`-framed companion
//! protocol and exposes it on a TCP port.  Every frame the radio sends is
//! copied to every connected client; every frame a client sends is written to
//! the radio.
//!
//! # Usage
//!
//! ```text
//! meshbridge --serial <PATH> [OPTIONS]
//!
//! Options:
//!   -s, --serial <PATH>              Serial device, e.g. /dev/ttyUSB0 or COM3
//!   -p, --port <PORT>                TCP listener port [default: 5000]
//!   -b, --baud <BAUD>                Serial baud rate [default: 115200]
//!       --host <HOST>                Address or hostname to bind [default: 0.0.0.0]
//!       --max-clients <N>            Refuse clients beyond N [default: unlimited]
//!       --reconnect-delay <SECS>     First serial reopen delay [default: 1]
//!       --max-reconnect-delay <SECS> Reopen delay cap [default: 30]
//!   -v, --verbose                    Debug logging
//! ```
//!
//! # Environment variable overrides
//!
//! CLI args take precedence when both are present.
//!
//! | Variable                 | Default   | Description            |
//! |--------------------------|-----------|------------------------|
//! | `MESHBRIDGE_SERIAL`      | (none)    | Serial device path     |
//! | `MESHBRIDGE_PORT`        | `5000`    | TCP listener port      |
//! | `MESHBRIDGE_BAUD`        | `115200`  | Serial baud rate       |
//! | `MESHBRIDGE_HOST`        | `0.0.0.0` | Bind address           |
//! | `MESHBRIDGE_MAX_CLIENTS` | unlimited | Client cap             |
//!
//! `RUST_LOG`, when set, overrides the level chosen by `--verbose`.
//!
//! # Exit status
//!
//! `0` after a signal-driven shutdown; non-zero if the serial device cannot be
//! opened or the TCP port cannot be bound at startup.

use std::sync::Arc;
use std::time::Duration;

use anyhow::bail;
use clap::Parser;
use tokio_util::sync::CancellationToken;
use tracing::{error, info};
use tracing_subscriber::EnvFilter;

use meshbridge::domain::config::DEFAULT_CLIENT_QUEUE_DEPTH;
use meshbridge::domain::{BridgeConfig, ReconnectPolicy};
use meshbridge::infrastructure::{start_bridge, SerialPortOpener};

// ── CLI argument definitions ──────────────────────────────────────────────────

/// Serial-to-TCP bridge for mesh-radio companion devices.
#[derive(Debug, Parser)]
#[command(
    name = "meshbridge",
    about = "Share one serial mesh radio with many TCP clients",
    version
)]
struct Cli {
    /// Serial device path, e.g. `/dev/ttyUSB0` or `COM3`.
    #[arg(short = 's', long = "serial", env = "MESHBRIDGE_SERIAL")]
    serial: String,

    /// TCP port clients connect to.
    #[arg(short = 'p', long, default_value_t = 5000, env = "MESHBRIDGE_PORT")]
    port: u16,

    /// Serial baud rate.
    #[arg(short = 'b', long, default_value_t = 115_200, env = "MESHBRIDGE_BAUD")]
    baud: u32,

    /// Address or hostname to bind the TCP listener to.
    ///
    /// `0.0.0.0` accepts clients on every interface; `127.0.0.1` or
    /// `localhost` only local ones.  Hostnames are resolved at bind time.
    #[arg(long, default_value = "0.0.0.0", env = "MESHBRIDGE_HOST")]
    host: String,

    /// Maximum number of simultaneously connected clients.
    #[arg(long, env = "MESHBRIDGE_MAX_CLIENTS")]
    max_clients: Option<usize>,

    /// Seconds to wait before the first attempt to reopen a lost serial
    /// device.  Doubles after each failed attempt.
    #[arg(long, default_value_t = 1)]
    reconnect_delay: u64,

    /// Upper bound, in seconds, for the serial reopen delay.
    #[arg(long, default_value_t = 30)]
    max_reconnect_delay: u64,

    /// Enable debug logging.
    #[arg(short = 'v', long)]
    verbose: bool,
}

impl Cli {
    /// Converts the parsed CLI arguments into a [`BridgeConfig`].
    ///
    /// # Errors
    ///
    /// Returns an error if `--host` is empty, `--baud` or `--max-clients` is
    /// zero, or the reconnect delays are inconsistent.
    fn into_bridge_config(self) -> anyhow::Result<BridgeConfig> {
        if self.host.trim().is_empty() {
            bail!("--host must not be empty");
        }

        if self.baud == 0 {
            bail!("baud rate must be greater than zero");
        }
        if self.max_clients == Some(0) {
            bail!("--max-clients must be at least 1");
        }
        if self.reconnect_delay == 0 {
            bail!("--reconnect-delay must be at least 1 second");
        }
        if self.max_reconnect_delay < self.reconnect_delay {
            bail!(
                "--max-reconnect-delay ({}) is shorter than --reconnect-delay ({})",
                self.max_reconnect_delay,
                self.reconnect_delay
            );
        }

        Ok(BridgeConfig {
            serial_path: self.serial,
            baud_rate: self.baud,
            bind_host: self.host,
            port: self.port,
            max_clients: self.max_clients,
            reconnect: ReconnectPolicy {
                initial_delay: Duration::from_secs(self.reconnect_delay),
                max_delay: Duration::from_secs(self.max_reconnect_delay),
            },
            client_queue_depth: DEFAULT_CLIENT_QUEUE_DEPTH,
        })
    }
}

// ── Entry point ───────────────────────────────────────────────────────────────

/// Program entry point.
///
/// # What happens at startup
///
/// 1. CLI arguments are parsed with `clap`.
/// 2. `tracing_subscriber` is initialised: `debug` with `--verbose`, `info`
///    otherwise, unless `RUST_LOG` says something else.
/// 3. A signal task cancels the shared [`CancellationToken`] on Ctrl+C or
///    SIGTERM.
/// 4. [`start_bridge`] opens the serial device and binds the listener; a
///    failure here ends the process with an error.
/// 5. The bridge runs until the token is cancelled.
#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    // ── Logging setup ─────────────────────────────────────────────────────────
    let default_level = if cli.verbose { "debug" } else { "info" };
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_level)),
        )
        .init();

    let config = cli.into_bridge_config()?;
    info!(
        "meshbridge starting: serial={} baud={} listen={}:{}",
        config.serial_path, config.baud_rate, config.bind_host, config.port
    );

    // ── Graceful shutdown ─────────────────────────────────────────────────────
    let cancel = CancellationToken::new();
    tokio::spawn(cancel_on_signal(cancel.clone()));

    let opener = Arc::new(SerialPortOpener::new(
        config.serial_path.clone(),
        config.baud_rate,
    ));
    let bridge = start_bridge(&config, opener, cancel).await?;

    let stats = bridge.wait().await;
    info!("meshbridge stopped ({stats})");
    Ok(())
}

/// Cancels `cancel` on Ctrl+C, or SIGTERM on Unix.
async fn cancel_on_signal(cancel: CancellationToken) {
    #[cfg(unix)]
    {
        use tokio::signal::unix::{signal, SignalKind};

        let mut term = match signal(SignalKind::terminate()) {
            Ok(term) => term,
            Err(e) => {
                error!("failed to install SIGTERM handler: {e}");
                wait_for_ctrl_c().await;
                cancel.cancel();
                return;
            }
        };
        tokio::select! {
            _ = wait_for_ctrl_c() => {}
            _ = term.recv() => info!("received SIGTERM; shutting down"),
        }
    }

    #[cfg(not(unix))]
    wait_for_ctrl_c().await;

    cancel.cancel();
}

async fn wait_for_ctrl_c() {
    match tokio::signal::ctrl_c().await {
        Ok(()) => info!("received Ctrl+C; shutting down"),
        Err(e) => {
            error!("failed to listen for Ctrl+C: {e}");
            std::future::pending::<()>().await;
        }
    }
}

// ── Tests ─────────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;

    fn cli(args: &[&str]) -> Cli {
        let mut argv = vec!["meshbridge"];
        argv.extend_from_slice(args);
        Cli::parse_from(argv)
    }

    #[test]
    fn test_cli_requires_serial() {
        // Arrange / Act
        let result = Cli::try_parse_from(["meshbridge"]);

        // Assert: only fails when the env var is not set either
        if std::env::var_os("MESHBRIDGE_SERIAL").is_none() {
            assert!(result.is_err());
        }
    }

    #[test]
    fn test_cli_defaults() {
        let cli = cli(&["-s", "/dev/ttyUSB0"]);
        assert_eq!(cli.serial, "/dev/ttyUSB0");
        assert_eq!(cli.port, 5000);
        assert_eq!(cli.baud, 115_200);
        assert_eq!(cli.host, "0.0.0.0");
        assert_eq!(cli.max_clients, None);
        assert!(!cli.verbose);
    }

    #[test]
    fn test_cli_short_flags() {
        let cli = cli(&["-s", "COM3", "-p", "6000", "-b", "57600", "-v"]);
        assert_eq!(cli.serial, "COM3");
        assert_eq!(cli.port, 6000);
        assert_eq!(cli.baud, 57_600);
        assert!(cli.verbose);
    }

    #[test]
    fn test_cli_long_flags() {
        let cli = cli(&[
            "--serial",
            "/dev/ttyACM0",
            "--port",
            "7000",
            "--host",
            "127.0.0.1",
            "--max-clients",
            "4",
        ]);
        assert_eq!(cli.serial, "/dev/ttyACM0");
        assert_eq!(cli.port, 7000);
        assert_eq!(cli.host, "127.0.0.1");
        assert_eq!(cli.max_clients, Some(4));
    }

    #[test]
    fn test_into_bridge_config_defaults() {
        // Arrange
        let cli = cli(&["-s", "/dev/ttyUSB0"]);

        // Act
        let config = cli.into_bridge_config().unwrap();

        // Assert
        assert_eq!(config.serial_path, "/dev/ttyUSB0");
        assert_eq!(config.bind_host, "0.0.0.0");
        assert_eq!(config.port, 5000);
        assert_eq!(config.reconnect, ReconnectPolicy::default());
        assert_eq!(config.client_queue_depth, DEFAULT_CLIENT_QUEUE_DEPTH);
    }

    #[test]
    fn test_into_bridge_config_custom_host_and_port() {
        let config = cli(&["-s", "x", "--host", "192.168.1.10", "-p", "9000"])
            .into_bridge_config()
            .unwrap();
        assert_eq!(config.bind_host, "192.168.1.10");
        assert_eq!(config.port, 9000);
    }

    #[test]
    fn test_into_bridge_config_accepts_ipv6_host() {
        let config = cli(&["-s", "x", "--host", "::1"])
            .into_bridge_config()
            .unwrap();
        assert_eq!(config.bind_host, "::1");
    }

    #[test]
    fn test_into_bridge_config_accepts_hostname() {
        let config = cli(&["-s", "x", "--host", "localhost"])
            .into_bridge_config()
            .unwrap();
        assert_eq!(config.bind_host, "localhost");
        assert_eq!(config.port, 5000);
    }

    #[test]
    fn test_into_bridge_config_reconnect_delays() {
        let config = cli(&["-s", "x", "--reconnect-delay", "2", "--max-reconnect-delay", "8"])
            .into_bridge_config()
            .unwrap();
        assert_eq!(config.reconnect.initial_delay, Duration::from_secs(2));
        assert_eq!(config.reconnect.max_delay, Duration::from_secs(8));
    }

    #[test]
    fn test_into_bridge_config_empty_host_returns_error() {
        let result = cli(&["-s", "x", "--host", " "]).into_bridge_config();
        assert!(result.is_err());
    }

    #[test]
    fn test_into_bridge_config_zero_baud_returns_error() {
        let result = cli(&["-s", "x", "-b", "0"]).into_bridge_config();
        assert!(result.is_err());
    }

    #[test]
    fn test_into_bridge_config_zero_max_clients_returns_error() {
        let result = cli(&["-s", "x", "--max-clients", "0"]).into_bridge_config();
        assert!(result.is_err());
    }

    #[test]
    fn test_into_bridge_config_inverted_delays_return_error() {
        let result = cli(&["-s", "x", "--reconnect-delay", "10", "--max-reconnect-delay", "5"])
            .into_bridge_config();
        assert!(result.is_err());
    }
}
