//! # Heartbeat client.
//!
//! Optional helper run inside a managed process: one liveness ping per
//! interval over the channel negotiated through the injected environment
//! variables. Send failures are logged and swallowed — a transient channel
//! outage must never crash the application being supervised.

use std::path::PathBuf;
use std::time::Duration;

use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::net::UnixStream;
use tokio_util::sync::CancellationToken;

use crate::heartbeat::{
    HeartbeatMessage, ENV_HEARTBEAT_INTERVAL_SECS, ENV_HEARTBEAT_SOCKET, ENV_PROCESS_ID,
};

/// Default send interval when the environment does not specify one.
const DEFAULT_INTERVAL: Duration = Duration::from_secs(10);

/// Periodic liveness reporter for a managed process.
#[derive(Debug, Clone)]
pub struct HeartbeatClient {
    process_id: String,
    socket_path: PathBuf,
    interval: Duration,
}

impl HeartbeatClient {
    /// Creates a client with explicit parameters.
    pub fn new(
        process_id: impl Into<String>,
        socket_path: impl Into<PathBuf>,
        interval: Duration,
    ) -> Self {
        Self {
            process_id: process_id.into(),
            socket_path: socket_path.into(),
            interval,
        }
    }

    /// Builds a client from the injected environment.
    ///
    /// Returns `None` when the process is not running under supervision
    /// (no id or socket in the environment), letting applications call
    /// this unconditionally.
    pub fn from_env() -> Option<Self> {
        let process_id = std::env::var(ENV_PROCESS_ID).ok()?;
        let socket_path = std::env::var(ENV_HEARTBEAT_SOCKET).ok()?;
        let interval = std::env::var(ENV_HEARTBEAT_INTERVAL_SECS)
            .ok()
            .and_then(|raw| raw.parse::<u64>().ok())
            .map(Duration::from_secs)
            .unwrap_or(DEFAULT_INTERVAL);
        Some(Self::new(process_id, socket_path, interval))
    }

    /// The send interval in effect.
    pub fn interval(&self) -> Duration {
        self.interval
    }

    /// Sends pings until the token is cancelled.
    ///
    /// Every failure is swallowed after a log line; the loop keeps going
    /// and retries on the next interval.
    pub async fn run(self, token: CancellationToken) {
        let mut tick = tokio::time::interval(self.interval);
        loop {
            tokio::select! {
                _ = token.cancelled() => break,
                _ = tick.tick() => {
                    if let Err(e) = self.send_once().await {
                        tracing::debug!(
                            target: "procvisor::heartbeat",
                            error = %e,
                            "heartbeat send failed"
                        );
                    }
                }
            }
        }
    }

    /// Sends a single ping and waits for the server's ack line.
    pub async fn send_once(&self) -> std::io::Result<()> {
        let mut stream = UnixStream::connect(&self.socket_path).await?;
        let payload = serde_json::to_string(&HeartbeatMessage::now(self.process_id.clone()))
            .map_err(std::io::Error::other)?;
        stream.write_all(format!("{payload}\n").as_bytes()).await?;

        let (reader, _writer) = stream.split();
        let mut ack = String::new();
        BufReader::new(reader).read_line(&mut ack).await?;
        Ok(())
    }
}
