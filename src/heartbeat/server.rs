//! # Heartbeat server.
//!
//! Listens on the heartbeat Unix domain socket and writes `last_heartbeat`
//! into the registry for every ping. One task per connection; a client may
//! keep its connection open and send many newline-framed messages.
//!
//! Pings for unknown ids are logged and dropped — the channel never creates
//! records and never touches lifecycle state.

use std::path::PathBuf;
use std::sync::Arc;

use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::net::{UnixListener, UnixStream};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use crate::core::Registry;
use crate::error::Error;
use crate::events::{Bus, Event, EventKind};
use crate::heartbeat::HeartbeatMessage;

/// Accepts liveness pings from managed processes.
pub struct HeartbeatServer {
    registry: Arc<Registry>,
    socket_path: PathBuf,
    bus: Bus,
}

impl HeartbeatServer {
    /// Creates a server that will listen on `socket_path`.
    pub fn new(registry: Arc<Registry>, socket_path: PathBuf, bus: Bus) -> Self {
        Self {
            registry,
            socket_path,
            bus,
        }
    }

    /// Binds the socket (replacing a stale one) and spawns the accept loop.
    pub async fn spawn(self, token: CancellationToken) -> Result<JoinHandle<()>, Error> {
        if self.socket_path.exists() {
            std::fs::remove_file(&self.socket_path)?;
        }
        if let Some(parent) = self.socket_path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let listener = UnixListener::bind(&self.socket_path)?;
        tracing::info!(
            target: "procvisor::heartbeat",
            socket = %self.socket_path.display(),
            "heartbeat channel listening"
        );

        let server = Arc::new(self);
        Ok(tokio::spawn(async move {
            loop {
                tokio::select! {
                    _ = token.cancelled() => break,
                    accepted = listener.accept() => match accepted {
                        Ok((stream, _addr)) => {
                            let server = Arc::clone(&server);
                            let conn_token = token.child_token();
                            tokio::spawn(async move {
                                server.serve_connection(stream, conn_token).await;
                            });
                        }
                        Err(e) => {
                            tracing::warn!(target: "procvisor::heartbeat", error = %e, "accept failed");
                        }
                    }
                }
            }
            let _ = std::fs::remove_file(&server.socket_path);
        }))
    }

    async fn serve_connection(&self, stream: UnixStream, token: CancellationToken) {
        let (reader, mut writer) = stream.into_split();
        let mut lines = BufReader::new(reader).lines();
        loop {
            let line = tokio::select! {
                _ = token.cancelled() => break,
                line = lines.next_line() => line,
            };
            let line = match line {
                Ok(Some(line)) if !line.trim().is_empty() => line,
                Ok(Some(_)) => continue,
                _ => break,
            };

            let ack = match serde_json::from_str::<HeartbeatMessage>(&line) {
                Ok(message) => self.record_ping(&message).await,
                Err(e) => {
                    tracing::warn!(target: "procvisor::heartbeat", error = %e, "malformed heartbeat message");
                    "error"
                }
            };
            if writer.write_all(format!("{ack}\n").as_bytes()).await.is_err() {
                break;
            }
        }
    }

    async fn record_ping(&self, message: &HeartbeatMessage) -> &'static str {
        match self.registry.touch_heartbeat(&message.process_id).await {
            Ok(true) => {
                self.bus
                    .publish(Event::now(EventKind::HeartbeatReceived).with_process(message.process_id.as_str()));
                "ok"
            }
            Ok(false) => {
                tracing::warn!(
                    target: "procvisor::heartbeat",
                    process_id = %message.process_id,
                    "heartbeat from unknown process"
                );
                "unknown"
            }
            Err(e) => {
                tracing::warn!(target: "procvisor::heartbeat", error = %e, "recording heartbeat failed");
                "error"
            }
        }
    }
}
