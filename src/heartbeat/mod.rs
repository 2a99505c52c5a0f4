//! # Heartbeat channel: out-of-band liveness reporting.
//!
//! A lightweight side channel for processes that cannot expose an HTTP
//! endpoint. The server listens on a Unix domain socket under the data
//! directory and writes `last_heartbeat` for every ping; the optional
//! client runs inside a managed process and sends one newline-framed JSON
//! message per interval.
//!
//! The channel address and cadence are negotiated through environment
//! variables the controller injects into every spawned process:
//! [`ENV_PROCESS_ID`], [`ENV_HEARTBEAT_SOCKET`],
//! [`ENV_HEARTBEAT_INTERVAL_SECS`]. A managed application works exactly
//! the same with or without a heartbeat client; the monitor simply has one
//! less signal available.

mod client;
mod server;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

pub use client::HeartbeatClient;
pub use server::HeartbeatServer;

/// Environment variable carrying the record id of a spawned process.
pub const ENV_PROCESS_ID: &str = "PROCVISOR_PROCESS_ID";

/// Environment variable carrying the heartbeat socket path.
pub const ENV_HEARTBEAT_SOCKET: &str = "PROCVISOR_HEARTBEAT_SOCKET";

/// Environment variable carrying the send interval in seconds.
pub const ENV_HEARTBEAT_INTERVAL_SECS: &str = "PROCVISOR_HEARTBEAT_INTERVAL_SECS";

/// One liveness ping, newline-framed JSON on the wire.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HeartbeatMessage {
    /// Record id of the reporting process.
    pub process_id: String,
    /// Sender-side timestamp; informational, the server stamps receipt time.
    #[serde(default)]
    pub timestamp: Option<DateTime<Utc>>,
}

impl HeartbeatMessage {
    /// Builds a ping for the given record id, stamped now.
    pub fn now(process_id: impl Into<String>) -> Self {
        Self {
            process_id: process_id.into(),
            timestamp: Some(Utc::now()),
        }
    }
}
