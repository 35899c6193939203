//! IPC message types for CLI-daemon communication.
//!
//! This module defines the request and response types used for communication
//! between the CLI and a running server over the control socket.

use std::path::PathBuf;

use serde::{Deserialize, Serialize};

/// Requests that can be sent from the CLI to the daemon.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub enum IpcRequest {
    /// Check if the daemon is alive.
    Ping,
    /// Get the current status of the daemon.
    Status,
    /// Share a different folder.
    SetRoot {
        /// Directory to share. Relative paths are resolved by the CLI.
        path: PathBuf,
    },
    /// Stop sharing any folder while keeping the server up.
    ClearRoot,
    /// Request the daemon to stop gracefully.
    Stop,
}

/// Responses sent from the daemon to the CLI.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub enum IpcResponse {
    /// Response to a Ping request.
    Pong,
    /// Current daemon status.
    Status {
        /// Whether the HTTP server is accepting requests.
        running: bool,
        /// Uptime in seconds.
        uptime_secs: u64,
        /// Canonical path of the shared folder, if any.
        root: Option<PathBuf>,
        /// URL peers open in a browser.
        url: Option<String>,
    },
    /// The shared folder was replaced.
    RootSet {
        /// Canonical path now shared.
        root: PathBuf,
    },
    /// No folder is shared anymore.
    RootCleared,
    /// Acknowledgment that the daemon is stopping.
    Stopping,
    /// An error occurred processing the request.
    Error {
        /// Human-readable error message.
        message: String,
    },
}
