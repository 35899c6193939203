//! Unix Domain Socket IPC module for CLI-daemon communication.
//!
//! A running `lanshare serve` listens on a local control socket. The other
//! subcommands (`share`, `unshare`, `status`, `stop`) connect to it to
//! change the shared folder or stop the server.
//!
//! ## Overview
//!
//! The IPC system uses a JSON newline-delimited protocol for simplicity and
//! debugging convenience. Each message is a single JSON object followed by a newline.
//!
//! ## Socket Path
//!
//! - Primary: `$XDG_RUNTIME_DIR/lanshare/control.sock`
//! - Fallback: `/tmp/lanshare-$UID/control.sock`
//!
//! ## Example
//!
//! ```rust,no_run
//! use daemon::ipc::{IpcClient, get_socket_path};
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let mut client = IpcClient::connect(&get_socket_path()).await?;
//!
//!     if client.ping().await? {
//!         println!("Server is running");
//!     }
//!
//!     Ok(())
//! }
//! ```

mod client;
mod messages;
mod server;

pub use client::IpcClient;
pub use messages::{IpcRequest, IpcResponse};
pub use server::{IpcConnection, IpcError, IpcServer};

use std::path::PathBuf;

/// Get the control socket path.
///
/// 1. If `$XDG_RUNTIME_DIR` is set: `$XDG_RUNTIME_DIR/lanshare/control.sock`
/// 2. Otherwise: `/tmp/lanshare-$UID/control.sock`
#[cfg(unix)]
pub fn get_socket_path() -> PathBuf {
    use std::os::unix::fs::MetadataExt;

    match std::env::var("XDG_RUNTIME_DIR") {
        Ok(runtime_dir) if !runtime_dir.is_empty() => PathBuf::from(runtime_dir)
            .join("lanshare")
            .join("control.sock"),
        _ => {
            // Owner of /proc/self is the current user
            let uid = std::fs::metadata("/proc/self")
                .map(|m| m.uid())
                .unwrap_or(0);

            PathBuf::from(format!("/tmp/lanshare-{}", uid)).join("control.sock")
        }
    }
}

/// Non-Unix platforms are not supported for Unix Domain Sockets.
#[cfg(not(unix))]
pub fn get_socket_path() -> PathBuf {
    PathBuf::from("/tmp/lanshare-unsupported/control.sock")
}
