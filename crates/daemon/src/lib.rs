//! # LanShare Daemon Library
//!
//! This crate provides the server side of LanShare, which exposes one folder
//! on the host to browsers on the local network.
//!
//! ## Overview
//!
//! Peers browse, download and upload files through a small web UI. Every
//! path they send is confined to the shared folder:
//!
//! - **Path Resolution**: Canonicalizes untrusted relative paths and rejects escapes
//! - **Directory Listing**: Searchable, sortable listings with directories first
//! - **Transfers**: Streaming downloads and uploads finalized by rename
//! - **Root Registry**: The shared folder, replaceable while serving
//! - **Control Socket**: Local CLI commands for a running server
//!
//! ## Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────┐
//! │                        Share Server                         │
//! ├─────────────────────────────────────────────────────────────┤
//! │  ┌──────────────────────────┐  ┌─────────────────────────┐  │
//! │  │      HTTP Router         │  │     Control Socket      │  │
//! │  └────────────┬─────────────┘  └────────────┬────────────┘  │
//! │               │                             │               │
//! │  ┌────────────▼─────────────────────────────▼────────────┐  │
//! │  │                    Root Registry                      │  │
//! │  └────────────┬──────────────────────────────────────────┘  │
//! │  ┌────────────▼────┐  ┌──────────────┐  ┌───────────────┐   │
//! │  │  Path Resolver  │  │   Lister     │  │   Transfer    │   │
//! │  └─────────────────┘  └──────────────┘  └───────────────┘   │
//! └─────────────────────────────────────────────────────────────┘
//! ```
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use daemon::{Config, ShareServer};
//!
//! #[tokio::main]
//! async fn main() -> anyhow::Result<()> {
//!     let mut config = Config::default();
//!     config.share.root = Some("/srv/public".into());
//!
//!     let mut server = ShareServer::new(config)?;
//!     let addr = server.start().await?;
//!     println!("listening on {addr}");
//!
//!     server.shutdown_token().cancelled().await;
//!     server.stop().await?;
//!     Ok(())
//! }
//! ```
//!
//! ## Modules
//!
//! - [`config`]: Configuration loading and defaults
//! - [`files`]: Path resolution, listing, transfers and the root registry
//! - [`router`]: HTTP routes
//! - [`ipc`]: Control socket between the CLI and a running server
//! - [`network`]: LAN address discovery
//! - [`ui`]: QR code rendering
//! - [`orchestrator`]: Server lifecycle

pub mod config;
pub mod files;
pub mod ipc;
pub mod network;
pub mod orchestrator;
pub mod router;
pub mod ui;

// Re-export protocol for convenience
pub use protocol;

// Re-export config types for convenience
pub use config::Config;

// Re-export files types for convenience
pub use files::{
    resolve, DirectoryBrowser, Entry, FileTransfer, ListError, ListingQuery, ResolveError,
    ResolvedPath, Root, RootRegistry, TransferError,
};

// Re-export router types for convenience
pub use router::{build_router, ApiError, AppState};

// Re-export orchestrator types for convenience
pub use orchestrator::{ServerEvent, ServerState, ShareServer};
