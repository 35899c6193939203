//! Directory-scoped file access for the shared folder.
//!
//! This module provides the operations behind the HTTP surface:
//! - Resolution of untrusted relative paths against the shared root
//! - Directory listing with search and sorting
//! - Streaming downloads and uploads finalized by rename
//! - The registry holding the currently shared root
//!
//! # Security
//!
//! Every path a client supplies goes through [`resolve`] before any other
//! operation sees it. Resolution canonicalizes the joined path, following
//! symlinks, and compares it to the root component by component. The other
//! operations accept only the [`ResolvedPath`] it produces.

pub mod browser;
pub mod registry;
pub mod resolver;
pub mod transfer;

pub use browser::{sort_entries, DirectoryBrowser, Entry, EntryKind, ListError, ListingQuery};
pub use registry::RootRegistry;
pub use resolver::{resolve, ResolveError, ResolvedPath, Root};
pub use transfer::{
    is_partial_upload, sanitize_filename, Download, FileTransfer, StagedUpload, TransferError,
    Upload,
};
