//! # LanShare Protocol Library
//!
//! This crate defines the wire format spoken between the LanShare daemon and
//! the browsers that connect to it over the local network.
//!
//! ## Overview
//!
//! - **Message Definitions**: JSON bodies of the listing endpoint and error replies
//! - **Query Parameters**: the `path`, `search` and `sort` parameters of a listing
//! - **Sort Grammar**: `name`, `size` or `modified`, optionally suffixed with `_desc`
//!
//! ## Example Usage
//!
//! ```rust
//! use protocol::{SortDirection, SortField, SortSpec};
//!
//! let sort: SortSpec = "size_desc".parse().unwrap();
//! assert_eq!(sort.field, SortField::Size);
//! assert_eq!(sort.direction, SortDirection::Descending);
//! assert_eq!(sort.to_string(), "size_desc");
//! ```
//!
//! ## Modules
//!
//! - [`messages`]: Listing request/response bodies and the sort grammar
//! - [`error`]: Error types

pub mod error;
pub mod messages;

pub use error::{ProtocolError, Result};
pub use messages::{
    ErrorBody, ListItem, ListParams, ListResponse, SortDirection, SortField, SortSpec,
    UploadParams, DESC_SUFFIX, UPLOAD_FILE_FIELD, UPLOAD_PATH_FIELD,
};
