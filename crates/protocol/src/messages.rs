//! HTTP message definitions for LanShare.
//!
//! This module defines the JSON bodies and query parameters exchanged between
//! the daemon and browser clients, plus the textual sort grammar used by the
//! listing endpoint.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::error::ProtocolError;

/// Suffix that flips a sort field into descending order (`size_desc`).
pub const DESC_SUFFIX: &str = "_desc";

/// Multipart field carrying the uploaded file.
pub const UPLOAD_FILE_FIELD: &str = "file";

/// Multipart field carrying the destination directory.
pub const UPLOAD_PATH_FIELD: &str = "path";

/// Query parameters of the listing endpoint.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ListParams {
    /// Directory to list, relative to the shared root. Empty or missing means the root.
    #[serde(default)]
    pub path: Option<String>,
    /// Case-insensitive substring filter on entry names.
    #[serde(default)]
    pub search: Option<String>,
    /// Sort specification, e.g. `name`, `modified_desc`.
    #[serde(default)]
    pub sort: Option<String>,
}

impl ListParams {
    /// Parse the sort parameter, defaulting to name ascending.
    pub fn sort_spec(&self) -> Result<SortSpec, ProtocolError> {
        match self.sort.as_deref() {
            None | Some("") => Ok(SortSpec::default()),
            Some(s) => s.parse(),
        }
    }

    /// The search term, if it is non-empty.
    pub fn search_term(&self) -> Option<&str> {
        self.search.as_deref().filter(|s| !s.is_empty())
    }
}

/// Query parameters accepted by the upload endpoint.
///
/// The destination may also arrive as the `path` multipart field.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct UploadParams {
    /// Destination directory, relative to the shared root.
    #[serde(default)]
    pub path: Option<String>,
}

/// Response with a directory listing.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ListResponse {
    /// Path that was listed, as supplied by the client.
    pub path: String,
    /// Entries in display order.
    pub items: Vec<ListItem>,
}

/// A single file or directory in a listing.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ListItem {
    /// Entry name (final path segment only).
    pub name: String,
    /// Whether the entry is a directory.
    pub is_dir: bool,
    /// Size in bytes (0 for directories).
    pub size: u64,
    /// Last modification time, ISO-8601.
    pub modified: String,
}

/// Error body returned by JSON endpoints.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ErrorBody {
    /// Human-readable message.
    pub error: String,
}

impl ErrorBody {
    /// Create an error body from a message.
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            error: message.into(),
        }
    }
}

/// Field a listing is sorted by.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SortField {
    /// Case-insensitive name.
    #[default]
    Name,
    /// Size in bytes.
    Size,
    /// Last modification time.
    Modified,
}

impl SortField {
    /// The wire name of this field.
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Name => "name",
            Self::Size => "size",
            Self::Modified => "modified",
        }
    }
}

/// Direction of a sort.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SortDirection {
    #[default]
    Ascending,
    Descending,
}

/// A sort field paired with a direction.
///
/// The textual form is the field name, optionally followed by `_desc`.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash)]
pub struct SortSpec {
    pub field: SortField,
    pub direction: SortDirection,
}

impl SortSpec {
    /// Ascending sort on `field`.
    pub fn ascending(field: SortField) -> Self {
        Self {
            field,
            direction: SortDirection::Ascending,
        }
    }

    /// Descending sort on `field`.
    pub fn descending(field: SortField) -> Self {
        Self {
            field,
            direction: SortDirection::Descending,
        }
    }

    /// Whether this sorts in descending order.
    pub fn is_descending(&self) -> bool {
        self.direction == SortDirection::Descending
    }
}

impl FromStr for SortSpec {
    type Err = ProtocolError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let (key, direction) = match s.strip_suffix(DESC_SUFFIX) {
            Some(key) => (key, SortDirection::Descending),
            None => (s, SortDirection::Ascending),
        };

        let field = match key {
            "name" => SortField::Name,
            "size" => SortField::Size,
            "modified" => SortField::Modified,
            _ => return Err(ProtocolError::InvalidSort(s.to_string())),
        };

        Ok(Self { field, direction })
    }
}

impl fmt::Display for SortSpec {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.field.as_str())?;
        if self.is_descending() {
            f.write_str(DESC_SUFFIX)?;
        }
        Ok(())
    }
}
