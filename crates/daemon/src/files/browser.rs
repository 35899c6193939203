//! Directory listing under the shared root.
//!
//! Listings are produced fresh on every call from a [`ResolvedPath`]. Entries
//! are filtered by name before any metadata is read, then sorted and grouped
//! with directories ahead of files.

use std::cmp::Ordering;
use std::fs;
use std::io;
use std::path::PathBuf;
use std::time::SystemTime;

use chrono::{DateTime, SecondsFormat, Utc};
use protocol::{ListItem, SortField, SortSpec};
use thiserror::Error;
use tracing::{debug, warn};

use super::resolver::ResolvedPath;
use super::transfer::is_partial_upload;

/// Errors that can occur while listing a directory.
#[derive(Debug, Error)]
pub enum ListError {
    /// The requested path does not exist.
    #[error("path does not exist: {0}")]
    NotFound(PathBuf),

    /// The requested path is not a directory.
    #[error("path is not a directory: {0}")]
    NotADirectory(PathBuf),

    /// Permission denied.
    #[error("permission denied: {0}")]
    AccessDenied(PathBuf),

    /// IO error.
    #[error("IO error: {0}")]
    Io(#[from] io::Error),
}

impl ListError {
    fn from_io(path: &ResolvedPath, err: io::Error) -> Self {
        match err.kind() {
            io::ErrorKind::NotFound => Self::NotFound(path.as_path().to_path_buf()),
            io::ErrorKind::PermissionDenied => Self::AccessDenied(path.as_path().to_path_buf()),
            io::ErrorKind::NotADirectory => Self::NotADirectory(path.as_path().to_path_buf()),
            _ => Self::Io(err),
        }
    }
}

/// Kind of a listed entry.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EntryKind {
    File,
    Directory,
}

/// One listing record.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Entry {
    /// Entry name (final path segment only).
    pub name: String,
    /// Entry kind, after following symlinks.
    pub kind: EntryKind,
    /// Size in bytes (0 for directories).
    pub size: u64,
    /// Last modified timestamp.
    pub modified: SystemTime,
}

impl Entry {
    /// Whether this entry is a directory.
    pub fn is_dir(&self) -> bool {
        self.kind == EntryKind::Directory
    }

    /// Convert to the JSON listing item.
    pub fn to_wire(&self) -> ListItem {
        let modified: DateTime<Utc> = self.modified.into();

        ListItem {
            name: self.name.clone(),
            is_dir: self.is_dir(),
            size: self.size,
            modified: modified.to_rfc3339_opts(SecondsFormat::Secs, false),
        }
    }
}

/// Filter and sort options of a single listing.
#[derive(Debug, Clone, Default)]
pub struct ListingQuery {
    /// Lowercased search term.
    search: Option<String>,
    sort: SortSpec,
}

impl ListingQuery {
    /// All entries, sorted by name ascending.
    pub fn new() -> Self {
        Self::default()
    }

    /// Keep only entries whose name contains `term`, ignoring case.
    ///
    /// An empty term disables the filter.
    pub fn search(mut self, term: impl AsRef<str>) -> Self {
        let term = term.as_ref();
        self.search = (!term.is_empty()).then(|| term.to_lowercase());
        self
    }

    /// Set the sort order.
    pub fn sort(mut self, sort: SortSpec) -> Self {
        self.sort = sort;
        self
    }

    /// The requested sort order.
    pub fn sort_spec(&self) -> SortSpec {
        self.sort
    }

    /// Whether `name` passes the search filter.
    pub fn matches(&self, name: &str) -> bool {
        match &self.search {
            Some(term) => name.to_lowercase().contains(term.as_str()),
            None => true,
        }
    }
}

/// Lists directories reached through a [`ResolvedPath`].
#[derive(Debug, Clone)]
pub struct DirectoryBrowser {
    include_hidden: bool,
}

impl Default for DirectoryBrowser {
    fn default() -> Self {
        Self::new()
    }
}

impl DirectoryBrowser {
    /// Create a browser that shows hidden files.
    pub fn new() -> Self {
        Self {
            include_hidden: true,
        }
    }

    /// Set whether names starting with `.` are listed.
    pub fn include_hidden(mut self, include: bool) -> Self {
        self.include_hidden = include;
        self
    }

    /// List the immediate children of `dir`.
    pub fn list(&self, dir: &ResolvedPath, query: &ListingQuery) -> Result<Vec<Entry>, ListError> {
        let metadata = fs::metadata(dir.as_path()).map_err(|e| ListError::from_io(dir, e))?;
        if !metadata.is_dir() {
            return Err(ListError::NotADirectory(dir.as_path().to_path_buf()));
        }

        let read_dir = fs::read_dir(dir.as_path()).map_err(|e| ListError::from_io(dir, e))?;

        let mut entries = Vec::new();
        for dir_entry in read_dir {
            let dir_entry = match dir_entry {
                Ok(e) => e,
                Err(e) => {
                    warn!(dir = ?dir.as_path(), error = %e, "Skipping unreadable entry");
                    continue;
                }
            };

            let name = dir_entry.file_name().to_string_lossy().into_owned();

            if !self.include_hidden && name.starts_with('.') {
                continue;
            }
            if is_partial_upload(&name) || !query.matches(&name) {
                continue;
            }

            if let Some(entry) = self.stat_entry(dir, &dir_entry, name) {
                entries.push(entry);
            }
        }

        sort_entries(&mut entries, query.sort_spec());

        debug!(dir = ?dir.as_path(), count = entries.len(), "Listed directory");
        Ok(entries)
    }

    /// Read metadata for one child, following symlinks that stay inside the root.
    fn stat_entry(&self, dir: &ResolvedPath, dir_entry: &fs::DirEntry, name: String) -> Option<Entry> {
        let path = dir_entry.path();

        let is_symlink = dir_entry
            .file_type()
            .map(|t| t.is_symlink())
            .unwrap_or(false);

        let metadata = if is_symlink {
            let target = match fs::canonicalize(&path) {
                Ok(t) => t,
                Err(e) => {
                    debug!(path = ?path, error = %e, "Omitting dangling symlink");
                    return None;
                }
            };
            if !dir.root().contains(&target) {
                debug!(path = ?path, target = ?target, "Omitting symlink outside shared root");
                return None;
            }
            fs::metadata(&target)
        } else {
            dir_entry.metadata()
        };

        let metadata = match metadata {
            Ok(m) => m,
            Err(e) => {
                warn!(path = ?path, error = %e, "Skipping entry without metadata");
                return None;
            }
        };

        let kind = if metadata.is_dir() {
            EntryKind::Directory
        } else {
            EntryKind::File
        };

        Some(Entry {
            name,
            kind,
            size: if kind == EntryKind::Directory { 0 } else { metadata.len() },
            modified: metadata.modified().unwrap_or(SystemTime::UNIX_EPOCH),
        })
    }
}

fn compare_names(a: &Entry, b: &Entry) -> Ordering {
    a.name
        .to_lowercase()
        .cmp(&b.name.to_lowercase())
        .then_with(|| a.name.cmp(&b.name))
}

/// Sort entries by `sort`, then move directories ahead of files.
///
/// Ties on size or modification time fall back to name order. The grouping
/// is a stable partition, so the requested order holds within each group.
pub fn sort_entries(entries: &mut [Entry], sort: SortSpec) {
    entries.sort_by(|a, b| {
        let ordering = match sort.field {
            SortField::Name => compare_names(a, b),
            SortField::Size => a.size.cmp(&b.size).then_with(|| compare_names(a, b)),
            SortField::Modified => a
                .modified
                .cmp(&b.modified)
                .then_with(|| compare_names(a, b)),
        };
        if sort.is_descending() {
            ordering.reverse()
        } else {
            ordering
        }
    });

    entries.sort_by_key(|e| !e.is_dir());
}
