//! Resolution of untrusted relative paths against the shared root.
//!
//! This is the only place where client-supplied paths are joined onto the
//! shared root. Every listing, download and upload goes through [`resolve`]
//! first, and only the [`ResolvedPath`] it returns may reach the filesystem.
//!
//! # Algorithm
//!
//! 1. Reject characters that are never valid in a path component.
//! 2. Join the relative path onto the root without interpreting `..`.
//! 3. Canonicalize the joined path, resolving `.`, `..` and symlinks. Trailing
//!    components that do not exist yet are appended lexically.
//! 4. Accept only if the canonical path is the root or lies below it,
//!    compared component by component.

use std::fs;
use std::io;
use std::path::{Component, Path, PathBuf};
use std::sync::Arc;

use thiserror::Error;
use tracing::debug;

/// Characters rejected in relative paths on every platform.
const ALWAYS_ILLEGAL: &[char] = &['\0'];

/// Characters Windows refuses in file names.
#[cfg(windows)]
const PLATFORM_ILLEGAL: &[char] = &['<', '>', ':', '"', '|', '?', '*'];

#[cfg(not(windows))]
const PLATFORM_ILLEGAL: &[char] = &[];

/// Upper bound on symlinks followed while resolving one path.
const MAX_SYMLINK_HOPS: usize = 40;

/// Reasons a relative path is rejected.
#[derive(Debug, Error)]
pub enum ResolveError {
    /// No directory is currently shared.
    #[error("no shared folder configured")]
    NoRootConfigured,

    /// The path contains characters that are illegal on this platform.
    #[error("path contains illegal characters: {0:?}")]
    InvalidCharacters(String),

    /// The canonical path lies outside the shared root.
    #[error("path escapes the shared root: {0:?}")]
    PathTraversal(String),

    /// The path could not be canonicalized.
    #[error("cannot resolve {path}: {source}")]
    Unresolvable {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    /// The directory offered as a root is unusable.
    #[error("invalid shared folder {path}: {reason}")]
    InvalidRoot { path: PathBuf, reason: String },
}

/// The directory currently designated as shareable.
///
/// A `Root` always holds a canonical path to an existing directory.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Root {
    path: PathBuf,
}

impl Root {
    /// Canonicalize `path` and check that it is a directory.
    pub fn new(path: impl AsRef<Path>) -> Result<Self, ResolveError> {
        let path = path.as_ref();

        let canonical = fs::canonicalize(path).map_err(|e| ResolveError::InvalidRoot {
            path: path.to_path_buf(),
            reason: e.to_string(),
        })?;

        if !canonical.is_dir() {
            return Err(ResolveError::InvalidRoot {
                path: path.to_path_buf(),
                reason: "not a directory".to_string(),
            });
        }

        Ok(Self { path: canonical })
    }

    /// The canonical root directory.
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Whether `candidate` is the root or lies below it, component-wise.
    ///
    /// `candidate` must already be canonical.
    pub fn contains(&self, candidate: &Path) -> bool {
        candidate.starts_with(&self.path)
    }
}

/// A canonical path proven to lie within a [`Root`].
///
/// Only [`resolve`] creates these. The root snapshot used for validation
/// travels with the path, so later checks never consult a newer root.
#[derive(Debug, Clone)]
pub struct ResolvedPath {
    root: Arc<Root>,
    path: PathBuf,
}

impl ResolvedPath {
    /// The canonical absolute path.
    pub fn as_path(&self) -> &Path {
        &self.path
    }

    /// The root this path was validated against.
    pub fn root(&self) -> &Arc<Root> {
        &self.root
    }

    /// Whether this path is the root itself.
    pub fn is_root(&self) -> bool {
        self.path == self.root.path
    }

    /// The final path segment, or `None` for the filesystem root.
    pub fn file_name(&self) -> Option<String> {
        self.path
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
    }

    /// The path relative to its root, with `/` separators.
    pub fn relative(&self) -> String {
        self.path
            .strip_prefix(self.root.path())
            .map(|rel| {
                rel.components()
                    .map(|c| c.as_os_str().to_string_lossy())
                    .collect::<Vec<_>>()
                    .join("/")
            })
            .unwrap_or_default()
    }
}

impl AsRef<Path> for ResolvedPath {
    fn as_ref(&self) -> &Path {
        &self.path
    }
}

/// Resolve a client-supplied relative path against a root snapshot.
///
/// An empty `relative` resolves to the root itself. The target does not need
/// to exist; callers report missing targets themselves.
pub fn resolve(root: Option<&Arc<Root>>, relative: &str) -> Result<ResolvedPath, ResolveError> {
    let root = root.ok_or(ResolveError::NoRootConfigured)?;

    if relative
        .chars()
        .any(|c| ALWAYS_ILLEGAL.contains(&c) || PLATFORM_ILLEGAL.contains(&c))
    {
        return Err(ResolveError::InvalidCharacters(relative.to_string()));
    }

    let joined = root.path().join(relative);
    let canonical = soft_canonicalize(&joined).map_err(|source| ResolveError::Unresolvable {
        path: joined.clone(),
        source,
    })?;

    if !root.contains(&canonical) {
        debug!(
            relative,
            resolved = ?canonical,
            root = ?root.path(),
            "Rejected path outside shared root"
        );
        return Err(ResolveError::PathTraversal(relative.to_string()));
    }

    Ok(ResolvedPath {
        root: Arc::clone(root),
        path: canonical,
    })
}

/// Canonicalize a path whose trailing components may not exist.
///
/// Existing components are resolved through the filesystem (following
/// symlinks); missing ones are appended as-is. A later `..` pops whatever the
/// current canonical prefix is, matching how the kernel would walk the path,
/// and fails like the kernel does when that prefix is an existing non-directory.
fn soft_canonicalize(path: &Path) -> io::Result<PathBuf> {
    let mut resolved = PathBuf::new();
    let mut hops = 0;
    let mut at_non_directory = false;

    for component in path.components() {
        match component {
            Component::Prefix(_) | Component::RootDir => resolved.push(component.as_os_str()),
            Component::CurDir => {}
            Component::ParentDir => {
                if at_non_directory {
                    return Err(not_a_directory(&resolved));
                }
                resolved.pop();
            }
            Component::Normal(name) => {
                if at_non_directory {
                    return Err(not_a_directory(&resolved));
                }
                let candidate = resolved.join(name);
                match fs::symlink_metadata(&candidate) {
                    Ok(meta) if meta.file_type().is_symlink() => {
                        hops += 1;
                        if hops > MAX_SYMLINK_HOPS {
                            return Err(io::Error::other("too many symbolic links"));
                        }
                        resolved = fs::canonicalize(&candidate)?;
                        at_non_directory = !resolved.is_dir();
                    }
                    Ok(meta) => {
                        at_non_directory = !meta.is_dir();
                        resolved = candidate;
                    }
                    Err(e) if e.kind() == io::ErrorKind::NotFound => resolved = candidate,
                    Err(e) => return Err(e),
                }
            }
        }
    }

    Ok(resolved)
}

fn not_a_directory(path: &Path) -> io::Error {
    io::Error::new(
        io::ErrorKind::NotADirectory,
        format!("{} is not a directory", path.display()),
    )
}
