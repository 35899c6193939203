//! File downloads and uploads through validated paths.
//!
//! This module provides the byte-moving half of the file access layer:
//! - Downloads open a resolved file for sequential reading
//! - Uploads stream into a hidden temporary file next to the destination
//! - Finished uploads are moved into place with a rename
//!
//! Client-supplied upload names are reduced to a safe base name by
//! [`sanitize_filename`] before they touch the filesystem.

use std::fs::{self, File, OpenOptions};
use std::io::{self, Read, Write};
use std::path::{Path, PathBuf};
use std::time::{SystemTime, UNIX_EPOCH};

use thiserror::Error;
use tracing::{debug, info, warn};

use super::resolver::ResolvedPath;

/// Buffer size used when copying upload bodies (64KB).
pub const COPY_BUFFER_SIZE: usize = 64 * 1024;

/// Suffix of in-progress upload files.
pub const PARTIAL_SUFFIX: &str = ".part";

/// Longest file name most filesystems accept, in bytes.
pub const MAX_FILENAME_BYTES: usize = 255;

/// Bytes of the original name kept in a temporary upload name.
const PARTIAL_STEM_BYTES: usize = 200;

/// Device names Windows refuses as file names, with or without extension.
const RESERVED_NAMES: &[&str] = &[
    "CON", "PRN", "AUX", "NUL", "COM1", "COM2", "COM3", "COM4", "COM5", "COM6", "COM7", "COM8",
    "COM9", "LPT1", "LPT2", "LPT3", "LPT4", "LPT5", "LPT6", "LPT7", "LPT8", "LPT9",
];

/// Errors that can occur during file transfer.
#[derive(Debug, Error)]
pub enum TransferError {
    /// The requested file does not exist.
    #[error("file not found: {0}")]
    NotFound(PathBuf),

    /// The requested path is a directory, not a file.
    #[error("path is a directory: {0}")]
    IsADirectory(PathBuf),

    /// The upload destination exists but is not a directory.
    #[error("path is not a directory: {0}")]
    NotADirectory(PathBuf),

    /// Permission denied.
    #[error("permission denied: {0}")]
    AccessDenied(PathBuf),

    /// The supplied file name is empty after sanitization.
    #[error("invalid file name: {0:?}")]
    InvalidFilename(String),

    /// No space left on the device.
    #[error("no space left while writing {0}")]
    DiskFull(PathBuf),

    /// File too large.
    #[error("file too large: exceeds limit of {limit} bytes")]
    FileTooLarge { limit: u64 },

    /// The destination moved outside the shared root after validation.
    #[error("destination is outside the shared root: {0}")]
    OutsideRoot(PathBuf),

    /// The upload body ended with an error before completion.
    #[error("upload stream interrupted: {0}")]
    Interrupted(#[source] io::Error),

    /// IO error.
    #[error("IO error: {0}")]
    Io(#[from] io::Error),
}

impl TransferError {
    fn from_io(path: &Path, err: io::Error) -> Self {
        match err.kind() {
            io::ErrorKind::NotFound => Self::NotFound(path.to_path_buf()),
            io::ErrorKind::PermissionDenied => Self::AccessDenied(path.to_path_buf()),
            io::ErrorKind::IsADirectory => Self::IsADirectory(path.to_path_buf()),
            io::ErrorKind::NotADirectory => Self::NotADirectory(path.to_path_buf()),
            io::ErrorKind::StorageFull => Self::DiskFull(path.to_path_buf()),
            _ => Self::Io(err),
        }
    }
}

/// An open file ready to be streamed to a client.
///
/// Reading yields the file's bytes once, front to back. The suggested name is
/// the file's base name only.
#[derive(Debug)]
pub struct Download {
    file: File,
    file_name: String,
    len: u64,
}

impl Download {
    /// Base name to suggest to the client.
    pub fn file_name(&self) -> &str {
        &self.file_name
    }

    /// File length in bytes at open time.
    pub fn len(&self) -> u64 {
        self.len
    }

    /// Whether the file was empty at open time.
    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    /// Give up the suggested name and length, keeping the open file.
    pub fn into_file(self) -> File {
        self.file
    }
}

impl Read for Download {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        self.file.read(buf)
    }
}

/// A completed upload.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Upload {
    /// Final location of the file.
    pub path: PathBuf,
    /// Sanitized name the file was stored under.
    pub file_name: String,
    /// Bytes written.
    pub size: u64,
}

/// An upload body waiting in a hidden temporary file.
///
/// Dropping it without [`FileTransfer::commit`] removes the file.
#[derive(Debug)]
pub struct StagedUpload {
    temp_path: PathBuf,
    file_name: String,
    size: u64,
}

impl StagedUpload {
    /// Sanitized name the file will be stored under.
    pub fn file_name(&self) -> &str {
        &self.file_name
    }

    /// Bytes received.
    pub fn size(&self) -> u64 {
        self.size
    }

    /// Location of the temporary file.
    pub fn temp_path(&self) -> &Path {
        &self.temp_path
    }

    /// Rename the temporary file to `destination`.
    fn persist(mut self, destination: PathBuf) -> Result<Upload, TransferError> {
        move_file(&self.temp_path, &destination)
            .map_err(|e| TransferError::from_io(&destination, e))?;

        // Nothing left for drop to clean up
        let _ = std::mem::take(&mut self.temp_path);

        info!(path = ?destination, size = self.size, "Upload stored");

        Ok(Upload {
            path: destination,
            file_name: std::mem::take(&mut self.file_name),
            size: self.size,
        })
    }
}

impl Drop for StagedUpload {
    fn drop(&mut self) {
        if !self.temp_path.as_os_str().is_empty() {
            discard(&self.temp_path);
        }
    }
}

/// File transfer handler.
///
/// Holds no per-request state; each call works only on the paths it is
/// handed.
#[derive(Debug, Clone)]
pub struct FileTransfer {
    /// Maximum upload size in bytes.
    max_file_size: u64,
}

impl FileTransfer {
    /// Create a transfer handler that accepts uploads up to `max_file_size` bytes.
    pub fn new(max_file_size: u64) -> Self {
        Self { max_file_size }
    }

    /// The upload size limit in bytes.
    pub fn max_file_size(&self) -> u64 {
        self.max_file_size
    }

    /// Open a file for download.
    pub fn open_for_read(&self, path: &ResolvedPath) -> Result<Download, TransferError> {
        let metadata =
            fs::metadata(path.as_path()).map_err(|e| TransferError::from_io(path.as_path(), e))?;

        if metadata.is_dir() {
            return Err(TransferError::IsADirectory(path.as_path().to_path_buf()));
        }

        let file =
            File::open(path.as_path()).map_err(|e| TransferError::from_io(path.as_path(), e))?;

        let file_name = path
            .file_name()
            .unwrap_or_else(|| "download".to_string());

        debug!(path = ?path.as_path(), size = metadata.len(), "Opened file for download");

        Ok(Download {
            file,
            file_name,
            len: metadata.len(),
        })
    }

    /// Store `content` as `supplied_name` inside the directory `dir`.
    ///
    /// The directory tree is created when missing. An existing file of the
    /// same name is replaced once the whole body has been received.
    pub fn accept_write(
        &self,
        dir: &ResolvedPath,
        supplied_name: &str,
        content: impl Read,
    ) -> Result<Upload, TransferError> {
        let file_name = checked_name(supplied_name)?;
        let directory = prepare_directory(dir)?;
        let destination = directory.join(&file_name);
        if destination.is_dir() {
            return Err(TransferError::IsADirectory(destination));
        }

        let staged = self.stage_in(&directory, file_name, content)?;
        staged.persist(destination)
    }

    /// Receive `content` before its destination directory is known.
    ///
    /// The body lands in a hidden temporary file inside `staging`, which must
    /// be an existing directory. Finish with [`FileTransfer::commit`];
    /// dropping the returned value removes the temporary file.
    pub fn stage(
        &self,
        staging: &ResolvedPath,
        supplied_name: &str,
        content: impl Read,
    ) -> Result<StagedUpload, TransferError> {
        let file_name = checked_name(supplied_name)?;
        self.stage_in(staging.as_path(), file_name, content)
    }

    /// Move a staged upload into the directory `dir`.
    ///
    /// Applies the same directory creation and checks as
    /// [`FileTransfer::accept_write`].
    pub fn commit(&self, staged: StagedUpload, dir: &ResolvedPath) -> Result<Upload, TransferError> {
        let directory = prepare_directory(dir)?;
        let destination = directory.join(&staged.file_name);
        if destination.is_dir() {
            return Err(TransferError::IsADirectory(destination));
        }
        staged.persist(destination)
    }

    fn stage_in(
        &self,
        directory: &Path,
        file_name: String,
        content: impl Read,
    ) -> Result<StagedUpload, TransferError> {
        let temp_path = directory.join(partial_name(&file_name));
        let file = OpenOptions::new()
            .write(true)
            .create_new(true)
            .open(&temp_path)
            .map_err(|e| TransferError::from_io(&temp_path, e))?;

        let size = match self.copy_limited(content, file, &temp_path) {
            Ok(size) => size,
            Err(e) => {
                discard(&temp_path);
                return Err(e);
            }
        };

        debug!(path = ?temp_path, size, "Upload body received");

        Ok(StagedUpload {
            temp_path,
            file_name,
            size,
        })
    }

    /// Copy `content` into `file`, failing once more than the limit arrives.
    fn copy_limited(
        &self,
        mut content: impl Read,
        mut file: File,
        temp_path: &Path,
    ) -> Result<u64, TransferError> {
        let mut buffer = vec![0u8; COPY_BUFFER_SIZE];
        let mut written: u64 = 0;

        loop {
            let bytes_read = match content.read(&mut buffer) {
                Ok(0) => break,
                Ok(n) => n,
                Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
                Err(e) => return Err(TransferError::Interrupted(e)),
            };

            written += bytes_read as u64;
            if written > self.max_file_size {
                return Err(TransferError::FileTooLarge {
                    limit: self.max_file_size,
                });
            }

            file.write_all(&buffer[..bytes_read])
                .map_err(|e| TransferError::from_io(temp_path, e))?;
        }

        file.flush()
            .map_err(|e| TransferError::from_io(temp_path, e))?;

        Ok(written)
    }
}

/// Sanitize `supplied_name`, rejecting names that end up empty.
fn checked_name(supplied_name: &str) -> Result<String, TransferError> {
    let file_name = sanitize_filename(supplied_name);
    if file_name.is_empty() {
        return Err(TransferError::InvalidFilename(supplied_name.to_string()));
    }
    Ok(file_name)
}

/// Create `dir` if needed and return its canonical form, still inside the root.
fn prepare_directory(dir: &ResolvedPath) -> Result<PathBuf, TransferError> {
    fs::create_dir_all(dir.as_path()).map_err(|e| TransferError::from_io(dir.as_path(), e))?;

    // Directories created above may have been swapped for symlinks
    let directory =
        fs::canonicalize(dir.as_path()).map_err(|e| TransferError::from_io(dir.as_path(), e))?;
    if !dir.root().contains(&directory) {
        warn!(path = ?directory, root = ?dir.root().path(), "Upload directory left shared root");
        return Err(TransferError::OutsideRoot(directory));
    }
    if !directory.is_dir() {
        return Err(TransferError::NotADirectory(directory));
    }
    Ok(directory)
}

/// Rename `from` to `to`, copying when they sit on different filesystems.
fn move_file(from: &Path, to: &Path) -> io::Result<()> {
    match fs::rename(from, to) {
        Err(e) if e.kind() == io::ErrorKind::CrossesDevices => {
            let temp_path = to.with_file_name(partial_name(
                &to.file_name().unwrap_or_default().to_string_lossy(),
            ));
            if let Err(e) = fs::copy(from, &temp_path).and_then(|_| fs::rename(&temp_path, to)) {
                let _ = fs::remove_file(&temp_path);
                return Err(e);
            }
            fs::remove_file(from)
        }
        other => other,
    }
}

/// Remove a temporary upload file, logging failures.
fn discard(temp_path: &Path) {
    if let Err(e) = fs::remove_file(temp_path) {
        warn!(path = ?temp_path, error = %e, "Failed to cleanup temp file after failed upload");
    }
}

/// Hidden, unique name for the in-progress copy of `file_name`.
fn partial_name(file_name: &str) -> String {
    let nanos = SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
        .as_nanos();

    format!(
        ".{}.{:x}{:08x}{}",
        truncate_to_boundary(file_name, PARTIAL_STEM_BYTES),
        nanos,
        rand::random::<u32>(),
        PARTIAL_SUFFIX
    )
}

/// Whether `name` is a temporary file written by an upload in progress.
pub fn is_partial_upload(name: &str) -> bool {
    let Some(inner) = name
        .strip_prefix('.')
        .and_then(|n| n.strip_suffix(PARTIAL_SUFFIX))
    else {
        return false;
    };

    match inner.rsplit_once('.') {
        Some((stem, tag)) => {
            !stem.is_empty() && tag.len() >= 8 && tag.chars().all(|c| c.is_ascii_hexdigit())
        }
        None => false,
    }
}

/// Reduce a client-supplied file name to a safe base name.
///
/// Only the last `/`- or `\`-separated segment is kept. Letters, digits, `.`,
/// `-` and `_` survive; whitespace becomes `_`; anything else is dropped.
/// Leading and trailing dots and underscores are trimmed, Windows device
/// names get a `_` prefix, and the result is capped at
/// [`MAX_FILENAME_BYTES`]. The result may be empty.
pub fn sanitize_filename(name: &str) -> String {
    let base = name.rsplit(['/', '\\']).next().unwrap_or_default();

    let cleaned: String = base
        .chars()
        .filter_map(|c| {
            if c.is_alphanumeric() || matches!(c, '.' | '-' | '_') {
                Some(c)
            } else if c.is_whitespace() {
                Some('_')
            } else {
                None
            }
        })
        .collect();

    let mut result = cleaned.trim_matches(['.', '_']).to_string();

    if is_reserved_name(&result) {
        result.insert(0, '_');
    }

    let mut result = truncate_to_boundary(&result, MAX_FILENAME_BYTES).to_string();
    result.truncate(result.trim_end_matches(['.', '_']).len());
    result
}

fn is_reserved_name(name: &str) -> bool {
    let stem = name.split('.').next().unwrap_or_default();
    RESERVED_NAMES
        .iter()
        .any(|reserved| reserved.eq_ignore_ascii_case(stem))
}

fn truncate_to_boundary(s: &str, max_bytes: usize) -> &str {
    if s.len() <= max_bytes {
        return s;
    }
    let mut end = max_bytes;
    while !s.is_char_boundary(end) {
        end -= 1;
    }
    &s[..end]
}
