//! Holder of the currently shared directory.

use std::path::Path;
use std::sync::{Arc, RwLock};

use tracing::info;

use super::resolver::{ResolveError, Root};

/// The single shared-root cell.
///
/// Readers take an `Arc<Root>` snapshot and work on it for the rest of the
/// request. A later [`set`](Self::set) never affects a snapshot already taken.
#[derive(Debug, Default)]
pub struct RootRegistry {
    current: RwLock<Option<Arc<Root>>>,
}

impl RootRegistry {
    /// Create an empty registry (no folder shared).
    pub fn new() -> Self {
        Self::default()
    }

    /// Create a registry already sharing `root`.
    pub fn with_root(root: Root) -> Self {
        Self {
            current: RwLock::new(Some(Arc::new(root))),
        }
    }

    /// Snapshot of the current root.
    pub fn get(&self) -> Option<Arc<Root>> {
        match self.current.read() {
            Ok(guard) => guard.clone(),
            Err(poisoned) => poisoned.into_inner().clone(),
        }
    }

    /// Replace the shared root.
    pub fn set(&self, root: Root) -> Arc<Root> {
        let root = Arc::new(root);
        info!(root = ?root.path(), "Shared folder set");
        self.replace(Some(Arc::clone(&root)));
        root
    }

    /// Validate `path` as a root and share it.
    pub fn set_path(&self, path: impl AsRef<Path>) -> Result<Arc<Root>, ResolveError> {
        let root = Root::new(path)?;
        Ok(self.set(root))
    }

    /// Stop sharing any folder.
    pub fn clear(&self) {
        info!("Shared folder cleared");
        self.replace(None);
    }

    /// Whether a folder is currently shared.
    pub fn is_configured(&self) -> bool {
        self.get().is_some()
    }

    fn replace(&self, value: Option<Arc<Root>>) {
        match self.current.write() {
            Ok(mut guard) => *guard = value,
            Err(poisoned) => *poisoned.into_inner() = value,
        }
    }
}
