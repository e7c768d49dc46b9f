use std::{
    fs,
    path::{Path, PathBuf},
    sync::atomic::{AtomicU64, Ordering},
};

use log::debug;
use tempfile::TempDir;

use crate::error::Result;

const WORKSPACE_PREFIX: &str = "__forge_";

/// A temporary directory removed with everything in it when dropped.
///
/// Names handed out are unique for the lifetime of the workspace, so worker
/// threads may create files concurrently without coordinating.
pub struct Workspace {
    root: TempDir,
    counter: AtomicU64,
}

impl Workspace {
    /// Create the workspace as a hidden-ish directory under `parent`.
    pub fn new_in(parent: &Path) -> Result<Self> {
        let root = tempfile::Builder::new()
            .prefix(WORKSPACE_PREFIX)
            .tempdir_in(parent)?;
        debug!("workspace at {}", root.path().display());
        Ok(Self {
            root,
            counter: AtomicU64::new(0),
        })
    }

    pub fn path(&self) -> &Path {
        self.root.path()
    }

    fn next_name(&self, prefix: &str) -> String {
        let id = self.counter.fetch_add(1, Ordering::Relaxed);
        format!("{}_{}", prefix, id)
    }

    /// Reserve a file name; nothing is created on disk.
    pub fn new_file(&self, prefix: &str, extension: &str) -> PathBuf {
        let mut name = self.next_name(prefix);
        if !extension.is_empty() {
            name.push('.');
            name.push_str(extension);
        }
        self.root.path().join(name)
    }

    pub fn new_dir(&self, prefix: &str) -> Result<PathBuf> {
        let path = self.root.path().join(self.next_name(prefix));
        fs::create_dir(&path)?;
        Ok(path)
    }

    /// Remove a file early. Whatever is left goes away with the workspace.
    pub fn discard(&self, path: &Path) {
        let _ = fs::remove_file(path);
    }
}
