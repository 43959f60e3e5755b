//! Virtual filesystems that resolve asset bytes.
//!
//! Every backend exposes the same [`LibFs`] capability set. Paths are always
//! relative to the backend root, use `/` separators and never escape the root.

use std::io::{Read, Write};
use std::path::Path;

use stockroom_api::{BackendContext, BackendKind};

use crate::error::{Result, StockroomError};

pub mod bundle;
pub mod git;
pub mod local;
pub mod registry;

pub use bundle::BundleFs;
pub use git::GitFs;
pub use local::LocalFs;
pub use registry::FsRegistry;

pub type ReadHandle = Box<dyn Read + Send>;
pub type WriteHandle = Box<dyn Write + Send>;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FsStat {
    pub size: u64,
    pub is_dir: bool,
}

#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord)]
pub struct FsEntry {
    pub name: String,
    pub is_dir: bool,
}

pub trait LibFs: Send + Sync {
    fn name(&self) -> &str;

    /// Physical location of the backend.
    fn location(&self) -> &Path;

    /// Root string used when deriving ids of nodes found on this backend.
    fn root(&self) -> &str;

    fn kind(&self) -> BackendKind;

    fn open(&self, path: &str) -> Result<ReadHandle>;

    fn stat(&self, path: &str) -> Result<FsStat>;

    /// Entries of a directory, sorted by name.
    fn read_dir(&self, path: &str) -> Result<Vec<FsEntry>>;

    fn writable(&self) -> bool {
        false
    }

    fn create(&self, _path: &str) -> Result<WriteHandle> {
        Err(StockroomError::unsupported(self.name(), "create"))
    }

    fn mkdir(&self, _path: &str) -> Result<()> {
        Err(StockroomError::unsupported(self.name(), "mkdir"))
    }

    fn remove(&self, _path: &str) -> Result<()> {
        Err(StockroomError::unsupported(self.name(), "remove"))
    }

    fn is_bundle(&self, path: &str) -> bool;

    /// Internal stores are only addressed directly, never scanned.
    fn is_discoverable(&self) -> bool;

    fn exists(&self, path: &str) -> bool {
        self.stat(path).is_ok()
    }

    fn read_all(&self, path: &str) -> Result<Vec<u8>> {
        let mut reader = self.open(path)?;
        let mut buf = Vec::new();
        reader.read_to_end(&mut buf)?;
        Ok(buf)
    }
}

/// Adapts a backend to the classification context.
pub struct FsContext<'a>(pub &'a dyn LibFs);

impl BackendContext for FsContext<'_> {
    fn is_bundle(&self, path: &str) -> bool {
        self.0.is_bundle(path)
    }

    fn kind(&self) -> BackendKind {
        self.0.kind()
    }
}

/// Normalize a backend-relative path.
///
/// Leading slashes and `.` segments are dropped; `..` is rejected so a path
/// can never leave the backend root. The root itself is `""`.
pub fn normalize_path(path: &str) -> Result<String> {
    let mut segments = Vec::new();
    for seg in path.split(['/', '\\']) {
        match seg {
            "" | "." => {}
            ".." => return Err(StockroomError::NotFound(format!("path escapes root: {}", path))),
            s => segments.push(s),
        }
    }
    Ok(segments.join("/"))
}

/// Join a directory and a child name into a backend-relative path.
pub fn join_path(dir: &str, name: &str) -> String {
    if dir.is_empty() || dir == "." {
        name.to_string()
    } else {
        format!("{}/{}", dir.trim_end_matches('/'), name)
    }
}
