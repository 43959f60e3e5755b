use std::fs::{self, File};
use std::path::{Path, PathBuf};

use stockroom_api::{BackendKind, BundlePolicy};

use super::{FsEntry, FsStat, LibFs, ReadHandle, WriteHandle, normalize_path};
use crate::error::Result;

/// Writable view of a directory subtree.
pub struct LocalFs {
    name: String,
    location: PathBuf,
    root: String,
    policy: BundlePolicy,
    discoverable: bool,
}

impl LocalFs {
    pub fn new(name: impl Into<String>, location: impl Into<PathBuf>, policy: BundlePolicy) -> Self {
        let location = location.into();
        Self {
            name: name.into(),
            root: location.to_string_lossy().into_owned(),
            location,
            policy,
            discoverable: true,
        }
    }

    /// Internal store: created on demand and hidden from scans.
    pub fn internal(name: impl Into<String>, location: impl Into<PathBuf>) -> Result<Self> {
        let fs = Self {
            discoverable: false,
            ..Self::new(name, location, BundlePolicy::default())
        };
        fs::create_dir_all(&fs.location)?;
        Ok(fs)
    }

    pub fn resolve(&self, path: &str) -> Result<PathBuf> {
        let rel = normalize_path(path)?;
        if rel.is_empty() {
            Ok(self.location.clone())
        } else {
            Ok(self.location.join(rel))
        }
    }
}

impl LibFs for LocalFs {
    fn name(&self) -> &str {
        &self.name
    }

    fn location(&self) -> &Path {
        &self.location
    }

    fn root(&self) -> &str {
        &self.root
    }

    fn kind(&self) -> BackendKind {
        BackendKind::Local
    }

    fn open(&self, path: &str) -> Result<ReadHandle> {
        Ok(Box::new(File::open(self.resolve(path)?)?))
    }

    fn stat(&self, path: &str) -> Result<FsStat> {
        let meta = fs::metadata(self.resolve(path)?)?;
        Ok(FsStat {
            size: meta.len(),
            is_dir: meta.is_dir(),
        })
    }

    fn read_dir(&self, path: &str) -> Result<Vec<FsEntry>> {
        let mut entries = Vec::new();
        for entry in fs::read_dir(self.resolve(path)?)? {
            let entry = entry?;
            entries.push(FsEntry {
                name: entry.file_name().to_string_lossy().into_owned(),
                is_dir: entry.file_type()?.is_dir(),
            });
        }
        entries.sort();
        Ok(entries)
    }

    fn writable(&self) -> bool {
        true
    }

    fn create(&self, path: &str) -> Result<WriteHandle> {
        let full = self.resolve(path)?;
        if let Some(parent) = full.parent() {
            fs::create_dir_all(parent)?;
        }
        Ok(Box::new(File::create(full)?))
    }

    fn mkdir(&self, path: &str) -> Result<()> {
        fs::create_dir_all(self.resolve(path)?)?;
        Ok(())
    }

    fn remove(&self, path: &str) -> Result<()> {
        let full = self.resolve(path)?;
        if full.is_dir() {
            fs::remove_dir_all(full)?;
        } else {
            fs::remove_file(full)?;
        }
        Ok(())
    }

    fn is_bundle(&self, path: &str) -> bool {
        self.policy.is_bundle(path)
    }

    fn is_discoverable(&self) -> bool {
        self.discoverable
    }
}
