use std::fs::{self, File};
use std::path::{Path, PathBuf};
use std::sync::Mutex;

use git2::Repository;
use stockroom_api::{BackendKind, BundlePolicy};

use super::{FsEntry, FsStat, LibFs, ReadHandle, join_path, normalize_path};
use crate::error::{Result, StockroomError};

/// Read-only view over the working tree of a git repository.
///
/// The `.git` directory and ignored paths are hidden from enumeration.
pub struct GitFs {
    name: String,
    location: PathBuf,
    root: String,
    policy: BundlePolicy,
    repo: Mutex<Repository>,
}

impl GitFs {
    pub fn open(name: impl Into<String>, location: impl Into<PathBuf>, policy: BundlePolicy) -> Result<Self> {
        let name = name.into();
        let location = location.into();
        let repo = Repository::open(&location)?;
        let workdir = repo
            .workdir()
            .map(Path::to_path_buf)
            .ok_or_else(|| StockroomError::Internal(format!("repository '{}' is bare", name)))?;

        let fs = Self {
            root: location.to_string_lossy().into_owned(),
            name,
            location: workdir,
            policy,
            repo: Mutex::new(repo),
        };
        tracing::info!(
            "opened git backend '{}' at {} (head: {})",
            fs.name,
            fs.location.display(),
            fs.head().unwrap_or_else(|| "detached".to_string())
        );
        Ok(fs)
    }

    /// Short name of the checked-out reference.
    pub fn head(&self) -> Option<String> {
        let repo = self.repo.lock().ok()?;
        let head = repo.head().ok()?;
        head.shorthand().map(str::to_string)
    }

    fn resolve(&self, path: &str) -> Result<(String, PathBuf)> {
        let rel = normalize_path(path)?;
        if self.is_hidden(&rel) {
            return Err(StockroomError::NotFound(format!("{}: {}", self.name, rel)));
        }
        let full = if rel.is_empty() {
            self.location.clone()
        } else {
            self.location.join(&rel)
        };
        Ok((rel, full))
    }

    fn is_hidden(&self, rel: &str) -> bool {
        if rel.is_empty() {
            return false;
        }
        if rel == ".git" || rel.starts_with(".git/") {
            return true;
        }
        match self.repo.lock() {
            Ok(repo) => repo.is_path_ignored(Path::new(rel)).unwrap_or(false),
            Err(_) => false,
        }
    }
}

impl LibFs for GitFs {
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
        BackendKind::Git
    }

    fn open(&self, path: &str) -> Result<ReadHandle> {
        let (_, full) = self.resolve(path)?;
        Ok(Box::new(File::open(full)?))
    }

    fn stat(&self, path: &str) -> Result<FsStat> {
        let (_, full) = self.resolve(path)?;
        let meta = fs::metadata(full)?;
        Ok(FsStat {
            size: meta.len(),
            is_dir: meta.is_dir(),
        })
    }

    fn read_dir(&self, path: &str) -> Result<Vec<FsEntry>> {
        let (rel, full) = self.resolve(path)?;
        let mut entries = Vec::new();
        for entry in fs::read_dir(full)? {
            let entry = entry?;
            let name = entry.file_name().to_string_lossy().into_owned();
            if self.is_hidden(&join_path(&rel, &name)) {
                continue;
            }
            entries.push(FsEntry {
                name,
                is_dir: entry.file_type()?.is_dir(),
            });
        }
        entries.sort();
        Ok(entries)
    }

    fn is_bundle(&self, path: &str) -> bool {
        self.policy.is_bundle(path)
    }

    fn is_discoverable(&self) -> bool {
        true
    }
}
