use std::collections::{BTreeMap, BTreeSet};
use std::fs::File;
use std::io::{Cursor, Read, Seek, SeekFrom};
use std::path::{Path, PathBuf};

use stockroom_api::{BackendKind, BundlePolicy, extension_of};
use zip::ZipArchive;

use super::{FsEntry, FsStat, LibFs, ReadHandle, join_path, normalize_path};
use crate::error::{Result, StockroomError};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ArchiveFormat {
    Zip,
    Tar,
}

impl ArchiveFormat {
    /// Pick a reader for an archive from its extension, falling back to
    /// the magic bytes for allow-listed extensions without a fixed format.
    pub fn detect(file_name: &str, header: &[u8]) -> Result<Self> {
        match extension_of(file_name).as_str() {
            ".zip" | ".3mf" => return Ok(ArchiveFormat::Zip),
            ".tar" => return Ok(ArchiveFormat::Tar),
            ".7z" | ".rar" => {
                return Err(StockroomError::UnsupportedArchiveFormat(file_name.to_string()));
            }
            _ => {}
        }
        if header.starts_with(b"PK") {
            Ok(ArchiveFormat::Zip)
        } else if header.len() >= 262 && &header[257..262] == b"ustar" {
            Ok(ArchiveFormat::Tar)
        } else {
            Err(StockroomError::UnsupportedArchiveFormat(file_name.to_string()))
        }
    }
}

#[derive(Debug, Clone, Copy)]
enum Member {
    Dir,
    ZipEntry { index: usize, size: u64 },
    TarEntry { offset: u64, size: u64 },
}

/// Read-only view over the entries of an archive file on local disk.
///
/// Directory nodes are synthesized from member paths, so archives without
/// explicit directory records still enumerate as a tree.
pub struct BundleFs {
    name: String,
    file_name: String,
    location: PathBuf,
    root: String,
    policy: BundlePolicy,
    format: ArchiveFormat,
    members: BTreeMap<String, Member>,
    children: BTreeMap<String, BTreeSet<FsEntry>>,
}

impl BundleFs {
    /// Open the archive at `location`. `root_id` is the id of the bundle
    /// node, used as the root of everything found inside it.
    pub fn open(location: impl Into<PathBuf>, root_id: &str, policy: BundlePolicy) -> Result<Self> {
        let location = location.into();
        let file_name = location
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_default();

        if !policy.is_bundle(&file_name) {
            return Err(StockroomError::UnsupportedBundleExtension(file_name));
        }

        let mut file = File::open(&location)?;
        let mut header = Vec::with_capacity(512);
        (&mut file).take(512).read_to_end(&mut header)?;
        file.seek(SeekFrom::Start(0))?;

        let format = ArchiveFormat::detect(&file_name, &header)?;
        let mut fs = Self {
            name: root_id.to_string(),
            file_name,
            location,
            root: root_id.to_string(),
            policy,
            format,
            members: BTreeMap::new(),
            children: BTreeMap::new(),
        };
        fs.children.insert(String::new(), BTreeSet::new());

        match format {
            ArchiveFormat::Zip => fs.index_zip(file)?,
            ArchiveFormat::Tar => fs.index_tar(file)?,
        }
        tracing::debug!(
            "opened bundle {} ({:?}, {} members)",
            fs.file_name,
            fs.format,
            fs.members.len()
        );
        Ok(fs)
    }

    pub fn file_name(&self) -> &str {
        &self.file_name
    }

    pub fn format(&self) -> ArchiveFormat {
        self.format
    }

    /// All member file paths, in archive-independent sorted order.
    pub fn file_paths(&self) -> Vec<String> {
        self.members
            .iter()
            .filter(|(_, m)| !matches!(m, Member::Dir))
            .map(|(p, _)| p.clone())
            .collect()
    }

    fn index_zip(&mut self, file: File) -> Result<()> {
        let mut archive = ZipArchive::new(file)?;
        for index in 0..archive.len() {
            let entry = archive.by_index(index)?;
            let raw = entry.name().to_string();
            let Ok(path) = normalize_path(&raw) else {
                tracing::warn!("skipping archive member outside root: {}", raw);
                continue;
            };
            if path.is_empty() {
                continue;
            }
            if entry.is_dir() {
                self.insert_dir(&path);
            } else {
                self.insert_file(&path, Member::ZipEntry { index, size: entry.size() });
            }
        }
        Ok(())
    }

    fn index_tar(&mut self, file: File) -> Result<()> {
        let mut archive = tar::Archive::new(file);
        for entry in archive.entries()? {
            let entry = entry?;
            let raw = entry.path()?.to_string_lossy().into_owned();
            let Ok(path) = normalize_path(&raw) else {
                tracing::warn!("skipping archive member outside root: {}", raw);
                continue;
            };
            if path.is_empty() {
                continue;
            }
            let kind = entry.header().entry_type();
            if kind.is_dir() {
                self.insert_dir(&path);
            } else if kind.is_file() {
                let member = Member::TarEntry {
                    offset: entry.raw_file_position(),
                    size: entry.size(),
                };
                self.insert_file(&path, member);
            }
        }
        Ok(())
    }

    fn insert_dir(&mut self, path: &str) {
        if path.is_empty() || self.members.contains_key(path) {
            return;
        }
        let (parent, name) = split_parent(path);
        self.insert_dir(parent);
        self.members.insert(path.to_string(), Member::Dir);
        self.children.entry(path.to_string()).or_default();
        self.children.entry(parent.to_string()).or_default().insert(FsEntry {
            name: name.to_string(),
            is_dir: true,
        });
    }

    fn insert_file(&mut self, path: &str, member: Member) {
        let (parent, name) = split_parent(path);
        self.insert_dir(parent);
        self.members.insert(path.to_string(), member);
        self.children.entry(parent.to_string()).or_default().insert(FsEntry {
            name: name.to_string(),
            is_dir: false,
        });
    }

    fn lookup(&self, path: &str) -> Result<(String, Member)> {
        let rel = normalize_path(path)?;
        if rel.is_empty() {
            return Ok((rel, Member::Dir));
        }
        match self.members.get(&rel) {
            Some(m) => Ok((rel, *m)),
            None => Err(StockroomError::NotFound(format!("{}: {}", self.file_name, rel))),
        }
    }
}

fn split_parent(path: &str) -> (&str, &str) {
    match path.rfind('/') {
        Some(idx) => (&path[..idx], &path[idx + 1..]),
        None => ("", path),
    }
}

impl LibFs for BundleFs {
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
        BackendKind::Bundle
    }

    fn open(&self, path: &str) -> Result<ReadHandle> {
        let (rel, member) = self.lookup(path)?;
        let mut buf = Vec::new();
        match member {
            Member::Dir => {
                return Err(StockroomError::NotFound(format!("{} is a directory", rel)));
            }
            Member::ZipEntry { index, size } => {
                let mut archive = ZipArchive::new(File::open(&self.location)?)?;
                let mut entry = archive.by_index(index)?;
                buf.reserve(size as usize);
                entry.read_to_end(&mut buf)?;
            }
            Member::TarEntry { offset, size } => {
                let mut file = File::open(&self.location)?;
                file.seek(SeekFrom::Start(offset))?;
                buf.reserve(size as usize);
                file.take(size).read_to_end(&mut buf)?;
            }
        }
        Ok(Box::new(Cursor::new(buf)))
    }

    fn stat(&self, path: &str) -> Result<FsStat> {
        let (_, member) = self.lookup(path)?;
        Ok(match member {
            Member::Dir => FsStat { size: 0, is_dir: true },
            Member::ZipEntry { size, .. } | Member::TarEntry { size, .. } => {
                FsStat { size, is_dir: false }
            }
        })
    }

    fn read_dir(&self, path: &str) -> Result<Vec<FsEntry>> {
        let (rel, member) = self.lookup(path)?;
        if !matches!(member, Member::Dir) {
            return Err(StockroomError::NotFound(format!("{} is not a directory", rel)));
        }
        Ok(self
            .children
            .get(&rel)
            .map(|set| set.iter().cloned().collect())
            .unwrap_or_default())
    }

    fn is_bundle(&self, path: &str) -> bool {
        self.policy.is_bundle(path)
    }

    fn is_discoverable(&self) -> bool {
        false
    }
}

/// Relative cache path for an archive materialized from a non-local backend.
pub fn cache_key(backend_name: &str, path: &str) -> String {
    let (dir, base) = split_parent(path);
    join_path(&join_path(backend_name, dir), base)
}
