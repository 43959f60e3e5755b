use std::collections::BTreeMap;
use std::io;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use stockroom_api::{Asset, BackendKind, BundlePolicy, NodeKind};

use super::bundle::cache_key;
use super::{BundleFs, FsStat, GitFs, LibFs, LocalFs, ReadHandle, normalize_path};
use crate::config::{CACHE_BACKEND, Config, GENERATED_BACKEND, TEMP_BACKEND};
use crate::error::{Result, StockroomError};

/// Named backends plus the internal `cache`, `generated` and `temp` stores.
pub struct FsRegistry {
    backends: BTreeMap<String, Arc<dyn LibFs>>,
    order: Vec<String>,
    default_name: Option<String>,
    policy: BundlePolicy,
    cache: Arc<LocalFs>,
}

impl FsRegistry {
    /// Registry with only the internal stores under `data_path`.
    pub fn new(data_path: &Path, policy: BundlePolicy) -> Result<Self> {
        let cache = Arc::new(LocalFs::internal(CACHE_BACKEND, data_path.join(CACHE_BACKEND))?);
        let generated = LocalFs::internal(GENERATED_BACKEND, data_path.join(GENERATED_BACKEND))?;
        let temp = LocalFs::internal(TEMP_BACKEND, data_path.join(TEMP_BACKEND))?;

        let mut backends: BTreeMap<String, Arc<dyn LibFs>> = BTreeMap::new();
        backends.insert(CACHE_BACKEND.to_string(), cache.clone());
        backends.insert(GENERATED_BACKEND.to_string(), Arc::new(generated));
        backends.insert(TEMP_BACKEND.to_string(), Arc::new(temp));

        Ok(Self {
            backends,
            order: Vec::new(),
            default_name: None,
            policy,
            cache,
        })
    }

    pub fn from_config(config: &Config) -> Result<Self> {
        let policy = BundlePolicy::new(&config.library.bundle_extensions);
        let mut registry = Self::new(&config.data_path, policy.clone())?;

        for backend in &config.library.backends {
            let fs: Arc<dyn LibFs> = match backend.backend_kind()? {
                BackendKind::Local => Arc::new(LocalFs::new(
                    backend.name.clone(),
                    backend.location.clone(),
                    policy.clone(),
                )),
                BackendKind::Git => Arc::new(GitFs::open(
                    backend.name.clone(),
                    backend.location.clone(),
                    policy.clone(),
                )?),
                BackendKind::Bundle => {
                    return Err(StockroomError::UnsupportedBackendKind(backend.kind.clone()));
                }
            };
            registry.register(fs, backend.default)?;
        }
        Ok(registry)
    }

    /// Add a discoverable backend. The first one, or the last flagged
    /// default, becomes the default backend.
    pub fn register(&mut self, fs: Arc<dyn LibFs>, is_default: bool) -> Result<()> {
        let name = fs.name().to_string();
        if self.backends.contains_key(&name) {
            return Err(StockroomError::Config(format!("backend '{}' already registered", name)));
        }
        if self.default_name.is_none() || is_default {
            self.default_name = Some(name.clone());
        }
        tracing::info!("registered {} backend '{}' at {}", fs.kind(), name, fs.location().display());
        self.order.push(name.clone());
        self.backends.insert(name, fs);
        Ok(())
    }

    pub fn policy(&self) -> &BundlePolicy {
        &self.policy
    }

    pub fn get(&self, name: &str) -> Result<Arc<dyn LibFs>> {
        self.backends
            .get(name)
            .cloned()
            .ok_or_else(|| StockroomError::NotFound(format!("backend '{}'", name)))
    }

    pub fn default_fs(&self) -> Option<Arc<dyn LibFs>> {
        self.default_name.as_ref().and_then(|n| self.backends.get(n).cloned())
    }

    /// Backends eligible for scanning, in registration order.
    pub fn discoverable(&self) -> Vec<Arc<dyn LibFs>> {
        self.order
            .iter()
            .filter_map(|n| self.backends.get(n))
            .filter(|fs| fs.is_discoverable())
            .cloned()
            .collect()
    }

    pub fn generated(&self) -> Result<Arc<dyn LibFs>> {
        self.get(GENERATED_BACKEND)
    }

    /// Open the archive behind `bundle` as a read-only view.
    ///
    /// `parent_fs` is the backend that stores the archive bytes. Archives
    /// on non-local backends are first copied into the cache; an existing
    /// cache file is reused as is.
    pub fn open_bundle(&self, parent_fs: &dyn LibFs, bundle: &Asset) -> Result<BundleFs> {
        let path = bundle
            .path
            .as_deref()
            .ok_or_else(|| StockroomError::NotFound(format!("bundle {} has no path", bundle.id)))?;
        let rel = normalize_path(path)?;
        let file_name = rel.rsplit('/').next().unwrap_or_default().to_string();
        if !self.policy.is_bundle(&file_name) {
            return Err(StockroomError::UnsupportedBundleExtension(file_name));
        }

        let archive_path = if parent_fs.kind() == BackendKind::Local {
            parent_fs.location().join(&rel)
        } else {
            self.materialize(parent_fs, &rel)?
        };

        BundleFs::open(archive_path, &bundle.id, self.policy.clone())
    }

    fn materialize(&self, parent_fs: &dyn LibFs, rel: &str) -> Result<PathBuf> {
        let key = cache_key(parent_fs.name(), rel);
        let cached = self.cache.resolve(&key)?;
        if cached.exists() {
            tracing::debug!("reusing cached bundle {}", cached.display());
            return Ok(cached);
        }

        tracing::debug!("caching bundle {} from '{}'", rel, parent_fs.name());
        let transient = |e: StockroomError| {
            StockroomError::TransientIo(format!("caching {} from '{}': {}", rel, parent_fs.name(), e))
        };
        let mut reader = parent_fs.open(rel).map_err(transient)?;
        let mut writer = self.cache.create(&key).map_err(transient)?;
        if let Err(e) = io::copy(&mut reader, &mut writer) {
            drop(writer);
            let _ = self.cache.remove(&key);
            return Err(transient(e.into()));
        }
        Ok(cached)
    }

    /// Backend holding the bytes found at `asset.path`.
    ///
    /// Nodes inside bundles require their ancestor chain to be loaded up to
    /// the bundle that contains them.
    pub fn container_fs(&self, asset: &Asset) -> Result<Arc<dyn LibFs>> {
        if asset.backend_kind != BackendKind::Bundle {
            return self.get(&asset.backend_name);
        }

        // A bundle sitting directly on a named backend
        if let Ok(fs) = self.get(&asset.backend_name) {
            if asset.node_kind == NodeKind::Bundle && fs.root() == asset.root {
                return Ok(fs);
            }
        }

        let owner = find_ancestor(asset, &asset.root)?;
        let inner = self.interior_fs(owner)?;
        Ok(Arc::new(inner))
    }

    /// Read-only view of the inside of a bundle node.
    pub fn interior_fs(&self, bundle: &Asset) -> Result<BundleFs> {
        if bundle.node_kind != NodeKind::Bundle {
            return Err(StockroomError::Consistency(format!(
                "asset {} is a {} node, not a bundle",
                bundle.id, bundle.node_kind
            )));
        }
        let parent_fs = self.container_fs(bundle)?;
        self.open_bundle(parent_fs.as_ref(), bundle)
    }

    /// Filesystem an asset exposes: the interior for bundles, the
    /// containing backend for everything else.
    pub fn asset_fs(&self, asset: &Asset) -> Result<Arc<dyn LibFs>> {
        if asset.node_kind == NodeKind::Bundle {
            Ok(Arc::new(self.interior_fs(asset)?))
        } else {
            self.container_fs(asset)
        }
    }

    /// Open `rel` through the asset's filesystem.
    pub fn open(&self, asset: &Asset, rel: &str) -> Result<(ReadHandle, FsStat)> {
        let fs = self.asset_fs(asset)?;
        let stat = fs.stat(rel)?;
        let handle = fs.open(rel)?;
        Ok((handle, stat))
    }

    /// Raw bytes of the asset itself.
    pub fn read_asset(&self, asset: &Asset) -> Result<Vec<u8>> {
        let path = asset
            .path
            .as_deref()
            .ok_or_else(|| StockroomError::NotFound(format!("asset {} has no path", asset.id)))?;
        self.container_fs(asset)?.read_all(path)
    }
}

/// Walk up from `asset.parent` until the node with id `target`.
fn find_ancestor<'a>(asset: &'a Asset, target: &str) -> Result<&'a Asset> {
    let mut current = match (&asset.parent, &asset.parent_id) {
        (Some(p), _) => p.as_ref(),
        (None, Some(id)) => {
            return Err(StockroomError::Consistency(format!(
                "parent {} of {} not loaded",
                id, asset.id
            )));
        }
        (None, None) => {
            return Err(StockroomError::Consistency(format!("asset {} has no parent", asset.id)));
        }
    };

    loop {
        if current.id == target {
            return Ok(current);
        }
        match (&current.parent, &current.parent_id) {
            (Some(p), _) => current = p.as_ref(),
            (None, Some(_)) => {
                return Err(StockroomError::Consistency(format!(
                    "parent chain of {} incomplete at {}",
                    asset.id, current.id
                )));
            }
            (None, None) => {
                return Err(StockroomError::Consistency(format!(
                    "bundle {} is not an ancestor of {}",
                    target, asset.id
                )));
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::fs::FsContext;
    use std::fs::File;
    use std::io::Write;
    use tempfile::tempdir;
    use zip::write::SimpleFileOptions;

    fn zip_bytes(files: &[(&str, &[u8])]) -> Vec<u8> {
        let mut zip = zip::ZipWriter::new(std::io::Cursor::new(Vec::new()));
        for (name, data) in files {
            zip.start_file(*name, SimpleFileOptions::default()).unwrap();
            zip.write_all(data).unwrap();
        }
        zip.finish().unwrap().into_inner()
    }

    #[test]
    fn test_internal_backends_are_hidden() {
        let data = tempdir().unwrap();
        let lib = tempdir().unwrap();
        let mut registry = FsRegistry::new(data.path(), BundlePolicy::default()).unwrap();
        registry
            .register(Arc::new(LocalFs::new("default", lib.path(), BundlePolicy::default())), false)
            .unwrap();

        let names: Vec<_> = registry.discoverable().iter().map(|f| f.name().to_string()).collect();
        assert_eq!(names, vec!["default".to_string()]);
        assert!(registry.get("generated").unwrap().writable());
        assert_eq!(registry.default_fs().unwrap().name(), "default");
        assert!(matches!(registry.get("nope"), Err(StockroomError::NotFound(_))));
    }

    #[test]
    fn test_missing_parent_chain_is_a_consistency_error() {
        let data = tempdir().unwrap();
        let lib = tempdir().unwrap();
        File::create(lib.path().join("kit.zip"))
            .unwrap()
            .write_all(&zip_bytes(&[("a.stl", b"solid")]))
            .unwrap();

        let mut registry = FsRegistry::new(data.path(), BundlePolicy::default()).unwrap();
        let local: Arc<dyn LibFs> = Arc::new(LocalFs::new("default", lib.path(), BundlePolicy::default()));
        registry.register(local.clone(), true).unwrap();

        let ctx = FsContext(local.as_ref());
        let root = Asset::new(Some(&ctx), "default", local.root(), "", true, None);
        let bundle = Asset::new(Some(&ctx), "default", local.root(), "kit.zip", false, Some(&root));
        let inner = registry.open_bundle(local.as_ref(), &bundle).unwrap();
        let bundled = Asset::new(Some(&FsContext(&inner)), "default", inner.root(), "a.stl", false, Some(&bundle));

        assert!(matches!(registry.container_fs(&bundled), Err(StockroomError::Consistency(_))));

        let loaded = bundled.clone().with_parent(bundle.clone().with_parent(root));
        let fs = registry.container_fs(&loaded).unwrap();
        assert_eq!(fs.read_all("a.stl").unwrap(), b"solid");
        assert_eq!(registry.read_asset(&loaded).unwrap(), b"solid");
    }
}
