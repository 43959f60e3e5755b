//! Mark-and-sweep discovery of one backend.
//!
//! Every row of the backend is marked unseen, the tree is walked depth-first
//! upserting each node as seen, and whatever is still unseen afterwards is
//! deleted. Leaves are handed to the processing pipeline as they are found.

use std::sync::Arc;

use stockroom_api::{Asset, Catalog, NodeKind};
use tokio_util::sync::CancellationToken;

use crate::config::LibraryConfig;
use crate::error::{Result, StockroomError};
use crate::fs::{FsContext, FsEntry, FsRegistry, LibFs, join_path};
use crate::processing::{Processor, is_processable};

/// Walk policy taken from the library configuration.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DiscoveryOptions {
    pub ignore_dot_files: bool,
    pub blacklist: Vec<String>,
    pub process_bundles: bool,
    pub traverse_bundles: bool,
}

impl Default for DiscoveryOptions {
    fn default() -> Self {
        Self::from_config(&LibraryConfig::default())
    }
}

impl DiscoveryOptions {
    pub fn from_config(config: &LibraryConfig) -> Self {
        Self {
            ignore_dot_files: config.ignore_dot_files,
            blacklist: config.effective_blacklist(),
            process_bundles: config.process_bundles,
            traverse_bundles: config.traverse_bundles,
        }
    }

    pub fn is_skipped(&self, name: &str) -> bool {
        (self.ignore_dot_files && name.starts_with('.')) || self.blacklist.iter().any(|s| name.ends_with(s.as_str()))
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct DiscoveryReport {
    pub backend: String,
    /// Nodes upserted as seen.
    pub seen: usize,
    /// Children skipped because they could not be read or stored.
    pub failed: usize,
    /// Nodes handed to the pipeline.
    pub processed: usize,
    /// Nodes the pipeline refused to schedule.
    pub refused: usize,
    /// Rows deleted by the sweep.
    pub swept: usize,
}

pub struct Discoverer {
    registry: Arc<FsRegistry>,
    catalog: Arc<dyn Catalog>,
    processor: Processor,
    options: DiscoveryOptions,
    cancel: CancellationToken,
}

impl Discoverer {
    pub fn new(
        registry: Arc<FsRegistry>,
        catalog: Arc<dyn Catalog>,
        processor: Processor,
        options: DiscoveryOptions,
    ) -> Self {
        Self {
            registry,
            catalog,
            processor,
            options,
            cancel: CancellationToken::new(),
        }
    }

    pub fn with_cancel_token(mut self, token: CancellationToken) -> Self {
        self.cancel = token;
        self
    }

    pub fn options(&self) -> &DiscoveryOptions {
        &self.options
    }

    pub fn discover_by_name(&self, name: &str) -> Result<DiscoveryReport> {
        let fs = self.registry.get(name)?;
        self.discover_backend(fs.as_ref())
    }

    /// Run one full scan and sweep of `fs`. Blocking.
    ///
    /// Failing to enumerate the backend root aborts the scan before the
    /// sweep. Failures below the root skip only the affected subtree.
    pub fn discover_backend(&self, fs: &dyn LibFs) -> Result<DiscoveryReport> {
        let backend = fs.name().to_string();
        tracing::info!(backend = %backend, location = %fs.location().display(), "discovering backend");

        let marked = self.catalog.set_dirty_fs(&backend)?;
        tracing::debug!(backend = %backend, rows = marked, "marked rows unseen");

        let mut walk = Walk {
            discoverer: self,
            backend: &backend,
            report: DiscoveryReport {
                backend: backend.clone(),
                ..DiscoveryReport::default()
            },
        };

        let stat = fs.stat("")?;
        let root = Asset::new(Some(&FsContext(fs)), &backend, fs.root(), "", stat.is_dir, None);
        let root = walk.store(root)?;
        if stat.is_dir {
            let entries = fs.read_dir("")?;
            walk.visit_entries(fs, "", entries, &root);
        }

        let mut report = walk.report;
        if self.cancel.is_cancelled() {
            tracing::warn!(backend = %backend, "discovery cancelled, sweep skipped");
            return Err(StockroomError::Cancelled);
        }

        report.swept = self.catalog.delete_unseen_in_fs(&backend)?;
        tracing::info!(
            backend = %backend,
            seen = report.seen,
            failed = report.failed,
            processed = report.processed,
            refused = report.refused,
            swept = report.swept,
            "discovery finished"
        );
        Ok(report)
    }
}

struct Walk<'a> {
    discoverer: &'a Discoverer,
    /// Top-level backend; also owns every node found inside its bundles.
    backend: &'a str,
    report: DiscoveryReport,
}

impl Walk<'_> {
    /// Upsert `asset` as seen, keeping data derived in earlier scans.
    fn store(&mut self, mut asset: Asset) -> Result<Asset> {
        asset.seen_on_scan = true;
        let asset = self.discoverer.catalog.refresh_asset(&asset)?;
        self.report.seen += 1;
        tracing::debug!(backend = %self.backend, path = %asset.path_str(), node = %asset.node_kind, "discovered");
        Ok(asset)
    }

    fn visit_entries(&mut self, fs: &dyn LibFs, dir: &str, entries: Vec<FsEntry>, parent: &Asset) {
        for entry in entries {
            if self.discoverer.cancel.is_cancelled() {
                return;
            }
            if self.discoverer.options.is_skipped(&entry.name) {
                tracing::trace!(path = %join_path(dir, &entry.name), "skipped by policy");
                continue;
            }
            let path = join_path(dir, &entry.name);
            if let Err(e) = self.visit(fs, &path, parent) {
                tracing::warn!(backend = %self.backend, path = %path, error = %e, "skipping subtree");
                self.report.failed += 1;
            }
        }
    }

    fn visit(&mut self, fs: &dyn LibFs, path: &str, parent: &Asset) -> Result<()> {
        let stat = fs.stat(path)?;
        let asset = Asset::new(Some(&FsContext(fs)), self.backend, fs.root(), path, stat.is_dir, Some(parent));
        let asset = self.store(asset)?;

        if stat.is_dir {
            let entries = fs.read_dir(path)?;
            self.visit_entries(fs, path, entries, &asset);
            return Ok(());
        }

        let options = &self.discoverer.options;
        if asset.node_kind == NodeKind::Bundle {
            if options.process_bundles {
                self.hand_off(&asset);
            }
            if options.traverse_bundles {
                let inner = self.discoverer.registry.open_bundle(fs, &asset)?;
                let entries = inner.read_dir("")?;
                self.visit_entries(&inner, "", entries, &asset);
            }
            return Ok(());
        }

        if is_processable(&asset) {
            self.hand_off(&asset);
        }
        Ok(())
    }

    fn hand_off(&mut self, asset: &Asset) {
        match self.discoverer.processor.process(asset.clone()) {
            Ok(_) => self.report.processed += 1,
            Err(e) => {
                tracing::warn!(backend = %self.backend, path = %asset.path_str(), error = %e, "not scheduled");
                self.report.refused += 1;
            }
        }
    }
}
