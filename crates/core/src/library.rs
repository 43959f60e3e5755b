//! Orchestration of scan cycles over every configured backend.

use std::sync::Arc;

use stockroom_api::{Asset, Catalog, CatalogError, derive_id};
use tokio::task::JoinSet;
use tokio_util::sync::CancellationToken;

use crate::catalog::MemoryCatalog;
use crate::config::Config;
use crate::discovery::{Discoverer, DiscoveryOptions, DiscoveryReport};
use crate::error::{Result, StockroomError};
use crate::fs::{FsRegistry, FsStat, ReadHandle};
use crate::processing::{PipelineSummary, ProcessContext, Processor, ProcessorSet};

/// A backend whose scan was aborted.
#[derive(Debug)]
pub struct BackendFailure {
    pub backend: String,
    pub error: StockroomError,
}

/// Result of one `scan_all` cycle.
#[derive(Debug, Default)]
pub struct ScanSummary {
    pub backends: Vec<DiscoveryReport>,
    /// Backends aborted before their sweep, sorted by name.
    pub failures: Vec<BackendFailure>,
    pub pipeline: PipelineSummary,
    /// Generated files removed because no row refers to them any more.
    pub pruned: usize,
}

impl ScanSummary {
    pub fn is_complete(&self) -> bool {
        self.failures.is_empty()
    }

    pub fn seen(&self) -> usize {
        self.backends.iter().map(|r| r.seen).sum()
    }

    pub fn swept(&self) -> usize {
        self.backends.iter().map(|r| r.swept).sum()
    }
}

pub struct LibraryBuilder {
    config: Config,
    catalog: Option<Arc<dyn Catalog>>,
    processors: Option<ProcessorSet>,
}

impl LibraryBuilder {
    pub fn new(config: Config) -> Self {
        Self {
            config,
            catalog: None,
            processors: None,
        }
    }

    pub fn catalog(mut self, catalog: Arc<dyn Catalog>) -> Self {
        self.catalog = Some(catalog);
        self
    }

    /// Replace the built-in renderers and enrichers.
    pub fn processors(mut self, processors: ProcessorSet) -> Self {
        self.processors = Some(processors);
        self
    }

    /// Must be called from within a tokio runtime.
    pub fn build(self) -> Result<Library> {
        let config = self.config;
        config.validate()?;

        let registry = Arc::new(FsRegistry::from_config(&config)?);
        let catalog = self
            .catalog
            .unwrap_or_else(|| Arc::new(MemoryCatalog::new()) as Arc<dyn Catalog>);
        let processors = match self.processors {
            Some(set) => set,
            None => ProcessorSet::with_defaults(&config.render)?,
        };

        let ctx = ProcessContext {
            registry: registry.clone(),
            catalog: catalog.clone(),
            ancestor_depth: config.library.ancestor_depth,
        };
        let processor = Processor::new(ctx, processors, config.render.max_workers, config.library.render_bundles)?;

        let cancel = CancellationToken::new();
        let discoverer = Discoverer::new(
            registry.clone(),
            catalog.clone(),
            processor.clone(),
            DiscoveryOptions::from_config(&config.library),
        )
        .with_cancel_token(cancel.clone());

        Ok(Library {
            config,
            registry,
            catalog,
            processor,
            discoverer: Arc::new(discoverer),
            cancel,
        })
    }
}

/// Backends, catalog and pipeline wired together.
pub struct Library {
    config: Config,
    registry: Arc<FsRegistry>,
    catalog: Arc<dyn Catalog>,
    processor: Processor,
    discoverer: Arc<Discoverer>,
    cancel: CancellationToken,
}

impl Library {
    pub fn builder(config: Config) -> LibraryBuilder {
        LibraryBuilder::new(config)
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    pub fn registry(&self) -> &Arc<FsRegistry> {
        &self.registry
    }

    pub fn catalog(&self) -> &Arc<dyn Catalog> {
        &self.catalog
    }

    pub fn processor(&self) -> &Processor {
        &self.processor
    }

    /// Scan every discoverable backend in parallel, then drain the pipeline.
    ///
    /// A backend whose root cannot be enumerated does not stop the others;
    /// it is listed in [`ScanSummary::failures`] next to the reports of the
    /// backends that completed. Only a pipeline failure fails the cycle.
    pub async fn scan_all(&self) -> Result<ScanSummary> {
        let mut tasks = JoinSet::new();
        for fs in self.registry.discoverable() {
            if self.cancel.is_cancelled() {
                break;
            }
            let discoverer = self.discoverer.clone();
            tasks.spawn_blocking(move || {
                let name = fs.name().to_string();
                (name, discoverer.discover_backend(fs.as_ref()))
            });
        }

        let mut summary = ScanSummary::default();
        while let Some(joined) = tasks.join_next().await {
            let (backend, result) = joined.map_err(|e| StockroomError::Internal(format!("discovery task failed: {e}")))?;
            match result {
                Ok(report) => summary.backends.push(report),
                Err(error) => {
                    tracing::error!(backend = %backend, error = %error, "backend scan aborted");
                    summary.failures.push(BackendFailure { backend, error });
                }
            }
        }
        summary.backends.sort_by(|a, b| a.backend.cmp(&b.backend));
        summary.failures.sort_by(|a, b| a.backend.cmp(&b.backend));

        summary.pipeline = self.processor.wait().await?;
        summary.pruned = self.prune_generated()?;
        tracing::info!(
            backends = summary.backends.len(),
            failed = summary.failures.len(),
            seen = summary.seen(),
            swept = summary.swept(),
            "scan cycle finished"
        );
        Ok(summary)
    }

    /// Scan one backend by name, then drain the pipeline.
    pub async fn discover_backend(&self, name: &str) -> Result<DiscoveryReport> {
        let fs = self.registry.get(name)?;
        let discoverer = self.discoverer.clone();
        let report = tokio::task::spawn_blocking(move || discoverer.discover_backend(fs.as_ref()))
            .await
            .map_err(|e| StockroomError::Internal(format!("discovery task failed: {e}")))?;
        self.processor.wait().await?;
        self.prune_generated()?;
        report
    }

    /// Delete files of the generated store whose row is gone, such as the
    /// renders of swept assets. Must not overlap a running pipeline cycle.
    pub fn prune_generated(&self) -> Result<usize> {
        let generated = self.registry.generated()?;
        let mut pruned = 0;
        for entry in generated.read_dir("")? {
            if entry.is_dir {
                continue;
            }
            let id = derive_id(generated.name(), generated.root(), &entry.name);
            match self.catalog.get_asset(&id, false) {
                Ok(_) => continue,
                Err(CatalogError::NotFound(_)) => {}
                Err(e) => return Err(e.into()),
            }
            match generated.remove(&entry.name) {
                Ok(()) => pruned += 1,
                Err(e) => tracing::warn!(file = %entry.name, error = %e, "stale generated file kept"),
            }
        }
        if pruned > 0 {
            tracing::info!(pruned, "pruned generated files");
        }
        Ok(pruned)
    }

    /// Open `rel` through the asset's filesystem, loading ancestors as needed.
    pub fn open(&self, asset: &Asset, rel: &str) -> Result<(ReadHandle, FsStat)> {
        let asset = self.processor.context().with_ancestors(asset)?;
        self.registry.open(&asset, rel)
    }

    /// Open the asset's own bytes.
    pub fn read_asset(&self, asset: &Asset) -> Result<Vec<u8>> {
        self.processor.context().source_bytes(asset)
    }

    /// Stop scheduling new discovery and processing work.
    pub fn cancel(&self) {
        self.cancel.cancel();
        self.processor.cancel();
    }

    pub fn is_cancelled(&self) -> bool {
        self.cancel.is_cancelled()
    }
}
