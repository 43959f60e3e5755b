//! Renderers and enrichers keyed by file extension, and the bounded
//! pipeline that runs them over discovered assets.

use std::collections::HashMap;
use std::io::Write;
use std::sync::Arc;

use stockroom_api::{Asset, BackendKind, Catalog, NodeKind};

use crate::config::RenderConfig;
use crate::error::Result;
use crate::fs::{BundleFs, FsRegistry, LibFs};

pub mod enrichers;
pub mod pipeline;
pub mod renderers;

pub use pipeline::{PipelineSummary, ProcessHandle, ProcessReport, Processor, TrackState};

/// Produces a derived preview asset from a source asset.
pub trait Renderer: Send + Sync {
    fn name(&self) -> &'static str;

    /// Return the derived asset, parented to `asset`. The caller inserts it.
    fn render(&self, ctx: &ProcessContext, asset: &Asset) -> Result<Asset>;
}

/// Fills `asset.properties` and may extract additional child assets.
pub trait Enricher: Send + Sync {
    fn name(&self) -> &'static str;

    /// Children returned here are inserted and processed by the caller.
    fn enrich(&self, ctx: &ProcessContext, asset: &mut Asset) -> Result<Vec<Asset>>;
}

/// Services available to renderers and enrichers.
#[derive(Clone)]
pub struct ProcessContext {
    pub registry: Arc<FsRegistry>,
    pub catalog: Arc<dyn Catalog>,
    pub ancestor_depth: usize,
}

impl ProcessContext {
    /// Load the ancestor chain when the asset lives inside a bundle.
    pub fn with_ancestors(&self, asset: &Asset) -> Result<Asset> {
        let mut asset = asset.clone();
        if asset.backend_kind == BackendKind::Bundle && asset.parent.is_none() && asset.parent_id.is_some() {
            self.catalog.load_parents(&mut asset, self.ancestor_depth)?;
        }
        Ok(asset)
    }

    /// Bytes of the asset itself.
    pub fn source_bytes(&self, asset: &Asset) -> Result<Vec<u8>> {
        let asset = self.with_ancestors(asset)?;
        self.registry.read_asset(&asset)
    }

    /// Filesystem exposed by the asset (the interior for bundles).
    pub fn asset_fs(&self, asset: &Asset) -> Result<Arc<dyn LibFs>> {
        let asset = self.with_ancestors(asset)?;
        self.registry.asset_fs(&asset)
    }

    /// Read-only interior of a bundle node.
    pub fn bundle_fs(&self, bundle: &Asset) -> Result<BundleFs> {
        let bundle = self.with_ancestors(bundle)?;
        self.registry.interior_fs(&bundle)
    }

    pub fn generated(&self) -> Result<Arc<dyn LibFs>> {
        self.registry.generated()
    }

    /// Write `bytes` to the generated store and describe it as a child of `parent`.
    pub fn store_generated(&self, name: &str, bytes: &[u8], label: &str, parent: &Asset) -> Result<Asset> {
        let generated = self.generated()?;
        let mut writer = generated.create(name)?;
        writer.write_all(bytes)?;
        writer.flush()?;
        Ok(self.generated_asset(generated.as_ref(), name, label, parent))
    }

    /// Describe an existing file of the generated store.
    pub fn generated_asset(&self, generated: &dyn LibFs, name: &str, label: &str, parent: &Asset) -> Asset {
        Asset::derived(generated.name(), generated.root(), name, label, parent)
    }
}

/// Name of the render output for an asset.
pub fn render_name(asset: &Asset) -> String {
    format!("{}.r.png", asset.id)
}

/// Extension-keyed renderer and enricher tables.
#[derive(Clone, Default)]
pub struct ProcessorSet {
    renderers: HashMap<String, Arc<dyn Renderer>>,
    enrichers: HashMap<String, Arc<dyn Enricher>>,
}

impl ProcessorSet {
    pub fn new() -> Self {
        Self::default()
    }

    /// Built-in processors: STL and GCode renderers, GCode and 3MF enrichers.
    pub fn with_defaults(render: &RenderConfig) -> Result<Self> {
        let mut set = Self::new();
        set.register_renderer(".stl", Arc::new(renderers::ModelRenderer::from_config(render)?));
        set.register_renderer(".gcode", Arc::new(renderers::GCodeRenderer));
        set.register_enricher(".gcode", Arc::new(enrichers::GCodeEnricher));
        set.register_enricher(".3mf", Arc::new(enrichers::ArchiveImageEnricher::default()));
        Ok(set)
    }

    pub fn register_renderer(&mut self, ext: &str, renderer: Arc<dyn Renderer>) -> &mut Self {
        self.renderers.insert(ext.to_ascii_lowercase(), renderer);
        self
    }

    pub fn register_enricher(&mut self, ext: &str, enricher: Arc<dyn Enricher>) -> &mut Self {
        self.enrichers.insert(ext.to_ascii_lowercase(), enricher);
        self
    }

    pub fn renderer_for(&self, asset: &Asset) -> Option<Arc<dyn Renderer>> {
        let ext = asset.extension.as_deref()?.to_ascii_lowercase();
        self.renderers.get(&ext).cloned()
    }

    pub fn enricher_for(&self, asset: &Asset) -> Option<Arc<dyn Enricher>> {
        let ext = asset.extension.as_deref()?.to_ascii_lowercase();
        self.enrichers.get(&ext).cloned()
    }
}

/// Nodes the pipeline never touches.
pub fn is_processable(asset: &Asset) -> bool {
    !matches!(asset.node_kind, NodeKind::Root | NodeKind::Dir)
}
