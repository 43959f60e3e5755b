//! Bounded render/enrich pipeline.
//!
//! Each `process` call becomes one pool job running two independent tracks.
//! A failing track is recorded in the job's report and logged; it does not
//! fail the job. Only a failure to persist the source asset does.

use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};

use stockroom_api::{Asset, AssetKind, CatalogError, NodeKind};
use stockroom_ingest::{FlowControlConfig, JobHandle, WorkerPool};

use super::{ProcessContext, ProcessorSet};
use crate::error::{Result, StockroomError};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TrackState {
    Pending,
    Skipped,
    Done,
    Failed,
}

/// Outcome of one processed asset.
#[derive(Debug, Clone, PartialEq)]
pub struct ProcessReport {
    pub asset_id: String,
    pub render: TrackState,
    pub enrich: TrackState,
    pub render_error: Option<String>,
    pub enrich_error: Option<String>,
    pub saved: bool,
    /// Ids of children emitted by the enricher.
    pub children: Vec<String>,
}

impl ProcessReport {
    fn new(asset_id: &str) -> Self {
        Self {
            asset_id: asset_id.to_string(),
            render: TrackState::Pending,
            enrich: TrackState::Pending,
            render_error: None,
            enrich_error: None,
            saved: false,
            children: Vec::new(),
        }
    }
}

pub struct ProcessHandle {
    asset_id: String,
    job: JobHandle<ProcessReport>,
}

impl ProcessHandle {
    pub fn asset_id(&self) -> &str {
        &self.asset_id
    }

    pub async fn wait(self) -> Result<ProcessReport> {
        Ok(self.job.wait().await?)
    }

    pub fn blocking_wait(self) -> Result<ProcessReport> {
        Ok(self.job.blocking_wait()?)
    }
}

/// Totals for one drain cycle.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PipelineSummary {
    pub processed: usize,
    pub rendered: usize,
    pub enriched: usize,
    pub track_failures: usize,
    /// Enricher children the pool refused to schedule.
    pub refused: usize,
    pub peak_in_flight: usize,
}

#[derive(Default)]
struct Counters {
    rendered: AtomicUsize,
    enriched: AtomicUsize,
    track_failures: AtomicUsize,
    refused: AtomicUsize,
}

struct Inner {
    pool: WorkerPool,
    processors: ProcessorSet,
    ctx: ProcessContext,
    render_bundles: bool,
    counters: Counters,
}

/// Schedules renderers and enrichers on a bounded worker pool.
#[derive(Clone)]
pub struct Processor {
    inner: Arc<Inner>,
}

impl Processor {
    /// Must be called from within a tokio runtime.
    pub fn new(ctx: ProcessContext, processors: ProcessorSet, max_workers: usize, render_bundles: bool) -> Result<Self> {
        let pool = WorkerPool::new(FlowControlConfig::with_max_in_flight(max_workers))?;
        Ok(Self::with_pool(ctx, processors, pool, render_bundles))
    }

    pub fn with_pool(ctx: ProcessContext, processors: ProcessorSet, pool: WorkerPool, render_bundles: bool) -> Self {
        Self {
            inner: Arc::new(Inner {
                pool,
                processors,
                ctx,
                render_bundles,
                counters: Counters::default(),
            }),
        }
    }

    pub fn context(&self) -> &ProcessContext {
        &self.inner.ctx
    }

    pub fn limit(&self) -> usize {
        self.inner.pool.limit()
    }

    pub fn in_flight(&self) -> usize {
        self.inner.pool.in_flight()
    }

    pub fn cancel(&self) {
        self.inner.pool.cancel();
    }

    pub fn is_cancelled(&self) -> bool {
        self.inner.pool.is_cancelled()
    }

    /// Schedule `asset`. Returns immediately; fails only when the pool
    /// refuses new work.
    pub fn process(&self, asset: Asset) -> Result<ProcessHandle> {
        let asset_id = asset.id.clone();
        let this = self.clone();
        let job = self.inner.pool.submit(move || this.run(asset))?;
        Ok(ProcessHandle { asset_id, job })
    }

    /// Wait for every job of the cycle, including jobs scheduled by other jobs.
    pub async fn wait(&self) -> Result<PipelineSummary> {
        let stats = self.inner.pool.wait().await?;
        let counters = &self.inner.counters;
        let summary = PipelineSummary {
            processed: stats.completed,
            rendered: counters.rendered.swap(0, Ordering::SeqCst),
            enriched: counters.enriched.swap(0, Ordering::SeqCst),
            track_failures: counters.track_failures.swap(0, Ordering::SeqCst),
            refused: counters.refused.swap(0, Ordering::SeqCst),
            peak_in_flight: stats.peak_in_flight,
        };
        tracing::info!(
            processed = summary.processed,
            rendered = summary.rendered,
            enriched = summary.enriched,
            failures = summary.track_failures,
            refused = summary.refused,
            "pipeline drained"
        );
        Ok(summary)
    }

    /// Run both tracks, then write back only the fields they produced.
    ///
    /// Other jobs bubble thumbnails into this row while the tracks run, so
    /// the row is never replaced as a whole.
    fn run(&self, mut asset: Asset) -> Result<ProcessReport> {
        let mut report = ProcessReport::new(&asset.id);

        let mut thumbnail = self.render_track(&asset, &mut report);
        if thumbnail.is_none() && asset.kind == Some(AssetKind::Image) && asset.thumbnail.is_none() {
            thumbnail = Some(asset.id.clone());
        }
        if let Some(id) = &thumbnail {
            asset.thumbnail = Some(id.clone());
        }

        let before = asset.thumbnail.clone();
        self.enrich_track(&mut asset, &mut report);
        if asset.thumbnail != before {
            thumbnail = asset.thumbnail.clone();
        }

        let properties = report.enrich == TrackState::Done;
        match self.write_back(&asset, thumbnail.as_deref(), properties) {
            Ok(saved) => report.saved = saved,
            Err(StockroomError::Catalog(CatalogError::NotFound(_))) => {
                tracing::debug!(asset = %asset.id, "row removed while processing");
            }
            Err(e) => return Err(e),
        }
        Ok(report)
    }

    fn write_back(&self, asset: &Asset, thumbnail: Option<&str>, properties: bool) -> Result<bool> {
        let catalog = &self.inner.ctx.catalog;
        if let Some(id) = thumbnail {
            catalog.update_thumbnail(&asset.id, id)?;
        }
        if properties {
            catalog.update_properties(&asset.id, &asset.properties)?;
        }
        Ok(thumbnail.is_some() || properties)
    }

    /// Returns the id of the stored render.
    fn render_track(&self, asset: &Asset, report: &mut ProcessReport) -> Option<String> {
        let inner = &self.inner;
        let renderer = if asset.node_kind == NodeKind::Bundle && !inner.render_bundles {
            None
        } else {
            inner.processors.renderer_for(asset)
        };
        let Some(renderer) = renderer else {
            report.render = TrackState::Skipped;
            return None;
        };

        let rendered = renderer.render(&inner.ctx, asset).and_then(|derived| {
            inner.ctx.catalog.insert_asset(&derived)?;
            Ok(derived)
        });
        match rendered {
            Ok(derived) => {
                report.render = TrackState::Done;
                inner.counters.rendered.fetch_add(1, Ordering::SeqCst);
                Some(derived.id)
            }
            Err(e) => {
                tracing::warn!(asset = %asset.id, path = %asset.path_str(), renderer = renderer.name(), error = %e, "render failed");
                report.render = TrackState::Failed;
                report.render_error = Some(e.to_string());
                inner.counters.track_failures.fetch_add(1, Ordering::SeqCst);
                None
            }
        }
    }

    fn enrich_track(&self, asset: &mut Asset, report: &mut ProcessReport) {
        let inner = &self.inner;
        let Some(enricher) = inner.processors.enricher_for(asset) else {
            report.enrich = TrackState::Skipped;
            return;
        };

        let children = match enricher.enrich(&inner.ctx, asset) {
            Ok(children) => children,
            Err(e) => {
                tracing::warn!(asset = %asset.id, path = %asset.path_str(), enricher = enricher.name(), error = %e, "enrich failed");
                report.enrich = TrackState::Failed;
                report.enrich_error = Some(e.to_string());
                inner.counters.track_failures.fetch_add(1, Ordering::SeqCst);
                return;
            }
        };

        for child in children {
            if let Err(e) = inner.ctx.catalog.insert_asset(&child) {
                tracing::warn!(asset = %asset.id, child = %child.id, error = %e, "storing enriched child failed");
                continue;
            }
            if asset.thumbnail.is_none() && child.kind == Some(AssetKind::Image) {
                asset.thumbnail = Some(child.id.clone());
            }
            let child_id = child.id.clone();
            // Not awaited: the pool drain covers it
            if let Err(e) = self.process(child) {
                tracing::warn!(asset = %asset.id, child = %child_id, error = %e, "child not scheduled");
                inner.counters.refused.fetch_add(1, Ordering::SeqCst);
            }
            report.children.push(child_id);
        }
        report.enrich = TrackState::Done;
        inner.counters.enriched.fetch_add(1, Ordering::SeqCst);
    }
}
