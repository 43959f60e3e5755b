use std::collections::HashMap;

use stockroom_api::{Asset, NodeKind, extension_of};

use crate::error::Result;
use crate::fs::LibFs;
use crate::processing::{Enricher, ProcessContext};

/// Extracts the pictures packed inside a project archive (3MF and similar)
/// as child assets of the archive.
pub struct ArchiveImageEnricher {
    image_extensions: Vec<String>,
    excluded_dir: String,
}

impl Default for ArchiveImageEnricher {
    fn default() -> Self {
        Self {
            image_extensions: [".png", ".jpg", ".jpeg", ".gif", ".bmp", ".webp", ".svg"]
                .iter()
                .map(|s| s.to_string())
                .collect(),
            excluded_dir: ".thumbnails/".to_string(),
        }
    }
}

impl ArchiveImageEnricher {
    fn wants(&self, path: &str) -> Option<String> {
        if path.contains(&self.excluded_dir) {
            return None;
        }
        let ext = extension_of(path);
        self.image_extensions.contains(&ext).then_some(ext)
    }
}

impl Enricher for ArchiveImageEnricher {
    fn name(&self) -> &'static str {
        "archive-images"
    }

    fn enrich(&self, ctx: &ProcessContext, asset: &mut Asset) -> Result<Vec<Asset>> {
        if asset.node_kind != NodeKind::Bundle {
            return Ok(Vec::new());
        }

        let bundle = ctx.bundle_fs(asset)?;
        let generated = ctx.generated()?;
        let mut labels: HashMap<String, usize> = HashMap::new();
        let mut children = Vec::new();

        for (path, ext) in bundle.file_paths().into_iter().filter_map(|p| self.wants(&p).map(|e| (p, e))) {
            let name = format!("{}.e{}{}", asset.id, children.len() + 1, ext);
            let label = disambiguate(&mut labels, entry_stem(&path));

            let child = if generated.exists(&name) {
                ctx.generated_asset(generated.as_ref(), &name, &label, asset)
            } else {
                let bytes = bundle.read_all(&path)?;
                ctx.store_generated(&name, &bytes, &label, asset)?
            };
            tracing::debug!("extracted {} from {} as {}", path, asset.path_str(), name);
            children.push(child);
        }
        Ok(children)
    }
}

fn entry_stem(path: &str) -> &str {
    let base = path.rsplit('/').next().unwrap_or(path);
    base.rsplit_once('.').map(|(stem, _)| stem).filter(|s| !s.is_empty()).unwrap_or(base)
}

fn disambiguate(seen: &mut HashMap<String, usize>, stem: &str) -> String {
    let count = seen.entry(stem.to_string()).or_insert(0);
    *count += 1;
    if *count == 1 {
        stem.to_string()
    } else {
        format!("{} ({})", stem, count)
    }
}
