use serde::{Deserialize, Serialize};

use crate::error::CatalogResult;
use crate::models::{Asset, Properties};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CatalogEventKind {
    New,
    Update,
    Delete,
}

/// Change notification published for every write.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CatalogEvent {
    pub asset_id: String,
    pub kind: CatalogEventKind,
    pub label: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub parent_id: Option<String>,
}

/// Label/tag filter for [`Catalog::search`].
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SearchQuery {
    /// Case-insensitive substring of the label.
    pub label: Option<String>,
    /// Every tag listed must be present.
    pub tags: Vec<String>,
}

impl SearchQuery {
    pub fn label(term: impl Into<String>) -> Self {
        Self {
            label: Some(term.into()),
            tags: Vec::new(),
        }
    }

    pub fn matches(&self, asset: &Asset) -> bool {
        if let Some(term) = &self.label {
            if !asset.label.to_lowercase().contains(&term.to_lowercase()) {
                return false;
            }
        }
        self.tags.iter().all(|t| asset.tags.contains(t))
    }
}

/// Read/write contract of the persisted asset index.
///
/// Writes are upserts keyed by id. Implementations must be safe for
/// concurrent use from discovery and processing tasks.
pub trait Catalog: Send + Sync {
    /// Fetch one asset. `deep` also loads two levels of nested children.
    fn get_asset(&self, id: &str, deep: bool) -> CatalogResult<Asset>;

    /// Upsert, then bubble the thumbnail to the parent when it has none.
    fn save_asset(&self, asset: &Asset) -> CatalogResult<()>;

    /// Same as `save_asset` but announced as a new node.
    fn insert_asset(&self, asset: &Asset) -> CatalogResult<()>;

    /// Upsert a rediscovered node. Derived data already stored for it
    /// (thumbnail, description, properties, tags) is kept. Returns the
    /// stored row.
    fn refresh_asset(&self, asset: &Asset) -> CatalogResult<Asset>;

    /// Set only the thumbnail of an existing row, then bubble it upward.
    fn update_thumbnail(&self, id: &str, thumbnail: &str) -> CatalogResult<()>;

    /// Replace only the properties of an existing row.
    fn update_properties(&self, id: &str, properties: &Properties) -> CatalogResult<()>;

    /// Delete a node together with its descendants.
    fn delete_asset(&self, id: &str) -> CatalogResult<()>;

    /// Mark every row of a backend unseen. Returns the number of rows.
    fn set_dirty_fs(&self, backend_name: &str) -> CatalogResult<usize>;

    /// Delete every row of a backend still unseen. Returns the number removed.
    fn delete_unseen_in_fs(&self, backend_name: &str) -> CatalogResult<usize>;

    /// Populate `depth` levels of `asset.parent`. A depth of zero is invalid.
    fn load_parents(&self, asset: &mut Asset, depth: usize) -> CatalogResult<()>;

    fn search(&self, query: &SearchQuery) -> CatalogResult<Vec<Asset>>;

    fn roots(&self, deep: bool) -> CatalogResult<Vec<Asset>>;

    fn children(&self, parent_id: &str) -> CatalogResult<Vec<Asset>>;

    fn assets_in_backend(&self, backend_name: &str) -> CatalogResult<Vec<Asset>>;
}
