use stockroom_api::Asset;
use stockroom_core::DiscoveryReport;
use tabled::Tabled;

/// One catalog row as printed in tables.
#[derive(Tabled)]
pub struct AssetRow {
    #[tabled(rename = "Id")]
    pub id: String,
    #[tabled(rename = "Node")]
    pub node: String,
    #[tabled(rename = "Kind")]
    pub kind: String,
    #[tabled(rename = "Label")]
    pub label: String,
    #[tabled(rename = "Backend")]
    pub backend: String,
    #[tabled(rename = "Path")]
    pub path: String,
    #[tabled(rename = "Thumb")]
    pub thumbnail: String,
}

impl AssetRow {
    pub fn from_asset(asset: &Asset) -> Self {
        Self {
            id: short_id(&asset.id),
            node: asset.node_kind.to_string(),
            kind: asset.kind.map(|k| k.to_string()).unwrap_or_else(|| "-".to_string()),
            label: asset.label.clone(),
            backend: asset.backend_name.clone(),
            path: match asset.path_str() {
                "" => "/".to_string(),
                p => p.to_string(),
            },
            thumbnail: asset.thumbnail.as_deref().map(short_id).unwrap_or_else(|| "-".to_string()),
        }
    }
}

#[derive(Tabled)]
pub struct BackendRow {
    #[tabled(rename = "Backend")]
    pub backend: String,
    #[tabled(rename = "Seen")]
    pub seen: usize,
    #[tabled(rename = "Failed")]
    pub failed: usize,
    #[tabled(rename = "Queued")]
    pub processed: usize,
    #[tabled(rename = "Refused")]
    pub refused: usize,
    #[tabled(rename = "Swept")]
    pub swept: usize,
}

impl From<&DiscoveryReport> for BackendRow {
    fn from(r: &DiscoveryReport) -> Self {
        Self {
            backend: r.backend.clone(),
            seen: r.seen,
            failed: r.failed,
            processed: r.processed,
            refused: r.refused,
            swept: r.swept,
        }
    }
}

/// Ids are md5 hex; the first 12 characters are enough on screen.
/// Commands taking an id accept this prefix.
pub fn short_id(id: &str) -> String {
    id.chars().take(12).collect()
}
