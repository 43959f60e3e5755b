//! In-memory catalog with optional JSON snapshot persistence.

use std::collections::{HashMap, HashSet, VecDeque};
use std::path::{Path, PathBuf};
use std::sync::{RwLock, RwLockReadGuard, RwLockWriteGuard};

use stockroom_api::{
    Asset, Catalog, CatalogError, CatalogEvent, CatalogEventKind, CatalogResult, NodeKind,
    Properties, SearchQuery,
};
use tokio::sync::broadcast;

const EVENT_CAPACITY: usize = 1024;

/// Thread-safe catalog keyed by asset id.
pub struct MemoryCatalog {
    assets: RwLock<HashMap<String, Asset>>,
    events: broadcast::Sender<CatalogEvent>,
    snapshot: Option<PathBuf>,
}

impl MemoryCatalog {
    pub fn new() -> Self {
        let (events, _) = broadcast::channel(EVENT_CAPACITY);
        Self {
            assets: RwLock::new(HashMap::new()),
            events,
            snapshot: None,
        }
    }

    /// Catalog backed by a JSON snapshot. A missing file starts empty.
    pub fn load(path: impl Into<PathBuf>) -> CatalogResult<Self> {
        let path = path.into();
        let mut catalog = Self::new();
        if path.exists() {
            let raw = std::fs::read(&path).map_err(storage)?;
            let rows: Vec<Asset> = serde_json::from_slice(&raw).map_err(storage)?;
            tracing::info!("loaded {} assets from {}", rows.len(), path.display());
            let map = catalog.assets.get_mut().map_err(|_| poisoned())?;
            for row in rows {
                map.insert(row.id.clone(), row);
            }
        }
        catalog.snapshot = Some(path);
        Ok(catalog)
    }

    pub fn snapshot_path(&self) -> Option<&Path> {
        self.snapshot.as_deref()
    }

    /// Write the snapshot atomically. No-op without a snapshot path.
    pub fn persist(&self) -> CatalogResult<()> {
        let Some(path) = &self.snapshot else {
            return Ok(());
        };
        let mut rows: Vec<Asset> = self.read()?.values().cloned().collect();
        rows.sort_by(|a, b| a.id.cmp(&b.id));
        let bytes = serde_json::to_vec_pretty(&rows).map_err(storage)?;

        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent).map_err(storage)?;
        }
        let temp_path = path.with_extension("tmp");
        std::fs::write(&temp_path, bytes).map_err(storage)?;
        std::fs::rename(temp_path, path).map_err(storage)?;
        tracing::info!("saved {} assets to {}", rows.len(), path.display());
        Ok(())
    }

    pub fn subscribe(&self) -> broadcast::Receiver<CatalogEvent> {
        self.events.subscribe()
    }

    pub fn len(&self) -> usize {
        self.read().map(|m| m.len()).unwrap_or(0)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn read(&self) -> CatalogResult<RwLockReadGuard<'_, HashMap<String, Asset>>> {
        self.assets.read().map_err(|_| poisoned())
    }

    fn write(&self) -> CatalogResult<RwLockWriteGuard<'_, HashMap<String, Asset>>> {
        self.assets.write().map_err(|_| poisoned())
    }

    fn publish(&self, events: Vec<CatalogEvent>) {
        for event in events {
            // No subscribers is fine
            let _ = self.events.send(event);
        }
    }

    fn upsert(&self, asset: &Asset, announce: CatalogEventKind) -> CatalogResult<()> {
        check_identity(asset)?;

        let mut events = Vec::new();
        {
            let mut map = self.write()?;
            check_parent(&map, asset)?;

            let kind = match (announce, map.contains_key(&asset.id)) {
                (CatalogEventKind::New, _) | (_, false) => CatalogEventKind::New,
                _ => CatalogEventKind::Update,
            };
            map.insert(asset.id.clone(), asset.detached());
            events.push(event_for(asset, kind));

            bubble_thumbnail(&mut map, asset, &mut events);
        }
        self.publish(events);
        Ok(())
    }

    /// Apply `change` to one stored row under the write lock.
    fn update_row(&self, id: &str, change: impl FnOnce(&mut Asset)) -> CatalogResult<Asset> {
        let mut events = Vec::new();
        let row = {
            let mut map = self.write()?;
            let row = map
                .get_mut(id)
                .ok_or_else(|| CatalogError::NotFound(id.to_string()))?;
            change(row);
            let row = row.clone();
            events.push(event_for(&row, CatalogEventKind::Update));
            bubble_thumbnail(&mut map, &row, &mut events);
            row
        };
        self.publish(events);
        Ok(row)
    }

    fn remove_subtree(map: &mut HashMap<String, Asset>, id: &str) -> Vec<Asset> {
        let mut children: HashMap<&str, Vec<&str>> = HashMap::new();
        for row in map.values() {
            if let Some(pid) = &row.parent_id {
                children.entry(pid.as_str()).or_default().push(row.id.as_str());
            }
        }

        let mut doomed: Vec<String> = Vec::new();
        let mut seen = HashSet::new();
        let mut queue = VecDeque::from([id.to_string()]);
        while let Some(next) = queue.pop_front() {
            if !seen.insert(next.clone()) {
                continue;
            }
            if let Some(kids) = children.get(next.as_str()) {
                queue.extend(kids.iter().map(|k| k.to_string()));
            }
            doomed.push(next);
        }
        drop(children);

        let removed: Vec<Asset> = doomed.iter().filter_map(|d| map.remove(d)).collect();
        let gone: HashSet<&str> = removed.iter().map(|a| a.id.as_str()).collect();
        for row in map.values_mut() {
            if row.thumbnail.as_deref().is_some_and(|t| gone.contains(t)) {
                row.thumbnail = None;
            }
        }
        removed
    }

    fn with_nested(map: &HashMap<String, Asset>, asset: &Asset, levels: usize) -> Asset {
        let mut out = asset.clone();
        if levels > 0 {
            out.nested = sorted_children(map, &asset.id)
                .into_iter()
                .map(|child| Self::with_nested(map, child, levels - 1))
                .collect();
        }
        out
    }
}

impl Default for MemoryCatalog {
    fn default() -> Self {
        Self::new()
    }
}

fn check_identity(asset: &Asset) -> CatalogResult<()> {
    if asset.id.is_empty() {
        return Err(CatalogError::InvalidArgument("asset id is empty".into()));
    }
    if asset.parent_id.as_deref() == Some(asset.id.as_str()) {
        return Err(CatalogError::InvalidArgument(format!("asset {} is its own parent", asset.id)));
    }
    Ok(())
}

fn check_parent(map: &HashMap<String, Asset>, asset: &Asset) -> CatalogResult<()> {
    match &asset.parent_id {
        Some(pid) if !map.contains_key(pid) => Err(CatalogError::InvalidArgument(format!(
            "parent {} of {} does not exist",
            pid, asset.id
        ))),
        _ => Ok(()),
    }
}

fn storage(err: impl std::fmt::Display) -> CatalogError {
    CatalogError::Storage(err.to_string())
}

fn poisoned() -> CatalogError {
    CatalogError::Storage("catalog lock poisoned".to_string())
}

fn event_for(asset: &Asset, kind: CatalogEventKind) -> CatalogEvent {
    CatalogEvent {
        asset_id: asset.id.clone(),
        kind,
        label: asset.label.clone(),
        parent_id: asset.parent_id.clone(),
    }
}

/// Copy the saved thumbnail into each ancestor that has none.
///
/// Updating a parent is itself a save, so the walk continues upward until
/// an ancestor that already has a thumbnail.
fn bubble_thumbnail(map: &mut HashMap<String, Asset>, saved: &Asset, events: &mut Vec<CatalogEvent>) {
    let Some(thumbnail) = saved.thumbnail.clone() else {
        return;
    };
    let mut parent_id = saved.parent_id.clone();
    let mut hops = 0;
    while let Some(pid) = parent_id {
        hops += 1;
        if hops > map.len() {
            tracing::warn!("thumbnail bubbling stopped at {}: parent cycle", pid);
            break;
        }
        let Some(parent) = map.get_mut(&pid) else {
            break;
        };
        if parent.thumbnail.is_some() {
            break;
        }
        parent.thumbnail = Some(thumbnail.clone());
        events.push(event_for(parent, CatalogEventKind::Update));
        parent_id = parent.parent_id.clone();
    }
}

fn sorted_children<'a>(map: &'a HashMap<String, Asset>, parent_id: &str) -> Vec<&'a Asset> {
    let mut kids: Vec<&Asset> = map
        .values()
        .filter(|a| a.parent_id.as_deref() == Some(parent_id))
        .collect();
    kids.sort_by(|a, b| a.label.cmp(&b.label).then_with(|| a.id.cmp(&b.id)));
    kids
}

impl Catalog for MemoryCatalog {
    fn get_asset(&self, id: &str, deep: bool) -> CatalogResult<Asset> {
        let map = self.read()?;
        let asset = map
            .get(id)
            .ok_or_else(|| CatalogError::NotFound(id.to_string()))?;
        Ok(if deep {
            Self::with_nested(&map, asset, 2)
        } else {
            asset.clone()
        })
    }

    fn save_asset(&self, asset: &Asset) -> CatalogResult<()> {
        self.upsert(asset, CatalogEventKind::Update)
    }

    fn insert_asset(&self, asset: &Asset) -> CatalogResult<()> {
        self.upsert(asset, CatalogEventKind::New)
    }

    fn refresh_asset(&self, asset: &Asset) -> CatalogResult<Asset> {
        check_identity(asset)?;

        let mut events = Vec::new();
        let stored = {
            let mut map = self.write()?;
            check_parent(&map, asset)?;

            let mut stored = asset.detached();
            let kind = match map.get(&asset.id) {
                Some(existing) => {
                    stored.merge_derived_from(existing);
                    CatalogEventKind::Update
                }
                None => CatalogEventKind::New,
            };
            map.insert(stored.id.clone(), stored.clone());
            events.push(event_for(&stored, kind));
            bubble_thumbnail(&mut map, &stored, &mut events);
            stored
        };
        self.publish(events);
        Ok(stored)
    }

    fn update_thumbnail(&self, id: &str, thumbnail: &str) -> CatalogResult<()> {
        self.update_row(id, |row| row.thumbnail = Some(thumbnail.to_string()))?;
        Ok(())
    }

    fn update_properties(&self, id: &str, properties: &Properties) -> CatalogResult<()> {
        self.update_row(id, |row| row.properties = properties.clone())?;
        Ok(())
    }

    fn delete_asset(&self, id: &str) -> CatalogResult<()> {
        let removed = {
            let mut map = self.write()?;
            if !map.contains_key(id) {
                return Err(CatalogError::NotFound(id.to_string()));
            }
            Self::remove_subtree(&mut map, id)
        };
        self.publish(
            removed
                .iter()
                .map(|a| event_for(a, CatalogEventKind::Delete))
                .collect(),
        );
        Ok(())
    }

    fn set_dirty_fs(&self, backend_name: &str) -> CatalogResult<usize> {
        let mut map = self.write()?;
        let mut count = 0;
        for row in map.values_mut().filter(|a| a.backend_name == backend_name) {
            row.seen_on_scan = false;
            count += 1;
        }
        Ok(count)
    }

    fn delete_unseen_in_fs(&self, backend_name: &str) -> CatalogResult<usize> {
        let removed = {
            let mut map = self.write()?;
            let unseen: Vec<String> = map
                .values()
                .filter(|a| a.backend_name == backend_name && !a.seen_on_scan)
                .map(|a| a.id.clone())
                .collect();
            let mut removed = Vec::new();
            for id in unseen {
                // May already be gone with an unseen ancestor
                if map.contains_key(&id) {
                    removed.extend(Self::remove_subtree(&mut map, &id));
                }
            }
            removed
        };
        let count = removed
            .iter()
            .filter(|a| a.backend_name == backend_name)
            .count();
        self.publish(
            removed
                .iter()
                .map(|a| event_for(a, CatalogEventKind::Delete))
                .collect(),
        );
        Ok(count)
    }

    fn load_parents(&self, asset: &mut Asset, depth: usize) -> CatalogResult<()> {
        if depth == 0 {
            return Err(CatalogError::InvalidArgument("depth must be positive".into()));
        }
        let map = self.read()?;
        let mut ancestors = Vec::new();
        let mut next = asset.parent_id.clone();
        while let Some(pid) = next {
            if ancestors.len() == depth {
                break;
            }
            let parent = map
                .get(&pid)
                .ok_or_else(|| CatalogError::NotFound(format!("parent {}", pid)))?;
            next = parent.parent_id.clone();
            ancestors.push(parent.clone());
        }

        let mut chain: Option<Box<Asset>> = None;
        for mut ancestor in ancestors.into_iter().rev() {
            ancestor.parent = chain;
            chain = Some(Box::new(ancestor));
        }
        asset.parent = chain;
        Ok(())
    }

    fn search(&self, query: &SearchQuery) -> CatalogResult<Vec<Asset>> {
        let map = self.read()?;
        let mut hits: Vec<Asset> = map.values().filter(|a| query.matches(a)).cloned().collect();
        hits.sort_by(|a, b| a.label.cmp(&b.label).then_with(|| a.id.cmp(&b.id)));
        Ok(hits)
    }

    fn roots(&self, deep: bool) -> CatalogResult<Vec<Asset>> {
        let map = self.read()?;
        let mut roots: Vec<&Asset> = map.values().filter(|a| a.node_kind == NodeKind::Root).collect();
        roots.sort_by(|a, b| a.label.cmp(&b.label));
        Ok(roots
            .into_iter()
            .map(|r| if deep { Self::with_nested(&map, r, 2) } else { r.clone() })
            .collect())
    }

    fn children(&self, parent_id: &str) -> CatalogResult<Vec<Asset>> {
        let map = self.read()?;
        Ok(sorted_children(&map, parent_id).into_iter().cloned().collect())
    }

    fn assets_in_backend(&self, backend_name: &str) -> CatalogResult<Vec<Asset>> {
        let map = self.read()?;
        let mut rows: Vec<Asset> = map
            .values()
            .filter(|a| a.backend_name == backend_name)
            .cloned()
            .collect();
        rows.sort_by(|a, b| a.path.cmp(&b.path).then_with(|| a.id.cmp(&b.id)));
        Ok(rows)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use stockroom_api::BackendKind;
    use tempfile::tempdir;

    fn node(backend: &str, path: &str, is_dir: bool, parent: Option<&Asset>) -> Asset {
        let mut a = Asset::new(None, backend, "/lib", path, is_dir, parent);
        a.backend_kind = BackendKind::Local;
        a.seen_on_scan = true;
        a
    }

    #[test]
    fn test_thumbnail_bubbles_up_the_chain() {
        let catalog = MemoryCatalog::new();
        let root = node("default", "", true, None);
        let dir = node("default", "d", true, Some(&root));
        let mut file = node("default", "d/x.stl", false, Some(&dir));
        catalog.save_asset(&root).unwrap();
        catalog.save_asset(&dir).unwrap();
        catalog.save_asset(&file).unwrap();

        file.thumbnail = Some("T".into());
        catalog.save_asset(&file).unwrap();

        assert_eq!(catalog.get_asset(&dir.id, false).unwrap().thumbnail.as_deref(), Some("T"));
        assert_eq!(catalog.get_asset(&root.id, false).unwrap().thumbnail.as_deref(), Some("T"));
    }

    #[test]
    fn test_existing_parent_thumbnail_is_kept() {
        let catalog = MemoryCatalog::new();
        let mut root = node("default", "", true, None);
        root.thumbnail = Some("mine".into());
        catalog.save_asset(&root).unwrap();
        let mut file = node("default", "x.stl", false, Some(&root));
        file.thumbnail = Some("T".into());
        catalog.save_asset(&file).unwrap();
        assert_eq!(catalog.get_asset(&root.id, false).unwrap().thumbnail.as_deref(), Some("mine"));
    }

    #[test]
    fn test_field_updates_keep_the_rest_of_the_row() {
        let catalog = MemoryCatalog::new();
        let root = node("default", "", true, None);
        let bundle = node("default", "kit.zip", false, Some(&root));
        catalog.save_asset(&root).unwrap();
        catalog.save_asset(&bundle).unwrap();

        catalog.update_thumbnail(&bundle.id, "member").unwrap();
        let mut props = Properties::new();
        props.insert("layer_height".into(), serde_json::json!(0.2));
        catalog.update_properties(&bundle.id, &props).unwrap();

        let stored = catalog.get_asset(&bundle.id, false).unwrap();
        assert_eq!(stored.thumbnail.as_deref(), Some("member"));
        assert_eq!(stored.properties, props);
        assert_eq!(catalog.get_asset(&root.id, false).unwrap().thumbnail.as_deref(), Some("member"));
        assert!(matches!(
            catalog.update_thumbnail("missing", "x"),
            Err(CatalogError::NotFound(_))
        ));
    }

    #[test]
    fn test_refresh_keeps_derived_data() {
        let catalog = MemoryCatalog::new();
        let root = node("default", "", true, None);
        let file = node("default", "x.gcode", false, Some(&root));
        catalog.save_asset(&root).unwrap();
        catalog.save_asset(&file).unwrap();
        catalog.update_thumbnail(&file.id, "render").unwrap();

        let mut rediscovered = node("default", "x.gcode", false, Some(&root));
        rediscovered.seen_on_scan = true;
        let stored = catalog.refresh_asset(&rediscovered).unwrap();
        assert_eq!(stored.thumbnail.as_deref(), Some("render"));
        assert_eq!(catalog.get_asset(&file.id, false).unwrap(), stored);

        let fresh = node("default", "y.gcode", false, Some(&root));
        assert_eq!(catalog.refresh_asset(&fresh).unwrap().thumbnail, None);
    }

    #[test]
    fn test_orphan_insert_is_rejected() {
        let catalog = MemoryCatalog::new();
        let root = node("default", "", true, None);
        let file = node("default", "x.stl", false, Some(&root));
        assert!(matches!(catalog.save_asset(&file), Err(CatalogError::InvalidArgument(_))));
    }

    #[test]
    fn test_delete_cascades_and_clears_thumbnails() {
        let catalog = MemoryCatalog::new();
        let root = node("default", "", true, None);
        let dir = node("default", "d", true, Some(&root));
        let mut file = node("default", "d/x.stl", false, Some(&dir));
        file.thumbnail = Some(file.id.clone());
        catalog.save_asset(&root).unwrap();
        catalog.save_asset(&dir).unwrap();
        catalog.save_asset(&file).unwrap();
        assert_eq!(catalog.get_asset(&root.id, false).unwrap().thumbnail, Some(file.id.clone()));

        let mut events = catalog.subscribe();
        catalog.delete_asset(&dir.id).unwrap();
        assert_eq!(catalog.len(), 1);
        assert_eq!(catalog.get_asset(&root.id, false).unwrap().thumbnail, None);
        assert!(matches!(catalog.get_asset(&file.id, false), Err(CatalogError::NotFound(_))));

        let first = events.try_recv().unwrap();
        assert_eq!(first.kind, CatalogEventKind::Delete);
    }

    #[test]
    fn test_mark_and_sweep_is_partitioned_by_backend() {
        let catalog = MemoryCatalog::new();
        let a_root = node("a", "", true, None);
        let a_file = node("a", "x.stl", false, Some(&a_root));
        let b_root = node("b", "", true, None);
        for asset in [&a_root, &a_file, &b_root] {
            catalog.save_asset(asset).unwrap();
        }

        assert_eq!(catalog.set_dirty_fs("a").unwrap(), 2);
        catalog.save_asset(&a_root).unwrap();
        assert_eq!(catalog.delete_unseen_in_fs("a").unwrap(), 1);

        assert!(catalog.get_asset(&a_root.id, false).is_ok());
        assert!(catalog.get_asset(&a_file.id, false).is_err());
        assert!(catalog.get_asset(&b_root.id, false).is_ok());
    }

    #[test]
    fn test_load_parents() {
        let catalog = MemoryCatalog::new();
        let root = node("default", "", true, None);
        let dir = node("default", "d", true, Some(&root));
        let mut file = node("default", "d/x.stl", false, Some(&dir));
        catalog.save_asset(&root).unwrap();
        catalog.save_asset(&dir).unwrap();
        catalog.save_asset(&file).unwrap();

        assert!(matches!(
            catalog.load_parents(&mut file, 0),
            Err(CatalogError::InvalidArgument(_))
        ));

        catalog.load_parents(&mut file, 1).unwrap();
        let parent = file.parent.as_ref().unwrap();
        assert_eq!(parent.id, dir.id);
        assert!(parent.parent.is_none());

        catalog.load_parents(&mut file, 5).unwrap();
        let grandparent = file.parent.as_ref().unwrap().parent.as_ref().unwrap();
        assert_eq!(grandparent.id, root.id);
    }

    #[test]
    fn test_deep_get_and_search() {
        let catalog = MemoryCatalog::new();
        let root = node("default", "", true, None);
        let dir = node("default", "gears", true, Some(&root));
        let mut file = node("default", "gears/Spur Gear.stl", false, Some(&dir));
        file.tags.push("printed".into());
        for asset in [&root, &dir, &file] {
            catalog.save_asset(asset).unwrap();
        }

        let deep = catalog.get_asset(&root.id, true).unwrap();
        assert_eq!(deep.nested.len(), 1);
        assert_eq!(deep.nested[0].nested.len(), 1);

        let hits = catalog.search(&SearchQuery::label("spur")).unwrap();
        assert_eq!(hits.len(), 1);
        let tagged = catalog
            .search(&SearchQuery { label: None, tags: vec!["printed".into()] })
            .unwrap();
        assert_eq!(tagged[0].id, file.id);
        assert_eq!(catalog.roots(false).unwrap().len(), 1);
        assert_eq!(catalog.children(&root.id).unwrap()[0].id, dir.id);
    }

    #[test]
    fn test_snapshot_round_trip() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("catalog.json");
        let catalog = MemoryCatalog::load(&path).unwrap();
        let root = node("default", "", true, None);
        catalog.insert_asset(&root).unwrap();
        catalog.persist().unwrap();

        let reloaded = MemoryCatalog::load(&path).unwrap();
        assert_eq!(reloaded.get_asset(&root.id, false).unwrap(), root);
    }
}
