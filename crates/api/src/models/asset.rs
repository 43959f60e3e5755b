use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

use super::classify::{AssetKind, BackendContext, BackendKind, NodeKind, classify, extension_of};
use super::identity::derive_id;

/// Open key/value bag filled by enrichers.
pub type Properties = BTreeMap<String, serde_json::Value>;

/// A node in the catalog tree.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Asset {
    pub id: String,
    pub label: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    /// Path relative to the backend root. `None` for nodes whose bytes live
    /// elsewhere, such as derived renders.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub path: Option<String>,
    pub root: String,
    pub backend_kind: BackendKind,
    pub backend_name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub extension: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub kind: Option<AssetKind>,
    pub node_kind: NodeKind,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub parent_id: Option<String>,
    /// Ancestor chain, only present after `Catalog::load_parents`.
    #[serde(skip)]
    pub parent: Option<Box<Asset>>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub nested: Vec<Asset>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub thumbnail: Option<String>,
    #[serde(default)]
    pub seen_on_scan: bool,
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub properties: Properties,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub tags: Vec<String>,
}

impl Asset {
    /// Build a node for `path` found on a backend.
    ///
    /// Without a parent the node is the top of its tree; directories then
    /// become `Root` nodes labelled after the backend.
    pub fn new(
        ctx: Option<&dyn BackendContext>,
        backend_name: &str,
        root: &str,
        path: &str,
        is_dir: bool,
        parent: Option<&Asset>,
    ) -> Self {
        let path = if path == "." { "" } else { path };
        let extension = extension_of(path);
        let class = classify(path, is_dir, parent.is_some(), ctx, &extension);

        let label = if path.is_empty() {
            backend_name.to_string()
        } else {
            file_stem(path).to_string()
        };

        Self {
            id: derive_id(backend_name, root, path),
            label,
            description: None,
            path: Some(path.to_string()),
            root: root.to_string(),
            backend_kind: class.backend_kind,
            backend_name: backend_name.to_string(),
            extension: (!extension.is_empty()).then_some(extension),
            kind: class.kind,
            node_kind: class.node_kind,
            parent_id: parent.map(|p| p.id.clone()),
            parent: None,
            nested: Vec::new(),
            thumbnail: None,
            seen_on_scan: false,
            properties: Properties::new(),
            tags: Vec::new(),
        }
    }

    /// Build a derived node that lives on an internal backend, such as a
    /// render or an image extracted from an archive.
    pub fn derived(
        backend_name: &str,
        root: &str,
        path: &str,
        label: impl Into<String>,
        parent: &Asset,
    ) -> Self {
        let extension = extension_of(path);
        Self {
            id: derive_id(backend_name, root, path),
            label: label.into(),
            description: None,
            path: Some(path.to_string()),
            root: root.to_string(),
            backend_kind: BackendKind::Local,
            backend_name: backend_name.to_string(),
            kind: AssetKind::from_extension(&extension),
            extension: (!extension.is_empty()).then_some(extension),
            node_kind: NodeKind::File,
            parent_id: Some(parent.id.clone()),
            parent: None,
            nested: Vec::new(),
            thumbnail: None,
            seen_on_scan: false,
            properties: Properties::new(),
            tags: Vec::new(),
        }
    }

    pub fn path_str(&self) -> &str {
        self.path.as_deref().unwrap_or("")
    }

    pub fn extension_str(&self) -> &str {
        self.extension.as_deref().unwrap_or("")
    }

    pub fn with_parent(mut self, parent: Asset) -> Self {
        self.parent_id = Some(parent.id.clone());
        self.parent = Some(Box::new(parent));
        self
    }

    /// Copy of the node without loaded relations, as stored by a catalog.
    pub fn detached(&self) -> Asset {
        Asset {
            parent: None,
            nested: Vec::new(),
            ..self.clone()
        }
    }

    /// Carry over data produced after discovery so a rescan does not erase it.
    pub fn merge_derived_from(&mut self, existing: &Asset) {
        if self.thumbnail.is_none() {
            self.thumbnail = existing.thumbnail.clone();
        }
        if self.description.is_none() {
            self.description = existing.description.clone();
        }
        for (k, v) in &existing.properties {
            self.properties.entry(k.clone()).or_insert_with(|| v.clone());
        }
        for tag in &existing.tags {
            if !self.tags.contains(tag) {
                self.tags.push(tag.clone());
            }
        }
    }
}

fn file_stem(path: &str) -> &str {
    let base = path.rsplit('/').next().unwrap_or(path);
    match base.rfind('.') {
        Some(0) | None => base,
        Some(idx) => &base[..idx],
    }
}
