use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

use crate::error::UnknownBackendKind;

/// Position of a node in the catalog tree.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum NodeKind {
    Root,
    File,
    Dir,
    Bundle,
    Bundled,
}

impl NodeKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            NodeKind::Root => "root",
            NodeKind::File => "file",
            NodeKind::Dir => "dir",
            NodeKind::Bundle => "bundle",
            NodeKind::Bundled => "bundled",
        }
    }
}

impl fmt::Display for NodeKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Kind of store that resolves a node's bytes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum BackendKind {
    #[default]
    Local,
    Git,
    Bundle,
}

impl BackendKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            BackendKind::Local => "local",
            BackendKind::Git => "git",
            BackendKind::Bundle => "bundle",
        }
    }
}

impl fmt::Display for BackendKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for BackendKind {
    type Err = UnknownBackendKind;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "local" => Ok(BackendKind::Local),
            "git" => Ok(BackendKind::Git),
            "bundle" => Ok(BackendKind::Bundle),
            other => Err(UnknownBackendKind(other.to_string())),
        }
    }
}

/// Semantic content type of an asset.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AssetKind {
    Model,
    Image,
    Slice,
    Source,
    Dir,
    Bundle,
}

impl AssetKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            AssetKind::Model => "model",
            AssetKind::Image => "image",
            AssetKind::Slice => "slice",
            AssetKind::Source => "source",
            AssetKind::Dir => "dir",
            AssetKind::Bundle => "bundle",
        }
    }

    /// Map a file extension (with or without the leading dot) to a kind.
    pub fn from_extension(ext: &str) -> Option<Self> {
        let ext = ext.trim_start_matches('.').to_ascii_lowercase();
        match ext.as_str() {
            "png" | "jpg" | "jpeg" | "gif" | "bmp" | "webp" | "svg" => Some(AssetKind::Image),
            "stl" | "3mf" | "obj" | "ply" => Some(AssetKind::Model),
            "gcode" => Some(AssetKind::Slice),
            "stp" | "step" | "ste" | "fbx" | "f3d" | "f3z" | "iam" | "ipt" => {
                Some(AssetKind::Source)
            }
            _ => None,
        }
    }
}

impl fmt::Display for AssetKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

pub const DEFAULT_BUNDLE_EXTENSIONS: &[&str] = &[".zip", ".rar", ".7z", ".tar", ".3mf"];

/// Allow-list of archive extensions treated as bundles.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BundlePolicy {
    extensions: Vec<String>,
}

impl BundlePolicy {
    pub fn new<I, S>(extensions: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        let extensions = extensions
            .into_iter()
            .map(|e| normalize_extension(e.as_ref()))
            .filter(|e| !e.is_empty())
            .collect();
        Self { extensions }
    }

    pub fn extensions(&self) -> &[String] {
        &self.extensions
    }

    pub fn is_bundle(&self, path: &str) -> bool {
        let ext = extension_of(path);
        !ext.is_empty() && self.extensions.iter().any(|e| *e == ext)
    }
}

impl Default for BundlePolicy {
    fn default() -> Self {
        Self::new(DEFAULT_BUNDLE_EXTENSIONS)
    }
}

/// What a node needs to know about the backend it was found on.
pub trait BackendContext {
    fn is_bundle(&self, path: &str) -> bool;
    fn kind(&self) -> BackendKind;
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Classification {
    pub node_kind: NodeKind,
    pub backend_kind: BackendKind,
    pub kind: Option<AssetKind>,
}

/// Infer node type, backend kind and semantic kind for a path.
///
/// Bundle detection wins over bundle interiors, which win over the
/// directory/file split.
pub fn classify(
    path: &str,
    is_dir: bool,
    has_parent: bool,
    ctx: Option<&dyn BackendContext>,
    extension: &str,
) -> Classification {
    if let Some(ctx) = ctx {
        if ctx.is_bundle(path) {
            return Classification {
                node_kind: NodeKind::Bundle,
                backend_kind: BackendKind::Bundle,
                kind: Some(AssetKind::Bundle),
            };
        }
        if ctx.kind() == BackendKind::Bundle {
            return Classification {
                node_kind: NodeKind::Bundled,
                backend_kind: BackendKind::Bundle,
                kind: AssetKind::from_extension(extension),
            };
        }
    }

    let backend_kind = ctx.map(|c| c.kind()).unwrap_or_default();
    if is_dir {
        let node_kind = if has_parent { NodeKind::Dir } else { NodeKind::Root };
        return Classification {
            node_kind,
            backend_kind,
            kind: Some(AssetKind::Dir),
        };
    }

    Classification {
        node_kind: NodeKind::File,
        backend_kind,
        kind: AssetKind::from_extension(extension),
    }
}

/// Lower-cased extension of the last path segment, including the dot.
/// Returns an empty string when there is none.
pub fn extension_of(path: &str) -> String {
    let base = path.rsplit('/').next().unwrap_or(path);
    match base.rfind('.') {
        Some(idx) => base[idx..].to_ascii_lowercase(),
        None => String::new(),
    }
}

fn normalize_extension(ext: &str) -> String {
    let ext = ext.trim().to_ascii_lowercase();
    if ext.is_empty() || ext.starts_with('.') {
        ext
    } else {
        format!(".{}", ext)
    }
}
