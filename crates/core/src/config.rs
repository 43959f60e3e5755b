use std::collections::HashSet;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use stockroom_api::{BackendKind, DEFAULT_BUNDLE_EXTENSIONS};

use crate::error::{Result, StockroomError};

/// Backend names reserved for the internal non-discoverable stores.
pub const CACHE_BACKEND: &str = "cache";
pub const GENERATED_BACKEND: &str = "generated";
pub const TEMP_BACKEND: &str = "temp";
pub const RESERVED_BACKENDS: &[&str] = &[CACHE_BACKEND, GENERATED_BACKEND, TEMP_BACKEND];

/// Suffixes of files the system writes next to assets itself.
/// Largest edge, in pixels, of the supersampled render target.
pub const MAX_RENDER_EDGE: u32 = 16_384;

pub const BUILTIN_BLACKLIST: &[&str] = &[".project.stlib", ".thumb.png", ".render.png"];

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct Config {
    pub data_path: PathBuf,
    pub library: LibraryConfig,
    pub render: RenderConfig,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            data_path: PathBuf::from("./data"),
            library: LibraryConfig::default(),
            render: RenderConfig::default(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct BackendConfig {
    pub name: String,
    pub location: PathBuf,
    #[serde(default = "default_kind")]
    pub kind: String,
    #[serde(default)]
    pub default: bool,
}

fn default_kind() -> String {
    BackendKind::Local.as_str().to_string()
}

impl BackendConfig {
    pub fn local(name: impl Into<String>, location: impl Into<PathBuf>) -> Self {
        Self {
            name: name.into(),
            location: location.into(),
            kind: default_kind(),
            default: false,
        }
    }

    pub fn git(name: impl Into<String>, location: impl Into<PathBuf>) -> Self {
        Self {
            kind: BackendKind::Git.as_str().to_string(),
            ..Self::local(name, location)
        }
    }

    pub fn backend_kind(&self) -> Result<BackendKind> {
        match self.kind.parse::<BackendKind>()? {
            BackendKind::Bundle => Err(StockroomError::UnsupportedBackendKind(self.kind.clone())),
            kind => Ok(kind),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct LibraryConfig {
    pub backends: Vec<BackendConfig>,
    pub blacklist: Vec<String>,
    pub ignore_dot_files: bool,
    pub render_bundles: bool,
    pub process_bundles: bool,
    pub traverse_bundles: bool,
    pub ancestor_depth: usize,
    pub bundle_extensions: Vec<String>,
}

impl Default for LibraryConfig {
    fn default() -> Self {
        Self {
            backends: Vec::new(),
            blacklist: Vec::new(),
            ignore_dot_files: true,
            render_bundles: false,
            process_bundles: true,
            traverse_bundles: true,
            ancestor_depth: 8,
            bundle_extensions: DEFAULT_BUNDLE_EXTENSIONS.iter().map(|s| s.to_string()).collect(),
        }
    }
}

impl LibraryConfig {
    /// Configured blacklist plus the built-in suffixes.
    pub fn effective_blacklist(&self) -> Vec<String> {
        let mut list = self.blacklist.clone();
        for s in BUILTIN_BLACKLIST {
            if !list.iter().any(|b| b == s) {
                list.push(s.to_string());
            }
        }
        list
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct RenderConfig {
    pub max_workers: usize,
    pub model_color: String,
    pub background_color: String,
    pub width: u32,
    pub height: u32,
    pub supersample: u32,
}

impl Default for RenderConfig {
    fn default() -> Self {
        Self {
            max_workers: 10,
            model_color: "#167DF0".to_string(),
            background_color: "#FFFFFF".to_string(),
            width: 1920,
            height: 1080,
            supersample: 1,
        }
    }
}

impl RenderConfig {
    pub fn model_rgb(&self) -> Result<[u8; 3]> {
        parse_hex_color(&self.model_color)
    }

    pub fn background_rgb(&self) -> Result<[u8; 3]> {
        parse_hex_color(&self.background_color)
    }

    /// Size of the supersampled render target.
    pub fn target_size(&self) -> Result<(u32, u32)> {
        render_target_size(self.width, self.height, self.supersample)
    }
}

/// Multiply both edges by `supersample`, rejecting targets past [`MAX_RENDER_EDGE`].
pub fn render_target_size(width: u32, height: u32, supersample: u32) -> Result<(u32, u32)> {
    let scale = |edge: u32| {
        edge.checked_mul(supersample)
            .filter(|e| *e <= MAX_RENDER_EDGE)
            .ok_or_else(|| {
                StockroomError::Config(format!(
                    "render target {}x{} at supersample {} exceeds {} pixels per edge",
                    width, height, supersample, MAX_RENDER_EDGE
                ))
            })
    };
    Ok((scale(width)?, scale(height)?))
}

impl Config {
    /// Read `path` when it exists, apply environment overrides and validate.
    pub fn load(path: Option<&Path>) -> Result<Self> {
        let mut config = match path {
            Some(p) if p.exists() => {
                let raw = std::fs::read_to_string(p)?;
                tracing::debug!("loading config from {}", p.display());
                Self::from_toml_str(&raw)?
            }
            Some(p) => {
                tracing::debug!("config file {} not found, using defaults", p.display());
                Self::default()
            }
            None => Self::default(),
        };
        config.apply_env_overrides(|key| std::env::var(key).ok());
        config.validate()?;
        Ok(config)
    }

    pub fn from_toml_str(raw: &str) -> Result<Self> {
        Ok(toml::from_str(raw)?)
    }

    pub fn apply_env_overrides<F>(&mut self, lookup: F)
    where
        F: Fn(&str) -> Option<String>,
    {
        if let Some(v) = lookup("DATA_PATH").filter(|v| !v.is_empty()) {
            self.data_path = PathBuf::from(v);
        }
        if self.library.backends.is_empty() {
            if let Some(v) = lookup("LIBRARY_PATH").filter(|v| !v.is_empty()) {
                let mut backend = BackendConfig::local("default", v);
                backend.default = true;
                self.library.backends.push(backend);
            }
        }
        if let Some(v) = lookup("MAX_RENDER_WORKERS") {
            match v.parse::<usize>() {
                Ok(n) => self.render.max_workers = n,
                Err(_) => tracing::warn!("ignoring invalid MAX_RENDER_WORKERS value: {}", v),
            }
        }
        if let Some(v) = lookup("MODEL_RENDER_COLOR").filter(|v| !v.is_empty()) {
            self.render.model_color = v;
        }
        if let Some(v) = lookup("MODEL_BACKGROUND_COLOR").filter(|v| !v.is_empty()) {
            self.render.background_color = v;
        }
    }

    pub fn validate(&self) -> Result<()> {
        let mut names = HashSet::new();
        for backend in &self.library.backends {
            if backend.name.is_empty() {
                return Err(StockroomError::Config("backend name must not be empty".into()));
            }
            if RESERVED_BACKENDS.contains(&backend.name.as_str()) {
                return Err(StockroomError::Config(format!(
                    "backend name '{}' is reserved",
                    backend.name
                )));
            }
            if !names.insert(backend.name.as_str()) {
                return Err(StockroomError::Config(format!(
                    "duplicate backend name '{}'",
                    backend.name
                )));
            }
            backend.backend_kind()?;
        }
        if self.render.max_workers == 0 {
            return Err(StockroomError::Config("render.max_workers must be positive".into()));
        }
        if self.render.width == 0 || self.render.height == 0 || self.render.supersample == 0 {
            return Err(StockroomError::Config("render dimensions must be positive".into()));
        }
        self.render.target_size()?;
        if self.library.ancestor_depth == 0 {
            return Err(StockroomError::Config("library.ancestor_depth must be positive".into()));
        }
        self.render.model_rgb()?;
        self.render.background_rgb()?;
        Ok(())
    }

    /// Name of the default backend: the one flagged `default`, else the first.
    pub fn default_backend(&self) -> Option<&str> {
        self.library
            .backends
            .iter()
            .find(|b| b.default)
            .or_else(|| self.library.backends.first())
            .map(|b| b.name.as_str())
    }
}

/// Parse `#RRGGBB` or `#RGB`.
pub fn parse_hex_color(raw: &str) -> Result<[u8; 3]> {
    let hex = raw.trim().trim_start_matches('#');
    let invalid = || StockroomError::Config(format!("invalid color: {}", raw));
    if !hex.chars().all(|c| c.is_ascii_hexdigit()) {
        return Err(invalid());
    }
    let expanded: String = match hex.len() {
        3 => hex.chars().flat_map(|c| [c, c]).collect(),
        6 => hex.to_string(),
        _ => return Err(invalid()),
    };
    let mut rgb = [0u8; 3];
    for (i, slot) in rgb.iter_mut().enumerate() {
        *slot = u8::from_str_radix(&expanded[i * 2..i * 2 + 2], 16).map_err(|_| invalid())?;
    }
    Ok(rgb)
}
