#![allow(dead_code)]

use std::io::{Cursor, Write};
use std::path::Path;
use std::sync::Arc;

use base64::Engine;
use base64::engine::general_purpose::STANDARD;
use image::{ImageFormat, Rgb, RgbImage};
use stockroom_api::{Asset, Catalog, NodeKind, SearchQuery};
use stockroom_core::{BackendConfig, Config, Library, MemoryCatalog, ProcessorSet};
use tempfile::{TempDir, tempdir};
use zip::write::SimpleFileOptions;

pub const TETRA_STL: &str = "solid tetra
facet normal 0 0 -1
 outer loop
  vertex 0 0 0
  vertex 0 1 0
  vertex 1 0 0
 endloop
endfacet
facet normal 0 -1 0
 outer loop
  vertex 0 0 0
  vertex 1 0 0
  vertex 0 0 1
 endloop
endfacet
facet normal -1 0 0
 outer loop
  vertex 0 0 0
  vertex 0 0 1
  vertex 0 1 0
 endloop
endfacet
facet normal 1 1 1
 outer loop
  vertex 1 0 0
  vertex 0 1 0
  vertex 0 0 1
 endloop
endfacet
endsolid tetra
";

pub struct TestLibrary {
    pub data: TempDir,
    pub catalog: Arc<MemoryCatalog>,
    pub library: Library,
}

impl TestLibrary {
    pub fn assets(&self) -> Vec<Asset> {
        let mut all = self.catalog.search(&SearchQuery::default()).unwrap();
        all.sort_by(|a, b| a.id.cmp(&b.id));
        all
    }

    pub fn by_path(&self, backend: &str, path: &str) -> Asset {
        self.catalog
            .assets_in_backend(backend)
            .unwrap()
            .into_iter()
            .find(|a| a.path_str() == path)
            .unwrap_or_else(|| panic!("no asset at {backend}:{path}"))
    }

    pub fn find_path(&self, backend: &str, path: &str) -> Option<Asset> {
        self.catalog
            .assets_in_backend(backend)
            .unwrap()
            .into_iter()
            .find(|a| a.path_str() == path)
    }

    pub fn root(&self, backend: &str) -> Asset {
        self.catalog
            .roots(false)
            .unwrap()
            .into_iter()
            .find(|a| a.backend_name == backend && a.node_kind == NodeKind::Root)
            .unwrap_or_else(|| panic!("no root for {backend}"))
    }
}

/// Config with small renders and the given backends.
pub fn config(data: &Path, backends: Vec<BackendConfig>) -> Config {
    let mut config = Config::default();
    config.data_path = data.to_path_buf();
    config.library.backends = backends;
    config.render.width = 64;
    config.render.height = 36;
    config.render.max_workers = 4;
    config
}

/// Build a library; `processors` of `None` uses the built-in set.
pub fn library(backends: Vec<BackendConfig>, processors: Option<ProcessorSet>) -> TestLibrary {
    let data = tempdir().unwrap();
    library_in(data, backends, processors)
}

pub fn library_in(data: TempDir, backends: Vec<BackendConfig>, processors: Option<ProcessorSet>) -> TestLibrary {
    let catalog = Arc::new(MemoryCatalog::new());
    let mut builder = Library::builder(config(data.path(), backends)).catalog(catalog.clone());
    if let Some(set) = processors {
        builder = builder.processors(set);
    }
    TestLibrary {
        library: builder.build().unwrap(),
        catalog,
        data,
    }
}

pub fn write_file(root: &Path, rel: &str, bytes: &[u8]) {
    let path = root.join(rel);
    if let Some(dir) = path.parent() {
        std::fs::create_dir_all(dir).unwrap();
    }
    std::fs::write(path, bytes).unwrap();
}

pub fn zip_bytes(files: &[(&str, &[u8])]) -> Vec<u8> {
    let mut zip = zip::ZipWriter::new(Cursor::new(Vec::new()));
    for (name, data) in files {
        zip.start_file(*name, SimpleFileOptions::default()).unwrap();
        zip.write_all(data).unwrap();
    }
    zip.finish().unwrap().into_inner()
}

pub fn png_bytes(width: u32, height: u32) -> Vec<u8> {
    let img = RgbImage::from_pixel(width, height, Rgb([10, 200, 10]));
    let mut out = Vec::new();
    img.write_to(&mut Cursor::new(&mut out), ImageFormat::Png).unwrap();
    out
}

pub fn thumbnail_block(width: u32, height: u32, data: &[u8]) -> String {
    let encoded = STANDARD.encode(data);
    let mut out = format!("; thumbnail begin {}x{} {}\n", width, height, encoded.len());
    for chunk in encoded.as_bytes().chunks(78) {
        out.push_str("; ");
        out.push_str(std::str::from_utf8(chunk).unwrap());
        out.push('\n');
    }
    out.push_str("; thumbnail end\n");
    out
}
