mod common;

use std::path::Path;
use std::sync::Arc;

use common::{TETRA_STL, library, library_in, write_file};
use stockroom_api::{AssetKind, BackendKind, Catalog, NodeKind, derive_id};
use stockroom_core::fs::ReadHandle;
use stockroom_core::processing::render_name;
use stockroom_core::{
    BackendConfig, Discoverer, DiscoveryOptions, FsEntry, FsStat, LibFs, ProcessorSet, Result, StockroomError,
};
use tempfile::tempdir;
use tokio_util::sync::CancellationToken;

#[tokio::test(flavor = "multi_thread")]
async fn test_rescan_is_idempotent() {
    let lib = tempdir().unwrap();
    write_file(lib.path(), "a.stl", TETRA_STL.as_bytes());
    write_file(lib.path(), "parts/b.stl", TETRA_STL.as_bytes());
    write_file(lib.path(), "parts/photo.png", &common::png_bytes(4, 4));

    let t = library(vec![BackendConfig::local("default", lib.path())], None);
    t.library.scan_all().await.unwrap();
    let first = t.assets();
    t.library.scan_all().await.unwrap();
    let second = t.assets();

    assert_eq!(first, second);
    let root = lib.path().to_string_lossy().into_owned();
    let b = t.by_path("default", "parts/b.stl");
    assert_eq!(b.id, derive_id("default", &root, "parts/b.stl"));
}

#[tokio::test(flavor = "multi_thread")]
async fn test_classification_of_discovered_nodes() {
    let lib = tempdir().unwrap();
    write_file(lib.path(), "dir/photo.png", &common::png_bytes(4, 4));
    write_file(lib.path(), "model.3mf", &common::zip_bytes(&[("3D/3dmodel.model", b"<model/>".as_slice())]));

    let t = library(vec![BackendConfig::local("default", lib.path())], Some(ProcessorSet::new()));
    let summary = t.library.scan_all().await.unwrap();
    assert_eq!(summary.backends.len(), 1);

    let root = t.root("default");
    assert_eq!(root.path_str(), "");
    assert_eq!(root.label, "default");

    let dir = t.by_path("default", "dir");
    assert_eq!(dir.node_kind, NodeKind::Dir);
    assert_eq!(dir.parent_id.as_deref(), Some(root.id.as_str()));

    let photo = t.by_path("default", "dir/photo.png");
    assert_eq!(photo.node_kind, NodeKind::File);
    assert_eq!(photo.kind, Some(AssetKind::Image));
    assert_eq!(photo.extension.as_deref(), Some(".png"));

    let bundle = t.by_path("default", "model.3mf");
    assert_eq!(bundle.node_kind, NodeKind::Bundle);
    let inner = t.by_path("default", "3D/3dmodel.model");
    assert_eq!(inner.node_kind, NodeKind::Bundled);
    assert_eq!(inner.root, bundle.id);
}

#[tokio::test(flavor = "multi_thread")]
async fn test_removed_files_are_swept() {
    let lib = tempdir().unwrap();
    let other = tempdir().unwrap();
    write_file(lib.path(), "a.stl", b"solid a");
    write_file(lib.path(), "b.stl", b"solid b");
    write_file(other.path(), "c.stl", b"solid c");

    let t = library(
        vec![
            BackendConfig::local("default", lib.path()),
            BackendConfig::local("other", other.path()),
        ],
        Some(ProcessorSet::new()),
    );
    t.library.scan_all().await.unwrap();
    let b = t.by_path("default", "b.stl");
    let c = t.by_path("other", "c.stl");

    std::fs::remove_file(lib.path().join("b.stl")).unwrap();
    let report = t.library.discover_backend("default").await.unwrap();

    assert_eq!(report.swept, 1);
    assert!(t.find_path("default", "a.stl").is_some());
    assert!(t.catalog.get_asset(&b.id, false).is_err());
    assert_eq!(t.catalog.get_asset(&c.id, false).unwrap(), c);
}

#[tokio::test(flavor = "multi_thread")]
async fn test_skip_rules_apply_during_walk() {
    let lib = tempdir().unwrap();
    write_file(lib.path(), ".hidden/a.stl", b"solid");
    write_file(lib.path(), "a.render.png", b"png");
    write_file(lib.path(), "scratch.tmp", b"tmp");
    write_file(lib.path(), "kept.stl", b"solid");

    let data = tempdir().unwrap();
    let mut config = common::config(data.path(), vec![BackendConfig::local("default", lib.path())]);
    config.library.blacklist = vec![".tmp".to_string()];
    let library = stockroom_core::Library::builder(config)
        .processors(ProcessorSet::new())
        .build()
        .unwrap();

    let report = library.discover_backend("default").await.unwrap();
    assert_eq!(report.seen, 2, "root and kept.stl only");
    let paths: Vec<String> = library
        .catalog()
        .assets_in_backend("default")
        .unwrap()
        .into_iter()
        .map(|a| a.path_str().to_string())
        .collect();
    assert!(paths.contains(&"kept.stl".to_string()));
    assert!(!paths.iter().any(|p| p.contains("hidden") || p.ends_with(".tmp") || p.ends_with(".render.png")));
}

#[tokio::test(flavor = "multi_thread")]
async fn test_unreadable_root_aborts_only_that_backend() {
    let lib = tempdir().unwrap();
    let missing = lib.path().join("does-not-exist");
    write_file(lib.path(), "a.stl", b"solid");

    let t = library(
        vec![
            BackendConfig::local("default", lib.path()),
            BackendConfig::local("gone", &missing),
        ],
        Some(ProcessorSet::new()),
    );
    let summary = t.library.scan_all().await.unwrap();
    assert!(!summary.is_complete());
    assert_eq!(summary.backends.len(), 1);
    assert_eq!(summary.backends[0].backend, "default");
    assert_eq!(summary.failures.len(), 1);
    let failure = &summary.failures[0];
    assert_eq!(failure.backend, "gone");
    assert!(matches!(failure.error, StockroomError::NotFound(_)), "{}", failure.error);

    assert!(t.find_path("default", "a.stl").is_some());
    assert!(t.catalog.assets_in_backend("gone").unwrap().is_empty());
}

#[tokio::test(flavor = "multi_thread")]
async fn test_broken_bundle_is_skipped() {
    let lib = tempdir().unwrap();
    write_file(lib.path(), "broken.zip", b"definitely not a zip");
    write_file(lib.path(), "legacy.7z", b"7z\xbc\xaf");
    write_file(lib.path(), "ok.stl", b"solid");

    let t = library(vec![BackendConfig::local("default", lib.path())], Some(ProcessorSet::new()));
    let summary = t.library.scan_all().await.unwrap();

    let report = &summary.backends[0];
    assert_eq!(report.failed, 2);
    assert_eq!(t.by_path("default", "broken.zip").node_kind, NodeKind::Bundle);
    assert!(t.find_path("default", "ok.stl").is_some());
}

#[tokio::test(flavor = "multi_thread")]
async fn test_rescan_keeps_derived_data() {
    let lib = tempdir().unwrap();
    write_file(lib.path(), "a.stl", TETRA_STL.as_bytes());
    let data = tempdir().unwrap();
    let data_path = data.path().to_path_buf();

    let t = library_in(data, vec![BackendConfig::local("default", lib.path())], None);
    t.library.scan_all().await.unwrap();
    let a = t.by_path("default", "a.stl");
    assert!(a.thumbnail.is_some());

    // Render output survives and is reused
    let before = std::fs::read_dir(data_path.join("generated")).unwrap().count();
    t.library.scan_all().await.unwrap();
    let after = std::fs::read_dir(data_path.join("generated")).unwrap().count();
    assert_eq!(before, after);
    assert_eq!(t.by_path("default", "a.stl").thumbnail, a.thumbnail);
}

/// Backend view that cancels the walk when one directory is listed.
struct CancelOnList {
    inner: Arc<dyn LibFs>,
    dir: &'static str,
    token: CancellationToken,
}

impl LibFs for CancelOnList {
    fn name(&self) -> &str {
        self.inner.name()
    }

    fn location(&self) -> &Path {
        self.inner.location()
    }

    fn root(&self) -> &str {
        self.inner.root()
    }

    fn kind(&self) -> BackendKind {
        self.inner.kind()
    }

    fn open(&self, path: &str) -> Result<ReadHandle> {
        self.inner.open(path)
    }

    fn stat(&self, path: &str) -> Result<FsStat> {
        self.inner.stat(path)
    }

    fn read_dir(&self, path: &str) -> Result<Vec<FsEntry>> {
        if path == self.dir {
            self.token.cancel();
        }
        self.inner.read_dir(path)
    }

    fn is_bundle(&self, path: &str) -> bool {
        self.inner.is_bundle(path)
    }

    fn is_discoverable(&self) -> bool {
        true
    }
}

#[tokio::test(flavor = "multi_thread")]
async fn test_cancelled_walk_skips_sweep() {
    let lib = tempdir().unwrap();
    write_file(lib.path(), "a/one.stl", b"solid");
    write_file(lib.path(), "b/two.stl", b"solid");
    write_file(lib.path(), "c/three.stl", b"solid");

    let t = library(vec![BackendConfig::local("default", lib.path())], Some(ProcessorSet::new()));
    t.library.discover_backend("default").await.unwrap();
    let before = t.assets();
    std::fs::remove_file(lib.path().join("c/three.stl")).unwrap();

    let token = CancellationToken::new();
    let discoverer = Arc::new(
        Discoverer::new(
            t.library.registry().clone(),
            t.library.catalog().clone(),
            t.library.processor().clone(),
            DiscoveryOptions::default(),
        )
        .with_cancel_token(token.clone()),
    );
    let fs = CancelOnList {
        inner: t.library.registry().get("default").unwrap(),
        dir: "b",
        token,
    };
    let result = tokio::task::spawn_blocking(move || discoverer.discover_backend(&fs))
        .await
        .unwrap();
    t.library.processor().wait().await.unwrap();

    assert!(matches!(result, Err(StockroomError::Cancelled)));
    let after = t.assets();
    assert_eq!(after.len(), before.len());
    let three = t.by_path("default", "c/three.stl");
    assert!(!three.seen_on_scan, "never reached by the cancelled walk");

    // The next complete walk sweeps it
    let report = t.library.discover_backend("default").await.unwrap();
    assert_eq!(report.swept, 1);
    assert!(t.find_path("default", "c/three.stl").is_none());
}

#[tokio::test(flavor = "multi_thread")]
async fn test_swept_renders_are_pruned() {
    let lib = tempdir().unwrap();
    write_file(lib.path(), "a.stl", TETRA_STL.as_bytes());
    write_file(lib.path(), "b.stl", TETRA_STL.as_bytes());

    let t = library(vec![BackendConfig::local("default", lib.path())], None);
    let first = t.library.scan_all().await.unwrap();
    assert_eq!(first.pruned, 0);
    let a = t.by_path("default", "a.stl");
    let b = t.by_path("default", "b.stl");
    let generated = t.library.registry().generated().unwrap();
    assert!(generated.exists(&render_name(&a)));

    std::fs::remove_file(lib.path().join("a.stl")).unwrap();
    let second = t.library.scan_all().await.unwrap();

    assert_eq!(second.pruned, 1);
    assert!(!generated.exists(&render_name(&a)));
    assert!(generated.exists(&render_name(&b)));
}

#[tokio::test(flavor = "multi_thread")]
async fn test_refused_jobs_are_not_counted_as_processed() {
    let lib = tempdir().unwrap();
    write_file(lib.path(), "a.stl", b"solid");
    write_file(lib.path(), "b.gcode", b"G28\n");

    let t = library(vec![BackendConfig::local("default", lib.path())], Some(ProcessorSet::new()));
    t.library.processor().cancel();
    let report = t.library.discover_backend("default").await.unwrap();

    assert_eq!(report.seen, 3);
    assert_eq!(report.processed, 0);
    assert_eq!(report.refused, 2);
}
