mod common;

use std::io::Read;

use common::{library, png_bytes, write_file, zip_bytes};
use stockroom_api::{AssetKind, Catalog, NodeKind};
use stockroom_core::{BackendConfig, LibFs, ProcessorSet, StockroomError};
use tempfile::tempdir;

#[tokio::test(flavor = "multi_thread")]
async fn test_bundle_interior_is_read_only() {
    let lib = tempdir().unwrap();
    write_file(lib.path(), "archive.3mf", &zip_bytes(&[("model.stl", b"solid inner".as_slice())]));

    let t = library(vec![BackendConfig::local("default", lib.path())], Some(ProcessorSet::new()));
    t.library.scan_all().await.unwrap();

    let root = t.root("default");
    let bundle = t.by_path("default", "archive.3mf");
    let bundled = t.by_path("default", "model.stl");
    assert_eq!(bundle.parent_id.as_deref(), Some(root.id.as_str()));
    assert_eq!(bundled.parent_id.as_deref(), Some(bundle.id.as_str()));
    assert_eq!(bundled.node_kind, NodeKind::Bundled);

    let fs = t.library.processor().context().asset_fs(&bundled).unwrap();
    let mut content = String::new();
    fs.open("model.stl").unwrap().read_to_string(&mut content).unwrap();
    assert_eq!(content, "solid inner");
    assert!(!fs.writable());
    assert!(matches!(fs.create("new.stl"), Err(StockroomError::UnsupportedOperation { .. })));
    assert!(matches!(fs.mkdir("dir"), Err(StockroomError::UnsupportedOperation { .. })));
    assert!(matches!(fs.remove("model.stl"), Err(StockroomError::UnsupportedOperation { .. })));

    let (_, stat) = t.library.open(&bundled, "model.stl").unwrap();
    assert_eq!(stat.size, "solid inner".len() as u64);
}

#[tokio::test(flavor = "multi_thread")]
async fn test_nested_bundles_resolve_through_cache() {
    let lib = tempdir().unwrap();
    let inner = zip_bytes(&[("deep/part.stl", b"solid deep".as_slice())]);
    write_file(lib.path(), "outer.zip", &zip_bytes(&[("inner.zip", inner.as_slice())]));

    let t = library(vec![BackendConfig::local("default", lib.path())], Some(ProcessorSet::new()));
    t.library.scan_all().await.unwrap();

    let outer = t.by_path("default", "outer.zip");
    let inner_bundle = t.by_path("default", "inner.zip");
    let part = t.by_path("default", "deep/part.stl");
    assert_eq!(inner_bundle.node_kind, NodeKind::Bundle);
    assert_eq!(inner_bundle.root, outer.id);
    assert_eq!(part.root, inner_bundle.id);
    assert_eq!(part.kind, Some(AssetKind::Model));

    assert_eq!(t.library.read_asset(&part).unwrap(), b"solid deep");
    assert!(t.data.path().join("cache").join(&outer.id).join("inner.zip").exists());
}

#[tokio::test(flavor = "multi_thread")]
async fn test_removed_bundle_members_are_swept() {
    let lib = tempdir().unwrap();
    write_file(
        lib.path(),
        "kit.zip",
        &zip_bytes(&[("a.stl", b"solid a".as_slice()), ("b.stl", b"solid b".as_slice())]),
    );

    let t = library(vec![BackendConfig::local("default", lib.path())], Some(ProcessorSet::new()));
    t.library.scan_all().await.unwrap();
    let b = t.by_path("default", "b.stl");

    write_file(lib.path(), "kit.zip", &zip_bytes(&[("a.stl", b"solid a".as_slice())]));
    t.library.scan_all().await.unwrap();

    assert!(t.find_path("default", "a.stl").is_some());
    assert!(t.catalog.get_asset(&b.id, false).is_err());
}

#[tokio::test(flavor = "multi_thread")]
async fn test_tar_bundle() {
    let lib = tempdir().unwrap();
    let mut builder = tar::Builder::new(Vec::new());
    let data = b"solid tar";
    let mut header = tar::Header::new_gnu();
    header.set_size(data.len() as u64);
    header.set_mode(0o644);
    header.set_cksum();
    builder.append_data(&mut header, "models/part.stl", data.as_slice()).unwrap();
    write_file(lib.path(), "kit.tar", &builder.into_inner().unwrap());

    let t = library(vec![BackendConfig::local("default", lib.path())], Some(ProcessorSet::new()));
    t.library.scan_all().await.unwrap();

    assert_eq!(t.by_path("default", "models").node_kind, NodeKind::Bundled);
    let part = t.by_path("default", "models/part.stl");
    assert_eq!(t.library.read_asset(&part).unwrap(), b"solid tar");
}

#[tokio::test(flavor = "multi_thread")]
async fn test_3mf_images_become_children() {
    let lib = tempdir().unwrap();
    let plate = png_bytes(6, 4);
    write_file(
        lib.path(),
        "part.3mf",
        &zip_bytes(&[
            ("3D/3dmodel.model", b"<model/>".as_slice()),
            ("Metadata/plate_1.png", plate.as_slice()),
            ("Metadata/.thumbnails/thumb.png", plate.as_slice()),
        ]),
    );

    let t = library(vec![BackendConfig::local("default", lib.path())], None);
    t.library.scan_all().await.unwrap();

    let bundle = t.by_path("default", "part.3mf");
    let extracted: Vec<_> = t
        .catalog
        .children(&bundle.id)
        .unwrap()
        .into_iter()
        .filter(|a| a.backend_name == "generated")
        .collect();
    assert_eq!(extracted.len(), 1);
    assert_eq!(extracted[0].label, "plate_1");
    assert_eq!(extracted[0].path_str(), format!("{}.e1.png", bundle.id));
    assert_eq!(bundle.thumbnail.as_ref(), Some(&extracted[0].id));

    let generated = t.library.registry().generated().unwrap();
    assert_eq!(generated.read_all(extracted[0].path_str()).unwrap(), plate);
}

#[tokio::test(flavor = "multi_thread")]
async fn test_git_backend_caches_bundles() {
    let repo_dir = tempdir().unwrap();
    git2::Repository::init(repo_dir.path()).unwrap();
    write_file(repo_dir.path(), ".gitignore", b"*.log\n");
    write_file(repo_dir.path(), "build.log", b"noise");
    write_file(repo_dir.path(), "parts/a.stl", b"solid a");
    write_file(repo_dir.path(), "kit.zip", &zip_bytes(&[("b.stl", b"solid b".as_slice())]));

    let t = library(vec![BackendConfig::git("repo", repo_dir.path())], Some(ProcessorSet::new()));
    t.library.scan_all().await.unwrap();

    let root = t.root("repo");
    assert_eq!(root.backend_kind, stockroom_api::BackendKind::Git);
    assert!(t.find_path("repo", "build.log").is_none());
    assert!(t.find_path("repo", ".git").is_none());
    assert!(t.find_path("repo", "parts/a.stl").is_some());

    let b = t.by_path("repo", "b.stl");
    assert_eq!(t.library.read_asset(&b).unwrap(), b"solid b");
    assert!(t.data.path().join("cache").join("repo").join("kit.zip").exists());

    let fs = t.library.registry().get("repo").unwrap();
    assert!(matches!(fs.create("x.stl"), Err(StockroomError::UnsupportedOperation { .. })));
}
