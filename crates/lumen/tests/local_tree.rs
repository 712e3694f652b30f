//! Discovery over a real directory tree through `LocalFileStore`.

use std::fs;
use std::sync::Arc;

use lumen::{
    Collaborators, ConsistencyMaintainer, EligibilityFilter, Finder, LumenConfig, Modality,
    TreeCrawler,
};
use lumen_store::{
    FileStore, LocalFileStore, LocalRegistry, MemoryStore, StorageId, UserId, WorkQueue,
};

fn open(dir: &std::path::Path) -> Arc<LocalFileStore> {
    Arc::new(
        LocalFileStore::open(
            dir,
            StorageId::new(3),
            UserId::new("alice"),
            LocalRegistry::default(),
        )
        .unwrap(),
    )
}

#[test]
fn test_scan_respects_markers_and_mime_types() {
    let dir = tempfile::tempdir().unwrap();
    fs::create_dir_all(dir.path().join("holiday")).unwrap();
    fs::create_dir_all(dir.path().join("scans")).unwrap();
    fs::write(dir.path().join("holiday/beach.jpg"), b"jpg").unwrap();
    fs::write(dir.path().join("holiday/waves.mp3"), b"mp3").unwrap();
    fs::write(dir.path().join("scans/receipt.png"), b"png").unwrap();
    fs::write(dir.path().join("scans/.noimage"), b"").unwrap();
    fs::write(dir.path().join("readme.txt"), b"hello").unwrap();

    let files = open(dir.path());
    let store = Arc::new(MemoryStore::new());
    let config = LumenConfig::default();
    let finders: Vec<Finder> = Modality::ALL
        .into_iter()
        .map(|modality| {
            let models = config
                .enabled_models_for(modality)
                .iter()
                .map(|m| m.name.to_string())
                .collect();
            let filter = EligibilityFilter::from_settings(&config.modality(modality).unwrap());
            Finder::queueing(filter, models, store.clone())
        })
        .collect();

    let root = files.root_node().unwrap();
    let stats = TreeCrawler::new(files.clone()).crawl(&UserId::new("alice"), &root, &finders);

    assert_eq!(stats.errors, 0);
    let beach = files
        .node_by_path(StorageId::new(3), "holiday/beach.jpg")
        .unwrap()
        .unwrap();
    let receipt = files
        .node_by_path(StorageId::new(3), "scans/receipt.png")
        .unwrap()
        .unwrap();
    assert_eq!(LocalFileStore::storage_of(beach.id), StorageId::new(3));
    assert_eq!(store.count("imagenet").unwrap(), 1);
    assert!(store.contains("imagenet", beach.id).unwrap());
    assert!(!store.contains("imagenet", receipt.id).unwrap());
    assert_eq!(store.count("musicnn").unwrap(), 1);
}

#[test]
fn test_marker_removed_on_disk_requeues_directory() {
    let dir = tempfile::tempdir().unwrap();
    fs::create_dir_all(dir.path().join("scans")).unwrap();
    fs::write(dir.path().join("scans/receipt.png"), b"png").unwrap();
    fs::write(dir.path().join("scans/.noimage"), b"").unwrap();

    let files = open(dir.path());
    let store = Arc::new(MemoryStore::new());
    let stores = Collaborators::new(files.clone(), store.clone());
    let maintainer = ConsistencyMaintainer::new(&stores, &LumenConfig::default()).unwrap();

    let marker = files
        .node_by_path(StorageId::new(3), "scans/.noimage")
        .unwrap()
        .unwrap();
    maintainer.node_deleted(&marker);
    fs::remove_file(dir.path().join("scans/.noimage")).unwrap();
    files.forget("scans/.noimage").unwrap();

    let receipt = files
        .node_by_path(StorageId::new(3), "scans/receipt.png")
        .unwrap()
        .unwrap();
    assert!(store.contains("imagenet", receipt.id).unwrap());
    assert!(store.contains("faces", receipt.id).unwrap());

    // And back: a new marker drops the directory again
    fs::write(dir.path().join("scans/.nomedia"), b"").unwrap();
    let marker = files
        .node_by_path(StorageId::new(3), "scans/.nomedia")
        .unwrap()
        .unwrap();
    maintainer.node_created(&marker);
    assert_eq!(store.count("imagenet").unwrap(), 0);
}
