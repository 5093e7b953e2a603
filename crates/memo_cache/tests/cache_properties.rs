//! End-to-end behavior of the cache through its public API.

mod common;

use std::io;
use std::path::Path;

use common::{list, temp_cache};
use memo_cache::{
    BlobStore, Cache, CacheError, ContentHash, EntryState, PublishMethod, Value, FILES_DIR,
};
use memo_config::CacheConfig;

// ---------------------------------------------------------------------------
// Keys
// ---------------------------------------------------------------------------

#[test]
fn equal_keys_share_an_entry() {
    let (_dir, cache) = temp_cache();
    let mut entry = cache.get_entry(&cache.make_key("parse", ["a.go"])).unwrap();
    entry.set_field("n", 1).unwrap();
    entry.save().unwrap();
    drop(entry);

    let again = cache
        .get_entry(&cache.make_key("parse".to_string(), vec!["a.go".to_string()]))
        .unwrap();
    assert_eq!(again.state(), EntryState::Loaded);
    assert_eq!(again.get_field("n"), &Value::Int(1));
}

#[test]
fn subject_order_separates_entries() {
    let (_dir, cache) = temp_cache();
    let ab = cache.make_key("gen", ["a.go", "b.go"]);
    let ba = cache.make_key("gen", ["b.go", "a.go"]);
    assert_ne!(ab.fingerprint().unwrap(), ba.fingerprint().unwrap());

    let mut entry = cache.get_entry(&ab).unwrap();
    entry.set_field("n", 1).unwrap();
    entry.save().unwrap();
    drop(entry);
    assert_eq!(cache.get_entry(&ba).unwrap().state(), EntryState::New);
}

// ---------------------------------------------------------------------------
// Content addressing
// ---------------------------------------------------------------------------

fn produce(cache: &Cache, op: &str, content: &[u8]) -> ContentHash {
    let mut entry = cache.get_entry(&cache.make_key(op, ["f"])).unwrap();
    entry.write(content).unwrap();
    entry.finalize().unwrap().unwrap()
}

#[test]
fn identical_content_shares_a_blob() {
    let (_dir, cache) = temp_cache();
    let a = produce(&cache, "one", b"same bytes");
    let b = produce(&cache, "two", b"same bytes");
    assert_eq!(a, b);
    assert_eq!(list(cache.blobs().dir()), vec![a.to_hex()]);
    assert_eq!(
        std::fs::read(cache.blobs().blob_path(&a)).unwrap(),
        b"same bytes"
    );
}

#[test]
fn different_content_gets_different_blobs() {
    let (_dir, cache) = temp_cache();
    let a = produce(&cache, "one", b"first");
    let b = produce(&cache, "two", b"second");
    assert_ne!(a, b);
    assert_eq!(list(cache.blobs().dir()).len(), 2);
}

#[test]
fn blobs_live_under_files_dir() {
    let (_dir, cache) = temp_cache();
    let id = produce(&cache, "one", b"x");
    assert_eq!(
        cache.blobs().blob_path(&id),
        cache.root().canonicalize().unwrap().join(FILES_DIR).join(id.to_hex())
    );
}

// ---------------------------------------------------------------------------
// Hit / miss round trip
// ---------------------------------------------------------------------------

#[test]
fn install_then_reload() {
    let (dir, cache) = temp_cache();
    let key = cache.make_key("mock", ["pkg/reader.go"]);
    let dest = dir.path().join("reader_mock.go");

    let mut entry = cache.get_entry(&key).unwrap();
    assert_eq!(entry.state(), EntryState::New);
    entry.write(b"package pkg\n\n").unwrap();
    entry.write(b"type MockReader struct{}\n").unwrap();
    entry.set_field("interfaces", vec![Value::from("Reader")]).unwrap();
    entry.install(&dest).unwrap();
    let written = entry.content_hash().unwrap().unwrap();
    drop(entry);

    assert_eq!(
        std::fs::read(&dest).unwrap(),
        b"package pkg\n\ntype MockReader struct{}\n"
    );

    let entry = cache.get_entry(&key).unwrap();
    assert_eq!(entry.state(), EntryState::Loaded);
    assert!(entry.has_field(&["interfaces"]));
    assert_eq!(
        entry.get_field("interfaces"),
        &Value::List(vec![Value::from("Reader")])
    );
    assert_eq!(entry.content_hash().unwrap(), Some(written));
}

#[test]
fn loaded_entry_installs_to_a_new_destination() {
    let (dir, cache) = temp_cache();
    let key = cache.make_key("mock", ["a.go"]);
    let mut entry = cache.get_entry(&key).unwrap();
    entry.write(b"generated").unwrap();
    entry.install(dir.path().join("first.go")).unwrap();
    drop(entry);

    let mut entry = cache.get_entry(&key).unwrap();
    let record_path = cache.metadata().record_path(entry.fingerprint());
    let saved_at = std::fs::metadata(&record_path).unwrap().modified().unwrap();
    entry.install(dir.path().join("second.go")).unwrap();
    assert_eq!(entry.state(), EntryState::Installed);
    assert_eq!(std::fs::read(dir.path().join("second.go")).unwrap(), b"generated");
    // Nothing changed, so the record was not rewritten.
    assert_eq!(
        std::fs::metadata(&record_path).unwrap().modified().unwrap(),
        saved_at
    );
}

// ---------------------------------------------------------------------------
// Usage errors
// ---------------------------------------------------------------------------

#[test]
fn reserved_field_is_rejected_without_side_effects() {
    let (_dir, cache) = temp_cache();
    let mut entry = cache.get_entry(&cache.make_key("parse", ["a.go"])).unwrap();
    entry.set_field("kept", 1).unwrap();

    let err = entry.set_field("_anything", 2).unwrap_err();
    assert!(err.is_usage_error());
    assert!(matches!(err, CacheError::ReservedField { ref name } if name == "_anything"));
    assert!(!entry.has_field(&["_anything"]));
    assert_eq!(entry.record().len(), 1);
}

#[test]
fn install_of_empty_entry_fails_loudly() {
    let (dir, cache) = temp_cache();
    let mut entry = cache.get_entry(&cache.make_key("parse", ["a.go"])).unwrap();
    let err = entry.install(dir.path().join("out")).unwrap_err();
    assert!(err.is_usage_error());
    assert!(!dir.path().join("out").exists());
}

// ---------------------------------------------------------------------------
// Atomicity
// ---------------------------------------------------------------------------

#[test]
fn uncommitted_metadata_is_never_visible() {
    let (_dir, cache) = temp_cache();
    let key = cache.make_key("parse", ["a.go"]);
    let fp = key.fingerprint().unwrap();

    let mut record = memo_cache::Record::new();
    record.insert("n", Value::from(1)).unwrap();
    // Stop between the temp write and the rename.
    let staged = cache.metadata().stage(&fp, &record).unwrap();
    assert!(staged.temp_path().is_file());
    assert_eq!(cache.get_entry(&key).unwrap().state(), EntryState::New);

    drop(staged);
    assert!(list(cache.metadata().dir()).is_empty());
    assert_eq!(cache.get_entry(&key).unwrap().state(), EntryState::New);
}

#[test]
fn abandoned_entry_leaves_no_files() {
    let (_dir, cache) = temp_cache();
    let key = cache.make_key("parse", ["a.go"]);
    {
        let mut entry = cache.get_entry(&key).unwrap();
        entry.write(b"half of a file").unwrap();
        entry.set_field("n", 1).unwrap();
    }
    assert!(list(cache.blobs().dir()).is_empty());
    assert!(list(cache.metadata().dir()).is_empty());
}

// ---------------------------------------------------------------------------
// Publishing
// ---------------------------------------------------------------------------

#[test]
fn install_twice_is_idempotent() {
    let (dir, cache) = temp_cache();
    let dest = dir.path().join("out.go");
    let mut entry = cache.get_entry(&cache.make_key("fmt", ["a.go"])).unwrap();
    entry.write(b"formatted").unwrap();

    let first = entry.install(&dest).unwrap();
    let second = entry.install(&dest).unwrap();
    assert_eq!(first, PublishMethod::HardLink);
    assert_eq!(second, PublishMethod::AlreadyPresent);
    assert_eq!(std::fs::read(&dest).unwrap(), b"formatted");
}

#[test]
fn install_over_foreign_file_fails() {
    let (dir, cache) = temp_cache();
    let dest = dir.path().join("out.go");
    std::fs::write(&dest, b"hand edited").unwrap();
    let mut entry = cache.get_entry(&cache.make_key("fmt", ["a.go"])).unwrap();
    entry.write(b"formatted").unwrap();

    let err = entry.install(&dest).unwrap_err();
    assert_eq!(err.io_kind(), Some(io::ErrorKind::AlreadyExists));
    assert_eq!(std::fs::read(&dest).unwrap(), b"hand edited");
}

fn cross_device(_: &Path, _: &Path) -> io::Result<()> {
    Err(io::Error::new(
        io::ErrorKind::Other,
        "Invalid cross-device link (os error 18)",
    ))
}

#[cfg(unix)]
#[test]
fn hard_link_failure_falls_back_to_symlink() {
    common::init_tracing();
    let dir = tempfile::tempdir().unwrap();
    let config = CacheConfig::with_root(dir.path().join("cache"));
    let cache = Cache::open(&config.cache.root).unwrap();
    let blobs = BlobStore::open(cache.root().join(FILES_DIR), &config)
        .unwrap()
        .with_hard_link(cross_device);
    let cache = cache.with_blob_store(blobs);

    let dest = dir.path().join("out.go");
    let mut entry = cache.get_entry(&cache.make_key("fmt", ["a.go"])).unwrap();
    entry.write(b"formatted").unwrap();
    assert_eq!(entry.install(&dest).unwrap(), PublishMethod::Symlink);

    let id = entry.content_hash().unwrap().unwrap();
    assert!(std::fs::symlink_metadata(&dest).unwrap().file_type().is_symlink());
    assert_eq!(std::fs::read_link(&dest).unwrap(), cache.blobs().blob_path(&id));
    assert_eq!(std::fs::read(&dest).unwrap(), b"formatted");
}

// ---------------------------------------------------------------------------
// Out-of-band producers
// ---------------------------------------------------------------------------

#[test]
fn write_via_matches_streamed_content() {
    let (dir, cache) = temp_cache();
    let streamed = produce(&cache, "stream", b"gofmt output\n");

    let mut entry = cache.get_entry(&cache.make_key("external", ["a.go"])).unwrap();
    let via = entry
        .write_via(|path| std::fs::write(path, b"gofmt output\n"))
        .unwrap();
    assert_eq!(via, streamed);

    entry.install(dir.path().join("a.go")).unwrap();
    assert_eq!(std::fs::read(dir.path().join("a.go")).unwrap(), b"gofmt output\n");
}

// ---------------------------------------------------------------------------
// Concurrency
// ---------------------------------------------------------------------------

#[test]
fn concurrent_producers_of_one_key_agree() {
    let (dir, cache) = temp_cache();
    let key = cache.make_key("gen", ["shared.go"]);

    std::thread::scope(|s| {
        for i in 0..4 {
            let cache = &cache;
            let key = &key;
            let dest = dir.path().join(format!("out{i}.go"));
            s.spawn(move || {
                let mut entry = cache.get_entry(key).unwrap();
                entry.write(b"deterministic output").unwrap();
                entry.set_field("version", 1).unwrap();
                entry.install(&dest).unwrap();
            });
        }
    });

    let blobs: Vec<_> = list(cache.blobs().dir());
    assert_eq!(blobs.len(), 1);
    let entry = cache.get_entry(&key).unwrap();
    assert_eq!(entry.get_field("version"), &Value::Int(1));
    for i in 0..4 {
        assert_eq!(
            std::fs::read(dir.path().join(format!("out{i}.go"))).unwrap(),
            b"deterministic output"
        );
    }
}
