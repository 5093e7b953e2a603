//! Shared helpers for the integration tests.

#![allow(dead_code)]

use std::path::Path;
use std::sync::Once;

use memo_cache::Cache;
use tempfile::TempDir;

static TRACING: Once = Once::new();

/// Routes cache events to the test output. Set `RUST_LOG=memo_cache=debug`
/// to see them.
pub fn init_tracing() {
    TRACING.call_once(|| {
        let _ = tracing_subscriber::fmt()
            .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
            .with_test_writer()
            .try_init();
    });
}

/// A cache in a fresh temp directory. The directory also serves as the
/// install destination area.
pub fn temp_cache() -> (TempDir, Cache) {
    init_tracing();
    let dir = tempfile::tempdir().unwrap();
    let cache = Cache::open(dir.path().join("cache")).unwrap();
    (dir, cache)
}

/// Names in `dir`, sorted.
pub fn list(dir: &Path) -> Vec<String> {
    let mut names: Vec<String> = std::fs::read_dir(dir)
        .unwrap()
        .map(|e| e.unwrap().file_name().to_string_lossy().into_owned())
        .collect();
    names.sort();
    names
}
