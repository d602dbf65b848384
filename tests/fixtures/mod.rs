//! Shared harness for settings store integration tests.

use charter_rs::{Database, StoreConfig};

/// Collection used by the suite; matches the configured default.
pub const SETTINGS: &str = "settings";

pub fn memory_db() -> Database {
    Database::in_memory()
}

/// A store rooted in a temp directory, reopenable to exercise snapshots.
/// The directory lives as long as the fixture.
pub struct TempStore {
    config: StoreConfig,
    _dir: tempfile::TempDir,
}

impl TempStore {
    pub fn new() -> Self {
        let dir = tempfile::tempdir().expect("temp store dir");
        let config = StoreConfig {
            data_dir: Some(dir.path().to_path_buf()),
            ..StoreConfig::default()
        };
        Self { config, _dir: dir }
    }

    pub fn open(&self) -> Database {
        Database::open(&self.config).expect("open store")
    }
}
