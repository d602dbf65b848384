//! On-disk collection snapshots.
//!
//! Each collection persists as `<data_dir>/<name>.json`, a JSON array of
//! documents. Snapshots are replaced atomically: write to a temp file in
//! the same directory, optionally fsync, then rename over the old file.

use std::collections::BTreeMap;
use std::fs;
use std::path::Path;

use super::collection::{Collection, Document};
use super::txn::TxnError;

const SNAPSHOT_EXT: &str = "json";

pub(crate) fn load_collections(dir: &Path) -> Result<BTreeMap<String, Collection>, TxnError> {
    let mut collections = BTreeMap::new();
    if !dir.exists() {
        return Ok(collections);
    }

    let entries = fs::read_dir(dir).map_err(|source| TxnError::Io {
        path: dir.to_path_buf(),
        source,
    })?;
    for entry in entries {
        let entry = entry.map_err(|source| TxnError::Io {
            path: dir.to_path_buf(),
            source,
        })?;
        let path = entry.path();
        if path.extension().and_then(|ext| ext.to_str()) != Some(SNAPSHOT_EXT) {
            continue;
        }
        let Some(name) = path.file_stem().and_then(|stem| stem.to_str()) else {
            continue;
        };

        let bytes = fs::read(&path).map_err(|source| TxnError::Io {
            path: path.clone(),
            source,
        })?;
        let docs: Vec<Document> =
            serde_json::from_slice(&bytes).map_err(|source| TxnError::Corrupt {
                path: path.clone(),
                source,
            })?;
        collections.insert(name.to_string(), Collection::from_documents(docs));
    }
    Ok(collections)
}

pub(crate) fn persist_collection(
    dir: &Path,
    name: &str,
    collection: &Collection,
    sync_writes: bool,
) -> Result<(), TxnError> {
    let path = dir.join(format!("{name}.{SNAPSHOT_EXT}"));
    let docs: Vec<&Document> = collection.documents().collect();
    let bytes = serde_json::to_vec(&docs).map_err(|source| TxnError::Corrupt {
        path: path.clone(),
        source,
    })?;

    let temp = tempfile::NamedTempFile::new_in(dir).map_err(|source| TxnError::Io {
        path: dir.to_path_buf(),
        source,
    })?;
    fs::write(temp.path(), &bytes).map_err(|source| TxnError::Io {
        path: temp.path().to_path_buf(),
        source,
    })?;
    if sync_writes {
        temp.as_file().sync_all().map_err(|source| TxnError::Io {
            path: temp.path().to_path_buf(),
            source,
        })?;
    }
    temp.persist(&path).map_err(|err| TxnError::Io {
        path: path.clone(),
        source: err.error,
    })?;
    Ok(())
}
