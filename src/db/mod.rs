//! Embedded document engine: named collections, per-document revision
//! tokens, a transactional CAS primitive, optional on-disk snapshots.
//!
//! The engine is the storage collaborator the settings store runs
//! against: collections spring into existence on first insert, reads go
//! through scoped RAII views, and all isolation comes from running each
//! transaction under one write lock with check-then-apply semantics.

mod collection;
mod snapshot;
mod txn;

pub use collection::{CollectionRef, Document};
pub use txn::{OpReceipt, TxnAssert, TxnError, TxnOp, TxnReceipt, UpdateSpec};

use std::collections::{BTreeMap, BTreeSet};
use std::fmt;
use std::fs;
use std::path::PathBuf;
use std::sync::{Arc, RwLock};

use crate::config::StoreConfig;

use collection::Collection;

/// Handle to a document store. Cheap to clone; all clones share state.
#[derive(Clone)]
pub struct Database {
    inner: Arc<DbInner>,
}

struct DbInner {
    collections: RwLock<BTreeMap<String, Collection>>,
    data_dir: Option<PathBuf>,
    sync_writes: bool,
}

impl fmt::Debug for Database {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Database")
            .field("data_dir", &self.inner.data_dir)
            .finish_non_exhaustive()
    }
}

impl Database {
    /// A purely in-memory store. Nothing survives the handle.
    pub fn in_memory() -> Self {
        Self {
            inner: Arc::new(DbInner {
                collections: RwLock::new(BTreeMap::new()),
                data_dir: None,
                sync_writes: false,
            }),
        }
    }

    /// Open a store per `config`. With a data directory set, existing
    /// collection snapshots are reloaded and every committed transaction
    /// re-snapshots the collections it touched; without one this is
    /// [`Database::in_memory`].
    pub fn open(config: &StoreConfig) -> Result<Self, TxnError> {
        let Some(dir) = &config.data_dir else {
            return Ok(Self::in_memory());
        };
        fs::create_dir_all(dir).map_err(|source| TxnError::Io {
            path: dir.clone(),
            source,
        })?;
        let collections = snapshot::load_collections(dir)?;
        tracing::debug!(
            dir = %dir.display(),
            collections = collections.len(),
            "document store opened"
        );
        Ok(Self {
            inner: Arc::new(DbInner {
                collections: RwLock::new(collections),
                data_dir: Some(dir.clone()),
                sync_writes: config.sync_writes,
            }),
        })
    }

    /// Scoped read view over one collection. The view holds the store
    /// read lock; drop it to release. A collection that was never written
    /// reads as empty.
    pub fn collection(&self, name: &str) -> CollectionRef<'_> {
        CollectionRef {
            guard: self
                .inner
                .collections
                .read()
                .expect("document store lock poisoned"),
            name: name.to_string(),
        }
    }

    /// Run `ops` as one atomic transaction. Every assertion is checked
    /// against the pre-transaction state before any mutation applies; on
    /// an abort the store is untouched.
    pub fn run_transaction(&self, ops: &[TxnOp]) -> Result<TxnReceipt, TxnError> {
        let mut collections = self
            .inner
            .collections
            .write()
            .expect("document store lock poisoned");

        let receipt = match txn::run(&mut collections, ops) {
            Ok(receipt) => receipt,
            Err(err) => {
                tracing::debug!(ops = ops.len(), error = %err, "transaction aborted");
                return Err(err);
            }
        };

        if let Some(dir) = &self.inner.data_dir {
            let empty = Collection::default();
            let touched: BTreeSet<&str> = ops.iter().map(TxnOp::collection).collect();
            for name in touched {
                let coll = collections.get(name).unwrap_or(&empty);
                snapshot::persist_collection(dir, name, coll, self.inner.sync_writes)?;
            }
        }

        tracing::debug!(ops = ops.len(), "transaction committed");
        Ok(receipt)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::{Map, Value, json};

    fn insert(id: &str, settings: Value) -> TxnOp {
        let mut fields = Map::new();
        fields.insert("version".to_string(), json!(0));
        fields.insert("settings".to_string(), settings);
        TxnOp::Insert {
            collection: "settings".to_string(),
            id: id.to_string(),
            fields,
        }
    }

    #[test]
    fn collection_view_sees_committed_documents() {
        let db = Database::in_memory();
        db.run_transaction(&[insert("config", json!({"alpha": "beta"}))])
            .expect("insert");

        let view = db.collection("settings");
        let doc = view.find_id("config").expect("doc");
        assert_eq!(doc.txn_revno, 1);
        assert_eq!(doc.field("settings"), Some(&json!({"alpha": "beta"})));
        assert!(view.find_id("other").is_none());

        let empty = db.collection("never-written");
        assert!(empty.is_empty());
    }

    #[test]
    fn clones_share_state() {
        let db = Database::in_memory();
        let other = db.clone();
        db.run_transaction(&[insert("config", json!({}))])
            .expect("insert");

        assert!(other.collection("settings").find_id("config").is_some());
    }

    #[test]
    fn persistent_store_survives_reopen() {
        let dir = tempfile::tempdir().expect("tempdir");
        let config = StoreConfig {
            data_dir: Some(dir.path().to_path_buf()),
            ..StoreConfig::default()
        };

        let db = Database::open(&config).expect("open");
        db.run_transaction(&[insert("config", json!({"alpha": "beta"}))])
            .expect("insert");
        drop(db);

        let reopened = Database::open(&config).expect("reopen");
        let view = reopened.collection("settings");
        let doc = view.find_id("config").expect("doc");
        assert_eq!(doc.field("settings"), Some(&json!({"alpha": "beta"})));
        assert_eq!(doc.txn_revno, 1);
    }
}
