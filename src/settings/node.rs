//! The in-memory settings handle: a disk snapshot plus an edited view.

use std::collections::BTreeMap;

use serde_json::Value;

use crate::core::{ChangeKind, ItemChange, compute_changes};
use crate::db::{Database, TxnAssert, TxnOp, UpdateSpec};

use super::ops::{
    SettingsError, VERSION_FIELD, fetch, settings_field, write_abort,
};

/// A settings node: local edits over the last-observed stored payload.
///
/// `core` is the editable view; `disk` is the payload last read from or
/// written to storage. Local mutators never touch storage; `read` and
/// `write` are the only round-trips. The node is a snapshot handle, not a
/// merging editor: `read` discards local edits wholesale.
#[derive(Clone, Debug)]
pub struct Settings {
    key: String,
    collection: String,
    db: Database,
    version: u64,
    txn_revno: u64,
    disk: BTreeMap<String, Value>,
    core: BTreeMap<String, Value>,
}

impl Settings {
    /// A node that has not observed storage yet: empty views, sentinel
    /// revision token.
    pub(super) fn detached(db: Database, collection: &str, key: &str) -> Self {
        Self {
            key: key.to_string(),
            collection: collection.to_string(),
            db,
            version: 0,
            txn_revno: 0,
            disk: BTreeMap::new(),
            core: BTreeMap::new(),
        }
    }

    /// Install a payload as both views, as after a successful round-trip.
    pub(super) fn install(&mut self, payload: BTreeMap<String, Value>, version: u64, revno: u64) {
        self.disk = payload;
        self.core = self.disk.clone();
        self.version = version;
        self.txn_revno = revno;
    }

    pub(super) fn disk(&self) -> &BTreeMap<String, Value> {
        &self.disk
    }

    pub(super) fn txn_revno(&self) -> u64 {
        self.txn_revno
    }

    /// The settings key this node tracks.
    pub fn key(&self) -> &str {
        &self.key
    }

    /// Stored payload version at the last read or write.
    pub fn version(&self) -> u64 {
        self.version
    }

    /// Current value of `key` in the edited view.
    pub fn get(&self, key: &str) -> Option<&Value> {
        self.core.get(key)
    }

    /// Set `key` in the edited view. Storage is untouched until `write`.
    pub fn set(&mut self, key: impl Into<String>, value: impl Into<Value>) {
        self.core.insert(key.into(), value.into());
    }

    /// Drop `key` from the edited view. A key that never reached storage
    /// simply disappears: the next flush emits no change for it.
    pub fn delete(&mut self, key: &str) {
        self.core.remove(key);
    }

    /// Set every entry of `values` in the edited view. Keys absent from
    /// `values` are left alone.
    pub fn update(&mut self, values: impl IntoIterator<Item = (String, Value)>) {
        self.core.extend(values);
    }

    /// A copy of the edited view. Never aliases the node's state.
    pub fn map(&self) -> BTreeMap<String, Value> {
        self.core.clone()
    }

    /// Keys of the edited view, ascending.
    pub fn keys(&self) -> Vec<String> {
        self.core.keys().cloned().collect()
    }

    /// Refetch the document, replacing both views with the stored payload
    /// and discarding local edits. Callers wanting to keep edits must diff
    /// against [`Settings::map`] before calling this.
    pub fn read(&mut self) -> Result<(), SettingsError> {
        let (revno, data) = fetch(&self.db, &self.collection, &self.key)?;
        self.install(data.settings.into_inner(), data.version, revno);
        Ok(())
    }

    /// Flush local edits to storage and return what changed.
    ///
    /// An empty diff returns `[]` without touching storage, leaving the
    /// stored version alone. Otherwise the flush is a CAS against the
    /// revision token observed at the last round-trip: if another writer
    /// got there first, this fails with the conflict kind and the node is
    /// left as-is for the caller to re-read.
    pub fn write(&mut self) -> Result<Vec<ItemChange>, SettingsError> {
        let changes = compute_changes(&self.disk, &self.core);
        if changes.is_empty() {
            return Ok(changes);
        }

        let mut update = UpdateSpec::default();
        for change in &changes {
            let field = settings_field(&change.key);
            match change.kind {
                ChangeKind::Added | ChangeKind::Modified => {
                    let value = change.new_value.clone().unwrap_or(Value::Null);
                    update.set.push((field, value));
                }
                ChangeKind::Deleted => update.unset.push(field),
            }
        }
        update.inc.push((VERSION_FIELD.to_string(), 1));

        let op = TxnOp::Update {
            collection: self.collection.clone(),
            id: self.key.clone(),
            assert: TxnAssert::RevnoEq(self.txn_revno),
            update,
        };
        let receipt = self
            .db
            .run_transaction(std::slice::from_ref(&op))
            .map_err(|err| write_abort(&self.key, err))?;

        if let Some(op) = receipt.ops.first() {
            self.txn_revno = op.revno;
        }
        self.version += 1;
        self.disk = self.core.clone();
        tracing::debug!(
            collection = %self.collection,
            key = %self.key,
            changes = changes.len(),
            "settings flushed"
        );
        Ok(changes)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::settings::ops::create_settings;
    use serde_json::json;

    fn empty_node() -> Settings {
        create_settings(&Database::in_memory(), "settings", "config", BTreeMap::new())
            .expect("create settings")
    }

    #[test]
    fn local_mutators_never_touch_storage() {
        let mut node = empty_node();
        node.set("alpha", "beta");
        node.delete("alpha");
        node.set("one", 1);

        // Still only the empty create on disk.
        let view = node.db.collection("settings");
        let doc = view.find_id("config").expect("doc");
        assert_eq!(doc.field("settings"), Some(&json!({})));
        assert_eq!(doc.txn_revno, 1);
    }

    #[test]
    fn map_returns_a_detached_copy() {
        let mut node = empty_node();
        node.set("alpha", "beta");

        let mut copy = node.map();
        copy.insert("rogue".to_string(), json!(true));
        assert!(node.get("rogue").is_none());
    }

    #[test]
    fn keys_are_sorted() {
        let mut node = empty_node();
        node.set("zeta", 1);
        node.set("alpha", 2);
        node.set("mid", 3);
        assert_eq!(node.keys(), ["alpha", "mid", "zeta"]);
    }

    #[test]
    fn views_converge_by_copy_after_write() {
        let mut node = empty_node();
        node.set("alpha", "beta");
        node.write().expect("write");

        // disk and core agree but are independent maps: further edits to
        // core must not leak into the flushed baseline.
        node.set("alpha", "gamma");
        let changes = node.write().expect("write");
        assert_eq!(
            changes,
            vec![ItemChange::modified("alpha", json!("beta"), json!("gamma"))]
        );
    }
}
