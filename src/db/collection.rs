//! Documents and named collections.

use std::collections::BTreeMap;
use std::sync::RwLockReadGuard;

use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

/// One stored document: caller-supplied id, engine revision token, field
/// map. The revision token is the CAS basis; it starts at 1 on insert and
/// bumps on every applied mutating op.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Document {
    #[serde(rename = "_id")]
    pub id: String,
    #[serde(rename = "txn-revno")]
    pub txn_revno: u64,
    #[serde(flatten)]
    pub fields: Map<String, Value>,
}

impl Document {
    pub(crate) fn new(id: impl Into<String>, fields: Map<String, Value>) -> Self {
        Self {
            id: id.into(),
            txn_revno: 1,
            fields,
        }
    }

    /// Direct field access, no decoding. Raw readers of escaped payloads
    /// go through here.
    pub fn field(&self, name: &str) -> Option<&Value> {
        self.fields.get(name)
    }

    /// Decode the field map into a typed view. Custom deserialize hooks on
    /// the target (such as the payload escape tunnel) apply here.
    pub fn decode<T: DeserializeOwned>(&self) -> Result<T, serde_json::Error> {
        serde_json::from_value(Value::Object(self.fields.clone()))
    }
}

/// A named set of documents indexed by id.
#[derive(Clone, Debug, Default)]
pub(crate) struct Collection {
    docs: BTreeMap<String, Document>,
}

impl Collection {
    pub(crate) fn get(&self, id: &str) -> Option<&Document> {
        self.docs.get(id)
    }

    pub(crate) fn get_mut(&mut self, id: &str) -> Option<&mut Document> {
        self.docs.get_mut(id)
    }

    pub(crate) fn insert(&mut self, doc: Document) {
        self.docs.insert(doc.id.clone(), doc);
    }

    pub(crate) fn remove(&mut self, id: &str) -> Option<Document> {
        self.docs.remove(id)
    }

    pub(crate) fn len(&self) -> usize {
        self.docs.len()
    }

    pub(crate) fn documents(&self) -> impl Iterator<Item = &Document> {
        self.docs.values()
    }

    /// Documents whose id starts with `prefix`, in id order.
    pub(crate) fn scan_prefix<'a>(
        &'a self,
        prefix: &'a str,
    ) -> impl Iterator<Item = &'a Document> + 'a {
        self.docs
            .range(prefix.to_string()..)
            .map(|(_, doc)| doc)
            .take_while(move |doc| doc.id.starts_with(prefix))
    }

    pub(crate) fn from_documents(docs: Vec<Document>) -> Self {
        Self {
            docs: docs.into_iter().map(|doc| (doc.id.clone(), doc)).collect(),
        }
    }
}

/// Scoped read view over one collection: the "collection plus closer"
/// pair, as an RAII guard. Holding the view keeps the store read lock;
/// dropping it on any exit path releases the lock.
pub struct CollectionRef<'db> {
    pub(crate) guard: RwLockReadGuard<'db, BTreeMap<String, Collection>>,
    pub(crate) name: String,
}

impl CollectionRef<'_> {
    /// Look up one document by id.
    pub fn find_id(&self, id: &str) -> Option<&Document> {
        self.guard.get(&self.name)?.get(id)
    }

    /// Documents whose id starts with `prefix`, in id order. A collection
    /// that was never written scans as empty.
    pub fn scan_prefix<'a>(&'a self, prefix: &'a str) -> impl Iterator<Item = &'a Document> + 'a {
        self.guard
            .get(&self.name)
            .into_iter()
            .flat_map(move |coll| coll.scan_prefix(prefix))
    }

    pub fn len(&self) -> usize {
        self.guard.get(&self.name).map_or(0, Collection::len)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn doc(id: &str) -> Document {
        let mut fields = Map::new();
        fields.insert("version".to_string(), json!(0));
        Document::new(id, fields)
    }

    #[test]
    fn scan_prefix_selects_id_range() {
        let coll = Collection::from_documents(vec![
            doc("another#1"),
            doc("key#1"),
            doc("key#2"),
            doc("kez#1"),
        ]);

        let ids: Vec<&str> = coll.scan_prefix("key#").map(|d| d.id.as_str()).collect();
        assert_eq!(ids, ["key#1", "key#2"]);

        assert_eq!(coll.scan_prefix("missing#").count(), 0);
    }

    #[test]
    fn document_serde_uses_storage_field_names() {
        let value = serde_json::to_value(doc("config")).expect("serialize doc");
        assert_eq!(
            value,
            json!({"_id": "config", "txn-revno": 1, "version": 0})
        );

        let parsed: Document = serde_json::from_value(value).expect("parse doc");
        assert_eq!(parsed, doc("config"));
    }
}
