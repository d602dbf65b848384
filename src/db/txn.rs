//! The transactional CAS primitive over the collection map.
//!
//! A transaction is a list of ops, each carrying an assertion about the
//! pre-transaction state. Every assertion is checked against that state
//! before any mutation applies, so a transaction either commits whole or
//! leaves the store untouched.

use std::collections::BTreeMap;
use std::path::PathBuf;

use serde_json::{Map, Value};
use thiserror::Error;

use crate::core::values_equal;
use crate::error::Transience;

use super::collection::{Collection, Document};

/// Precondition on one document, checked before any mutation applies.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum TxnAssert {
    /// Document must not exist.
    Missing,
    /// Document must exist, any revision.
    Exists,
    /// Document must exist with exactly this revision token.
    RevnoEq(u64),
}

/// Field mutations applied to an existing document. Paths are
/// dot-separated; every segment is validated against the reserved
/// characters.
#[derive(Clone, Debug, Default)]
pub struct UpdateSpec {
    /// Field paths to set.
    pub set: Vec<(String, Value)>,
    /// Field paths to remove. Missing paths are a no-op.
    pub unset: Vec<String>,
    /// Numeric field paths to increment, created at zero when absent.
    pub inc: Vec<(String, i64)>,
}

impl UpdateSpec {
    pub fn is_empty(&self) -> bool {
        self.set.is_empty() && self.unset.is_empty() && self.inc.is_empty()
    }
}

/// One operation of a transaction.
#[derive(Clone, Debug)]
pub enum TxnOp {
    /// Insert a new document; asserts the id is free.
    Insert {
        collection: String,
        id: String,
        fields: Map<String, Value>,
    },
    /// Mutate fields of an existing document.
    Update {
        collection: String,
        id: String,
        assert: TxnAssert,
        update: UpdateSpec,
    },
    /// Delete a document.
    Remove {
        collection: String,
        id: String,
        assert: TxnAssert,
    },
}

impl TxnOp {
    pub(crate) fn collection(&self) -> &str {
        match self {
            TxnOp::Insert { collection, .. }
            | TxnOp::Update { collection, .. }
            | TxnOp::Remove { collection, .. } => collection,
        }
    }

    fn id(&self) -> &str {
        match self {
            TxnOp::Insert { id, .. } | TxnOp::Update { id, .. } | TxnOp::Remove { id, .. } => id,
        }
    }
}

/// Per-op outcome of a committed transaction.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct OpReceipt {
    /// Revision token after the commit (for removes, the token the
    /// document held when it was deleted).
    pub revno: u64,
    /// Whether the document's fields actually changed.
    pub changed: bool,
}

/// Outcome of a committed transaction, one receipt per op in order.
#[derive(Clone, Debug, Default)]
pub struct TxnReceipt {
    pub ops: Vec<OpReceipt>,
}

/// Engine failures. Assertion failures name the op that aborted the
/// transaction; nothing has been applied when one is returned.
#[derive(Debug, Error)]
#[non_exhaustive]
pub enum TxnError {
    #[error("document {collection}/{id} not found")]
    NotFound { collection: String, id: String },

    #[error("document {collection}/{id} already exists")]
    AlreadyExists { collection: String, id: String },

    #[error(
        "transaction aborted on {collection}/{id}: revision {expected} expected, found {actual}"
    )]
    RevnoMismatch {
        collection: String,
        id: String,
        expected: u64,
        actual: u64,
    },

    #[error("invalid field name `{name}`: {reason}")]
    InvalidField { name: String, reason: String },

    #[error("snapshot io for {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("snapshot decode for {path}: {source}")]
    Corrupt {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },
}

impl TxnError {
    pub fn transience(&self) -> Transience {
        match self {
            TxnError::RevnoMismatch { .. } => Transience::Retryable,
            TxnError::Io { .. } => Transience::Unknown,
            TxnError::NotFound { .. }
            | TxnError::AlreadyExists { .. }
            | TxnError::InvalidField { .. }
            | TxnError::Corrupt { .. } => Transience::Permanent,
        }
    }

    pub fn is_not_found(&self) -> bool {
        matches!(self, TxnError::NotFound { .. })
    }

    pub fn is_already_exists(&self) -> bool {
        matches!(self, TxnError::AlreadyExists { .. })
    }

    pub fn is_conflict(&self) -> bool {
        matches!(self, TxnError::RevnoMismatch { .. })
    }
}

/// Check every op against the pre-transaction state, then apply them all.
pub(crate) fn run(
    collections: &mut BTreeMap<String, Collection>,
    ops: &[TxnOp],
) -> Result<TxnReceipt, TxnError> {
    for op in ops {
        check(collections, op)?;
    }
    let receipts = ops.iter().map(|op| apply(collections, op)).collect();
    Ok(TxnReceipt { ops: receipts })
}

fn check(collections: &BTreeMap<String, Collection>, op: &TxnOp) -> Result<(), TxnError> {
    let existing = collections
        .get(op.collection())
        .and_then(|coll| coll.get(op.id()));

    match op {
        TxnOp::Insert { fields, .. } => {
            if existing.is_some() {
                return Err(TxnError::AlreadyExists {
                    collection: op.collection().to_string(),
                    id: op.id().to_string(),
                });
            }
            validate_fields(fields)
        }
        TxnOp::Update { assert, update, .. } => {
            check_assert(op, *assert, existing)?;
            for (path, value) in &update.set {
                validate_path(path)?;
                validate_value(value)?;
            }
            for path in &update.unset {
                validate_path(path)?;
            }
            for (path, _) in &update.inc {
                validate_path(path)?;
            }
            Ok(())
        }
        TxnOp::Remove { assert, .. } => check_assert(op, *assert, existing),
    }
}

fn check_assert(op: &TxnOp, assert: TxnAssert, existing: Option<&Document>) -> Result<(), TxnError> {
    match (assert, existing) {
        (TxnAssert::Missing, None) => Ok(()),
        (TxnAssert::Missing, Some(_)) => Err(TxnError::AlreadyExists {
            collection: op.collection().to_string(),
            id: op.id().to_string(),
        }),
        (TxnAssert::Exists | TxnAssert::RevnoEq(_), None) => Err(TxnError::NotFound {
            collection: op.collection().to_string(),
            id: op.id().to_string(),
        }),
        (TxnAssert::Exists, Some(_)) => Ok(()),
        (TxnAssert::RevnoEq(expected), Some(doc)) => {
            if doc.txn_revno == expected {
                Ok(())
            } else {
                Err(TxnError::RevnoMismatch {
                    collection: op.collection().to_string(),
                    id: op.id().to_string(),
                    expected,
                    actual: doc.txn_revno,
                })
            }
        }
    }
}

fn apply(collections: &mut BTreeMap<String, Collection>, op: &TxnOp) -> OpReceipt {
    let coll = collections.entry(op.collection().to_string()).or_default();
    match op {
        TxnOp::Insert { id, fields, .. } => {
            let doc = Document::new(id.clone(), fields.clone());
            let revno = doc.txn_revno;
            coll.insert(doc);
            OpReceipt {
                revno,
                changed: true,
            }
        }
        TxnOp::Update { id, update, .. } => {
            // Checked above: the document exists.
            let Some(doc) = coll.get_mut(id) else {
                return OpReceipt {
                    revno: 0,
                    changed: false,
                };
            };
            let before = doc.fields.clone();
            for (path, value) in &update.set {
                set_path(&mut doc.fields, path, value.clone());
            }
            for path in &update.unset {
                unset_path(&mut doc.fields, path);
            }
            for (path, delta) in &update.inc {
                inc_path(&mut doc.fields, path, *delta);
            }
            doc.txn_revno += 1;
            OpReceipt {
                revno: doc.txn_revno,
                changed: !values_equal(
                    &Value::Object(before),
                    &Value::Object(doc.fields.clone()),
                ),
            }
        }
        TxnOp::Remove { id, .. } => {
            let revno = coll.remove(id).map_or(0, |doc| doc.txn_revno);
            OpReceipt {
                revno,
                changed: true,
            }
        }
    }
}

fn set_path(fields: &mut Map<String, Value>, path: &str, value: Value) {
    match path.split_once('.') {
        None => {
            fields.insert(path.to_string(), value);
        }
        Some((head, rest)) => {
            let slot = fields
                .entry(head.to_string())
                .or_insert_with(|| Value::Object(Map::new()));
            if !matches!(slot, Value::Object(_)) {
                *slot = Value::Object(Map::new());
            }
            if let Value::Object(nested) = slot {
                set_path(nested, rest, value);
            }
        }
    }
}

fn unset_path(fields: &mut Map<String, Value>, path: &str) {
    match path.split_once('.') {
        None => {
            fields.remove(path);
        }
        Some((head, rest)) => {
            if let Some(Value::Object(nested)) = fields.get_mut(head) {
                unset_path(nested, rest);
            }
        }
    }
}

fn inc_path(fields: &mut Map<String, Value>, path: &str, delta: i64) {
    match path.split_once('.') {
        None => {
            let current = fields.get(path).and_then(Value::as_i64).unwrap_or(0);
            fields.insert(path.to_string(), Value::from(current.saturating_add(delta)));
        }
        Some((head, rest)) => {
            if let Some(Value::Object(nested)) = fields.get_mut(head) {
                inc_path(nested, rest, delta);
            }
        }
    }
}

fn validate_fields(fields: &Map<String, Value>) -> Result<(), TxnError> {
    for (name, value) in fields {
        validate_field_name(name)?;
        validate_value(value)?;
    }
    Ok(())
}

/// Field names at every nesting level must avoid the reserved characters;
/// escaping is the caller's concern.
fn validate_value(value: &Value) -> Result<(), TxnError> {
    match value {
        Value::Object(map) => validate_fields(map),
        Value::Array(items) => items.iter().try_for_each(validate_value),
        _ => Ok(()),
    }
}

fn validate_field_name(name: &str) -> Result<(), TxnError> {
    if name.is_empty() {
        return Err(TxnError::InvalidField {
            name: name.to_string(),
            reason: "empty".to_string(),
        });
    }
    for reserved in ['.', '$'] {
        if name.contains(reserved) {
            return Err(TxnError::InvalidField {
                name: name.to_string(),
                reason: format!("contains reserved character `{reserved}`"),
            });
        }
    }
    Ok(())
}

fn validate_path(path: &str) -> Result<(), TxnError> {
    if path.is_empty() {
        return Err(TxnError::InvalidField {
            name: path.to_string(),
            reason: "empty".to_string(),
        });
    }
    for segment in path.split('.') {
        validate_field_name(segment)?;
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn fields(entries: &[(&str, Value)]) -> Map<String, Value> {
        entries
            .iter()
            .map(|(k, v)| (k.to_string(), v.clone()))
            .collect()
    }

    fn insert_op(id: &str) -> TxnOp {
        TxnOp::Insert {
            collection: "settings".to_string(),
            id: id.to_string(),
            fields: fields(&[("version", json!(0)), ("settings", json!({}))]),
        }
    }

    #[test]
    fn insert_then_duplicate_insert_aborts() {
        let mut collections = BTreeMap::new();
        let receipt = run(&mut collections, &[insert_op("config")]).expect("first insert");
        assert_eq!(receipt.ops[0].revno, 1);

        let err = run(&mut collections, &[insert_op("config")]).expect_err("duplicate");
        assert!(err.is_already_exists());
    }

    #[test]
    fn update_checks_revno_and_bumps_it() {
        let mut collections = BTreeMap::new();
        run(&mut collections, &[insert_op("config")]).expect("insert");

        let update = TxnOp::Update {
            collection: "settings".to_string(),
            id: "config".to_string(),
            assert: TxnAssert::RevnoEq(1),
            update: UpdateSpec {
                set: vec![("settings.alpha".to_string(), json!("beta"))],
                inc: vec![("version".to_string(), 1)],
                ..UpdateSpec::default()
            },
        };
        let receipt = run(&mut collections, &[update.clone()]).expect("update");
        assert_eq!(receipt.ops[0], OpReceipt { revno: 2, changed: true });

        // Same assertion again: the token moved on, so the CAS loses.
        let err = run(&mut collections, &[update]).expect_err("stale revno");
        assert!(err.is_conflict());
        assert_eq!(err.transience(), Transience::Retryable);
    }

    #[test]
    fn aborted_transaction_applies_nothing() {
        let mut collections = BTreeMap::new();
        run(&mut collections, &[insert_op("config")]).expect("insert");

        let ops = [
            TxnOp::Update {
                collection: "settings".to_string(),
                id: "config".to_string(),
                assert: TxnAssert::Exists,
                update: UpdateSpec {
                    set: vec![("settings.alpha".to_string(), json!("beta"))],
                    ..UpdateSpec::default()
                },
            },
            TxnOp::Remove {
                collection: "settings".to_string(),
                id: "missing".to_string(),
                assert: TxnAssert::Exists,
            },
        ];
        let err = run(&mut collections, &ops).expect_err("second op fails the check");
        assert!(err.is_not_found());

        let doc = collections
            .get("settings")
            .and_then(|coll| coll.get("config"))
            .expect("doc still present");
        assert_eq!(doc.txn_revno, 1);
        assert_eq!(doc.field("settings"), Some(&json!({})));
    }

    #[test]
    fn unchanged_update_reports_changed_false() {
        let mut collections = BTreeMap::new();
        run(&mut collections, &[insert_op("config")]).expect("insert");

        let op = TxnOp::Update {
            collection: "settings".to_string(),
            id: "config".to_string(),
            assert: TxnAssert::Exists,
            update: UpdateSpec {
                set: vec![("version".to_string(), json!(0))],
                unset: vec!["settings.never-there".to_string()],
                ..UpdateSpec::default()
            },
        };
        let receipt = run(&mut collections, &[op]).expect("update");
        // The revision token still moves; only the fields are unchanged.
        assert_eq!(receipt.ops[0], OpReceipt { revno: 2, changed: false });
    }

    #[test]
    fn reserved_characters_are_rejected_at_the_boundary() {
        let mut collections = BTreeMap::new();
        let op = TxnOp::Insert {
            collection: "settings".to_string(),
            id: "config".to_string(),
            fields: fields(&[("settings", json!({"foo.alpha": 1}))]),
        };
        let err = run(&mut collections, &[op]).expect_err("reserved dot");
        assert!(matches!(err, TxnError::InvalidField { .. }));
        assert!(collections.is_empty());

        run(&mut collections, &[insert_op("config")]).expect("insert");
        let op = TxnOp::Update {
            collection: "settings".to_string(),
            id: "config".to_string(),
            assert: TxnAssert::Exists,
            update: UpdateSpec {
                set: vec![("settings.$bad".to_string(), json!(1))],
                ..UpdateSpec::default()
            },
        };
        let err = run(&mut collections, &[op]).expect_err("reserved dollar");
        assert!(matches!(err, TxnError::InvalidField { .. }));
    }
}
