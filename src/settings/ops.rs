//! Free-standing operations over settings documents.
//!
//! Everything here is parameterised by the database handle, the collection
//! name, and (for single-document ops) the settings key. These functions
//! own the translation from engine aborts to settings error kinds.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use thiserror::Error;

use crate::core::{SettingsPayload, compute_changes, escape_key};
use crate::db::{Database, TxnAssert, TxnError, TxnOp, UpdateSpec};
use crate::error::Transience;

use super::node::Settings;

/// Document field holding the payload version counter.
pub(super) const VERSION_FIELD: &str = "version";

/// Document field holding the escaped payload map.
pub(super) const SETTINGS_FIELD: &str = "settings";

/// Version stored by `create`; the first payload-changing write moves it
/// to 1.
pub(super) const INITIAL_VERSION: u64 = 0;

/// Settings-level failures. Engine aborts arrive here already translated
/// into the kind the caller can act on.
#[derive(Debug, Error)]
#[non_exhaustive]
pub enum SettingsError {
    /// The settings document does not exist (never created, or removed).
    #[error("settings not found")]
    NotFound { key: String },

    #[error("cannot overwrite existing settings")]
    AlreadyExists { key: String },

    /// Another writer committed after this node's last observation. The
    /// caller decides whether to re-read and re-apply.
    #[error("settings for {key} changed concurrently")]
    Conflict { key: String },

    /// The payload cannot be stored or decoded as given.
    #[error("invalid settings payload for {key}: {reason}")]
    Invalid { key: String, reason: String },

    #[error(transparent)]
    Txn(#[from] TxnError),
}

impl SettingsError {
    pub fn transience(&self) -> Transience {
        match self {
            SettingsError::Conflict { .. } => Transience::Retryable,
            SettingsError::Txn(err) => err.transience(),
            SettingsError::NotFound { .. }
            | SettingsError::AlreadyExists { .. }
            | SettingsError::Invalid { .. } => Transience::Permanent,
        }
    }

    pub fn is_not_found(&self) -> bool {
        match self {
            SettingsError::NotFound { .. } => true,
            SettingsError::Txn(err) => err.is_not_found(),
            _ => false,
        }
    }

    pub fn is_already_exists(&self) -> bool {
        match self {
            SettingsError::AlreadyExists { .. } => true,
            SettingsError::Txn(err) => err.is_already_exists(),
            _ => false,
        }
    }

    pub fn is_conflict(&self) -> bool {
        match self {
            SettingsError::Conflict { .. } => true,
            SettingsError::Txn(err) => err.is_conflict(),
            _ => false,
        }
    }
}

/// Typed view of a settings document's fields. Decoding through
/// [`SettingsPayload`] is what unescapes the stored keys.
#[derive(Debug, Default, Serialize, Deserialize)]
pub(super) struct SettingsDoc {
    #[serde(default)]
    pub version: u64,
    #[serde(default)]
    pub settings: SettingsPayload,
}

/// Fetch and decode one settings document, returning its revision token
/// alongside the typed view.
pub(super) fn fetch(
    db: &Database,
    collection: &str,
    key: &str,
) -> Result<(u64, SettingsDoc), SettingsError> {
    let view = db.collection(collection);
    let doc = view.find_id(key).ok_or_else(|| SettingsError::NotFound {
        key: key.to_string(),
    })?;
    let data: SettingsDoc = doc.decode().map_err(|err| SettingsError::Invalid {
        key: key.to_string(),
        reason: err.to_string(),
    })?;
    Ok((doc.txn_revno, data))
}

/// The dot path of one escaped payload key inside the document.
pub(super) fn settings_field(key: &str) -> String {
    format!("{SETTINGS_FIELD}.{}", escape_key(key))
}

/// Translate an engine abort from a write-path transaction.
pub(super) fn write_abort(key: &str, err: TxnError) -> SettingsError {
    match err {
        TxnError::NotFound { .. } => SettingsError::NotFound {
            key: key.to_string(),
        },
        TxnError::RevnoMismatch { .. } => {
            tracing::warn!(key = %key, "settings write lost the revision race");
            SettingsError::Conflict {
                key: key.to_string(),
            }
        }
        TxnError::InvalidField { name, reason } => SettingsError::Invalid {
            key: key.to_string(),
            reason: format!("field `{name}`: {reason}"),
        },
        other => SettingsError::Txn(other),
    }
}

fn payload_value(key: &str, values: &BTreeMap<String, Value>) -> Result<Value, SettingsError> {
    serde_json::to_value(SettingsPayload::from(values.clone())).map_err(|err| {
        SettingsError::Invalid {
            key: key.to_string(),
            reason: err.to_string(),
        }
    })
}

/// Insert a new settings document and return its node.
///
/// Fails with the already-exists kind when the key is taken.
pub fn create_settings(
    db: &Database,
    collection: &str,
    key: &str,
    values: BTreeMap<String, Value>,
) -> Result<Settings, SettingsError> {
    let mut fields = Map::new();
    fields.insert(VERSION_FIELD.to_string(), Value::from(INITIAL_VERSION));
    fields.insert(SETTINGS_FIELD.to_string(), payload_value(key, &values)?);

    let op = TxnOp::Insert {
        collection: collection.to_string(),
        id: key.to_string(),
        fields,
    };
    let receipt = db
        .run_transaction(std::slice::from_ref(&op))
        .map_err(|err| match err {
            TxnError::AlreadyExists { .. } => SettingsError::AlreadyExists {
                key: key.to_string(),
            },
            TxnError::InvalidField { name, reason } => SettingsError::Invalid {
                key: key.to_string(),
                reason: format!("field `{name}`: {reason}"),
            },
            other => SettingsError::Txn(other),
        })?;

    let mut node = Settings::detached(db.clone(), collection, key);
    node.install(values, INITIAL_VERSION, receipt.ops.first().map_or(1, |op| op.revno));
    tracing::debug!(collection = %collection, key = %key, "settings created");
    Ok(node)
}

/// Read an existing settings document into a fresh node.
pub fn read_settings(db: &Database, collection: &str, key: &str) -> Result<Settings, SettingsError> {
    let mut node = Settings::detached(db.clone(), collection, key);
    node.read()?;
    Ok(node)
}

/// Delete a settings document. Fails with the not-found kind when the key
/// was never created or is already gone.
pub fn remove_settings(db: &Database, collection: &str, key: &str) -> Result<(), SettingsError> {
    let op = TxnOp::Remove {
        collection: collection.to_string(),
        id: key.to_string(),
        assert: TxnAssert::Exists,
    };
    db.run_transaction(std::slice::from_ref(&op))
        .map_err(|err| write_abort(key, err))?;
    tracing::debug!(collection = %collection, key = %key, "settings removed");
    Ok(())
}

/// Post-commit probe for [`replace_settings_op`]: reports whether the
/// caller's transaction actually changed the stored payload.
pub type SettingsChanged = Box<dyn FnOnce() -> Result<bool, SettingsError> + Send>;

/// Build an operation that replaces the whole payload of `key`, for use
/// inside a caller-owned transaction.
///
/// The op asserts the document is unchanged since the pre-read here, so a
/// concurrent writer aborts the caller's transaction instead of being
/// silently overwritten. The returned closure re-reads after commit and
/// reports whether the stored payload actually changed.
pub fn replace_settings_op(
    db: &Database,
    collection: &str,
    key: &str,
    values: BTreeMap<String, Value>,
) -> Result<(TxnOp, SettingsChanged), SettingsError> {
    let node = read_settings(db, collection, key)?;

    let mut update = UpdateSpec::default();
    for change in compute_changes(node.disk(), &values) {
        match change.new_value {
            Some(new_value) => update.set.push((settings_field(&change.key), new_value)),
            None => update.unset.push(settings_field(&change.key)),
        }
    }
    if !update.is_empty() {
        update.inc.push((VERSION_FIELD.to_string(), 1));
    }

    let op = TxnOp::Update {
        collection: collection.to_string(),
        id: key.to_string(),
        assert: TxnAssert::RevnoEq(node.txn_revno()),
        update,
    };

    let observed_version = node.version();
    let db = db.clone();
    let collection = collection.to_string();
    let key = key.to_string();
    let settings_changed: SettingsChanged = Box::new(move || {
        let latest = read_settings(&db, &collection, &key)?;
        Ok(latest.version() != observed_version)
    });
    Ok((op, settings_changed))
}

/// Decode every settings document whose key starts with `prefix`.
///
/// Keys are preserved verbatim; payload keys come back unescaped.
pub fn list_settings(
    db: &Database,
    collection: &str,
    prefix: &str,
) -> Result<BTreeMap<String, BTreeMap<String, Value>>, SettingsError> {
    let view = db.collection(collection);
    let mut nodes = BTreeMap::new();
    for doc in view.scan_prefix(prefix) {
        let data: SettingsDoc = doc.decode().map_err(|err| SettingsError::Invalid {
            key: doc.id.clone(),
            reason: err.to_string(),
        })?;
        nodes.insert(doc.id.clone(), data.settings.into_inner());
    }
    Ok(nodes)
}
