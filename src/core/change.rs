//! Change deltas between a disk snapshot and an edited view.
//!
//! A flush reports exactly what it changed as an ordered list of
//! [`ItemChange`] records. Watchers and diff logs rely on this shape, so
//! the list is deterministic: sorted ascending by key, each key at most
//! once.

use std::collections::{BTreeMap, BTreeSet};
use std::fmt;

use serde::{Deserialize, Serialize};
use serde_json::{Number, Value};

/// What happened to a single key during a flush.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ChangeKind {
    Added,
    Modified,
    Deleted,
}

/// One entry of the change list returned by a settings flush.
///
/// `old_value` is `None` for `Added`; `new_value` is `None` for `Deleted`.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct ItemChange {
    pub kind: ChangeKind,
    pub key: String,
    pub old_value: Option<Value>,
    pub new_value: Option<Value>,
}

impl ItemChange {
    pub fn added(key: impl Into<String>, new_value: Value) -> Self {
        Self {
            kind: ChangeKind::Added,
            key: key.into(),
            old_value: None,
            new_value: Some(new_value),
        }
    }

    pub fn modified(key: impl Into<String>, old_value: Value, new_value: Value) -> Self {
        Self {
            kind: ChangeKind::Modified,
            key: key.into(),
            old_value: Some(old_value),
            new_value: Some(new_value),
        }
    }

    pub fn deleted(key: impl Into<String>, old_value: Value) -> Self {
        Self {
            kind: ChangeKind::Deleted,
            key: key.into(),
            old_value: Some(old_value),
            new_value: None,
        }
    }
}

impl fmt::Display for ItemChange {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let old = self.old_value.as_ref().unwrap_or(&Value::Null);
        let new = self.new_value.as_ref().unwrap_or(&Value::Null);
        match self.kind {
            ChangeKind::Added => write!(f, "setting added: {} = {}", self.key, new),
            ChangeKind::Modified => {
                write!(f, "setting modified: {} = {} (was {})", self.key, new, old)
            }
            ChangeKind::Deleted => write!(f, "setting deleted: {} (was {})", self.key, old),
        }
    }
}

/// Diff `before` against `after`.
///
/// Walks the key union in order, so the result is already sorted
/// ascending by key. Values that compare equal under [`values_equal`]
/// produce no entry.
pub fn compute_changes(
    before: &BTreeMap<String, Value>,
    after: &BTreeMap<String, Value>,
) -> Vec<ItemChange> {
    let keys: BTreeSet<&str> = before
        .keys()
        .chain(after.keys())
        .map(String::as_str)
        .collect();

    let mut changes = Vec::new();
    for key in keys {
        match (before.get(key), after.get(key)) {
            (None, Some(new)) => changes.push(ItemChange::added(key, new.clone())),
            (Some(old), None) => changes.push(ItemChange::deleted(key, old.clone())),
            (Some(old), Some(new)) if !values_equal(old, new) => {
                changes.push(ItemChange::modified(key, old.clone(), new.clone()));
            }
            _ => {}
        }
    }
    changes
}

/// Deep value equality.
///
/// Sequences compare element-wise, mappings recursively. Numbers compare
/// by numeric value across integer/float representations, but only when
/// the coercion is exact: `1 == 1.0`, `1 != 1.5`, and an integer too large
/// for `f64` never equals a float.
pub fn values_equal(a: &Value, b: &Value) -> bool {
    match (a, b) {
        (Value::Number(x), Value::Number(y)) => numbers_equal(x, y),
        (Value::Array(xs), Value::Array(ys)) => {
            xs.len() == ys.len() && xs.iter().zip(ys).all(|(x, y)| values_equal(x, y))
        }
        (Value::Object(xs), Value::Object(ys)) => {
            xs.len() == ys.len()
                && xs
                    .iter()
                    .all(|(k, x)| ys.get(k).is_some_and(|y| values_equal(x, y)))
        }
        _ => a == b,
    }
}

fn numbers_equal(x: &Number, y: &Number) -> bool {
    if x == y {
        return true;
    }
    // Cross-representation compare via f64, accepted only when both sides
    // survive the round-trip.
    let (Some(a), Some(b)) = (x.as_f64(), y.as_f64()) else {
        return false;
    };
    a == b && roundtrips_through_f64(x) && roundtrips_through_f64(y)
}

fn roundtrips_through_f64(n: &Number) -> bool {
    if let Some(i) = n.as_i64() {
        (i as f64) as i64 == i
    } else if let Some(u) = n.as_u64() {
        (u as f64) as u64 == u
    } else {
        true
    }
}
