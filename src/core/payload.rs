//! The stored payload map and its escape tunnel.
//!
//! [`SettingsPayload`] owns the (unescaped key → value) mapping of one
//! settings document. Its serde impls apply the key codec from
//! [`super::escape`], so storage only ever holds escaped keys while typed
//! readers get caller keys back. Reading the stored value into a plain map
//! is part of the contract: raw readers see the escaped form, and some
//! external tooling depends on that.

use std::collections::BTreeMap;
use std::fmt;
use std::ops::{Deref, DerefMut};

use serde::de::{MapAccess, Visitor};
use serde::ser::SerializeMap;
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use serde_json::Value;

use super::escape::{escape_key, unescape_key};

/// One settings document's payload, keyed by unescaped caller keys.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct SettingsPayload(BTreeMap<String, Value>);

impl SettingsPayload {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn into_inner(self) -> BTreeMap<String, Value> {
        self.0
    }
}

impl From<BTreeMap<String, Value>> for SettingsPayload {
    fn from(entries: BTreeMap<String, Value>) -> Self {
        Self(entries)
    }
}

impl FromIterator<(String, Value)> for SettingsPayload {
    fn from_iter<I: IntoIterator<Item = (String, Value)>>(iter: I) -> Self {
        Self(iter.into_iter().collect())
    }
}

impl Deref for SettingsPayload {
    type Target = BTreeMap<String, Value>;

    fn deref(&self) -> &Self::Target {
        &self.0
    }
}

impl DerefMut for SettingsPayload {
    fn deref_mut(&mut self) -> &mut Self::Target {
        &mut self.0
    }
}

impl Serialize for SettingsPayload {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        let mut map = serializer.serialize_map(Some(self.0.len()))?;
        for (key, value) in &self.0 {
            map.serialize_entry(&escape_key(key), value)?;
        }
        map.end()
    }
}

impl<'de> Deserialize<'de> for SettingsPayload {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        deserializer.deserialize_map(PayloadVisitor)
    }
}

struct PayloadVisitor;

impl<'de> Visitor<'de> for PayloadVisitor {
    type Value = SettingsPayload;

    fn expecting(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("a settings payload map")
    }

    fn visit_map<A: MapAccess<'de>>(self, mut access: A) -> Result<Self::Value, A::Error> {
        let mut entries = BTreeMap::new();
        while let Some((key, value)) = access.next_entry::<String, Value>()? {
            entries.insert(unescape_key(&key), value);
        }
        Ok(SettingsPayload(entries))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn payload() -> SettingsPayload {
        [
            ("$dollar".to_string(), json!(1)),
            ("dotted.key".to_string(), json!(2)),
        ]
        .into_iter()
        .collect()
    }

    #[test]
    fn serialized_form_holds_escaped_keys() {
        let value = serde_json::to_value(payload()).expect("serialize payload");
        assert_eq!(
            value,
            json!({"\u{ff04}dollar": 1, "dotted\u{ff0e}key": 2})
        );
    }

    #[test]
    fn raw_map_decode_keeps_escaped_keys() {
        let bytes = serde_json::to_vec(&payload()).expect("serialize payload");

        // A plain map skips the decode hook and sees the escaped keys.
        let raw: BTreeMap<String, Value> =
            serde_json::from_slice(&bytes).expect("raw decode");
        assert_eq!(
            raw,
            [
                ("\u{ff04}dollar".to_string(), json!(1)),
                ("dotted\u{ff0e}key".to_string(), json!(2)),
            ]
            .into_iter()
            .collect()
        );

        // The typed payload restores caller keys.
        let typed: SettingsPayload = serde_json::from_slice(&bytes).expect("typed decode");
        assert_eq!(typed, payload());
    }

    #[test]
    fn nested_keys_and_values_are_untouched() {
        let mut payload = SettingsPayload::new();
        payload.insert(
            "outer.key".to_string(),
            json!({"inner_key": "a.literal $ string"}),
        );

        let value = serde_json::to_value(&payload).expect("serialize payload");
        assert_eq!(
            value,
            json!({"outer\u{ff0e}key": {"inner_key": "a.literal $ string"}})
        );
    }
}
