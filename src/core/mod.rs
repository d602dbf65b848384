//! Core domain types for the settings store.
//!
//! - escape: reserved-character codec for stored field keys
//! - change: per-flush change deltas and deep value equality
//! - payload: the stored payload map with the escape tunnel

pub mod change;
pub mod escape;
pub mod payload;

pub use change::{ChangeKind, ItemChange, compute_changes, values_equal};
pub use escape::{escape_key, unescape_key};
pub use payload::SettingsPayload;
