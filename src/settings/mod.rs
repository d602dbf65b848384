//! The settings store: dirty-tracking nodes over versioned documents.
//!
//! Callers obtain a [`Settings`] node via [`create_settings`] or
//! [`read_settings`], edit it locally, and flush with
//! [`Settings::write`], which reports the exact change list. Concurrent
//! writers are isolated by the engine's CAS; a losing writer gets the
//! conflict kind and drives its own read-reset recovery.

mod node;
mod ops;

pub use node::Settings;
pub use ops::{
    SettingsChanged, SettingsError, create_settings, list_settings, read_settings,
    remove_settings, replace_settings_op,
};
