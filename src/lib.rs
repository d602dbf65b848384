#![forbid(unsafe_code)]

pub mod config;
pub mod core;
pub mod db;
pub mod error;
pub mod settings;

pub use error::{Error, Transience};
pub type Result<T> = std::result::Result<T, Error>;

// Re-export the working surface at the crate root for convenience.
pub use crate::config::{ConfigError, StoreConfig};
pub use crate::core::{
    ChangeKind, ItemChange, SettingsPayload, compute_changes, escape_key, unescape_key,
    values_equal,
};
pub use crate::db::{
    CollectionRef, Database, Document, OpReceipt, TxnAssert, TxnError, TxnOp, TxnReceipt,
    UpdateSpec,
};
pub use crate::settings::{
    Settings, SettingsChanged, SettingsError, create_settings, list_settings, read_settings,
    remove_settings, replace_settings_op,
};
