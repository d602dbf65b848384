use thiserror::Error;

use crate::config::ConfigError;
use crate::db::TxnError;
use crate::settings::SettingsError;

/// Whether retrying this operation may succeed.
#[derive(Debug, Copy, Clone, Eq, PartialEq)]
pub enum Transience {
    /// Retry will never help without changing inputs/state.
    Permanent,
    /// Retry may help (transient contention/outage).
    Retryable,
    /// Unknown if retry will help.
    Unknown,
}

impl Transience {
    pub fn is_retryable(self) -> bool {
        matches!(self, Transience::Retryable)
    }
}

/// Crate-level convenience error.
///
/// Not a "god error": it is a thin wrapper over the canonical capability
/// errors.
#[derive(Error, Debug)]
#[non_exhaustive]
pub enum Error {
    #[error(transparent)]
    Settings(#[from] SettingsError),

    #[error(transparent)]
    Txn(#[from] TxnError),

    #[error(transparent)]
    Config(#[from] ConfigError),
}

impl Error {
    pub fn transience(&self) -> Transience {
        match self {
            Error::Settings(e) => e.transience(),
            Error::Txn(e) => e.transience(),
            Error::Config(e) => e.transience(),
        }
    }

    /// The required document was missing.
    pub fn is_not_found(&self) -> bool {
        match self {
            Error::Settings(e) => e.is_not_found(),
            Error::Txn(e) => e.is_not_found(),
            Error::Config(_) => false,
        }
    }

    /// An insert collided with an existing document.
    pub fn is_already_exists(&self) -> bool {
        match self {
            Error::Settings(e) => e.is_already_exists(),
            Error::Txn(e) => e.is_already_exists(),
            Error::Config(_) => false,
        }
    }

    /// A CAS lost the revision race; re-read and re-apply to continue.
    pub fn is_conflict(&self) -> bool {
        match self {
            Error::Settings(e) => e.is_conflict(),
            Error::Txn(e) => e.is_conflict(),
            Error::Config(_) => false,
        }
    }
}
