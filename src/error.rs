use thiserror::Error;

use crate::config::ConfigError;
use crate::core::{ConcurrencyError, CoreError};
use crate::daemon::{CodecError, StoreError};

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
/// Not a "god error": it is a thin wrapper over canonical capability errors.
#[derive(Error, Debug)]
#[non_exhaustive]
pub enum Error {
    #[error(transparent)]
    Core(#[from] CoreError),

    #[error(transparent)]
    Concurrency(#[from] ConcurrencyError),

    #[error(transparent)]
    Store(#[from] StoreError),

    #[error(transparent)]
    Codec(#[from] CodecError),

    #[error(transparent)]
    Config(#[from] ConfigError),
}

impl Error {
    pub fn transience(&self) -> Transience {
        match self {
            // Engine errors are pure domain/input failures.
            Error::Core(_) | Error::Concurrency(_) | Error::Codec(_) => Transience::Permanent,
            Error::Store(err) => match err {
                StoreError::Io { .. } => Transience::Retryable,
                _ => Transience::Permanent,
            },
            Error::Config(_) => Transience::Permanent,
        }
    }
}
