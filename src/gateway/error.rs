use thiserror::Error;

use crate::storage::StorageError;

pub type BoxError = Box<dyn std::error::Error + Send + Sync>;

/// Terminal failures of a gateway endpoint.
#[derive(Debug, Error)]
#[non_exhaustive]
pub enum Error {
    /// A publish-path processor stage failed; carries the stage identity.
    #[error("pre-processor {processor} failed: {cause}")]
    PreProcessor {
        processor: String,
        #[source]
        cause: BoxError,
    },

    /// A fault from the records or positions storage.
    #[error(transparent)]
    Storage(#[from] StorageError),

    /// A request the typed surface cannot represent faithfully.
    ///
    /// Raised by transport bindings on malformed input; mapped to an
    /// internal error like every other kind in this version.
    #[error("protocol error: {0}")]
    Protocol(String),
}

pub type Result<T, E = Error> = std::result::Result<T, E>;
