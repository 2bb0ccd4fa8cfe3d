//! Transport-level error statuses.
//!
//! Every terminal endpoint error is mapped to a single status carrying the
//! original message; a transport binding translates [`Status`] into its own
//! error frame. No endpoint retries.

use tracing::error;

use crate::gateway::error::Error;

/// Transport status code.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[non_exhaustive]
pub enum Code {
    /// The single error kind surfaced in this version.
    Internal,
}

impl std::fmt::Display for Code {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Internal => f.write_str("internal"),
        }
    }
}

/// A terminal error as seen by the client.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Status {
    code: Code,
    message: String,
}

impl Status {
    pub fn internal(message: impl Into<String>) -> Self {
        Self {
            code: Code::Internal,
            message: message.into(),
        }
    }

    pub fn code(&self) -> Code {
        self.code
    }

    pub fn message(&self) -> &str {
        &self.message
    }
}

impl std::fmt::Display for Status {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}: {}", self.code, self.message)
    }
}

impl std::error::Error for Status {}

/// Map a terminal endpoint error onto its transport status.
pub(crate) fn map_terminal(endpoint: &'static str, err: Error) -> Status {
    error!(endpoint, error = %err, "terminal error");
    Status::internal(err.to_string())
}

#[cfg(test)]
mod tests {
    use super::*;

    use crate::storage::StorageError;

    #[test]
    fn status_carries_the_original_message() {
        let status = map_terminal("publish", Error::Storage(StorageError::new("broker gone")));

        assert_eq!(status.code(), Code::Internal);
        assert_eq!(status.message(), "broker gone");
        assert_eq!(status.to_string(), "internal: broker gone");
    }
}
