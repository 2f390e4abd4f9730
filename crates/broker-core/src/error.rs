//! Error types for broker operations
//!
//! Only invalid references are errors. Running out of capacity is reported as
//! a queued session and ending a finished session is a no-op, so neither
//! appears here.

/// Errors from broker operations.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum Error {
    #[error("service not found: {0}")]
    ServiceNotFound(String),

    #[error("session not found: {0}")]
    SessionNotFound(String),

    #[error("credential not found: {0}")]
    CredentialNotFound(String),

    #[error("stored secret could not be decoded: {0}")]
    SecretDecode(String),
}

impl Error {
    /// Machine-readable error type for API bodies and logs.
    pub fn kind(&self) -> &'static str {
        match self {
            Error::ServiceNotFound(_) => "service_not_found",
            Error::SessionNotFound(_) => "session_not_found",
            Error::CredentialNotFound(_) => "credential_not_found",
            Error::SecretDecode(_) => "secret_decode",
        }
    }
}

/// Result alias for broker operations.
pub type Result<T> = std::result::Result<T, Error>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn display_names_the_missing_id() {
        let err = Error::ServiceNotFound("mock-netflix".into());
        assert_eq!(err.to_string(), "service not found: mock-netflix");
        assert_eq!(err.kind(), "service_not_found");
    }

    #[test]
    fn kinds_are_distinct() {
        let kinds = [
            Error::ServiceNotFound(String::new()).kind(),
            Error::SessionNotFound(String::new()).kind(),
            Error::CredentialNotFound(String::new()).kind(),
            Error::SecretDecode(String::new()).kind(),
        ];
        for (i, a) in kinds.iter().enumerate() {
            for b in &kinds[i + 1..] {
                assert_ne!(a, b);
            }
        }
    }
}
