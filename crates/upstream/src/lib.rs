//! Upstream account providers
//!
//! Defines the `Upstream` trait the broker uses to talk to the service a
//! pooled credential actually logs into. The broker core never calls an
//! upstream itself; the server uses it to verify stored credentials and to
//! decide whether a failed login should disable a credential.
//!
//! `MockStreamingService` emulates the behavior of a real provider: account
//! registration, per-account concurrent stream limits, and anti-sharing
//! detection based on distinct device fingerprints.

pub mod mock;

pub use mock::{MockStreamingService, create_mock_services};

/// What a failed upstream login means for the credential that tried it.
///
/// - Transient: try again later on the same credential (stream limit hit)
/// - Permanent: the credential is unusable, disable it
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorClassification {
    Transient,
    Permanent,
}

/// Login failures reported by an upstream provider.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum LoginError {
    #[error("invalid credentials")]
    InvalidCredentials,

    #[error("max streams reached")]
    MaxStreamsReached,

    #[error("sharing detected")]
    SharingDetected,
}

impl LoginError {
    /// Stable label for logs and API bodies.
    pub fn label(&self) -> &'static str {
        match self {
            LoginError::InvalidCredentials => "invalid_credentials",
            LoginError::MaxStreamsReached => "max_streams_reached",
            LoginError::SharingDetected => "sharing_detected",
        }
    }

    /// Map a login failure onto the credential action it calls for.
    pub fn classify(&self) -> ErrorClassification {
        match self {
            LoginError::MaxStreamsReached => ErrorClassification::Transient,
            LoginError::InvalidCredentials | LoginError::SharingDetected => {
                ErrorClassification::Permanent
            }
        }
    }
}

/// A service whose accounts the broker pools.
///
/// Implementations must be safe to share across request handlers.
pub trait Upstream: Send + Sync {
    /// Service id this upstream backs (matches the catalog id).
    fn id(&self) -> &str;

    /// Create or replace an account.
    fn register_account(&self, identity: &str, secret: &str);

    /// Log in and open a stream. Returns the upstream session token.
    ///
    /// `device_fingerprint` identifies the connecting device for anti-sharing
    /// checks; `None` lets the upstream make one up.
    fn login(
        &self,
        identity: &str,
        secret: &str,
        device_fingerprint: Option<&str>,
    ) -> Result<String, LoginError>;

    /// Close a stream previously opened by `login`. Returns whether it existed.
    fn end_stream(&self, identity: &str, token: &str) -> bool;

    /// Number of streams currently open on an account.
    fn active_session_count(&self, identity: &str) -> usize;

    /// Whether anti-sharing detection currently flags the account.
    fn is_account_flagged(&self, identity: &str) -> bool;
}
