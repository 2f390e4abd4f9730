//! In-memory upstream emulating a streaming provider
//!
//! Models what a provider looks like from the broker's side: accounts with
//! secrets, a cap on concurrent streams per account, and optional
//! anti-sharing detection that rejects logins once too many distinct devices
//! appear in the recent login history.

use std::collections::{HashMap, HashSet};
use std::sync::{Arc, Mutex, PoisonError};

use rand::RngExt;
use tracing::{debug, info, warn};

use crate::{LoginError, Upstream};

/// Number of most recent logins inspected by anti-sharing detection.
const SHARING_WINDOW: usize = 20;

#[derive(Debug, Default)]
struct Account {
    secret: String,
    /// Tokens of the currently open streams.
    streams: Vec<String>,
    /// Device fingerprints of successful logins, oldest first.
    login_history: Vec<String>,
}

impl Account {
    /// Distinct devices among the recent logins, plus an optional candidate.
    fn distinct_devices(&self, candidate: Option<&str>) -> usize {
        let start = self.login_history.len().saturating_sub(SHARING_WINDOW);
        let mut devices: HashSet<&str> = self.login_history[start..]
            .iter()
            .map(String::as_str)
            .collect();
        if let Some(fp) = candidate {
            devices.insert(fp);
        }
        devices.len()
    }
}

/// Simulated streaming provider.
pub struct MockStreamingService {
    id: String,
    name: String,
    max_concurrent: usize,
    /// `Some(threshold)` enables anti-sharing: more than `threshold` distinct
    /// devices in the window rejects the login.
    anti_sharing_threshold: Option<usize>,
    accounts: Mutex<HashMap<String, Account>>,
}

impl MockStreamingService {
    pub fn new(id: impl Into<String>, name: impl Into<String>, max_concurrent: usize) -> Self {
        Self {
            id: id.into(),
            name: name.into(),
            max_concurrent,
            anti_sharing_threshold: None,
            accounts: Mutex::new(HashMap::new()),
        }
    }

    /// Enable anti-sharing detection with the given distinct-device threshold.
    pub fn with_anti_sharing(mut self, threshold: usize) -> Self {
        self.anti_sharing_threshold = Some(threshold);
        self
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    fn accounts(&self) -> std::sync::MutexGuard<'_, HashMap<String, Account>> {
        self.accounts.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

impl Upstream for MockStreamingService {
    fn id(&self) -> &str {
        &self.id
    }

    fn register_account(&self, identity: &str, secret: &str) {
        self.accounts().insert(
            identity.to_string(),
            Account {
                secret: secret.to_string(),
                ..Account::default()
            },
        );
        debug!(upstream = %self.id, identity, "account registered");
    }

    fn login(
        &self,
        identity: &str,
        secret: &str,
        device_fingerprint: Option<&str>,
    ) -> Result<String, LoginError> {
        let mut accounts = self.accounts();
        let account = match accounts.get_mut(identity) {
            Some(a) if a.secret == secret => a,
            _ => {
                warn!(upstream = %self.id, identity, "login rejected: invalid credentials");
                return Err(LoginError::InvalidCredentials);
            }
        };

        if account.streams.len() >= self.max_concurrent {
            debug!(upstream = %self.id, identity, "login rejected: stream limit");
            return Err(LoginError::MaxStreamsReached);
        }

        let mut rng = rand::rng();
        let fingerprint = match device_fingerprint {
            Some(fp) => fp.to_string(),
            None => format!("device-{}", rng.random_range(1000..10000)),
        };

        if let Some(threshold) = self.anti_sharing_threshold {
            if account.distinct_devices(Some(&fingerprint)) > threshold {
                warn!(upstream = %self.id, identity, "login rejected: sharing detected");
                return Err(LoginError::SharingDetected);
            }
        }

        let token = format!("tok-{}", rng.random_range(100_000..1_000_000));
        account.streams.push(token.clone());
        account.login_history.push(fingerprint);
        info!(upstream = %self.id, identity, streams = account.streams.len(), "stream opened");
        Ok(token)
    }

    fn end_stream(&self, identity: &str, token: &str) -> bool {
        let mut accounts = self.accounts();
        let Some(account) = accounts.get_mut(identity) else {
            return false;
        };
        match account.streams.iter().position(|t| t == token) {
            Some(idx) => {
                account.streams.remove(idx);
                debug!(upstream = %self.id, identity, "stream closed");
                true
            }
            None => false,
        }
    }

    fn active_session_count(&self, identity: &str) -> usize {
        self.accounts()
            .get(identity)
            .map(|a| a.streams.len())
            .unwrap_or(0)
    }

    fn is_account_flagged(&self, identity: &str) -> bool {
        let Some(threshold) = self.anti_sharing_threshold else {
            return false;
        };
        self.accounts()
            .get(identity)
            .is_some_and(|a| a.distinct_devices(None) > threshold)
    }
}

/// The demo provider set, keyed by catalog service id.
pub fn create_mock_services() -> HashMap<String, Arc<MockStreamingService>> {
    [
        MockStreamingService::new("mock-netflix", "Mock Netflix", 4).with_anti_sharing(8),
        MockStreamingService::new("mock-hulu", "Mock Hulu", 2),
        MockStreamingService::new("mock-disney", "Mock Disney+", 4).with_anti_sharing(6),
        MockStreamingService::new("mock-hbo", "Mock HBO Max", 3),
        MockStreamingService::new("mock-spotify", "Mock Spotify", 1).with_anti_sharing(4),
    ]
    .into_iter()
    .map(|svc| (svc.id.clone(), Arc::new(svc)))
    .collect()
}
