//! Credential vault: issuance, obfuscated secrets, checkout accounting
//!
//! The vault is the only writer of a credential's occupancy counter. Checkout
//! does its capacity check and increment in a single store critical section,
//! so concurrent callers can never push a credential past its cap even when
//! they all picked the same credential from an earlier lookup.

use std::sync::Arc;

use common::Secret;
use tracing::{debug, info, warn};

use crate::clock::Clock;
use crate::error::{Error, Result};
use crate::model::{Credential, CredentialState, Tier, new_id};
use crate::obfuscate::{Obfuscator, XorObfuscator};
use crate::store::Store;

pub struct CredentialVault {
    store: Arc<Store>,
    obfuscator: Box<dyn Obfuscator>,
    clock: Arc<dyn Clock>,
}

impl CredentialVault {
    /// Vault keyed from `passphrase` with the default XOR obfuscation.
    pub fn new(store: Arc<Store>, passphrase: &Secret<String>, clock: Arc<dyn Clock>) -> Self {
        Self::with_obfuscator(
            store,
            Box::new(XorObfuscator::from_passphrase(passphrase.expose())),
            clock,
        )
    }

    pub fn with_obfuscator(
        store: Arc<Store>,
        obfuscator: Box<dyn Obfuscator>,
        clock: Arc<dyn Clock>,
    ) -> Self {
        Self {
            store,
            obfuscator,
            clock,
        }
    }

    /// Issue a credential for a service, storing its secret obfuscated.
    ///
    /// The effective cap is the lesser of the tier capacity and the service's
    /// per-credential stream cap.
    pub fn store_credential(
        &self,
        service_id: &str,
        identity: &str,
        secret: &str,
        tier: Tier,
    ) -> Result<Credential> {
        let service = self
            .store
            .get_service(service_id)
            .ok_or_else(|| Error::ServiceNotFound(service_id.to_string()))?;

        let credential = Credential {
            id: new_id(12),
            service_id: service_id.to_string(),
            identity: identity.to_string(),
            sealed_secret: self.obfuscator.encode(secret),
            tier,
            max_streams: tier.capacity().min(service.max_concurrent_streams),
            state: CredentialState::Available,
            active_sessions: 0,
            last_checkout_ms: None,
        };
        self.store.add_credential(credential.clone());
        info!(
            credential_id = %credential.id,
            service_id,
            tier = %tier,
            max_streams = credential.max_streams,
            "credential stored"
        );
        Ok(credential)
    }

    /// Take one slot on the credential if it has spare capacity.
    ///
    /// Returns the credential as it is after the increment, or `None` if it is
    /// unknown, disabled, or full.
    pub fn checkout(&self, credential_id: &str) -> Option<Credential> {
        let now = self.clock.now_millis();
        let checked = self
            .store
            .update_credential(credential_id, |c| {
                if !c.has_capacity() {
                    return None;
                }
                c.active_sessions += 1;
                c.state = CredentialState::CheckedOut;
                c.last_checkout_ms = Some(now);
                Some(c.clone())
            })
            .flatten();

        match &checked {
            Some(c) => debug!(
                credential_id,
                active_sessions = c.active_sessions,
                max_streams = c.max_streams,
                "credential checked out"
            ),
            None => debug!(credential_id, "checkout refused"),
        }
        checked
    }

    /// Release one slot. Floors at zero; unknown ids are ignored.
    pub fn checkin(&self, credential_id: &str) {
        let released = self.store.update_credential(credential_id, |c| {
            c.active_sessions = c.active_sessions.saturating_sub(1);
            if c.active_sessions == 0 && c.state == CredentialState::CheckedOut {
                c.state = CredentialState::Available;
            }
            c.active_sessions
        });
        match released {
            Some(active_sessions) => {
                debug!(credential_id, active_sessions, "credential checked in")
            }
            None => self.log_missing(credential_id, "checkin"),
        }
    }

    /// Plaintext secret for session setup.
    pub fn reveal_secret(&self, credential_id: &str) -> Option<Secret<String>> {
        let Some(credential) = self.store.get_credential(credential_id) else {
            self.log_missing(credential_id, "reveal");
            return None;
        };
        match self.obfuscator.decode(&credential.sealed_secret) {
            Ok(plain) => Some(Secret::new(plain)),
            Err(e) => {
                warn!(credential_id, error = %e, "stored secret unreadable");
                None
            }
        }
    }

    /// Permanently stop new checkouts. Sessions already holding the
    /// credential keep it until they end. Returns whether it existed.
    pub fn disable(&self, credential_id: &str) -> bool {
        let existed = self
            .store
            .update_credential(credential_id, |c| c.state = CredentialState::Disabled)
            .is_some();
        if existed {
            warn!(credential_id, "credential disabled");
        } else {
            self.log_missing(credential_id, "disable");
        }
        existed
    }

    /// Replace the stored secret. Returns whether the credential existed.
    pub fn rotate_secret(&self, credential_id: &str, new_secret: &str) -> bool {
        let sealed = self.obfuscator.encode(new_secret);
        let existed = self
            .store
            .update_credential(credential_id, |c| c.sealed_secret = sealed)
            .is_some();
        if existed {
            info!(credential_id, "credential secret rotated");
        } else {
            self.log_missing(credential_id, "rotate");
        }
        existed
    }

    /// Credentials of the service that are under their cap.
    pub fn available_credentials(&self, service_id: &str) -> Vec<Credential> {
        self.store.available_credentials(service_id)
    }

    pub fn get(&self, credential_id: &str) -> Option<Credential> {
        self.store.get_credential(credential_id)
    }

    fn log_missing(&self, credential_id: &str, operation: &str) {
        let err = Error::CredentialNotFound(credential_id.to_string());
        debug!(operation, error = %err, "ignoring vault operation");
    }
}
