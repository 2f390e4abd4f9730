//! Session broker: admission control and queue draining
//!
//! Session lifecycle:
//! 1. `request_session` → a credential with spare capacity is checked out and
//!    the session starts `Active`; otherwise it waits `Queued`
//! 2. `end_session` → `Ended`; an active session releases its slot, is billed,
//!    and the freed slot goes to the head of the service's queue
//! 3. `enforce_max_duration` → sessions past their service's limit become
//!    `Expired`, are billed, and the queue is drained
//! 4. Ending a queued session cancels it; nothing is billed
//!
//! State changes are compare-and-update steps inside the store's lock: a
//! session is only admitted if it is still queued, only ended if it is still
//! active or queued. Two threads racing to end the same session therefore
//! produce exactly one usage record, and a drain never activates a session
//! that was canceled a moment earlier.

use std::sync::Arc;

use tracing::{debug, info, warn};

use crate::billing::BillingEngine;
use crate::clock::Clock;
use crate::error::{Error, Result};
use crate::model::{
    CredentialState, ServiceDefinition, ServiceStatus, Session, SessionEvent, SessionState,
    UsageRecord,
};
use crate::store::Store;
use crate::vault::CredentialVault;

pub struct SessionBroker {
    store: Arc<Store>,
    vault: Arc<CredentialVault>,
    billing: Arc<BillingEngine>,
    clock: Arc<dyn Clock>,
}

impl SessionBroker {
    pub fn new(
        store: Arc<Store>,
        vault: Arc<CredentialVault>,
        billing: Arc<BillingEngine>,
        clock: Arc<dyn Clock>,
    ) -> Self {
        Self {
            store,
            vault,
            billing,
            clock,
        }
    }

    /// Ask for a slot on a service.
    ///
    /// The returned session is `Active` if a credential was checked out and
    /// `Queued` otherwise, including when another caller won the race for the
    /// last slot between lookup and checkout. A queued session is followed by
    /// a drain, so it never waits next to a free slot.
    pub fn request_session(&self, user_id: &str, service_id: &str) -> Result<Session> {
        if self.store.get_service(service_id).is_none() {
            return Err(Error::ServiceNotFound(service_id.to_string()));
        }

        let now = self.clock.now_millis();
        let mut session = Session::queued(user_id, service_id, now);

        if let Some(candidate) = self.store.find_available_credential(service_id) {
            match self.vault.checkout(&candidate.id) {
                Some(credential) => {
                    session.apply(SessionEvent::Admit {
                        credential_id: credential.id,
                        at_ms: now,
                    });
                }
                None => debug!(
                    service_id,
                    credential_id = %candidate.id,
                    "lost capacity race, queueing"
                ),
            }
        }

        let mut session = self.store.add_session(session);

        // A slot freed between the capacity lookup and the insert had an
        // empty queue to drain; drain again now that this session is in it.
        if session.state == SessionState::Queued {
            self.drain_queue(service_id);
            if let Some(current) = self.store.get_session(&session.id) {
                session = current;
            }
        }

        let outcome = session.state.label();
        metrics::counter!(
            "broker_sessions_requested_total",
            "service" => service_id.to_string(),
            "outcome" => outcome
        )
        .increment(1);

        match session.state {
            SessionState::Active => info!(
                session_id = %session.id,
                user_id,
                service_id,
                credential_id = session.credential_id.as_deref().unwrap_or_default(),
                "session started"
            ),
            _ => info!(
                session_id = %session.id,
                user_id,
                service_id,
                queue_depth = self.store.queue_depth(service_id),
                "session queued"
            ),
        }
        Ok(session)
    }

    /// End a session.
    ///
    /// Active → ended: the credential is checked in, usage is recorded and
    /// returned, and the service's queue is drained. Queued → ended: a
    /// cancellation with nothing to bill. Unknown or already finished
    /// sessions are a no-op.
    pub fn end_session(&self, session_id: &str) -> Option<UsageRecord> {
        let now = self.clock.now_millis();
        let (previous, session) = self
            .store
            .update_session(session_id, |s| {
                s.apply(SessionEvent::End { at_ms: now })
                    .map(|previous| (previous, s.clone()))
            })
            .flatten()?;

        match previous {
            SessionState::Active => {
                info!(session_id, service_id = %session.service_id, "session ended");
                let record = self.release_and_bill(&session);
                self.drain_queue(&session.service_id);
                record
            }
            _ => {
                info!(session_id, service_id = %session.service_id, "queued session canceled");
                None
            }
        }
    }

    /// Expire every active session that has run longer than its service
    /// allows. Each affected service's queue is drained once after its
    /// credentials have been swept. Returns the expired session ids.
    pub fn enforce_max_duration(&self) -> Vec<String> {
        let mut expired = Vec::new();

        for service in self.store.list_services() {
            let expired_here = self.expire_overdue(&service);
            if expired_here.is_empty() {
                continue;
            }
            metrics::counter!("broker_sessions_expired_total", "service" => service.id.clone())
                .increment(expired_here.len() as u64);
            self.drain_queue(&service.id);
            expired.extend(expired_here);
        }

        if !expired.is_empty() {
            info!(expired = expired.len(), "max duration sweep reclaimed sessions");
        }
        expired
    }

    /// Zero-based position in the service's queue, if the session is queued.
    pub fn get_queue_position(&self, session_id: &str) -> Option<usize> {
        let session = self.store.get_session(session_id)?;
        if session.state != SessionState::Queued {
            return None;
        }
        self.store
            .queued_sessions_for_service(&session.service_id)
            .iter()
            .position(|s| s.id == session_id)
    }

    /// Capacity snapshot of a service.
    ///
    /// Total slots count only non-disabled credentials; used slots count every
    /// held slot, so a disabled credential still draining its sessions can make
    /// used exceed total. Available slots never go below zero.
    pub fn service_status(&self, service_id: &str) -> Result<ServiceStatus> {
        let service = self
            .store
            .get_service(service_id)
            .ok_or_else(|| Error::ServiceNotFound(service_id.to_string()))?;

        let credentials = self.store.credentials_for_service(service_id);
        let total_slots: u32 = credentials
            .iter()
            .filter(|c| c.state != CredentialState::Disabled)
            .map(|c| c.max_streams)
            .sum();
        let used_slots: u32 = credentials.iter().map(|c| c.active_sessions).sum();

        Ok(ServiceStatus {
            service_id: service.id,
            name: service.name,
            monthly_cost_cents: service.monthly_cost_cents,
            total_slots,
            used_slots,
            available_slots: total_slots.saturating_sub(used_slots),
            queue_depth: self.store.queue_depth(service_id),
            credential_count: credentials.len(),
        })
    }

    pub fn get_session(&self, session_id: &str) -> Result<Session> {
        self.store
            .get_session(session_id)
            .ok_or_else(|| Error::SessionNotFound(session_id.to_string()))
    }

    /// A user's currently active sessions.
    pub fn active_sessions(&self, user_id: &str) -> Vec<Session> {
        self.store.active_sessions_for_user(user_id)
    }

    /// Expire overdue sessions of one service; returns their ids.
    fn expire_overdue(&self, service: &ServiceDefinition) -> Vec<String> {
        let now = self.clock.now_millis();
        let limit_ms = service.max_session_duration_secs.saturating_mul(1000);
        let mut expired = Vec::new();

        for credential in self.store.credentials_for_service(&service.id) {
            for session in self.store.active_sessions_for_credential(&credential.id) {
                let Some(started) = session.started_at_ms else {
                    continue;
                };
                if now.saturating_sub(started) <= limit_ms {
                    continue;
                }

                // The session may have ended since the scan; only expire it if
                // it is still active.
                let Some(session) = self
                    .store
                    .update_session(&session.id, |s| {
                        s.apply(SessionEvent::Expire { at_ms: now }).map(|_| s.clone())
                    })
                    .flatten()
                else {
                    continue;
                };

                info!(
                    session_id = %session.id,
                    service_id = %service.id,
                    credential_id = %credential.id,
                    limit_secs = service.max_session_duration_secs,
                    "session expired"
                );
                self.release_and_bill(&session);
                expired.push(session.id);
            }
        }
        expired
    }

    /// Check the session's credential back in and record its usage.
    fn release_and_bill(&self, session: &Session) -> Option<UsageRecord> {
        if let Some(credential_id) = &session.credential_id {
            self.vault.checkin(credential_id);
        }
        match self.billing.record_session(session) {
            Ok(record) => Some(record),
            Err(e) => {
                warn!(session_id = %session.id, error = %e, "failed to record usage");
                None
            }
        }
    }

    /// Move queued sessions into free slots, oldest first.
    ///
    /// Each round re-reads the queue head and tries the available credentials
    /// in order until one checkout succeeds. If the head stopped being queued
    /// in the meantime the slot is handed back and the next head is tried.
    /// Stops when the queue is empty or no credential has spare capacity.
    /// Returns how many sessions were admitted.
    fn drain_queue(&self, service_id: &str) -> usize {
        let mut admitted = 0;

        loop {
            let Some(head) = self.store.queued_sessions_for_service(service_id).into_iter().next()
            else {
                break;
            };

            let Some(credential) = self
                .vault
                .available_credentials(service_id)
                .into_iter()
                .find_map(|c| self.vault.checkout(&c.id))
            else {
                debug!(service_id, "no spare capacity, drain stopped");
                break;
            };

            let now = self.clock.now_millis();
            let activated = self
                .store
                .update_session(&head.id, |s| {
                    s.apply(SessionEvent::Admit {
                        credential_id: credential.id.clone(),
                        at_ms: now,
                    })
                    .is_some()
                })
                .unwrap_or(false);

            if activated {
                admitted += 1;
                info!(
                    session_id = %head.id,
                    user_id = %head.user_id,
                    service_id,
                    credential_id = %credential.id,
                    "queued session admitted"
                );
            } else {
                debug!(
                    session_id = %head.id,
                    "queue head changed before admission, releasing slot"
                );
                self.vault.checkin(&credential.id);
            }
        }

        if admitted > 0 {
            metrics::counter!(
                "broker_sessions_admitted_from_queue_total",
                "service" => service_id.to_string()
            )
            .increment(admitted as u64);
        }
        admitted
    }
}
