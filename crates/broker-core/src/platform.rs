//! Wiring of the four core components around one shared `Store`.

use std::sync::Arc;

use common::Secret;
use tracing::info;

use crate::billing::BillingEngine;
use crate::broker::SessionBroker;
use crate::clock::Clock;
use crate::model::{User, new_id};
use crate::store::Store;
use crate::vault::CredentialVault;

#[derive(Clone)]
pub struct Platform {
    pub store: Arc<Store>,
    pub vault: Arc<CredentialVault>,
    pub billing: Arc<BillingEngine>,
    pub broker: Arc<SessionBroker>,
    clock: Arc<dyn Clock>,
}

impl Platform {
    pub fn new(master_key: &Secret<String>, clock: Arc<dyn Clock>) -> Self {
        let store = Arc::new(Store::new());
        let vault = Arc::new(CredentialVault::new(store.clone(), master_key, clock.clone()));
        let billing = Arc::new(BillingEngine::new(store.clone(), clock.clone()));
        let broker = Arc::new(SessionBroker::new(
            store.clone(),
            vault.clone(),
            billing.clone(),
            clock.clone(),
        ));
        Self {
            store,
            vault,
            billing,
            broker,
            clock,
        }
    }

    pub fn now_millis(&self) -> u64 {
        self.clock.now_millis()
    }

    /// Register a user, or return the existing one with that username.
    pub fn register_user(&self, username: &str) -> User {
        if let Some(existing) = self.store.get_user_by_name(username) {
            return existing;
        }
        let user = User {
            id: new_id(12),
            username: username.to_string(),
            created_at_ms: self.clock.now_millis(),
        };
        self.store.add_user(user.clone());
        info!(user_id = %user.id, username, "user registered");
        user
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::ManualClock;
    use crate::model::{ServiceDefinition, SessionState, Tier};
    use std::time::Duration;

    fn netflix_platform() -> (Platform, Arc<ManualClock>) {
        let clock = Arc::new(ManualClock::new(1_700_000_000_000));
        let platform = Platform::new(&Secret::new("demo-key".to_string()), clock.clone());
        platform
            .store
            .add_service(ServiceDefinition::new("mock-netflix", "Mock Netflix", 1599, 4));
        for i in 1..=2 {
            platform
                .vault
                .store_credential(
                    "mock-netflix",
                    &format!("nf-account-{i}@example.com"),
                    &format!("nf-pass-{i:03}"),
                    Tier::Premium,
                )
                .unwrap();
        }
        (platform, clock)
    }

    #[test]
    fn register_user_is_idempotent_by_name() {
        let (p, _) = netflix_platform();
        let alice = p.register_user("alice");
        assert_eq!(p.register_user("alice"), alice);
        let bob = p.register_user("bob");
        assert_ne!(alice.id, bob.id);
        assert_eq!(p.store.list_users().len(), 2);
    }

    #[test]
    fn shared_pool_end_to_end() {
        let (p, clock) = netflix_platform();
        let status = p.broker.service_status("mock-netflix").unwrap();
        assert_eq!(status.total_slots, 8);

        let users: Vec<_> = ["alice", "bob", "carol", "dave", "erin"]
            .into_iter()
            .map(|name| p.register_user(name))
            .collect();

        let handles: Vec<_> = users[..4]
            .iter()
            .map(|u| {
                let broker = p.broker.clone();
                let user_id = u.id.clone();
                std::thread::spawn(move || {
                    broker.request_session(&user_id, "mock-netflix").unwrap()
                })
            })
            .collect();
        let mut sessions: Vec<_> = handles.into_iter().map(|h| h.join().unwrap()).collect();
        assert!(sessions.iter().all(|s| s.state == SessionState::Active));
        assert_eq!(p.broker.service_status("mock-netflix").unwrap().used_slots, 4);

        let fifth = p.broker.request_session(&users[4].id, "mock-netflix").unwrap();
        assert_eq!(fifth.state, SessionState::Active);
        sessions.push(fifth);
        let status = p.broker.service_status("mock-netflix").unwrap();
        assert_eq!(status.used_slots, 5);
        assert_eq!(status.available_slots, 3);

        clock.advance(Duration::from_secs(1800));
        let first = &sessions[0];
        let record = p.broker.end_session(&first.id).unwrap();
        let expected = 1599.0 / (30.0 * 86400.0) * 1800.0;
        assert_eq!(record.duration_seconds, 1800.0);
        assert!((record.cost_cents - expected).abs() < 1e-9);

        let bill = p.billing.user_bill(&first.user_id, None, None);
        assert_eq!(bill.records.len(), 1);
        assert!((bill.total_cost_cents - expected).abs() < 1e-9);

        let summary = p.billing.platform_summary(None);
        assert!(summary.operating_loss_cents > 0.0);
        assert_eq!(p.store.counts(), (1, 2, 5, 1));
    }
}
