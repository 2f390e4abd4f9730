//! In-memory state for the whole broker
//!
//! One `Mutex` guards every collection. Reads return owned clones so callers
//! never hold a reference into the guarded state; writes to stored entities go
//! through `update_credential` / `update_session`, which run the caller's
//! closure inside the lock. Those two are crate-private: occupancy counters
//! change only through the vault, session state only through the broker.
//!
//! Credentials and services keep their insertion order, which is the order
//! `find_available_credential` scans and the catalog order of `list_services`.

use std::collections::HashMap;
use std::sync::{Mutex, MutexGuard, PoisonError};

use tracing::debug;

use crate::model::{Credential, ServiceDefinition, Session, SessionState, UsageRecord, User};

#[derive(Default)]
struct State {
    services: HashMap<String, ServiceDefinition>,
    service_order: Vec<String>,
    credentials: HashMap<String, Credential>,
    credential_order: Vec<String>,
    users: HashMap<String, User>,
    user_order: Vec<String>,
    sessions: HashMap<String, Session>,
    next_session_seq: u64,
    usage: Vec<UsageRecord>,
}

impl State {
    fn credentials_in_order(&self) -> impl Iterator<Item = &Credential> {
        self.credential_order
            .iter()
            .filter_map(|id| self.credentials.get(id))
    }
}

/// Thread-safe store for services, credentials, users, sessions and usage.
#[derive(Default)]
pub struct Store {
    state: Mutex<State>,
}

impl Store {
    pub fn new() -> Self {
        Self::default()
    }

    // Every critical section leaves the maps consistent, so a panic in another
    // thread while holding the lock does not invalidate the data.
    fn lock(&self) -> MutexGuard<'_, State> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    // --- Services ---

    /// Register a service. Re-adding an id replaces the definition in place.
    pub fn add_service(&self, service: ServiceDefinition) {
        let mut state = self.lock();
        if !state.services.contains_key(&service.id) {
            state.service_order.push(service.id.clone());
        }
        debug!(service_id = %service.id, "service registered");
        state.services.insert(service.id.clone(), service);
    }

    pub fn get_service(&self, service_id: &str) -> Option<ServiceDefinition> {
        self.lock().services.get(service_id).cloned()
    }

    /// All services in catalog order.
    pub fn list_services(&self) -> Vec<ServiceDefinition> {
        let state = self.lock();
        state
            .service_order
            .iter()
            .filter_map(|id| state.services.get(id).cloned())
            .collect()
    }

    // --- Credentials ---

    pub fn add_credential(&self, credential: Credential) {
        let mut state = self.lock();
        if !state.credentials.contains_key(&credential.id) {
            state.credential_order.push(credential.id.clone());
        }
        state.credentials.insert(credential.id.clone(), credential);
    }

    pub fn get_credential(&self, credential_id: &str) -> Option<Credential> {
        self.lock().credentials.get(credential_id).cloned()
    }

    /// All credentials in issue order.
    pub fn list_credentials(&self) -> Vec<Credential> {
        self.lock().credentials_in_order().cloned().collect()
    }

    pub fn credentials_for_service(&self, service_id: &str) -> Vec<Credential> {
        self.lock()
            .credentials_in_order()
            .filter(|c| c.service_id == service_id)
            .cloned()
            .collect()
    }

    /// First credential of the service with spare capacity.
    pub fn find_available_credential(&self, service_id: &str) -> Option<Credential> {
        self.lock()
            .credentials_in_order()
            .find(|c| c.service_id == service_id && c.has_capacity())
            .cloned()
    }

    /// Every credential of the service with spare capacity, in issue order.
    pub fn available_credentials(&self, service_id: &str) -> Vec<Credential> {
        self.lock()
            .credentials_in_order()
            .filter(|c| c.service_id == service_id && c.has_capacity())
            .cloned()
            .collect()
    }

    /// Run `f` on the stored credential inside the lock.
    pub(crate) fn update_credential<R>(
        &self,
        credential_id: &str,
        f: impl FnOnce(&mut Credential) -> R,
    ) -> Option<R> {
        self.lock().credentials.get_mut(credential_id).map(f)
    }

    // --- Users ---

    pub fn add_user(&self, user: User) {
        let mut state = self.lock();
        if !state.users.contains_key(&user.id) {
            state.user_order.push(user.id.clone());
        }
        state.users.insert(user.id.clone(), user);
    }

    pub fn get_user(&self, user_id: &str) -> Option<User> {
        self.lock().users.get(user_id).cloned()
    }

    pub fn get_user_by_name(&self, username: &str) -> Option<User> {
        self.lock()
            .users
            .values()
            .find(|u| u.username == username)
            .cloned()
    }

    pub fn list_users(&self) -> Vec<User> {
        let state = self.lock();
        state
            .user_order
            .iter()
            .filter_map(|id| state.users.get(id).cloned())
            .collect()
    }

    // --- Sessions ---

    /// Store a session, stamping its insertion sequence. Returns the stored copy.
    pub fn add_session(&self, mut session: Session) -> Session {
        let mut state = self.lock();
        state.next_session_seq += 1;
        session.seq = state.next_session_seq;
        state.sessions.insert(session.id.clone(), session.clone());
        session
    }

    pub fn get_session(&self, session_id: &str) -> Option<Session> {
        self.lock().sessions.get(session_id).cloned()
    }

    /// Run `f` on the stored session inside the lock.
    pub(crate) fn update_session<R>(
        &self,
        session_id: &str,
        f: impl FnOnce(&mut Session) -> R,
    ) -> Option<R> {
        self.lock().sessions.get_mut(session_id).map(f)
    }

    pub fn active_sessions_for_credential(&self, credential_id: &str) -> Vec<Session> {
        self.sessions_matching(|s| {
            s.state == SessionState::Active && s.credential_id.as_deref() == Some(credential_id)
        })
    }

    pub fn active_sessions_for_user(&self, user_id: &str) -> Vec<Session> {
        self.sessions_matching(|s| s.state == SessionState::Active && s.user_id == user_id)
    }

    /// Every session of the user, any state, oldest first.
    pub fn sessions_for_user(&self, user_id: &str) -> Vec<Session> {
        self.sessions_matching(|s| s.user_id == user_id)
    }

    /// The waiting queue of a service: queued sessions by queued-at, then
    /// insertion order.
    pub fn queued_sessions_for_service(&self, service_id: &str) -> Vec<Session> {
        self.sessions_matching(|s| s.state == SessionState::Queued && s.service_id == service_id)
    }

    pub fn queue_depth(&self, service_id: &str) -> usize {
        self.lock()
            .sessions
            .values()
            .filter(|s| s.state == SessionState::Queued && s.service_id == service_id)
            .count()
    }

    /// Matching sessions ordered by (queued-at, insertion sequence).
    fn sessions_matching(&self, predicate: impl Fn(&Session) -> bool) -> Vec<Session> {
        let mut sessions: Vec<Session> = self
            .lock()
            .sessions
            .values()
            .filter(|s| predicate(s))
            .cloned()
            .collect();
        sessions.sort_by_key(|s| (s.queued_at_ms, s.seq));
        sessions
    }

    // --- Usage ledger ---

    pub fn append_usage(&self, record: UsageRecord) {
        self.lock().usage.push(record);
    }

    /// A user's records with `since <= recorded_at <= until`.
    pub fn usage_for_user(&self, user_id: &str, since_ms: u64, until_ms: u64) -> Vec<UsageRecord> {
        self.usage_matching(|r| {
            r.user_id == user_id && r.recorded_at_ms >= since_ms && r.recorded_at_ms <= until_ms
        })
    }

    pub fn usage_for_service(&self, service_id: &str, since_ms: u64) -> Vec<UsageRecord> {
        self.usage_matching(|r| r.service_id == service_id && r.recorded_at_ms >= since_ms)
    }

    pub fn all_usage(&self, since_ms: u64) -> Vec<UsageRecord> {
        self.usage_matching(|r| r.recorded_at_ms >= since_ms)
    }

    fn usage_matching(&self, predicate: impl Fn(&UsageRecord) -> bool) -> Vec<UsageRecord> {
        self.lock()
            .usage
            .iter()
            .filter(|r| predicate(r))
            .cloned()
            .collect()
    }

    // --- Counts for health reporting ---

    /// (services, credentials, sessions, usage records)
    pub fn counts(&self) -> (usize, usize, usize, usize) {
        let state = self.lock();
        (
            state.services.len(),
            state.credentials.len(),
            state.sessions.len(),
            state.usage.len(),
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::{CredentialState, SessionEvent, Tier};

    fn credential(id: &str, service_id: &str, max_streams: u32, active: u32) -> Credential {
        Credential {
            id: id.into(),
            service_id: service_id.into(),
            identity: format!("{id}@broker.local"),
            sealed_secret: String::new(),
            tier: Tier::Premium,
            max_streams,
            state: CredentialState::Available,
            active_sessions: active,
            last_checkout_ms: None,
        }
    }

    fn usage(user: &str, service: &str, at_ms: u64) -> UsageRecord {
        UsageRecord {
            id: format!("r-{at_ms}"),
            user_id: user.into(),
            service_id: service.into(),
            session_id: "s".into(),
            duration_seconds: 1.0,
            cost_cents: 0.5,
            recorded_at_ms: at_ms,
        }
    }

    #[test]
    fn lookups_return_none_when_missing() {
        let store = Store::new();
        assert!(store.get_service("nope").is_none());
        assert!(store.get_credential("nope").is_none());
        assert!(store.get_session("nope").is_none());
        assert!(store.get_user("nope").is_none());
        assert!(store.find_available_credential("nope").is_none());
    }

    #[test]
    fn services_keep_catalog_order() {
        let store = Store::new();
        store.add_service(ServiceDefinition::new("b", "B", 100, 1));
        store.add_service(ServiceDefinition::new("a", "A", 100, 1));
        store.add_service(ServiceDefinition::new("b", "B2", 200, 1));

        let ids: Vec<_> = store.list_services().into_iter().map(|s| s.id).collect();
        assert_eq!(ids, vec!["b", "a"]);
        assert_eq!(store.get_service("b").unwrap().name, "B2");
    }

    #[test]
    fn find_available_skips_full_and_other_services() {
        let store = Store::new();
        store.add_credential(credential("full", "svc", 1, 1));
        store.add_credential(credential("other", "svc2", 4, 0));
        store.add_credential(credential("free", "svc", 2, 0));

        assert_eq!(store.find_available_credential("svc").unwrap().id, "free");
        assert_eq!(store.available_credentials("svc").len(), 1);
        assert_eq!(store.credentials_for_service("svc").len(), 2);
    }

    #[test]
    fn update_credential_mutates_stored_copy_only() {
        let store = Store::new();
        store.add_credential(credential("c", "svc", 2, 0));
        let snapshot = store.get_credential("c").unwrap();

        let updated = store.update_credential("c", |c| {
            c.active_sessions += 1;
            c.active_sessions
        });
        assert_eq!(updated, Some(1));
        assert_eq!(snapshot.active_sessions, 0);
        assert_eq!(store.get_credential("c").unwrap().active_sessions, 1);
        assert_eq!(store.update_credential("missing", |_| ()), None);
    }

    #[test]
    fn queue_is_fifo_with_insertion_tiebreak() {
        let store = Store::new();
        let late = store.add_session(Session::queued("u1", "svc", 200));
        let first_tie = store.add_session(Session::queued("u2", "svc", 100));
        let second_tie = store.add_session(Session::queued("u3", "svc", 100));
        store.add_session(Session::queued("u4", "other", 50));

        let queue: Vec<_> = store
            .queued_sessions_for_service("svc")
            .into_iter()
            .map(|s| s.id)
            .collect();
        assert_eq!(queue, vec![first_tie.id, second_tie.id, late.id]);
        assert_eq!(store.queue_depth("svc"), 3);
    }

    #[test]
    fn admitted_sessions_leave_the_queue() {
        let store = Store::new();
        let session = store.add_session(Session::queued("u1", "svc", 0));
        store.update_session(&session.id, |s| {
            s.apply(SessionEvent::Admit {
                credential_id: "c".into(),
                at_ms: 10,
            })
        });

        assert!(store.queued_sessions_for_service("svc").is_empty());
        assert_eq!(store.active_sessions_for_credential("c").len(), 1);
        assert_eq!(store.active_sessions_for_user("u1").len(), 1);
        assert_eq!(store.sessions_for_user("u1").len(), 1);
    }

    #[test]
    fn usage_filters_by_user_service_and_time() {
        let store = Store::new();
        store.append_usage(usage("alice", "svc", 100));
        store.append_usage(usage("alice", "svc", 300));
        store.append_usage(usage("bob", "svc2", 200));

        assert_eq!(store.usage_for_user("alice", 0, 200).len(), 1);
        assert_eq!(store.usage_for_user("alice", 100, 300).len(), 2);
        assert_eq!(store.usage_for_service("svc", 150).len(), 1);
        assert_eq!(store.all_usage(0).len(), 3);
        assert_eq!(store.all_usage(250).len(), 1);
    }

    #[test]
    fn users_by_id_and_name() {
        let store = Store::new();
        store.add_user(User {
            id: "user-alice".into(),
            username: "alice".into(),
            created_at_ms: 0,
        });
        assert_eq!(store.get_user_by_name("alice").unwrap().id, "user-alice");
        assert!(store.get_user_by_name("mallory").is_none());
        assert_eq!(store.list_users().len(), 1);
    }
}
