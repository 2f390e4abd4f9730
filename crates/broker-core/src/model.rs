//! Domain types: services, credentials, users, sessions, ledger entries
//!
//! Entities are plain values. The store hands out clones and applies every
//! mutation inside its lock, so nothing here needs interior mutability.
//!
//! Session transitions go through `next_state`, a pure function over
//! (state, event). Events that make no sense for the current state are
//! ignored rather than rejected, which is what keeps ending an already
//! finished session a harmless no-op.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

/// Seconds in the 30-day billing month.
pub const SECONDS_PER_MONTH: f64 = 30.0 * 86_400.0;

/// Default cap on a single session: two hours.
pub const DEFAULT_MAX_SESSION_DURATION_SECS: u64 = 7_200;

fn default_max_session_duration() -> u64 {
    DEFAULT_MAX_SESSION_DURATION_SECS
}

/// A pooled upstream offering (e.g. `mock-netflix`).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ServiceDefinition {
    pub id: String,
    pub name: String,
    /// Subscription price in cents (1599 = $15.99).
    pub monthly_cost_cents: u64,
    /// Per-credential concurrency cap imposed by the upstream.
    pub max_concurrent_streams: u32,
    #[serde(default = "default_max_session_duration")]
    pub max_session_duration_secs: u64,
}

impl ServiceDefinition {
    pub fn new(
        id: impl Into<String>,
        name: impl Into<String>,
        monthly_cost_cents: u64,
        max_concurrent_streams: u32,
    ) -> Self {
        Self {
            id: id.into(),
            name: name.into(),
            monthly_cost_cents,
            max_concurrent_streams,
            max_session_duration_secs: DEFAULT_MAX_SESSION_DURATION_SECS,
        }
    }

    pub fn with_max_session_duration(mut self, secs: u64) -> Self {
        self.max_session_duration_secs = secs;
        self
    }

    /// Monthly cost spread over every second of a 30-day month.
    pub fn cost_per_second(&self) -> f64 {
        self.monthly_cost_cents as f64 / SECONDS_PER_MONTH
    }
}

/// Subscription tier of a pooled account. Bounds its concurrent streams.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Tier {
    Basic,
    Standard,
    Premium,
}

impl Tier {
    pub fn capacity(self) -> u32 {
        match self {
            Tier::Basic => 1,
            Tier::Standard => 2,
            Tier::Premium => 4,
        }
    }

    pub fn label(self) -> &'static str {
        match self {
            Tier::Basic => "basic",
            Tier::Standard => "standard",
            Tier::Premium => "premium",
        }
    }
}

impl fmt::Display for Tier {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.label())
    }
}

impl FromStr for Tier {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s {
            "basic" => Ok(Tier::Basic),
            "standard" => Ok(Tier::Standard),
            "premium" => Ok(Tier::Premium),
            other => Err(format!("unknown tier: {other}")),
        }
    }
}

/// Lifecycle of a credential.
///
/// `CheckedOut` means at least one session holds it; it still accepts
/// checkouts while under its cap. `Disabled` is sticky.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum CredentialState {
    Available,
    CheckedOut,
    Disabled,
}

/// One pooled account usable by the broker.
#[derive(Debug, Clone, Serialize)]
pub struct Credential {
    pub id: String,
    pub service_id: String,
    /// Account login at the upstream (usually an email).
    pub identity: String,
    /// Obfuscated secret. Never serialized.
    #[serde(skip)]
    pub sealed_secret: String,
    pub tier: Tier,
    /// Effective cap: min(tier capacity, service stream cap).
    pub max_streams: u32,
    pub state: CredentialState,
    pub active_sessions: u32,
    pub last_checkout_ms: Option<u64>,
}

impl Credential {
    pub fn has_capacity(&self) -> bool {
        self.state != CredentialState::Disabled && self.active_sessions < self.max_streams
    }

    pub fn spare_slots(&self) -> u32 {
        if self.state == CredentialState::Disabled {
            return 0;
        }
        self.max_streams.saturating_sub(self.active_sessions)
    }
}

/// A platform consumer.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct User {
    pub id: String,
    pub username: String,
    pub created_at_ms: u64,
}

/// Session lifecycle states. `Ended` and `Expired` are terminal.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum SessionState {
    Queued,
    Active,
    Ended,
    Expired,
}

impl SessionState {
    pub fn is_terminal(self) -> bool {
        matches!(self, SessionState::Ended | SessionState::Expired)
    }

    pub fn label(self) -> &'static str {
        match self {
            SessionState::Queued => "queued",
            SessionState::Active => "active",
            SessionState::Ended => "ended",
            SessionState::Expired => "expired",
        }
    }
}

/// Events driving session transitions.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SessionEvent {
    /// A slot was found: bind the credential and start the clock.
    Admit { credential_id: String, at_ms: u64 },
    /// Graceful close by the user, or cancellation while queued.
    End { at_ms: u64 },
    /// Reclaimed by the max-duration sweep.
    Expire { at_ms: u64 },
}

/// Transition table. `None` means the event is ignored in this state.
///
/// - Queued + Admit → Active
/// - Queued + End → Ended (cancel, nothing to bill)
/// - Active + End → Ended
/// - Active + Expire → Expired
/// - anything else → ignored
pub fn next_state(state: SessionState, event: &SessionEvent) -> Option<SessionState> {
    match (state, event) {
        (SessionState::Queued, SessionEvent::Admit { .. }) => Some(SessionState::Active),
        (SessionState::Queued, SessionEvent::End { .. }) => Some(SessionState::Ended),
        (SessionState::Active, SessionEvent::End { .. }) => Some(SessionState::Ended),
        (SessionState::Active, SessionEvent::Expire { .. }) => Some(SessionState::Expired),
        (SessionState::Queued, SessionEvent::Expire { .. })
        | (SessionState::Active, SessionEvent::Admit { .. })
        | (SessionState::Ended | SessionState::Expired, _) => None,
    }
}

/// One user's use of one credential.
#[derive(Debug, Clone, Serialize)]
pub struct Session {
    pub id: String,
    pub user_id: String,
    pub service_id: String,
    /// Set on admission and kept after the session finishes.
    pub credential_id: Option<String>,
    pub state: SessionState,
    pub queued_at_ms: u64,
    pub started_at_ms: Option<u64>,
    pub ended_at_ms: Option<u64>,
    /// Store insertion order, breaks queued-at ties.
    #[serde(skip)]
    pub(crate) seq: u64,
}

impl Session {
    /// A fresh session waiting for a slot.
    pub fn queued(user_id: impl Into<String>, service_id: impl Into<String>, now_ms: u64) -> Self {
        Self {
            id: new_id(16),
            user_id: user_id.into(),
            service_id: service_id.into(),
            credential_id: None,
            state: SessionState::Queued,
            queued_at_ms: now_ms,
            started_at_ms: None,
            ended_at_ms: None,
            seq: 0,
        }
    }

    /// Apply an event. Returns the previous state if the transition happened,
    /// `None` if the event was ignored (the session is left untouched).
    pub fn apply(&mut self, event: SessionEvent) -> Option<SessionState> {
        let next = next_state(self.state, &event)?;
        let previous = self.state;
        match event {
            SessionEvent::Admit {
                credential_id,
                at_ms,
            } => {
                self.credential_id = Some(credential_id);
                self.started_at_ms = Some(at_ms);
            }
            SessionEvent::End { at_ms } | SessionEvent::Expire { at_ms } => {
                // A canceled queued session never started, so it has no end stamp.
                if previous == SessionState::Active {
                    self.ended_at_ms = Some(at_ms);
                }
            }
        }
        self.state = next;
        Some(previous)
    }

    /// Billable seconds: end (or `now_ms` if still running) minus start.
    /// Zero if the session never started.
    pub fn duration_seconds(&self, now_ms: u64) -> f64 {
        let Some(started) = self.started_at_ms else {
            return 0.0;
        };
        let end = self.ended_at_ms.unwrap_or(now_ms);
        end.saturating_sub(started) as f64 / 1000.0
    }
}

/// Immutable ledger entry, one per finished active session.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct UsageRecord {
    pub id: String,
    pub user_id: String,
    pub service_id: String,
    pub session_id: String,
    pub duration_seconds: f64,
    pub cost_cents: f64,
    pub recorded_at_ms: u64,
}

/// A user's bill for a period. Computed on demand.
#[derive(Debug, Clone, Serialize)]
pub struct BillingSummary {
    pub user_id: String,
    pub period_start_ms: u64,
    pub period_end_ms: u64,
    pub total_seconds: f64,
    pub total_cost_cents: f64,
    pub records: Vec<UsageRecord>,
}

impl BillingSummary {
    pub fn total_cost_dollars(&self) -> f64 {
        self.total_cost_cents / 100.0
    }
}

/// How much of one service's monthly cost usage billing has recovered.
#[derive(Debug, Clone, Serialize)]
pub struct ServiceRevenue {
    pub service_id: String,
    pub monthly_cost_cents: u64,
    pub total_billed_cents: f64,
    pub total_usage_seconds: f64,
    pub cost_recovery_pct: f64,
}

/// Platform-wide cost against billed usage.
#[derive(Debug, Clone, Serialize)]
pub struct PlatformSummary {
    pub total_monthly_cost_cents: u64,
    pub total_billed_cents: f64,
    /// Cost minus billed. Positive in normal operation: usage rarely covers
    /// a whole month of every account.
    pub operating_loss_cents: f64,
    pub total_usage_seconds: f64,
    pub service_count: usize,
    pub cost_recovery_pct: f64,
}

/// Capacity snapshot of one service.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ServiceStatus {
    pub service_id: String,
    pub name: String,
    pub monthly_cost_cents: u64,
    pub total_slots: u32,
    pub used_slots: u32,
    pub available_slots: u32,
    pub queue_depth: usize,
    pub credential_count: usize,
}

/// Percentage of `cost` covered by `billed`; 0 when there is no cost.
pub(crate) fn recovery_pct(billed: f64, cost: u64) -> f64 {
    if cost == 0 {
        0.0
    } else {
        billed / cost as f64 * 100.0
    }
}

/// Random hex id truncated to `len` characters.
pub(crate) fn new_id(len: usize) -> String {
    let mut id = uuid::Uuid::new_v4().simple().to_string();
    id.truncate(len);
    id
}
