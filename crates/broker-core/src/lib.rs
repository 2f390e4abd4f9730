//! Session broker for pooled service credentials
//!
//! Shares a small pool of upstream accounts among many users. Each credential
//! carries a concurrency cap; requests beyond the pool's capacity wait in a
//! per-service FIFO queue; sessions that outlive their service's maximum
//! duration are reclaimed by a sweep; every finished session is billed per
//! second against the service's fixed monthly cost.
//!
//! Components, leaves first:
//! 1. `Store` holds services, credentials, users, sessions and the usage
//!    ledger behind one lock
//! 2. `CredentialVault` issues credentials, keeps their secrets obfuscated,
//!    and is the only writer of occupancy counters (checkout/checkin)
//! 3. `BillingEngine` turns finished sessions into usage records and
//!    aggregates them into bills
//! 4. `SessionBroker` admits, queues, ends and expires sessions
//!
//! `Platform` wires the four together around a shared `Store`.

pub mod billing;
pub mod broker;
pub mod clock;
pub mod error;
pub mod model;
pub mod obfuscate;
pub mod platform;
pub mod store;
pub mod vault;

pub use billing::BillingEngine;
pub use broker::SessionBroker;
pub use clock::{Clock, ManualClock, SystemClock};
pub use error::{Error, Result};
pub use model::{
    BillingSummary, Credential, CredentialState, PlatformSummary, ServiceDefinition,
    ServiceRevenue, ServiceStatus, Session, SessionEvent, SessionState, Tier, UsageRecord, User,
};
pub use obfuscate::{Obfuscator, XorObfuscator};
pub use platform::Platform;
pub use store::Store;
pub use vault::CredentialVault;
