//! Per-second metered billing against a fixed cost pool
//!
//! A service's monthly subscription is a fixed pool that its users split in
//! proportion to their usage:
//!
//! ```text
//! cost_per_second = monthly_cost_cents / (30 * 86400)
//! session_cost    = session_duration_secs * cost_per_second
//! ```
//!
//! At $15.99/month, a two hour session costs 7200 × 1599 / 2592000 ≈ 4.44
//! cents. Nobody pays more than retail and the platform normally recovers
//! well under 100% of its costs.
//!
//! Every summary is recomputed from the ledger on each call.

use std::sync::Arc;

use tracing::{debug, info};

use crate::clock::Clock;
use crate::error::{Error, Result};
use crate::model::{
    BillingSummary, PlatformSummary, ServiceRevenue, Session, UsageRecord, new_id, recovery_pct,
};
use crate::store::Store;

/// Default billing window: the trailing 30 days.
pub const DEFAULT_PERIOD_MS: u64 = 30 * 86_400 * 1000;

pub struct BillingEngine {
    store: Arc<Store>,
    clock: Arc<dyn Clock>,
}

impl BillingEngine {
    pub fn new(store: Arc<Store>, clock: Arc<dyn Clock>) -> Self {
        Self { store, clock }
    }

    /// Append the ledger entry for a finished (or still running) session.
    ///
    /// Priced with the service's cost at this instant.
    pub fn record_session(&self, session: &Session) -> Result<UsageRecord> {
        let service = self
            .store
            .get_service(&session.service_id)
            .ok_or_else(|| Error::ServiceNotFound(session.service_id.clone()))?;

        let now = self.clock.now_millis();
        let duration_seconds = session.duration_seconds(now);
        let record = UsageRecord {
            id: new_id(16),
            user_id: session.user_id.clone(),
            service_id: session.service_id.clone(),
            session_id: session.id.clone(),
            duration_seconds,
            cost_cents: duration_seconds * service.cost_per_second(),
            recorded_at_ms: now,
        };
        self.store.append_usage(record.clone());

        metrics::histogram!("broker_session_duration_seconds", "service" => service.id.clone())
            .record(duration_seconds);
        info!(
            session_id = %session.id,
            user_id = %session.user_id,
            service_id = %session.service_id,
            duration_seconds,
            cost_cents = record.cost_cents,
            "usage recorded"
        );
        Ok(record)
    }

    /// A user's bill. The window defaults to the 30 days ending now; both
    /// bounds are inclusive.
    pub fn user_bill(
        &self,
        user_id: &str,
        period_start_ms: Option<u64>,
        period_end_ms: Option<u64>,
    ) -> BillingSummary {
        let now = self.clock.now_millis();
        let end = period_end_ms.unwrap_or(now);
        let start = period_start_ms.unwrap_or_else(|| now.saturating_sub(DEFAULT_PERIOD_MS));

        let records = self.store.usage_for_user(user_id, start, end);
        let total_seconds = records.iter().map(|r| r.duration_seconds).sum();
        let total_cost_cents = records.iter().map(|r| r.cost_cents).sum();
        debug!(user_id, records = records.len(), "user bill computed");

        BillingSummary {
            user_id: user_id.to_string(),
            period_start_ms: start,
            period_end_ms: end,
            total_seconds,
            total_cost_cents,
            records,
        }
    }

    /// How much of a service's monthly cost has been billed since `since_ms`
    /// (all time by default).
    pub fn service_revenue(
        &self,
        service_id: &str,
        since_ms: Option<u64>,
    ) -> Result<ServiceRevenue> {
        let service = self
            .store
            .get_service(service_id)
            .ok_or_else(|| Error::ServiceNotFound(service_id.to_string()))?;

        let records = self.store.usage_for_service(service_id, since_ms.unwrap_or(0));
        let total_billed_cents: f64 = records.iter().map(|r| r.cost_cents).sum();
        let total_usage_seconds = records.iter().map(|r| r.duration_seconds).sum();

        Ok(ServiceRevenue {
            service_id: service.id,
            monthly_cost_cents: service.monthly_cost_cents,
            total_billed_cents,
            total_usage_seconds,
            cost_recovery_pct: recovery_pct(total_billed_cents, service.monthly_cost_cents),
        })
    }

    /// Total cost of every service against everything billed since `since_ms`.
    pub fn platform_summary(&self, since_ms: Option<u64>) -> PlatformSummary {
        let services = self.store.list_services();
        let total_monthly_cost_cents: u64 = services.iter().map(|s| s.monthly_cost_cents).sum();

        let records = self.store.all_usage(since_ms.unwrap_or(0));
        let total_billed_cents: f64 = records.iter().map(|r| r.cost_cents).sum();
        let total_usage_seconds = records.iter().map(|r| r.duration_seconds).sum();

        PlatformSummary {
            total_monthly_cost_cents,
            total_billed_cents,
            operating_loss_cents: total_monthly_cost_cents as f64 - total_billed_cents,
            total_usage_seconds,
            service_count: services.len(),
            cost_recovery_pct: recovery_pct(total_billed_cents, total_monthly_cost_cents),
        }
    }
}
