//! Periodic max-duration sweep
//!
//! Spawns a task that reclaims sessions running past their service's limit
//! and hands the freed slots to queued requests. Without it, an abandoned
//! session holds its slot forever.

use std::time::Duration;

use broker_core::Platform;
use tracing::{debug, info};

/// Spawn a background task that runs `sweep_cycle` every `interval`.
///
/// Returns a `JoinHandle` for the spawned task.
pub fn spawn_sweep_task(platform: Platform, interval: Duration) -> tokio::task::JoinHandle<()> {
    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(interval);
        // Skip the immediate first tick, nothing can be overdue at startup
        ticker.tick().await;

        loop {
            ticker.tick().await;
            sweep_cycle(&platform);
        }
    })
}

/// Run one sweep. Returns the ids of the sessions it expired.
pub fn sweep_cycle(platform: &Platform) -> Vec<String> {
    let expired = platform.broker.enforce_max_duration();
    crate::metrics::record_sweep(expired.len());
    if expired.is_empty() {
        debug!("sweep found no overdue sessions");
    } else {
        info!(expired = expired.len(), "sweep reclaimed overdue sessions");
    }
    expired
}

#[cfg(test)]
mod tests {
    use super::*;
    use broker_core::{ManualClock, ServiceDefinition, SessionState, Tier};
    use common::Secret;
    use std::sync::Arc;

    fn platform() -> (Platform, Arc<ManualClock>) {
        let clock = Arc::new(ManualClock::new(1_700_000_000_000));
        let platform = Platform::new(&Secret::new("test".to_string()), clock.clone());
        platform.store.add_service(
            ServiceDefinition::new("svc1", "Test", 1000, 1).with_max_session_duration(30),
        );
        platform
            .vault
            .store_credential("svc1", "a@test.com", "pw", Tier::Basic)
            .unwrap();
        (platform, clock)
    }

    #[test]
    fn sweep_cycle_expires_and_admits_waiter() {
        let (recorder, handle) = crate::metrics::isolated_recorder();
        let _guard = metrics::set_default_local_recorder(&recorder);
        let (platform, clock) = platform();
        let long = platform.broker.request_session("a", "svc1").unwrap();
        let waiting = platform.broker.request_session("b", "svc1").unwrap();

        assert!(sweep_cycle(&platform).is_empty());
        clock.advance(Duration::from_secs(31));
        assert_eq!(sweep_cycle(&platform), vec![long.id]);

        assert_eq!(
            platform.broker.get_session(&waiting.id).unwrap().state,
            SessionState::Active
        );
        assert!(handle.render().contains("broker_sweep_expired_total 1"));
    }

    #[tokio::test(start_paused = true)]
    async fn spawned_task_sweeps_on_interval() {
        let (platform, clock) = platform();
        let session = platform.broker.request_session("a", "svc1").unwrap();
        clock.advance(Duration::from_secs(31));

        let task = spawn_sweep_task(platform.clone(), Duration::from_secs(10));
        // The first tick is skipped, so nothing happens right away.
        tokio::task::yield_now().await;
        assert_eq!(
            platform.broker.get_session(&session.id).unwrap().state,
            SessionState::Active
        );

        tokio::time::sleep(Duration::from_secs(11)).await;
        assert_eq!(
            platform.broker.get_session(&session.id).unwrap().state,
            SessionState::Expired
        );
        task.abort();
    }
}
