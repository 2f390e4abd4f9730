//! Prometheus metrics exposition
//!
//! Server-side metrics:
//!
//! - `broker_http_requests_total` (counter): labels `route`, `status`
//! - `broker_sweep_expired_total` (counter)
//!
//! The core emits the session metrics (`broker_sessions_requested_total`,
//! `broker_sessions_admitted_from_queue_total`, `broker_sessions_expired_total`,
//! `broker_session_duration_seconds`) through the same global recorder.

use metrics_exporter_prometheus::{Matcher, PrometheusBuilder, PrometheusHandle};

/// Session duration buckets: one minute up to the longest plausible session.
const SESSION_DURATION_BUCKETS: &[f64] = &[
    60.0, 300.0, 900.0, 1800.0, 3600.0, 7200.0, 14400.0, 28800.0, 86400.0,
];

fn builder() -> PrometheusBuilder {
    PrometheusBuilder::new()
        .set_buckets_for_metric(
            Matcher::Full("broker_session_duration_seconds".to_string()),
            SESSION_DURATION_BUCKETS,
        )
        .expect("failed to set histogram buckets")
}

/// Install the Prometheus recorder and return a handle for rendering metrics.
///
/// `broker_session_duration_seconds` gets explicit buckets so it renders as a
/// histogram with `_bucket` lines rather than the default summary.
pub fn install_recorder() -> PrometheusHandle {
    builder()
        .install_recorder()
        .expect("failed to install Prometheus recorder")
}

/// Record a handled request by route template and status code.
pub fn record_request(route: &str, status: u16) {
    metrics::counter!(
        "broker_http_requests_total",
        "route" => route.to_string(),
        "status" => status.to_string()
    )
    .increment(1);
}

/// Record the outcome of one max-duration sweep.
pub fn record_sweep(expired: usize) {
    metrics::counter!("broker_sweep_expired_total").increment(expired as u64);
}

#[cfg(test)]
pub(crate) fn isolated_recorder() -> (
    metrics_exporter_prometheus::PrometheusRecorder,
    PrometheusHandle,
) {
    let recorder = builder().build_recorder();
    let handle = recorder.handle();
    (recorder, handle)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn record_functions_do_not_panic_without_recorder() {
        record_request("/health", 200);
        record_sweep(3);
    }

    #[test]
    fn record_request_carries_route_and_status() {
        let (recorder, handle) = isolated_recorder();
        let _guard = metrics::set_default_local_recorder(&recorder);

        record_request("/sessions", 201);
        record_request("/sessions/{id}", 404);

        let output = handle.render();
        assert!(output.contains("broker_http_requests_total"));
        assert!(output.contains("route=\"/sessions\""));
        assert!(output.contains("status=\"201\""));
        assert!(output.contains("status=\"404\""));
    }

    #[test]
    fn sweep_counter_accumulates() {
        let (recorder, handle) = isolated_recorder();
        let _guard = metrics::set_default_local_recorder(&recorder);

        record_sweep(2);
        record_sweep(0);
        record_sweep(3);

        let output = handle.render();
        assert!(output.contains("broker_sweep_expired_total 5"));
    }

    #[test]
    fn session_duration_renders_as_histogram() {
        let (recorder, handle) = isolated_recorder();
        let _guard = metrics::set_default_local_recorder(&recorder);

        metrics::histogram!("broker_session_duration_seconds", "service" => "svc1").record(42.0);

        let output = handle.render();
        assert!(output.contains("broker_session_duration_seconds_bucket"));
        assert!(output.contains("le=\"60\""));
        assert!(output.contains("le=\"+Inf\""));
    }
}
