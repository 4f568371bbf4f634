use std::sync::OnceLock;

use metrics_exporter_prometheus::{PrometheusBuilder, PrometheusHandle};

use crate::core::config::Settings;

static PROM_HANDLE: OnceLock<PrometheusHandle> = OnceLock::new();

pub(crate) fn init(settings: &Settings) -> anyhow::Result<()> {
    if !settings.telemetry().prometheus_enabled || PROM_HANDLE.get().is_some() {
        return Ok(());
    }

    let handle = PrometheusBuilder::new()
        .set_buckets_for_metric(
            metrics_exporter_prometheus::Matcher::Suffix("duration_seconds".to_string()),
            &[0.5, 1.0, 2.5, 5.0, 10.0, 30.0, 60.0, 120.0, 300.0, 600.0],
        )?
        .install_recorder()?;
    let _ = PROM_HANDLE.set(handle);
    describe();
    Ok(())
}

pub(crate) fn render() -> Option<String> {
    PROM_HANDLE.get().map(|handle| handle.render())
}

fn describe() {
    metrics::describe_counter!("grading_jobs_total", "Grading jobs that reached a terminal state");
    metrics::describe_counter!(
        "grading_dispatch_retries_total",
        "submitGrading calls that failed and were retried"
    );
    metrics::describe_counter!("grading_poll_attempts_total", "Status polls issued by jobs");
    metrics::describe_counter!(
        "grading_fetch_retries_total",
        "fetchResult calls that returned not-ready or failed"
    );
    metrics::describe_histogram!(
        "grading_job_duration_seconds",
        "Wall time from dispatch to terminal state"
    );
    metrics::describe_gauge!("grading_jobs_active", "Jobs currently dispatched or polling");
}
