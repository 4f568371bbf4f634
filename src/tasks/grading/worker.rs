use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::watch;
use tokio::time::{sleep, Instant};

use super::board::JobBoard;
use super::bulk::StatusFeed;
use super::job::{GradingJob, JobFailure, JobState};
use super::policy::RetryPolicy;
use crate::schemas::grading::GradedResult;
use crate::services::platform::{AuthContext, DispatchRequest, PlatformBinding};
use crate::services::result_cache::ResultCache;

/// What every job of one batch sends to `submit_grading`.
#[derive(Debug)]
pub(super) struct DispatchSpec {
    pub(super) course_id: String,
    pub(super) assignment_id: String,
    pub(super) rubric: String,
    pub(super) regrade_context: Option<String>,
    pub(super) auth: AuthContext,
}

#[derive(Debug, Clone)]
pub(super) struct JobContext {
    pub(super) binding: Arc<dyn PlatformBinding>,
    pub(super) board: Arc<JobBoard>,
    pub(super) cache: ResultCache,
    pub(super) policy: RetryPolicy,
    pub(super) dispatch: Arc<DispatchSpec>,
    pub(super) status_feed: Option<StatusFeed>,
}

/// Drives one job to a terminal state. Never returns a non-terminal job.
pub(super) async fn run_job(
    mut ctx: JobContext,
    mut job: GradingJob,
    mut cancel: watch::Receiver<bool>,
) -> GradingJob {
    let started = Instant::now();
    let mut published = None;
    metrics::gauge!("grading_jobs_active").increment(1.0);

    while !job.state.is_terminal() {
        let span_state = job.state.name();
        let proceeded = match job.state.clone() {
            JobState::Selected { attempt } => dispatch(&ctx, &mut job, attempt, &mut cancel).await,
            JobState::Polling { task_id, attempt } => {
                poll(&mut ctx, &mut job, &task_id, attempt, &mut cancel).await
            }
            JobState::Reconciling { attempt, .. } => {
                match reconcile(&ctx, &mut job, attempt, &mut cancel).await {
                    Some(result) => {
                        published = result;
                        true
                    }
                    None => false,
                }
            }
            JobState::Completed | JobState::Failed { .. } => break,
        };

        if !proceeded {
            job.cancel();
        }
        if span_state == "polling" && !matches!(job.state, JobState::Polling { .. }) {
            if let Some(feed) = ctx.status_feed.as_ref() {
                feed.unwatch(&job.submission_id).await;
            }
        }

        ctx.board.record(&job).await;
        log_transition(&job, span_state);
    }

    ctx.board.finish(&job, published, &ctx.cache).await;

    let status = match &job.state {
        JobState::Completed => "completed",
        JobState::Failed { failure: JobFailure::Cancelled } => "cancelled",
        _ => "failed",
    };
    metrics::counter!("grading_jobs_total", "status" => status).increment(1);
    metrics::histogram!("grading_job_duration_seconds").record(started.elapsed().as_secs_f64());
    metrics::gauge!("grading_jobs_active").decrement(1.0);

    job
}

async fn dispatch(
    ctx: &JobContext,
    job: &mut GradingJob,
    attempt: u32,
    cancel: &mut watch::Receiver<bool>,
) -> bool {
    if attempt > 0 && !wait_or_cancel(cancel, ctx.policy.delay_for(attempt - 1)).await {
        return false;
    }

    let spec = &ctx.dispatch;
    let submission_ids = [job.submission_id.clone()];
    let request = DispatchRequest {
        course_id: &spec.course_id,
        assignment_id: &spec.assignment_id,
        submission_ids: &submission_ids,
        rubric: &spec.rubric,
        regrade_context: spec.regrade_context.as_deref(),
    };

    let Some(outcome) = until_cancelled(cancel, ctx.binding.submit_grading(request, &spec.auth)).await
    else {
        return false;
    };
    if let Err(err) = &outcome {
        metrics::counter!("grading_dispatch_retries_total").increment(1);
        tracing::warn!(
            submission_id = %job.submission_id,
            batch_id = %job.batch_id,
            attempt = attempt + 1,
            error = %err,
            "submit_grading failed"
        );
    }
    job.on_dispatch(outcome, &ctx.policy);
    true
}

async fn poll(
    ctx: &mut JobContext,
    job: &mut GradingJob,
    task_id: &str,
    attempt: u32,
    cancel: &mut watch::Receiver<bool>,
) -> bool {
    let bulk = ctx.binding.bulk_status_accepts(&job.submission_id);
    let outcome = match ctx.status_feed.as_mut().filter(|_| bulk) {
        Some(feed) => feed.next_status(&job.submission_id, cancel).await,
        None => {
            if !wait_or_cancel(cancel, ctx.policy.delay_for(attempt)).await {
                return false;
            }
            metrics::counter!("grading_poll_attempts_total").increment(1);
            until_cancelled(cancel, ctx.binding.poll_status(task_id, &ctx.dispatch.auth)).await
        }
    };
    let Some(outcome) = outcome else {
        return false;
    };

    if let Err(err) = &outcome {
        tracing::warn!(
            submission_id = %job.submission_id,
            batch_id = %job.batch_id,
            task_id,
            attempt = attempt + 1,
            error = %err,
            "Status poll failed"
        );
    }
    job.on_poll(outcome, &ctx.policy);
    true
}

/// `Some(result)` means the call went through; the inner value is the
/// graded result once the job completes.
async fn reconcile(
    ctx: &JobContext,
    job: &mut GradingJob,
    attempt: u32,
    cancel: &mut watch::Receiver<bool>,
) -> Option<Option<GradedResult>> {
    if attempt > 0 && !wait_or_cancel(cancel, ctx.policy.delay_for(attempt - 1)).await {
        return None;
    }

    let outcome =
        until_cancelled(cancel, ctx.binding.fetch_result(&job.submission_id, &ctx.dispatch.auth))
            .await?;
    if let Err(err) = &outcome {
        metrics::counter!("grading_fetch_retries_total").increment(1);
        tracing::info!(
            submission_id = %job.submission_id,
            batch_id = %job.batch_id,
            attempt = attempt + 1,
            error = %err,
            "Graded result not available yet"
        );
    }
    Some(job.on_fetch(outcome, &ctx.policy))
}

fn log_transition(job: &GradingJob, from: &'static str) {
    match &job.state {
        JobState::Failed { failure } => tracing::warn!(
            submission_id = %job.submission_id,
            batch_id = %job.batch_id,
            from,
            failure = %failure,
            "Grading job failed"
        ),
        JobState::Completed => tracing::info!(
            submission_id = %job.submission_id,
            batch_id = %job.batch_id,
            "Grading job completed"
        ),
        state if state.name() != from => tracing::info!(
            submission_id = %job.submission_id,
            batch_id = %job.batch_id,
            task_id = state.task_id().unwrap_or_default(),
            from,
            to = state.name(),
            "Grading job advanced"
        ),
        JobState::Selected { attempt }
        | JobState::Polling { attempt, .. }
        | JobState::Reconciling { attempt, .. } => tracing::debug!(
            submission_id = %job.submission_id,
            batch_id = %job.batch_id,
            state = from,
            attempt,
            "Grading job retrying"
        ),
    }
}

/// Resolves once cancellation was requested or every sender is gone.
async fn cancelled(cancel: &mut watch::Receiver<bool>) {
    loop {
        if *cancel.borrow_and_update() {
            return;
        }
        if cancel.changed().await.is_err() {
            return;
        }
    }
}

/// Runs `future` unless cancellation wins first.
pub(super) async fn until_cancelled<F>(cancel: &mut watch::Receiver<bool>, future: F) -> Option<F::Output>
where
    F: Future,
{
    if *cancel.borrow() {
        return None;
    }
    tokio::select! {
        biased;
        _ = cancelled(cancel) => None,
        output = future => Some(output),
    }
}

/// Sleeps for `duration`; `false` if cancelled meanwhile.
pub(super) async fn wait_or_cancel(cancel: &mut watch::Receiver<bool>, duration: Duration) -> bool {
    until_cancelled(cancel, sleep(duration)).await.is_some()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn dropped_sender_counts_as_cancellation() {
        let (tx, mut rx) = watch::channel(false);
        drop(tx);
        assert!(!wait_or_cancel(&mut rx, Duration::from_secs(30)).await);
    }

    #[tokio::test]
    async fn pending_future_finishes_without_cancellation() {
        let (_tx, mut rx) = watch::channel(false);
        assert_eq!(until_cancelled(&mut rx, async { 5 }).await, Some(5));
        assert!(wait_or_cancel(&mut rx, Duration::from_millis(1)).await);
    }
}
