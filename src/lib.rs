pub(crate) mod api;
pub(crate) mod core;
pub mod schemas;
pub mod services;
pub mod tasks;

#[cfg(test)]
mod test_support;

use std::path::Path;

use anyhow::Context;

use crate::core::{config::Settings, shutdown::shutdown_signal, state::AppState, telemetry};
use crate::schemas::grading::BatchFile;
use crate::services::platform::AuthContext;
use crate::services::registry;
use crate::tasks::grading::{BatchRequest, GradingOrchestrator, RetryPolicy};

pub async fn run() -> anyhow::Result<()> {
    dotenvy::dotenv().ok();

    let settings = Settings::load()?;
    telemetry::init_tracing(&settings)?;
    core::metrics::init(&settings)?;

    let registry = registry::global(&settings)?;
    let state = AppState::new(settings, registry);

    let app = api::router::router(state.clone());
    let listener = tokio::net::TcpListener::bind(state.settings().server_addr()).await?;

    tracing::info!(
        host = %state.settings().server_host(),
        port = state.settings().server_port(),
        environment = %state.settings().runtime().environment.as_str(),
        backend = %state.settings().backend().base_url,
        "LMS autograder listening"
    );

    let result = axum::serve(listener, app)
        .with_graceful_shutdown(async {
            shutdown_signal().await;
        })
        .await;

    let cancelled = state.shutdown_sessions().await;
    tracing::info!(batches = cancelled, "Grading sessions shut down");

    result?;

    Ok(())
}

/// Grades one batch described by a JSON file and prints the report.
pub async fn run_batch(path: &Path) -> anyhow::Result<()> {
    dotenvy::dotenv().ok();

    let settings = Settings::load()?;
    telemetry::init_tracing(&settings)?;
    core::metrics::init(&settings)?;

    let raw = tokio::fs::read_to_string(path)
        .await
        .with_context(|| format!("Failed to read batch file {}", path.display()))?;
    let file: BatchFile = serde_json::from_str(&raw).context("Failed to parse batch file")?;

    let registry = registry::global(&settings)?;
    let binding = registry.resolve_str(&file.platform)?;
    let orchestrator = GradingOrchestrator::new(binding, RetryPolicy::from_settings(&settings));

    let bearer = file.bearer_token.or_else(|| std::env::var("LMS_BEARER_TOKEN").ok());
    let auth = AuthContext::new(bearer, file.email);

    let roster_size = orchestrator
        .refresh_roster(&file.course_id, &file.assignment_id, &auth)
        .await
        .context("Failed to fetch submission roster")?;
    let submission_ids = if file.submission_ids.is_empty() {
        orchestrator.submissions().await.into_iter().map(|row| row.id).collect()
    } else {
        file.submission_ids
    };
    tracing::info!(roster_size, selected = submission_ids.len(), "Starting grading batch");

    let handle = orchestrator
        .grade_batch(BatchRequest {
            course_id: file.course_id,
            assignment_id: file.assignment_id,
            submission_ids,
            rubric: file.rubric,
            auth,
        })
        .await
        .context("Grading batch was refused")?;

    let batch_id = handle.batch_id();
    let mut progress = handle.subscribe();
    let shutdown = shutdown_signal();
    tokio::pin!(shutdown);
    let mut cancel_requested = false;

    loop {
        tokio::select! {
            changed = progress.changed() => {
                if changed.is_err() {
                    break;
                }
                let current = progress.borrow_and_update().clone();
                tracing::info!(
                    %batch_id,
                    graded = %current,
                    failed = current.failed,
                    cancelled = current.cancelled,
                    "Batch progress"
                );
                if current.finished {
                    break;
                }
            }
            _ = &mut shutdown, if !cancel_requested => {
                cancel_requested = true;
                orchestrator.cancel_batch(batch_id).await;
            }
        }
    }

    let report = handle.wait().await.context("Grading batch supervisor failed")?;
    let output = serde_json::json!({
        "report": report,
        "results": orchestrator.results().await,
        "export": orchestrator.export_rows().await,
    });
    println!("{}", serde_json::to_string_pretty(&output)?);

    Ok(())
}
