use std::collections::HashMap;
use std::sync::Arc;

use time::OffsetDateTime;
use tokio::sync::RwLock;
use uuid::Uuid;

use crate::core::config::Settings;
use crate::services::platform::Platform;
use crate::services::registry::PlatformRegistry;
use crate::tasks::grading::GradingOrchestrator;

/// One assignment being graded: an orchestrator bound to a platform,
/// course and assignment.
#[derive(Debug)]
pub(crate) struct GradingSession {
    pub(crate) id: Uuid,
    pub(crate) platform: Platform,
    pub(crate) course_id: String,
    pub(crate) assignment_id: String,
    pub(crate) email: Option<String>,
    pub(crate) created_at: OffsetDateTime,
    pub(crate) orchestrator: GradingOrchestrator,
}

#[derive(Clone)]
pub(crate) struct AppState {
    inner: Arc<InnerState>,
}

struct InnerState {
    settings: Settings,
    registry: Arc<PlatformRegistry>,
    sessions: RwLock<HashMap<Uuid, Arc<GradingSession>>>,
}

impl AppState {
    pub(crate) fn new(settings: Settings, registry: Arc<PlatformRegistry>) -> Self {
        Self {
            inner: Arc::new(InnerState { settings, registry, sessions: RwLock::new(HashMap::new()) }),
        }
    }

    pub(crate) fn settings(&self) -> &Settings {
        &self.inner.settings
    }

    pub(crate) fn registry(&self) -> &PlatformRegistry {
        &self.inner.registry
    }

    pub(crate) async fn session(&self, id: Uuid) -> Option<Arc<GradingSession>> {
        self.inner.sessions.read().await.get(&id).cloned()
    }

    pub(crate) async fn insert_session(&self, session: GradingSession) -> Arc<GradingSession> {
        let session = Arc::new(session);
        self.inner.sessions.write().await.insert(session.id, session.clone());
        session
    }

    pub(crate) async fn remove_session(&self, id: Uuid) -> Option<Arc<GradingSession>> {
        self.inner.sessions.write().await.remove(&id)
    }

    pub(crate) async fn session_count(&self) -> usize {
        self.inner.sessions.read().await.len()
    }

    /// Cancels the batches of every session; used on process shutdown.
    pub(crate) async fn shutdown_sessions(&self) -> usize {
        let sessions: Vec<_> = self.inner.sessions.read().await.values().cloned().collect();
        let mut cancelled = 0;
        for session in sessions {
            cancelled += session.orchestrator.shutdown().await;
        }
        cancelled
    }
}
