//! The interactive session currently registered with the dispatcher.

use std::fmt;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Instant;

use crate::orchestrator::AuthorizationOrchestrator;

static NEXT_SESSION_ID: AtomicU64 = AtomicU64::new(1);

/// Opaque identifier of an interactive session.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct SessionId(u64);

impl SessionId {
    fn next() -> Self {
        Self(NEXT_SESSION_ID.fetch_add(1, Ordering::Relaxed))
    }
}

impl fmt::Display for SessionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "session-{}", self.0)
    }
}

/// One interactive command's claim on the user agent.
pub struct InteractiveSession {
    id: SessionId,
    correlation_id: String,
    orchestrator: Arc<AuthorizationOrchestrator>,
    started: Instant,
}

impl InteractiveSession {
    pub fn new(correlation_id: impl Into<String>, orchestrator: Arc<AuthorizationOrchestrator>) -> Self {
        Self {
            id: SessionId::next(),
            correlation_id: correlation_id.into(),
            orchestrator,
            started: Instant::now(),
        }
    }

    pub fn id(&self) -> SessionId {
        self.id
    }

    pub fn correlation_id(&self) -> &str {
        &self.correlation_id
    }

    pub fn orchestrator(&self) -> &Arc<AuthorizationOrchestrator> {
        &self.orchestrator
    }

    pub fn elapsed_secs(&self) -> f64 {
        self.started.elapsed().as_secs_f64()
    }
}
