//! Per-request correlation context
//!
//! One correlation id per logical request, bound to the task executing it via
//! a tokio task-local. Anything running inside `CorrelationContext::scope`
//! (protocol calls, logs, token requests) can read it back without it being
//! threaded through every signature. Sibling tasks never observe each other's
//! id because the binding lives on the future, not on a worker thread.

use std::future::Future;

use tracing::error;
use uuid::Uuid;

tokio::task_local! {
    static CORRELATION_ID: String;
}

/// The correlation id of one logical request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CorrelationContext {
    correlation_id: String,
}

impl CorrelationContext {
    /// Create a context with a fresh random UUID.
    pub fn generate() -> Self {
        Self {
            correlation_id: Uuid::new_v4().to_string(),
        }
    }

    /// Rebuild a context from an id handed across a process or thread
    /// boundary (e.g. echoed back by the user agent).
    pub fn from_id(correlation_id: impl Into<String>) -> Self {
        Self {
            correlation_id: correlation_id.into(),
        }
    }

    pub fn correlation_id(&self) -> &str {
        &self.correlation_id
    }

    /// Run `fut` with this context bound.
    pub fn scope<F: Future>(self, fut: F) -> impl Future<Output = F::Output> {
        CORRELATION_ID.scope(self.correlation_id, fut)
    }

    /// Run a synchronous closure with this context bound.
    pub fn sync_scope<R>(self, f: impl FnOnce() -> R) -> R {
        CORRELATION_ID.sync_scope(self.correlation_id, f)
    }
}

/// The correlation id bound to the current task, if any.
pub fn current_correlation_id() -> Option<String> {
    CORRELATION_ID.try_with(|id| id.clone()).ok()
}

/// The current correlation id parsed as a strict UUID.
///
/// Returns `None` (and logs) when the bound id is not a UUID; callers omit the
/// id rather than failing the request.
pub fn current_correlation_uuid() -> Option<Uuid> {
    let id = current_correlation_id()?;
    match Uuid::parse_str(&id) {
        Ok(uuid) => Some(uuid),
        Err(e) => {
            error!(correlation_id = %id, error = %e, "correlation id on request context is not a UUID");
            None
        }
    }
}
