//! Per-request transport session lifecycle.
//!
//! `Created → Active → Closed`, one session per inbound request, never
//! reused. `Closed` is reached exactly once: explicitly through
//! [`TransportSession::close`], or from `Drop` when the request future is
//! abandoned (client disconnect) or unwinds.

use std::sync::Arc;
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::time::Instant;

use gateway_protocol::{HandlerResult, RequestId, RpcError, RpcResponse};
use tracing::debug;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    Created,
    Active,
    Closed,
}

/// Terminal event that closed a session.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CloseReason {
    Completed,
    Failed,
    Disconnected,
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum SessionError {
    #[error("Session {id} cannot move from {from:?} to {to:?}")]
    InvalidTransition {
        id: String,
        from: SessionState,
        to: SessionState,
    },
}

/// Lifecycle hooks exposed to the dispatch layer.
pub trait SessionObserver: Send + Sync {
    fn on_created(&self, _session_id: &str) {}
    fn on_active(&self, _session_id: &str, _correlation: Option<&RequestId>) {}
    fn on_closed(&self, _session_id: &str, _reason: CloseReason) {}
}

/// One request's protocol session.
pub struct TransportSession {
    id: String,
    state: SessionState,
    correlation: Option<RequestId>,
    opened_at: Instant,
    observer: Option<Arc<dyn SessionObserver>>,
}

impl TransportSession {
    /// Allocate a session for a newly arrived request.
    pub fn open(observer: Option<Arc<dyn SessionObserver>>) -> Self {
        let session = Self {
            id: uuid::Uuid::new_v4().to_string(),
            state: SessionState::Created,
            correlation: None,
            opened_at: Instant::now(),
            observer,
        };
        debug!(session_id = %session.id, "session created");
        if let Some(observer) = &session.observer {
            observer.on_created(&session.id);
        }
        session
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn state(&self) -> SessionState {
        self.state
    }

    /// The request id this session answers with.
    pub fn correlation_id(&self) -> Option<&RequestId> {
        self.correlation.as_ref()
    }

    /// Bind the session to its request body. Only valid from `Created`.
    pub fn activate(&mut self, correlation: Option<RequestId>) -> Result<(), SessionError> {
        if self.state != SessionState::Created {
            return Err(SessionError::InvalidTransition {
                id: self.id.clone(),
                from: self.state,
                to: SessionState::Active,
            });
        }
        self.state = SessionState::Active;
        self.correlation = correlation;
        debug!(session_id = %self.id, correlation = ?self.correlation, "session active");
        if let Some(observer) = &self.observer {
            observer.on_active(&self.id, self.correlation.as_ref());
        }
        Ok(())
    }

    /// Build the response for this session's request, always answering with
    /// the session's own correlation id.
    pub fn respond(&self, result: HandlerResult) -> RpcResponse {
        match (&self.correlation, result) {
            (Some(id), result) => RpcResponse::from_result(id.clone(), result),
            (None, Err(err)) => RpcResponse::error(None, err),
            (None, Ok(_)) => RpcResponse::error(
                None,
                RpcError::invalid_request("Request has no id to answer"),
            ),
        }
    }

    /// Release the session. Returns `true` if this call closed it; later
    /// calls are no-ops.
    pub fn close(&mut self, reason: CloseReason) -> bool {
        if self.state == SessionState::Closed {
            return false;
        }
        self.state = SessionState::Closed;
        debug!(
            session_id = %self.id,
            ?reason,
            elapsed_ms = self.opened_at.elapsed().as_millis() as u64,
            "session closed"
        );
        if let Some(observer) = &self.observer {
            observer.on_closed(&self.id, reason);
        }
        true
    }
}

impl Drop for TransportSession {
    fn drop(&mut self) {
        self.close(CloseReason::Disconnected);
    }
}

impl std::fmt::Debug for TransportSession {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TransportSession")
            .field("id", &self.id)
            .field("state", &self.state)
            .field("correlation", &self.correlation)
            .finish()
    }
}

/// Counts open and total sessions, forwarding to an optional inner observer.
#[derive(Default)]
pub struct SessionCounter {
    active: AtomicUsize,
    total: AtomicU64,
    inner: Option<Arc<dyn SessionObserver>>,
}

impl SessionCounter {
    pub fn new(inner: Option<Arc<dyn SessionObserver>>) -> Self {
        Self {
            inner,
            ..Default::default()
        }
    }

    /// Sessions created and not yet closed.
    pub fn active(&self) -> usize {
        self.active.load(Ordering::Relaxed)
    }

    /// Sessions created since start.
    pub fn total(&self) -> u64 {
        self.total.load(Ordering::Relaxed)
    }
}

impl SessionObserver for SessionCounter {
    fn on_created(&self, session_id: &str) {
        self.active.fetch_add(1, Ordering::Relaxed);
        self.total.fetch_add(1, Ordering::Relaxed);
        if let Some(inner) = &self.inner {
            inner.on_created(session_id);
        }
    }

    fn on_active(&self, session_id: &str, correlation: Option<&RequestId>) {
        if let Some(inner) = &self.inner {
            inner.on_active(session_id, correlation);
        }
    }

    fn on_closed(&self, session_id: &str, reason: CloseReason) {
        self.active.fetch_sub(1, Ordering::Relaxed);
        if let Some(inner) = &self.inner {
            inner.on_closed(session_id, reason);
        }
    }
}
