//! Ambient per-request context.
//!
//! [`run`] binds a [`RequestContext`] to the dynamic extent of one future;
//! any code polled as part of that future, however many times it suspends
//! and resumes, reaches the same value through [`lookup`]. The binding is
//! Tokio task-local storage installed around each poll of the scoped future
//! only, so two requests interleaved on the same worker thread never see
//! each other's context.
//!
//! Futures handed to `tokio::spawn` leave the scope. Use [`spawn_scoped`]
//! to carry the current context into a new task.

use std::future::Future;
use std::sync::Arc;

use gateway_protocol::VaultRoute;
use tokio::task::JoinHandle;
use tracing::error;

use crate::client::DetectClient;

tokio::task_local! {
    static CURRENT: Arc<RequestContext>;
}

/// Tenant-specific dependencies of one request.
#[derive(Debug)]
pub struct RequestContext {
    client: DetectClient,
    route: VaultRoute,
}

impl RequestContext {
    pub fn new(client: DetectClient, route: VaultRoute) -> Self {
        Self { client, route }
    }

    pub fn client(&self) -> &DetectClient {
        &self.client
    }

    pub fn route(&self) -> &VaultRoute {
        &self.route
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
pub enum ContextError {
    #[error("No active request context: lookup was called outside of a request scope")]
    NoActiveContext,
}

/// Run `body` with `context` bound. The binding ends when `body` completes.
pub fn run<F: Future>(context: RequestContext, body: F) -> impl Future<Output = F::Output> {
    CURRENT.scope(Arc::new(context), body)
}

/// The context bound by the nearest enclosing [`run`].
pub fn lookup() -> Result<Arc<RequestContext>, ContextError> {
    CURRENT.try_with(Arc::clone).map_err(|_| {
        error!("request context lookup outside of a request scope");
        ContextError::NoActiveContext
    })
}

/// Spawn `future` on the runtime with the current context bound inside it.
pub fn spawn_scoped<F>(future: F) -> Result<JoinHandle<F::Output>, ContextError>
where
    F: Future + Send + 'static,
    F::Output: Send + 'static,
{
    let context = lookup()?;
    Ok(tokio::spawn(CURRENT.scope(context, future)))
}
