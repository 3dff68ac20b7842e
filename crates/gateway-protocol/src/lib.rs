//! Vault Gateway - Protocol Types
//!
//! JSON-RPC 2.0 envelopes spoken on the gateway endpoint, plus the pure,
//! per-request resolvers that turn raw request inputs into a tenant:
//! the caller's [`Credential`] and the [`VaultRoute`] it is addressed to.
//! Nothing in this crate performs I/O.

pub mod credential;
pub mod error;
pub mod jsonrpc;
pub mod methods;
pub mod route;

pub use credential::{Credential, CredentialError};
pub use error::{GatewayErrorCode, RpcError, RpcErrorCode, ToolFailure};
pub use jsonrpc::{
    HandlerResult, RequestId, RpcErrorResponse, RpcRequest, RpcResponse, RpcSuccessResponse,
};
pub use methods::{Methods, ToolNames};
pub use route::{RouteDefaults, RouteError, RouteParams, VaultRoute};

/// A fully resolved caller: who they are and which vault they address.
///
/// Built by the transport from one request's inputs and handed to the
/// dispatch layer. Never outlives the request.
#[derive(Debug)]
pub struct Tenant {
    pub credential: Credential,
    pub route: VaultRoute,
}

impl Tenant {
    pub fn new(credential: Credential, route: VaultRoute) -> Self {
        Self { credential, route }
    }
}
