//! Gateway Tool Implementations
//!
//! Each tool implements the [`Tool`] trait and is registered once with the
//! dispatch layer at startup. Tools are stateless: the tenant's client and
//! route are not passed in but looked up from the ambient
//! [`context`] bound for the current request.

pub mod client;
pub mod context;
pub mod dehydrate;
pub mod dehydrate_file;
pub mod entities;
pub mod rehydrate;

use gateway_protocol::ToolFailure;
use serde::de::DeserializeOwned;
use serde_json::{Value, json};

pub use client::{ClientFactory, ClientSettings, DetectClient, PollSettings, UpstreamError};
pub use context::{ContextError, RequestContext};
pub use dehydrate::DehydrateTool;
pub use dehydrate_file::DehydrateFileTool;
pub use rehydrate::RehydrateTool;

/// Result of a tool invocation.
pub type ToolResult = Result<Value, ToolError>;

/// Everything a tool call can fail with.
#[derive(Debug, thiserror::Error)]
pub enum ToolError {
    /// Arguments did not match the tool's input schema.
    #[error("Invalid arguments: {0}")]
    InvalidArguments(String),
    /// Arguments were well-formed but semantically unusable.
    #[error("{0}")]
    Domain(String),
    #[error(transparent)]
    Upstream(#[from] UpstreamError),
    /// The tool ran outside a request scope. Always a bug in the caller.
    #[error(transparent)]
    Context(#[from] ContextError),
}

impl ToolError {
    pub fn domain(message: impl Into<String>) -> Self {
        Self::Domain(message.into())
    }

    /// Flatten into the `{ error, message, code?, details? }` envelope.
    pub fn to_failure(&self) -> ToolFailure {
        let failure = ToolFailure::new(self.to_string());
        match self {
            Self::InvalidArguments(_) => failure.with_code("INVALID_ARGUMENTS"),
            Self::Domain(_) => failure,
            Self::Upstream(e) => {
                let failure = match e.status {
                    Some(status) => failure.with_code(status),
                    None => failure.with_code("UPSTREAM_UNAVAILABLE"),
                };
                match &e.details {
                    Some(details) => failure.with_details(details.clone()),
                    None => failure,
                }
            }
            Self::Context(_) => failure.with_code("NO_ACTIVE_CONTEXT"),
        }
    }
}

/// Trait implemented by all gateway tools.
///
/// Implementations must not capture tenant data: anything tenant-specific
/// comes from [`context::lookup`] during `call`.
pub trait Tool: Send + Sync {
    /// Name used in `tools/call` (e.g., "dehydrate").
    fn name(&self) -> &str;

    /// Human-readable description shown in `tools/list`.
    fn description(&self) -> &str;

    /// JSON Schema of the `arguments` object.
    fn input_schema(&self) -> Value;

    /// JSON Schema of the successful result, if declared.
    fn output_schema(&self) -> Option<Value> {
        None
    }

    /// Run the tool with its `arguments` object.
    fn call(&self, arguments: Value) -> impl std::future::Future<Output = ToolResult> + Send;
}

/// Deserialize tool arguments into their typed form.
pub fn parse_arguments<T: DeserializeOwned>(arguments: Value) -> Result<T, ToolError> {
    let arguments = if arguments.is_null() { json!({}) } else { arguments };
    serde_json::from_value(arguments).map_err(|e| ToolError::InvalidArguments(e.to_string()))
}
