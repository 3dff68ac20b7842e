//! Gateway Server: routes JSON-RPC requests to registered tools.
//!
//! The server owns the tool registry and the client factory, and provides
//! the `RequestHandler` implementation for the transport layer. For every
//! request it builds the tenant's upstream client and runs dispatch inside
//! that tenant's request context.

pub mod registry;
pub mod router;

pub use registry::{RegistryError, ToolRegistry};
pub use router::GatewayServer;
