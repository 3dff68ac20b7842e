//! Gateway Server Router: dispatches JSON-RPC requests to tools.

use std::sync::atomic::{AtomicU8, Ordering};

use gateway_protocol::methods::PROTOCOL_VERSION;
use gateway_protocol::{HandlerResult, Methods, RpcError, Tenant};
use gateway_services::{ClientFactory, RequestContext, Tool, ToolError, context};
use gateway_transport::RequestHandler;
use serde::Deserialize;
use serde_json::{Value, json};
use tracing::{Instrument, error, info, info_span, warn};

use crate::registry::{RegistryError, ToolRegistry};

/// The Gateway Server: owns the tool registry and routes requests.
pub struct GatewayServer {
    /// Registered tools
    registry: ToolRegistry,
    /// Builds one upstream client per request
    factory: ClientFactory,
    /// Server state
    state: AtomicU8,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
enum ServerState {
    Uninitialized = 0,
    Running = 1,
    Shutdown = 2,
}

impl ServerState {
    fn from_u8(raw: u8) -> Self {
        match raw {
            1 => Self::Running,
            2 => Self::Shutdown,
            _ => Self::Uninitialized,
        }
    }
}

/// `tools/call` parameters.
#[derive(Debug, Deserialize)]
struct CallToolParams {
    name: String,
    #[serde(default)]
    arguments: Value,
}

impl GatewayServer {
    pub fn new(factory: ClientFactory) -> Self {
        Self {
            registry: ToolRegistry::new(),
            factory,
            state: AtomicU8::new(ServerState::Uninitialized as u8),
        }
    }

    /// Register a tool with the server.
    pub fn register_tool<T: Tool + 'static>(&mut self, tool: T) -> Result<(), RegistryError> {
        self.registry.register(tool)
    }

    pub fn registry(&self) -> &ToolRegistry {
        &self.registry
    }

    /// Mark the server as ready to serve requests.
    pub fn initialize(&mut self) {
        if self.registry.is_empty() {
            warn!("Gateway server initialized with no tools; requests will be refused");
        }
        self.state.store(ServerState::Running as u8, Ordering::Release);
        info!("Gateway server initialized ({} tools)", self.registry.len());
    }

    /// Stop accepting requests. Requests already dispatched run to completion.
    pub fn shutdown(&self) {
        let previous = self.state.swap(ServerState::Shutdown as u8, Ordering::AcqRel);
        if ServerState::from_u8(previous) != ServerState::Shutdown {
            info!("Gateway server shut down");
        }
    }

    fn state(&self) -> ServerState {
        ServerState::from_u8(self.state.load(Ordering::Acquire))
    }

    /// Route a request to its method handler. Must run inside a request scope
    /// for tool calls to find their tenant.
    async fn dispatch(&self, method: &str, params: Option<Value>) -> HandlerResult {
        match method {
            Methods::INITIALIZE => Ok(json!({
                "protocolVersion": PROTOCOL_VERSION,
                "serverInfo": {
                    "name": env!("CARGO_PKG_NAME"),
                    "version": env!("CARGO_PKG_VERSION"),
                },
                "capabilities": { "tools": {} },
            })),
            Methods::INITIALIZED | Methods::PING => Ok(json!({})),
            Methods::TOOLS_LIST => Ok(json!({ "tools": self.registry.descriptors() })),
            Methods::TOOLS_CALL => self.call_tool(params).await,
            _ => Err(RpcError::method_not_found(method)),
        }
    }

    async fn call_tool(&self, params: Option<Value>) -> HandlerResult {
        let params = params.ok_or_else(|| RpcError::invalid_params("params required"))?;
        let CallToolParams { name, arguments } = serde_json::from_value(params)
            .map_err(|e| RpcError::invalid_params(format!("Invalid params: {e}")))?;

        let tool = self
            .registry
            .get(&name)
            .ok_or_else(|| RpcError::invalid_params(format!("Unknown tool: {name}")))?;

        let outcome = tool
            .call_dyn(arguments)
            .instrument(info_span!("tool", tool = %name))
            .await;

        Ok(match outcome {
            Ok(value) => tool_success(value),
            Err(e) => {
                match &e {
                    ToolError::Context(_) => error!(tool = %name, "Tool ran without request context"),
                    _ => warn!(tool = %name, "Tool failed: {e}"),
                }
                tool_failure(&e)
            }
        })
    }
}

fn tool_success(value: Value) -> Value {
    json!({
        "content": [{ "type": "text", "text": value.to_string() }],
        "structuredContent": value,
    })
}

fn tool_failure(err: &ToolError) -> Value {
    let failure = err.to_failure();
    json!({
        "content": [{ "type": "text", "text": failure.message }],
        "structuredContent": failure,
        "isError": true,
    })
}

impl RequestHandler for GatewayServer {
    async fn handle_request(
        &self,
        tenant: Tenant,
        method: &str,
        params: Option<Value>,
    ) -> HandlerResult {
        match self.state() {
            ServerState::Shutdown => return Err(RpcError::shutting_down()),
            ServerState::Uninitialized => return Err(RpcError::not_initialized()),
            ServerState::Running => {}
        }

        let Tenant { credential, route } = tenant;
        let client = self.factory.create(credential, route.clone());
        context::run(RequestContext::new(client, route), self.dispatch(method, params)).await
    }

    fn is_ready(&self) -> bool {
        self.state() == ServerState::Running && !self.registry.is_empty()
    }

    fn capabilities(&self) -> Vec<String> {
        self.registry.names()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use gateway_protocol::{Credential, RpcErrorCode, VaultRoute};
    use gateway_services::{ClientSettings, ToolResult, UpstreamError};

    /// Echoes the vault the ambient context points at.
    struct WhereAmI;

    impl Tool for WhereAmI {
        fn name(&self) -> &str {
            "where_am_i"
        }

        fn description(&self) -> &str {
            "Report the active vault"
        }

        fn input_schema(&self) -> Value {
            json!({"type": "object"})
        }

        async fn call(&self, _arguments: Value) -> ToolResult {
            let ctx = context::lookup()?;
            Ok(json!({
                "vaultId": ctx.route().vault_id(),
                "clusterId": ctx.route().cluster_id(),
                "kind": ctx.client().credential().kind(),
            }))
        }
    }

    struct Refuses;

    impl Tool for Refuses {
        fn name(&self) -> &str {
            "refuses"
        }

        fn description(&self) -> &str {
            "Always fails upstream"
        }

        fn input_schema(&self) -> Value {
            json!({"type": "object"})
        }

        async fn call(&self, _arguments: Value) -> ToolResult {
            Err(UpstreamError {
                status: Some(404),
                message: "Vault not found".into(),
                details: Some(json!(["vault_id"])),
            }
            .into())
        }
    }

    fn server() -> GatewayServer {
        let factory = ClientFactory::new(ClientSettings::default()).unwrap();
        let mut server = GatewayServer::new(factory);
        server.register_tool(WhereAmI).unwrap();
        server.register_tool(Refuses).unwrap();
        server.initialize();
        server
    }

    fn tenant(vault_id: &str, cluster: &str) -> Tenant {
        let route = VaultRoute::new(
            vault_id,
            format!("https://{cluster}.vault.skyflowapis.com"),
            None,
            None,
        )
        .unwrap();
        Tenant::new(Credential::bearer("tok"), route)
    }

    fn call(name: &str) -> Option<Value> {
        Some(json!({"name": name, "arguments": {}}))
    }

    #[tokio::test]
    async fn uninitialized_server_refuses() {
        let factory = ClientFactory::new(ClientSettings::default()).unwrap();
        let mut server = GatewayServer::new(factory);
        server.register_tool(WhereAmI).unwrap();
        assert!(!server.is_ready());

        let err = server
            .handle_request(tenant("v1", "c1"), Methods::PING, None)
            .await
            .unwrap_err();
        assert_eq!(err.error_code(), RpcErrorCode::ServerNotInitialized);
    }

    #[test]
    fn no_tools_means_not_ready() {
        let factory = ClientFactory::new(ClientSettings::default()).unwrap();
        let mut server = GatewayServer::new(factory);
        server.initialize();
        assert!(!server.is_ready());
    }

    #[tokio::test]
    async fn initialize_reports_capabilities() {
        let server = server();
        let result = server
            .handle_request(tenant("v1", "c1"), Methods::INITIALIZE, None)
            .await
            .unwrap();
        assert_eq!(result["protocolVersion"], PROTOCOL_VERSION);
        assert_eq!(result["capabilities"], json!({"tools": {}}));
        assert_eq!(server.capabilities(), vec!["where_am_i", "refuses"]);
    }

    #[tokio::test]
    async fn tool_sees_its_own_tenant() {
        let server = server();
        let result = server
            .handle_request(tenant("v1", "c1"), Methods::TOOLS_CALL, call("where_am_i"))
            .await
            .unwrap();
        assert_eq!(
            result["structuredContent"],
            json!({"vaultId": "v1", "clusterId": "c1", "kind": "bearer"})
        );
        assert!(result.get("isError").is_none());
    }

    #[tokio::test]
    async fn tool_failure_is_embedded() {
        let server = server();
        let result = server
            .handle_request(tenant("v1", "c1"), Methods::TOOLS_CALL, call("refuses"))
            .await
            .unwrap();
        assert_eq!(result["isError"], true);
        assert_eq!(
            result["structuredContent"],
            json!({"error": true, "message": "Vault not found", "code": 404, "details": ["vault_id"]})
        );
    }

    #[tokio::test]
    async fn unknown_tool_and_method() {
        let server = server();
        let err = server
            .handle_request(tenant("v1", "c1"), Methods::TOOLS_CALL, call("nope"))
            .await
            .unwrap_err();
        assert_eq!(err.error_code(), RpcErrorCode::InvalidParams);

        let err = server
            .handle_request(tenant("v1", "c1"), "resources/list", None)
            .await
            .unwrap_err();
        assert_eq!(err.error_code(), RpcErrorCode::MethodNotFound);
    }

    #[tokio::test]
    async fn shutdown_refuses_new_requests() {
        let server = server();
        server.shutdown();
        assert!(!server.is_ready());
        let err = server
            .handle_request(tenant("v1", "c1"), Methods::PING, None)
            .await
            .unwrap_err();
        assert_eq!(err.error_code(), RpcErrorCode::ServerShuttingDown);
    }
}
