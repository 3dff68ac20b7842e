//! ToolRegistry: the immutable set of tools exposed by the gateway.
//!
//! Tools are registered once at startup. The registry holds no tenant data;
//! every call reads the tenant from the ambient request context.

use std::collections::HashMap;
use std::pin::Pin;

use gateway_services::{Tool, ToolResult};
use serde_json::{Value, json};
use tracing::info;

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum RegistryError {
    #[error("Tool already registered: {0}")]
    Duplicate(String),
}

/// Object-safe wrapper for the Tool trait.
pub(crate) trait ToolDyn: Send + Sync {
    fn name_dyn(&self) -> &str;
    fn descriptor_dyn(&self) -> Value;
    fn call_dyn(
        &self,
        arguments: Value,
    ) -> Pin<Box<dyn std::future::Future<Output = ToolResult> + Send + '_>>;
}

impl<T: Tool> ToolDyn for T {
    fn name_dyn(&self) -> &str {
        self.name()
    }

    fn descriptor_dyn(&self) -> Value {
        let mut descriptor = json!({
            "name": self.name(),
            "description": self.description(),
            "inputSchema": self.input_schema(),
        });
        if let Some(schema) = self.output_schema() {
            descriptor["outputSchema"] = schema;
        }
        descriptor
    }

    fn call_dyn(
        &self,
        arguments: Value,
    ) -> Pin<Box<dyn std::future::Future<Output = ToolResult> + Send + '_>> {
        Box::pin(self.call(arguments))
    }
}

/// Registered tools, in registration order.
#[derive(Default)]
pub struct ToolRegistry {
    tools: Vec<Box<dyn ToolDyn>>,
    by_name: HashMap<String, usize>,
}

impl ToolRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a tool. Names are unique.
    pub fn register<T: Tool + 'static>(&mut self, tool: T) -> Result<(), RegistryError> {
        let name = tool.name().to_string();
        if self.by_name.contains_key(&name) {
            return Err(RegistryError::Duplicate(name));
        }
        info!("Registering tool: {}", name);
        self.by_name.insert(name, self.tools.len());
        self.tools.push(Box::new(tool));
        Ok(())
    }

    pub(crate) fn get(&self, name: &str) -> Option<&dyn ToolDyn> {
        self.by_name.get(name).map(|&i| self.tools[i].as_ref())
    }

    pub fn contains(&self, name: &str) -> bool {
        self.by_name.contains_key(name)
    }

    /// Tool names in registration order.
    pub fn names(&self) -> Vec<String> {
        self.tools.iter().map(|t| t.name_dyn().to_string()).collect()
    }

    /// `tools/list` descriptors in registration order.
    pub fn descriptors(&self) -> Vec<Value> {
        self.tools.iter().map(|t| t.descriptor_dyn()).collect()
    }

    pub fn len(&self) -> usize {
        self.tools.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tools.is_empty()
    }
}
