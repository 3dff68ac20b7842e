//! `rehydrate`: turn vault tokens in text back into plaintext.

use gateway_protocol::ToolNames;
use serde::Deserialize;
use serde_json::{Value, json};
use tracing::debug;

use crate::{Tool, ToolError, ToolResult, context, parse_arguments};

pub struct RehydrateTool;

#[derive(Deserialize)]
#[serde(rename_all = "camelCase", deny_unknown_fields)]
struct RehydrateArgs {
    input_string: String,
}

impl Tool for RehydrateTool {
    fn name(&self) -> &str {
        ToolNames::REHYDRATE
    }

    fn description(&self) -> &str {
        "Re-identify text previously processed by `dehydrate`, replacing vault tokens \
         with the original values the caller is allowed to see."
    }

    fn input_schema(&self) -> Value {
        json!({
            "type": "object",
            "properties": {
                "inputString": { "type": "string", "description": "Text containing vault tokens" }
            },
            "required": ["inputString"],
            "additionalProperties": false
        })
    }

    fn output_schema(&self) -> Option<Value> {
        Some(json!({
            "type": "object",
            "properties": { "processedText": { "type": "string" } },
            "required": ["processedText"]
        }))
    }

    async fn call(&self, arguments: Value) -> ToolResult {
        let args: RehydrateArgs = parse_arguments(arguments)?;
        if args.input_string.trim().is_empty() {
            return Err(ToolError::domain("inputString must not be empty"));
        }

        let ctx = context::lookup()?;
        debug!(vault_id = ctx.route().vault_id(), "rehydrating text");

        let result = ctx.client().reidentify_text(&args.input_string).await?;
        Ok(json!({ "processedText": result.text }))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn missing_input_is_invalid_arguments() {
        let err = RehydrateTool.call(json!({})).await.unwrap_err();
        assert!(matches!(err, ToolError::InvalidArguments(_)));
    }
}
