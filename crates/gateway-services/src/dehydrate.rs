//! `dehydrate`: replace sensitive values in text with vault tokens.

use gateway_protocol::ToolNames;
use serde::{Deserialize, Serialize};
use serde_json::{Value, json};
use tracing::debug;

use crate::client::{DeidentifiedText, DeidentifyOptions};
use crate::entities::{EntityType, TokenType, parse_entity_types, parse_token_type};
use crate::{Tool, ToolError, ToolResult, context, parse_arguments};

pub struct DehydrateTool;

#[derive(Deserialize)]
#[serde(rename_all = "camelCase", deny_unknown_fields)]
struct DehydrateArgs {
    input_string: String,
    #[serde(default)]
    entities: Option<Vec<String>>,
    #[serde(default)]
    token_type: Option<String>,
    #[serde(default)]
    allow_regex: Option<Vec<String>>,
    #[serde(default)]
    restrict_regex: Option<Vec<String>>,
}

/// Entity as reported to the caller. Fields the service left out are
/// omitted rather than sent as `null`.
#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct EntityOutput<'a> {
    #[serde(skip_serializing_if = "Option::is_none")]
    token: Option<&'a str>,
    #[serde(skip_serializing_if = "Option::is_none")]
    entity_type: Option<&'a str>,
    #[serde(skip_serializing_if = "Option::is_none")]
    location: Option<&'a Value>,
}

fn structured_output(result: &DeidentifiedText) -> Value {
    let entities: Vec<EntityOutput<'_>> = result
        .entities
        .iter()
        .map(|e| EntityOutput {
            token: e.token.as_deref(),
            entity_type: e.entity_type.as_deref(),
            location: e.location.as_ref(),
        })
        .collect();

    json!({
        "processedText": result.processed_text,
        "wordCount": result.word_count,
        "charCount": result.character_count,
        "entities": entities,
    })
}

impl Tool for DehydrateTool {
    fn name(&self) -> &str {
        ToolNames::DEHYDRATE
    }

    fn description(&self) -> &str {
        "De-identify sensitive data in text. Detected values are stored in the vault \
         and replaced by tokens that `rehydrate` can turn back into plaintext."
    }

    fn input_schema(&self) -> Value {
        json!({
            "type": "object",
            "properties": {
                "inputString": { "type": "string", "description": "Text to de-identify" },
                "entities": {
                    "type": "array",
                    "items": { "type": "string", "enum": EntityType::wire_names() },
                    "description": "Entity types to detect (default: all)"
                },
                "tokenType": {
                    "type": "string",
                    "enum": TokenType::wire_names()
                },
                "allowRegex": { "type": "array", "items": { "type": "string" } },
                "restrictRegex": { "type": "array", "items": { "type": "string" } }
            },
            "required": ["inputString"],
            "additionalProperties": false
        })
    }

    fn output_schema(&self) -> Option<Value> {
        Some(json!({
            "type": "object",
            "properties": {
                "processedText": { "type": "string" },
                "wordCount": { "type": "integer" },
                "charCount": { "type": "integer" },
                "entities": {
                    "type": "array",
                    "items": {
                        "type": "object",
                        "properties": {
                            "token": { "type": "string" },
                            "entityType": { "type": "string" },
                            "location": { "type": "object" }
                        }
                    }
                }
            },
            "required": ["processedText"]
        }))
    }

    async fn call(&self, arguments: Value) -> ToolResult {
        let args: DehydrateArgs = parse_arguments(arguments)?;
        if args.input_string.trim().is_empty() {
            return Err(ToolError::domain("inputString must not be empty"));
        }

        let options = DeidentifyOptions {
            entity_types: parse_entity_types(args.entities.as_deref())?,
            token_type: parse_token_type(args.token_type.as_deref())?,
            allow_regex: args.allow_regex,
            restrict_regex: args.restrict_regex,
        };

        let ctx = context::lookup()?;
        debug!(
            vault_id = ctx.route().vault_id(),
            chars = args.input_string.len(),
            "dehydrating text"
        );

        let result = ctx.client().deidentify_text(&args.input_string, &options).await?;
        Ok(structured_output(&result))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn rejects_blank_input_before_any_lookup() {
        let err = DehydrateTool
            .call(json!({ "inputString": "   " }))
            .await
            .unwrap_err();
        assert!(matches!(err, ToolError::Domain(_)));
    }

    #[tokio::test]
    async fn rejects_unknown_arguments() {
        let err = DehydrateTool
            .call(json!({ "inputString": "x", "colour": "blue" }))
            .await
            .unwrap_err();
        assert!(matches!(err, ToolError::InvalidArguments(_)));
    }

    #[tokio::test]
    async fn valid_input_outside_scope_is_a_context_error() {
        let err = DehydrateTool
            .call(json!({ "inputString": "My SSN is 123-45-6789" }))
            .await
            .unwrap_err();
        assert!(matches!(err, ToolError::Context(_)));
    }

    #[test]
    fn schema_lists_entity_names() {
        let schema = DehydrateTool.input_schema();
        let names = schema["properties"]["entities"]["items"]["enum"].as_array().unwrap();
        assert!(names.iter().any(|n| n == "ssn"));
        assert_eq!(schema["required"], json!(["inputString"]));
    }

    #[test]
    fn token_type_schema_matches_vocabulary() {
        let schema = DehydrateTool.input_schema();
        assert_eq!(schema["properties"]["tokenType"]["enum"], json!(TokenType::wire_names()));
        assert_eq!(
            schema["properties"]["tokenType"]["enum"].as_array().unwrap().len(),
            TokenType::ALL.len()
        );
    }

    #[test]
    fn sparse_entities_omit_missing_fields() {
        let result: DeidentifiedText = serde_json::from_value(json!({
            "processed_text": "x",
            "entities": [
                {"entity_type": "name"},
                {"token": "[SSN_1]", "entity_type": "ssn", "location": {"start_index": 3}}
            ]
        }))
        .unwrap();

        let output = structured_output(&result);
        assert_eq!(output["entities"][0], json!({"entityType": "name"}));
        assert_eq!(
            output["entities"][1],
            json!({"token": "[SSN_1]", "entityType": "ssn", "location": {"start_index": 3}})
        );
        assert_eq!(output["wordCount"], 0);
        assert!(!output.to_string().contains("null"));
    }
}
