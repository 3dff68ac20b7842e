//! `dehydrate_file`: de-identify a base64-encoded file.
//!
//! The payload is checked locally (valid base64, known format) before
//! anything is sent upstream; the upstream run is then polled until it
//! finishes.

use base64::Engine;
use base64::engine::general_purpose::STANDARD;
use gateway_protocol::ToolNames;
use serde::{Deserialize, Serialize};
use serde_json::{Value, json};
use tracing::debug;

use crate::client::{DeidentifiedFile, DeidentifyOptions};
use crate::entities::{EntityType, FileFormat, TokenType, parse_entity_types, parse_token_type};
use crate::{Tool, ToolError, ToolResult, context, parse_arguments};

pub struct DehydrateFileTool;

#[derive(Deserialize)]
#[serde(rename_all = "camelCase", deny_unknown_fields)]
struct DehydrateFileArgs {
    file_data: String,
    #[serde(default)]
    file_name: Option<String>,
    #[serde(default)]
    format: Option<String>,
    #[serde(default)]
    entities: Option<Vec<String>>,
    #[serde(default)]
    token_type: Option<String>,
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct FileOutput<'a> {
    run_id: &'a str,
    processed_file: &'a str,
    #[serde(skip_serializing_if = "Option::is_none")]
    processed_file_type: Option<&'a str>,
    #[serde(skip_serializing_if = "Option::is_none")]
    processed_file_extension: Option<&'a str>,
    #[serde(skip_serializing_if = "Option::is_none")]
    word_count: Option<u64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    char_count: Option<u64>,
}

fn structured_output(file: &DeidentifiedFile) -> Value {
    json!(FileOutput {
        run_id: &file.run_id,
        processed_file: &file.processed_file,
        processed_file_type: file.processed_file_type.as_deref(),
        processed_file_extension: file.processed_file_extension.as_deref(),
        word_count: file.word_count,
        char_count: file.character_count,
    })
}

impl DehydrateFileArgs {
    fn file_format(&self) -> Result<FileFormat, ToolError> {
        if let Some(format) = &self.format {
            return FileFormat::from_extension(format)
                .ok_or_else(|| ToolError::domain(format!("Unsupported file format: {format}")));
        }
        match &self.file_name {
            Some(name) => FileFormat::from_file_name(name).ok_or_else(|| {
                ToolError::domain(format!("Cannot determine a supported file format from {name}"))
            }),
            None => Err(ToolError::domain("Either format or fileName is required")),
        }
    }
}

impl Tool for DehydrateFileTool {
    fn name(&self) -> &str {
        ToolNames::DEHYDRATE_FILE
    }

    fn description(&self) -> &str {
        "De-identify sensitive data in a file (documents, images, audio). \
         Returns the processed file as base64."
    }

    fn input_schema(&self) -> Value {
        json!({
            "type": "object",
            "properties": {
                "fileData": { "type": "string", "description": "Base64-encoded file content" },
                "fileName": { "type": "string" },
                "format": { "type": "string", "description": "File extension, e.g. pdf" },
                "entities": {
                    "type": "array",
                    "items": { "type": "string", "enum": EntityType::wire_names() }
                },
                "tokenType": {
                    "type": "string",
                    "enum": TokenType::wire_names()
                }
            },
            "required": ["fileData"],
            "additionalProperties": false
        })
    }

    fn output_schema(&self) -> Option<Value> {
        Some(json!({
            "type": "object",
            "properties": {
                "runId": { "type": "string" },
                "processedFile": { "type": "string" },
                "processedFileType": { "type": "string" },
                "processedFileExtension": { "type": "string" },
                "wordCount": { "type": "integer" },
                "charCount": { "type": "integer" }
            },
            "required": ["runId", "processedFile"]
        }))
    }

    async fn call(&self, arguments: Value) -> ToolResult {
        let args: DehydrateFileArgs = parse_arguments(arguments)?;
        let format = args.file_format()?;

        let data = args.file_data.trim();
        if data.is_empty() {
            return Err(ToolError::domain("fileData must not be empty"));
        }
        let size = STANDARD
            .decode(data)
            .map_err(|e| ToolError::domain(format!("fileData is not valid base64: {e}")))?
            .len();

        let options = DeidentifyOptions {
            entity_types: parse_entity_types(args.entities.as_deref())?,
            token_type: parse_token_type(args.token_type.as_deref())?,
            ..Default::default()
        };

        let ctx = context::lookup()?;
        debug!(
            vault_id = ctx.route().vault_id(),
            format = format.as_str(),
            bytes = size,
            "dehydrating file"
        );

        let file = ctx.client().deidentify_file(data, format, &options).await?;
        Ok(structured_output(&file))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn format_required_from_name_or_field() {
        let err = DehydrateFileTool
            .call(json!({ "fileData": "aGVsbG8=" }))
            .await
            .unwrap_err();
        assert_eq!(err.to_string(), "Either format or fileName is required");

        let err = DehydrateFileTool
            .call(json!({ "fileData": "aGVsbG8=", "fileName": "setup.exe" }))
            .await
            .unwrap_err();
        assert!(matches!(err, ToolError::Domain(_)));
    }

    #[tokio::test]
    async fn invalid_base64_rejected_locally() {
        let err = DehydrateFileTool
            .call(json!({ "fileData": "not base64!!", "format": "txt" }))
            .await
            .unwrap_err();
        assert!(err.to_string().starts_with("fileData is not valid base64"));
    }

    #[tokio::test]
    async fn explicit_format_beats_file_name() {
        let err = DehydrateFileTool
            .call(json!({ "fileData": "aGVsbG8=", "fileName": "a.exe", "format": "pdf" }))
            .await
            .unwrap_err();
        // Passed local validation, stopped at the missing request scope.
        assert!(matches!(err, ToolError::Context(_)));
    }

    #[test]
    fn output_without_type_or_counts_omits_them() {
        let file = DeidentifiedFile {
            run_id: "run-1".into(),
            processed_file: "cHJvY2Vzc2Vk".into(),
            processed_file_type: None,
            processed_file_extension: Some("txt".into()),
            word_count: None,
            character_count: None,
        };
        assert_eq!(
            structured_output(&file),
            json!({"runId": "run-1", "processedFile": "cHJvY2Vzc2Vk", "processedFileExtension": "txt"})
        );
    }

    #[test]
    fn token_type_schema_matches_vocabulary() {
        let schema = DehydrateFileTool.input_schema();
        assert_eq!(schema["properties"]["tokenType"]["enum"], json!(TokenType::wire_names()));
    }
}
