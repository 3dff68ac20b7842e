//! Upstream detect client: one handle per request.
//!
//! [`ClientFactory`] is process-wide and holds only tenant-free settings
//! (timeouts, file polling, an optional endpoint override, the HTTP
//! connection pool). Every call to [`ClientFactory::create`] produces a new
//! [`DetectClient`] owning exactly one credential and route; handles are
//! never cached or reused across requests.

use std::time::Duration;

use gateway_protocol::{Credential, VaultRoute};
use reqwest::{Client as ReqwestClient, RequestBuilder, Response};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::{debug, warn};

use crate::entities::{EntityType, FileFormat, TokenType};

const ACCOUNT_ID_HEADER: &str = "X-SKYFLOW-ACCOUNT-ID";
const WORKSPACE_ID_HEADER: &str = "X-SKYFLOW-WORKSPACE-ID";

const DEIDENTIFY_STRING_PATH: &str = "/v1/detect/deidentify/string";
const REIDENTIFY_STRING_PATH: &str = "/v1/detect/reidentify/string";
const DEIDENTIFY_FILE_PATH: &str = "/v1/detect/deidentify/file";
const RUNS_PATH: &str = "/v1/detect/runs";

const DEFAULT_REQUEST_TIMEOUT: Duration = Duration::from_secs(60);
const DEFAULT_POLL_INTERVAL: Duration = Duration::from_secs(1);
const DEFAULT_POLL_ATTEMPTS: u32 = 60;

// ─────────────────────────────────────────────────────────────────────────────
// Errors
// ─────────────────────────────────────────────────────────────────────────────

/// A failed call to the upstream service.
#[derive(Debug, Clone, thiserror::Error)]
#[error("{message}")]
pub struct UpstreamError {
    /// HTTP status, when the service answered at all.
    pub status: Option<u16>,
    pub message: String,
    pub details: Option<Value>,
}

impl UpstreamError {
    fn transport(err: reqwest::Error) -> Self {
        Self {
            status: err.status().map(|s| s.as_u16()),
            message: format!("Detect service request failed: {err}"),
            details: None,
        }
    }

    /// Build from a non-success response body.
    ///
    /// The service reports `{ "error": { "message", "details", ... } }`;
    /// anything else is passed through as the message.
    fn from_body(status: u16, body: &str) -> Self {
        let parsed: Option<Value> = serde_json::from_str(body).ok();
        let error = parsed.as_ref().and_then(|v| v.get("error"));

        let message = error
            .and_then(|e| e.get("message"))
            .and_then(Value::as_str)
            .map(String::from)
            .or_else(|| (!body.trim().is_empty()).then(|| body.trim().to_string()))
            .unwrap_or_else(|| format!("Detect service returned HTTP {status}"));

        let details = error
            .and_then(|e| e.get("details"))
            .filter(|d| !d.is_null())
            .cloned()
            .or_else(|| error.cloned());

        Self {
            status: Some(status),
            message,
            details,
        }
    }
}

#[derive(Debug, thiserror::Error)]
pub enum FactoryError {
    #[error("Failed to build HTTP client: {0}")]
    Http(#[from] reqwest::Error),
}

// ─────────────────────────────────────────────────────────────────────────────
// Factory
// ─────────────────────────────────────────────────────────────────────────────

/// How file de-identification runs are polled.
#[derive(Debug, Clone, Copy)]
pub struct PollSettings {
    pub interval: Duration,
    pub max_attempts: u32,
}

impl Default for PollSettings {
    fn default() -> Self {
        Self {
            interval: DEFAULT_POLL_INTERVAL,
            max_attempts: DEFAULT_POLL_ATTEMPTS,
        }
    }
}

/// Tenant-free client settings.
#[derive(Debug, Clone)]
pub struct ClientSettings {
    pub request_timeout: Duration,
    /// Send every call here instead of the route's vault URL.
    pub endpoint_override: Option<String>,
    pub poll: PollSettings,
}

impl Default for ClientSettings {
    fn default() -> Self {
        Self {
            request_timeout: DEFAULT_REQUEST_TIMEOUT,
            endpoint_override: None,
            poll: PollSettings::default(),
        }
    }
}

/// Builds one [`DetectClient`] per request.
#[derive(Debug, Clone)]
pub struct ClientFactory {
    http: ReqwestClient,
    settings: ClientSettings,
}

impl ClientFactory {
    pub fn new(settings: ClientSettings) -> Result<Self, FactoryError> {
        let http = ReqwestClient::builder()
            .timeout(settings.request_timeout)
            .build()?;
        Ok(Self { http, settings })
    }

    pub fn settings(&self) -> &ClientSettings {
        &self.settings
    }

    /// Bind a fresh client to `credential` and `route`. No I/O.
    pub fn create(&self, credential: Credential, route: VaultRoute) -> DetectClient {
        let base_url = match &self.settings.endpoint_override {
            Some(url) => url.trim_end_matches('/').to_string(),
            None => route.base_url().to_string(),
        };
        DetectClient {
            http: self.http.clone(),
            credential,
            route,
            base_url,
            poll: self.settings.poll,
        }
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Wire types
// ─────────────────────────────────────────────────────────────────────────────

/// Text de-identification options.
#[derive(Debug, Clone, Default)]
pub struct DeidentifyOptions {
    pub entity_types: Option<Vec<EntityType>>,
    pub token_type: TokenType,
    pub allow_regex: Option<Vec<String>>,
    pub restrict_regex: Option<Vec<String>>,
}

#[derive(Serialize)]
struct TokenTypeMapping {
    default: TokenType,
}

#[derive(Serialize)]
struct DeidentifyStringBody<'a> {
    vault_id: &'a str,
    text: &'a str,
    #[serde(skip_serializing_if = "Option::is_none")]
    entity_types: Option<&'a [EntityType]>,
    token_type: TokenTypeMapping,
    #[serde(skip_serializing_if = "Option::is_none")]
    allow_regex: Option<&'a [String]>,
    #[serde(skip_serializing_if = "Option::is_none")]
    restrict_regex: Option<&'a [String]>,
}

/// One detected entity.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct DetectedEntity {
    #[serde(default)]
    pub token: Option<String>,
    #[serde(default)]
    pub entity_type: Option<String>,
    #[serde(default)]
    pub location: Option<Value>,
    #[serde(default)]
    pub entity_scores: Option<Value>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct DeidentifiedText {
    pub processed_text: String,
    #[serde(default)]
    pub entities: Vec<DetectedEntity>,
    #[serde(default)]
    pub word_count: u64,
    #[serde(default)]
    pub character_count: u64,
}

#[derive(Serialize)]
struct ReidentifyStringBody<'a> {
    vault_id: &'a str,
    text: &'a str,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ReidentifiedText {
    pub text: String,
}

#[derive(Serialize)]
struct FilePayload<'a> {
    base64: &'a str,
    data_format: &'static str,
}

#[derive(Serialize)]
struct DeidentifyFileBody<'a> {
    vault_id: &'a str,
    file: FilePayload<'a>,
    #[serde(skip_serializing_if = "Option::is_none")]
    entity_types: Option<&'a [EntityType]>,
    token_type: TokenTypeMapping,
}

#[derive(Deserialize)]
struct RunCreated {
    run_id: String,
}

#[derive(Debug, Clone, Deserialize)]
struct RunStatus {
    status: String,
    #[serde(default)]
    output: Vec<RunOutput>,
    #[serde(default)]
    word_character_count: Option<WordCharacterCount>,
    #[serde(default)]
    message: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
struct RunOutput {
    #[serde(default)]
    processed_file: Option<String>,
    #[serde(default)]
    processed_file_type: Option<String>,
    #[serde(default)]
    processed_file_extension: Option<String>,
}

#[derive(Debug, Clone, Copy, Default, Deserialize)]
struct WordCharacterCount {
    #[serde(default)]
    word_count: u64,
    #[serde(default)]
    character_count: u64,
}

/// Result of a completed file de-identification run.
#[derive(Debug, Clone)]
pub struct DeidentifiedFile {
    pub run_id: String,
    pub processed_file: String,
    pub processed_file_type: Option<String>,
    pub processed_file_extension: Option<String>,
    pub word_count: Option<u64>,
    pub character_count: Option<u64>,
}

// ─────────────────────────────────────────────────────────────────────────────
// Client
// ─────────────────────────────────────────────────────────────────────────────

/// A detect client bound to one request's credential and route.
#[derive(Debug)]
pub struct DetectClient {
    http: ReqwestClient,
    credential: Credential,
    route: VaultRoute,
    base_url: String,
    poll: PollSettings,
}

impl DetectClient {
    pub fn route(&self) -> &VaultRoute {
        &self.route
    }

    pub fn credential(&self) -> &Credential {
        &self.credential
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    /// Replace sensitive values in `text` with tokens.
    pub async fn deidentify_text(
        &self,
        text: &str,
        options: &DeidentifyOptions,
    ) -> Result<DeidentifiedText, UpstreamError> {
        let body = DeidentifyStringBody {
            vault_id: self.route.vault_id(),
            text,
            entity_types: options.entity_types.as_deref(),
            token_type: TokenTypeMapping { default: options.token_type },
            allow_regex: options.allow_regex.as_deref(),
            restrict_regex: options.restrict_regex.as_deref(),
        };
        self.post(DEIDENTIFY_STRING_PATH, &body).await
    }

    /// Replace vault tokens in `text` with their original values.
    pub async fn reidentify_text(&self, text: &str) -> Result<ReidentifiedText, UpstreamError> {
        let body = ReidentifyStringBody {
            vault_id: self.route.vault_id(),
            text,
        };
        self.post(REIDENTIFY_STRING_PATH, &body).await
    }

    /// Submit a base64 file for de-identification and wait for the run.
    pub async fn deidentify_file(
        &self,
        base64: &str,
        format: FileFormat,
        options: &DeidentifyOptions,
    ) -> Result<DeidentifiedFile, UpstreamError> {
        let body = DeidentifyFileBody {
            vault_id: self.route.vault_id(),
            file: FilePayload {
                base64,
                data_format: format.as_str(),
            },
            entity_types: options.entity_types.as_deref(),
            token_type: TokenTypeMapping { default: options.token_type },
        };
        let created: RunCreated = self.post(DEIDENTIFY_FILE_PATH, &body).await?;
        debug!(run_id = %created.run_id, vault_id = self.route.vault_id(), "file run submitted");

        self.wait_for_run(created.run_id).await
    }

    async fn wait_for_run(&self, run_id: String) -> Result<DeidentifiedFile, UpstreamError> {
        let path = format!("{RUNS_PATH}/{run_id}");

        for attempt in 1..=self.poll.max_attempts {
            let run: RunStatus = self
                .get(&path, &[("vault_id", self.route.vault_id())])
                .await?;

            match run.status.to_ascii_uppercase().as_str() {
                "SUCCESS" => return finished_run(run_id, run),
                "FAILED" => {
                    return Err(UpstreamError {
                        status: None,
                        message: run
                            .message
                            .unwrap_or_else(|| format!("File de-identification run {run_id} failed")),
                        details: Some(serde_json::json!({ "runId": run_id })),
                    });
                }
                status => {
                    debug!(run_id = %run_id, attempt, status, "file run pending");
                    tokio::time::sleep(self.poll.interval).await;
                }
            }
        }

        warn!(run_id = %run_id, attempts = self.poll.max_attempts, "file run did not finish");
        Err(UpstreamError {
            status: None,
            message: format!(
                "File de-identification run {run_id} did not finish after {} attempts",
                self.poll.max_attempts
            ),
            details: Some(serde_json::json!({ "runId": run_id })),
        })
    }

    // ── Internal ──────────────────────────────────────────────────────────

    fn authorize(&self, builder: RequestBuilder) -> RequestBuilder {
        let mut builder = builder.bearer_auth(self.credential.expose());
        if let Some(account_id) = self.route.account_id() {
            builder = builder.header(ACCOUNT_ID_HEADER, account_id);
        }
        if let Some(workspace_id) = self.route.workspace_id() {
            builder = builder.header(WORKSPACE_ID_HEADER, workspace_id);
        }
        builder
    }

    async fn post<B: Serialize, R: DeserializeOwned>(
        &self,
        path: &str,
        body: &B,
    ) -> Result<R, UpstreamError> {
        let url = format!("{}{path}", self.base_url);
        let response = self
            .authorize(self.http.post(&url).json(body))
            .send()
            .await
            .map_err(UpstreamError::transport)?;
        decode(response).await
    }

    async fn get<R: DeserializeOwned>(
        &self,
        path: &str,
        query: &[(&str, &str)],
    ) -> Result<R, UpstreamError> {
        let url = format!("{}{path}", self.base_url);
        let response = self
            .authorize(self.http.get(&url).query(query))
            .send()
            .await
            .map_err(UpstreamError::transport)?;
        decode(response).await
    }
}

async fn decode<R: DeserializeOwned>(response: Response) -> Result<R, UpstreamError> {
    let status = response.status();
    let body = response.text().await.map_err(UpstreamError::transport)?;

    if !status.is_success() {
        warn!(status = status.as_u16(), "detect service rejected request");
        return Err(UpstreamError::from_body(status.as_u16(), &body));
    }

    serde_json::from_str(&body).map_err(|e| UpstreamError {
        status: Some(status.as_u16()),
        message: format!("Unexpected response from detect service: {e}"),
        details: None,
    })
}

fn finished_run(run_id: String, run: RunStatus) -> Result<DeidentifiedFile, UpstreamError> {
    let counts = run.word_character_count;
    let output = run.output.into_iter().find(|o| o.processed_file.is_some());

    match output {
        Some(RunOutput {
            processed_file: Some(processed_file),
            processed_file_type,
            processed_file_extension,
        }) => Ok(DeidentifiedFile {
            run_id,
            processed_file,
            processed_file_type,
            processed_file_extension,
            word_count: counts.map(|c| c.word_count),
            character_count: counts.map(|c| c.character_count),
        }),
        _ => Err(UpstreamError {
            status: None,
            message: format!("File de-identification run {run_id} returned no output"),
            details: Some(serde_json::json!({ "runId": run_id })),
        }),
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;
    use std::sync::atomic::{AtomicUsize, Ordering};

    use axum::{
        Json, Router,
        extract::{Path, State},
        routing::get,
    };
    use serde_json::json;

    use super::*;
    use crate::ToolError;

    fn route() -> VaultRoute {
        VaultRoute::new("v1", "https://c1.vault.x.com/", Some("acc".into()), None).unwrap()
    }

    /// Run status endpoint whose answer depends on the run id.
    async fn run_status(State(polls): State<Arc<AtomicUsize>>, Path(run_id): Path<String>) -> Json<Value> {
        polls.fetch_add(1, Ordering::SeqCst);
        Json(match run_id.as_str() {
            "run-failed" => json!({"status": "FAILED", "message": "Unsupported document"}),
            "run-failed-quiet" => json!({"status": "failed"}),
            _ => json!({"status": "IN_PROGRESS"}),
        })
    }

    async fn start_runs_upstream() -> (String, Arc<AtomicUsize>) {
        let polls = Arc::new(AtomicUsize::new(0));
        let app = Router::new()
            .route("/v1/detect/runs/{run_id}", get(run_status))
            .with_state(polls.clone());
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let port = listener.local_addr().unwrap().port();
        tokio::spawn(async move {
            axum::serve(listener, app).await.ok();
        });
        (format!("http://127.0.0.1:{port}"), polls)
    }

    fn client_for(upstream: &str, max_attempts: u32) -> DetectClient {
        let factory = ClientFactory::new(ClientSettings {
            request_timeout: Duration::from_secs(5),
            endpoint_override: Some(upstream.to_string()),
            poll: PollSettings {
                interval: Duration::from_millis(5),
                max_attempts,
            },
        })
        .unwrap();
        factory.create(Credential::bearer("tok"), route())
    }

    #[tokio::test]
    async fn failed_run_reports_upstream_message() {
        let (upstream, polls) = start_runs_upstream().await;
        let client = client_for(&upstream, 5);

        let err = client.wait_for_run("run-failed".into()).await.unwrap_err();
        assert_eq!(err.status, None);
        assert_eq!(err.message, "Unsupported document");
        assert_eq!(err.details, Some(json!({"runId": "run-failed"})));
        assert_eq!(polls.load(Ordering::SeqCst), 1);

        let failure = ToolError::from(err).to_failure();
        assert_eq!(failure.code, Some(json!("UPSTREAM_UNAVAILABLE")));
        assert_eq!(failure.details, Some(json!({"runId": "run-failed"})));
    }

    #[tokio::test]
    async fn failed_run_without_message_names_the_run() {
        let (upstream, _polls) = start_runs_upstream().await;
        let err = client_for(&upstream, 5)
            .wait_for_run("run-failed-quiet".into())
            .await
            .unwrap_err();
        assert_eq!(err.message, "File de-identification run run-failed-quiet failed");
    }

    #[tokio::test]
    async fn pending_run_gives_up_after_poll_budget() {
        let (upstream, polls) = start_runs_upstream().await;
        let err = client_for(&upstream, 3)
            .wait_for_run("run-stuck".into())
            .await
            .unwrap_err();
        assert_eq!(err.status, None);
        assert_eq!(
            err.message,
            "File de-identification run run-stuck did not finish after 3 attempts"
        );
        assert_eq!(err.details, Some(json!({"runId": "run-stuck"})));
        assert_eq!(polls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn unreachable_upstream_has_no_status() {
        // Bind then drop a listener so the port is known to refuse connections.
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let upstream = format!("http://{}", listener.local_addr().unwrap());
        drop(listener);

        let err = client_for(&upstream, 1).reidentify_text("[NAME_1]").await.unwrap_err();
        assert_eq!(err.status, None);
        assert!(err.message.starts_with("Detect service request failed"));

        let failure = ToolError::from(err).to_failure();
        assert_eq!(failure.code, Some(json!("UPSTREAM_UNAVAILABLE")));
        assert_eq!(failure.details, None);
    }

    #[test]
    fn every_create_is_a_fresh_handle() {
        let factory = ClientFactory::new(ClientSettings::default()).unwrap();
        let a = factory.create(Credential::bearer("tok-a"), route());
        let b = factory.create(Credential::api_key("key-b"), route());
        assert_eq!(a.credential().expose(), "tok-a");
        assert_eq!(b.credential().expose(), "key-b");
        assert_eq!(a.route(), b.route());
        assert_eq!(a.base_url(), "https://c1.vault.x.com");
    }

    #[test]
    fn endpoint_override_wins() {
        let factory = ClientFactory::new(ClientSettings {
            endpoint_override: Some("http://127.0.0.1:9999/".into()),
            ..Default::default()
        })
        .unwrap();
        let client = factory.create(Credential::bearer("t"), route());
        assert_eq!(client.base_url(), "http://127.0.0.1:9999");
        assert_eq!(client.route().cluster_id(), "c1");
    }

    #[test]
    fn error_body_message_and_details_pass_through() {
        let body = r#"{"error":{"grpc_code":7,"http_code":403,"message":"Vault access denied","details":[{"reason":"scope"}]}}"#;
        let err = UpstreamError::from_body(403, body);
        assert_eq!(err.status, Some(403));
        assert_eq!(err.message, "Vault access denied");
        assert_eq!(err.details, Some(serde_json::json!([{"reason": "scope"}])));
    }

    #[test]
    fn error_without_details_keeps_error_object() {
        let err = UpstreamError::from_body(500, r#"{"error":{"message":"boom","http_code":500}}"#);
        assert_eq!(err.message, "boom");
        assert_eq!(err.details.unwrap()["http_code"], 500);
    }

    #[test]
    fn opaque_error_body_becomes_message() {
        assert_eq!(UpstreamError::from_body(502, "bad gateway").message, "bad gateway");
        assert_eq!(
            UpstreamError::from_body(503, "").message,
            "Detect service returned HTTP 503"
        );
    }

    #[test]
    fn text_body_omits_unset_options() {
        let body = DeidentifyStringBody {
            vault_id: "v1",
            text: "hi",
            entity_types: None,
            token_type: TokenTypeMapping { default: TokenType::VaultToken },
            allow_regex: None,
            restrict_regex: None,
        };
        let value = serde_json::to_value(&body).unwrap();
        assert_eq!(
            value,
            serde_json::json!({"vault_id": "v1", "text": "hi", "token_type": {"default": "vault_token"}})
        );
    }
}
