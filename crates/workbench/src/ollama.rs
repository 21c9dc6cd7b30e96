//! HTTP inference backend for an Ollama-compatible service.
//!
//! Endpoints used:
//! - `POST /api/embed` `{model, input}` → `{embeddings}`
//! - `POST /api/generate` `{model, prompt, stream: false, format}` → `{response}`
//! - `GET /api/version` availability probe
//! - `GET /api/tags` installed models

use std::time::Duration;

use reqwest::{Client, StatusCode};
use serde::Deserialize;
use serde::de::DeserializeOwned;
use serde_json::{Value, json};
use tracing::debug;

use workbench_core::config::InferenceConfig;
use workbench_core::inference::{InferenceError, InferenceFuture, InferenceInfo, InferenceService};
use workbench_core::retry::{RetryPolicy, with_retry_if};

const PROBE_TIMEOUT: Duration = Duration::from_secs(5);

#[derive(Debug, Deserialize)]
struct EmbedResponse {
    embeddings: Vec<Vec<f32>>,
}

#[derive(Debug, Deserialize)]
struct GenerateResponse {
    response: String,
}

#[derive(Debug, Deserialize)]
struct VersionResponse {
    version: String,
}

#[derive(Debug, Deserialize)]
struct TagsResponse {
    #[serde(default)]
    models: Vec<TagEntry>,
}

#[derive(Debug, Deserialize)]
struct TagEntry {
    name: String,
}

pub struct OllamaClient {
    http: Client,
    base_url: String,
    embedding_model: String,
    generation_model: String,
    request_timeout: Duration,
    generate_timeout: Duration,
    policy: RetryPolicy,
}

impl OllamaClient {
    pub fn new(config: &InferenceConfig) -> Result<Self, InferenceError> {
        let http = Client::builder()
            .connect_timeout(Duration::from_secs(config.connect_timeout_secs))
            .build()
            .map_err(|e| InferenceError::Unreachable(e.to_string()))?;
        Ok(Self {
            http,
            base_url: config.base_url.trim_end_matches('/').to_string(),
            embedding_model: config.embedding_model.clone(),
            generation_model: config.generation_model.clone(),
            request_timeout: Duration::from_secs(config.request_timeout_secs),
            generate_timeout: Duration::from_secs(config.generate_timeout_secs),
            policy: RetryPolicy::inference().with_max_attempts(config.max_attempts),
        })
    }

    fn url(&self, path: &str) -> String {
        format!("{}{path}", self.base_url)
    }

    /// Service version string.
    pub async fn version(&self) -> Result<String, InferenceError> {
        let parsed: VersionResponse = self.get_json("/api/version").await?;
        Ok(parsed.version)
    }

    /// Names of installed models.
    pub async fn list_models(&self) -> Result<Vec<String>, InferenceError> {
        let parsed: TagsResponse = self.get_json("/api/tags").await?;
        Ok(parsed.models.into_iter().map(|m| m.name).collect())
    }

    async fn get_json<T: DeserializeOwned>(&self, path: &str) -> Result<T, InferenceError> {
        let response = self
            .http
            .get(self.url(path))
            .timeout(PROBE_TIMEOUT)
            .send()
            .await
            .map_err(|e| classify_transport(&e, PROBE_TIMEOUT))?;
        decode(response, "").await
    }

    async fn post_json<T: DeserializeOwned>(
        &self,
        path: &str,
        body: &Value,
        timeout: Duration,
        model: &str,
    ) -> Result<T, InferenceError> {
        let outcome = with_retry_if(&self.policy, InferenceError::is_transient, move || async move {
            let sent = self
                .http
                .post(self.url(path))
                .timeout(timeout)
                .json(body)
                .send()
                .await;
            match sent {
                Ok(response) => decode(response, model).await,
                Err(e) => Err(classify_transport(&e, timeout)),
            }
        })
        .await;
        debug!(
            path,
            attempts = outcome.attempts,
            elapsed_ms = outcome.elapsed.as_millis() as u64,
            "Inference request finished"
        );
        outcome.result
    }
}

impl InferenceService for OllamaClient {
    fn info(&self) -> InferenceInfo {
        InferenceInfo {
            backend: "ollama".to_string(),
            embedding_model: self.embedding_model.clone(),
            generation_model: self.generation_model.clone(),
        }
    }

    fn embed_batch<'a>(&'a self, texts: &'a [String]) -> InferenceFuture<'a, Vec<Vec<f32>>> {
        Box::pin(async move {
            let body = json!({ "model": self.embedding_model, "input": texts });
            let parsed: EmbedResponse = self
                .post_json("/api/embed", &body, self.request_timeout, &self.embedding_model)
                .await?;
            Ok(parsed.embeddings)
        })
    }

    fn generate_structured<'a>(
        &'a self,
        prompt: &'a str,
        schema: &'a Value,
    ) -> InferenceFuture<'a, String> {
        Box::pin(async move {
            let body = json!({
                "model": self.generation_model,
                "prompt": prompt,
                "stream": false,
                "format": schema,
            });
            let parsed: GenerateResponse = self
                .post_json("/api/generate", &body, self.generate_timeout, &self.generation_model)
                .await?;
            Ok(parsed.response)
        })
    }

    fn is_available(&self) -> InferenceFuture<'_, bool> {
        Box::pin(async move {
            match self.version().await {
                Ok(_) => Ok(true),
                Err(InferenceError::Unreachable(_) | InferenceError::Timeout(_)) => Ok(false),
                Err(err) => Err(err),
            }
        })
    }
}

fn classify_transport(err: &reqwest::Error, timeout: Duration) -> InferenceError {
    if err.is_timeout() {
        InferenceError::Timeout(format!("no response within {}s", timeout.as_secs()))
    } else {
        InferenceError::Unreachable(err.to_string())
    }
}

async fn decode<T: DeserializeOwned>(
    response: reqwest::Response,
    model: &str,
) -> Result<T, InferenceError> {
    let status = response.status();
    let text = response
        .text()
        .await
        .map_err(|e| InferenceError::Malformed(e.to_string()))?;
    if !status.is_success() {
        return Err(status_error(status, &text, model));
    }
    serde_json::from_str(&text).map_err(|e| InferenceError::Malformed(e.to_string()))
}

fn status_error(status: StatusCode, body: &str, model: &str) -> InferenceError {
    if status == StatusCode::NOT_FOUND && !model.is_empty() {
        return InferenceError::ModelNotFound(model.to_string());
    }
    let message = serde_json::from_str::<Value>(body)
        .ok()
        .and_then(|v| v.get("error").and_then(Value::as_str).map(str::to_string))
        .unwrap_or_else(|| body.chars().take(200).collect());
    InferenceError::Http {
        status: status.as_u16(),
        message,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn not_found_names_the_model() {
        let err = status_error(StatusCode::NOT_FOUND, r#"{"error":"model missing"}"#, "llama3.2");
        assert_eq!(err, InferenceError::ModelNotFound("llama3.2".into()));
    }

    #[test]
    fn server_errors_extract_message_and_are_transient() {
        let err = status_error(
            StatusCode::SERVICE_UNAVAILABLE,
            r#"{"error":"loading model"}"#,
            "nomic-embed-text",
        );
        assert_eq!(
            err,
            InferenceError::Http {
                status: 503,
                message: "loading model".into()
            }
        );
        assert!(err.is_transient());
    }

    #[test]
    fn plain_body_is_truncated() {
        let body = "x".repeat(500);
        let InferenceError::Http { message, .. } = status_error(StatusCode::BAD_REQUEST, &body, "m")
        else {
            panic!("expected http error");
        };
        assert_eq!(message.len(), 200);
    }

    #[test]
    fn response_shapes_parse() {
        let embed: EmbedResponse =
            serde_json::from_str(r#"{"model":"m","embeddings":[[0.1,0.2],[0.3,0.4]]}"#).unwrap();
        assert_eq!(embed.embeddings.len(), 2);
        let tags: TagsResponse =
            serde_json::from_str(r#"{"models":[{"name":"llama3.2:latest","size":1}]}"#).unwrap();
        assert_eq!(tags.models[0].name, "llama3.2:latest");
        let generate: GenerateResponse =
            serde_json::from_str(r#"{"response":"{\"name\":\"x\"}","done":true}"#).unwrap();
        assert!(generate.response.contains("name"));
    }

    #[test]
    fn client_uses_configured_models() {
        let config = InferenceConfig {
            base_url: "http://127.0.0.1:11434/".into(),
            ..InferenceConfig::default()
        };
        let client = OllamaClient::new(&config).unwrap();
        assert_eq!(client.url("/api/embed"), "http://127.0.0.1:11434/api/embed");
        assert_eq!(client.info().embedding_model, config.embedding_model);
        assert_eq!(client.policy.max_attempts, Some(config.max_attempts));
    }

    #[tokio::test]
    async fn unreachable_service_reports_unavailable() {
        let config = InferenceConfig {
            base_url: "http://127.0.0.1:9".into(),
            connect_timeout_secs: 1,
            max_attempts: 1,
            ..InferenceConfig::default()
        };
        let client = OllamaClient::new(&config).unwrap();
        assert!(!client.is_available().await.unwrap());
        let err = client.embed_batch(&["a".to_string()]).await.unwrap_err();
        assert!(err.is_transient());
    }
}
