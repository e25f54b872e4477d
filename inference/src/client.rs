use std::time::Duration;

use curator_protocol::ModelDescriptor;
use futures::StreamExt;
use rand::Rng;
use serde::Deserialize;
use serde::Serialize;
use serde_json::Value as JsonValue;

use crate::error::InferenceErr;
use crate::error::Result;

/// Safety factor applied on top of `ModelDescriptor::base_memory_estimate_bytes`
/// (default 1.5).
pub const DEFAULT_SAFETY_FACTOR: f64 = 1.5;

const DEFAULT_RETRY_ATTEMPTS: u32 = 3;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ResponseFormat {
    Text,
    Json,
}

#[derive(Debug, Clone, Default)]
pub struct InferenceOptions {
    pub format: Option<ResponseFormat>,
    pub temperature: Option<f32>,
    pub max_tokens: Option<u32>,
    pub timeout_ms: Option<u64>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct InferenceOutcome {
    pub response: String,
    pub execution_time_ms: u64,
}

/// Client for a local model-inference daemon speaking the Ollama wire
/// protocol (`/api/version`, `/api/tags`, `/api/show`, `/api/generate`).
/// Covers the inference surface this core needs: listing models,
/// estimating memory, and running (streaming or not) inference with a
/// jittered exponential-backoff retry discipline.
pub struct InferenceClient {
    http: reqwest::Client,
    host_root: String,
    retry_attempts: u32,
}

impl InferenceClient {
    pub fn new(host_root: impl Into<String>) -> Self {
        let http = reqwest::Client::builder()
            .connect_timeout(Duration::from_secs(5))
            .build()
            .unwrap_or_else(|_| reqwest::Client::new());
        Self {
            http,
            host_root: host_root.into(),
            retry_attempts: DEFAULT_RETRY_ATTEMPTS,
        }
    }

    pub fn with_retry_attempts(mut self, attempts: u32) -> Self {
        self.retry_attempts = attempts;
        self
    }

    fn url(&self, path: &str) -> String {
        format!("{}{}", self.host_root.trim_end_matches('/'), path)
    }

    /// Liveness probe against `GET /api/version`.
    pub async fn probe(&self) -> Result<bool> {
        let resp = self.http.get(self.url("/api/version")).send().await;
        Ok(matches!(resp, Ok(r) if r.status().is_success()))
    }

    /// `listModels`: fails with `Unavailable` if the daemon probe fails.
    pub async fn list_models(&self) -> Result<Vec<ModelDescriptor>> {
        let resp = self
            .http
            .get(self.url("/api/tags"))
            .send()
            .await
            .map_err(|e| InferenceErr::Unavailable(e.to_string()))?;

        if !resp.status().is_success() {
            return Err(InferenceErr::Unavailable(format!(
                "HTTP {}",
                resp.status()
            )));
        }

        let body: TagsResponse = resp.json().await?;
        Ok(body.models.into_iter().map(ModelTag::into_descriptor).collect())
    }

    /// `estimateModelMemory`: `byteSize + max(0.2·byteSize, 512 MiB)` times
    /// `safetyFactor`.
    pub fn estimate_model_memory(&self, descriptor: &ModelDescriptor, safety_factor: f64) -> u64 {
        (descriptor.base_memory_estimate_bytes() as f64 * safety_factor) as u64
    }

    /// `runInference`. Retries `Transient` failures with exponential
    /// backoff; `Timeout`/`ModelNotFound`/`Permanent` are not retried.
    pub async fn run_inference(
        &self,
        model: &str,
        prompt: &str,
        opts: &InferenceOptions,
    ) -> Result<InferenceOutcome> {
        let payload = GeneratePayload {
            model,
            prompt,
            stream: false,
            format: opts.format,
            options: GenerateModelOptions {
                temperature: opts.temperature,
                num_predict: opts.max_tokens,
            },
        };

        let timeout = Duration::from_millis(opts.timeout_ms.unwrap_or(300_000));
        let started = tokio::time::Instant::now();

        let mut attempt = 0;
        loop {
            attempt += 1;
            let call = self.http.post(self.url("/api/generate")).json(&payload).send();

            let result = tokio::time::timeout(timeout, call).await;

            match result {
                Err(_) => return Err(InferenceErr::Timeout),
                Ok(Err(send_err)) => {
                    let err = classify_transport_error(&send_err);
                    if err.is_retryable() && attempt < self.retry_attempts {
                        let delay = backoff(attempt);
                        tracing::warn!(model, attempt, ?delay, "transient inference error, retrying");
                        tokio::time::sleep(delay).await;
                        continue;
                    }
                    return Err(err);
                }
                Ok(Ok(resp)) => {
                    if resp.status() == reqwest::StatusCode::NOT_FOUND {
                        return Err(InferenceErr::ModelNotFound(model.to_string()));
                    }
                    if resp.status().is_server_error() {
                        if attempt < self.retry_attempts {
                            let delay = backoff(attempt);
                            tracing::warn!(
                                model,
                                attempt,
                                status = %resp.status(),
                                ?delay,
                                "server error from inference daemon, retrying"
                            );
                            tokio::time::sleep(delay).await;
                            continue;
                        }
                        return Err(InferenceErr::Transient(format!("HTTP {}", resp.status())));
                    }
                    if !resp.status().is_success() {
                        let body = resp.text().await.unwrap_or_default();
                        return Err(InferenceErr::Permanent(format!(
                            "HTTP {}: {}",
                            resp.status(),
                            body
                        )));
                    }

                    let generated: GenerateResponse = resp.json().await?;
                    let execution_time_ms = started.elapsed().as_millis() as u64;
                    return Ok(InferenceOutcome {
                        response: generated.response,
                        execution_time_ms,
                    });
                }
            }
        }
    }

    /// `runStreamingInference`: yields incremental chunks via `on_chunk`,
    /// returns the fully assembled response on completion.
    pub async fn run_streaming_inference(
        &self,
        model: &str,
        prompt: &str,
        opts: &InferenceOptions,
        mut on_chunk: impl FnMut(&str),
    ) -> Result<InferenceOutcome> {
        let payload = GeneratePayload {
            model,
            prompt,
            stream: true,
            format: opts.format,
            options: GenerateModelOptions {
                temperature: opts.temperature,
                num_predict: opts.max_tokens,
            },
        };

        let timeout = Duration::from_millis(opts.timeout_ms.unwrap_or(300_000));
        let started = tokio::time::Instant::now();

        let resp = tokio::time::timeout(
            timeout,
            self.http.post(self.url("/api/generate")).json(&payload).send(),
        )
        .await
        .map_err(|_| InferenceErr::Timeout)?
        .map_err(|e| classify_transport_error(&e))?;

        if resp.status() == reqwest::StatusCode::NOT_FOUND {
            return Err(InferenceErr::ModelNotFound(model.to_string()));
        }
        if !resp.status().is_success() {
            let body = resp.text().await.unwrap_or_default();
            return Err(InferenceErr::Permanent(format!(
                "HTTP {}: {}",
                resp.status(),
                body
            )));
        }

        let mut assembled = String::new();
        let mut byte_stream = resp.bytes_stream();
        let mut buf = Vec::new();

        while let Some(chunk) = byte_stream.next().await {
            let chunk = chunk.map_err(|e| classify_transport_error(&e))?;
            buf.extend_from_slice(&chunk);
            while let Some(pos) = buf.iter().position(|b| *b == b'\n') {
                let line: Vec<u8> = buf.drain(..=pos).collect();
                let text = String::from_utf8_lossy(&line);
                let text = text.trim();
                if text.is_empty() {
                    continue;
                }
                let value: GenerateResponse = serde_json::from_str(text)?;
                if !value.response.is_empty() {
                    on_chunk(&value.response);
                    assembled.push_str(&value.response);
                }
                if value.done {
                    return Ok(InferenceOutcome {
                        response: assembled,
                        execution_time_ms: started.elapsed().as_millis() as u64,
                    });
                }
            }
        }

        Ok(InferenceOutcome {
            response: assembled,
            execution_time_ms: started.elapsed().as_millis() as u64,
        })
    }
}

fn classify_transport_error(err: &reqwest::Error) -> InferenceErr {
    if err.is_timeout() {
        InferenceErr::Timeout
    } else if err.is_connect() {
        InferenceErr::Transient(err.to_string())
    } else {
        InferenceErr::Transient(err.to_string())
    }
}

/// Exponential backoff with jitter: `1000ms * 2^(attempt-1)` (the spec's 1s
/// base), jittered by `0.8..1.2`.
fn backoff(attempt: u32) -> Duration {
    let base_delay_ms = 1_000u64 * (1u64 << (attempt.saturating_sub(1)));
    let jitter = rand::rng().random_range(0.8..1.2);
    let delay_ms = (base_delay_ms as f64 * jitter) as u64;
    Duration::from_millis(delay_ms)
}

#[derive(Debug, Serialize)]
struct GeneratePayload<'a> {
    model: &'a str,
    prompt: &'a str,
    stream: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    format: Option<ResponseFormat>,
    options: GenerateModelOptions,
}

#[derive(Debug, Serialize, Default)]
struct GenerateModelOptions {
    #[serde(skip_serializing_if = "Option::is_none")]
    temperature: Option<f32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    num_predict: Option<u32>,
}

#[derive(Debug, Deserialize)]
struct GenerateResponse {
    #[serde(default)]
    response: String,
    #[serde(default)]
    done: bool,
}

#[derive(Debug, Deserialize)]
struct TagsResponse {
    #[serde(default)]
    models: Vec<ModelTag>,
}

#[derive(Debug, Deserialize)]
struct ModelTag {
    name: String,
    #[serde(default)]
    digest: String,
    #[serde(default)]
    size: u64,
    #[serde(default)]
    details: ModelTagDetails,
}

#[derive(Debug, Deserialize, Default)]
struct ModelTagDetails {
    family: Option<String>,
    parameter_size: Option<String>,
    quantization_level: Option<String>,
}

impl ModelTag {
    fn into_descriptor(self) -> ModelDescriptor {
        ModelDescriptor {
            name: self.name,
            digest: self.digest,
            byte_size: self.size,
            family: self.details.family,
            parameter_size: self.details.parameter_size,
            quantization: self.details.quantization_level,
        }
    }
}

#[cfg(test)]
mod tests {
    #![allow(clippy::unwrap_used)]
    use super::*;
    use wiremock::Mock;
    use wiremock::MockServer;
    use wiremock::ResponseTemplate;
    use wiremock::matchers::method;
    use wiremock::matchers::path;

    #[tokio::test]
    async fn list_models_parses_tags_into_descriptors() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/api/tags"))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
                "models": [
                    {
                        "name": "llama3.2:3b",
                        "digest": "sha256:abc",
                        "size": 2_000_000_000u64,
                        "details": { "family": "llama", "parameter_size": "3B", "quantization_level": "Q4_0" }
                    }
                ]
            })))
            .mount(&server)
            .await;

        let client = InferenceClient::new(server.uri());
        let models = client.list_models().await.unwrap();
        assert_eq!(models.len(), 1);
        assert_eq!(models[0].name, "llama3.2:3b");
        assert_eq!(models[0].family.as_deref(), Some("llama"));
    }

    #[tokio::test]
    async fn list_models_fails_with_unavailable_when_daemon_is_unreachable() {
        let client = InferenceClient::new("http://127.0.0.1:1");
        let err = client.list_models().await.unwrap_err();
        assert!(matches!(err, InferenceErr::Unavailable(_)));
    }

    #[tokio::test]
    async fn run_inference_returns_model_not_found_without_retrying() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/api/generate"))
            .respond_with(ResponseTemplate::new(404))
            .mount(&server)
            .await;

        let client = InferenceClient::new(server.uri());
        let err = client
            .run_inference("ghost-model", "hi", &InferenceOptions::default())
            .await
            .unwrap_err();
        assert!(matches!(err, InferenceErr::ModelNotFound(_)));
    }

    #[tokio::test]
    async fn run_inference_retries_server_errors_then_succeeds() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/api/generate"))
            .respond_with(ResponseTemplate::new(503))
            .up_to_n_times(1)
            .mount(&server)
            .await;
        Mock::given(method("POST"))
            .and(path("/api/generate"))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
                "response": "hello",
                "done": true
            })))
            .mount(&server)
            .await;

        let client = InferenceClient::new(server.uri());
        let outcome = client
            .run_inference("llama3.2:3b", "hi", &InferenceOptions::default())
            .await
            .unwrap();
        assert_eq!(outcome.response, "hello");
    }

    #[tokio::test]
    async fn run_streaming_inference_assembles_chunks_and_invokes_callback() {
        let server = MockServer::start().await;
        let body = "{\"response\":\"hel\",\"done\":false}\n{\"response\":\"lo\",\"done\":true}\n";
        Mock::given(method("POST"))
            .and(path("/api/generate"))
            .respond_with(ResponseTemplate::new(200).set_body_raw(body, "application/x-ndjson"))
            .mount(&server)
            .await;

        let client = InferenceClient::new(server.uri());
        let mut seen = Vec::new();
        let outcome = client
            .run_streaming_inference("llama3.2:3b", "hi", &InferenceOptions::default(), |chunk| {
                seen.push(chunk.to_string());
            })
            .await
            .unwrap();
        assert_eq!(outcome.response, "hello");
        assert_eq!(seen, vec!["hel".to_string(), "lo".to_string()]);
    }
}
