//! HTTP embedding providers and the throttled batch driver.
//!
//! Implements [`EmbeddingProvider`] for:
//! - **[`OpenAiEmbedder`]**: `POST {url}/embeddings` on any OpenAI-compatible API.
//! - **[`OllamaEmbedder`]**: `POST {url}/api/embed` on a local Ollama instance.
//! - **[`DisabledEmbedder`]**: every call fails with a configuration error.
//!
//! Use [`create_embedder`] once at startup and share the returned handle.
//!
//! # Failure handling
//!
//! Network errors, non-2xx responses, and malformed bodies all surface as
//! [`KbError::EmbeddingProvider`]. Requests are not retried; a failed batch
//! fails the whole [`embed_batch`] call and ingestion records the file as
//! failed.

use async_trait::async_trait;
use serde::Deserialize;
use std::sync::Arc;
use std::time::Duration;

use opskb_core::embedding::{check_response, prepare_input, EmbeddingProvider};
use opskb_core::KbError;

use crate::config::EmbeddingConfig;

const OPENAI_DEFAULT_URL: &str = "https://api.openai.com/v1";
const OLLAMA_DEFAULT_URL: &str = "http://localhost:11434";

/// Embed many texts, honoring the provider's batch limit.
///
/// Inputs are validated and truncated up front, then sent in consecutive
/// windows of at most [`max_batch_size`](EmbeddingProvider::max_batch_size),
/// sleeping `delay` between windows. Vectors come back in input order.
pub async fn embed_batch(
    provider: &dyn EmbeddingProvider,
    texts: &[String],
    delay: Duration,
) -> Result<Vec<Vec<f32>>, KbError> {
    if texts.is_empty() {
        return Ok(Vec::new());
    }

    let inputs = texts
        .iter()
        .map(|t| prepare_input(t))
        .collect::<Result<Vec<String>, KbError>>()?;

    let window = provider.max_batch_size().max(1);
    let mut vectors = Vec::with_capacity(inputs.len());

    for (batch, slice) in inputs.chunks(window).enumerate() {
        if batch > 0 && !delay.is_zero() {
            tokio::time::sleep(delay).await;
        }
        let result = provider.embed_request(slice).await?;
        check_response(provider, slice.len(), &result)?;
        tracing::debug!(
            provider = provider.name(),
            batch,
            inputs = slice.len(),
            "embedded batch"
        );
        vectors.extend(result);
    }

    Ok(vectors)
}

fn http_client(timeout_secs: u64) -> Result<reqwest::Client, KbError> {
    reqwest::Client::builder()
        .timeout(Duration::from_secs(timeout_secs))
        .build()
        .map_err(|e| KbError::Configuration(format!("failed to build HTTP client: {}", e)))
}

async fn error_body(provider: &str, response: reqwest::Response) -> KbError {
    let status = response.status();
    let body = response.text().await.unwrap_or_default();
    KbError::embedding(provider, format!("HTTP {}: {}", status, body))
}

// ============ OpenAI-compatible ============

pub struct OpenAiEmbedder {
    client: reqwest::Client,
    url: String,
    api_key: String,
    model: String,
    dims: usize,
    max_batch_size: usize,
}

#[derive(Deserialize)]
struct OpenAiEmbeddingResponse {
    data: Vec<OpenAiEmbedding>,
    #[serde(default)]
    usage: Option<OpenAiUsage>,
}

#[derive(Deserialize)]
struct OpenAiEmbedding {
    index: usize,
    embedding: Vec<f32>,
}

#[derive(Deserialize)]
struct OpenAiUsage {
    #[serde(default)]
    prompt_tokens: u64,
    #[serde(default)]
    total_tokens: u64,
}

impl OpenAiEmbedder {
    pub fn new(
        url: &str,
        api_key: impl Into<String>,
        model: impl Into<String>,
        dims: usize,
        max_batch_size: usize,
        timeout_secs: u64,
    ) -> Result<Self, KbError> {
        Ok(Self {
            client: http_client(timeout_secs)?,
            url: url.trim_end_matches('/').to_string(),
            api_key: api_key.into(),
            model: model.into(),
            dims,
            max_batch_size,
        })
    }
}

#[async_trait]
impl EmbeddingProvider for OpenAiEmbedder {
    fn name(&self) -> &str {
        "openai"
    }
    fn model_name(&self) -> &str {
        &self.model
    }
    fn dims(&self) -> usize {
        self.dims
    }
    fn max_batch_size(&self) -> usize {
        self.max_batch_size
    }

    async fn embed_request(&self, inputs: &[String]) -> Result<Vec<Vec<f32>>, KbError> {
        let body = serde_json::json!({
            "model": self.model,
            "input": inputs,
        });

        let response = self
            .client
            .post(format!("{}/embeddings", self.url))
            .bearer_auth(&self.api_key)
            .json(&body)
            .send()
            .await
            .map_err(|e| KbError::embedding(self.name(), e.to_string()))?;

        if !response.status().is_success() {
            return Err(error_body(self.name(), response).await);
        }

        let parsed: OpenAiEmbeddingResponse = response
            .json()
            .await
            .map_err(|e| KbError::embedding(self.name(), format!("malformed response: {}", e)))?;

        if let Some(usage) = &parsed.usage {
            tracing::debug!(
                model = %self.model,
                prompt_tokens = usage.prompt_tokens,
                total_tokens = usage.total_tokens,
                "embedding usage"
            );
        }

        let mut data = parsed.data;
        data.sort_by_key(|d| d.index);
        Ok(data.into_iter().map(|d| d.embedding).collect())
    }
}

// ============ Ollama ============

pub struct OllamaEmbedder {
    client: reqwest::Client,
    url: String,
    model: String,
    dims: usize,
    max_batch_size: usize,
}

#[derive(Deserialize)]
struct OllamaEmbedResponse {
    embeddings: Vec<Vec<f32>>,
}

impl OllamaEmbedder {
    pub fn new(
        url: &str,
        model: impl Into<String>,
        dims: usize,
        max_batch_size: usize,
        timeout_secs: u64,
    ) -> Result<Self, KbError> {
        Ok(Self {
            client: http_client(timeout_secs)?,
            url: url.trim_end_matches('/').to_string(),
            model: model.into(),
            dims,
            max_batch_size,
        })
    }
}

#[async_trait]
impl EmbeddingProvider for OllamaEmbedder {
    fn name(&self) -> &str {
        "ollama"
    }
    fn model_name(&self) -> &str {
        &self.model
    }
    fn dims(&self) -> usize {
        self.dims
    }
    fn max_batch_size(&self) -> usize {
        self.max_batch_size
    }

    async fn embed_request(&self, inputs: &[String]) -> Result<Vec<Vec<f32>>, KbError> {
        let body = serde_json::json!({
            "model": self.model,
            "input": inputs,
        });

        let response = self
            .client
            .post(format!("{}/api/embed", self.url))
            .json(&body)
            .send()
            .await
            .map_err(|e| {
                KbError::embedding(
                    self.name(),
                    format!("connection error (is Ollama running at {}?): {}", self.url, e),
                )
            })?;

        if !response.status().is_success() {
            return Err(error_body(self.name(), response).await);
        }

        let parsed: OllamaEmbedResponse = response
            .json()
            .await
            .map_err(|e| KbError::embedding(self.name(), format!("malformed response: {}", e)))?;
        Ok(parsed.embeddings)
    }
}

// ============ Disabled ============

pub struct DisabledEmbedder;

#[async_trait]
impl EmbeddingProvider for DisabledEmbedder {
    fn name(&self) -> &str {
        "disabled"
    }
    fn model_name(&self) -> &str {
        "disabled"
    }
    fn dims(&self) -> usize {
        0
    }

    async fn embed_request(&self, _inputs: &[String]) -> Result<Vec<Vec<f32>>, KbError> {
        Err(KbError::Configuration(
            "embedding provider is disabled; set [embedding].provider".to_string(),
        ))
    }
}

/// Build the configured provider.
///
/// | `provider` | Result |
/// |------------|--------|
/// | `"openai"` | [`OpenAiEmbedder`], key read from `api_key_env` |
/// | `"ollama"` | [`OllamaEmbedder`] |
/// | `"disabled"` | [`DisabledEmbedder`] |
///
/// Fails with [`KbError::Configuration`] when the API key is missing, the
/// model's dimension is unknown and not configured, or the provider name is
/// not recognised.
pub fn create_embedder(config: &EmbeddingConfig) -> Result<Arc<dyn EmbeddingProvider>, KbError> {
    if config.provider == "disabled" {
        return Ok(Arc::new(DisabledEmbedder));
    }

    let dims = config.resolved_dims().ok_or_else(|| {
        KbError::Configuration(format!(
            "embedding.dims must be set for model '{}'",
            config.model
        ))
    })?;

    match config.provider.as_str() {
        "openai" => {
            let api_key = std::env::var(&config.api_key_env)
                .ok()
                .filter(|k| !k.trim().is_empty())
                .ok_or_else(|| {
                    KbError::Configuration(format!(
                        "{} environment variable not set",
                        config.api_key_env
                    ))
                })?;
            let url = config.url.as_deref().unwrap_or(OPENAI_DEFAULT_URL);
            Ok(Arc::new(OpenAiEmbedder::new(
                url,
                api_key,
                config.model.clone(),
                dims,
                config.max_batch_size,
                config.timeout_secs,
            )?))
        }
        "ollama" => {
            let url = config.url.as_deref().unwrap_or(OLLAMA_DEFAULT_URL);
            Ok(Arc::new(OllamaEmbedder::new(
                url,
                config.model.clone(),
                dims,
                config.max_batch_size,
                config.timeout_secs,
            )?))
        }
        other => Err(KbError::Configuration(format!(
            "Unknown embedding provider: {}",
            other
        ))),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::{extract::State, http::StatusCode, routing::post, Json, Router};
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Mutex;

    async fn serve(app: Router) -> String {
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            axum::serve(listener, app).await.unwrap();
        });
        format!("http://{}", addr)
    }

    /// Records batch sizes; returns a constant vector per input.
    struct CountingProvider {
        batches: Mutex<Vec<usize>>,
        max_batch: usize,
    }

    #[async_trait]
    impl EmbeddingProvider for CountingProvider {
        fn name(&self) -> &str {
            "counting"
        }
        fn model_name(&self) -> &str {
            "counting"
        }
        fn dims(&self) -> usize {
            2
        }
        fn max_batch_size(&self) -> usize {
            self.max_batch
        }
        async fn embed_request(&self, inputs: &[String]) -> Result<Vec<Vec<f32>>, KbError> {
            self.batches.lock().unwrap().push(inputs.len());
            Ok(inputs
                .iter()
                .map(|s| vec![s.len() as f32, 1.0])
                .collect())
        }
    }

    #[tokio::test]
    async fn test_embed_batch_windows_preserve_order() {
        let provider = CountingProvider {
            batches: Mutex::new(Vec::new()),
            max_batch: 3,
        };
        let texts: Vec<String> = (1..=7).map(|n| "x".repeat(n)).collect();

        let vectors = embed_batch(&provider, &texts, Duration::ZERO).await.unwrap();

        assert_eq!(*provider.batches.lock().unwrap(), vec![3, 3, 1]);
        let lens: Vec<f32> = vectors.iter().map(|v| v[0]).collect();
        assert_eq!(lens, vec![1.0, 2.0, 3.0, 4.0, 5.0, 6.0, 7.0]);
    }

    #[tokio::test]
    async fn test_embed_batch_rejects_empty_before_calling() {
        let provider = CountingProvider {
            batches: Mutex::new(Vec::new()),
            max_batch: 10,
        };
        let texts = vec!["ok".to_string(), "   ".to_string()];
        let err = embed_batch(&provider, &texts, Duration::ZERO).await.unwrap_err();
        assert!(matches!(err, KbError::InvalidInput(_)));
        assert!(provider.batches.lock().unwrap().is_empty());

        assert!(embed_batch(&provider, &[], Duration::ZERO).await.unwrap().is_empty());
    }

    async fn openai_mock(
        State(calls): State<Arc<AtomicUsize>>,
        Json(body): Json<serde_json::Value>,
    ) -> Json<serde_json::Value> {
        calls.fetch_add(1, Ordering::SeqCst);
        let inputs = body["input"].as_array().cloned().unwrap_or_default();
        // Reverse order to exercise index sorting.
        let data: Vec<serde_json::Value> = inputs
            .iter()
            .enumerate()
            .rev()
            .map(|(i, s)| {
                let len = s.as_str().unwrap_or("").len() as f32;
                serde_json::json!({ "index": i, "embedding": [len, 0.0, 1.0] })
            })
            .collect();
        Json(serde_json::json!({
            "data": data,
            "usage": { "prompt_tokens": 3, "total_tokens": 3 }
        }))
    }

    #[tokio::test]
    async fn test_openai_sorts_by_index() {
        let calls = Arc::new(AtomicUsize::new(0));
        let url = serve(
            Router::new()
                .route("/v1/embeddings", post(openai_mock))
                .with_state(calls.clone()),
        )
        .await;

        let embedder =
            OpenAiEmbedder::new(&format!("{}/v1/", url), "test", "mock", 3, 2048, 5).unwrap();
        let texts = vec!["a".to_string(), "bbb".to_string(), "cc".to_string()];
        let vectors = embed_batch(&embedder, &texts, Duration::ZERO).await.unwrap();

        assert_eq!(calls.load(Ordering::SeqCst), 1);
        assert_eq!(vectors[0][0], 1.0);
        assert_eq!(vectors[1][0], 3.0);
        assert_eq!(vectors[2][0], 2.0);
    }

    #[tokio::test]
    async fn test_openai_dimension_mismatch() {
        let calls = Arc::new(AtomicUsize::new(0));
        let url = serve(
            Router::new()
                .route("/embeddings", post(openai_mock))
                .with_state(calls),
        )
        .await;

        let embedder = OpenAiEmbedder::new(&url, "test", "mock", 1536, 2048, 5).unwrap();
        let err = embed_batch(&embedder, &["hello".to_string()], Duration::ZERO)
            .await
            .unwrap_err();
        assert!(matches!(
            err,
            KbError::DimensionMismatch {
                expected: 1536,
                actual: 3
            }
        ));
    }

    #[tokio::test]
    async fn test_openai_error_status_not_retried() {
        let calls = Arc::new(AtomicUsize::new(0));
        let app = Router::new()
            .route(
                "/embeddings",
                post(|State(calls): State<Arc<AtomicUsize>>| async move {
                    calls.fetch_add(1, Ordering::SeqCst);
                    (StatusCode::UNAUTHORIZED, "invalid api key")
                }),
            )
            .with_state(calls.clone());
        let url = serve(app).await;

        let embedder = OpenAiEmbedder::new(&url, "bad", "mock", 3, 2048, 5).unwrap();
        let err = embed_batch(&embedder, &["hello".to_string()], Duration::ZERO)
            .await
            .unwrap_err();
        match err {
            KbError::EmbeddingProvider { provider, message } => {
                assert_eq!(provider, "openai");
                assert!(message.contains("401"));
                assert!(message.contains("invalid api key"));
            }
            other => panic!("unexpected: {:?}", other),
        }
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_ollama_embed() {
        let app = Router::new().route(
            "/api/embed",
            post(|Json(body): Json<serde_json::Value>| async move {
                let n = body["input"].as_array().map(|a| a.len()).unwrap_or(0);
                Json(serde_json::json!({ "embeddings": vec![vec![0.5f32, 0.5]; n] }))
            }),
        );
        let url = serve(app).await;

        let embedder = OllamaEmbedder::new(&url, "nomic-embed-text", 2, 16, 5).unwrap();
        let texts = vec!["a".to_string(), "b".to_string()];
        let vectors = embed_batch(&embedder, &texts, Duration::ZERO).await.unwrap();
        assert_eq!(vectors, vec![vec![0.5, 0.5], vec![0.5, 0.5]]);
    }

    #[tokio::test]
    async fn test_disabled_is_configuration_error() {
        let err = embed_batch(&DisabledEmbedder, &["x".to_string()], Duration::ZERO)
            .await
            .unwrap_err();
        assert!(matches!(err, KbError::Configuration(_)));
    }

    #[test]
    fn test_create_embedder_requires_key() {
        let config = EmbeddingConfig {
            api_key_env: "OPSKB_TEST_KEY_THAT_IS_NEVER_SET".to_string(),
            ..EmbeddingConfig::default()
        };
        match create_embedder(&config) {
            Err(KbError::Configuration(msg)) => {
                assert!(msg.contains("OPSKB_TEST_KEY_THAT_IS_NEVER_SET"))
            }
            other => panic!("unexpected: {:?}", other.map(|p| p.name().to_string())),
        }
    }

    #[test]
    fn test_create_embedder_requires_dims_for_unknown_model() {
        let config = EmbeddingConfig {
            provider: "ollama".to_string(),
            model: "homegrown".to_string(),
            ..EmbeddingConfig::default()
        };
        assert!(matches!(
            create_embedder(&config),
            Err(KbError::Configuration(_))
        ));

        let config = EmbeddingConfig {
            dims: Some(64),
            ..config
        };
        let embedder = create_embedder(&config).unwrap();
        assert_eq!(embedder.name(), "ollama");
        assert_eq!(embedder.dims(), 64);
    }

    #[test]
    fn test_create_disabled() {
        let config = EmbeddingConfig {
            provider: "disabled".to_string(),
            ..EmbeddingConfig::default()
        };
        assert_eq!(create_embedder(&config).unwrap().name(), "disabled");
    }
}
