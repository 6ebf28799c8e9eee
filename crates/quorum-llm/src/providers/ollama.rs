//! Ollama local daemon provider
//!
//! Talks the generate/pull/delete daemon API. Generation flattens the
//! conversation into a single prompt plus consolidated system block, which
//! is what `/api/generate` expects.

use crate::completion::{CompletionRequest, CompletionResponse, TokenUsage};
use crate::error::{Error, Result};
use crate::message::MessageRole;
use crate::provider::LlmProvider;
use crate::registry::{Capability, ModelDescriptor, Provider};
use reqwest::Client;
use serde::{Deserialize, Serialize};
use std::time::Duration;
use tracing::{debug, instrument, warn};

/// Default Ollama API URL
pub const DEFAULT_BASE_URL: &str = "http://localhost:11434";

/// Default model (7B+ recommended)
pub const DEFAULT_MODEL: &str = "qwen2.5:7b";

/// Health-check deadline
const HEALTH_TIMEOUT: Duration = Duration::from_secs(3);

// ============================================================================
// API Types
// ============================================================================

#[derive(Debug, Serialize)]
struct GenerateRequest {
    model: String,
    prompt: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    system: Option<String>,
    stream: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    options: Option<GenerateOptions>,
}

#[derive(Debug, Serialize)]
struct GenerateOptions {
    #[serde(skip_serializing_if = "Option::is_none")]
    temperature: Option<f32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    num_predict: Option<u32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    stop: Option<Vec<String>>,
}

#[derive(Debug, Deserialize)]
struct GenerateResponse {
    model: String,
    response: String,
    #[serde(default)]
    done_reason: Option<String>,
    #[serde(default)]
    prompt_eval_count: Option<u32>,
    #[serde(default)]
    eval_count: Option<u32>,
}

#[derive(Debug, Deserialize)]
struct ApiError {
    error: String,
}

#[derive(Debug, Deserialize)]
struct TagsResponse {
    models: Vec<TagModel>,
}

/// One locally installed model as reported by `/api/tags`
#[derive(Debug, Deserialize)]
pub struct TagModel {
    /// Model name with tag (e.g. "qwen2.5:7b")
    pub name: String,
    /// Model metadata
    #[serde(default)]
    pub details: Option<TagDetails>,
}

/// Model metadata from the tags response
#[derive(Debug, Default, Deserialize)]
pub struct TagDetails {
    /// Model family (e.g. "qwen2")
    #[serde(default)]
    pub family: Option<String>,
    /// Parameter count label (e.g. "7.6B")
    #[serde(default)]
    pub parameter_size: Option<String>,
}

#[derive(Debug, Deserialize)]
struct VersionResponse {
    version: String,
}

// ============================================================================
// Provider
// ============================================================================

/// Ollama provider configuration
#[derive(Debug, Clone)]
pub struct OllamaConfig {
    /// Daemon base URL
    pub base_url: String,
    /// Default model when the request names none
    pub default_model: String,
    /// Default max tokens
    pub default_max_tokens: u32,
    /// Request timeout (generous for local inference)
    pub timeout: Duration,
}

impl Default for OllamaConfig {
    fn default() -> Self {
        Self {
            base_url: DEFAULT_BASE_URL.to_string(),
            default_model: DEFAULT_MODEL.to_string(),
            default_max_tokens: 4096,
            timeout: Duration::from_secs(300),
        }
    }
}

impl OllamaConfig {
    /// Create configuration from `OLLAMA_BASE_URL` / `OLLAMA_MODEL`
    #[must_use]
    pub fn from_env() -> Self {
        let mut config = Self::default();
        if let Ok(url) = std::env::var("OLLAMA_BASE_URL") {
            config.base_url = url;
        }
        if let Ok(model) = std::env::var("OLLAMA_MODEL") {
            config.default_model = model;
        }
        config
    }

    /// Set the base URL
    #[must_use]
    pub fn with_base_url(mut self, url: impl Into<String>) -> Self {
        self.base_url = url.into();
        self
    }

    /// Set the default model
    #[must_use]
    pub fn with_model(mut self, model: impl Into<String>) -> Self {
        self.default_model = model.into();
        self
    }
}

/// Ollama local provider
pub struct OllamaProvider {
    client: Client,
    config: OllamaConfig,
}

impl OllamaProvider {
    /// Create a new provider
    pub fn new(config: OllamaConfig) -> Result<Self> {
        let client = Client::builder()
            .timeout(config.timeout)
            .build()
            .map_err(|e| Error::Network(e.to_string()))?;
        Ok(Self { client, config })
    }

    /// Create with default configuration
    pub fn with_defaults() -> Result<Self> {
        Self::new(OllamaConfig::default())
    }

    /// Daemon version, if reachable
    pub async fn version(&self) -> Option<String> {
        let url = format!("{}/api/version", self.config.base_url);
        let response = self
            .client
            .get(&url)
            .timeout(HEALTH_TIMEOUT)
            .send()
            .await
            .ok()?;
        response
            .json::<VersionResponse>()
            .await
            .ok()
            .map(|v| v.version)
    }

    /// List locally installed models
    pub async fn list_models(&self) -> Result<Vec<TagModel>> {
        let url = format!("{}/api/tags", self.config.base_url);
        let response = self
            .client
            .get(&url)
            .send()
            .await
            .map_err(|e| Error::Network(connect_error(&self.config.base_url, &e)))?;

        if !response.status().is_success() {
            return Err(Error::Api(format!(
                "ollama returned status {}",
                response.status()
            )));
        }

        let tags: TagsResponse = response
            .json()
            .await
            .map_err(|e| Error::InvalidResponse(e.to_string()))?;
        Ok(tags.models)
    }

    /// Discover installed models as registry descriptors, with capabilities
    /// inferred from the model name and size.
    pub async fn discover_models(&self) -> Result<Vec<ModelDescriptor>> {
        let models = self.list_models().await?;
        debug!(count = models.len(), "Discovered ollama models");
        Ok(models
            .into_iter()
            .map(|m| {
                let capabilities = infer_capabilities(&m);
                ModelDescriptor::new(
                    format!("ollama-{}", m.name),
                    Provider::Ollama,
                    m.name.clone(),
                    capabilities,
                )
                .with_name(m.name)
                .with_endpoint(self.config.base_url.clone())
            })
            .collect())
    }

    /// Pull a model onto the daemon. Blocks until the pull finishes.
    #[instrument(skip(self))]
    pub async fn pull_model(&self, name: &str) -> Result<()> {
        let url = format!("{}/api/pull", self.config.base_url);
        let response = self
            .client
            .post(&url)
            .json(&serde_json::json!({ "name": name, "stream": false }))
            .send()
            .await
            .map_err(|e| Error::Network(connect_error(&self.config.base_url, &e)))?;

        if !response.status().is_success() {
            return Err(Error::Api(format!(
                "ollama pull failed with status {}",
                response.status()
            )));
        }
        Ok(())
    }

    /// Remove a model from the daemon
    pub async fn delete_model(&self, name: &str) -> Result<()> {
        let url = format!("{}/api/delete", self.config.base_url);
        let response = self
            .client
            .delete(&url)
            .json(&serde_json::json!({ "name": name }))
            .send()
            .await
            .map_err(|e| Error::Network(connect_error(&self.config.base_url, &e)))?;

        if !response.status().is_success() {
            return Err(Error::Api(format!(
                "ollama delete failed with status {}",
                response.status()
            )));
        }
        Ok(())
    }

    fn build_request(&self, request: &CompletionRequest) -> GenerateRequest {
        let model = if request.model.is_empty() {
            self.config.default_model.clone()
        } else {
            request.model.clone()
        };

        let mut system_parts = Vec::new();
        let mut prompt_parts = Vec::new();
        for message in &request.messages {
            match message.role {
                MessageRole::System => system_parts.push(message.content.as_str()),
                MessageRole::User => prompt_parts.push(message.content.clone()),
                MessageRole::Assistant => {
                    prompt_parts.push(format!("Assistant: {}", message.content));
                }
            }
        }

        GenerateRequest {
            model,
            prompt: prompt_parts.join("\n\n"),
            system: if system_parts.is_empty() {
                None
            } else {
                Some(system_parts.join("\n\n"))
            },
            stream: false,
            options: Some(GenerateOptions {
                temperature: request.temperature,
                num_predict: request.max_tokens.or(Some(self.config.default_max_tokens)),
                stop: request.stop.clone(),
            }),
        }
    }
}

fn connect_error(base_url: &str, error: &reqwest::Error) -> String {
    if error.is_connect() {
        format!("failed to connect to ollama at {base_url}, is the daemon running?")
    } else {
        error.to_string()
    }
}

#[async_trait::async_trait]
impl LlmProvider for OllamaProvider {
    fn name(&self) -> &str {
        "ollama"
    }

    async fn is_available(&self) -> bool {
        let url = format!("{}/api/version", self.config.base_url);
        match self.client.get(&url).timeout(HEALTH_TIMEOUT).send().await {
            Ok(response) => response.status().is_success(),
            Err(_) => false,
        }
    }

    #[instrument(skip(self, request), fields(model = %request.model))]
    async fn complete(&self, request: CompletionRequest) -> Result<CompletionResponse> {
        let body = self.build_request(&request);
        let url = format!("{}/api/generate", self.config.base_url);

        let response = self
            .client
            .post(&url)
            .json(&body)
            .send()
            .await
            .map_err(|e| {
                if e.is_timeout() {
                    Error::Timeout(self.config.timeout.as_millis() as u64)
                } else {
                    Error::Network(connect_error(&self.config.base_url, &e))
                }
            })?;

        let status = response.status();
        let text = response
            .text()
            .await
            .map_err(|e| Error::Network(e.to_string()))?;

        if !status.is_success() {
            if let Ok(api_error) = serde_json::from_str::<ApiError>(&text) {
                warn!(status = %status, "Ollama generate failed");
                return Err(Error::Api(api_error.error));
            }
            return Err(Error::Api(format!("ollama returned status {status}")));
        }

        let parsed: GenerateResponse = serde_json::from_str(&text)
            .map_err(|e| Error::InvalidResponse(e.to_string()))?;

        let usage = match (parsed.prompt_eval_count, parsed.eval_count) {
            (Some(prompt), Some(completion)) => Some(TokenUsage {
                prompt_tokens: prompt,
                completion_tokens: completion,
                total_tokens: prompt + completion,
            }),
            _ => None,
        };

        Ok(CompletionResponse {
            content: parsed.response,
            usage,
            finish_reason: parsed.done_reason,
            model: parsed.model,
        })
    }
}

/// Infer capability tags from an installed model's name and size
#[must_use]
pub fn infer_capabilities(model: &TagModel) -> Vec<Capability> {
    let mut capabilities = vec![Capability::Fast];
    let name = model.name.to_lowercase();
    let details = model.details.as_ref();

    if ["llava", "bakllava", "moondream", "vision"]
        .iter()
        .any(|k| name.contains(k))
    {
        capabilities.push(Capability::Vision);
    }

    if ["code", "starcoder", "coder"].iter().any(|k| name.contains(k)) {
        capabilities.push(Capability::Code);
    }

    // 7B+ models are considered reasoning-capable.
    let parameter_size = details
        .and_then(|d| d.parameter_size.as_deref())
        .unwrap_or("");
    let billions: f64 = parameter_size
        .trim_end_matches(['B', 'b'])
        .parse()
        .unwrap_or(0.0);
    if billions >= 7.0 {
        capabilities.push(Capability::Reasoning);
    }

    if ["embed", "nomic", "minilm", "bge"].iter().any(|k| name.contains(k)) {
        capabilities.push(Capability::Embedding);
    }

    let family = details
        .and_then(|d| d.family.as_deref())
        .unwrap_or("")
        .to_lowercase();
    if name.contains("128k") || name.contains("long") || family.contains("qwen") {
        capabilities.push(Capability::LongContext);
    }

    capabilities
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::message::Message;

    fn tag(name: &str, size: Option<&str>, family: Option<&str>) -> TagModel {
        TagModel {
            name: name.to_string(),
            details: Some(TagDetails {
                family: family.map(String::from),
                parameter_size: size.map(String::from),
            }),
        }
    }

    #[test]
    fn test_infer_capabilities_for_large_coder() {
        let caps = infer_capabilities(&tag("deepseek-coder:33b", Some("33B"), None));
        assert!(caps.contains(&Capability::Fast));
        assert!(caps.contains(&Capability::Code));
        assert!(caps.contains(&Capability::Reasoning));
    }

    #[test]
    fn test_infer_capabilities_vision_small() {
        let caps = infer_capabilities(&tag("moondream:1.8b", Some("1.8B"), None));
        assert!(caps.contains(&Capability::Vision));
        assert!(!caps.contains(&Capability::Reasoning));
    }

    #[test]
    fn test_infer_capabilities_qwen_long_context() {
        let caps = infer_capabilities(&tag("qwen2.5:7b", Some("7.6B"), Some("qwen2")));
        assert!(caps.contains(&Capability::LongContext));
        assert!(caps.contains(&Capability::Reasoning));
    }

    #[test]
    fn test_build_request_consolidates_system() {
        let provider = OllamaProvider::with_defaults().unwrap();
        let request = CompletionRequest::new("")
            .with_message(Message::system("rule one"))
            .with_message(Message::user("hello"))
            .with_message(Message::system("rule two"));

        let body = provider.build_request(&request);
        assert_eq!(body.model, DEFAULT_MODEL);
        assert_eq!(body.system.as_deref(), Some("rule one\n\nrule two"));
        assert_eq!(body.prompt, "hello");
        assert!(!body.stream);
    }
}
