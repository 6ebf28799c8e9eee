//! Model registry - catalog of configured backends
//!
//! Each entry carries capability tags, a caller-set priority and rolling
//! health metrics. The registry is the single writer of metrics; the router
//! only ever reads immutable snapshots.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::sync::RwLock;
use tracing::{debug, warn};

/// Smoothing factor for the success-rate / latency moving averages.
/// Higher alpha weighs recent outcomes more heavily.
const METRICS_ALPHA: f64 = 0.2;

/// Coarse capability tag a backend advertises
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Capability {
    /// Can process images
    Vision,
    /// Complex logic and math
    Reasoning,
    /// Sub-second responses
    Fast,
    /// Code generation
    Code,
    /// 100K+ token context window
    LongContext,
    /// Can create embeddings
    Embedding,
}

/// Model backend provider
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Provider {
    /// Ollama local daemon
    Ollama,
    /// LM Studio local server (OpenAI-compatible)
    LmStudio,
    /// OpenAI cloud API
    OpenAi,
    /// Anthropic cloud API
    Anthropic,
    /// Google Gemini cloud API
    Gemini,
    /// Groq cloud API
    Groq,
    /// Custom OpenAI-compatible endpoint
    Custom,
}

impl Provider {
    /// Whether this provider runs on the local machine
    #[must_use]
    pub fn is_local(&self) -> bool {
        matches!(self, Self::Ollama | Self::LmStudio)
    }

    /// Returns the string representation
    #[must_use]
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Ollama => "ollama",
            Self::LmStudio => "lm_studio",
            Self::OpenAi => "openai",
            Self::Anthropic => "anthropic",
            Self::Gemini => "gemini",
            Self::Groq => "groq",
            Self::Custom => "custom",
        }
    }
}

/// Rolling health and performance metrics for one model
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ModelMetrics {
    /// Success rate over recent outcomes (0.0 - 1.0)
    pub success_rate: f64,
    /// Average response time over recent calls
    pub avg_response_ms: f64,
    /// Total requests seen
    pub total_requests: u64,
    /// Most recent error message
    pub last_error: Option<String>,
    /// When the most recent error happened
    pub last_error_at: Option<DateTime<Utc>>,
}

impl Default for ModelMetrics {
    fn default() -> Self {
        Self {
            success_rate: 1.0,
            avg_response_ms: 0.0,
            total_requests: 0,
            last_error: None,
            last_error_at: None,
        }
    }
}

impl ModelMetrics {
    fn record_success(&mut self, latency_ms: u64) {
        self.total_requests += 1;
        self.success_rate = self.success_rate * (1.0 - METRICS_ALPHA) + METRICS_ALPHA;
        self.avg_response_ms = if self.total_requests == 1 {
            latency_ms as f64
        } else {
            self.avg_response_ms * (1.0 - METRICS_ALPHA) + latency_ms as f64 * METRICS_ALPHA
        };
    }

    fn record_failure(&mut self, error: &str) {
        self.total_requests += 1;
        self.success_rate *= 1.0 - METRICS_ALPHA;
        self.last_error = Some(error.to_string());
        self.last_error_at = Some(Utc::now());
    }
}

/// A configured model backend
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ModelDescriptor {
    /// Unique registry id
    pub id: String,
    /// Display name
    pub name: String,
    /// Backend provider
    pub provider: Provider,
    /// Provider-specific model id (e.g. "qwen2.5:7b")
    pub model_id: String,
    /// API or daemon endpoint, when not the provider default
    pub endpoint: Option<String>,
    /// Advertised capabilities
    pub capabilities: Vec<Capability>,
    /// Whether this model may receive traffic
    pub enabled: bool,
    /// Caller preference, 0-100, higher wins
    pub priority: u8,
    /// Rolling health metrics
    pub metrics: ModelMetrics,
    /// When the entry was registered
    pub created_at: DateTime<Utc>,
    /// When the model last served a request
    pub last_used_at: Option<DateTime<Utc>>,
}

impl ModelDescriptor {
    /// Create a descriptor with default metrics
    #[must_use]
    pub fn new(
        id: impl Into<String>,
        provider: Provider,
        model_id: impl Into<String>,
        capabilities: Vec<Capability>,
    ) -> Self {
        let model_id = model_id.into();
        Self {
            id: id.into(),
            name: model_id.clone(),
            provider,
            model_id,
            endpoint: None,
            capabilities,
            enabled: true,
            priority: 50,
            metrics: ModelMetrics::default(),
            created_at: Utc::now(),
            last_used_at: None,
        }
    }

    /// Set the priority
    #[must_use]
    pub fn with_priority(mut self, priority: u8) -> Self {
        self.priority = priority.min(100);
        self
    }

    /// Set the endpoint
    #[must_use]
    pub fn with_endpoint(mut self, endpoint: impl Into<String>) -> Self {
        self.endpoint = Some(endpoint.into());
        self
    }

    /// Set the display name
    #[must_use]
    pub fn with_name(mut self, name: impl Into<String>) -> Self {
        self.name = name.into();
        self
    }

    /// Whether the model advertises a capability
    #[must_use]
    pub fn has_capability(&self, capability: Capability) -> bool {
        self.capabilities.contains(&capability)
    }
}

/// Catalog of configured model backends.
///
/// Metric updates are last-write-wins on scalar fields; completion callbacks
/// from concurrent calls take the write lock one at a time.
#[derive(Debug, Default)]
pub struct ModelRegistry {
    models: RwLock<Vec<ModelDescriptor>>,
}

impl ModelRegistry {
    /// Create an empty registry
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a model. Replaces any existing entry with the same id.
    pub fn register(&self, descriptor: ModelDescriptor) {
        let mut models = self.models.write().unwrap_or_else(|e| e.into_inner());
        debug!(model = %descriptor.id, provider = descriptor.provider.as_str(), "Registering model");
        if let Some(existing) = models.iter_mut().find(|m| m.id == descriptor.id) {
            *existing = descriptor;
        } else {
            models.push(descriptor);
        }
    }

    /// Remove a model by id. Returns true if it existed.
    pub fn remove(&self, id: &str) -> bool {
        let mut models = self.models.write().unwrap_or_else(|e| e.into_inner());
        let before = models.len();
        models.retain(|m| m.id != id);
        models.len() != before
    }

    /// Enable or disable a model
    pub fn set_enabled(&self, id: &str, enabled: bool) {
        let mut models = self.models.write().unwrap_or_else(|e| e.into_inner());
        if let Some(model) = models.iter_mut().find(|m| m.id == id) {
            model.enabled = enabled;
        }
    }

    /// Get a model by id
    #[must_use]
    pub fn get(&self, id: &str) -> Option<ModelDescriptor> {
        let models = self.models.read().unwrap_or_else(|e| e.into_inner());
        models.iter().find(|m| m.id == id).cloned()
    }

    /// Immutable snapshot of all entries, in registration order
    #[must_use]
    pub fn snapshot(&self) -> Vec<ModelDescriptor> {
        self.models
            .read()
            .unwrap_or_else(|e| e.into_inner())
            .clone()
    }

    /// Enabled models advertising a capability, in registration order
    #[must_use]
    pub fn models_with_capability(&self, capability: Capability) -> Vec<ModelDescriptor> {
        let models = self.models.read().unwrap_or_else(|e| e.into_inner());
        models
            .iter()
            .filter(|m| m.enabled && m.has_capability(capability))
            .cloned()
            .collect()
    }

    /// Number of registered models
    #[must_use]
    pub fn len(&self) -> usize {
        self.models.read().unwrap_or_else(|e| e.into_inner()).len()
    }

    /// Whether the registry is empty
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Record a successful call for a model
    pub fn record_success(&self, id: &str, latency_ms: u64) {
        let mut models = self.models.write().unwrap_or_else(|e| e.into_inner());
        if let Some(model) = models.iter_mut().find(|m| m.id == id) {
            model.metrics.record_success(latency_ms);
            model.last_used_at = Some(Utc::now());
        }
    }

    /// Record a failed call for a model
    pub fn record_failure(&self, id: &str, error: &str) {
        let mut models = self.models.write().unwrap_or_else(|e| e.into_inner());
        if let Some(model) = models.iter_mut().find(|m| m.id == id) {
            model.metrics.record_failure(error);
            warn!(model = %id, error = %error, "Model call failed");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn descriptor(id: &str) -> ModelDescriptor {
        ModelDescriptor::new(id, Provider::Ollama, "qwen2.5:7b", vec![Capability::Fast])
    }

    #[test]
    fn test_register_and_snapshot_order() {
        let registry = ModelRegistry::new();
        registry.register(descriptor("a"));
        registry.register(descriptor("b"));

        let snapshot = registry.snapshot();
        assert_eq!(snapshot.len(), 2);
        assert_eq!(snapshot[0].id, "a");
        assert_eq!(snapshot[1].id, "b");
    }

    #[test]
    fn test_register_replaces_same_id() {
        let registry = ModelRegistry::new();
        registry.register(descriptor("a"));
        registry.register(descriptor("a").with_priority(90));

        assert_eq!(registry.len(), 1);
        assert_eq!(registry.get("a").unwrap().priority, 90);
    }

    #[test]
    fn test_disabled_models_excluded_from_capability_query() {
        let registry = ModelRegistry::new();
        registry.register(descriptor("a"));
        registry.set_enabled("a", false);

        assert!(registry.models_with_capability(Capability::Fast).is_empty());
    }

    #[test]
    fn test_metrics_move_with_outcomes() {
        let registry = ModelRegistry::new();
        registry.register(descriptor("a"));

        registry.record_failure("a", "connection refused");
        let m = registry.get("a").unwrap().metrics;
        assert!(m.success_rate < 1.0);
        assert!(m.last_error_at.is_some());
        assert_eq!(m.last_error.as_deref(), Some("connection refused"));

        registry.record_success("a", 800);
        let m = registry.get("a").unwrap().metrics;
        assert!(m.success_rate > 0.8 * (1.0 - 0.2));
        assert_eq!(m.total_requests, 2);
    }

    #[test]
    fn test_priority_clamped_to_100() {
        let d = descriptor("a").with_priority(250);
        assert_eq!(d.priority, 100);
    }
}
