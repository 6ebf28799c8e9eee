//! Quorum LLM - model catalog, routing and provider abstraction
//!
//! This crate provides the model-facing half of Quorum:
//! - Registry: configured backends with capability tags and rolling metrics
//! - Intent: ordered rule table mapping free text to a closed intent set
//! - Router: deterministic scoring with capability-relaxing fallback
//! - Providers: Ollama local daemon and OpenAI-compatible cloud APIs
//! - Context: head+tail conversation pruning under a token budget
//! - Budget: advisory per-session token ledgers

#![forbid(unsafe_code)]
#![warn(missing_docs)]

pub mod budget;
pub mod completion;
pub mod context;
pub mod error;
pub mod intent;
pub mod message;
pub mod provider;
pub mod providers;
pub mod registry;
pub mod router;

pub use budget::{BudgetManager, SessionBudget, DEFAULT_SESSION_LIMIT};
pub use completion::{CompletionRequest, CompletionResponse, TokenUsage};
pub use context::{estimate_tokens, prune_messages, smart_truncate, PrunedContext};
pub use error::{Error, Result};
pub use intent::{Classification, Intent, IntentClassifier, RULE_CONFIDENCE_THRESHOLD};
pub use message::{Message, MessageRole};
pub use provider::LlmProvider;
pub use providers::{
    MockProvider, OllamaConfig, OllamaProvider, OpenAiCompatConfig, OpenAiCompatProvider,
};
pub use registry::{Capability, ModelDescriptor, ModelMetrics, ModelRegistry, Provider};
pub use router::{ModelRouter, RouteOptions, RoutingDecision};
