//! LLM provider trait definition

use crate::completion::{CompletionRequest, CompletionResponse};
use crate::error::Result;

/// Trait every model backend implements.
///
/// Backends are opaque capability providers reachable over request/response
/// channels. Cancellation is handled by the caller racing `complete` against
/// a cancellation token; the health check must settle within a few seconds.
#[async_trait::async_trait]
pub trait LlmProvider: Send + Sync {
    /// Provider name (stable, lowercase)
    fn name(&self) -> &str;

    /// Lightweight health check with a short (~3s) timeout
    async fn is_available(&self) -> bool;

    /// Complete a conversation
    async fn complete(&self, request: CompletionRequest) -> Result<CompletionResponse>;
}
