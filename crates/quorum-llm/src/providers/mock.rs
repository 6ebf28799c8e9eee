//! Mock provider for tests
//!
//! Returns queued replies in order, falling back to a default response
//! when the queue runs dry. Failures and per-call delays can be scripted
//! to exercise timeout and fallback paths.

use crate::completion::{CompletionRequest, CompletionResponse};
use crate::error::{Error, Result};
use crate::provider::LlmProvider;
use std::collections::VecDeque;
use std::sync::{Arc, Mutex};
use std::time::Duration;

/// A scripted reply
#[derive(Debug, Clone)]
pub enum MockReply {
    /// Succeed with this content
    Text(String),
    /// Fail with a network error carrying this message
    Fail(String),
    /// Sleep, then succeed with this content
    Slow(Duration, String),
}

/// A mock LLM provider with scripted replies
#[derive(Clone, Default)]
pub struct MockProvider {
    replies: Arc<Mutex<VecDeque<MockReply>>>,
    calls: Arc<Mutex<Vec<String>>>,
}

impl MockProvider {
    /// Create a mock with an empty script
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Queue a successful reply
    pub fn push_text(&self, content: impl Into<String>) {
        self.replies
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .push_back(MockReply::Text(content.into()));
    }

    /// Queue a failure
    pub fn push_failure(&self, message: impl Into<String>) {
        self.replies
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .push_back(MockReply::Fail(message.into()));
    }

    /// Queue a slow reply
    pub fn push_slow(&self, delay: Duration, content: impl Into<String>) {
        self.replies
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .push_back(MockReply::Slow(delay, content.into()));
    }

    /// Prompts seen so far, in call order (first user/system content joined)
    #[must_use]
    pub fn calls(&self) -> Vec<String> {
        self.calls.lock().unwrap_or_else(|e| e.into_inner()).clone()
    }

    /// Number of completed calls
    #[must_use]
    pub fn call_count(&self) -> usize {
        self.calls.lock().unwrap_or_else(|e| e.into_inner()).len()
    }

    fn response(content: String) -> CompletionResponse {
        CompletionResponse {
            content,
            usage: None,
            finish_reason: Some("stop".to_string()),
            model: "mock-model".to_string(),
        }
    }
}

#[async_trait::async_trait]
impl LlmProvider for MockProvider {
    fn name(&self) -> &str {
        "mock"
    }

    async fn is_available(&self) -> bool {
        true
    }

    async fn complete(&self, request: CompletionRequest) -> Result<CompletionResponse> {
        let prompt = request
            .messages
            .iter()
            .map(|m| m.content.as_str())
            .collect::<Vec<_>>()
            .join("\n");
        self.calls
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .push(prompt);

        let reply = self
            .replies
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .pop_front();

        match reply {
            Some(MockReply::Text(content)) => Ok(Self::response(content)),
            Some(MockReply::Fail(message)) => Err(Error::Network(message)),
            Some(MockReply::Slow(delay, content)) => {
                tokio::time::sleep(delay).await;
                Ok(Self::response(content))
            }
            None => Ok(Self::response("mock response".to_string())),
        }
    }
}
