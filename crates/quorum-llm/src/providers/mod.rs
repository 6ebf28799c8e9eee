//! Concrete provider implementations
//!
//! Two wire shapes cover every configured backend: the Ollama-style local
//! daemon API and the OpenAI-style `/chat/completions` API (which also
//! serves LM Studio, Groq and custom gateways). The mock provider exists
//! for tests.

pub mod mock;
pub mod ollama;
pub mod openai_compat;

pub use mock::MockProvider;
pub use ollama::{OllamaConfig, OllamaProvider};
pub use openai_compat::{OpenAiCompatConfig, OpenAiCompatProvider};
