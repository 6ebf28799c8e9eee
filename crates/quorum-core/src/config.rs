//! Process-wide orchestrator configuration
//!
//! Owned by the orchestrator instance and passed in at construction; there
//! is no global mutable state. `ConfigUpdate` carries a partial merge the
//! host applies at runtime.

use serde::{Deserialize, Serialize};

/// How queries are classified for routing
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RoutingStrategy {
    /// Ordered pattern rules only
    RuleBased,
    /// Pattern rules first, fast-model re-classification when uncertain
    LlmBased,
}

/// Orchestrator configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OrchestratorConfig {
    /// Classification strategy
    pub routing_strategy: RoutingStrategy,
    /// Whether routing may relax the capability filter
    pub fallback_enabled: bool,
    /// How many ranked alternatives one-shot execution may try after the
    /// selected model fails
    pub max_retries: u32,
    /// Whether session history is injected into prompts
    pub context_injection_enabled: bool,
    /// Token budget for pruned conversation context
    pub max_context_tokens: usize,
    /// Verbose decision logging
    pub debug_mode: bool,
}

impl Default for OrchestratorConfig {
    fn default() -> Self {
        Self {
            routing_strategy: RoutingStrategy::RuleBased,
            fallback_enabled: true,
            max_retries: 2,
            context_injection_enabled: true,
            max_context_tokens: 4096,
            debug_mode: false,
        }
    }
}

/// Partial configuration update; `None` fields are left untouched
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ConfigUpdate {
    /// New classification strategy
    pub routing_strategy: Option<RoutingStrategy>,
    /// New fallback setting
    pub fallback_enabled: Option<bool>,
    /// New retry bound
    pub max_retries: Option<u32>,
    /// New context injection setting
    pub context_injection_enabled: Option<bool>,
    /// New context token budget
    pub max_context_tokens: Option<usize>,
    /// New debug setting
    pub debug_mode: Option<bool>,
}

impl OrchestratorConfig {
    /// Merge a partial update. Returns true when any field changed.
    pub fn apply(&mut self, update: &ConfigUpdate) -> bool {
        let mut changed = false;

        macro_rules! merge {
            ($field:ident) => {
                if let Some(value) = &update.$field {
                    if self.$field != *value {
                        self.$field = value.clone();
                        changed = true;
                    }
                }
            };
        }

        merge!(routing_strategy);
        merge!(fallback_enabled);
        merge!(max_retries);
        merge!(context_injection_enabled);
        merge!(max_context_tokens);
        merge!(debug_mode);

        changed
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults_match_documented_values() {
        let config = OrchestratorConfig::default();
        assert_eq!(config.routing_strategy, RoutingStrategy::RuleBased);
        assert!(config.fallback_enabled);
        assert_eq!(config.max_retries, 2);
        assert!(config.context_injection_enabled);
        assert_eq!(config.max_context_tokens, 4096);
        assert!(!config.debug_mode);
    }

    #[test]
    fn test_partial_merge_touches_only_set_fields() {
        let mut config = OrchestratorConfig::default();
        let changed = config.apply(&ConfigUpdate {
            fallback_enabled: Some(false),
            max_context_tokens: Some(8192),
            ..Default::default()
        });

        assert!(changed);
        assert!(!config.fallback_enabled);
        assert_eq!(config.max_context_tokens, 8192);
        assert_eq!(config.max_retries, 2);
    }

    #[test]
    fn test_noop_merge_reports_unchanged() {
        let mut config = OrchestratorConfig::default();
        assert!(!config.apply(&ConfigUpdate::default()));
        assert!(!config.apply(&ConfigUpdate {
            max_retries: Some(2),
            ..Default::default()
        }));
    }
}
