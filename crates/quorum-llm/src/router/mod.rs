//! Model router - scores registry entries against an intent
//!
//! Selection is a pure function of a registry snapshot: identical input
//! always yields the same decision. Ties break on registration order
//! (stable max). A `None` result means "no model available" and must be
//! surfaced as a typed condition, never retried blindly.

mod scoring;


pub use scoring::score_model;

use crate::intent::Intent;
use crate::registry::{Capability, ModelDescriptor};
use serde::{Deserialize, Serialize};
use std::sync::Mutex;
use tracing::debug;
use uuid::Uuid;

/// Maximum routing decisions retained for observability
const ROUTING_HISTORY_LIMIT: usize = 100;

/// Caller preferences for one routing decision
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct RouteOptions {
    /// Penalize slow models, reward sub-second ones
    pub prefer_fast: bool,
    /// Reward reasoning and long-context models
    pub prefer_quality: bool,
    /// Only consider locally-hosted providers
    pub require_local: bool,
    /// Model ids to exclude from consideration
    pub exclude: Vec<String>,
}

/// Immutable outcome of one routing pass
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RoutingDecision {
    /// Correlation id for the execution this decision feeds
    pub task_id: Uuid,
    /// The winning model
    pub selected_model: ModelDescriptor,
    /// Human-readable selection rationale
    pub reason: String,
    /// Runner-up models, best first (at most 3)
    pub alternatives: Vec<ModelDescriptor>,
    /// Winning score scaled to 0.0 - 1.0
    pub confidence: f64,
}

/// Scores candidates and picks a winner with ranked alternatives
#[derive(Debug, Default)]
pub struct ModelRouter {
    history: Mutex<Vec<RoutingDecision>>,
}

impl ModelRouter {
    /// Create a router
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Select the best model for an intent from a registry snapshot.
    ///
    /// Returns `None` when no candidate survives filtering, including the
    /// relaxed pass when `fallback_enabled` is set.
    pub fn select_model(
        &self,
        snapshot: &[ModelDescriptor],
        intent: Intent,
        options: &RouteOptions,
        fallback_enabled: bool,
    ) -> Option<RoutingDecision> {
        let capability = intent.required_capability();

        let mut candidates: Vec<&ModelDescriptor> = snapshot
            .iter()
            .filter(|m| m.enabled && m.has_capability(capability))
            .filter(|m| self.passes_options(m, options))
            .collect();

        let mut used_fallback = false;
        if candidates.is_empty() && fallback_enabled {
            debug!(intent = %intent, capability = ?capability, "Direct filter empty, relaxing capability");
            used_fallback = true;
            candidates = snapshot
                .iter()
                .filter(|m| m.enabled)
                // A vision-only model is useless for a text intent even as
                // a last resort.
                .filter(|m| {
                    intent == Intent::VisionTask
                        || !(m.capabilities.len() == 1 && m.has_capability(Capability::Vision))
                })
                .filter(|m| self.passes_options(m, options))
                .collect();
        }

        if candidates.is_empty() {
            return None;
        }

        let mut scored: Vec<(&ModelDescriptor, u8)> = candidates
            .into_iter()
            .map(|m| (m, score_model(m, intent, options)))
            .collect();
        // Stable sort keeps registration order between equal scores.
        scored.sort_by(|a, b| b.1.cmp(&a.1));

        let (selected, score) = (scored[0].0.clone(), scored[0].1);
        let alternatives: Vec<ModelDescriptor> =
            scored.iter().skip(1).take(3).map(|(m, _)| (*m).clone()).collect();

        let mut reason = routing_reason(&selected, intent, options);
        if used_fallback {
            reason.push_str(" | fallback");
        }

        let decision = RoutingDecision {
            task_id: Uuid::new_v4(),
            selected_model: selected,
            reason,
            alternatives,
            confidence: f64::from(score) / 100.0,
        };

        self.push_history(decision.clone());
        Some(decision)
    }

    fn passes_options(&self, model: &ModelDescriptor, options: &RouteOptions) -> bool {
        if options.require_local && !model.provider.is_local() {
            return false;
        }
        !options.exclude.iter().any(|id| id == &model.id)
    }

    /// Recent routing decisions, oldest first
    #[must_use]
    pub fn history(&self) -> Vec<RoutingDecision> {
        self.history
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .clone()
    }

    /// Drop all retained routing decisions
    pub fn clear_history(&self) {
        self.history
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .clear();
    }

    fn push_history(&self, decision: RoutingDecision) {
        let mut history = self.history.lock().unwrap_or_else(|e| e.into_inner());
        history.push(decision);
        if history.len() > ROUTING_HISTORY_LIMIT {
            let overflow = history.len() - ROUTING_HISTORY_LIMIT;
            history.drain(0..overflow);
        }
    }
}

fn routing_reason(model: &ModelDescriptor, intent: Intent, options: &RouteOptions) -> String {
    let mut parts = vec![format!("intent: {intent}")];
    if options.prefer_fast {
        parts.push("fast mode".to_string());
    } else if options.prefer_quality {
        parts.push("quality mode".to_string());
    }
    if model.priority > 70 {
        parts.push("high priority".to_string());
    }
    if model.metrics.success_rate > 0.95 {
        parts.push("reliable".to_string());
    }
    if model.provider.is_local() {
        parts.push("local".to_string());
    }
    parts.join(" | ")
}
