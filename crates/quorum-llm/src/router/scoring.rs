//! Candidate scoring
//!
//! The score starts at the model's configured priority and is adjusted by
//! intent fit, health, latency and locality, then clamped to 0-100. All
//! inputs come from the snapshot, so scoring has no hidden state.

use super::RouteOptions;
use crate::intent::Intent;
use crate::registry::{Capability, ModelDescriptor};
use chrono::Utc;

/// Score a candidate model for an intent. Deterministic for a fixed
/// descriptor.
#[must_use]
pub fn score_model(model: &ModelDescriptor, intent: Intent, options: &RouteOptions) -> u8 {
    let mut score = i32::from(model.priority);

    let reasoning_intent = matches!(intent, Intent::MathProblem | Intent::ComplexReasoning);
    if reasoning_intent && model.has_capability(Capability::Reasoning) {
        score += 20;
    }

    if model.metrics.success_rate < 0.5 {
        score -= 40;
    }

    if options.prefer_fast {
        if model.metrics.avg_response_ms > 5000.0 {
            score -= 20;
        }
        if model.metrics.avg_response_ms < 1000.0 {
            score += 15;
        }
    }

    if options.prefer_quality {
        if model.has_capability(Capability::Reasoning) {
            score += 10;
        }
        if model.has_capability(Capability::LongContext) {
            score += 5;
        }
    }

    if model.provider.is_local() {
        score += 5;
    }

    if let Some(last_error_at) = model.metrics.last_error_at {
        let hours_since = (Utc::now() - last_error_at).num_minutes() as f64 / 60.0;
        if hours_since < 1.0 {
            score -= 30;
        } else if hours_since < 24.0 {
            score -= 10;
        }
    }

    score.clamp(0, 100) as u8
}
