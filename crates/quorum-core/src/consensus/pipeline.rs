//! Multi-agent consensus pipeline
//!
//! Coordinates a session through its stages: strategy selection, batched
//! research, influence scoring, diversity-driven strategy escalation,
//! adaptive review, a bounded dialectic refinement loop and gated
//! finalization. Individual persona and review failures recover locally;
//! only "no personas", "all personas failed" and a security block abort
//! the session.

use super::document::{DataVisualizerAgent, DocumentArchitect, DocumentMeta};
use super::guards::{truncate, QueryOptimizer, RedTeamGuard, ValidationGuard};
use super::personas::{default_personas, Persona};
use super::research::{format_for_prompt, ResearchConfig, ResearchIntegrator, SourceProvider};
use super::types::{
    AgentInsight, AuditAction, DialecticRound, ExpertInfluence, MultiAgentResponse,
    ReviewStrategy, SessionOptions, SessionStage, SessionStream, SessionUpdate,
};
use crate::error::{Error, Result};
use crate::orchestrator::{GenerateOptions, Generator};
use futures::future::join_all;
use quorum_llm::{BudgetManager, DEFAULT_SESSION_LIMIT};
use rand::Rng;
use std::collections::HashSet;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{info, instrument, warn};
use uuid::Uuid;

/// Estimated token cost per persona insight
const COST_PER_INSIGHT: u64 = 1500;

/// Estimated fixed token cost of synthesis
const SYNTHESIS_BASE: u64 = 4000;

/// Personas researched concurrently per batch
const RESEARCH_BATCH_SIZE: usize = 3;

/// Dialectic refinement cap; the audit trail never grows past this
const MAX_DIALECTIC_ROUNDS: usize = 2;

/// Confidence at which refinement stops early
const CONFIDENCE_TARGET: f64 = 0.9;

/// Prefix length used for consensus cycle detection
const CONSENSUS_PREFIX_CHARS: usize = 100;

/// Token-cost estimation and initial review strategy selection
pub struct TokenGuard;

impl TokenGuard {
    /// Estimate a session's token cost and pick the review topology.
    /// More than three agents always triages; a tight budget reviews in a
    /// ring; otherwise every pair is compared.
    #[must_use]
    pub fn validate(agent_count: usize, limit: u64) -> (u64, ReviewStrategy) {
        let estimate = agent_count as u64 * COST_PER_INSIGHT + SYNTHESIS_BASE;
        let strategy = if agent_count > 3 {
            ReviewStrategy::Triage
        } else if estimate as f64 > limit as f64 * 0.8 {
            ReviewStrategy::Circular
        } else {
            ReviewStrategy::FullCross
        };
        (estimate, strategy)
    }
}

/// Start a consensus session. Status events stream out immediately; the
/// terminal item is either the full response or the session error.
pub fn run_session(
    generator: Arc<dyn Generator>,
    budget: Arc<BudgetManager>,
    query: String,
    persona_keys: &[&str],
    options: SessionOptions,
) -> SessionStream {
    let (tx, rx) = mpsc::unbounded_channel();
    let keys: Vec<String> = persona_keys.iter().map(|k| (*k).to_string()).collect();

    tokio::spawn(async move {
        let session_id = options
            .session_id
            .clone()
            .unwrap_or_else(|| format!("session-{}", Uuid::new_v4()));
        let research = options
            .research
            .clone()
            .unwrap_or_else(|| Arc::new(ResearchIntegrator::new(ResearchConfig::default())));

        let pipeline = Pipeline {
            generator,
            budget,
            research,
            tx: tx.clone(),
            cancel: options.cancel.clone(),
            session_id,
        };

        match pipeline.run(query, keys, options).await {
            Ok(response) => {
                let _ = tx.send(SessionUpdate::Completed(Box::new(response)));
            }
            Err(error) => {
                let _ = tx.send(SessionUpdate::Failed(error));
            }
        }
    });

    SessionStream::new(rx)
}

struct Pipeline {
    generator: Arc<dyn Generator>,
    budget: Arc<BudgetManager>,
    research: Arc<dyn SourceProvider>,
    tx: mpsc::UnboundedSender<SessionUpdate>,
    cancel: Option<CancellationToken>,
    session_id: String,
}

impl Pipeline {
    fn status(&self, stage: SessionStage, message: impl Into<String>) {
        let _ = self.tx.send(SessionUpdate::Status {
            stage,
            message: message.into(),
        });
    }

    fn check_cancelled(&self) -> Result<()> {
        match &self.cancel {
            Some(token) if token.is_cancelled() => Err(Error::Cancelled),
            _ => Ok(()),
        }
    }

    fn generate_options(&self, prefer_fast: bool, prefer_quality: bool) -> GenerateOptions {
        GenerateOptions {
            prefer_fast,
            prefer_quality,
            cancel: self.cancel.clone(),
            ..Default::default()
        }
    }

    #[instrument(skip_all, fields(session = %self.session_id))]
    async fn run(
        &self,
        query: String,
        persona_keys: Vec<String>,
        options: SessionOptions,
    ) -> Result<MultiAgentResponse> {
        // ── Stage 0: strategy ───────────────────────────────────────────
        let mut personas = default_personas();
        personas.extend(options.custom_personas.clone());

        let active: Vec<(String, Persona)> = persona_keys
            .iter()
            .filter_map(|key| personas.get(key).map(|p| (key.clone(), p.clone())))
            .collect();
        if active.is_empty() {
            return Err(Error::NoPersonas);
        }

        self.status(SessionStage::Initializing, "Optimizing strategy");
        let token_limit = options.token_limit.unwrap_or(DEFAULT_SESSION_LIMIT);
        self.budget.initialize(&self.session_id, token_limit);

        let optimized_query =
            QueryOptimizer::optimize(self.generator.as_ref(), &query, &options.history).await;

        let (estimate, mut strategy) = TokenGuard::validate(active.len(), token_limit);
        info!(agents = active.len(), estimate, ?strategy, "Session strategy selected");

        // ── Stage 1: batched research ───────────────────────────────────
        self.check_cancelled()?;
        self.status(
            SessionStage::Researching,
            "Experts consulting sources (batched)",
        );

        let mut insights: Vec<AgentInsight> = Vec::with_capacity(active.len());
        for (batch_index, batch) in active.chunks(RESEARCH_BATCH_SIZE).enumerate() {
            if batch_index > 0 {
                // Jitter between batches spreads the load and avoids
                // provider rate-limit bursts.
                let jitter = rand::thread_rng().gen_range(100..=300);
                tokio::time::sleep(Duration::from_millis(jitter)).await;
            }
            self.check_cancelled()?;

            let batch_results = join_all(
                batch
                    .iter()
                    .map(|(key, persona)| self.run_persona(key, persona, &optimized_query)),
            )
            .await;
            for result in batch_results {
                insights.push(result?);
            }
        }

        let successful: Vec<AgentInsight> =
            insights.into_iter().filter(|i| i.success).collect();
        if successful.is_empty() {
            return Err(Error::AllPersonasFailed);
        }
        let all_sources: Vec<_> = successful
            .iter()
            .flat_map(|i| i.sources.iter().cloned())
            .collect();

        // ── Stage 1.5: influence and diversity ──────────────────────────
        self.check_cancelled()?;
        let influence_matrix = self.score_influence(&successful, &optimized_query).await;

        let diversity = ValidationGuard::check_diversity(&successful);
        if !diversity.is_diverse {
            warn!(
                mean_similarity = diversity.mean_similarity,
                max_similarity = diversity.max_similarity,
                "Low panel diversity, forcing adversarial review"
            );
            strategy = ReviewStrategy::AdversarialAudit;
        }
        self.status(
            SessionStage::Insights,
            format!("Insights processed. Strategy: {strategy:?}"),
        );

        // ── Stage 2: adaptive review ────────────────────────────────────
        self.check_cancelled()?;
        let review_summary = self.review(&successful, strategy).await?;

        // ── Stage 2.5: dialectic synthesis ──────────────────────────────
        self.check_cancelled()?;
        let (consensus, confidence, audit_trail) = self
            .dialectic(&successful, &influence_matrix, review_summary)
            .await?;

        // ── Stage 3: gated finalization ─────────────────────────────────
        self.check_cancelled()?;
        self.status(SessionStage::Visualizing, "Generating figures");
        self.status(SessionStage::Security, "Running security audit");

        // Independent, no data dependency: run concurrently.
        let (visualizations, security) = tokio::join!(
            DataVisualizerAgent::generate(self.generator.as_ref(), &consensus),
            RedTeamGuard::audit(self.generator.as_ref(), &consensus),
        );

        if security.action == AuditAction::Block {
            return Err(Error::SecurityBlock {
                threats: security.threats,
            });
        }

        self.status(SessionStage::Finalizing, "Packaging results");
        let agents_used: Vec<String> = active.iter().map(|(_, p)| p.name.clone()).collect();
        let academic_document = DocumentArchitect::generate(
            &consensus,
            &all_sources,
            &visualizations,
            &DocumentMeta {
                title: &query,
                agents_used: &agents_used,
                audit_status: if confidence > 0.85 { "VALIDATED" } else { "AUDITED" },
                confidence_score: confidence,
                audit_trail: &audit_trail,
                influence_matrix: &influence_matrix,
            },
        );

        let response = MultiAgentResponse {
            consensus,
            individual_insights: successful,
            visualizations,
            academic_document,
            security_audit: security,
            confidence_score: confidence,
            audit_trail,
            influence_matrix,
        };

        if let Some(store) = &options.store {
            if let Err(error) = store.save(&self.session_id, &response).await {
                warn!(%error, "Session persistence failed");
            }
        }

        Ok(response)
    }

    /// One persona's research + insight. A failed grounded generation
    /// falls back to an ungrounded simulated expert; a dropped persona
    /// slot would silently bias the panel. Only cancellation propagates.
    async fn run_persona(
        &self,
        key: &str,
        persona: &Persona,
        query: &str,
    ) -> Result<AgentInsight> {
        self.status(
            SessionStage::Researching,
            format!("{} consulting sources", persona.name),
        );
        let sources = self.research.fetch_sources(query, key).await;
        let grounded = format_for_prompt(&sources);

        let prompt = format!(
            "<identity>{} ({})</identity>\n<research>{}</research>\n<query>{}</query>",
            persona.name, persona.role, grounded, query
        );
        let estimated = ((prompt.len() as f64 / 3.0) * 1.2).ceil() as u64 + 500;

        match self
            .generator
            .generate(prompt, self.generate_options(false, true))
            .await
        {
            Ok(insight) => {
                self.budget.add_usage(&self.session_id, estimated);
                Ok(AgentInsight {
                    agent: persona.name.clone(),
                    role: persona.role.clone(),
                    insight,
                    sources,
                    success: true,
                })
            }
            Err(Error::Cancelled) => Err(Error::Cancelled),
            Err(error) => {
                warn!(persona = %persona.name, %error, "Expert failed, recovery engaged");
                let fallback_prompt =
                    format!("Simulate a {} answering: {}", persona.role, query);
                match self
                    .generator
                    .generate(fallback_prompt, self.generate_options(true, false))
                    .await
                {
                    Ok(fallback) => Ok(AgentInsight {
                        agent: persona.name.clone(),
                        role: persona.role.clone(),
                        insight: format!("[Fallback] {fallback}"),
                        sources: Vec::new(),
                        success: true,
                    }),
                    Err(Error::Cancelled) => Err(Error::Cancelled),
                    Err(error) => {
                        warn!(persona = %persona.name, %error, "Fallback generation failed");
                        Ok(AgentInsight {
                            agent: persona.name.clone(),
                            role: persona.role.clone(),
                            insight: String::new(),
                            sources: Vec::new(),
                            success: false,
                        })
                    }
                }
            }
        }
    }

    /// Relevance weight per persona, recomputed once per session.
    /// Unparseable scores default to the neutral 0.5; 0.0 is a valid score.
    async fn score_influence(
        &self,
        insights: &[AgentInsight],
        query: &str,
    ) -> Vec<ExpertInfluence> {
        join_all(insights.iter().map(|insight| async move {
            let prompt = format!(
                "Rate relevance 0.0-1.0 of expert {} for \"{query}\". Answer with only the number.",
                insight.agent
            );
            let score = match self
                .generator
                .generate(prompt, self.generate_options(true, false))
                .await
            {
                Ok(reply) => parse_score(&reply).unwrap_or(0.5),
                Err(_) => 0.5,
            };
            ExpertInfluence {
                agent: insight.agent.clone(),
                score: score.clamp(0.0, 1.0),
            }
        }))
        .await
    }

    /// Review stage: one auditor/critic pass for triage and adversarial
    /// audits, parallel peer review otherwise. Failures fall back to empty
    /// summaries so the dialectic seeds from the first insight.
    async fn review(
        &self,
        insights: &[AgentInsight],
        strategy: ReviewStrategy,
    ) -> Result<String> {
        if insights.len() <= 1 {
            return Ok(String::new());
        }

        let digest: Vec<serde_json::Value> = insights
            .iter()
            .map(|i| {
                serde_json::json!({
                    "agent": i.agent,
                    "insight": truncate(&i.insight, 1500),
                })
            })
            .collect();

        match strategy {
            ReviewStrategy::Triage | ReviewStrategy::AdversarialAudit => {
                let role = if strategy == ReviewStrategy::AdversarialAudit {
                    "Ruthless Critic"
                } else {
                    "Chief Auditor"
                };
                self.status(
                    SessionStage::Reviews,
                    format!("{role} analyzing conflicts"),
                );
                let prompt = format!(
                    "Role: {role}. Analyze discrepancies between these expert insights and \
                     summarize the conflicts:\n{}",
                    serde_json::Value::Array(digest)
                );
                match self
                    .generator
                    .generate(prompt, self.generate_options(false, true))
                    .await
                {
                    Ok(summary) => Ok(summary),
                    Err(Error::Cancelled) => Err(Error::Cancelled),
                    Err(error) => {
                        warn!(%error, "Auditor review failed, continuing without summary");
                        Ok(String::new())
                    }
                }
            }
            ReviewStrategy::FullCross | ReviewStrategy::Circular => {
                self.status(SessionStage::Reviews, "Peer-to-peer review");
                let reviews = join_all(insights.iter().enumerate().map(|(index, reviewer)| {
                    let peers: Vec<serde_json::Value> = if strategy == ReviewStrategy::Circular {
                        vec![digest[(index + 1) % digest.len()].clone()]
                    } else {
                        digest
                            .iter()
                            .enumerate()
                            .filter(|(i, _)| *i != index)
                            .map(|(_, d)| d.clone())
                            .collect()
                    };
                    let prompt = format!(
                        "As {}, review your peers' insights and note agreements and gaps:\n{}",
                        reviewer.agent,
                        serde_json::Value::Array(peers)
                    );
                    async move {
                        self.generator
                            .generate(prompt, self.generate_options(true, false))
                            .await
                    }
                }))
                .await;

                let mut lines = Vec::with_capacity(reviews.len());
                for review in reviews {
                    match review {
                        Ok(line) => lines.push(line),
                        Err(Error::Cancelled) => return Err(Error::Cancelled),
                        Err(error) => {
                            warn!(%error, "Peer review failed, skipping reviewer");
                        }
                    }
                }
                Ok(lines.join("\n"))
            }
        }
    }

    /// Bounded dialectic refinement: challenge, rebuttal, confidence.
    /// Exits early on the confidence target, a plateau, or a repeated
    /// consensus prefix. Appends one audit-trail entry per round.
    async fn dialectic(
        &self,
        insights: &[AgentInsight],
        influence: &[ExpertInfluence],
        review_summary: String,
    ) -> Result<(String, f64, Vec<DialecticRound>)> {
        let mut consensus = if review_summary.trim().is_empty() {
            insights[0].insight.clone()
        } else {
            review_summary
        };
        let mut confidence = 0.0f64;
        let mut previous = -1.0f64;
        let mut iteration = 0usize;
        let mut audit_trail: Vec<DialecticRound> = Vec::new();
        let mut seen_prefixes: HashSet<String> = HashSet::new();

        while confidence < CONFIDENCE_TARGET && iteration < MAX_DIALECTIC_ROUNDS {
            if iteration > 0 && confidence <= previous {
                info!(confidence, "Dialectic converged, no improvement");
                break;
            }
            // Cycle detection: a consensus prefix we have already seen
            // means the loop is rewriting itself in circles.
            let prefix: String = consensus.chars().take(CONSENSUS_PREFIX_CHARS).collect();
            if !seen_prefixes.insert(prefix) {
                break;
            }

            previous = confidence;
            iteration += 1;
            self.check_cancelled()?;
            self.status(
                SessionStage::Synthesis,
                format!("Synthesis round {iteration}"),
            );

            let challenge_prompt = format!(
                "Role: Critic. Find gaps and weaknesses in this consensus:\n{}\n\nWeigh the \
                 experts by this influence matrix: {}",
                truncate(&consensus, 2000),
                serde_json::to_string(influence).unwrap_or_default()
            );
            let challenge = match self
                .generator
                .generate(challenge_prompt, self.generate_options(false, true))
                .await
            {
                Ok(challenge) => challenge,
                Err(Error::Cancelled) => return Err(Error::Cancelled),
                Err(error) => {
                    warn!(%error, "Critic call failed, keeping current consensus");
                    break;
                }
            };

            let rebuttal_prompt = format!(
                "Role: Synthesizer. Rewrite the consensus so it addresses this critique:\n{}\n\n\
                 Current consensus:\n{}",
                truncate(&challenge, 1000),
                truncate(&consensus, 2000)
            );
            let rebuttal = match self
                .generator
                .generate(rebuttal_prompt, self.generate_options(false, true))
                .await
            {
                Ok(rebuttal) => rebuttal,
                Err(Error::Cancelled) => return Err(Error::Cancelled),
                Err(error) => {
                    warn!(%error, "Synthesizer call failed, keeping current consensus");
                    break;
                }
            };

            consensus = rebuttal.clone();
            let report = ValidationGuard::calculate_confidence(
                self.generator.as_ref(),
                &consensus,
                insights,
                &challenge,
                influence,
            )
            .await;
            confidence = report.score;
            audit_trail.push(DialecticRound {
                challenge,
                rebuttal,
            });

            self.status(
                SessionStage::Validation,
                format!("Confidence: {:.1}%", confidence * 100.0),
            );
        }

        Ok((consensus, confidence, audit_trail))
    }
}

fn parse_score(reply: &str) -> Option<f64> {
    let trimmed = reply.trim();
    if let Ok(score) = trimmed.parse::<f64>() {
        return Some(score);
    }
    // Pull the first number out of a wordy reply.
    let start = trimmed.find(|c: char| c.is_ascii_digit())?;
    let number: String = trimmed[start..]
        .chars()
        .take_while(|c| c.is_ascii_digit() || *c == '.')
        .collect();
    number.parse().ok()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_strategy_triage_above_three_agents() {
        let (estimate, strategy) = TokenGuard::validate(4, 15_000);
        assert_eq!(estimate, 4 * 1500 + 4000);
        assert_eq!(strategy, ReviewStrategy::Triage);
    }

    #[test]
    fn test_strategy_circular_on_tight_budget() {
        // 3 agents estimate 8500; 80% of 10_000 is 8000.
        let (_, strategy) = TokenGuard::validate(3, 10_000);
        assert_eq!(strategy, ReviewStrategy::Circular);
    }

    #[test]
    fn test_strategy_full_cross_when_budget_allows() {
        let (_, strategy) = TokenGuard::validate(2, 15_000);
        assert_eq!(strategy, ReviewStrategy::FullCross);
    }

    #[test]
    fn test_parse_score_variants() {
        assert_eq!(parse_score("0.8"), Some(0.8));
        assert_eq!(parse_score("The relevance is 0.75 overall"), Some(0.75));
        assert_eq!(parse_score("no number"), None);
        assert_eq!(parse_score("0.0"), Some(0.0));
    }
}
