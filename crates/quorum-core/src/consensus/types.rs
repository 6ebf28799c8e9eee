//! Types for the multi-agent consensus pipeline

use crate::error::{Error, Result};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

use super::personas::Persona;
use super::research::SourceProvider;

/// Where a source came from
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SourceType {
    /// Peer-reviewed journal
    Journal,
    /// Preprint server
    Preprint,
    /// Book or local library document
    Book,
    /// General web result
    Web,
}

/// A candidate grounding source
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AcademicSource {
    /// Source title
    pub title: String,
    /// Canonical URL
    pub url: String,
    /// Snippet used for grounding
    pub snippet: String,
    /// Source category
    pub source_type: SourceType,
    /// Retrieval relevance, when the channel scores results
    pub score: Option<f64>,
}

/// One persona's contribution to a session
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AgentInsight {
    /// Persona display name
    pub agent: String,
    /// Persona role
    pub role: String,
    /// The insight text
    pub insight: String,
    /// Sources that grounded the insight
    pub sources: Vec<AcademicSource>,
    /// False when both the grounded and the fallback generation failed
    pub success: bool,
}

/// Relevance weight of a persona's insight for the current query
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExpertInfluence {
    /// Persona display name
    pub agent: String,
    /// Relevance 0.0 - 1.0
    pub score: f64,
}

/// One challenge/rebuttal cycle; the audit trail is append-only
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DialecticRound {
    /// What the critic found lacking
    pub challenge: String,
    /// How the synthesizer answered
    pub rebuttal: String,
}

/// What the security audit decided
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum AuditAction {
    /// Content is safe
    Allow,
    /// Content must not reach the caller
    Block,
    /// Content passes with a warning attached
    Warn,
}

/// Security audit result
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SecurityAudit {
    /// Whether the scan found nothing
    pub passed: bool,
    /// Identified threats
    pub threats: Vec<String>,
    /// Enforcement decision
    pub action: AuditAction,
}

/// A generated visualization suggestion
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Visualization {
    /// Chart kind (e.g. "bar", "line", "network")
    pub chart_type: String,
    /// Figure title
    pub title: String,
    /// What the figure shows
    pub description: String,
}

/// Review topology chosen for a session
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ReviewStrategy {
    /// All-pairs peer review
    FullCross,
    /// Ring topology, each reviewer sees one neighbor
    Circular,
    /// One auditor summarizes conflicts
    Triage,
    /// One adversarial critic pass; forced on echo-chamber panels
    AdversarialAudit,
}

/// Pipeline stage reported through status events
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SessionStage {
    /// Strategy and budget setup
    Initializing,
    /// Personas fetching sources and generating insights
    Researching,
    /// Insights collected, influence and diversity computed
    Insights,
    /// Peer or auditor review
    Reviews,
    /// Dialectic synthesis round
    Synthesis,
    /// Visualization generation
    Visualizing,
    /// Confidence scoring
    Validation,
    /// Security audit
    Security,
    /// Document assembly and persistence
    Finalizing,
}

/// Final value of a successful session
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MultiAgentResponse {
    /// The refined consensus text
    pub consensus: String,
    /// Every persona's contribution
    pub individual_insights: Vec<AgentInsight>,
    /// Generated figure suggestions
    pub visualizations: Vec<Visualization>,
    /// Assembled cited document (markdown)
    pub academic_document: String,
    /// Security audit outcome
    pub security_audit: SecurityAudit,
    /// Final confidence 0.0 - 1.0
    pub confidence_score: f64,
    /// Challenge/rebuttal history, at most one entry per dialectic round
    pub audit_trail: Vec<DialecticRound>,
    /// Per-persona relevance weights
    pub influence_matrix: Vec<ExpertInfluence>,
}

/// Receives the finished session object before it is yielded to the caller
#[async_trait::async_trait]
pub trait SessionStore: Send + Sync {
    /// Persist a finished session
    async fn save(&self, session_id: &str, response: &MultiAgentResponse) -> Result<()>;
}

/// Options for one consensus session
#[derive(Default, Clone)]
pub struct SessionOptions {
    /// Session id; generated when absent
    pub session_id: Option<String>,
    /// Extra personas merged over the defaults
    pub custom_personas: HashMap<String, Persona>,
    /// Prior queries used by the query optimizer
    pub history: Vec<String>,
    /// Source retrieval override; defaults to the live integrator
    pub research: Option<Arc<dyn SourceProvider>>,
    /// Persistence collaborator
    pub store: Option<Arc<dyn SessionStore>>,
    /// Cooperative cancellation
    pub cancel: Option<CancellationToken>,
    /// Token ceiling driving strategy selection and the session budget
    pub token_limit: Option<u64>,
}

/// One item on the session stream
#[derive(Debug)]
pub enum SessionUpdate {
    /// Progress report
    Status {
        /// Pipeline stage
        stage: SessionStage,
        /// Human-readable progress line
        message: String,
    },
    /// Terminal success value
    Completed(Box<MultiAgentResponse>),
    /// Terminal failure
    Failed(Error),
}

/// Lazy sequence of status events terminating in one final value.
/// Exhausted streams cannot be restarted.
pub struct SessionStream {
    receiver: mpsc::UnboundedReceiver<SessionUpdate>,
}

impl SessionStream {
    pub(crate) fn new(receiver: mpsc::UnboundedReceiver<SessionUpdate>) -> Self {
        Self { receiver }
    }

    /// Next update, or `None` once the stream is exhausted
    pub async fn recv(&mut self) -> Option<SessionUpdate> {
        self.receiver.recv().await
    }

    /// Drain the stream to its terminal value
    pub async fn final_response(mut self) -> Result<MultiAgentResponse> {
        while let Some(update) = self.recv().await {
            match update {
                SessionUpdate::Status { .. } => {}
                SessionUpdate::Completed(response) => return Ok(*response),
                SessionUpdate::Failed(error) => return Err(error),
            }
        }
        Err(Error::SessionAborted("stream closed without a result".to_string()))
    }
}
