//! Multi-agent consensus pipeline
//!
//! Runs N expert personas in rate-limited batches, scores their mutual
//! agreement, escalates to adversarial review when the panel turns into an
//! echo chamber, refines the consensus through a bounded dialectic loop and
//! assembles a cited document gated by a security audit.
//!
//! # Module structure
//!
//! - `types`: session data model and the status stream
//! - `personas`: the built-in expert panel
//! - `research`: multi-channel source retrieval
//! - `guards`: query optimizer, validation and red-team guards
//! - `document`: visualization generation and document assembly
//! - `pipeline`: the stage coordinator

pub mod document;
pub mod guards;
pub mod personas;
pub mod pipeline;
pub mod research;
pub mod types;

pub use document::{DataVisualizerAgent, DocumentArchitect, DocumentMeta};
pub use guards::{
    ConfidenceReport, DiversityReport, QueryOptimizer, RedTeamGuard, ValidationGuard,
    DIVERSITY_THRESHOLD,
};
pub use personas::{default_personas, Persona};
pub use pipeline::{run_session, TokenGuard};
pub use research::{
    databases_for, format_for_prompt, ResearchConfig, ResearchIntegrator, SourceIndex,
    SourceProvider, WebSearchConfig,
};
pub use types::{
    AcademicSource, AgentInsight, AuditAction, DialecticRound, ExpertInfluence,
    MultiAgentResponse, ReviewStrategy, SecurityAudit, SessionOptions, SessionStage,
    SessionStore, SessionStream, SessionUpdate, SourceType, Visualization,
};
