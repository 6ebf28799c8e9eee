//! Quorum Core - task orchestration and multi-agent consensus
//!
//! This crate provides the orchestration half of Quorum:
//! - Orchestrator: the host-facing bridge (`generate`, `enqueue_task`,
//!   `update_config`, `run_consensus_session`)
//! - Queue: dual-lane priority queue with sequential per-lane draining and
//!   event-driven completion
//! - Events: broadcast bus for routing, queue and execution observability
//! - Consensus: the expert-panel pipeline with its guard utilities

#![forbid(unsafe_code)]
#![warn(missing_docs)]

pub mod config;
pub mod consensus;
pub mod error;
pub mod events;
pub mod orchestrator;
pub mod queue;

pub use config::{ConfigUpdate, OrchestratorConfig, RoutingStrategy};
pub use consensus::{
    AgentInsight, AuditAction, DialecticRound, ExpertInfluence, MultiAgentResponse, Persona,
    ReviewStrategy, SecurityAudit, SessionOptions, SessionStage, SessionStore, SessionStream,
    SessionUpdate, Visualization,
};
pub use error::{Error, Result};
pub use events::{EventBus, OrchestratorEvent};
pub use orchestrator::{ContextProvider, EnqueueRequest, GenerateOptions, Generator, Orchestrator};
pub use queue::{
    Lane, QueueSnapshot, Task, TaskQueue, TaskRequest, TaskRunner, TaskStatus, TASK_TIMEOUT,
};
