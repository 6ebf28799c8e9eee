//! Session token budgets
//!
//! Advisory telemetry: every model call adds to a per-session counter and
//! callers decide whether to keep spending. Nothing in the pipeline
//! self-enforces the ceiling.

use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, RwLock};
use tracing::{debug, warn};

/// Default per-session token ceiling
pub const DEFAULT_SESSION_LIMIT: u64 = 15_000;

/// Snapshot of one session's spend
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SessionBudget {
    /// Session identifier
    pub session_id: String,
    /// Tokens consumed so far (monotonic)
    pub used: u64,
    /// Advisory ceiling
    pub limit: u64,
}

impl SessionBudget {
    /// Whether spend has reached the ceiling
    #[must_use]
    pub fn is_exhausted(&self) -> bool {
        self.used >= self.limit
    }

    /// Tokens left under the ceiling
    #[must_use]
    pub fn remaining(&self) -> u64 {
        self.limit.saturating_sub(self.used)
    }
}

struct Ledger {
    used: AtomicU64,
    limit: u64,
}

/// Per-session token-usage counters with a hard advisory ceiling
#[derive(Default)]
pub struct BudgetManager {
    sessions: RwLock<HashMap<String, Arc<Ledger>>>,
}

impl BudgetManager {
    /// Create an empty manager
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Start tracking a session. Re-initializing an existing session resets
    /// its counter.
    pub fn initialize(&self, session_id: &str, limit: u64) {
        let mut sessions = self.sessions.write().unwrap_or_else(|e| e.into_inner());
        sessions.insert(
            session_id.to_string(),
            Arc::new(Ledger {
                used: AtomicU64::new(0),
                limit,
            }),
        );
        debug!(session = %session_id, limit, "Session budget initialized");
    }

    /// Add token usage to a session. Unknown sessions are ignored.
    pub fn add_usage(&self, session_id: &str, tokens: u64) {
        let ledger = {
            let sessions = self.sessions.read().unwrap_or_else(|e| e.into_inner());
            sessions.get(session_id).cloned()
        };
        if let Some(ledger) = ledger {
            let total = ledger.used.fetch_add(tokens, Ordering::SeqCst) + tokens;
            if total >= ledger.limit {
                warn!(session = %session_id, used = total, limit = ledger.limit, "Session budget exhausted");
            }
        }
    }

    /// Current snapshot for a session
    #[must_use]
    pub fn usage(&self, session_id: &str) -> Option<SessionBudget> {
        let sessions = self.sessions.read().unwrap_or_else(|e| e.into_inner());
        sessions.get(session_id).map(|ledger| SessionBudget {
            session_id: session_id.to_string(),
            used: ledger.used.load(Ordering::SeqCst),
            limit: ledger.limit,
        })
    }

    /// Stop tracking a session
    pub fn release(&self, session_id: &str) {
        let mut sessions = self.sessions.write().unwrap_or_else(|e| e.into_inner());
        sessions.remove(session_id);
    }
}
