//! Consensus pipeline integration tests driven by a scripted generator.
//!
//! The stub generator dispatches on prompt content, so batch-internal
//! call ordering cannot make the tests flaky.

use quorum_core::consensus::{
    format_for_prompt, AcademicSource, RedTeamGuard, SourceProvider, SourceType,
};
use quorum_core::{
    AuditAction, Error, GenerateOptions, Generator, Result, SessionOptions, SessionStage,
    SessionUpdate,
};
use quorum_llm::BudgetManager;
use std::sync::{Arc, Mutex};
use tokio_util::sync::CancellationToken;

/// Generator that answers via a prompt-matching closure and records every
/// prompt it sees.
struct ScriptedGenerator {
    respond: Box<dyn Fn(&str) -> Result<String> + Send + Sync>,
    calls: Mutex<Vec<String>>,
}

impl ScriptedGenerator {
    fn new(respond: impl Fn(&str) -> Result<String> + Send + Sync + 'static) -> Arc<Self> {
        Arc::new(Self {
            respond: Box::new(respond),
            calls: Mutex::new(Vec::new()),
        })
    }

    fn calls(&self) -> Vec<String> {
        self.calls.lock().unwrap().clone()
    }
}

#[async_trait::async_trait]
impl Generator for ScriptedGenerator {
    async fn generate(&self, prompt: String, _options: GenerateOptions) -> Result<String> {
        self.calls.lock().unwrap().push(prompt.clone());
        (self.respond)(&prompt)
    }
}

/// Source provider that returns one canned source and never hits the
/// network.
struct StubSources;

#[async_trait::async_trait]
impl SourceProvider for StubSources {
    async fn fetch_sources(&self, query: &str, _persona_key: &str) -> Vec<AcademicSource> {
        vec![AcademicSource {
            title: format!("Canned source on {query}"),
            url: format!("https://example.org/{}", query.len()),
            snippet: "canned snippet".to_string(),
            source_type: SourceType::Journal,
            score: Some(0.9),
        }]
    }
}

fn options() -> SessionOptions {
    SessionOptions {
        research: Some(Arc::new(StubSources)),
        ..Default::default()
    }
}

fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter("quorum_core=debug")
        .with_test_writer()
        .try_init();
}

/// A happy-path script: distinct insights, quick convergence, clean audit.
fn happy_script(prompt: &str) -> Result<String> {
    if prompt.contains("Rewrite this query") {
        return Ok("optimized research brief".to_string());
    }
    if prompt.contains("<identity>Dr. Bio") {
        return Ok("coral reefs bleach when ocean temperatures rise".to_string());
    }
    if prompt.contains("<identity>Adam S.") {
        return Ok("tourism revenue collapses as coastal ecosystems degrade".to_string());
    }
    if prompt.contains("Rate relevance") {
        return Ok("0.8".to_string());
    }
    if prompt.contains("review your peers") {
        return Ok("peers broadly agree".to_string());
    }
    if prompt.contains("Role: Critic") {
        return Ok("missing quantitative evidence".to_string());
    }
    if prompt.contains("Role: Synthesizer") {
        return Ok("refined consensus with quantitative evidence".to_string());
    }
    if prompt.contains("Score how confident") {
        return Ok("{\"score\": 0.95, \"discrepancies\": []}".to_string());
    }
    if prompt.contains("Suggest up to") {
        return Ok(
            "[{\"chart_type\": \"line\", \"title\": \"Bleaching\", \"description\": \"trend\"}]"
                .to_string(),
        );
    }
    if prompt.contains("security auditor") {
        return Ok("{\"passed\": true, \"threats\": [], \"action\": \"ALLOW\"}".to_string());
    }
    Ok("generic".to_string())
}

#[tokio::test]
async fn test_happy_path_produces_full_response() {
    init_tracing();
    let generator = ScriptedGenerator::new(happy_script);
    let budget = Arc::new(BudgetManager::new());

    let mut stream = quorum_core::consensus::run_session(
        generator.clone(),
        budget.clone(),
        "why do coral reefs matter?".to_string(),
        &["biologist", "economist"],
        SessionOptions {
            session_id: Some("s-test".to_string()),
            ..options()
        },
    );

    let mut stages = Vec::new();
    let mut response = None;
    while let Some(update) = stream.recv().await {
        match update {
            SessionUpdate::Status { stage, .. } => stages.push(stage),
            SessionUpdate::Completed(r) => response = Some(*r),
            SessionUpdate::Failed(error) => panic!("session failed: {error}"),
        }
    }
    let response = response.expect("no terminal value");

    assert_eq!(response.individual_insights.len(), 2);
    assert!(response.individual_insights.iter().all(|i| i.success));
    assert_eq!(response.consensus, "refined consensus with quantitative evidence");
    assert!((response.confidence_score - 0.95).abs() < 1e-9);
    // Converged in one round: one challenge/rebuttal pair on the trail.
    assert_eq!(response.audit_trail.len(), 1);
    assert_eq!(response.visualizations.len(), 1);
    assert_eq!(response.security_audit.action, AuditAction::Allow);
    assert_eq!(response.influence_matrix.len(), 2);
    assert!(response.academic_document.contains("## Consensus"));
    assert!(response.academic_document.contains("## Bibliography"));

    assert!(stages.contains(&SessionStage::Initializing));
    assert!(stages.contains(&SessionStage::Researching));
    assert!(stages.contains(&SessionStage::Insights));
    assert!(stages.contains(&SessionStage::Reviews));
    assert!(stages.contains(&SessionStage::Finalizing));

    // Research spend was tracked against the session budget.
    let spent = budget.usage("s-test").unwrap();
    assert!(spent.used > 0);
}

#[tokio::test]
async fn test_dialectic_never_exceeds_two_rounds() {
    // Confidence keeps improving but never reaches the target, so only
    // the iteration cap stops the loop.
    let scores = Mutex::new(vec![0.5, 0.6, 0.7]);
    let generator = ScriptedGenerator::new(move |prompt| {
        if prompt.contains("Score how confident") {
            let score = scores.lock().unwrap().remove(0);
            return Ok(format!("{{\"score\": {score}, \"discrepancies\": []}}"));
        }
        if prompt.contains("Role: Synthesizer") {
            // Distinct rebuttals so cycle detection never fires.
            return Ok(format!("rewrite attempt {}", prompt.len()));
        }
        happy_script(prompt)
    });

    let response = quorum_core::consensus::run_session(
        generator,
        Arc::new(BudgetManager::new()),
        "q".to_string(),
        &["biologist", "economist"],
        options(),
    )
    .final_response()
    .await
    .unwrap();

    assert_eq!(response.audit_trail.len(), 2);
    assert!((response.confidence_score - 0.6).abs() < 1e-9);
}

#[tokio::test]
async fn test_dialectic_stops_on_plateau() {
    let generator = ScriptedGenerator::new(|prompt| {
        if prompt.contains("Score how confident") {
            return Ok("{\"score\": 0.0, \"discrepancies\": [\"everything\"]}".to_string());
        }
        if prompt.contains("Role: Synthesizer") {
            return Ok(format!("distinct rewrite {}", prompt.len()));
        }
        happy_script(prompt)
    });

    let response = quorum_core::consensus::run_session(
        generator,
        Arc::new(BudgetManager::new()),
        "q".to_string(),
        &["biologist", "economist"],
        options(),
    )
    .final_response()
    .await
    .unwrap();

    // Round one scored no better than the starting confidence, so the
    // plateau check stops the loop before a second round.
    assert_eq!(response.audit_trail.len(), 1);
    assert!(response.confidence_score.abs() < 1e-9);
}

#[tokio::test]
async fn test_echo_chamber_forces_adversarial_audit() {
    let generator = ScriptedGenerator::new(|prompt| {
        if prompt.contains("<identity>") {
            // Both experts parrot the same sentence.
            return Ok("renewables are good for the grid always".to_string());
        }
        happy_script(prompt)
    });

    let response = quorum_core::consensus::run_session(
        generator.clone(),
        Arc::new(BudgetManager::new()),
        "q".to_string(),
        &["biologist", "economist"],
        options(),
    )
    .final_response()
    .await
    .unwrap();
    assert!(!response.consensus.is_empty());

    // The review stage must have run the adversarial critic, not peer
    // review.
    let calls = generator.calls();
    assert!(calls.iter().any(|c| c.contains("Ruthless Critic")));
    assert!(!calls.iter().any(|c| c.contains("review your peers")));
}

#[tokio::test]
async fn test_failed_persona_recovers_via_simulated_expert() {
    let generator = ScriptedGenerator::new(|prompt| {
        if prompt.contains("<identity>Dr. Bio") {
            return Err(Error::TaskFailed("provider exploded".to_string()));
        }
        if prompt.contains("Simulate a Senior Biologist") {
            return Ok("simulated biology answer".to_string());
        }
        happy_script(prompt)
    });

    let response = quorum_core::consensus::run_session(
        generator,
        Arc::new(BudgetManager::new()),
        "q".to_string(),
        &["biologist", "economist"],
        options(),
    )
    .final_response()
    .await
    .unwrap();

    let bio = response
        .individual_insights
        .iter()
        .find(|i| i.agent == "Dr. Bio")
        .unwrap();
    assert!(bio.success);
    assert!(bio.insight.starts_with("[Fallback]"));
    assert!(bio.sources.is_empty());
}

#[tokio::test]
async fn test_all_personas_failed_is_fatal() {
    let generator = ScriptedGenerator::new(|prompt| {
        if prompt.contains("<identity>") || prompt.contains("Simulate a") {
            return Err(Error::TaskFailed("everything is down".to_string()));
        }
        happy_script(prompt)
    });

    let result = quorum_core::consensus::run_session(
        generator,
        Arc::new(BudgetManager::new()),
        "q".to_string(),
        &["biologist", "economist"],
        options(),
    )
    .final_response()
    .await;

    assert!(matches!(result, Err(Error::AllPersonasFailed)));
}

#[tokio::test]
async fn test_unknown_personas_are_fatal() {
    let generator = ScriptedGenerator::new(happy_script);
    let result = quorum_core::consensus::run_session(
        generator,
        Arc::new(BudgetManager::new()),
        "q".to_string(),
        &["astrologer"],
        options(),
    )
    .final_response()
    .await;

    assert!(matches!(result, Err(Error::NoPersonas)));
}

#[tokio::test]
async fn test_security_block_aborts_session() {
    let generator = ScriptedGenerator::new(|prompt| {
        if prompt.contains("security auditor") {
            return Ok(
                "{\"passed\": false, \"threats\": [\"misinformation\"], \"action\": \"BLOCK\"}"
                    .to_string(),
            );
        }
        happy_script(prompt)
    });

    let result = quorum_core::consensus::run_session(
        generator,
        Arc::new(BudgetManager::new()),
        "q".to_string(),
        &["biologist", "economist"],
        options(),
    )
    .final_response()
    .await;

    match result {
        Err(Error::SecurityBlock { threats }) => {
            assert_eq!(threats, vec!["misinformation".to_string()]);
        }
        other => panic!("expected security block, got {other:?}"),
    }
}

#[tokio::test]
async fn test_cancellation_stops_before_next_stage() {
    let token = CancellationToken::new();
    token.cancel();

    let generator = ScriptedGenerator::new(happy_script);
    let result = quorum_core::consensus::run_session(
        generator,
        Arc::new(BudgetManager::new()),
        "q".to_string(),
        &["biologist"],
        SessionOptions {
            cancel: Some(token),
            ..options()
        },
    )
    .final_response()
    .await;

    assert!(matches!(result, Err(Error::Cancelled)));
}

#[tokio::test]
async fn test_audit_fails_closed_to_warn() {
    let generator =
        ScriptedGenerator::new(|_| Err(Error::TaskFailed("audit service down".to_string())));

    let audit = RedTeamGuard::audit(generator.as_ref(), "perfectly fine text").await;
    assert_eq!(audit.action, AuditAction::Warn);
    assert!(!audit.passed);
    assert!(!audit.threats.is_empty());
}

#[tokio::test]
async fn test_confidence_parse_failure_yields_neutral_default() {
    let generator = ScriptedGenerator::new(|prompt| {
        if prompt.contains("Score how confident") {
            return Ok("definitely a nine out of ten!".to_string());
        }
        happy_script(prompt)
    });

    let response = quorum_core::consensus::run_session(
        generator,
        Arc::new(BudgetManager::new()),
        "q".to_string(),
        &["biologist", "economist"],
        options(),
    )
    .final_response()
    .await
    .unwrap();

    assert!((response.confidence_score - 0.5).abs() < 1e-9);
}

#[tokio::test]
async fn test_persisted_before_terminal_yield() {
    struct RecordingStore(Mutex<Vec<String>>);

    #[async_trait::async_trait]
    impl quorum_core::SessionStore for RecordingStore {
        async fn save(
            &self,
            session_id: &str,
            response: &quorum_core::MultiAgentResponse,
        ) -> quorum_core::Result<()> {
            assert!(!response.consensus.is_empty());
            self.0.lock().unwrap().push(session_id.to_string());
            Ok(())
        }
    }

    let store = Arc::new(RecordingStore(Mutex::new(Vec::new())));
    let generator = ScriptedGenerator::new(happy_script);

    quorum_core::consensus::run_session(
        generator,
        Arc::new(BudgetManager::new()),
        "q".to_string(),
        &["biologist"],
        SessionOptions {
            session_id: Some("persisted".to_string()),
            store: Some(store.clone()),
            ..options()
        },
    )
    .final_response()
    .await
    .unwrap();

    assert_eq!(store.0.lock().unwrap().clone(), vec!["persisted".to_string()]);
}

#[test]
fn test_format_for_prompt_handles_empty() {
    assert_eq!(format_for_prompt(&[]), "No external sources found.");
}
