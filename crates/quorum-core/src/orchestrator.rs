//! Orchestrator - the host-facing bridge
//!
//! Owns the registry, router, classifier, provider bank, queue, budget and
//! config as explicit instances (no global singletons) and exposes the
//! logical operations the host calls: `generate`, `enqueue_task`,
//! `update_config` and `run_consensus_session`.

use crate::config::{ConfigUpdate, OrchestratorConfig, RoutingStrategy};
use crate::consensus::{self, SessionOptions, SessionStream};
use crate::error::{Error, Result};
use crate::events::{EventBus, OrchestratorEvent};
use crate::queue::{QueueSnapshot, Task, TaskQueue, TaskRequest, TaskRunner, TASK_TIMEOUT};
use quorum_llm::{
    intent::CLASSIFICATION_PROMPT, prune_messages, smart_truncate, BudgetManager,
    CompletionRequest, Intent, IntentClassifier, LlmProvider, Message, ModelDescriptor,
    ModelRegistry, ModelRouter, PrunedContext, Provider, RouteOptions, RoutingDecision,
    RULE_CONFIDENCE_THRESHOLD,
};
use std::collections::HashMap;
use std::sync::{Arc, RwLock};
use std::time::Duration;
use tokio::sync::broadcast;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, instrument, warn};
use uuid::Uuid;

/// Prompts longer than this are head+tail truncated before processing
const MAX_INPUT_CHARS: usize = 32_000;

/// Prompts shorter than this skip the context lookup; a greeting does not
/// deserve a semantic search.
const SIMPLE_COMMAND_CHARS: usize = 20;

/// Options for one-shot generation
#[derive(Debug, Clone, Default)]
pub struct GenerateOptions {
    /// Skip classification and use this intent
    pub intent: Option<Intent>,
    /// System instructions for the call
    pub system_prompt: Option<String>,
    /// Extra grounding appended to the prompt; when absent the registered
    /// context provider is consulted
    pub context: Option<String>,
    /// Prior conversation turns, pruned to the configured token budget
    pub history: Vec<Message>,
    /// Penalize slow models
    pub prefer_fast: bool,
    /// Reward reasoning models
    pub prefer_quality: bool,
    /// Only locally-hosted backends
    pub require_local: bool,
    /// Cooperative cancellation
    pub cancel: Option<CancellationToken>,
}

impl GenerateOptions {
    fn route_options(&self) -> RouteOptions {
        RouteOptions {
            prefer_fast: self.prefer_fast,
            prefer_quality: self.prefer_quality,
            require_local: self.require_local,
            exclude: Vec::new(),
        }
    }
}

/// Anything that can execute a routed one-shot generation. The consensus
/// pipeline depends on this seam rather than on the orchestrator itself.
#[async_trait::async_trait]
pub trait Generator: Send + Sync {
    /// Execute a prompt and return the model's text
    async fn generate(&self, prompt: String, options: GenerateOptions) -> Result<String>;
}

/// Supplies grounding context from the host's memory when a request does
/// not carry its own. Lookup failures are non-fatal.
#[async_trait::async_trait]
pub trait ContextProvider: Send + Sync {
    /// Build a context block for the prompt, or `None` when nothing
    /// relevant exists
    async fn build_context(&self, prompt: &str) -> Result<Option<String>>;
}

/// Routing, classification and provider state shared between the one-shot
/// path, the queue drain loops and the consensus pipeline.
pub(crate) struct Engine {
    registry: Arc<ModelRegistry>,
    router: ModelRouter,
    classifier: IntentClassifier,
    providers: RwLock<HashMap<Provider, Arc<dyn LlmProvider>>>,
    context_provider: RwLock<Option<Arc<dyn ContextProvider>>>,
    config: RwLock<OrchestratorConfig>,
    events: EventBus,
    budget: Arc<BudgetManager>,
}

impl Engine {
    fn config(&self) -> OrchestratorConfig {
        self.config.read().unwrap_or_else(|e| e.into_inner()).clone()
    }

    fn provider_for(&self, descriptor: &ModelDescriptor) -> Result<Arc<dyn LlmProvider>> {
        let providers = self.providers.read().unwrap_or_else(|e| e.into_inner());
        providers
            .get(&descriptor.provider)
            .cloned()
            .ok_or_else(|| {
                quorum_llm::Error::NotConfigured(descriptor.provider.as_str().to_string()).into()
            })
    }

    /// Classify a query, optionally escalating to a fast model when the
    /// rule confidence is low and the strategy allows it.
    pub(crate) async fn classify(&self, query: &str) -> Intent {
        let classification = self.classifier.classify(query);
        let mut intent = classification.intent;

        let config = self.config();
        if config.routing_strategy == RoutingStrategy::LlmBased
            && classification.confidence < RULE_CONFIDENCE_THRESHOLD
        {
            if let Some(llm_intent) = self.classify_by_llm(query).await {
                intent = llm_intent;
            }
        }

        self.events.publish(OrchestratorEvent::IntentClassified {
            intent,
            confidence: classification.confidence,
        });
        intent
    }

    // Returns a concrete boxed `Send` future (not an `async fn`) so that the
    // `classify` future stores an unconditionally-`Send` type instead of this
    // function's opaque future. That breaks the circular `Send` obligation in
    // the execute -> classify -> execute recursion.
    fn classify_by_llm<'a>(
        &'a self,
        query: &'a str,
    ) -> std::pin::Pin<Box<dyn std::future::Future<Output = Option<Intent>> + Send + 'a>> {
        Box::pin(async move {
            let prompt = CLASSIFICATION_PROMPT.replace("{query}", query);
            // The supplied intent skips re-classification, so the recursive
            // execute call does not re-enter classification.
            let options = GenerateOptions {
                intent: Some(Intent::SimpleQuestion),
                prefer_fast: true,
                ..Default::default()
            };
            match self.execute(prompt, options).await {
                Ok(label) => Intent::parse_label(&label),
                Err(error) => {
                    debug!(%error, "LLM classification failed, keeping rule result");
                    None
                }
            }
        })
    }

    /// Route an intent against the current registry snapshot
    pub(crate) fn route(
        &self,
        intent: Intent,
        options: &RouteOptions,
    ) -> Result<RoutingDecision> {
        let config = self.config();
        let snapshot = self.registry.snapshot();
        let decision = self
            .router
            .select_model(&snapshot, intent, options, config.fallback_enabled)
            .ok_or_else(|| quorum_llm::Error::NoModelAvailable(intent.as_str().to_string()))?;

        if config.debug_mode {
            info!(model = %decision.selected_model.id, reason = %decision.reason, "Routing decision");
        }
        self.events
            .publish(OrchestratorEvent::RoutingDecided(Box::new(decision.clone())));
        Ok(decision)
    }

    /// One provider call with metrics recording
    async fn call_model(
        &self,
        descriptor: &ModelDescriptor,
        context: &PrunedContext,
    ) -> Result<String> {
        let provider = self.provider_for(descriptor)?;

        let mut request = CompletionRequest::new(descriptor.model_id.clone());
        if let Some(system) = &context.system_prompt {
            request = request.with_message(Message::system(system));
        }
        request = request.with_messages(context.safe_messages.clone());

        let started = std::time::Instant::now();
        match provider.complete(request).await {
            Ok(response) => {
                self.registry
                    .record_success(&descriptor.id, started.elapsed().as_millis() as u64);
                Ok(response.content)
            }
            Err(error) => {
                self.registry.record_failure(&descriptor.id, &error.to_string());
                Err(error.into())
            }
        }
    }

    /// Try the selected model, then ranked alternatives when fallback is on
    async fn call_with_fallback(
        &self,
        decision: &RoutingDecision,
        context: &PrunedContext,
    ) -> Result<String> {
        let config = self.config();

        let mut last_error = match self.call_model(&decision.selected_model, context).await {
            Ok(output) => return Ok(output),
            Err(error) => error,
        };

        if !config.fallback_enabled {
            return Err(last_error);
        }

        let mut failed = decision.selected_model.id.clone();
        for alternative in decision.alternatives.iter().take(config.max_retries as usize) {
            warn!(failed = %failed, next = %alternative.id, "Primary model failed, trying alternative");
            self.events.publish(OrchestratorEvent::FallbackTriggered {
                failed_model: failed.clone(),
                next_model: alternative.id.clone(),
            });
            match self.call_model(alternative, context).await {
                Ok(output) => return Ok(output),
                Err(error) => {
                    failed = alternative.id.clone();
                    last_error = error;
                }
            }
        }
        Err(last_error)
    }

    /// Look up grounding context when the request carries none and the
    /// configuration allows injection.
    async fn inject_context(&self, prompt: &str, options: &GenerateOptions) -> Option<String> {
        if let Some(context) = &options.context {
            return Some(context.clone());
        }
        if !self.config().context_injection_enabled || prompt.len() < SIMPLE_COMMAND_CHARS {
            return None;
        }
        let provider = {
            let guard = self
                .context_provider
                .read()
                .unwrap_or_else(|e| e.into_inner());
            guard.clone()
        }?;
        match provider.build_context(prompt).await {
            Ok(context) => context,
            Err(error) => {
                warn!(%error, "Context injection failed, continuing without memory");
                None
            }
        }
    }

    /// Full one-shot execution: guard, classify, route, call under the
    /// 60s wall-clock deadline, raced against cancellation.
    #[instrument(skip(self, prompt, options), fields(len = prompt.len()))]
    pub(crate) async fn execute(
        &self,
        mut prompt: String,
        options: GenerateOptions,
    ) -> Result<String> {
        if prompt.trim().is_empty() {
            return Err(Error::InvalidRequest("empty prompt".to_string()));
        }
        if prompt.len() > MAX_INPUT_CHARS {
            warn!(len = prompt.len(), "Prompt over limit, applying smart truncation");
            prompt = smart_truncate(&prompt, MAX_INPUT_CHARS);
        }
        // Classification sees the bare prompt; grounding context is only
        // appended to what the model receives.
        let injected = self.inject_context(&prompt, &options).await;

        let intent = match options.intent {
            Some(intent) => intent,
            None => self.classify(&prompt).await,
        };

        let decision = self.route(intent, &options.route_options())?;

        let full_prompt = match injected {
            Some(context) => format!("{prompt}\n\n[CONTEXT]\n{context}"),
            None => prompt,
        };
        let mut messages = Vec::with_capacity(options.history.len() + 2);
        if let Some(system) = &options.system_prompt {
            messages.push(Message::system(system));
        }
        messages.extend(options.history.iter().cloned());
        messages.push(Message::user(full_prompt));
        let context = prune_messages(&messages, self.config().max_context_tokens);

        let cancel = options.cancel.clone();
        let bounded = tokio::time::timeout(
            TASK_TIMEOUT,
            self.call_with_fallback(&decision, &context),
        );

        match cancel {
            Some(token) => tokio::select! {
                result = bounded => result.unwrap_or(Err(Error::TaskTimeout(TASK_TIMEOUT.as_secs()))),
                () = token.cancelled() => Err(Error::Cancelled),
            },
            None => bounded
                .await
                .unwrap_or(Err(Error::TaskTimeout(TASK_TIMEOUT.as_secs()))),
        }
    }
}

#[async_trait::async_trait]
impl Generator for Engine {
    async fn generate(&self, prompt: String, options: GenerateOptions) -> Result<String> {
        self.execute(prompt, options).await
    }
}

#[async_trait::async_trait]
impl TaskRunner for Engine {
    /// Queued execution path. The queue applies the per-task deadline;
    /// this only routes and calls.
    async fn run(&self, task: &Task) -> Result<String> {
        let options = RouteOptions {
            require_local: task.is_local,
            ..Default::default()
        };
        let decision = self.route(task.intent, &options)?;
        let context = PrunedContext {
            safe_messages: vec![Message::user(task.prompt.clone())],
            system_prompt: None,
        };
        self.call_with_fallback(&decision, &context).await
    }
}

/// What to enqueue; unset fields fall back to classification and defaults
#[derive(Debug, Clone, Default)]
pub struct EnqueueRequest {
    /// The prompt to execute
    pub prompt: String,
    /// Intent, classified from the prompt when absent
    pub intent: Option<Intent>,
    /// Priority, default 50
    pub priority: Option<u8>,
    /// Lane selection, default cloud
    pub is_local: Option<bool>,
}

/// The host-facing orchestrator
pub struct Orchestrator {
    engine: Arc<Engine>,
    queue: Arc<TaskQueue>,
}

impl Orchestrator {
    /// Create an orchestrator with its own registry, queue and event bus
    #[must_use]
    pub fn new(config: OrchestratorConfig) -> Self {
        Self::with_registry(config, Arc::new(ModelRegistry::new()))
    }

    /// Create an orchestrator around an existing registry
    #[must_use]
    pub fn with_registry(config: OrchestratorConfig, registry: Arc<ModelRegistry>) -> Self {
        let events = EventBus::default();
        let engine = Arc::new(Engine {
            registry,
            router: ModelRouter::new(),
            classifier: IntentClassifier::new(),
            providers: RwLock::new(HashMap::new()),
            context_provider: RwLock::new(None),
            config: RwLock::new(config),
            events: events.clone(),
            budget: Arc::new(BudgetManager::new()),
        });
        let queue = TaskQueue::new(engine.clone(), events);
        Self { engine, queue }
    }

    /// Register the client used for a provider's models
    pub fn register_provider(&self, provider: Provider, client: Arc<dyn LlmProvider>) {
        let mut providers = self
            .engine
            .providers
            .write()
            .unwrap_or_else(|e| e.into_inner());
        providers.insert(provider, client);
    }

    /// Attach a context provider consulted when requests carry no context
    pub fn set_context_provider(&self, provider: Arc<dyn ContextProvider>) {
        let mut guard = self
            .engine
            .context_provider
            .write()
            .unwrap_or_else(|e| e.into_inner());
        *guard = Some(provider);
    }

    /// The model registry
    #[must_use]
    pub fn registry(&self) -> &ModelRegistry {
        &self.engine.registry
    }

    /// The session budget ledger
    #[must_use]
    pub fn budget(&self) -> &BudgetManager {
        &self.engine.budget
    }

    /// Subscribe to orchestrator events
    #[must_use]
    pub fn subscribe(&self) -> broadcast::Receiver<OrchestratorEvent> {
        self.engine.events.subscribe()
    }

    /// Current configuration
    #[must_use]
    pub fn config(&self) -> OrchestratorConfig {
        self.engine.config()
    }

    /// Merge a partial configuration update. Returns true when anything
    /// changed.
    pub fn update_config(&self, update: &ConfigUpdate) -> bool {
        let mut config = self
            .engine
            .config
            .write()
            .unwrap_or_else(|e| e.into_inner());
        let changed = config.apply(update);
        if changed {
            debug!(?config, "Configuration updated");
        }
        changed
    }

    /// One-shot routed execution
    pub async fn generate(&self, prompt: impl Into<String>, options: GenerateOptions) -> Result<String> {
        self.engine.execute(prompt.into(), options).await
    }

    /// Durable queue insertion. Returns the task id; completion is pushed
    /// to event subscribers and to `wait_for_task`.
    pub async fn enqueue_task(&self, request: EnqueueRequest) -> Uuid {
        let intent = match request.intent {
            Some(intent) => intent,
            None => self.engine.classify(&request.prompt).await,
        };
        self.queue.enqueue(TaskRequest {
            prompt: request.prompt,
            intent,
            priority: request.priority.unwrap_or(50),
            is_local: request.is_local.unwrap_or(false),
        })
    }

    /// Await a queued task's terminal state
    pub async fn wait_for_task(&self, id: Uuid, timeout: Duration) -> Result<Task> {
        self.queue.wait_for_task(id, timeout).await
    }

    /// Look up a queued task
    #[must_use]
    pub fn get_task(&self, id: Uuid) -> Option<Task> {
        self.queue.get_task(id)
    }

    /// Drop completed tasks from both lanes
    pub fn clear_completed(&self) {
        self.queue.clear_completed();
    }

    /// Current queue snapshot
    #[must_use]
    pub fn queue_snapshot(&self) -> QueueSnapshot {
        self.queue.snapshot()
    }

    /// Run a multi-agent consensus session. Returns a stream of status
    /// events terminating in the final response or a session error.
    #[must_use]
    pub fn run_consensus_session(
        &self,
        query: impl Into<String>,
        persona_keys: &[&str],
        options: SessionOptions,
    ) -> SessionStream {
        consensus::run_session(
            self.engine.clone() as Arc<dyn Generator>,
            self.engine.budget.clone(),
            query.into(),
            persona_keys,
            options,
        )
    }

    /// Stop queue draining and cancel in-flight queued work
    pub fn shutdown(&self) {
        self.queue.shutdown();
    }
}
