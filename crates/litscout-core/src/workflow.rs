//! Pipeline driver: owns the conversation and runs one graph per turn.

use std::fmt;
use std::sync::Arc;

use graph_flow::{
    ExecutionStatus, FlowRunner, Graph, GraphBuilder, InMemorySessionStorage, Session,
    SessionStorage, Task,
};
use serde::{Deserialize, Serialize};
use serde_json::json;
use tracing::{error, info, instrument, warn};
use uuid::Uuid;

use crate::LitScoutError;
use crate::commands::{QueryRouter, Route};
use crate::config::{Config, SharedConfig};
use crate::logging::{TurnLogInput, TurnLogger};
use crate::metrics::record_turn;
use crate::model::{ClaimRecord, ConversationState, Role};
use crate::stages::{ClaimDrafter, Report, ResearchOutcome, ResearchStage};
use crate::tasks::{
    ANSWER_KEY, AnalysisTask, CONVERSATION_KEY, EXTRA_CLAIMS_KEY, FAILURE_KEY, FATAL_KEY,
    FailedTask, MACHINE_KEY, QUERY_KEY, REPORT_KEY, RESEARCH_KEY, RESEARCH_TASK, ResearchTask,
    TRACE_KEY, WritingTask,
};
use crate::tools::{CONFIG_MANAGER_TOOL, ToolCall, ToolRegistry, build_http_client};
use crate::trace::{TraceCollector, TraceEvent};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PipelineState {
    AwaitingQuery,
    Researching,
    Analyzing,
    Writing,
    Done,
    Failed,
}

impl PipelineState {
    pub fn as_str(&self) -> &'static str {
        match self {
            PipelineState::AwaitingQuery => "awaiting_query",
            PipelineState::Researching => "researching",
            PipelineState::Analyzing => "analyzing",
            PipelineState::Writing => "writing",
            PipelineState::Done => "done",
            PipelineState::Failed => "failed",
        }
    }

    pub fn can_transition_to(&self, next: PipelineState) -> bool {
        use PipelineState::*;
        matches!(
            (self, next),
            (AwaitingQuery, Researching)
                | (Researching, Analyzing)
                | (Analyzing, Writing)
                | (Writing, Done)
                | (Researching | Analyzing | Writing, Failed)
        )
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, PipelineState::Done | PipelineState::Failed)
    }
}

impl fmt::Display for PipelineState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// States visited during one turn, starting at `AwaitingQuery`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StateMachine {
    visited: Vec<PipelineState>,
}

impl Default for StateMachine {
    fn default() -> Self {
        Self {
            visited: vec![PipelineState::AwaitingQuery],
        }
    }
}

impl StateMachine {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn current(&self) -> PipelineState {
        self.visited
            .last()
            .copied()
            .unwrap_or(PipelineState::AwaitingQuery)
    }

    pub fn visited(&self) -> &[PipelineState] {
        &self.visited
    }

    pub fn advance(&mut self, next: PipelineState) -> Result<(), LitScoutError> {
        let current = self.current();
        if !current.can_transition_to(next) {
            return Err(LitScoutError::IllegalTransition {
                from: current.to_string(),
                to: next.to_string(),
            });
        }
        self.visited.push(next);
        Ok(())
    }
}

/// Why a turn ended in `Failed`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FailureReason {
    AllProvidersUnavailable { providers: Vec<String> },
    Configuration(String),
    Internal(String),
}

impl FailureReason {
    pub fn from_error(err: &LitScoutError) -> Self {
        match err {
            LitScoutError::AllProvidersUnavailable { providers } => Self::AllProvidersUnavailable {
                providers: providers.clone(),
            },
            err if err.is_turn_fatal() => Self::Configuration(err.to_string()),
            err => Self::Internal(err.to_string()),
        }
    }

    /// Message shown to the user in place of an answer.
    pub fn explain(&self) -> String {
        match self {
            FailureReason::AllProvidersUnavailable { providers } => format!(
                "I couldn't reach any of the literature databases ({}), so I can't answer \
                 this question right now. Please try again in a few minutes, or review \
                 provider settings with `show config`.",
                providers.join(", ")
            ),
            FailureReason::Configuration(message) => format!(
                "I can't search with the current settings: {message}. Use `show config` \
                 to review them, or `enable <provider>` to turn a provider back on."
            ),
            FailureReason::Internal(_) => {
                "Something went wrong while preparing your answer. Please try asking again."
                    .to_string()
            }
        }
    }

    /// One-line description for logs and traces.
    pub fn summary(&self) -> String {
        match self {
            FailureReason::AllProvidersUnavailable { providers } => {
                format!("all providers unavailable: {}", providers.join(", "))
            }
            FailureReason::Configuration(message) => format!("configuration: {message}"),
            FailureReason::Internal(message) => format!("internal: {message}"),
        }
    }
}

/// Result of handling one line of user input.
#[derive(Debug, Clone)]
pub struct TurnOutcome {
    pub route: Route,
    pub state: PipelineState,
    pub answer: String,
    pub failure: Option<FailureReason>,
    pub report: Option<Report>,
    pub research: Option<ResearchOutcome>,
    /// States visited, `AwaitingQuery` first; empty for configuration commands.
    pub states: Vec<PipelineState>,
    pub trace: TraceCollector,
}

impl TurnOutcome {
    fn configuration(answer: String) -> Self {
        Self {
            route: Route::Configuration,
            state: PipelineState::AwaitingQuery,
            answer,
            failure: None,
            report: None,
            research: None,
            states: Vec::new(),
            trace: TraceCollector::new(),
        }
    }

    pub fn is_failed(&self) -> bool {
        self.state == PipelineState::Failed
    }
}

fn build_graph(
    research: Arc<ResearchStage>,
    config: SharedConfig,
    drafter: Option<Arc<dyn ClaimDrafter>>,
) -> Arc<Graph> {
    let research = Arc::new(ResearchTask::new(research));
    let analysis = Arc::new(AnalysisTask::new(config.clone(), drafter));
    let writing = Arc::new(WritingTask::new(config));
    let failed = Arc::new(FailedTask);

    let builder = GraphBuilder::new("litscout_pipeline")
        .add_task(research.clone())
        .add_task(analysis.clone())
        .add_task(writing.clone())
        .add_task(failed.clone())
        .add_conditional_edge(
            research.id(),
            |ctx| ctx.get_sync::<bool>(FATAL_KEY).unwrap_or(false),
            failed.id(),
            analysis.id(),
        )
        .add_edge(analysis.id(), writing.id())
        .set_start_task(research.id());

    Arc::new(builder.build())
}

/// One conversational session: routes input, runs turns, keeps history.
pub struct Pipeline {
    config: SharedConfig,
    registry: Arc<ToolRegistry>,
    graph: Arc<Graph>,
    storage: Arc<InMemorySessionStorage>,
    router: QueryRouter,
    conversation: ConversationState,
    session_id: String,
    turns: usize,
}

impl Pipeline {
    /// Pipeline with the built-in tools.
    pub fn new(config: Config) -> Result<Self, LitScoutError> {
        let config = config.into_shared();
        let client = build_http_client()?;
        let registry = ToolRegistry::with_default_tools(config.clone(), client)?;
        Ok(Self::with_registry(config, Arc::new(registry)))
    }

    pub fn with_registry(config: SharedConfig, registry: Arc<ToolRegistry>) -> Self {
        Self::assemble(config, registry, None)
    }

    /// Replace the default claim drafter used by the analysis stage.
    pub fn with_drafter(self, drafter: Arc<dyn ClaimDrafter>) -> Self {
        Self::assemble(self.config, self.registry, Some(drafter))
    }

    fn assemble(
        config: SharedConfig,
        registry: Arc<ToolRegistry>,
        drafter: Option<Arc<dyn ClaimDrafter>>,
    ) -> Self {
        let research = Arc::new(ResearchStage::new(registry.clone(), config.clone()));
        let graph = build_graph(research, config.clone(), drafter);
        Self {
            config,
            registry,
            graph,
            storage: Arc::new(InMemorySessionStorage::new()),
            router: QueryRouter,
            conversation: ConversationState::new(),
            session_id: format!("session-{}", Uuid::new_v4()),
            turns: 0,
        }
    }

    pub fn config(&self) -> SharedConfig {
        self.config.clone()
    }

    pub fn registry(&self) -> &ToolRegistry {
        &self.registry
    }

    pub fn conversation(&self) -> &ConversationState {
        &self.conversation
    }

    pub fn session_id(&self) -> &str {
        &self.session_id
    }

    /// Route one line of input to the configuration manager or a research turn.
    pub async fn handle(&mut self, input: &str) -> TurnOutcome {
        let input = input.trim();
        if input.is_empty() {
            return TurnOutcome {
                route: Route::Research,
                ..TurnOutcome::configuration("Please enter a research question.".to_string())
            };
        }
        match self.router.route(input) {
            Route::Configuration => self.configure(input).await,
            Route::Research => self.run_turn(input).await,
        }
    }

    async fn configure(&self, input: &str) -> TurnOutcome {
        let call = ToolCall::new(CONFIG_MANAGER_TOOL, json!({ "command": input }));
        let answer = match self.registry.dispatch(call).await {
            Ok(result) => result.content,
            Err(err) => {
                warn!(error = %err, "configuration command could not be dispatched");
                format!("Configuration commands are unavailable: {err}")
            }
        };
        TurnOutcome::configuration(answer)
    }

    pub async fn run_turn(&mut self, query: &str) -> TurnOutcome {
        self.run_turn_with_claims(query, Vec::new()).await
    }

    /// Run a research turn, verifying `claims` alongside the drafted ones.
    #[instrument(
        name = "pipeline.turn",
        skip(self, claims),
        fields(session = %self.session_id, turn = self.turns + 1)
    )]
    pub async fn run_turn_with_claims(
        &mut self,
        query: &str,
        claims: Vec<ClaimRecord>,
    ) -> TurnOutcome {
        self.turns += 1;
        let outcome = match self.execute(query, claims).await {
            Ok(outcome) => outcome,
            Err(err) => {
                error!(error = %err, "pipeline execution failed");
                let failure = FailureReason::Internal(err.to_string());
                TurnOutcome {
                    route: Route::Research,
                    state: PipelineState::Failed,
                    answer: failure.explain(),
                    failure: Some(failure),
                    report: None,
                    research: None,
                    states: vec![PipelineState::AwaitingQuery, PipelineState::Failed],
                    trace: TraceCollector::new(),
                }
            }
        };

        let resolved = match &outcome.research {
            Some(research) => research.query.clone(),
            None => self.conversation.contextualize(query),
        };
        self.conversation.push_query(query, resolved);
        self.conversation.push(Role::Assistant, outcome.answer.clone());
        record_turn(outcome.state.as_str());
        self.log_turn(query, &outcome).await;
        info!(state = %outcome.state, "turn complete");
        outcome
    }

    async fn execute(
        &self,
        query: &str,
        claims: Vec<ClaimRecord>,
    ) -> Result<TurnOutcome, LitScoutError> {
        let session_id = format!("{}-turn-{}", self.session_id, self.turns);
        let session = Session::new_from_task(session_id.clone(), RESEARCH_TASK);
        session.context.set(QUERY_KEY, query.to_string()).await;
        session.context.set(CONVERSATION_KEY, &self.conversation).await;
        session.context.set(EXTRA_CLAIMS_KEY, &claims).await;
        session.context.set(MACHINE_KEY, StateMachine::new()).await;

        self.storage
            .save(session)
            .await
            .map_err(|err| anyhow::anyhow!("failed to persist session: {err}"))?;

        let runner = FlowRunner::new(self.graph.clone(), self.storage.clone());
        loop {
            let result = runner
                .run(&session_id)
                .await
                .map_err(|err| anyhow::anyhow!("graph execution failure: {err}"))?;

            match result.status {
                ExecutionStatus::Completed => break,
                ExecutionStatus::WaitingForInput => continue,
                ExecutionStatus::Error(message) => {
                    return Err(anyhow::anyhow!(message).into());
                }
            }
        }

        let session = self
            .storage
            .get(&session_id)
            .await
            .map_err(|err| anyhow::anyhow!("failed to reload session: {err}"))?
            .ok_or_else(|| anyhow::anyhow!("session missing after execution"))?;
        let context = &session.context;

        let machine: StateMachine = context.get(MACHINE_KEY).await.unwrap_or_default();
        let failure: Option<FailureReason> = context.get(FAILURE_KEY).await;
        let report: Option<Report> = context.get(REPORT_KEY).await;
        let research: Option<ResearchOutcome> = context.get(RESEARCH_KEY).await;
        let answer: Option<String> = context.get(ANSWER_KEY).await;
        let events: Vec<TraceEvent> = context.get(TRACE_KEY).await.unwrap_or_default();

        let (state, failure) = match (machine.current(), failure) {
            (PipelineState::Done, None) => (PipelineState::Done, None),
            (PipelineState::Failed, Some(failure)) => (PipelineState::Failed, Some(failure)),
            (current, failure) => (
                PipelineState::Failed,
                Some(failure.unwrap_or_else(|| {
                    FailureReason::Internal(format!("pipeline stopped while {current}"))
                })),
            ),
        };
        let answer = match &failure {
            Some(failure) => failure.explain(),
            None => answer.unwrap_or_default(),
        };

        Ok(TurnOutcome {
            route: Route::Research,
            state,
            answer,
            failure,
            report,
            research,
            states: machine.visited().to_vec(),
            trace: TraceCollector::from_events(events),
        })
    }

    async fn log_turn(&self, query: &str, outcome: &TurnOutcome) {
        let logger = TurnLogger::from_config(&self.config.read().await.logging);
        let Some(logger) = logger else {
            return;
        };

        let input = TurnLogInput {
            session_id: self.session_id.clone(),
            turn: self.turns,
            query: query.to_string(),
            state: outcome.state.to_string(),
            answer: outcome.answer.clone(),
            failure: outcome.failure.as_ref().map(FailureReason::summary),
            citations: outcome
                .report
                .as_ref()
                .map(|r| r.citations.iter().map(|c| c.source_id.clone()).collect())
                .unwrap_or_default(),
            failed_providers: outcome
                .research
                .as_ref()
                .map(|r| r.failures.iter().map(|f| f.provider.clone()).collect())
                .unwrap_or_default(),
        };
        if let Err(err) = logger.record(&input) {
            warn!(error = %err, "failed to write turn log");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn happy_path_and_failure_transitions_are_legal() {
        let mut machine = StateMachine::new();
        machine.advance(PipelineState::Researching).unwrap();
        machine.advance(PipelineState::Analyzing).unwrap();
        machine.advance(PipelineState::Writing).unwrap();
        machine.advance(PipelineState::Done).unwrap();
        assert!(machine.current().is_terminal());

        for working in [
            PipelineState::Researching,
            PipelineState::Analyzing,
            PipelineState::Writing,
        ] {
            assert!(working.can_transition_to(PipelineState::Failed));
        }
    }

    #[test]
    fn skipping_a_stage_is_rejected() {
        let mut machine = StateMachine::new();
        machine.advance(PipelineState::Researching).unwrap();
        let err = machine.advance(PipelineState::Writing).unwrap_err();
        assert_eq!(
            err.to_string(),
            "illegal pipeline transition from researching to writing"
        );
        assert_eq!(machine.current(), PipelineState::Researching);
        assert!(!PipelineState::AwaitingQuery.can_transition_to(PipelineState::Failed));
        assert!(!PipelineState::Done.can_transition_to(PipelineState::Researching));
    }

    #[test]
    fn failure_explanations_hide_internal_details() {
        let internal = FailureReason::Internal("context key missing".into());
        assert!(!internal.explain().contains("context key"));

        let outage = FailureReason::from_error(&LitScoutError::AllProvidersUnavailable {
            providers: vec!["openalex_search".into(), "core_search".into()],
        });
        assert!(outage.explain().contains("openalex_search, core_search"));

        let config = FailureReason::from_error(&LitScoutError::Configuration(
            "no bibliographic providers are enabled".into(),
        ));
        assert!(matches!(config, FailureReason::Configuration(_)));
    }

    #[tokio::test]
    async fn config_commands_do_not_enter_the_conversation() {
        let mut pipeline = Pipeline::new(Config::default()).unwrap();
        let outcome = pipeline.handle("disable orkg").await;
        assert_eq!(outcome.route, Route::Configuration);
        assert_eq!(outcome.answer, "ORKG tool disabled");
        assert!(pipeline.conversation().is_empty());
        assert!(!pipeline.config().read().await.sources.orkg.enabled);
    }

    #[tokio::test]
    async fn disabling_every_provider_fails_the_turn_with_guidance() {
        let mut pipeline = Pipeline::new(Config::default()).unwrap();
        for provider in ["openalex", "core", "orkg"] {
            pipeline.handle(&format!("disable {provider}")).await;
        }
        let outcome = pipeline.handle("surface code thresholds").await;
        assert_eq!(outcome.state, PipelineState::Failed);
        assert!(matches!(outcome.failure, Some(FailureReason::Configuration(_))));
        assert_eq!(
            outcome.states,
            vec![
                PipelineState::AwaitingQuery,
                PipelineState::Researching,
                PipelineState::Failed
            ]
        );
        assert_eq!(pipeline.conversation().len(), 2);
    }
}
