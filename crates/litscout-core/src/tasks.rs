//! `graph_flow` tasks wrapping the pipeline stages.

use std::sync::Arc;

use async_trait::async_trait;
use graph_flow::{Context, NextAction, Task, TaskResult};
use tracing::{error, info, instrument};

use crate::config::SharedConfig;
use crate::model::{ClaimRecord, ConversationState};
use crate::stages::{
    AnalysisReport, AnalysisStage, ClaimDrafter, ResearchOutcome, ResearchStage, WritingStage,
};
use crate::trace::TraceEvent;
use crate::workflow::{FailureReason, PipelineState, StateMachine};

pub const RESEARCH_TASK: &str = "research";
pub const ANALYSIS_TASK: &str = "analysis";
pub const WRITING_TASK: &str = "writing";
pub const FAILED_TASK: &str = "failed";

pub(crate) const QUERY_KEY: &str = "query";
pub(crate) const CONVERSATION_KEY: &str = "conversation";
pub(crate) const EXTRA_CLAIMS_KEY: &str = "analysis.extra_claims";
pub(crate) const RESEARCH_KEY: &str = "research.outcome";
pub(crate) const FATAL_KEY: &str = "research.fatal";
pub(crate) const ANALYSIS_KEY: &str = "analysis.report";
pub(crate) const REPORT_KEY: &str = "final.report";
pub(crate) const ANSWER_KEY: &str = "final.answer";
pub(crate) const MACHINE_KEY: &str = "pipeline.machine";
pub(crate) const FAILURE_KEY: &str = "pipeline.failure";
pub(crate) const TRACE_KEY: &str = "trace.events";

/// Move the turn's state machine forward; an illegal step is recorded as an
/// internal failure.
async fn advance(context: &Context, next: PipelineState) -> bool {
    let mut machine: StateMachine = context.get(MACHINE_KEY).await.unwrap_or_default();
    match machine.advance(next) {
        Ok(()) => {
            context.set(MACHINE_KEY, &machine).await;
            true
        }
        Err(err) => {
            error!(error = %err, "pipeline state violation");
            context
                .set(FAILURE_KEY, FailureReason::Internal(err.to_string()))
                .await;
            false
        }
    }
}

async fn trace(context: &Context, stage: &str, message: impl Into<String>) {
    let mut events: Vec<TraceEvent> = context.get(TRACE_KEY).await.unwrap_or_default();
    events.push(TraceEvent::new(stage, message));
    context.set(TRACE_KEY, &events).await;
}

fn stop() -> graph_flow::Result<TaskResult> {
    Ok(TaskResult::new(None, NextAction::End))
}

pub struct ResearchTask {
    stage: Arc<ResearchStage>,
}

impl ResearchTask {
    pub fn new(stage: Arc<ResearchStage>) -> Self {
        Self { stage }
    }
}

#[async_trait]
impl Task for ResearchTask {
    fn id(&self) -> &str {
        RESEARCH_TASK
    }

    #[instrument(name = "task.research", skip(self, context))]
    async fn run(&self, context: Context) -> graph_flow::Result<TaskResult> {
        let query: String = context.get(QUERY_KEY).await.unwrap_or_default();
        let conversation: ConversationState =
            context.get(CONVERSATION_KEY).await.unwrap_or_default();

        if !advance(&context, PipelineState::Researching).await {
            context.set_sync(FATAL_KEY, true);
            return Ok(TaskResult::new(None, NextAction::ContinueAndExecute));
        }

        let (fatal, message) = match self.stage.run(&query, &conversation).await {
            Ok(outcome) => {
                let message = format!(
                    "{} sources from {} calls ({} failed)",
                    outcome.sources.len(),
                    outcome.providers.len(),
                    outcome.failures.len()
                );
                let fatal = outcome.is_fatal();
                if fatal {
                    context
                        .set(
                            FAILURE_KEY,
                            FailureReason::AllProvidersUnavailable {
                                providers: outcome.failed_providers(),
                            },
                        )
                        .await;
                }
                context.set(RESEARCH_KEY, &outcome).await;
                (fatal, message)
            }
            Err(err) => {
                error!(error = %err, "research stage could not run");
                context.set(FAILURE_KEY, FailureReason::from_error(&err)).await;
                (true, format!("research aborted: {err}"))
            }
        };

        context.set_sync(FATAL_KEY, fatal);
        trace(&context, RESEARCH_TASK, message.clone()).await;
        info!(fatal, %message, "research task finished");

        Ok(TaskResult::new(Some(message), NextAction::ContinueAndExecute))
    }
}

pub struct AnalysisTask {
    config: SharedConfig,
    drafter: Option<Arc<dyn ClaimDrafter>>,
}

impl AnalysisTask {
    pub fn new(config: SharedConfig, drafter: Option<Arc<dyn ClaimDrafter>>) -> Self {
        Self { config, drafter }
    }
}

#[async_trait]
impl Task for AnalysisTask {
    fn id(&self) -> &str {
        ANALYSIS_TASK
    }

    #[instrument(name = "task.analysis", skip(self, context))]
    async fn run(&self, context: Context) -> graph_flow::Result<TaskResult> {
        if !advance(&context, PipelineState::Analyzing).await {
            return stop();
        }
        let outcome: Option<ResearchOutcome> = context.get(RESEARCH_KEY).await;
        let Some(outcome) = outcome else {
            context
                .set(
                    FAILURE_KEY,
                    FailureReason::Internal("research results missing".into()),
                )
                .await;
            return stop();
        };
        let extra_claims: Vec<ClaimRecord> =
            context.get(EXTRA_CLAIMS_KEY).await.unwrap_or_default();

        let mut stage = {
            let config = self.config.read().await;
            AnalysisStage::from_config(&config.analysis)
        };
        if let Some(drafter) = &self.drafter {
            stage = stage.with_drafter(drafter.clone());
        }

        let report = stage.run(&outcome.query, &outcome.sources, extra_claims);
        let message = format!(
            "{} of {} sources passed the citation gate; {} claims verified, {} rejected",
            report.passing_sources.len(),
            report.provenance.len(),
            report.findings.claims().len(),
            report.rejected.len()
        );
        context.set(ANALYSIS_KEY, &report).await;
        trace(&context, ANALYSIS_TASK, message.clone()).await;

        Ok(TaskResult::new(Some(message), NextAction::ContinueAndExecute))
    }
}

pub struct WritingTask {
    config: SharedConfig,
}

impl WritingTask {
    pub fn new(config: SharedConfig) -> Self {
        Self { config }
    }
}

#[async_trait]
impl Task for WritingTask {
    fn id(&self) -> &str {
        WRITING_TASK
    }

    #[instrument(name = "task.writing", skip(self, context))]
    async fn run(&self, context: Context) -> graph_flow::Result<TaskResult> {
        if !advance(&context, PipelineState::Writing).await {
            return stop();
        }
        let analysis: Option<AnalysisReport> = context.get(ANALYSIS_KEY).await;
        let Some(analysis) = analysis else {
            context
                .set(
                    FAILURE_KEY,
                    FailureReason::Internal("analysis results missing".into()),
                )
                .await;
            return stop();
        };
        let outcome: Option<ResearchOutcome> = context.get(RESEARCH_KEY).await;

        let threshold = self.config.read().await.writing.highly_cited_threshold;
        let report =
            WritingStage::new(threshold).compose(&analysis.findings, &analysis.screened_out());

        let mut answer = report.text.clone();
        if let Some(outcome) = outcome.filter(|o| !o.failures.is_empty()) {
            let reasons: Vec<&str> = outcome.failures.iter().map(|f| f.reason.as_str()).collect();
            answer.push_str(&format!(
                "\n\nNote: some sources were unavailable for this answer: {}",
                reasons.join("; ")
            ));
        }

        context.set(REPORT_KEY, &report).await;
        context.set(ANSWER_KEY, answer.clone()).await;
        trace(
            &context,
            WRITING_TASK,
            format!("report with {} citations", report.citations.len()),
        )
        .await;

        if !advance(&context, PipelineState::Done).await {
            return stop();
        }
        info!(citations = report.citations.len(), "writing task completed");

        Ok(TaskResult::new(Some(answer), NextAction::End))
    }
}

#[derive(Default)]
pub struct FailedTask;

#[async_trait]
impl Task for FailedTask {
    fn id(&self) -> &str {
        FAILED_TASK
    }

    #[instrument(name = "task.failed", skip(self, context))]
    async fn run(&self, context: Context) -> graph_flow::Result<TaskResult> {
        let failure: FailureReason = context
            .get(FAILURE_KEY)
            .await
            .unwrap_or_else(|| FailureReason::Internal("research stage failed".into()));

        advance(&context, PipelineState::Failed).await;
        let answer = failure.explain();
        context.set(ANSWER_KEY, answer.clone()).await;
        trace(&context, FAILED_TASK, failure.summary()).await;
        info!(reason = %failure.summary(), "turn failed");

        Ok(TaskResult::new(Some(answer), NextAction::End))
    }
}
