//! litscout core: a literature research pipeline built on `graph_flow`.
//!
//! A turn runs three stages. Research fans out to bibliographic search tools
//! (OpenAlex, CORE, ORKG Ask) and configured web sources. Analysis screens
//! sources by citation count and verifies the claims drawn from them. Writing
//! renders the verified findings into an attributed report.

mod commands;
mod config;
mod error;
mod logging;
mod metrics;
mod model;
mod security;
mod tasks;
mod telemetry;
mod trace;
mod workflow;

pub mod stages;
pub mod tools;

pub use commands::{ConfigCommand, QueryRouter, Route, execute as execute_command};
pub use config::{
    AnalysisConfig, BehaviorConfig, Config, ConfigLoader, LoggingConfig, ProviderKind,
    ProviderSettings, SearchDefaults, SharedConfig, SourcesConfig, WebConfig, WebSource,
    WritingConfig,
};
pub use error::{LitScoutError, Result};
pub use logging::{TurnLogInput, TurnLogger};
pub use metrics::{record_provider_call, record_turn};
pub use model::{
    ClaimRecord, ClaimStatus, ConversationState, Role, Source, Turn, normalize_doi, normalize_url,
};
pub use security::{SecretValue, optional_env, require_env};
pub use tasks::{
    ANALYSIS_TASK, AnalysisTask, FAILED_TASK, FailedTask, RESEARCH_TASK, ResearchTask,
    WRITING_TASK, WritingTask,
};
pub use telemetry::{TelemetryOptions, init_telemetry};
pub use trace::{TraceCollector, TraceEvent, TraceStep, TraceSummary};
pub use workflow::{FailureReason, Pipeline, PipelineState, StateMachine, TurnOutcome};
