//! Research stage: fan out to the search tools, merge, deduplicate and rank.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::{Duration, Instant};

use futures::stream::{self, StreamExt};
use serde::{Deserialize, Serialize};
use serde_json::json;
use tokio::time::timeout;
use tracing::{debug, info, instrument, warn};

use crate::LitScoutError;
use crate::config::{ProviderKind, SearchDefaults, SharedConfig};
use crate::metrics::record_provider_call;
use crate::model::{ConversationState, Source};
use crate::tools::{ToolCall, ToolRegistry, ToolResult, WEB_FETCH_TOOL, WebPage};

const WEB_SNIPPET_CHARS: usize = 500;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ResearchStatus {
    Found,
    /// Providers answered but nothing matched.
    NoResults,
    /// Every bibliographic provider failed; fatal to the turn.
    AllProvidersUnavailable,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProviderFailure {
    pub provider: String,
    pub reason: String,
    /// Web fetch failures never make the stage fatal.
    pub bibliographic: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ResearchOutcome {
    /// Query actually sent to the providers, after follow-up resolution.
    pub query: String,
    pub status: ResearchStatus,
    /// Ranked, deduplicated candidates.
    pub sources: Vec<Source>,
    pub failures: Vec<ProviderFailure>,
    pub providers: Vec<String>,
}

impl ResearchOutcome {
    pub fn is_fatal(&self) -> bool {
        self.status == ResearchStatus::AllProvidersUnavailable
    }

    /// Bibliographic providers that failed, in query order.
    pub fn failed_providers(&self) -> Vec<String> {
        self.failures
            .iter()
            .filter(|f| f.bibliographic)
            .map(|f| f.provider.clone())
            .collect()
    }
}

#[derive(Debug, Clone)]
enum CallTarget {
    Provider(ProviderKind),
    Web { name: String },
}

#[derive(Debug, Clone)]
struct PlannedCall {
    target: CallTarget,
    call: ToolCall,
    timeout: Duration,
}

impl PlannedCall {
    fn label(&self) -> &str {
        match &self.target {
            CallTarget::Provider(kind) => kind.tool_name(),
            CallTarget::Web { .. } => WEB_FETCH_TOOL,
        }
    }
}

pub struct ResearchStage {
    registry: Arc<ToolRegistry>,
    config: SharedConfig,
}

impl ResearchStage {
    pub fn new(registry: Arc<ToolRegistry>, config: SharedConfig) -> Self {
        Self { registry, config }
    }

    /// Query every enabled provider and web source for `query`.
    ///
    /// Individual provider failures are recorded, not returned; the only error
    /// is a configuration that leaves nothing to query.
    #[instrument(
        name = "stage.research",
        skip(self, conversation),
        fields(history = conversation.len())
    )]
    pub async fn run(
        &self,
        query: &str,
        conversation: &ConversationState,
    ) -> Result<ResearchOutcome, LitScoutError> {
        let effective = conversation.contextualize(query);
        let (plan, max_workers, defaults) = self.plan(&effective).await?;
        let providers: Vec<String> = plan.iter().map(|p| p.label().to_string()).collect();
        info!(query = %effective, calls = plan.len(), "research fan-out");

        let registry = &self.registry;
        let responses: Vec<(PlannedCall, Result<ToolResult, LitScoutError>, Duration)> =
            stream::iter(plan)
                .map(|planned| async move {
                    let started = Instant::now();
                    let dispatched = registry.dispatch(planned.call.clone());
                    let result = match timeout(planned.timeout, dispatched).await {
                        Ok(result) => result,
                        Err(_) => Err(LitScoutError::provider(
                            planned.label(),
                            format!("timed out after {}s", planned.timeout.as_secs()),
                        )),
                    };
                    (planned, result, started.elapsed())
                })
                .buffered(max_workers)
                .collect()
                .await;

        let mut collected = Vec::new();
        let mut failures = Vec::new();
        let mut answered = 0usize;

        for (planned, result, elapsed) in responses {
            let label = planned.label().to_string();
            let bibliographic = matches!(planned.target, CallTarget::Provider(_));
            let parsed = match result {
                Ok(tool_result) => parse_result(&planned, tool_result),
                Err(err) => Err(err.to_string()),
            };
            match parsed {
                Ok(sources) => {
                    record_provider_call(&label, "success", elapsed, sources.len());
                    debug!(provider = %label, count = sources.len(), "provider answered");
                    if bibliographic {
                        answered += 1;
                    }
                    collected.extend(sources);
                }
                Err(reason) => {
                    record_provider_call(&label, "failure", elapsed, 0);
                    warn!(provider = %label, %reason, "provider failed; continuing without it");
                    failures.push(ProviderFailure {
                        provider: label,
                        reason,
                        bibliographic,
                    });
                }
            }
        }

        if answered == 0 {
            warn!(failures = failures.len(), "all bibliographic providers unavailable");
            return Ok(ResearchOutcome {
                query: effective,
                status: ResearchStatus::AllProvidersUnavailable,
                sources: Vec::new(),
                failures,
                providers,
            });
        }

        let mut sources: Vec<Source> = merge_sources(collected)
            .into_iter()
            .filter(|s| s.year.is_none_or(|year| year >= defaults.min_year))
            .collect();
        rank_sources(&mut sources);
        sources.truncate(defaults.max_results);

        let status = if sources.is_empty() {
            ResearchStatus::NoResults
        } else {
            ResearchStatus::Found
        };
        info!(count = sources.len(), failures = failures.len(), ?status, "research complete");

        Ok(ResearchOutcome {
            query: effective,
            status,
            sources,
            failures,
            providers,
        })
    }

    async fn plan(
        &self,
        query: &str,
    ) -> Result<(Vec<PlannedCall>, usize, SearchDefaults), LitScoutError> {
        let config = self.config.read().await;
        let enabled = config.sources.enabled();
        if enabled.is_empty() {
            return Err(LitScoutError::Configuration(
                "no bibliographic providers are enabled".into(),
            ));
        }

        let mut plan = Vec::new();
        for kind in enabled {
            plan.push(PlannedCall {
                target: CallTarget::Provider(kind),
                call: ToolCall::new(
                    kind.tool_name(),
                    json!({
                        "topic": query,
                        "max_results": config.defaults.max_results,
                        "min_year": config.defaults.min_year,
                    }),
                ),
                timeout: config.sources.get(kind).timeout(kind),
            });
        }
        for source in &config.web.sources {
            let url = source.url_for(query)?;
            plan.push(PlannedCall {
                target: CallTarget::Web {
                    name: source.name.clone(),
                },
                call: ToolCall::new(WEB_FETCH_TOOL, json!({ "url": url.as_str() })),
                timeout: config.web.timeout(),
            });
        }

        Ok((plan, config.behavior.max_workers, config.defaults.clone()))
    }
}

/// Sources carried by a tool result; the error is the failure reason.
fn parse_result(planned: &PlannedCall, result: ToolResult) -> Result<Vec<Source>, String> {
    if !result.is_success() {
        return Err(result.content);
    }
    match &planned.target {
        CallTarget::Provider(kind) => serde_json::from_str(&result.content).map_err(|err| {
            let reason = format!("unreadable result: {err}");
            LitScoutError::provider(kind.tool_name(), reason).to_string()
        }),
        CallTarget::Web { name } => {
            let page: WebPage = serde_json::from_str(&result.content).map_err(|err| {
                let reason = format!("unreadable page: {err}");
                LitScoutError::provider(WEB_FETCH_TOOL, reason).to_string()
            })?;
            Ok(vec![web_source(name, page)])
        }
    }
}

fn web_source(name: &str, page: WebPage) -> Source {
    let title = page.title.clone().unwrap_or_else(|| name.to_string());
    let mut source = Source::new(title, WEB_FETCH_TOOL);
    source.abstract_text = page.text.chars().take(WEB_SNIPPET_CHARS).collect();
    source.venue = Some(name.to_string());
    source.url = Some(page.url);
    source
}

/// Collapse sources sharing an identifier, keeping first-seen order.
pub fn merge_sources(sources: Vec<Source>) -> Vec<Source> {
    let mut merged: Vec<Source> = Vec::with_capacity(sources.len());
    let mut positions: HashMap<String, usize> = HashMap::new();

    for source in sources {
        let id = source.id();
        match positions.get(&id) {
            Some(&index) => {
                debug!(%id, "merging duplicate source");
                merged[index] = merged[index].merged_with(&source);
            }
            None => {
                positions.insert(id, merged.len());
                merged.push(source);
            }
        }
    }
    merged
}

/// Citation count descending, then year descending; unknown values sort last
/// and ties keep their current order.
pub fn rank_sources(sources: &mut [Source]) {
    sources.sort_by(|a, b| {
        b.citation_count
            .cmp(&a.citation_count)
            .then_with(|| b.year.cmp(&a.year))
    });
}
