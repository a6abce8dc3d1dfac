use std::fmt::Write as _;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// One stage milestone within a turn.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TraceEvent {
    pub stage: String,
    pub message: String,
    pub at: DateTime<Utc>,
}

impl TraceEvent {
    pub fn new(stage: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            stage: stage.into(),
            message: message.into(),
            at: Utc::now(),
        }
    }
}

/// Stage-by-stage record of one turn.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct TraceCollector {
    events: Vec<TraceEvent>,
}

impl TraceCollector {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn from_events(events: Vec<TraceEvent>) -> Self {
        Self { events }
    }

    pub fn record(&mut self, stage: impl Into<String>, message: impl Into<String>) {
        self.events.push(TraceEvent::new(stage, message));
    }

    pub fn events(&self) -> &[TraceEvent] {
        &self.events
    }

    pub fn is_empty(&self) -> bool {
        self.events.is_empty()
    }

    pub fn summary(&self) -> TraceSummary {
        let started = self.events.first().map(|event| event.at);
        let steps = self
            .events
            .iter()
            .zip(1..)
            .map(|(event, index)| TraceStep {
                index,
                stage: event.stage.clone(),
                message: event.message.clone(),
                elapsed_ms: started
                    .map(|start| (event.at - start).num_milliseconds().max(0))
                    .unwrap_or_default(),
            })
            .collect();
        TraceSummary { steps }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TraceStep {
    pub index: usize,
    pub stage: String,
    pub message: String,
    /// Milliseconds since the turn's first event.
    pub elapsed_ms: i64,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct TraceSummary {
    pub steps: Vec<TraceStep>,
}

impl TraceSummary {
    pub fn render_markdown(&self) -> String {
        if self.steps.is_empty() {
            return "No trace events recorded.".to_string();
        }
        self.steps.iter().fold(
            String::from("### Stage trace\n"),
            |mut output, step| {
                let _ = writeln!(
                    output,
                    "{}. {} -> {} (+{}ms)",
                    step.index, step.stage, step.message, step.elapsed_ms
                );
                output
            },
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn markdown_lists_stages_in_order() {
        let mut collector = TraceCollector::new();
        collector.record("research", "8 sources from 3 calls (0 failed)");
        collector.record("analysis", "5 claims verified, 3 rejected");

        let summary = collector.summary();
        assert_eq!(summary.steps[0].elapsed_ms, 0);
        assert!(summary.steps[1].elapsed_ms >= 0);

        let markdown = summary.render_markdown();
        assert!(markdown.starts_with("### Stage trace"));
        assert!(markdown.contains("1. research -> 8 sources from 3 calls (0 failed) (+0ms)"));
        assert!(markdown.contains("2. analysis -> 5 claims verified, 3 rejected"));
    }

    #[test]
    fn empty_trace_says_so() {
        assert_eq!(
            TraceCollector::new().summary().render_markdown(),
            "No trace events recorded."
        );
    }
}
