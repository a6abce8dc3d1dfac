use std::time::Duration;

use once_cell::sync::OnceCell;
use opentelemetry::metrics::{Counter, Histogram, Meter};
use opentelemetry::{KeyValue, global};

struct PipelineMetrics {
    provider_calls: Counter<u64>,
    provider_latency_ms: Histogram<f64>,
    sources_returned: Counter<u64>,
    turns: Counter<u64>,
}

static METRICS: OnceCell<PipelineMetrics> = OnceCell::new();

fn handles() -> &'static PipelineMetrics {
    METRICS.get_or_init(|| {
        let meter: Meter = global::meter("litscout.pipeline");
        PipelineMetrics {
            provider_calls: meter
                .u64_counter("provider_calls_total")
                .with_description("Provider tool calls by provider and status")
                .init(),
            provider_latency_ms: meter
                .f64_histogram("provider_call_duration_ms")
                .with_description("Provider tool call latency in milliseconds")
                .init(),
            sources_returned: meter
                .u64_counter("provider_sources_total")
                .with_description("Sources returned by each provider before deduplication")
                .init(),
            turns: meter
                .u64_counter("pipeline_turns_total")
                .with_description("Completed pipeline turns by final state")
                .init(),
        }
    })
}

/// Record one provider call (no-op if no meter provider is installed).
pub fn record_provider_call(provider: &str, status: &str, elapsed: Duration, sources: usize) {
    let metrics = handles();
    let attrs = [
        KeyValue::new("provider", provider.to_string()),
        KeyValue::new("status", status.to_string()),
    ];
    metrics.provider_calls.add(1, &attrs);
    metrics
        .provider_latency_ms
        .record(elapsed.as_secs_f64() * 1000.0, &attrs);
    if sources > 0 {
        metrics.sources_returned.add(sources as u64, &attrs[..1]);
    }
}

pub fn record_turn(state: &str) {
    handles()
        .turns
        .add(1, &[KeyValue::new("state", state.to_string())]);
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn recording_without_provider_is_harmless() {
        record_provider_call("openalex_search", "success", Duration::from_millis(12), 4);
        record_provider_call("core_search", "failure", Duration::from_millis(3), 0);
        record_turn("done");
    }
}
