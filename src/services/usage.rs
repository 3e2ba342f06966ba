//! Usage accounting side channel.
//!
//! Each completed call reports its token counts at most once through a
//! [`UsageSink`]. What happens next (alerting, budgets) is the collaborator's
//! business.

use crate::core::metrics::get_metrics;

/// Token counts for one completed call.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UsageEvent {
    pub model: String,
    pub input_tokens: u64,
    pub output_tokens: u64,
    pub cache_creation_input_tokens: u64,
    pub cache_read_input_tokens: u64,
}

impl UsageEvent {
    pub fn total_tokens(&self) -> u64 {
        self.input_tokens + self.output_tokens
    }
}

/// Receiver of per-call usage events.
pub trait UsageSink: Send + Sync {
    fn record(&self, event: UsageEvent);
}

impl<F> UsageSink for F
where
    F: Fn(UsageEvent) + Send + Sync,
{
    fn record(&self, event: UsageEvent) {
        self(event)
    }
}

/// Default sink: a structured log line plus prometheus token counters.
#[derive(Debug, Default, Clone, Copy)]
pub struct LoggingUsageSink;

impl UsageSink for LoggingUsageSink {
    fn record(&self, event: UsageEvent) {
        tracing::info!(
            model = %event.model,
            input_tokens = event.input_tokens,
            output_tokens = event.output_tokens,
            cache_creation_input_tokens = event.cache_creation_input_tokens,
            cache_read_input_tokens = event.cache_read_input_tokens,
            "Usage recorded"
        );
        let metrics = get_metrics();
        metrics
            .token_usage
            .with_label_values(&[&event.model, "input"])
            .inc_by(event.input_tokens);
        metrics
            .token_usage
            .with_label_values(&[&event.model, "output"])
            .inc_by(event.output_tokens);
        metrics
            .token_usage
            .with_label_values(&[&event.model, "cache_creation"])
            .inc_by(event.cache_creation_input_tokens);
        metrics
            .token_usage
            .with_label_values(&[&event.model, "cache_read"])
            .inc_by(event.cache_read_input_tokens);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::{Arc, Mutex};

    #[test]
    fn test_closure_sink() {
        let seen = Arc::new(Mutex::new(Vec::new()));
        let captured = seen.clone();
        let sink = move |event: UsageEvent| captured.lock().unwrap().push(event);

        sink.record(UsageEvent {
            model: "m".to_string(),
            input_tokens: 3,
            output_tokens: 4,
            cache_creation_input_tokens: 0,
            cache_read_input_tokens: 0,
        });

        let events = seen.lock().unwrap();
        assert_eq!(events.len(), 1);
        assert_eq!(events[0].total_tokens(), 7);
    }

    #[test]
    fn test_logging_sink_updates_metrics() {
        let counter = |kind: &str| {
            get_metrics()
                .token_usage
                .with_label_values(&["usage-sink-test", kind])
        };
        let (output, creation, read) = (
            counter("output").get(),
            counter("cache_creation").get(),
            counter("cache_read").get(),
        );
        LoggingUsageSink.record(UsageEvent {
            model: "usage-sink-test".to_string(),
            input_tokens: 1,
            output_tokens: 5,
            cache_creation_input_tokens: 7,
            cache_read_input_tokens: 11,
        });
        assert_eq!(counter("output").get(), output + 5);
        assert_eq!(counter("cache_creation").get(), creation + 7);
        assert_eq!(counter("cache_read").get(), read + 11);
    }
}
