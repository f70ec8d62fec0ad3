use prometheus::{Encoder, Histogram, HistogramOpts, IntCounter, Registry, TextEncoder};
use std::time::Instant;

use crate::handler::RequestOutcome;

pub struct Metrics {
    registry: Registry,

    // Decision outcomes
    pub not_modified_total: IntCounter,
    pub tagged_total: IntCounter,
    pub skipped_total: IntCounter,

    // Failures
    pub failed_total: IntCounter,
    pub cancelled_total: IntCounter,

    pub decision_duration: Histogram,
}

impl Default for Metrics {
    fn default() -> Self {
        Self::new()
    }
}

impl Metrics {
    pub fn new() -> Self {
        let registry = Registry::new();

        let not_modified_total = IntCounter::new(
            "etag_tracker_not_modified_total",
            "Requests answered with 304 Not Modified",
        )
        .expect("metric creation failed");
        let tagged_total = IntCounter::new(
            "etag_tracker_tagged_total",
            "Responses stamped with a fresh ETag",
        )
        .expect("metric creation failed");
        let skipped_total = IntCounter::new(
            "etag_tracker_skipped_total",
            "Requests rejected by the admission filter",
        )
        .expect("metric creation failed");

        let failed_total = IntCounter::new(
            "etag_tracker_failed_total",
            "Decisions that failed with a configuration or source error",
        )
        .expect("metric creation failed");
        let cancelled_total = IntCounter::new(
            "etag_tracker_cancelled_total",
            "Decisions abandoned because the request was cancelled",
        )
        .expect("metric creation failed");

        let decision_duration = Histogram::with_opts(
            HistogramOpts::new(
                "etag_tracker_decision_duration_seconds",
                "Time spent deciding between 304 and a fresh tag",
            )
            .buckets(vec![0.0001, 0.0005, 0.001, 0.005, 0.01, 0.05, 0.1, 0.5, 1.0]),
        )
        .expect("metric creation failed");

        registry
            .register(Box::new(not_modified_total.clone()))
            .expect("metric registration failed");
        registry
            .register(Box::new(tagged_total.clone()))
            .expect("metric registration failed");
        registry
            .register(Box::new(skipped_total.clone()))
            .expect("metric registration failed");
        registry
            .register(Box::new(failed_total.clone()))
            .expect("metric registration failed");
        registry
            .register(Box::new(cancelled_total.clone()))
            .expect("metric registration failed");
        registry
            .register(Box::new(decision_duration.clone()))
            .expect("metric registration failed");

        Self {
            registry,
            not_modified_total,
            tagged_total,
            skipped_total,
            failed_total,
            cancelled_total,
            decision_duration,
        }
    }

    pub fn record_outcome(&self, outcome: RequestOutcome) {
        match outcome {
            RequestOutcome::NotModified => self.not_modified_total.inc(),
            RequestOutcome::Tagged => self.tagged_total.inc(),
            RequestOutcome::Skipped => self.skipped_total.inc(),
        }
    }

    pub fn record_failure(&self, cancelled: bool) {
        if cancelled {
            self.cancelled_total.inc();
        } else {
            self.failed_total.inc();
        }
    }

    pub fn record_decision_duration(&self, duration: std::time::Duration) {
        self.decision_duration.observe(duration.as_secs_f64());
    }

    pub fn gather_metrics(&self) -> Vec<prometheus::proto::MetricFamily> {
        self.registry.gather()
    }

    /// Prometheus text exposition of every registered metric.
    pub fn gather_text(&self) -> Result<String, prometheus::Error> {
        let mut buffer = Vec::new();
        TextEncoder::new().encode(&self.gather_metrics(), &mut buffer)?;
        String::from_utf8(buffer).map_err(|e| prometheus::Error::Msg(e.to_string()))
    }
}

/// Measures one decision from creation until `finish` or `fail`.
pub struct DecisionTimer<'a> {
    start: Instant,
    metrics: &'a Metrics,
}

impl<'a> DecisionTimer<'a> {
    pub fn new(metrics: &'a Metrics) -> Self {
        Self {
            start: Instant::now(),
            metrics,
        }
    }

    pub fn finish(self, outcome: RequestOutcome) {
        self.metrics.record_decision_duration(self.start.elapsed());
        self.metrics.record_outcome(outcome);
    }

    pub fn fail(self, cancelled: bool) {
        self.metrics.record_decision_duration(self.start.elapsed());
        self.metrics.record_failure(cancelled);
    }
}
