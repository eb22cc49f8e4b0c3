use opentelemetry::{
    global,
    metrics::{Counter, Histogram, MeterProvider},
    KeyValue,
};
use prometheus::Registry;
use std::collections::HashSet;

pub struct Metrics {
    request_counter: Counter<u64>,
    score_counter: Counter<u64>,
    inference_duration: Histogram<u64>,
    upload_counter: Counter<u64>,
    pub registry: Registry,
}

impl Metrics {
    pub fn new() -> anyhow::Result<Self> {
        let registry = Registry::new();
        let exporter = opentelemetry_prometheus::exporter()
            .with_registry(registry.clone())
            .build()
            .map_err(|e| anyhow::anyhow!("failed to build prometheus exporter: {}", e))?;

        let provider = opentelemetry_sdk::metrics::SdkMeterProvider::builder()
            .with_reader(exporter)
            .build();

        let meter = provider.meter("yolo_scoring");
        global::set_meter_provider(provider);

        let request_counter = meter
            .u64_counter("requests_total")
            .with_description("Total number of requests")
            .build();

        let score_counter = meter
            .u64_counter("score_outcomes_total")
            .with_description("Score calls by outcome")
            .build();

        let inference_duration = meter
            .u64_histogram("score_duration_ms")
            .with_boundaries(generate_boundaries((10, 50, 100, 500, 2000)))
            .with_description("Time spent in the scoring pipeline in milliseconds")
            .build();

        let upload_counter = meter
            .u64_counter("artifact_uploads_total")
            .with_description("Annotated frame uploads by outcome")
            .build();

        Ok(Metrics {
            request_counter,
            score_counter,
            inference_duration,
            upload_counter,
            registry,
        })
    }

    pub fn record_request(&self, route: &str) {
        let attributes = vec![KeyValue::new("route", route.to_string())];
        self.request_counter.add(1, &attributes);
    }

    /// `outcome` is one of `detections`, `empty` or the failing stage name.
    pub fn record_score(&self, outcome: &str) {
        let attributes = vec![KeyValue::new("outcome", outcome.to_string())];
        self.score_counter.add(1, &attributes);
    }

    pub fn record_score_duration(&self, duration_ms: u64) {
        self.inference_duration.record(duration_ms, &[]);
    }

    pub fn record_upload(&self, outcome: &str) {
        let attributes = vec![KeyValue::new("outcome", outcome.to_string())];
        self.upload_counter.add(1, &attributes);
    }
}

/// Fine steps at the low end, coarser towards the tail.
fn generate_boundaries(parts: (i32, i32, i32, i32, i32)) -> Vec<f64> {
    let first_step: usize = 5;
    let middle_step: usize = 10;
    let end_step: usize = 50;
    let tail_step: usize = 500;
    let first_part = (parts.0..=parts.1).step_by(first_step);
    let middle_part = (parts.1..=parts.2).step_by(middle_step);
    let end_part = (parts.2..=parts.3).step_by(end_step);
    let tail_part = (parts.3..=parts.4).step_by(tail_step);

    let mut seen = HashSet::new();
    first_part
        .chain(middle_part)
        .chain(end_part)
        .chain(tail_part)
        .filter(|&x| seen.insert(x))
        .map(|x| x as f64)
        .collect()
}
