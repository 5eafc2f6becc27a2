use opentelemetry::{
    metrics::{Counter, Gauge, Histogram, MeterProvider},
    KeyValue,
};
use opentelemetry_sdk::metrics::SdkMeterProvider;
use prometheus::Registry;
use std::collections::HashSet;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum TelemetryError {
    #[error("Failed to build prometheus exporter: {0}")]
    Exporter(String),
}

pub struct Metrics {
    inference_duration: Histogram<u64>,
    inference_results: Counter<u64>,
    inference_launches: Counter<u64>,
    render_fps: Gauge<f64>,
    pub registry: Registry,
    _provider: SdkMeterProvider,
}

impl Metrics {
    pub fn new() -> Result<Self, TelemetryError> {
        let registry = Registry::new();
        let exporter = opentelemetry_prometheus::exporter()
            .with_registry(registry.clone())
            .build()
            .map_err(|e| TelemetryError::Exporter(e.to_string()))?;

        let provider = SdkMeterProvider::builder().with_reader(exporter).build();
        let meter = provider.meter("scene_overlay");

        let boundaries = generate_boundaries((100, 500, 2000, 10_000, 30_000));

        let inference_duration = meter
            .u64_histogram("inference_duration_ms")
            .with_boundaries(boundaries)
            .with_description("Duration of remote inference calls in milliseconds")
            .build();

        let inference_results = meter
            .u64_counter("inference_results_total")
            .with_description("Completed inference calls by status")
            .build();

        let inference_launches = meter
            .u64_counter("inference_launches_total")
            .with_description("Inference calls dispatched by the scheduler")
            .build();

        let render_fps = meter
            .f64_gauge("render_fps")
            .with_description("Frames presented per second")
            .build();

        Ok(Metrics {
            inference_duration,
            inference_results,
            inference_launches,
            render_fps,
            registry,
            _provider: provider,
        })
    }

    pub fn record_inference(&self, duration_ms: u64, status: &str) {
        let attributes = [KeyValue::new("status", status.to_string())];
        self.inference_duration.record(duration_ms, &attributes);
        self.inference_results.add(1, &attributes);
    }

    pub fn record_launch(&self) {
        self.inference_launches.add(1, &[]);
    }

    pub fn record_render_fps(&self, fps: f64) {
        self.render_fps.record(fps, &[]);
    }
}

fn generate_boundaries(parts: (i32, i32, i32, i32, i32)) -> Vec<f64> {
    let first_step: usize = 100;
    let middle_step: usize = 250;
    let end_step: usize = 1000;
    let tail_step: usize = 5000;
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
