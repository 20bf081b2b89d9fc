//! Metrics sink consumed by the client and the calendar cache.

use std::fmt;
use std::time::Duration;

use parking_lot::Mutex;

/// Unit of a recorded metric value.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MetricUnit {
    Milliseconds,
    Count,
    Bytes,
    Percent,
}

impl MetricUnit {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Milliseconds => "ms",
            Self::Count => "count",
            Self::Bytes => "bytes",
            Self::Percent => "percent",
        }
    }
}

/// One outbound API call as seen by the resilient client.
#[derive(Debug, Clone, PartialEq)]
pub struct ApiCallRecord {
    pub endpoint: String,
    pub method: String,
    /// `None` when the call failed before any response.
    pub status_code: Option<u16>,
    pub duration: Duration,
    pub request_size: usize,
    pub response_size: usize,
    pub cached: bool,
    pub retry_count: u32,
}

pub trait MetricsSink: Send + Sync + fmt::Debug {
    fn record_metric(&self, name: &str, value: f64, unit: MetricUnit, tags: &[(&str, &str)]);

    fn record_api_call(&self, record: &ApiCallRecord);
}

/// Emits every metric as a structured `tracing` event on the `weir::metrics` target.
#[derive(Debug, Default, Clone, Copy)]
pub struct TracingMetrics;

impl MetricsSink for TracingMetrics {
    fn record_metric(&self, name: &str, value: f64, unit: MetricUnit, tags: &[(&str, &str)]) {
        tracing::debug!(
            target: "weir::metrics",
            metric = name,
            value,
            unit = unit.as_str(),
            tags = ?tags,
        );
    }

    fn record_api_call(&self, record: &ApiCallRecord) {
        tracing::debug!(
            target: "weir::metrics",
            endpoint = %record.endpoint,
            method = %record.method,
            status = ?record.status_code,
            duration_ms = record.duration.as_millis() as u64,
            request_size = record.request_size,
            response_size = record.response_size,
            cached = record.cached,
            retry_count = record.retry_count,
            "api call"
        );
    }
}

/// A recorded metric sample.
#[derive(Debug, Clone, PartialEq)]
pub struct MetricSample {
    pub name: String,
    pub value: f64,
    pub unit: MetricUnit,
    pub tags: Vec<(String, String)>,
}

/// Keeps everything in memory. Useful for tests and diagnostics screens.
#[derive(Debug, Default)]
pub struct RecordingMetrics {
    samples: Mutex<Vec<MetricSample>>,
    api_calls: Mutex<Vec<ApiCallRecord>>,
}

impl RecordingMetrics {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn samples(&self) -> Vec<MetricSample> {
        self.samples.lock().clone()
    }

    /// Number of samples recorded under `name`.
    pub fn count(&self, name: &str) -> usize {
        self.samples.lock().iter().filter(|s| s.name == name).count()
    }

    pub fn api_calls(&self) -> Vec<ApiCallRecord> {
        self.api_calls.lock().clone()
    }
}

impl MetricsSink for RecordingMetrics {
    fn record_metric(&self, name: &str, value: f64, unit: MetricUnit, tags: &[(&str, &str)]) {
        self.samples.lock().push(MetricSample {
            name: name.to_string(),
            value,
            unit,
            tags: tags
                .iter()
                .map(|(k, v)| (k.to_string(), v.to_string()))
                .collect(),
        });
    }

    fn record_api_call(&self, record: &ApiCallRecord) {
        self.api_calls.lock().push(record.clone());
    }
}
