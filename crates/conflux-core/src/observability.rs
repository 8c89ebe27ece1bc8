//! In-memory observability primitives: tracing, metrics, and redaction
//!
//! These are intentionally lightweight: an in-memory trace store and counter
//! set suited to local development and tests, before a full metrics/tracing
//! backend is wired in. Structured log emission goes through the `tracing`
//! crate at the call sites; this module only owns the recording side of the
//! observability contract.
//!
//! There are no module-level singletons: executors and the orchestrator take
//! an explicit [`Observability`] context so concurrent runs and tests never
//! share hidden state.

use chrono::{DateTime, Utc};
use dashmap::DashMap;
use serde::Serialize;
use serde_json::{Map, Value};

/// Identifier of one recorded trace
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct TraceId(pub String);

impl std::fmt::Display for TraceId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// One recorded event within a trace
#[derive(Debug, Clone, Serialize)]
pub struct TraceEvent {
    /// When the event was recorded
    pub ts: DateTime<Utc>,
    /// Event name, e.g. `step_started`
    pub event: String,
    /// Structured event fields
    pub fields: Map<String, Value>,
}

/// In-memory trace store recording events per trace id
#[derive(Debug, Default)]
pub struct Tracer {
    store: DashMap<String, Vec<TraceEvent>>,
}

impl Tracer {
    /// Create an empty tracer
    pub fn new() -> Self {
        Self::default()
    }

    /// Open a new trace and return its id
    pub fn start_trace(&self) -> TraceId {
        let tid = TraceId(uuid::Uuid::new_v4().simple().to_string());
        self.store.insert(tid.0.clone(), Vec::new());
        tid
    }

    /// Record an event; `fields` must be a JSON object (null for none)
    pub fn record(&self, trace_id: &TraceId, event: &str, fields: Value) {
        let fields = match fields {
            Value::Object(map) => map,
            _ => Map::new(),
        };
        self.store
            .entry(trace_id.0.clone())
            .or_default()
            .push(TraceEvent {
                ts: Utc::now(),
                event: event.to_string(),
                fields,
            });
    }

    /// Events recorded under a trace id, if any
    pub fn get_trace(&self, trace_id: &TraceId) -> Option<Vec<TraceEvent>> {
        self.store.get(&trace_id.0).map(|events| events.clone())
    }

    /// Ids of every open trace
    pub fn trace_ids(&self) -> Vec<TraceId> {
        self.store
            .iter()
            .map(|entry| TraceId(entry.key().clone()))
            .collect()
    }
}

/// In-memory counters and timers with a Prometheus-like text export
#[derive(Debug, Default)]
pub struct MetricsCollector {
    counters: DashMap<String, u64>,
    timings: DashMap<String, Vec<f64>>,
}

impl MetricsCollector {
    /// Create an empty collector
    pub fn new() -> Self {
        Self::default()
    }

    /// Increment a counter
    pub fn inc(&self, name: &str, amount: u64) {
        *self.counters.entry(name.to_string()).or_insert(0) += amount;
    }

    /// Record a timing sample in seconds
    pub fn timing(&self, name: &str, seconds: f64) {
        self.timings
            .entry(name.to_string())
            .or_default()
            .push(seconds);
    }

    /// Current value of a counter
    pub fn counter(&self, name: &str) -> u64 {
        self.counters.get(name).map(|v| *v).unwrap_or(0)
    }

    /// Recorded timing samples for a name
    pub fn timings(&self, name: &str) -> Vec<f64> {
        self.timings
            .get(name)
            .map(|v| v.clone())
            .unwrap_or_default()
    }

    /// Render counters and timing summaries in a small Prometheus-like
    /// exposition format
    pub fn export_prometheus(&self) -> String {
        let mut lines: Vec<String> = Vec::new();
        let mut counters: Vec<(String, u64)> = self
            .counters
            .iter()
            .map(|e| (e.key().clone(), *e.value()))
            .collect();
        counters.sort();
        for (name, value) in counters {
            lines.push(format!("{} {}", name, value));
        }

        let mut timings: Vec<(String, Vec<f64>)> = self
            .timings
            .iter()
            .map(|e| (e.key().clone(), e.value().clone()))
            .collect();
        timings.sort_by(|a, b| a.0.cmp(&b.0));
        for (name, samples) in timings {
            if !samples.is_empty() {
                let avg = samples.iter().sum::<f64>() / samples.len() as f64;
                lines.push(format!("{}_count {}", name, samples.len()));
                lines.push(format!("{}_avg {:.6}", name, avg));
            }
        }
        lines.join("\n")
    }
}

/// Explicit observability context shared by executors and the orchestrator
#[derive(Debug, Default)]
pub struct Observability {
    /// Trace store
    pub tracer: Tracer,
    /// Metrics store
    pub metrics: MetricsCollector,
}

impl Observability {
    /// Create a fresh context
    pub fn new() -> Self {
        Self::default()
    }
}

/// Return a copy of `data` with the selected fields replaced
///
/// Fields that are absent or already null are left alone; other fields keep
/// their keys but get `replacement` as value.
pub fn redact(
    data: Map<String, Value>,
    fields: &[String],
    replacement: &str,
) -> Map<String, Value> {
    let mut out = data;
    for field in fields {
        if let Some(value) = out.get_mut(field) {
            if !value.is_null() {
                *value = Value::String(replacement.to_string());
            }
        }
    }
    out
}
