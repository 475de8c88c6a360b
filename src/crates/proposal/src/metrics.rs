//! Per-call provider metrics.

use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use tracing::debug;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CallStatus {
    Success,
    Failure,
}

impl CallStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            CallStatus::Success => "success",
            CallStatus::Failure => "failure",
        }
    }
}

/// Receives one sample per provider call.
pub trait MetricsSink: Send + Sync {
    fn record(&self, provider: &str, model: &str, status: CallStatus, duration_secs: f64, tokens: u64);
}

/// Logs every sample at debug level.
#[derive(Debug, Default, Clone, Copy)]
pub struct TracingMetrics;

impl MetricsSink for TracingMetrics {
    fn record(&self, provider: &str, model: &str, status: CallStatus, duration_secs: f64, tokens: u64) {
        debug!(
            provider,
            model,
            status = status.as_str(),
            duration_ms = (duration_secs * 1000.0) as u64,
            tokens,
            "provider call"
        );
    }
}

/// Aggregate of all samples for one provider/model pair.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct CallStats {
    pub calls: u64,
    pub failures: u64,
    pub tokens: u64,
    pub total_duration_secs: f64,
}

impl CallStats {
    pub fn mean_duration_secs(&self) -> f64 {
        if self.calls == 0 {
            return 0.0;
        }
        self.total_duration_secs / self.calls as f64
    }
}

/// Keeps aggregates in memory, keyed by `(provider, model)`.
#[derive(Debug, Default)]
pub struct InMemoryMetrics {
    stats: Mutex<BTreeMap<(String, String), CallStats>>,
}

impl InMemoryMetrics {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get(&self, provider: &str, model: &str) -> Option<CallStats> {
        self.stats
            .lock()
            .get(&(provider.to_string(), model.to_string()))
            .cloned()
    }

    pub fn total_calls(&self) -> u64 {
        self.stats.lock().values().map(|s| s.calls).sum()
    }
}

impl MetricsSink for InMemoryMetrics {
    fn record(&self, provider: &str, model: &str, status: CallStatus, duration_secs: f64, tokens: u64) {
        let mut stats = self.stats.lock();
        let entry = stats
            .entry((provider.to_string(), model.to_string()))
            .or_default();
        entry.calls += 1;
        if status == CallStatus::Failure {
            entry.failures += 1;
        }
        entry.tokens += tokens;
        entry.total_duration_secs += duration_secs;
    }
}
