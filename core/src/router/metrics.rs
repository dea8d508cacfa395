use parking_lot::Mutex;
use serde::Serialize;
use std::collections::BTreeMap;
use std::sync::Arc;

use crate::conversation::Reply;
use crate::responder::ResponderKind;

/// Satisfaction assumed before any reply has been scored
const NEUTRAL_SATISFACTION: f64 = 0.7;

/// Rolling performance counters for one responder
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ResponderMetrics {
    pub requests: u64,
    pub successes: u64,
    pub errors: u64,
    /// Exponentially averaged
    pub avg_latency_ms: f64,
    /// Running mean of per-reply estimates
    pub satisfaction: f64,
    pub outstanding: u32,
    pub available: bool,
}

impl Default for ResponderMetrics {
    fn default() -> Self {
        Self {
            requests: 0,
            successes: 0,
            errors: 0,
            avg_latency_ms: 0.0,
            satisfaction: NEUTRAL_SATISFACTION,
            outstanding: 0,
            available: true,
        }
    }
}

impl ResponderMetrics {
    pub fn success_rate(&self) -> f64 {
        if self.requests == 0 {
            1.0
        } else {
            self.successes as f64 / self.requests as f64
        }
    }

    pub fn error_rate(&self) -> f64 {
        if self.requests == 0 {
            0.0
        } else {
            self.errors as f64 / self.requests as f64
        }
    }

    /// Score-based strategy value
    pub fn performance(&self) -> f64 {
        0.4 * self.success_rate() + 0.4 * self.satisfaction + 0.2 * (1.0 - self.error_rate())
    }

    fn observe_latency(&mut self, latency_ms: f64, alpha: f64) {
        if self.requests <= 1 {
            self.avg_latency_ms = latency_ms;
        } else {
            self.avg_latency_ms = alpha * latency_ms + (1.0 - alpha) * self.avg_latency_ms;
        }
    }
}

/// Per-reply satisfaction estimate in [0, 1]
pub fn estimate_satisfaction(reply: &Reply) -> f64 {
    let mut estimate: f64 = 0.7;
    if reply.text.chars().count() > 50 {
        estimate += 0.1;
    }
    if reply.requests_transition() || reply.is_final {
        estimate += 0.1;
    }
    estimate.min(1.0)
}

pub(crate) type MetricsTable = Arc<Mutex<BTreeMap<ResponderKind, ResponderMetrics>>>;

pub(crate) fn new_table() -> MetricsTable {
    Arc::new(Mutex::new(
        ResponderKind::ALL
            .iter()
            .map(|k| (*k, ResponderMetrics::default()))
            .collect(),
    ))
}

pub(crate) fn record_success(table: &MetricsTable, kind: ResponderKind, latency_ms: f64, satisfaction: f64, alpha: f64) {
    let mut table = table.lock();
    let m = table.entry(kind).or_default();
    m.requests += 1;
    m.successes += 1;
    m.observe_latency(latency_ms, alpha);
    m.satisfaction = if m.successes == 1 {
        satisfaction
    } else {
        m.satisfaction + (satisfaction - m.satisfaction) / m.successes as f64
    };
}

pub(crate) fn record_error(table: &MetricsTable, kind: ResponderKind, latency_ms: f64, alpha: f64) {
    let mut table = table.lock();
    let m = table.entry(kind).or_default();
    m.requests += 1;
    m.errors += 1;
    m.observe_latency(latency_ms, alpha);
}

/// Counts one outstanding request until dropped
pub struct LoadGuard {
    table: MetricsTable,
    kind: ResponderKind,
}

impl LoadGuard {
    pub(crate) fn acquire(table: &MetricsTable, kind: ResponderKind) -> Self {
        table.lock().entry(kind).or_default().outstanding += 1;
        Self {
            table: table.clone(),
            kind,
        }
    }
}

impl Drop for LoadGuard {
    fn drop(&mut self) {
        if let Some(m) = self.table.lock().get_mut(&self.kind) {
            m.outstanding = m.outstanding.saturating_sub(1);
        }
    }
}
