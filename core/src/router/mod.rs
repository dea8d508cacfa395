//! Responder routing
//!
//! Scores the three responders for a message under one of four strategies
//! and runs the chosen one on a scratch copy of the context, with a single
//! retry against the best alternate.

pub mod capability;
pub mod metrics;

use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use std::cmp::Ordering;
use std::collections::{BTreeMap, VecDeque};
use std::fmt;
use std::str::FromStr;
use std::time::Instant;
use tracing::{debug, warn};

use crate::config::RouterConfig;
use crate::conversation::{Context, Reply};
use crate::error::{LoanflowError, Result};
use crate::responder::{ResponderKind, ResponderSet};

pub use capability::Capability;
pub use metrics::{estimate_satisfaction, LoadGuard, ResponderMetrics};

use metrics::MetricsTable;

/// Confidence ceiling when every responder is unavailable
const DEGRADED_CONFIDENCE: f64 = 0.3;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RoutingStrategy {
    ScoreBased,
    LoadBased,
    CapabilityBased,
    Hybrid,
}

impl RoutingStrategy {
    pub fn as_str(self) -> &'static str {
        match self {
            RoutingStrategy::ScoreBased => "score_based",
            RoutingStrategy::LoadBased => "load_based",
            RoutingStrategy::CapabilityBased => "capability_based",
            RoutingStrategy::Hybrid => "hybrid",
        }
    }
}

impl fmt::Display for RoutingStrategy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for RoutingStrategy {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().replace('-', "_").as_str() {
            "score_based" | "score" => Ok(RoutingStrategy::ScoreBased),
            "load_based" | "load" => Ok(RoutingStrategy::LoadBased),
            "capability_based" | "capability" => Ok(RoutingStrategy::CapabilityBased),
            "hybrid" => Ok(RoutingStrategy::Hybrid),
            other => Err(format!(
                "unknown routing strategy '{}' (expected score_based, load_based, capability_based or hybrid)",
                other
            )),
        }
    }
}

/// Hybrid strategy weights
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct HybridWeights {
    pub performance: f64,
    pub load: f64,
    pub capability: f64,
    pub availability: f64,
}

impl Default for HybridWeights {
    fn default() -> Self {
        Self {
            performance: 0.4,
            load: 0.2,
            capability: 0.3,
            availability: 0.1,
        }
    }
}

impl HybridWeights {
    pub fn validate(&self) -> std::result::Result<(), String> {
        let all = [self.performance, self.load, self.capability, self.availability];
        if all.iter().any(|w| !w.is_finite() || *w < 0.0) {
            return Err("router.weights must be non-negative".to_string());
        }
        let sum: f64 = all.iter().sum();
        if (sum - 1.0).abs() > 0.01 {
            return Err(format!("router.weights must sum to 1.0 (got {:.3})", sum));
        }
        Ok(())
    }
}

/// Which responder should take a message, and who else could
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct RoutingDecision {
    pub responder: ResponderKind,
    pub confidence: f64,
    pub rationale: String,
    /// Other available responders, best first
    pub alternates: Vec<ResponderKind>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub strategy: Option<RoutingStrategy>,
}

impl RoutingDecision {
    /// Decision fixed by an orchestration pattern rather than scored
    pub fn pinned(responder: ResponderKind, alternates: Vec<ResponderKind>) -> Self {
        Self {
            responder,
            confidence: 1.0,
            rationale: format!("pinned to {}", responder),
            alternates,
            strategy: None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct RoutingRecord {
    pub at: DateTime<Utc>,
    pub conversation: String,
    pub responder: ResponderKind,
    pub strategy: RoutingStrategy,
    pub confidence: f64,
}

pub struct Router {
    responders: ResponderSet,
    metrics: MetricsTable,
    weights: Mutex<HybridWeights>,
    strategy: RoutingStrategy,
    latency_alpha: f64,
    history: Mutex<VecDeque<RoutingRecord>>,
    history_limit: usize,
}

impl Router {
    pub fn new(responders: ResponderSet, config: &RouterConfig) -> Self {
        Self {
            responders,
            metrics: metrics::new_table(),
            weights: Mutex::new(config.weights),
            strategy: config.strategy,
            latency_alpha: config.latency_alpha,
            history: Mutex::new(VecDeque::new()),
            history_limit: config.history_limit,
        }
    }

    /// Configured strategy
    pub fn strategy(&self) -> RoutingStrategy {
        self.strategy
    }

    pub fn responders(&self) -> &ResponderSet {
        &self.responders
    }

    pub fn weights(&self) -> HybridWeights {
        *self.weights.lock()
    }

    pub fn adjust_weights(&self, weights: HybridWeights) -> Result<()> {
        weights
            .validate()
            .map_err(|message| LoanflowError::InvalidConfig { message })?;
        *self.weights.lock() = weights;
        Ok(())
    }

    pub fn set_available(&self, kind: ResponderKind, available: bool) {
        self.metrics.lock().entry(kind).or_default().available = available;
        debug!(responder = %kind, available, "availability changed");
    }

    pub fn metrics(&self) -> BTreeMap<ResponderKind, ResponderMetrics> {
        self.metrics.lock().clone()
    }

    /// Recent routing decisions, oldest first
    pub fn history(&self) -> Vec<RoutingRecord> {
        self.history.lock().iter().cloned().collect()
    }

    /// Mark a request to `kind` as outstanding until the guard drops
    pub fn begin_request(&self, kind: ResponderKind) -> LoadGuard {
        LoadGuard::acquire(&self.metrics, kind)
    }

    /// Route with the configured strategy
    pub fn route_default(&self, message: &str, ctx: &Context) -> RoutingDecision {
        self.route(message, ctx, self.strategy)
    }

    pub fn route(&self, message: &str, ctx: &Context, strategy: RoutingStrategy) -> RoutingDecision {
        let snapshot = self.metrics();
        let metric = |k: ResponderKind| snapshot.get(&k).cloned().unwrap_or_default();
        let load = |k: ResponderKind| metric(k).outstanding;

        let available: Vec<ResponderKind> = ResponderKind::ALL
            .into_iter()
            .filter(|k| metric(*k).available)
            .collect();

        let decision = if available.is_empty() {
            let mut ranked = ResponderKind::ALL.to_vec();
            ranked.sort_by_key(|k| load(*k));
            let responder = ranked.remove(0);
            RoutingDecision {
                responder,
                confidence: DEGRADED_CONFIDENCE,
                rationale: format!(
                    "degraded: all responders unavailable, {} is least loaded",
                    responder
                ),
                alternates: ranked,
                strategy: Some(strategy),
            }
        } else {
            self.rank(message, ctx, strategy, &available, &snapshot)
        };

        debug!(
            conversation = %ctx.id,
            responder = %decision.responder,
            confidence = decision.confidence,
            %strategy,
            "routed"
        );
        self.remember(ctx, &decision, strategy);
        decision
    }

    fn rank(
        &self,
        message: &str,
        ctx: &Context,
        strategy: RoutingStrategy,
        available: &[ResponderKind],
        snapshot: &BTreeMap<ResponderKind, ResponderMetrics>,
    ) -> RoutingDecision {
        let metric = |k: ResponderKind| snapshot.get(&k).cloned().unwrap_or_default();
        let max_load = available.iter().map(|k| metric(*k).outstanding).max().unwrap_or(0);
        let load_score = |k: ResponderKind| {
            if max_load == 0 {
                1.0
            } else {
                1.0 - metric(k).outstanding as f64 / max_load as f64
            }
        };
        let required = capability::infer(message);
        let capability_score = |k: ResponderKind| capability::score(k, &required, ctx.stage());

        let mut scored: Vec<(ResponderKind, f64)> = match strategy {
            RoutingStrategy::ScoreBased => available
                .iter()
                .map(|k| (*k, metric(*k).performance()))
                .collect(),
            RoutingStrategy::LoadBased => available.iter().map(|k| (*k, load_score(*k))).collect(),
            RoutingStrategy::CapabilityBased => available
                .iter()
                .map(|k| (*k, capability_score(*k)))
                .collect(),
            RoutingStrategy::Hybrid => {
                let w = self.weights();
                available
                    .iter()
                    .map(|k| {
                        let score = w.performance * metric(*k).performance()
                            + w.load * load_score(*k)
                            + w.capability * capability_score(*k)
                            + w.availability;
                        (*k, score)
                    })
                    .collect()
            }
        };

        // Stable sorts: remaining ties keep declaring order
        match strategy {
            RoutingStrategy::LoadBased => scored.sort_by(|a, b| {
                metric(a.0)
                    .outstanding
                    .cmp(&metric(b.0).outstanding)
                    .then_with(|| {
                        metric(b.0)
                            .performance()
                            .partial_cmp(&metric(a.0).performance())
                            .unwrap_or(Ordering::Equal)
                    })
            }),
            _ => scored.sort_by(|a, b| b.1.partial_cmp(&a.1).unwrap_or(Ordering::Equal)),
        }

        let (responder, score) = scored[0];
        let rationale = match strategy {
            RoutingStrategy::ScoreBased => format!("{} has the best performance score {:.2}", responder, score),
            RoutingStrategy::LoadBased => format!(
                "{} has the fewest outstanding requests ({})",
                responder,
                metric(responder).outstanding
            ),
            RoutingStrategy::CapabilityBased => format!(
                "{} best covers [{}] at stage {}",
                responder,
                required
                    .iter()
                    .map(|c| c.to_string())
                    .collect::<Vec<_>>()
                    .join(", "),
                ctx.stage()
            ),
            RoutingStrategy::Hybrid => format!("{} has the best weighted score {:.2}", responder, score),
        };

        RoutingDecision {
            responder,
            confidence: score.clamp(0.0, 1.0),
            rationale,
            alternates: scored.iter().skip(1).map(|(k, _)| *k).collect(),
            strategy: Some(strategy),
        }
    }

    fn remember(&self, ctx: &Context, decision: &RoutingDecision, strategy: RoutingStrategy) {
        let mut history = self.history.lock();
        history.push_back(RoutingRecord {
            at: Utc::now(),
            conversation: ctx.id.clone(),
            responder: decision.responder,
            strategy,
            confidence: decision.confidence,
        });
        while history.len() > self.history_limit {
            history.pop_front();
        }
    }

    /// Run one responder on a scratch copy of `ctx`, committing the copy
    /// only if the responder succeeds
    pub async fn invoke(&self, kind: ResponderKind, message: &str, ctx: &mut Context) -> Result<Reply> {
        let responder = self.responders.get(kind).clone();
        let _load = self.begin_request(kind);
        let started = Instant::now();

        let mut scratch = ctx.clone();
        let result = responder.process(message, &mut scratch).await;
        let latency_ms = started.elapsed().as_secs_f64() * 1000.0;

        match result {
            Ok(reply) => {
                *ctx = scratch;
                metrics::record_success(
                    &self.metrics,
                    kind,
                    latency_ms,
                    estimate_satisfaction(&reply),
                    self.latency_alpha,
                );
                Ok(reply)
            }
            Err(e) => {
                metrics::record_error(&self.metrics, kind, latency_ms, self.latency_alpha);
                warn!(conversation = %ctx.id, responder = %kind, error = %e, "responder failed");
                Err(e)
            }
        }
    }

    /// Invoke the decided responder, retry once on the top alternate, and
    /// fall back to an apology. Never fails.
    pub async fn execute(&self, decision: &RoutingDecision, message: &str, ctx: &mut Context) -> Reply {
        if let Ok(reply) = self.invoke(decision.responder, message, ctx).await {
            return reply;
        }
        if let Some(alternate) = decision.alternates.first() {
            debug!(conversation = %ctx.id, responder = %alternate, "retrying on alternate");
            if let Ok(reply) = self.invoke(*alternate, message, ctx).await {
                return reply;
            }
        }
        Reply::apology(ctx.stage())
    }
}
