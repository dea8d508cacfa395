//! Pattern-driven orchestration
//!
//! For each message the orchestrator measures complexity signals, picks a
//! pattern for the current stage and drives one or more responders through
//! the router. It never changes the stage itself; replies carry the stage
//! requests the state manager applies afterwards.

pub mod fanout;
pub mod pattern;
pub mod signals;

use serde_json::json;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, error, info};

use crate::config::OrchestratorConfig;
use crate::conversation::{Context, Reply, StageRequest};
use crate::error::{LoanflowError, Result};
use crate::responder::ResponderKind;
use crate::router::{Router, RoutingDecision};
use crate::services::CreditLookup;

pub use fanout::{assess_risk, FanOutResults, FanOutTask, RiskAssessment, RiskBand};
pub use pattern::{BranchSignal, Enrichment, Pattern, PatternKind, Rule, TreeStep};
pub use signals::ComplexitySignals;

/// What a pattern produced, before metadata is attached
struct PatternRun {
    reply: Reply,
    responders: Vec<ResponderKind>,
    routing: Option<RoutingDecision>,
}

impl PatternRun {
    fn single(reply: Reply, responder: ResponderKind) -> Self {
        Self {
            reply,
            responders: vec![responder],
            routing: None,
        }
    }
}

pub struct Orchestrator {
    router: Arc<Router>,
    credit: Arc<dyn CreditLookup>,
    config: OrchestratorConfig,
}

impl Orchestrator {
    pub fn new(router: Arc<Router>, credit: Arc<dyn CreditLookup>, config: OrchestratorConfig) -> Self {
        Self {
            router,
            credit,
            config,
        }
    }

    pub fn router(&self) -> &Arc<Router> {
        &self.router
    }

    pub fn config(&self) -> &OrchestratorConfig {
        &self.config
    }

    /// Plan for `message` at the context's current stage
    pub fn plan(&self, message: &str, ctx: &Context) -> (ComplexitySignals, Pattern) {
        let signals = ComplexitySignals::measure(message, ctx);
        let kind = PatternKind::select(ctx.stage(), &signals, &self.config);
        (signals, Pattern::build(kind, ctx.stage()))
    }

    /// Produce one reply for `message`. Never fails: a failed pattern is
    /// retried once on the stage's canonical responder, then replaced by a
    /// generic fallback.
    pub async fn run(&self, message: &str, ctx: &mut Context) -> Reply {
        let (signals, pattern) = self.plan(message, ctx);
        let kind = pattern.kind();
        debug!(conversation = %ctx.id, pattern = %kind, ?signals, "pattern selected");

        let run = match self.execute(&pattern, message, ctx).await {
            Ok(run) => run,
            Err(e) => {
                error!(conversation = %ctx.id, pattern = %kind, error = %e, "pattern execution failed");
                let canonical = ResponderKind::canonical_for(ctx.stage());
                match self.router.invoke(canonical, message, ctx).await {
                    Ok(reply) => {
                        info!(conversation = %ctx.id, responder = %canonical, "recovered on canonical responder");
                        PatternRun::single(reply.with_meta("recovered", json!(true)), canonical)
                    }
                    Err(retry) => {
                        error!(conversation = %ctx.id, error = %retry, "canonical retry failed");
                        PatternRun {
                            reply: Reply::fallback(ctx.stage()),
                            responders: Vec::new(),
                            routing: None,
                        }
                    }
                }
            }
        };

        let mut reply = run
            .reply
            .with_meta("pattern", json!(kind.as_str()))
            .with_meta("signals", json!(signals))
            .with_meta("responders", json!(run.responders));
        if let Some(last) = run.responders.last() {
            reply = reply.with_meta("responder", json!(last));
        }
        if let Some(routing) = run.routing {
            reply = reply.with_meta("routing", json!(routing));
        }
        reply
    }

    async fn execute(&self, pattern: &Pattern, message: &str, ctx: &mut Context) -> Result<PatternRun> {
        match pattern {
            Pattern::Sequential { primary, fallbacks } => {
                self.sequential(*primary, fallbacks, message, ctx).await
            }
            Pattern::Branching => self.branching(message, ctx).await,
            Pattern::FanOut { tasks, then } => self.fan_out(tasks, *then, message, ctx).await,
            Pattern::Chain { steps } => self.chain(steps, message, ctx).await,
            Pattern::Tree { plan } => self.tree(plan, message, ctx).await,
        }
    }

    async fn sequential(
        &self,
        primary: ResponderKind,
        fallbacks: &[ResponderKind],
        message: &str,
        ctx: &mut Context,
    ) -> Result<PatternRun> {
        let mut last_error = None;
        for kind in std::iter::once(primary).chain(fallbacks.iter().copied()) {
            match self.router.invoke(kind, message, ctx).await {
                Ok(reply) => return Ok(PatternRun::single(reply, kind)),
                Err(e) => last_error = Some(e),
            }
        }
        Err(LoanflowError::OrchestrationFailure {
            pattern: PatternKind::Sequential.to_string(),
            message: last_error
                .map(|e| e.to_string())
                .unwrap_or_else(|| "no responders".to_string()),
        })
    }

    async fn branching(&self, message: &str, ctx: &mut Context) -> Result<PatternRun> {
        match BranchSignal::detect(message) {
            Some(signal) => {
                let target = signal.target(ctx);
                debug!(conversation = %ctx.id, ?signal, responder = %target, "branch taken");
                let reply = self.router.invoke(target, message, ctx).await?;
                Ok(PatternRun {
                    reply,
                    responders: vec![target],
                    routing: Some(RoutingDecision::pinned(target, Vec::new())),
                })
            }
            None => {
                let decision = self.router.route_default(message, ctx);
                let reply = self.router.execute(&decision, message, ctx).await;
                Ok(PatternRun {
                    reply,
                    responders: vec![decision.responder],
                    routing: Some(decision),
                })
            }
        }
    }

    async fn fan_out(
        &self,
        tasks: &[FanOutTask],
        then: ResponderKind,
        message: &str,
        ctx: &mut Context,
    ) -> Result<PatternRun> {
        let limit = Duration::from_millis(self.config.fanout_timeout_ms);
        let results = fanout::gather(&self.credit, ctx, tasks, limit).await;
        results.apply(ctx);
        let reply = self
            .router
            .invoke(then, message, ctx)
            .await
            .map_err(|e| LoanflowError::OrchestrationFailure {
                pattern: PatternKind::FanOut.to_string(),
                message: e.to_string(),
            })?;
        let reply = if results.failed.is_empty() {
            reply
        } else {
            reply.with_meta("fan_out_failed", json!(results.failed))
        };
        Ok(PatternRun::single(reply, then))
    }

    async fn chain(&self, steps: &[ResponderKind], message: &str, ctx: &mut Context) -> Result<PatternRun> {
        let mut merged: Option<Reply> = None;
        let mut responders = Vec::new();

        for kind in steps {
            let reply = match self.router.invoke(*kind, message, ctx).await {
                Ok(reply) => reply,
                Err(e) => match merged {
                    Some(_) => {
                        debug!(conversation = %ctx.id, responder = %kind, error = %e, "chain stopped");
                        break;
                    }
                    None => {
                        return Err(LoanflowError::OrchestrationFailure {
                            pattern: PatternKind::Chain.to_string(),
                            message: e.to_string(),
                        })
                    }
                },
            };

            if reply.error.is_some() {
                if merged.is_none() {
                    responders.push(*kind);
                    merged = Some(reply);
                }
                break;
            }

            responders.push(*kind);
            let waiting = reply.requires_more_input && !reply.requests_transition();
            let stop = reply.is_final || waiting;
            merged = Some(match merged {
                None => reply,
                Some(prev) => merge(prev, reply),
            });
            if stop {
                break;
            }
        }

        let reply = merged.ok_or_else(|| LoanflowError::OrchestrationFailure {
            pattern: PatternKind::Chain.to_string(),
            message: "empty chain".to_string(),
        })?;
        Ok(PatternRun {
            reply,
            responders,
            routing: None,
        })
    }

    async fn tree(&self, plan: &[TreeStep], message: &str, ctx: &mut Context) -> Result<PatternRun> {
        let mut reply: Option<Reply> = None;
        let mut responders = Vec::new();
        let mut validations = serde_json::Map::new();

        for step in plan {
            match *step {
                TreeStep::Validate(rule) => {
                    let holds = rule.holds(ctx);
                    if !holds {
                        debug!(conversation = %ctx.id, ?rule, "tree validation failed, skipping");
                    }
                    validations.insert(json!(rule).as_str().unwrap_or_default().to_string(), json!(holds));
                }
                TreeStep::Enrich(Enrichment::IntentScores) => {
                    ctx.set_extra("intent_scores", json!(signals::intent_scores(message)));
                }
                TreeStep::Enrich(Enrichment::RiskProfile) => {
                    let risk = assess_risk(ctx.credit_score, fanout::loan_to_income(ctx));
                    ctx.set_extra("risk_assessment", json!(risk));
                }
                TreeStep::Invoke(kind) => {
                    reply = Some(self.router.invoke(kind, message, ctx).await?);
                    responders.push(kind);
                }
            }
        }

        let reply = reply.ok_or_else(|| LoanflowError::OrchestrationFailure {
            pattern: PatternKind::Tree.to_string(),
            message: "plan invoked no responder".to_string(),
        })?;
        Ok(PatternRun {
            reply: reply.with_meta("validations", serde_json::Value::Object(validations)),
            responders,
            routing: None,
        })
    }
}

/// Fold a later chain step into the accumulated reply
fn merge(prev: Reply, next: Reply) -> Reply {
    let mut transitions: Vec<StageRequest> = prev.transitions;
    for request in next.transitions {
        if !transitions.iter().any(|t| t.target == request.target) {
            transitions.push(request);
        }
    }
    let mut metadata = prev.metadata;
    metadata.extend(next.metadata);
    Reply {
        text: format!("{}\n\n{}", prev.text, next.text),
        stage: next.stage,
        requires_more_input: next.requires_more_input,
        options: next.options,
        is_final: next.is_final,
        metadata,
        transitions,
        error: None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::RouterConfig;
    use crate::conversation::reply::FALLBACK_TEXT;
    use crate::conversation::{LoanPurpose, LoanRequest, Stage, TransitionKind};
    use crate::responder::ResponderSet;
    use crate::services::SyntheticBureau;
    use crate::testing::{responders_with, FailingResponder, FixedCredit};
    use crate::underwriting::UnderwritingPolicy;
    use chrono::Utc;

    fn orchestrator_with(responders: ResponderSet, credit: Arc<dyn CreditLookup>) -> Orchestrator {
        let router = Arc::new(Router::new(responders, &RouterConfig::default()));
        Orchestrator::new(router, credit, OrchestratorConfig::default())
    }

    fn orchestrator() -> Orchestrator {
        let bureau = Arc::new(SyntheticBureau::new());
        let responders = ResponderSet::new(bureau.clone(), bureau.clone(), UnderwritingPolicy::default());
        orchestrator_with(responders, bureau)
    }

    fn ctx_at(stage: Stage) -> Context {
        let mut ctx = Context::new("orc-1", Utc::now());
        ctx.set_stage(stage);
        ctx.push_user("hello there, I would like to apply for a loan", Utc::now());
        ctx
    }

    #[tokio::test]
    async fn greeting_runs_sequentially() {
        let orchestrator = orchestrator();
        let mut ctx = ctx_at(Stage::Greeting);
        let reply = orchestrator.run("hello there, I would like a loan", &mut ctx).await;
        assert_eq!(reply.metadata["pattern"], json!("sequential"));
        assert_eq!(reply.metadata["responder"], json!("requirements"));
        assert_eq!(
            reply.transitions,
            vec![StageRequest {
                target: Stage::Requirements,
                kind: TransitionKind::Forward
            }]
        );
    }

    #[tokio::test]
    async fn structured_data_branches_to_requirements() {
        let orchestrator = orchestrator();
        let mut ctx = ctx_at(Stage::Requirements);
        let reply = orchestrator
            .run("I need 5 lakh for 24 months for a personal expense", &mut ctx)
            .await;
        assert_eq!(reply.metadata["pattern"], json!("branching"));
        assert_eq!(reply.metadata["routing"]["responder"], json!("requirements"));
        assert!(ctx.loan.is_some());
    }

    #[tokio::test]
    async fn identity_chain_runs_through_decisioning() {
        let orchestrator = orchestrator();
        let mut ctx = ctx_at(Stage::Identity);
        ctx.phone = Some("9876543210".to_string());
        ctx.loan = Some(LoanRequest::new(500_000.0, 24, LoanPurpose::Personal).unwrap());

        let reply = orchestrator.run("yes please go ahead and check", &mut ctx).await;
        assert_eq!(reply.metadata["pattern"], json!("chain"));
        assert_eq!(reply.metadata["responders"], json!(["identity", "decisioning"]));
        assert!(ctx.identity_verified);
        assert!(ctx.decision.is_some());

        let targets: Vec<Stage> = reply.transitions.iter().map(|t| t.target).collect();
        assert_eq!(targets.len(), 2);
        assert_eq!(targets[0], Stage::Decisioning);
        assert!(targets[1] == Stage::Outcome || targets[1] == Stage::DocumentCheck);
        assert!(reply.text.contains("\n\n"));
    }

    #[tokio::test]
    async fn chain_stops_when_input_is_needed() {
        let orchestrator = orchestrator();
        let mut ctx = ctx_at(Stage::Requirements);
        let reply = orchestrator
            .run("urgent, I need money asap by tomorrow", &mut ctx)
            .await;
        assert_eq!(reply.metadata["pattern"], json!("chain"));
        assert_eq!(reply.metadata["responders"], json!(["requirements"]));
        assert!(reply.error.is_none());
    }

    #[tokio::test]
    async fn complex_message_runs_tree_and_skips_failed_validations() {
        let orchestrator = orchestrator();
        let mut ctx = ctx_at(Stage::Requirements);
        let message = "Can you explain how the EMI is calculated with the processing fee and \
                       APR? What happens on foreclosure or prepayment? And is the interest \
                       compounding monthly for a 5 lakh education loan over 36 months?";
        let reply = orchestrator.run(message, &mut ctx).await;
        assert_eq!(reply.metadata["pattern"], json!("tree"));
        assert_eq!(reply.metadata["validations"]["phone_captured"], json!(false));
        assert!(ctx.metadata.extra.contains_key("intent_scores"));
        assert!(ctx.metadata.extra.contains_key("risk_assessment"));
    }

    #[tokio::test]
    async fn fan_out_fills_credit_before_deciding() {
        let bureau = Arc::new(SyntheticBureau::new());
        let credit: Arc<dyn CreditLookup> = Arc::new(FixedCredit::new(780, 800_000.0, 10.5));
        let responders = ResponderSet::new(bureau, credit.clone(), UnderwritingPolicy::default());
        let orchestrator = orchestrator_with(responders, credit);

        let mut ctx = ctx_at(Stage::Decisioning);
        ctx.phone = Some("9000000001".to_string());
        ctx.identity_verified = true;
        ctx.loan = Some(LoanRequest::new(300_000.0, 36, LoanPurpose::HomeImprovement).unwrap());

        let reply = orchestrator.run("please check what I am eligible for", &mut ctx).await;
        assert_eq!(reply.metadata["pattern"], json!("fan_out"));
        assert_eq!(ctx.credit_score, Some(780));
        assert_eq!(ctx.pre_approved_limit, Some(800_000.0));
        assert!(ctx.decision.as_ref().map(|d| d.approved).unwrap_or(false));
        assert!(reply.is_final);
    }

    #[tokio::test]
    async fn double_failure_produces_fallback() {
        let responders = responders_with(Arc::new(FailingResponder::new(ResponderKind::Requirements)));
        let orchestrator = orchestrator_with(responders, Arc::new(SyntheticBureau::new()));
        let mut ctx = ctx_at(Stage::Greeting);
        let reply = orchestrator.run("hello there, I would like a loan", &mut ctx).await;
        assert_eq!(reply.text, FALLBACK_TEXT);
        assert!(reply.error.is_some());
        assert!(reply.transitions.is_empty());
    }

    #[test]
    fn merge_dedupes_targets_and_keeps_last_flags() {
        let first = Reply::new("Verified.", Stage::Identity)
            .request(Stage::Decisioning, TransitionKind::Forward)
            .no_input_needed();
        let second = Reply::new("Approved.", Stage::Identity)
            .request(Stage::Decisioning, TransitionKind::Forward)
            .request(Stage::Outcome, TransitionKind::Forward)
            .finished();
        let merged = merge(first, second);
        assert_eq!(merged.text, "Verified.\n\nApproved.");
        assert_eq!(merged.transitions.len(), 2);
        assert!(merged.is_final);
        assert!(merged.requires_more_input);
    }
}
