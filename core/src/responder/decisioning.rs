//! Runs underwriting, handles income proof and presents the outcome.

use std::sync::Arc;
use tracing::{debug, info};

use crate::conversation::{Context, Reply, Stage, TransitionKind};
use crate::error::{LoanflowError, Result};
use crate::services::CreditLookup;
use crate::underwriting::{format_rupees, Application, DecisionOutcome, UnderwritingPolicy, Verdict};

use super::extract;
use super::{Responder, ResponderKind};

pub struct DecisioningResponder {
    credit: Arc<dyn CreditLookup>,
    policy: UnderwritingPolicy,
}

impl DecisioningResponder {
    pub fn new(credit: Arc<dyn CreditLookup>, policy: UnderwritingPolicy) -> Self {
        Self { credit, policy }
    }

    pub fn policy(&self) -> &UnderwritingPolicy {
        &self.policy
    }

    fn failure(&self, message: String) -> LoanflowError {
        LoanflowError::ResponderFailure {
            responder: self.kind().to_string(),
            message,
        }
    }

    /// Fill in score and offer if an earlier step did not
    async fn ensure_credit(&self, ctx: &mut Context, applicant_id: &str) -> Result<(u32, f64)> {
        let score = match ctx.credit_score {
            Some(score) => score,
            None => {
                let score = self.credit.score(applicant_id).await.map_err(|e| {
                    self.failure(format!("{} score lookup failed: {}", self.credit.name(), e))
                })?;
                ctx.credit_score = Some(score);
                score
            }
        };
        let limit = match ctx.pre_approved_limit {
            Some(limit) => limit,
            None => {
                let offer = self.credit.offer(applicant_id).await.map_err(|e| {
                    self.failure(format!("{} offer lookup failed: {}", self.credit.name(), e))
                })?;
                ctx.pre_approved_limit = Some(offer.limit);
                ctx.offered_rate.get_or_insert(offer.rate);
                offer.limit
            }
        };
        Ok((score, limit))
    }

    async fn decide(&self, ctx: &mut Context) -> Result<Reply> {
        let stage = ctx.stage();

        if let Some(decision) = ctx.decision.clone() {
            return Ok(present(ctx, &decision, stage));
        }

        let Some(loan) = ctx.loan.clone() else {
            return Ok(Reply::new(
                "I still need your loan amount, tenure and purpose before I can check eligibility.",
                stage,
            )
            .with_error("loan request missing"));
        };
        let phone = match ctx.phone.clone() {
            Some(phone) if ctx.identity_verified => phone,
            _ => {
                return Ok(Reply::new(
                    "I need to verify your identity before checking your eligibility.",
                    stage,
                )
                .with_error("identity not verified"));
            }
        };

        let (score, limit) = self.ensure_credit(ctx, &phone).await?;
        let application = Application::new(&loan, score, limit).with_offered_rate(ctx.offered_rate);
        let outcome = self.policy.evaluate(&application);
        info!(
            conversation = %ctx.id,
            verdict = ?outcome.verdict(),
            score,
            limit,
            "underwriting complete"
        );
        ctx.decision = Some(outcome.clone());
        Ok(present(ctx, &outcome, stage))
    }

    fn document_check(&self, message: &str, ctx: &mut Context) -> Reply {
        let stage = ctx.stage();
        let Some(mut decision) = ctx.decision.clone() else {
            return Reply::new("There's no application waiting for documents.", stage)
                .with_error("decision missing");
        };

        let income = extract::extract_income(message)
            .or_else(|| extract::extract_amount(message))
            .or_else(|| {
                extract::mentions_document_upload(message)
                    .then(|| ctx.applicant.as_ref().map(|a| a.monthly_income))
                    .flatten()
            });
        let Some(income) = income else {
            return Reply::new(
                "To complete your application, please share your monthly take-home salary or \
                 upload your latest salary slip.",
                stage,
            )
            .with_options(["I've uploaded my salary slip"]);
        };

        if let Err(e) = self.policy.review_income(&mut decision, income) {
            return Reply::new(e.user_message(), stage).with_error(e.to_string());
        }
        debug!(conversation = %ctx.id, income, approved = decision.approved, "income reviewed");
        ctx.decision = Some(decision.clone());
        present(ctx, &decision, stage)
    }

    fn after_outcome(&self, message: &str, ctx: &Context) -> Reply {
        let stage = ctx.stage();
        if stage == Stage::Done {
            return Reply::new(
                format!(
                    "Your application {} is complete. Thank you for applying with us.",
                    ctx.loan_reference()
                ),
                stage,
            )
            .finished()
            .no_input_needed();
        }
        if extract::is_closing(message) {
            return Reply::new(
                format!(
                    "Thank you for applying with us. Your reference number is {}.",
                    ctx.loan_reference()
                ),
                stage,
            )
            .request(Stage::Done, TransitionKind::Forward)
            .finished()
            .no_input_needed();
        }
        match ctx.decision.as_ref() {
            Some(decision) => {
                let mut reply = present(ctx, decision, stage);
                reply.transitions.clear();
                reply
            }
            None => Reply::new("Your application is being finalized.", stage).finished(),
        }
    }
}

fn repayment_lines(decision: &DecisionOutcome) -> String {
    format!(
        "EMI: ₹{} per month for {} months at {}% p.a.\nProcessing fee: ₹{}\nTotal repayment: ₹{} (interest ₹{})",
        format_rupees(decision.emi),
        decision.tenure_months,
        decision.interest_rate,
        format_rupees(decision.processing_fee),
        format_rupees(decision.total_repayment),
        format_rupees(decision.total_interest)
    )
}

/// Describe an outcome and request the stage it leads to
fn present(ctx: &Context, decision: &DecisionOutcome, stage: Stage) -> Reply {
    let amount = format_rupees(decision.amount);
    let mut reply = match decision.verdict() {
        Verdict::Approved => {
            let greeting = match ctx.first_name() {
                Some(name) => format!("Congratulations, {}!", name),
                None => "Congratulations!".to_string(),
            };
            Reply::new(
                format!(
                    "{} Your loan of ₹{} is approved.\n{}\nReference: {}",
                    greeting,
                    amount,
                    repayment_lines(decision),
                    ctx.loan_reference()
                ),
                stage,
            )
            .with_options(["Thanks, that's all"])
            .finished()
        }
        Verdict::NeedsIncomeProof => Reply::new(
            format!(
                "{}. Your estimated EMI would be ₹{}. Please share your monthly take-home \
                 salary or upload your latest salary slip.",
                decision.reason,
                format_rupees(decision.emi)
            ),
            stage,
        )
        .with_options(["I've uploaded my salary slip"]),
        Verdict::Rejected => {
            let mut text = format!(
                "I'm sorry, we can't approve ₹{} right now. {}.",
                amount, decision.reason
            );
            if let Some(suggested) = decision.suggested_amount {
                text.push_str(&format!(
                    " You may be eligible for up to ₹{}.",
                    format_rupees(suggested)
                ));
            }
            text.push_str(&format!("\nReference: {}", ctx.loan_reference()));
            Reply::new(text, stage).finished()
        }
    };

    let target = if decision.is_final() {
        Stage::Outcome
    } else {
        Stage::DocumentCheck
    };
    if stage < Stage::Decisioning {
        reply = reply.request(Stage::Decisioning, TransitionKind::Forward);
    }
    if stage < target {
        reply = reply.request(target, TransitionKind::Forward);
    }
    reply
}

#[async_trait::async_trait]
impl Responder for DecisioningResponder {
    fn kind(&self) -> ResponderKind {
        ResponderKind::Decisioning
    }

    async fn process(&self, message: &str, ctx: &mut Context) -> Result<Reply> {
        match ctx.stage() {
            Stage::Outcome | Stage::Done => Ok(self.after_outcome(message, ctx)),
            Stage::DocumentCheck => Ok(self.document_check(message, ctx)),
            _ => self.decide(ctx).await,
        }
    }
}
