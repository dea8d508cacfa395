//! Concurrent credit, pre-approval and risk sub-tasks for the fan-out
//! pattern. Each sub-task is bounded by a timeout; a failed one leaves its
//! context field unset.

use serde::Serialize;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, warn};

use crate::conversation::Context;
use crate::error::{LoanflowError, Result};
use crate::services::{CreditLookup, Offer};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum FanOutTask {
    CreditScore,
    PreApproval,
    RiskScore,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum RiskBand {
    Low,
    Medium,
    High,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct RiskAssessment {
    pub score: f64,
    pub band: RiskBand,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub loan_to_annual_income: Option<f64>,
}

/// Risk from the credit score, adjusted by loan size against annual income
pub fn assess_risk(credit_score: Option<u32>, loan_to_annual_income: Option<f64>) -> RiskAssessment {
    let base: f64 = match credit_score {
        Some(s) if s > 750 => 0.1,
        Some(s) if s > 700 => 0.3,
        Some(_) => 0.7,
        None => 0.5,
    };
    let adjustment = match loan_to_annual_income {
        Some(r) if r > 1.0 => 0.2,
        Some(r) if r > 0.5 => 0.1,
        _ => 0.0,
    };
    let score: f64 = (base + adjustment).min(1.0);
    let band = if score < 0.3 {
        RiskBand::Low
    } else if score < 0.6 {
        RiskBand::Medium
    } else {
        RiskBand::High
    };
    RiskAssessment {
        score,
        band,
        loan_to_annual_income,
    }
}

/// Requested amount over declared annual income, when both are known
pub fn loan_to_income(ctx: &Context) -> Option<f64> {
    let amount = ctx.loan.as_ref().map(|l| l.amount())?;
    let monthly = ctx.applicant.as_ref().map(|a| a.monthly_income)?;
    (monthly > 0.0).then(|| amount / (monthly * 12.0))
}

#[derive(Debug, Clone, PartialEq)]
pub struct FanOutResults {
    pub credit_score: Option<u32>,
    pub offer: Option<Offer>,
    /// Set only when risk scoring was planned
    pub risk: Option<RiskAssessment>,
    /// Planned sub-tasks that failed or timed out
    pub failed: Vec<FanOutTask>,
}

async fn bounded<T, F>(task: FanOutTask, service: &str, limit: Duration, fut: F) -> Result<T>
where
    F: Future<Output = Result<T>>,
{
    match tokio::time::timeout(limit, fut).await {
        Ok(result) => result,
        Err(_) => {
            debug!(?task, "fan-out task timed out");
            Err(LoanflowError::LookupTimeout {
                service: service.to_string(),
                duration: limit,
            })
        }
    }
}

/// Run the planned sub-tasks concurrently. Tasks not in `tasks` are skipped;
/// values already on the context are reused instead of fetched.
pub async fn gather(
    credit: &Arc<dyn CreditLookup>,
    ctx: &Context,
    tasks: &[FanOutTask],
    limit: Duration,
) -> FanOutResults {
    let planned = |task: FanOutTask| tasks.contains(&task);
    let applicant_id = ctx.phone.clone();
    let known_score = ctx.credit_score;
    let known_offer = match (ctx.pre_approved_limit, ctx.offered_rate) {
        (Some(limit), Some(rate)) => Some(Offer { limit, rate }),
        _ => None,
    };

    let score_task = async {
        if known_score.is_some() || !planned(FanOutTask::CreditScore) {
            return Ok(known_score);
        }
        match applicant_id.as_deref() {
            Some(id) => bounded(FanOutTask::CreditScore, credit.name(), limit, credit.score(id))
                .await
                .map(Some),
            None => Ok(None),
        }
    };
    let offer_task = async {
        if known_offer.is_some() || !planned(FanOutTask::PreApproval) {
            return Ok(known_offer);
        }
        match applicant_id.as_deref() {
            Some(id) => bounded(FanOutTask::PreApproval, credit.name(), limit, credit.offer(id))
                .await
                .map(Some),
            None => Ok(None),
        }
    };

    let (score, offer) = tokio::join!(score_task, offer_task);

    let mut failed = Vec::new();
    let credit_score = score.unwrap_or_else(|e: LoanflowError| {
        warn!(conversation = %ctx.id, error = %e, "credit score sub-task failed");
        failed.push(FanOutTask::CreditScore);
        None
    });
    let offer = offer.unwrap_or_else(|e: LoanflowError| {
        warn!(conversation = %ctx.id, error = %e, "pre-approval sub-task failed");
        failed.push(FanOutTask::PreApproval);
        None
    });
    // Risk depends on the gathered score, so it runs after the lookups join
    let risk = planned(FanOutTask::RiskScore).then(|| assess_risk(credit_score, loan_to_income(ctx)));

    FanOutResults {
        credit_score,
        offer,
        risk,
        failed,
    }
}

impl FanOutResults {
    /// Write gathered values into the context, leaving failed fields unset
    pub fn apply(&self, ctx: &mut Context) {
        if let Some(score) = self.credit_score {
            ctx.credit_score = Some(score);
        }
        if let Some(offer) = self.offer {
            ctx.pre_approved_limit = Some(offer.limit);
            ctx.offered_rate = Some(offer.rate);
        }
        if let Some(value) = self.risk.as_ref().and_then(|r| serde_json::to_value(r).ok()) {
            ctx.set_extra("risk_assessment", value);
        }
    }
}
