//! Credit decisioning
//!
//! Pure functions over an [`Application`] and the configured
//! [`UnderwritingPolicy`]. Nothing here performs I/O.
//!
//! Tiers, in order:
//! 1. score below the minimum: reject
//! 2. amount within the pre-approved limit: approve
//! 3. amount within `ceiling_multiplier` times the limit: needs income proof
//! 4. otherwise: reject, citing the ceiling
//!
//! A pending outcome can be settled once with [`UnderwritingPolicy::review_income`].

pub mod emi;

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

use crate::conversation::{LoanPurpose, LoanRequest};
use crate::error::{LoanflowError, Result};

pub use emi::{emi, max_principal, round2};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct UnderwritingPolicy {
    pub min_credit_score: u32,
    /// Multiple of the pre-approved limit that can still be reviewed
    pub ceiling_multiplier: f64,
    /// Largest share of monthly income the EMI may take
    pub income_ratio: f64,
    /// Used when neither the table nor the offer names a rate
    pub base_rate: f64,
    pub processing_fee_pct: f64,
    pub rates: BTreeMap<LoanPurpose, f64>,
}

impl Default for UnderwritingPolicy {
    fn default() -> Self {
        let rates = [
            (LoanPurpose::Personal, 12.63),
            (LoanPurpose::HomeImprovement, 9.2),
            (LoanPurpose::Education, 8.3),
            (LoanPurpose::Medical, 9.0),
            (LoanPurpose::Business, 15.0),
            (LoanPurpose::Wedding, 12.63),
            (LoanPurpose::Travel, 12.63),
            (LoanPurpose::DebtConsolidation, 17.0),
        ]
        .into_iter()
        .collect();
        Self {
            min_credit_score: 700,
            ceiling_multiplier: 2.0,
            income_ratio: 0.5,
            base_rate: 12.0,
            processing_fee_pct: 2.0,
            rates,
        }
    }
}

/// Inputs to one underwriting attempt
#[derive(Debug, Clone, PartialEq)]
pub struct Application {
    pub amount: f64,
    pub tenure_months: u32,
    pub purpose: LoanPurpose,
    pub credit_score: u32,
    pub pre_approved_limit: f64,
    /// Rate from the pre-approved offer, used as the base rate
    pub offered_rate: Option<f64>,
}

impl Application {
    pub fn new(loan: &LoanRequest, credit_score: u32, pre_approved_limit: f64) -> Self {
        Self {
            amount: loan.amount(),
            tenure_months: loan.tenure_months(),
            purpose: loan.purpose(),
            credit_score,
            pre_approved_limit,
            offered_rate: None,
        }
    }

    pub fn with_offered_rate(mut self, rate: Option<f64>) -> Self {
        self.offered_rate = rate;
        self
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Verdict {
    Approved,
    NeedsIncomeProof,
    Rejected,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DecisionOutcome {
    pub approved: bool,
    pub amount: f64,
    pub emi: f64,
    pub interest_rate: f64,
    pub tenure_months: u32,
    pub reason: String,
    pub requires_income_proof: bool,
    pub processing_fee: f64,
    pub total_repayment: f64,
    pub total_interest: f64,
    /// Largest amount that would pass, when one can be computed
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub suggested_amount: Option<f64>,
    /// Set once the income review has run
    #[serde(default)]
    pub income_reviewed: bool,
}

impl DecisionOutcome {
    pub fn verdict(&self) -> Verdict {
        if self.approved {
            Verdict::Approved
        } else if self.requires_income_proof {
            Verdict::NeedsIncomeProof
        } else {
            Verdict::Rejected
        }
    }

    /// Approved or rejected, not waiting on documents
    pub fn is_final(&self) -> bool {
        !self.requires_income_proof
    }
}

impl UnderwritingPolicy {
    pub fn rate_for(&self, purpose: LoanPurpose, offered_rate: Option<f64>) -> f64 {
        self.rates
            .get(&purpose)
            .copied()
            .or(offered_rate)
            .unwrap_or(self.base_rate)
    }

    pub fn ceiling(&self, pre_approved_limit: f64) -> f64 {
        pre_approved_limit * self.ceiling_multiplier
    }

    pub fn evaluate(&self, app: &Application) -> DecisionOutcome {
        if app.credit_score < self.min_credit_score {
            return DecisionOutcome {
                approved: false,
                amount: app.amount,
                emi: 0.0,
                interest_rate: 0.0,
                tenure_months: app.tenure_months,
                reason: format!(
                    "Credit score {} is below minimum score of {}",
                    app.credit_score, self.min_credit_score
                ),
                requires_income_proof: false,
                processing_fee: 0.0,
                total_repayment: 0.0,
                total_interest: 0.0,
                suggested_amount: None,
                income_reviewed: false,
            };
        }

        let rate = self.rate_for(app.purpose, app.offered_rate);
        let installment = round2(emi(app.amount, rate, app.tenure_months));
        let ceiling = self.ceiling(app.pre_approved_limit);
        let mut outcome = self.priced(app.amount, installment, rate, app.tenure_months);

        if app.amount <= app.pre_approved_limit {
            outcome.approved = true;
            outcome.reason = format!(
                "Amount is within your pre-approved limit of ₹{}",
                format_rupees(app.pre_approved_limit)
            );
        } else if app.amount <= ceiling {
            outcome.requires_income_proof = true;
            outcome.reason = format!(
                "Amount exceeds your pre-approved limit of ₹{}; income proof is required",
                format_rupees(app.pre_approved_limit)
            );
        } else {
            outcome.reason = format!(
                "Amount exceeds the maximum eligible amount of ₹{} ({}x your pre-approved limit)",
                format_rupees(ceiling),
                self.ceiling_multiplier
            );
            outcome.suggested_amount = Some(ceiling);
        }
        outcome
    }

    /// Settle a pending outcome against a verified monthly income
    pub fn review_income(&self, outcome: &mut DecisionOutcome, monthly_income: f64) -> Result<()> {
        if outcome.income_reviewed {
            return Err(LoanflowError::validation(
                "Income has already been reviewed for this application.",
            ));
        }
        if !outcome.requires_income_proof {
            return Err(LoanflowError::validation(
                "This application is not waiting for income proof.",
            ));
        }
        if !monthly_income.is_finite() || monthly_income <= 0.0 {
            return Err(LoanflowError::validation(
                "Monthly income must be a positive amount.",
            ));
        }

        let allowance = self.income_ratio * monthly_income;
        outcome.requires_income_proof = false;
        outcome.income_reviewed = true;

        if outcome.emi <= allowance {
            outcome.approved = true;
            outcome.reason = format!(
                "EMI of ₹{} is within {}% of your monthly income of ₹{}",
                format_rupees(outcome.emi),
                (self.income_ratio * 100.0).round(),
                format_rupees(monthly_income)
            );
        } else {
            let suggestion = max_principal(allowance, outcome.interest_rate, outcome.tenure_months).floor();
            outcome.approved = false;
            outcome.suggested_amount = Some(suggestion);
            outcome.reason = format!(
                "EMI of ₹{} exceeds {}% of your monthly income of ₹{}; you are eligible for up to ₹{}",
                format_rupees(outcome.emi),
                (self.income_ratio * 100.0).round(),
                format_rupees(monthly_income),
                format_rupees(suggestion)
            );
        }
        Ok(())
    }

    fn priced(&self, amount: f64, installment: f64, rate: f64, tenure_months: u32) -> DecisionOutcome {
        let total_repayment = round2(installment * tenure_months as f64);
        DecisionOutcome {
            approved: false,
            amount,
            emi: installment,
            interest_rate: rate,
            tenure_months,
            reason: String::new(),
            requires_income_proof: false,
            processing_fee: round2(amount * self.processing_fee_pct / 100.0),
            total_repayment,
            total_interest: round2(total_repayment - amount),
            suggested_amount: None,
            income_reviewed: false,
        }
    }

    pub fn validate(&self) -> std::result::Result<(), String> {
        if self.min_credit_score == 0 {
            return Err("underwriting.min_credit_score must be greater than 0".to_string());
        }
        if self.ceiling_multiplier < 1.0 {
            return Err("underwriting.ceiling_multiplier must be at least 1.0".to_string());
        }
        if self.income_ratio <= 0.0 || self.income_ratio > 1.0 {
            return Err("underwriting.income_ratio must be in (0.0, 1.0]".to_string());
        }
        if !(0.0..100.0).contains(&self.base_rate) {
            return Err("underwriting.base_rate must be between 0 and 100".to_string());
        }
        if !(0.0..100.0).contains(&self.processing_fee_pct) {
            return Err("underwriting.processing_fee_pct must be between 0 and 100".to_string());
        }
        if let Some((purpose, _)) = self.rates.iter().find(|(_, r)| !(0.0..100.0).contains(*r)) {
            return Err(format!("underwriting.rates.{:?} must be between 0 and 100", purpose));
        }
        Ok(())
    }
}

/// Whole rupees with Indian digit grouping: 5,00,000
pub fn format_rupees(value: f64) -> String {
    let rounded = value.round();
    let negative = rounded < 0.0;
    let digits = format!("{}", rounded.abs() as u64);

    let grouped = if digits.len() <= 3 {
        digits
    } else {
        let (head, tail) = digits.split_at(digits.len() - 3);
        let mut parts: Vec<&str> = Vec::new();
        let mut end = head.len();
        while end > 2 {
            parts.push(&head[end - 2..end]);
            end -= 2;
        }
        parts.push(&head[..end]);
        parts.reverse();
        format!("{},{}", parts.join(","), tail)
    };

    if negative {
        format!("-{}", grouped)
    } else {
        grouped
    }
}
