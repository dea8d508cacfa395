use serde::{Deserialize, Serialize};
use std::fmt;

use crate::error::{LoanflowError, Result};

pub const MIN_AMOUNT: f64 = 10_000.0;
pub const MAX_AMOUNT: f64 = 5_000_000.0;
pub const MIN_TENURE_MONTHS: u32 = 6;
pub const MAX_TENURE_MONTHS: u32 = 84;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LoanPurpose {
    Personal,
    HomeImprovement,
    Education,
    Medical,
    Business,
    Wedding,
    Travel,
    DebtConsolidation,
}

impl LoanPurpose {
    pub const ALL: [LoanPurpose; 8] = [
        LoanPurpose::Personal,
        LoanPurpose::HomeImprovement,
        LoanPurpose::Education,
        LoanPurpose::Medical,
        LoanPurpose::Business,
        LoanPurpose::Wedding,
        LoanPurpose::Travel,
        LoanPurpose::DebtConsolidation,
    ];

    /// 1-based menu selection
    pub fn from_menu(choice: u8) -> Option<Self> {
        match choice {
            1..=8 => Some(Self::ALL[(choice - 1) as usize]),
            _ => None,
        }
    }

    pub fn label(self) -> &'static str {
        match self {
            LoanPurpose::Personal => "Personal",
            LoanPurpose::HomeImprovement => "Home Improvement",
            LoanPurpose::Education => "Education",
            LoanPurpose::Medical => "Medical",
            LoanPurpose::Business => "Business",
            LoanPurpose::Wedding => "Wedding",
            LoanPurpose::Travel => "Travel",
            LoanPurpose::DebtConsolidation => "Debt Consolidation",
        }
    }

    /// Numbered menu lines, in selection order
    pub fn menu() -> Vec<String> {
        Self::ALL
            .iter()
            .enumerate()
            .map(|(i, p)| format!("{}. {}", i + 1, p.label()))
            .collect()
    }
}

impl fmt::Display for LoanPurpose {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.label())
    }
}

pub fn check_amount(amount: f64) -> Result<()> {
    if !amount.is_finite() || !(MIN_AMOUNT..=MAX_AMOUNT).contains(&amount) {
        return Err(LoanflowError::validation(format!(
            "Loan amount must be between ₹{} and ₹{}.",
            crate::underwriting::format_rupees(MIN_AMOUNT),
            crate::underwriting::format_rupees(MAX_AMOUNT)
        )));
    }
    Ok(())
}

pub fn check_tenure(months: u32) -> Result<()> {
    if !(MIN_TENURE_MONTHS..=MAX_TENURE_MONTHS).contains(&months) {
        return Err(LoanflowError::validation(format!(
            "Tenure must be between {} and {} months.",
            MIN_TENURE_MONTHS, MAX_TENURE_MONTHS
        )));
    }
    Ok(())
}

/// A fully captured loan request. Fields are only reachable through
/// validated constructors so a confirmed request is always in bounds.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LoanRequest {
    amount: f64,
    tenure_months: u32,
    purpose: LoanPurpose,
}

impl LoanRequest {
    pub fn new(amount: f64, tenure_months: u32, purpose: LoanPurpose) -> Result<Self> {
        check_amount(amount)?;
        check_tenure(tenure_months)?;
        Ok(Self {
            amount,
            tenure_months,
            purpose,
        })
    }

    pub fn amount(&self) -> f64 {
        self.amount
    }

    pub fn tenure_months(&self) -> u32 {
        self.tenure_months
    }

    pub fn purpose(&self) -> LoanPurpose {
        self.purpose
    }

    /// Re-check bounds; used for requests that came back from storage
    pub fn validate(&self) -> Result<()> {
        check_amount(self.amount)?;
        check_tenure(self.tenure_months)
    }
}

/// Partially collected loan fields. Only in-bounds values are ever stored.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct LoanDraft {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub amount: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tenure_months: Option<u32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub purpose: Option<LoanPurpose>,
}

impl LoanDraft {
    pub fn is_empty(&self) -> bool {
        self.amount.is_none() && self.tenure_months.is_none() && self.purpose.is_none()
    }

    pub fn to_request(&self) -> Option<LoanRequest> {
        match (self.amount, self.tenure_months, self.purpose) {
            (Some(a), Some(t), Some(p)) => LoanRequest::new(a, t, p).ok(),
            _ => None,
        }
    }

    pub fn sync_from(&mut self, loan: &LoanRequest) {
        self.amount = Some(loan.amount);
        self.tenure_months = Some(loan.tenure_months);
        self.purpose = Some(loan.purpose);
    }
}

/// Side-channel correction of an already confirmed loan field
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case", tag = "field", content = "value")]
pub enum Amendment {
    Amount(f64),
    Tenure(u32),
    Purpose(LoanPurpose),
}

impl Amendment {
    pub fn apply(&self, loan: &LoanRequest) -> Result<LoanRequest> {
        match *self {
            Amendment::Amount(amount) => LoanRequest::new(amount, loan.tenure_months, loan.purpose),
            Amendment::Tenure(months) => LoanRequest::new(loan.amount, months, loan.purpose),
            Amendment::Purpose(purpose) => LoanRequest::new(loan.amount, loan.tenure_months, purpose),
        }
    }

    pub fn describe(&self) -> String {
        match self {
            Amendment::Amount(a) => format!("loan amount to ₹{}", crate::underwriting::format_rupees(*a)),
            Amendment::Tenure(m) => format!("tenure to {} months", m),
            Amendment::Purpose(p) => format!("purpose to {}", p),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn request_bounds_are_inclusive() {
        assert!(LoanRequest::new(MIN_AMOUNT, MIN_TENURE_MONTHS, LoanPurpose::Travel).is_ok());
        assert!(LoanRequest::new(MAX_AMOUNT, MAX_TENURE_MONTHS, LoanPurpose::Travel).is_ok());
        assert!(LoanRequest::new(9_999.0, 12, LoanPurpose::Travel).is_err());
        assert!(LoanRequest::new(50_000.0, 85, LoanPurpose::Travel).is_err());
        assert!(LoanRequest::new(f64::NAN, 12, LoanPurpose::Travel).is_err());
    }

    #[test]
    fn draft_completes_only_with_all_fields() {
        let mut draft = LoanDraft {
            amount: Some(200_000.0),
            ..Default::default()
        };
        assert!(draft.to_request().is_none());
        draft.tenure_months = Some(36);
        draft.purpose = Some(LoanPurpose::Education);
        let loan = draft.to_request().expect("complete");
        assert_eq!(loan.tenure_months(), 36);
    }

    #[test]
    fn amendment_keeps_other_fields() {
        let loan = LoanRequest::new(300_000.0, 24, LoanPurpose::Medical).unwrap();
        let amended = Amendment::Tenure(48).apply(&loan).unwrap();
        assert_eq!(amended.amount(), 300_000.0);
        assert_eq!(amended.tenure_months(), 48);
        assert_eq!(amended.purpose(), LoanPurpose::Medical);

        assert!(Amendment::Amount(1_000.0).apply(&loan).is_err());
    }

    #[test]
    fn menu_selection_is_one_based() {
        assert_eq!(LoanPurpose::from_menu(1), Some(LoanPurpose::Personal));
        assert_eq!(LoanPurpose::from_menu(8), Some(LoanPurpose::DebtConsolidation));
        assert_eq!(LoanPurpose::from_menu(0), None);
        assert_eq!(LoanPurpose::from_menu(9), None);
        assert_eq!(LoanPurpose::menu()[1], "2. Home Improvement");
    }
}
