//! Reducing-balance annuity arithmetic

/// Monthly rate from an annual percentage
fn monthly_rate(annual_rate_pct: f64) -> f64 {
    annual_rate_pct / 1200.0
}

/// Equal monthly installment for `principal` at `annual_rate_pct` over
/// `tenure_months`. A zero rate degenerates to straight division.
pub fn emi(principal: f64, annual_rate_pct: f64, tenure_months: u32) -> f64 {
    if tenure_months == 0 {
        return 0.0;
    }
    let n = tenure_months as i32;
    let r = monthly_rate(annual_rate_pct);
    if r == 0.0 {
        return principal / tenure_months as f64;
    }
    let growth = (1.0 + r).powi(n);
    principal * r * growth / (growth - 1.0)
}

/// Inverse of [`emi`]: the principal a given installment services
pub fn max_principal(installment: f64, annual_rate_pct: f64, tenure_months: u32) -> f64 {
    if tenure_months == 0 {
        return 0.0;
    }
    let n = tenure_months as i32;
    let r = monthly_rate(annual_rate_pct);
    if r == 0.0 {
        return installment * tenure_months as f64;
    }
    let growth = (1.0 + r).powi(n);
    installment * (growth - 1.0) / (r * growth)
}

/// Round to paise
pub fn round2(value: f64) -> f64 {
    (value * 100.0).round() / 100.0
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn emi_matches_annuity_formula() {
        let value = emi(500_000.0, 12.5, 60);
        assert!((value - 11_248.97).abs() < 0.01, "emi was {}", value);
    }

    #[test]
    fn inversion_recovers_principal() {
        let installment = emi(500_000.0, 12.5, 60);
        let principal = max_principal(installment, 12.5, 60);
        assert!((principal - 500_000.0).abs() < 0.01);

        let rounded = max_principal(round2(installment), 12.5, 60);
        assert!((rounded - 500_000.0).abs() < 1.0);
    }

    #[test]
    fn zero_rate_is_straight_line() {
        assert_eq!(emi(120_000.0, 0.0, 12), 10_000.0);
        assert_eq!(max_principal(10_000.0, 0.0, 12), 120_000.0);
    }

    #[test]
    fn zero_tenure_is_zero() {
        assert_eq!(emi(100_000.0, 10.0, 0), 0.0);
        assert_eq!(max_principal(1_000.0, 10.0, 0), 0.0);
    }
}
