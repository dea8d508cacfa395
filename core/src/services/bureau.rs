//! Synthetic identity and credit bureau
//!
//! A fixed directory of demo applicants. Scores are pseudo-random but
//! seeded from each applicant's PAN, so the same applicant always gets the
//! same score and offer.

use rand::distributions::{Distribution, WeightedIndex};
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use tracing::debug;

use super::{CreditLookup, IdentityLookup, Offer, Verification};
use crate::conversation::ApplicantProfile;
use crate::error::Result;
use crate::responder::extract::normalize_phone;

const UNKNOWN_SCORE: u32 = 600;
const DEFAULT_OFFER: Offer = Offer {
    limit: 50_000.0,
    rate: 15.0,
};
const MIN_LIMIT: f64 = 50_000.0;
const MAX_LIMIT: f64 = 2_000_000.0;
/// Excellent, good, fair, poor
const TIER_WEIGHTS: [u32; 4] = [25, 45, 20, 10];

const DIRECTORY: [(&str, &str, &str, &str, f64); 10] = [
    ("Rajesh Kumar", "9876543210", "123 MG Road, Bangalore, Karnataka 560001", "ABCDE1234F", 75_000.0),
    ("Priya Sharma", "9876543211", "456 CP Plaza, Delhi 110001", "FGHIJ5678K", 45_000.0),
    ("Amit Patel", "9876543212", "789 FC Road, Pune, Maharashtra 411004", "KLMNO9012P", 95_000.0),
    ("Sneha Reddy", "9876543213", "321 Jubilee Hills, Hyderabad, Telangana 500033", "QRSTU3456V", 35_000.0),
    ("Vikash Singh", "9876543214", "654 Sector 15, Gurgaon, Haryana 122001", "WXYZ7890A", 120_000.0),
    ("Kavya Nair", "9876543215", "987 Marine Drive, Mumbai, Maharashtra 400002", "BCDEF1234G", 55_000.0),
    ("Rohit Agarwal", "9876543216", "147 Park Street, Kolkata, West Bengal 700016", "HIJKL5678M", 68_000.0),
    ("Deepika Rao", "9876543217", "258 Residency Road, Bangalore, Karnataka 560025", "NOPQR9012S", 82_000.0),
    ("Arjun Mehta", "9876543218", "369 Linking Road, Mumbai, Maharashtra 400050", "TUVWX3456Y", 110_000.0),
    ("Ananya Joshi", "9876543219", "741 Koramangala, Bangalore, Karnataka 560034", "ZABCD7890E", 40_000.0),
];

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ScoreBand {
    Excellent,
    Good,
    Fair,
    Poor,
}

impl ScoreBand {
    pub fn of(score: u32) -> Self {
        match score {
            s if s >= 750 => ScoreBand::Excellent,
            700..=749 => ScoreBand::Good,
            650..=699 => ScoreBand::Fair,
            _ => ScoreBand::Poor,
        }
    }

    pub fn rate(self) -> f64 {
        match self {
            ScoreBand::Excellent => 10.5,
            ScoreBand::Good => 12.0,
            ScoreBand::Fair => 14.5,
            ScoreBand::Poor => 18.0,
        }
    }

    /// Salary multiple range used for the pre-approved limit
    fn multiplier_range(self) -> (f64, f64) {
        match self {
            ScoreBand::Excellent => (6.0, 8.0),
            ScoreBand::Good => (4.0, 6.0),
            ScoreBand::Fair => (3.0, 4.0),
            ScoreBand::Poor => (2.0, 3.0),
        }
    }
}

#[derive(Debug, Clone)]
pub struct SyntheticBureau {
    applicants: Vec<ApplicantProfile>,
}

impl Default for SyntheticBureau {
    fn default() -> Self {
        Self::new()
    }
}

impl SyntheticBureau {
    /// Bureau seeded with the ten demo applicants
    pub fn new() -> Self {
        let applicants = DIRECTORY
            .iter()
            .map(|(name, phone, address, pan, income)| ApplicantProfile {
                name: name.to_string(),
                phone: phone.to_string(),
                address: address.to_string(),
                pan: pan.to_string(),
                monthly_income: *income,
            })
            .collect();
        Self { applicants }
    }

    pub fn with_applicants(applicants: Vec<ApplicantProfile>) -> Self {
        Self { applicants }
    }

    pub fn applicants(&self) -> &[ApplicantProfile] {
        &self.applicants
    }

    fn find(&self, phone: &str) -> Option<&ApplicantProfile> {
        let phone = normalize_phone(phone)?;
        self.applicants.iter().find(|a| a.phone == phone)
    }

    fn seed(pan: &str) -> u64 {
        pan.chars().map(|c| c as u64).sum()
    }

    pub fn score_for(profile: &ApplicantProfile) -> u32 {
        let mut rng = StdRng::seed_from_u64(Self::seed(&profile.pan));
        let tier = match WeightedIndex::new(TIER_WEIGHTS) {
            Ok(dist) => dist.sample(&mut rng),
            Err(_) => 1,
        };
        match tier {
            0 => rng.gen_range(750..=850),
            1 => rng.gen_range(700..=749),
            2 => rng.gen_range(650..=699),
            _ => rng.gen_range(550..=649),
        }
    }

    pub fn offer_for(profile: &ApplicantProfile) -> Offer {
        let band = ScoreBand::of(Self::score_for(profile));
        let (low, high) = band.multiplier_range();
        let mut rng = StdRng::seed_from_u64(Self::seed(&profile.pan).wrapping_mul(31));
        let multiplier = rng.gen_range(low..high);

        let raw = (profile.monthly_income * multiplier).clamp(MIN_LIMIT, MAX_LIMIT);
        Offer {
            limit: (raw / 10_000.0).round() * 10_000.0,
            rate: band.rate(),
        }
    }
}

#[async_trait::async_trait]
impl IdentityLookup for SyntheticBureau {
    fn name(&self) -> &'static str {
        "synthetic-identity"
    }

    async fn verify(&self, phone: &str) -> Result<Verification> {
        let profile = self.find(phone).cloned();
        debug!(phone, found = profile.is_some(), "identity lookup");
        Ok(Verification {
            verified: profile.is_some(),
            profile,
        })
    }
}

#[async_trait::async_trait]
impl CreditLookup for SyntheticBureau {
    fn name(&self) -> &'static str {
        "synthetic-credit"
    }

    async fn score(&self, applicant_id: &str) -> Result<u32> {
        Ok(self
            .find(applicant_id)
            .map(Self::score_for)
            .unwrap_or(UNKNOWN_SCORE))
    }

    async fn offer(&self, applicant_id: &str) -> Result<Offer> {
        Ok(self
            .find(applicant_id)
            .map(Self::offer_for)
            .unwrap_or(DEFAULT_OFFER))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn verifies_known_numbers_only() {
        let bureau = SyntheticBureau::new();
        let known = bureau.verify("+91 9876543210").await.unwrap();
        assert!(known.verified);
        assert_eq!(known.profile.unwrap().name, "Rajesh Kumar");

        let unknown = bureau.verify("9000000000").await.unwrap();
        assert!(!unknown.verified);
        assert!(unknown.profile.is_none());
    }

    #[tokio::test]
    async fn scores_are_deterministic_and_in_range() {
        let bureau = SyntheticBureau::new();
        for applicant in bureau.applicants() {
            let first = bureau.score(&applicant.phone).await.unwrap();
            let second = bureau.score(&applicant.phone).await.unwrap();
            assert_eq!(first, second);
            assert!((550..=850).contains(&first));
        }
    }

    #[tokio::test]
    async fn offers_are_clamped_and_rounded() {
        let bureau = SyntheticBureau::new();
        for applicant in bureau.applicants() {
            let offer = bureau.offer(&applicant.phone).await.unwrap();
            assert!(offer.limit >= MIN_LIMIT && offer.limit <= MAX_LIMIT);
            assert_eq!(offer.limit % 10_000.0, 0.0);
            let band = ScoreBand::of(SyntheticBureau::score_for(applicant));
            assert_eq!(offer.rate, band.rate());
        }
    }

    #[tokio::test]
    async fn unknown_applicants_get_defaults() {
        let bureau = SyntheticBureau::new();
        assert_eq!(bureau.score("9000000000").await.unwrap(), UNKNOWN_SCORE);
        assert_eq!(bureau.offer("9000000000").await.unwrap(), DEFAULT_OFFER);
    }

    #[test]
    fn bands_cover_boundaries() {
        assert_eq!(ScoreBand::of(750), ScoreBand::Excellent);
        assert_eq!(ScoreBand::of(749), ScoreBand::Good);
        assert_eq!(ScoreBand::of(650), ScoreBand::Fair);
        assert_eq!(ScoreBand::of(649), ScoreBand::Poor);
    }
}
