//! Capability matrix and message capability inference

use serde::Serialize;
use std::fmt;

use crate::conversation::Stage;
use crate::responder::extract::{self, words};
use crate::responder::ResponderKind;

/// Bonus for the responder that owns the current stage
pub const STAGE_AFFINITY: f64 = 0.4;
const MATRIX_WEIGHT: f64 = 0.6;

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Capability {
    Engagement,
    Technical,
    Negotiation,
    Verification,
    Risk,
    Emotional,
}

impl Capability {
    pub const ALL: [Capability; 6] = [
        Capability::Engagement,
        Capability::Technical,
        Capability::Negotiation,
        Capability::Verification,
        Capability::Risk,
        Capability::Emotional,
    ];

    fn index(self) -> usize {
        match self {
            Capability::Engagement => 0,
            Capability::Technical => 1,
            Capability::Negotiation => 2,
            Capability::Verification => 3,
            Capability::Risk => 4,
            Capability::Emotional => 5,
        }
    }

    fn keywords(self) -> &'static [&'static str] {
        match self {
            Capability::Engagement => &["hi", "hello", "hey", "interested", "want", "need", "looking", "apply"],
            Capability::Technical => &["emi", "interest", "rate", "tenure", "calculate", "percent", "fee", "terms", "months"],
            Capability::Negotiation => &["negotiate", "discount", "lower", "better", "reduce", "deal", "cheaper"],
            Capability::Verification => &["verify", "phone", "mobile", "pan", "aadhaar", "kyc", "identity", "otp", "yes"],
            Capability::Risk => &["credit", "score", "eligible", "eligibility", "approve", "approval", "limit", "salary", "income"],
            Capability::Emotional => &["worried", "confused", "stressed", "anxious", "please", "scared", "frustrated", "help"],
        }
    }
}

impl fmt::Display for Capability {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Capability::Engagement => "engagement",
            Capability::Technical => "technical",
            Capability::Negotiation => "negotiation",
            Capability::Verification => "verification",
            Capability::Risk => "risk",
            Capability::Emotional => "emotional",
        })
    }
}

const MATRIX: [[f64; 6]; 3] = [
    // engagement, technical, negotiation, verification, risk, emotional
    [0.9, 0.5, 0.8, 0.3, 0.4, 0.7],
    [0.6, 0.8, 0.4, 0.9, 0.7, 0.5],
    [0.5, 0.8, 0.7, 0.6, 0.9, 0.4],
];

pub fn strength(kind: ResponderKind, capability: Capability) -> f64 {
    MATRIX[kind.index()][capability.index()]
}

/// Capabilities a message calls for. Messages with no signal are treated
/// as plain engagement.
pub fn infer(message: &str) -> Vec<Capability> {
    let tokens: Vec<String> = words(message).collect();
    let mut found: Vec<Capability> = Capability::ALL
        .into_iter()
        .filter(|cap| cap.keywords().iter().any(|k| tokens.iter().any(|t| t == k)))
        .collect();

    if extract::extract_phone(message).is_some() && !found.contains(&Capability::Verification) {
        found.push(Capability::Verification);
    }
    if found.is_empty() {
        found.push(Capability::Engagement);
    }
    found.sort();
    found
}

/// Matrix overlap with the inferred capabilities plus stage affinity,
/// clamped to [0, 1]
pub fn score(kind: ResponderKind, required: &[Capability], stage: Stage) -> f64 {
    let overlap = if required.is_empty() {
        0.0
    } else {
        required.iter().map(|c| strength(kind, *c)).sum::<f64>() / required.len() as f64
    };
    let affinity = if ResponderKind::canonical_for(stage) == kind {
        STAGE_AFFINITY
    } else {
        0.0
    };
    (MATRIX_WEIGHT * overlap + affinity).clamp(0.0, 1.0)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn infers_from_keywords_and_phone() {
        assert_eq!(
            infer("what is the emi and my credit score?"),
            vec![Capability::Technical, Capability::Risk]
        );
        assert_eq!(infer("9876543210"), vec![Capability::Verification]);
        assert_eq!(infer("ok"), vec![Capability::Engagement]);
    }

    #[test]
    fn verification_favours_identity_responder() {
        let caps = infer("please verify my mobile");
        let identity = score(ResponderKind::Identity, &caps, Stage::Requirements);
        let decisioning = score(ResponderKind::Decisioning, &caps, Stage::Requirements);
        assert!(identity > decisioning);
    }

    #[test]
    fn stage_owner_gets_affinity_and_scores_are_clamped() {
        let caps = [Capability::Risk];
        let owner = score(ResponderKind::Decisioning, &caps, Stage::Decisioning);
        assert!((owner - (0.6 * 0.9 + 0.4)).abs() < 1e-9);
        assert!(owner <= 1.0);
        let other = score(ResponderKind::Decisioning, &caps, Stage::Identity);
        assert!((other - 0.6 * 0.9).abs() < 1e-9);
    }
}
