//! Message complexity, urgency, engagement and intent heuristics

use lazy_static::lazy_static;
use regex::Regex;
use serde::Serialize;
use std::collections::BTreeMap;

use crate::conversation::Context;
use crate::responder::extract::{self, words};

const TECHNICAL_TERMS: &[&str] = &[
    "emi", "interest", "apr", "principal", "tenure", "processing", "foreclosure", "prepayment",
    "collateral", "amortization", "cibil", "amortisation", "compounding", "moratorium",
];

const URGENCY_WORDS: &[&str] = &[
    "urgent", "urgently", "asap", "immediately", "emergency", "quickly", "fast", "hurry", "today",
    "now",
];

const INTENTS: &[(&str, &[&str])] = &[
    ("apply", &["loan", "need", "want", "borrow", "apply", "lakh", "amount"]),
    ("rates", &["rate", "rates", "interest", "emi", "cost", "fee", "charges"]),
    ("verification", &["verify", "phone", "mobile", "pan", "aadhaar", "identity", "kyc"]),
    ("status", &["status", "approved", "decision", "result", "eligible"]),
    ("support", &["help", "problem", "issue", "confused", "complaint", "human"]),
];

/// Words per message at which engagement saturates
const ENGAGED_WORDS: f64 = 8.0;
/// Number of recent user messages averaged for engagement
const ENGAGEMENT_WINDOW: usize = 3;

lazy_static! {
    static ref DEADLINE: Regex = Regex::new(
        r"(?i)\b(?:by (?:tomorrow|today|tonight|monday|tuesday|wednesday|thursday|friday|saturday|sunday|end of)|within \d+ (?:hours?|days?)|deadline|before the)\b"
    )
    .unwrap();
}

/// Per-message signals used to override the stage's default pattern
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct ComplexitySignals {
    pub linguistic: f64,
    pub urgency: f64,
    pub engagement: f64,
}

impl ComplexitySignals {
    pub fn measure(message: &str, ctx: &Context) -> Self {
        Self {
            linguistic: linguistic_complexity(message),
            urgency: urgency(message),
            engagement: engagement(ctx),
        }
    }
}

/// Distinct loan topics a message touches
fn topic_count(message: &str) -> usize {
    [
        extract::extract_amount(message).is_some(),
        extract::extract_tenure(message).is_some(),
        extract::extract_purpose(message).is_some(),
        extract::extract_phone(message).is_some()
            || extract::mentions_email(message)
            || extract::mentions_id_document(message),
        extract::wants_to_negotiate(message) || extract::asks_for_range(message),
    ]
    .iter()
    .filter(|hit| **hit)
    .count()
}

pub fn linguistic_complexity(message: &str) -> f64 {
    let length = (message.chars().count() as f64 / 200.0).min(1.0);
    let questions = (message.matches('?').count() as f64 / 3.0).min(1.0);
    let technical = words(message)
        .filter(|w| TECHNICAL_TERMS.contains(&w.as_str()))
        .count();
    let technical = (technical as f64 / 3.0).min(1.0);
    let multi_topic = match topic_count(message) {
        0 | 1 => 0.0,
        2 => 0.5,
        _ => 1.0,
    };
    (length * 0.2 + questions * 0.3 + technical * 0.25 + multi_topic * 0.25).clamp(0.0, 1.0)
}

pub fn urgency(message: &str) -> f64 {
    let hits = words(message)
        .filter(|w| URGENCY_WORDS.contains(&w.as_str()))
        .count();
    let mut score = hits as f64 * 0.2;
    if DEADLINE.is_match(message) {
        score += 0.4;
    }
    score.clamp(0.0, 1.0)
}

/// Average words over the last few user messages; 1.0 before any
pub fn engagement(ctx: &Context) -> f64 {
    let counts: Vec<usize> = ctx
        .recent_user_messages(ENGAGEMENT_WINDOW)
        .map(|m| words(m).count())
        .collect();
    if counts.is_empty() {
        return 1.0;
    }
    let average = counts.iter().sum::<usize>() as f64 / counts.len() as f64;
    (average / ENGAGED_WORDS).clamp(0.0, 1.0)
}

/// Keyword intent distribution, normalized to sum to 1 when any hit
pub fn intent_scores(message: &str) -> BTreeMap<String, f64> {
    let tokens: Vec<String> = words(message).collect();
    let hits: Vec<(&str, usize)> = INTENTS
        .iter()
        .map(|(intent, keys)| {
            let n = tokens.iter().filter(|t| keys.contains(&t.as_str())).count();
            (*intent, n)
        })
        .collect();
    let total: usize = hits.iter().map(|(_, n)| n).sum();
    hits.into_iter()
        .map(|(intent, n)| {
            let score = if total == 0 { 0.0 } else { n as f64 / total as f64 };
            (intent.to_string(), score)
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;

    #[test]
    fn long_technical_questions_are_complex() {
        let message = "Can you explain how the EMI is calculated with the processing fee and \
                       APR? What happens on foreclosure or prepayment? And is the interest \
                       compounding monthly for a 5 lakh education loan over 36 months?";
        assert!(linguistic_complexity(message) >= 0.7, "{}", linguistic_complexity(message));
        assert!(linguistic_complexity("hi") < 0.1);
    }

    #[test]
    fn urgency_counts_words_and_deadlines() {
        assert!((urgency("I need it urgently") - 0.2).abs() < 1e-9);
        assert!(urgency("urgent, need money asap by tomorrow") > 0.7);
        assert_eq!(urgency("hello"), 0.0);
    }

    #[test]
    fn engagement_averages_recent_user_messages() {
        let mut ctx = Context::new("s-1", Utc::now());
        assert_eq!(engagement(&ctx), 1.0);
        ctx.push_user("hi", Utc::now());
        assert!((engagement(&ctx) - 0.125).abs() < 1e-9);
        ctx.push_user("I need a loan for my daughter's college fees", Utc::now());
        assert!(engagement(&ctx) > 0.5);
    }

    #[test]
    fn intents_are_normalized() {
        let scores = intent_scores("what is the interest rate on this loan");
        let total: f64 = scores.values().sum();
        assert!((total - 1.0).abs() < 1e-9);
        assert!(scores["rates"] > scores["apply"]);
        assert!(intent_scores("hmm").values().all(|s| *s == 0.0));
    }
}
