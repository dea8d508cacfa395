use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::{BTreeMap, BTreeSet};

use super::loan::{LoanDraft, LoanRequest};
use super::stage::Stage;
use crate::responder::ResponderKind;
use crate::underwriting::DecisionOutcome;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Sender {
    User,
    Assistant,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Message {
    pub sender: Sender,
    pub text: String,
    pub at: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub responder: Option<ResponderKind>,
}

/// Applicant record returned by the identity lookup
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ApplicantProfile {
    pub name: String,
    pub phone: String,
    pub address: String,
    pub pan: String,
    /// Declared monthly take-home salary
    pub monthly_income: f64,
}

/// Derived escalation triggers. They never change the stage.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EscalationFlag {
    Frustration,
    RepeatedTransitions,
    LongRunning,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Metadata {
    pub created_at: DateTime<Utc>,
    pub last_activity: DateTime<Utc>,
    pub transition_count: u32,
    pub transitions_since_reset: u32,
    #[serde(default, skip_serializing_if = "BTreeSet::is_empty")]
    pub escalation: BTreeSet<EscalationFlag>,
    #[serde(default)]
    pub abandoned: bool,
    /// Intent scores, routing and pattern details, risk assessment
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub extra: BTreeMap<String, Value>,
}

impl Metadata {
    fn new(now: DateTime<Utc>) -> Self {
        Self {
            created_at: now,
            last_activity: now,
            transition_count: 0,
            transitions_since_reset: 0,
            escalation: BTreeSet::new(),
            abandoned: false,
            extra: BTreeMap::new(),
        }
    }
}

/// Per-conversation aggregate
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Context {
    pub id: String,
    stage: Stage,
    #[serde(default)]
    pub draft: LoanDraft,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub loan: Option<LoanRequest>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub phone: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub applicant: Option<ApplicantProfile>,
    #[serde(default)]
    pub identity_verified: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub credit_score: Option<u32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub pre_approved_limit: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub offered_rate: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub decision: Option<DecisionOutcome>,
    #[serde(default)]
    pub history: Vec<Message>,
    pub metadata: Metadata,
}

impl Context {
    pub fn new(id: impl Into<String>, now: DateTime<Utc>) -> Self {
        Self {
            id: id.into(),
            stage: Stage::Greeting,
            draft: LoanDraft::default(),
            loan: None,
            phone: None,
            applicant: None,
            identity_verified: false,
            credit_score: None,
            pre_approved_limit: None,
            offered_rate: None,
            decision: None,
            history: Vec::new(),
            metadata: Metadata::new(now),
        }
    }

    pub fn stage(&self) -> Stage {
        self.stage
    }

    /// Only the state manager moves a conversation between stages
    pub(crate) fn set_stage(&mut self, stage: Stage) {
        self.stage = stage;
    }

    pub fn push_user(&mut self, text: impl Into<String>, at: DateTime<Utc>) {
        self.history.push(Message {
            sender: Sender::User,
            text: text.into(),
            at,
            responder: None,
        });
    }

    pub fn push_assistant(
        &mut self,
        text: impl Into<String>,
        responder: Option<ResponderKind>,
        at: DateTime<Utc>,
    ) {
        self.history.push(Message {
            sender: Sender::Assistant,
            text: text.into(),
            at,
            responder,
        });
    }

    pub fn user_message_count(&self) -> usize {
        self.history
            .iter()
            .filter(|m| m.sender == Sender::User)
            .count()
    }

    /// The `n` most recent user messages, newest first
    pub fn recent_user_messages(&self, n: usize) -> impl Iterator<Item = &str> {
        self.history
            .iter()
            .rev()
            .filter(|m| m.sender == Sender::User)
            .take(n)
            .map(|m| m.text.as_str())
    }

    pub fn is_escalated(&self) -> bool {
        !self.metadata.escalation.is_empty()
    }

    pub fn set_extra(&mut self, key: impl Into<String>, value: Value) {
        self.metadata.extra.insert(key.into(), value);
    }

    /// Loan account reference shown to the applicant
    pub fn loan_reference(&self) -> String {
        let short: String = self
            .id
            .chars()
            .filter(|c| c.is_ascii_alphanumeric())
            .take(8)
            .collect();
        format!("QL{}", short.to_uppercase())
    }

    /// Name to address the applicant with, once known
    pub fn first_name(&self) -> Option<&str> {
        self.applicant
            .as_ref()
            .and_then(|a| a.name.split_whitespace().next())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn counts_only_user_messages() {
        let mut ctx = Context::new("c-1", Utc::now());
        ctx.push_user("hi", Utc::now());
        ctx.push_assistant("hello", Some(ResponderKind::Requirements), Utc::now());
        ctx.push_user("9876543210", Utc::now());
        assert_eq!(ctx.user_message_count(), 2);
        let recent: Vec<_> = ctx.recent_user_messages(5).collect();
        assert_eq!(recent, vec!["9876543210", "hi"]);
    }

    #[test]
    fn loan_reference_uses_first_eight_alphanumerics() {
        let ctx = Context::new("3f2a-9bc1-77de-0000", Utc::now());
        assert_eq!(ctx.loan_reference(), "QL3F2A9BC1");
    }

    #[test]
    fn json_round_trip_preserves_private_stage() {
        let mut ctx = Context::new("c-2", Utc::now());
        ctx.set_stage(Stage::Identity);
        ctx.set_extra("intent", serde_json::json!({"apply": 0.5}));
        let json = serde_json::to_string(&ctx).unwrap();
        let back: Context = serde_json::from_str(&json).unwrap();
        assert_eq!(back, ctx);
        assert_eq!(back.stage(), Stage::Identity);
    }
}
