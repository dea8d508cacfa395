//! Test doubles shared by unit tests across modules

use std::sync::Arc;
use std::time::Duration;

use crate::conversation::{Context, Reply};
use crate::error::{LoanflowError, Result};
use crate::responder::{Responder, ResponderKind, ResponderSet};
use crate::services::{ConversationStore, CreditLookup, IdentityLookup, Offer, SyntheticBureau, Verification};
use crate::underwriting::UnderwritingPolicy;

fn lookup_failure(service: &str) -> LoanflowError {
    LoanflowError::Lookup {
        service: service.to_string(),
        message: "service unavailable".to_string(),
    }
}

/// Same score and offer for every applicant
pub struct FixedCredit {
    score: u32,
    offer: Offer,
}

impl FixedCredit {
    pub fn new(score: u32, limit: f64, rate: f64) -> Self {
        Self {
            score,
            offer: Offer { limit, rate },
        }
    }
}

#[async_trait::async_trait]
impl CreditLookup for FixedCredit {
    fn name(&self) -> &'static str {
        "fixed"
    }

    async fn score(&self, _applicant_id: &str) -> Result<u32> {
        Ok(self.score)
    }

    async fn offer(&self, _applicant_id: &str) -> Result<Offer> {
        Ok(self.offer)
    }
}

pub struct FailingCredit;

#[async_trait::async_trait]
impl CreditLookup for FailingCredit {
    fn name(&self) -> &'static str {
        "failing"
    }

    async fn score(&self, _applicant_id: &str) -> Result<u32> {
        Err(lookup_failure(self.name()))
    }

    async fn offer(&self, _applicant_id: &str) -> Result<Offer> {
        Err(lookup_failure(self.name()))
    }
}

/// Answers like the synthetic bureau, after a delay
pub struct SlowCredit(pub Duration);

#[async_trait::async_trait]
impl CreditLookup for SlowCredit {
    fn name(&self) -> &'static str {
        "slow"
    }

    async fn score(&self, applicant_id: &str) -> Result<u32> {
        tokio::time::sleep(self.0).await;
        SyntheticBureau::new().score(applicant_id).await
    }

    async fn offer(&self, applicant_id: &str) -> Result<Offer> {
        tokio::time::sleep(self.0).await;
        SyntheticBureau::new().offer(applicant_id).await
    }
}

pub struct FailingIdentity;

#[async_trait::async_trait]
impl IdentityLookup for FailingIdentity {
    fn name(&self) -> &'static str {
        "failing"
    }

    async fn verify(&self, _phone: &str) -> Result<Verification> {
        Err(lookup_failure(self.name()))
    }
}

/// Always errors, standing in for one kind
pub struct FailingResponder {
    kind: ResponderKind,
}

impl FailingResponder {
    pub fn new(kind: ResponderKind) -> Self {
        Self { kind }
    }
}

#[async_trait::async_trait]
impl Responder for FailingResponder {
    fn kind(&self) -> ResponderKind {
        self.kind
    }

    async fn process(&self, _message: &str, ctx: &mut Context) -> Result<Reply> {
        // Mutate first so tests can see the scratch copy was discarded
        ctx.phone = Some("0000000000".to_string());
        Err(LoanflowError::ResponderFailure {
            responder: self.kind.to_string(),
            message: "injected failure".to_string(),
        })
    }
}

/// The default responders backed by the synthetic bureau, with one replaced
pub fn responders_with(responder: Arc<dyn Responder>) -> ResponderSet {
    let bureau = Arc::new(SyntheticBureau::new());
    ResponderSet::new(bureau.clone(), bureau, UnderwritingPolicy::default()).replace(responder)
}

/// Rejects every write
pub struct FailingStore;

#[async_trait::async_trait]
impl ConversationStore for FailingStore {
    async fn save(&self, context: &Context) -> Result<()> {
        Err(LoanflowError::Persistence {
            id: context.id.clone(),
            message: "disk full".to_string(),
        })
    }

    async fn load(&self, _id: &str) -> Result<Option<Context>> {
        Ok(None)
    }
}
