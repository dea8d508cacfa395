//! Responders
//!
//! One trait, three fixed variants. The router and orchestrator address
//! responders through [`ResponderKind`] and never through open-ended
//! dispatch.

pub mod decisioning;
pub mod extract;
pub mod identity;
pub mod requirements;

use serde::{Deserialize, Serialize};
use std::fmt;
use std::sync::Arc;

use crate::conversation::{Context, Reply, Stage};
use crate::error::Result;
use crate::services::{CreditLookup, IdentityLookup};
use crate::underwriting::UnderwritingPolicy;

pub use decisioning::DecisioningResponder;
pub use identity::IdentityResponder;
pub use requirements::RequirementsResponder;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ResponderKind {
    Requirements,
    Identity,
    Decisioning,
}

impl ResponderKind {
    /// Declaring order; ties anywhere are broken by this order
    pub const ALL: [ResponderKind; 3] = [
        ResponderKind::Requirements,
        ResponderKind::Identity,
        ResponderKind::Decisioning,
    ];

    pub fn as_str(self) -> &'static str {
        match self {
            ResponderKind::Requirements => "requirements",
            ResponderKind::Identity => "identity",
            ResponderKind::Decisioning => "decisioning",
        }
    }

    pub fn index(self) -> usize {
        match self {
            ResponderKind::Requirements => 0,
            ResponderKind::Identity => 1,
            ResponderKind::Decisioning => 2,
        }
    }

    /// The responder that owns a stage
    pub fn canonical_for(stage: Stage) -> Self {
        match stage {
            Stage::Greeting | Stage::Requirements => ResponderKind::Requirements,
            Stage::Identity => ResponderKind::Identity,
            Stage::Decisioning | Stage::DocumentCheck | Stage::Outcome | Stage::Done => {
                ResponderKind::Decisioning
            }
        }
    }
}

impl fmt::Display for ResponderKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A capability-specific handler for one phase of the conversation.
///
/// Implementations keep no state between calls; everything they learn goes
/// into the context. Returning `Err` signals a failure the router may retry
/// elsewhere. A reply with `error` set is a well-formed refusal.
#[async_trait::async_trait]
pub trait Responder: Send + Sync {
    fn kind(&self) -> ResponderKind;

    async fn process(&self, message: &str, ctx: &mut Context) -> Result<Reply>;
}

/// The three responders, one per kind
#[derive(Clone)]
pub struct ResponderSet {
    requirements: Arc<dyn Responder>,
    identity: Arc<dyn Responder>,
    decisioning: Arc<dyn Responder>,
}

impl ResponderSet {
    pub fn new(
        identity_lookup: Arc<dyn IdentityLookup>,
        credit_lookup: Arc<dyn CreditLookup>,
        policy: UnderwritingPolicy,
    ) -> Self {
        Self {
            requirements: Arc::new(RequirementsResponder::new()),
            identity: Arc::new(IdentityResponder::new(identity_lookup)),
            decisioning: Arc::new(DecisioningResponder::new(credit_lookup, policy)),
        }
    }

    /// Assemble from explicit implementations
    pub fn from_parts(
        requirements: Arc<dyn Responder>,
        identity: Arc<dyn Responder>,
        decisioning: Arc<dyn Responder>,
    ) -> Self {
        Self {
            requirements,
            identity,
            decisioning,
        }
    }

    pub fn get(&self, kind: ResponderKind) -> &Arc<dyn Responder> {
        match kind {
            ResponderKind::Requirements => &self.requirements,
            ResponderKind::Identity => &self.identity,
            ResponderKind::Decisioning => &self.decisioning,
        }
    }

    /// Swap one implementation, keeping the others
    pub fn replace(mut self, responder: Arc<dyn Responder>) -> Self {
        match responder.kind() {
            ResponderKind::Requirements => self.requirements = responder,
            ResponderKind::Identity => self.identity = responder,
            ResponderKind::Decisioning => self.decisioning = responder,
        }
        self
    }
}
