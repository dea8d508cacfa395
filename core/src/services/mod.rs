//! External collaborators
//!
//! Identity and credit lookups and conversation persistence are black boxes
//! to the engine. Each is an async trait object so callers can plug in real
//! integrations; the synthetic bureau and the stores here back the CLI and
//! the tests.

pub mod bureau;
pub mod store;

use serde::{Deserialize, Serialize};

use crate::conversation::{ApplicantProfile, Context};
use crate::error::Result;

pub use bureau::SyntheticBureau;
pub use store::{JsonFileStore, MemoryStore};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Verification {
    pub verified: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub profile: Option<ApplicantProfile>,
}

/// Pre-approved offer for an applicant
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Offer {
    pub limit: f64,
    /// Annual percentage rate
    pub rate: f64,
}

#[async_trait::async_trait]
pub trait IdentityLookup: Send + Sync {
    fn name(&self) -> &'static str;

    async fn verify(&self, phone: &str) -> Result<Verification>;
}

#[async_trait::async_trait]
pub trait CreditLookup: Send + Sync {
    fn name(&self) -> &'static str;

    async fn score(&self, applicant_id: &str) -> Result<u32>;

    async fn offer(&self, applicant_id: &str) -> Result<Offer>;
}

/// Persistence for conversations. Saving is at-least-once; callers log
/// failures and carry on.
#[async_trait::async_trait]
pub trait ConversationStore: Send + Sync {
    async fn save(&self, context: &Context) -> Result<()>;

    async fn load(&self, id: &str) -> Result<Option<Context>>;
}
