//! Conversation data model: stages, loan fields, the per-conversation
//! context and the reply returned for each turn.

pub mod context;
pub mod loan;
pub mod reply;
pub mod stage;

pub use context::{ApplicantProfile, Context, EscalationFlag, Message, Metadata, Sender};
pub use loan::{Amendment, LoanDraft, LoanPurpose, LoanRequest};
pub use reply::{Reply, StageRequest};
pub use stage::{Stage, TransitionKind};
