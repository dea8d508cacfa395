use std::sync::Arc;
use tracing::{debug, info};

use crate::conversation::{Context, Reply, Stage, TransitionKind};
use crate::error::{LoanflowError, Result};
use crate::services::IdentityLookup;

use super::extract;
use super::{Responder, ResponderKind};

/// Verifies the applicant's mobile number against the identity service
pub struct IdentityResponder {
    lookup: Arc<dyn IdentityLookup>,
}

impl IdentityResponder {
    pub fn new(lookup: Arc<dyn IdentityLookup>) -> Self {
        Self { lookup }
    }
}

#[async_trait::async_trait]
impl Responder for IdentityResponder {
    fn kind(&self) -> ResponderKind {
        ResponderKind::Identity
    }

    async fn process(&self, message: &str, ctx: &mut Context) -> Result<Reply> {
        let stage = ctx.stage();

        if ctx.loan.is_none() {
            return Ok(Reply::new(
                "Let's first confirm how much you'd like to borrow before verifying your identity.",
                stage,
            )
            .with_error("loan request missing"));
        }

        if let Some(phone) = extract::extract_phone(message) {
            if ctx.phone.as_deref() != Some(phone.as_str()) {
                ctx.identity_verified = false;
                ctx.applicant = None;
                ctx.phone = Some(phone);
            }
        }

        let Some(phone) = ctx.phone.clone() else {
            let text = if extract::mentions_email(message) || extract::mentions_id_document(message)
            {
                "Thanks, but I verify applicants by mobile number. Please share the 10-digit \
                 mobile number registered with your bank."
            } else {
                "Please share your 10-digit mobile number so I can verify your identity."
            };
            return Ok(Reply::new(text, stage));
        };

        if ctx.identity_verified {
            let name = ctx.first_name().unwrap_or("there").to_string();
            return Ok(Reply::new(
                format!("You're already verified, {}. Let me check your eligibility.", name),
                stage,
            )
            .request(Stage::Decisioning, TransitionKind::Forward)
            .no_input_needed());
        }

        let verification =
            self.lookup
                .verify(&phone)
                .await
                .map_err(|e| LoanflowError::ResponderFailure {
                    responder: self.kind().to_string(),
                    message: format!("{} lookup failed: {}", self.lookup.name(), e),
                })?;
        debug!(conversation = %ctx.id, verified = verification.verified, "identity checked");

        if !verification.verified {
            return Ok(Reply::new(
                "I couldn't verify that mobile number. Please double-check it, or share the \
                 number linked to your PAN.",
                stage,
            )
            .with_options(["Re-enter my number"]));
        }

        ctx.identity_verified = true;
        if let Some(profile) = verification.profile {
            ctx.applicant = Some(profile);
        }
        info!(conversation = %ctx.id, "identity verified");

        let text = match ctx.first_name() {
            Some(name) => format!(
                "Thank you, {}! Your identity is verified. Let me check your eligibility now.",
                name
            ),
            None => "Your identity is verified. Let me check your eligibility now.".to_string(),
        };
        Ok(Reply::new(text, stage)
            .request(Stage::Decisioning, TransitionKind::Forward)
            .no_input_needed())
    }
}
