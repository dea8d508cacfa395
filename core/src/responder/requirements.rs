//! Greets the applicant and collects amount, tenure, purpose and a mobile
//! number.

use crate::conversation::loan::{check_amount, check_tenure, MAX_AMOUNT, MIN_AMOUNT};
use crate::conversation::{Context, LoanPurpose, LoanRequest, Reply, Stage, TransitionKind};
use crate::error::Result;
use crate::underwriting::format_rupees;

use super::extract;
use super::{Responder, ResponderKind};

#[derive(Debug, Default, Clone, Copy)]
pub struct RequirementsResponder;

impl RequirementsResponder {
    pub fn new() -> Self {
        Self
    }
}

fn summarize(loan: &LoanRequest) -> String {
    format!(
        "₹{} for {} months ({})",
        format_rupees(loan.amount()),
        loan.tenure_months(),
        loan.purpose()
    )
}

fn phone_tail(phone: &str) -> &str {
    &phone[phone.len().saturating_sub(4)..]
}

/// Store whatever loan fields the message carries. Returns complaints
/// about values that were out of bounds.
fn capture_fields(message: &str, ctx: &mut Context) -> Vec<String> {
    let mut problems = Vec::new();
    let draft = &mut ctx.draft;

    if let Some(amount) = extract::extract_amount(message) {
        match check_amount(amount) {
            Ok(()) => draft.amount = Some(amount),
            Err(e) => problems.push(e.user_message()),
        }
    }

    let tenure = extract::extract_tenure(message).or_else(|| {
        if draft.amount.is_some() && draft.tenure_months.is_none() {
            extract::extract_bare_tenure(message)
        } else {
            None
        }
    });
    if let Some(months) = tenure {
        match check_tenure(months) {
            Ok(()) => draft.tenure_months = Some(months),
            Err(e) => problems.push(e.user_message()),
        }
    }

    let menu_allowed = draft.amount.is_some() && draft.tenure_months.is_some();
    let purpose = if menu_allowed || message.trim().len() > 1 {
        extract::extract_purpose(message)
    } else {
        None
    };
    if let Some(purpose) = purpose {
        draft.purpose = Some(purpose);
    }

    problems
}

fn next_question(ctx: &Context) -> Reply {
    let stage = ctx.stage();
    if ctx.draft.amount.is_none() {
        Reply::new(
            format!(
                "How much would you like to borrow? We offer loans from ₹{} to ₹{}.",
                format_rupees(MIN_AMOUNT),
                format_rupees(MAX_AMOUNT)
            ),
            stage,
        )
    } else if ctx.draft.tenure_months.is_none() {
        Reply::new(
            "For how many months would you like the loan? You can choose between 6 and 84 months.",
            stage,
        )
        .with_options(["12 months", "24 months", "36 months", "60 months"])
    } else {
        Reply::new("What will you use the loan for?", stage).with_options(LoanPurpose::menu())
    }
}

fn with_notes(mut reply: Reply, notes: &[String]) -> Reply {
    if !notes.is_empty() {
        reply.text = format!("{} {}", notes.join(" "), reply.text);
    }
    reply
}

#[async_trait::async_trait]
impl Responder for RequirementsResponder {
    fn kind(&self) -> ResponderKind {
        ResponderKind::Requirements
    }

    async fn process(&self, message: &str, ctx: &mut Context) -> Result<Reply> {
        let stage = ctx.stage();
        let mut notes = Vec::new();

        if let Some(phone) = extract::extract_phone(message) {
            if ctx.phone.as_deref() != Some(phone.as_str()) {
                ctx.identity_verified = false;
                ctx.applicant = None;
            }
            notes.push(format!(
                "I've noted your mobile number ending in {}.",
                phone_tail(&phone)
            ));
            ctx.phone = Some(phone);
        }

        if ctx.loan.is_none() {
            notes.extend(capture_fields(message, ctx));
            ctx.loan = ctx.draft.to_request();
        }

        if stage == Stage::Greeting {
            let text = "Hello! I'm your loan assistant. I can help you apply for a loan in a few \
                        minutes. How much would you like to borrow, and for how long?";
            let reply = Reply::new(text, stage)
                .request(Stage::Requirements, TransitionKind::Forward)
                .with_options(["I need a personal loan", "What are your interest rates?"]);
            return Ok(with_notes(reply, &notes));
        }

        if let Some(loan) = ctx.loan.as_ref() {
            let reply = match ctx.phone.as_deref() {
                Some(phone) if stage == Stage::Requirements => Reply::new(
                    format!(
                        "Great: {}. Next I'll verify your identity using the mobile number \
                         ending in {}. Reply 'yes' to continue.",
                        summarize(loan),
                        phone_tail(phone)
                    ),
                    stage,
                )
                .request(Stage::Identity, TransitionKind::Forward)
                .with_options(["Yes, verify me", "Change the amount"]),
                Some(_) => Reply::new(
                    format!("Your request is {}.", summarize(loan)),
                    stage,
                ),
                None => Reply::new(
                    format!(
                        "Great: {}. To continue, please share your 10-digit mobile number.",
                        summarize(loan)
                    ),
                    stage,
                ),
            };
            return Ok(with_notes(reply, &notes));
        }

        if extract::asks_for_range(message) {
            notes.push(format!(
                "You can borrow between ₹{} and ₹{}, repaid over 6 to 84 months.",
                format_rupees(MIN_AMOUNT),
                format_rupees(MAX_AMOUNT)
            ));
        } else if extract::wants_to_negotiate(message) {
            notes.push(
                "Rates depend on the loan purpose and your credit profile, starting from 8.3% \
                 for education. Once your details are verified I'll show the best rate you \
                 qualify for."
                    .to_string(),
            );
        }

        Ok(with_notes(next_question(ctx), &notes))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;

    fn at(stage: Stage) -> Context {
        let mut ctx = Context::new("req-1", Utc::now());
        ctx.set_stage(stage);
        ctx
    }

    #[tokio::test]
    async fn greeting_requests_requirements() {
        let mut ctx = at(Stage::Greeting);
        let reply = RequirementsResponder.process("hi", &mut ctx).await.unwrap();
        assert_eq!(reply.transitions.len(), 1);
        assert_eq!(reply.transitions[0].target, Stage::Requirements);
        assert_eq!(reply.transitions[0].kind, TransitionKind::Forward);
        assert!(reply.requires_more_input);
    }

    #[tokio::test]
    async fn phone_alone_is_stored_without_transition() {
        let mut ctx = at(Stage::Requirements);
        let reply = RequirementsResponder
            .process("9876543210", &mut ctx)
            .await
            .unwrap();
        assert_eq!(ctx.phone.as_deref(), Some("9876543210"));
        assert!(ctx.draft.is_empty());
        assert!(reply.transitions.is_empty());
        assert!(reply.text.contains("3210"));
        assert!(reply.text.contains("How much"));
    }

    #[tokio::test]
    async fn full_request_with_phone_moves_to_identity() {
        let mut ctx = at(Stage::Requirements);
        ctx.phone = Some("9876543210".to_string());
        let reply = RequirementsResponder
            .process("I need 5 lakh for 24 months, personal", &mut ctx)
            .await
            .unwrap();

        let loan = ctx.loan.as_ref().expect("loan confirmed");
        assert_eq!(loan.amount(), 500_000.0);
        assert_eq!(loan.tenure_months(), 24);
        assert_eq!(loan.purpose(), LoanPurpose::Personal);
        assert_eq!(reply.transitions[0].target, Stage::Identity);
    }

    #[tokio::test]
    async fn full_request_without_phone_asks_for_it() {
        let mut ctx = at(Stage::Requirements);
        let reply = RequirementsResponder
            .process("2 lakh, 12 months, for my wedding", &mut ctx)
            .await
            .unwrap();
        assert!(ctx.loan.is_some());
        assert!(reply.transitions.is_empty());
        assert!(reply.text.contains("mobile number"));
    }

    #[tokio::test]
    async fn out_of_bounds_amount_is_explained_not_stored() {
        let mut ctx = at(Stage::Requirements);
        let reply = RequirementsResponder
            .process("I want 2 crore", &mut ctx)
            .await
            .unwrap();
        assert!(ctx.draft.amount.is_none());
        assert!(reply.text.contains("between"));
    }

    #[tokio::test]
    async fn fields_collected_across_turns() {
        let mut ctx = at(Stage::Requirements);
        let responder = RequirementsResponder;

        responder.process("3 lakh", &mut ctx).await.unwrap();
        let reply = responder.process("36", &mut ctx).await.unwrap();
        assert_eq!(ctx.draft.tenure_months, Some(36));
        assert_eq!(reply.options.len(), 8);

        responder.process("4", &mut ctx).await.unwrap();
        assert_eq!(ctx.loan.as_ref().unwrap().purpose(), LoanPurpose::Medical);
    }

    #[tokio::test]
    async fn changing_phone_resets_verification() {
        let mut ctx = at(Stage::Requirements);
        ctx.phone = Some("9876543210".to_string());
        ctx.identity_verified = true;
        RequirementsResponder
            .process("use 9876543211 instead", &mut ctx)
            .await
            .unwrap();
        assert_eq!(ctx.phone.as_deref(), Some("9876543211"));
        assert!(!ctx.identity_verified);
    }
}
