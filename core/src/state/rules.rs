//! Stage transition tables, jump predicates and entry requirements

use serde::{Deserialize, Serialize};
use std::fmt;

use crate::conversation::{Context, Stage, TransitionKind};
use crate::error::TransitionError;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ContextField {
    LoanRequest,
    Phone,
    IdentityVerified,
    Decision,
}

impl fmt::Display for ContextField {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            ContextField::LoanRequest => "loan request",
            ContextField::Phone => "phone",
            ContextField::IdentityVerified => "identity verification",
            ContextField::Decision => "decision",
        })
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Validator {
    LoanWithinBounds,
    DecisionNeedsIncomeProof,
    DecisionFinal,
}

impl fmt::Display for Validator {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Validator::LoanWithinBounds => "loan within bounds",
            Validator::DecisionNeedsIncomeProof => "decision requires income proof",
            Validator::DecisionFinal => "decision is final",
        })
    }
}

/// One entry requirement that did not hold
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case", tag = "kind")]
pub enum Unmet {
    TooFewMessages { required: usize, actual: usize },
    MissingField(ContextField),
    Failed { validator: Validator, reason: String },
}

impl fmt::Display for Unmet {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Unmet::TooFewMessages { required, actual } => write!(
                f,
                "needs at least {} user messages, has {}",
                required, actual
            ),
            Unmet::MissingField(field) => write!(f, "missing {}", field),
            Unmet::Failed { validator, reason } => write!(f, "{} failed: {}", validator, reason),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct EntryRequirements {
    pub min_user_messages: usize,
    pub fields: &'static [ContextField],
    pub validators: &'static [Validator],
}

pub fn entry_requirements(stage: Stage) -> EntryRequirements {
    use ContextField::*;
    let (min_user_messages, fields, validators): (usize, &'static [ContextField], &'static [Validator]) =
        match stage {
            Stage::Greeting => (0, &[], &[]),
            Stage::Requirements => (1, &[], &[]),
            Stage::Identity => (2, &[LoanRequest, Phone], &[Validator::LoanWithinBounds]),
            Stage::Decisioning => (
                2,
                &[LoanRequest, Phone, IdentityVerified],
                &[Validator::LoanWithinBounds],
            ),
            Stage::DocumentCheck => (2, &[Decision], &[Validator::DecisionNeedsIncomeProof]),
            Stage::Outcome => (2, &[Decision], &[Validator::DecisionFinal]),
            Stage::Done => (0, &[Decision], &[]),
        };
    EntryRequirements {
        min_user_messages,
        fields,
        validators,
    }
}

/// Non-successor targets a forward request may name
pub fn forward_jumps(stage: Stage) -> &'static [Stage] {
    match stage {
        Stage::Greeting => &[Stage::Identity],
        Stage::Requirements => &[Stage::Decisioning],
        Stage::Decisioning => &[Stage::Outcome],
        _ => &[],
    }
}

pub fn backward_targets(stage: Stage) -> &'static [Stage] {
    match stage {
        Stage::Requirements => &[Stage::Greeting],
        Stage::Identity => &[Stage::Requirements, Stage::Greeting],
        Stage::Decisioning => &[Stage::Identity, Stage::Requirements],
        Stage::DocumentCheck => &[Stage::Decisioning, Stage::Requirements],
        _ => &[],
    }
}

fn has_field(ctx: &Context, field: ContextField) -> bool {
    match field {
        ContextField::LoanRequest => ctx.loan.is_some(),
        ContextField::Phone => ctx.phone.is_some(),
        ContextField::IdentityVerified => ctx.identity_verified,
        ContextField::Decision => ctx.decision.is_some(),
    }
}

fn run_validator(ctx: &Context, validator: Validator) -> Result<(), String> {
    match validator {
        Validator::LoanWithinBounds => match ctx.loan.as_ref() {
            Some(loan) => loan.validate().map_err(|e| e.user_message()),
            None => Err("no loan request".to_string()),
        },
        Validator::DecisionNeedsIncomeProof => match ctx.decision.as_ref() {
            Some(d) if d.requires_income_proof => Ok(()),
            Some(_) => Err("decision does not require income proof".to_string()),
            None => Err("no decision".to_string()),
        },
        Validator::DecisionFinal => match ctx.decision.as_ref() {
            Some(d) if d.is_final() => Ok(()),
            Some(_) => Err("decision is awaiting income proof".to_string()),
            None => Err("no decision".to_string()),
        },
    }
}

/// Every entry requirement of `target` the context does not meet
pub fn unmet_requirements(target: Stage, ctx: &Context) -> Vec<Unmet> {
    let req = entry_requirements(target);
    let mut unmet = Vec::new();

    let actual = ctx.user_message_count();
    if actual < req.min_user_messages {
        unmet.push(Unmet::TooFewMessages {
            required: req.min_user_messages,
            actual,
        });
    }
    unmet.extend(
        req.fields
            .iter()
            .filter(|f| !has_field(ctx, **f))
            .map(|f| Unmet::MissingField(*f)),
    );
    for validator in req.validators {
        if let Err(reason) = run_validator(ctx, *validator) {
            unmet.push(Unmet::Failed {
                validator: *validator,
                reason,
            });
        }
    }
    unmet
}

/// Custom predicate a jump into `target` must satisfy
pub fn jump_predicate(target: Stage, ctx: &Context) -> Result<(), String> {
    let ok = match target {
        Stage::Requirements => true,
        Stage::Identity => ctx.loan.is_some() && ctx.phone.is_some(),
        Stage::Decisioning => ctx.loan.is_some() && ctx.phone.is_some() && ctx.identity_verified,
        Stage::DocumentCheck => ctx
            .decision
            .as_ref()
            .is_some_and(|d| d.requires_income_proof),
        Stage::Outcome => ctx.decision.is_some(),
        Stage::Greeting | Stage::Done => false,
    };
    if ok {
        Ok(())
    } else {
        Err(format!("preconditions for {} not satisfied", target))
    }
}

/// Validate a transition of `ctx` to `target`. Does not consider the
/// same-stage case; callers short-circuit that.
pub fn check(ctx: &Context, target: Stage, kind: TransitionKind) -> Result<(), TransitionError> {
    let from = ctx.stage();
    let not_allowed = TransitionError::NotAllowed {
        from,
        to: target,
        kind,
    };

    match kind {
        TransitionKind::Forward => {
            if from == Stage::Done {
                return Err(TransitionError::Terminal { stage: from });
            }
            if from.natural_successor() != Some(target) {
                if !forward_jumps(from).contains(&target) {
                    return Err(not_allowed);
                }
                jump_predicate(target, ctx).map_err(|reason| TransitionError::JumpRejected {
                    from,
                    to: target,
                    reason,
                })?;
            }
        }
        TransitionKind::Backward => {
            if from.is_terminal() {
                return Err(TransitionError::Terminal { stage: from });
            }
            if !backward_targets(from).contains(&target) {
                return Err(not_allowed);
            }
        }
        TransitionKind::Jump => {
            if from.is_terminal() {
                return Err(TransitionError::Terminal { stage: from });
            }
            jump_predicate(target, ctx).map_err(|reason| TransitionError::JumpRejected {
                from,
                to: target,
                reason,
            })?;
        }
    }

    let unmet = unmet_requirements(target, ctx);
    if !unmet.is_empty() {
        return Err(TransitionError::RequirementsUnmet {
            stage: target,
            unmet,
        });
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::conversation::{LoanPurpose, LoanRequest};
    use crate::underwriting::{Application, UnderwritingPolicy};
    use chrono::Utc;

    fn ctx_at(stage: Stage, user_messages: usize) -> Context {
        let mut ctx = Context::new("r-1", Utc::now());
        ctx.set_stage(stage);
        for i in 0..user_messages {
            ctx.push_user(format!("message {}", i), Utc::now());
        }
        ctx
    }

    fn with_loan(mut ctx: Context) -> Context {
        ctx.loan = Some(LoanRequest::new(200_000.0, 24, LoanPurpose::Personal).unwrap());
        ctx.phone = Some("9876543210".to_string());
        ctx
    }

    fn with_decision(mut ctx: Context, amount: f64) -> Context {
        let loan = LoanRequest::new(amount, 24, LoanPurpose::Personal).unwrap();
        let app = Application::new(&loan, 760, 300_000.0);
        ctx.decision = Some(UnderwritingPolicy::default().evaluate(&app));
        ctx
    }

    #[test]
    fn natural_successor_requires_entry_conditions() {
        let ctx = ctx_at(Stage::Requirements, 2);
        let err = check(&ctx, Stage::Identity, TransitionKind::Forward).unwrap_err();
        match err {
            TransitionError::RequirementsUnmet { stage, unmet } => {
                assert_eq!(stage, Stage::Identity);
                assert!(unmet.contains(&Unmet::MissingField(ContextField::LoanRequest)));
                assert!(unmet.contains(&Unmet::MissingField(ContextField::Phone)));
            }
            other => panic!("unexpected {:?}", other),
        }

        let ctx = with_loan(ctx_at(Stage::Requirements, 2));
        assert!(check(&ctx, Stage::Identity, TransitionKind::Forward).is_ok());
    }

    #[test]
    fn message_count_is_an_entry_condition() {
        let ctx = with_loan(ctx_at(Stage::Requirements, 1));
        let err = check(&ctx, Stage::Identity, TransitionKind::Forward).unwrap_err();
        assert!(matches!(
            err,
            TransitionError::RequirementsUnmet { ref unmet, .. }
                if unmet == &vec![Unmet::TooFewMessages { required: 2, actual: 1 }]
        ));
    }

    #[test]
    fn forward_to_unlisted_stage_is_not_allowed() {
        let ctx = with_loan(ctx_at(Stage::Identity, 3));
        assert!(matches!(
            check(&ctx, Stage::Outcome, TransitionKind::Forward),
            Err(TransitionError::NotAllowed { .. })
        ));
    }

    #[test]
    fn forward_jump_checks_predicate() {
        let ctx = with_loan(ctx_at(Stage::Requirements, 3));
        assert!(matches!(
            check(&ctx, Stage::Decisioning, TransitionKind::Forward),
            Err(TransitionError::JumpRejected { .. })
        ));

        let mut ctx = ctx;
        ctx.identity_verified = true;
        assert!(check(&ctx, Stage::Decisioning, TransitionKind::Forward).is_ok());
    }

    #[test]
    fn decisioning_routes_by_decision() {
        let ctx = with_decision(with_loan(ctx_at(Stage::Decisioning, 4)), 450_000.0);
        assert!(check(&ctx, Stage::DocumentCheck, TransitionKind::Forward).is_ok());
        assert!(matches!(
            check(&ctx, Stage::Outcome, TransitionKind::Forward),
            Err(TransitionError::RequirementsUnmet { .. })
        ));

        let ctx = with_decision(with_loan(ctx_at(Stage::Decisioning, 4)), 100_000.0);
        assert!(check(&ctx, Stage::Outcome, TransitionKind::Forward).is_ok());
        assert!(check(&ctx, Stage::DocumentCheck, TransitionKind::Forward).is_err());
    }

    #[test]
    fn backward_uses_allow_list() {
        let ctx = with_loan(ctx_at(Stage::Decisioning, 4));
        assert!(check(&ctx, Stage::Requirements, TransitionKind::Backward).is_ok());
        assert!(matches!(
            check(&ctx, Stage::Greeting, TransitionKind::Backward),
            Err(TransitionError::NotAllowed { .. })
        ));
    }

    #[test]
    fn terminal_stages_refuse_backward_and_jump() {
        let ctx = with_decision(with_loan(ctx_at(Stage::Outcome, 4)), 100_000.0);
        assert!(matches!(
            check(&ctx, Stage::Requirements, TransitionKind::Backward),
            Err(TransitionError::Terminal { .. })
        ));
        assert!(matches!(
            check(&ctx, Stage::Requirements, TransitionKind::Jump),
            Err(TransitionError::Terminal { .. })
        ));
        assert!(check(&ctx, Stage::Done, TransitionKind::Forward).is_ok());
    }

    #[test]
    fn jumps_never_target_greeting_or_done() {
        let ctx = with_loan(ctx_at(Stage::Identity, 3));
        assert!(check(&ctx, Stage::Greeting, TransitionKind::Jump).is_err());
        assert!(check(&ctx, Stage::Done, TransitionKind::Jump).is_err());
        assert!(check(&ctx, Stage::Requirements, TransitionKind::Jump).is_ok());
    }
}
