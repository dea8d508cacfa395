//! Orchestration patterns and how one is chosen for a message

use serde::Serialize;
use std::fmt;

use crate::config::OrchestratorConfig;
use crate::conversation::{Context, Stage};
use crate::responder::extract::{self, words};
use crate::responder::ResponderKind;

use super::fanout::FanOutTask;
use super::signals::ComplexitySignals;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum PatternKind {
    Sequential,
    Branching,
    FanOut,
    Chain,
    Tree,
}

impl PatternKind {
    pub fn default_for(stage: Stage) -> Self {
        match stage {
            Stage::Greeting => PatternKind::Sequential,
            Stage::Requirements => PatternKind::Branching,
            Stage::Identity => PatternKind::Chain,
            Stage::Decisioning => PatternKind::FanOut,
            Stage::DocumentCheck | Stage::Outcome | Stage::Done => PatternKind::Sequential,
        }
    }

    /// Strong signals override the stage default, most specific first
    pub fn select(stage: Stage, signals: &ComplexitySignals, config: &OrchestratorConfig) -> Self {
        if signals.linguistic >= config.complexity_threshold {
            PatternKind::Tree
        } else if signals.urgency >= config.urgency_threshold {
            PatternKind::Chain
        } else if signals.engagement < config.low_engagement_threshold {
            PatternKind::Sequential
        } else {
            Self::default_for(stage)
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            PatternKind::Sequential => "sequential",
            PatternKind::Branching => "branching",
            PatternKind::FanOut => "fan_out",
            PatternKind::Chain => "chain",
            PatternKind::Tree => "tree",
        }
    }
}

impl fmt::Display for PatternKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Signals the branching table is keyed by
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum BranchSignal {
    Negotiate,
    StructuredData,
    Done,
}

const DONE_WORDS: &[&str] = &["done", "yes", "proceed", "continue", "ok", "okay", "go"];

impl BranchSignal {
    pub fn detect(message: &str) -> Option<Self> {
        if extract::wants_to_negotiate(message) {
            return Some(BranchSignal::Negotiate);
        }
        let structured = extract::extract_amount(message).is_some()
            || extract::extract_tenure(message).is_some()
            || extract::extract_phone(message).is_some()
            || extract::extract_purpose(message).is_some();
        if structured {
            return Some(BranchSignal::StructuredData);
        }
        if words(message).any(|w| DONE_WORDS.contains(&w.as_str())) {
            return Some(BranchSignal::Done);
        }
        None
    }

    /// Next responder for this signal
    pub fn target(self, ctx: &Context) -> ResponderKind {
        match self {
            BranchSignal::Negotiate | BranchSignal::StructuredData => ResponderKind::Requirements,
            BranchSignal::Done if ctx.loan.is_some() && ctx.phone.is_some() => ResponderKind::Identity,
            BranchSignal::Done => ResponderKind::Requirements,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Rule {
    LoanCaptured,
    PhoneCaptured,
}

impl Rule {
    pub fn holds(self, ctx: &Context) -> bool {
        match self {
            Rule::LoanCaptured => ctx.loan.is_some(),
            Rule::PhoneCaptured => ctx.phone.is_some(),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Enrichment {
    IntentScores,
    RiskProfile,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case", tag = "step", content = "arg")]
pub enum TreeStep {
    Validate(Rule),
    Invoke(ResponderKind),
    Enrich(Enrichment),
}

/// A concrete plan for one message
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case", tag = "pattern")]
pub enum Pattern {
    Sequential {
        primary: ResponderKind,
        fallbacks: Vec<ResponderKind>,
    },
    Branching,
    FanOut {
        tasks: Vec<FanOutTask>,
        then: ResponderKind,
    },
    Chain {
        steps: Vec<ResponderKind>,
    },
    Tree {
        plan: Vec<TreeStep>,
    },
}

impl Pattern {
    pub fn build(kind: PatternKind, stage: Stage) -> Self {
        let canonical = ResponderKind::canonical_for(stage);
        match kind {
            PatternKind::Sequential => Pattern::Sequential {
                primary: canonical,
                fallbacks: match stage {
                    Stage::Identity => vec![ResponderKind::Requirements],
                    _ => Vec::new(),
                },
            },
            PatternKind::Branching => Pattern::Branching,
            PatternKind::FanOut => Pattern::FanOut {
                tasks: vec![
                    FanOutTask::CreditScore,
                    FanOutTask::PreApproval,
                    FanOutTask::RiskScore,
                ],
                then: ResponderKind::Decisioning,
            },
            PatternKind::Chain => Pattern::Chain {
                steps: match stage {
                    Stage::Greeting | Stage::Requirements => {
                        vec![ResponderKind::Requirements, ResponderKind::Identity]
                    }
                    Stage::Identity => vec![ResponderKind::Identity, ResponderKind::Decisioning],
                    _ => vec![ResponderKind::Decisioning],
                },
            },
            PatternKind::Tree => Pattern::Tree {
                plan: vec![
                    TreeStep::Enrich(Enrichment::IntentScores),
                    TreeStep::Validate(Rule::LoanCaptured),
                    TreeStep::Validate(Rule::PhoneCaptured),
                    TreeStep::Invoke(canonical),
                    TreeStep::Enrich(Enrichment::RiskProfile),
                ],
            },
        }
    }

    pub fn kind(&self) -> PatternKind {
        match self {
            Pattern::Sequential { .. } => PatternKind::Sequential,
            Pattern::Branching => PatternKind::Branching,
            Pattern::FanOut { .. } => PatternKind::FanOut,
            Pattern::Chain { .. } => PatternKind::Chain,
            Pattern::Tree { .. } => PatternKind::Tree,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::conversation::{LoanPurpose, LoanRequest};
    use chrono::Utc;

    fn calm() -> ComplexitySignals {
        ComplexitySignals {
            linguistic: 0.2,
            urgency: 0.0,
            engagement: 0.5,
        }
    }

    #[test]
    fn stages_have_defaults() {
        let config = OrchestratorConfig::default();
        let expected = [
            (Stage::Greeting, PatternKind::Sequential),
            (Stage::Requirements, PatternKind::Branching),
            (Stage::Identity, PatternKind::Chain),
            (Stage::Decisioning, PatternKind::FanOut),
            (Stage::DocumentCheck, PatternKind::Sequential),
            (Stage::Done, PatternKind::Sequential),
        ];
        for (stage, kind) in expected {
            assert_eq!(PatternKind::select(stage, &calm(), &config), kind);
        }
    }

    #[test]
    fn overrides_follow_precedence() {
        let config = OrchestratorConfig::default();
        let all_high = ComplexitySignals {
            linguistic: 0.9,
            urgency: 0.9,
            engagement: 0.05,
        };
        assert_eq!(
            PatternKind::select(Stage::Requirements, &all_high, &config),
            PatternKind::Tree
        );

        let urgent = ComplexitySignals {
            linguistic: 0.1,
            ..all_high
        };
        assert_eq!(
            PatternKind::select(Stage::Decisioning, &urgent, &config),
            PatternKind::Chain
        );

        let disengaged = ComplexitySignals {
            urgency: 0.0,
            ..urgent
        };
        assert_eq!(
            PatternKind::select(Stage::Decisioning, &disengaged, &config),
            PatternKind::Sequential
        );
    }

    #[test]
    fn thresholds_are_inclusive() {
        let config = OrchestratorConfig::default();
        let at_complexity = ComplexitySignals {
            linguistic: config.complexity_threshold,
            ..calm()
        };
        assert_eq!(
            PatternKind::select(Stage::Requirements, &at_complexity, &config),
            PatternKind::Tree
        );

        let at_urgency = ComplexitySignals {
            urgency: config.urgency_threshold,
            ..calm()
        };
        assert_eq!(
            PatternKind::select(Stage::Requirements, &at_urgency, &config),
            PatternKind::Chain
        );

        let at_engagement = ComplexitySignals {
            engagement: config.low_engagement_threshold,
            ..calm()
        };
        assert_eq!(
            PatternKind::select(Stage::Requirements, &at_engagement, &config),
            PatternKind::Branching
        );
    }

    #[test]
    fn branching_table() {
        let mut ctx = Context::new("b-1", Utc::now());
        assert_eq!(BranchSignal::detect("can you give me a better rate"), Some(BranchSignal::Negotiate));
        assert_eq!(BranchSignal::detect("3 lakh please"), Some(BranchSignal::StructuredData));
        assert_eq!(BranchSignal::detect("what's up"), None);

        let done = BranchSignal::detect("ok, done").unwrap();
        assert_eq!(done, BranchSignal::Done);
        assert_eq!(done.target(&ctx), ResponderKind::Requirements);
        ctx.loan = Some(LoanRequest::new(300_000.0, 24, LoanPurpose::Travel).unwrap());
        ctx.phone = Some("9876543210".to_string());
        assert_eq!(done.target(&ctx), ResponderKind::Identity);
    }

    #[test]
    fn plans_are_stage_specific() {
        assert_eq!(
            Pattern::build(PatternKind::Sequential, Stage::Identity),
            Pattern::Sequential {
                primary: ResponderKind::Identity,
                fallbacks: vec![ResponderKind::Requirements],
            }
        );
        assert_eq!(
            Pattern::build(PatternKind::Chain, Stage::Identity),
            Pattern::Chain {
                steps: vec![ResponderKind::Identity, ResponderKind::Decisioning],
            }
        );
        match Pattern::build(PatternKind::Tree, Stage::Decisioning) {
            Pattern::Tree { plan } => {
                assert!(plan.contains(&TreeStep::Invoke(ResponderKind::Decisioning)));
            }
            other => panic!("unexpected {:?}", other),
        }
    }
}
