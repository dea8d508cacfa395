use serde::{Deserialize, Serialize};
use std::fmt;

/// A named phase of the loan conversation. Declaration order is the natural
/// forward order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Stage {
    Greeting,
    Requirements,
    Identity,
    Decisioning,
    DocumentCheck,
    Outcome,
    Done,
}

impl Stage {
    pub const ALL: [Stage; 7] = [
        Stage::Greeting,
        Stage::Requirements,
        Stage::Identity,
        Stage::Decisioning,
        Stage::DocumentCheck,
        Stage::Outcome,
        Stage::Done,
    ];

    pub fn natural_successor(self) -> Option<Stage> {
        match self {
            Stage::Greeting => Some(Stage::Requirements),
            Stage::Requirements => Some(Stage::Identity),
            Stage::Identity => Some(Stage::Decisioning),
            Stage::Decisioning => Some(Stage::DocumentCheck),
            Stage::DocumentCheck => Some(Stage::Outcome),
            Stage::Outcome => Some(Stage::Done),
            Stage::Done => None,
        }
    }

    /// Outcome and Done never move backward or jump
    pub fn is_terminal(self) -> bool {
        matches!(self, Stage::Outcome | Stage::Done)
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Stage::Greeting => "greeting",
            Stage::Requirements => "requirements",
            Stage::Identity => "identity",
            Stage::Decisioning => "decisioning",
            Stage::DocumentCheck => "document_check",
            Stage::Outcome => "outcome",
            Stage::Done => "done",
        }
    }
}

impl fmt::Display for Stage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TransitionKind {
    Forward,
    Backward,
    Jump,
}

impl fmt::Display for TransitionKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            TransitionKind::Forward => "forward",
            TransitionKind::Backward => "backward",
            TransitionKind::Jump => "jump",
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn successors_follow_declaration_order() {
        for pair in Stage::ALL.windows(2) {
            assert_eq!(pair[0].natural_successor(), Some(pair[1]));
            assert!(pair[0] < pair[1]);
        }
        assert_eq!(Stage::Done.natural_successor(), None);
    }

    #[test]
    fn serializes_snake_case() {
        let json = serde_json::to_string(&Stage::DocumentCheck).unwrap();
        assert_eq!(json, "\"document_check\"");
        assert_eq!(Stage::DocumentCheck.to_string(), "document_check");
    }
}
