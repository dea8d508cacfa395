use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::BTreeMap;

use super::stage::{Stage, TransitionKind};

pub const APOLOGY_TEXT: &str = "I apologize for the technical difficulty. Please try again.";
pub const FALLBACK_TEXT: &str =
    "I apologize, but I'm experiencing technical difficulties. Please try again in a moment.";

/// A stage change a responder asks the state manager to apply
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct StageRequest {
    pub target: Stage,
    pub kind: TransitionKind,
}

/// What one turn produces for the caller
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Reply {
    pub text: String,
    pub stage: Stage,
    pub requires_more_input: bool,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub options: Vec<String>,
    pub is_final: bool,
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub metadata: BTreeMap<String, Value>,
    /// Requested stage changes, applied in order
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub transitions: Vec<StageRequest>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl Reply {
    pub fn new(text: impl Into<String>, stage: Stage) -> Self {
        Self {
            text: text.into(),
            stage,
            requires_more_input: true,
            options: Vec::new(),
            is_final: false,
            metadata: BTreeMap::new(),
            transitions: Vec::new(),
            error: None,
        }
    }

    /// Fixed reply when a responder and its alternate both failed
    pub fn apology(stage: Stage) -> Self {
        Self::new(APOLOGY_TEXT, stage).with_error("responder failure")
    }

    /// Generic reply when orchestration could not recover
    pub fn fallback(stage: Stage) -> Self {
        Self::new(FALLBACK_TEXT, stage).with_error("orchestration failure")
    }

    pub fn with_options<I, S>(mut self, options: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.options = options.into_iter().map(Into::into).collect();
        self
    }

    pub fn with_error(mut self, error: impl Into<String>) -> Self {
        self.error = Some(error.into());
        self
    }

    pub fn with_meta(mut self, key: impl Into<String>, value: Value) -> Self {
        self.metadata.insert(key.into(), value);
        self
    }

    pub fn request(mut self, target: Stage, kind: TransitionKind) -> Self {
        self.transitions.push(StageRequest { target, kind });
        self
    }

    pub fn finished(mut self) -> Self {
        self.is_final = true;
        self
    }

    pub fn no_input_needed(mut self) -> Self {
        self.requires_more_input = false;
        self
    }

    pub fn requests_transition(&self) -> bool {
        !self.transitions.is_empty()
    }
}
