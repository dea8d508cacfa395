//! Structured error types for loanflow
//!
//! Every failure the engine can observe is one of these variants. The
//! conversation entry point never surfaces them directly; they are turned
//! into degraded replies via [`LoanflowError::user_message`].

use std::time::Duration;
use thiserror::Error;

use crate::conversation::{Stage, TransitionKind};
use crate::state::rules::Unmet;

/// Primary error type for loanflow operations
#[derive(Error, Debug)]
pub enum LoanflowError {
    // =========================================================================
    // Conversation Errors
    // =========================================================================
    /// Bad or missing context field
    #[error("validation failed: {reason}")]
    Validation { reason: String },

    /// State machine rule violation
    #[error("transition denied: {0}")]
    TransitionDenied(#[from] TransitionError),

    /// Conversation id already in use
    #[error("conversation already exists: {id}")]
    AlreadyExists { id: String },

    /// Conversation id not active (or paused past its window)
    #[error("conversation not found: {id}")]
    NotFound { id: String },

    // =========================================================================
    // Execution Errors
    // =========================================================================
    /// Failure inside a responder
    #[error("responder {responder} failed: {message}")]
    ResponderFailure { responder: String, message: String },

    /// Pattern-level failure
    #[error("orchestration failed ({pattern}): {message}")]
    OrchestrationFailure { pattern: String, message: String },

    /// External lookup returned an error
    #[error("lookup failed: {service} - {message}")]
    Lookup { service: String, message: String },

    /// External lookup did not answer in time
    #[error("lookup timeout: {service} after {duration:?}")]
    LookupTimeout { service: String, duration: Duration },

    // =========================================================================
    // Persistence Errors
    // =========================================================================
    /// Conversation could not be saved or loaded
    #[error("persistence failed for {id}: {message}")]
    Persistence { id: String, message: String },

    // =========================================================================
    // Configuration Errors
    // =========================================================================
    /// Invalid configuration
    #[error("invalid configuration: {message}")]
    InvalidConfig { message: String },

    // =========================================================================
    // Internal Errors
    // =========================================================================
    #[error("internal error: {message}")]
    Internal { message: String },

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(String),
}

/// Why the state machine refused a transition
#[derive(Error, Debug, Clone, PartialEq)]
pub enum TransitionError {
    #[error("{from} cannot move {kind} to {to}")]
    NotAllowed {
        from: Stage,
        to: Stage,
        kind: TransitionKind,
    },

    #[error("jump from {from} to {to} rejected: {reason}")]
    JumpRejected { from: Stage, to: Stage, reason: String },

    #[error("{stage} is terminal")]
    Terminal { stage: Stage },

    #[error("entry requirements for {stage} not met: {}", describe_unmet(.unmet))]
    RequirementsUnmet { stage: Stage, unmet: Vec<Unmet> },
}

fn describe_unmet(unmet: &[Unmet]) -> String {
    unmet
        .iter()
        .map(|u| u.to_string())
        .collect::<Vec<_>>()
        .join("; ")
}

impl LoanflowError {
    pub fn validation(reason: impl Into<String>) -> Self {
        Self::Validation {
            reason: reason.into(),
        }
    }

    pub fn not_found(id: impl Into<String>) -> Self {
        Self::NotFound { id: id.into() }
    }

    /// Check if error is retryable (transient)
    pub fn is_retryable(&self) -> bool {
        match self {
            Self::ResponderFailure { .. } => true,
            Self::Lookup { .. } => true,
            Self::LookupTimeout { .. } => true,
            Self::Persistence { .. } => true,

            Self::Io(io_err) => matches!(
                io_err.kind(),
                std::io::ErrorKind::Interrupted
                    | std::io::ErrorKind::WouldBlock
                    | std::io::ErrorKind::TimedOut
            ),

            Self::Validation { .. }
            | Self::TransitionDenied(_)
            | Self::AlreadyExists { .. }
            | Self::NotFound { .. }
            | Self::OrchestrationFailure { .. }
            | Self::InvalidConfig { .. }
            | Self::Internal { .. }
            | Self::Json(_) => false,
        }
    }

    /// Get a user-friendly error message
    pub fn user_message(&self) -> String {
        match self {
            Self::Validation { reason } => reason.clone(),
            Self::TransitionDenied(TransitionError::Terminal { .. }) => {
                "This application has already reached a decision and can no longer be changed."
                    .to_string()
            }
            Self::TransitionDenied(_) => {
                "We can't move to that step yet. Let's finish the current one first.".to_string()
            }
            Self::NotFound { .. } => {
                "I couldn't find that conversation. Let's start a new one.".to_string()
            }
            Self::ResponderFailure { .. }
            | Self::OrchestrationFailure { .. }
            | Self::Lookup { .. }
            | Self::LookupTimeout { .. } => {
                "I'm experiencing technical difficulties. Please try again in a moment.".to_string()
            }
            _ => "Something went wrong on our side. Please try again.".to_string(),
        }
    }
}

impl From<serde_json::Error> for LoanflowError {
    fn from(err: serde_json::Error) -> Self {
        Self::Json(err.to_string())
    }
}

impl From<anyhow::Error> for LoanflowError {
    fn from(err: anyhow::Error) -> Self {
        if let Some(io_err) = err.downcast_ref::<std::io::Error>() {
            return Self::Io(std::io::Error::new(io_err.kind(), io_err.to_string()));
        }
        Self::Internal {
            message: format!("{:#}", err),
        }
    }
}

impl From<crate::config::ConfigError> for LoanflowError {
    fn from(err: crate::config::ConfigError) -> Self {
        Self::InvalidConfig {
            message: err.to_string(),
        }
    }
}

/// Result type alias using LoanflowError
pub type Result<T> = std::result::Result<T, LoanflowError>;

/// Extension trait for converting Option to Result with LoanflowError
pub trait OptionExt<T> {
    fn ok_or_not_found(self, id: impl Into<String>) -> Result<T>;
    fn ok_or_invalid(self, reason: impl Into<String>) -> Result<T>;
}

impl<T> OptionExt<T> for Option<T> {
    fn ok_or_not_found(self, id: impl Into<String>) -> Result<T> {
        self.ok_or_else(|| LoanflowError::NotFound { id: id.into() })
    }

    fn ok_or_invalid(self, reason: impl Into<String>) -> Result<T> {
        self.ok_or_else(|| LoanflowError::Validation {
            reason: reason.into(),
        })
    }
}
