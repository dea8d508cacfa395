//! Engine configuration
//!
//! One serde tree with a section per component. Every tunable threshold
//! lives here instead of in the component code, including the escalation
//! keyword lists.

pub mod store;

use serde::{Deserialize, Serialize};
use std::path::PathBuf;

use crate::router::{HybridWeights, RoutingStrategy};
use crate::underwriting::UnderwritingPolicy;

/// Configuration errors
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    /// IO error occurred while reading/writing config file
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
    /// Layered source could not be read or deserialized
    #[error("config source error: {0}")]
    Source(#[from] ::config::ConfigError),
    /// TOML serialization error
    #[error("TOML serialize error: {0}")]
    TomlSerialize(#[from] toml::ser::Error),
    /// Invalid configuration value
    #[error("Invalid configuration value: {0}")]
    InvalidValue(String),
    /// No platform config directory
    #[error("could not determine config directory")]
    NoConfigDir,
}

/// Root configuration for the engine and the CLI around it
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    /// Default tracing filter when `LOANFLOW_LOG` is unset
    pub log_level: String,
    pub state: StateConfig,
    pub router: RouterConfig,
    pub orchestrator: OrchestratorConfig,
    pub underwriting: UnderwritingPolicy,
    pub engine: GuardConfig,
    pub storage: StorageConfig,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            log_level: "warn".to_string(),
            state: StateConfig::default(),
            router: RouterConfig::default(),
            orchestrator: OrchestratorConfig::default(),
            underwriting: UnderwritingPolicy::default(),
            engine: GuardConfig::default(),
            storage: StorageConfig::default(),
        }
    }
}

/// State manager settings
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct StateConfig {
    /// Snapshots kept per conversation
    pub snapshot_limit: usize,
    /// Idle time before the sweep evicts an active conversation
    pub abandonment_secs: u64,
    /// How long a paused conversation stays resumable
    pub pause_window_secs: u64,
    pub escalation: EscalationConfig,
}

impl Default for StateConfig {
    fn default() -> Self {
        Self {
            snapshot_limit: 50,
            abandonment_secs: 30 * 60,
            pause_window_secs: 24 * 60 * 60,
            escalation: EscalationConfig::default(),
        }
    }
}

/// Escalation triggers, evaluated after each transition
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct EscalationConfig {
    pub frustration_markers: Vec<String>,
    /// Number of most recent user messages scanned for markers
    pub recent_messages: usize,
    /// Transitions since the last reset before flagging
    pub max_transitions: u32,
    /// Conversation age before flagging
    pub max_duration_secs: u64,
}

impl Default for EscalationConfig {
    fn default() -> Self {
        Self {
            frustration_markers: [
                "angry",
                "frustrated",
                "upset",
                "terrible",
                "awful",
                "ridiculous",
                "useless",
            ]
            .iter()
            .map(|s| s.to_string())
            .collect(),
            recent_messages: 3,
            max_transitions: 3,
            max_duration_secs: 30 * 60,
        }
    }
}

/// Router settings
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RouterConfig {
    pub strategy: RoutingStrategy,
    pub weights: HybridWeights,
    /// Smoothing factor for the latency moving average
    pub latency_alpha: f64,
    pub history_limit: usize,
}

impl Default for RouterConfig {
    fn default() -> Self {
        Self {
            strategy: RoutingStrategy::Hybrid,
            weights: HybridWeights::default(),
            latency_alpha: 0.2,
            history_limit: 1000,
        }
    }
}

/// Pattern selection thresholds
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct OrchestratorConfig {
    /// Linguistic complexity at or above which the tree pattern is used
    pub complexity_threshold: f64,
    /// Urgency at or above which the chain pattern is used
    pub urgency_threshold: f64,
    /// Engagement below which the sequential pattern is used
    pub low_engagement_threshold: f64,
    /// Per sub-task budget in the fan-out pattern
    pub fanout_timeout_ms: u64,
}

impl Default for OrchestratorConfig {
    fn default() -> Self {
        Self {
            complexity_threshold: 0.7,
            urgency_threshold: 0.7,
            low_engagement_threshold: 0.15,
            fanout_timeout_ms: 3000,
        }
    }
}

/// Pre-orchestration message guards
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct GuardConfig {
    pub max_message_chars: usize,
    pub exit_keywords: Vec<String>,
    pub help_keywords: Vec<String>,
    pub blocked_terms: Vec<String>,
}

impl Default for GuardConfig {
    fn default() -> Self {
        let words = |list: &[&str]| list.iter().map(|s| s.to_string()).collect();
        Self {
            max_message_chars: 2000,
            exit_keywords: words(&["exit", "quit", "bye", "goodbye", "stop"]),
            help_keywords: words(&["help", "menu", "options", "what can you do"]),
            blocked_terms: words(&["idiot", "stupid", "scam", "fraud", "cheat"]),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum StorageBackend {
    #[default]
    Memory,
    Json,
}

/// Where conversations are persisted
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Default)]
#[serde(default)]
pub struct StorageConfig {
    pub backend: StorageBackend,
    /// Directory for the JSON backend; defaults under the data dir
    #[serde(skip_serializing_if = "Option::is_none")]
    pub dir: Option<PathBuf>,
}

impl EngineConfig {
    /// Validate configuration values
    pub fn validate(&self) -> Result<(), ConfigError> {
        let unit = |name: &str, v: f64| {
            if (0.0..=1.0).contains(&v) {
                Ok(())
            } else {
                Err(ConfigError::InvalidValue(format!(
                    "{} must be between 0.0 and 1.0",
                    name
                )))
            }
        };

        if self.state.snapshot_limit == 0 {
            return Err(ConfigError::InvalidValue(
                "state.snapshot_limit must be greater than 0".to_string(),
            ));
        }
        if self.state.pause_window_secs == 0 {
            return Err(ConfigError::InvalidValue(
                "state.pause_window_secs must be greater than 0".to_string(),
            ));
        }
        if self.state.escalation.recent_messages == 0 {
            return Err(ConfigError::InvalidValue(
                "state.escalation.recent_messages must be greater than 0".to_string(),
            ));
        }

        self.router
            .weights
            .validate()
            .map_err(ConfigError::InvalidValue)?;
        if self.router.latency_alpha <= 0.0 || self.router.latency_alpha > 1.0 {
            return Err(ConfigError::InvalidValue(
                "router.latency_alpha must be in (0.0, 1.0]".to_string(),
            ));
        }
        if self.router.history_limit == 0 {
            return Err(ConfigError::InvalidValue(
                "router.history_limit must be greater than 0".to_string(),
            ));
        }

        unit("orchestrator.complexity_threshold", self.orchestrator.complexity_threshold)?;
        unit("orchestrator.urgency_threshold", self.orchestrator.urgency_threshold)?;
        unit(
            "orchestrator.low_engagement_threshold",
            self.orchestrator.low_engagement_threshold,
        )?;
        if self.orchestrator.fanout_timeout_ms == 0 {
            return Err(ConfigError::InvalidValue(
                "orchestrator.fanout_timeout_ms must be greater than 0".to_string(),
            ));
        }

        self.underwriting
            .validate()
            .map_err(ConfigError::InvalidValue)?;

        if self.engine.max_message_chars == 0 {
            return Err(ConfigError::InvalidValue(
                "engine.max_message_chars must be greater than 0".to_string(),
            ));
        }
        Ok(())
    }
}
