//! Configuration Store
//!
//! Loads the engine configuration in layers (built-in defaults, an optional
//! TOML file, then `LOANFLOW__SECTION__KEY` environment overrides) and
//! writes it back as TOML.

use std::path::{Path, PathBuf};

use ::config::{Config, Environment, File, FileFormat};
use tracing::{debug, warn};

use super::{ConfigError, EngineConfig};

const ENV_PREFIX: &str = "LOANFLOW";

impl EngineConfig {
    /// Default config location: `<config_dir>/loanflow/config.toml`
    pub fn default_path() -> Result<PathBuf, ConfigError> {
        dirs::config_dir()
            .map(|dir| dir.join("loanflow").join("config.toml"))
            .ok_or(ConfigError::NoConfigDir)
    }

    /// Default directory for persisted conversations
    pub fn default_data_dir() -> Option<PathBuf> {
        dirs::data_dir().map(|dir| dir.join("loanflow").join("conversations"))
    }

    /// Load layered configuration. A missing file is not an error.
    pub fn load(path: Option<&Path>) -> Result<Self, ConfigError> {
        let defaults = Config::try_from(&EngineConfig::default())?;
        let mut builder = Config::builder().add_source(defaults);

        if let Some(path) = path {
            debug!(path = %path.display(), "loading configuration file");
            builder = builder.add_source(File::from(path).format(FileFormat::Toml).required(false));
        }

        let config: EngineConfig = builder
            .add_source(
                Environment::with_prefix(ENV_PREFIX)
                    .separator("__")
                    .try_parsing(true),
            )
            .build()?
            .try_deserialize()?;

        config.validate()?;
        Ok(config)
    }

    /// Load from the default location, falling back to defaults on any error
    pub fn load_or_default() -> Self {
        let path = match Self::default_path() {
            Ok(path) => path,
            Err(e) => {
                warn!("{}; using default configuration", e);
                return Self::default();
            }
        };
        match Self::load(Some(&path)) {
            Ok(config) => config,
            Err(e) => {
                warn!(path = %path.display(), "failed to load configuration: {}", e);
                Self::default()
            }
        }
    }

    pub fn to_toml(&self) -> Result<String, ConfigError> {
        Ok(toml::to_string_pretty(self)?)
    }

    /// Save configuration to file
    pub fn save<P: AsRef<Path>>(&self, path: P) -> Result<(), ConfigError> {
        let content = self.to_toml()?;
        if let Some(parent) = path.as_ref().parent() {
            std::fs::create_dir_all(parent)?;
        }
        std::fs::write(path, content)?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::router::RoutingStrategy;

    #[test]
    fn save_then_load_round_trip() {
        let dir = tempfile::tempdir().expect("tempdir");
        let path = dir.path().join("nested").join("config.toml");

        let mut config = EngineConfig::default();
        config.router.strategy = RoutingStrategy::CapabilityBased;
        config.state.abandonment_secs = 600;
        config.save(&path).expect("save");

        let loaded = EngineConfig::load(Some(&path)).expect("load");
        assert_eq!(loaded.router.strategy, RoutingStrategy::CapabilityBased);
        assert_eq!(loaded.state.abandonment_secs, 600);
        assert_eq!(loaded.underwriting, config.underwriting);
    }

    #[test]
    fn missing_file_yields_defaults() {
        let dir = tempfile::tempdir().expect("tempdir");
        let loaded = EngineConfig::load(Some(&dir.path().join("absent.toml"))).expect("load");
        assert_eq!(loaded, EngineConfig::default());
    }

    #[test]
    fn invalid_file_values_are_rejected() {
        let dir = tempfile::tempdir().expect("tempdir");
        let path = dir.path().join("config.toml");
        std::fs::write(&path, "[state]\nsnapshot_limit = 0\n").expect("write");
        assert!(matches!(
            EngineConfig::load(Some(&path)),
            Err(ConfigError::InvalidValue(_))
        ));
    }
}
