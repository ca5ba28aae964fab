//! # taktsim Scenario Configuration
//!
//! Hierarchical configuration for simulation scenarios.
//!
//! ## Features
//! - **Single source of truth**: one validated `ScenarioConfig` drives the
//!   launcher, the coordinator and the network model
//! - **Validation**: field-level checks via `validator`, cross-field checks
//!   in an explicit semantic pass; every failure is reported before any
//!   external process is started
//! - **Environment awareness**: `TAKTSIM_*` variables override file values
//!
//! Parsing stops here; the rest of the harness only ever sees the validated
//! record.

#![warn(unsafe_code)]
#![deny(rustdoc::broken_intra_doc_links)]

use std::path::{Path, PathBuf};

use figment::{
    providers::{Env, Format, Yaml},
    Figment,
};
use validator::Validate;

mod error;
mod provider;
mod scenario;
mod validation;

pub use error::ConfigError;
pub use provider::ConfigProvider;
pub use scenario::{
    ContainerConfig, MlPlacement, MlPlacementConfig, NetworkConfig, NetworkLink, NetworkModelKind,
    NodeImplementation, NodeSpec, ScenarioConfig, SimulationConfig,
};

impl ScenarioConfig {
    /// Load a scenario from a YAML file, with `TAKTSIM_*` environment
    /// overrides applied on top.
    pub fn load_from_path<P: AsRef<Path>>(path: P) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        if !path.exists() {
            return Err(ConfigError::FileNotFound(PathBuf::from(path)));
        }

        Figment::new()
            .merge(Yaml::file(path))
            .merge(Env::prefixed("TAKTSIM_").split("__"))
            .extract()
            .map_err(ConfigError::from)
            .and_then(Self::check)
    }

    /// Load a scenario from an in-memory YAML document. Used by tests and by
    /// tools that template scenarios programmatically.
    pub fn load_from_str(yaml: &str) -> Result<Self, ConfigError> {
        Figment::new()
            .merge(Yaml::string(yaml))
            .extract()
            .map_err(ConfigError::from)
            .and_then(Self::check)
    }

    /// Load a scenario through an alternative [`ConfigProvider`].
    pub fn load_with_provider(provider: &dyn ConfigProvider) -> Result<Self, ConfigError> {
        provider
            .load()
            .and_then(|figment| figment.extract().map_err(ConfigError::from))
            .and_then(Self::check)
    }

    fn check(config: Self) -> Result<Self, ConfigError> {
        config.validate()?;
        let semantic = config.validate_semantics();
        if !semantic.is_empty() {
            return Err(ConfigError::Semantic(semantic));
        }
        Ok(config)
    }
}
