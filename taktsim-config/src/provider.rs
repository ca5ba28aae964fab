//! Configuration provider trait for loading scenarios from alternative sources.

use figment::Figment;

use crate::ConfigError;

/// Trait for loading a scenario from sources other than a YAML file on disk
/// (remote stores, generated fixtures, test harnesses).
pub trait ConfigProvider {
    /// Loads the configuration and returns a Figment instance.
    fn load(&self) -> Result<Figment, ConfigError>;
}
