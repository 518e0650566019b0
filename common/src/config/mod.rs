mod config_content_provider;
mod config_manager;
mod config_serializer;
mod error;

pub use config_content_provider::{ConfigContentProvider, FileContentConfigProvider};
pub use config_manager::ConfigManager;
pub use config_serializer::{ConfigSerializer, YamlConfigSerializer};
pub use error::ConfigError;

/// Semantic checks run after a config is parsed and before it is stored.
pub trait Validate {
    fn validate(&self) -> Result<(), String>;
}
