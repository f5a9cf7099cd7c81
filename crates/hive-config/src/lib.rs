mod errors;
mod jsonc;
mod loading;
mod types;
mod validation;

pub use errors::ConfigError;
pub use loading::ConfigCache;
pub use types::{
    Defaults, HiveConfig, OpencodeConfig, ServiceDefinition, ServiceKind, Template,
    TemplateAgentConfig,
};
pub use validation::validate_config;
