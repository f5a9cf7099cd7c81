use crate::errors::ConfigError;
use crate::types::HiveConfig;

/// Structural checks that go beyond what serde's shape validation covers.
///
/// Deserialization already rejects wrong types; this catches configs that
/// parse fine but would fail in ways only visible once provisioning starts.
pub fn validate_config(config: &HiveConfig) -> Result<(), ConfigError> {
    for (key, template) in &config.templates {
        if template.id != *key {
            return Err(ConfigError::Invalid {
                message: format!(
                    "template entry '{key}' has mismatched id '{}'",
                    template.id
                ),
            });
        }

        if template.label.trim().is_empty() {
            return Err(ConfigError::Invalid {
                message: format!("template '{key}' has an empty label"),
            });
        }

        for (service_name, service) in &template.services {
            if service_name.trim().is_empty() {
                return Err(ConfigError::Invalid {
                    message: format!("template '{key}' declares a service with an empty name"),
                });
            }
            if service.run.trim().is_empty() {
                return Err(ConfigError::Invalid {
                    message: format!(
                        "template '{key}' service '{service_name}' has an empty run command"
                    ),
                });
            }
            if let Some(timeout) = service.ready_timeout_ms
                && timeout == 0
            {
                return Err(ConfigError::Invalid {
                    message: format!(
                        "template '{key}' service '{service_name}' has readyTimeoutMs of 0"
                    ),
                });
            }
        }
    }

    Ok(())
}
