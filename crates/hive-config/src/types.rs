use std::collections::HashMap;

use serde::{Deserialize, Serialize};

/// A single process-type service entry inside a template.
///
/// Only `type = "process"` is implemented end to end; other tags
/// (`docker`, `compose`) are accepted for forward compatibility but are
/// not started by the supervisor — see `ServiceKind`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ServiceDefinition {
    #[serde(default = "ServiceKind::default_process")]
    #[serde(rename = "type")]
    pub kind: ServiceKind,
    pub run: String,
    #[serde(default)]
    pub cwd: Option<String>,
    #[serde(default)]
    pub env: HashMap<String, String>,
    #[serde(default)]
    pub stop: Option<String>,
    #[serde(default)]
    pub setup: Vec<String>,
    #[serde(default)]
    pub ready_timeout_ms: Option<u64>,
    /// Declared port-binding env var names (informational; the supervisor
    /// injects `<SANITIZED_NAME>_PORT` for every sibling regardless).
    #[serde(default)]
    pub ports: Vec<String>,
}

/// Tagged variant for a service definition's backing mechanism.
///
/// Only `Process` is specified. `Docker`/`Compose` are preserved as
/// forward-compatible tags so templates authored against a future Hive
/// version still deserialize; the supervisor skips any service whose kind
/// is not `Process`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ServiceKind {
    Process,
    Docker,
    Compose,
}

impl ServiceKind {
    fn default_process() -> Self {
        ServiceKind::Process
    }
}

/// Template-level agent defaults (`template.agent.{providerId,modelId}`).
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TemplateAgentConfig {
    #[serde(default)]
    pub provider_id: Option<String>,
    #[serde(default)]
    pub model_id: Option<String>,
}

/// A workspace-defined template: setup commands, service definitions, and
/// agent defaults applied when provisioning a cell.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Template {
    pub id: String,
    pub label: String,
    #[serde(rename = "type")]
    pub template_type: String,
    #[serde(default)]
    pub setup: Vec<String>,
    #[serde(default)]
    pub services: HashMap<String, ServiceDefinition>,
    #[serde(default)]
    pub env: HashMap<String, String>,
    #[serde(default)]
    pub agent: Option<TemplateAgentConfig>,
}

impl Template {
    /// Process-type service entries only, in a deterministic (name-sorted)
    /// order so ensure/start passes are reproducible across runs.
    pub fn process_services(&self) -> Vec<(&String, &ServiceDefinition)> {
        let mut entries: Vec<_> = self
            .services
            .iter()
            .filter(|(_, def)| def.kind == ServiceKind::Process)
            .collect();
        entries.sort_by_key(|(name, _)| name.as_str());
        entries
    }
}

/// `hiveConfig.opencode` overlay: workspace-level agent runtime preferences.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct OpencodeConfig {
    #[serde(default)]
    pub default_provider: Option<String>,
    #[serde(default)]
    pub default_model: Option<String>,
    #[serde(default)]
    pub default_mode: Option<String>,
}

/// Top-level workspace defaults (`hiveConfig.defaults`).
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Defaults {
    #[serde(default)]
    pub provider_id: Option<String>,
    #[serde(default)]
    pub model_id: Option<String>,
    #[serde(default)]
    pub default_agent: Option<String>,
}

/// Workspace-scoped configuration (`hive.config.{json,jsonc}` at the
/// workspace root or a nested `hive/` dir). Cached per workspace root with
/// invalidation on file modification time — see `loading::ConfigCache`.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct HiveConfig {
    #[serde(default)]
    pub opencode: OpencodeConfig,
    #[serde(default)]
    pub prompt_sources: Vec<String>,
    #[serde(default)]
    pub templates: HashMap<String, Template>,
    #[serde(default)]
    pub defaults: Defaults,
}

impl HiveConfig {
    pub fn template(&self, template_id: &str) -> Option<&Template> {
        self.templates.get(template_id)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn template_process_services_filters_and_sorts() {
        let mut services = HashMap::new();
        services.insert(
            "worker".to_string(),
            ServiceDefinition {
                kind: ServiceKind::Process,
                run: "node worker.js".to_string(),
                cwd: None,
                env: HashMap::new(),
                stop: None,
                setup: vec![],
                ready_timeout_ms: None,
                ports: vec![],
            },
        );
        services.insert(
            "db".to_string(),
            ServiceDefinition {
                kind: ServiceKind::Docker,
                run: "postgres".to_string(),
                cwd: None,
                env: HashMap::new(),
                stop: None,
                setup: vec![],
                ready_timeout_ms: None,
                ports: vec![],
            },
        );
        services.insert(
            "api".to_string(),
            ServiceDefinition {
                kind: ServiceKind::Process,
                run: "bun run dev".to_string(),
                cwd: None,
                env: HashMap::new(),
                stop: None,
                setup: vec![],
                ready_timeout_ms: None,
                ports: vec![],
            },
        );
        let template = Template {
            id: "t1".to_string(),
            label: "Template".to_string(),
            template_type: "node".to_string(),
            setup: vec![],
            services,
            env: HashMap::new(),
            agent: None,
        };
        let names: Vec<&str> = template
            .process_services()
            .into_iter()
            .map(|(name, _)| name.as_str())
            .collect();
        assert_eq!(names, vec!["api", "worker"]);
    }

    #[test]
    fn service_definition_deserializes_with_defaults() {
        let json = r#"{"run": "bun run dev"}"#;
        let def: ServiceDefinition = serde_json::from_str(json).unwrap();
        assert_eq!(def.kind, ServiceKind::Process);
        assert!(def.env.is_empty());
        assert!(def.setup.is_empty());
        assert_eq!(def.ready_timeout_ms, None);
    }

    #[test]
    fn hive_config_deserializes_minimal() {
        let json = r#"{"promptSources": ["AGENTS.md"], "templates": {}}"#;
        let config: HiveConfig = serde_json::from_str(json).unwrap();
        assert_eq!(config.prompt_sources, vec!["AGENTS.md".to_string()]);
        assert!(config.templates.is_empty());
    }
}
