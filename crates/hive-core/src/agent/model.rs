//! Model selection algorithm (§4.5.2): resolves a provider/model pair
//! against a remote provider catalog, trying an explicit override, the
//! template's agent config, the workspace default, and finally a
//! catalog-wide default, in that order.

use hive_config::TemplateAgentConfig;

use crate::errors::AgentRuntimeError;

/// One entry in the remote `config.providers` catalog.
#[derive(Debug, Clone)]
pub struct CatalogModel {
    /// The catalog key — what gets persisted as the resolved `modelId`.
    pub key: String,
    /// An alternate id a candidate's `modelId` may also match against.
    pub id: Option<String>,
}

#[derive(Debug, Clone)]
pub struct CatalogProvider {
    pub id: String,
    pub models: Vec<CatalogModel>,
}

/// The provider/model catalog fetched once per `ensureAgentSession` call.
#[derive(Debug, Clone, Default)]
pub struct ModelCatalog {
    pub providers: Vec<CatalogProvider>,
    /// `providerId -> modelId` default advertised by the remote server.
    pub defaults: std::collections::HashMap<String, String>,
}

/// A candidate provider/model pair, as supplied by an override, a
/// template's agent config, or a workspace default.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ModelCandidate {
    pub provider_id: Option<String>,
    pub model_id: Option<String>,
}

impl ModelCandidate {
    pub fn new(provider_id: Option<String>, model_id: Option<String>) -> Self {
        Self { provider_id, model_id }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ModelSelection {
    pub provider_id: Option<String>,
    pub model_id: Option<String>,
}

/// Resolve a `{providerId?, modelId}` candidate against the catalog.
///
/// If a provider is given, the candidate matches if that provider's model
/// list contains `model_id` either as a key or as an entry's `id` alias.
/// If no provider is given, providers are scanned in catalog order and the
/// first match wins. The returned `model_id` is always the catalog key,
/// never the alias.
fn resolve_candidate(
    catalog: &ModelCatalog,
    provider_id: Option<&str>,
    model_id: &str,
) -> Option<(String, String)> {
    let match_in = |provider: &CatalogProvider| {
        provider
            .models
            .iter()
            .find(|m| m.key == model_id || m.id.as_deref() == Some(model_id))
            .map(|m| (provider.id.clone(), m.key.clone()))
    };

    match provider_id {
        Some(pid) => catalog.providers.iter().find(|p| p.id == pid).and_then(match_in),
        None => catalog.providers.iter().find_map(match_in),
    }
}

fn invalid_override_error(catalog: &ModelCatalog, provider_id: Option<&str>, model_id: &str) -> AgentRuntimeError {
    let (provider_id, available) = match provider_id {
        Some(pid) => {
            let available = catalog
                .providers
                .iter()
                .find(|p| p.id == pid)
                .map(|p| p.models.iter().map(|m| m.key.clone()).collect::<Vec<_>>().join(", "))
                .unwrap_or_default();
            (pid.to_string(), available)
        }
        None => {
            let available = catalog.providers.iter().map(|p| p.id.clone()).collect::<Vec<_>>().join(", ");
            (String::new(), available)
        }
    };
    AgentRuntimeError::ModelOverrideInvalid {
        provider_id,
        model_id: model_id.to_string(),
        available,
    }
}

/// Run the full priority chain and return the resolved selection.
///
/// `override_candidate` is the explicit caller override, or — when there
/// is none — the persisted provisioning override, gated by the caller per
/// the "force / no existing session / fetch failed" rule before it ever
/// reaches here.
pub fn select_model(
    catalog: &ModelCatalog,
    override_candidate: Option<&ModelCandidate>,
    agent_config: Option<&TemplateAgentConfig>,
    workspace_default: Option<&ModelCandidate>,
) -> Result<ModelSelection, AgentRuntimeError> {
    if let Some(candidate) = override_candidate
        && let Some(model_id) = candidate.model_id.as_deref()
    {
        return match resolve_candidate(catalog, candidate.provider_id.as_deref(), model_id) {
            Some((provider_id, model_id)) => Ok(ModelSelection {
                provider_id: Some(provider_id),
                model_id: Some(model_id),
            }),
            None => Err(invalid_override_error(catalog, candidate.provider_id.as_deref(), model_id)),
        };
    }

    let implied_provider = agent_config.and_then(|a| a.provider_id.clone());
    if let Some(agent) = agent_config
        && let Some(model_id) = agent.model_id.as_deref()
        && let Some((provider_id, model_id)) = resolve_candidate(catalog, agent.provider_id.as_deref(), model_id)
    {
        return Ok(ModelSelection {
            provider_id: Some(provider_id),
            model_id: Some(model_id),
        });
    }

    if let Some(workspace) = workspace_default
        && let Some(model_id) = workspace.model_id.as_deref()
    {
        let provider_matches = match (&implied_provider, &workspace.provider_id) {
            (Some(implied), Some(candidate)) => implied == candidate,
            _ => true,
        };
        if provider_matches
            && let Some((provider_id, model_id)) = resolve_candidate(catalog, workspace.provider_id.as_deref(), model_id)
        {
            return Ok(ModelSelection {
                provider_id: Some(provider_id),
                model_id: Some(model_id),
            });
        }
    }

    if let Some(first) = catalog.providers.first() {
        if let Some(default_model) = catalog.defaults.get(&first.id)
            && let Some((provider_id, model_id)) = resolve_candidate(catalog, Some(first.id.as_str()), default_model)
        {
            return Ok(ModelSelection {
                provider_id: Some(provider_id),
                model_id: Some(model_id),
            });
        }
        if let Some(model) = first.models.first() {
            return Ok(ModelSelection {
                provider_id: Some(first.id.clone()),
                model_id: Some(model.key.clone()),
            });
        }
    }

    Ok(ModelSelection::default())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn catalog() -> ModelCatalog {
        ModelCatalog {
            providers: vec![
                CatalogProvider {
                    id: "anthropic".into(),
                    models: vec![
                        CatalogModel { key: "claude-opus-4".into(), id: None },
                        CatalogModel {
                            key: "claude-sonnet-4".into(),
                            id: Some("sonnet".into()),
                        },
                    ],
                },
                CatalogProvider {
                    id: "opencode".into(),
                    models: vec![CatalogModel { key: "gpt-5.2".into(), id: None }],
                },
            ],
            defaults: [("anthropic".to_string(), "claude-sonnet-4".to_string())].into(),
        }
    }

    #[test]
    fn explicit_override_resolves_by_alias() {
        let selection = select_model(
            &catalog(),
            Some(&ModelCandidate::new(Some("anthropic".into()), Some("sonnet".into()))),
            None,
            None,
        )
        .unwrap();
        assert_eq!(selection.model_id.as_deref(), Some("claude-sonnet-4"));
        assert_eq!(selection.provider_id.as_deref(), Some("anthropic"));
    }

    #[test]
    fn explicit_override_without_provider_scans_catalog_order() {
        let selection = select_model(
            &catalog(),
            Some(&ModelCandidate::new(None, Some("gpt-5.2".into()))),
            None,
            None,
        )
        .unwrap();
        assert_eq!(selection.provider_id.as_deref(), Some("opencode"));
    }

    #[test]
    fn invalid_override_lists_available_models_for_provider() {
        let err = select_model(
            &catalog(),
            Some(&ModelCandidate::new(Some("anthropic".into()), Some("gpt-5.2".into()))),
            None,
            None,
        )
        .unwrap_err();
        match err {
            AgentRuntimeError::ModelOverrideInvalid { available, .. } => {
                assert!(available.contains("claude-opus-4"));
                assert!(available.contains("claude-sonnet-4"));
            }
            other => panic!("expected ModelOverrideInvalid, got {other:?}"),
        }
    }

    #[test]
    fn falls_back_to_template_agent_config_when_no_override() {
        let agent = TemplateAgentConfig {
            provider_id: Some("opencode".into()),
            model_id: Some("gpt-5.2".into()),
        };
        let selection = select_model(&catalog(), None, Some(&agent), None).unwrap();
        assert_eq!(selection.provider_id.as_deref(), Some("opencode"));
        assert_eq!(selection.model_id.as_deref(), Some("gpt-5.2"));
    }

    #[test]
    fn workspace_default_used_only_when_provider_matches_template_agent() {
        let agent = TemplateAgentConfig {
            provider_id: Some("anthropic".into()),
            model_id: None,
        };
        let mismatched = ModelCandidate::new(Some("opencode".into()), Some("gpt-5.2".into()));
        let selection = select_model(&catalog(), None, Some(&agent), Some(&mismatched)).unwrap();
        // workspace default's provider disagrees with the template's, so it's
        // skipped and we fall through to the catalog-wide default instead.
        assert_eq!(selection.provider_id.as_deref(), Some("anthropic"));
        assert_eq!(selection.model_id.as_deref(), Some("claude-sonnet-4"));
    }

    #[test]
    fn falls_back_to_provider_default_model() {
        let selection = select_model(&catalog(), None, None, None).unwrap();
        assert_eq!(selection.provider_id.as_deref(), Some("anthropic"));
        assert_eq!(selection.model_id.as_deref(), Some("claude-sonnet-4"));
    }

    #[test]
    fn empty_catalog_yields_no_selection() {
        let selection = select_model(&ModelCatalog::default(), None, None, None).unwrap();
        assert_eq!(selection, ModelSelection::default());
    }
}
