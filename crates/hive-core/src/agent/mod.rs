//! Agent Runtime (§4.5): binds a cell to a remote coding-agent session,
//! keeps the local status/mode/compaction view of that session current by
//! ingesting its event stream, and exposes the prompt/interrupt/shutdown
//! surface the rest of Hive drives it through.

mod client;
mod credentials;
mod instructions;
mod model;

pub use client::{AgentClient, MessagePart, PromptRequest, RawAgentEvent, RemoteSession};
pub use model::{CatalogModel, CatalogProvider, ModelCandidate, ModelCatalog, ModelSelection};

use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex as SyncMutex};

use chrono::{DateTime, Utc};
use futures::StreamExt;
use hive_config::ConfigCache;
use hive_protocol::{
    AgentEventEnvelope, AgentRuntimeStatus, AgentSessionId, CellId, Mode, ModelId, ProviderId,
};
use sqlx::SqlitePool;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::errors::AgentRuntimeError;
use crate::event_bus::EventBus;

/// Compaction counter maintained from `session.compacted` events.
#[derive(Debug, Clone, Default)]
pub struct Compaction {
    pub count: u32,
    pub last_compaction_at: Option<DateTime<Utc>>,
}

/// In-memory handle for one bound agent session. Mutable fields are each
/// behind their own lock/atomic rather than one coarse lock, since the
/// event-ingestion task and the request-handling callers touch disjoint
/// fields independently.
pub struct AgentRuntimeHandle {
    pub session_id: AgentSessionId,
    pub cell_id: CellId,
    pub workspace_path: PathBuf,
    pub provider_id: Option<ProviderId>,
    pub model_id: SyncMutex<Option<ModelId>>,
    pub start_mode: Mode,
    status: SyncMutex<AgentRuntimeStatus>,
    current_mode: SyncMutex<Mode>,
    mode_updated_at: SyncMutex<Option<DateTime<Utc>>>,
    pending_interrupt: AtomicBool,
    compaction: SyncMutex<Compaction>,
    cancellation: CancellationToken,
}

impl AgentRuntimeHandle {
    pub fn status(&self) -> AgentRuntimeStatus {
        *self.status.lock().expect("agent runtime handle lock poisoned")
    }

    pub fn set_status(&self, status: AgentRuntimeStatus) {
        *self.status.lock().expect("agent runtime handle lock poisoned") = status;
    }

    pub fn current_mode(&self) -> Mode {
        *self.current_mode.lock().expect("agent runtime handle lock poisoned")
    }

    fn set_mode(&self, mode: Mode) {
        *self.current_mode.lock().expect("agent runtime handle lock poisoned") = mode;
        *self.mode_updated_at.lock().expect("agent runtime handle lock poisoned") = Some(Utc::now());
    }

    pub fn pending_interrupt(&self) -> bool {
        self.pending_interrupt.load(Ordering::SeqCst)
    }

    fn set_pending_interrupt(&self, value: bool) {
        self.pending_interrupt.store(value, Ordering::SeqCst);
    }

    pub fn compaction(&self) -> Compaction {
        self.compaction.lock().expect("agent runtime handle lock poisoned").clone()
    }

    fn record_compaction(&self, count_hint: Option<u32>) {
        let mut compaction = self.compaction.lock().expect("agent runtime handle lock poisoned");
        compaction.count = count_hint.unwrap_or(compaction.count + 1);
        compaction.last_compaction_at = Some(Utc::now());
    }
}

struct RegistryInner {
    by_session: HashMap<AgentSessionId, Arc<AgentRuntimeHandle>>,
    by_cell: HashMap<CellId, AgentSessionId>,
}

/// Owns the two lookup maps behind a single lock so they can never drift
/// apart: every insert/remove touches both at once.
pub struct AgentRegistry {
    inner: SyncMutex<RegistryInner>,
}

impl Default for AgentRegistry {
    fn default() -> Self {
        Self::new()
    }
}

impl AgentRegistry {
    pub fn new() -> Self {
        Self {
            inner: SyncMutex::new(RegistryInner {
                by_session: HashMap::new(),
                by_cell: HashMap::new(),
            }),
        }
    }

    pub fn get_by_cell(&self, cell_id: &CellId) -> Option<Arc<AgentRuntimeHandle>> {
        let inner = self.inner.lock().expect("agent registry lock poisoned");
        let session_id = inner.by_cell.get(cell_id)?;
        inner.by_session.get(session_id).cloned()
    }

    pub fn get_by_session(&self, session_id: &AgentSessionId) -> Option<Arc<AgentRuntimeHandle>> {
        self.inner
            .lock()
            .expect("agent registry lock poisoned")
            .by_session
            .get(session_id)
            .cloned()
    }

    fn insert(&self, handle: Arc<AgentRuntimeHandle>) {
        let mut inner = self.inner.lock().expect("agent registry lock poisoned");
        inner.by_cell.insert(handle.cell_id.clone(), handle.session_id.clone());
        inner.by_session.insert(handle.session_id.clone(), handle);
    }

    fn remove(&self, session_id: &AgentSessionId) -> Option<Arc<AgentRuntimeHandle>> {
        let mut inner = self.inner.lock().expect("agent registry lock poisoned");
        let handle = inner.by_session.remove(session_id)?;
        inner.by_cell.remove(&handle.cell_id);
        Some(handle)
    }

    pub fn all(&self) -> Vec<Arc<AgentRuntimeHandle>> {
        self.inner
            .lock()
            .expect("agent registry lock poisoned")
            .by_session
            .values()
            .cloned()
            .collect()
    }

    fn working_without_pending_interrupt(&self) -> Vec<Arc<AgentRuntimeHandle>> {
        self.all()
            .into_iter()
            .filter(|h| h.status() == AgentRuntimeStatus::Working && !h.pending_interrupt())
            .collect()
    }
}

/// The dynamic-collaborator record (§9 Design Notes): every external
/// dependency the runtime needs, grouped so a caller can swap any one of
/// them (a test double for `client`, say) without touching the others.
pub struct RuntimeCollaborators {
    pub pool: SqlitePool,
    pub events: Arc<EventBus>,
    pub config_cache: Arc<ConfigCache>,
    pub client: AgentClient,
}

#[derive(Debug, Clone, Default)]
pub struct EnsureSessionOptions {
    pub force: bool,
    pub start_mode: Option<Mode>,
    pub provider_id: Option<String>,
    pub model_id: Option<String>,
}

/// Owns every bound agent session and the collaborators used to acquire
/// and drive them.
pub struct AgentRuntime {
    collaborators: RuntimeCollaborators,
    registry: AgentRegistry,
}

impl AgentRuntime {
    pub fn new(collaborators: RuntimeCollaborators) -> Arc<Self> {
        Arc::new(Self {
            collaborators,
            registry: AgentRegistry::new(),
        })
    }

    pub fn registry(&self) -> &AgentRegistry {
        &self.registry
    }

    /// Ensure an agent runtime handle exists for `cell_id`, creating or
    /// reusing the remote session as needed (§4.5.1).
    pub async fn ensure_agent_session(
        self: &Arc<Self>,
        cell_id: &CellId,
        opts: EnsureSessionOptions,
    ) -> Result<Arc<AgentRuntimeHandle>, AgentRuntimeError> {
        let cell = hive_store::cells::get_cell(&self.collaborators.pool, cell_id)
            .await
            .map_err(|_| AgentRuntimeError::CellNotFound(cell_id.to_string()))?;

        if !opts.force
            && let Some(handle) = self.registry.get_by_cell(cell_id)
        {
            let services = hive_store::services::list_services_by_cell(&self.collaborators.pool, cell_id)
                .await
                .unwrap_or_default();
            if let Err(e) = instructions::write_to(&cell.workspace_root_path, &cell, &services) {
                warn!(event = "core.agent.instructions_write_failed", cell_id = %cell_id, error = %e);
            }
            return Ok(handle);
        }

        let config = self.collaborators.config_cache.load(&cell.workspace_root_path)?;
        let template = config.template(cell.template_id.as_str());
        let catalog = self.collaborators.client.providers().await?;

        let provisioning = hive_store::provisioning::get_provisioning_state(&self.collaborators.pool, cell_id)
            .await
            .ok()
            .flatten();

        let session_reusable = !opts.force && cell.opencode_session_id.is_some();

        // Probe reusability before deciding whether the provisioning override
        // applies: `created` must reflect the "fetch failed" case too, not
        // just "force" or "no existing session", so a failed `get_session`
        // call gets the same override treatment as a brand-new session.
        let existing_session = if session_reusable {
            let existing = cell.opencode_session_id.clone().expect("checked above");
            match self.collaborators.client.get_session(existing.as_str()).await {
                Ok(session) => Some(session),
                Err(e) => {
                    warn!(event = "core.agent.session_fetch_failed", cell_id = %cell_id, error = %e);
                    None
                }
            }
        } else {
            None
        };
        let created = existing_session.is_none();

        let explicit_override = if opts.model_id.is_some() {
            Some(ModelCandidate::new(opts.provider_id.clone(), opts.model_id.clone()))
        } else if created {
            provisioning.as_ref().and_then(|p| {
                p.model_id_override.as_ref().map(|m| {
                    ModelCandidate::new(p.provider_id_override.as_ref().map(|p| p.to_string()), Some(m.to_string()))
                })
            })
        } else {
            None
        };

        let agent_config = template.and_then(|t| t.agent.clone());

        let workspace_default = {
            let provider_id = config
                .opencode
                .default_provider
                .clone()
                .or_else(|| config.defaults.provider_id.clone());
            let model_id = config
                .opencode
                .default_model
                .clone()
                .or_else(|| config.defaults.model_id.clone());
            ModelCandidate::new(provider_id, model_id)
        };

        let selection = model::select_model(&catalog, explicit_override.as_ref(), agent_config.as_ref(), Some(&workspace_default))?;

        let start_mode = opts
            .start_mode
            .or(provisioning.as_ref().and_then(|p| p.start_mode))
            .or_else(|| config.opencode.default_mode.as_deref().and_then(Mode::parse))
            .or_else(|| config.defaults.default_agent.as_deref().and_then(Mode::parse))
            .unwrap_or(Mode::Plan);

        if let Some(provider_id) = &selection.provider_id {
            let auth_path = hive_paths::credentials_path().map_err(|e| AgentRuntimeError::CredentialMissing(e.to_string()))?;
            credentials::validate_provider_credentials(&auth_path, provider_id)?;
        }

        let session = match existing_session {
            Some(session) => session,
            None => {
                self.collaborators
                    .client
                    .create_session(&cell.name, &cell.workspace_path.to_string_lossy())
                    .await?
            }
        };

        hive_store::cells::update_cell(
            &self.collaborators.pool,
            cell_id,
            hive_store::CellPatch {
                opencode_session_id: Some(Some(AgentSessionId::new(session.id.clone()))),
                ..Default::default()
            },
        )
        .await?;

        if created && start_mode == Mode::Plan {
            let seed = PromptRequest {
                parts: vec![MessagePart::text("")],
                agent: Mode::Plan.as_str().to_string(),
                model: selection.model_id.clone(),
            };
            if let Err(e) = self.collaborators.client.send_prompt(&session.id, &seed).await {
                warn!(event = "core.agent.seed_prompt_failed", cell_id = %cell_id, error = %e);
            }
        }

        let messages = self.collaborators.client.list_messages(&session.id).await.ok();

        let mut effective_model_id = selection.model_id.clone();
        if opts.model_id.is_none()
            && let Some(messages) = &messages
            && let Some(last_user_model) = messages.iter().rev().find(|m| m.role == "user").and_then(|m| m.model.clone())
        {
            effective_model_id = Some(last_user_model);
        }

        let mut current_mode = start_mode;
        if let Some(messages) = &messages
            && let Some(mode_str) = messages.iter().rev().find(|m| m.role == "assistant").and_then(|m| m.mode.clone())
            && let Some(mode) = Mode::parse(&mode_str)
        {
            current_mode = mode;
        }

        if created
            && let Some(explicit_model) = &opts.model_id
            && Some(explicit_model) != effective_model_id.as_ref()
        {
            let persist = PromptRequest {
                parts: vec![MessagePart::text("")],
                agent: current_mode.as_str().to_string(),
                model: Some(explicit_model.clone()),
            };
            if let Err(e) = self.collaborators.client.send_prompt(&session.id, &persist).await {
                warn!(event = "core.agent.model_persist_prompt_failed", cell_id = %cell_id, error = %e);
            } else {
                effective_model_id = Some(explicit_model.clone());
            }
        }

        let services = hive_store::services::list_services_by_cell(&self.collaborators.pool, cell_id)
            .await
            .unwrap_or_default();
        if let Err(e) = instructions::write_to(&cell.workspace_root_path, &cell, &services) {
            warn!(event = "core.agent.instructions_write_failed", cell_id = %cell_id, error = %e);
        }

        let handle = Arc::new(AgentRuntimeHandle {
            session_id: AgentSessionId::new(session.id.clone()),
            cell_id: cell_id.clone(),
            workspace_path: cell.workspace_path.clone(),
            provider_id: selection.provider_id.map(ProviderId::new),
            model_id: SyncMutex::new(effective_model_id.map(ModelId::new)),
            start_mode,
            status: SyncMutex::new(AgentRuntimeStatus::AwaitingInput),
            current_mode: SyncMutex::new(current_mode),
            mode_updated_at: SyncMutex::new(None),
            pending_interrupt: AtomicBool::new(false),
            compaction: SyncMutex::new(Compaction::default()),
            cancellation: CancellationToken::new(),
        });

        self.spawn_event_ingestion(handle.clone());
        self.registry.insert(handle.clone());

        info!(event = "core.agent.session_ready", cell_id = %cell_id, session_id = %handle.session_id, created = created);
        Ok(handle)
    }

    /// Subscribe to the shared event stream and apply the status/mode/
    /// compaction synthesis rules (§4.5.4) for events bound to this session.
    fn spawn_event_ingestion(self: &Arc<Self>, handle: Arc<AgentRuntimeHandle>) {
        let runtime = Arc::clone(self);
        let token = handle.cancellation.clone();
        tokio::spawn(async move {
            let mut stream = match runtime.collaborators.client.subscribe_events().await {
                Ok(stream) => stream,
                Err(e) => {
                    warn!(event = "core.agent.event_stream_open_failed", session_id = %handle.session_id, error = %e);
                    return;
                }
            };
            loop {
                tokio::select! {
                    _ = token.cancelled() => break,
                    next = stream.next() => {
                        match next {
                            Some(Ok(event)) => {
                                if event.session_id.as_deref() != Some(handle.session_id.as_str()) {
                                    continue;
                                }
                                runtime.apply_event(&handle, event);
                            }
                            Some(Err(e)) => {
                                warn!(event = "core.agent.event_stream_error", session_id = %handle.session_id, error = %e);
                            }
                            None => break,
                        }
                    }
                }
            }
            debug!(event = "core.agent.event_ingestion_stopped", session_id = %handle.session_id);
        });
    }

    fn apply_event(&self, handle: &Arc<AgentRuntimeHandle>, event: RawAgentEvent) {
        match event.event_type.as_str() {
            "message.updated" => {
                let role = event.properties.get("role").and_then(|v| v.as_str());
                if role == Some("assistant") {
                    if let Some(mode) = event.properties.get("mode").and_then(|v| v.as_str()).and_then(Mode::parse) {
                        handle.set_mode(mode);
                        self.publish(handle, AgentEventEnvelope::new("mode", serde_json::json!({"mode": mode.as_str()})));
                    }
                    if !handle.pending_interrupt() {
                        handle.set_status(AgentRuntimeStatus::Working);
                    }
                }
            }
            "session.compacted" => {
                let count_hint = event
                    .properties
                    .get("compacted")
                    .or_else(|| event.properties.get("count"))
                    .and_then(|v| v.as_u64())
                    .map(|v| v as u32);
                handle.record_compaction(count_hint);
                self.publish(
                    handle,
                    AgentEventEnvelope::new("session.compaction", serde_json::json!({"properties": event.properties})),
                );
            }
            "session.error" => {
                let message = event
                    .properties
                    .get("message")
                    .and_then(|v| v.as_str())
                    .unwrap_or("agent session error")
                    .to_string();
                if handle.pending_interrupt() {
                    handle.set_pending_interrupt(false);
                    handle.set_status(AgentRuntimeStatus::AwaitingInput);
                } else {
                    handle.set_status(AgentRuntimeStatus::Error);
                    warn!(event = "core.agent.session_error", session_id = %handle.session_id, message = %message);
                }
            }
            "session.idle" => {
                handle.set_status(AgentRuntimeStatus::AwaitingInput);
            }
            "session.status" => {
                let inner_idle = event.properties.get("status").and_then(|v| v.as_str()) == Some("idle");
                if !inner_idle {
                    handle.set_status(AgentRuntimeStatus::Working);
                }
            }
            "permission.asked" | "permission.updated" | "question.asked" | "question.rejected" => {
                handle.set_status(AgentRuntimeStatus::AwaitingInput);
            }
            "permission.replied" | "question.replied" => {
                handle.set_status(AgentRuntimeStatus::Working);
            }
            _ => {}
        }

        self.publish(handle, AgentEventEnvelope::new(event.event_type, event.properties));
    }

    fn publish(&self, handle: &Arc<AgentRuntimeHandle>, envelope: AgentEventEnvelope) {
        self.collaborators.events.publish_agent_event(handle.session_id.as_str(), envelope);
    }

    /// Send a user prompt (§4.5.5). Sets `working` first so UI reflects the
    /// in-flight state even before the remote server's own events arrive.
    pub async fn send_agent_message(self: &Arc<Self>, session_id: &AgentSessionId, content: &str) -> Result<(), AgentRuntimeError> {
        let handle = self
            .registry
            .get_by_session(session_id)
            .ok_or_else(|| AgentRuntimeError::RuntimeNotFound(session_id.to_string()))?;

        handle.set_status(AgentRuntimeStatus::Working);
        let model_id = handle.model_id.lock().expect("agent runtime handle lock poisoned").clone();
        let request = PromptRequest {
            parts: vec![MessagePart::text(content)],
            agent: handle.current_mode().as_str().to_string(),
            model: model_id.map(|m| m.to_string()),
        };

        match self.collaborators.client.send_prompt(session_id.as_str(), &request).await {
            Ok(()) => Ok(()),
            Err(e @ AgentRuntimeError::MessageAborted(_)) if handle.pending_interrupt() => {
                debug!(event = "core.agent.send_aborted_by_interrupt", session_id = %session_id, error = %e);
                handle.set_status(AgentRuntimeStatus::AwaitingInput);
                Ok(())
            }
            Err(e) => {
                handle.set_status(AgentRuntimeStatus::Error);
                Err(e)
            }
        }
    }

    pub async fn interrupt_agent_session(self: &Arc<Self>, session_id: &AgentSessionId) -> Result<(), AgentRuntimeError> {
        let handle = self
            .registry
            .get_by_session(session_id)
            .ok_or_else(|| AgentRuntimeError::RuntimeNotFound(session_id.to_string()))?;

        handle.set_pending_interrupt(true);
        match self.collaborators.client.abort(session_id.as_str()).await {
            Ok(()) => {
                handle.set_status(AgentRuntimeStatus::AwaitingInput);
                Ok(())
            }
            Err(e) => {
                handle.set_pending_interrupt(false);
                Err(e)
            }
        }
    }

    pub async fn stop_agent_session(self: &Arc<Self>, session_id: &AgentSessionId, delete_remote: bool) -> Result<(), AgentRuntimeError> {
        let Some(handle) = self.registry.get_by_session(session_id) else {
            return Ok(());
        };
        handle.cancellation.cancel();
        if delete_remote {
            self.collaborators.client.delete_session(session_id.as_str()).await?;
        }
        handle.set_status(AgentRuntimeStatus::Completed);
        self.registry.remove(session_id);
        Ok(())
    }

    pub async fn close_all_agent_sessions(self: &Arc<Self>, delete_remote: bool) {
        for handle in self.registry.all() {
            if let Err(e) = self.stop_agent_session(&handle.session_id, delete_remote).await {
                warn!(event = "core.agent.close_all_failed", session_id = %handle.session_id, error = %e);
            }
        }
    }

    /// Mark every still-working runtime's cell for resume, called just
    /// before shutdown closes all sessions.
    pub async fn mark_agent_sessions_for_resume(self: &Arc<Self>) {
        for handle in self.registry.working_without_pending_interrupt() {
            if let Err(e) = hive_store::cells::update_cell(
                &self.collaborators.pool,
                &handle.cell_id,
                hive_store::CellPatch {
                    resume_agent_session_on_startup: Some(true),
                    ..Default::default()
                },
            )
            .await
            {
                warn!(event = "core.agent.mark_resume_failed", cell_id = %handle.cell_id, error = %e);
            }
        }
    }

    /// Re-open every cell flagged for resume on process startup, nudging
    /// sessions that were cut off mid-reply to continue.
    pub async fn resume_agent_sessions_on_startup(self: &Arc<Self>) {
        let cells = match hive_store::cells::list_cells(&self.collaborators.pool).await {
            Ok(cells) => cells,
            Err(e) => {
                warn!(event = "core.agent.resume_list_failed", error = %e);
                return;
            }
        };

        for cell in cells.into_iter().filter(|c| c.resume_agent_session_on_startup) {
            let cell_id = cell.id.clone();
            let result = self.ensure_agent_session(&cell_id, EnsureSessionOptions::default()).await;
            let handle = match result {
                Ok(handle) => handle,
                Err(e) => {
                    warn!(event = "core.agent.resume_ensure_failed", cell_id = %cell_id, error = %e);
                    continue;
                }
            };

            let incomplete = self
                .collaborators
                .client
                .list_messages(handle.session_id.as_str())
                .await
                .ok()
                .and_then(|messages| messages.into_iter().rev().find(|m| m.role == "assistant"))
                .is_some_and(|m| m.error.is_none() && m.time.and_then(|t| t.completed).is_none());

            if incomplete
                && let Err(e) = self.send_agent_message(&handle.session_id, "Please continue").await
            {
                warn!(event = "core.agent.resume_continue_failed", cell_id = %cell_id, error = %e);
            }

            if let Err(e) = hive_store::cells::update_cell(
                &self.collaborators.pool,
                &cell_id,
                hive_store::CellPatch {
                    resume_agent_session_on_startup: Some(false),
                    ..Default::default()
                },
            )
            .await
            {
                warn!(event = "core.agent.resume_clear_flag_failed", cell_id = %cell_id, error = %e);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn registry_insert_and_lookup_by_both_keys() {
        let registry = AgentRegistry::new();
        let handle = Arc::new(AgentRuntimeHandle {
            session_id: AgentSessionId::new("sess-1"),
            cell_id: CellId::new("cell-1"),
            workspace_path: PathBuf::from("/repo/.hive/cells/cell-1"),
            provider_id: None,
            model_id: SyncMutex::new(None),
            start_mode: Mode::Plan,
            status: SyncMutex::new(AgentRuntimeStatus::AwaitingInput),
            current_mode: SyncMutex::new(Mode::Plan),
            mode_updated_at: SyncMutex::new(None),
            pending_interrupt: AtomicBool::new(false),
            compaction: SyncMutex::new(Compaction::default()),
            cancellation: CancellationToken::new(),
        });
        registry.insert(handle.clone());

        assert!(registry.get_by_cell(&CellId::new("cell-1")).is_some());
        assert!(registry.get_by_session(&AgentSessionId::new("sess-1")).is_some());

        let removed = registry.remove(&AgentSessionId::new("sess-1")).unwrap();
        assert_eq!(removed.session_id, handle.session_id);
        assert!(registry.get_by_cell(&CellId::new("cell-1")).is_none());
    }

    #[test]
    fn handle_mode_update_bumps_timestamp() {
        let handle = AgentRuntimeHandle {
            session_id: AgentSessionId::new("sess-1"),
            cell_id: CellId::new("cell-1"),
            workspace_path: PathBuf::from("/repo/.hive/cells/cell-1"),
            provider_id: None,
            model_id: SyncMutex::new(None),
            start_mode: Mode::Plan,
            status: SyncMutex::new(AgentRuntimeStatus::AwaitingInput),
            current_mode: SyncMutex::new(Mode::Plan),
            mode_updated_at: SyncMutex::new(None),
            pending_interrupt: AtomicBool::new(false),
            compaction: SyncMutex::new(Compaction::default()),
            cancellation: CancellationToken::new(),
        };
        assert!(handle.mode_updated_at.lock().unwrap().is_none());
        handle.set_mode(Mode::Build);
        assert_eq!(handle.current_mode(), Mode::Build);
        assert!(handle.mode_updated_at.lock().unwrap().is_some());
    }

    #[test]
    fn handle_compaction_defaults_to_increment() {
        let handle = AgentRuntimeHandle {
            session_id: AgentSessionId::new("sess-1"),
            cell_id: CellId::new("cell-1"),
            workspace_path: PathBuf::from("/repo/.hive/cells/cell-1"),
            provider_id: None,
            model_id: SyncMutex::new(None),
            start_mode: Mode::Plan,
            status: SyncMutex::new(AgentRuntimeStatus::AwaitingInput),
            current_mode: SyncMutex::new(Mode::Plan),
            mode_updated_at: SyncMutex::new(None),
            pending_interrupt: AtomicBool::new(false),
            compaction: SyncMutex::new(Compaction::default()),
            cancellation: CancellationToken::new(),
        };
        handle.record_compaction(None);
        handle.record_compaction(None);
        assert_eq!(handle.compaction().count, 2);
        handle.record_compaction(Some(9));
        assert_eq!(handle.compaction().count, 9);
    }
}
