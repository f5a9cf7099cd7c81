use std::collections::HashMap;
use std::path::PathBuf;

use chrono::{DateTime, Utc};
use hive_protocol::{
    AgentSessionId, CellId, CellStatus, ModelId, Mode, ProviderId, ProvisioningStatus, RunId,
    ServiceId, ServiceStatus, TemplateId, WorkspaceId,
};

/// A `Cell` row: an isolated per-task environment (worktree + services +
/// agent binding). See spec §3.
#[derive(Debug, Clone, PartialEq)]
pub struct Cell {
    pub id: CellId,
    pub name: String,
    pub template_id: TemplateId,
    pub workspace_path: PathBuf,
    pub workspace_root_path: PathBuf,
    pub workspace_id: WorkspaceId,
    pub description: Option<String>,
    pub status: CellStatus,
    pub opencode_session_id: Option<AgentSessionId>,
    pub resume_agent_session_on_startup: bool,
    pub last_setup_error: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// Fields to create a new cell. `id`/`created_at`/`updated_at` are assigned
/// by the caller (provisioning engine owns id generation so the worktree
/// path can be computed before the row is written).
#[derive(Debug, Clone)]
pub struct NewCell {
    pub id: CellId,
    pub name: String,
    pub template_id: TemplateId,
    pub workspace_path: PathBuf,
    pub workspace_root_path: PathBuf,
    pub workspace_id: WorkspaceId,
    pub description: Option<String>,
}

/// Sparse patch applied to an existing cell row. `None` fields are left
/// untouched; `updated_at` is always bumped to the store's `now()`.
#[derive(Debug, Clone, Default)]
pub struct CellPatch {
    pub status: Option<CellStatus>,
    pub opencode_session_id: Option<Option<AgentSessionId>>,
    pub resume_agent_session_on_startup: Option<bool>,
    pub last_setup_error: Option<Option<String>>,
}

impl CellPatch {
    pub fn status(status: CellStatus) -> Self {
        Self {
            status: Some(status),
            ..Default::default()
        }
    }

    pub fn with_last_setup_error(mut self, error: Option<String>) -> Self {
        self.last_setup_error = Some(error);
        self
    }
}

/// A `CellService` row: a long-running child process managed on behalf of
/// a cell. See spec §3. Only `service_type == "process"` is started by the
/// supervisor; other tags are accepted for forward compatibility.
#[derive(Debug, Clone, PartialEq)]
pub struct CellService {
    pub id: ServiceId,
    pub cell_id: CellId,
    pub name: String,
    pub service_type: String,
    pub command: String,
    pub cwd: PathBuf,
    pub env: HashMap<String, String>,
    /// Opaque structural snapshot of the template service entry, used only
    /// for drift detection — never parsed for meaning by the store.
    pub definition: serde_json::Value,
    pub port: Option<u16>,
    pub pid: Option<u32>,
    pub status: ServiceStatus,
    pub ready_timeout_ms: Option<u64>,
    pub last_known_error: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

#[derive(Debug, Clone)]
pub struct NewCellService {
    pub id: ServiceId,
    pub cell_id: CellId,
    pub name: String,
    pub service_type: String,
    pub command: String,
    pub cwd: PathBuf,
    pub env: HashMap<String, String>,
    pub definition: serde_json::Value,
    pub ready_timeout_ms: Option<u64>,
}

/// Sparse patch applied to an existing service row.
#[derive(Debug, Clone, Default)]
pub struct ServicePatch {
    pub command: Option<String>,
    pub cwd: Option<PathBuf>,
    pub env: Option<HashMap<String, String>>,
    pub definition: Option<serde_json::Value>,
    pub port: Option<Option<u16>>,
    pub pid: Option<Option<u32>>,
    pub status: Option<ServiceStatus>,
    pub ready_timeout_ms: Option<Option<u64>>,
    pub last_known_error: Option<Option<String>>,
}

impl ServicePatch {
    pub fn status(status: ServiceStatus) -> Self {
        Self {
            status: Some(status),
            ..Default::default()
        }
    }
}

/// A `CellProvisioningState` row: the resumable progress marker for one
/// cell's provisioning workflow, plus the user preferences (`startMode`,
/// model/provider overrides) the agent runtime applies on next bind.
#[derive(Debug, Clone, PartialEq)]
pub struct CellProvisioningState {
    pub cell_id: CellId,
    pub run_id: RunId,
    pub step: String,
    pub status: ProvisioningStatus,
    pub attempt: u32,
    pub last_error: Option<String>,
    pub model_id_override: Option<ModelId>,
    pub provider_id_override: Option<ProviderId>,
    pub start_mode: Option<Mode>,
    pub started_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Default)]
pub struct ProvisioningPatch {
    pub run_id: Option<RunId>,
    pub step: Option<String>,
    pub status: Option<ProvisioningStatus>,
    pub attempt: Option<u32>,
    pub last_error: Option<Option<String>>,
    pub model_id_override: Option<Option<ModelId>>,
    pub provider_id_override: Option<Option<ProviderId>>,
    pub start_mode: Option<Option<Mode>>,
}
