use std::path::Path;
use std::sync::Arc;
use std::time::Instant;

use hive_config::{ConfigCache, Template};
use hive_protocol::{CellId, CellStatus, ProvisioningStatus, RunId, StepStatus, TimingEvent};
use sqlx::SqlitePool;
use tracing::{info, warn};
use uuid::Uuid;

use crate::errors::ProvisioningError;
use crate::event_bus::{CellStatusEvent, EventBus};
use crate::supervisor::ServiceSupervisor;
use crate::worktree::WorktreeAdapter;

const STEPS: [&str; 3] = ["create_worktree", "ensure_services", "mark_ready"];

/// Drives a cell from `spawning` to `ready` (or `error`) through the three
/// steps of §4.4: create the worktree, ensure services, mark ready. Each
/// cell's progress is persisted to `CellProvisioningState` after every step
/// so a crash mid-run can resume from the last completed step rather than
/// starting over. Grounded on `kild-core::state::dispatch::CoreStore::dispatch`'s
/// command → handler → `Event` shape: each step here is a fallible function
/// the engine wraps with a timing-event emission.
pub struct ProvisioningEngine {
    pool: SqlitePool,
    supervisor: Arc<ServiceSupervisor>,
    events: Arc<EventBus>,
}

impl ProvisioningEngine {
    pub fn new(pool: SqlitePool, supervisor: Arc<ServiceSupervisor>, events: Arc<EventBus>) -> Arc<Self> {
        Arc::new(Self { pool, supervisor, events })
    }

    /// Create a new cell and drive it through provisioning. The cell id is
    /// generated here (not by the caller) so the worktree path can be
    /// computed before the row is written.
    #[allow(clippy::too_many_arguments)]
    pub async fn create_cell(
        self: &Arc<Self>,
        workspace_root: &Path,
        workspace_id: &hive_protocol::WorkspaceId,
        name: impl Into<String>,
        template: &Template,
        description: Option<String>,
    ) -> Result<hive_store::Cell, ProvisioningError> {
        let cell_id = CellId::new(Uuid::new_v4().to_string());
        let paths = hive_paths::WorkspacePaths::for_workspace(workspace_root);
        let workspace_path = paths.cell_dir(cell_id.as_str());

        let cell = hive_store::cells::insert_cell(
            &self.pool,
            hive_store::NewCell {
                id: cell_id.clone(),
                name: name.into(),
                template_id: hive_protocol::TemplateId::new(template.id.clone()),
                workspace_path,
                workspace_root_path: workspace_root.to_path_buf(),
                workspace_id: workspace_id.clone(),
                description,
            },
        )
        .await?;

        let run_id = RunId::new(Uuid::new_v4().to_string());
        hive_store::provisioning::upsert_provisioning_state(
            &self.pool,
            &cell_id,
            run_id.clone(),
            STEPS[0],
            ProvisioningStatus::Running,
        )
        .await?;

        self.run_steps(&cell, template, &run_id, STEPS[0]).await?;
        hive_store::cells::get_cell(&self.pool, &cell_id)
            .await
            .map_err(ProvisioningError::from)
    }

    /// Re-enter the state machine for every cell stuck in `spawning` on
    /// process start (§4.4's resume contract). Cells whose template can no
    /// longer be resolved are left alone — they stay `spawning` until an
    /// operator fixes the config, rather than being silently marked `error`.
    pub async fn resume_spawning_cells(self: &Arc<Self>, config_cache: &ConfigCache) {
        let cells = match hive_store::cells::list_spawning_cells(&self.pool).await {
            Ok(cells) => cells,
            Err(e) => {
                warn!(event = "core.provisioning.resume_list_failed", error = %e);
                return;
            }
        };

        for cell in cells {
            if let Err(e) = self.resume_cell(&cell, config_cache).await {
                warn!(
                    event = "core.provisioning.resume_failed",
                    cell_id = %cell.id,
                    error = %e,
                );
            }
        }
    }

    async fn resume_cell(
        self: &Arc<Self>,
        cell: &hive_store::Cell,
        config_cache: &ConfigCache,
    ) -> Result<(), ProvisioningError> {
        let config = config_cache.load(&cell.workspace_root_path)?;
        let Some(template) = config.template(cell.template_id.as_str()) else {
            warn!(
                event = "core.provisioning.resume_template_missing",
                cell_id = %cell.id,
                template_id = %cell.template_id,
            );
            return Ok(());
        };

        let state = hive_store::provisioning::get_provisioning_state(&self.pool, &cell.id).await?;
        let (run_id, from_step, attempt) = match state {
            Some(state) => (state.run_id, state.step, state.attempt + 1),
            None => (RunId::new(Uuid::new_v4().to_string()), STEPS[0].to_string(), 1),
        };

        info!(
            event = "core.provisioning.resume_started",
            cell_id = %cell.id,
            run_id = %run_id,
            step = %from_step,
            attempt = attempt,
        );

        hive_store::provisioning::update_provisioning_state(
            &self.pool,
            &cell.id,
            hive_store::ProvisioningPatch {
                run_id: Some(run_id.clone()),
                step: Some(from_step.clone()),
                status: Some(ProvisioningStatus::Running),
                attempt: Some(attempt),
                ..Default::default()
            },
        )
        .await?;

        self.run_steps(cell, template, &run_id, &from_step).await
    }

    async fn run_steps(
        self: &Arc<Self>,
        cell: &hive_store::Cell,
        template: &Template,
        run_id: &RunId,
        from_step: &str,
    ) -> Result<(), ProvisioningError> {
        let start_idx = STEPS.iter().position(|s| *s == from_step).unwrap_or(0);

        for step in &STEPS[start_idx..] {
            let started = Instant::now();
            let result = self.run_step(cell, template, run_id, step).await;
            let duration_ms = started.elapsed().as_millis() as u64;

            match result {
                Ok(()) => {
                    self.emit_timing(&cell.id, run_id, *step, StepStatus::Ok, duration_ms, None);
                    hive_store::provisioning::update_provisioning_state(
                        &self.pool,
                        &cell.id,
                        hive_store::ProvisioningPatch {
                            step: Some(step.to_string()),
                            status: Some(ProvisioningStatus::Running),
                            ..Default::default()
                        },
                    )
                    .await?;
                }
                Err(e) => {
                    self.emit_timing(&cell.id, run_id, *step, StepStatus::Error, duration_ms, Some(e.to_string()));
                    self.fail_cell(cell, step, &e).await;
                    return Err(e);
                }
            }
        }

        hive_store::provisioning::update_provisioning_state(
            &self.pool,
            &cell.id,
            hive_store::ProvisioningPatch {
                status: Some(ProvisioningStatus::Succeeded),
                ..Default::default()
            },
        )
        .await?;
        Ok(())
    }

    async fn run_step(
        &self,
        cell: &hive_store::Cell,
        template: &Template,
        run_id: &RunId,
        step: &str,
    ) -> Result<(), ProvisioningError> {
        match step {
            "create_worktree" => {
                if cell.workspace_path.exists() {
                    return Ok(());
                }
                let branch = format!("hive/{}", cell.id);
                WorktreeAdapter::create_worktree(&cell.workspace_root_path, cell.id.as_str(), &branch)?;
                Ok(())
            }
            "ensure_services" => {
                self.supervisor
                    .ensure_cell_services(&cell.id, &cell.workspace_path, template, run_id)
                    .await?;
                Ok(())
            }
            "mark_ready" => {
                hive_store::cells::update_cell(
                    &self.pool,
                    &cell.id,
                    hive_store::CellPatch::status(CellStatus::Ready).with_last_setup_error(None),
                )
                .await?;
                self.events.publish_cell_status(
                    cell.workspace_id.as_str(),
                    CellStatusEvent {
                        workspace_id: cell.workspace_id.to_string(),
                        cell_id: cell.id.to_string(),
                        status: CellStatus::Ready.to_string(),
                    },
                );
                Ok(())
            }
            other => {
                warn!(event = "core.provisioning.unknown_step", step = other);
                Ok(())
            }
        }
    }

    async fn fail_cell(&self, cell: &hive_store::Cell, step: &str, err: &ProvisioningError) {
        let message = err.to_last_setup_error();

        if let Err(e) = hive_store::cells::update_cell(
            &self.pool,
            &cell.id,
            hive_store::CellPatch::status(CellStatus::Error).with_last_setup_error(Some(message.clone())),
        )
        .await
        {
            warn!(event = "core.provisioning.fail_cell_update_failed", cell_id = %cell.id, error = %e);
        }

        if let Err(e) = hive_store::provisioning::update_provisioning_state(
            &self.pool,
            &cell.id,
            hive_store::ProvisioningPatch {
                step: Some(step.to_string()),
                status: Some(ProvisioningStatus::Failed),
                last_error: Some(Some(message)),
                ..Default::default()
            },
        )
        .await
        {
            warn!(event = "core.provisioning.fail_state_update_failed", cell_id = %cell.id, error = %e);
        }

        self.events.publish_cell_status(
            cell.workspace_id.as_str(),
            CellStatusEvent {
                workspace_id: cell.workspace_id.to_string(),
                cell_id: cell.id.to_string(),
                status: CellStatus::Error.to_string(),
            },
        );
    }

    fn emit_timing(
        &self,
        cell_id: &CellId,
        run_id: &RunId,
        step: impl Into<String>,
        status: StepStatus,
        duration_ms: u64,
        error: Option<String>,
    ) {
        self.events.publish_cell_timing(
            cell_id.as_str(),
            TimingEvent {
                cell_id: cell_id.clone(),
                workflow: "create".to_string(),
                run_id: run_id.clone(),
                step: step.into(),
                status,
                duration_ms,
                created_at: chrono::Utc::now(),
                error,
                metadata: None,
            },
        );
    }
}
