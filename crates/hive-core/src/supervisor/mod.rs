mod lifecycle;
mod setup;

use std::collections::HashSet;
use std::sync::{Arc, Mutex as StdMutex};

use hive_config::Template;
use hive_protocol::{CellId, RunId, ServiceId, ServiceStatus, StepStatus, TimingEvent};
use nix::sys::signal::{self, Signal};
use nix::unistd::Pid;
use sqlx::SqlitePool;
use tracing::{info, warn};

use crate::errors::SupervisorError;
use crate::event_bus::EventBus;
use crate::locks::KeyedLock;
use crate::port_manager::PortManager;
use crate::terminal::TerminalRuntime;

pub use lifecycle::StopOptions;

/// Starts, stops, and re-binds the per-cell service processes (§4.3).
/// Grounded on `kild-daemon::session::manager::SessionManager` and
/// `kild-daemon::pty::manager::PtyManager`, generalized from one PTY per
/// daemon session to one per template-setup run plus one per running
/// service, many services per cell.
pub struct ServiceSupervisor {
    pub(crate) pool: SqlitePool,
    pub(crate) ports: Arc<PortManager>,
    pub(crate) terminals: Arc<TerminalRuntime>,
    pub(crate) events: Arc<EventBus>,
    pub(crate) cell_locks: KeyedLock<CellId>,
    pub(crate) service_locks: KeyedLock<ServiceId>,
    /// Services with a live process attached in this run — mirrors the
    /// "active-handle map" clause of §4.3.3 step 1: a service present here
    /// is skipped by a concurrent start attempt even before its row is
    /// reloaded.
    active_handles: StdMutex<HashSet<ServiceId>>,
}

impl ServiceSupervisor {
    pub fn new(
        pool: SqlitePool,
        ports: Arc<PortManager>,
        terminals: Arc<TerminalRuntime>,
        events: Arc<EventBus>,
    ) -> Arc<Self> {
        Arc::new(Self {
            pool,
            ports,
            terminals,
            events,
            cell_locks: KeyedLock::new(),
            service_locks: KeyedLock::new(),
            active_handles: StdMutex::new(HashSet::new()),
        })
    }

    pub(crate) fn has_active_handle(&self, service_id: &ServiceId) -> bool {
        self.active_handles
            .lock()
            .expect("active handle set poisoned")
            .contains(service_id)
    }

    pub(crate) fn mark_active(&self, service_id: &ServiceId) {
        self.active_handles
            .lock()
            .expect("active handle set poisoned")
            .insert(service_id.clone());
    }

    pub(crate) fn clear_active(&self, service_id: &ServiceId) {
        self.active_handles
            .lock()
            .expect("active handle set poisoned")
            .remove(service_id);
    }

    pub(crate) fn emit_timing(
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

    /// Re-bind persisted services to live processes on process start
    /// (§4.3's `bootstrap()`). Restarts any auto-restart-eligible service
    /// whose pid is dead and whose persisted port is free; leaves occupied
    /// ones alone.
    pub async fn bootstrap(self: &Arc<Self>) -> Result<(), SupervisorError> {
        let rows = hive_store::services::list_all_services_with_cells(&self.pool).await?;
        for (service, cell) in rows {
            if !service.status.is_auto_restart() {
                continue;
            }
            if let Some(pid) = service.pid
                && process_is_alive(pid)
            {
                info!(
                    event = "core.supervisor.bootstrap_skip_alive",
                    service_id = %service.id,
                    pid = pid,
                );
                continue;
            }
            if let Some(port) = service.port
                && !self.ports.probe_free(port).await?
            {
                warn!(
                    event = "core.supervisor.bootstrap_skip_port_occupied",
                    service_id = %service.id,
                    cell_id = %cell.id,
                    port = port,
                );
                continue;
            }

            hive_store::services::update_service(
                &self.pool,
                &service.id,
                hive_store::ServicePatch {
                    pid: Some(None),
                    status: Some(ServiceStatus::NeedsResume),
                    ..Default::default()
                },
            )
            .await?;

            if let Err(e) = self.start_cell_service(&service.id).await {
                warn!(
                    event = "core.supervisor.bootstrap_start_failed",
                    service_id = %service.id,
                    error = %e,
                );
            }
        }
        Ok(())
    }

    /// Idempotent: runs template setup, upserts every process-type service
    /// row against the template's current definition, allocates ports in a
    /// single pass, then starts every not-yet-running service. Serialized
    /// under the cell lock.
    pub async fn ensure_cell_services(
        self: &Arc<Self>,
        cell_id: &CellId,
        workspace_root: &std::path::Path,
        template: &Template,
        run_id: &RunId,
    ) -> Result<(), SupervisorError> {
        let _guard = self.cell_locks.lock(cell_id).await;

        self.run_template_setup(cell_id, workspace_root, template, run_id)
            .await?;

        let existing = hive_store::services::list_services_by_cell(&self.pool, cell_id).await?;
        let mut ids = Vec::new();
        for (name, def) in template.process_services() {
            let started = std::time::Instant::now();
            let service_id = self
                .upsert_service_definition(cell_id, workspace_root, name, def, &template.env, &existing)
                .await?;
            self.emit_timing(
                cell_id,
                run_id,
                format!("ensure_service:{name}"),
                StepStatus::Ok,
                started.elapsed().as_millis() as u64,
                None,
            );
            ids.push(service_id);
        }

        for id in &ids {
            let service = hive_store::services::get_service(&self.pool, id).await?;
            if service.status == ServiceStatus::Running || self.has_active_handle(id) {
                continue;
            }
            let step = TimingEvent::step_service_start(&service.name);
            let started = std::time::Instant::now();
            match self.start_cell_service(id).await {
                Ok(()) => self.emit_timing(
                    cell_id,
                    run_id,
                    step,
                    StepStatus::Ok,
                    started.elapsed().as_millis() as u64,
                    None,
                ),
                Err(e) => {
                    self.emit_timing(
                        cell_id,
                        run_id,
                        step,
                        StepStatus::Error,
                        started.elapsed().as_millis() as u64,
                        Some(e.to_string()),
                    );
                    return Err(e);
                }
            }
        }
        Ok(())
    }

    /// Start every service for a cell, sequentially, after allocating ports
    /// in a single pass (§4.3's `startCellServices`).
    pub async fn start_cell_services(self: &Arc<Self>, cell_id: &CellId) -> Result<(), SupervisorError> {
        let _guard = self.cell_locks.lock(cell_id).await;
        let services = hive_store::services::list_services_by_cell(&self.pool, cell_id).await?;
        for service in &services {
            self.ports
                .ensure_service_port(service.id.as_str(), service.port, service.pid)
                .await?;
        }
        for service in services {
            self.start_cell_service(&service.id).await?;
        }
        Ok(())
    }

    /// Stop every service for a cell (§4.3's `stopCellServices`).
    pub async fn stop_cell_services(
        self: &Arc<Self>,
        cell_id: &CellId,
        opts: StopOptions,
    ) -> Result<(), SupervisorError> {
        let _guard = self.cell_locks.lock(cell_id).await;
        let services = hive_store::services::list_services_by_cell(&self.pool, cell_id).await?;
        for service in services {
            self.stop_cell_service(&service.id, opts).await?;
        }
        Ok(())
    }

    /// Stop every service across every cell, releasing ports. Transitions
    /// anything not already `stopped` to `needs_resume` so the next
    /// `bootstrap()` restarts it.
    pub async fn stop_all(self: &Arc<Self>) -> Result<(), SupervisorError> {
        let rows = hive_store::services::list_all_services_with_cells(&self.pool).await?;
        for (service, _cell) in rows {
            if service.status == ServiceStatus::Stopped {
                continue;
            }
            self.stop_cell_service(&service.id, StopOptions { release_ports: true })
                .await?;
            hive_store::services::update_service(
                &self.pool,
                &service.id,
                hive_store::ServicePatch::status(ServiceStatus::NeedsResume),
            )
            .await?;
        }
        Ok(())
    }
}

/// `kill(pid, None)` delivers no signal but reports whether the process
/// exists and is signalable — the standard liveness probe.
fn process_is_alive(pid: u32) -> bool {
    signal::kill(Pid::from_raw(pid as i32), None).is_ok()
}
