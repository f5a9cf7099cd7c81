use std::collections::HashMap;
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use hive_config::ServiceDefinition;
use hive_protocol::{CellId, ServiceId, ServiceStatus};
use hive_store::{CellService, NewCellService, ServicePatch};
use nix::sys::signal::{self, Signal};
use nix::unistd::Pid;
use tracing::{info, warn};

use super::{ServiceSupervisor, process_is_alive};
use crate::errors::SupervisorError;
use crate::event_bus::ServiceUpdateEvent;
use crate::terminal::service_topic;

const STOP_GRACE: Duration = Duration::from_secs(2);
const RESTART_RECLAIM_GAP: Duration = Duration::from_millis(250);

/// Controls whether `stopCellService`/`stopCellServices` release the
/// service's port reservation and clear its terminal ring (§4.3.3's
/// `stopCellService(serviceId, releasePorts)`).
#[derive(Debug, Clone, Copy, Default)]
pub struct StopOptions {
    pub release_ports: bool,
}

impl ServiceSupervisor {
    /// Ensure a `CellService` row matches a template's service entry,
    /// creating it if missing. Drift detection (§4.3.4) only rewrites the
    /// row when `command`, `cwd`, `readyTimeoutMs`, the merged env (template
    /// `env` plus the service's own), or the structural definition snapshot
    /// actually differ, so unrelated fields (status, port, pid) set by a
    /// running instance survive a re-ensure untouched.
    pub(super) async fn upsert_service_definition(
        self: &Arc<Self>,
        cell_id: &CellId,
        workspace_root: &Path,
        name: &str,
        def: &ServiceDefinition,
        template_env: &HashMap<String, String>,
        existing: &[CellService],
    ) -> Result<ServiceId, SupervisorError> {
        let cwd = match &def.cwd {
            Some(rel) => workspace_root.join(rel),
            None => workspace_root.to_path_buf(),
        };
        let mut env = template_env.clone();
        env.extend(def.env.clone());
        let definition_json =
            serde_json::to_value(def).expect("ServiceDefinition always serializes to JSON");

        if let Some(row) = existing.iter().find(|s| s.name == name) {
            let drifted = row.command != def.run
                || row.cwd != cwd
                || row.ready_timeout_ms != def.ready_timeout_ms
                || row.definition != definition_json
                || row.env != env;
            if drifted {
                hive_store::services::update_service(
                    &self.pool,
                    &row.id,
                    ServicePatch {
                        command: Some(def.run.clone()),
                        cwd: Some(cwd),
                        env: Some(env),
                        definition: Some(definition_json),
                        ready_timeout_ms: Some(def.ready_timeout_ms),
                        ..Default::default()
                    },
                )
                .await?;
            }
            return Ok(row.id.clone());
        }

        let service = hive_store::services::insert_service(
            &self.pool,
            NewCellService {
                id: hive_store::services::new_service_id(),
                cell_id: cell_id.clone(),
                name: name.to_string(),
                service_type: "process".to_string(),
                command: def.run.clone(),
                cwd,
                env,
                definition: definition_json,
                ready_timeout_ms: def.ready_timeout_ms,
            },
        )
        .await?;
        Ok(service.id)
    }

    /// Start one service (§4.3.3's 9-step start sequence), serialized under
    /// the service's own lock.
    pub(super) async fn start_cell_service(
        self: &Arc<Self>,
        service_id: &ServiceId,
    ) -> Result<(), SupervisorError> {
        let _guard = self.service_locks.lock(service_id).await;
        let service = hive_store::services::get_service(&self.pool, service_id).await?;

        if let Some(pid) = service.pid
            && process_is_alive(pid)
        {
            return Ok(());
        }
        if let Some(port) = service.port
            && matches!(
                service.status,
                ServiceStatus::Running | ServiceStatus::Starting | ServiceStatus::NeedsResume
            )
            && !self.ports.probe_free(port).await?
        {
            return Ok(());
        }
        if self.has_active_handle(service_id) {
            return Ok(());
        }

        self.mark_active(service_id);
        let result = self.start_cell_service_inner(service_id, &service).await;
        if result.is_err() {
            self.clear_active(service_id);
        }
        result
    }

    async fn start_cell_service_inner(
        self: &Arc<Self>,
        service_id: &ServiceId,
        service: &CellService,
    ) -> Result<(), SupervisorError> {
        let cell = hive_store::cells::get_cell(&self.pool, &service.cell_id).await?;

        // Step 2: ensure the port.
        let port = self
            .ports
            .ensure_service_port(service_id.as_str(), service.port, service.pid)
            .await?;

        // Step 3: verify the working directory exists.
        if !service.cwd.exists() {
            hive_store::services::update_service(
                &self.pool,
                service_id,
                ServicePatch {
                    status: Some(ServiceStatus::Error),
                    last_known_error: Some(Some(
                        "Service working directory not found".to_string(),
                    )),
                    ..Default::default()
                },
            )
            .await?;
            return Err(SupervisorError::WorkingDirNotFound(
                service.cwd.display().to_string(),
            ));
        }

        // Step 4: compute env.
        let cell_paths = hive_paths::WorkspacePaths::for_workspace(&cell.workspace_path);
        let home_dir = cell_paths.home_dir();
        std::fs::create_dir_all(&home_dir)?;
        std::fs::create_dir_all(cell_paths.logs_dir())?;

        let siblings = hive_store::services::list_services_by_cell(&self.pool, &cell.id).await?;
        let mut port_map: HashMap<String, u16> = siblings
            .iter()
            .filter_map(|s| s.port.map(|p| (s.name.clone(), p)))
            .collect();
        port_map.insert(service.name.clone(), port);

        let mut env = service.env.clone();
        env.insert("HIVE_CELL_ID".to_string(), cell.id.to_string());
        env.insert("HIVE_SERVICE".to_string(), service.name.clone());
        env.insert(
            "HIVE_HOME".to_string(),
            home_dir.display().to_string(),
        );
        env.insert(
            "HIVE_BROWSE_ROOT".to_string(),
            cell.workspace_path.display().to_string(),
        );
        env.insert("FORCE_COLOR".to_string(), "1".to_string());
        for (name, sibling_port) in &port_map {
            env.insert(
                format!("{}_PORT", crate::env_interp::sanitized_service_name(name)),
                sibling_port.to_string(),
            );
        }
        env.insert("PORT".to_string(), port.to_string());
        env.insert("SERVICE_PORT".to_string(), port.to_string());
        for value in env.values_mut() {
            *value = crate::env_interp::interpolate_port_tokens(value, port, &port_map);
        }

        // Step 5: persist starting state, publish update.
        hive_store::services::update_service(
            &self.pool,
            service_id,
            ServicePatch {
                status: Some(ServiceStatus::Starting),
                env: Some(env.clone()),
                port: Some(Some(port)),
                pid: Some(None),
                last_known_error: Some(None),
                ..Default::default()
            },
        )
        .await?;
        self.publish_service_status(&cell.id, service_id, ServiceStatus::Starting);

        // Step 6-8: open the terminal session on the first command (a setup
        // command if any, else the main command directly), chaining any
        // further setup commands onto the same PTY, then spawn the main
        // command without waiting — mirrors `setup::run_one_setup_command`'s
        // first-command-starts-the-session chaining.
        let topic = service_topic(service_id.as_str());
        let shell = std::env::var("SHELL").unwrap_or_else(|_| "/bin/bash".to_string());
        let mut env_vec: Vec<(String, String)> = env.into_iter().collect();
        env_vec.push(("TERM".to_string(), "xterm-256color".to_string()));

        let def: ServiceDefinition = serde_json::from_value(service.definition.clone())
            .unwrap_or_else(|_| ServiceDefinition {
                kind: hive_config::ServiceKind::Process,
                run: service.command.clone(),
                cwd: None,
                env: HashMap::new(),
                stop: None,
                setup: Vec::new(),
                ready_timeout_ms: None,
                ports: Vec::new(),
            });

        let log_file = cell_paths.service_log_file(&service.name);
        let mut session: Option<Arc<crate::terminal::TerminalSession>> = None;
        for command in &def.setup {
            let exec_args = [
                "-lc".to_string(),
                format!("exec {command}"),
            ];
            let exit_code = match &session {
                None => {
                    let arg_refs: Vec<&str> = exec_args.iter().map(String::as_str).collect();
                    let started = self.terminals.start_with_log_file(
                        &topic,
                        &shell,
                        &arg_refs,
                        &service.cwd,
                        &env_vec,
                        Some(&log_file),
                    )?;
                    let for_wait = started.clone();
                    session = Some(started);
                    tokio::task::spawn_blocking(move || for_wait.wait_blocking())
                        .await
                        .map_err(|e| {
                            SupervisorError::Pty(format!("setup command task panicked: {e}"))
                        })??
                }
                Some(existing) => {
                    let existing = existing.clone();
                    let shell_owned = shell.clone();
                    let cwd_owned = service.cwd.clone();
                    let env_owned = env_vec.clone();
                    tokio::task::spawn_blocking(move || {
                        let arg_refs: Vec<&str> = exec_args.iter().map(String::as_str).collect();
                        existing.run_sequential_blocking(&shell_owned, &arg_refs, &cwd_owned, &env_owned)
                    })
                    .await
                    .map_err(|e| {
                        SupervisorError::Pty(format!("setup command task panicked: {e}"))
                    })??
                }
            };
            if exit_code != 0 {
                return Err(SupervisorError::CommandExecution {
                    command: command.clone(),
                    cwd: service.cwd.display().to_string(),
                    exit_code,
                });
            }
        }

        let main_args = [
            "-lc".to_string(),
            format!("exec {}", service.command),
        ];
        let arg_refs: Vec<&str> = main_args.iter().map(String::as_str).collect();
        let session = match session {
            None => self.terminals.start_with_log_file(
                &topic,
                &shell,
                &arg_refs,
                &service.cwd,
                &env_vec,
                Some(&log_file),
            )?,
            Some(existing) => {
                existing.spawn_main_command(&shell, &arg_refs, &service.cwd, &env_vec)?;
                existing
            }
        };
        let pid = session.child_pid();

        hive_store::services::update_service(
            &self.pool,
            service_id,
            ServicePatch {
                status: Some(ServiceStatus::Running),
                pid: Some(pid),
                ..Default::default()
            },
        )
        .await?;
        self.publish_service_status(&cell.id, service_id, ServiceStatus::Running);

        info!(
            event = "core.supervisor.service_start_completed",
            service_id = %service_id,
            cell_id = %cell.id,
            pid = pid,
        );

        // Step 9: attach the exit watcher.
        self.spawn_exit_watcher(cell.id.clone(), service_id.clone(), topic, session);
        Ok(())
    }

    fn spawn_exit_watcher(
        self: &Arc<Self>,
        cell_id: CellId,
        service_id: ServiceId,
        topic: String,
        session: Arc<crate::terminal::TerminalSession>,
    ) {
        let supervisor = self.clone();
        tokio::spawn(async move {
            let wait_result =
                tokio::task::spawn_blocking(move || session.wait_blocking_exit_code()).await;
            let exit_code = match wait_result {
                Ok(Ok(code)) => code,
                Ok(Err(e)) => {
                    warn!(
                        event = "core.supervisor.exit_watcher_error",
                        service_id = %service_id,
                        error = %e,
                    );
                    supervisor.clear_active(&service_id);
                    return;
                }
                Err(join_err) => {
                    warn!(
                        event = "core.supervisor.exit_watcher_panicked",
                        service_id = %service_id,
                        error = %join_err,
                    );
                    supervisor.clear_active(&service_id);
                    return;
                }
            };

            let (status, last_known_error) = if exit_code == 0 {
                (ServiceStatus::Stopped, None)
            } else {
                (
                    ServiceStatus::Error,
                    Some(format!("Exited with code {exit_code}")),
                )
            };

            let _ = hive_store::services::update_service(
                &supervisor.pool,
                &service_id,
                ServicePatch {
                    status: Some(status),
                    pid: Some(None),
                    last_known_error: Some(last_known_error),
                    ..Default::default()
                },
            )
            .await;
            supervisor.terminals.mark_exit(&topic, exit_code as i32);
            supervisor.publish_service_status(&cell_id, &service_id, status);
            supervisor.clear_active(&service_id);
        });
    }

    /// Stop one service (§4.3.3's 4-step stop sequence), serialized under the
    /// service's own lock.
    pub(super) async fn stop_cell_service(
        self: &Arc<Self>,
        service_id: &ServiceId,
        opts: StopOptions,
    ) -> Result<(), SupervisorError> {
        let _guard = self.service_locks.lock(service_id).await;
        let service = hive_store::services::get_service(&self.pool, service_id).await?;
        let topic = service_topic(service_id.as_str());

        // Step 1: best-effort stop command.
        if let Ok(def) = serde_json::from_value::<ServiceDefinition>(service.definition.clone())
            && let Some(stop_cmd) = &def.stop
            && let Err(e) = self.run_stop_command(&service, stop_cmd).await
        {
            warn!(
                event = "core.supervisor.stop_command_failed",
                service_id = %service_id,
                error = %e,
            );
        }

        // Step 2: signal the process (group first, PID fallback).
        if self.has_active_handle(service_id) {
            if let Some(pid) = session_pid(&self.terminals, &topic) {
                terminate_then_kill(pid, STOP_GRACE).await;
            }
        } else if let Some(pid) = service.pid {
            terminate_then_kill(pid, RESTART_RECLAIM_GAP).await;
        }

        // Step 3: persist stopped, publish update, mark terminal exit 0.
        hive_store::services::update_service(
            &self.pool,
            service_id,
            ServicePatch {
                status: Some(ServiceStatus::Stopped),
                pid: Some(None),
                ..Default::default()
            },
        )
        .await?;
        self.publish_service_status(&service.cell_id, service_id, ServiceStatus::Stopped);
        self.terminals.mark_exit(&topic, 0);

        // Step 4: release the port and clear the terminal ring, if asked.
        if opts.release_ports {
            if let Some(port) = service.port {
                self.ports.release_port_for(port).await;
            }
            self.terminals.remove(&topic);
        }
        self.clear_active(service_id);
        Ok(())
    }

    async fn run_stop_command(
        &self,
        service: &CellService,
        stop_cmd: &str,
    ) -> Result<(), SupervisorError> {
        let shell = std::env::var("SHELL").unwrap_or_else(|_| "/bin/bash".to_string());
        let status = tokio::process::Command::new(&shell)
            .arg("-lc")
            .arg(stop_cmd)
            .current_dir(&service.cwd)
            .envs(service.env.iter().map(|(k, v)| (k.clone(), v.clone())))
            .status()
            .await?;
        if !status.success() {
            return Err(SupervisorError::CommandExecution {
                command: stop_cmd.to_string(),
                cwd: service.cwd.display().to_string(),
                exit_code: status.code().unwrap_or(-1),
            });
        }
        Ok(())
    }

    fn publish_service_status(&self, cell_id: &CellId, service_id: &ServiceId, status: ServiceStatus) {
        self.events.publish_service_update(
            cell_id.as_str(),
            ServiceUpdateEvent {
                cell_id: cell_id.to_string(),
                service_id: service_id.to_string(),
                status: status.to_string(),
            },
        );
    }
}

fn session_pid(terminals: &crate::terminal::TerminalRuntime, topic: &str) -> Option<u32> {
    terminals.get(topic).and_then(|s| s.child_pid())
}

/// `SIGTERM` to the process group (falling back to the bare pid if the
/// group signal fails — e.g. the process already detached), wait `grace`,
/// then `SIGKILL` if it's still alive.
async fn terminate_then_kill(pid: u32, grace: Duration) {
    let pgid = Pid::from_raw(-(pid as i32));
    if signal::kill(pgid, Signal::SIGTERM).is_err() {
        let _ = signal::kill(Pid::from_raw(pid as i32), Signal::SIGTERM);
    }
    tokio::time::sleep(grace).await;
    if process_is_alive(pid) {
        if signal::kill(pgid, Signal::SIGKILL).is_err() {
            let _ = signal::kill(Pid::from_raw(pid as i32), Signal::SIGKILL);
        }
    }
}
