use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use hive_config::Template;
use hive_protocol::{CellId, RunId, StepStatus, TimingEvent};
use nix::sys::signal::{self, Signal};
use nix::unistd::Pid;
use tracing::{info, warn};

use super::ServiceSupervisor;
use crate::errors::SupervisorError;
use crate::terminal::setup_topic;

const DEFAULT_SETUP_TIMEOUT_MS: u64 = 300_000;
const SIGTERM_GRACE: Duration = Duration::from_secs(2);
const TIMEOUT_EXIT_CODE: i32 = 124;

fn setup_timeout_ms() -> u64 {
    std::env::var("HIVE_TEMPLATE_SETUP_COMMAND_TIMEOUT_MS")
        .ok()
        .and_then(|v| v.parse::<u64>().ok())
        .filter(|v| *v > 0)
        .unwrap_or(DEFAULT_SETUP_TIMEOUT_MS)
}

impl ServiceSupervisor {
    /// Run a template's `setup` commands sequentially under a single PTY
    /// tied to the cell's setup terminal buffer (§4.3.2). No-op if the
    /// template defines no setup commands.
    pub(super) async fn run_template_setup(
        self: &Arc<Self>,
        cell_id: &CellId,
        workspace_root: &Path,
        template: &Template,
        run_id: &RunId,
    ) -> Result<(), SupervisorError> {
        if template.setup.is_empty() {
            return Ok(());
        }

        let topic = setup_topic(cell_id.as_str());
        let shell = std::env::var("SHELL").unwrap_or_else(|_| "/bin/bash".to_string());
        let mut env: Vec<(String, String)> = std::env::vars().collect();
        env.extend(template.env.clone());
        env.push(("HIVE_WORKTREE_SETUP".to_string(), "true".to_string()));
        env.push((
            "HIVE_MAIN_REPO".to_string(),
            workspace_root.display().to_string(),
        ));
        env.push(("FORCE_COLOR".to_string(), "1".to_string()));

        let total_started = std::time::Instant::now();
        let mut session: Option<Arc<crate::terminal::TerminalSession>> = None;

        for command in &template.setup {
            let step = TimingEvent::step_template_setup(command);
            let cmd_started = std::time::Instant::now();
            let result = self
                .run_one_setup_command(
                    &topic,
                    &shell,
                    command,
                    &template.id,
                    workspace_root,
                    &env,
                    &mut session,
                )
                .await;
            let duration_ms = cmd_started.elapsed().as_millis() as u64;

            match result {
                Ok(()) => {
                    self.terminals
                        .append_status_line(&topic, &format!("[setup] {command}"));
                    self.emit_timing(cell_id, run_id, step, StepStatus::Ok, duration_ms, None);
                }
                Err(e) => {
                    self.emit_timing(
                        cell_id,
                        run_id,
                        step,
                        StepStatus::Error,
                        duration_ms,
                        Some(e.to_string()),
                    );
                    self.terminals
                        .mark_exit(&topic, e.exit_code().unwrap_or(1));
                    return Err(e);
                }
            }
        }

        self.terminals
            .append_status_line(&topic, "[setup] Template setup finished");
        self.emit_timing(
            cell_id,
            run_id,
            TimingEvent::step_template_setup_total(),
            StepStatus::Ok,
            total_started.elapsed().as_millis() as u64,
            None,
        );
        Ok(())
    }

    async fn run_one_setup_command(
        self: &Arc<Self>,
        topic: &str,
        shell: &str,
        command: &str,
        template_id: &str,
        cwd: &Path,
        env: &[(String, String)],
        session: &mut Option<Arc<crate::terminal::TerminalSession>>,
    ) -> Result<(), SupervisorError> {
        let exec_args = ["-lc".to_string(), format!("exec {command}")];
        let args: Vec<&str> = exec_args.iter().map(String::as_str).collect();
        let timeout_ms = setup_timeout_ms();

        let (active, wait_fut): (
            Arc<crate::terminal::TerminalSession>,
            tokio::task::JoinHandle<Result<i32, SupervisorError>>,
        ) = match session {
            None => {
                let started = self.terminals.start(topic, shell, &args, cwd, env)?;
                let for_wait = started.clone();
                (
                    started,
                    tokio::task::spawn_blocking(move || for_wait.wait_blocking()),
                )
            }
            Some(existing) => {
                let for_wait = existing.clone();
                let cwd = cwd.to_path_buf();
                let env = env.to_vec();
                let shell = shell.to_string();
                let command_owned = [exec_args[0].clone(), exec_args[1].clone()];
                (
                    existing.clone(),
                    tokio::task::spawn_blocking(move || {
                        let args: Vec<&str> =
                            command_owned.iter().map(String::as_str).collect();
                        for_wait.run_sequential_blocking(&shell, &args, &cwd, &env)
                    }),
                )
            }
        };
        *session = Some(active.clone());

        match tokio::time::timeout(Duration::from_millis(timeout_ms), wait_fut).await {
            Ok(Ok(Ok(0))) => Ok(()),
            Ok(Ok(Ok(code))) => Err(SupervisorError::TemplateSetup {
                command: command.to_string(),
                template_id: template_id.to_string(),
                workspace_path: cwd.display().to_string(),
                exit_code: Some(code),
            }),
            Ok(Ok(Err(e))) => Err(e),
            Ok(Err(join_err)) => Err(SupervisorError::Pty(format!(
                "setup command task panicked: {join_err}"
            ))),
            Err(_) => {
                warn!(
                    event = "core.supervisor.setup_command_timeout",
                    topic = topic,
                    command = command,
                    timeout_ms = timeout_ms,
                );
                self.kill_with_grace(&active);
                Err(SupervisorError::TemplateSetup {
                    command: command.to_string(),
                    template_id: template_id.to_string(),
                    workspace_path: cwd.display().to_string(),
                    exit_code: Some(TIMEOUT_EXIT_CODE),
                })
            }
        }
    }

    /// SIGTERM, wait up to `SIGTERM_GRACE`, then SIGKILL if still alive.
    fn kill_with_grace(&self, session: &Arc<crate::terminal::TerminalSession>) {
        if let Some(pid) = session.child_pid() {
            let _ = signal::kill(Pid::from_raw(pid as i32), Signal::SIGTERM);
        }
        let session = session.clone();
        tokio::spawn(async move {
            tokio::time::sleep(SIGTERM_GRACE).await;
            if let Some(pid) = session.child_pid() {
                if signal::kill(Pid::from_raw(pid as i32), None).is_ok() {
                    info!(event = "core.supervisor.setup_command_sigkill", pid = pid);
                    let _ = session.kill();
                }
            }
        });
    }
}
