mod buffer;
mod session;

pub use session::{SessionStatus, TerminalSession};

use std::collections::HashMap;
use std::sync::Mutex;

use tokio::sync::broadcast;
use tracing::info;

use crate::errors::SupervisorError;

pub fn service_topic(service_id: &str) -> String {
    format!("service:{service_id}")
}

pub fn setup_topic(cell_id: &str) -> String {
    format!("setup:{cell_id}")
}

pub fn chat_topic(cell_id: &str) -> String {
    format!("chat:{cell_id}")
}

/// Registry of live PTY-backed terminal sessions keyed by topic (§4.6).
/// Subscribers are process-local; they never cross a process boundary.
pub struct TerminalRuntime {
    sessions: Mutex<HashMap<String, std::sync::Arc<TerminalSession>>>,
}

impl Default for TerminalRuntime {
    fn default() -> Self {
        Self::new()
    }
}

impl TerminalRuntime {
    pub fn new() -> Self {
        Self {
            sessions: Mutex::new(HashMap::new()),
        }
    }

    pub fn start(
        &self,
        topic: &str,
        command: &str,
        args: &[&str],
        cwd: &std::path::Path,
        env: &[(String, String)],
    ) -> Result<std::sync::Arc<TerminalSession>, SupervisorError> {
        self.start_with_log_file(topic, command, args, cwd, env, None)
    }

    /// Like [`start`](Self::start), but additionally tees output to
    /// `log_file` (best-effort) — used for service sessions per §4.3.3's
    /// `.hive/logs/<service>.log` clause. Template-setup sessions pass
    /// `None`, since the setup terminal has no corresponding service log.
    pub fn start_with_log_file(
        &self,
        topic: &str,
        command: &str,
        args: &[&str],
        cwd: &std::path::Path,
        env: &[(String, String)],
        log_file: Option<&std::path::Path>,
    ) -> Result<std::sync::Arc<TerminalSession>, SupervisorError> {
        let (session, _reader) = TerminalSession::spawn(topic, command, args, cwd, env, log_file)?;
        self.sessions
            .lock()
            .expect("terminal runtime lock poisoned")
            .insert(topic.to_string(), session.clone());
        info!(event = "core.terminal.start_completed", topic = topic);
        Ok(session)
    }

    pub fn get(&self, topic: &str) -> Option<std::sync::Arc<TerminalSession>> {
        self.sessions
            .lock()
            .expect("terminal runtime lock poisoned")
            .get(topic)
            .cloned()
    }

    pub fn contents(&self, topic: &str) -> Vec<u8> {
        self.get(topic).map(|s| s.contents()).unwrap_or_default()
    }

    pub fn subscribe(&self, topic: &str) -> Option<broadcast::Receiver<Vec<u8>>> {
        self.get(topic).map(|s| s.subscribe())
    }

    pub fn write_stdin(&self, topic: &str, data: &[u8]) -> Result<(), SupervisorError> {
        self.get(topic)
            .ok_or_else(|| SupervisorError::Pty(format!("no terminal session for {topic}")))?
            .write_stdin(data)
    }

    pub fn resize(&self, topic: &str, cols: u16, rows: u16) -> Result<(), SupervisorError> {
        self.get(topic)
            .ok_or_else(|| SupervisorError::Pty(format!("no terminal session for {topic}")))?
            .resize(cols, rows)
    }

    pub fn append_status_line(&self, topic: &str, line: &str) {
        if let Some(session) = self.get(topic) {
            session.append_status_line(line);
        }
    }

    pub fn mark_exit(&self, topic: &str, exit_code: i32) {
        if let Some(session) = self.get(topic) {
            session.mark_exit(exit_code);
        }
    }

    pub fn remove(&self, topic: &str) {
        self.sessions
            .lock()
            .expect("terminal runtime lock poisoned")
            .remove(topic);
    }
}
