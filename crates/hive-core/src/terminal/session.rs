use std::io::Write;
use std::sync::{Arc, Mutex};

use chrono::{DateTime, Utc};
use portable_pty::{Child, CommandBuilder, MasterPty, PtySize, SlavePty, native_pty_system};
use tokio::sync::broadcast;
use tracing::{debug, error};

use super::buffer::RingBuffer;
use crate::errors::SupervisorError;

const DEFAULT_COLS: u16 = 120;
const DEFAULT_ROWS: u16 = 36;
const BROADCAST_CAPACITY: usize = 64;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionStatus {
    Running,
    Exited,
}

/// One PTY-backed terminal session: a template-setup run or a single
/// service's live process (§4.6). Generalizes `kild-daemon`'s
/// one-PTY-per-daemon-session to one per topic key.
///
/// The slave side is kept alive so a single session can run several
/// commands back to back (template/service setup steps followed by the
/// main command) while sharing one buffer and one reader task — the same
/// PTY a user would see if they ran each command in turn at a shell.
pub struct TerminalSession {
    master: Box<dyn MasterPty + Send>,
    slave: Box<dyn SlavePty + Send>,
    writer: Arc<Mutex<Box<dyn Write + Send>>>,
    child: Mutex<Box<dyn Child + Send + Sync>>,
    /// Mirrors the current child's pid outside the `child` lock, which
    /// `wait_blocking` holds for the full lifetime of the process — signal
    /// delivery needs the pid while a wait is in flight.
    current_pid: Mutex<Option<u32>>,
    buffer: Arc<Mutex<RingBuffer>>,
    output_tx: broadcast::Sender<Vec<u8>>,
    status: Mutex<SessionStatus>,
    exit_code: Mutex<Option<i32>>,
    started_at: DateTime<Utc>,
    cols: Mutex<u16>,
    rows: Mutex<u16>,
}

impl TerminalSession {
    pub fn spawn(
        topic: &str,
        command: &str,
        args: &[&str],
        cwd: &std::path::Path,
        env: &[(String, String)],
        log_file: Option<&std::path::Path>,
    ) -> Result<(Arc<Self>, tokio::task::JoinHandle<()>), SupervisorError> {
        let pty_system = native_pty_system();
        let size = PtySize {
            rows: DEFAULT_ROWS,
            cols: DEFAULT_COLS,
            pixel_width: 0,
            pixel_height: 0,
        };
        let pair = pty_system
            .openpty(size)
            .map_err(|e| SupervisorError::Pty(format!("openpty: {e}")))?;

        let mut cmd = CommandBuilder::new(command);
        cmd.args(args);
        cmd.cwd(cwd);
        for (k, v) in env {
            cmd.env(k, v);
        }

        let child = pair
            .slave
            .spawn_command(cmd)
            .map_err(|e| SupervisorError::Pty(format!("spawn: {e}")))?;
        let reader = pair
            .master
            .try_clone_reader()
            .map_err(|e| SupervisorError::Pty(format!("clone reader: {e}")))?;
        let writer = pair
            .master
            .take_writer()
            .map_err(|e| SupervisorError::Pty(format!("take writer: {e}")))?;

        let (output_tx, _) = broadcast::channel(BROADCAST_CAPACITY);
        let buffer = Arc::new(Mutex::new(RingBuffer::new()));

        let current_pid = child.process_id();
        let session = Arc::new(Self {
            master: pair.master,
            slave: pair.slave,
            writer: Arc::new(Mutex::new(writer)),
            child: Mutex::new(child),
            current_pid: Mutex::new(current_pid),
            buffer: buffer.clone(),
            output_tx: output_tx.clone(),
            status: Mutex::new(SessionStatus::Running),
            exit_code: Mutex::new(None),
            started_at: Utc::now(),
            cols: Mutex::new(DEFAULT_COLS),
            rows: Mutex::new(DEFAULT_ROWS),
        });

        let log_writer = log_file.and_then(|path| open_log_writer(topic, path));
        let reader_handle = spawn_reader(topic.to_string(), reader, output_tx, buffer, log_writer);
        Ok((session, reader_handle))
    }

    /// Run another command on this session's PTY, replacing the tracked
    /// child. Used to chain setup steps and the final main command onto one
    /// buffer/reader rather than opening a new PTY per step (§4.3.2, §4.3.3
    /// step 7). Blocks the calling (blocking-pool) thread until exit.
    pub fn run_sequential_blocking(
        &self,
        command: &str,
        args: &[&str],
        cwd: &std::path::Path,
        env: &[(String, String)],
    ) -> Result<i32, SupervisorError> {
        let mut cmd = CommandBuilder::new(command);
        cmd.args(args);
        cmd.cwd(cwd);
        for (k, v) in env {
            cmd.env(k, v);
        }
        let new_child = self
            .slave
            .spawn_command(cmd)
            .map_err(|e| SupervisorError::Pty(format!("spawn: {e}")))?;
        *self.status.lock().expect("status lock poisoned") = SessionStatus::Running;
        *self.current_pid.lock().expect("pid lock poisoned") = new_child.process_id();
        {
            let mut child = self.child.lock().expect("child lock poisoned");
            *child = new_child;
        }
        self.wait_blocking()
    }

    /// Spawn the long-running main command on this session's PTY, replacing
    /// the tracked child, without waiting for it to exit (§4.3.3 step 8).
    /// The caller attaches its own exit watcher afterwards.
    pub fn spawn_main_command(
        &self,
        command: &str,
        args: &[&str],
        cwd: &std::path::Path,
        env: &[(String, String)],
    ) -> Result<(), SupervisorError> {
        let mut cmd = CommandBuilder::new(command);
        cmd.args(args);
        cmd.cwd(cwd);
        for (k, v) in env {
            cmd.env(k, v);
        }
        let new_child = self
            .slave
            .spawn_command(cmd)
            .map_err(|e| SupervisorError::Pty(format!("spawn: {e}")))?;
        *self.status.lock().expect("status lock poisoned") = SessionStatus::Running;
        *self.current_pid.lock().expect("pid lock poisoned") = new_child.process_id();
        *self.child.lock().expect("child lock poisoned") = new_child;
        Ok(())
    }

    pub fn write_stdin(&self, data: &[u8]) -> Result<(), SupervisorError> {
        let mut writer = self
            .writer
            .lock()
            .map_err(|_| SupervisorError::Pty("writer lock poisoned".into()))?;
        writer
            .write_all(data)
            .map_err(|e| SupervisorError::Pty(format!("write stdin: {e}")))?;
        writer
            .flush()
            .map_err(|e| SupervisorError::Pty(format!("flush stdin: {e}")))?;
        Ok(())
    }

    pub fn resize(&self, cols: u16, rows: u16) -> Result<(), SupervisorError> {
        self.master
            .resize(PtySize {
                rows,
                cols,
                pixel_width: 0,
                pixel_height: 0,
            })
            .map_err(|e| SupervisorError::Pty(format!("resize: {e}")))?;
        *self.cols.lock().expect("cols lock poisoned") = cols;
        *self.rows.lock().expect("rows lock poisoned") = rows;
        Ok(())
    }

    pub fn append_status_line(&self, line: &str) {
        self.buffer
            .lock()
            .expect("terminal buffer lock poisoned")
            .push_line(line);
    }

    pub fn mark_exit(&self, exit_code: i32) {
        *self.status.lock().expect("status lock poisoned") = SessionStatus::Exited;
        *self.exit_code.lock().expect("exit code lock poisoned") = Some(exit_code);
    }

    pub fn status(&self) -> SessionStatus {
        *self.status.lock().expect("status lock poisoned")
    }

    pub fn exit_code(&self) -> Option<i32> {
        *self.exit_code.lock().expect("exit code lock poisoned")
    }

    pub fn started_at(&self) -> DateTime<Utc> {
        self.started_at
    }

    pub fn contents(&self) -> Vec<u8> {
        self.buffer.lock().expect("terminal buffer lock poisoned").contents()
    }

    pub fn subscribe(&self) -> broadcast::Receiver<Vec<u8>> {
        self.output_tx.subscribe()
    }

    pub fn child_pid(&self) -> Option<u32> {
        *self.current_pid.lock().expect("pid lock poisoned")
    }

    /// Block the calling (blocking-pool) thread until the child exits,
    /// returning its exit code. Callers invoke this via `spawn_blocking`.
    pub fn wait_blocking(&self) -> Result<i32, SupervisorError> {
        let status = {
            let mut child = self.child.lock().expect("child lock poisoned");
            child
                .wait()
                .map_err(|e| SupervisorError::Pty(format!("wait: {e}")))?
        };
        *self.current_pid.lock().expect("pid lock poisoned") = None;
        Ok(if status.success() { 0 } else { 1 })
    }

    /// Like `wait_blocking`, but returns the child's real numeric exit code
    /// instead of the collapsed success/failure flag — the service exit
    /// watcher needs the real code for `lastKnownError` (§4.3.3 step 9).
    pub fn wait_blocking_exit_code(&self) -> Result<u32, SupervisorError> {
        let status = {
            let mut child = self.child.lock().expect("child lock poisoned");
            child
                .wait()
                .map_err(|e| SupervisorError::Pty(format!("wait: {e}")))?
        };
        *self.current_pid.lock().expect("pid lock poisoned") = None;
        Ok(status.exit_code())
    }

    /// Force-kill the current child by signaling its pid directly rather
    /// than locking `child`: `wait_blocking`/`run_sequential_blocking` hold
    /// that lock for as long as the process is alive, so routing through
    /// `Child::kill()` (which also needs the lock) would deadlock against
    /// an in-flight wait — exactly the call this method exists to unblock.
    pub fn kill(&self) -> Result<(), SupervisorError> {
        let Some(pid) = self.child_pid() else {
            return Ok(());
        };
        nix::sys::signal::kill(nix::unistd::Pid::from_raw(pid as i32), nix::sys::signal::Signal::SIGKILL)
            .map_err(|e| SupervisorError::Pty(format!("kill: {e}")))
    }
}

/// Best-effort tee target for service output (§4.3.3's `.hive/logs/<service>.log`
/// clause). Failure to open is logged and simply means no file tee this run —
/// the PTY ring buffer remains the source of truth either way.
fn open_log_writer(topic: &str, path: &std::path::Path) -> Option<std::fs::File> {
    match std::fs::OpenOptions::new().create(true).append(true).open(path) {
        Ok(file) => Some(file),
        Err(e) => {
            error!(event = "core.terminal.log_file_open_failed", topic = topic, path = %path.display(), error = %e);
            None
        }
    }
}

fn spawn_reader(
    topic: String,
    mut reader: Box<dyn std::io::Read + Send>,
    output_tx: broadcast::Sender<Vec<u8>>,
    buffer: Arc<Mutex<RingBuffer>>,
    mut log_file: Option<std::fs::File>,
) -> tokio::task::JoinHandle<()> {
    tokio::task::spawn_blocking(move || {
        let mut buf = [0u8; 4096];
        loop {
            match reader.read(&mut buf) {
                Ok(0) => {
                    debug!(event = "core.terminal.reader_eof", topic = topic);
                    break;
                }
                Ok(n) => {
                    let data = buf[..n].to_vec();
                    buffer
                        .lock()
                        .expect("terminal buffer lock poisoned")
                        .push(&data);
                    if let Some(file) = log_file.as_mut()
                        && let Err(e) = file.write_all(&data)
                    {
                        error!(event = "core.terminal.log_file_write_failed", topic = topic, error = %e);
                        log_file = None;
                    }
                    let _ = output_tx.send(data);
                }
                Err(e) => {
                    error!(event = "core.terminal.reader_error", topic = topic, error = %e);
                    break;
                }
            }
        }
    })
}
