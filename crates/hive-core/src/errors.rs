use hive_protocol::HiveError;

/// Errors from the Port Manager (§4.2). Allocation exhaustion is not
/// represented: the kernel's ephemeral-port vend makes it unreachable in
/// practice, per spec.
#[derive(Debug, thiserror::Error)]
#[non_exhaustive]
pub enum PortError {
    #[error("port probe failed: {0}")]
    Io(#[from] std::io::Error),
}

impl HiveError for PortError {
    fn error_code(&self) -> &'static str {
        "PORT_IO_ERROR"
    }
}

/// Errors from the git worktree adapter.
#[derive(Debug, thiserror::Error)]
#[non_exhaustive]
pub enum WorktreeError {
    #[error("not a git repository: {0}")]
    NotARepository(String),

    #[error("worktree already exists at {0}")]
    AlreadyExists(String),

    #[error("git error: {0}")]
    Git(#[from] git2::Error),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

impl HiveError for WorktreeError {
    fn error_code(&self) -> &'static str {
        match self {
            WorktreeError::NotARepository(_) => "WORKTREE_NOT_A_REPOSITORY",
            WorktreeError::AlreadyExists(_) => "WORKTREE_ALREADY_EXISTS",
            WorktreeError::Git(_) => "WORKTREE_GIT_ERROR",
            WorktreeError::Io(_) => "WORKTREE_IO_ERROR",
        }
    }

    fn is_user_error(&self) -> bool {
        matches!(self, WorktreeError::AlreadyExists(_))
    }
}

/// Errors from the Service Supervisor (§4.3): template setup, service
/// lifecycle, and process-execution failures.
#[derive(Debug, thiserror::Error)]
#[non_exhaustive]
pub enum SupervisorError {
    #[error("service not found: {0}")]
    ServiceNotFound(String),

    #[error("command '{command}' in {cwd} exited with code {exit_code}")]
    CommandExecution {
        command: String,
        cwd: String,
        exit_code: i32,
    },

    #[error(
        "template setup command '{command}' for template '{template_id}' in {workspace_path} \
         failed{}",
        exit_code.map(|c| format!(" (exit code {c})")).unwrap_or_default()
    )]
    TemplateSetup {
        command: String,
        template_id: String,
        workspace_path: String,
        exit_code: Option<i32>,
    },

    #[error("service working directory not found: {0}")]
    WorkingDirNotFound(String),

    #[error("PTY error: {0}")]
    Pty(String),

    #[error("store error: {0}")]
    Store(#[from] hive_store::StoreError),

    #[error("port error: {0}")]
    Port(#[from] PortError),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

impl SupervisorError {
    pub fn exit_code(&self) -> Option<i32> {
        match self {
            SupervisorError::CommandExecution { exit_code, .. } => Some(*exit_code),
            SupervisorError::TemplateSetup { exit_code, .. } => *exit_code,
            _ => None,
        }
    }
}

impl HiveError for SupervisorError {
    fn error_code(&self) -> &'static str {
        match self {
            SupervisorError::ServiceNotFound(_) => "SUPERVISOR_SERVICE_NOT_FOUND",
            SupervisorError::CommandExecution { .. } => "SUPERVISOR_COMMAND_EXECUTION",
            SupervisorError::TemplateSetup { .. } => "SUPERVISOR_TEMPLATE_SETUP",
            SupervisorError::WorkingDirNotFound(_) => "SUPERVISOR_WORKING_DIR_NOT_FOUND",
            SupervisorError::Pty(_) => "SUPERVISOR_PTY_ERROR",
            SupervisorError::Store(_) => "SUPERVISOR_STORE_ERROR",
            SupervisorError::Port(_) => "SUPERVISOR_PORT_ERROR",
            SupervisorError::Io(_) => "SUPERVISOR_IO_ERROR",
        }
    }

    fn is_user_error(&self) -> bool {
        matches!(
            self,
            SupervisorError::ServiceNotFound(_)
                | SupervisorError::CommandExecution { .. }
                | SupervisorError::TemplateSetup { .. }
                | SupervisorError::WorkingDirNotFound(_)
        )
    }
}

/// Errors from the Cell Provisioning Engine (§4.4).
#[derive(Debug, thiserror::Error)]
#[non_exhaustive]
pub enum ProvisioningError {
    #[error("cell not found: {0}")]
    CellNotFound(String),

    #[error("worktree error: {0}")]
    Worktree(#[from] WorktreeError),

    #[error("supervisor error: {0}")]
    Supervisor(#[from] SupervisorError),

    #[error("store error: {0}")]
    Store(#[from] hive_store::StoreError),

    #[error("config error: {0}")]
    Config(#[from] hive_config::ConfigError),
}

impl ProvisioningError {
    /// The message persisted as `Cell.lastSetupError`. Template setup
    /// failures include their exit code per spec §4.4.
    pub fn to_last_setup_error(&self) -> String {
        if let ProvisioningError::Supervisor(SupervisorError::TemplateSetup {
            exit_code: Some(code),
            ..
        }) = self
        {
            return format!("{self} (exitCode={code})");
        }
        self.to_string()
    }
}

impl HiveError for ProvisioningError {
    fn error_code(&self) -> &'static str {
        match self {
            ProvisioningError::CellNotFound(_) => "PROVISIONING_CELL_NOT_FOUND",
            ProvisioningError::Worktree(_) => "PROVISIONING_WORKTREE_ERROR",
            ProvisioningError::Supervisor(_) => "PROVISIONING_SUPERVISOR_ERROR",
            ProvisioningError::Store(_) => "PROVISIONING_STORE_ERROR",
            ProvisioningError::Config(_) => "PROVISIONING_CONFIG_ERROR",
        }
    }

    fn is_user_error(&self) -> bool {
        matches!(self, ProvisioningError::CellNotFound(_))
    }
}

/// Errors from the Agent Runtime (§4.5).
#[derive(Debug, thiserror::Error)]
#[non_exhaustive]
pub enum AgentRuntimeError {
    #[error("cell not found: {0}")]
    CellNotFound(String),

    #[error("no runtime bound to cell {0}")]
    RuntimeNotFound(String),

    #[error(
        "Selected model override is invalid: model \"{model_id}\" is unavailable for provider \
         \"{provider_id}\". Available models: {available}. Refresh the model catalog and try \
         again."
    )]
    ModelOverrideInvalid {
        provider_id: String,
        model_id: String,
        available: String,
    },

    #[error("Missing authentication for {0}. Run opencode auth login {0}.")]
    CredentialMissing(String),

    #[error("malformed credential entry for provider {0}: {1}")]
    CredentialMalformed(String, String),

    #[error("remote agent RPC error: {0}")]
    Rpc(String),

    /// The remote server rejected a prompt because the session's in-flight
    /// message was aborted (normally the counterpart of a local
    /// `interruptAgentSession` call racing the send). Kept distinct from
    /// [`AgentRuntimeError::Rpc`] so `send_agent_message` can swallow only
    /// this specific failure when a local interrupt is pending, per §4.5.5 —
    /// any other RPC failure still surfaces as an error.
    #[error("message aborted: {0}")]
    MessageAborted(String),

    #[error("store error: {0}")]
    Store(#[from] hive_store::StoreError),

    #[error("config error: {0}")]
    Config(#[from] hive_config::ConfigError),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("serialization error: {0}")]
    Serde(#[from] serde_json::Error),
}

impl HiveError for AgentRuntimeError {
    fn error_code(&self) -> &'static str {
        match self {
            AgentRuntimeError::CellNotFound(_) => "AGENT_CELL_NOT_FOUND",
            AgentRuntimeError::RuntimeNotFound(_) => "AGENT_RUNTIME_NOT_FOUND",
            AgentRuntimeError::ModelOverrideInvalid { .. } => "AGENT_MODEL_OVERRIDE_INVALID",
            AgentRuntimeError::CredentialMissing(_) => "AGENT_CREDENTIAL_MISSING",
            AgentRuntimeError::CredentialMalformed(_, _) => "AGENT_CREDENTIAL_MALFORMED",
            AgentRuntimeError::Rpc(_) => "AGENT_RPC_ERROR",
            AgentRuntimeError::MessageAborted(_) => "AGENT_MESSAGE_ABORTED",
            AgentRuntimeError::Store(_) => "AGENT_STORE_ERROR",
            AgentRuntimeError::Config(_) => "AGENT_CONFIG_ERROR",
            AgentRuntimeError::Io(_) => "AGENT_IO_ERROR",
            AgentRuntimeError::Serde(_) => "AGENT_SERDE_ERROR",
        }
    }

    fn is_user_error(&self) -> bool {
        matches!(
            self,
            AgentRuntimeError::CellNotFound(_)
                | AgentRuntimeError::RuntimeNotFound(_)
                | AgentRuntimeError::ModelOverrideInvalid { .. }
                | AgentRuntimeError::CredentialMissing(_)
                | AgentRuntimeError::CredentialMalformed(_, _)
        )
    }
}
