use serde::{Deserialize, Serialize};

/// Lifecycle status of a `Cell` row.
#[non_exhaustive]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CellStatus {
    Spawning,
    Ready,
    Error,
    Stopped,
}

impl std::fmt::Display for CellStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            CellStatus::Spawning => "spawning",
            CellStatus::Ready => "ready",
            CellStatus::Error => "error",
            CellStatus::Stopped => "stopped",
        };
        write!(f, "{s}")
    }
}

/// Lifecycle status of a `CellService` row.
///
/// `NeedsResume` is set by `stopAll`/bootstrap to mark services the next
/// `bootstrap()` call should restart.
#[non_exhaustive]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ServiceStatus {
    Pending,
    Starting,
    Running,
    Stopped,
    NeedsResume,
    Error,
}

impl ServiceStatus {
    /// Statuses that `bootstrap()` will attempt to restart, provided the
    /// persisted port is free and no live process is already attached.
    pub const AUTO_RESTART: &'static [ServiceStatus] = &[
        ServiceStatus::Running,
        ServiceStatus::Starting,
        ServiceStatus::NeedsResume,
    ];

    pub fn is_auto_restart(&self) -> bool {
        Self::AUTO_RESTART.contains(self)
    }
}

impl std::fmt::Display for ServiceStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            ServiceStatus::Pending => "pending",
            ServiceStatus::Starting => "starting",
            ServiceStatus::Running => "running",
            ServiceStatus::Stopped => "stopped",
            ServiceStatus::NeedsResume => "needs_resume",
            ServiceStatus::Error => "error",
        };
        write!(f, "{s}")
    }
}

/// Status of an in-memory `AgentRuntime` handle.
#[non_exhaustive]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AgentRuntimeStatus {
    AwaitingInput,
    Working,
    Completed,
    Error,
}

/// The agent's operational posture. `Plan` is read-only, `Build` may edit
/// files and run tools.
///
/// Also used for `CellProvisioningState.startMode`/`opts.startMode` — both
/// are the same plan/build choice, just applied at different points in the
/// agent-session lifecycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Mode {
    Plan,
    Build,
}

/// Status of a `CellProvisioningState` row: whether the most recently
/// entered step is still in flight, finished, or failed. Distinct from
/// `CellStatus` — a cell can be `ready` while its last recorded
/// provisioning run is `succeeded`, but a `spawning` cell with a
/// `failed` provisioning row is what `resumeProvisioningOnStartup`
/// re-enters from.
#[non_exhaustive]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ProvisioningStatus {
    Running,
    Succeeded,
    Failed,
}

impl std::fmt::Display for ProvisioningStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            ProvisioningStatus::Running => "running",
            ProvisioningStatus::Succeeded => "succeeded",
            ProvisioningStatus::Failed => "failed",
        };
        write!(f, "{s}")
    }
}

impl Mode {
    /// Parse a mode string from an upstream event payload, tolerating only
    /// the two known values; anything else is not a mode transition.
    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "plan" => Some(Mode::Plan),
            "build" => Some(Mode::Build),
            _ => None,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Mode::Plan => "plan",
            Mode::Build => "build",
        }
    }
}

impl std::fmt::Display for Mode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn service_status_auto_restart_set() {
        assert!(ServiceStatus::Running.is_auto_restart());
        assert!(ServiceStatus::Starting.is_auto_restart());
        assert!(ServiceStatus::NeedsResume.is_auto_restart());
        assert!(!ServiceStatus::Stopped.is_auto_restart());
        assert!(!ServiceStatus::Pending.is_auto_restart());
        assert!(!ServiceStatus::Error.is_auto_restart());
    }

    #[test]
    fn mode_parse_tolerates_unknown() {
        assert_eq!(Mode::parse("plan"), Some(Mode::Plan));
        assert_eq!(Mode::parse("build"), Some(Mode::Build));
        assert_eq!(Mode::parse("chat"), None);
        assert_eq!(Mode::parse(""), None);
    }

    #[test]
    fn cell_status_serde_snake_case() {
        assert_eq!(
            serde_json::to_string(&CellStatus::Spawning).unwrap(),
            "\"spawning\""
        );
        assert_eq!(
            serde_json::to_string(&ServiceStatus::NeedsResume).unwrap(),
            "\"needs_resume\""
        );
    }

    #[test]
    fn display_matches_wire_format() {
        assert_eq!(CellStatus::Ready.to_string(), "ready");
        assert_eq!(ServiceStatus::NeedsResume.to_string(), "needs_resume");
        assert_eq!(Mode::Build.to_string(), "build");
        assert_eq!(ProvisioningStatus::Failed.to_string(), "failed");
    }

    #[test]
    fn provisioning_status_serde_snake_case() {
        assert_eq!(
            serde_json::to_string(&ProvisioningStatus::Running).unwrap(),
            "\"running\""
        );
    }
}
