use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::ids::{CellId, RunId};

/// Outcome of a single timed step.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum StepStatus {
    Ok,
    Error,
}

/// A single step's timing, fanned out over the event bus's `cell-timing`
/// channel (keyed by `cell_id`) and visible to external clients verbatim.
///
/// `step` is a free-form string rather than an enum because several steps
/// are parameterized by a dynamic name (`template_setup:<command>`,
/// `service_start:<serviceName>`) — see the `step_*` constructors.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TimingEvent {
    pub cell_id: CellId,
    pub workflow: String,
    pub run_id: RunId,
    pub step: String,
    pub status: StepStatus,
    pub duration_ms: u64,
    pub created_at: DateTime<Utc>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub metadata: Option<serde_json::Value>,
}

impl TimingEvent {
    pub fn step_create_worktree() -> &'static str {
        "create_worktree"
    }

    pub fn step_ensure_services() -> &'static str {
        "ensure_services"
    }

    pub fn step_mark_ready() -> &'static str {
        "mark_ready"
    }

    pub fn step_template_setup_total() -> &'static str {
        "template_setup_total"
    }

    pub fn step_template_setup(command: &str) -> String {
        format!("template_setup:{command}")
    }

    pub fn step_service_start(service_name: &str) -> String {
        format!("service_start:{service_name}")
    }
}

/// Raw-plus-synthesized event republished on the `agent-event` channel
/// (keyed by session id). Clients receive upstream events verbatim and
/// Hive-synthesized `status`/`mode`/`session.compaction` events through the
/// same envelope shape.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AgentEventEnvelope {
    #[serde(rename = "type")]
    pub event_type: String,
    pub properties: serde_json::Value,
    pub timestamp: DateTime<Utc>,
}

impl AgentEventEnvelope {
    pub fn new(event_type: impl Into<String>, properties: serde_json::Value) -> Self {
        Self {
            event_type: event_type.into(),
            properties,
            timestamp: Utc::now(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn timing_event_omits_absent_optionals() {
        let evt = TimingEvent {
            cell_id: CellId::new("c1"),
            workflow: "create".to_string(),
            run_id: RunId::new("r1"),
            step: TimingEvent::step_mark_ready().to_string(),
            status: StepStatus::Ok,
            duration_ms: 12,
            created_at: Utc::now(),
            error: None,
            metadata: None,
        };
        let json = serde_json::to_string(&evt).unwrap();
        assert!(!json.contains("\"error\""));
        assert!(!json.contains("\"metadata\""));
    }

    #[test]
    fn parameterized_step_names() {
        assert_eq!(
            TimingEvent::step_template_setup("bun install"),
            "template_setup:bun install"
        );
        assert_eq!(
            TimingEvent::step_service_start("web"),
            "service_start:web"
        );
    }

    #[test]
    fn agent_event_envelope_roundtrip() {
        let evt = AgentEventEnvelope::new("mode", serde_json::json!({"mode": "build"}));
        let json = serde_json::to_string(&evt).unwrap();
        let parsed: AgentEventEnvelope = serde_json::from_str(&json).unwrap();
        assert_eq!(parsed.event_type, "mode");
    }
}
