use std::collections::HashMap;
use std::sync::Mutex;

use hive_protocol::{AgentEventEnvelope, TimingEvent};
use serde::{Deserialize, Serialize};
use tokio::sync::broadcast;

const CHANNEL_CAPACITY: usize = 256;

/// A service row's update — published whenever the Supervisor mutates a
/// `CellService`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServiceUpdateEvent {
    pub cell_id: String,
    pub service_id: String,
    pub status: String,
}

/// A cell's lifecycle status change.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CellStatusEvent {
    pub workspace_id: String,
    pub cell_id: String,
    pub status: String,
}

/// One topic family of the four described in §4.7. Each is keyed
/// independently (`service-update` by cell id, `cell-status` by workspace id,
/// `cell-timing` by cell id, `agent-event` by session id) so subscribers only
/// see traffic for the key they asked for.
struct Topic<E> {
    senders: Mutex<HashMap<String, broadcast::Sender<E>>>,
}

impl<E: Clone> Topic<E> {
    fn new() -> Self {
        Self {
            senders: Mutex::new(HashMap::new()),
        }
    }

    fn sender_for(&self, key: &str) -> broadcast::Sender<E> {
        let mut senders = self.senders.lock().expect("event bus topic lock poisoned");
        senders
            .entry(key.to_string())
            .or_insert_with(|| broadcast::channel(CHANNEL_CAPACITY).0)
            .clone()
    }

    /// Delivery is synchronous with respect to the emit call: by the time
    /// `publish` returns, every currently-subscribed receiver's queue holds
    /// the event (actual handler execution happens on the subscriber's own
    /// task, same as any `tokio::sync::broadcast` topic).
    ///
    /// A send with no active receivers drops the topic's entry: cells and
    /// agent sessions come and go over a long-running process's life, and
    /// without this the map would grow by one entry per distinct key ever
    /// subscribed to, never shrinking. `broadcast::Sender::send` fails
    /// exactly when its last receiver has been dropped, so that failure is
    /// the signal to prune; a later `subscribe` for the same key just opens
    /// a fresh channel.
    fn publish(&self, key: &str, event: E) {
        let mut senders = self.senders.lock().expect("event bus topic lock poisoned");
        let Some(tx) = senders.get(key) else {
            return;
        };
        if tx.send(event).is_err() {
            senders.remove(key);
        }
    }

    fn subscribe(&self, key: &str) -> broadcast::Receiver<E> {
        self.sender_for(key).subscribe()
    }
}

/// Process-local pub/sub across the four event families in §4.7. A `Vec`
/// subscription handle is not offered — a dropped `broadcast::Receiver`
/// already unsubscribes, so there's no separate unsubscribe function to
/// encapsulate, unlike the distilled spec's closure-returning contract.
pub struct EventBus {
    service_update: Topic<ServiceUpdateEvent>,
    cell_status: Topic<CellStatusEvent>,
    cell_timing: Topic<TimingEvent>,
    agent_event: Topic<AgentEventEnvelope>,
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new()
    }
}

impl EventBus {
    pub fn new() -> Self {
        Self {
            service_update: Topic::new(),
            cell_status: Topic::new(),
            cell_timing: Topic::new(),
            agent_event: Topic::new(),
        }
    }

    pub fn publish_service_update(&self, cell_id: &str, event: ServiceUpdateEvent) {
        self.service_update.publish(cell_id, event);
    }

    pub fn subscribe_service_update(&self, cell_id: &str) -> broadcast::Receiver<ServiceUpdateEvent> {
        self.service_update.subscribe(cell_id)
    }

    pub fn publish_cell_status(&self, workspace_id: &str, event: CellStatusEvent) {
        self.cell_status.publish(workspace_id, event);
    }

    pub fn subscribe_cell_status(&self, workspace_id: &str) -> broadcast::Receiver<CellStatusEvent> {
        self.cell_status.subscribe(workspace_id)
    }

    pub fn publish_cell_timing(&self, cell_id: &str, event: TimingEvent) {
        self.cell_timing.publish(cell_id, event);
    }

    pub fn subscribe_cell_timing(&self, cell_id: &str) -> broadcast::Receiver<TimingEvent> {
        self.cell_timing.subscribe(cell_id)
    }

    pub fn publish_agent_event(&self, session_id: &str, event: AgentEventEnvelope) {
        self.agent_event.publish(session_id, event);
    }

    pub fn subscribe_agent_event(&self, session_id: &str) -> broadcast::Receiver<AgentEventEnvelope> {
        self.agent_event.subscribe(session_id)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use hive_protocol::StepStatus;

    #[tokio::test]
    async fn delivers_only_to_matching_key() {
        let bus = EventBus::new();
        let mut a = bus.subscribe_service_update("cell-a");
        let mut b = bus.subscribe_service_update("cell-b");

        bus.publish_service_update(
            "cell-a",
            ServiceUpdateEvent {
                cell_id: "cell-a".into(),
                service_id: "svc-1".into(),
                status: "running".into(),
            },
        );

        assert_eq!(a.recv().await.unwrap().service_id, "svc-1");
        assert!(b.try_recv().is_err());
    }

    #[tokio::test]
    async fn preserves_emit_order_per_topic() {
        let bus = EventBus::new();
        let mut rx = bus.subscribe_cell_timing("cell-1");
        for step in ["create_worktree", "ensure_services", "mark_ready"] {
            bus.publish_cell_timing(
                "cell-1",
                TimingEvent {
                    cell_id: hive_protocol::CellId::new("cell-1"),
                    workflow: "create".into(),
                    run_id: hive_protocol::RunId::new("r1"),
                    step: step.into(),
                    status: StepStatus::Ok,
                    duration_ms: 1,
                    created_at: chrono::Utc::now(),
                    error: None,
                    metadata: None,
                },
            );
        }
        let mut seen = Vec::new();
        for _ in 0..3 {
            seen.push(rx.recv().await.unwrap().step);
        }
        assert_eq!(seen, vec!["create_worktree", "ensure_services", "mark_ready"]);
    }

    #[tokio::test]
    async fn publish_with_no_subscribers_does_not_panic() {
        let bus = EventBus::new();
        bus.publish_service_update(
            "cell-x",
            ServiceUpdateEvent {
                cell_id: "cell-x".into(),
                service_id: "svc".into(),
                status: "stopped".into(),
            },
        );
    }

    #[tokio::test]
    async fn dropped_subscriber_does_not_leak_topic_entry() {
        let bus = EventBus::new();
        let rx = bus.subscribe_service_update("cell-gone");
        assert_eq!(bus.service_update.senders.lock().unwrap().len(), 1);
        drop(rx);

        bus.publish_service_update(
            "cell-gone",
            ServiceUpdateEvent {
                cell_id: "cell-gone".into(),
                service_id: "svc".into(),
                status: "stopped".into(),
            },
        );

        assert_eq!(bus.service_update.senders.lock().unwrap().len(), 0);
    }
}
