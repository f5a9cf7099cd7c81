//! hive-core: the Service Supervisor, Cell Provisioning Engine, Agent
//! Runtime, Terminal Runtime, Event Bus, Port Manager, and git worktree
//! adapter — the concurrency fabric the rest of Hive is built on.

pub mod agent;
pub mod env_interp;
pub mod errors;
pub mod event_bus;
pub mod locks;
pub mod port_manager;
pub mod provisioning;
pub mod supervisor;
pub mod terminal;
pub mod worktree;

pub use agent::{AgentRegistry, AgentRuntime, AgentRuntimeHandle, EnsureSessionOptions, RuntimeCollaborators};
pub use errors::{AgentRuntimeError, PortError, ProvisioningError, SupervisorError, WorktreeError};
pub use event_bus::EventBus;
pub use locks::KeyedLock;
pub use port_manager::PortManager;
pub use provisioning::ProvisioningEngine;
pub use supervisor::ServiceSupervisor;
pub use terminal::TerminalRuntime;
pub use worktree::WorktreeAdapter;
