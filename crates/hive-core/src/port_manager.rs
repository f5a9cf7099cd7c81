use std::collections::HashSet;
use std::time::Duration;

use nix::sys::signal::{self, Signal};
use nix::unistd::Pid;
use tokio::net::TcpListener;
use tokio::sync::Mutex;
use tracing::{debug, info, warn};

use crate::errors::PortError;

/// Vends and reserves free TCP ports for services, per §4.2.
///
/// The reservation set is process-wide and guards a single critical section
/// per operation — no lock is held across an `.await` that performs process
/// IO, mirroring how `PtyManager` guards its own map.
pub struct PortManager {
    reserved: Mutex<HashSet<u16>>,
}

impl Default for PortManager {
    fn default() -> Self {
        Self::new()
    }
}

impl PortManager {
    pub fn new() -> Self {
        Self {
            reserved: Mutex::new(HashSet::new()),
        }
    }

    /// Ensure a service has a reserved, usable port.
    ///
    /// If `persisted_port` is set, probe it first: a bound port with a live
    /// `pid` gets a `SIGTERM` and a 250ms grace window before retesting. If
    /// still bound after that (or bound with no pid to signal), a fresh
    /// ephemeral port is allocated instead. If free, it's reserved and
    /// returned as-is.
    pub async fn ensure_service_port(
        &self,
        service_id: &str,
        persisted_port: Option<u16>,
        pid: Option<u32>,
    ) -> Result<u16, PortError> {
        if let Some(port) = persisted_port {
            if self.probe_free(port).await? {
                self.reserve(port).await;
                return Ok(port);
            }
            if let Some(pid) = pid {
                debug!(
                    event = "core.port_manager.reclaim_started",
                    service_id = service_id,
                    port = port,
                    pid = pid,
                );
                let _ = signal::kill(Pid::from_raw(pid as i32), Signal::SIGTERM);
                tokio::time::sleep(Duration::from_millis(250)).await;
                if self.probe_free(port).await? {
                    self.reserve(port).await;
                    return Ok(port);
                }
            }
            warn!(
                event = "core.port_manager.reclaim_failed",
                service_id = service_id,
                port = port,
                "persisted port still bound, allocating a new one"
            );
        }

        let port = self.allocate_ephemeral().await?;
        self.reserve(port).await;
        info!(
            event = "core.port_manager.allocate_completed",
            service_id = service_id,
            port = port,
        );
        Ok(port)
    }

    /// Record a port as reserved without probing — used when a port is
    /// already known good (e.g. just bound to allocate it).
    pub async fn remember_specific_port(&self, port: u16) {
        self.reserve(port).await;
    }

    pub async fn release_port_for(&self, port: u16) {
        self.reserved.lock().await.remove(&port);
    }

    pub async fn is_reserved(&self, port: u16) -> bool {
        self.reserved.lock().await.contains(&port)
    }

    async fn reserve(&self, port: u16) {
        self.reserved.lock().await.insert(port);
    }

    /// A port is "free" if both binding fails to show it occupied (IPv4) and
    /// it's not already in our own reservation set. IPv6 probe failures
    /// (e.g. no IPv6 stack configured) are treated as success to stay
    /// portable, per spec.
    pub(crate) async fn probe_free(&self, port: u16) -> Result<bool, PortError> {
        if self.reserved.lock().await.contains(&port) {
            return Ok(false);
        }
        let v4_free = TcpListener::bind(("127.0.0.1", port)).await.is_ok();
        if !v4_free {
            return Ok(false);
        }
        let _ = TcpListener::bind(("::1", port)).await;
        Ok(true)
    }

    /// Bind to port 0 and let the kernel assign a free ephemeral port.
    /// Retries if the kernel happened to hand back a port already in our own
    /// reservation set (astronomically unlikely, but cheap to guard).
    async fn allocate_ephemeral(&self) -> Result<u16, PortError> {
        loop {
            let listener = TcpListener::bind(("127.0.0.1", 0)).await?;
            let port = listener.local_addr()?.port();
            drop(listener);
            if !self.reserved.lock().await.contains(&port) {
                return Ok(port);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn allocates_distinct_ports_for_concurrent_services() {
        let pm = PortManager::new();
        let a = pm.ensure_service_port("svc-a", None, None).await.unwrap();
        let b = pm.ensure_service_port("svc-b", None, None).await.unwrap();
        assert_ne!(a, b);
        assert!(pm.is_reserved(a).await);
        assert!(pm.is_reserved(b).await);
    }

    #[tokio::test]
    async fn reuses_persisted_port_when_free() {
        let pm = PortManager::new();
        let first = pm.ensure_service_port("svc-a", None, None).await.unwrap();
        pm.release_port_for(first).await;
        let second = pm
            .ensure_service_port("svc-a", Some(first), None)
            .await
            .unwrap();
        assert_eq!(first, second);
    }

    #[tokio::test]
    async fn allocates_fresh_port_when_persisted_port_is_reserved_by_another_service() {
        let pm = PortManager::new();
        let taken = pm.ensure_service_port("svc-a", None, None).await.unwrap();
        let reassigned = pm
            .ensure_service_port("svc-b", Some(taken), None)
            .await
            .unwrap();
        assert_ne!(taken, reassigned);
    }

    #[tokio::test]
    async fn release_then_reserve_allows_reuse() {
        let pm = PortManager::new();
        let port = pm.ensure_service_port("svc-a", None, None).await.unwrap();
        pm.release_port_for(port).await;
        assert!(!pm.is_reserved(port).await);
        pm.remember_specific_port(port).await;
        assert!(pm.is_reserved(port).await);
    }
}
