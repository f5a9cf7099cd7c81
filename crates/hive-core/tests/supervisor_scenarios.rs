//! Multi-component scenarios spanning the store, port manager, service
//! supervisor, and provisioning engine together, rather than any one of
//! them in isolation. Grounded on `kild-daemon/tests/integration.rs`'s
//! style: spawn real infrastructure in-process, exercise it end to end
//! through its public API, assert on externally observable state.

use std::collections::HashMap;
use std::path::Path;
use std::process::Command;
use std::sync::Arc;
use std::time::Duration;

use hive_config::{ServiceDefinition, ServiceKind, Template};
use hive_core::event_bus::EventBus;
use hive_core::port_manager::PortManager;
use hive_core::provisioning::ProvisioningEngine;
use hive_core::supervisor::ServiceSupervisor;
use hive_core::terminal::TerminalRuntime;
use hive_protocol::{CellId, CellStatus, RunId, ServiceStatus, TemplateId, WorkspaceId};
use hive_store::pool::DatabaseConnection;
use hive_store::NewCell;

fn init_repo(dir: &Path) {
    let run = |args: &[&str]| {
        Command::new("git").args(args).current_dir(dir).output().unwrap();
    };
    run(&["init"]);
    run(&["config", "user.email", "t@t.com"]);
    run(&["config", "user.name", "t"]);
    std::fs::write(dir.join("README.md"), "hi").unwrap();
    run(&["add", "."]);
    run(&["commit", "-m", "init"]);
}

fn process_service(run: &str) -> ServiceDefinition {
    ServiceDefinition {
        kind: ServiceKind::Process,
        run: run.to_string(),
        cwd: None,
        env: HashMap::new(),
        stop: None,
        setup: Vec::new(),
        ready_timeout_ms: None,
        ports: Vec::new(),
    }
}

async fn seed_cell(db: &DatabaseConnection, cell_id: &str, workspace_path: std::path::PathBuf) -> CellId {
    let id = CellId::new(cell_id);
    hive_store::cells::insert_cell(
        db.pool(),
        NewCell {
            id: id.clone(),
            name: format!("cell-{cell_id}"),
            template_id: TemplateId::new("node"),
            workspace_path: workspace_path.clone(),
            workspace_root_path: workspace_path,
            workspace_id: WorkspaceId::new("ws1"),
            description: None,
        },
    )
    .await
    .unwrap();
    id
}

/// Seed scenario 1: a two-service template both reach `running`, and each
/// service's process sees its sibling's bound port via `<NAME>_PORT`.
#[tokio::test]
async fn two_service_template_wires_sibling_ports() {
    let db = DatabaseConnection::connect("sqlite::memory:").await.unwrap();
    let events = Arc::new(EventBus::new());
    let ports = Arc::new(PortManager::new());
    let terminals = Arc::new(TerminalRuntime::new());
    let supervisor = ServiceSupervisor::new(db.pool().clone(), ports, terminals, events);

    let dir = tempfile::tempdir().unwrap();
    let cell_id = seed_cell(&db, "c1", dir.path().to_path_buf()).await;

    let web_out = dir.path().join("web.env");
    let api_out = dir.path().join("api.env");
    let mut services = HashMap::new();
    services.insert(
        "web".to_string(),
        process_service(&format!(
            "sh -c 'echo PORT=$PORT API_PORT=$API_PORT > {}; sleep 30'",
            web_out.display()
        )),
    );
    services.insert(
        "api".to_string(),
        process_service(&format!(
            "sh -c 'echo PORT=$PORT WEB_PORT=$WEB_PORT > {}; sleep 30'",
            api_out.display()
        )),
    );
    let template = Template {
        id: "dual".into(),
        label: "Dual".into(),
        template_type: "node".into(),
        setup: Vec::new(),
        services,
        env: HashMap::new(),
        agent: None,
    };

    supervisor
        .ensure_cell_services(&cell_id, dir.path(), &template, &RunId::new("run-1"))
        .await
        .unwrap();

    let rows = hive_store::services::list_services_by_cell(db.pool(), &cell_id)
        .await
        .unwrap();
    assert_eq!(rows.len(), 2);
    for row in &rows {
        assert_eq!(row.status, ServiceStatus::Running);
        assert!(row.port.is_some());
    }

    // Give the backgrounded subshells a moment to flush their output files.
    tokio::time::sleep(Duration::from_millis(500)).await;
    let web_env = std::fs::read_to_string(&web_out).unwrap();
    let api_env = std::fs::read_to_string(&api_out).unwrap();

    let web_port = rows.iter().find(|r| r.name == "web").unwrap().port.unwrap();
    let api_port = rows.iter().find(|r| r.name == "api").unwrap().port.unwrap();
    assert!(web_env.contains(&format!("PORT={web_port}")));
    assert!(web_env.contains(&format!("API_PORT={api_port}")));
    assert!(api_env.contains(&format!("PORT={api_port}")));
    assert!(api_env.contains(&format!("WEB_PORT={web_port}")));
}

/// Seed scenario: calling `ensureCellServices` twice concurrently for the
/// same cell spawns exactly one process per service — the second caller
/// either blocks on the cell lock and sees the already-running service, or
/// observes the active-handle guard and skips its own start.
#[tokio::test]
async fn concurrent_ensure_does_not_double_spawn() {
    let db = DatabaseConnection::connect("sqlite::memory:").await.unwrap();
    let events = Arc::new(EventBus::new());
    let ports = Arc::new(PortManager::new());
    let terminals = Arc::new(TerminalRuntime::new());
    let supervisor = ServiceSupervisor::new(db.pool().clone(), ports, terminals, events);

    let dir = tempfile::tempdir().unwrap();
    let cell_id = seed_cell(&db, "c1", dir.path().to_path_buf()).await;

    let counter_file = dir.path().join("spawns.log");
    let mut services = HashMap::new();
    services.insert(
        "web".to_string(),
        process_service(&format!("sh -c 'echo spawned >> {}; sleep 30'", counter_file.display())),
    );
    let template = Arc::new(Template {
        id: "solo".into(),
        label: "Solo".into(),
        template_type: "node".into(),
        setup: Vec::new(),
        services,
        env: HashMap::new(),
        agent: None,
    });

    let a = {
        let supervisor = supervisor.clone();
        let template = template.clone();
        let cell_id = cell_id.clone();
        let dir = dir.path().to_path_buf();
        tokio::spawn(async move {
            supervisor
                .ensure_cell_services(&cell_id, &dir, &template, &RunId::new("run-a"))
                .await
        })
    };
    let b = {
        let supervisor = supervisor.clone();
        let template = template.clone();
        let cell_id = cell_id.clone();
        let dir = dir.path().to_path_buf();
        tokio::spawn(async move {
            supervisor
                .ensure_cell_services(&cell_id, &dir, &template, &RunId::new("run-b"))
                .await
        })
    };
    a.await.unwrap().unwrap();
    b.await.unwrap().unwrap();

    tokio::time::sleep(Duration::from_millis(300)).await;
    let log = std::fs::read_to_string(&counter_file).unwrap();
    assert_eq!(log.lines().count(), 1);

    let rows = hive_store::services::list_services_by_cell(db.pool(), &cell_id)
        .await
        .unwrap();
    assert_eq!(rows.len(), 1);
    assert_eq!(rows[0].status, ServiceStatus::Running);
}

/// Seed scenario 3: after `stopAll` clears every pid and releases ports,
/// `bootstrap` respawns each eligible service with a fresh pid bound to the
/// same port.
#[tokio::test]
async fn bootstrap_after_restart_respawns_with_fresh_pid() {
    let db = DatabaseConnection::connect("sqlite::memory:").await.unwrap();
    let events = Arc::new(EventBus::new());
    let ports = Arc::new(PortManager::new());
    let terminals = Arc::new(TerminalRuntime::new());
    let supervisor = ServiceSupervisor::new(db.pool().clone(), ports, terminals, events);

    let dir = tempfile::tempdir().unwrap();
    let cell_id = seed_cell(&db, "c1", dir.path().to_path_buf()).await;

    let mut services = HashMap::new();
    services.insert("web".to_string(), process_service("sleep 30"));
    let template = Template {
        id: "solo".into(),
        label: "Solo".into(),
        template_type: "node".into(),
        setup: Vec::new(),
        services,
        env: HashMap::new(),
        agent: None,
    };

    supervisor
        .ensure_cell_services(&cell_id, dir.path(), &template, &RunId::new("run-1"))
        .await
        .unwrap();

    let rows = hive_store::services::list_services_by_cell(db.pool(), &cell_id)
        .await
        .unwrap();
    let service = rows.into_iter().next().unwrap();
    let first_pid = service.pid.expect("freshly started service has a pid");
    let bound_port = service.port.expect("freshly started service has a port");

    supervisor.stop_all().await.unwrap();
    let stopped = hive_store::services::get_service(db.pool(), &service.id).await.unwrap();
    assert_eq!(stopped.status, ServiceStatus::NeedsResume);
    assert!(stopped.pid.is_none());

    supervisor.bootstrap().await.unwrap();
    let restarted = hive_store::services::get_service(db.pool(), &service.id).await.unwrap();
    assert_eq!(restarted.status, ServiceStatus::Running);
    let second_pid = restarted.pid.expect("bootstrap respawns with a pid");
    assert_ne!(first_pid, second_pid);
    assert_eq!(restarted.port, Some(bound_port));
}

/// Seed scenario 4: a setup command that outlives
/// `HIVE_TEMPLATE_SETUP_COMMAND_TIMEOUT_MS` is SIGTERM'd, then SIGKILL'd if
/// still alive, and the cell lands in `error` with exit code 124 recorded
/// in `lastSetupError`.
#[tokio::test]
async fn template_setup_timeout_fails_cell_with_exit_code_124() {
    temp_env::async_with_vars([("HIVE_TEMPLATE_SETUP_COMMAND_TIMEOUT_MS", Some("200"))], async {
        let db = DatabaseConnection::connect("sqlite::memory:").await.unwrap();
        let events = Arc::new(EventBus::new());
        let ports = Arc::new(PortManager::new());
        let terminals = Arc::new(TerminalRuntime::new());
        let supervisor = ServiceSupervisor::new(db.pool().clone(), ports, terminals, events.clone());
        let engine = ProvisioningEngine::new(db.pool().clone(), supervisor, events);

        let dir = tempfile::tempdir().unwrap();
        init_repo(dir.path());

        let template = Template {
            id: "slow-setup".into(),
            label: "Slow setup".into(),
            template_type: "node".into(),
            setup: vec!["sleep 5".to_string()],
            services: HashMap::new(),
            env: HashMap::new(),
            agent: None,
        };

        let err = engine
            .create_cell(dir.path(), &WorkspaceId::new("ws1"), "slow", &template, None)
            .await
            .unwrap_err();
        assert!(err.to_last_setup_error().contains("exitCode=124"));

        let cells = hive_store::cells::list_cells_by_workspace(db.pool(), &WorkspaceId::new("ws1"))
            .await
            .unwrap();
        let cell = cells.into_iter().next().unwrap();
        assert_eq!(cell.status, CellStatus::Error);
        assert!(cell.last_setup_error.unwrap().contains("exitCode=124"));
    })
    .await;
}
