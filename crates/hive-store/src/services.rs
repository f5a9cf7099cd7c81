use std::collections::HashMap;
use std::path::PathBuf;

use chrono::Utc;
use hive_protocol::{CellId, ServiceId, ServiceStatus};
use sqlx::{Row, SqlitePool};
use tracing::{debug, info};
use uuid::Uuid;

use crate::errors::StoreError;
use crate::models::{Cell, CellService, NewCellService, ServicePatch};
use crate::utils::{column_to_enum, enum_to_column, parse_datetime};

fn row_to_service(row: sqlx::sqlite::SqliteRow) -> Result<CellService, StoreError> {
    let env_json: String = row.get("env");
    let definition_json: String = row.get("definition");
    Ok(CellService {
        id: ServiceId::new(row.get::<String, _>("id")),
        cell_id: CellId::new(row.get::<String, _>("cell_id")),
        name: row.get("name"),
        service_type: row.get("service_type"),
        command: row.get("command"),
        cwd: PathBuf::from(row.get::<String, _>("cwd")),
        env: serde_json::from_str::<HashMap<String, String>>(&env_json)?,
        definition: serde_json::from_str(&definition_json)?,
        port: row.get::<Option<i64>, _>("port").map(|p| p as u16),
        pid: row.get::<Option<i64>, _>("pid").map(|p| p as u32),
        status: column_to_enum(&row.get::<String, _>("status"))?,
        ready_timeout_ms: row.get::<Option<i64>, _>("ready_timeout_ms").map(|v| v as u64),
        last_known_error: row.get("last_known_error"),
        created_at: parse_datetime(&row.get::<String, _>("created_at"))
            .map_err(|e| StoreError::Database(sqlx::Error::Decode(Box::new(e))))?,
        updated_at: parse_datetime(&row.get::<String, _>("updated_at"))
            .map_err(|e| StoreError::Database(sqlx::Error::Decode(Box::new(e))))?,
    })
}

const SELECT_SERVICE: &str = "SELECT id, cell_id, name, service_type, command, cwd, env, \
     definition, port, pid, status, ready_timeout_ms, last_known_error, created_at, updated_at \
     FROM cell_services";

/// Insert a new service row. `id` is generated here (uuid v4) since callers
/// only know `(cellId, name)` at insertion time. Fails with
/// `StoreError::AlreadyExists` if `(cellId, name)` already has a row.
pub async fn insert_service(
    pool: &SqlitePool,
    new_service: NewCellService,
) -> Result<CellService, StoreError> {
    let now = Utc::now();
    let status = ServiceStatus::Pending;
    let env_json = serde_json::to_string(&new_service.env)?;
    let definition_json = serde_json::to_string(&new_service.definition)?;

    sqlx::query(
        "INSERT INTO cell_services (id, cell_id, name, service_type, command, cwd, env, \
         definition, port, pid, status, ready_timeout_ms, last_known_error, created_at, updated_at) \
         VALUES (?, ?, ?, ?, ?, ?, ?, ?, NULL, NULL, ?, ?, NULL, ?, ?)",
    )
    .bind(new_service.id.as_str())
    .bind(new_service.cell_id.as_str())
    .bind(&new_service.name)
    .bind(&new_service.service_type)
    .bind(&new_service.command)
    .bind(new_service.cwd.to_string_lossy().to_string())
    .bind(&env_json)
    .bind(&definition_json)
    .bind(enum_to_column(&status))
    .bind(new_service.ready_timeout_ms.map(|v| v as i64))
    .bind(now.to_rfc3339())
    .bind(now.to_rfc3339())
    .execute(pool)
    .await
    .map_err(|e| {
        StoreError::from_sqlx(e, || {
            format!("service {} in cell {}", new_service.name, new_service.cell_id)
        })
    })?;

    info!(
        event = "store.services.insert_completed",
        service_id = %new_service.id,
        cell_id = %new_service.cell_id,
        name = %new_service.name,
    );

    Ok(CellService {
        id: new_service.id,
        cell_id: new_service.cell_id,
        name: new_service.name,
        service_type: new_service.service_type,
        command: new_service.command,
        cwd: new_service.cwd,
        env: new_service.env,
        definition: new_service.definition,
        port: None,
        pid: None,
        status,
        ready_timeout_ms: new_service.ready_timeout_ms,
        last_known_error: None,
        created_at: now,
        updated_at: now,
    })
}

/// Generate a fresh service row id. Split out so callers (the supervisor's
/// ensure pass) can compute an id before the insert.
pub fn new_service_id() -> ServiceId {
    ServiceId::new(Uuid::new_v4().to_string())
}

pub async fn get_service(pool: &SqlitePool, id: &ServiceId) -> Result<CellService, StoreError> {
    let row = sqlx::query(&format!("{SELECT_SERVICE} WHERE id = ?"))
        .bind(id.as_str())
        .fetch_optional(pool)
        .await
        .map_err(StoreError::Database)?
        .ok_or_else(|| StoreError::NotFound(format!("service {id}")))?;
    row_to_service(row)
}

pub async fn find_service_by_cell_and_name(
    pool: &SqlitePool,
    cell_id: &CellId,
    name: &str,
) -> Result<Option<CellService>, StoreError> {
    let row = sqlx::query(&format!("{SELECT_SERVICE} WHERE cell_id = ? AND name = ?"))
        .bind(cell_id.as_str())
        .bind(name)
        .fetch_optional(pool)
        .await
        .map_err(StoreError::Database)?;
    row.map(row_to_service).transpose()
}

pub async fn list_services_by_cell(
    pool: &SqlitePool,
    cell_id: &CellId,
) -> Result<Vec<CellService>, StoreError> {
    let rows = sqlx::query(&format!("{SELECT_SERVICE} WHERE cell_id = ? ORDER BY name ASC"))
        .bind(cell_id.as_str())
        .fetch_all(pool)
        .await
        .map_err(StoreError::Database)?;
    rows.into_iter().map(row_to_service).collect()
}

/// Every service row joined with its owning cell — used by
/// `Supervisor::bootstrap()` to regroup services by cell on process start.
pub async fn list_all_services_with_cells(
    pool: &SqlitePool,
) -> Result<Vec<(CellService, Cell)>, StoreError> {
    let rows = sqlx::query(
        "SELECT s.id as s_id, s.cell_id as s_cell_id, s.name as s_name, \
         s.service_type as s_service_type, s.command as s_command, s.cwd as s_cwd, \
         s.env as s_env, s.definition as s_definition, s.port as s_port, s.pid as s_pid, \
         s.status as s_status, s.ready_timeout_ms as s_ready_timeout_ms, \
         s.last_known_error as s_last_known_error, s.created_at as s_created_at, \
         s.updated_at as s_updated_at, \
         c.id as c_id, c.name as c_name, c.template_id as c_template_id, \
         c.workspace_path as c_workspace_path, c.workspace_root_path as c_workspace_root_path, \
         c.workspace_id as c_workspace_id, c.description as c_description, c.status as c_status, \
         c.opencode_session_id as c_opencode_session_id, \
         c.resume_agent_session_on_startup as c_resume_agent_session_on_startup, \
         c.last_setup_error as c_last_setup_error, c.created_at as c_created_at, \
         c.updated_at as c_updated_at \
         FROM cell_services s JOIN cells c ON c.id = s.cell_id ORDER BY c.id ASC, s.name ASC",
    )
    .fetch_all(pool)
    .await
    .map_err(StoreError::Database)?;

    rows.into_iter()
        .map(|row| {
            let service = row_to_service_prefixed(&row, "s_")?;
            let cell = crate::cells::row_to_cell_prefixed(&row, "c_")?;
            Ok((service, cell))
        })
        .collect()
}

fn row_to_service_prefixed(
    row: &sqlx::sqlite::SqliteRow,
    prefix: &str,
) -> Result<CellService, StoreError> {
    let env_json: String = row.get(format!("{prefix}env").as_str());
    let definition_json: String = row.get(format!("{prefix}definition").as_str());
    Ok(CellService {
        id: ServiceId::new(row.get::<String, _>(format!("{prefix}id").as_str())),
        cell_id: CellId::new(row.get::<String, _>(format!("{prefix}cell_id").as_str())),
        name: row.get(format!("{prefix}name").as_str()),
        service_type: row.get(format!("{prefix}service_type").as_str()),
        command: row.get(format!("{prefix}command").as_str()),
        cwd: PathBuf::from(row.get::<String, _>(format!("{prefix}cwd").as_str())),
        env: serde_json::from_str(&env_json)?,
        definition: serde_json::from_str(&definition_json)?,
        port: row
            .get::<Option<i64>, _>(format!("{prefix}port").as_str())
            .map(|p| p as u16),
        pid: row
            .get::<Option<i64>, _>(format!("{prefix}pid").as_str())
            .map(|p| p as u32),
        status: column_to_enum(&row.get::<String, _>(format!("{prefix}status").as_str()))?,
        ready_timeout_ms: row
            .get::<Option<i64>, _>(format!("{prefix}ready_timeout_ms").as_str())
            .map(|v| v as u64),
        last_known_error: row.get(format!("{prefix}last_known_error").as_str()),
        created_at: parse_datetime(&row.get::<String, _>(format!("{prefix}created_at").as_str()))
            .map_err(|e| StoreError::Database(sqlx::Error::Decode(Box::new(e))))?,
        updated_at: parse_datetime(&row.get::<String, _>(format!("{prefix}updated_at").as_str()))
            .map_err(|e| StoreError::Database(sqlx::Error::Decode(Box::new(e))))?,
    })
}

/// Apply a sparse patch to a service row, bumping `updated_at`.
pub async fn update_service(
    pool: &SqlitePool,
    id: &ServiceId,
    patch: ServicePatch,
) -> Result<CellService, StoreError> {
    let existing = get_service(pool, id).await?;
    let now = Utc::now();

    let command = patch.command.unwrap_or_else(|| existing.command.clone());
    let cwd = patch.cwd.unwrap_or_else(|| existing.cwd.clone());
    let env = patch.env.unwrap_or_else(|| existing.env.clone());
    let definition = patch.definition.unwrap_or_else(|| existing.definition.clone());
    let port = patch.port.unwrap_or(existing.port);
    let pid = patch.pid.unwrap_or(existing.pid);
    let status = patch.status.unwrap_or(existing.status);
    let ready_timeout_ms = patch.ready_timeout_ms.unwrap_or(existing.ready_timeout_ms);
    let last_known_error = patch
        .last_known_error
        .unwrap_or_else(|| existing.last_known_error.clone());

    let env_json = serde_json::to_string(&env)?;
    let definition_json = serde_json::to_string(&definition)?;

    sqlx::query(
        "UPDATE cell_services SET command = ?, cwd = ?, env = ?, definition = ?, port = ?, \
         pid = ?, status = ?, ready_timeout_ms = ?, last_known_error = ?, updated_at = ? \
         WHERE id = ?",
    )
    .bind(&command)
    .bind(cwd.to_string_lossy().to_string())
    .bind(&env_json)
    .bind(&definition_json)
    .bind(port.map(|p| p as i64))
    .bind(pid.map(|p| p as i64))
    .bind(enum_to_column(&status))
    .bind(ready_timeout_ms.map(|v| v as i64))
    .bind(&last_known_error)
    .bind(now.to_rfc3339())
    .bind(id.as_str())
    .execute(pool)
    .await
    .map_err(StoreError::Database)?;

    debug!(event = "store.services.update_completed", service_id = %id);

    Ok(CellService {
        command,
        cwd,
        env,
        definition,
        port,
        pid,
        status,
        ready_timeout_ms,
        last_known_error,
        updated_at: now,
        ..existing
    })
}

pub async fn delete_service(pool: &SqlitePool, id: &ServiceId) -> Result<(), StoreError> {
    let result = sqlx::query("DELETE FROM cell_services WHERE id = ?")
        .bind(id.as_str())
        .execute(pool)
        .await
        .map_err(StoreError::Database)?;
    if result.rows_affected() == 0 {
        return Err(StoreError::NotFound(format!("service {id}")));
    }
    info!(event = "store.services.delete_completed", service_id = %id);
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cells::insert_cell;
    use crate::models::NewCell;
    use crate::pool::DatabaseConnection;
    use hive_protocol::{TemplateId, WorkspaceId};

    async fn setup_with_cell() -> (DatabaseConnection, CellId) {
        let db = DatabaseConnection::connect("sqlite::memory:").await.unwrap();
        let cell_id = CellId::new("c1");
        insert_cell(
            db.pool(),
            NewCell {
                id: cell_id.clone(),
                name: "cell-one".into(),
                template_id: TemplateId::new("node"),
                workspace_path: PathBuf::from("/repo/.hive/cells/c1"),
                workspace_root_path: PathBuf::from("/repo"),
                workspace_id: WorkspaceId::new("ws1"),
                description: None,
            },
        )
        .await
        .unwrap();
        (db, cell_id)
    }

    fn sample_service(cell_id: &CellId, name: &str) -> NewCellService {
        NewCellService {
            id: new_service_id(),
            cell_id: cell_id.clone(),
            name: name.to_string(),
            service_type: "process".to_string(),
            command: "bun run dev".to_string(),
            cwd: PathBuf::from("/repo/.hive/cells/c1"),
            env: HashMap::new(),
            definition: serde_json::json!({"run": "bun run dev"}),
            ready_timeout_ms: None,
        }
    }

    #[tokio::test]
    async fn insert_then_find_by_cell_and_name() {
        let (db, cell_id) = setup_with_cell().await;
        insert_service(db.pool(), sample_service(&cell_id, "web"))
            .await
            .unwrap();
        let found = find_service_by_cell_and_name(db.pool(), &cell_id, "web")
            .await
            .unwrap();
        assert!(found.is_some());
        assert_eq!(found.unwrap().status, ServiceStatus::Pending);
    }

    #[tokio::test]
    async fn duplicate_name_per_cell_is_already_exists() {
        let (db, cell_id) = setup_with_cell().await;
        insert_service(db.pool(), sample_service(&cell_id, "web"))
            .await
            .unwrap();
        let mut dup = sample_service(&cell_id, "web");
        dup.id = new_service_id();
        let err = insert_service(db.pool(), dup).await.unwrap_err();
        assert!(matches!(err, StoreError::AlreadyExists(_)));
    }

    #[tokio::test]
    async fn cascade_delete_removes_services_when_cell_deleted() {
        let (db, cell_id) = setup_with_cell().await;
        insert_service(db.pool(), sample_service(&cell_id, "web"))
            .await
            .unwrap();
        crate::cells::delete_cell(db.pool(), &cell_id).await.unwrap();
        let services = list_services_by_cell(db.pool(), &cell_id).await.unwrap();
        assert!(services.is_empty());
    }

    #[tokio::test]
    async fn update_running_sets_port_and_pid() {
        let (db, cell_id) = setup_with_cell().await;
        let svc = insert_service(db.pool(), sample_service(&cell_id, "web"))
            .await
            .unwrap();
        let updated = update_service(
            db.pool(),
            &svc.id,
            ServicePatch {
                status: Some(ServiceStatus::Running),
                port: Some(Some(5555)),
                pid: Some(Some(4242)),
                ..Default::default()
            },
        )
        .await
        .unwrap();
        assert_eq!(updated.status, ServiceStatus::Running);
        assert_eq!(updated.port, Some(5555));
        assert_eq!(updated.pid, Some(4242));
    }

    #[tokio::test]
    async fn list_all_services_with_cells_joins_correctly() {
        let (db, cell_id) = setup_with_cell().await;
        insert_service(db.pool(), sample_service(&cell_id, "web"))
            .await
            .unwrap();
        let joined = list_all_services_with_cells(db.pool()).await.unwrap();
        assert_eq!(joined.len(), 1);
        assert_eq!(joined[0].0.name, "web");
        assert_eq!(joined[0].1.id, cell_id);
    }
}
