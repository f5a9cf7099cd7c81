use std::path::PathBuf;

use chrono::Utc;
use hive_protocol::{AgentSessionId, CellId, CellStatus, TemplateId, WorkspaceId};
use sqlx::{Row, SqlitePool};
use tracing::{debug, info};

use crate::errors::StoreError;
use crate::models::{Cell, CellPatch, NewCell};
use crate::utils::{bool_to_i64, column_to_enum, enum_to_column, i64_to_bool, parse_datetime};

fn row_to_cell(row: sqlx::sqlite::SqliteRow) -> Result<Cell, StoreError> {
    Ok(Cell {
        id: CellId::new(row.get::<String, _>("id")),
        name: row.get("name"),
        template_id: TemplateId::new(row.get::<String, _>("template_id")),
        workspace_path: PathBuf::from(row.get::<String, _>("workspace_path")),
        workspace_root_path: PathBuf::from(row.get::<String, _>("workspace_root_path")),
        workspace_id: WorkspaceId::new(row.get::<String, _>("workspace_id")),
        description: row.get("description"),
        status: column_to_enum(&row.get::<String, _>("status"))?,
        opencode_session_id: row
            .get::<Option<String>, _>("opencode_session_id")
            .map(AgentSessionId::new),
        resume_agent_session_on_startup: i64_to_bool(
            row.get::<i64, _>("resume_agent_session_on_startup"),
        ),
        last_setup_error: row.get("last_setup_error"),
        created_at: parse_datetime(&row.get::<String, _>("created_at"))
            .map_err(|e| StoreError::Database(sqlx::Error::Decode(Box::new(e))))?,
        updated_at: parse_datetime(&row.get::<String, _>("updated_at"))
            .map_err(|e| StoreError::Database(sqlx::Error::Decode(Box::new(e))))?,
    })
}

const SELECT_CELL: &str = "SELECT id, name, template_id, workspace_path, workspace_root_path, \
     workspace_id, description, status, opencode_session_id, \
     resume_agent_session_on_startup, last_setup_error, created_at, updated_at \
     FROM cells";

/// Same field extraction as `row_to_cell`, but reading columns under a
/// prefix — used by `services::list_all_services_with_cells`'s joined
/// query, where both tables' `id`/`name`/`status`/... columns would
/// otherwise collide.
pub(crate) fn row_to_cell_prefixed(
    row: &sqlx::sqlite::SqliteRow,
    prefix: &str,
) -> Result<Cell, StoreError> {
    Ok(Cell {
        id: CellId::new(row.get::<String, _>(format!("{prefix}id").as_str())),
        name: row.get(format!("{prefix}name").as_str()),
        template_id: TemplateId::new(row.get::<String, _>(format!("{prefix}template_id").as_str())),
        workspace_path: PathBuf::from(
            row.get::<String, _>(format!("{prefix}workspace_path").as_str()),
        ),
        workspace_root_path: PathBuf::from(
            row.get::<String, _>(format!("{prefix}workspace_root_path").as_str()),
        ),
        workspace_id: WorkspaceId::new(row.get::<String, _>(format!("{prefix}workspace_id").as_str())),
        description: row.get(format!("{prefix}description").as_str()),
        status: column_to_enum(&row.get::<String, _>(format!("{prefix}status").as_str()))?,
        opencode_session_id: row
            .get::<Option<String>, _>(format!("{prefix}opencode_session_id").as_str())
            .map(AgentSessionId::new),
        resume_agent_session_on_startup: i64_to_bool(row.get::<i64, _>(
            format!("{prefix}resume_agent_session_on_startup").as_str(),
        )),
        last_setup_error: row.get(format!("{prefix}last_setup_error").as_str()),
        created_at: parse_datetime(&row.get::<String, _>(format!("{prefix}created_at").as_str()))
            .map_err(|e| StoreError::Database(sqlx::Error::Decode(Box::new(e))))?,
        updated_at: parse_datetime(&row.get::<String, _>(format!("{prefix}updated_at").as_str()))
            .map_err(|e| StoreError::Database(sqlx::Error::Decode(Box::new(e))))?,
    })
}

/// Create a new cell row. Fails with `StoreError::AlreadyExists` if a cell
/// with the same `id` or `name` already exists.
pub async fn insert_cell(pool: &SqlitePool, new_cell: NewCell) -> Result<Cell, StoreError> {
    let now = Utc::now();
    let status = CellStatus::Spawning;

    sqlx::query(
        "INSERT INTO cells (id, name, template_id, workspace_path, workspace_root_path, \
         workspace_id, description, status, opencode_session_id, \
         resume_agent_session_on_startup, last_setup_error, created_at, updated_at) \
         VALUES (?, ?, ?, ?, ?, ?, ?, ?, NULL, 0, NULL, ?, ?)",
    )
    .bind(new_cell.id.as_str())
    .bind(&new_cell.name)
    .bind(new_cell.template_id.as_str())
    .bind(new_cell.workspace_path.to_string_lossy().to_string())
    .bind(new_cell.workspace_root_path.to_string_lossy().to_string())
    .bind(new_cell.workspace_id.as_str())
    .bind(&new_cell.description)
    .bind(enum_to_column(&status))
    .bind(now.to_rfc3339())
    .bind(now.to_rfc3339())
    .execute(pool)
    .await
    .map_err(|e| StoreError::from_sqlx(e, || format!("cell {}", new_cell.id)))?;

    info!(event = "store.cells.insert_completed", cell_id = %new_cell.id);

    Ok(Cell {
        id: new_cell.id,
        name: new_cell.name,
        template_id: new_cell.template_id,
        workspace_path: new_cell.workspace_path,
        workspace_root_path: new_cell.workspace_root_path,
        workspace_id: new_cell.workspace_id,
        description: new_cell.description,
        status,
        opencode_session_id: None,
        resume_agent_session_on_startup: false,
        last_setup_error: None,
        created_at: now,
        updated_at: now,
    })
}

pub async fn get_cell(pool: &SqlitePool, id: &CellId) -> Result<Cell, StoreError> {
    let row = sqlx::query(&format!("{SELECT_CELL} WHERE id = ?"))
        .bind(id.as_str())
        .fetch_optional(pool)
        .await
        .map_err(|e| StoreError::from_sqlx(e, || format!("cell {id}")))?
        .ok_or_else(|| StoreError::NotFound(format!("cell {id}")))?;
    row_to_cell(row)
}

pub async fn get_cell_by_session_id(
    pool: &SqlitePool,
    session_id: &AgentSessionId,
) -> Result<Option<Cell>, StoreError> {
    let row = sqlx::query(&format!("{SELECT_CELL} WHERE opencode_session_id = ?"))
        .bind(session_id.as_str())
        .fetch_optional(pool)
        .await
        .map_err(StoreError::Database)?;
    row.map(row_to_cell).transpose()
}

pub async fn list_cells_by_workspace(
    pool: &SqlitePool,
    workspace_id: &WorkspaceId,
) -> Result<Vec<Cell>, StoreError> {
    let rows = sqlx::query(&format!("{SELECT_CELL} WHERE workspace_id = ? ORDER BY created_at ASC"))
        .bind(workspace_id.as_str())
        .fetch_all(pool)
        .await
        .map_err(StoreError::Database)?;
    rows.into_iter().map(row_to_cell).collect()
}

pub async fn list_cells(pool: &SqlitePool) -> Result<Vec<Cell>, StoreError> {
    let rows = sqlx::query(&format!("{SELECT_CELL} ORDER BY created_at ASC"))
        .fetch_all(pool)
        .await
        .map_err(StoreError::Database)?;
    rows.into_iter().map(row_to_cell).collect()
}

/// Cells whose status is `spawning` — re-entered by the provisioning engine
/// on process startup.
pub async fn list_spawning_cells(pool: &SqlitePool) -> Result<Vec<Cell>, StoreError> {
    let rows = sqlx::query(&format!("{SELECT_CELL} WHERE status = ? ORDER BY created_at ASC"))
        .bind(enum_to_column(&CellStatus::Spawning))
        .fetch_all(pool)
        .await
        .map_err(StoreError::Database)?;
    rows.into_iter().map(row_to_cell).collect()
}

/// Apply a sparse patch to a cell row, bumping `updated_at`. No-op fields
/// that weren't set in the patch keep their persisted value.
pub async fn update_cell(
    pool: &SqlitePool,
    id: &CellId,
    patch: CellPatch,
) -> Result<Cell, StoreError> {
    let existing = get_cell(pool, id).await?;
    let now = Utc::now();

    let status = patch.status.unwrap_or(existing.status);
    let opencode_session_id = patch
        .opencode_session_id
        .unwrap_or(existing.opencode_session_id.clone());
    let resume = patch
        .resume_agent_session_on_startup
        .unwrap_or(existing.resume_agent_session_on_startup);
    let last_setup_error = patch
        .last_setup_error
        .unwrap_or(existing.last_setup_error.clone());

    sqlx::query(
        "UPDATE cells SET status = ?, opencode_session_id = ?, \
         resume_agent_session_on_startup = ?, last_setup_error = ?, updated_at = ? WHERE id = ?",
    )
    .bind(enum_to_column(&status))
    .bind(opencode_session_id.as_ref().map(|s| s.as_str()))
    .bind(bool_to_i64(resume))
    .bind(&last_setup_error)
    .bind(now.to_rfc3339())
    .bind(id.as_str())
    .execute(pool)
    .await
    .map_err(StoreError::Database)?;

    debug!(event = "store.cells.update_completed", cell_id = %id);

    Ok(Cell {
        status,
        opencode_session_id,
        resume_agent_session_on_startup: resume,
        last_setup_error,
        updated_at: now,
        ..existing
    })
}

/// Delete a cell. Cascades to its services and provisioning state row via
/// `ON DELETE CASCADE`.
pub async fn delete_cell(pool: &SqlitePool, id: &CellId) -> Result<(), StoreError> {
    let result = sqlx::query("DELETE FROM cells WHERE id = ?")
        .bind(id.as_str())
        .execute(pool)
        .await
        .map_err(StoreError::Database)?;
    if result.rows_affected() == 0 {
        return Err(StoreError::NotFound(format!("cell {id}")));
    }
    info!(event = "store.cells.delete_completed", cell_id = %id);
    Ok(())
}
