use chrono::Utc;
use hive_protocol::{CellId, ModelId, Mode, ProviderId, ProvisioningStatus, RunId};
use sqlx::{Row, SqlitePool};
use tracing::debug;

use crate::errors::StoreError;
use crate::models::{CellProvisioningState, ProvisioningPatch};
use crate::utils::{column_to_enum, enum_to_column, parse_datetime};

fn row_to_state(row: sqlx::sqlite::SqliteRow) -> Result<CellProvisioningState, StoreError> {
    Ok(CellProvisioningState {
        cell_id: CellId::new(row.get::<String, _>("cell_id")),
        run_id: RunId::new(row.get::<String, _>("run_id")),
        step: row.get("step"),
        status: column_to_enum(&row.get::<String, _>("status"))?,
        attempt: row.get::<i64, _>("attempt") as u32,
        last_error: row.get("last_error"),
        model_id_override: row.get::<Option<String>, _>("model_id_override").map(ModelId::new),
        provider_id_override: row
            .get::<Option<String>, _>("provider_id_override")
            .map(ProviderId::new),
        start_mode: row
            .get::<Option<String>, _>("start_mode")
            .map(|s| column_to_enum(&s))
            .transpose()?,
        started_at: parse_datetime(&row.get::<String, _>("started_at"))
            .map_err(|e| StoreError::Database(sqlx::Error::Decode(Box::new(e))))?,
        updated_at: parse_datetime(&row.get::<String, _>("updated_at"))
            .map_err(|e| StoreError::Database(sqlx::Error::Decode(Box::new(e))))?,
    })
}

const SELECT_STATE: &str = "SELECT cell_id, run_id, step, status, attempt, last_error, \
     model_id_override, provider_id_override, start_mode, started_at, updated_at \
     FROM cell_provisioning_states";

/// Upsert the provisioning state row for a cell. Starting a brand-new run
/// (fresh `run_id`) resets `attempt` to 1; resuming the same `run_id`
/// should instead go through `update_provisioning_state` with an
/// incremented `attempt`.
pub async fn upsert_provisioning_state(
    pool: &SqlitePool,
    cell_id: &CellId,
    run_id: RunId,
    step: impl Into<String>,
    status: ProvisioningStatus,
) -> Result<CellProvisioningState, StoreError> {
    let now = Utc::now();
    let step = step.into();

    sqlx::query(
        "INSERT INTO cell_provisioning_states \
         (cell_id, run_id, step, status, attempt, last_error, model_id_override, \
          provider_id_override, start_mode, started_at, updated_at) \
         VALUES (?, ?, ?, ?, 1, NULL, NULL, NULL, NULL, ?, ?) \
         ON CONFLICT(cell_id) DO UPDATE SET \
         run_id = excluded.run_id, step = excluded.step, status = excluded.status, \
         attempt = excluded.attempt, last_error = excluded.last_error, \
         model_id_override = excluded.model_id_override, \
         provider_id_override = excluded.provider_id_override, \
         start_mode = excluded.start_mode, updated_at = excluded.updated_at",
    )
    .bind(cell_id.as_str())
    .bind(run_id.as_str())
    .bind(&step)
    .bind(enum_to_column(&status))
    .bind(now.to_rfc3339())
    .bind(now.to_rfc3339())
    .execute(pool)
    .await
    .map_err(StoreError::Database)?;

    get_provisioning_state(pool, cell_id)
        .await?
        .ok_or_else(|| StoreError::NotFound(format!("provisioning state for cell {cell_id}")))
}

pub async fn get_provisioning_state(
    pool: &SqlitePool,
    cell_id: &CellId,
) -> Result<Option<CellProvisioningState>, StoreError> {
    let row = sqlx::query(&format!("{SELECT_STATE} WHERE cell_id = ?"))
        .bind(cell_id.as_str())
        .fetch_optional(pool)
        .await
        .map_err(StoreError::Database)?;
    row.map(row_to_state).transpose()
}

/// Apply a sparse patch to the provisioning state row, bumping
/// `updated_at`. Fails `NotFound` if the cell has no provisioning row yet —
/// callers must `upsert_provisioning_state` first to start a run.
pub async fn update_provisioning_state(
    pool: &SqlitePool,
    cell_id: &CellId,
    patch: ProvisioningPatch,
) -> Result<CellProvisioningState, StoreError> {
    let existing = get_provisioning_state(pool, cell_id)
        .await?
        .ok_or_else(|| StoreError::NotFound(format!("provisioning state for cell {cell_id}")))?;
    let now = Utc::now();

    let run_id = patch.run_id.unwrap_or_else(|| existing.run_id.clone());
    let step = patch.step.unwrap_or_else(|| existing.step.clone());
    let status = patch.status.unwrap_or(existing.status);
    let attempt = patch.attempt.unwrap_or(existing.attempt);
    let last_error = patch.last_error.unwrap_or_else(|| existing.last_error.clone());
    let model_id_override = patch
        .model_id_override
        .unwrap_or_else(|| existing.model_id_override.clone());
    let provider_id_override = patch
        .provider_id_override
        .unwrap_or_else(|| existing.provider_id_override.clone());
    let start_mode = patch.start_mode.unwrap_or(existing.start_mode);

    sqlx::query(
        "UPDATE cell_provisioning_states SET run_id = ?, step = ?, status = ?, attempt = ?, \
         last_error = ?, model_id_override = ?, provider_id_override = ?, start_mode = ?, \
         updated_at = ? WHERE cell_id = ?",
    )
    .bind(run_id.as_str())
    .bind(&step)
    .bind(enum_to_column(&status))
    .bind(attempt as i64)
    .bind(&last_error)
    .bind(model_id_override.as_ref().map(|m| m.as_str()))
    .bind(provider_id_override.as_ref().map(|p| p.as_str()))
    .bind(start_mode.map(|m| enum_to_column(&m)))
    .bind(now.to_rfc3339())
    .bind(cell_id.as_str())
    .execute(pool)
    .await
    .map_err(StoreError::Database)?;

    debug!(event = "store.provisioning.update_completed", cell_id = %cell_id, step = %step);

    Ok(CellProvisioningState {
        run_id,
        step,
        status,
        attempt,
        last_error,
        model_id_override,
        provider_id_override,
        start_mode,
        updated_at: now,
        ..existing
    })
}
