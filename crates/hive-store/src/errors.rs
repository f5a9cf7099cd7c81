use hive_protocol::HiveError;

/// All error types for the hive-store crate.
#[derive(Debug, thiserror::Error)]
#[non_exhaustive]
pub enum StoreError {
    #[error("not found: {0}")]
    NotFound(String),

    #[error("already exists: {0}")]
    AlreadyExists(String),

    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),

    #[error("migration error: {0}")]
    Migration(#[from] sqlx::migrate::MigrateError),

    #[error("serialization error: {0}")]
    Serde(#[from] serde_json::Error),
}

impl StoreError {
    /// Translate a `sqlx::Error` at the repository boundary: `RowNotFound`
    /// becomes `StoreError::NotFound`, a unique-constraint violation becomes
    /// `StoreError::AlreadyExists`, everything else passes through as-is.
    pub fn from_sqlx(err: sqlx::Error, not_found_message: impl FnOnce() -> String) -> Self {
        match &err {
            sqlx::Error::RowNotFound => StoreError::NotFound(not_found_message()),
            sqlx::Error::Database(db_err) if db_err.is_unique_violation() => {
                StoreError::AlreadyExists(db_err.message().to_string())
            }
            _ => StoreError::Database(err),
        }
    }
}

impl HiveError for StoreError {
    fn error_code(&self) -> &'static str {
        match self {
            StoreError::NotFound(_) => "STORE_NOT_FOUND",
            StoreError::AlreadyExists(_) => "STORE_ALREADY_EXISTS",
            StoreError::Database(_) => "STORE_DATABASE_ERROR",
            StoreError::Migration(_) => "STORE_MIGRATION_ERROR",
            StoreError::Serde(_) => "STORE_SERDE_ERROR",
        }
    }

    fn is_user_error(&self) -> bool {
        matches!(
            self,
            StoreError::NotFound(_) | StoreError::AlreadyExists(_)
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn error_codes() {
        assert_eq!(
            StoreError::NotFound("cell x".into()).error_code(),
            "STORE_NOT_FOUND"
        );
        assert_eq!(
            StoreError::AlreadyExists("cell x".into()).error_code(),
            "STORE_ALREADY_EXISTS"
        );
    }

    #[test]
    fn user_error_classification() {
        assert!(StoreError::NotFound("x".into()).is_user_error());
        assert!(StoreError::AlreadyExists("x".into()).is_user_error());
    }
}
