use std::error::Error;

/// Shared contract every crate-level error enum implements so a caller above
/// this core (outside its scope) can map errors to wire codes without
/// re-deriving a taxonomy per crate.
pub trait HiveError: Error + Send + Sync + 'static {
    /// Stable, machine-readable code for this error variant.
    fn error_code(&self) -> &'static str;

    /// Whether the error stems from caller input/state rather than an
    /// internal fault. Defaults to `false` (log as error, not a warning).
    fn is_user_error(&self) -> bool {
        false
    }
}
