use thiserror::Error;

/// Error taxonomy for the consolidation engine.
///
/// Propagation policy: per-row errors (`RowConversion`, `UnresolvedTeam`)
/// never escalate past the row; per-step errors never abort the run; only
/// `ValidationNotSatisfied` is a hard stop, and only inside the cleanup gate.
#[derive(Debug, Error)]
pub enum MigrateError {
    /// Source table absent. Expected in partially-deployed environments;
    /// steps log this as `skipped`, never `failed`.
    #[error("source table {table} does not exist")]
    SourceMissing { table: String },

    /// A single source row could not be coerced into the target shape.
    #[error("row {legacy_id} of {table}: {reason}")]
    RowConversion {
        table: String,
        legacy_id: i64,
        reason: String,
    },

    /// Team name not in the canonical vocabulary. The record is skipped and
    /// flagged for manual data-quality follow-up, not migrated.
    #[error("unresolved team name {raw:?}")]
    UnresolvedTeam { raw: String },

    /// A prerequisite step failed earlier in the run.
    #[error("dependency step {dependency} failed")]
    DependencyFailed { dependency: String },

    /// Cleanup preconditions unmet; zero destructive actions were taken.
    #[error("validation not satisfied: {reason}")]
    ValidationNotSatisfied { reason: String },

    /// An individual DROP failed during cleanup. Recorded, cleanup continues,
    /// overall report marked partial.
    #[error("destructive operation failed on {object}: {reason}")]
    DestructiveOperation { object: String, reason: String },

    #[error(transparent)]
    Db(#[from] sqlx::Error),
}

impl MigrateError {
    /// True for errors that reject a single row without failing the step.
    pub fn is_row_level(&self) -> bool {
        matches!(
            self,
            MigrateError::RowConversion { .. } | MigrateError::UnresolvedTeam { .. }
        )
    }
}
