use super::storage::StorageError;
use super::store::StoreError;

/// Outcome taxonomy shared by every public program operation.
#[derive(Debug, thiserror::Error)]
pub enum ProgramError {
    #[error("{entity} {id} not found")]
    NotFound { entity: &'static str, id: String },
    #[error("conflict: {0}")]
    Conflict(String),
    #[error("invalid request: {0}")]
    Validation(String),
    #[error("precondition failed: {0}")]
    Precondition(String),
    #[error(transparent)]
    Storage(#[from] StorageError),
    #[error("not authorized: {0}")]
    Authz(String),
    #[error(transparent)]
    Store(StoreError),
}

impl ProgramError {
    pub(crate) fn not_found(entity: &'static str, id: impl ToString) -> Self {
        Self::NotFound {
            entity,
            id: id.to_string(),
        }
    }

    pub const fn kind(&self) -> &'static str {
        match self {
            ProgramError::NotFound { .. } => "not_found",
            ProgramError::Conflict(_) => "conflict",
            ProgramError::Validation(_) => "validation",
            ProgramError::Precondition(_) => "precondition",
            ProgramError::Storage(_) => "storage",
            ProgramError::Authz(_) => "authz",
            ProgramError::Store(_) => "store",
        }
    }
}

impl From<StoreError> for ProgramError {
    fn from(value: StoreError) -> Self {
        match value {
            StoreError::Conflict => {
                Self::Conflict("concurrent update won; re-read and retry".to_string())
            }
            StoreError::NotFound { collection, id } => Self::NotFound {
                entity: collection.name(),
                id,
            },
            other => Self::Store(other),
        }
    }
}

/// Trims a mandatory free-text reason, rejecting blank input.
pub(crate) fn require_reason(reason: &str) -> Result<String, ProgramError> {
    let trimmed = reason.trim();
    if trimmed.is_empty() {
        return Err(ProgramError::Validation("reason required".to_string()));
    }
    Ok(trimmed.to_string())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::program::store::Collection;

    #[test]
    fn store_errors_map_onto_the_taxonomy() {
        assert!(matches!(
            ProgramError::from(StoreError::Conflict),
            ProgramError::Conflict(_)
        ));

        let missing = ProgramError::from(StoreError::NotFound {
            collection: Collection::Pairings,
            id: "par-9".to_string(),
        });
        assert_eq!(missing.to_string(), "pairings par-9 not found");
        assert_eq!(missing.kind(), "not_found");

        let offline = ProgramError::from(StoreError::Unavailable("timeout".to_string()));
        assert_eq!(offline.kind(), "store");
    }

    #[test]
    fn reasons_are_trimmed_and_required() {
        assert_eq!(require_reason("  late upload ").expect("valid"), "late upload");
        assert!(matches!(
            require_reason(" \t"),
            Err(ProgramError::Validation(_))
        ));
    }
}
